//! Tool registry for managing tool handlers.
//!
//! Provides a `ToolHandler` trait for implementing tools, a `ToolCatalog`
//! registration table of factories, and a `ToolRegistry` that builds the
//! active tool set from the catalog and swaps it atomically on reload.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use rmcp::model::{CallToolResult, JsonObject, Tool as McpTool};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::tools::Dispatcher;
use crate::types::CallerId;

/// Number of tools returned per `list_tools` page.
const TOOLS_PAGE_SIZE: usize = 100;

/// Context passed to tool handlers during execution.
#[derive(Clone)]
pub struct ToolContext {
    /// Who asked for this call.
    pub caller: CallerId,
    /// Dispatcher the call arrived through, for tools that invoke other tools.
    pub dispatcher: Dispatcher,
}

/// Trait for handling tool invocations.
///
/// Each tool implements this trait to define its schema and execution logic.
pub trait ToolHandler: Send + Sync {
    /// Returns the tool's name (e.g., "time_tool").
    fn name(&self) -> &str;

    /// Returns the tool's human-readable title.
    fn title(&self) -> Option<&str> {
        None
    }

    /// Returns the tool's description.
    fn description(&self) -> &str;

    /// Returns the input schema for this tool.
    fn input_schema(&self) -> JsonObject;

    /// Returns the output schema for this tool (optional).
    fn output_schema(&self) -> Option<JsonObject> {
        None
    }

    /// Executes the tool with the given arguments.
    fn execute(
        &self,
        args: JsonObject,
        ctx: &ToolContext,
    ) -> Pin<Box<dyn Future<Output = Result<CallToolResult>> + Send + '_>>;

    /// Releases external resources before the handler is replaced by a reload.
    fn teardown(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(std::future::ready(Ok(())))
    }

    /// Converts this handler to an `McpTool` for use in `list_tools`.
    fn to_mcp_tool(&self) -> McpTool {
        let mut tool = McpTool::new(
            self.name().to_string(),
            self.description().to_string(),
            Arc::new(self.input_schema()),
        );
        tool.title = self.title().map(|s| s.to_string());
        tool.output_schema = self.output_schema().map(Arc::new);
        tool
    }
}

type BuildFn = dyn Fn() -> Result<Arc<dyn ToolHandler>> + Send + Sync;

/// A named constructor for one tool.
#[derive(Clone)]
pub struct ToolFactory {
    label: String,
    build: Arc<BuildFn>,
}

impl ToolFactory {
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Registration table the registry builds its tool sets from.
///
/// Factories run again on every reload so each tool set gets fresh handler
/// instances.
#[derive(Clone, Default)]
pub struct ToolCatalog {
    factories: Vec<ToolFactory>,
}

impl ToolCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `label`.
    pub fn register<F>(mut self, label: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn ToolHandler>> + Send + Sync + 'static,
    {
        self.factories.push(ToolFactory {
            label: label.into(),
            build: Arc::new(build),
        });
        self
    }

    /// Register a cloneable handler; every build hands out a fresh clone.
    pub fn register_handler<T: ToolHandler + Clone + 'static>(self, handler: T) -> Self {
        let label = handler.name().to_string();
        self.register(label, move || {
            Ok(Arc::new(handler.clone()) as Arc<dyn ToolHandler>)
        })
    }

    pub fn factories(&self) -> &[ToolFactory] {
        &self.factories
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// An immutable `{name -> handler}` mapping. Never mutated once installed.
#[derive(Default)]
pub struct ToolSet {
    generation: u64,
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolSet {
    /// Reload counter; 0 means nothing has been loaded yet.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Tool names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn handlers(&self) -> impl Iterator<Item = &Arc<dyn ToolHandler>> {
        self.handlers.values()
    }
}

/// A factory that did not produce a usable tool.
#[derive(Debug, Clone, Serialize)]
pub struct FailedTool {
    pub factory: String,
    pub error: String,
}

/// What a load or reload installed.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub generation: u64,
    pub loaded: Vec<String>,
    pub failed: Vec<FailedTool>,
}

struct Loader {
    catalog: ToolCatalog,
    last_report: Option<LoadReport>,
}

/// Registry for managing tool handlers.
///
/// Readers take an `Arc<ToolSet>` snapshot and keep using it for the whole
/// call; reload builds a complete new set and swaps the pointer, so a call
/// never observes a partially replaced mapping.
pub struct ToolRegistry {
    active: RwLock<Arc<ToolSet>>,
    /// Held for the whole of a load or reload, which serializes them.
    loader: Mutex<Loader>,
}

impl ToolRegistry {
    /// Create a registry over `catalog`. Nothing is built until `load`.
    pub fn new(catalog: ToolCatalog) -> Self {
        Self {
            active: RwLock::new(Arc::new(ToolSet::default())),
            loader: Mutex::new(Loader {
                catalog,
                last_report: None,
            }),
        }
    }

    /// Replace the catalog used by subsequent loads and reloads.
    pub async fn set_catalog(&self, catalog: ToolCatalog) {
        self.loader.lock().await.catalog = catalog;
    }

    /// Build and install the tool set if it has not been loaded yet.
    ///
    /// A factory that fails (or panics) is skipped and reported; load as a
    /// whole never fails because of one broken tool.
    pub async fn load(&self) -> LoadReport {
        let mut loader = self.loader.lock().await;
        if let Some(report) = &loader.last_report {
            return report.clone();
        }

        let generation = self.generation().await + 1;
        let (set, report) = build_tool_set(&loader.catalog, generation);
        *self.active.write().await = Arc::new(set);

        info!(
            generation,
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Tool registry loaded"
        );
        loader.last_report = Some(report.clone());
        report
    }

    /// Rebuild the tool set from the catalog and swap it in.
    ///
    /// Order: build the new set, tear down every handler of the old set
    /// (failures are logged), then swap. Calls that already hold a snapshot
    /// of the old set finish on it.
    pub async fn reload(&self) -> LoadReport {
        let mut loader = self.loader.lock().await;

        let old = self.snapshot().await;
        let (set, report) = build_tool_set(&loader.catalog, old.generation() + 1);

        for handler in old.handlers() {
            if let Err(e) = handler.teardown().await {
                warn!(tool = handler.name(), "Teardown failed during reload: {:#}", e);
            }
        }

        *self.active.write().await = Arc::new(set);

        info!(
            generation = report.generation,
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Tool registry reloaded"
        );
        loader.last_report = Some(report.clone());
        report
    }

    /// Run every handler's teardown hook without replacing the set.
    pub async fn teardown_all(&self) {
        let current = self.snapshot().await;
        for handler in current.handlers() {
            if let Err(e) = handler.teardown().await {
                warn!(tool = handler.name(), "Teardown failed: {:#}", e);
            }
        }
    }

    /// Tear down every handler, then drop the catalog and the installed set.
    ///
    /// Handlers and factories may hold components that themselves hold this
    /// registry; clearing both breaks that cycle so the graph can be freed.
    /// Later dispatches see no tools.
    pub async fn close(&self) {
        let mut loader = self.loader.lock().await;
        self.teardown_all().await;

        loader.catalog = ToolCatalog::new();
        let generation = self.generation().await;
        *self.active.write().await = Arc::new(ToolSet {
            generation,
            handlers: BTreeMap::new(),
        });
        debug!(generation, "Tool registry closed");
    }

    /// The currently installed tool set.
    pub async fn snapshot(&self) -> Arc<ToolSet> {
        self.active.read().await.clone()
    }

    /// Get a tool handler by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.snapshot().await.get(name)
    }

    /// Check if a tool with the given name is registered.
    pub async fn contains(&self, name: &str) -> bool {
        self.snapshot().await.contains(name)
    }

    /// List all registered tool names.
    pub async fn list_names(&self) -> Vec<String> {
        self.snapshot().await.names()
    }

    /// Return the number of registered tools.
    pub async fn len(&self) -> usize {
        self.snapshot().await.len()
    }

    /// Return `true` if no tools are registered.
    pub async fn is_empty(&self) -> bool {
        self.snapshot().await.is_empty()
    }

    pub async fn generation(&self) -> u64 {
        self.snapshot().await.generation()
    }

    /// One page of tools as `McpTool`s plus the cursor of the next page.
    ///
    /// The cursor is the decimal offset of the next page; an unparsable
    /// cursor starts from the beginning.
    pub async fn list_tools(&self, cursor: Option<&str>) -> (Vec<McpTool>, Option<String>) {
        let set = self.snapshot().await;
        let offset = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);

        let tools: Vec<McpTool> = set
            .handlers()
            .skip(offset)
            .take(TOOLS_PAGE_SIZE)
            .map(|handler| handler.to_mcp_tool())
            .collect();

        let next = offset + tools.len();
        let next_cursor = (next < set.len()).then(|| next.to_string());
        (tools, next_cursor)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(ToolCatalog::new())
    }
}

fn build_tool_set(catalog: &ToolCatalog, generation: u64) -> (ToolSet, LoadReport) {
    let mut handlers: BTreeMap<String, Arc<dyn ToolHandler>> = BTreeMap::new();
    let mut failed = Vec::new();

    for factory in catalog.factories() {
        let built = catch_unwind(AssertUnwindSafe(|| (factory.build)()))
            .unwrap_or_else(|_| Err(anyhow::anyhow!("tool factory panicked")));

        match built {
            Ok(handler) => {
                let name = handler.name().to_string();
                if handlers.contains_key(&name) {
                    warn!(factory = factory.label(), tool = %name, "Duplicate tool name, skipping");
                    failed.push(FailedTool {
                        factory: factory.label().to_string(),
                        error: format!("duplicate tool name `{}`", name),
                    });
                    continue;
                }
                handlers.insert(name, handler);
            }
            Err(e) => {
                warn!(factory = factory.label(), "Failed to load tool: {:#}", e);
                failed.push(FailedTool {
                    factory: factory.label().to_string(),
                    error: format!("{:#}", e),
                });
            }
        }
    }

    let report = LoadReport {
        generation,
        loaded: handlers.keys().cloned().collect(),
        failed,
    };
    (ToolSet { generation, handlers }, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Content;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    /// Tool that reports the build version it was created with.
    struct VersionedTool {
        name: String,
        version: u64,
        torn_down: Arc<AtomicUsize>,
        fail_teardown: bool,
    }

    impl ToolHandler for VersionedTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "test tool"
        }

        fn input_schema(&self) -> JsonObject {
            json!({"type": "object"}).as_object().cloned().unwrap()
        }

        fn execute(
            &self,
            _args: JsonObject,
            _ctx: &ToolContext,
        ) -> Pin<Box<dyn Future<Output = Result<CallToolResult>> + Send + '_>> {
            let version = self.version;
            Box::pin(async move {
                Ok(CallToolResult::success(vec![Content::text(version.to_string())]))
            })
        }

        fn teardown(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            self.torn_down.fetch_add(1, Ordering::SeqCst);
            let fail = self.fail_teardown;
            Box::pin(async move {
                if fail {
                    anyhow::bail!("teardown exploded");
                }
                Ok(())
            })
        }
    }

    fn versioned_catalog(
        names: &[&str],
        version: Arc<AtomicU64>,
        torn_down: Arc<AtomicUsize>,
    ) -> ToolCatalog {
        names.iter().fold(ToolCatalog::new(), |catalog, name| {
            let name = name.to_string();
            let version = version.clone();
            let torn_down = torn_down.clone();
            catalog.register(name.clone(), move || {
                // Widen the window in which a half-built set could leak.
                std::thread::sleep(std::time::Duration::from_millis(2));
                Ok(Arc::new(VersionedTool {
                    name: name.clone(),
                    version: version.load(Ordering::SeqCst),
                    torn_down: torn_down.clone(),
                    fail_teardown: name == "b",
                }) as Arc<dyn ToolHandler>)
            })
        })
    }

    #[tokio::test]
    async fn test_load_installs_every_factory() {
        let registry = ToolRegistry::new(versioned_catalog(
            &["a", "b", "c"],
            Arc::new(AtomicU64::new(1)),
            Arc::new(AtomicUsize::new(0)),
        ));
        assert!(registry.is_empty().await);

        let report = registry.load().await;
        assert_eq!(report.generation, 1);
        assert_eq!(report.loaded, vec!["a", "b", "c"]);
        assert!(report.failed.is_empty());
        assert_eq!(registry.len().await, 3);
        assert!(registry.contains("b").await);
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let registry = ToolRegistry::new(versioned_catalog(
            &["a"],
            Arc::new(AtomicU64::new(1)),
            Arc::new(AtomicUsize::new(0)),
        ));
        registry.load().await;
        let again = registry.load().await;
        assert_eq!(again.generation, 1);
        assert_eq!(registry.generation().await, 1);
    }

    #[tokio::test]
    async fn test_broken_factory_is_skipped_and_reported() {
        let catalog = versioned_catalog(
            &["a", "c"],
            Arc::new(AtomicU64::new(1)),
            Arc::new(AtomicUsize::new(0)),
        )
        .register("broken", || Err(anyhow::anyhow!("missing dependency")))
        .register("panicky", || panic!("boom"));

        let registry = ToolRegistry::new(catalog);
        let report = registry.load().await;

        assert_eq!(report.loaded, vec!["a", "c"]);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].factory, "broken");
        assert!(report.failed[0].error.contains("missing dependency"));
        assert_eq!(report.failed[1].factory, "panicky");
    }

    #[tokio::test]
    async fn test_duplicate_names_keep_first() {
        let version = Arc::new(AtomicU64::new(7));
        let torn_down = Arc::new(AtomicUsize::new(0));
        let catalog = versioned_catalog(&["a", "a"], version, torn_down);

        let registry = ToolRegistry::new(catalog);
        let report = registry.load().await;
        assert_eq!(report.loaded, vec!["a"]);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].error.contains("duplicate"));
    }

    #[tokio::test]
    async fn test_reload_tears_down_old_set_and_swaps() {
        let version = Arc::new(AtomicU64::new(1));
        let torn_down = Arc::new(AtomicUsize::new(0));
        let registry = ToolRegistry::new(versioned_catalog(
            &["a", "b", "c"],
            version.clone(),
            torn_down.clone(),
        ));
        registry.load().await;
        let old = registry.snapshot().await;

        version.store(2, Ordering::SeqCst);
        let report = registry.reload().await;

        // Teardown of "b" fails; the others still run and the swap happens.
        assert_eq!(torn_down.load(Ordering::SeqCst), 3);
        assert_eq!(report.generation, 2);
        assert_eq!(registry.generation().await, 2);

        // The old snapshot is still fully usable.
        assert_eq!(old.generation(), 1);
        assert_eq!(old.len(), 3);
    }

    #[tokio::test]
    async fn test_close_tears_down_and_empties_registry() {
        let version = Arc::new(AtomicU64::new(1));
        let torn_down = Arc::new(AtomicUsize::new(0));
        let registry =
            ToolRegistry::new(versioned_catalog(&["a", "c"], version, torn_down.clone()));
        registry.load().await;

        registry.close().await;
        assert_eq!(torn_down.load(Ordering::SeqCst), 2);
        assert!(registry.snapshot().await.is_empty());
        assert!(registry.get("a").await.is_none());

        let report = registry.reload().await;
        assert!(report.loaded.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_snapshots_are_never_mixed_during_reload() {
        let version = Arc::new(AtomicU64::new(1));
        let torn_down = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(ToolRegistry::new(versioned_catalog(
            &["a", "b", "c", "d"],
            version.clone(),
            torn_down,
        )));
        registry.load().await;

        let mut readers = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            readers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..50 {
                    let set = registry.snapshot().await;
                    seen.push((set.generation(), set.len()));
                    tokio::task::yield_now().await;
                }
                seen
            }));
        }

        for v in 2..=4 {
            version.store(v, Ordering::SeqCst);
            registry.reload().await;
        }

        for reader in readers {
            for (generation, len) in reader.await.unwrap() {
                assert!((1..=4).contains(&generation));
                assert_eq!(len, 4, "snapshot of generation {} was partial", generation);
            }
        }
    }

    #[tokio::test]
    async fn test_list_tools_paginates() {
        let names: Vec<String> = (0..150).map(|i| format!("tool_{:03}", i)).collect();
        let catalog = names.iter().fold(ToolCatalog::new(), |catalog, name| {
            let name = name.clone();
            catalog.register(name.clone(), move || {
                Ok(Arc::new(VersionedTool {
                    name: name.clone(),
                    version: 1,
                    torn_down: Arc::new(AtomicUsize::new(0)),
                    fail_teardown: false,
                }) as Arc<dyn ToolHandler>)
            })
        });
        let registry = ToolRegistry::new(catalog);
        registry.load().await;

        let (first, cursor) = registry.list_tools(None).await;
        assert_eq!(first.len(), 100);
        assert_eq!(cursor.as_deref(), Some("100"));

        let (second, cursor) = registry.list_tools(cursor.as_deref()).await;
        assert_eq!(second.len(), 50);
        assert_eq!(second[0].name, "tool_100");
        assert!(cursor.is_none());
    }
}
