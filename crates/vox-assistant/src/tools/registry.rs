use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vox_ai::{Tool, VoxError};

/// Separator that stands in for `.` in tool names sent to the model; most
/// providers only accept `[A-Za-z0-9_-]` there.
const WIRE_NAME_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Safe,
    Sensitive,
    Restricted,
}

impl ToolCategory {
    pub fn requires_confirmation(self) -> bool {
        !matches!(self, ToolCategory::Safe)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub category: ToolCategory,
    pub is_baseline: bool,
    pub description: String,
    pub input_schema: Value,
    /// The tool asks the user itself, so the gateway skips its generic prompt.
    pub self_confirming: bool,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        category: ToolCategory,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            is_baseline: false,
            description: description.into(),
            input_schema,
            self_confirming: false,
        }
    }

    pub fn baseline(mut self) -> Self {
        self.is_baseline = true;
        self
    }

    pub fn self_confirming(mut self) -> Self {
        self.self_confirming = true;
        self
    }

    pub fn wire_name(&self) -> String {
        sanitize_tool_name(&self.name)
    }
}

/// A tool implementation. Errors become error `ToolResult`s in the gateway.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, arguments: Value) -> Result<String, VoxError>;
}

/// Bridge to tools living outside the process (an MCP server, for example).
/// Routed tools are registered under the route's prefix and dispatched by
/// full name.
#[async_trait]
pub trait ExternalToolRoute: Send + Sync {
    fn prefix(&self) -> &str;

    async fn call(&self, tool_name: &str, arguments: Value) -> Result<String, VoxError>;
}

struct RoutedToolHandler {
    route: Arc<dyn ExternalToolRoute>,
    tool_name: String,
}

#[async_trait]
impl ToolHandler for RoutedToolHandler {
    async fn execute(&self, arguments: Value) -> Result<String, VoxError> {
        self.route.call(&self.tool_name, arguments).await
    }
}

#[derive(Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub handler: Arc<dyn ToolHandler>,
}

#[derive(Default)]
struct RegistryState {
    tools: BTreeMap<String, RegisteredTool>,
    enabled_names: BTreeSet<String>,
    ttl_deadline: Option<Instant>,
    ttl_task: Option<JoinHandle<()>>,
    ttl_generation: u64,
}

impl RegistryState {
    fn cancel_ttl(&mut self) {
        if let Some(task) = self.ttl_task.take() {
            task.abort();
        }
        self.ttl_deadline = None;
        self.ttl_generation = self.ttl_generation.wrapping_add(1);
    }

    /// Expires elevation when the deadline passed but the timer never ran,
    /// e.g. when the runtime was paused or busy.
    fn expire_if_due(&mut self) {
        if let Some(deadline) = self.ttl_deadline {
            if Instant::now() >= deadline {
                info!(
                    cleared = self.enabled_names.len(),
                    "tool elevation expired"
                );
                self.enabled_names.clear();
                self.cancel_ttl();
            }
        }
    }
}

/// Every tool known to the assistant plus the set of non-baseline tools
/// currently elevated. Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    state: Arc<Mutex<RegistryState>>,
}

/// Non-owning handle, held by tools that need the registry they live in.
#[derive(Clone)]
pub struct WeakToolRegistry {
    state: Weak<Mutex<RegistryState>>,
}

impl WeakToolRegistry {
    pub fn upgrade(&self) -> Option<ToolRegistry> {
        self.state.upgrade().map(|state| ToolRegistry { state })
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downgrade(&self) -> WeakToolRegistry {
        WeakToolRegistry {
            state: Arc::downgrade(&self.state),
        }
    }

    /// Upserts by name.
    pub fn register(&self, descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) {
        let mut state = self.lock();
        if state.tools.contains_key(&descriptor.name) {
            debug!(tool = descriptor.name.as_str(), "replacing tool descriptor");
        }
        state.tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                handler,
            },
        );
    }

    /// Registers `descriptors` as tools served by `route`. Names without the
    /// route's `prefix.` are prefixed.
    pub fn register_route(
        &self,
        route: Arc<dyn ExternalToolRoute>,
        descriptors: impl IntoIterator<Item = ToolDescriptor>,
    ) {
        let prefix = route.prefix().trim_end_matches('.').to_string();
        for mut descriptor in descriptors {
            if !descriptor.name.starts_with(&format!("{prefix}.")) {
                descriptor.name = format!("{prefix}.{}", descriptor.name);
            }
            let handler = Arc::new(RoutedToolHandler {
                route: route.clone(),
                tool_name: descriptor.name.clone(),
            });
            self.register(descriptor, handler);
        }
    }

    pub fn get(&self, name: &str) -> Option<RegisteredTool> {
        self.lock().tools.get(name).cloned()
    }

    /// Looks a tool up by registered name or by its wire name.
    pub fn resolve(&self, name: &str) -> Option<RegisteredTool> {
        let state = self.lock();
        if let Some(tool) = state.tools.get(name) {
            return Some(tool.clone());
        }
        state.tools.get(&unsanitize_tool_name(name)).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.lock().tools.keys().cloned().collect()
    }

    /// Adds every known name to the enabled set and returns those actually
    /// enabled. Unknown names are skipped.
    pub fn enable<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        let mut state = self.lock();
        state.expire_if_due();
        let mut enabled = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            let resolved = if state.tools.contains_key(name) {
                name.to_string()
            } else {
                unsanitize_tool_name(name)
            };
            if state.tools.contains_key(&resolved) {
                state.enabled_names.insert(resolved.clone());
                enabled.push(resolved);
            } else {
                warn!(tool = name, "ignoring request to enable unknown tool");
            }
        }
        enabled
    }

    pub fn enable_ttl(&self, minutes: u64) {
        self.enable_for(Duration::from_secs(minutes.saturating_mul(60)));
    }

    /// Restarts the single elevation timer; when it fires the enabled set
    /// is cleared.
    pub fn enable_for(&self, ttl: Duration) {
        let mut state = self.lock();
        state.cancel_ttl();
        let deadline = Instant::now() + ttl;
        state.ttl_deadline = Some(deadline);
        let generation = state.ttl_generation;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = self.state.clone();
                state.ttl_task = Some(handle.spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    let mut state = shared.lock().unwrap_or_else(|poison| poison.into_inner());
                    if state.ttl_generation != generation {
                        return;
                    }
                    info!(
                        cleared = state.enabled_names.len(),
                        "tool elevation expired"
                    );
                    state.enabled_names.clear();
                    state.ttl_deadline = None;
                    state.ttl_task = None;
                }));
            }
            Err(_) => {
                debug!("no tokio runtime, tool elevation expires lazily");
            }
        }
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.enabled_names.clear();
        state.cancel_ttl();
        debug!("tool elevation reset");
    }

    pub fn enabled_names(&self) -> Vec<String> {
        let mut state = self.lock();
        state.expire_if_due();
        state.enabled_names.iter().cloned().collect()
    }

    pub fn ttl_deadline(&self) -> Option<Instant> {
        let mut state = self.lock();
        state.expire_if_due();
        state.ttl_deadline
    }

    /// Enabled tools, plus baseline tools whose category is permitted.
    pub fn available_tools(&self, permissions: &[ToolCategory]) -> Vec<ToolDescriptor> {
        let mut state = self.lock();
        state.expire_if_due();
        state
            .tools
            .values()
            .filter(|tool| {
                state.enabled_names.contains(&tool.descriptor.name)
                    || (tool.descriptor.is_baseline
                        && permissions.contains(&tool.descriptor.category))
            })
            .map(|tool| tool.descriptor.clone())
            .collect()
    }

    /// Schemas for the model request, with wire-safe names.
    pub fn available_tool_schemas(&self, permissions: &[ToolCategory]) -> Vec<Tool> {
        self.available_tools(permissions)
            .into_iter()
            .map(|descriptor| Tool {
                name: descriptor.wire_name(),
                description: descriptor.description,
                parameters: descriptor.input_schema,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

pub fn sanitize_tool_name(name: &str) -> String {
    name.replace('.', WIRE_NAME_SEPARATOR)
}

pub fn unsanitize_tool_name(name: &str) -> String {
    name.replace(WIRE_NAME_SEPARATOR, ".")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Noop;

    #[async_trait]
    impl ToolHandler for Noop {
        async fn execute(&self, _arguments: Value) -> Result<String, VoxError> {
            Ok(String::new())
        }
    }

    fn descriptor(name: &str, category: ToolCategory) -> ToolDescriptor {
        ToolDescriptor::new(name, category, format!("{name} tool"), json!({"type": "object"}))
    }

    #[test]
    fn wire_names_round_trip_dots() {
        assert_eq!(sanitize_tool_name("mcp.calendar.list"), "mcp__calendar__list");
        assert_eq!(unsanitize_tool_name("mcp__calendar__list"), "mcp.calendar.list");
    }

    #[test]
    fn resolve_accepts_wire_names() {
        let registry = ToolRegistry::new();
        registry.register(descriptor("mcp.notes.read", ToolCategory::Safe), Arc::new(Noop));

        let resolved = registry
            .resolve("mcp__notes__read")
            .expect("wire name should resolve");
        assert_eq!(resolved.descriptor.name, "mcp.notes.read");
        assert!(registry.resolve("mcp__notes__write").is_none());
    }

    #[test]
    fn register_replaces_existing_descriptor() {
        let registry = ToolRegistry::new();
        registry.register(descriptor("clock", ToolCategory::Safe), Arc::new(Noop));
        registry.register(
            descriptor("clock", ToolCategory::Sensitive).baseline(),
            Arc::new(Noop),
        );

        assert_eq!(registry.tool_names(), vec!["clock"]);
        let tool = registry.get("clock").expect("clock");
        assert_eq!(tool.descriptor.category, ToolCategory::Sensitive);
        assert!(tool.descriptor.is_baseline);
    }

    #[test]
    fn expired_deadline_clears_without_runtime() {
        let registry = ToolRegistry::new();
        registry.register(descriptor("shell", ToolCategory::Restricted), Arc::new(Noop));
        registry.enable(&["shell"]);
        registry.enable_for(Duration::ZERO);

        assert!(registry.enabled_names().is_empty());
        assert!(registry.ttl_deadline().is_none());
    }
}
