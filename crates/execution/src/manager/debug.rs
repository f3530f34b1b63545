//! Debug surface over the context manager.
//!
//! `DebugTool` is the typed programmatic surface; `ContextDebugger` wraps it
//! behind the command strings a maintenance shell or RPC endpoint speaks.

use crate::context::snapshot::ContextStateSnapshot;
use crate::error::{ExecutionError, Result};
use crate::manager::{ExecutionContextManager, ManagerStats};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Debug verbosity of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugMode {
    /// No debug output
    #[default]
    Off,
    /// Lifecycle events only
    Basic,
    /// Lifecycle plus per-record detail
    Verbose,
}

impl fmt::Display for DebugMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugMode::Off => write!(f, "off"),
            DebugMode::Basic => write!(f, "basic"),
            DebugMode::Verbose => write!(f, "verbose"),
        }
    }
}

impl FromStr for DebugMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(DebugMode::Off),
            "basic" => Ok(DebugMode::Basic),
            "verbose" => Ok(DebugMode::Verbose),
            _ => Err(format!("Unknown debug mode: {}", s)),
        }
    }
}

/// Typed debug operations over a manager.
pub struct DebugTool {
    manager: Arc<ExecutionContextManager>,
}

impl DebugTool {
    /// Binds the tool to a manager.
    pub fn new(manager: Arc<ExecutionContextManager>) -> Self {
        Self { manager }
    }

    /// Live context ids plus their count.
    pub fn list(&self) -> serde_json::Value {
        let mut execution_ids = self.manager.list_contexts();
        execution_ids.sort();
        json!({
            "count": execution_ids.len(),
            "execution_ids": execution_ids,
        })
    }

    /// Snapshot of one live context.
    pub fn show(&self, execution_id: &str) -> Result<ContextStateSnapshot> {
        let ctx = self.manager.get_context(execution_id)?;
        Ok(ContextStateSnapshot::capture(
            &ctx,
            self.manager.services().now_ns(),
            false,
        ))
    }

    /// Aggregate manager statistics.
    pub fn stats(&self) -> ManagerStats {
        self.manager.get_stats()
    }

    /// JSON export of one live context.
    pub fn export(&self, execution_id: &str) -> Result<Vec<u8>> {
        self.manager.export_context_state(execution_id, false)
    }

    /// Current leak findings.
    pub fn leaks(&self) -> serde_json::Value {
        let reports = self.manager.detect_context_leaks();
        json!({
            "leaked_count": reports.len(),
            "leaked_contexts": reports,
        })
    }
}

/// Command-string front end used by shells and RPC handlers.
pub struct ContextDebugger {
    tool: DebugTool,
}

impl ContextDebugger {
    /// Binds the debugger to a manager.
    pub fn new(manager: Arc<ExecutionContextManager>) -> Self {
        Self {
            tool: DebugTool::new(manager),
        }
    }

    /// Executes one command line and returns its JSON payload.
    ///
    /// Commands: `list`, `show <id>`, `stats`, `export <id>`, `leaks`.
    pub fn execute(&self, line: &str) -> Result<serde_json::Value> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or("");
        match command {
            "list" => Ok(self.tool.list()),
            "show" => {
                let execution_id = words.next().ok_or_else(|| {
                    ExecutionError::invalid_argument("show requires an execution id")
                })?;
                let snapshot = self.tool.show(execution_id)?;
                serde_json::to_value(snapshot)
                    .map_err(|e| ExecutionError::invalid_argument(e.to_string()))
            }
            "stats" => serde_json::to_value(self.tool.stats())
                .map_err(|e| ExecutionError::invalid_argument(e.to_string())),
            "export" => {
                let execution_id = words.next().ok_or_else(|| {
                    ExecutionError::invalid_argument("export requires an execution id")
                })?;
                let raw = self.tool.export(execution_id)?;
                serde_json::from_slice(&raw)
                    .map_err(|e| ExecutionError::invalid_argument(e.to_string()))
            }
            "leaks" => Ok(self.tool.leaks()),
            other => Err(ExecutionError::invalid_argument(format!(
                "unknown debug command: {other:?}"
            ))),
        }
    }
}
