//! Module contract: the lifecycle every Popura module implements.
//!
//! The daemon drives each module through the same sequence:
//! `init` once, then `start`, any number of `update_config`, and `stop`.
//! Modules are held as `Box<dyn Module>` so heterogeneous engines share one
//! dispatch table.

use std::sync::Arc;

use crate::admin::AdminHandlers;
use crate::config::PopuraConfig;
use crate::engine::NetworkEngine;

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("{0}: start called before init")]
    NotInitialized(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("interface {interface}: {reason}")]
    Interface { interface: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle of a background module.
///
/// `start` and `update_config` spawn tokio tasks and must run inside a
/// runtime. `stop` is idempotent: stopping a stopped or never-started module
/// is a no-op.
pub trait Module: Send {
    /// Short name used in logs and admin output.
    fn name(&self) -> &'static str;

    fn init(
        &mut self,
        engine: Arc<dyn NetworkEngine>,
        config: &PopuraConfig,
    ) -> Result<(), ModuleError>;

    fn start(&mut self) -> Result<(), ModuleError>;

    fn stop(&mut self) -> Result<(), ModuleError>;

    /// Replace the module's configuration wholesale.
    fn update_config(&mut self, config: &PopuraConfig) -> Result<(), ModuleError>;

    fn setup_admin_handlers(&self, admin: &mut AdminHandlers);

    fn is_started(&self) -> bool;
}
