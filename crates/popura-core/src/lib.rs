//! popura-core: shared types, wire format, and module contract.
//! All other Popura crates depend on this one.

pub mod address;
pub mod admin;
pub mod config;
pub mod engine;
pub mod module;
pub mod ndp;

pub use admin::{AdminError, AdminHandlers};
pub use config::PopuraConfig;
pub use engine::{EngineError, NetworkEngine, PeerInfo};
pub use module::{Module, ModuleError};
