//! menmos agent library
//!
//! The agent runs on each host and manages a fleet of menmos nodes: directory
//! servers (`menmosd`) and storage servers (`amphora`). It downloads the
//! requested release binaries, renders each node's configuration, supervises
//! the node processes and exposes their lifecycle over an HTTP API.
//!
//! ## Modules
//!
//! - `agent`: Node orchestration (the running-node table)
//! - `api`: Axum router and handlers
//! - `artifact`: Release download and on-disk binary cache
//! - `logs`: Bounded capture of process output
//! - `node`: Node identity, kinds and per-kind settings
//! - `process`: Native process supervision
//! - `state`: JSON node records for restore on boot

pub mod agent;
pub mod api;
pub mod artifact;
pub mod config;
pub mod fs;
pub mod logs;
pub mod node;
pub mod process;
pub mod state;

// Re-export commonly used types
pub use agent::{Agent, AgentError, NodeInfo};
pub use config::Config;
pub use node::{NodeId, NodeKind};
pub use process::{NativeProcess, ProcessStatus, SupervisorPolicy};
