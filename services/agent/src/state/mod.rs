//! Durable node records.
//!
//! One JSON file per node, named `<id>.json`. The store only exists to rebuild
//! the agent's running-node table after a restart; while the agent runs, the
//! in-memory table is authoritative.

mod store;

pub use store::{NodeRecord, StateStore, StateStoreError};
