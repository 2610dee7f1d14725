//! Offline sync queue models and reconciliation helpers.

mod sync_engine;
mod sync_queue_model;
mod sync_scheduler;

pub use sync_engine::*;
pub use sync_queue_model::*;
pub use sync_scheduler::*;
