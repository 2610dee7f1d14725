//! Cassava leaf diagnosis core: domain models, collaborator traits and the
//! hybrid analysis orchestrator with its offline reconciliation loop.

pub mod analysis;
pub mod connectivity;
pub mod errors;
pub mod hybrid;
pub mod sync;

pub use errors::{DatabaseError, Error, InferenceError, Result};
