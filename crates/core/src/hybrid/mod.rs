//! Hybrid analysis orchestrator and its reconciliation loop.

mod hybrid_service;
mod reconciler;

pub use hybrid_service::*;

#[cfg(test)]
mod tests;
