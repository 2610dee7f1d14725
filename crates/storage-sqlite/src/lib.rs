//! SQLite persistence for offline analyses and the durable sync queue.

pub mod analyses;
pub mod db;
pub mod errors;
pub mod schema;

pub use analyses::AnalysisRepository;
pub use errors::StorageError;
