mod model;
mod repository;

pub use model::{AnalysisDB, SyncEngineStateDB, SyncQueueEntryDB};
pub use repository::AnalysisRepository;
