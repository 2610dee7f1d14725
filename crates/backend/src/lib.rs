//! Supabase-backed remote persistence and auth for cassava analyses.
//!
//! - [`SupabaseClient`] implements [`cassava_core::analysis::AnalysisBackend`]
//!   over GoTrue, PostgREST and Storage.
//! - [`HttpConnectivityMonitor`] probes reachability for the hybrid service.

pub mod client;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod types;

pub use client::{SupabaseClient, ANALYSES_TABLE, IMAGES_BUCKET};
pub use config::{SupabaseConfig, SupabaseMode};
pub use connectivity::HttpConnectivityMonitor;
pub use error::{BackendError, Result};
pub use types::{AuthSession, AuthUser};
