//! Diagnosis records, classifier policy and collaborator traits.

mod analysis_model;
mod analysis_traits;
mod diagnosis_policy;

pub use analysis_model::*;
pub use analysis_traits::*;
pub use diagnosis_policy::*;
