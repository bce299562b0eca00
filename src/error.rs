//! Error classes for run preparation and submission.

use thiserror::Error;

/// Errors with meaning beyond their message text.
///
/// `Config` is the fatal class: the message has been logged at the failure
/// site and any in-progress run directory has been rolled back before the
/// error is returned. `main` maps it to process exit code 2.
#[derive(Debug, Error)]
pub enum PrepareError {
    /// Deterministic configuration defect: missing required key, missing
    /// required file, inconsistent AGRIF sub-grid counts, or an unknown
    /// forcing link checker.
    #[error("{0}")]
    Config(String),

    /// The land processor elimination table has no row for the requested
    /// MPI decomposition.
    #[error("No land processor elimination choice found for {jpni}x{jpnj} MPI decomposition")]
    DecompositionNotFound { jpni: u32, jpnj: u32 },
}
