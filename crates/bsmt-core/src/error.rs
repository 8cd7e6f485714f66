//! Error types for background SMT orchestration
//!
//! None of these escape the runner or the registry: launch failures become
//! `Unknown` results and proof errors during apply are logged. They exist for
//! the settings layer, the process launcher and proof engine implementations.

use crate::settings::SolverType;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading, saving or validating background settings
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Settings file could not be read or written
    #[error("Settings I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid JSON for the settings schema
    #[error("Invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Timeout outside the accepted range
    #[error("Timeout {seconds} sec is outside [{min}, {max}]")]
    InvalidTimeout { seconds: f64, min: f64, max: f64 },
}

/// Errors while running a solver on a single problem
///
/// The process launcher converts every variant into an `Unknown` outcome for
/// the affected problem.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The sequent could not be translated to SMT-LIB
    #[error("Translation failed: {0}")]
    Translation(String),

    /// Solver binary not found on PATH
    #[error("{0} is not installed")]
    NotInstalled(SolverType),

    /// Solver process could not be started
    #[error("Failed to start {solver}: {source}")]
    Spawn {
        solver: SolverType,
        #[source]
        source: std::io::Error,
    },

    /// I/O with a running solver failed
    #[error("I/O error talking to {solver}: {source}")]
    Io {
        solver: SolverType,
        #[source]
        source: std::io::Error,
    },

    /// Solver did not answer within the configured timeout
    #[error("{0} timed out")]
    Timeout(SolverType),

    /// The process limiter was shut down
    #[error("Process limiter closed")]
    LimiterClosed,
}

/// Errors reported by a proof engine when the core mutates the proof
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProofError {
    /// Node is not part of the proof (pruned away or foreign)
    #[error("Node {0} is not part of the proof")]
    UnknownNode(u64),

    /// Node is not an open goal
    #[error("Node {0} is not an open goal")]
    NotAGoal(u64),

    /// Rule application was rejected by the proof engine
    #[error("Rule application failed: {0}")]
    RuleRejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_timeout_display() {
        let err = SettingsError::InvalidTimeout {
            seconds: 7.5,
            min: -1.0,
            max: 5.0,
        };
        assert_eq!(err.to_string(), "Timeout 7.5 sec is outside [-1, 5]");
    }

    #[test]
    fn test_launch_error_display_names_solver() {
        let err = LaunchError::Timeout(SolverType::Cvc5);
        assert_eq!(err.to_string(), "CVC5 timed out");
        let err = LaunchError::NotInstalled(SolverType::Z3);
        assert_eq!(err.to_string(), "Z3 is not installed");
    }

    #[test]
    fn test_proof_error_display() {
        assert_eq!(
            ProofError::NotAGoal(4).to_string(),
            "Node 4 is not an open goal"
        );
    }
}
