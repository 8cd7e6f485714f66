//! Background solver settings
//!
//! A [`RunnerSettings`] value is a snapshot. Runners hold it behind an `Arc`
//! and replace the whole value on change, so a launch that captured a snapshot
//! keeps seeing the same solver set and timeout until it finishes.

use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Lower bound for timeout entry, in seconds (negative means unlimited)
pub const MIN_TIMEOUT_SECS: f64 = -1.0;

/// Upper bound for timeout entry, in seconds
pub const MAX_TIMEOUT_SECS: f64 = 5.0;

/// SMT solvers known to the background runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverType {
    Z3,
    Cvc5,
    Cvc4,
    Yices2,
    /// Z3 configured for counterexample generation; never run in the background
    Z3CounterExample,
}

impl SolverType {
    /// Every known solver, in display order
    pub const ALL: [SolverType; 5] = [
        SolverType::Z3,
        SolverType::Cvc5,
        SolverType::Cvc4,
        SolverType::Yices2,
        SolverType::Z3CounterExample,
    ];

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            Self::Z3 => "Z3",
            Self::Cvc5 => "CVC5",
            Self::Cvc4 => "CVC4",
            Self::Yices2 => "Yices2",
            Self::Z3CounterExample => "Z3 (CE)",
        }
    }

    /// Executable looked up on PATH
    pub fn binary(self) -> &'static str {
        match self {
            Self::Z3 | Self::Z3CounterExample => "z3",
            Self::Cvc5 => "cvc5",
            Self::Cvc4 => "cvc4",
            Self::Yices2 => "yices-smt2",
        }
    }

    /// Arguments that make the solver read an SMT-LIB script from stdin
    pub fn stdin_args(self) -> &'static [&'static str] {
        match self {
            Self::Z3 | Self::Z3CounterExample => &["-in", "-smt2"],
            Self::Cvc5 | Self::Cvc4 => &["--lang=smt2"],
            Self::Yices2 => &[],
        }
    }

    /// Legacy solvers are only offered in experimental mode
    pub fn is_legacy(self) -> bool {
        matches!(self, Self::Cvc4 | Self::Yices2)
    }

    /// Whether the solver may run in the background at all
    pub fn supports_background(self) -> bool {
        !matches!(self, Self::Z3CounterExample)
    }
}

impl fmt::Display for SolverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-solver time limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverTimeout {
    /// Let solvers run until they answer or are stopped
    Unlimited,
    /// Stop a solver after this many milliseconds
    Millis(u64),
}

impl SolverTimeout {
    /// Convert a timeout entered in seconds
    ///
    /// Negative values mean unlimited. Values outside
    /// [`MIN_TIMEOUT_SECS`, `MAX_TIMEOUT_SECS`] are rejected. Sub-millisecond
    /// fractions are floored.
    pub fn from_seconds(seconds: f64) -> Result<Self, SettingsError> {
        if !seconds.is_finite() || !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&seconds) {
            return Err(SettingsError::InvalidTimeout {
                seconds,
                min: MIN_TIMEOUT_SECS,
                max: MAX_TIMEOUT_SECS,
            });
        }
        if seconds < 0.0 {
            return Ok(Self::Unlimited);
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = (seconds * 1000.0).floor() as u64;
        Ok(Self::Millis(millis))
    }

    /// Time limit as a duration, `None` when unlimited
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Unlimited => None,
            Self::Millis(ms) => Some(Duration::from_millis(ms)),
        }
    }

    /// Time limit in seconds, negative when unlimited
    #[allow(clippy::cast_precision_loss)]
    pub fn as_seconds(self) -> f64 {
        match self {
            Self::Unlimited => -1.0,
            Self::Millis(ms) => ms as f64 / 1000.0,
        }
    }
}

impl Default for SolverTimeout {
    fn default() -> Self {
        Self::Millis(1000)
    }
}

impl fmt::Display for SolverTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => write!(f, "none"),
            Self::Millis(_) => write!(f, "{} sec", self.as_seconds()),
        }
    }
}

/// Configuration snapshot consumed by one launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Solvers run on every problem
    #[serde(default)]
    pub solver_types: BTreeSet<SolverType>,

    /// Per-solver time limit
    #[serde(default)]
    pub timeout: SolverTimeout,

    /// Upper bound on solver processes running at once
    #[serde(default = "default_max_concurrent_processes")]
    pub max_concurrent_processes: usize,
}

fn default_max_concurrent_processes() -> usize {
    2
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            solver_types: BTreeSet::new(),
            timeout: SolverTimeout::default(),
            max_concurrent_processes: default_max_concurrent_processes(),
        }
    }
}

impl RunnerSettings {
    /// Add a solver (builder style)
    #[must_use]
    pub fn with_solver(mut self, solver: SolverType) -> Self {
        self.solver_types.insert(solver);
        self
    }

    /// Replace the solver set (builder style)
    #[must_use]
    pub fn with_solvers(mut self, solvers: impl IntoIterator<Item = SolverType>) -> Self {
        self.solver_types = solvers.into_iter().collect();
        self
    }

    /// Set the timeout (builder style)
    #[must_use]
    pub fn with_timeout(mut self, timeout: SolverTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the process limit (builder style); zero is treated as one
    #[must_use]
    pub fn with_max_concurrent_processes(mut self, max: usize) -> Self {
        self.max_concurrent_processes = max.max(1);
        self
    }

    /// Whether any background-capable solver is selected
    pub fn has_solvers(&self) -> bool {
        self.solver_types.iter().any(|s| s.supports_background())
    }

    /// One-line summary, e.g. `Timeout: 1 sec; Solvers: {Z3; CVC5}`
    pub fn summary(&self) -> String {
        let solvers: Vec<&str> = self.solver_types.iter().map(|s| s.name()).collect();
        format!("Timeout: {}; Solvers: {{{}}}", self.timeout, solvers.join("; "))
    }

    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = serde_json::from_str(&text)?;
        Ok(settings)
    }

    /// Write settings to a JSON file
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
