//! Settings provider
//!
//! Backs a settings page: which solvers are offered, which are installed,
//! which are selected, and the timeout entry. Produces [`RunnerSettings`]
//! snapshots for the registry.

use crate::error::SettingsError;
use crate::process::SolverCommand;
use crate::settings::{RunnerSettings, SolverTimeout, SolverType};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

type Detector = Box<dyn Fn(SolverType) -> bool + Send + Sync>;

/// One solver entry as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverEntry {
    pub solver: SolverType,
    /// Unavailable entries are shown disabled
    pub installed: bool,
    pub selected: bool,
}

/// Solver selection and timeout entry for background solving
pub struct SettingsProvider {
    experimental: bool,
    detector: Detector,
    installed: BTreeMap<SolverType, bool>,
    selected: BTreeSet<SolverType>,
    timeout: SolverTimeout,
    max_concurrent_processes: usize,
}

impl SettingsProvider {
    /// Provider that checks installation by looking for solver binaries on PATH
    pub fn detect(experimental: bool) -> Self {
        Self::with_detector(experimental, |solver| SolverCommand::locate(solver).is_some())
    }

    /// Provider with a custom installation check
    ///
    /// Every installed solver starts out selected.
    pub fn with_detector(
        experimental: bool,
        detector: impl Fn(SolverType) -> bool + Send + Sync + 'static,
    ) -> Self {
        let defaults = RunnerSettings::default();
        let mut provider = Self {
            experimental,
            detector: Box::new(detector),
            installed: BTreeMap::new(),
            selected: BTreeSet::new(),
            timeout: defaults.timeout,
            max_concurrent_processes: defaults.max_concurrent_processes,
        };
        provider.re_detect();
        provider.selected = provider.installed_solvers().into_iter().collect();
        provider
    }

    /// Solvers offered for background use, in display order
    pub fn available_solvers(&self) -> Vec<SolverType> {
        SolverType::ALL
            .into_iter()
            .filter(|s| s.supports_background())
            .filter(|s| self.experimental || !s.is_legacy())
            .collect()
    }

    /// Offered solvers that are installed
    pub fn installed_solvers(&self) -> Vec<SolverType> {
        self.available_solvers()
            .into_iter()
            .filter(|s| self.is_installed(*s))
            .collect()
    }

    pub fn is_installed(&self, solver: SolverType) -> bool {
        self.installed.get(&solver).copied().unwrap_or(false)
    }

    pub fn is_selected(&self, solver: SolverType) -> bool {
        self.selected.contains(&solver)
    }

    /// Rows for the solver list
    pub fn entries(&self) -> Vec<SolverEntry> {
        self.available_solvers()
            .into_iter()
            .map(|solver| SolverEntry {
                solver,
                installed: self.is_installed(solver),
                selected: self.is_selected(solver),
            })
            .collect()
    }

    /// Check or uncheck a solver; uninstalled or unavailable solvers are ignored
    pub fn set_selected(&mut self, solver: SolverType, selected: bool) {
        if !self.is_installed(solver) || !self.available_solvers().contains(&solver) {
            debug!(%solver, "Ignoring selection of unavailable solver");
            return;
        }
        if selected {
            self.selected.insert(solver);
        } else {
            self.selected.remove(&solver);
        }
    }

    /// Flip a solver's selection
    pub fn toggle(&mut self, solver: SolverType) {
        let selected = self.is_selected(solver);
        self.set_selected(solver, !selected);
    }

    /// Check or uncheck every installed solver
    pub fn select_all(&mut self, selected: bool) {
        for solver in self.installed_solvers() {
            self.set_selected(solver, selected);
        }
    }

    /// Whether every installed solver is checked
    pub fn is_all_selected(&self) -> bool {
        self.installed_solvers()
            .iter()
            .all(|s| self.selected.contains(s))
    }

    pub fn timeout(&self) -> SolverTimeout {
        self.timeout
    }

    /// Timeout entry in seconds; negative means unlimited
    pub fn set_timeout_seconds(&mut self, seconds: f64) -> Result<(), SettingsError> {
        self.timeout = SolverTimeout::from_seconds(seconds)?;
        Ok(())
    }

    pub fn set_max_concurrent_processes(&mut self, max: usize) {
        self.max_concurrent_processes = max.max(1);
    }

    pub fn set_experimental(&mut self, experimental: bool) {
        self.experimental = experimental;
        let offered = self.available_solvers();
        self.selected.retain(|s| offered.contains(s));
    }

    /// Re-run the installation check and drop solvers that disappeared
    pub fn re_detect(&mut self) {
        self.installed = SolverType::ALL
            .into_iter()
            .map(|s| (s, (self.detector)(s)))
            .collect();
        let installed = &self.installed;
        self.selected
            .retain(|s| installed.get(s).copied().unwrap_or(false));
        debug!(installed = ?self.installed_solvers(), "Detected solvers");
    }

    /// Take over a stored configuration, keeping only installed solvers
    pub fn load_from(&mut self, settings: &RunnerSettings) {
        self.timeout = settings.timeout;
        self.max_concurrent_processes = settings.max_concurrent_processes.max(1);
        self.selected.clear();
        for solver in &settings.solver_types {
            self.set_selected(*solver, true);
        }
    }

    /// Snapshot for the runners
    pub fn to_settings(&self) -> RunnerSettings {
        RunnerSettings::default()
            .with_solvers(self.selected.iter().copied())
            .with_timeout(self.timeout)
            .with_max_concurrent_processes(self.max_concurrent_processes)
    }

    /// Summary line, e.g. `Timeout: 1 sec; Solvers: {Z3}`
    pub fn summary(&self) -> String {
        self.to_settings().summary()
    }
}

impl std::fmt::Debug for SettingsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsProvider")
            .field("experimental", &self.experimental)
            .field("installed", &self.installed)
            .field("selected", &self.selected)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
