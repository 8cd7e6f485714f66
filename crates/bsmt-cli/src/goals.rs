//! Goal file format
//!
//! ```json
//! {
//!   "name": "arith",
//!   "declarations": ["(declare-const x Int)"],
//!   "goals": [
//!     { "antecedent": ["(> x 0)"], "succedent": ["(> x (- 1))"] }
//!   ]
//! }
//! ```

use anyhow::{bail, Context, Result};
use bsmt_core::Sequent;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct GoalFile {
    /// Proof name; defaults to the file stem
    #[serde(default)]
    pub name: Option<String>,
    /// SMT-LIB commands prepended to every script
    #[serde(default)]
    pub declarations: Vec<String>,
    pub goals: Vec<GoalEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoalEntry {
    #[serde(default)]
    pub antecedent: Vec<String>,
    #[serde(default)]
    pub succedent: Vec<String>,
}

impl GoalFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read goal file {}", path.display()))?;
        let mut file: GoalFile = serde_json::from_str(&text)
            .with_context(|| format!("Invalid goal file {}", path.display()))?;
        if file.goals.is_empty() {
            bail!("Goal file {} contains no goals", path.display());
        }
        if file.name.is_none() {
            file.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
        }
        Ok(file)
    }

    pub fn proof_name(&self) -> &str {
        self.name.as_deref().unwrap_or("goals")
    }

    pub fn sequents(&self) -> Vec<Sequent> {
        self.goals
            .iter()
            .map(|g| Sequent::new(g.antecedent.clone(), g.succedent.clone()))
            .collect()
    }
}
