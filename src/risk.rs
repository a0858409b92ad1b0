//! Hazard evaluation
//!
//! Filters detected labels against the configured hazardous-object set.

use std::collections::HashSet;

/// Decides which detected labels are alert-worthy
#[derive(Debug, Clone)]
pub struct RiskEngine {
    hazardous: HashSet<String>,
}

impl RiskEngine {
    pub fn new<I>(labels: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            hazardous: labels.into_iter().map(|l| l.to_lowercase()).collect(),
        }
    }

    pub fn is_hazardous(&self, label: &str) -> bool {
        self.hazardous.contains(&label.to_lowercase())
    }

    /// Keep only hazardous labels, preserving detection order and dropping
    /// repeats.
    pub fn evaluate(&self, labels: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        labels
            .iter()
            .filter(|label| self.is_hazardous(label))
            .filter(|label| seen.insert(label.to_lowercase()))
            .cloned()
            .collect()
    }
}
