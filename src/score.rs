//! End-of-run score computed from a player's demand profile.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;

use crate::player::DemandProfile;

/// Demand statistics over a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Score {
    /// Population standard deviation of grid power (kW).
    pub std_demand: f64,
    /// Peak grid power (kW).
    pub max_demand: f64,
}

impl Score {
    /// Computes the score. An empty profile scores zero on both counts.
    pub fn from_profile(profile: &DemandProfile) -> Self {
        let values = profile.as_slice();
        if values.is_empty() {
            return Self {
                std_demand: 0.0,
                max_demand: 0.0,
            };
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Self {
            std_demand: var.sqrt(),
            max_demand: max,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
    }

    /// Writes the score as a JSON object.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if the file cannot be written.
    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_json())
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Score ---")?;
        writeln!(f, "Demand std dev:  {:.3} kW", self.std_demand)?;
        write!(f, "Peak demand:     {:.3} kW", self.max_demand)
    }
}
