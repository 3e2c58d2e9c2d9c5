//! Community presets that seed a store the way the setup process would.

use std::f64::consts::PI;

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::config::ConfigError;
use crate::home::HOME_QUEUE_KEY;
use crate::player::{CURRENT_VALUES_KEY, GHI_KEY, OAT_KEY, PRICE_KEY};
use crate::store::{MemoryStore, StoreError};

/// Equipment mixes assigned to seeded homes, in rotation.
const HOME_TYPES: &[&str] = &[r#"["hvac","wh"]"#, "pv_only", "battery_only", "pv_battery"];

/// Weather, market and schedule for a seeded community.
#[derive(Debug, Clone)]
pub struct ScenarioPreset {
    pub name: &'static str,
    /// Simulated hours.
    pub nsteps: usize,
    pub steps_per_hour: usize,
    /// Solver look-ahead (hours).
    pub prediction_horizon: usize,
    /// Daily mean outside temperature (°C).
    pub oat_mean: f64,
    /// Half the daily outside temperature swing (°C).
    pub oat_swing: f64,
    /// Clear-sky peak irradiance (W/m²).
    pub ghi_peak: f64,
    /// Off-peak and on-peak prices ($/kWh); on-peak runs 16:00 to 21:00.
    pub price_off_peak: f64,
    pub price_on_peak: f64,
    pub seed: u64,
}

impl ScenarioPreset {
    /// One mild day at hourly resolution.
    pub fn baseline() -> Self {
        Self {
            name: "baseline",
            nsteps: 24,
            steps_per_hour: 1,
            prediction_horizon: 6,
            oat_mean: 22.0,
            oat_swing: 5.0,
            ghi_peak: 800.0,
            price_off_peak: 0.08,
            price_on_peak: 0.24,
            seed: 42,
        }
    }

    /// A hot day with a steep evening price peak.
    pub fn summer() -> Self {
        Self {
            name: "summer",
            oat_mean: 31.0,
            oat_swing: 7.0,
            ghi_peak: 1000.0,
            price_on_peak: 0.45,
            ..Self::baseline()
        }
    }

    /// A short half-hourly run for smoke tests.
    pub fn short() -> Self {
        Self {
            name: "short",
            nsteps: 2,
            steps_per_hour: 2,
            prediction_horizon: 2,
            ..Self::baseline()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "summer", "short"];

    /// Loads a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "summer" => Ok(Self::summer()),
            "short" => Ok(Self::short()),
            _ => Err(ConfigError {
                field: "local.preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Total player steps.
    pub fn total_steps(&self) -> usize {
        self.nsteps * self.steps_per_hour
    }

    fn hour(&self, t: usize) -> f64 {
        (t as f64 / self.steps_per_hour as f64) % 24.0
    }

    /// Outside temperature, coolest at 05:00 and warmest at 17:00.
    fn oat(&self, t: usize) -> f64 {
        self.oat_mean - self.oat_swing * (2.0 * PI * (self.hour(t) - 5.0) / 24.0).cos()
    }

    fn ghi(&self, t: usize) -> f64 {
        let h = self.hour(t);
        if (6.0..18.0).contains(&h) {
            self.ghi_peak * (PI * (h - 6.0) / 12.0).sin()
        } else {
            0.0
        }
    }

    fn price(&self, t: usize) -> f64 {
        if (16.0..21.0).contains(&self.hour(t)) {
            self.price_on_peak
        } else {
            self.price_off_peak
        }
    }
}

/// Name of the `i`th seeded home.
pub fn home_name(i: usize) -> String {
    format!("home-{i:02}")
}

/// Seeds `store` with simulation metadata, weather and price series long
/// enough for the last step's horizon, and a queue of `homes` claimable
/// home records.
///
/// Returns the seeded home names in queue order.
pub fn seed(
    store: &MemoryStore,
    preset: &ScenarioPreset,
    homes: usize,
) -> Result<Vec<String>, StoreError> {
    let mut rng = StdRng::seed_from_u64(preset.seed);

    store.set_hash("simulation", [("nsteps", preset.nsteps.to_string())])?;
    store.set_hash(CURRENT_VALUES_KEY, [("timestep", "0".to_string())])?;

    let len = preset.total_steps() + preset.prediction_horizon * preset.steps_per_hour;
    store.push_list(OAT_KEY, (0..len).map(|t| format!("{:.2}", preset.oat(t))))?;
    store.push_list(
        GHI_KEY,
        (0..len).map(|t| {
            let cloud = rng.random_range(0.7..=1.0);
            format!("{:.1}", preset.ghi(t) * cloud)
        }),
    )?;
    store.push_list(PRICE_KEY, (0..len).map(|t| format!("{:.3}", preset.price(t))))?;

    let names: Vec<String> = (0..homes).map(home_name).collect();
    for (i, name) in names.iter().enumerate() {
        let home_type = HOME_TYPES[i % HOME_TYPES.len()];
        let key = |base: &str| format!("{base}:{name}");

        store.set_hash(
            &key("home_values"),
            [("name", name.clone()), ("type", home_type.to_string())],
        )?;
        store.set_hash(
            &key("hvac_values"),
            [
                ("r", format!("{:.2}", rng.random_range(4.0..=8.0))),
                ("p_c", "3.5".to_string()),
                ("p_h", "3.5".to_string()),
                ("temp_in_init", format!("{:.1}", rng.random_range(19.0..=23.0))),
                ("setback", "3".to_string()),
            ],
        )?;
        store.set_hash(
            &key("wh_values"),
            [
                ("p", "4.5".to_string()),
                ("tank_size", format!("{}", [150, 200, 250][i % 3])),
                ("temp_wh_init", format!("{:.1}", rng.random_range(45.0..=50.0))),
            ],
        )?;
        store.set_hash(
            &key("hems_values"),
            [
                ("sub_subhourly_steps", preset.steps_per_hour.to_string()),
                ("prediction_horizon", preset.prediction_horizon.to_string()),
            ],
        )?;
        if home_type.contains("battery") {
            store.set_hash(
                &key("battery_values"),
                [
                    ("max_cap", "13.5".to_string()),
                    ("max_rate", "5".to_string()),
                    ("ch_eff", "0.95".to_string()),
                    ("e_batt_init", "0.5".to_string()),
                ],
            )?;
        }
        if home_type.contains("pv") {
            store.set_hash(
                &key("pv_values"),
                [
                    ("area", format!("{:.0}", rng.random_range(20.0..=40.0))),
                    ("eff", "0.2".to_string()),
                ],
            )?;
        }

        let draws_per_day = 24 * preset.steps_per_hour;
        store.push_list(
            &key("draw_sizes"),
            (0..draws_per_day).map(|t| {
                let h = preset.hour(t);
                let peak = (6.0..9.0).contains(&h) || (18.0..22.0).contains(&h);
                let litres = if peak && rng.random_bool(0.6) {
                    rng.random_range(10.0..=40.0)
                } else {
                    0.0
                };
                format!("{litres:.1}")
            }),
        )?;
        store.push_list(&key("weekday_occ_schedule"), ["[17, 8]"])?;
    }

    store.push_list(HOME_QUEUE_KEY, names.iter().cloned())?;
    tracing::info!(
        "seeded preset {} with {homes} homes over {} steps",
        preset.name,
        preset.total_steps()
    );
    Ok(names)
}
