//! Rule-based reference solver.
//!
//! Tracks the HVAC and water heater setpoints directly instead of optimizing
//! them, arbitrages the battery against the price signal and nets PV out of
//! the grid draw. Good enough to drive the synchronization protocol end to
//! end when no external optimizer is attached.

use crate::config::ConfigError;
use crate::home::{Capabilities, HomeSpec, ParamSet};

use super::{
    GRID_POWER_KEY, HomeSolver, HorizonView, OptimalVals, OptimalValue, SolveError, SolveRequest,
    SolverOutput,
};

/// Energy to heat one litre of water by 1 °C (kWh).
const WATER_KWH_PER_LITRE_DEG: f64 = 0.001163;

/// Mains water inlet temperature (°C).
const INLET_TEMP_C: f64 = 12.0;

/// Setpoint-tracking solver with price-driven battery dispatch.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicSolver;

/// Parameters pulled from a home's parameter sets, with defaults for
/// anything the store leaves out.
struct Plant {
    hvac_r: f64,
    hvac_p_c: f64,
    hvac_p_h: f64,
    hvac_setpoint: f64,
    setback: f64,
    wh_p: f64,
    tank_litres: f64,
    wh_setpoint: f64,
    ev_max_rate: f64,
    battery: Option<BatteryPlant>,
    pv: Option<PvPlant>,
}

struct BatteryPlant {
    capacity: f64,
    max_rate: f64,
    eta: f64,
    e_init: f64,
}

struct PvPlant {
    area: f64,
    eff: f64,
}

/// Reads a field that must be a finite number.
fn finite(set: &ParamSet, field: &str, default: f64) -> Result<f64, ConfigError> {
    let value = set.f64_or(field, default)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigError {
            field: format!("{}.{field}", set.key()),
            message: format!("expected a finite number, got {value}"),
        })
    }
}

/// Reads a field that must be finite and at least zero.
fn non_negative(set: &ParamSet, field: &str, default: f64) -> Result<f64, ConfigError> {
    let value = finite(set, field, default)?;
    if value < 0.0 {
        return Err(ConfigError {
            field: format!("{}.{field}", set.key()),
            message: format!("must be >= 0, got {value}"),
        });
    }
    Ok(value)
}

impl Plant {
    fn from_home(home: &HomeSpec) -> Result<Self, SolveError> {
        let battery = match &home.battery {
            Some(b) if home.capabilities.contains(Capabilities::BATTERY) => {
                let capacity = non_negative(b, "max_cap", 10.0)?;
                Some(BatteryPlant {
                    capacity,
                    max_rate: non_negative(b, "max_rate", 5.0)?,
                    eta: finite(b, "ch_eff", 0.95)?,
                    e_init: finite(b, "e_batt_init", 0.5)? * capacity,
                })
            }
            _ => None,
        };
        let pv = match &home.pv {
            Some(p) if home.capabilities.contains(Capabilities::PV) => Some(PvPlant {
                area: finite(p, "area", 32.0)?,
                eff: finite(p, "eff", 0.2)?,
            }),
            _ => None,
        };
        Ok(Self {
            hvac_r: finite(&home.hvac, "r", 6.8)?,
            hvac_p_c: finite(&home.hvac, "p_c", 3.5)?,
            hvac_p_h: finite(&home.hvac, "p_h", 3.5)?,
            hvac_setpoint: finite(&home.hvac, "temp_in_init", 21.0)?,
            setback: non_negative(&home.hvac, "setback", 3.0)?,
            wh_p: finite(&home.wh, "p", 4.5)?,
            tank_litres: finite(&home.wh, "tank_size", 200.0)?,
            wh_setpoint: finite(&home.wh, "temp_wh_init", 47.0)?,
            ev_max_rate: finite(&home.home, "ev_max_rate", 7.2)?,
            battery,
            pv,
        })
    }
}

fn previous_scalar(request: &SolveRequest<'_>, name: &str) -> Option<f64> {
    request
        .previous
        .and_then(|p| p.get(name))
        .and_then(OptimalValue::current)
}

/// Pads or truncates `values` to `len`, repeating the last element.
fn fit(values: &[f64], len: usize, fill: f64) -> Vec<f64> {
    let last = values.last().copied().unwrap_or(fill);
    (0..len).map(|i| values.get(i).copied().unwrap_or(last)).collect()
}

impl HomeSolver for HeuristicSolver {
    fn solve(&mut self, request: &SolveRequest<'_>) -> Result<SolverOutput, SolveError> {
        let home = request.home;
        let params = request.params;
        let plant = Plant::from_home(home)?;

        let steps_per_hour = home.steps_per_hour();
        let dt_hours = 1.0 / steps_per_hour as f64;
        let horizon = home.horizon_steps();
        if horizon == 0 {
            return Err(SolveError::Infeasible("prediction horizon is empty".into()));
        }
        if params.oat.is_empty() {
            return Err(SolveError::MissingInput(format!(
                "outside air temperature at t = {}",
                params.timestep
            )));
        }

        let oat = fit(&params.oat, horizon, 0.0);
        let ghi = fit(&params.ghi, horizon, 0.0);
        let price = fit(&params.price, horizon, 0.0);

        let hvac_setpoint = request
            .overrides
            .hvac_setpoint
            .or_else(|| previous_scalar(request, "temp_in_opt"))
            .unwrap_or(plant.hvac_setpoint);
        let wh_setpoint = request
            .overrides
            .wh_setpoint
            .or_else(|| previous_scalar(request, "temp_wh_opt"))
            .unwrap_or(plant.wh_setpoint);
        if !hvac_setpoint.is_finite() || !wh_setpoint.is_finite() {
            return Err(SolveError::MissingInput(format!(
                "finite setpoints at t = {}",
                params.timestep
            )));
        }
        let ev_kw = request.overrides.ev_charge.unwrap_or(0.0) * plant.ev_max_rate;

        let hour_of = |k: usize| ((params.timestep + k) as f64 / steps_per_hour as f64) % 24.0;
        let occupancy: Vec<bool> = (0..horizon).map(|k| home.occupied_at(hour_of(k))).collect();

        let draw_litres = |k: usize| {
            if home.draw_sizes.is_empty() {
                0.0
            } else {
                home.draw_sizes[(params.timestep + k) % home.draw_sizes.len()]
            }
        };
        let draw_fraction = if plant.tank_litres > 0.0 {
            draw_litres(0) / plant.tank_litres
        } else {
            0.0
        };

        let mut hvac_kw = Vec::with_capacity(horizon);
        let mut wh_kw = Vec::with_capacity(horizon);
        let mut pv_kw = Vec::with_capacity(horizon);
        for k in 0..horizon {
            // unoccupied: float anywhere within the setback band
            let target = if occupancy[k] {
                hvac_setpoint
            } else {
                oat[k].clamp(hvac_setpoint - plant.setback, hvac_setpoint + plant.setback)
            };
            let gap = oat[k] - target;
            let hvac = if gap > 0.0 {
                (gap / plant.hvac_r).min(plant.hvac_p_c)
            } else {
                (-gap / plant.hvac_r).min(plant.hvac_p_h)
            };
            hvac_kw.push(hvac);

            let reheat_kwh =
                draw_litres(k) * WATER_KWH_PER_LITRE_DEG * (wh_setpoint - INLET_TEMP_C).max(0.0);
            wh_kw.push((reheat_kwh / dt_hours).min(plant.wh_p));

            pv_kw.push(match &plant.pv {
                Some(pv) => ghi[k] * pv.area * pv.eff / 1000.0,
                None => 0.0,
            });
        }

        let load_kw: Vec<f64> = (0..horizon).map(|k| hvac_kw[k] + wh_kw[k] + ev_kw).collect();

        let mut batt_kw = vec![0.0; horizon];
        let mut e_batt = Vec::new();
        if let Some(b) = &plant.battery {
            let mean_price = price.iter().sum::<f64>() / horizon as f64;
            let mut energy = previous_scalar(request, "e_batt_opt")
                .unwrap_or(b.e_init)
                .clamp(0.0, b.capacity);
            for k in 0..horizon {
                // positive = charging
                let p = if price[k] < mean_price {
                    b.max_rate.min((b.capacity - energy) / (b.eta * dt_hours))
                } else if price[k] > mean_price {
                    -b.max_rate.min(energy * b.eta / dt_hours)
                } else {
                    0.0
                };
                energy += if p >= 0.0 {
                    p * b.eta * dt_hours
                } else {
                    p / b.eta * dt_hours
                };
                batt_kw[k] = p;
                e_batt.push(energy.clamp(0.0, b.capacity));
            }
        }

        let grid_kw: Vec<f64> = (0..horizon)
            .map(|k| load_kw[k] + batt_kw[k] - pv_kw[k])
            .collect();
        if let Some(k) = grid_kw.iter().position(|p| !p.is_finite()) {
            return Err(SolveError::Failed(format!(
                "non-finite grid power at horizon index {k}"
            )));
        }
        let cost: f64 = (0..horizon).map(|k| grid_kw[k] * price[k] * dt_hours).sum();

        let mut vals = OptimalVals::new();
        vals.insert(GRID_POWER_KEY, OptimalValue::Series(grid_kw));
        vals.insert("p_load_opt", OptimalValue::Series(load_kw));
        vals.insert("hvac_power_opt", OptimalValue::Series(hvac_kw));
        vals.insert("wh_power_opt", OptimalValue::Series(wh_kw));
        vals.insert("temp_in_opt", OptimalValue::Scalar(hvac_setpoint));
        vals.insert("temp_wh_opt", OptimalValue::Scalar(wh_setpoint));
        vals.insert("cost_opt", OptimalValue::Scalar(cost));
        if plant.battery.is_some() {
            vals.insert("p_batt_opt", OptimalValue::Series(batt_kw));
            vals.insert("e_batt_opt", OptimalValue::Series(e_batt));
        }
        if plant.pv.is_some() {
            vals.insert("p_pv_opt", OptimalValue::Series(pv_kw));
        }
        if request.overrides.ev_charge.is_some() {
            vals.insert("p_ev_opt", OptimalValue::Scalar(ev_kw));
        }

        tracing::debug!(
            home = %home.name,
            t = params.timestep,
            "solved horizon of {horizon} steps, grid {:.3} kW",
            vals.grid_power().unwrap_or_default()
        );

        Ok(SolverOutput {
            optimal_vals: vals,
            horizon: HorizonView::new(occupancy, draw_fraction, oat),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Overrides;
    use crate::home::{HomeSpec, OccupancyWindow, ParamSet};
    use crate::player::StepParams;

    fn set(key: &str, fields: &[(&str, &str)]) -> ParamSet {
        ParamSet::new(
            key,
            fields.iter().map(|(k, v)| (k.to_string(), v.to_string())),
        )
    }

    fn home(type_raw: &str) -> HomeSpec {
        let (capabilities, type_tags) = Capabilities::from_type_tags(type_raw);
        HomeSpec {
            name: "home-a".into(),
            type_tags,
            capabilities,
            home: set("home_values", &[]),
            hvac: set("hvac_values", &[("r", "2.0"), ("p_c", "3.0")]),
            wh: set("wh_values", &[("tank_size", "100")]),
            hems: set("hems_values", &[("prediction_horizon", "4")]),
            battery: capabilities
                .contains(Capabilities::BATTERY)
                .then(|| set("battery_values", &[("max_cap", "10"), ("max_rate", "2")])),
            pv: capabilities
                .contains(Capabilities::PV)
                .then(|| set("pv_values", &[("area", "10"), ("eff", "0.2")])),
            draw_sizes: vec![0.0, 20.0],
            weekday_occ_schedule: vec![OccupancyWindow {
                start_hour: 17.0,
                end_hour: 8.0,
            }],
        }
    }

    fn params(t: usize) -> StepParams {
        StepParams {
            timestep: t,
            current_demand: None,
            oat: vec![25.0, 25.0, 25.0, 25.0],
            ghi: vec![0.0, 500.0, 500.0, 0.0],
            price: vec![0.1, 0.1, 0.3, 0.3],
        }
    }

    fn solve(home: &HomeSpec, params: &StepParams, overrides: Overrides) -> SolverOutput {
        HeuristicSolver
            .solve(&SolveRequest {
                home,
                params,
                previous: None,
                overrides,
            })
            .unwrap()
    }

    #[test]
    fn hvac_override_changes_cooling_load() {
        let home = home(r#"["hvac","wh"]"#);
        let p = params(7);
        let warm = solve(
            &home,
            &p,
            Overrides {
                hvac_setpoint: Some(24.0),
                ..Overrides::default()
            },
        );
        let cool = solve(
            &home,
            &p,
            Overrides {
                hvac_setpoint: Some(18.0),
                ..Overrides::default()
            },
        );
        assert!(cool.optimal_vals.grid_power() > warm.optimal_vals.grid_power());
        assert_eq!(
            cool.optimal_vals.get("temp_in_opt"),
            Some(&OptimalValue::Scalar(18.0))
        );
    }

    #[test]
    fn horizon_reports_departure() {
        // t = 7 is occupied (17:00 to 08:00); the home empties at 08:00
        let home = home(r#"["hvac","wh"]"#);
        let out = solve(&home, &params(7), Overrides::default());
        assert_eq!(out.horizon.occupancy, vec![true, false, false, false]);
        assert_eq!(out.horizon.leaving_index, Some(1));
        assert_eq!(out.horizon.returning_index, None);
    }

    #[test]
    fn draw_fraction_uses_tank_size() {
        let home = home(r#"["hvac","wh"]"#);
        let out = solve(&home, &params(1), Overrides::default());
        assert!((out.horizon.draw_fraction - 0.2).abs() < 1e-9);
    }

    #[test]
    fn battery_and_pv_outputs_only_when_fitted() {
        let plain = solve(&home(r#"["hvac","wh"]"#), &params(0), Overrides::default());
        assert!(!plain.optimal_vals.contains("e_batt_opt"));
        assert!(!plain.optimal_vals.contains("p_pv_opt"));

        let full = solve(&home("battery_pv"), &params(0), Overrides::default());
        assert!(full.optimal_vals.contains("e_batt_opt"));
        assert!(full.optimal_vals.contains("p_pv_opt"));
        let Some(OptimalValue::Series(p_batt)) = full.optimal_vals.get("p_batt_opt") else {
            panic!("battery dispatch missing");
        };
        // cheap first half charges, expensive second half discharges
        assert!(p_batt[0] > 0.0);
        assert!(p_batt[3] < 0.0);
    }

    #[test]
    fn missing_weather_is_reported() {
        let home = home(r#"["hvac","wh"]"#);
        let mut p = params(0);
        p.oat.clear();
        let err = HeuristicSolver
            .solve(&SolveRequest {
                home: &home,
                params: &p,
                previous: None,
                overrides: Overrides::default(),
            })
            .unwrap_err();
        assert!(matches!(err, SolveError::MissingInput(_)));
    }

    #[test]
    fn previous_setpoint_carries_over() {
        let home = home(r#"["hvac","wh"]"#);
        let mut prev = OptimalVals::new();
        prev.insert("temp_wh_opt", OptimalValue::Scalar(50.0));
        let out = HeuristicSolver
            .solve(&SolveRequest {
                home: &home,
                params: &params(1),
                previous: Some(&prev),
                overrides: Overrides::default(),
            })
            .unwrap();
        assert_eq!(
            out.optimal_vals.get("temp_wh_opt"),
            Some(&OptimalValue::Scalar(50.0))
        );
    }

    fn param_error(home: &HomeSpec) -> ConfigError {
        // 09:00 is unoccupied, so the setback band is in play
        let err = HeuristicSolver
            .solve(&SolveRequest {
                home,
                params: &params(9),
                previous: None,
                overrides: Overrides::default(),
            })
            .unwrap_err();
        match err {
            SolveError::Params(e) => e,
            other => panic!("expected a parameter error, got {other:?}"),
        }
    }

    #[test]
    fn negative_setback_is_a_parameter_error() {
        let mut h = home(r#"["hvac","wh"]"#);
        h.hvac = set("hvac_values", &[("setback", "-2")]);
        assert_eq!(param_error(&h).field, "hvac_values.setback");
    }

    #[test]
    fn nan_setback_is_a_parameter_error() {
        let mut h = home(r#"["hvac","wh"]"#);
        h.hvac = set("hvac_values", &[("setback", "nan")]);
        assert_eq!(param_error(&h).field, "hvac_values.setback");
    }

    #[test]
    fn negative_battery_capacity_is_a_parameter_error() {
        let mut h = home("battery_pv");
        h.battery = Some(set("battery_values", &[("max_cap", "-10")]));
        assert_eq!(param_error(&h).field, "battery_values.max_cap");
    }

    #[test]
    fn nan_previous_setpoint_is_rejected() {
        let home = home(r#"["hvac","wh"]"#);
        let mut prev = OptimalVals::new();
        prev.insert("temp_in_opt", OptimalValue::Scalar(f64::NAN));
        let err = HeuristicSolver
            .solve(&SolveRequest {
                home: &home,
                params: &params(9),
                previous: Some(&prev),
                overrides: Overrides::default(),
            })
            .unwrap_err();
        assert!(matches!(err, SolveError::MissingInput(_)));
    }
}
