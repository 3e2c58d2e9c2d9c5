//! Action space: which setpoint overrides a player controls and how an
//! action vector maps onto them.
//!
//! Vector layout is fixed by the configured action list in canonical order
//! (HVAC, water heater, EV). Decoding consumes the vector from the tail in
//! the reverse of that order, so the last declared action takes the last
//! element.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors raised while decoding an action vector.
#[derive(Debug, Error, PartialEq)]
pub enum ActionError {
    #[error("action vector has {got} elements, expected {expected}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("action value for {kind} is not finite: {value}")]
    NotFinite { kind: ActionKind, value: f64 },
}

/// Controllable setpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    /// Moves the HVAC comfort band to a new setpoint (°C).
    HvacSetpoint,
    /// Water heater temperature setpoint (°C).
    WhSetpoint,
    /// EV charge rate as a signed fraction of rated power.
    EvCharge,
}

impl ActionKind {
    /// Canonical vector order.
    pub const ALL: [ActionKind; 3] = [
        ActionKind::HvacSetpoint,
        ActionKind::WhSetpoint,
        ActionKind::EvCharge,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActionKind::HvacSetpoint => "hvac_setpoint",
            ActionKind::WhSetpoint => "wh_setpoint",
            ActionKind::EvCharge => "ev_charge",
        }
    }

    /// Inclusive `(min, max)` bounds.
    pub fn bounds(self) -> (f64, f64) {
        match self {
            ActionKind::HvacSetpoint => (16.0, 24.0),
            ActionKind::WhSetpoint => (42.0, 52.0),
            ActionKind::EvCharge => (-1.0, 1.0),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = ActionKind::ALL.iter().map(|k| k.name()).collect();
                format!("unknown action \"{s}\", available: {}", known.join(", "))
            })
    }
}

/// Setpoint overrides applied to the solver's constraint set for one step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Overrides {
    pub hvac_setpoint: Option<f64>,
    pub wh_setpoint: Option<f64>,
    pub ev_charge: Option<f64>,
}

impl Overrides {
    pub fn get(&self, kind: ActionKind) -> Option<f64> {
        match kind {
            ActionKind::HvacSetpoint => self.hvac_setpoint,
            ActionKind::WhSetpoint => self.wh_setpoint,
            ActionKind::EvCharge => self.ev_charge,
        }
    }

    fn set(&mut self, kind: ActionKind, value: f64) {
        match kind {
            ActionKind::HvacSetpoint => self.hvac_setpoint = Some(value),
            ActionKind::WhSetpoint => self.wh_setpoint = Some(value),
            ActionKind::EvCharge => self.ev_charge = Some(value),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The configured actions, deduplicated and in canonical order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSpace {
    kinds: Vec<ActionKind>,
}

impl ActionSpace {
    pub fn new(kinds: impl IntoIterator<Item = ActionKind>) -> Self {
        let mut kinds: Vec<ActionKind> = kinds.into_iter().collect();
        kinds.sort();
        kinds.dedup();
        Self { kinds }
    }

    pub fn kinds(&self) -> &[ActionKind] {
        &self.kinds
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Per-element `(min, max)` bounds in vector order.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.kinds.iter().map(|k| k.bounds()).collect()
    }

    /// Decodes an action vector into overrides.
    ///
    /// Elements are popped from the tail: EV charge first, then water heater,
    /// then HVAC, each only if configured. Values outside a kind's bounds are
    /// clamped.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::LengthMismatch`] unless the vector has exactly
    /// one element per configured action, and [`ActionError::NotFinite`]
    /// for NaN or infinite values.
    pub fn decode(&self, action: &[f64]) -> Result<Overrides, ActionError> {
        if action.len() != self.kinds.len() {
            return Err(ActionError::LengthMismatch {
                expected: self.kinds.len(),
                got: action.len(),
            });
        }

        let mut remaining = action;
        let mut overrides = Overrides::default();
        for kind in ActionKind::ALL.into_iter().rev() {
            if !self.contains(kind) {
                continue;
            }
            let Some((&value, rest)) = remaining.split_last() else {
                break;
            };
            remaining = rest;

            if !value.is_finite() {
                return Err(ActionError::NotFinite { kind, value });
            }
            let (lo, hi) = kind.bounds();
            let clamped = value.clamp(lo, hi);
            if clamped != value {
                tracing::warn!("{kind} value {value} outside [{lo}, {hi}], clamped to {clamped}");
            }
            overrides.set(kind, clamped);
        }
        debug_assert!(remaining.is_empty());

        Ok(overrides)
    }
}
