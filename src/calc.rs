//! Tank level/volume arithmetic.
//!
//! Every tank carries three calibration constants: `bbl_per_meter` (how many
//! barrels one meter of level holds), `min_level` (lowest pumpable level) and
//! `max_level` (highest safe level). All conversions between level, pumpable
//! volume and ullage are linear in these constants.

use chrono::{Duration, NaiveDateTime};

/// Conversion factor between cubic meters and barrels.
pub const M3_TO_BBL: f64 = 6.28;

/// An estimated level this close to (or above) the maximum is flagged.
pub const HIGH_LEVEL_MARGIN_M: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TankSpec {
    pub bbl_per_meter: f64,
    pub min_level: f64,
    pub max_level: f64,
}

/// What the operator is aiming for.
#[derive(Debug, Clone, Copy)]
pub enum Target {
    /// Pumpable volume above the minimum level, in barrels.
    Pumpable(f64),
    /// Empty space below the maximum level, in barrels.
    Ullage(f64),
    /// A tank level in meters.
    Level(f64),
}

#[derive(Debug, Clone, Copy)]
pub enum FlowRate {
    BarrelsPerHour(f64),
    CubicMetersPerHour(f64),
    MetersPerHour(f64),
}

impl FlowRate {
    /// Normalizes the flow to barrels per hour for the given tank.
    pub fn bbl_per_hour(&self, spec: &TankSpec) -> f64 {
        match *self {
            FlowRate::BarrelsPerHour(f) => f,
            FlowRate::CubicMetersPerHour(f) => f * M3_TO_BBL,
            FlowRate::MetersPerHour(f) => f * spec.bbl_per_meter,
        }
    }
}

impl TankSpec {
    pub fn available_pumpable(&self, level: f64) -> f64 {
        (level - self.min_level) * self.bbl_per_meter
    }

    pub fn current_ullage(&self, level: f64) -> f64 {
        (self.max_level - level) * self.bbl_per_meter
    }

    /// Total usable volume between the minimum and maximum levels.
    pub fn capacity(&self) -> f64 {
        (self.max_level - self.min_level) * self.bbl_per_meter
    }

    /// The level the tank will sit at once the target is reached.
    pub fn level_for(&self, target: Target) -> f64 {
        match target {
            Target::Pumpable(v) => v / self.bbl_per_meter + self.min_level,
            Target::Ullage(v) => self.max_level - v / self.bbl_per_meter,
            Target::Level(l) => l,
        }
    }

    /// Volume still to move (in barrels) to reach the target from `level`.
    /// Positive means filling, negative means pumping out.
    pub fn volume_delta(&self, level: f64, target: Target) -> f64 {
        match target {
            Target::Pumpable(v) => v - self.available_pumpable(level),
            Target::Ullage(v) => self.current_ullage(level) - v,
            Target::Level(l) => (l - level) * self.bbl_per_meter,
        }
    }

    pub fn is_high_level(&self, level: f64) -> bool {
        level >= self.max_level - HIGH_LEVEL_MARGIN_M || level < self.min_level
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub available_pumpable: f64,
    pub current_ullage: f64,
    pub estimated_level: f64,
    pub level_difference: f64,
    pub volume_difference: f64,
    pub high_level: bool,
    /// Hours until the target is reached, when a usable flow was given.
    pub hours: Option<f64>,
    pub finish_at: Option<NaiveDateTime>,
}

/// Full estimate for one tank: current volumes, the level implied by the
/// target and, if a positive flow rate is known, the finish timestamp.
pub fn estimate(
    spec: &TankSpec,
    level: f64,
    target: Target,
    flow: Option<FlowRate>,
    now: NaiveDateTime,
) -> Estimate {
    let estimated_level = spec.level_for(target);
    let volume_difference = spec.volume_delta(level, target);

    let hours = flow
        .map(|f| f.bbl_per_hour(spec))
        .filter(|f| *f > 0.0)
        .map(|f| volume_difference.abs() / f);

    let finish_at = hours.map(|h| now + Duration::seconds((h * 3600.0) as i64));

    Estimate {
        available_pumpable: spec.available_pumpable(level),
        current_ullage: spec.current_ullage(level),
        estimated_level,
        level_difference: estimated_level - level,
        volume_difference,
        high_level: spec.is_high_level(estimated_level),
        hours,
        finish_at,
    }
}
