//! Common Utilities
//!
//! Numeric helpers shared by the measurement and reporting code

/// Convert a linear power ratio to dB
pub fn linear_to_db(value: f32) -> f32 {
    10.0 * value.log10()
}

/// Convert a linear power in watts to dBm
pub fn linear_to_dbm(value: f32) -> f32 {
    linear_to_db(value) + 30.0
}

/// Exponential moving average: `coeff * new + (1 - coeff) * old`
pub fn ema(new: f32, old: f32, coeff: f32) -> f32 {
    coeff * new + (1.0 - coeff) * old
}

/// Spread (max - min) of a set of values; zero for fewer than two values
pub fn spread(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }

    let (min, max) = values.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    });

    // NaN inputs are ignored by min/max; report them explicitly
    if values.iter().any(|v| v.is_nan()) {
        return f32::NAN;
    }

    max - min
}

/// Time utilities for subframe/frame calculations
pub mod time {
    /// Subframes per radio frame
    pub const SUBFRAMES_PER_FRAME: usize = 10;

    /// Duration in seconds between two synchronization subframes (0 and 5)
    pub const SYNC_PERIOD_S: f32 = 5e-3;

    /// Subframe index `steps` subframes after `index`
    pub fn advance_subframe(index: usize, steps: usize) -> usize {
        (index + steps) % SUBFRAMES_PER_FRAME
    }
}
