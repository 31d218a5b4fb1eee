//! Security-level thresholds for the official scoring methodology.
//!
//! Each level carries an individual floor Pi (every answered control must
//! reach it), an average threshold T (the submeasure mean must reach it),
//! and a maturity minimum (the count of passed submeasures the whole
//! assessment must reach).

use rust_decimal::{Decimal, RoundingStrategy};

use crate::core::SecurityLevel;

/// Pi and T values for a security level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Individual floor Pi applied to every answered control.
    pub individual: Decimal,
    /// Average threshold T applied to the submeasure mean.
    pub average: Decimal,
}

/// Returns the Pi/T thresholds for a security level.
#[must_use]
pub fn thresholds_for(level: SecurityLevel) -> Thresholds {
    match level {
        SecurityLevel::Osnovna => Thresholds {
            individual: Decimal::new(20, 1), // 2.0
            average: Decimal::new(25, 1),    // 2.5
        },
        SecurityLevel::Srednja => Thresholds {
            individual: Decimal::new(25, 1), // 2.5
            average: Decimal::new(30, 1),    // 3.0
        },
        SecurityLevel::Napredna => Thresholds {
            individual: Decimal::new(30, 1), // 3.0
            average: Decimal::new(35, 1),    // 3.5
        },
    }
}

/// Returns the maturity-trend minimum (passed submeasures) for a level.
#[must_use]
pub const fn maturity_threshold_for(level: SecurityLevel) -> u32 {
    match level {
        SecurityLevel::Osnovna => 109,
        SecurityLevel::Srednja => 58,
        SecurityLevel::Napredna => 15,
    }
}

/// Rounds half-up to two decimal places, the methodology's rounding rule.
#[must_use]
pub fn round_score(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
