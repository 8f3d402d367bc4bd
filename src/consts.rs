// Shared numeric constants for the evolution core.

/// Tolerance used when comparing floats in row sums and tests.
pub const FLOAT_COMPARISON_EPSILON: f64 = 1e-9;

/// Layer multiplier used by the layered topologies when no flag is given.
pub const DEFAULT_LAYER_MULTIPLIER: usize = 5;

/// Scale applied to the sign of the parent/child disagreement before `tanh`.
pub const STEP_COEFFICIENT: f64 = 0.3;

/// Losses above this are treated as this value when inverted into fitness.
pub const LOSS_CEILING: f64 = 10_000.0;

pub const DEFAULT_INITIAL_HYPERPARAMETER: f64 = 0.01;

/// Largest f64 strictly below 1.
pub const UNIT_INTERVAL_MAX: f64 = 1.0 - f64::EPSILON / 2.0;
/// Smallest positive (subnormal) f64.
pub const UNIT_INTERVAL_MIN: f64 = f64::from_bits(1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_interval_bounds_are_the_extreme_floats_inside_it() {
        assert!(UNIT_INTERVAL_MIN > 0.0);
        assert_eq!(UNIT_INTERVAL_MIN / 2.0, 0.0);
        assert!(UNIT_INTERVAL_MAX < 1.0);
        assert_eq!(f64::from_bits(UNIT_INTERVAL_MAX.to_bits() + 1), 1.0);
    }
}
