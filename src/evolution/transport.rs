use crate::consts::{STEP_COEFFICIENT, UNIT_INTERVAL_MAX, UNIT_INTERVAL_MIN};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Hyperparameter `{value}` lies outside the open interval (0, 1)")]
    Domain { value: f64 },
}

fn check_domain(value: f64) -> Result<f64, TransportError> {
    if value.is_finite() && value > 0.0 && value < 1.0 {
        Ok(value)
    } else {
        Err(TransportError::Domain { value })
    }
}

/// log(p / (1 - p)), using `ln_1p` so values close to 1 keep their precision.
pub fn logit(p: f64) -> f64 {
    p.ln() - (-p).ln_1p()
}

/// Logistic function, evaluated on the side that cannot overflow.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Moves a child's hyperparameter towards its parent's in logit space.
///
/// The direction is the sign of `parent - child`; the size of the move is
/// `tanh(step_coefficient)` logit units whatever the gap is, so the result
/// always stays inside (0, 1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogitTransport {
    step_coefficient: f64,
}

impl Default for LogitTransport {
    fn default() -> Self {
        LogitTransport {
            step_coefficient: STEP_COEFFICIENT,
        }
    }
}

impl LogitTransport {
    pub fn new(step_coefficient: f64) -> Self {
        LogitTransport { step_coefficient }
    }

    pub fn step_coefficient(&self) -> f64 {
        self.step_coefficient
    }

    /// Largest logit-space movement a single call can make.
    pub fn max_logit_step(&self) -> f64 {
        self.step_coefficient.tanh().abs()
    }

    pub fn transport(&self, parent_value: f64, child_value: f64) -> Result<f64, TransportError> {
        let parent_value = check_domain(parent_value)?;
        let child_value = check_domain(child_value)?;

        let direction = if parent_value > child_value {
            1.0
        } else if parent_value < child_value {
            -1.0
        } else {
            return Ok(child_value);
        };

        let shifted = logit(child_value) + (direction * self.step_coefficient).tanh();
        // the sigmoid rounds to 0 or 1 at the extremes of f64
        Ok(sigmoid(shifted).clamp(UNIT_INTERVAL_MIN, UNIT_INTERVAL_MAX))
    }
}

/// [`LogitTransport::transport`] with the default step coefficient.
pub fn transport(parent_value: f64, child_value: f64) -> Result<f64, TransportError> {
    LogitTransport::default().transport(parent_value, child_value)
}
