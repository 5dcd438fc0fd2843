//! Error taxonomy for the simulation core
//!
//! Fatal conditions (`InvalidConfig`, `InvalidStateTransition`, bad bar
//! input) abort a run. `InsufficientData` is only ever produced during
//! warm-up and is absorbed by the signal generator as a NONE signal.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::position::PositionStatus;
use crate::types::BarValidationError;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("insufficient data: need {required} prior bars, have {observed}")]
    InsufficientData { required: usize, observed: usize },

    #[error("invalid state transition: cannot {operation} while {status:?}")]
    InvalidStateTransition {
        operation: &'static str,
        status: PositionStatus,
    },

    #[error("bars out of order: {current} is not after {previous}")]
    UnorderedBars {
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("invalid bar at index {index}: {source}")]
    InvalidBar {
        index: usize,
        #[source]
        source: BarValidationError,
    },

    #[error("engine already finished")]
    EngineFinished,
}

impl BacktestError {
    /// Shorthand for building an `InvalidConfig` error
    pub fn config(msg: impl Into<String>) -> Self {
        BacktestError::InvalidConfig(msg.into())
    }

    /// True for errors that abort a run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BacktestError::InsufficientData { .. })
    }
}

pub type CoreResult<T> = std::result::Result<T, BacktestError>;
