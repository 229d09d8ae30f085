// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all selfcal-related errors. This should be the *only* error
//! enum that is publicly visible.

use thiserror::Error;

use crate::{
    backend::{BackendError, ImageReadError},
    calibration::{TableReadError, TableWriteError},
    checkpoint::CheckpointError,
    controller::ControllerError,
    params::SelfcalRunError,
    quality::{QualityError, QualityRecordError},
    solint::SolutionIntervalError,
    stage::{ConfigurationError, StageChainError},
};

/// The *only* publicly visible error from selfcal. Every internal error is
/// mapped onto one of these categories.
#[derive(Error, Debug)]
pub enum SelfcalError {
    /// Bad arguments or stage configuration. Nothing was run.
    #[error("{0}")]
    Config(String),

    /// A round failed and its stage was stopped.
    #[error("{0}")]
    Round(String),

    /// Saving, restoring or deleting a checkpoint failed.
    #[error("{0}\n\nThe dataset may be left in an intermediate state.")]
    Checkpoint(String),

    /// An image couldn't be scored, or the quality record couldn't be used.
    #[error("{0}")]
    Quality(String),

    /// A calibration table couldn't be read or written.
    #[error("{0}")]
    Table(String),

    /// An image file couldn't be read.
    #[error("{0}")]
    Image(String),

    /// An error related to argument files.
    #[error("{0}")]
    ArgFile(String),

    /// A generic error that can't be clarified further, e.g. IO errors.
    #[error("{0}")]
    Generic(String),
}

// When changing the error propagation below, ensure `Self::from(e)` uses the
// correct `e`!

impl From<ConfigurationError> for SelfcalError {
    fn from(e: ConfigurationError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<SolutionIntervalError> for SelfcalError {
    fn from(e: SolutionIntervalError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<ControllerError> for SelfcalError {
    fn from(e: ControllerError) -> Self {
        let s = e.to_string();
        match e {
            ControllerError::Config(_) => Self::Config(s),
            ControllerError::Round { .. } => Self::Round(s),
            ControllerError::Checkpoint(_)
            | ControllerError::RollbackAfterFailure { .. }
            | ControllerError::Reapply { .. } => Self::Checkpoint(s),
            ControllerError::QualityRecord(_) => Self::Quality(s),
        }
    }
}

impl From<StageChainError> for SelfcalError {
    fn from(e: StageChainError) -> Self {
        match e {
            StageChainError::Config(e) => Self::from(e),
            StageChainError::Stage { stage, source } => {
                // Keep the category of the stage's error, but say which stage
                // it was.
                match Self::from(source) {
                    Self::Config(s) => Self::Config(format!("Stage '{stage}': {s}")),
                    Self::Round(s) => Self::Round(format!("Stage '{stage}': {s}")),
                    Self::Checkpoint(s) => Self::Checkpoint(format!("Stage '{stage}': {s}")),
                    Self::Quality(s) => Self::Quality(format!("Stage '{stage}': {s}")),
                    other => other,
                }
            }
        }
    }
}

impl From<SelfcalRunError> for SelfcalError {
    fn from(e: SelfcalRunError) -> Self {
        match e {
            SelfcalRunError::Chain(e) => Self::from(e),
            SelfcalRunError::Checkpoint(e) => Self::from(e),
            SelfcalRunError::TableWrite(e) => Self::from(e),
            SelfcalRunError::Diagnostics { .. } | SelfcalRunError::IO(_) => {
                Self::Generic(e.to_string())
            }
        }
    }
}

impl From<CheckpointError> for SelfcalError {
    fn from(e: CheckpointError) -> Self {
        Self::Checkpoint(e.to_string())
    }
}

impl From<QualityError> for SelfcalError {
    fn from(e: QualityError) -> Self {
        Self::Quality(e.to_string())
    }
}

impl From<QualityRecordError> for SelfcalError {
    fn from(e: QualityRecordError) -> Self {
        Self::Quality(e.to_string())
    }
}

impl From<TableReadError> for SelfcalError {
    fn from(e: TableReadError) -> Self {
        Self::Table(e.to_string())
    }
}

impl From<TableWriteError> for SelfcalError {
    fn from(e: TableWriteError) -> Self {
        Self::Table(e.to_string())
    }
}

impl From<ImageReadError> for SelfcalError {
    fn from(e: ImageReadError) -> Self {
        Self::Image(e.to_string())
    }
}

impl From<BackendError> for SelfcalError {
    fn from(e: BackendError) -> Self {
        Self::Generic(e.to_string())
    }
}

impl From<std::io::Error> for SelfcalError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}
