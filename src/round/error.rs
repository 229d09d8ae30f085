// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::{
    backend::{BackendError, SolveError},
    checkpoint::CheckpointError,
    quality::QualityError,
};

/// Why a round couldn't produce a score.
#[derive(Error, Debug)]
pub enum RoundError {
    #[error(transparent)]
    Solve(#[from] SolveError),

    #[error("Applying calibration failed: {0}")]
    Apply(BackendError),

    #[error("Flagging failed: {0}")]
    Flag(BackendError),

    #[error("Imaging failed: {0}")]
    Image(BackendError),

    #[error(transparent)]
    Quality(#[from] QualityError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl RoundError {
    /// Did the solver say there wasn't enough data? Callers may choose to skip
    /// the round rather than abort.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, RoundError::Solve(SolveError::InsufficientData { .. }))
    }
}
