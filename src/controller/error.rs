// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::{
    backend::BackendError, checkpoint::CheckpointError, quality::QualityRecordError,
    round::RoundError, stage::ConfigurationError,
};

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] ConfigurationError),

    /// A round failed. The dataset has been rolled back to the state before
    /// the round. Round 0 is the baseline.
    #[error("Stage '{stage}' round {round} failed: {source}")]
    Round {
        stage: String,
        round: usize,
        source: RoundError,
    },

    /// A round failed, and so did undoing it. The dataset may be part-way
    /// through the round.
    #[error("Stage '{stage}' round {round} failed ({round_error}), and rolling it back failed too: {source}")]
    RollbackAfterFailure {
        stage: String,
        round: usize,
        round_error: RoundError,
        source: Box<ControllerError>,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// A checkpoint was restored, but its tables couldn't be applied to the
    /// data again.
    #[error("Couldn't re-apply the calibration restored from '{label}': {source}")]
    Reapply { label: String, source: BackendError },

    #[error(transparent)]
    QualityRecord(#[from] QualityRecordError),
}
