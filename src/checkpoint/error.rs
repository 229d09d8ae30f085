// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::calibration::{TableReadError, TableWriteError};

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("No checkpoint has the label '{0}'")]
    NotFound(String),

    #[error("Checkpoint '{label}' has flags with shape {actual:?}, but the dataset's flags have shape {expected:?}")]
    ShapeMismatch {
        label: String,
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("Checkpoint file {file} is corrupt: {reason}")]
    Corrupt { file: String, reason: String },

    #[error("Couldn't read the checkpoint index: {0}")]
    Index(#[from] serde_json::Error),

    #[error(transparent)]
    TableRead(#[from] TableReadError),

    #[error(transparent)]
    TableWrite(#[from] TableWriteError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
