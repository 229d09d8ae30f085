// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from external solvers, imagers and flaggers.

use thiserror::Error;

use super::ImageReadError;
use crate::{
    calibration::{TableReadError, TableWriteError},
    solint::SolutionInterval,
};

/// A backend couldn't do what was asked of it. This is always fatal to the
/// current round.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("'{program}' exited with {}: {stderr}", describe_exit(.code))]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Couldn't run '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{0}")]
    Failure(String),

    #[error("Couldn't serialise the request for the backend: {0}")]
    Json(#[from] serde_json::Error),

    #[error("The backend's calibration table was unreadable: {0}")]
    TableRead(#[from] TableReadError),

    #[error("Couldn't write a calibration table for the backend: {0}")]
    TableWrite(#[from] TableWriteError),

    #[error("The backend's image was unreadable: {0}")]
    ImageRead(#[from] ImageReadError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "no status (killed by a signal?)".to_string(),
    }
}

#[derive(Error, Debug)]
pub enum SolveError {
    /// Too few baselines or antennas met the SNR threshold. Whether this is
    /// fatal is up to the caller.
    #[error("Insufficient data to solve at solution interval {solint}: {reason}")]
    InsufficientData {
        solint: SolutionInterval,
        reason: String,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),
}
