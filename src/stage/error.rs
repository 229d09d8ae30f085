// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use super::RoundParameter;
use crate::{calibration::StageMode, controller::ControllerError, solint::SolutionIntervalError};

/// Malformed inputs. These are always found before anything runs.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Stage '{stage}' has {expected} solution intervals, but {actual} values for '{parameter}'")]
    OverrideLength {
        stage: String,
        parameter: RoundParameter,
        expected: usize,
        actual: usize,
    },

    #[error("Value {index} of '{parameter}' should be {expected}, but got {got}")]
    OverrideType {
        parameter: RoundParameter,
        index: usize,
        expected: &'static str,
        got: String,
    },

    #[error("Unknown or malformed per-round override '{0}'; expected 'parameter=values' with a parameter from: {}", *super::overrides::ROUND_PARAMETERS_COMMA_SEPARATED)]
    UnknownOverride(String),

    #[error("Stage '{stage}' solves for '{mode}', which needs a table from a previous stage or an explicit initial table, but there is neither")]
    MissingInheritedTable { stage: String, mode: StageMode },

    #[error("Stage names must be unique, but '{0}' appears more than once")]
    DuplicateStage(String),

    #[error("Stage names can't be empty")]
    EmptyStageName,

    #[error("No stages were specified")]
    NoStages,

    #[error("Invalid {what}: {value}")]
    InvalidParameter { what: &'static str, value: String },

    #[error(transparent)]
    SolutionInterval(#[from] SolutionIntervalError),
}

#[derive(Error, Debug)]
pub enum StageChainError {
    #[error(transparent)]
    Config(#[from] ConfigurationError),

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        source: ControllerError,
    },
}
