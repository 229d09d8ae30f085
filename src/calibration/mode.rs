// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Calibration modes.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

lazy_static::lazy_static! {
    pub(crate) static ref STAGE_MODES_COMMA_SEPARATED: String = StageMode::iter().join(", ");
}

/// What a solver solves for (its "calmode").
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
pub enum CalMode {
    /// Phase only; amplitudes are fixed at unity.
    #[strum(serialize = "p")]
    #[serde(rename = "p")]
    Phase,

    /// Amplitude only; phases are fixed at zero.
    #[strum(serialize = "a")]
    #[serde(rename = "a")]
    Amplitude,

    /// Amplitude and phase together.
    #[strum(serialize = "ap")]
    #[serde(rename = "ap")]
    AmplitudePhase,
}

impl CalMode {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            CalMode::Phase => 0,
            CalMode::Amplitude => 1,
            CalMode::AmplitudePhase => 2,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<CalMode> {
        match b {
            0 => Some(CalMode::Phase),
            1 => Some(CalMode::Amplitude),
            2 => Some(CalMode::AmplitudePhase),
            _ => None,
        }
    }
}

/// The kind of self-calibration stage. Each kind determines the solver's
/// [`CalMode`] and which tables are composed when solutions are applied.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StageMode {
    /// Phase-only solutions, solved directly against the inherited state.
    #[strum(serialize = "phase")]
    Phase,

    /// Amplitude-only solutions on top of an inherited (phase) table.
    #[strum(serialize = "amp")]
    #[serde(rename = "amp")]
    Amplitude,

    /// Amplitude and phase solutions on top of an inherited (phase) table.
    #[strum(serialize = "ap")]
    #[serde(rename = "ap")]
    AmplitudePhase,

    /// Phase-only solutions, each one solved on top of every table this stage
    /// has already committed.
    #[strum(serialize = "incremental")]
    Incremental,
}

impl StageMode {
    pub fn cal_mode(self) -> CalMode {
        match self {
            StageMode::Phase | StageMode::Incremental => CalMode::Phase,
            StageMode::Amplitude => CalMode::Amplitude,
            StageMode::AmplitudePhase => CalMode::AmplitudePhase,
        }
    }

    /// Does this kind of stage need a table from a previous stage (or one
    /// supplied explicitly)?
    pub fn requires_inherited_table(self) -> bool {
        matches!(self, StageMode::Amplitude | StageMode::AmplitudePhase)
    }

    /// Are the tables committed earlier in the stage composed with each new
    /// table?
    pub fn composes_committed_tables(self) -> bool {
        matches!(self, StageMode::Incremental)
    }
}
