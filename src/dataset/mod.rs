// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The visibility dataset being self-calibrated.
//!
//! A [`Dataset`] is an explicit handle that is passed to every component that
//! needs it; there is no global dataset state. Only its *mutable calibration
//! state* ([`DatasetState`]: the flags and the lineage of applied calibration
//! tables) is tracked here, because that's what rounds mutate and what
//! checkpoints capture. The visibilities themselves live wherever the
//! external solver and imager keep them.


use std::path::{Path, PathBuf};

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    backend::ImagingParams,
    calibration::{c64, compose_gains, CalibrationTable},
};

/// The shape of a dataset's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetShape {
    pub num_timesteps: usize,
    pub num_channels: usize,
    pub num_baselines: usize,
}

impl DatasetShape {
    fn dim(self) -> (usize, usize, usize) {
        (self.num_timesteps, self.num_channels, self.num_baselines)
    }
}

/// The mutable calibration state of a dataset: what a checkpoint captures and
/// restores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetState {
    /// Flags with dimensions (timestep, channel, baseline). `true` is flagged.
    pub flags: Array3<bool>,

    /// The calibration tables currently applied, in application order.
    pub applied: Vec<CalibrationTable>,
}

impl DatasetState {
    pub fn num_flagged(&self) -> usize {
        self.flags.iter().filter(|&&f| f).count()
    }
}

pub struct Dataset {
    /// Identifies this dataset, e.g. in a quality record.
    name: String,

    /// Where the visibilities live, if they're on disk.
    path: Option<PathBuf>,

    state: DatasetState,

    imaging_params: ImagingParams,
}

impl Dataset {
    /// Create a new, unflagged and uncalibrated dataset.
    pub fn new<S: Into<String>>(
        name: S,
        path: Option<PathBuf>,
        shape: DatasetShape,
        imaging_params: ImagingParams,
    ) -> Dataset {
        Dataset {
            name: name.into(),
            path,
            state: DatasetState {
                flags: Array3::from_elem(shape.dim(), false),
                applied: vec![],
            },
            imaging_params,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn shape(&self) -> DatasetShape {
        let (num_timesteps, num_channels, num_baselines) = self.state.flags.dim();
        DatasetShape {
            num_timesteps,
            num_channels,
            num_baselines,
        }
    }

    pub fn state(&self) -> &DatasetState {
        &self.state
    }

    pub fn imaging_params(&self) -> &ImagingParams {
        &self.imaging_params
    }

    pub fn flags(&self) -> ArrayView3<bool> {
        self.state.flags.view()
    }

    /// Flags are mutated in place by flagging backends.
    pub fn flags_mut(&mut self) -> ArrayViewMut3<bool> {
        self.state.flags.view_mut()
    }

    pub fn applied_tables(&self) -> &[CalibrationTable] {
        &self.state.applied
    }

    /// Does this dataset carry calibration solutions already?
    pub fn is_calibrated(&self) -> bool {
        !self.state.applied.is_empty()
    }

    /// Replace the applied calibration with `tables`. Applying always starts
    /// from the uncorrected data, so the previous lineage is discarded rather
    /// than appended to.
    pub fn set_applied(&mut self, tables: Vec<CalibrationTable>) {
        self.state.applied = tables;
    }

    /// The net correction of all applied tables, or `None` if nothing is
    /// applied.
    pub fn net_gains(&self) -> Option<Array2<c64>> {
        compose_gains(&self.state.applied)
    }

    /// Capture the state for a checkpoint.
    pub(crate) fn snapshot(&self) -> DatasetState {
        self.state.clone()
    }

    /// Restore the state from a checkpoint. Only checkpoint stores should call
    /// this.
    pub(crate) fn restore_snapshot(&mut self, state: DatasetState) {
        self.state = state;
    }
}
