// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The external collaborators of a round: something that solves for and
//! applies calibration, something that images, and something that flags.
//!
//! None of the numerical work happens in this crate. Implementations either
//! wrap another program (see [`CommandSolver`], [`CommandImager`] and
//! [`CommandFlagger`]) or are provided by the caller.

mod command;
mod error;
mod image;
mod params;

pub use command::{CommandFlagger, CommandImager, CommandSolver, ExternalCommand};
pub use error::{BackendError, SolveError};
pub use image::{read_image, write_image, ImagePair, ImageReadError};
pub use params::*;

use crate::{calibration::CalibrationTable, dataset::Dataset};

pub trait CalibrationSolver {
    /// Solve for a new calibration table. The returned table must carry
    /// `request.id` and `request.mode`.
    fn solve(
        &mut self,
        dataset: &Dataset,
        request: &SolveRequest,
    ) -> Result<CalibrationTable, SolveError>;

    /// Apply `tables`, in order, to the uncorrected data of `dataset`.
    /// Whatever was applied before is replaced. The caller updates the
    /// dataset's applied-table lineage when this succeeds.
    fn apply(
        &mut self,
        dataset: &mut Dataset,
        tables: &[CalibrationTable],
        params: &SolverParams,
    ) -> Result<(), BackendError>;

    /// Does `dataset` already carry calibration solutions from an earlier
    /// run?
    fn already_calibrated(&self, dataset: &Dataset) -> bool {
        dataset.is_calibrated()
    }
}

/// Imaging is slow, so it happens on another thread while the caller waits.
pub trait ImagingBackend: Send {
    /// Image the (corrected) data of `dataset`. `label` names the image
    /// products, e.g. "round0" or "phase_2".
    fn image(
        &mut self,
        dataset: &Dataset,
        params: &ImagingParams,
        label: &str,
    ) -> Result<ImagePair, BackendError>;
}

pub trait Flagger {
    /// Flag outliers in the corrected data of `dataset`, returning the number
    /// of newly-flagged visibilities.
    fn flag(&mut self, dataset: &mut Dataset) -> Result<usize, BackendError>;
}
