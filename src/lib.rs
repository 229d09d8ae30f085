// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Iterative self-calibration of radio-interferometric visibilities.

A [`StageChain`] runs one [`ConvergenceController`] per stage. Each controller
runs rounds (solve, checkpoint, apply, flag, image, score) through a
[`RoundExecutor`], keeping a round only if it strictly improves the image
quality and rolling it back otherwise.
 */

pub mod backend;
pub mod calibration;
pub mod checkpoint;
mod cli;
pub(crate) mod constants;
pub mod controller;
pub mod dataset;
pub(crate) mod misc;
mod params;
pub mod quality;
pub mod round;
pub mod solint;
pub mod stage;
pub(crate) mod unit_parsing;

#[cfg(test)]
mod tests;

use crossbeam_utils::atomic::AtomicCell;

/// Are progress bars being drawn? This should only ever be enabled by CLI
/// code.
pub(crate) static PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);

// Re-exports.
pub use backend::{CalibrationSolver, Flagger, ImagingBackend};
pub use calibration::{CalMode, CalibrationTable, StageMode, TableId};
pub use checkpoint::{CheckpointStore, DirCheckpointStore, MemoryCheckpointStore};
pub use cli::{Selfcal, SelfcalError};
pub use controller::{ControllerReport, ControllerState, ConvergenceController};
pub use dataset::Dataset;
pub use quality::{NoiseRegion, QualityAssessment};
pub use round::RoundExecutor;
pub use solint::{SolutionInterval, SolutionIntervalSequence};
pub use stage::{StageChain, StageChainReport, StageConfig};
