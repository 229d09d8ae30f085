// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants and defaults.
 */

/// The default antenna whose phase is held at zero when solving.
pub const DEFAULT_REF_ANTENNA: usize = 0;

/// Antennas participating in fewer unflagged baselines than this don't get
/// solutions.
pub const DEFAULT_MIN_BASELINES_PER_ANTENNA: u32 = 4;

/// Solutions with a signal-to-noise ratio below this are flagged.
pub const DEFAULT_MIN_SNR: f64 = 3.0;

/// The default side length of the square noise box in the corner of the
/// residual image \[pixels\].
pub const DEFAULT_NOISE_BOX_SIZE: usize = 64;

/// The default image side length \[pixels\].
pub const DEFAULT_IMSIZE: usize = 1024;

/// The default pixel size handed to the imager.
pub const DEFAULT_CELL: &str = "1arcsec";

/// The default Briggs robustness.
pub const DEFAULT_ROBUST: f64 = 0.5;

/// The default maximum number of deconvolution iterations.
pub const DEFAULT_NITER: u32 = 1000;

/// The default deconvolution threshold \[Jy\].
pub const DEFAULT_THRESHOLD_JY: f64 = 0.0;

/// The default solution intervals of a stage, coarse to fine.
pub const DEFAULT_SOLINTS: [&str; 3] = ["inf", "30s", "10s"];

/// The solver exits with this status when there is too little data to meet the
/// baseline and SNR constraints.
pub const INSUFFICIENT_DATA_EXIT_CODE: i32 = 2;

/// The label of the checkpoint taken of the baseline state.
pub const BASELINE_CHECKPOINT_LABEL: &str = "round0";

/// The file name of the quality record inside an output directory.
pub const DEFAULT_QUALITY_RECORD_FILENAME: &str = "selfcal_quality.tsv";

/// The file name of the checkpoint index inside a checkpoint directory.
pub const CHECKPOINT_INDEX_FILENAME: &str = "index.json";
