// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parameter sets handed to the external solver and imager.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::{
    calibration::{CalMode, CalibrationTable, TableId},
    constants::*,
    solint::SolutionInterval,
};

lazy_static::lazy_static! {
    pub(crate) static ref WEIGHTINGS_COMMA_SEPARATED: String = Weighting::iter().join(", ");

    pub(crate) static ref COMBINE_AXES_COMMA_SEPARATED: String = CombineAxis::iter().join(", ");

    pub(crate) static ref INTERPOLATIONS_COMMA_SEPARATED: String = Interpolation::iter().join(", ");
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Weighting {
    Natural,
    Uniform,
    Briggs,
}

/// Data axes that a solver may combine over when forming solutions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CombineAxis {
    Scan,
    Spw,
    Field,
}

/// How solutions are interpolated onto the data when applied.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Interpolation {
    Linear,
    Nearest,
}

/// Parameters for producing a restored and residual image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagingParams {
    /// The number of pixels on each side of the image.
    pub imsize: [usize; 2],

    /// The angular size of a pixel, passed to the imager untouched (e.g.
    /// "2arcsec").
    pub cell: String,

    pub weighting: Weighting,

    /// The Briggs robustness. Only used with Briggs weighting.
    pub robust: f64,

    /// The maximum number of deconvolution iterations.
    pub niter: u32,

    /// Stop deconvolving at this residual flux density \[Jy\].
    pub threshold: f64,
}

impl Default for ImagingParams {
    fn default() -> Self {
        Self {
            imsize: [DEFAULT_IMSIZE, DEFAULT_IMSIZE],
            cell: DEFAULT_CELL.to_string(),
            weighting: Weighting::Briggs,
            robust: DEFAULT_ROBUST,
            niter: DEFAULT_NITER,
            threshold: DEFAULT_THRESHOLD_JY,
        }
    }
}

/// Parameters that don't change between the solve and apply steps of a
/// round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverParams {
    /// The antenna whose phase is fixed at zero.
    pub ref_antenna: usize,

    /// Antennas participating in fewer unflagged baselines than this don't
    /// get solutions.
    pub min_baselines_per_antenna: u32,

    /// Solutions with a signal-to-noise ratio lower than this are flagged.
    pub min_snr: f64,

    /// The axes to combine over when solving.
    pub combine: Vec<CombineAxis>,

    /// Which spectral window's solutions to use for each spectral window.
    /// Empty means "each spectral window uses its own solutions".
    pub spw_map: Vec<usize>,

    pub interpolation: Interpolation,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            ref_antenna: DEFAULT_REF_ANTENNA,
            min_baselines_per_antenna: DEFAULT_MIN_BASELINES_PER_ANTENNA,
            min_snr: DEFAULT_MIN_SNR,
            combine: vec![],
            spw_map: vec![],
            interpolation: Interpolation::Linear,
        }
    }
}

/// Everything a solver needs to know to produce one round's table.
#[derive(Debug, Clone, Copy)]
pub struct SolveRequest<'a> {
    /// The identifier the resulting table must carry.
    pub id: &'a TableId,

    pub solint: SolutionInterval,

    pub mode: CalMode,

    pub params: &'a SolverParams,

    /// The final table of a previous stage, if this stage is chained.
    pub inherited: Option<&'a CalibrationTable>,

    /// Tables already committed in this stage that the new solution is
    /// solved on top of. Only non-empty for incremental stages.
    pub committed: &'a [CalibrationTable],
}

impl<'a> SolveRequest<'a> {
    /// The tables that are applied on-the-fly while solving, in application
    /// order.
    pub fn pre_applied(&self) -> impl Iterator<Item = &'a CalibrationTable> {
        self.inherited.into_iter().chain(self.committed.iter())
    }
}
