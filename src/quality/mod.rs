// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Judging an image.
//!
//! The quality of a round is the peak of its restored image divided by the
//! RMS of its residual image in a noise region, like a peak signal-to-noise
//! ratio. Non-finite pixels are ignored everywhere.

mod error;
mod record;
#[cfg(test)]
mod tests;

pub use error::{QualityError, QualityRecordError};
pub use record::QualityRecord;

use std::fmt;

use ndarray::prelude::*;
use num_traits::Float;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_NOISE_BOX_SIZE;

/// Where in the residual image to measure the noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseRegion {
    /// A square of this many pixels in the first corner of the image (the
    /// first rows and columns). Clipped to the image if the image is smaller.
    Corner { size: usize },

    /// An explicit box. The ends are exclusive.
    Box {
        row_start: usize,
        row_end: usize,
        col_start: usize,
        col_end: usize,
    },
}

impl Default for NoiseRegion {
    fn default() -> Self {
        NoiseRegion::Corner {
            size: DEFAULT_NOISE_BOX_SIZE,
        }
    }
}

impl fmt::Display for NoiseRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoiseRegion::Corner { size } => write!(f, "{size}x{size} px corner"),
            NoiseRegion::Box {
                row_start,
                row_end,
                col_start,
                col_end,
            } => write!(f, "rows {row_start}..{row_end}, cols {col_start}..{col_end}"),
        }
    }
}

impl NoiseRegion {
    /// The box from four numbers: row start, row end, column start, column
    /// end.
    pub fn from_box(b: [usize; 4]) -> NoiseRegion {
        NoiseRegion::Box {
            row_start: b[0],
            row_end: b[1],
            col_start: b[2],
            col_end: b[3],
        }
    }

    /// Get the (row range, column range) of this region in an image with the
    /// given dimensions.
    fn ranges(
        self,
        (num_rows, num_cols): (usize, usize),
    ) -> Result<(std::ops::Range<usize>, std::ops::Range<usize>), QualityError> {
        let (rows, cols) = match self {
            NoiseRegion::Corner { size } => (0..size.min(num_rows), 0..size.min(num_cols)),
            NoiseRegion::Box {
                row_start,
                row_end,
                col_start,
                col_end,
            } => (row_start..row_end, col_start..col_end),
        };
        if rows.is_empty() || cols.is_empty() || rows.end > num_rows || cols.end > num_cols {
            return Err(QualityError::BadNoiseRegion {
                region: self,
                num_rows,
                num_cols,
            });
        }
        Ok((rows, cols))
    }
}

/// Everything that went into a score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    /// `peak / noise`.
    pub score: f64,

    /// The largest finite pixel of the restored image.
    pub peak: f64,

    /// The RMS of the finite residual pixels inside the noise region.
    pub noise: f64,
}

/// Score a restored and residual image pair. This is a pure function of its
/// inputs.
///
/// A zero or non-finite noise is an error rather than an infinite or
/// meaningless score, because no improvement can be judged from it.
pub fn score<F>(
    restored: ArrayView2<F>,
    residual: ArrayView2<F>,
    noise_region: NoiseRegion,
) -> Result<QualityAssessment, QualityError>
where
    F: Float + Send + Sync,
{
    let peak = peak(restored).ok_or(QualityError::NoSignal)?;
    let (rows, cols) = noise_region.ranges(residual.dim())?;
    let noise = rms(residual.slice(s![rows, cols]));
    if noise == 0.0 || !noise.is_finite() {
        return Err(QualityError::DegenerateNoise { noise });
    }

    Ok(QualityAssessment {
        score: peak / noise,
        peak,
        noise,
    })
}

/// The largest finite value, or `None` if there aren't any.
fn peak<F: Float + Send + Sync>(image: ArrayView2<F>) -> Option<f64> {
    image
        .axis_iter(Axis(0))
        .into_par_iter()
        .filter_map(|row| {
            row.iter()
                .copied()
                .filter(|p| p.is_finite())
                .fold(None, |acc: Option<F>, p| match acc {
                    Some(a) if a >= p => Some(a),
                    _ => Some(p),
                })
        })
        .reduce_with(|a, b| if a >= b { a } else { b })
        .and_then(|p| p.to_f64())
}

/// The RMS of the finite values. NaN if there aren't any.
fn rms<F: Float + Send + Sync>(image: ArrayView2<F>) -> f64 {
    let (sum_sq, count) = image
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|row| {
            row.iter()
                .filter_map(|p| p.to_f64())
                .filter(|p| p.is_finite())
                .fold((0.0, 0_usize), |(s, n), p| (s + p * p, n + 1))
        })
        .reduce(|| (0.0, 0), |(s1, n1), (s2, n2)| (s1 + s2, n1 + n2));
    if count == 0 {
        f64::NAN
    } else {
        (sum_sq / count as f64).sqrt()
    }
}
