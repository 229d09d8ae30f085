// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use super::NoiseRegion;

#[derive(Error, Debug)]
pub enum QualityError {
    #[error("The residual noise is {noise}; can't judge the image quality")]
    DegenerateNoise { noise: f64 },

    #[error("The restored image doesn't have any finite pixels")]
    NoSignal,

    #[error("The noise region ({region}) doesn't fit in a {num_rows}x{num_cols} residual image")]
    BadNoiseRegion {
        region: NoiseRegion,
        num_rows: usize,
        num_cols: usize,
    },
}

#[derive(Error, Debug)]
pub enum QualityRecordError {
    #[error("Line {line_num} of quality record {file} isn't '<dataset>\\t<score>\\t<time>': '{line}'")]
    BadLine {
        file: String,
        line_num: usize,
        line: String,
    },

    #[error("Dataset name {0:?} can't be recorded; it's empty or has tabs or line breaks")]
    BadName(String),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
