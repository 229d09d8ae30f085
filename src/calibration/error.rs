// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with reading or writing calibration tables.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableReadError {
    #[error("When reading {file}, expected SELFCALT as the first 8 characters, got '{got}' instead!")]
    BadMagic { file: String, got: String },

    #[error("When reading {file}, expected {expected}, but got '{got}' instead!")]
    BadValue {
        file: String,
        expected: &'static str,
        got: String,
    },

    #[error("When reading {file}, the {what} wasn't valid UTF-8")]
    Utf8 { file: String, what: &'static str },

    #[error("Based on the dimensions of the table, expected {thing} to have {expected} elements, but it had {actual} instead!")]
    BadShape {
        /// What was it that wasn't sensible? Gains length, flag count etc.
        thing: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TableWriteError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
}
