// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Images exchanged with external imagers.
//!
//! All numbers are little endian. The layout is 8 bytes of ASCII "SELFCALI",
//! a u32 number of rows, a u32 number of columns, then row-major f64 pixels.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::prelude::*;
use thiserror::Error;

const IMAGE_MAGIC: &[u8; 8] = b"SELFCALI";

/// The restored and residual images of one imaging invocation. These aren't
/// kept after the round's score has been computed.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePair {
    pub restored: Array2<f64>,
    pub residual: Array2<f64>,
}

pub fn read_image(file: &Path) -> Result<Array2<f64>, ImageReadError> {
    let mut bin_file = BufReader::new(File::open(file)?);
    let mut magic = [0; 8];
    bin_file.read_exact(&mut magic)?;
    if &magic != IMAGE_MAGIC {
        return Err(ImageReadError::BadMagic {
            file: file.display().to_string(),
            got: String::from_utf8_lossy(&magic).to_string(),
        });
    }

    let num_rows = bin_file.read_u32::<LittleEndian>()? as usize;
    let num_cols = bin_file.read_u32::<LittleEndian>()? as usize;
    let mut pixels = vec![0.0; num_rows * num_cols];
    bin_file.read_f64_into::<LittleEndian>(&mut pixels)?;

    let mut trailing = vec![];
    bin_file.read_to_end(&mut trailing)?;
    if !trailing.is_empty() {
        return Err(ImageReadError::BadShape {
            file: file.display().to_string(),
            expected: num_rows * num_cols,
            actual: num_rows * num_cols + trailing.len() / 8,
        });
    }

    Array2::from_shape_vec((num_rows, num_cols), pixels).map_err(|_| ImageReadError::BadShape {
        file: file.display().to_string(),
        expected: num_rows * num_cols,
        actual: num_rows * num_cols,
    })
}

pub fn write_image(image: ArrayView2<f64>, file: &Path) -> Result<(), std::io::Error> {
    let mut bin_file = BufWriter::new(File::create(file)?);
    bin_file.write_all(IMAGE_MAGIC)?;
    let (num_rows, num_cols) = image.dim();
    bin_file.write_u32::<LittleEndian>(num_rows as u32)?;
    bin_file.write_u32::<LittleEndian>(num_cols as u32)?;
    let mut buf = [0; 8];
    for &p in image.iter() {
        LittleEndian::write_f64(&mut buf, p);
        bin_file.write_all(&buf)?;
    }
    bin_file.flush()?;
    Ok(())
}

#[derive(Error, Debug)]
pub enum ImageReadError {
    #[error("When reading {file}, expected SELFCALI as the first 8 characters, got '{got}' instead!")]
    BadMagic { file: String, got: String },

    #[error("Based on the dimensions of {file}, expected {expected} pixels, but it had {actual} instead!")]
    BadShape {
        file: String,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
