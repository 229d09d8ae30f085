// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to read and write calibration tables in a small binary format.
//!
//! All numbers are little endian. The layout is:
//!
//! - 8 bytes of ASCII "SELFCALT"
//! - u32 format version (currently 1)
//! - u32 length of the stage name, followed by the UTF-8 stage name
//! - u32 round index
//! - u8 calibration mode (0 = p, 1 = a, 2 = ap)
//! - u32 length of the solution interval string, followed by the string
//! - u32 reference antenna
//! - u32 number of antennas, u32 number of polarisations
//! - u32 number of flagged antennas, followed by that many u32 indices
//! - the gains, (real, imag) f64 pairs ordered antenna then polarisation

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::prelude::*;

use super::{c64, error::*, CalMode, CalibrationTable, TableId};
use crate::solint::SolutionInterval;

pub(crate) const TABLE_MAGIC: &[u8; 8] = b"SELFCALT";
const TABLE_FORMAT_VERSION: u32 = 1;

fn read_string<R: Read>(
    reader: &mut R,
    file: &str,
    what: &'static str,
) -> Result<String, TableReadError> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| TableReadError::Utf8 {
        file: file.to_string(),
        what,
    })
}

fn write_string<W: Write>(writer: &mut W, s: &str) -> Result<(), TableWriteError> {
    writer.write_u32::<LittleEndian>(s.len() as u32)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

pub(crate) fn read(file: &Path) -> Result<CalibrationTable, TableReadError> {
    let file_str = file.display().to_string();
    let mut bin_file = BufReader::new(File::open(file)?);
    let table = read_from(&mut bin_file, &file_str)?;

    // Trailing bytes mean that we've misunderstood the file.
    let mut trailing = vec![];
    bin_file.read_to_end(&mut trailing)?;
    if !trailing.is_empty() {
        return Err(TableReadError::BadShape {
            thing: "file bytes",
            expected: 0,
            actual: trailing.len(),
        });
    }

    Ok(table)
}

/// Read one table from a stream. `file_str` names the stream in errors.
pub(crate) fn read_from<R: Read>(
    bin_file: &mut R,
    file_str: &str,
) -> Result<CalibrationTable, TableReadError> {
    let file_str = file_str.to_string();
    let mut magic = [0; 8];
    bin_file.read_exact(&mut magic)?;
    if &magic != TABLE_MAGIC {
        return Err(TableReadError::BadMagic {
            file: file_str,
            got: String::from_utf8_lossy(&magic).to_string(),
        });
    }
    match bin_file.read_u32::<LittleEndian>()? {
        TABLE_FORMAT_VERSION => (),
        v => {
            return Err(TableReadError::BadValue {
                file: file_str,
                expected: "format version 1",
                got: v.to_string(),
            })
        }
    }

    let stage = read_string(bin_file, &file_str, "stage name")?;
    let round = bin_file.read_u32::<LittleEndian>()? as usize;
    let mode_byte = bin_file.read_u8()?;
    let mode = CalMode::from_byte(mode_byte).ok_or_else(|| TableReadError::BadValue {
        file: file_str.clone(),
        expected: "a calibration mode of 0, 1 or 2",
        got: mode_byte.to_string(),
    })?;
    let solint_str = read_string(bin_file, &file_str, "solution interval")?;
    let solint: SolutionInterval =
        solint_str
            .parse()
            .map_err(|_| TableReadError::BadValue {
                file: file_str.clone(),
                expected: "a solution interval",
                got: solint_str.clone(),
            })?;
    let ref_antenna = bin_file.read_u32::<LittleEndian>()? as usize;
    let num_antennas = bin_file.read_u32::<LittleEndian>()? as usize;
    let num_polarisations = bin_file.read_u32::<LittleEndian>()? as usize;
    if num_antennas > 0 && ref_antenna >= num_antennas {
        return Err(TableReadError::BadValue {
            file: file_str,
            expected: "a reference antenna within the number of antennas",
            got: ref_antenna.to_string(),
        });
    }

    let num_flagged = bin_file.read_u32::<LittleEndian>()? as usize;
    if num_flagged > num_antennas {
        return Err(TableReadError::BadShape {
            thing: "flagged antennas",
            expected: num_antennas,
            actual: num_flagged,
        });
    }
    let mut flagged_antennas = Vec::with_capacity(num_flagged);
    for _ in 0..num_flagged {
        flagged_antennas.push(bin_file.read_u32::<LittleEndian>()? as usize);
    }

    // The rest of the table is only gains.
    let mut floats = vec![0.0; num_antennas * num_polarisations * 2];
    bin_file.read_f64_into::<LittleEndian>(&mut floats)?;
    let gains = Array2::from_shape_vec(
        (num_antennas, num_polarisations),
        floats
            .chunks_exact(2)
            .map(|pair| c64::new(pair[0], pair[1]))
            .collect(),
    )
    .map_err(|_| TableReadError::BadShape {
        thing: "gains",
        expected: num_antennas * num_polarisations,
        actual: floats.len() / 2,
    })?;

    Ok(CalibrationTable {
        id: TableId { stage, round },
        mode,
        solint,
        ref_antenna,
        gains,
        flagged_antennas,
    })
}

/// Write a calibration table binary file.
pub(crate) fn write(table: &CalibrationTable, file: &Path) -> Result<(), TableWriteError> {
    let mut bin_file = BufWriter::new(File::create(file)?);
    write_to(table, &mut bin_file)?;
    bin_file.flush()?;
    Ok(())
}

/// Write one table to a stream.
pub(crate) fn write_to<W: Write>(
    table: &CalibrationTable,
    bin_file: &mut W,
) -> Result<(), TableWriteError> {
    // 2 floats, 8 bytes per float.
    let mut buf = [0; 2 * 8];

    bin_file.write_all(TABLE_MAGIC)?;
    bin_file.write_u32::<LittleEndian>(TABLE_FORMAT_VERSION)?;
    write_string(bin_file, &table.id.stage)?;
    bin_file.write_u32::<LittleEndian>(table.id.round as u32)?;
    bin_file.write_u8(table.mode.to_byte())?;
    write_string(bin_file, &table.solint.to_string())?;
    bin_file.write_u32::<LittleEndian>(table.ref_antenna as u32)?;
    let (num_antennas, num_polarisations) = table.gains.dim();
    bin_file.write_u32::<LittleEndian>(num_antennas as u32)?;
    bin_file.write_u32::<LittleEndian>(num_polarisations as u32)?;
    bin_file.write_u32::<LittleEndian>(table.flagged_antennas.len() as u32)?;
    for &a in &table.flagged_antennas {
        bin_file.write_u32::<LittleEndian>(a as u32)?;
    }

    for g in table.gains.iter() {
        LittleEndian::write_f64_into(&[g.re, g.im], &mut buf);
        bin_file.write_all(&buf)?;
    }
    Ok(())
}
