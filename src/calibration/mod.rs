// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Calibration tables: the per-antenna, per-polarisation complex corrections
//! produced by one solve.

mod error;
pub(crate) mod io;
mod mode;

pub use error::{TableReadError, TableWriteError};
pub use mode::{CalMode, StageMode};
pub(crate) use mode::STAGE_MODES_COMMA_SEPARATED;

use std::{fmt, path::Path};

use ndarray::prelude::*;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::solint::SolutionInterval;

/// Double-precision complex number.
#[allow(non_camel_case_types)]
pub type c64 = Complex<f64>;

/// Identifies a table by the stage that produced it and the (1-indexed)
/// round within that stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId {
    pub stage: String,
    pub round: usize,
}

impl TableId {
    pub fn new<S: Into<String>>(stage: S, round: usize) -> TableId {
        TableId {
            stage: stage.into(),
            round,
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.stage, self.round)
    }
}

/// The output of a solver for one round. Tables are never mutated after they
/// have been handed to the round executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    pub id: TableId,

    /// What the solver solved for.
    pub mode: CalMode,

    /// The solution interval used.
    pub solint: SolutionInterval,

    /// The antenna whose phase was held at zero.
    pub ref_antenna: usize,

    /// Complex gains. The first dimension is antenna, the second is
    /// polarisation.
    pub gains: Array2<c64>,

    /// Antennas without a solution (e.g. they didn't meet the SNR threshold).
    /// Their gains should be ignored. Zero indexed.
    pub flagged_antennas: Vec<usize>,
}

impl CalibrationTable {
    pub fn num_antennas(&self) -> usize {
        self.gains.len_of(Axis(0))
    }

    pub fn num_polarisations(&self) -> usize {
        self.gains.len_of(Axis(1))
    }

    pub fn is_flagged(&self, antenna: usize) -> bool {
        self.flagged_antennas.contains(&antenna)
    }

    /// Force the gains to honour the table's mode: phase-only tables get unit
    /// amplitudes and amplitude-only tables get zero phases. Non-finite gains
    /// are left alone; they are ignored when composing anyway.
    pub fn enforce_mode(&mut self) {
        match self.mode {
            CalMode::Phase => self.gains.mapv_inplace(|g| {
                if g.is_finite() && g.norm() > 0.0 {
                    g / g.norm()
                } else {
                    g
                }
            }),
            CalMode::Amplitude => self.gains.mapv_inplace(|g| {
                if g.is_finite() {
                    c64::new(g.norm(), 0.0)
                } else {
                    g
                }
            }),
            CalMode::AmplitudePhase => (),
        }
    }

    /// Write this table to a file.
    pub fn write<P: AsRef<Path>>(&self, file: P) -> Result<(), TableWriteError> {
        io::write(self, file.as_ref())
    }

    /// Read a table from a file.
    pub fn read<P: AsRef<Path>>(file: P) -> Result<CalibrationTable, TableReadError> {
        io::read(file.as_ref())
    }
}

/// Multiply a sequence of tables together into the net correction, in
/// application order. Flagged antennas and non-finite gains don't contribute
/// (they act as unity). Tables with a different shape to the first table are
/// skipped. `None` is returned if there are no tables.
pub fn compose_gains<'a, I>(tables: I) -> Option<Array2<c64>>
where
    I: IntoIterator<Item = &'a CalibrationTable>,
{
    let mut net: Option<Array2<c64>> = None;
    for table in tables {
        let acc =
            net.get_or_insert_with(|| Array2::from_elem(table.gains.dim(), c64::new(1.0, 0.0)));
        if acc.dim() != table.gains.dim() {
            log::debug!(
                "Not composing table {} with shape {:?}; expected {:?}",
                table.id,
                table.gains.dim(),
                acc.dim()
            );
            continue;
        }
        for (i_ant, (mut net_row, gain_row)) in acc
            .outer_iter_mut()
            .zip(table.gains.outer_iter())
            .enumerate()
        {
            if table.is_flagged(i_ant) {
                continue;
            }
            net_row.zip_mut_with(&gain_row, |n, &g| {
                if g.is_finite() {
                    *n *= g;
                }
            });
        }
    }
    net
}
