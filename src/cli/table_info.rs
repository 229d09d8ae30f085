// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use clap::Parser;
use itertools::Itertools;

use super::common::InfoPrinter;
use crate::{calibration::CalibrationTable, SelfcalError};

#[derive(Parser, Debug, Default)]
pub(super) struct TableInfoArgs {
    /// The calibration table to inspect.
    #[clap(name = "TABLE", parse(from_os_str))]
    file: PathBuf,

    /// Also print every antenna's gains.
    #[clap(long)]
    gains: bool,
}

impl TableInfoArgs {
    pub(super) fn run(self) -> Result<(), SelfcalError> {
        let table = CalibrationTable::read(&self.file)?;

        let mut printer = InfoPrinter::new(format!("Calibration table {}", self.file.display()).into());
        printer.push_block(vec![
            format!("ID: {}", table.id).into(),
            format!("Mode: {}", table.mode).into(),
            format!("Solution interval: {}", table.solint).into(),
            format!("Reference antenna: {}", table.ref_antenna).into(),
        ]);
        let flagged = if table.flagged_antennas.is_empty() {
            "none".to_string()
        } else {
            table.flagged_antennas.iter().join(", ")
        };
        printer.push_block(vec![
            format!(
                "{} antennas, {} polarisations",
                table.num_antennas(),
                table.num_polarisations()
            )
            .into(),
            format!("Flagged antennas: {flagged}").into(),
        ]);
        if self.gains {
            let lines = table
                .gains
                .outer_iter()
                .enumerate()
                .map(|(i_ant, gains)| {
                    let gains = gains
                        .iter()
                        .map(|g| format!("{:.4}∠{:.2}°", g.norm(), g.arg().to_degrees()))
                        .join("  ");
                    let flag = if table.is_flagged(i_ant) { " (flagged)" } else { "" };
                    format!("{i_ant:>4}: {gains}{flag}").into()
                })
                .collect();
            printer.push_block(lines);
        }
        printer.display();

        Ok(())
    }
}
