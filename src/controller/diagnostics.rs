// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-round observations for logging and external plotting. Nothing written
//! here is ever read back by the controller.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use log::{info, warn};
use serde::Serialize;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RoundDecision {
    /// The score everything else in the stage is compared against.
    Baseline,
    Committed,
    RolledBack,
    /// The solver reported insufficient data and the round was skipped.
    Skipped,
    /// The round couldn't produce a score.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundDiagnostic {
    pub stage: String,
    pub round: usize,
    pub table: Option<String>,
    pub solint: Option<String>,
    pub score: Option<f64>,
    pub peak: Option<f64>,
    /// The estimated noise level of the residual image.
    pub noise: Option<f64>,
    pub decision: RoundDecision,
}

pub trait DiagnosticSink {
    fn emit(&mut self, diagnostic: &RoundDiagnostic);
}

/// Emit to every sink.
impl DiagnosticSink for Vec<Box<dyn DiagnosticSink>> {
    fn emit(&mut self, diagnostic: &RoundDiagnostic) {
        for sink in self.iter_mut() {
            sink.emit(diagnostic);
        }
    }
}

/// Write diagnostics as log lines.
#[derive(Debug, Default)]
pub struct LogDiagnostics;

impl DiagnosticSink for LogDiagnostics {
    fn emit(&mut self, d: &RoundDiagnostic) {
        let table = d.table.as_deref().unwrap_or("-");
        let solint = d.solint.as_deref().unwrap_or("-");
        match (d.score, d.noise) {
            (Some(score), Some(noise)) => info!(
                "[{} round {}] table {table}, solint {solint}: score {score:.3}, noise {noise:.3e} ({})",
                d.stage, d.round, d.decision
            ),
            _ => info!(
                "[{} round {}] table {table}, solint {solint}: no score ({})",
                d.stage, d.round, d.decision
            ),
        }
    }
}

/// Write each diagnostic as a JSON object on its own line.
pub struct JsonLinesDiagnostics<W: Write> {
    writer: W,
}

impl JsonLinesDiagnostics<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(file: P) -> Result<Self, std::io::Error> {
        Ok(JsonLinesDiagnostics::new(BufWriter::new(File::create(file)?)))
    }
}

impl<W: Write> JsonLinesDiagnostics<W> {
    pub fn new(writer: W) -> JsonLinesDiagnostics<W> {
        JsonLinesDiagnostics { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write(&mut self, d: &RoundDiagnostic) -> Result<(), std::io::Error> {
        serde_json::to_writer(&mut self.writer, d)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

impl<W: Write> DiagnosticSink for JsonLinesDiagnostics<W> {
    fn emit(&mut self, d: &RoundDiagnostic) {
        if let Err(e) = self.write(d) {
            warn!("Couldn't write a diagnostic for {} round {}: {e}", d.stage, d.round);
        }
    }
}
