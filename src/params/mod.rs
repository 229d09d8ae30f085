// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parameters for a self-calibration run.
//!
//! The code here "mirrors" the `cli` module; `cli` holds unparsed, user-facing
//! arguments, whereas these parameters have been validated and are ready to be
//! used directly.

use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

use crate::{
    backend::{CommandFlagger, CommandImager, CommandSolver},
    calibration::TableWriteError,
    checkpoint::{CheckpointError, CheckpointStore, DirCheckpointStore, MemoryCheckpointStore},
    controller::{DiagnosticSink, JsonLinesDiagnostics, LogDiagnostics},
    dataset::Dataset,
    quality::NoiseRegion,
    round::RoundExecutor,
    stage::{StageChain, StageChainError, StageChainReport},
};

pub(crate) struct SelfcalParams {
    pub(crate) dataset: Dataset,
    pub(crate) chain: StageChain,
    pub(crate) solver: CommandSolver,
    pub(crate) imager: CommandImager,
    pub(crate) flagger: Option<CommandFlagger>,

    /// Where requests for the external programs and their outputs go.
    pub(crate) work_dir: PathBuf,

    /// Where checkpoints are persisted. If this is `None`, checkpoints are only
    /// kept in memory.
    pub(crate) checkpoint_dir: Option<PathBuf>,

    pub(crate) noise_region: NoiseRegion,

    /// Each stage's final table is written here.
    pub(crate) output_dir: PathBuf,

    /// Round diagnostics are also written here as JSON lines.
    pub(crate) diagnostics_file: Option<PathBuf>,
}

impl SelfcalParams {
    /// Run the whole chain of stages, then write out each stage's final table.
    pub(crate) fn run(&mut self) -> Result<StageChainReport, SelfcalRunError> {
        let Self {
            dataset,
            chain,
            solver,
            imager,
            flagger,
            work_dir,
            checkpoint_dir,
            noise_region,
            output_dir,
            diagnostics_file,
        } = self;

        std::fs::create_dir_all(&work_dir)?;
        std::fs::create_dir_all(&output_dir)?;

        let mut dir_store;
        let mut memory_store;
        let store: &mut dyn CheckpointStore = match checkpoint_dir {
            Some(dir) => {
                dir_store = DirCheckpointStore::open(dir.as_path())?;
                info!("Keeping checkpoints in {}", dir_store.dir().display());
                &mut dir_store
            }
            None => {
                memory_store = MemoryCheckpointStore::new();
                &mut memory_store
            }
        };

        let mut diagnostics: Vec<Box<dyn DiagnosticSink>> = vec![Box::new(LogDiagnostics)];
        if let Some(file) = diagnostics_file {
            let sink = JsonLinesDiagnostics::create(file.as_path()).map_err(|e| {
                SelfcalRunError::Diagnostics {
                    file: file.display().to_string(),
                    source: e,
                }
            })?;
            diagnostics.push(Box::new(sink));
        }

        let mut executor = RoundExecutor::new(solver, imager, store, *noise_region);
        if let Some(flagger) = flagger.as_mut() {
            executor = executor.with_flagger(flagger);
        }
        let report = chain.run(dataset, &mut executor, &mut diagnostics)?;

        for stage in &report.stages {
            if let Some(table) = stage.final_table() {
                let file = table_file(output_dir, &table.id.to_string());
                table.write(&file)?;
                info!(
                    "Wrote the final table of stage '{}' to {}",
                    stage.stage,
                    file.display()
                );
            }
        }
        if let Some(table) = report.final_table.as_ref() {
            let file = table_file(output_dir, "final");
            table.write(&file)?;
            debug!("Wrote {} as {}", table.id, file.display());
        }

        Ok(report)
    }
}

fn table_file(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}.cal"))
}

#[derive(Error, Debug)]
pub(crate) enum SelfcalRunError {
    #[error(transparent)]
    Chain(#[from] StageChainError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    TableWrite(#[from] TableWriteError),

    #[error("Couldn't create diagnostics file {file}: {source}")]
    Diagnostics {
        file: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
