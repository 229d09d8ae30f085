// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Backends that run other programs.
//!
//! Every call writes a JSON request file into a work directory and runs
//! `<program> [args...] <request.json>`. The request names every file the
//! program should read or write. Flags are exchanged as one byte per
//! visibility (0 unflagged, 1 flagged) ordered timestep, channel, baseline.

use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::{Path, PathBuf},
    process::{Command, Output},
};

use itertools::Itertools;
use log::{debug, trace};
use ndarray::prelude::*;
use scopeguard::defer;
use serde::{Deserialize, Serialize};

use super::{
    read_image, BackendError, CalibrationSolver, CombineAxis, Flagger, ImagePair, ImagingBackend,
    ImagingParams, Interpolation, SolveError, SolveRequest, SolverParams,
};
use crate::{
    calibration::{CalMode, CalibrationTable},
    constants::INSUFFICIENT_DATA_EXIT_CODE,
    dataset::Dataset,
};

/// A program and the arguments that precede the request file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCommand {
    pub program: PathBuf,

    #[serde(default)]
    pub args: Vec<String>,
}

impl ExternalCommand {
    pub fn new<P: Into<PathBuf>>(program: P, args: Vec<String>) -> ExternalCommand {
        ExternalCommand {
            program: program.into(),
            args,
        }
    }

    fn name(&self) -> String {
        self.program.display().to_string()
    }

    /// Run the program on a request. A non-zero exit status is not an error
    /// here; that's for the caller to interpret.
    fn run(&self, request_file: &Path) -> Result<Output, BackendError> {
        debug!(
            "Running {} {} {}",
            self.name(),
            self.args.iter().join(" "),
            request_file.display()
        );
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(request_file)
            .output()
            .map_err(|source| BackendError::Spawn {
                program: self.name(),
                source,
            })?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            trace!("{}: {line}", self.name());
        }
        Ok(output)
    }

    fn check(&self, output: &Output) -> Result<(), BackendError> {
        if output.status.success() {
            Ok(())
        } else {
            Err(BackendError::NonZeroExit {
                program: self.name(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

fn write_request<T: Serialize>(file: &Path, request: &T) -> Result<(), BackendError> {
    let mut f = BufWriter::new(File::create(file)?);
    serde_json::to_writer_pretty(&mut f, request)?;
    f.flush()?;
    Ok(())
}

fn flags_file(work_dir: &Path, dataset: &Dataset) -> PathBuf {
    work_dir.join(format!("{}.flags", dataset.name()))
}

fn write_flags(file: &Path, flags: ArrayView3<bool>) -> Result<(), BackendError> {
    let mut f = BufWriter::new(File::create(file)?);
    let bytes = flags.iter().map(|&f| u8::from(f)).collect::<Vec<_>>();
    f.write_all(&bytes)?;
    f.flush()?;
    Ok(())
}

fn read_flags(file: &Path, dim: (usize, usize, usize)) -> Result<Array3<bool>, BackendError> {
    let mut bytes = vec![];
    File::open(file)?.read_to_end(&mut bytes)?;
    let expected = dim.0 * dim.1 * dim.2;
    if bytes.len() != expected {
        return Err(BackendError::Failure(format!(
            "Expected {expected} flags in {}, but got {}",
            file.display(),
            bytes.len()
        )));
    }
    Array3::from_shape_vec(dim, bytes.into_iter().map(|b| b != 0).collect())
        .map_err(|e| BackendError::Failure(e.to_string()))
}

/// Write tables into the work directory so a program can read them, returning
/// their paths in the same order.
fn write_tables<'a, I>(work_dir: &Path, tables: I) -> Result<Vec<PathBuf>, BackendError>
where
    I: IntoIterator<Item = &'a CalibrationTable>,
{
    tables
        .into_iter()
        .map(|t| -> Result<PathBuf, BackendError> {
            let file = work_dir.join(format!("{}.cal", t.id));
            t.write(&file)?;
            Ok(file)
        })
        .collect()
}

/// Common to every request.
#[derive(Serialize)]
struct DatasetFields<'a> {
    dataset: &'a str,
    path: Option<&'a Path>,
    flags: PathBuf,
    flag_shape: [usize; 3],
}

impl<'a> DatasetFields<'a> {
    fn new(work_dir: &Path, dataset: &'a Dataset) -> Result<DatasetFields<'a>, BackendError> {
        let flags = flags_file(work_dir, dataset);
        write_flags(&flags, dataset.flags())?;
        let shape = dataset.shape();
        Ok(DatasetFields {
            dataset: dataset.name(),
            path: dataset.path(),
            flags,
            flag_shape: [shape.num_timesteps, shape.num_channels, shape.num_baselines],
        })
    }
}

#[derive(Serialize)]
struct SolveRequestFile<'a> {
    #[serde(flatten)]
    dataset: DatasetFields<'a>,
    output: PathBuf,
    stage: &'a str,
    round: usize,
    solint: String,
    calmode: CalMode,
    refant: usize,
    minblperant: u32,
    minsnr: f64,
    combine: &'a [CombineAxis],
    spwmap: &'a [usize],
    gaintable: Vec<PathBuf>,
}

#[derive(Serialize)]
struct ApplyRequestFile<'a> {
    #[serde(flatten)]
    dataset: DatasetFields<'a>,
    gaintable: Vec<PathBuf>,
    spwmap: &'a [usize],
    interp: Interpolation,
}

#[derive(Serialize)]
struct ImageRequestFile<'a> {
    #[serde(flatten)]
    dataset: DatasetFields<'a>,
    #[serde(flatten)]
    params: &'a ImagingParams,
    gaintable: Vec<PathBuf>,
    restored: PathBuf,
    residual: PathBuf,
}

#[derive(Serialize)]
struct FlagRequestFile<'a> {
    #[serde(flatten)]
    dataset: DatasetFields<'a>,
    gaintable: Vec<PathBuf>,
    output: PathBuf,
}

/// Solve and apply with external programs. A solve program exiting with
/// status 2 reports insufficient data.
pub struct CommandSolver {
    solve: ExternalCommand,
    apply: ExternalCommand,
    work_dir: PathBuf,
}

impl CommandSolver {
    pub fn new(solve: ExternalCommand, apply: ExternalCommand, work_dir: PathBuf) -> CommandSolver {
        CommandSolver {
            solve,
            apply,
            work_dir,
        }
    }
}

impl CalibrationSolver for CommandSolver {
    fn solve(
        &mut self,
        dataset: &Dataset,
        request: &SolveRequest,
    ) -> Result<CalibrationTable, SolveError> {
        let request_file = self.work_dir.join(format!("solve_{}.json", request.id));
        let output = self.work_dir.join(format!("{}.cal", request.id));
        write_request(
            &request_file,
            &SolveRequestFile {
                dataset: DatasetFields::new(&self.work_dir, dataset)?,
                output: output.clone(),
                stage: &request.id.stage,
                round: request.id.round,
                solint: request.solint.to_string(),
                calmode: request.mode,
                refant: request.params.ref_antenna,
                minblperant: request.params.min_baselines_per_antenna,
                minsnr: request.params.min_snr,
                combine: &request.params.combine,
                spwmap: &request.params.spw_map,
                gaintable: write_tables(&self.work_dir, request.pre_applied())?,
            },
        )?;
        defer! {
            let _ = std::fs::remove_file(&request_file);
        }

        let result = self.solve.run(&request_file)?;
        if result.status.code() == Some(INSUFFICIENT_DATA_EXIT_CODE) {
            return Err(SolveError::InsufficientData {
                solint: request.solint,
                reason: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        self.solve.check(&result)?;

        let mut table = CalibrationTable::read(&output).map_err(BackendError::from)?;
        if table.id != *request.id {
            debug!(
                "Solver labelled its table {}; relabelling it {}",
                table.id, request.id
            );
            table.id = request.id.clone();
        }
        table.mode = request.mode;
        table.enforce_mode();
        Ok(table)
    }

    fn apply(
        &mut self,
        dataset: &mut Dataset,
        tables: &[CalibrationTable],
        params: &SolverParams,
    ) -> Result<(), BackendError> {
        let request_file = self
            .work_dir
            .join(format!("apply_{}.json", dataset.name()));
        write_request(
            &request_file,
            &ApplyRequestFile {
                dataset: DatasetFields::new(&self.work_dir, dataset)?,
                gaintable: write_tables(&self.work_dir, tables)?,
                spwmap: &params.spw_map,
                interp: params.interpolation,
            },
        )?;
        defer! {
            let _ = std::fs::remove_file(&request_file);
        }

        let result = self.apply.run(&request_file)?;
        self.apply.check(&result)
    }
}

/// Image with an external program, which must write the restored and
/// residual images in the format of [`super::write_image`].
pub struct CommandImager {
    image: ExternalCommand,
    work_dir: PathBuf,
}

impl CommandImager {
    pub fn new(image: ExternalCommand, work_dir: PathBuf) -> CommandImager {
        CommandImager { image, work_dir }
    }
}

impl ImagingBackend for CommandImager {
    fn image(
        &mut self,
        dataset: &Dataset,
        params: &ImagingParams,
        label: &str,
    ) -> Result<ImagePair, BackendError> {
        let request_file = self.work_dir.join(format!("image_{label}.json"));
        let restored = self.work_dir.join(format!("{label}.image"));
        let residual = self.work_dir.join(format!("{label}.residual"));
        write_request(
            &request_file,
            &ImageRequestFile {
                dataset: DatasetFields::new(&self.work_dir, dataset)?,
                params,
                gaintable: write_tables(&self.work_dir, dataset.applied_tables())?,
                restored: restored.clone(),
                residual: residual.clone(),
            },
        )?;
        defer! {
            let _ = std::fs::remove_file(&request_file);
        }

        let result = self.image.run(&request_file)?;
        self.image.check(&result)?;
        Ok(ImagePair {
            restored: read_image(&restored)?,
            residual: read_image(&residual)?,
        })
    }
}

/// Flag with an external program, which must write the complete, updated
/// flags to the request's output file.
pub struct CommandFlagger {
    flag: ExternalCommand,
    work_dir: PathBuf,
}

impl CommandFlagger {
    pub fn new(flag: ExternalCommand, work_dir: PathBuf) -> CommandFlagger {
        CommandFlagger { flag, work_dir }
    }
}

impl Flagger for CommandFlagger {
    fn flag(&mut self, dataset: &mut Dataset) -> Result<usize, BackendError> {
        let request_file = self
            .work_dir
            .join(format!("flag_{}.json", dataset.name()));
        let output = self
            .work_dir
            .join(format!("{}.newflags", dataset.name()));
        write_request(
            &request_file,
            &FlagRequestFile {
                dataset: DatasetFields::new(&self.work_dir, dataset)?,
                gaintable: write_tables(&self.work_dir, dataset.applied_tables())?,
                output: output.clone(),
            },
        )?;
        defer! {
            let _ = std::fs::remove_file(&request_file);
            let _ = std::fs::remove_file(&output);
        }

        let result = self.flag.run(&request_file)?;
        self.flag.check(&result)?;

        let new_flags = read_flags(&output, dataset.flags().dim())?;
        let mut num_new = 0;
        // Flags are only ever added; a program can't unflag data.
        for (old, &new) in dataset.flags_mut().iter_mut().zip(new_flags.iter()) {
            if new && !*old {
                *old = true;
                num_new += 1;
            }
        }
        Ok(num_new)
    }
}
