// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The `run` subcommand: build a chain of stages from user arguments and run
//! it.


use std::{borrow::Cow, path::PathBuf, str::FromStr};

use clap::Parser;
use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::common::{
    display_warnings, parse_external_command, parse_noise_box, InfoPrinter, Warn, ARG_FILE_HELP,
    NOISE_BOX_HELP,
};
use crate::{
    backend::{
        CombineAxis, CommandFlagger, CommandImager, CommandSolver, ImagingParams, Interpolation,
        SolverParams, Weighting, COMBINE_AXES_COMMA_SEPARATED, INTERPOLATIONS_COMMA_SEPARATED,
        WEIGHTINGS_COMMA_SEPARATED,
    },
    calibration::{CalibrationTable, StageMode, STAGE_MODES_COMMA_SEPARATED},
    constants::*,
    controller::{InsufficientDataPolicy, INSUFFICIENT_DATA_POLICIES_COMMA_SEPARATED},
    dataset::{Dataset, DatasetShape},
    params::SelfcalParams,
    quality::QualityRecord,
    solint::SolutionIntervalSequence,
    stage::{
        parse_override, OverrideValue, RoundOverrides, RoundParameter, StageChain, StageConfig,
        ROUND_PARAMETERS_COMMA_SEPARATED,
    },
    SelfcalError,
};

lazy_static::lazy_static! {
    static ref STAGES_HELP: String =
        format!("The stages to run, in order. Each is a mode, optionally preceded by a name (e.g. 'p1=phase'). Modes: {}. Default: phase", *STAGE_MODES_COMMA_SEPARATED);

    static ref SOLINTS_HELP: String =
        format!("Comma-separated solution intervals, coarse to fine, e.g. 'inf,30s,10s'. Give one sequence for all stages or one per stage. Default: {}", DEFAULT_SOLINTS.join(","));

    static ref OVERRIDES_HELP: String =
        format!("Per-round parameter overrides, one value per solution interval, e.g. 'min_snr=5,4,3'. Prefix with a stage name and ':' to override only that stage. Values of 'combine' are separated by ';'. Parameters: {}", *ROUND_PARAMETERS_COMMA_SEPARATED);

    static ref INSUFFICIENT_DATA_HELP: String =
        format!("What to do when the solver reports insufficient data. Options: {}. Default: {}", *INSUFFICIENT_DATA_POLICIES_COMMA_SEPARATED, InsufficientDataPolicy::default());

    static ref COMBINE_HELP: String =
        format!("Data axes to combine when solving. Options: {}", *COMBINE_AXES_COMMA_SEPARATED);

    static ref INTERPOLATION_HELP: String =
        format!("How solutions are interpolated when applied. Options: {}. Default: {}", *INTERPOLATIONS_COMMA_SEPARATED, Interpolation::Linear);

    static ref WEIGHTING_HELP: String =
        format!("The visibility weighting used when imaging. Options: {}. Default: {}", *WEIGHTINGS_COMMA_SEPARATED, Weighting::Briggs);
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct RunArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    /// Path to the visibilities. This is handed to the external programs
    /// untouched.
    #[clap(short, long, help_heading = "INPUT DATA")]
    pub(super) data: Option<PathBuf>,

    /// A name for the dataset, used in the quality record and for files in the
    /// work directory. Default: the file stem of --data.
    #[clap(long, help_heading = "INPUT DATA")]
    pub(super) name: Option<String>,

    /// The dimensions of the dataset's flags.
    #[clap(
        long,
        number_of_values = 3,
        value_names = &["TIMESTEPS", "CHANNELS", "BASELINES"],
        help_heading = "INPUT DATA"
    )]
    pub(super) shape: Option<Vec<usize>>,

    /// Calibration tables that have already been applied to the data, in
    /// application order.
    #[clap(long, multiple_values(true), help_heading = "INPUT DATA")]
    pub(super) pre_applied: Option<Vec<PathBuf>>,

    #[clap(long, multiple_values(true), help = STAGES_HELP.as_str(), help_heading = "STAGES")]
    pub(super) stages: Option<Vec<String>>,

    #[clap(long, multiple_values(true), help = SOLINTS_HELP.as_str(), help_heading = "STAGES")]
    pub(super) solints: Option<Vec<String>>,

    #[clap(
        long = "override",
        multiple_values(true),
        help = OVERRIDES_HELP.as_str(),
        help_heading = "STAGES"
    )]
    pub(super) overrides: Option<Vec<String>>,

    /// A calibration table for the first stage to inherit. Required if the
    /// first stage solves for amplitudes.
    #[clap(long, help_heading = "STAGES")]
    pub(super) initial_table: Option<PathBuf>,

    /// Run the flagging command after every apply.
    #[clap(long, help_heading = "STAGES")]
    #[serde(default)]
    pub(super) flag: bool,

    #[clap(long, help = INSUFFICIENT_DATA_HELP.as_str(), help_heading = "STAGES")]
    pub(super) insufficient_data: Option<String>,

    /// The antenna whose phase is held at zero. Default: 0
    #[clap(long, help_heading = "SOLVER")]
    pub(super) ref_antenna: Option<usize>,

    /// Antennas in fewer unflagged baselines than this aren't solved for.
    /// Default: 4
    #[clap(long = "minblperant", help_heading = "SOLVER")]
    pub(super) min_baselines_per_antenna: Option<u32>,

    /// Solutions with a lower signal-to-noise ratio than this are flagged.
    /// Default: 3
    #[clap(long, help_heading = "SOLVER")]
    pub(super) min_snr: Option<f64>,

    #[clap(long, multiple_values(true), help = COMBINE_HELP.as_str(), help_heading = "SOLVER")]
    pub(super) combine: Option<Vec<String>>,

    /// Map spectral windows onto the windows whose solutions they use.
    #[clap(long, multiple_values(true), help_heading = "SOLVER")]
    pub(super) spw_map: Option<Vec<usize>>,

    #[clap(long, help = INTERPOLATION_HELP.as_str(), help_heading = "SOLVER")]
    pub(super) interpolation: Option<String>,

    /// The image size in pixels. One number for a square image. Default: 1024
    #[clap(long, min_values = 1, max_values = 2, help_heading = "IMAGING")]
    pub(super) imsize: Option<Vec<usize>>,

    /// The angular size of a pixel, handed to the imager untouched. Default:
    /// 1arcsec
    #[clap(long, help_heading = "IMAGING")]
    pub(super) cell: Option<String>,

    #[clap(long, help = WEIGHTING_HELP.as_str(), help_heading = "IMAGING")]
    pub(super) weighting: Option<String>,

    /// The Briggs robustness, between -2 and 2. Default: 0.5
    #[clap(long, allow_hyphen_values = true, help_heading = "IMAGING")]
    pub(super) robust: Option<f64>,

    /// The maximum number of deconvolution iterations. Default: 1000
    #[clap(long, help_heading = "IMAGING")]
    pub(super) niter: Option<u32>,

    /// Stop deconvolving at this residual flux density [Jy]. Default: 0
    #[clap(long, help_heading = "IMAGING")]
    pub(super) threshold: Option<f64>,

    #[clap(long, multiple_values(true), help = NOISE_BOX_HELP.as_str(), help_heading = "IMAGING")]
    pub(super) noise_box: Option<Vec<usize>>,

    /// The program (and leading arguments) that solves for a calibration
    /// table.
    #[clap(long, help_heading = "EXTERNAL PROGRAMS")]
    pub(super) solve_command: Option<String>,

    /// The program (and leading arguments) that applies calibration tables.
    #[clap(long, help_heading = "EXTERNAL PROGRAMS")]
    pub(super) apply_command: Option<String>,

    /// The program (and leading arguments) that images the data.
    #[clap(long, help_heading = "EXTERNAL PROGRAMS")]
    pub(super) image_command: Option<String>,

    /// The program (and leading arguments) that flags the data. Only used with
    /// --flag.
    #[clap(long, help_heading = "EXTERNAL PROGRAMS")]
    pub(super) flag_command: Option<String>,

    /// Where requests for the external programs are written. Default:
    /// <OUTPUT_DIR>/work
    #[clap(long, help_heading = "EXTERNAL PROGRAMS")]
    pub(super) work_dir: Option<PathBuf>,

    /// Where the final tables are written. Default: the current directory
    #[clap(short, long, help_heading = "OUTPUT FILES")]
    pub(super) output_dir: Option<PathBuf>,

    /// Persist checkpoints in this directory. If not given, checkpoints are
    /// only kept in memory.
    #[clap(long, help_heading = "OUTPUT FILES")]
    pub(super) checkpoint_dir: Option<PathBuf>,

    /// The quality record to read baselines from and append scores to.
    /// Default: <OUTPUT_DIR>/selfcal_quality.tsv
    #[clap(long, help_heading = "OUTPUT FILES")]
    pub(super) quality_record: Option<PathBuf>,

    /// Don't use a quality record.
    #[clap(long, help_heading = "OUTPUT FILES")]
    #[serde(default)]
    pub(super) no_quality_record: bool,

    /// Also write round diagnostics to this file, one JSON object per line.
    #[clap(long, help_heading = "OUTPUT FILES")]
    pub(super) diagnostics: Option<PathBuf>,
}

impl RunArgs {
    /// Both command-line and file arguments overlap in terms of what is
    /// available; this function consolidates everything that was specified into
    /// a single struct. Where applicable, it will prefer CLI parameters over
    /// those in the file.
    ///
    /// This function should only ever merge arguments, and not try to make
    /// sense of them.
    pub(super) fn merge(self) -> Result<RunArgs, SelfcalError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            // Read in the file arguments. Ensure all of the file args are
            // accounted for by pattern matching.
            let RunArgs {
                args_file: _,
                data,
                name,
                shape,
                pre_applied,
                stages,
                solints,
                overrides,
                initial_table,
                flag,
                insufficient_data,
                ref_antenna,
                min_baselines_per_antenna,
                min_snr,
                combine,
                spw_map,
                interpolation,
                imsize,
                cell,
                weighting,
                robust,
                niter,
                threshold,
                noise_box,
                solve_command,
                apply_command,
                image_command,
                flag_command,
                work_dir,
                output_dir,
                checkpoint_dir,
                quality_record,
                no_quality_record,
                diagnostics,
            } = unpack_arg_file!(arg_file);

            // Merge all the arguments, preferring the CLI args when available.
            Ok(RunArgs {
                args_file: None,
                data: cli_args.data.or(data),
                name: cli_args.name.or(name),
                shape: cli_args.shape.or(shape),
                pre_applied: cli_args.pre_applied.or(pre_applied),
                stages: cli_args.stages.or(stages),
                solints: cli_args.solints.or(solints),
                overrides: cli_args.overrides.or(overrides),
                initial_table: cli_args.initial_table.or(initial_table),
                flag: cli_args.flag || flag,
                insufficient_data: cli_args.insufficient_data.or(insufficient_data),
                ref_antenna: cli_args.ref_antenna.or(ref_antenna),
                min_baselines_per_antenna: cli_args
                    .min_baselines_per_antenna
                    .or(min_baselines_per_antenna),
                min_snr: cli_args.min_snr.or(min_snr),
                combine: cli_args.combine.or(combine),
                spw_map: cli_args.spw_map.or(spw_map),
                interpolation: cli_args.interpolation.or(interpolation),
                imsize: cli_args.imsize.or(imsize),
                cell: cli_args.cell.or(cell),
                weighting: cli_args.weighting.or(weighting),
                robust: cli_args.robust.or(robust),
                niter: cli_args.niter.or(niter),
                threshold: cli_args.threshold.or(threshold),
                noise_box: cli_args.noise_box.or(noise_box),
                solve_command: cli_args.solve_command.or(solve_command),
                apply_command: cli_args.apply_command.or(apply_command),
                image_command: cli_args.image_command.or(image_command),
                flag_command: cli_args.flag_command.or(flag_command),
                work_dir: cli_args.work_dir.or(work_dir),
                output_dir: cli_args.output_dir.or(output_dir),
                checkpoint_dir: cli_args.checkpoint_dir.or(checkpoint_dir),
                quality_record: cli_args.quality_record.or(quality_record),
                no_quality_record: cli_args.no_quality_record || no_quality_record,
                diagnostics: cli_args.diagnostics.or(diagnostics),
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(super) fn parse(self) -> Result<SelfcalParams, SelfcalError> {
        debug!("{:#?}", self);

        let Self {
            args_file: _,
            data,
            name,
            shape,
            pre_applied,
            stages,
            solints,
            overrides,
            initial_table,
            flag,
            insufficient_data,
            ref_antenna,
            min_baselines_per_antenna,
            min_snr,
            combine,
            spw_map,
            interpolation,
            imsize,
            cell,
            weighting,
            robust,
            niter,
            threshold,
            noise_box,
            solve_command,
            apply_command,
            image_command,
            flag_command,
            work_dir,
            output_dir,
            checkpoint_dir,
            quality_record,
            no_quality_record,
            diagnostics,
        } = self;

        // The dataset.
        let shape = match shape.as_deref() {
            Some(&[t, c, b]) if t > 0 && c > 0 && b > 0 => DatasetShape {
                num_timesteps: t,
                num_channels: c,
                num_baselines: b,
            },
            Some(other) => return Err(RunArgsError::BadShape(other.to_vec()).into()),
            None => return Err(RunArgsError::NoShape.into()),
        };
        let name = match name {
            Some(n) => n,
            None => data
                .as_ref()
                .and_then(|d| d.file_stem())
                .map(|s| s.to_string_lossy().to_string())
                .ok_or(RunArgsError::NoName)?,
        };
        // The name is a field of the tab-separated quality record.
        if name.trim().is_empty() || name.contains(['\t', '\n', '\r']) {
            return Err(RunArgsError::BadName(name).into());
        }
        let imaging_params =
            parse_imaging_params(imsize, cell, weighting, robust, niter, threshold)?;
        let mut dataset = Dataset::new(name, data, shape, imaging_params);
        if let Some(files) = pre_applied {
            let tables = files
                .iter()
                .map(CalibrationTable::read)
                .collect::<Result<Vec<_>, _>>()?;
            dataset.set_applied(tables);
        }

        // The stages.
        let solver_params = parse_solver_params(
            ref_antenna,
            min_baselines_per_antenna,
            min_snr,
            combine,
            spw_map,
            interpolation,
        )?;
        let insufficient_data_policy = match insufficient_data {
            None => InsufficientDataPolicy::default(),
            Some(s) => InsufficientDataPolicy::from_str(&s)
                .map_err(|_| RunArgsError::BadInsufficientDataPolicy(s))?,
        };
        let initial_table = initial_table.map(CalibrationTable::read).transpose()?;
        if flag && flag_command.is_none() {
            return Err(RunArgsError::FlagWithoutCommand.into());
        }
        if !flag && flag_command.is_some() {
            "A flagging command was given, but --flag wasn't; the data won't be flagged".warn();
        }

        let stage_specs = parse_stage_specs(stages)?;
        let solints = parse_solints(solints, stage_specs.len())?;
        let mut overrides = parse_overrides(overrides, &stage_specs)?;
        let mut stage_configs = Vec::with_capacity(stage_specs.len());
        for (i_stage, ((name, mode), solints)) in
            stage_specs.into_iter().zip(solints.into_iter()).enumerate()
        {
            let coarsening = solints.coarsening_indices();
            if !coarsening.is_empty() {
                format!(
                    "Stage '{name}' has solution intervals that get coarser ({solints}); rounds normally go from coarse to fine"
                )
                .warn();
            }
            let mut config = StageConfig::new(mode, solints).named(name.clone());
            config.solver_params = solver_params.clone();
            config.overrides =
                RoundOverrides::new(overrides.shift_remove(&name).unwrap_or_default())?;
            config.flag = flag;
            config.insufficient_data_policy = insufficient_data_policy;
            if i_stage == 0 {
                config.initial_table = initial_table.clone();
            }
            stage_configs.push(config);
        }
        if initial_table.is_some()
            && !stage_configs.is_empty()
            && !stage_configs[0].mode.requires_inherited_table()
        {
            format!(
                "An initial table was given; it will be applied before the tables of stage '{}'",
                stage_configs[0].name
            )
            .warn();
        }
        let mut chain = StageChain::new(stage_configs)?;

        // The outputs.
        let output_dir = output_dir.unwrap_or_else(|| PathBuf::from("."));
        if no_quality_record && quality_record.is_some() {
            "--no-quality-record was given, so the specified quality record is ignored".warn();
        }
        if !no_quality_record {
            let record = quality_record
                .unwrap_or_else(|| output_dir.join(DEFAULT_QUALITY_RECORD_FILENAME));
            chain = chain.with_quality_record(QualityRecord::new(record));
        }
        let work_dir = work_dir.unwrap_or_else(|| output_dir.join("work"));
        let noise_region = parse_noise_box(noise_box.as_deref())?;

        // The external programs.
        let solve = parse_external_command(
            "solve",
            &solve_command.ok_or(RunArgsError::NoCommand("solve"))?,
        )?;
        let apply = parse_external_command(
            "apply",
            &apply_command.ok_or(RunArgsError::NoCommand("apply"))?,
        )?;
        let image = parse_external_command(
            "image",
            &image_command.ok_or(RunArgsError::NoCommand("image"))?,
        )?;
        let flagger = match flag_command {
            Some(c) if flag => Some(CommandFlagger::new(
                parse_external_command("flag", &c)?,
                work_dir.clone(),
            )),
            _ => None,
        };

        let params = SelfcalParams {
            dataset,
            chain,
            solver: CommandSolver::new(solve, apply, work_dir.clone()),
            imager: CommandImager::new(image, work_dir.clone()),
            flagger,
            work_dir,
            checkpoint_dir,
            noise_region,
            output_dir,
            diagnostics_file: diagnostics,
        };
        print_params(&params);
        display_warnings();

        Ok(params)
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), SelfcalError> {
        debug!("Converting arguments into parameters");
        let mut params = self.parse()?;

        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }

        let report = params.run()?;
        let mut printer = InfoPrinter::new("Self-calibration summary".into());
        for stage in &report.stages {
            let history = stage.history.iter().map(|s| format!("{s:.3}")).join(" -> ");
            let mut block: Vec<Cow<'static, str>> = vec![format!(
                "Stage '{}': {} after {} rounds",
                stage.stage, stage.outcome, stage.rounds_attempted
            )
            .into()];
            block.push(format!("Scores: {history}").into());
            match stage.final_table() {
                Some(t) => {
                    block.push(format!("Final table: {} ({})", t.id, stage.final_label).into())
                }
                None => block.push("Nothing committed".into()),
            }
            if !stage.skipped.is_empty() {
                block.push(format!("Skipped rounds: {:?}", stage.skipped).into());
            }
            printer.push_block(block);
        }
        if let Some(t) = report.final_table.as_ref() {
            printer.push_line(format!("Chain's final table: {}", t.id).into());
        }
        printer.display();

        Ok(())
    }
}

fn print_params(params: &SelfcalParams) {
    let mut printer = InfoPrinter::new("Self-calibration set up".into());
    let shape = params.dataset.shape();
    let mut block: Vec<Cow<'static, str>> = vec![format!(
        "Dataset '{}': {} timesteps, {} channels, {} baselines",
        params.dataset.name(),
        shape.num_timesteps,
        shape.num_channels,
        shape.num_baselines
    )
    .into()];
    if let Some(p) = params.dataset.path() {
        block.push(format!("Data: {}", p.display()).into());
    }
    if params.dataset.is_calibrated() {
        block.push(
            format!(
                "Already calibrated by {} table(s)",
                params.dataset.applied_tables().len()
            )
            .into(),
        );
    }
    printer.push_block(block);

    for stage in params.chain.stages() {
        let mut block: Vec<Cow<'static, str>> = vec![format!(
            "Stage '{}': {} (calmode {}), solution intervals {}",
            stage.name,
            stage.mode,
            stage.mode.cal_mode(),
            stage.solints
        )
        .into()];
        for (parameter, values) in stage.overrides.values() {
            block.push(format!("{parameter}: {}", values.iter().join(", ")).into());
        }
        if let Some(t) = stage.initial_table.as_ref() {
            block.push(format!("Initial table: {}", t.id).into());
        }
        printer.push_block(block);
    }

    let i = &params.dataset.imaging_params();
    printer.push_block(vec![
        format!(
            "Imaging: {}x{} pixels of {}, {} weighting (robust {}), niter {}, threshold {} Jy",
            i.imsize[0], i.imsize[1], i.cell, i.weighting, i.robust, i.niter, i.threshold
        )
        .into(),
        format!("Noise measured in {}", params.noise_region).into(),
    ]);
    printer.push_line(format!("Work directory: {}", params.work_dir.display()).into());
    match params.checkpoint_dir.as_ref() {
        Some(d) => printer.push_line(format!("Checkpoints: {}", d.display()).into()),
        None => printer.push_line("Checkpoints: in memory".into()),
    }
    printer.display();
}

/// Parse "name=mode" or "mode" items, which may also be comma separated.
fn parse_stage_specs(
    stages: Option<Vec<String>>,
) -> Result<Vec<(String, StageMode)>, SelfcalError> {
    let stages = stages.unwrap_or_else(|| vec![StageMode::Phase.to_string()]);
    stages
        .iter()
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let (name, mode) = match s.split_once('=') {
                Some((name, mode)) => (name.trim(), mode.trim()),
                None => (s, s),
            };
            let mode = StageMode::from_str(mode)
                .map_err(|_| RunArgsError::BadStageMode(mode.to_string()))?;
            Ok((name.to_string(), mode))
        })
        .collect()
}

/// One interval sequence per stage.
fn parse_solints(
    solints: Option<Vec<String>>,
    num_stages: usize,
) -> Result<Vec<SolutionIntervalSequence>, SelfcalError> {
    let sequences = match solints {
        None => vec![SolutionIntervalSequence::parse(&DEFAULT_SOLINTS)?],
        Some(strings) => strings
            .iter()
            .map(|s| {
                let intervals = s
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>();
                SolutionIntervalSequence::parse(&intervals)
            })
            .collect::<Result<Vec<_>, _>>()?,
    };
    match sequences.len() {
        1 => Ok(vec![sequences[0].clone(); num_stages]),
        n if n == num_stages => Ok(sequences),
        n => Err(RunArgsError::SolintCount {
            num_stages,
            num_sequences: n,
        }
        .into()),
    }
}

type StageOverrides = IndexMap<RoundParameter, Vec<OverrideValue>>;

/// Sort "[stage:]parameter=values" strings into the stages they apply to.
fn parse_overrides(
    overrides: Option<Vec<String>>,
    stages: &[(String, StageMode)],
) -> Result<IndexMap<String, StageOverrides>, SelfcalError> {
    let mut by_stage: IndexMap<String, StageOverrides> = IndexMap::new();
    for s in overrides.unwrap_or_default() {
        // A stage name can't contain '=', so a ':' after one belongs to a value.
        let (stage, rest) = match s.split_once(':') {
            Some((stage, rest)) if !stage.contains('=') => (Some(stage.trim()), rest),
            _ => (None, s.as_str()),
        };
        let (parameter, values) = parse_override(rest)?;
        let targets = match stage {
            Some(stage) => {
                if !stages.iter().any(|(name, _)| name == stage) {
                    return Err(RunArgsError::OverrideUnknownStage(stage.to_string()).into());
                }
                vec![stage.to_string()]
            }
            None => stages.iter().map(|(name, _)| name.clone()).collect(),
        };
        for target in targets {
            if by_stage
                .entry(target.clone())
                .or_default()
                .insert(parameter, values.clone())
                .is_some()
            {
                format!("'{parameter}' was overridden more than once for stage '{target}'; using the last").warn();
            }
        }
    }
    Ok(by_stage)
}

fn parse_solver_params(
    ref_antenna: Option<usize>,
    min_baselines_per_antenna: Option<u32>,
    min_snr: Option<f64>,
    combine: Option<Vec<String>>,
    spw_map: Option<Vec<usize>>,
    interpolation: Option<String>,
) -> Result<SolverParams, SelfcalError> {
    let defaults = SolverParams::default();
    let combine = combine
        .unwrap_or_default()
        .iter()
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| CombineAxis::from_str(s).map_err(|_| RunArgsError::BadCombineAxis(s.to_string())))
        .collect::<Result<Vec<_>, _>>()?;
    let interpolation = match interpolation {
        None => defaults.interpolation,
        Some(s) => Interpolation::from_str(&s).map_err(|_| RunArgsError::BadInterpolation(s))?,
    };
    Ok(SolverParams {
        ref_antenna: ref_antenna.unwrap_or(defaults.ref_antenna),
        min_baselines_per_antenna: min_baselines_per_antenna
            .unwrap_or(defaults.min_baselines_per_antenna),
        min_snr: min_snr.unwrap_or(defaults.min_snr),
        combine,
        spw_map: spw_map.unwrap_or_default(),
        interpolation,
    })
}

fn parse_imaging_params(
    imsize: Option<Vec<usize>>,
    cell: Option<String>,
    weighting: Option<String>,
    robust: Option<f64>,
    niter: Option<u32>,
    threshold: Option<f64>,
) -> Result<ImagingParams, SelfcalError> {
    let defaults = ImagingParams::default();
    let imsize = match imsize.as_deref() {
        None => defaults.imsize,
        Some(&[n]) if n > 0 => [n, n],
        Some(&[x, y]) if x > 0 && y > 0 => [x, y],
        Some(other) => return Err(RunArgsError::BadImsize(other.to_vec()).into()),
    };
    let weighting = match weighting {
        None => defaults.weighting,
        Some(s) => Weighting::from_str(&s).map_err(|_| RunArgsError::BadWeighting(s))?,
    };
    let robust = robust.unwrap_or(defaults.robust);
    if !(-2.0..=2.0).contains(&robust) {
        return Err(RunArgsError::BadRobust(robust).into());
    }
    let threshold = threshold.unwrap_or(defaults.threshold);
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(RunArgsError::BadThreshold(threshold).into());
    }
    Ok(ImagingParams {
        imsize,
        cell: cell.unwrap_or(defaults.cell),
        weighting,
        robust,
        niter: niter.unwrap_or(defaults.niter),
        threshold,
    })
}

#[derive(thiserror::Error, Debug)]
pub(super) enum RunArgsError {
    #[error("The dataset's shape wasn't specified (--shape TIMESTEPS CHANNELS BASELINES)")]
    NoShape,

    #[error("The dataset's shape must be three positive numbers, but got {0:?}")]
    BadShape(Vec<usize>),

    #[error("The dataset needs a name; specify --name or --data")]
    NoName,

    #[error("The dataset's name {0:?} can't be empty or contain tabs or line breaks")]
    BadName(String),

    #[error("No {0} command was specified")]
    NoCommand(&'static str),

    #[error("--flag was given without a flagging command (--flag-command)")]
    FlagWithoutCommand,

    #[error("Unknown stage mode '{0}'; options are: {}", *STAGE_MODES_COMMA_SEPARATED)]
    BadStageMode(String),

    #[error("There are {num_stages} stages, but {num_sequences} solution interval sequences; give either one sequence or one per stage")]
    SolintCount {
        num_stages: usize,
        num_sequences: usize,
    },

    #[error("An override refers to stage '{0}', which isn't one of the stages")]
    OverrideUnknownStage(String),

    #[error("Unknown insufficient-data policy '{0}'; options are: {}", *INSUFFICIENT_DATA_POLICIES_COMMA_SEPARATED)]
    BadInsufficientDataPolicy(String),

    #[error("Unknown axis to combine '{0}'; options are: {}", *COMBINE_AXES_COMMA_SEPARATED)]
    BadCombineAxis(String),

    #[error("Unknown interpolation '{0}'; options are: {}", *INTERPOLATIONS_COMMA_SEPARATED)]
    BadInterpolation(String),

    #[error("Unknown weighting '{0}'; options are: {}", *WEIGHTINGS_COMMA_SEPARATED)]
    BadWeighting(String),

    #[error("The image size must be one or two positive numbers, but got {0:?}")]
    BadImsize(Vec<usize>),

    #[error("The Briggs robustness must be between -2 and 2, but got {0}")]
    BadRobust(f64),

    #[error("The deconvolution threshold must be a non-negative number, but got {0}")]
    BadThreshold(f64),
}

impl From<RunArgsError> for SelfcalError {
    fn from(e: RunArgsError) -> Self {
        SelfcalError::Config(e.to_string())
    }
}
