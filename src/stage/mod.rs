// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stages, and chains of stages.
//!
//! A stage is one convergence loop in one calibration mode. A chain runs its
//! stages in order on the same dataset, each stage inheriting the final table
//! of the stage before it (e.g. phase-only, then amplitude and phase).

mod error;
mod overrides;

pub use error::{ConfigurationError, StageChainError};
pub use overrides::{OverrideValue, RoundOverrides, RoundParameter};
pub(crate) use overrides::{parse_override, ROUND_PARAMETERS_COMMA_SEPARATED};

use std::collections::HashSet;

use log::{debug, info, warn};

use crate::{
    backend::SolverParams,
    calibration::{CalibrationTable, StageMode},
    constants::BASELINE_CHECKPOINT_LABEL,
    controller::{
        ControllerReport, ControllerState, ConvergenceController, DiagnosticSink,
        InsufficientDataPolicy, RoundDecision, RoundDiagnostic,
    },
    dataset::Dataset,
    quality::QualityRecord,
    round::RoundExecutor,
    solint::SolutionIntervalSequence,
};

/// Everything needed to run one stage.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Names the stage's tables and checkpoints. Unique within a chain.
    pub name: String,

    pub mode: StageMode,

    /// One round per interval, coarse to fine.
    pub solints: SolutionIntervalSequence,

    pub solver_params: SolverParams,

    pub overrides: RoundOverrides,

    /// Run the flagger after each apply?
    pub flag: bool,

    pub insufficient_data_policy: InsufficientDataPolicy,

    /// Used as the inherited table if no previous stage provides one.
    pub initial_table: Option<CalibrationTable>,
}

impl StageConfig {
    /// A stage named after its mode, with default parameters.
    pub fn new(mode: StageMode, solints: SolutionIntervalSequence) -> StageConfig {
        StageConfig {
            name: mode.to_string(),
            mode,
            solints,
            solver_params: SolverParams::default(),
            overrides: RoundOverrides::default(),
            flag: false,
            insufficient_data_policy: InsufficientDataPolicy::default(),
            initial_table: None,
        }
    }

    pub fn named<S: Into<String>>(mut self, name: S) -> StageConfig {
        self.name = name.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::EmptyStageName);
        }
        self.overrides.check_lengths(&self.name, self.solints.len())?;
        if !self.solver_params.min_snr.is_finite() || self.solver_params.min_snr < 0.0 {
            return Err(ConfigurationError::InvalidParameter {
                what: "minimum SNR",
                value: self.solver_params.min_snr.to_string(),
            });
        }
        if let Some(t) = &self.initial_table {
            if t.num_antennas() > 0 && t.ref_antenna >= t.num_antennas() {
                return Err(ConfigurationError::InvalidParameter {
                    what: "initial table reference antenna",
                    value: t.ref_antenna.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// The results of a whole chain.
#[derive(Debug, Clone)]
pub struct StageChainReport {
    pub stages: Vec<ControllerReport>,

    /// The table the chain ends with: the last committed table of the last
    /// stage that committed one, or an initial table if nothing was
    /// committed.
    pub final_table: Option<CalibrationTable>,
}

pub struct StageChain {
    stages: Vec<StageConfig>,
    quality_record: Option<QualityRecord>,
}

impl StageChain {
    pub fn new(stages: Vec<StageConfig>) -> Result<StageChain, ConfigurationError> {
        if stages.is_empty() {
            return Err(ConfigurationError::NoStages);
        }
        let mut names = HashSet::new();
        for (i, stage) in stages.iter().enumerate() {
            stage.validate()?;
            if !names.insert(stage.name.as_str()) {
                return Err(ConfigurationError::DuplicateStage(stage.name.clone()));
            }
            // Only the first stage can be sure that nothing will be inherited.
            if i == 0 && stage.mode.requires_inherited_table() && stage.initial_table.is_none() {
                return Err(ConfigurationError::MissingInheritedTable {
                    stage: stage.name.clone(),
                    mode: stage.mode,
                });
            }
        }

        Ok(StageChain {
            stages,
            quality_record: None,
        })
    }

    pub fn with_quality_record(mut self, record: QualityRecord) -> Self {
        self.quality_record = Some(record);
        self
    }

    pub fn stages(&self) -> &[StageConfig] {
        &self.stages
    }

    /// Run every stage in order. A stage that makes no progress doesn't stop
    /// the chain, but an error does. An amplitude-bearing stage with nothing to
    /// inherit (because no earlier stage committed a table) is skipped.
    pub fn run(
        &self,
        dataset: &mut Dataset,
        executor: &mut RoundExecutor,
        diagnostics: &mut dyn DiagnosticSink,
    ) -> Result<StageChainReport, StageChainError> {
        let mut carried: Option<CalibrationTable> = None;
        let mut previous_score: Option<f64> = None;
        let mut reports = Vec::with_capacity(self.stages.len());

        for config in &self.stages {
            info!(
                "Starting stage '{}' ({}, solution intervals {})",
                config.name, config.mode, config.solints
            );
            let inherited = carried.take().or_else(|| config.initial_table.clone());
            if config.mode.requires_inherited_table() && inherited.is_none() {
                warn!(
                    "Stage '{}' solves for '{}', but no earlier stage committed a table for it to build on; skipping it",
                    config.name, config.mode
                );
                reports.push(skipped_stage(config, previous_score, diagnostics));
                continue;
            }

            let mut controller = ConvergenceController::new(config, inherited)?;
            if let Some(score) = previous_score {
                controller = controller.with_baseline(score);
            }
            if let Some(record) = self.quality_record.clone() {
                controller = controller.with_quality_record(record);
            }

            let report = controller
                .run(dataset, executor, diagnostics)
                .map_err(|source| StageChainError::Stage {
                    stage: config.name.clone(),
                    source,
                })?;

            carried = report
                .final_table()
                .cloned()
                .or_else(|| controller.inherited().cloned());
            if let Some(t) = &carried {
                debug!("Stage '{}' passes on table {}", config.name, t.id);
            }
            previous_score = report.final_score().or(previous_score);
            reports.push(report);
        }

        Ok(StageChainReport {
            stages: reports,
            final_table: carried,
        })
    }
}

/// The report of a stage that never ran. Every round counts as skipped and the
/// dataset keeps the state (and score) the previous stage left it in.
fn skipped_stage(
    config: &StageConfig,
    previous_score: Option<f64>,
    diagnostics: &mut dyn DiagnosticSink,
) -> ControllerReport {
    let skipped = (1..=config.solints.len()).collect::<Vec<_>>();
    for (&round, solint) in skipped.iter().zip(config.solints.iter()) {
        diagnostics.emit(&RoundDiagnostic {
            stage: config.name.clone(),
            round,
            table: None,
            solint: Some(solint.to_string()),
            score: None,
            peak: None,
            noise: None,
            decision: RoundDecision::Skipped,
        });
    }

    ControllerReport {
        stage: config.name.clone(),
        outcome: ControllerState::Exhausted,
        history: previous_score.into_iter().collect(),
        committed: vec![],
        checkpoints: vec![],
        final_label: BASELINE_CHECKPOINT_LABEL.to_string(),
        skipped,
        rounds_attempted: 0,
    }
}
