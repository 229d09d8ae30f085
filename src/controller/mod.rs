// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The convergence loop of one stage.
//!
//! The controller establishes a baseline score, then runs a round for each
//! solution interval, coarse to fine. A round is committed only if its score
//! is strictly better than the last committed score. Otherwise the dataset is
//! restored to the checkpoint taken before the round and the stage stops;
//! rollback only ever undoes the most recent round.

mod diagnostics;
mod error;
#[cfg(test)]
mod tests;

pub use diagnostics::{
    DiagnosticSink, JsonLinesDiagnostics, LogDiagnostics, RoundDecision, RoundDiagnostic,
};
pub use error::ControllerError;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::{
    backend::SolverParams,
    calibration::{CalibrationTable, TableId},
    checkpoint::CheckpointStore,
    constants::BASELINE_CHECKPOINT_LABEL,
    dataset::Dataset,
    quality::QualityRecord,
    round::{RoundError, RoundExecutor, RoundFailure, RoundOutcome, RoundSpec, RoundSuccess},
    stage::{ConfigurationError, StageConfig},
    PROGRESS_BARS,
};

lazy_static::lazy_static! {
    pub(crate) static ref INSUFFICIENT_DATA_POLICIES_COMMA_SEPARATED: String =
        InsufficientDataPolicy::iter().join(", ");
}

/// What to do when the solver reports that there's too little data for a
/// solution interval.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Display,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InsufficientDataPolicy {
    /// The round's failure ends the stage with an error.
    #[default]
    Abort,

    /// Roll the round back and move on to the next solution interval.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerState {
    Init,
    Running,
    /// Every solution interval improved the score.
    Converged,
    /// A round didn't improve the score and was undone.
    RolledBack,
    /// Every solution interval was attempted without a regression, but some
    /// were skipped.
    Exhausted,
    Terminal,
}

/// The results of a stage.
#[derive(Debug, Clone)]
pub struct ControllerReport {
    pub stage: String,

    /// One of [`ControllerState::Converged`], [`ControllerState::RolledBack`]
    /// or [`ControllerState::Exhausted`].
    pub outcome: ControllerState,

    /// The baseline score (if there was one) followed by every committed
    /// score. Strictly increasing.
    pub history: Vec<f64>,

    /// The committed tables, in round order.
    pub committed: Vec<CalibrationTable>,

    /// The checkpoint labels of the committed rounds, in round order.
    pub checkpoints: Vec<String>,

    /// The checkpoint label of the final accepted state.
    pub final_label: String,

    /// Rounds skipped for lack of data.
    pub skipped: Vec<usize>,

    /// The number of rounds attempted (not including the baseline).
    pub rounds_attempted: usize,
}

impl ControllerReport {
    pub fn final_table(&self) -> Option<&CalibrationTable> {
        self.committed.last()
    }

    pub fn final_score(&self) -> Option<f64> {
        self.history.last().copied()
    }
}

pub struct ConvergenceController<'c> {
    config: &'c StageConfig,
    inherited: Option<CalibrationTable>,
    baseline_seed: Option<f64>,
    quality_record: Option<QualityRecord>,
    state: ControllerState,
}

impl<'c> ConvergenceController<'c> {
    /// `inherited` is the final table of a previous stage. Amplitude-bearing
    /// stages need it, or an initial table in their config.
    pub fn new(
        config: &'c StageConfig,
        inherited: Option<CalibrationTable>,
    ) -> Result<ConvergenceController<'c>, ConfigurationError> {
        config.validate()?;
        let inherited = inherited.or_else(|| config.initial_table.clone());
        if config.mode.requires_inherited_table() && inherited.is_none() {
            return Err(ConfigurationError::MissingInheritedTable {
                stage: config.name.clone(),
                mode: config.mode,
            });
        }

        Ok(ConvergenceController {
            config,
            inherited,
            baseline_seed: None,
            quality_record: None,
            state: ControllerState::Init,
        })
    }

    /// Compare the first round against this score rather than establishing a
    /// baseline, e.g. the final score of a previous stage.
    pub fn with_baseline(mut self, score: f64) -> Self {
        self.baseline_seed = Some(score);
        self
    }

    /// Reuse and record baseline and committed scores in this record.
    pub fn with_quality_record(mut self, record: QualityRecord) -> Self {
        self.quality_record = Some(record);
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn inherited(&self) -> Option<&CalibrationTable> {
        self.inherited.as_ref()
    }

    fn transition(&mut self, to: ControllerState) {
        trace!("{}: {} -> {to}", self.config.name, self.state);
        self.state = to;
    }

    /// Run the stage to completion.
    ///
    /// If a round fails, the dataset is rolled back to the checkpoint taken
    /// before it and the error is returned, unless the failure was
    /// insufficient data and the stage's policy is to skip.
    pub fn run(
        &mut self,
        dataset: &mut Dataset,
        executor: &mut RoundExecutor,
        diagnostics: &mut dyn DiagnosticSink,
    ) -> Result<ControllerReport, ControllerError> {
        assert_eq!(
            self.state,
            ControllerState::Init,
            "A controller can only be run once"
        );
        let config = self.config;
        let stage = config.name.as_str();
        if config.flag && !executor.has_flagger() {
            warn!("Stage '{stage}' wants to flag after applying, but no flagger is available");
        }

        let baseline = self.establish_baseline(dataset, executor, diagnostics)?;
        executor.store().save(dataset, BASELINE_CHECKPOINT_LABEL)?;

        let mut history: Vec<f64> = baseline.into_iter().collect();
        let mut committed: Vec<CalibrationTable> = vec![];
        let mut checkpoints: Vec<String> = vec![];
        let mut skipped: Vec<usize> = vec![];
        let mut rounds_attempted = 0;
        let mut regressed = false;

        self.transition(ControllerState::Running);
        let progress = make_round_progress_bar(config.solints.len(), stage.to_string());
        for (i_round, &solint) in config.solints.iter().enumerate() {
            let round = i_round + 1;
            let mut solver_params = config.solver_params.clone();
            let mut imaging_params = dataset.imaging_params().clone();
            config
                .overrides
                .apply(i_round, &mut solver_params, &mut imaging_params);
            let spec = RoundSpec {
                stage,
                round,
                solint,
                mode: config.mode,
                solver_params: &solver_params,
                imaging_params: &imaging_params,
                inherited: self.inherited.as_ref(),
                committed: &committed,
                flag: config.flag,
            };

            rounds_attempted += 1;
            let outcome = executor.run_round(dataset, &spec);
            progress.inc(1);
            match outcome {
                RoundOutcome::Success(RoundSuccess {
                    table,
                    assessment,
                    checkpoint_label,
                }) => {
                    let previous = history.last().copied();
                    let improved = match previous {
                        Some(previous) => assessment.score > previous,
                        // Nothing to compare against.
                        None => true,
                    };
                    let decision = if improved {
                        RoundDecision::Committed
                    } else {
                        RoundDecision::RolledBack
                    };
                    diagnostics.emit(&RoundDiagnostic {
                        stage: stage.to_string(),
                        round,
                        table: Some(table.id.to_string()),
                        solint: Some(solint.to_string()),
                        score: Some(assessment.score),
                        peak: Some(assessment.peak),
                        noise: Some(assessment.noise),
                        decision,
                    });

                    if improved {
                        debug!(
                            "{stage} round {round}: {:.4} improves on {previous:?}; committing",
                            assessment.score
                        );
                        history.push(assessment.score);
                        if let Some(record) = self.quality_record.as_ref() {
                            record.append(dataset.name(), assessment.score)?;
                        }
                        committed.push(table);
                        checkpoints.push(checkpoint_label);
                    } else {
                        info!(
                            "{stage} round {round} (solint {solint}) didn't improve the score ({:.4} <= {:.4}); rolling back",
                            assessment.score,
                            previous.unwrap_or(f64::NAN),
                        );
                        roll_back(executor, dataset, &checkpoint_label, &config.solver_params)?;
                        regressed = true;
                        break;
                    }
                }

                RoundOutcome::Failure(RoundFailure {
                    checkpoint_label,
                    error,
                }) => {
                    if let Some(label) = checkpoint_label.as_deref() {
                        if let Err(e) = roll_back(executor, dataset, label, &config.solver_params)
                        {
                            progress.abandon_with_message(format!(
                                "{stage}: round {round} failed and couldn't be undone"
                            ));
                            self.transition(ControllerState::Terminal);
                            return Err(ControllerError::RollbackAfterFailure {
                                stage: stage.to_string(),
                                round,
                                round_error: error,
                                source: Box::new(e),
                            });
                        }
                    }
                    let skip = error.is_insufficient_data()
                        && config.insufficient_data_policy == InsufficientDataPolicy::Skip;
                    diagnostics.emit(&RoundDiagnostic {
                        stage: stage.to_string(),
                        round,
                        table: None,
                        solint: Some(solint.to_string()),
                        score: None,
                        peak: None,
                        noise: None,
                        decision: if skip {
                            RoundDecision::Skipped
                        } else {
                            RoundDecision::Failed
                        },
                    });

                    if skip {
                        warn!("{stage} round {round} (solint {solint}) skipped: {error}");
                        skipped.push(round);
                        continue;
                    }
                    progress.abandon_with_message(format!("{stage}: round {round} failed"));
                    self.transition(ControllerState::RolledBack);
                    self.transition(ControllerState::Terminal);
                    return Err(ControllerError::Round {
                        stage: stage.to_string(),
                        round,
                        source: error,
                    });
                }
            }
        }

        let outcome = if regressed {
            ControllerState::RolledBack
        } else if !skipped.is_empty() {
            ControllerState::Exhausted
        } else {
            ControllerState::Converged
        };
        self.transition(outcome);
        progress.abandon_with_message(format!("{stage}: {outcome}"));

        let final_label = checkpoints
            .last()
            .cloned()
            .unwrap_or_else(|| BASELINE_CHECKPOINT_LABEL.to_string());
        info!(
            "Stage '{stage}' finished {outcome} after {rounds_attempted} rounds; {} committed, final state '{final_label}'",
            committed.len()
        );
        self.transition(ControllerState::Terminal);

        Ok(ControllerReport {
            stage: stage.to_string(),
            outcome,
            history,
            committed,
            checkpoints,
            final_label,
            skipped,
            rounds_attempted,
        })
    }

    /// Get the score that the first round has to beat, if there is one.
    fn establish_baseline(
        &mut self,
        dataset: &Dataset,
        executor: &mut RoundExecutor,
        diagnostics: &mut dyn DiagnosticSink,
    ) -> Result<Option<f64>, ControllerError> {
        let stage = self.config.name.as_str();
        let mut diagnostic = RoundDiagnostic {
            stage: stage.to_string(),
            round: 0,
            table: None,
            solint: None,
            score: None,
            peak: None,
            noise: None,
            decision: RoundDecision::Baseline,
        };

        if let Some(score) = self.baseline_seed {
            debug!("{stage}: using a baseline score of {score:.4}");
            diagnostic.score = Some(score);
            diagnostics.emit(&diagnostic);
            return Ok(Some(score));
        }

        if executor.already_calibrated(dataset) {
            let recorded = match self.quality_record.as_ref() {
                Some(record) => record.first(dataset.name())?,
                None => None,
            };
            match recorded {
                Some(score) => info!(
                    "{} is already calibrated; reusing its recorded baseline score {score:.4}",
                    dataset.name()
                ),
                None => warn!(
                    "{} is already calibrated but has no recorded score; the first round will be accepted",
                    dataset.name()
                ),
            }
            diagnostic.score = recorded;
            diagnostics.emit(&diagnostic);
            return Ok(recorded);
        }

        let assessment = executor
            .image_and_score(dataset, dataset.imaging_params(), BASELINE_CHECKPOINT_LABEL)
            .map_err(|source: RoundError| ControllerError::Round {
                stage: stage.to_string(),
                round: 0,
                source,
            })?;
        info!(
            "Baseline score of {}: {:.4} (noise {:.3e})",
            dataset.name(),
            assessment.score,
            assessment.noise
        );
        if let Some(record) = self.quality_record.as_ref() {
            record.append(dataset.name(), assessment.score)?;
        }
        diagnostic.score = Some(assessment.score);
        diagnostic.peak = Some(assessment.peak);
        diagnostic.noise = Some(assessment.noise);
        diagnostics.emit(&diagnostic);
        Ok(Some(assessment.score))
    }
}

/// Undo a round: restore the state from before it, bring the data back in
/// line with the restored tables, then discard the round's checkpoint.
fn roll_back(
    executor: &mut RoundExecutor,
    dataset: &mut Dataset,
    label: &str,
    params: &SolverParams,
) -> Result<(), ControllerError> {
    let applied = lineage(dataset);
    executor.store().restore(dataset, label)?;
    // The data still carries whatever the round applied.
    if lineage(dataset) != applied {
        executor
            .reapply(dataset, params)
            .map_err(|source| ControllerError::Reapply {
                label: label.to_string(),
                source,
            })?;
    }
    executor.store().delete(label)?;
    debug!("Rolled back to '{label}'");
    Ok(())
}

fn lineage(dataset: &Dataset) -> Vec<TableId> {
    dataset
        .applied_tables()
        .iter()
        .map(|t| t.id.clone())
        .collect()
}

/// Convenience function to make a progress bar over rounds.
fn make_round_progress_bar(num_rounds: usize, message: String) -> ProgressBar {
    ProgressBar::with_draw_target(
        Some(num_rounds as _),
        if PROGRESS_BARS.load() {
            ProgressDrawTarget::stdout()
        } else {
            ProgressDrawTarget::hidden()
        },
    )
    .with_style(
        ProgressStyle::default_bar()
            .template("{msg}: [{wide_bar:.blue}] {pos:3}/{len:3} rounds ({elapsed_precise})")
            .unwrap()
            .progress_chars("=> "),
    )
    .with_position(0)
    .with_message(message)
}
