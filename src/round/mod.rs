// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Performing one round of self-calibration: checkpoint, solve, apply,
//! (optionally) flag, image and score.
//!
//! A round only *performs*; whether its result is kept is decided by the
//! [`crate::ConvergenceController`].

mod error;

pub use error::RoundError;

use log::{debug, trace};

use crate::{
    backend::{
        BackendError, CalibrationSolver, Flagger, ImagingBackend, ImagingParams, SolveRequest,
        SolverParams,
    },
    calibration::{CalibrationTable, StageMode, TableId},
    checkpoint::CheckpointStore,
    dataset::Dataset,
    misc::expensive_op,
    quality::{score, NoiseRegion, QualityAssessment},
    solint::SolutionInterval,
};

/// Everything that's particular to one round.
#[derive(Debug, Clone, Copy)]
pub struct RoundSpec<'a> {
    pub stage: &'a str,

    /// 1-indexed; round 0 is the baseline.
    pub round: usize,

    pub solint: SolutionInterval,

    pub mode: StageMode,

    pub solver_params: &'a SolverParams,

    pub imaging_params: &'a ImagingParams,

    /// The final table of a previous stage.
    pub inherited: Option<&'a CalibrationTable>,

    /// The tables committed so far in this stage.
    pub committed: &'a [CalibrationTable],

    /// Run the flagger after applying?
    pub flag: bool,
}

impl RoundSpec<'_> {
    /// The label of the checkpoint taken before this round changes anything.
    pub fn checkpoint_label(&self) -> String {
        format!("before_{}_{}", self.stage, self.round)
    }

    pub fn table_id(&self) -> TableId {
        TableId::new(self.stage, self.round)
    }

    /// The committed tables that are composed with this round's table.
    fn composed(&self) -> &[CalibrationTable] {
        if self.mode.composes_committed_tables() {
            self.committed
        } else {
            &[]
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoundSuccess {
    pub table: CalibrationTable,
    pub assessment: QualityAssessment,
    pub checkpoint_label: String,
}

#[derive(Debug)]
pub struct RoundFailure {
    /// The checkpoint taken before the failure, if it could be taken.
    pub checkpoint_label: Option<String>,
    pub error: RoundError,
}

#[derive(Debug)]
pub enum RoundOutcome {
    Success(RoundSuccess),
    Failure(RoundFailure),
}

/// Drives the external collaborators through rounds.
pub struct RoundExecutor<'a> {
    solver: &'a mut dyn CalibrationSolver,
    imager: &'a mut dyn ImagingBackend,
    flagger: Option<&'a mut dyn Flagger>,
    store: &'a mut dyn CheckpointStore,
    noise_region: NoiseRegion,
}

impl<'a> RoundExecutor<'a> {
    pub fn new(
        solver: &'a mut dyn CalibrationSolver,
        imager: &'a mut dyn ImagingBackend,
        store: &'a mut dyn CheckpointStore,
        noise_region: NoiseRegion,
    ) -> RoundExecutor<'a> {
        RoundExecutor {
            solver,
            imager,
            flagger: None,
            store,
            noise_region,
        }
    }

    pub fn with_flagger(mut self, flagger: &'a mut dyn Flagger) -> RoundExecutor<'a> {
        self.flagger = Some(flagger);
        self
    }

    pub fn has_flagger(&self) -> bool {
        self.flagger.is_some()
    }

    pub fn store(&mut self) -> &mut dyn CheckpointStore {
        &mut *self.store
    }

    pub fn already_calibrated(&self, dataset: &Dataset) -> bool {
        self.solver.already_calibrated(dataset)
    }

    /// Apply the tables `dataset` says are applied to its data again, e.g.
    /// after its state was restored from a checkpoint. With no tables, any
    /// correction is cleared.
    pub fn reapply(
        &mut self,
        dataset: &mut Dataset,
        params: &SolverParams,
    ) -> Result<(), BackendError> {
        let tables = dataset.applied_tables().to_vec();
        trace!("Re-applying {} tables", tables.len());
        self.solver.apply(dataset, &tables, params)
    }

    /// Image `dataset` as it is and score the result.
    pub fn image_and_score(
        &mut self,
        dataset: &Dataset,
        params: &ImagingParams,
        label: &str,
    ) -> Result<QualityAssessment, RoundError> {
        let imager = &mut *self.imager;
        let images = expensive_op(
            || imager.image(dataset, params, label),
            &format!("Still imaging {label}"),
        )
        .map_err(RoundError::Image)?;
        let assessment = score(
            images.restored.view(),
            images.residual.view(),
            self.noise_region,
        )?;
        debug!(
            "{label}: peak {:.4e}, noise {:.4e}, score {:.4}",
            assessment.peak, assessment.noise, assessment.score
        );
        Ok(assessment)
    }

    /// Perform one round. `dataset` is left with this round's calibration
    /// applied whatever the score, and possibly part-way through the round if
    /// it failed; the returned checkpoint label can restore it.
    pub fn run_round(&mut self, dataset: &mut Dataset, spec: &RoundSpec) -> RoundOutcome {
        let checkpoint_label = spec.checkpoint_label();
        if let Err(e) = self.store.save(dataset, &checkpoint_label) {
            return RoundOutcome::Failure(RoundFailure {
                checkpoint_label: None,
                error: e.into(),
            });
        }

        match self.run_round_inner(dataset, spec) {
            Ok((table, assessment)) => RoundOutcome::Success(RoundSuccess {
                table,
                assessment,
                checkpoint_label,
            }),
            Err(error) => RoundOutcome::Failure(RoundFailure {
                checkpoint_label: Some(checkpoint_label),
                error,
            }),
        }
    }

    fn run_round_inner(
        &mut self,
        dataset: &mut Dataset,
        spec: &RoundSpec,
    ) -> Result<(CalibrationTable, QualityAssessment), RoundError> {
        let id = spec.table_id();
        let request = SolveRequest {
            id: &id,
            solint: spec.solint,
            mode: spec.mode.cal_mode(),
            params: spec.solver_params,
            inherited: spec.inherited,
            committed: spec.composed(),
        };
        debug!(
            "Solving for {id} ({}, solint {}, refant {})",
            request.mode, spec.solint, spec.solver_params.ref_antenna
        );
        let table = self.solver.solve(dataset, &request)?;

        // gaintable = [inherited, committed..., new]
        let tables = request
            .pre_applied()
            .cloned()
            .chain(std::iter::once(table.clone()))
            .collect::<Vec<_>>();
        trace!("Applying {} tables", tables.len());
        self.solver
            .apply(dataset, &tables, spec.solver_params)
            .map_err(RoundError::Apply)?;
        dataset.set_applied(tables);

        if spec.flag {
            if let Some(flagger) = self.flagger.as_mut() {
                let num_new = flagger.flag(dataset).map_err(RoundError::Flag)?;
                debug!("Flagging after {id} flagged {num_new} more visibilities");
            }
        }

        let assessment = self.image_and_score(dataset, spec.imaging_params, &id.to_string())?;
        Ok((table, assessment))
    }
}
