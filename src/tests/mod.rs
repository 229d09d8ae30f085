// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Scripted collaborators for tests.
//!
//! The imager's images are a single bright pixel over a +-1 checkerboard
//! residual, so the quality score of a round is exactly the peak it was
//! scripted with.

use std::collections::VecDeque;

use ndarray::prelude::*;

use crate::{
    backend::{
        BackendError, CalibrationSolver, Flagger, ImagePair, ImagingBackend, ImagingParams,
        SolveError, SolveRequest, SolverParams,
    },
    calibration::{c64, CalMode, CalibrationTable, TableId},
    controller::{DiagnosticSink, RoundDiagnostic},
    dataset::{Dataset, DatasetShape},
    solint::SolutionInterval,
};

pub(crate) fn test_dataset() -> Dataset {
    Dataset::new(
        "test",
        None,
        DatasetShape {
            num_timesteps: 4,
            num_channels: 4,
            num_baselines: 6,
        },
        ImagingParams::default(),
    )
}

/// A table that is different for every ID.
pub(crate) fn scripted_table(id: &TableId, mode: CalMode) -> CalibrationTable {
    let phase = 0.1 * id.round as f64 + 0.01 * id.stage.len() as f64;
    CalibrationTable {
        id: id.clone(),
        mode,
        solint: SolutionInterval::Infinite,
        ref_antenna: 0,
        gains: Array2::from_shape_fn((4, 2), |(a, _)| {
            c64::from_polar(1.0 + 0.01 * a as f64, phase * a as f64)
        }),
        flagged_antennas: vec![],
    }
}

/// What a solver was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SolveCall {
    pub(crate) id: TableId,
    pub(crate) solint: SolutionInterval,
    pub(crate) mode: CalMode,
    pub(crate) inherited: Option<TableId>,
    pub(crate) committed: Vec<TableId>,
    pub(crate) params: SolverParams,
}

#[derive(Debug, Default)]
pub(crate) struct MockSolver {
    pub(crate) solves: Vec<SolveCall>,

    /// The IDs of the tables given to each apply call, in order.
    pub(crate) applies: Vec<Vec<TableId>>,

    /// Solving these reports insufficient data.
    pub(crate) insufficient: Vec<TableId>,

    /// Solving these fails outright.
    pub(crate) failing: Vec<TableId>,

    /// Overrides the dataset's own idea of whether it's calibrated.
    pub(crate) calibrated: Option<bool>,
}

impl CalibrationSolver for MockSolver {
    fn solve(
        &mut self,
        _dataset: &Dataset,
        request: &SolveRequest,
    ) -> Result<CalibrationTable, SolveError> {
        self.solves.push(SolveCall {
            id: request.id.clone(),
            solint: request.solint,
            mode: request.mode,
            inherited: request.inherited.map(|t| t.id.clone()),
            committed: request.committed.iter().map(|t| t.id.clone()).collect(),
            params: request.params.clone(),
        });
        if self.insufficient.contains(request.id) {
            return Err(SolveError::InsufficientData {
                solint: request.solint,
                reason: "scripted".to_string(),
            });
        }
        if self.failing.contains(request.id) {
            return Err(BackendError::Failure("scripted solver failure".to_string()).into());
        }
        Ok(scripted_table(request.id, request.mode))
    }

    fn apply(
        &mut self,
        dataset: &mut Dataset,
        tables: &[CalibrationTable],
        _params: &SolverParams,
    ) -> Result<(), BackendError> {
        self.applies
            .push(tables.iter().map(|t| t.id.clone()).collect());
        // Leave a mark so that restores are visible in the flags too.
        if let Some(last) = tables.last() {
            dataset.flags_mut()[(last.id.round % 4, 3, 5)] = true;
        }
        Ok(())
    }

    fn already_calibrated(&self, dataset: &Dataset) -> bool {
        self.calibrated.unwrap_or_else(|| dataset.is_calibrated())
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ScriptedImage {
    /// Images with this score.
    Score(f64),
    /// A residual of zeros.
    ZeroResidual,
    /// The imager fails.
    Fail,
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedImager {
    script: VecDeque<ScriptedImage>,

    /// The label of each imaging call.
    pub(crate) labels: Vec<String>,

    /// The parameters of each imaging call.
    pub(crate) params: Vec<ImagingParams>,
}

impl ScriptedImager {
    pub(crate) fn new(script: Vec<ScriptedImage>) -> ScriptedImager {
        ScriptedImager {
            script: script.into(),
            ..Default::default()
        }
    }

    pub(crate) fn with_scores(scores: &[f64]) -> ScriptedImager {
        ScriptedImager::new(scores.iter().copied().map(ScriptedImage::Score).collect())
    }

    pub(crate) fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl ImagingBackend for ScriptedImager {
    fn image(
        &mut self,
        _dataset: &Dataset,
        params: &ImagingParams,
        label: &str,
    ) -> Result<ImagePair, BackendError> {
        self.labels.push(label.to_string());
        self.params.push(params.clone());
        let checkerboard =
            Array2::from_shape_fn((8, 8), |(r, c)| if (r + c) % 2 == 0 { 1.0 } else { -1.0 });
        match self.script.pop_front() {
            Some(ScriptedImage::Score(s)) => {
                let mut restored = Array2::zeros((8, 8));
                restored[(4, 4)] = s;
                Ok(ImagePair {
                    restored,
                    residual: checkerboard,
                })
            }
            Some(ScriptedImage::ZeroResidual) => Ok(ImagePair {
                restored: Array2::from_elem((8, 8), 1.0),
                residual: Array2::zeros((8, 8)),
            }),
            Some(ScriptedImage::Fail) => Err(BackendError::NonZeroExit {
                program: "scripted-imager".to_string(),
                code: Some(1),
                stderr: "scripted".to_string(),
            }),
            None => Err(BackendError::Failure(format!(
                "the imaging script ran out at {label}"
            ))),
        }
    }
}

/// Flags a new visibility every call.
#[derive(Debug, Default)]
pub(crate) struct MockFlagger {
    pub(crate) calls: usize,
}

impl Flagger for MockFlagger {
    fn flag(&mut self, dataset: &mut Dataset) -> Result<usize, BackendError> {
        self.calls += 1;
        dataset.flags_mut()[(0, self.calls % 4, 0)] = true;
        Ok(1)
    }
}

#[derive(Debug, Default)]
pub(crate) struct CollectedDiagnostics(pub(crate) Vec<RoundDiagnostic>);

impl DiagnosticSink for CollectedDiagnostics {
    fn emit(&mut self, diagnostic: &RoundDiagnostic) {
        self.0.push(diagnostic.clone());
    }
}
