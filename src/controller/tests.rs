// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use indexmap::indexmap;
use serial_test::serial;
use tempfile::TempDir;

use super::*;
use crate::{
    calibration::{CalMode, StageMode, TableId},
    checkpoint::{CheckpointError, CheckpointId, MemoryCheckpointStore},
    quality::{NoiseRegion, QualityError},
    solint::{SolutionInterval, SolutionIntervalSequence},
    stage::{OverrideValue, RoundOverrides, RoundParameter},
    tests::*,
};

struct Harness {
    solver: MockSolver,
    imager: ScriptedImager,
    store: MemoryCheckpointStore,
    dataset: Dataset,
    diagnostics: CollectedDiagnostics,
}

impl Harness {
    fn new(script: Vec<ScriptedImage>) -> Harness {
        Harness {
            solver: MockSolver::default(),
            imager: ScriptedImager::new(script),
            store: MemoryCheckpointStore::new(),
            dataset: test_dataset(),
            diagnostics: CollectedDiagnostics::default(),
        }
    }

    fn with_scores(scores: &[f64]) -> Harness {
        Harness::new(scores.iter().copied().map(ScriptedImage::Score).collect())
    }

    fn run(&mut self, config: &StageConfig) -> Result<ControllerReport, ControllerError> {
        let mut controller = ConvergenceController::new(config, None).unwrap();
        self.run_controller(&mut controller)
    }

    fn run_controller(
        &mut self,
        controller: &mut ConvergenceController,
    ) -> Result<ControllerReport, ControllerError> {
        let mut executor = RoundExecutor::new(
            &mut self.solver,
            &mut self.imager,
            &mut self.store,
            NoiseRegion::default(),
        );
        controller.run(&mut self.dataset, &mut executor, &mut self.diagnostics)
    }

    fn decisions(&self) -> Vec<RoundDecision> {
        self.diagnostics.0.iter().map(|d| d.decision).collect()
    }
}

fn phase_stage(solints: &[&str]) -> StageConfig {
    StageConfig::new(
        StageMode::Phase,
        SolutionIntervalSequence::parse(solints).unwrap(),
    )
}

fn ids(tables: &[CalibrationTable]) -> Vec<String> {
    tables.iter().map(|t| t.id.to_string()).collect()
}

fn assert_strictly_increasing(history: &[f64]) {
    for w in history.windows(2) {
        assert!(w[1] > w[0], "{history:?} isn't strictly increasing");
    }
}

#[test]
fn test_halts_at_the_first_non_improvement() {
    let config = phase_stage(&["inf", "60s", "30s", "10s", "5s"]);
    // The third round's score equals the second's, which isn't good enough.
    let mut h = Harness::with_scores(&[1.0, 2.0, 3.0, 3.0, 4.0]);
    let result = h.run(&config);
    assert!(result.is_ok(), "{:?}", result.unwrap_err());
    let report = result.unwrap();

    assert_eq!(report.outcome, ControllerState::RolledBack);
    assert_eq!(report.history, [1.0, 2.0, 3.0]);
    assert_strictly_increasing(&report.history);
    assert_eq!(report.rounds_attempted, 3);
    assert_eq!(ids(&report.committed), ["phase_1", "phase_2"]);
    assert_eq!(report.checkpoints, ["before_phase_1", "before_phase_2"]);
    assert_eq!(report.final_label, "before_phase_2");
    assert!(report.skipped.is_empty());

    // Nothing finer was attempted.
    assert_eq!(h.imager.remaining(), 1);
    assert_eq!(h.solver.solves.len(), 3);
    // The regressing round's checkpoint is gone.
    assert_eq!(
        h.store.labels(),
        ["round0", "before_phase_1", "before_phase_2"]
    );
    // The dataset is back to round 2's state.
    assert_eq!(ids(h.dataset.applied_tables()), ["phase_2"]);
    assert_eq!(
        h.decisions(),
        [
            RoundDecision::Baseline,
            RoundDecision::Committed,
            RoundDecision::Committed,
            RoundDecision::RolledBack
        ]
    );
}

#[test]
fn test_exhausting_the_solution_intervals_converges() {
    let config = phase_stage(&["inf", "30s", "10s"]);
    let mut h = Harness::with_scores(&[1.0, 1.5, 2.5, 2.6]);
    let report = h.run(&config).unwrap();

    assert_eq!(report.outcome, ControllerState::Converged);
    assert_eq!(report.rounds_attempted, 3);
    assert_eq!(report.history, [1.0, 1.5, 2.5, 2.6]);
    assert_eq!(report.committed.len(), 3);
    assert_eq!(report.checkpoints.len(), 3);
    for label in &report.checkpoints {
        assert!(h.store.contains(label), "{label} wasn't retained");
    }
    // The baseline is kept as well.
    assert!(h.store.contains("round0"));
    assert_eq!(h.store.len(), 4);
    assert_eq!(report.final_label, "before_phase_3");
    assert_eq!(report.final_table().unwrap().id, TableId::new("phase", 3));
    assert_abs_diff_eq!(report.final_score().unwrap(), 2.6);

    // The solution intervals were used in order.
    let solints = h.solver.solves.iter().map(|s| s.solint).collect::<Vec<_>>();
    assert_eq!(
        solints,
        [
            SolutionInterval::Infinite,
            "30s".parse().unwrap(),
            "10s".parse().unwrap()
        ]
    );
}

#[test]
fn test_single_round_regression() {
    let config = phase_stage(&["inf", "30s", "10s"]);
    let mut h = Harness::with_scores(&[1.0, 2.0, 1.5]);
    let report = h.run(&config).unwrap();

    assert_eq!(report.outcome, ControllerState::RolledBack);
    assert_eq!(report.history, [1.0, 2.0]);
    assert_eq!(report.rounds_attempted, 2);
    assert_eq!(report.final_table().unwrap().id, TableId::new("phase", 1));
    assert_eq!(report.final_label, "before_phase_1");

    // The dataset is exactly as round 1 left it.
    let mut expected = test_dataset();
    expected.flags_mut()[(1, 3, 5)] = true;
    expected.set_applied(vec![scripted_table(
        &TableId::new("phase", 1),
        CalMode::Phase,
    )]);
    assert_eq!(h.dataset.state(), expected.state());
    assert!(!h.store.contains("before_phase_2"));
}

#[test]
fn test_rollback_reapplies_the_restored_tables() {
    let config = phase_stage(&["inf", "30s", "10s"]);
    let mut h = Harness::with_scores(&[1.0, 2.0, 1.5]);
    h.run(&config).unwrap();
    // The data ends up with what the dataset says is applied.
    assert_eq!(
        h.solver.applies,
        [
            vec![TableId::new("phase", 1)],
            vec![TableId::new("phase", 2)],
            vec![TableId::new("phase", 1)],
        ]
    );
    assert_eq!(
        h.solver.applies.last().unwrap(),
        &h.dataset
            .applied_tables()
            .iter()
            .map(|t| t.id.clone())
            .collect::<Vec<_>>()
    );

    // Going back to the baseline clears the correction.
    let mut h = Harness::with_scores(&[3.0, 2.0]);
    h.run(&phase_stage(&["inf"])).unwrap();
    assert_eq!(h.solver.applies.len(), 2);
    assert!(h.solver.applies[1].is_empty());
    assert!(h.dataset.applied_tables().is_empty());
}

#[test]
fn test_failed_solves_are_not_reapplied() {
    let mut config = phase_stage(&["inf", "30s"]);
    config.insufficient_data_policy = InsufficientDataPolicy::Skip;
    let mut h = Harness::with_scores(&[1.0, 2.0]);
    h.solver.insufficient = vec![TableId::new("phase", 1)];
    let report = h.run(&config).unwrap();

    assert_eq!(report.skipped, [1]);
    // Nothing was applied by the skipped round, so nothing needed undoing.
    assert_eq!(h.solver.applies, [vec![TableId::new("phase", 2)]]);
}

#[test]
fn test_nothing_committed() {
    let config = phase_stage(&["inf", "30s"]);
    let mut h = Harness::with_scores(&[3.0, 2.0]);
    let before = h.dataset.state().clone();
    let report = h.run(&config).unwrap();

    assert_eq!(report.outcome, ControllerState::RolledBack);
    assert_eq!(report.history, [3.0]);
    assert!(report.committed.is_empty());
    assert!(report.final_table().is_none());
    assert_eq!(report.final_label, "round0");
    assert_eq!(h.dataset.state(), &before);
}

#[test]
fn test_degenerate_noise_is_fatal() {
    let config = phase_stage(&["inf", "30s", "10s"]);
    let mut h = Harness::new(vec![
        ScriptedImage::Score(1.0),
        ScriptedImage::Score(2.0),
        ScriptedImage::ZeroResidual,
    ]);
    let mut controller = ConvergenceController::new(&config, None).unwrap();
    let result = h.run_controller(&mut controller);

    match result {
        Err(ControllerError::Round {
            stage,
            round,
            source: RoundError::Quality(QualityError::DegenerateNoise { noise }),
        }) => {
            assert_eq!(stage, "phase");
            assert_eq!(round, 2);
            assert_abs_diff_eq!(noise, 0.0);
        }
        other => panic!("Expected degenerate noise, got {other:?}"),
    }
    assert_eq!(controller.state(), ControllerState::Terminal);
    // Round 2 was still undone.
    assert_eq!(ids(h.dataset.applied_tables()), ["phase_1"]);
    assert!(!h.store.contains("before_phase_2"));
    assert_eq!(h.decisions().last(), Some(&RoundDecision::Failed));
}

#[test]
fn test_degenerate_baseline_is_fatal() {
    let config = phase_stage(&["inf"]);
    let mut h = Harness::new(vec![ScriptedImage::ZeroResidual]);
    assert!(matches!(
        h.run(&config),
        Err(ControllerError::Round {
            round: 0,
            source: RoundError::Quality(QualityError::DegenerateNoise { .. }),
            ..
        })
    ));
    assert!(h.solver.solves.is_empty());
}

#[test]
fn test_insufficient_data_aborts_by_default() {
    let config = phase_stage(&["inf", "30s", "10s"]);
    let mut h = Harness::with_scores(&[1.0, 2.0, 3.0]);
    h.solver.insufficient = vec![TableId::new("phase", 2)];
    match h.run(&config) {
        Err(ControllerError::Round { round, source, .. }) => {
            assert_eq!(round, 2);
            assert!(source.is_insufficient_data());
        }
        other => panic!("Expected insufficient data, got {other:?}"),
    }
    assert_eq!(ids(h.dataset.applied_tables()), ["phase_1"]);
}

#[test]
fn test_insufficient_data_can_be_skipped() {
    let mut config = phase_stage(&["inf", "30s", "10s"]);
    config.insufficient_data_policy = InsufficientDataPolicy::Skip;
    let mut h = Harness::with_scores(&[1.0, 2.0, 3.0]);
    h.solver.insufficient = vec![TableId::new("phase", 2)];
    let report = h.run(&config).unwrap();

    assert_eq!(report.outcome, ControllerState::Exhausted);
    assert_eq!(report.skipped, [2]);
    assert_eq!(report.rounds_attempted, 3);
    assert_eq!(report.history, [1.0, 2.0, 3.0]);
    assert_eq!(ids(&report.committed), ["phase_1", "phase_3"]);
    assert!(!h.store.contains("before_phase_2"));
    assert_eq!(
        h.decisions(),
        [
            RoundDecision::Baseline,
            RoundDecision::Committed,
            RoundDecision::Skipped,
            RoundDecision::Committed
        ]
    );
}

#[test]
fn test_other_failures_are_not_skipped() {
    let mut config = phase_stage(&["inf", "30s"]);
    config.insufficient_data_policy = InsufficientDataPolicy::Skip;
    let mut h = Harness::with_scores(&[1.0, 2.0]);
    h.solver.failing = vec![TableId::new("phase", 1)];
    assert!(matches!(
        h.run(&config),
        Err(ControllerError::Round { round: 1, .. })
    ));
}

/// Saves checkpoints, but can't restore them.
#[derive(Default)]
struct WriteOnlyStore(MemoryCheckpointStore);

impl CheckpointStore for WriteOnlyStore {
    fn save(&mut self, dataset: &Dataset, label: &str) -> Result<CheckpointId, CheckpointError> {
        self.0.save(dataset, label)
    }

    fn restore(&mut self, _dataset: &mut Dataset, label: &str) -> Result<(), CheckpointError> {
        Err(CheckpointError::NotFound(label.to_string()))
    }

    fn delete(&mut self, label: &str) -> Result<(), CheckpointError> {
        self.0.delete(label)
    }

    fn labels(&self) -> Vec<String> {
        self.0.labels()
    }

    fn id_of(&self, label: &str) -> Option<CheckpointId> {
        self.0.id_of(label)
    }
}

#[test]
fn test_failed_rollbacks_keep_the_round_error() {
    let config = phase_stage(&["inf"]);
    let mut solver = MockSolver {
        failing: vec![TableId::new("phase", 1)],
        ..Default::default()
    };
    let mut imager = ScriptedImager::with_scores(&[1.0]);
    let mut store = WriteOnlyStore::default();
    let mut dataset = test_dataset();
    let mut executor =
        RoundExecutor::new(&mut solver, &mut imager, &mut store, NoiseRegion::default());
    let mut controller = ConvergenceController::new(&config, None).unwrap();
    let result = controller.run(
        &mut dataset,
        &mut executor,
        &mut CollectedDiagnostics::default(),
    );
    match result {
        Err(ControllerError::RollbackAfterFailure {
            stage,
            round,
            round_error,
            source,
        }) => {
            assert_eq!(stage, "phase");
            assert_eq!(round, 1);
            assert!(matches!(round_error, RoundError::Solve(_)));
            assert!(matches!(
                *source,
                ControllerError::Checkpoint(CheckpointError::NotFound(_))
            ));
        }
        other => panic!("Expected a failed rollback, got {other:?}"),
    }
    assert_eq!(controller.state(), ControllerState::Terminal);
}

#[test]
fn test_already_calibrated_reuses_the_recorded_baseline() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let record = QualityRecord::new(tmp_dir.path().join("quality.tsv"));
    record.append("test", 5.0).unwrap();
    record.append("test", 9.0).unwrap();

    let config = phase_stage(&["inf", "30s"]);
    let mut h = Harness::with_scores(&[6.0, 4.0]);
    h.dataset
        .set_applied(vec![scripted_table(&TableId::new("old", 1), CalMode::Phase)]);
    let mut controller = ConvergenceController::new(&config, None)
        .unwrap()
        .with_quality_record(record.clone());
    let report = h.run_controller(&mut controller).unwrap();

    // The baseline wasn't imaged.
    assert_eq!(h.imager.labels, ["phase_1", "phase_2"]);
    assert_eq!(report.history, [5.0, 6.0]);
    assert_eq!(record.first("test").unwrap(), Some(5.0));
    let contents = std::fs::read_to_string(record.path()).unwrap();
    assert_eq!(contents.lines().count(), 3);
}

#[test]
fn test_already_calibrated_without_a_score_accepts_the_first_round() {
    let config = phase_stage(&["inf", "30s", "10s"]);
    let mut h = Harness::with_scores(&[0.5, 0.4]);
    h.solver.calibrated = Some(true);
    let report = h.run(&config).unwrap();

    assert_eq!(report.history, [0.5]);
    assert_eq!(ids(&report.committed), ["phase_1"]);
    assert_eq!(report.outcome, ControllerState::RolledBack);
    assert_eq!(h.decisions()[0], RoundDecision::Baseline);
    assert!(h.diagnostics.0[0].score.is_none());
}

#[test]
fn test_fresh_baselines_are_recorded() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let record = QualityRecord::new(tmp_dir.path().join("quality.tsv"));
    let config = phase_stage(&["inf"]);
    let mut h = Harness::with_scores(&[1.25, 2.0]);
    let mut controller = ConvergenceController::new(&config, None)
        .unwrap()
        .with_quality_record(record.clone());
    h.run_controller(&mut controller).unwrap();

    assert_eq!(h.imager.labels, ["round0", "phase_1"]);
    assert_eq!(record.first("test").unwrap(), Some(1.25));
}

#[test]
fn test_seeded_baseline() {
    let config = phase_stage(&["inf", "30s"]);
    let mut h = Harness::with_scores(&[11.0, 12.0]);
    let mut controller = ConvergenceController::new(&config, None)
        .unwrap()
        .with_baseline(10.0);
    let report = h.run_controller(&mut controller).unwrap();
    assert_eq!(report.history, [10.0, 11.0, 12.0]);
    assert_eq!(h.imager.labels, ["phase_1", "phase_2"]);
}

#[test]
fn test_overrides_are_used_per_round() {
    let mut config = phase_stage(&["inf", "30s", "10s"]);
    config.overrides = RoundOverrides::new(indexmap! {
        RoundParameter::MinSnr => vec![OverrideValue::Int(5), OverrideValue::Float(4.5), OverrideValue::Int(3)],
        RoundParameter::Niter => vec![OverrideValue::Int(100), OverrideValue::Int(200), OverrideValue::Int(300)],
        RoundParameter::Combine => vec![
            OverrideValue::Text("scan,spw".to_string()),
            OverrideValue::Text("spw".to_string()),
            OverrideValue::Text("".to_string()),
        ],
    })
    .unwrap();
    let mut h = Harness::with_scores(&[1.0, 2.0, 3.0, 4.0]);
    h.run(&config).unwrap();

    let min_snrs = h
        .solver
        .solves
        .iter()
        .map(|s| s.params.min_snr)
        .collect::<Vec<_>>();
    assert_eq!(min_snrs, [5.0, 4.5, 3.0]);
    let combines = h
        .solver
        .solves
        .iter()
        .map(|s| s.params.combine.len())
        .collect::<Vec<_>>();
    assert_eq!(combines, [2, 1, 0]);
    // The baseline is imaged with the dataset's own parameters.
    let niters = h.imager.params.iter().map(|p| p.niter).collect::<Vec<_>>();
    assert_eq!(
        niters,
        [h.dataset.imaging_params().niter, 100, 200, 300]
    );
}

#[test]
fn test_amplitude_stages_need_a_table() {
    let config = StageConfig::new(
        StageMode::AmplitudePhase,
        SolutionIntervalSequence::parse(&["inf"]).unwrap(),
    );
    assert!(matches!(
        ConvergenceController::new(&config, None),
        Err(ConfigurationError::MissingInheritedTable { .. })
    ));

    let table = scripted_table(&TableId::new("phase", 2), CalMode::Phase);
    let controller = ConvergenceController::new(&config, Some(table.clone())).unwrap();
    assert_eq!(controller.inherited(), Some(&table));

    let mut config = config;
    config.initial_table = Some(table.clone());
    let controller = ConvergenceController::new(&config, None).unwrap();
    assert_eq!(controller.inherited(), Some(&table));
}

#[test]
fn test_json_lines_diagnostics() {
    let mut sink = JsonLinesDiagnostics::new(vec![]);
    sink.emit(&RoundDiagnostic {
        stage: "phase".to_string(),
        round: 0,
        table: None,
        solint: None,
        score: Some(3.5),
        peak: Some(7.0),
        noise: Some(2.0),
        decision: RoundDecision::Baseline,
    });
    sink.emit(&RoundDiagnostic {
        stage: "phase".to_string(),
        round: 1,
        table: Some("phase_1".to_string()),
        solint: Some("inf".to_string()),
        score: Some(4.0),
        peak: Some(8.0),
        noise: Some(2.0),
        decision: RoundDecision::RolledBack,
    });
    let bytes = sink.into_inner();
    let text = String::from_utf8(bytes).unwrap();
    let lines = text.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 2);

    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["decision"], "baseline");
    assert!(first["table"].is_null());
    let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second["decision"], "rolled_back");
    assert_eq!(second["table"], "phase_1");
    assert_eq!(second["noise"], 2.0);
}

#[test]
#[serial]
fn test_runs_with_progress_bars() {
    PROGRESS_BARS.store(true);
    let config = phase_stage(&["inf", "30s"]);
    let mut h = Harness::with_scores(&[1.0, 2.0, 3.0]);
    let result = h.run(&config);
    PROGRESS_BARS.store(false);
    assert!(result.is_ok(), "{:?}", result.unwrap_err());
}
