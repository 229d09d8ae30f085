// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end runs with shell scripts standing in for the external programs.

use std::{io::Write, path::Path};

use indoc::indoc;
use ndarray::prelude::*;
use num_complex::Complex;
use tempfile::TempDir;

use crate::*;
use selfcal::{CalMode, CalibrationTable, SolutionInterval, TableId};

/// Write an executable shell script.
#[cfg(unix)]
fn write_script(dir: &Path, name: &str, contents: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).expect("couldn't make file");
    f.write_all(contents.as_bytes()).unwrap();
    drop(f);
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.display().to_string()
}

/// An imager that always produces the same images. The request file is named
/// `image_<label>.json` and the images are expected next to it.
#[cfg(unix)]
fn write_imager(dir: &Path, peak: f64) -> String {
    let (restored, residual) = write_image_pair(dir, peak);
    let script = format!(
        indoc! {r#"
            #!/bin/sh
            dir=$(dirname "$1")
            label=$(basename "$1" .json)
            label=${{label#image_}}
            cp "{}" "$dir/$label.image"
            cp "{}" "$dir/$label.residual"
        "#},
        restored.display(),
        residual.display()
    );
    write_script(dir, "imager.sh", &script)
}

/// A solver that always "solves" for the same table. The request file is
/// named `solve_<id>.json` and the table is expected next to it as `<id>.cal`.
#[cfg(unix)]
fn write_solver(dir: &Path) -> String {
    let table_file = dir.join("template.cal");
    CalibrationTable {
        id: TableId::new("template", 1),
        mode: CalMode::Phase,
        solint: SolutionInterval::Infinite,
        ref_antenna: 0,
        gains: Array2::from_shape_fn((4, 2), |(a, _)| {
            Complex::from_polar(1.0, 0.1 * a as f64)
        }),
        flagged_antennas: vec![],
    }
    .write(&table_file)
    .unwrap();
    let script = format!(
        indoc! {r#"
            #!/bin/sh
            dir=$(dirname "$1")
            id=$(basename "$1" .json)
            id=${{id#solve_}}
            cp "{}" "$dir/$id.cal"
        "#},
        table_file.display()
    );
    write_script(dir, "solver.sh", &script)
}

/// An imager whose image peak depends on the label of what's being imaged.
#[cfg(unix)]
fn write_labelled_imager(dir: &Path, peaks: &[(&str, f64)]) -> String {
    let images = dir.join("images");
    for (label, peak) in peaks {
        let label_dir = images.join(label);
        std::fs::create_dir_all(&label_dir).unwrap();
        write_image_pair(&label_dir, *peak);
    }
    let script = format!(
        indoc! {r#"
            #!/bin/sh
            dir=$(dirname "$1")
            label=$(basename "$1" .json)
            label=${{label#image_}}
            cp "{images}/$label/model.image" "$dir/$label.image"
            cp "{images}/$label/model.residual" "$dir/$label.residual"
        "#},
        images = images.display()
    );
    write_script(dir, "imager.sh", &script)
}

#[test]
#[cfg(unix)]
fn test_improving_rounds_are_committed_and_written() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let solver = write_solver(tmp_dir.path());
    let imager = write_labelled_imager(
        tmp_dir.path(),
        &[("round0", 10.0), ("phase_1", 20.0), ("phase_2", 30.0)],
    );
    let out = tmp_dir.path().join("out");
    let checkpoints = tmp_dir.path().join("checkpoints");

    #[rustfmt::skip]
    let cmd = selfcal()
        .args([
            "run",
            "--name", "obs",
            "--shape", "2", "4", "6",
            "--solints", "inf,30s",
            "--solve-command", &solver,
            "--apply-command", "true",
            "--image-command", &imager,
            "--output-dir", &out.display().to_string(),
            "--checkpoint-dir", &checkpoints.display().to_string(),
            "--no-progress-bars",
        ])
        .ok();
    assert!(cmd.is_ok(), "run failed: {}", cmd.err().unwrap());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stdout.contains("CONVERGED after 2 rounds"), "{stdout}");
    assert!(stdout.contains("Final table: phase_2 (before_phase_2)"), "{stdout}");
    assert!(stdout.contains("Chain's final table: phase_2"), "{stdout}");
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");

    // The baseline and both rounds were recorded.
    let record = std::fs::read_to_string(out.join("selfcal_quality.tsv")).unwrap();
    let scores = record
        .lines()
        .map(|l| l.split('\t').nth(1).unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(scores, ["10", "20", "30"], "{record}");
    assert!(checkpoints.join("index.json").exists());

    // Both the stage's table and the chain's are written, and readable.
    assert!(out.join("phase_2.cal").exists());
    let final_table = out.join("final.cal");
    assert!(final_table.exists());
    let cmd = selfcal()
        .args(["table-info", &final_table.display().to_string()])
        .ok();
    assert!(cmd.is_ok(), "table-info failed: {}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("ID: phase_2"), "{stdout}");
    assert!(stdout.contains("Mode: p"), "{stdout}");
    assert!(stdout.contains("4 antennas, 2 polarisations"), "{stdout}");
}

#[test]
#[cfg(unix)]
fn test_insufficient_data_everywhere_is_skipped() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let imager = write_imager(tmp_dir.path(), 10.0);
    let solver = write_script(tmp_dir.path(), "solver.sh", "#!/bin/sh\nexit 2\n");
    let out = tmp_dir.path().join("out");

    #[rustfmt::skip]
    let cmd = selfcal()
        .args([
            "run",
            "--name", "obs",
            "--shape", "2", "4", "6",
            "--solints", "inf,30s",
            "--insufficient-data", "skip",
            "--solve-command", &solver,
            "--apply-command", "true",
            "--image-command", &imager,
            "--output-dir", &out.display().to_string(),
            "--no-progress-bars",
        ])
        .ok();
    assert!(cmd.is_ok(), "run failed: {}", cmd.err().unwrap());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stdout.contains("EXHAUSTED"), "{stdout}");
    assert!(stdout.contains("Nothing committed"), "{stdout}");
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");

    // Only the baseline made it into the quality record.
    let record = std::fs::read_to_string(out.join("selfcal_quality.tsv")).unwrap();
    let lines = record.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 1, "{record}");
    assert!(lines[0].starts_with("obs\t10"), "{record}");
    // No tables were written.
    assert!(!out.join("final.cal").exists());
}

#[test]
#[cfg(unix)]
fn test_insufficient_data_aborts_by_default() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let imager = write_imager(tmp_dir.path(), 10.0);
    let solver = write_script(tmp_dir.path(), "solver.sh", "#!/bin/sh\nexit 2\n");
    let out = tmp_dir.path().join("out");

    #[rustfmt::skip]
    let cmd = selfcal()
        .args([
            "run",
            "--name", "obs",
            "--shape", "2", "4", "6",
            "--solve-command", &solver,
            "--apply-command", "true",
            "--image-command", &imager,
            "--output-dir", &out.display().to_string(),
            "--no-quality-record",
            "--no-progress-bars",
        ])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.starts_with("Error:"), "{stderr}");
    assert!(!out.join("selfcal_quality.tsv").exists());
}

#[test]
fn test_failing_imager_is_an_error() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let out = tmp_dir.path().join("out");

    #[rustfmt::skip]
    let cmd = selfcal()
        .args([
            "run",
            "--name", "obs",
            "--shape", "2", "4", "6",
            "--solve-command", "true",
            "--apply-command", "true",
            "--image-command", "false",
            "--output-dir", &out.display().to_string(),
            "--no-progress-bars",
        ])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.starts_with("Error:"), "{stderr}");
}

#[test]
fn test_dry_run_with_arg_file() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let args_file = tmp_dir.path().join("selfcal.toml");
    std::fs::write(
        &args_file,
        indoc! {r#"
            name = "obs"
            shape = [2, 4, 6]
            stages = ["p=phase", "final=ap"]
            solints = ["inf,30s,10s", "inf"]
            overrides = ["p:min_snr=5,4,3"]
            solve_command = "solve"
            apply_command = "apply"
            image_command = "image"
        "#},
    )
    .unwrap();
    let saved = tmp_dir.path().join("saved.toml");

    let cmd = selfcal()
        .args([
            "run",
            &args_file.display().to_string(),
            "--dry-run",
            "--save-toml",
            &saved.display().to_string(),
        ])
        .ok();
    assert!(cmd.is_ok(), "dry run failed: {}", cmd.err().unwrap());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stdout.contains("Stage 'p'"), "{stdout}");
    assert!(stdout.contains("Stage 'final'"), "{stdout}");
    assert!(stdout.contains("Dry run"), "{stdout}");
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");

    let saved = std::fs::read_to_string(saved).unwrap();
    assert!(saved.contains("final=ap"), "{saved}");
}

#[test]
fn test_bad_config_is_an_error() {
    #[rustfmt::skip]
    let cmd = selfcal()
        .args([
            "run",
            "--name", "obs",
            "--shape", "2", "4", "6",
            "--stages", "amp",
            "--solve-command", "solve",
            "--apply-command", "apply",
            "--image-command", "image",
            "--dry-run",
        ])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.starts_with("Error:"), "{stderr}");
}
