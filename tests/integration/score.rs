// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use ndarray::prelude::*;
use tempfile::TempDir;

use crate::*;

#[test]
fn test_score_prints_the_score() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let (restored, residual) = write_image_pair(tmp_dir.path(), 25.0);

    let cmd = selfcal()
        .args([
            "score",
            &restored.display().to_string(),
            &residual.display().to_string(),
            "--noise-box",
            "8",
        ])
        .ok();
    assert!(cmd.is_ok(), "score failed: {}", cmd.err().unwrap());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stdout.contains("Score: 25.000000"), "{stdout}");
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
}

#[test]
fn test_score_rejects_zero_noise() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let (restored, _) = write_image_pair(tmp_dir.path(), 25.0);
    let residual = tmp_dir.path().join("flat.residual");
    selfcal::backend::write_image(Array2::<f64>::zeros((32, 32)).view(), &residual).unwrap();

    let cmd = selfcal()
        .args([
            "score",
            &restored.display().to_string(),
            &residual.display().to_string(),
        ])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.starts_with("Error:"), "{stderr}");
}

#[test]
fn test_score_missing_file() {
    let cmd = selfcal()
        .args(["score", "/does/not/exist.image", "/does/not/exist.residual"])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.starts_with("Error:"), "{stderr}");
}
