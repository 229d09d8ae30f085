// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use ndarray::prelude::*;
use num_complex::Complex;
use tempfile::TempDir;

use crate::*;
use selfcal::{CalMode, CalibrationTable, SolutionInterval, TableId};

#[test]
fn test_table_info() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let file = tmp_dir.path().join("p_2.cal");
    let table = CalibrationTable {
        id: TableId::new("p", 2),
        mode: CalMode::Phase,
        solint: SolutionInterval::Infinite,
        ref_antenna: 1,
        gains: Array2::from_elem((5, 2), Complex::new(1.0, 0.0)),
        flagged_antennas: vec![3],
    };
    table.write(&file).unwrap();

    let cmd = selfcal()
        .args(["table-info", &file.display().to_string(), "--gains"])
        .ok();
    assert!(cmd.is_ok(), "table-info failed: {}", cmd.err().unwrap());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stdout.contains("ID: p_2"), "{stdout}");
    assert!(stdout.contains("Mode: p"), "{stdout}");
    assert!(stdout.contains("Reference antenna: 1"), "{stdout}");
    assert!(stdout.contains("5 antennas, 2 polarisations"), "{stdout}");
    assert!(stdout.contains("Flagged antennas: 3"), "{stdout}");
    assert!(stdout.contains("(flagged)"), "{stdout}");
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
}

#[test]
fn test_table_info_not_a_table() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let file = tmp_dir.path().join("junk.cal");
    std::fs::write(&file, b"not a table at all").unwrap();

    let cmd = selfcal()
        .args(["table-info", &file.display().to_string()])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.starts_with("Error:"), "{stderr}");
}
