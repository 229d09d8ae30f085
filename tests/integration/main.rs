// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod run;
mod score;
mod table_info;

use std::{
    path::{Path, PathBuf},
    process::Output,
    str::from_utf8,
};

use assert_cmd::{output::OutputError, Command};
use ndarray::prelude::*;

use selfcal::backend::write_image;

fn selfcal() -> Command {
    Command::cargo_bin("selfcal").unwrap()
}

fn get_cmd_output(result: Result<Output, OutputError>) -> (String, String) {
    let output = match result {
        Ok(o) => o,
        Err(o) => o.as_output().unwrap().clone(),
    };
    (
        from_utf8(&output.stdout).unwrap().to_string(),
        from_utf8(&output.stderr).unwrap().to_string(),
    )
}

/// Write a restored image with a single bright pixel of `peak` and a residual
/// image that's a +-1 checkerboard (so the noise RMS is exactly 1).
fn write_image_pair(dir: &Path, peak: f64) -> (PathBuf, PathBuf) {
    let mut restored = Array2::zeros((32, 32));
    restored[(16, 16)] = peak;
    let residual = Array2::from_shape_fn((32, 32), |(r, c)| {
        if (r + c) % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    });

    let restored_file = dir.join("model.image");
    let residual_file = dir.join("model.residual");
    write_image(restored.view(), &restored_file).unwrap();
    write_image(residual.view(), &residual_file).unwrap();
    (restored_file, residual_file)
}
