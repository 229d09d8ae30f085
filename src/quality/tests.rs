// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;

use approx::assert_abs_diff_eq;
use ndarray::prelude::*;
use tempfile::TempDir;

use super::*;

/// A residual image that's +-`noise` in a checkerboard, so its RMS is
/// exactly `noise`.
fn checkerboard(dim: (usize, usize), noise: f64) -> Array2<f64> {
    Array2::from_shape_fn(dim, |(r, c)| if (r + c) % 2 == 0 { noise } else { -noise })
}

#[test]
fn test_score() {
    let mut restored = Array2::zeros((100, 100));
    restored[(50, 50)] = 10.0;
    restored[(20, 70)] = 4.0;
    let residual = checkerboard((100, 100), 0.5);

    let result = score(restored.view(), residual.view(), NoiseRegion::default());
    assert!(result.is_ok(), "{:?}", result.unwrap_err());
    let q = result.unwrap();
    assert_abs_diff_eq!(q.peak, 10.0);
    assert_abs_diff_eq!(q.noise, 0.5);
    assert_abs_diff_eq!(q.score, 20.0);
}

#[test]
fn test_score_is_generic_over_precision() {
    let mut restored = Array2::<f32>::zeros((8, 8));
    restored[(3, 3)] = 3.0;
    let residual = Array2::<f32>::from_elem((8, 8), 0.25);
    let q = score(restored.view(), residual.view(), NoiseRegion::Corner { size: 4 }).unwrap();
    assert_abs_diff_eq!(q.score, 12.0, epsilon = 1e-6);
}

#[test]
fn test_score_ignores_non_finite_pixels() {
    let mut restored = Array2::from_elem((10, 10), 1.0);
    restored[(0, 0)] = f64::INFINITY;
    restored[(1, 1)] = f64::NAN;
    restored[(5, 5)] = 2.0;
    let mut residual = checkerboard((10, 10), 0.1);
    residual[(0, 1)] = f64::NAN;
    residual[(2, 2)] = f64::NEG_INFINITY;

    let q = score(restored.view(), residual.view(), NoiseRegion::default()).unwrap();
    assert_abs_diff_eq!(q.peak, 2.0);
    assert_abs_diff_eq!(q.noise, 0.1, epsilon = 1e-12);
}

#[test]
fn test_noise_only_comes_from_the_region() {
    let restored = Array2::from_elem((10, 10), 6.0);
    let mut residual = Array2::from_elem((10, 10), 100.0);
    residual.slice_mut(s![6..8, 2..5]).fill(2.0);

    let region = NoiseRegion::from_box([6, 8, 2, 5]);
    let q = score(restored.view(), residual.view(), region).unwrap();
    assert_abs_diff_eq!(q.noise, 2.0);
    assert_abs_diff_eq!(q.score, 3.0);
}

#[test]
fn test_zero_noise_is_degenerate() {
    let restored = Array2::from_elem((16, 16), 1.0);
    let residual = Array2::zeros((16, 16));
    let result = score(restored.view(), residual.view(), NoiseRegion::default());
    assert!(matches!(
        result,
        Err(QualityError::DegenerateNoise { noise }) if noise == 0.0
    ));
}

#[test]
fn test_non_finite_noise_is_degenerate() {
    let restored = Array2::from_elem((16, 16), 1.0);
    let residual = Array2::from_elem((16, 16), f64::NAN);
    let result = score(restored.view(), residual.view(), NoiseRegion::default());
    assert!(matches!(result, Err(QualityError::DegenerateNoise { .. })));
}

#[test]
fn test_no_signal() {
    let restored = Array2::from_elem((4, 4), f64::NAN);
    let residual = checkerboard((4, 4), 1.0);
    let result = score(restored.view(), residual.view(), NoiseRegion::default());
    assert!(matches!(result, Err(QualityError::NoSignal)));
}

#[test]
fn test_bad_noise_regions() {
    let restored = Array2::from_elem((10, 10), 1.0);
    let residual = checkerboard((10, 10), 1.0);
    for region in [
        NoiseRegion::Corner { size: 0 },
        NoiseRegion::from_box([0, 11, 0, 5]),
        NoiseRegion::from_box([5, 5, 0, 5]),
        NoiseRegion::from_box([0, 5, 7, 3]),
    ] {
        let result = score(restored.view(), residual.view(), region);
        assert!(
            matches!(result, Err(QualityError::BadNoiseRegion { .. })),
            "{region} should be rejected"
        );
    }
}

#[test]
fn test_quality_record() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let record = QualityRecord::new(tmp_dir.path().join("quality.tsv"));
    // No file is fine.
    assert_eq!(record.first("target").unwrap(), None);

    record.append("target", 12.5).unwrap();
    record.append("other", 3.0).unwrap();
    record.append("target", 20.0).unwrap();
    assert_eq!(record.first("target").unwrap(), Some(12.5));
    assert_eq!(record.first("other").unwrap(), Some(3.0));
    assert_eq!(record.first("nothing").unwrap(), None);

    let contents = std::fs::read_to_string(record.path()).unwrap();
    assert_eq!(contents.lines().count(), 3);
    for line in contents.lines() {
        let time = line.split('\t').nth(2).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(time).is_ok(), "{time}");
    }
}

#[test]
fn test_quality_record_rejects_garbage() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let file = tmp_dir.path().join("quality.tsv");
    let mut f = std::fs::File::create(&file).unwrap();
    writeln!(f, "target\tlots\t2024-01-01T00:00:00Z").unwrap();
    writeln!(f, "just one field").unwrap();
    drop(f);

    let record = QualityRecord::new(&file);
    assert!(matches!(
        record.first("target"),
        Err(QualityRecordError::BadLine { line_num: 1, .. })
    ));
    assert!(matches!(
        record.first("elsewhere"),
        Err(QualityRecordError::BadLine { line_num: 2, .. })
    ));
}

#[test]
fn test_quality_record_refuses_unrecordable_names() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let record = QualityRecord::new(tmp_dir.path().join("quality.tsv"));
    for name in ["a\tb", "a\nb", ""] {
        assert!(matches!(
            record.append(name, 1.0),
            Err(QualityRecordError::BadName(_))
        ));
    }
    // Nothing was written, so the record is still readable.
    assert!(!record.path().exists());
    record.append("fine", 2.0).unwrap();
    assert_eq!(record.first("fine").unwrap(), Some(2.0));
}
