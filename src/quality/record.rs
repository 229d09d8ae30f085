// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! An append-only record of quality scores, so that a restarted run can reuse
//! a dataset's baseline instead of imaging it again.
//!
//! Each line is `<dataset>\t<score>\t<RFC 3339 time>`.

use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use chrono::{SecondsFormat, Utc};
use log::trace;

use super::QualityRecordError;

#[derive(Debug, Clone)]
pub struct QualityRecord {
    file: PathBuf,
}

impl QualityRecord {
    /// The file doesn't need to exist yet.
    pub fn new<P: Into<PathBuf>>(file: P) -> QualityRecord {
        QualityRecord { file: file.into() }
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    /// The first score recorded for `dataset`, if any.
    pub fn first(&self, dataset: &str) -> Result<Option<f64>, QualityRecordError> {
        let f = match File::open(&self.file) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        for (i, line) in BufReader::new(f).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let bad_line = || QualityRecordError::BadLine {
                file: self.file.display().to_string(),
                line_num: i + 1,
                line: line.clone(),
            };
            let mut fields = line.split('\t');
            let (name, score) = match (fields.next(), fields.next(), fields.next()) {
                (Some(name), Some(score), Some(_)) => (name, score),
                _ => return Err(bad_line()),
            };
            if name == dataset {
                let score = score.parse::<f64>().map_err(|_| bad_line())?;
                return Ok(Some(score));
            }
        }
        Ok(None)
    }

    pub fn append(&self, dataset: &str, score: f64) -> Result<(), QualityRecordError> {
        if dataset.trim().is_empty() || dataset.contains(['\t', '\n', '\r']) {
            return Err(QualityRecordError::BadName(dataset.to_string()));
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file)?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        trace!("Recording score {score} for {dataset} in {}", self.file.display());
        writeln!(f, "{dataset}\t{score}\t{now}")?;
        Ok(())
    }
}
