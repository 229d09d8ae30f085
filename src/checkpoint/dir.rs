// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Checkpoints kept in a directory, so that they outlive the process.
//!
//! Each snapshot is a gzip-compressed file named after its ID. Inside (little
//! endian): 8 bytes of ASCII "SELFCALC", a u32 format version (1), the u64 ID,
//! the u32 flag dimensions (timesteps, channels, baselines), one byte per
//! flag, a u32 number of applied tables and then each table in the
//! calibration table format. An `index.json` maps labels to IDs.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use indexmap::IndexMap;
use log::{debug, trace};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use super::{restore_state, CheckpointError, CheckpointId, CheckpointStore};
use crate::{
    calibration::io::{read_from, write_to},
    constants::CHECKPOINT_INDEX_FILENAME,
    dataset::{Dataset, DatasetState},
};

const SNAPSHOT_MAGIC: &[u8; 8] = b"SELFCALC";
const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    next_id: u64,
    checkpoints: IndexMap<String, CheckpointId>,
}

pub struct DirCheckpointStore {
    dir: PathBuf,
    index: Index,
}

impl DirCheckpointStore {
    /// Use `dir` for checkpoints, creating it if necessary. Checkpoints saved
    /// there by an earlier process are available.
    pub fn open<P: Into<PathBuf>>(dir: P) -> Result<DirCheckpointStore, CheckpointError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let index_file = dir.join(CHECKPOINT_INDEX_FILENAME);
        let index = if index_file.exists() {
            let index: Index = serde_json::from_reader(BufReader::new(File::open(&index_file)?))?;
            debug!(
                "Found {} existing checkpoints in {}",
                index.checkpoints.len(),
                dir.display()
            );
            index
        } else {
            Index::default()
        };
        Ok(DirCheckpointStore { dir, index })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_file(&self, id: CheckpointId) -> PathBuf {
        self.dir.join(format!("checkpoint_{}.bin.gz", id.0))
    }

    fn write_index(&self) -> Result<(), CheckpointError> {
        // Write then rename, so that the index is never half written.
        let index_file = self.dir.join(CHECKPOINT_INDEX_FILENAME);
        let tmp_file = index_file.with_extension("json.tmp");
        let mut f = BufWriter::new(File::create(&tmp_file)?);
        serde_json::to_writer_pretty(&mut f, &self.index)?;
        f.flush()?;
        drop(f);
        std::fs::rename(&tmp_file, &index_file)?;
        Ok(())
    }
}

fn write_snapshot(file: &Path, id: CheckpointId, state: &DatasetState) -> Result<(), CheckpointError> {
    let to_u32 = |what: &str, n: usize| {
        u32::try_from(n).map_err(|_| CheckpointError::Corrupt {
            file: file.display().to_string(),
            reason: format!("{n} {what} don't fit in the snapshot format"),
        })
    };
    let (num_timesteps, num_channels, num_baselines) = state.flags.dim();
    let dims = [
        to_u32("timesteps", num_timesteps)?,
        to_u32("channels", num_channels)?,
        to_u32("baselines", num_baselines)?,
    ];
    let num_tables = to_u32("applied tables", state.applied.len())?;

    let mut gz = GzEncoder::new(BufWriter::new(File::create(file)?), Compression::fast());
    gz.write_all(SNAPSHOT_MAGIC)?;
    gz.write_u32::<LittleEndian>(SNAPSHOT_FORMAT_VERSION)?;
    gz.write_u64::<LittleEndian>(id.0)?;
    for dim in dims {
        gz.write_u32::<LittleEndian>(dim)?;
    }
    let flags = state.flags.iter().map(|&f| u8::from(f)).collect::<Vec<_>>();
    gz.write_all(&flags)?;
    gz.write_u32::<LittleEndian>(num_tables)?;
    for table in &state.applied {
        write_to(table, &mut gz)?;
    }
    gz.finish()?.flush()?;
    Ok(())
}

fn read_snapshot(file: &Path) -> Result<(CheckpointId, DatasetState), CheckpointError> {
    let file_str = file.display().to_string();
    let corrupt = |reason: String| CheckpointError::Corrupt {
        file: file_str.clone(),
        reason,
    };
    let mut gz = GzDecoder::new(BufReader::new(File::open(file)?));

    let mut magic = [0; 8];
    gz.read_exact(&mut magic)?;
    if &magic != SNAPSHOT_MAGIC {
        return Err(corrupt(format!(
            "expected SELFCALC as the first 8 characters, got '{}'",
            String::from_utf8_lossy(&magic)
        )));
    }
    let version = gz.read_u32::<LittleEndian>()?;
    if version != SNAPSHOT_FORMAT_VERSION {
        return Err(corrupt(format!("unknown format version {version}")));
    }
    let id = CheckpointId(gz.read_u64::<LittleEndian>()?);

    let num_timesteps = gz.read_u32::<LittleEndian>()? as usize;
    let num_channels = gz.read_u32::<LittleEndian>()? as usize;
    let num_baselines = gz.read_u32::<LittleEndian>()? as usize;
    let num_flags = num_timesteps
        .checked_mul(num_channels)
        .and_then(|n| n.checked_mul(num_baselines))
        .ok_or_else(|| {
            corrupt(format!(
                "flag dimensions {num_timesteps}x{num_channels}x{num_baselines} are too big"
            ))
        })?;
    // Corrupt dimensions mustn't cause a huge allocation.
    let mut flag_bytes = vec![];
    (&mut gz)
        .take(num_flags as u64)
        .read_to_end(&mut flag_bytes)?;
    if flag_bytes.len() != num_flags {
        return Err(corrupt(format!(
            "expected {num_flags} flags, but only {} are there",
            flag_bytes.len()
        )));
    }
    let flags = Array3::from_shape_vec(
        (num_timesteps, num_channels, num_baselines),
        flag_bytes.into_iter().map(|b| b != 0).collect(),
    )
    .map_err(|e| corrupt(e.to_string()))?;

    let num_tables = gz.read_u32::<LittleEndian>()? as usize;
    let applied = (0..num_tables)
        .map(|_| read_from(&mut gz, &file_str))
        .collect::<Result<Vec<_>, _>>()?;

    let mut trailing = vec![];
    gz.read_to_end(&mut trailing)?;
    if !trailing.is_empty() {
        return Err(corrupt(format!("{} unexpected trailing bytes", trailing.len())));
    }

    Ok((id, DatasetState { flags, applied }))
}

impl CheckpointStore for DirCheckpointStore {
    fn save(&mut self, dataset: &Dataset, label: &str) -> Result<CheckpointId, CheckpointError> {
        let id = CheckpointId(self.index.next_id);
        write_snapshot(&self.snapshot_file(id), id, dataset.state())?;
        self.index.next_id += 1;

        if let Some(old_id) = self.index.checkpoints.shift_remove(label) {
            trace!("Overwriting checkpoint '{label}' ({old_id})");
            remove_if_exists(&self.snapshot_file(old_id))?;
        }
        self.index.checkpoints.insert(label.to_string(), id);
        self.write_index()?;
        trace!("Saved checkpoint '{label}' ({id}) in {}", self.dir.display());
        Ok(id)
    }

    fn restore(&mut self, dataset: &mut Dataset, label: &str) -> Result<(), CheckpointError> {
        let id = self
            .index
            .checkpoints
            .get(label)
            .copied()
            .ok_or_else(|| CheckpointError::NotFound(label.to_string()))?;
        let file = self.snapshot_file(id);
        let (file_id, state) = read_snapshot(&file)?;
        if file_id != id {
            return Err(CheckpointError::Corrupt {
                file: file.display().to_string(),
                reason: format!("expected checkpoint {id}, found {file_id}"),
            });
        }
        restore_state(dataset, state, label)?;
        trace!("Restored checkpoint '{label}' ({id})");
        Ok(())
    }

    fn delete(&mut self, label: &str) -> Result<(), CheckpointError> {
        if let Some(id) = self.index.checkpoints.shift_remove(label) {
            remove_if_exists(&self.snapshot_file(id))?;
            self.write_index()?;
            trace!("Deleted checkpoint '{label}' ({id})");
        }
        Ok(())
    }

    fn labels(&self) -> Vec<String> {
        self.index.checkpoints.keys().cloned().collect()
    }

    fn id_of(&self, label: &str) -> Option<CheckpointId> {
        self.index.checkpoints.get(label).copied()
    }
}

fn remove_if_exists(file: &Path) -> Result<(), std::io::Error> {
    match std::fs::remove_file(file) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
