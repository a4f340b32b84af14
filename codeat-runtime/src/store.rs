//! File-backed collaborators for the `codeat-train` binary.

use anyhow::{anyhow, Result};
use codeat_nnet::{CodeStore, MemoryCodes, MemoryFeatures, MemoryLabels, ModelSink, Nnet, NnetRecord};
use codeat_utils::{read_obj, write_obj, TokenListReader};
use ndarray::{Array1, ArrayView1};
use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

pub fn load_nnet(path: &Path) -> Result<Nnet> {
    let record: NnetRecord = read_obj(path)?;
    let nnet = Nnet::from_record(record)
        .map_err(|e| anyhow!("Invalid network in {}: {}", path.display(), e))?;
    info!(
        "Loaded {} components from {}",
        nnet.num_components(),
        path.display()
    );
    Ok(nnet)
}

/// Feature archive: `{ "utt": [[f32; D]; T], ... }`.
pub fn load_features(path: &Path) -> Result<MemoryFeatures> {
    let archive: HashMap<String, Vec<Vec<f32>>> = read_obj(path)?;
    let features = MemoryFeatures::from_archive(archive)
        .map_err(|e| anyhow!("Invalid feature archive {}: {}", path.display(), e))?;
    info!("Loaded {} feature matrices", features.len());
    Ok(features)
}

/// Alignment archive: `{ "utt": [target; T], ... }`.
pub fn load_labels(path: &Path) -> Result<MemoryLabels> {
    let archive: HashMap<String, Vec<usize>> = read_obj(path)?;
    Ok(MemoryLabels::from_archive(archive))
}

/// Code archive: `{ "group": [f32; C], ... }`.
pub fn load_codes(path: &Path) -> Result<MemoryCodes> {
    let archive: BTreeMap<String, Vec<f32>> = read_obj(path)?;
    let codes = MemoryCodes::from_archive(archive);
    info!("Loaded {} group codes", codes.len());
    Ok(codes)
}

/// Group list with one `group utt1 utt2 ...` line per group, read lazily.
pub fn open_groups(path: &Path) -> Result<TokenListReader<BufReader<File>>> {
    let file =
        File::open(path).map_err(|e| anyhow!("Failed to open {}: {}", path.display(), e))?;
    Ok(TokenListReader::new(BufReader::new(file)))
}

/// Output code archive. Codes are buffered in memory and the whole archive is
/// rewritten once every `flush_interval` groups, and again by [`flush`] at
/// the end of the run. Each rewrite serializes every code written so far, so
/// a run over `G` groups writes `O(G² / flush_interval)` codes in total.
///
/// [`flush`]: CodeArchive::flush
pub struct CodeArchive {
    path: PathBuf,
    compress: bool,
    flush_interval: usize,
    pending: usize,
    codes: MemoryCodes,
}

impl CodeArchive {
    pub fn new(path: PathBuf, compress: bool, flush_interval: usize) -> Self {
        Self {
            path,
            compress,
            flush_interval: flush_interval.max(1),
            pending: 0,
            codes: MemoryCodes::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Rewrites the archive if any code was written since the last rewrite.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending == 0 {
            return Ok(());
        }
        write_obj(&self.path, &self.codes.to_archive(), self.compress)?;
        debug!(
            "Code archive {} holds {} groups",
            self.path.display(),
            self.codes.len()
        );
        self.pending = 0;
        Ok(())
    }
}

impl CodeStore for CodeArchive {
    fn has_key(&self, key: &str) -> bool {
        self.codes.has_key(key)
    }

    fn read(&self, key: &str) -> Result<Array1<f32>> {
        self.codes.read(key)
    }

    fn write(&mut self, key: &str, code: ArrayView1<f32>) -> Result<()> {
        self.codes.write(key, code)?;
        self.pending += 1;
        if self.pending >= self.flush_interval {
            self.flush()?;
        }
        Ok(())
    }
}

/// Writes the adaptation network as an [`NnetRecord`].
pub struct ModelFile {
    path: PathBuf,
    compress: bool,
}

impl ModelFile {
    pub fn new(path: PathBuf, compress: bool) -> Self {
        Self { path, compress }
    }
}

impl ModelSink for ModelFile {
    fn write(&mut self, nnet: &Nnet) -> Result<()> {
        write_obj(&self.path, &nnet.to_record(), self.compress)?;
        info!("Written adapted network to {}", self.path.display());
        Ok(())
    }
}
