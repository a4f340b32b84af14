//! Collaborators consumed by the training loop, plus in-memory versions of the
//! data stores.

use crate::{
    matrix::{copy_into, from_rows},
    nnet::{Nnet, NnetRecord},
    Result,
};
use anyhow::anyhow;
use codeat_structs::report::LossReport;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::collections::{BTreeMap, HashMap};

/// Random access to utterance feature matrices (frames × dims).
pub trait FeatureSource {
    fn has_key(&self, utt: &str) -> bool;

    fn get(&mut self, utt: &str) -> anyhow::Result<Array2<f32>>;
}

/// Random access to per-frame integer targets.
pub trait LabelSource {
    fn has_key(&self, utt: &str) -> bool;

    fn get(&mut self, utt: &str) -> anyhow::Result<Vec<usize>>;
}

pub trait CodeStore {
    fn has_key(&self, key: &str) -> bool;

    fn read(&self, key: &str) -> anyhow::Result<Array1<f32>>;

    fn write(&mut self, key: &str, code: ArrayView1<f32>) -> anyhow::Result<()>;
}

/// Feature transform applied before caching; never trained.
pub trait FixedTransform {
    fn forward(&mut self, input: ArrayView2<f32>, out: &mut Array2<f32>) -> Result<()>;
}

pub trait FrozenBackend {
    fn forward(&mut self, input: ArrayView2<f32>, out: &mut Array2<f32>) -> Result<()>;

    fn backward(&mut self, out_diff: ArrayView2<f32>, in_diff: &mut Array2<f32>) -> Result<()>;
}

pub trait LossFunction {
    /// Writes the gradient w.r.t. `predictions` into `grad` and returns the
    /// loss of this bunch. Totals are kept for [`LossFunction::report`].
    fn evaluate(
        &mut self,
        predictions: ArrayView2<f32>,
        labels: &[usize],
        grad: &mut Array2<f32>,
    ) -> Result<f64>;

    fn report(&self) -> LossReport;
}

/// Destination of the adaptation network at the end of a training run.
pub trait ModelSink {
    fn write(&mut self, nnet: &Nnet) -> anyhow::Result<()>;
}

/// Pass-through transform used when no feature transform is configured.
pub struct Identity;

impl FixedTransform for Identity {
    fn forward(&mut self, input: ArrayView2<f32>, out: &mut Array2<f32>) -> Result<()> {
        copy_into(input, out);
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct MemoryFeatures {
    utts: HashMap<String, Array2<f32>>,
}

impl MemoryFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, utt: &str, features: Array2<f32>) {
        self.utts.insert(utt.to_string(), features);
    }

    pub fn from_archive(archive: HashMap<String, Vec<Vec<f32>>>) -> Result<Self> {
        let mut features = Self::new();
        for (utt, rows) in archive {
            let mat = from_rows("feature archive", &rows)?;
            features.utts.insert(utt, mat);
        }
        Ok(features)
    }

    pub fn len(&self) -> usize {
        self.utts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utts.is_empty()
    }
}

impl FeatureSource for MemoryFeatures {
    fn has_key(&self, utt: &str) -> bool {
        self.utts.contains_key(utt)
    }

    fn get(&mut self, utt: &str) -> anyhow::Result<Array2<f32>> {
        self.utts
            .get(utt)
            .cloned()
            .ok_or_else(|| anyhow!("No features for utterance {}", utt))
    }
}

#[derive(Default, Clone)]
pub struct MemoryLabels {
    utts: HashMap<String, Vec<usize>>,
}

impl MemoryLabels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, utt: &str, labels: Vec<usize>) {
        self.utts.insert(utt.to_string(), labels);
    }

    pub fn from_archive(archive: HashMap<String, Vec<usize>>) -> Self {
        Self { utts: archive }
    }
}

impl LabelSource for MemoryLabels {
    fn has_key(&self, utt: &str) -> bool {
        self.utts.contains_key(utt)
    }

    fn get(&mut self, utt: &str) -> anyhow::Result<Vec<usize>> {
        self.utts
            .get(utt)
            .cloned()
            .ok_or_else(|| anyhow!("No labels for utterance {}", utt))
    }
}

/// Code archive held in memory, ordered by key.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct MemoryCodes {
    codes: BTreeMap<String, Array1<f32>>,
}

impl MemoryCodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, code: Array1<f32>) {
        self.codes.insert(key.to_string(), code);
    }

    pub fn get(&self, key: &str) -> Option<&Array1<f32>> {
        self.codes.get(key)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn from_archive(archive: BTreeMap<String, Vec<f32>>) -> Self {
        Self {
            codes: archive
                .into_iter()
                .map(|(key, code)| (key, Array1::from(code)))
                .collect(),
        }
    }

    pub fn to_archive(&self) -> BTreeMap<String, Vec<f32>> {
        self.codes
            .iter()
            .map(|(key, code)| (key.clone(), code.to_vec()))
            .collect()
    }
}

impl CodeStore for MemoryCodes {
    fn has_key(&self, key: &str) -> bool {
        self.codes.contains_key(key)
    }

    fn read(&self, key: &str) -> anyhow::Result<Array1<f32>> {
        self.codes
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("No code for group {}", key))
    }

    fn write(&mut self, key: &str, code: ArrayView1<f32>) -> anyhow::Result<()> {
        self.codes.insert(key.to_string(), code.to_owned());
        Ok(())
    }
}

/// Keeps the last written network as a record.
#[derive(Default)]
pub struct RecordSink {
    pub record: Option<NnetRecord>,
    pub writes: usize,
}

impl ModelSink for RecordSink {
    fn write(&mut self, nnet: &Nnet) -> anyhow::Result<()> {
        self.record = Some(nnet.to_record());
        self.writes += 1;
        Ok(())
    }
}
