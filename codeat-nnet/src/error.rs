//! Errors raised by the adaptation training core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CodeatError>;

#[derive(Debug, Error)]
pub enum CodeatError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("all the updates are disabled in training mode")]
    NoUpdatesEnabled,

    #[error("{update} update is enabled but no {destination} output is configured")]
    MissingDestination {
        update: &'static str,
        destination: &'static str,
    },

    #[error("the adaptation network has no adaptive layers")]
    NoAdaptiveLayers,

    #[error("inconsistent code dimensions: layer {layer} has {actual}, expected {expected}")]
    InconsistentCodeDim {
        layer: usize,
        expected: usize,
        actual: usize,
    },

    #[error("code for group {key} has dimension {actual}, expected {expected}")]
    CodeDimMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },

    #[error("no code for group {0}")]
    MissingCode(String),

    #[error("code for group {0} already exists in the output store")]
    DuplicateKey(String),

    #[error("code mirrors diverged after update: layer {layer} differs from layer {reference}")]
    MirrorDivergence { layer: usize, reference: usize },

    #[error("cache is full ({capacity} entries)")]
    CacheFull { capacity: usize },

    #[error("cache is empty")]
    CacheEmpty,

    #[error("label count {labels} does not match frame count {frames}")]
    LabelMismatch { frames: usize, labels: usize },

    #[error("feature dimension {actual} does not match cached dimension {expected}")]
    FeatureDimMismatch { expected: usize, actual: usize },

    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("label {label} is out of range for {classes} classes")]
    LabelOutOfRange { label: usize, classes: usize },

    #[error(transparent)]
    Source(#[from] anyhow::Error),
}
