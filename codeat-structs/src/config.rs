use crate::serializable_struct_with_getters;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BUNCH_SIZE: usize = 512;
pub const DEFAULT_CACHE_SIZE: usize = 32768;
pub const DEFAULT_SEED: u64 = 777;
// one minute of 10ms frames
pub const DEFAULT_MAX_FRAMES: usize = 6000;

serializable_struct_with_getters! {
    #[serde(default)]
    TrainConfig {
        bunch_size: usize,
        cache_size: usize,
        seed: u64,
        randomize: bool,
        shuffle: bool,
        max_frames: usize,
        cross_validate: bool,
        allow_code_overwrite: bool,
        updates: UpdateFlags,
        train_options: TrainOptions,
        outputs: OutputConfig,
    }
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            bunch_size: DEFAULT_BUNCH_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
            seed: DEFAULT_SEED,
            randomize: true,
            shuffle: true,
            max_frames: DEFAULT_MAX_FRAMES,
            cross_validate: false,
            allow_code_overwrite: false,
            updates: UpdateFlags::default(),
            train_options: TrainOptions::default(),
            outputs: OutputConfig::default(),
        }
    }
}

impl TrainConfig {
    /// Cache capacity actually used: the configured size rounded down to a
    /// multiple of the bunch size.
    pub fn effective_cache_size(&self) -> usize {
        if self.bunch_size == 0 {
            return 0;
        }
        (self.cache_size / self.bunch_size) * self.bunch_size
    }

    /// Whether the adaptation network has to be written at the end of a run.
    pub fn persists_network(&self) -> bool {
        !self.cross_validate && (self.updates.weights || self.updates.code_xform)
    }

    /// Whether group codes have to be written as each group completes.
    pub fn persists_codes(&self) -> bool {
        !self.cross_validate && self.updates.code_vec
    }
}

serializable_struct_with_getters! {
    #[derive(Default, Copy)]
    #[serde(default)]
    UpdateFlags {
        weights: bool,
        code_xform: bool,
        code_vec: bool,
    }
}

impl UpdateFlags {
    pub fn new(weights: bool, code_xform: bool, code_vec: bool) -> Self {
        Self {
            weights,
            code_xform,
            code_vec,
        }
    }

    pub fn any(&self) -> bool {
        self.weights || self.code_xform || self.code_vec
    }

    pub fn none() -> Self {
        Self::default()
    }
}

serializable_struct_with_getters! {
    #[derive(Copy)]
    #[serde(default)]
    TrainOptions {
        learn_rate: f32,
        momentum: f32,
        l2_penalty: f32,
    }
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            learn_rate: 0.008,
            momentum: 0.0,
            l2_penalty: 0.0,
        }
    }
}

impl TrainOptions {
    /// Options that turn every parameter update into a no-op.
    pub fn frozen() -> Self {
        Self {
            learn_rate: 0.0,
            momentum: 0.0,
            l2_penalty: 0.0,
        }
    }
}

serializable_struct_with_getters! {
    #[derive(Default)]
    #[serde(default)]
    OutputConfig {
        adapt_model: Option<String>,
        codes: Option<String>,
        compress: bool,
    }
}
