use crate::serializable_struct_with_getters;
use serde::{Deserialize, Serialize};

serializable_struct_with_getters! {
    #[derive(Default, Copy)]
    #[serde(default)]
    SkipCounts {
        missing_alignment: u64,
        too_long: u64,
        length_mismatch: u64,
    }
}

impl SkipCounts {
    pub fn total(&self) -> u64 {
        self.missing_alignment + self.too_long + self.length_mismatch
    }
}

serializable_struct_with_getters! {
    #[derive(Default, Copy)]
    #[serde(default)]
    LossReport {
        frames: u64,
        total_loss: f64,
        correct_frames: u64,
    }
}

impl LossReport {
    pub fn mean_loss(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.total_loss / self.frames as f64
        }
    }

    pub fn frame_accuracy(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.correct_frames as f64 / self.frames as f64
        }
    }
}

serializable_struct_with_getters! {
    #[derive(Default)]
    GroupSummary {
        key: String,
        utterances: u64,
        frames: u64,
        bunches: u64,
        code_updates: u64,
        persisted: bool,
    }
}

serializable_struct_with_getters! {
    #[derive(Default)]
    #[serde(default)]
    TrainReport {
        cross_validate: bool,
        groups: u64,
        utterances: u64,
        skipped: SkipCounts,
        caches: u64,
        total_frames: u64,
        loss: LossReport,
        elapsed_secs: f64,
        feature_wait_secs: f64,
        network_persisted: bool,
        group_summaries: Vec<GroupSummary>,
    }
}

impl TrainReport {
    pub fn frames_per_second(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.total_frames as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }

    pub fn mode(&self) -> &'static str {
        if self.cross_validate {
            "CROSSVALIDATE"
        } else {
            "TRAINING"
        }
    }
}
