use codeat_structs::{
    config::{OutputConfig, TrainConfig, UpdateFlags},
    report::{LossReport, SkipCounts, TrainReport},
};
use codeat_utils::{dejsonify, jsonify};

#[test]
fn test_default_config() {
    let config = TrainConfig::default();
    assert_eq!(config.bunch_size, 512);
    assert_eq!(config.cache_size, 32768);
    assert_eq!(config.max_frames, 6000);
    assert_eq!(config.seed, 777);
    assert!(config.randomize);
    assert!(config.shuffle);
    assert!(!config.cross_validate);
    assert!(!config.updates.any());
}

#[test]
fn test_partial_config_uses_defaults() {
    let config: TrainConfig =
        dejsonify(r#"{"bunch_size": 4, "updates": {"code_vec": true}}"#).unwrap();
    assert_eq!(config.bunch_size, 4);
    assert_eq!(config.cache_size, 32768);
    assert_eq!(config.updates, UpdateFlags::new(false, false, true));
    assert_eq!(config.outputs, OutputConfig::default());
}

#[test]
fn test_effective_cache_size() {
    let mut config = TrainConfig::default();
    config.bunch_size = 4;
    config.cache_size = 10;
    assert_eq!(config.effective_cache_size(), 8);
    config.bunch_size = 0;
    assert_eq!(config.effective_cache_size(), 0);
}

#[test]
fn test_persistence_flags() {
    let mut config = TrainConfig::default();
    config.updates = UpdateFlags::new(false, true, true);
    assert!(config.persists_network());
    assert!(config.persists_codes());
    config.cross_validate = true;
    assert!(!config.persists_network());
    assert!(!config.persists_codes());
}

#[test]
#[should_panic]
fn test_missing_output_getter_panics() {
    OutputConfig::default().codes();
}

#[test]
fn test_config_json_roundtrip() {
    let mut config = TrainConfig::default();
    config.outputs.codes = Some("codes.json".to_string());
    let text = jsonify(&config).unwrap();
    assert_eq!(dejsonify::<TrainConfig>(&text).unwrap(), config);
}

#[test]
fn test_report_rates() {
    let report = TrainReport {
        total_frames: 300,
        elapsed_secs: 2.0,
        loss: LossReport {
            frames: 300,
            total_loss: 150.0,
            correct_frames: 75,
        },
        skipped: SkipCounts {
            missing_alignment: 1,
            too_long: 2,
            length_mismatch: 3,
        },
        ..Default::default()
    };
    assert_eq!(report.frames_per_second(), 150.0);
    assert_eq!(report.loss.mean_loss(), 0.5);
    assert_eq!(report.loss.frame_accuracy(), 0.25);
    assert_eq!(report.skipped.total(), 6);
    assert_eq!(report.mode(), "TRAINING");
    assert_eq!(LossReport::default().mean_loss(), 0.0);
}
