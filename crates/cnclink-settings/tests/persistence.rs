//! Tests for config load/save round trips on disk

use cnclink_settings::{ControllerConfig, SettingsError};
use tempfile::tempdir;

#[test]
fn test_save_and_load_toml() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("controller.toml");

    let mut config = ControllerConfig::default();
    config.serial.candidates = vec!["/dev/ttyACM0".to_string()];
    config.flow.buffer_size = 6;
    config.post_connect_commands.clear();
    config.save(&path).unwrap();

    let loaded = ControllerConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_save_and_load_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("controller.json");

    let mut config = ControllerConfig::default();
    config.motion.home_all_settle_ms = 3500;
    config.save(&path).unwrap();

    let loaded = ControllerConfig::load(&path).unwrap();
    assert_eq!(loaded.motion.home_all_settle_ms, 3500);
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("controller.toml");
    std::fs::write(&path, "[serial]\nbaud_rate = 0\n").unwrap();

    let err = ControllerConfig::load(&path).unwrap_err();
    assert!(matches!(err, SettingsError::InvalidSetting { .. }));
}

#[test]
fn test_load_or_default_without_file() {
    let dir = tempdir().unwrap();
    let config = ControllerConfig::load_or_default(&dir.path().join("missing.toml")).unwrap();
    assert_eq!(config, ControllerConfig::default());
}
