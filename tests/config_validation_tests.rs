//! Config Validation Tests
//!
//! Typo detection, range validation and file round-trips for the engine
//! config, exercised through the public API.

use recurrent_mesh::config::validation::{known_config_keys, suggest_correction, validate_unknown_keys};
use recurrent_mesh::config::{ConfigError, EngineConfig};
use recurrent_mesh::{GateDrive, NetworkComposition, Range, RecurrentNetwork, Source, WeightSampler};
use tempfile::TempDir;

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_weights_section_warns_with_suggestion() {
    let warnings = validate_unknown_keys("[weights]\nclosest_to_zer = 2.0\n");
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert_eq!(warnings[0].field, "weights.closest_to_zer");
    assert_eq!(warnings[0].suggestion.as_deref(), Some("weights.closest_to_zero"));
}

#[test]
fn misspelled_section_warns_for_section_and_keys() {
    let warnings = validate_unknown_keys("[trainng]\nlearning_rate = 0.1\n");
    assert_eq!(warnings.len(), 2);
    assert!(warnings.iter().any(|w| w.suggestion.as_deref() == Some("training")));
}

#[test]
fn full_valid_config_produces_zero_warnings() {
    let toml_str = r#"
[weights]
min = -0.5
max = 0.5
closest_to_zero = 3.0
seed = 1234

[cell]
gate_drive = "hidden_state_and_input"

[training]
learning_rate = 0.05
max_grad_norm = 0.0
"#;
    assert!(validate_unknown_keys(toml_str).is_empty());
    let config = EngineConfig::from_toml_str(toml_str).unwrap();
    assert_eq!(config.weights.seed, 1234);
    assert_eq!(config.cell.gate_drive, GateDrive::HiddenStateAndInput);
}

#[test]
fn unknown_keys_do_not_block_loading() {
    let config = EngineConfig::from_toml_str("[training]\nlerning_rate = 0.5\n").unwrap();
    assert_eq!(config, EngineConfig::default());
}

#[test]
fn suggestion_prefers_closest_key() {
    let known = known_config_keys();
    assert_eq!(suggest_correction("weights.mix", &known).as_deref(), Some("weights.max"));
    assert!(suggest_correction("zzzzzzzzzzzzzzzzzz", &known).is_none());
}

// ============================================================================
// Range Validation
// ============================================================================

#[test]
fn inverted_bounds_rejected_on_load() {
    let err = EngineConfig::from_toml_str("[weights]\nmin = 1.0\nmax = -1.0\n").unwrap_err();
    match err {
        ConfigError::Validation(errors) => {
            assert_eq!(errors.len(), 1);
            assert!(errors[0].contains("weights.min"));
        }
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn negative_learning_rate_and_norm_both_reported() {
    let err = EngineConfig::from_toml_str("[training]\nlearning_rate = -0.1\nmax_grad_norm = -2.0\n").unwrap_err();
    let ConfigError::Validation(errors) = err else {
        panic!("expected validation error");
    };
    assert_eq!(errors.len(), 2);
}

// ============================================================================
// Files
// ============================================================================

#[test]
fn save_and_reload_round_trip() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("recurrent_mesh.toml");

    let mut config = EngineConfig::default();
    config.weights.closest_to_zero = 4.0;
    config.training.learning_rate = 0.2;
    config.save_to_file(&path).unwrap();

    assert_eq!(EngineConfig::load_from_file(&path).unwrap(), config);
}

#[test]
fn missing_file_is_io_error() {
    let tmp = TempDir::new().unwrap();
    let err = EngineConfig::load_from_file(&tmp.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(..)));
}

#[test]
fn malformed_file_reports_path() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("broken.toml");
    std::fs::write(&path, "[weights\nmin = ").unwrap();
    match EngineConfig::load_from_file(&path).unwrap_err() {
        ConfigError::Parse(p, _) => assert_eq!(p, path),
        other => panic!("expected parse error, got {other}"),
    }
}

// ============================================================================
// Config-driven construction
// ============================================================================

#[test]
fn config_drives_sampling_and_gate_drive() {
    let config = EngineConfig::from_toml_str(
        r#"
[weights]
min = 0.1
max = 0.3
seed = 9

[cell]
gate_drive = "hidden_state_and_input"
"#,
    )
    .unwrap();
    let bounds = config.weights.bounds();
    let mut sampler = config.weights.sampler();

    let network = RecurrentNetwork::new(2, &[3, 1], config.cell.gate_drive, &bounds, &mut sampler).unwrap();
    assert_eq!(network.drive(), GateDrive::HiddenStateAndInput);

    let mut composition = NetworkComposition::new(2);
    let a = composition.add_network(network);
    composition
        .connect(a, Source::External, Range::Whole, Range::Whole, &bounds, &mut sampler)
        .unwrap();
    let weights = composition.port(a).unwrap().connections()[0].weights();
    assert!(weights.iter().flatten().all(|&w| (0.1..=0.3).contains(&w)));

    // Same seed, same first draw.
    let mut again = config.weights.sampler();
    let mut fresh = config.weights.sampler();
    assert_eq!(again.sample(&bounds), fresh.sample(&bounds));
}
