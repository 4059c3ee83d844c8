//! Config Validation Tests
//!
//! Typo detection on unknown keys and range validation on loaded values,
//! exercised through the public config API and real files on disk.

use powertrain_analyst::config::validation::{
    known_config_keys, suggest_correction, validate_unknown_keys,
};
use powertrain_analyst::config::{AnalystConfig, ConfigError};
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn validation_errors(result: Result<AnalystConfig, ConfigError>) -> Vec<String> {
    match result {
        Err(ConfigError::Validation(errors)) => errors,
        other => panic!("expected validation error, got {other:?}"),
    }
}

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_scheduler_section_warns_with_suggestion() {
    let warnings = validate_unknown_keys(
        r#"
[scheduler]
intervall_minutes = 10
"#,
    );
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("intervall_minutes"));
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("scheduler.interval_minutes")
    );
}

#[test]
fn typo_in_generator_section_warns() {
    let warnings = validate_unknown_keys(
        r#"
[generator]
naem = "GENSET-2"
"#,
    );
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].suggestion.as_deref(), Some("generator.name"));
}

#[test]
fn unknown_section_without_close_match_has_no_suggestion() {
    let warnings = validate_unknown_keys(
        r#"
[turbocharger]
boost_limit = 2.1
"#,
    );
    assert!(!warnings.is_empty());
    assert!(warnings.iter().all(|w| w.suggestion.is_none()));
}

#[test]
fn full_valid_config_produces_zero_warnings() {
    let toml_str = r#"
[generator]
name = "GENSET-7"
rated_rpm = 1500.0
rated_kw = 400.0

[scheduler]
interval_minutes = 10
call_timeout_secs = 5
shutdown_timeout_secs = 20
ai_health_interval_secs = 120
ai_failure_limit = 3

[baseline]
window_days = 14
min_samples = 20
stale_after_days = 3
trend_window_hours = 12

[thresholds]
oil_pressure_warning_kpa = 260.0
oil_pressure_critical_kpa = 180.0
battery_warning_v = 12.2
battery_critical_v = 11.5
warning_sigma = 2.5
critical_sigma = 3.5

[store]
path = "/var/lib/analyst"

[enrichment]
enabled = true
endpoint = "http://localhost:11434/v1"
model = "llama3"
api_key_env = "ANALYST_AI_API_KEY"

[server]
addr = "0.0.0.0:9090"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(warnings.is_empty(), "Unexpected warnings: {warnings:?}");

    let config = AnalystConfig::from_toml_str(toml_str).unwrap();
    assert_eq!(config.generator.rated_kw, 400.0);
    assert_eq!(config.scheduler.interval_minutes, 10);
    assert_eq!(config.baseline.min_samples, 20);
    assert_eq!(config.server.addr, "0.0.0.0:9090");
}

#[test]
fn every_default_key_is_known() {
    let toml_str = AnalystConfig::default().to_toml().unwrap();
    let known = known_config_keys();
    let warnings = validate_unknown_keys(&toml_str);
    assert!(
        warnings.is_empty(),
        "Serialized defaults contain keys missing from the known list: {warnings:?}"
    );
    assert!(known.contains("thresholds.escalation_warning_cycles"));
}

#[test]
fn suggestion_is_bounded_by_edit_distance() {
    let known = known_config_keys();
    assert_eq!(
        suggest_correction("store.pth", &known).as_deref(),
        Some("store.path")
    );
    assert!(suggest_correction("completely.unrelated.key", &known).is_none());
}

// ============================================================================
// Range Validation
// ============================================================================

#[test]
fn interval_outside_range_rejected() {
    for minutes in [0_u64, 31, 120] {
        let errors = validation_errors(AnalystConfig::from_toml_str(&format!(
            "[scheduler]\ninterval_minutes = {minutes}\n"
        )));
        assert!(
            errors.iter().any(|e| e.contains("interval_minutes")),
            "{minutes} minutes should be rejected: {errors:?}"
        );
    }
}

#[test]
fn interval_boundaries_accepted() {
    for minutes in [1_u64, 30] {
        let config =
            AnalystConfig::from_toml_str(&format!("[scheduler]\ninterval_minutes = {minutes}\n"))
                .unwrap();
        assert_eq!(config.scheduler.interval_minutes, minutes);
    }
}

#[test]
fn inverted_oil_pressure_limits_rejected() {
    let errors = validation_errors(AnalystConfig::from_toml_str(
        r#"
[thresholds]
oil_pressure_warning_kpa = 150.0
oil_pressure_critical_kpa = 250.0
"#,
    ));
    assert!(errors.iter().any(|e| e.contains("thresholds.oil_pressure")));
}

#[test]
fn inverted_coolant_limits_rejected() {
    let errors = validation_errors(AnalystConfig::from_toml_str(
        r#"
[thresholds]
coolant_warning_c = 110.0
coolant_critical_c = 100.0
"#,
    ));
    assert!(errors.iter().any(|e| e.contains("thresholds.coolant")));
}

#[test]
fn all_problems_reported_together() {
    let errors = validation_errors(AnalystConfig::from_toml_str(
        r#"
[generator]
rated_kw = 0.0

[scheduler]
interval_minutes = 45
ai_failure_limit = 0

[baseline]
min_samples = 1
"#,
    ));
    assert!(errors.len() >= 4, "Expected every problem listed: {errors:?}");
    assert!(errors.iter().any(|e| e.contains("rated_kw")));
    assert!(errors.iter().any(|e| e.contains("ai_failure_limit")));
    assert!(errors.iter().any(|e| e.contains("min_samples")));
}

#[test]
fn enrichment_enabled_without_endpoint_rejected() {
    let errors = validation_errors(AnalystConfig::from_toml_str(
        "[enrichment]\nenabled = true\n",
    ));
    assert!(errors.iter().any(|e| e.contains("enrichment.endpoint")));
}

// ============================================================================
// File Loading
// ============================================================================

#[test]
fn load_from_file_applies_partial_overrides() {
    let file = write_config(
        r#"
[generator]
name = "HARBOUR-2"

[baseline]
stale_after_days = 2
"#,
    );
    let config = AnalystConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.generator.name, "HARBOUR-2");
    assert_eq!(config.baseline.stale_after(), chrono::Duration::days(2));
    // Untouched sections keep their defaults
    assert_eq!(config.scheduler, AnalystConfig::default().scheduler);
}

#[test]
fn load_from_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = AnalystConfig::load_from_file(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::Io(..))));
}

#[test]
fn parse_error_names_the_file() {
    let file = write_config("[scheduler\ninterval_minutes = 5");
    let err = AnalystConfig::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(..)));
    assert!(err.to_string().contains(&file.path().display().to_string()));
}

#[test]
fn written_defaults_load_back_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("analyst_config.toml");
    std::fs::write(&path, AnalystConfig::default().to_toml().unwrap()).unwrap();

    let loaded = AnalystConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded, AnalystConfig::default());
}

#[test]
fn shipped_example_config_matches_defaults() {
    let example = include_str!("../analyst_config.example.toml");
    assert!(validate_unknown_keys(example).is_empty());
    let config = AnalystConfig::from_toml_str(example).unwrap();
    assert_eq!(config, AnalystConfig::default());
}
