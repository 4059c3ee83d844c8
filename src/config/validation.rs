//! Unknown-key detection with Levenshtein suggestions.
//!
//! The raw TOML is parsed into a `toml::Value` first and its key tree is
//! compared against the known field paths. Typos produce warnings with a
//! "did you mean" hint and never stop the file from loading.

use std::collections::HashSet;

/// A non-fatal config warning.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

/// Every valid dotted key path of `AnalystConfig`.
///
/// Kept by hand in step with analyst_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [generator]
        "generator",
        "generator.name",
        "generator.rated_rpm",
        "generator.rated_kw",
        // [scheduler]
        "scheduler",
        "scheduler.interval_minutes",
        "scheduler.call_timeout_secs",
        "scheduler.shutdown_timeout_secs",
        "scheduler.ai_health_interval_secs",
        "scheduler.ai_failure_limit",
        "scheduler.idle_timeout_secs",
        // [baseline]
        "baseline",
        "baseline.window_days",
        "baseline.min_samples",
        "baseline.stale_after_days",
        "baseline.trend_window_hours",
        // [thresholds]
        "thresholds",
        "thresholds.oil_pressure_warning_kpa",
        "thresholds.oil_pressure_critical_kpa",
        "thresholds.rpm_deviation_warning",
        "thresholds.rpm_deviation_critical",
        "thresholds.coolant_warning_c",
        "thresholds.coolant_critical_c",
        "thresholds.battery_warning_v",
        "thresholds.battery_critical_v",
        "thresholds.controller_warning_c",
        "thresholds.controller_critical_c",
        "thresholds.warning_sigma",
        "thresholds.critical_sigma",
        "thresholds.escalation_warning_cycles",
        "thresholds.escalation_critical_cycles",
        // [store]
        "store",
        "store.path",
        "store.retention_days",
        // [enrichment]
        "enrichment",
        "enrichment.enabled",
        "enrichment.endpoint",
        "enrichment.model",
        "enrichment.api_key_env",
        // [server]
        "server",
        "server.addr",
    ];
    keys.iter().copied().collect()
}

/// Collect all dotted key paths of a TOML tree.
///
/// `{ a = { b = 1, c = 2 } }` yields `["a", "a.b", "a.c"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Closest known key within edit distance 3, ties broken alphabetically.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (levenshtein(unknown, k), *k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

/// Warnings for every key in `raw_toml` that the config does not know.
///
/// Unparseable input yields no warnings; serde reports the parse error.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}
