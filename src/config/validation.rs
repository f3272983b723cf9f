//! Config validation: unknown-key detection with Levenshtein suggestions
//! and numeric range checks.
//!
//! Unknown keys are found by parsing the raw TOML into `toml::Value` and
//! comparing every dotted path against the known field set. They only ever
//! produce warnings; range violations are hard errors.

use std::collections::HashSet;

use super::EngineConfig;

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

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path for `EngineConfig`. Kept in step with the
/// structs in `engine_config.rs` by hand.
pub fn known_config_keys() -> HashSet<&'static str> {
    [
        // [weights]
        "weights",
        "weights.min",
        "weights.max",
        "weights.closest_to_zero",
        "weights.seed",
        // [cell]
        "cell",
        "cell.gate_drive",
        // [training]
        "training",
        "training.learning_rate",
        "training.max_grad_norm",
    ]
    .into_iter()
    .collect()
}

/// Recursively collect dotted key paths from a TOML tree.
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
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Closest known key within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (k, levenshtein(unknown, k)))
        .filter(|&(_, dist)| dist <= 3)
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(k, _)| k.to_string())
}

/// Warnings for every unknown key in `raw_toml`. Parse errors are left to
/// serde and produce no warnings here.
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

// ============================================================================
// Range Validation
// ============================================================================

/// Hard errors for values the engine cannot run with.
pub fn validate_ranges(config: &EngineConfig) -> Vec<String> {
    let mut errors = Vec::new();
    let w = &config.weights;

    if !w.min.is_finite() || !w.max.is_finite() {
        errors.push(format!("weights.min/max must be finite (got min={}, max={})", w.min, w.max));
    } else if w.min > w.max {
        errors.push(format!("weights.min ({:.3}) must be <= weights.max ({:.3})", w.min, w.max));
    }
    if !w.closest_to_zero.is_finite() || w.closest_to_zero < 0.0 {
        errors.push(format!(
            "weights.closest_to_zero = {} must be a finite value >= 0",
            w.closest_to_zero
        ));
    }

    let t = &config.training;
    if !t.learning_rate.is_finite() || t.learning_rate <= 0.0 {
        errors.push(format!("training.learning_rate = {} must be > 0", t.learning_rate));
    }
    if !t.max_grad_norm.is_finite() || t.max_grad_norm < 0.0 {
        errors.push(format!(
            "training.max_grad_norm = {} must be >= 0 (0 disables clipping)",
            t.max_grad_norm
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("seed", "seed"), 0);
        assert_eq!(levenshtein("learning_rat", "learning_rate"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [training]
            learning_rate = 0.1
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"training".to_string()));
        assert!(keys.contains(&"training.learning_rate".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let warnings = validate_unknown_keys("[training]\nlearning_rat = 0.1\n");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "training.learning_rat");
        assert_eq!(warnings[0].suggestion.as_deref(), Some("training.learning_rate"));
        assert!(warnings[0].to_string().contains("did you mean"));
    }

    #[test]
    fn test_valid_keys_produce_no_warnings() {
        let toml_str = r#"
[weights]
min = -0.5
closest_to_zero = 2.0

[cell]
gate_drive = "hidden_state"
"#;
        assert!(validate_unknown_keys(toml_str).is_empty());
    }

    #[test]
    fn test_garbage_key_has_no_suggestion() {
        let warnings = validate_unknown_keys("completely_unrelated_garbage = 1\n");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].suggestion.is_none());
    }

    #[test]
    fn test_unparseable_toml_is_not_a_warning() {
        assert!(validate_unknown_keys("[[[").is_empty());
    }

    #[test]
    fn test_ranges_default_clean() {
        assert!(validate_ranges(&EngineConfig::default()).is_empty());
    }

    #[test]
    fn test_ranges_reject_non_finite() {
        let mut config = EngineConfig::default();
        config.weights.max = f64::INFINITY;
        config.weights.closest_to_zero = f64::NAN;
        let errors = validate_ranges(&config);
        assert_eq!(errors.len(), 2, "{errors:?}");
    }

    #[test]
    fn test_equal_weight_bounds_agree_with_sampler_rule() {
        let mut config = EngineConfig::default();
        config.weights.min = 0.25;
        config.weights.max = 0.25;
        assert!(validate_ranges(&config).is_empty());
        assert!(config.weights.bounds().validate().is_ok());

        config.weights.min = 0.5;
        assert_eq!(validate_ranges(&config).len(), 1);
        assert!(config.weights.bounds().validate().is_err());
    }

    #[test]
    fn test_zero_grad_norm_is_allowed() {
        let mut config = EngineConfig::default();
        config.training.max_grad_norm = 0.0;
        assert!(validate_ranges(&config).is_empty());
    }
}
