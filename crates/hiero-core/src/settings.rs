//! Decoder settings loaded from TOML.
//!
//! - `init_custom(toml_content)` sets a custom TOML before first `settings()` call
//! - `settings()` returns `&'static Settings` (lazy-init singleton)
//! - Default values are embedded via `include_str!("default_settings.toml")`
//!
//! Core entry points take `&Settings` explicitly; the singleton is for the
//! command-line tools.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::model::ModelSpec;
use crate::symbol::MAX_ARITY;

pub const DEFAULT_SETTINGS_TOML: &str = include_str!("default_settings.toml");

static CUSTOM_TOML: OnceLock<String> = OnceLock::new();

/// Set custom TOML before first `settings()` call.
pub fn init_custom(toml_content: String) -> Result<(), SettingsError> {
    parse_settings_toml(&toml_content)?;
    CUSTOM_TOML
        .set(toml_content)
        .map_err(|_| SettingsError::AlreadyInitialized)
}

/// Get or initialize the global settings singleton.
pub fn settings() -> &'static Settings {
    static INSTANCE: OnceLock<Settings> = OnceLock::new();
    INSTANCE.get_or_init(|| {
        let toml_str = CUSTOM_TOML
            .get()
            .map(|s| s.as_str())
            .unwrap_or(DEFAULT_SETTINGS_TOML);
        parse_settings_toml(toml_str).expect("settings TOML must be valid")
    })
}

/// Returns the embedded default settings TOML content.
pub fn default_toml() -> &'static str {
    DEFAULT_SETTINGS_TOML
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("TOML parse error: {0}")]
    Parse(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("settings already initialized")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub lm: LmSettings,
    pub grammar: GrammarSettings,
    pub pruning: PruningSettings,
    pub nbest: NbestSettings,
    pub parallel: ParallelSettings,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
}

impl Default for Settings {
    fn default() -> Self {
        settings().clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmSettings {
    pub order: usize,
    /// Cost charged for a word the LM has never seen.
    pub ceiling_cost: f64,
    pub use_left_equivalent_state: bool,
    pub use_right_equivalent_state: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrammarSettings {
    /// Longest span a regular-grammar rule may cover.
    pub span_limit: usize,
    pub phrase_owner: String,
    pub glue_owner: String,
    pub oov_owner: String,
    pub default_non_terminal: String,
    pub goal_symbol: String,
    pub pass_through_unknown: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningSettings {
    pub use_cube_prune: bool,
    /// Stop popping a cube once the popped cost exceeds cut-off + fuzz1.
    pub fuzz1: f64,
    /// Only push cube neighbours cheaper than cut-off + fuzz2.
    pub fuzz2: f64,
    pub max_n_items: usize,
    pub relative_threshold: f64,
    pub max_n_rules: usize,
    pub rule_relative_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbestSettings {
    pub top_n: usize,
    pub use_unique_nbest: bool,
    pub use_tree_nbest: bool,
    pub add_combined_cost: bool,
    pub include_model_costs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelSettings {
    pub num_threads: usize,
    pub save_disk_hg: bool,
}

pub fn parse_settings_toml(toml_str: &str) -> Result<Settings, SettingsError> {
    let s: Settings = toml::from_str(toml_str).map_err(|e| SettingsError::Parse(e.to_string()))?;
    validate(&s)?;
    Ok(s)
}

/// Serialize settings back to TOML.
pub fn to_toml(s: &Settings) -> Result<String, SettingsError> {
    toml::to_string(s).map_err(|e| SettingsError::Parse(e.to_string()))
}

fn invalid(field: impl Into<String>, reason: &str) -> SettingsError {
    SettingsError::InvalidValue {
        field: field.into(),
        reason: reason.to_string(),
    }
}

fn validate(s: &Settings) -> Result<(), SettingsError> {
    macro_rules! check_non_negative {
        ($section:ident . $field:ident) => {
            if !(s.$section.$field >= 0.0) {
                return Err(invalid(
                    concat!(stringify!($section), ".", stringify!($field)),
                    "must be non-negative",
                ));
            }
        };
    }
    macro_rules! check_positive {
        ($section:ident . $field:ident) => {
            if !(s.$section.$field > 0.0) || !s.$section.$field.is_finite() {
                return Err(invalid(
                    concat!(stringify!($section), ".", stringify!($field)),
                    "must be positive and finite",
                ));
            }
        };
    }
    macro_rules! check_positive_usize {
        ($section:ident . $field:ident) => {
            if s.$section.$field == 0 {
                return Err(invalid(
                    concat!(stringify!($section), ".", stringify!($field)),
                    "must be positive",
                ));
            }
        };
    }
    macro_rules! check_non_empty {
        ($section:ident . $field:ident) => {
            if s.$section.$field.trim().is_empty() {
                return Err(invalid(
                    concat!(stringify!($section), ".", stringify!($field)),
                    "must not be empty",
                ));
            }
        };
    }

    check_positive_usize!(lm.order);
    check_positive!(lm.ceiling_cost);

    check_positive_usize!(grammar.span_limit);
    check_non_empty!(grammar.phrase_owner);
    check_non_empty!(grammar.glue_owner);
    check_non_empty!(grammar.oov_owner);
    check_non_empty!(grammar.default_non_terminal);
    check_non_empty!(grammar.goal_symbol);
    if s.grammar.goal_symbol == s.grammar.default_non_terminal {
        return Err(invalid(
            "grammar.goal_symbol",
            "must differ from grammar.default_non_terminal",
        ));
    }

    check_non_negative!(pruning.fuzz1);
    check_non_negative!(pruning.fuzz2);
    check_positive_usize!(pruning.max_n_items);
    check_positive!(pruning.relative_threshold);
    check_positive_usize!(pruning.max_n_rules);
    check_positive!(pruning.rule_relative_threshold);

    check_positive_usize!(nbest.top_n);
    check_positive_usize!(parallel.num_threads);

    let mut lm_models = 0;
    for (i, spec) in s.models.iter().enumerate() {
        if !spec.weight().is_finite() {
            return Err(invalid(format!("models[{i}].weight"), "must be finite"));
        }
        match spec {
            ModelSpec::Lm { .. } => lm_models += 1,
            ModelSpec::PhraseModel { owner, .. } | ModelSpec::PhrasePenalty { owner, .. } => {
                if owner.trim().is_empty() {
                    return Err(invalid(format!("models[{i}].owner"), "must not be empty"));
                }
            }
            ModelSpec::ArityPhrasePenalty {
                owner,
                min_arity,
                max_arity,
                ..
            } => {
                if owner.trim().is_empty() {
                    return Err(invalid(format!("models[{i}].owner"), "must not be empty"));
                }
                if min_arity > max_arity || *max_arity > MAX_ARITY {
                    return Err(invalid(
                        format!("models[{i}].max_arity"),
                        "arity range must satisfy min_arity <= max_arity <= 8",
                    ));
                }
            }
            ModelSpec::WordPenalty { .. } => {}
        }
    }
    if lm_models > 1 {
        return Err(invalid("models", "at most one language model is supported"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_section(replace: &str, with: &str) -> String {
        assert!(DEFAULT_SETTINGS_TOML.contains(replace));
        DEFAULT_SETTINGS_TOML.replace(replace, with)
    }

    #[test]
    fn parse_default_toml() {
        let s = parse_settings_toml(DEFAULT_SETTINGS_TOML).unwrap();
        assert_eq!(s.lm.order, 3);
        assert!((s.lm.ceiling_cost - 100.0).abs() < f64::EPSILON);
        assert!(!s.lm.use_left_equivalent_state);
        assert!(s.lm.use_right_equivalent_state);
        assert_eq!(s.grammar.span_limit, 10);
        assert_eq!(s.grammar.goal_symbol, "S");
        assert_eq!(s.grammar.default_non_terminal, "X");
        assert!(s.pruning.use_cube_prune);
        assert_eq!(s.pruning.max_n_items, 30);
        assert_eq!(s.pruning.max_n_rules, 50);
        assert!((s.pruning.fuzz1 - 0.1).abs() < f64::EPSILON);
        assert_eq!(s.nbest.top_n, 500);
        assert!(!s.nbest.use_unique_nbest);
        assert_eq!(s.parallel.num_threads, 1);
        assert_eq!(s.models.len(), 4);
        assert!(matches!(s.models[0], ModelSpec::Lm { .. }));
    }

    #[test]
    fn parse_custom_models() {
        let toml = with_section(
            "[[models]]\nkind = \"word_penalty\"\nweight = 0.5\n",
            "[[models]]\nkind = \"arity_phrase_penalty\"\nowner = \"pt\"\nmin_arity = 1\nmax_arity = 2\nweight = -0.3\n",
        );
        let s = parse_settings_toml(&toml).unwrap();
        assert!(s.models.iter().any(|m| matches!(
            m,
            ModelSpec::ArityPhrasePenalty {
                min_arity: 1,
                max_arity: 2,
                ..
            }
        )));
    }

    #[test]
    fn error_zero_order() {
        let toml = with_section("order = 3", "order = 0");
        let err = parse_settings_toml(&toml).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue { .. }));
        assert!(err.to_string().contains("lm.order"));
    }

    #[test]
    fn error_negative_fuzz() {
        let toml = with_section("fuzz2 = 0.1", "fuzz2 = -1.0");
        let err = parse_settings_toml(&toml).unwrap_err();
        assert!(err.to_string().contains("pruning.fuzz2"));
    }

    #[test]
    fn error_zero_threshold() {
        let toml = with_section("relative_threshold = 10.0\nmax", "relative_threshold = 0.0\nmax");
        let err = parse_settings_toml(&toml).unwrap_err();
        assert!(err.to_string().contains("pruning.relative_threshold"));
    }

    #[test]
    fn error_two_language_models() {
        let toml = format!("{DEFAULT_SETTINGS_TOML}\n[[models]]\nkind = \"lm\"\nweight = 0.5\n");
        let err = parse_settings_toml(&toml).unwrap_err();
        assert!(err.to_string().contains("at most one language model"));
    }

    #[test]
    fn error_bad_arity_range() {
        let toml = format!(
            "{DEFAULT_SETTINGS_TOML}\n[[models]]\nkind = \"arity_phrase_penalty\"\nowner = \"pt\"\nmin_arity = 3\nmax_arity = 1\nweight = 1.0\n"
        );
        let err = parse_settings_toml(&toml).unwrap_err();
        assert!(err.to_string().contains("max_arity"));
    }

    #[test]
    fn error_unknown_model_kind() {
        let toml = format!("{DEFAULT_SETTINGS_TOML}\n[[models]]\nkind = \"bleu\"\nweight = 1.0\n");
        let err = parse_settings_toml(&toml).unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn error_missing_section() {
        let err = parse_settings_toml("[lm]\norder = 3\n").unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn round_trip_through_toml() {
        let s = parse_settings_toml(DEFAULT_SETTINGS_TOML).unwrap();
        let text = to_toml(&s).unwrap();
        let again = parse_settings_toml(&text).unwrap();
        assert_eq!(again.models.len(), s.models.len());
        assert_eq!(again.pruning.max_n_items, s.pruning.max_n_items);
    }
}
