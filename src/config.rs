use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::engine::{RatioPolicy, RatioRules};
use crate::limits::{DEFAULT_COMPACT_THRESHOLD, DEFAULT_MAX_SHIFTS_PER_PASS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Io { path: PathBuf, error: String },
    InvalidRules(String),
    InvalidPolicy(String),
    /// A variable is set but does not parse.
    InvalidValue { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, error } => write!(f, "cannot read {}: {error}", path.display()),
            ConfigError::InvalidRules(e) => write!(f, "invalid ratio rules: {e}"),
            ConfigError::InvalidPolicy(p) => {
                write!(f, "invalid ratio policy: {p} (expected per_band or pooled)")
            }
            ConfigError::InvalidValue { key, value } => write!(f, "invalid value for {key}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Runner configuration, read from `ROTA_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// PostgreSQL source. When unset the journal is used instead.
    pub database_url: Option<String>,
    pub journal_path: PathBuf,
    pub rules: RatioRules,
    pub policy: RatioPolicy,
    pub metrics_port: Option<u16>,
    pub max_shifts: usize,
    /// Journal records kept before the store compacts it.
    pub compact_threshold: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let rules = match get("ROTA_RULES") {
            Some(path) => load_rules(Path::new(&path))?,
            None => RatioRules::default(),
        };
        let policy = match get("ROTA_RATIO_POLICY") {
            Some(p) => p.parse().map_err(|_| ConfigError::InvalidPolicy(p))?,
            None => RatioPolicy::default(),
        };

        Ok(Self {
            database_url: get("ROTA_DATABASE_URL").filter(|s| !s.is_empty()),
            journal_path: get("ROTA_JOURNAL")
                .unwrap_or_else(|| "./data/rota.journal".into())
                .into(),
            rules,
            policy,
            metrics_port: parse_var(&get, "ROTA_METRICS_PORT")?,
            max_shifts: parse_var(&get, "ROTA_MAX_SHIFTS")?.unwrap_or(DEFAULT_MAX_SHIFTS_PER_PASS),
            compact_threshold: parse_var(&get, "ROTA_COMPACT_THRESHOLD")?
                .unwrap_or(DEFAULT_COMPACT_THRESHOLD),
        })
    }
}

/// Unset is `None`; set but unparsable is an error.
fn parse_var<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match get(key) {
        None => Ok(None),
        Some(value) => match value.trim().parse() {
            Ok(v) => Ok(Some(v)),
            Err(_) => Err(ConfigError::InvalidValue { key, value }),
        },
    }
}

/// Load ratio rules from a JSON file such as
/// `{"under_two": 3, "two_year_old": 4, "three_plus": 8}`.
pub fn load_rules(path: &Path) -> Result<RatioRules, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;
    parse_rules(&text)
}

pub fn parse_rules(json: &str) -> Result<RatioRules, ConfigError> {
    let rules: RatioRules =
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidRules(e.to_string()))?;
    rules.validate()?;
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.journal_path, PathBuf::from("./data/rota.journal"));
        assert_eq!(cfg.rules, RatioRules::default());
        assert_eq!(cfg.policy, RatioPolicy::PerBand);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.max_shifts, DEFAULT_MAX_SHIFTS_PER_PASS);
        assert_eq!(cfg.compact_threshold, DEFAULT_COMPACT_THRESHOLD);
    }

    #[test]
    fn reads_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("ROTA_DATABASE_URL", "postgres://localhost/rota"),
            ("ROTA_RATIO_POLICY", "pooled"),
            ("ROTA_METRICS_PORT", "9100"),
            ("ROTA_MAX_SHIFTS", "50"),
            ("ROTA_COMPACT_THRESHOLD", "64"),
        ]))
        .unwrap();
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/rota"));
        assert_eq!(cfg.policy, RatioPolicy::Pooled);
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.max_shifts, 50);
        assert_eq!(cfg.compact_threshold, 64);
    }

    #[test]
    fn unparsable_numbers_are_rejected() {
        let err = Config::from_lookup(lookup(&[("ROTA_METRICS_PORT", "91OO")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidValue { key: "ROTA_METRICS_PORT", value: "91OO".into() });

        let err = Config::from_lookup(lookup(&[("ROTA_METRICS_PORT", "70000")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "ROTA_METRICS_PORT", .. }));

        let err = Config::from_lookup(lookup(&[("ROTA_MAX_SHIFTS", "-5")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidValue { key: "ROTA_MAX_SHIFTS", value: "-5".into() });

        assert!(matches!(
            Config::from_lookup(lookup(&[("ROTA_COMPACT_THRESHOLD", "lots")])),
            Err(ConfigError::InvalidValue { key: "ROTA_COMPACT_THRESHOLD", .. })
        ));
    }

    #[test]
    fn bad_policy_is_rejected() {
        let err = Config::from_lookup(lookup(&[("ROTA_RATIO_POLICY", "lenient")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidPolicy("lenient".into()));
    }

    #[test]
    fn parse_rules_validates_ratios() {
        let rules = parse_rules(r#"{"under_two": 3, "two_year_old": 5, "three_plus": 13}"#).unwrap();
        assert_eq!(rules.two_year_old, 5);

        assert!(matches!(
            parse_rules(r#"{"under_two": 0, "two_year_old": 5, "three_plus": 13}"#),
            Err(ConfigError::InvalidRules(_))
        ));
        assert!(matches!(
            parse_rules(r#"{"under_two": 3}"#),
            Err(ConfigError::InvalidRules(_))
        ));
    }

    #[test]
    fn missing_rules_file() {
        let err = load_rules(Path::new("/nonexistent/rota/rules.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
