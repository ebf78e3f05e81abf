//! Environment variable access for configuration.
//!
//! Two concerns live here:
//!
//! - [`read_env`]: the bridge's own lookup rules. A key `K` is looked up as
//!   `K`, then `k` (lowercase), then with the `CUSTOMCONNSTR_` prefix Azure App
//!   Service adds to connection strings. The literals `true`, `false` and
//!   `null` are coerced.
//! - [`interpolate`]: `${VAR}`, `${VAR:-default}`, `${VAR-default}`, `$VAR`
//!   and `$$` substitution inside YAML config files.

use regex::Regex;
use std::env;
use std::sync::LazyLock;

/// Prefix Azure prepends to connection-string settings.
const AZURE_PREFIX: &str = "CUSTOMCONNSTR_";

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{ ([A-Za-z_][A-Za-z0-9_]*) (?: (:?-) ([^}]*) )? \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("Invalid regex pattern")
});

/// A coerced environment value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    /// The literal `true` or `false`.
    Bool(bool),
    /// The literal `null`: treated as explicitly unset.
    Null,
    /// Anything else.
    Text(String),
}

impl EnvValue {
    fn coerce(raw: String) -> Self {
        match raw.as_str() {
            "true" => EnvValue::Bool(true),
            "false" => EnvValue::Bool(false),
            "null" => EnvValue::Null,
            _ => EnvValue::Text(raw),
        }
    }

    /// The value as text, if it is neither `null` nor a boolean.
    pub fn into_text(self) -> Option<String> {
        match self {
            EnvValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Truthiness: `false`, `null` and the empty string are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            EnvValue::Bool(b) => *b,
            EnvValue::Null => false,
            EnvValue::Text(text) => !text.is_empty(),
        }
    }
}

/// Look up `key` in the process environment using the bridge's fallback rules.
pub fn read_env(key: &str) -> Option<EnvValue> {
    read_env_with(key, |name| env::var(name).ok())
}

/// Look up `key` through `lookup` using the bridge's fallback rules.
///
/// Empty values are skipped in favor of the next candidate name.
pub fn read_env_with<F>(key: &str, lookup: F) -> Option<EnvValue>
where
    F: Fn(&str) -> Option<String>,
{
    let lower = key.to_lowercase();
    let candidates = [
        key.to_string(),
        lower.clone(),
        format!("{AZURE_PREFIX}{key}"),
        format!("{AZURE_PREFIX}{lower}"),
    ];

    candidates
        .iter()
        .filter_map(|name| lookup(name))
        .find(|value| !value.is_empty())
        .map(EnvValue::coerce)
}

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Every variable that could not be resolved.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    /// Returns true if there were no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in `input` from the process environment.
pub fn interpolate(input: &str) -> InterpolationResult {
    interpolate_with(input, |name| env::var(name).ok())
}

/// Interpolate variables in `input`, resolving names through `lookup`.
///
/// All unresolved names are collected so they can be reported together.
pub fn interpolate_with<F>(input: &str, lookup: F) -> InterpolationResult
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let whole = &caps[0];
            if whole == "$$" {
                return "$".to_string();
            }

            let name = caps
                .get(1)
                .or_else(|| caps.get(4))
                .map_or("", |m| m.as_str());
            let operator = caps.get(2).map(|m| m.as_str());
            let default = caps.get(3).map(|m| m.as_str());

            match (lookup(name), default) {
                (Some(value), _) if value.contains(['\n', '\r']) => {
                    errors.push(format!(
                        "environment variable '{name}' contains newlines, which is not allowed"
                    ));
                    whole.to_string()
                }
                (Some(value), Some(default)) if value.is_empty() && operator == Some(":-") => {
                    default.to_string()
                }
                (Some(value), _) => value,
                (None, Some(default)) => default.to_string(),
                (None, None) => {
                    errors.push(format!("environment variable '{name}' is not set"));
                    whole.to_string()
                }
            }
        })
        .into_owned();

    InterpolationResult { text, errors }
}
