use std::path::PathBuf;

pub type Result<T> = core::result::Result<T, CertloadError>;

#[derive(thiserror::Error, Debug)]
pub enum CertloadError {
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{0} is not set")]
    MissingVariable(&'static str),
    #[error("failed to read payload {path}: {source}")]
    PayloadRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid duration '{0}': use a number with an ms, s, m or h suffix")]
    InvalidDuration(String),
    #[error("invalid load plan: {0}")]
    InvalidPlan(String),
}

pub mod config {
    use serde::{Deserialize, Serialize};
    use std::env;
    use std::path::{Path, PathBuf};

    use crate::{CertloadError, Result};

    pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

    pub const CONFIG_PATH_VAR: &str = "CERTLOAD_CONFIG";
    pub const BASE_URL_VAR: &str = "BASE_URL";
    pub const AUTHORITY_UUID_VAR: &str = "AUTHORITY_UUID";
    pub const PAYLOAD_PATH_VAR: &str = "PAYLOAD_PATH";
    pub const LOGGING_ENABLED_VAR: &str = "LOGGING_ENABLED";

    /// Resolved run variables, grouped per target service.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Variables {
        pub pyadcs: PyAdcsVariables,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default, rename_all = "camelCase")]
    pub struct PyAdcsVariables {
        pub base_url: String,
        pub authority_uuid: Option<String>,
        pub payload_path: Option<PathBuf>,
        pub logging: LoggingVariables,
    }

    impl Default for PyAdcsVariables {
        fn default() -> Self {
            Self {
                base_url: DEFAULT_BASE_URL.to_string(),
                authority_uuid: None,
                payload_path: None,
                logging: LoggingVariables::default(),
            }
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct LoggingVariables {
        pub enabled: bool,
    }

    impl Variables {
        /// Resolves variables from the process environment.
        pub fn from_env() -> Result<Self> {
            Self::resolve(|name| env::var(name).ok())
        }

        /// Resolves variables through `lookup`. A YAML file named by
        /// `CERTLOAD_CONFIG` forms the base layer; non-empty variables win.
        pub fn resolve<F>(lookup: F) -> Result<Self>
        where
            F: Fn(&str) -> Option<String>,
        {
            let base = match get_env(&lookup, CONFIG_PATH_VAR) {
                Some(path) => Self::from_yaml_file(Path::new(&path))?,
                None => Self::default(),
            };
            Ok(base.overlay(&lookup))
        }

        pub fn from_yaml_file(path: &Path) -> Result<Self> {
            let text = std::fs::read_to_string(path).map_err(|source| CertloadError::ConfigRead {
                path: path.to_path_buf(),
                source,
            })?;
            serde_yaml::from_str(&text).map_err(|source| CertloadError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })
        }

        fn overlay<F>(mut self, lookup: &F) -> Self
        where
            F: Fn(&str) -> Option<String>,
        {
            let pyadcs = &mut self.pyadcs;
            pyadcs.base_url = get_env_or(lookup, BASE_URL_VAR, &pyadcs.base_url);
            if let Some(v) = get_env(lookup, AUTHORITY_UUID_VAR) {
                pyadcs.authority_uuid = Some(v);
            }
            if let Some(v) = get_env(lookup, PAYLOAD_PATH_VAR) {
                pyadcs.payload_path = Some(PathBuf::from(v));
            }
            if let Some(v) = get_env(lookup, LOGGING_ENABLED_VAR) {
                pyadcs.logging.enabled = parse_flag(&v);
            }
            self
        }
    }

    /// Returns the variable's value, treating an empty string as unset.
    pub fn get_env<F>(lookup: &F, name: &str) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(name).filter(|v| !v.is_empty())
    }

    pub fn get_env_or<F>(lookup: &F, name: &str, fallback: &str) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        get_env(lookup, name).unwrap_or_else(|| fallback.to_string())
    }

    /// Only `true` (any ASCII case, surrounding whitespace ignored) enables
    /// the flag. Anything else, unrecognized values included, is `false`.
    pub fn parse_flag(raw: &str) -> bool {
        raw.trim().eq_ignore_ascii_case("true")
    }
}

pub mod duration {
    use std::time::Duration;

    use crate::{CertloadError, Result};

    /// Parses `250ms`, `30s`, `5m` or `2h`. A bare number means seconds.
    pub fn parse_duration(raw: &str) -> Result<Duration> {
        let s = raw.trim();
        let invalid = || CertloadError::InvalidDuration(raw.to_string());
        if s.is_empty() {
            return Err(invalid());
        }
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (value, unit) = s.split_at(split);
        let value: u64 = value.parse().map_err(|_| invalid())?;
        match unit {
            "ms" => Ok(Duration::from_millis(value)),
            "" | "s" => Ok(Duration::from_secs(value)),
            "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
            "h" => Ok(Duration::from_secs(value.saturating_mul(3600))),
            _ => Err(invalid()),
        }
    }
}
