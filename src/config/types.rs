use std::ffi::OsString;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Explicit override for [`Config::suppress_remove_errors`]. Accepts
/// `1`/`true`/`yes` or `0`/`false`/`no`.
pub const SUPPRESS_REMOVE_ERRORS_ENV: &str = "LINKRUN_SUPPRESS_REMOVE_ERRORS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine socket. `None` uses the platform default.
    pub docker_socket: Option<PathBuf>,
    /// Seconds the engine waits for a graceful stop before killing.
    pub stop_timeout: u64,
    /// Treat container removal errors as success. Some CI platforms forbid
    /// removing containers and report every removal as a failure.
    pub suppress_remove_errors: bool,
    /// Environment variable whose presence turns on
    /// `suppress_remove_errors`.
    pub remove_suppression_env: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docker_socket: None,
            stop_timeout: 10,
            suppress_remove_errors: false,
            remove_suppression_env: "CIRCLECI".to_string(),
        }
    }
}

impl Config {
    /// Apply environment overrides from the process environment. Call once
    /// at startup; nothing else in the crate reads the environment.
    pub fn resolve_env(self) -> Self {
        self.resolve_with(|key| std::env::var_os(key))
    }

    /// Apply environment overrides using `lookup` in place of the process
    /// environment. The platform flag only needs to be present; its value may
    /// be anything, including non-UTF-8 bytes.
    pub fn resolve_with(mut self, lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        if !self.remove_suppression_env.is_empty()
            && lookup(&self.remove_suppression_env).is_some()
        {
            self.suppress_remove_errors = true;
        }
        if let Some(value) = lookup(SUPPRESS_REMOVE_ERRORS_ENV) {
            match value.to_string_lossy().trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.suppress_remove_errors = true,
                "0" | "false" | "no" => self.suppress_remove_errors = false,
                _ => {}
            }
        }
        self
    }

    pub fn stop_timeout_secs(&self) -> i64 {
        i64::try_from(self.stop_timeout).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_do_not_suppress() {
        let cfg = Config::default().resolve_with(env(&[]));
        assert!(!cfg.suppress_remove_errors);
        assert_eq!(cfg.stop_timeout_secs(), 10);
    }

    #[test]
    fn presence_of_platform_flag_suppresses() {
        let cfg = Config::default().resolve_with(env(&[("CIRCLECI", "")]));
        assert!(cfg.suppress_remove_errors);
    }

    #[test]
    fn platform_flag_name_is_configurable() {
        let cfg = Config {
            remove_suppression_env: "MY_CI".into(),
            ..Config::default()
        };
        assert!(!cfg.clone().resolve_with(env(&[("CIRCLECI", "true")])).suppress_remove_errors);
        assert!(cfg.resolve_with(env(&[("MY_CI", "1")])).suppress_remove_errors);
    }

    #[test]
    fn explicit_override_wins() {
        let cfg = Config::default()
            .resolve_with(env(&[("CIRCLECI", "true"), (SUPPRESS_REMOVE_ERRORS_ENV, "false")]));
        assert!(!cfg.suppress_remove_errors);

        let cfg = Config::default().resolve_with(env(&[(SUPPRESS_REMOVE_ERRORS_ENV, "yes")]));
        assert!(cfg.suppress_remove_errors);
    }

    #[test]
    fn empty_flag_name_disables_detection() {
        let cfg = Config {
            remove_suppression_env: String::new(),
            ..Config::default()
        }
        .resolve_with(env(&[("", "x")]));
        assert!(!cfg.suppress_remove_errors);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_platform_flag_still_counts_as_present() {
        use std::os::unix::ffi::OsStringExt;

        let cfg = Config::default().resolve_with(|key| {
            (key == "CIRCLECI").then(|| OsString::from_vec(vec![0xff, 0xfe]))
        });
        assert!(cfg.suppress_remove_errors);
    }
}
