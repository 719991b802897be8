use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid bind address {value:?}: {source}")]
    Bind {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    /// Only resolved for the HTTP transport; stdio never reads it.
    pub bind: Option<SocketAddr>,
    pub log_json: bool,
    pub max_body_bytes: usize,
}

/// Command-line values that take precedence over the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub workspace: Option<PathBuf>,
    pub bind: Option<String>,
    pub log_json: bool,
    pub serve: bool,
}

impl Config {
    pub fn from_env(overrides: Overrides) -> Result<Self, ConfigError> {
        Self::from_lookup(|k| env::var(k).ok(), overrides)
    }

    pub fn from_lookup<F>(lookup: F, overrides: Overrides) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let workspace = overrides.workspace.or_else(|| {
            lookup("ERAPOT_WORKSPACE")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
        });

        let bind = if overrides.serve {
            let raw = overrides
                .bind
                .or_else(|| lookup("ERAPOT_BIND"))
                .unwrap_or_else(|| DEFAULT_BIND.to_string());
            let addr = raw
                .trim()
                .parse::<SocketAddr>()
                .map_err(|source| ConfigError::Bind { value: raw.clone(), source })?;
            Some(addr)
        } else {
            None
        };

        let log_json = overrides.log_json
            || match lookup("ERAPOT_LOG_JSON") {
                Some(v) => parse_bool(&v).ok_or(ConfigError::Invalid {
                    name: "ERAPOT_LOG_JSON",
                    value: v,
                })?,
                None => false,
            };

        let max_body_bytes = match lookup("ERAPOT_MAX_BODY_BYTES") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::Invalid {
                    name: "ERAPOT_MAX_BODY_BYTES",
                    value: v,
                })?,
            None => DEFAULT_MAX_BODY_BYTES,
        };

        Ok(Self {
            workspace,
            bind,
            log_json,
            max_body_bytes,
        })
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" | "" => Some(false),
        _ => None,
    }
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
        move |k| map.get(k).cloned()
    }

    fn serving() -> Overrides {
        Overrides {
            serve: true,
            ..Overrides::default()
        }
    }

    #[test]
    fn defaults_apply_without_env() {
        let cfg = Config::from_lookup(lookup(&[]), serving()).expect("config");
        assert_eq!(cfg.bind, Some(DEFAULT_BIND.parse::<SocketAddr>().expect("addr")));
        assert_eq!(cfg.workspace, None);
        assert!(!cfg.log_json);
        assert_eq!(cfg.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    }

    #[test]
    fn overrides_win_over_env() {
        let cfg = Config::from_lookup(
            lookup(&[
                ("ERAPOT_BIND", "0.0.0.0:9000"),
                ("ERAPOT_WORKSPACE", "/srv/env"),
            ]),
            Overrides {
                workspace: Some(PathBuf::from("/srv/cli")),
                bind: Some("127.0.0.1:7000".into()),
                log_json: false,
                serve: true,
            },
        )
        .expect("config");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/srv/cli")));
        assert_eq!(cfg.bind.map(|a| a.port()), Some(7000));
    }

    #[test]
    fn bad_values_are_typed_errors() {
        let e = Config::from_lookup(lookup(&[("ERAPOT_BIND", "nope")]), serving())
            .expect_err("bad bind");
        assert!(matches!(e, ConfigError::Bind { .. }));
        let e = Config::from_lookup(
            lookup(&[("ERAPOT_LOG_JSON", "maybe")]),
            Overrides::default(),
        )
        .expect_err("bad bool");
        assert!(matches!(
            e,
            ConfigError::Invalid {
                name: "ERAPOT_LOG_JSON",
                ..
            }
        ));
    }

    #[test]
    fn stdio_ignores_a_bad_bind_address() {
        let cfg = Config::from_lookup(lookup(&[("ERAPOT_BIND", "nope")]), Overrides::default())
            .expect("stdio config");
        assert_eq!(cfg.bind, None);
    }
}
