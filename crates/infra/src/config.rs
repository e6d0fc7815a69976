//! Process configuration, read from the environment.

use std::time::Duration;

use thiserror::Error;

use edugate_auth::Role;

pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_millis(2_000);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")]
    MissingDatabaseUrl,

    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Which store backs the services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    InMemory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdugateConfig {
    pub backend: StoreBackend,
    /// The single superuser role name.
    pub superuser_role: Role,
    /// Upper bound on one permission check's store reads.
    pub check_timeout: Duration,
}

impl Default for EdugateConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::InMemory,
            superuser_role: Role::admin(),
            check_timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }
}

impl EdugateConfig {
    /// Read `USE_PERSISTENT_STORES`, `DATABASE_URL`, `EDUGATE_SUPERUSER_ROLE`
    /// and `EDUGATE_CHECK_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let use_persistent = match lookup("USE_PERSISTENT_STORES") {
            None => false,
            Some(v) => v.trim().parse::<bool>().map_err(|_| ConfigError::Invalid {
                name: "USE_PERSISTENT_STORES",
                value: v.clone(),
                reason: "expected true or false",
            })?,
        };

        let backend = if use_persistent {
            let database_url = lookup("DATABASE_URL")
                .filter(|u| !u.trim().is_empty())
                .ok_or(ConfigError::MissingDatabaseUrl)?;
            StoreBackend::Postgres { database_url }
        } else {
            StoreBackend::InMemory
        };

        let superuser_role = match lookup("EDUGATE_SUPERUSER_ROLE") {
            None => Role::admin(),
            Some(v) if v.trim().is_empty() => {
                return Err(ConfigError::Invalid {
                    name: "EDUGATE_SUPERUSER_ROLE",
                    value: v,
                    reason: "must not be blank",
                });
            }
            Some(v) => Role::new(v.trim().to_string()),
        };

        let check_timeout = match lookup("EDUGATE_CHECK_TIMEOUT_MS") {
            None => DEFAULT_CHECK_TIMEOUT,
            Some(v) => match v.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "EDUGATE_CHECK_TIMEOUT_MS",
                        value: v,
                        reason: "expected a positive number of milliseconds",
                    });
                }
            },
        };

        Ok(Self {
            backend,
            superuser_role,
            check_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_to_in_memory_admin() {
        let cfg = EdugateConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, EdugateConfig::default());
    }

    #[test]
    fn persistent_requires_database_url() {
        let err = EdugateConfig::from_lookup(lookup(&[("USE_PERSISTENT_STORES", "true")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingDatabaseUrl);

        let cfg = EdugateConfig::from_lookup(lookup(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/edugate"),
            ("EDUGATE_SUPERUSER_ROLE", "root"),
            ("EDUGATE_CHECK_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(
            cfg.backend,
            StoreBackend::Postgres {
                database_url: "postgres://localhost/edugate".into()
            }
        );
        assert_eq!(cfg.superuser_role, Role::new("root"));
        assert_eq!(cfg.check_timeout, Duration::from_millis(250));
    }

    #[test]
    fn rejects_bad_values() {
        for (name, value) in [
            ("USE_PERSISTENT_STORES", "yes"),
            ("EDUGATE_CHECK_TIMEOUT_MS", "0"),
            ("EDUGATE_CHECK_TIMEOUT_MS", "soon"),
            ("EDUGATE_SUPERUSER_ROLE", "  "),
        ] {
            let err = EdugateConfig::from_lookup(lookup(&[(name, value)])).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { name: n, .. } if n == name), "{name}={value}");
        }
    }
}
