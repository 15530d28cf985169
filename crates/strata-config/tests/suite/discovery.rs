use std::ffi::OsString;
use std::path::Path;

use strata_config::{
    discover_config_path, load_for_workspace, with_config_env_lock, StrataConfig,
    STRATA_CONFIG_ENV_VAR,
};

struct EnvVarGuard {
    key: &'static str,
    prior: Option<OsString>,
}

impl EnvVarGuard {
    fn set(key: &'static str, value: &Path) -> Self {
        let prior = std::env::var_os(key);
        std::env::set_var(key, value);
        Self { key, prior }
    }

    fn unset(key: &'static str) -> Self {
        let prior = std::env::var_os(key);
        std::env::remove_var(key);
        Self { key, prior }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        match self.prior.take() {
            Some(value) => std::env::set_var(self.key, value),
            None => std::env::remove_var(self.key),
        }
    }
}

#[test]
fn missing_config_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    with_config_env_lock(|| {
        let _env = EnvVarGuard::unset(STRATA_CONFIG_ENV_VAR);
        let (config, path) = load_for_workspace(dir.path()).unwrap();
        assert_eq!(config, StrataConfig::default());
        assert!(path.is_none());
    });
}

#[test]
fn strata_toml_wins_over_dotfile() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("strata.toml"), "[logging]\nlevel = \"debug\"\n").unwrap();
    std::fs::write(dir.path().join(".strata.toml"), "[logging]\nlevel = \"trace\"\n").unwrap();

    with_config_env_lock(|| {
        let _env = EnvVarGuard::unset(STRATA_CONFIG_ENV_VAR);
        let (config, path) = load_for_workspace(dir.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(path.unwrap().ends_with("strata.toml"));
    });
}

#[test]
fn env_var_overrides_discovery() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("strata.toml"), "").unwrap();
    let custom = dir.path().join("custom.toml");
    std::fs::write(&custom, "[workspace]\nsnapshot_interval_ms = 0\n").unwrap();

    with_config_env_lock(|| {
        let _env = EnvVarGuard::set(STRATA_CONFIG_ENV_VAR, Path::new("custom.toml"));
        let path = discover_config_path(dir.path()).unwrap();
        assert!(path.ends_with("custom.toml"));
        let (config, _) = load_for_workspace(dir.path()).unwrap();
        assert_eq!(config.workspace.snapshot_interval_ms, 0);
    });
}

#[test]
fn parse_errors_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("strata.toml"), "[logging\n").unwrap();
    with_config_env_lock(|| {
        let _env = EnvVarGuard::unset(STRATA_CONFIG_ENV_VAR);
        assert!(load_for_workspace(dir.path()).is_err());
    });
}
