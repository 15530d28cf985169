//! Workspace configuration (`strata.toml`) and logging setup.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once, OnceLock};

use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use strata_core::StaticSettings;
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;

mod maven_settings;

pub use maven_settings::MavenSettingsFile;

pub const STRATA_CONFIG_ENV_VAR: &str = "STRATA_CONFIG_PATH";

/// Top-level configuration.
///
/// ```toml
/// [logging]
/// level = "debug"
///
/// [maven]
/// local_repository = "/home/me/.m2/repository"
/// profiles = ["dev"]
///
/// [index]
/// update_on_startup = true
///
/// [[index.remote]]
/// id = "central"
/// url = "https://repo.maven.apache.org/maven2"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrataConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub maven: MavenConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Simple level (`info`, `debug`, ...) or a full `EnvFilter` directive.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Append logs to the given file in addition to stderr.
    ///
    /// If the file cannot be opened, file logging is disabled.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// Effective filter; `RUST_LOG`, when set, is merged after the configured level.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            file: None,
        }
    }
}

/// Build-tool settings. Unset paths fall back to the conventional
/// `~/.m2` layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MavenConfig {
    #[serde(default)]
    pub local_repository: Option<PathBuf>,

    #[serde(default)]
    pub offline: bool,

    #[serde(default)]
    pub user_settings: Option<PathBuf>,

    #[serde(default)]
    pub global_settings: Option<PathBuf>,

    /// Profiles activated for every project in the workspace.
    #[serde(default)]
    pub profiles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    /// Directory holding the `Index<N>` folders. Relative paths are resolved
    /// against the workspace root; defaults to `.strata/indices`.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    #[serde(default = "IndexConfig::default_update_on_startup")]
    pub update_on_startup: bool,

    #[serde(default)]
    pub remote: Vec<RemoteRepositoryConfig>,
}

impl IndexConfig {
    fn default_update_on_startup() -> bool {
        true
    }

    pub fn directory_for(&self, workspace_root: &Path) -> PathBuf {
        match &self.directory {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => workspace_root.join(dir),
            None => workspace_root.join(".strata").join("indices"),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            directory: None,
            update_on_startup: Self::default_update_on_startup(),
            remote: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteRepositoryConfig {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Tree snapshot location, relative to the workspace root unless absolute.
    #[serde(default = "WorkspaceConfig::default_snapshot_file")]
    pub snapshot_file: PathBuf,

    /// Minimum delay between two periodic snapshot saves. `0` disables them.
    #[serde(default = "WorkspaceConfig::default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,

    /// Glob patterns for POM paths that are tracked but ignored.
    #[serde(default)]
    pub ignored_patterns: Vec<String>,

    /// Look up sources jars for resolved dependencies after each resolve.
    #[serde(default)]
    pub download_sources: bool,
}

impl WorkspaceConfig {
    fn default_snapshot_file() -> PathBuf {
        PathBuf::from(".strata/tree.bin")
    }

    fn default_snapshot_interval_ms() -> u64 {
        30_000
    }

    pub fn snapshot_path_for(&self, workspace_root: &Path) -> PathBuf {
        if self.snapshot_file.is_absolute() {
            self.snapshot_file.clone()
        } else {
            workspace_root.join(&self.snapshot_file)
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            snapshot_file: Self::default_snapshot_file(),
            snapshot_interval_ms: Self::default_snapshot_interval_ms(),
            ignored_patterns: Vec::new(),
            download_sources: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("cannot locate the local repository: no home directory and no `maven.local_repository`")]
    MissingHomeDir,
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Toml(err.message().to_owned())
    }
}

impl StrataConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Effective build-tool settings.
    ///
    /// Values from `strata.toml` win over the user `settings.xml`, which wins
    /// over the global one. Fails only when no local repository is configured
    /// and no home directory can be determined.
    pub fn settings(&self) -> Result<StaticSettings, ConfigError> {
        let home = home_dir();
        let m2 = home.as_ref().map(|home| home.join(".m2"));

        let user_settings_file = self
            .maven
            .user_settings
            .clone()
            .or_else(|| m2.as_ref().map(|m2| m2.join("settings.xml")));
        let global_settings_file = self.maven.global_settings.clone().or_else(|| {
            std::env::var_os("M2_HOME")
                .map(|home| PathBuf::from(home).join("conf").join("settings.xml"))
        });

        let user = user_settings_file
            .as_deref()
            .and_then(MavenSettingsFile::read)
            .unwrap_or_default();
        let global = global_settings_file
            .as_deref()
            .and_then(MavenSettingsFile::read)
            .unwrap_or_default();

        let local_repository = match self
            .maven
            .local_repository
            .clone()
            .or(user.local_repository)
            .or(global.local_repository)
        {
            Some(path) => path,
            None => m2
                .as_ref()
                .map(|m2| m2.join("repository"))
                .ok_or(ConfigError::MissingHomeDir)?,
        };

        let offline = self.maven.offline || user.offline.or(global.offline).unwrap_or(false);

        let mut active_profiles: BTreeSet<String> = self
            .maven
            .profiles
            .iter()
            .map(|p| p.trim().to_owned())
            .filter(|p| !p.is_empty())
            .collect();
        active_profiles.extend(user.active_profiles);
        active_profiles.extend(global.active_profiles);

        Ok(StaticSettings {
            local_repository,
            offline,
            active_profiles,
            user_settings_file,
            global_settings_file,
        })
    }
}

pub(crate) fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

static CONFIG_ENV_LOCK: OnceLock<ReentrantMutex<()>> = OnceLock::new();

fn config_env_lock() -> &'static ReentrantMutex<()> {
    CONFIG_ENV_LOCK.get_or_init(|| ReentrantMutex::new(()))
}

/// Run `f` while holding the config environment lock.
///
/// Tests that temporarily set [`STRATA_CONFIG_ENV_VAR`] must go through this so
/// concurrent discovery in other threads does not observe the override.
pub fn with_config_env_lock<R>(f: impl FnOnce() -> R) -> R {
    let _guard = config_env_lock().lock();
    f()
}

/// Discover the configuration file for a workspace root.
///
/// Search order:
/// 1) `STRATA_CONFIG_PATH` (absolute or relative to `workspace_root`)
/// 2) `strata.toml` in `workspace_root`
/// 3) `.strata.toml` in `workspace_root`
pub fn discover_config_path(workspace_root: &Path) -> Option<PathBuf> {
    let _guard = config_env_lock().lock();
    if let Some(value) = std::env::var_os(STRATA_CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(value);
        let path = if candidate.is_absolute() {
            candidate
        } else {
            workspace_root.join(candidate)
        };
        return Some(strata_core::canonical_path(&path));
    }

    ["strata.toml", ".strata.toml"]
        .into_iter()
        .map(|name| workspace_root.join(name))
        .find(|path| path.is_file())
        .map(|path| strata_core::canonical_path(&path))
}

/// Load the configuration for a workspace root.
///
/// If no config is present, returns [`StrataConfig::default`] and `None`.
pub fn load_for_workspace(
    workspace_root: &Path,
) -> Result<(StrataConfig, Option<PathBuf>), ConfigError> {
    let Some(path) = discover_config_path(workspace_root) else {
        return Ok((StrataConfig::default(), None));
    };

    let config = StrataConfig::load_from_path(&path)?;
    Ok((config, Some(path)))
}

static TRACING_INIT: Once = Once::new();

/// Install the global `tracing` subscriber.
///
/// Safe to call multiple times; only the first call has an effect.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let file = config.file.as_ref().and_then(|path| {
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(file) => Some(Arc::new(Mutex::new(file))),
                Err(err) => {
                    eprintln!("strata: cannot open log file {}: {err}", path.display());
                    None
                }
            }
        });

        let mut make_writer = if cfg!(debug_assertions) {
            BoxMakeWriter::new(tracing_subscriber::fmt::writer::TestWriter::with_stderr)
        } else {
            BoxMakeWriter::new(std::io::stderr)
        };
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(MutexFileMakeWriter { file }));
        }

        let layer: Box<dyn Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() {
            tracing::debug!(target = "strata.config", json = config.json, "tracing initialized");
        }
    });
}

struct MutexFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for MutexFileMakeWriter {
    type Writer = MutexFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        MutexFileWriter {
            guard: self
                .file
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
    }
}

struct MutexFileWriter<'a> {
    guard: std::sync::MutexGuard<'a, std::fs::File>,
}

impl std::io::Write for MutexFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.guard.flush()
    }
}
