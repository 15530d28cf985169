use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Read-only view of the effective build-tool settings.
///
/// The engine only reads from this; changes are announced by the owner of the
/// settings through an explicit "settings changed" call.
pub trait SettingsProvider: Send + Sync {
    /// Effective local repository (`~/.m2/repository` by default).
    fn local_repository(&self) -> &Path;

    fn is_offline(&self) -> bool;

    /// Profiles activated through settings (`<activeProfiles>`).
    fn active_profiles(&self) -> &BTreeSet<String>;

    fn user_settings_file(&self) -> Option<&Path>;

    fn global_settings_file(&self) -> Option<&Path>;
}

/// Plain value implementation of [`SettingsProvider`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticSettings {
    pub local_repository: PathBuf,
    pub offline: bool,
    pub active_profiles: BTreeSet<String>,
    pub user_settings_file: Option<PathBuf>,
    pub global_settings_file: Option<PathBuf>,
}

impl StaticSettings {
    pub fn with_local_repository(local_repository: impl Into<PathBuf>) -> Self {
        Self {
            local_repository: local_repository.into(),
            ..Self::default()
        }
    }
}

impl SettingsProvider for StaticSettings {
    fn local_repository(&self) -> &Path {
        &self.local_repository
    }

    fn is_offline(&self) -> bool {
        self.offline
    }

    fn active_profiles(&self) -> &BTreeSet<String> {
        &self.active_profiles
    }

    fn user_settings_file(&self) -> Option<&Path> {
        self.user_settings_file.as_deref()
    }

    fn global_settings_file(&self) -> Option<&Path> {
        self.global_settings_file.as_deref()
    }
}
