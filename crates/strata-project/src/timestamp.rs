use std::path::Path;

use serde::{Deserialize, Serialize};
use strata_core::{file_mtime_millis, SettingsProvider};

use crate::profiles::ExplicitProfiles;

pub const PROFILES_XML: &str = "profiles.xml";

/// Composite value deciding whether a project must be re-read.
///
/// Missing files contribute `0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentTimestamp {
    pub pom: u64,
    pub parent_stamp: u64,
    pub profiles_xml: u64,
    pub user_settings: u64,
    pub global_settings: u64,
    pub profiles_hash: u64,
}

impl ContentTimestamp {
    pub const NULL: ContentTimestamp = ContentTimestamp {
        pom: 0,
        parent_stamp: 0,
        profiles_xml: 0,
        user_settings: 0,
        global_settings: 0,
        profiles_hash: 0,
    };

    /// Performs file I/O; never call while holding a tree lock.
    pub fn compute(
        pom: &Path,
        parent_stamp: u64,
        settings: &dyn SettingsProvider,
        profiles: &ExplicitProfiles,
    ) -> Self {
        let profiles_xml = pom
            .parent()
            .map(|dir| file_mtime_millis(&dir.join(PROFILES_XML)))
            .unwrap_or(0);
        Self {
            pom: file_mtime_millis(pom),
            parent_stamp,
            profiles_xml,
            user_settings: settings
                .user_settings_file()
                .map(file_mtime_millis)
                .unwrap_or(0),
            global_settings: settings
                .global_settings_file()
                .map(file_mtime_millis)
                .unwrap_or(0),
            profiles_hash: profiles.content_hash(),
        }
    }

    pub fn to_array(self) -> [u64; 6] {
        [
            self.pom,
            self.parent_stamp,
            self.profiles_xml,
            self.user_settings,
            self.global_settings,
            self.profiles_hash,
        ]
    }

    pub fn from_array(values: [u64; 6]) -> Self {
        let [pom, parent_stamp, profiles_xml, user_settings, global_settings, profiles_hash] =
            values;
        Self {
            pom,
            parent_stamp,
            profiles_xml,
            user_settings,
            global_settings,
            profiles_hash,
        }
    }
}
