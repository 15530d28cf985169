use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Profiles explicitly switched on or off by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplicitProfiles {
    pub enabled: BTreeSet<String>,
    pub disabled: BTreeSet<String>,
}

impl ExplicitProfiles {
    pub fn new(
        enabled: impl IntoIterator<Item = impl Into<String>>,
        disabled: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            enabled: enabled.into_iter().map(Into::into).collect(),
            disabled: disabled.into_iter().map(Into::into).collect(),
        }
    }

    pub fn enabled(profiles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::new(profiles, std::iter::empty::<String>())
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty() && self.disabled.is_empty()
    }

    /// Add `other` on top of `self`; a profile cannot be both enabled and
    /// disabled, the last statement wins.
    pub fn merge(&mut self, other: &ExplicitProfiles) {
        for id in &other.enabled {
            self.disabled.remove(id);
            self.enabled.insert(id.clone());
        }
        for id in &other.disabled {
            self.enabled.remove(id);
            self.disabled.insert(id.clone());
        }
    }

    /// Stable (FNV-1a) hash, part of each project's content timestamp.
    pub fn content_hash(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;

        let mut hash = OFFSET;
        let mut feed = |bytes: &[u8]| {
            for byte in bytes {
                hash ^= u64::from(*byte);
                hash = hash.wrapping_mul(PRIME);
            }
        };
        for id in &self.enabled {
            feed(b"+");
            feed(id.as_bytes());
            feed(&[0]);
        }
        for id in &self.disabled {
            feed(b"-");
            feed(id.as_bytes());
            feed(&[0]);
        }
        hash
    }
}
