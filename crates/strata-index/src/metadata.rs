use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::Path;

use strata_core::atomic_write;

use crate::error::IndexError;

pub const INDEX_PROPERTIES: &str = "index.properties";

/// Bumped whenever the on-disk layout of a generation changes. Indices with
/// another version are recreated from scratch.
pub const INDEX_FORMAT_VERSION: &str = "5";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Local,
    Remote,
}

impl IndexKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexKind::Local => "local",
            IndexKind::Remote => "remote",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "local" => Some(IndexKind::Local),
            "remote" => Some(IndexKind::Remote),
            _ => None,
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of `index.properties`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    pub kind: IndexKind,
    pub repository_ids: BTreeSet<String>,
    pub path_or_url: String,
    pub version: String,
    pub last_update: Option<u64>,
    pub data_dir_name: Option<String>,
    pub failure_message: Option<String>,
}

impl IndexMetadata {
    pub fn new(kind: IndexKind, repository_ids: BTreeSet<String>, path_or_url: String) -> Self {
        Self {
            kind,
            repository_ids,
            path_or_url,
            version: INDEX_FORMAT_VERSION.to_string(),
            last_update: None,
            data_dir_name: None,
            failure_message: None,
        }
    }

    pub fn is_current_version(&self) -> bool {
        self.version == INDEX_FORMAT_VERSION
    }

    /// `Ok(None)` when `dir` has no metadata file.
    pub fn read(dir: &Path) -> Result<Option<Self>, IndexError> {
        let path = dir.join(INDEX_PROPERTIES);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(IndexError::io(path, err)),
        };
        Self::parse(&text)
            .map(Some)
            .map_err(|message| IndexError::Metadata { path, message })
    }

    fn parse(text: &str) -> Result<Self, String> {
        let mut kind = None;
        let mut ids = BTreeSet::new();
        let mut path_or_url = None;
        let mut version = None;
        let mut last_update = None;
        let mut data_dir_name = None;
        let mut failure_message = None;

        for line in text.lines() {
            let line = line.trim_start();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = unescape(value.trim_start());
            match key.trim() {
                "kind" => {
                    kind = Some(IndexKind::parse(&value).ok_or(format!("unknown kind `{value}`"))?)
                }
                "id" => ids.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string),
                ),
                "pathOrUrl" => path_or_url = Some(value),
                "version" => version = Some(value),
                "lastUpdate" => {
                    last_update = Some(
                        value
                            .parse::<u64>()
                            .map_err(|err| format!("invalid lastUpdate `{value}`: {err}"))?,
                    )
                }
                "dataDirName" => data_dir_name = Some(value).filter(|v| !v.is_empty()),
                "failureMessage" => failure_message = Some(value).filter(|v| !v.is_empty()),
                _ => {}
            }
        }

        Ok(Self {
            kind: kind.ok_or("missing kind")?,
            repository_ids: ids,
            path_or_url: path_or_url.ok_or("missing pathOrUrl")?,
            version: version.ok_or("missing version")?,
            last_update,
            data_dir_name,
            failure_message,
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#Strata package index\n");
        let mut put = |key: &str, value: &str| {
            out.push_str(key);
            out.push('=');
            out.push_str(&escape(value));
            out.push('\n');
        };
        put("kind", self.kind.as_str());
        put(
            "id",
            &self
                .repository_ids
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(","),
        );
        put("pathOrUrl", &self.path_or_url);
        put("version", &self.version);
        if let Some(last_update) = self.last_update {
            put("lastUpdate", &last_update.to_string());
        }
        if let Some(name) = &self.data_dir_name {
            put("dataDirName", name);
        }
        if let Some(message) = &self.failure_message {
            put("failureMessage", message);
        }
        out
    }

    /// Replace `dir/index.properties` atomically.
    pub fn write(&self, dir: &Path) -> Result<(), IndexError> {
        let path = dir.join(INDEX_PROPERTIES);
        atomic_write(&path, self.render().as_bytes()).map_err(|err| IndexError::io(path, err))
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch => out.push(ch),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
