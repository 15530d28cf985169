use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel::Receiver;
use strata_config::StrataConfig;
use strata_workspace::{WorkspaceContext, WorkspaceEvent};

pub struct Fixture {
    pub dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn root(&self) -> PathBuf {
        self.path("ws")
    }

    pub fn repo(&self) -> PathBuf {
        self.path("repo")
    }

    /// Settings isolated from the machine: no periodic saves, no startup
    /// index update, a private local repository.
    pub fn config(&self) -> StrataConfig {
        let mut config = StrataConfig::default();
        config.maven.local_repository = Some(self.repo());
        config.maven.user_settings = Some(self.path("no-settings.xml"));
        config.maven.global_settings = Some(self.path("no-global-settings.xml"));
        config.index.update_on_startup = false;
        config.workspace.snapshot_interval_ms = 0;
        config
    }

    pub fn open(&self) -> WorkspaceContext {
        WorkspaceContext::with_config(self.root(), self.config()).unwrap()
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn put_artifact(&self, rel: &str) -> PathBuf {
        let path = self.repo().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"").unwrap();
        path
    }

    /// `app` aggregating `core`, which depends on `org.lib:present:2.1`.
    pub fn write_app(&self) -> PathBuf {
        self.write(
            "core/pom.xml",
            "<project><groupId>g</groupId><artifactId>core</artifactId><version>1.0</version>\
             <dependencies><dependency><groupId>org.lib</groupId><artifactId>present</artifactId>\
             <version>2.1</version></dependency></dependencies></project>",
        );
        self.write(
            "pom.xml",
            "<project><groupId>g</groupId><artifactId>app</artifactId><version>1.0</version>\
             <packaging>pom</packaging><modules><module>core</module></modules></project>",
        )
    }
}

/// Wait for the first event matching `pred`, skipping others.
pub fn expect_event(
    rx: &Receiver<WorkspaceEvent>,
    pred: impl Fn(&WorkspaceEvent) -> bool,
) -> WorkspaceEvent {
    loop {
        let event = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("expected workspace event");
        if pred(&event) {
            return event;
        }
    }
}
