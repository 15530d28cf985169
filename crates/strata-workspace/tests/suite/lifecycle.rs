use strata_project::ExplicitProfiles;
use strata_workspace::{WorkspaceContext, WorkspaceEvent};

use super::support::{expect_event, Fixture};

#[test]
fn tree_is_restored_from_the_snapshot() {
    let fx = Fixture::new();
    let root_pom = fx.write_app();
    {
        let ctx = fx.open();
        ctx.add_managed_files(&[root_pom.clone()], &ExplicitProfiles::default());
        ctx.wait_for_all();
        ctx.close();
        assert!(ctx.snapshot_path().is_file());
        assert!(!ctx.has_unsaved_changes());
        // Closing twice is harmless.
        ctx.close();
    }

    let ctx = fx.open();
    let tree = ctx.tree();
    assert_eq!(tree.root_projects().len(), 1);
    assert_eq!(tree.projects().len(), 2);
    assert!(tree.is_managed_file(&root_pom));
    let core = tree.find_project(&fx.root().join("core/pom.xml")).unwrap();
    assert!(core.state().resolved);
}

#[test]
fn unreadable_snapshot_starts_empty() {
    let fx = Fixture::new();
    let config = fx.config();
    let snapshot = config.workspace.snapshot_path_for(&fx.root());
    std::fs::create_dir_all(snapshot.parent().unwrap()).unwrap();
    std::fs::write(&snapshot, b"\x00\x01garbage").unwrap();

    let ctx = WorkspaceContext::with_config(fx.root(), config).unwrap();
    assert!(ctx.tree().root_projects().is_empty());
}

#[test]
fn changes_are_saved_periodically() {
    let fx = Fixture::new();
    let root_pom = fx.write_app();
    let mut config = fx.config();
    config.workspace.snapshot_interval_ms = 20;
    let ctx = WorkspaceContext::with_config(fx.root(), config).unwrap();
    let events = ctx.subscribe();

    ctx.add_managed_files(&[root_pom], &ExplicitProfiles::default());
    ctx.wait_for_all();

    let saved = expect_event(&events, |event| {
        matches!(event, WorkspaceEvent::SnapshotSaved { .. })
    });
    let WorkspaceEvent::SnapshotSaved { path } = saved else {
        unreachable!()
    };
    assert_eq!(path, ctx.snapshot_path());
}

#[test]
fn open_reads_the_workspace_configuration() {
    let fx = Fixture::new();
    fx.put_artifact("junit/junit/4.13/junit-4.13.jar");
    fx.write(
        "strata.toml",
        &format!(
            "[maven]\nlocal_repository = '{}'\nuser_settings = '{}'\n\n\
             [index]\nupdate_on_startup = true\n\n\
             [workspace]\nsnapshot_interval_ms = 0\nsnapshot_file = 'state/tree.bin'\n",
            fx.repo().display(),
            fx.path("no-settings.xml").display(),
        ),
    );

    let ctx = WorkspaceContext::open(fx.root()).unwrap();
    ctx.wait_for_all();

    assert_eq!(ctx.snapshot_path(), fx.root().join("state/tree.bin"));
    let local = ctx.local_index().unwrap();
    assert!(local.has_version("junit", "junit", "4.13"));
    assert!(local.last_update().is_some());
}

#[test]
fn invalid_ignore_pattern_is_rejected() {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.workspace.ignored_patterns = vec!["[".to_string()];

    let err = WorkspaceContext::with_config(fx.root(), config).unwrap_err();
    assert!(format!("{err:#}").contains("ignored_patterns"));
}
