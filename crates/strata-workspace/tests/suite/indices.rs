use strata_index::{IndexEvent, IndexKind};
use strata_workspace::WorkspaceEvent;

use super::support::{expect_event, Fixture};

#[test]
fn local_and_remote_indices_are_set_up() {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.index.remote.push(strata_config::RemoteRepositoryConfig {
        id: "central".to_string(),
        url: "https://repo.example.org/maven2/".to_string(),
    });
    let ctx = strata_workspace::WorkspaceContext::with_config(fx.root(), config).unwrap();

    let indices = ctx.index_manager().indices();
    assert_eq!(indices.len(), 2);
    let remote = ctx
        .index_manager()
        .find_index("https://repo.example.org/maven2")
        .unwrap();
    assert_eq!(remote.kind(), IndexKind::Remote);
    assert!(remote.repository_ids().contains("central"));
    assert_eq!(ctx.local_index().unwrap().kind(), IndexKind::Local);
    assert!(ctx
        .index_manager()
        .indices_dir()
        .starts_with(fx.root().join(".strata")));
}

#[test]
fn update_results_reach_subscribers() {
    let fx = Fixture::new();
    fx.put_artifact("org/lib/present/2.1/present-2.1.jar");
    let mut config = fx.config();
    config.index.remote.push(strata_config::RemoteRepositoryConfig {
        id: "central".to_string(),
        url: "https://repo.example.org/maven2".to_string(),
    });
    let ctx = strata_workspace::WorkspaceContext::with_config(fx.root(), config).unwrap();
    let events = ctx.subscribe();
    let local = ctx.local_index().unwrap().path_or_url();

    ctx.schedule_index_update(true);
    ctx.wait_for_all();

    // Indices are updated in key order; the local path sorts first.
    let finished = |event: &WorkspaceEvent| {
        matches!(event, WorkspaceEvent::Index(IndexEvent::UpdateFinished { .. }))
    };
    match expect_event(&events, finished) {
        WorkspaceEvent::Index(IndexEvent::UpdateFinished { path_or_url, error }) => {
            assert_eq!(path_or_url, local);
            assert_eq!(error, None);
        }
        other => panic!("unexpected event {other:?}"),
    }
    match expect_event(&events, finished) {
        WorkspaceEvent::Index(IndexEvent::UpdateFinished { path_or_url, error }) => {
            assert_eq!(path_or_url, "https://repo.example.org/maven2");
            assert!(error.is_some(), "remote repositories cannot be scanned");
        }
        other => panic!("unexpected event {other:?}"),
    }

    let hits = ctx.search_artifacts("present", 10);
    assert_eq!(
        hits.iter().map(ToString::to_string).collect::<Vec<_>>(),
        vec!["org.lib:present:2.1"]
    );
}

#[test]
fn broken_index_is_rebuilt_in_the_background() {
    let fx = Fixture::new();
    fx.put_artifact("org/lib/present/2.1/present-2.1.jar");
    let groups_log = {
        let ctx = fx.open();
        ctx.schedule_index_update(true);
        ctx.wait_for_all();
        let local = ctx.local_index().unwrap();
        assert!(local.has_group_id("org.lib"));
        local.dir().join(local.data_dir_name().unwrap()).join("groups.log")
    };
    std::fs::write(&groups_log, b"\xff\xff").unwrap();

    let ctx = fx.open();
    let events = ctx.subscribe();
    let local = ctx.local_index().unwrap();

    assert!(!local.has_group_id("org.lib"));
    expect_event(&events, |event| {
        matches!(event, WorkspaceEvent::Index(IndexEvent::IndexIsBroken { .. }))
    });

    ctx.wait_for_all();
    assert!(!local.is_broken());
    assert!(local.has_version("org.lib", "present", "2.1"));
}
