use std::sync::Arc;

use strata_index::{
    Archetype, IndexEvent, IndexKind, IndexManager, IndexState, Indexer, LocalRepositoryIndexer,
    UpdatingState, USER_ARCHETYPES_XML,
};
use strata_scheduler::{ProcessorQueues, TaskCategory};

use super::support::{Fixture, GatedIndexer};

fn open_manager(fx: &Fixture, indexer: Arc<dyn Indexer>) -> IndexManager {
    IndexManager::new(
        fx.path("indices"),
        indexer,
        Arc::new(fx.settings()),
        Arc::new(ProcessorQueues::new()),
    )
    .unwrap()
}

#[test]
fn ensure_index_is_keyed_by_normalized_location() {
    let fx = Fixture::new();
    let manager = open_manager(&fx, Arc::new(LocalRepositoryIndexer));
    let repo = fx.repo().to_string_lossy().into_owned();

    let local = manager
        .ensure_index(IndexKind::Local, "local", &repo)
        .unwrap();
    let again = manager
        .ensure_index(IndexKind::Local, "mirror", &format!("{repo}/"))
        .unwrap();
    assert!(Arc::ptr_eq(&local, &again));
    assert_eq!(
        local.repository_ids().into_iter().collect::<Vec<_>>(),
        vec!["local".to_string(), "mirror".to_string()]
    );

    let remote = manager
        .ensure_index(IndexKind::Remote, "central", "https://repo.example.org/maven2/")
        .unwrap();
    assert_eq!(remote.path_or_url(), "https://repo.example.org/maven2");
    assert_eq!(local.dir(), fx.path("indices/Index0"));
    assert_eq!(remote.dir(), fx.path("indices/Index1"));
    assert_eq!(manager.indices().len(), 2);
    assert!(manager.find_index("https://repo.example.org/maven2").is_some());
}

#[test]
fn indices_are_reloaded_and_unloadable_ones_dropped() {
    let fx = Fixture::new();
    fx.put_artifact("g/a/1/a-1.jar");
    {
        let manager = open_manager(&fx, Arc::new(LocalRepositoryIndexer));
        let index = manager
            .ensure_index(IndexKind::Local, "local", &fx.repo().to_string_lossy())
            .unwrap();
        manager.schedule_update(&[index], true);
        manager.wait_for_background_tasks();
        manager.close();
    }
    std::fs::create_dir_all(fx.path("indices/Index4")).unwrap();
    std::fs::write(fx.path("indices/Index4/index.properties"), "kind=bogus\n").unwrap();

    let manager = open_manager(&fx, Arc::new(LocalRepositoryIndexer));
    assert!(!fx.path("indices/Index4").exists());
    let index = manager.find_index(&fx.repo().to_string_lossy()).unwrap();
    assert!(index.has_version("g", "a", "1"));
    assert!(index.last_update().is_some());
}

#[test]
fn scheduled_update_moves_through_waiting_and_updating() {
    let fx = Fixture::new();
    fx.put_artifact("g/a/1/a-1.jar");
    let (started_tx, started_rx) = crossbeam_channel::unbounded();
    let (go_tx, go_rx) = crossbeam_channel::unbounded();
    let queues = Arc::new(ProcessorQueues::new());
    let manager = IndexManager::new(
        fx.path("indices"),
        Arc::new(GatedIndexer {
            started: started_tx,
            go: go_rx,
        }),
        Arc::new(fx.settings()),
        Arc::clone(&queues),
    )
    .unwrap();
    let events = manager.subscribe();
    let index = manager
        .ensure_index(IndexKind::Local, "local", &fx.repo().to_string_lossy())
        .unwrap();

    // Hold the post-processing queue so the update stays queued.
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
    queues.schedule(TaskCategory::PostProcessing, "hold", move |_| {
        let _ = release_rx.recv();
        Ok(())
    });

    manager.schedule_update(&[Arc::clone(&index)], false);
    manager.schedule_update(&[Arc::clone(&index)], false);
    assert_eq!(manager.updating_state(&index), UpdatingState::Waiting);

    release_tx.send(()).unwrap();
    started_rx.recv().unwrap();
    assert_eq!(manager.updating_state(&index), UpdatingState::Updating);

    go_tx.send(()).unwrap();
    manager.wait_for_background_tasks();
    assert_eq!(manager.updating_state(&index), UpdatingState::Idle);
    assert!(index.has_version("g", "a", "1"));

    // Coalesced: one scan, one completion event.
    assert!(started_rx.try_recv().is_err());
    assert_eq!(
        events.try_iter().collect::<Vec<_>>(),
        vec![IndexEvent::UpdateFinished {
            path_or_url: index.path_or_url(),
            error: None,
        }]
    );
    assert_eq!(queues.queue(TaskCategory::PostProcessing).stats().completed, 2);
}

#[test]
fn index_queued_again_during_its_batch_stays_waiting() {
    let fx = Fixture::new();
    fx.put_artifact("g/a/1/a-1.jar");
    std::fs::create_dir_all(fx.path("other")).unwrap();
    let (started_tx, started_rx) = crossbeam_channel::unbounded();
    let (go_tx, go_rx) = crossbeam_channel::unbounded();
    let queues = Arc::new(ProcessorQueues::new());
    let manager = IndexManager::new(
        fx.path("indices"),
        Arc::new(GatedIndexer {
            started: started_tx,
            go: go_rx,
        }),
        Arc::new(fx.settings()),
        Arc::clone(&queues),
    )
    .unwrap();
    let first = manager
        .ensure_index(IndexKind::Local, "local", &fx.repo().to_string_lossy())
        .unwrap();
    let second = manager
        .ensure_index(IndexKind::Local, "other", &fx.path("other").to_string_lossy())
        .unwrap();

    manager.schedule_update(&[Arc::clone(&first), Arc::clone(&second)], true);
    started_rx.recv().unwrap();
    go_tx.send(()).unwrap();
    started_rx.recv().unwrap();
    assert_eq!(manager.updating_state(&first), UpdatingState::Idle);
    assert_eq!(manager.updating_state(&second), UpdatingState::Updating);

    // Park the queue behind the running batch, then queue `first` again.
    let (held_tx, held_rx) = crossbeam_channel::bounded::<()>(1);
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
    queues.schedule(TaskCategory::PostProcessing, "hold", move |_| {
        let _ = held_tx.send(());
        let _ = release_rx.recv();
        Ok(())
    });
    manager.schedule_update(&[Arc::clone(&first)], true);
    assert_eq!(manager.updating_state(&first), UpdatingState::Waiting);

    go_tx.send(()).unwrap();
    held_rx.recv().unwrap();
    assert_eq!(manager.updating_state(&first), UpdatingState::Waiting);
    assert_eq!(manager.updating_state(&second), UpdatingState::Idle);

    // Still waiting, so this one is coalesced.
    manager.schedule_update(&[Arc::clone(&first)], true);

    release_tx.send(()).unwrap();
    started_rx.recv().unwrap();
    assert_eq!(manager.updating_state(&first), UpdatingState::Updating);
    go_tx.send(()).unwrap();
    manager.wait_for_background_tasks();

    assert_eq!(manager.updating_state(&first), UpdatingState::Idle);
    assert!(started_rx.try_recv().is_err());
    assert_eq!(queues.queue(TaskCategory::PostProcessing).stats().completed, 3);
}

#[test]
fn failed_update_still_returns_to_idle() {
    let fx = Fixture::new();
    let manager = open_manager(&fx, Arc::new(LocalRepositoryIndexer));
    let events = manager.subscribe();
    // The repository directory does not exist.
    let index = manager
        .ensure_index(IndexKind::Local, "local", &fx.repo().to_string_lossy())
        .unwrap();

    manager.schedule_update(&[Arc::clone(&index)], true);
    manager.wait_for_background_tasks();

    assert_eq!(manager.updating_state(&index), UpdatingState::Idle);
    assert!(index.failure_message().is_some());
    let events: Vec<IndexEvent> = events.try_iter().collect();
    assert!(matches!(
        events.as_slice(),
        [IndexEvent::UpdateFinished { error: Some(_), .. }]
    ));

    // A later schedule is accepted again.
    fx.put_artifact("g/a/1/a-1.jar");
    manager.schedule_update(&[Arc::clone(&index)], true);
    manager.wait_for_background_tasks();
    assert!(index.has_version("g", "a", "1"));
}

#[test]
fn broken_index_does_not_affect_its_siblings() {
    let fx = Fixture::new();
    fx.put_artifact("g/a/1/a-1.jar");
    std::fs::create_dir_all(fx.path("mirror/g/m/2")).unwrap();
    std::fs::write(fx.path("mirror/g/m/2/m-2.jar"), b"").unwrap();

    let (local_dir, local_data) = {
        let manager = open_manager(&fx, Arc::new(LocalRepositoryIndexer));
        let local = manager
            .ensure_index(IndexKind::Local, "local", &fx.repo().to_string_lossy())
            .unwrap();
        let mirror = manager
            .ensure_index(IndexKind::Local, "mirror", &fx.path("mirror").to_string_lossy())
            .unwrap();
        manager.schedule_update(&[Arc::clone(&local), Arc::clone(&mirror)], true);
        manager.wait_for_background_tasks();
        manager.close();
        (local.dir().to_path_buf(), local.data_dir_name().unwrap())
    };
    std::fs::write(local_dir.join(&local_data).join("groups.log"), b"\xff\xff").unwrap();

    let manager = open_manager(&fx, Arc::new(LocalRepositoryIndexer));
    let events = manager.subscribe();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen_in_listener = Arc::clone(&seen);
    manager.add_listener(Arc::new(move |index: &strata_index::PackageIndex| {
        seen_in_listener.lock().push(index.path_or_url());
    }));

    let local = manager.find_index(&fx.repo().to_string_lossy()).unwrap();
    let mirror = manager
        .find_index(&fx.path("mirror").to_string_lossy())
        .unwrap();
    assert!(!local.has_group_id("g"));
    assert!(local.is_broken());
    assert_eq!(*seen.lock(), vec![local.path_or_url()]);
    assert_eq!(
        events.try_iter().collect::<Vec<_>>(),
        vec![IndexEvent::IndexIsBroken {
            path_or_url: local.path_or_url()
        }]
    );

    assert_eq!(mirror.state(), IndexState::Open);
    assert!(mirror.has_version("g", "m", "2"));

    manager.schedule_update(&[Arc::clone(&local)], false);
    manager.wait_for_background_tasks();
    assert!(local.has_version("g", "a", "1"));
}

#[test]
fn artifacts_reach_the_local_index_holding_them() {
    let fx = Fixture::new();
    let manager = open_manager(&fx, Arc::new(LocalRepositoryIndexer));
    let local = manager
        .ensure_index(IndexKind::Local, "local", &fx.repo().to_string_lossy())
        .unwrap();

    assert!(manager.add_artifact(&fx.repo().join("g/a/3/a-3.jar")));
    assert!(!manager.add_artifact(&fx.path("elsewhere/g/a/3/a-3.jar")));
    assert!(local.has_version("g", "a", "3"));
}

#[test]
fn user_archetypes_collapse_duplicates() {
    let fx = Fixture::new();
    let manager = open_manager(&fx, Arc::new(LocalRepositoryIndexer));
    assert!(manager.user_archetypes().is_empty());

    let mut quickstart = Archetype::new("org.example", "quickstart", "1.0");
    manager.add_archetype(quickstart.clone());
    manager.add_archetype(Archetype::new("org.example", "webapp", "1.0"));
    quickstart.description = Some("updated".to_string());
    manager.add_archetype(quickstart.clone());

    let archetypes = manager.user_archetypes();
    assert_eq!(archetypes.len(), 2);
    assert_eq!(archetypes[0].artifact_id, "webapp");
    assert_eq!(archetypes[1], quickstart);
    assert!(fx.path("indices").join(USER_ARCHETYPES_XML).is_file());

    let reopened = IndexManager::new(
        fx.path("indices"),
        Arc::new(LocalRepositoryIndexer),
        Arc::new(fx.settings()),
        Arc::new(ProcessorQueues::new()),
    )
    .unwrap();
    assert_eq!(reopened.user_archetypes(), archetypes);
}
