use std::sync::Arc;

use strata_core::StaticSettings;
use strata_project::{DependencyState, ExplicitProfiles, TreeEvent};
use strata_scheduler::TaskCategory;
use strata_workspace::WorkspaceEvent;

use super::support::Fixture;

fn kinds(events: &[WorkspaceEvent]) -> Vec<&'static str> {
    events
        .iter()
        .filter_map(|event| match event {
            WorkspaceEvent::Tree(event) => Some(event.kind()),
            _ => None,
        })
        .collect()
}

#[test]
fn managed_pom_is_read_resolved_and_indexed() {
    let fx = Fixture::new();
    let jar = fx.put_artifact("org/lib/present/2.1/present-2.1.jar");
    let root_pom = fx.write_app();
    let ctx = fx.open();
    let events = ctx.subscribe();

    ctx.add_managed_files(&[root_pom.clone()], &ExplicitProfiles::default());
    ctx.wait_for_all();

    let tree = ctx.tree();
    let app = tree.find_project(&root_pom).unwrap();
    let core = tree.find_project(&fx.root().join("core/pom.xml")).unwrap();
    assert_eq!(tree.modules(&app), vec![core.clone()]);

    let state = core.state();
    assert!(state.resolved);
    assert_eq!(state.dependencies[0].state, DependencyState::Resolved(jar));

    let local = ctx.local_index().unwrap();
    assert!(local.has_version("org.lib", "present", "2.1"));

    let kinds = kinds(&events.try_iter().collect::<Vec<_>>());
    assert_eq!(kinds.iter().filter(|k| **k == "projects-updated").count(), 1);
    assert_eq!(kinds.iter().filter(|k| **k == "project-resolved").count(), 2);
    assert!(kinds.contains(&"folders-resolved"));
    assert!(kinds.contains(&"plugins-resolved"));
    assert!(!kinds.contains(&"artifacts-downloaded"));
    assert!(ctx.has_unsaved_changes());
}

#[test]
fn unchanged_reread_schedules_no_resolution() {
    let fx = Fixture::new();
    let root_pom = fx.write_app();
    let ctx = fx.open();
    ctx.add_managed_files(&[root_pom.clone()], &ExplicitProfiles::default());
    ctx.wait_for_all();
    let resolving = ctx.queues().queue(TaskCategory::Resolving).stats().completed;

    ctx.files_changed(&[root_pom], &[]);
    ctx.wait_for_all();

    assert_eq!(
        ctx.queues().queue(TaskCategory::Resolving).stats().completed,
        resolving
    );
}

#[test]
fn changed_dependency_re_resolves_its_dependents() {
    let fx = Fixture::new();
    fx.write(
        "lib/pom.xml",
        "<project><groupId>g</groupId><artifactId>lib</artifactId><version>1.0</version></project>",
    );
    fx.write(
        "app/pom.xml",
        "<project><groupId>g</groupId><artifactId>app</artifactId><version>1.0</version>\
         <dependencies><dependency><groupId>g</groupId><artifactId>lib</artifactId>\
         <version>1.0</version></dependency></dependencies></project>",
    );
    let lib_pom = fx.root().join("lib/pom.xml");
    let app_pom = fx.root().join("app/pom.xml");
    let ctx = fx.open();
    ctx.add_managed_files(&[lib_pom.clone(), app_pom.clone()], &ExplicitProfiles::default());
    ctx.wait_for_all();
    let events = ctx.subscribe();

    // Only `lib` is re-read, yet `app` depends on it.
    ctx.tree()
        .update(
            &[lib_pom.clone()],
            &[],
            true,
            &ExplicitProfiles::default(),
            &strata_scheduler::CancellationToken::new(),
        )
        .unwrap();
    ctx.wait_for_all();

    let resolved: Vec<_> = events
        .try_iter()
        .filter_map(|event| match event {
            WorkspaceEvent::Tree(TreeEvent::ProjectResolved { project, .. }) => {
                Some(project.path().to_path_buf())
            }
            _ => None,
        })
        .collect();
    assert_eq!(resolved, vec![lib_pom, app_pom]);
}

#[test]
fn ignored_projects_wait_until_unignored() {
    let fx = Fixture::new();
    let root_pom = fx.write_app();
    let mut config = fx.config();
    config.workspace.ignored_patterns = vec!["**/core/pom.xml".to_string()];
    let ctx = strata_workspace::WorkspaceContext::with_config(fx.root(), config).unwrap();

    ctx.add_managed_files(&[root_pom], &ExplicitProfiles::default());
    ctx.wait_for_all();
    let core = ctx
        .tree()
        .find_project(&fx.root().join("core/pom.xml"))
        .unwrap();
    assert!(ctx.tree().is_ignored(&core));
    assert!(!core.state().resolved);

    ctx.tree().set_ignored_patterns(Vec::new()).unwrap();
    ctx.wait_for_all();
    assert!(core.state().resolved);
}

#[test]
fn settings_change_resolves_against_the_new_repository() {
    let fx = Fixture::new();
    let root_pom = fx.write_app();
    let ctx = fx.open();
    ctx.add_managed_files(&[root_pom], &ExplicitProfiles::default());
    ctx.wait_for_all();
    let core = ctx
        .tree()
        .find_project(&fx.root().join("core/pom.xml"))
        .unwrap();
    assert!(!core.state().dependencies[0].is_resolved());

    let other = fx.path("other-repo");
    let jar = other.join("org/lib/present/2.1/present-2.1.jar");
    std::fs::create_dir_all(jar.parent().unwrap()).unwrap();
    std::fs::write(&jar, b"").unwrap();

    ctx.settings_changed(Arc::new(StaticSettings::with_local_repository(&other)));
    ctx.wait_for_all();

    assert_eq!(
        core.state().dependencies[0].state,
        DependencyState::Resolved(jar)
    );
    let index = ctx.local_index().unwrap();
    assert_eq!(index.path_or_url(), other.to_string_lossy());
    assert!(index.has_version("org.lib", "present", "2.1"));
    assert!(ctx.index_manager().find_index(&fx.repo().to_string_lossy()).is_some());
}

#[test]
fn profile_change_triggers_a_reread() {
    let fx = Fixture::new();
    fx.write(
        "pom.xml",
        "<project><groupId>g</groupId><artifactId>app</artifactId><version>1.0</version>\
         <packaging>pom</packaging>\
         <profiles><profile><id>extra</id><modules><module>extra</module></modules></profile></profiles>\
         </project>",
    );
    fx.write(
        "extra/pom.xml",
        "<project><groupId>g</groupId><artifactId>extra</artifactId><version>1.0</version></project>",
    );
    let ctx = fx.open();
    ctx.add_managed_files(&[fx.root().join("pom.xml")], &ExplicitProfiles::default());
    ctx.wait_for_all();
    assert_eq!(ctx.tree().projects().len(), 1);

    ctx.set_explicit_profiles(ExplicitProfiles::enabled(["extra"]));
    ctx.wait_for_all();
    assert_eq!(ctx.tree().projects().len(), 2);
}
