use strata_core::{MavenId, SettingsProvider};
use strata_project::{
    DependencyState, LocalRepositoryResolver, NativeHandle, ProjectChanges, ProjectError,
    ProjectResolver, ProjectState, ResolvedData, TreeEvent,
};
use strata_scheduler::{CancellationToken, DownloadPool};

use super::support::{pom, Workspace};

fn app_with_dependencies(ws: &Workspace) {
    ws.write(
        "pom.xml",
        &pom("g", "app", &[]).replace(
            "</project>",
            "<dependencies>\
               <dependency><groupId>org.lib</groupId><artifactId>present</artifactId><version>2.1</version></dependency>\
               <dependency><groupId>org.lib</groupId><artifactId>absent</artifactId><version>1.0</version></dependency>\
             </dependencies></project>",
        ),
    );
    ws.write("repo/org/lib/present/2.1/present-2.1.jar", "");
    ws.write("repo/org/lib/present/2.1/present-2.1-sources.jar", "");
    ws.manage(&["pom.xml"]);
    ws.update(&["pom.xml"]);
    ws.events.take();
}

#[test]
fn resolve_installs_new_state_and_fires_event() {
    let ws = Workspace::new();
    app_with_dependencies(&ws);
    let app = ws.tree.find_project(&ws.path("pom.xml")).unwrap();
    let before = app.state();

    let changes = ws
        .tree
        .resolve(&app, &LocalRepositoryResolver, &CancellationToken::new())
        .unwrap();
    assert!(changes.dependencies);

    let after = app.state();
    assert!(after.resolved);
    assert!(!before.resolved, "previous snapshot is untouched");
    assert_eq!(
        after.dependencies[0].state,
        DependencyState::Resolved(ws.path("repo/org/lib/present/2.1/present-2.1.jar"))
    );
    assert_eq!(after.unresolved_dependencies().len(), 1);
    assert_eq!(
        after.unresolved_dependencies()[0].id,
        MavenId::new("org.lib", "absent", "1.0")
    );
    assert!(!after.has_read_errors());

    let events = ws.events.take();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        TreeEvent::ProjectResolved { project, changes, .. } if project == &app && changes.dependencies
    ));

    // Resolving again replaces the previous resolution problems.
    ws.tree
        .resolve(&app, &LocalRepositoryResolver, &CancellationToken::new())
        .unwrap();
    assert_eq!(app.state().problems.len(), after.problems.len());
}

struct Rereading<'a> {
    ws: &'a Workspace,
}

impl ProjectResolver for Rereading<'_> {
    fn resolve(
        &self,
        state: &ProjectState,
        _settings: &dyn SettingsProvider,
        _token: &CancellationToken,
    ) -> Result<ResolvedData, ProjectError> {
        // The file changes while resolution is running.
        self.ws.write("pom.xml", &pom("g", "app", &[]));
        self.ws.update(&["pom.xml"]);
        Ok(ResolvedData {
            dependencies: state.dependencies.clone(),
            native_handle: Some(NativeHandle::new("stale")),
            ..ResolvedData::default()
        })
    }
}

#[test]
fn stale_resolution_is_discarded() {
    let ws = Workspace::new();
    app_with_dependencies(&ws);
    let app = ws.tree.find_project(&ws.path("pom.xml")).unwrap();

    let changes = ws
        .tree
        .resolve(&app, &Rereading { ws: &ws }, &CancellationToken::new())
        .unwrap();

    assert_eq!(changes, ProjectChanges::NONE);
    assert!(!app.state().resolved);
    assert!(app.state().dependencies.is_empty());
    assert!(!ws
        .events
        .take()
        .iter()
        .any(|event| matches!(event, TreeEvent::ProjectResolved { .. })));
}

struct Handing;

impl ProjectResolver for Handing {
    fn resolve(
        &self,
        state: &ProjectState,
        _settings: &dyn SettingsProvider,
        _token: &CancellationToken,
    ) -> Result<ResolvedData, ProjectError> {
        Ok(ResolvedData {
            dependencies: state.dependencies.clone(),
            plugins: state.plugins.clone(),
            native_handle: Some(NativeHandle::new(7_u32)),
            ..ResolvedData::default()
        })
    }
}

#[test]
fn native_handle_reaches_listeners() {
    let ws = Workspace::new();
    app_with_dependencies(&ws);
    let app = ws.tree.find_project(&ws.path("pom.xml")).unwrap();

    ws.tree
        .resolve(&app, &Handing, &CancellationToken::new())
        .unwrap();

    let events = ws.events.take();
    let TreeEvent::ProjectResolved { native_handle, .. } = &events[0] else {
        panic!("unexpected event {events:?}");
    };
    let handle = native_handle.as_ref().unwrap();
    assert_eq!(handle.downcast_ref::<u32>(), Some(&7));
}

#[test]
fn cancelled_resolution_changes_nothing() {
    let ws = Workspace::new();
    app_with_dependencies(&ws);
    let app = ws.tree.find_project(&ws.path("pom.xml")).unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let err = ws
        .tree
        .resolve(&app, &LocalRepositoryResolver, &token)
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(!app.state().resolved);
    assert!(ws.events.take().is_empty());
}

#[test]
fn folders_plugins_and_downloads() {
    let ws = Workspace::new();
    app_with_dependencies(&ws);
    ws.write("target/generated-sources/annotations/Gen.java", "class Gen {}");
    let app = ws.tree.find_project(&ws.path("pom.xml")).unwrap();
    let token = CancellationToken::new();

    let changes = ws
        .tree
        .resolve_folders(&app, &LocalRepositoryResolver, &token)
        .unwrap();
    assert!(changes.sources);
    assert!(app
        .state()
        .sources
        .contains(&ws.path("target/generated-sources/annotations")));

    let changes = ws
        .tree
        .resolve_plugins(&app, &LocalRepositoryResolver, &token)
        .unwrap();
    assert!(!changes.has_changes());

    ws.tree
        .resolve(&app, &LocalRepositoryResolver, &token)
        .unwrap();
    let outcomes = ws
        .tree
        .download_artifacts(&app, &LocalRepositoryResolver, &DownloadPool::new(2), &token)
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].1.is_resolved());

    let kinds: Vec<&str> = ws.events.take().iter().map(TreeEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            "folders-resolved",
            "plugins-resolved",
            "project-resolved",
            "artifacts-downloaded"
        ]
    );
}

/// Resolves the project's dependencies while its folders are being computed.
struct ResolvingMeanwhile<'a> {
    ws: &'a Workspace,
}

impl ProjectResolver for ResolvingMeanwhile<'_> {
    fn resolve(
        &self,
        state: &ProjectState,
        settings: &dyn SettingsProvider,
        token: &CancellationToken,
    ) -> Result<ResolvedData, ProjectError> {
        LocalRepositoryResolver.resolve(state, settings, token)
    }

    fn resolve_folders(
        &self,
        state: &ProjectState,
        token: &CancellationToken,
    ) -> Result<strata_project::ResolvedFolders, ProjectError> {
        let app = self.ws.tree.find_project(&self.ws.path("pom.xml")).unwrap();
        self.ws.tree.resolve(&app, &LocalRepositoryResolver, token)?;
        LocalRepositoryResolver.resolve_folders(state, token)
    }
}

#[test]
fn concurrent_resolution_steps_keep_each_others_results() {
    let ws = Workspace::new();
    app_with_dependencies(&ws);
    ws.write("target/generated-sources/apt/Gen.java", "class Gen {}");
    let app = ws.tree.find_project(&ws.path("pom.xml")).unwrap();

    let changes = ws
        .tree
        .resolve_folders(&app, &ResolvingMeanwhile { ws: &ws }, &CancellationToken::new())
        .unwrap();
    assert!(changes.sources);

    let state = app.state();
    assert!(state.resolved);
    assert!(state.dependencies[0].is_resolved());
    assert!(state.sources.contains(&ws.path("target/generated-sources/apt")));

    let kinds: Vec<&str> = ws.events.take().iter().map(TreeEvent::kind).collect();
    assert_eq!(kinds, vec!["project-resolved", "folders-resolved"]);
}
