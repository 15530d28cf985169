use std::path::PathBuf;
use std::sync::Arc;

use strata_core::{MavenId, StaticSettings};
use strata_project::{ExplicitProfiles, ProjectsTree};
use strata_scheduler::CancellationToken;

use super::support::{assert_consistent, child_pom, pom, Recorder, Workspace};

fn sample() -> Workspace {
    let ws = Workspace::new();
    ws.write("pom.xml", &pom("g", "root", &["core", "apps"]));
    ws.write("core/pom.xml", &child_pom(("g", "root"), "core", ""));
    ws.write("apps/pom.xml", &pom("g", "apps", &["cli"]));
    ws.write("apps/cli/pom.xml", &child_pom(("g", "root"), "cli", ""));
    ws.write("tools/pom.xml", &pom("g", "tools", &[]));
    ws.manage(&["pom.xml", "tools/pom.xml"]);
    ws.tree.update_all(false, &CancellationToken::new()).unwrap();
    ws
}

fn paths(projects: &[strata_project::ProjectDescriptor]) -> Vec<PathBuf> {
    projects.iter().map(|p| p.path().to_path_buf()).collect()
}

#[test]
fn round_trip_preserves_graph_and_state() {
    let ws = sample();
    ws.tree
        .set_ignored_files(&[ws.path("tools/pom.xml")]);
    ws.tree
        .set_ignored_patterns(vec!["**/generated/**".to_string()])
        .unwrap();
    ws.tree
        .set_explicit_profiles(ExplicitProfiles::new(["dev"], ["slow"]));

    let file = ws.path(".strata/tree.bin");
    ws.tree.save(&file).unwrap();

    let loaded = ProjectsTree::load(&file, Arc::new(StaticSettings::default()))
        .unwrap()
        .expect("snapshot in current format");

    assert_eq!(paths(&loaded.root_projects()), paths(&ws.tree.root_projects()));
    assert_eq!(loaded.project_paths(), ws.tree.project_paths());
    for project in ws.tree.projects() {
        let copy = loaded.find_project(project.path()).unwrap();
        assert_eq!(copy.id(), project.id());
        assert_eq!(*copy.state(), *project.state());
        assert_eq!(paths(&loaded.modules(&copy)), paths(&ws.tree.modules(&project)));
    }
    assert_eq!(
        loaded
            .find_project_by_id(&MavenId::new("g", "cli", "1.0"))
            .map(|p| p.path().to_path_buf()),
        Some(ws.path("apps/cli/pom.xml"))
    );
    assert_eq!(loaded.managed_files(), ws.tree.managed_files());
    assert_eq!(loaded.ignored_files(), vec![ws.path("tools/pom.xml")]);
    assert_eq!(loaded.ignored_patterns(), vec!["**/generated/**".to_string()]);
    assert_eq!(loaded.explicit_profiles(), ExplicitProfiles::new(["dev"], ["slow"]));
    assert_consistent(&loaded);
}

#[test]
fn loaded_tree_does_not_reread_unchanged_files() {
    let ws = sample();
    let file = ws.path("tree.bin");
    ws.tree.save(&file).unwrap();

    let settings = StaticSettings::with_local_repository(ws.path("repo"));
    let loaded = ProjectsTree::load(&file, Arc::new(settings)).unwrap().unwrap();
    let events = Recorder::attach(&loaded);

    loaded.update_all(false, &CancellationToken::new()).unwrap();
    assert!(events.take_updates().is_empty());

    // Stamps handed out after loading stay ahead of the restored ones.
    let root = loaded.find_project(&ws.path("pom.xml")).unwrap();
    let restored = root.state().last_read_stamp;
    ws.write("pom.xml", &pom("g", "root", &["core", "apps"]));
    loaded
        .update(
            &[ws.path("pom.xml")],
            &[],
            false,
            &ExplicitProfiles::default(),
            &CancellationToken::new(),
        )
        .unwrap();
    assert!(root.state().last_read_stamp > restored);
}
