use strata_core::MavenId;
use strata_project::{ExplicitProfiles, ProjectChanges, TreeEvent};
use strata_scheduler::{CancellationToken, Cancelled};

use super::support::{assert_consistent, child_pom, pom, Workspace};

#[test]
fn root_with_one_module() {
    let ws = Workspace::new();
    ws.write("A/pom.xml", &pom("g", "a", &["sub"]));
    ws.write("A/sub/pom.xml", &child_pom(("g", "a"), "sub", ""));
    ws.manage(&["A/pom.xml"]);

    ws.update(&["A/pom.xml"]);

    let a = ws.tree.find_project(&ws.path("A/pom.xml")).unwrap();
    let sub = ws.tree.find_project(&ws.path("A/sub/pom.xml")).unwrap();
    assert_eq!(ws.tree.projects().len(), 2);
    assert_eq!(ws.tree.find_aggregator(&sub), Some(a.clone()));
    assert_eq!(ws.tree.modules(&a), vec![sub.clone()]);
    assert_eq!(ws.tree.root_projects(), vec![a.clone()]);
    assert_eq!(
        ws.tree.find_project_by_id(&MavenId::new("g", "sub", "1.0")),
        Some(sub.clone())
    );
    assert_consistent(&ws.tree);

    let updates = ws.events.take_updates();
    assert_eq!(updates.len(), 1, "one event per update call");
    assert_eq!(
        updates[0].0,
        vec![ws.path("A/pom.xml"), ws.path("A/sub/pom.xml")]
    );
    assert!(updates[0].1.is_empty());
}

#[test]
fn dropped_managed_module_becomes_root() {
    let ws = Workspace::new();
    ws.write("A/pom.xml", &pom("g", "a", &["sub"]));
    ws.write("A/sub/pom.xml", &pom("g", "sub", &[]));
    ws.manage(&["A/pom.xml", "A/sub/pom.xml"]);
    ws.update(&["A/pom.xml", "A/sub/pom.xml"]);
    let sub = ws.tree.find_project(&ws.path("A/sub/pom.xml")).unwrap();
    assert!(ws.tree.find_aggregator(&sub).is_some());
    ws.events.take();

    ws.write("A/pom.xml", &pom("g", "a", &[]));
    ws.update(&["A/pom.xml"]);

    assert_eq!(ws.tree.find_aggregator(&sub), None);
    assert_eq!(ws.tree.root_projects().len(), 2);
    assert!(ws.tree.root_projects().contains(&sub));
    assert_consistent(&ws.tree);

    let events = ws.events.take();
    assert_eq!(events.len(), 1);
    let TreeEvent::ProjectsUpdated { updated, deleted } = &events[0] else {
        panic!("unexpected event {events:?}");
    };
    assert!(deleted.is_empty());
    let sub_changes = updated
        .iter()
        .find(|(p, _)| p == &sub)
        .map(|(_, changes)| *changes);
    assert_eq!(sub_changes, Some(ProjectChanges::STRUCTURE));
}

#[test]
fn dropped_unmanaged_module_is_deleted_recursively() {
    let ws = Workspace::new();
    ws.write("pom.xml", &pom("g", "root", &["mid"]));
    ws.write("mid/pom.xml", &pom("g", "mid", &["leaf"]));
    ws.write("mid/leaf/pom.xml", &pom("g", "leaf", &[]));
    ws.manage(&["pom.xml"]);
    ws.update(&["pom.xml"]);
    assert_eq!(ws.tree.projects().len(), 3);
    ws.events.take();

    ws.write("pom.xml", &pom("g", "root", &[]));
    ws.update(&["pom.xml"]);

    assert_eq!(ws.tree.projects().len(), 1);
    assert!(ws.tree.find_project(&ws.path("mid/leaf/pom.xml")).is_none());
    assert!(ws
        .tree
        .find_project_by_id(&MavenId::new("g", "leaf", "1.0"))
        .is_none());
    assert_consistent(&ws.tree);

    let updates = ws.events.take_updates();
    assert_eq!(updates.len(), 1);
    let mut deleted = updates[0].1.clone();
    deleted.sort();
    assert_eq!(deleted, vec![ws.path("mid/leaf/pom.xml"), ws.path("mid/pom.xml")]);
}

#[test]
fn unchanged_update_is_silent() {
    let ws = Workspace::new();
    ws.write("pom.xml", &pom("g", "root", &["a", "b"]));
    ws.write("a/pom.xml", &child_pom(("g", "root"), "a", ""));
    ws.write("b/pom.xml", &child_pom(("g", "root"), "b", ""));
    ws.manage(&["pom.xml"]);

    ws.update(&["pom.xml"]);
    assert_eq!(ws.events.take_updates().len(), 1);

    ws.update(&["pom.xml"]);
    ws.tree.update_all(false, &CancellationToken::new()).unwrap();
    assert!(ws.events.take_updates().is_empty());
    assert_consistent(&ws.tree);
}

#[test]
fn forced_update_reports_everything() {
    let ws = Workspace::new();
    ws.write("pom.xml", &pom("g", "root", &["a"]));
    ws.write("a/pom.xml", &pom("g", "a", &[]));
    ws.manage(&["pom.xml"]);
    ws.update(&["pom.xml"]);
    ws.events.take();

    let paths = vec![ws.path("pom.xml")];
    ws.tree
        .update(&paths, &[], true, &ExplicitProfiles::default(), &CancellationToken::new())
        .unwrap();

    let events = ws.events.take();
    let TreeEvent::ProjectsUpdated { updated, .. } = &events[0] else {
        panic!("unexpected event {events:?}");
    };
    assert_eq!(updated.len(), 2);
    assert!(updated.iter().all(|(_, changes)| *changes == ProjectChanges::ALL));
}

#[test]
fn editing_parent_rereads_inheritors() {
    let ws = Workspace::new();
    ws.write("pom.xml", &pom("g", "root", &["child"]));
    ws.write("child/pom.xml", &child_pom(("g", "root"), "child", ""));
    ws.manage(&["pom.xml"]);
    ws.update(&["pom.xml"]);
    let child = ws.tree.find_project(&ws.path("child/pom.xml")).unwrap();
    let before = child.state().last_read_stamp;
    ws.events.take();

    ws.write(
        "pom.xml",
        &pom("g", "root", &["child"]).replace(
            "</project>",
            "<properties><java.version>21</java.version></properties></project>",
        ),
    );
    ws.update(&["pom.xml"]);

    assert!(child.state().last_read_stamp > before);
    let updates = ws.events.take_updates();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].0.contains(&ws.path("child/pom.xml")));
    assert_consistent(&ws.tree);
}

#[test]
fn deleting_aggregator_cascades_and_keeps_managed_modules() {
    let ws = Workspace::new();
    ws.write("pom.xml", &pom("g", "root", &["a", "b"]));
    ws.write("a/pom.xml", &pom("g", "a", &[]));
    ws.write("b/pom.xml", &pom("g", "b", &[]));
    ws.manage(&["pom.xml", "b/pom.xml"]);
    ws.update(&["pom.xml"]);
    ws.events.take();

    ws.delete(&["pom.xml"]);

    let b = ws.tree.find_project(&ws.path("b/pom.xml")).unwrap();
    assert_eq!(ws.tree.root_projects(), vec![b]);
    assert!(ws.tree.find_project(&ws.path("a/pom.xml")).is_none());
    assert_consistent(&ws.tree);

    let updates = ws.events.take_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, vec![ws.path("b/pom.xml")]);
    let mut deleted = updates[0].1.clone();
    deleted.sort();
    assert_eq!(deleted, vec![ws.path("a/pom.xml"), ws.path("pom.xml")]);
}

#[test]
fn deleting_parent_rereads_inheritors() {
    let ws = Workspace::new();
    ws.write("parent/pom.xml", &pom("g", "parent", &[]));
    ws.write("app/pom.xml", &child_pom(("g", "parent"), "app", ""));
    ws.manage(&["parent/pom.xml", "app/pom.xml"]);
    ws.update(&["parent/pom.xml", "app/pom.xml"]);
    let app = ws.tree.find_project(&ws.path("app/pom.xml")).unwrap();
    let before = app.state().last_read_stamp;
    ws.events.take();

    ws.delete(&["parent/pom.xml"]);

    assert!(app.state().last_read_stamp > before);
    let updates = ws.events.take_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, vec![ws.path("app/pom.xml")]);
    assert_eq!(updates[0].1, vec![ws.path("parent/pom.xml")]);
}

#[test]
fn self_and_mutual_module_references_do_not_loop() {
    let ws = Workspace::new();
    ws.write("pom.xml", &pom("g", "root", &[".", "b"]));
    ws.write("b/pom.xml", &pom("g", "b", &[".."]));
    ws.manage(&["pom.xml"]);

    ws.update(&["pom.xml"]);

    let root = ws.tree.find_project(&ws.path("pom.xml")).unwrap();
    let b = ws.tree.find_project(&ws.path("b/pom.xml")).unwrap();
    assert_eq!(ws.tree.root_projects(), vec![root.clone()]);
    assert_eq!(ws.tree.modules(&root), vec![b.clone()]);
    assert!(ws.tree.modules(&b).is_empty());
    assert_consistent(&ws.tree);
}

#[test]
fn first_aggregator_keeps_a_shared_module() {
    let ws = Workspace::new();
    ws.write("pom.xml", &pom("g", "root", &["x", "y"]));
    ws.write("x/pom.xml", &pom("g", "x", &["../shared"]));
    ws.write("y/pom.xml", &pom("g", "y", &["../shared"]));
    ws.write("shared/pom.xml", &pom("g", "shared", &[]));
    ws.manage(&["pom.xml"]);

    ws.update(&["pom.xml"]);

    let x = ws.tree.find_project(&ws.path("x/pom.xml")).unwrap();
    let y = ws.tree.find_project(&ws.path("y/pom.xml")).unwrap();
    let shared = ws.tree.find_project(&ws.path("shared/pom.xml")).unwrap();
    assert_eq!(ws.tree.find_aggregator(&shared), Some(x));
    assert!(ws.tree.modules(&y).is_empty());
    // Still declared, just not owned.
    assert_eq!(y.state().module_files, vec![ws.path("shared/pom.xml")]);
    assert_consistent(&ws.tree);
}

#[test]
fn missing_module_file_is_not_created() {
    let ws = Workspace::new();
    ws.write("pom.xml", &pom("g", "root", &["ghost"]));
    ws.manage(&["pom.xml"]);
    ws.update(&["pom.xml"]);

    let root = ws.tree.find_project(&ws.path("pom.xml")).unwrap();
    assert!(ws.tree.modules(&root).is_empty());
    assert_eq!(root.state().declared_modules, vec!["ghost"]);

    ws.write("ghost/pom.xml", &pom("g", "ghost", &[]));
    ws.update(&["ghost/pom.xml"]);
    let ghost = ws.tree.find_project(&ws.path("ghost/pom.xml")).unwrap();
    assert_eq!(ws.tree.find_aggregator(&ghost), Some(root));
    assert_consistent(&ws.tree);
}

#[test]
fn update_all_drops_unmanaged_roots() {
    let ws = Workspace::new();
    ws.write("one/pom.xml", &pom("g", "one", &[]));
    ws.write("two/pom.xml", &pom("g", "two", &[]));
    ws.manage(&["one/pom.xml", "two/pom.xml"]);
    ws.tree.update_all(false, &CancellationToken::new()).unwrap();
    assert_eq!(ws.tree.root_projects().len(), 2);

    ws.manage(&["one/pom.xml"]);
    ws.tree.update_all(false, &CancellationToken::new()).unwrap();
    assert_eq!(ws.tree.project_paths(), vec![ws.path("one/pom.xml")]);
}

#[test]
fn cancelled_update_returns_cancelled() {
    let ws = Workspace::new();
    ws.write("pom.xml", &pom("g", "root", &["a"]));
    ws.write("a/pom.xml", &pom("g", "a", &[]));
    ws.manage(&["pom.xml"]);

    let token = CancellationToken::new();
    token.cancel();
    let result = ws.tree.update(
        &[ws.path("pom.xml")],
        &[],
        false,
        &ExplicitProfiles::default(),
        &token,
    );
    assert_eq!(result, Err(Cancelled));
    assert!(ws.tree.projects().is_empty());
    assert!(ws.events.take_updates().is_empty());
}

#[test]
fn dependents_and_resolve_candidates() {
    let ws = Workspace::new();
    ws.write("pom.xml", &pom("g", "root", &["lib", "app", "broken", "heir"]));
    ws.write("lib/pom.xml", &pom("g", "lib", &[]));
    ws.write(
        "app/pom.xml",
        &pom("g", "app", &[]).replace(
            "</project>",
            "<dependencies><dependency><groupId>g</groupId><artifactId>lib</artifactId>\
             <version>1.0</version></dependency></dependencies></project>",
        ),
    );
    ws.write(
        "broken/pom.xml",
        "<project><groupId>g</groupId><artifactId>broken</artifactId><version>1.0</version></project>",
    );
    ws.write(
        "heir/pom.xml",
        "<project><parent><groupId>g</groupId><artifactId>broken</artifactId>\
         <version>1.0</version><relativePath>../broken/pom.xml</relativePath></parent>\
         <artifactId>heir</artifactId></project>",
    );
    ws.manage(&["pom.xml"]);
    ws.update(&["pom.xml"]);

    let lib = ws.tree.find_project(&ws.path("lib/pom.xml")).unwrap();
    let app = ws.tree.find_project(&ws.path("app/pom.xml")).unwrap();
    assert_eq!(ws.tree.dependent_projects(&lib), vec![app]);

    // Break the parent after the fact.
    ws.write("broken/pom.xml", "<project><artifactId>");
    ws.update(&["broken/pom.xml"]);
    let broken = ws.tree.find_project(&ws.path("broken/pom.xml")).unwrap();
    assert!(broken.has_read_errors());

    let candidates: Vec<_> = ws
        .tree
        .candidates_for_resolve()
        .iter()
        .map(|p| p.path().to_path_buf())
        .collect();
    assert!(candidates.contains(&ws.path("lib/pom.xml")));
    assert!(!candidates.contains(&ws.path("broken/pom.xml")));
    assert!(!candidates.contains(&ws.path("heir/pom.xml")));
}
