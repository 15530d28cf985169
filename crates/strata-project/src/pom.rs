//! Reading of project declaration files (`pom.xml`) into [`ProjectState`].
//!
//! Reading never fails: unreadable or malformed files produce a state with
//! whatever could be recovered plus a [`ReadProblem`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use strata_core::{normalize_path, MavenId, SettingsProvider};

use crate::model::{
    dedup_dependencies, next_read_stamp, Dependency, Plugin, ProblemKind, ProjectState,
    ReadProblem,
};
use crate::profiles::ExplicitProfiles;
use crate::timestamp::PROFILES_XML;

const DEFAULT_PLUGIN_GROUP: &str = "org.apache.maven.plugins";
const DEFAULT_PARENT_PATH: &str = "../pom.xml";

pub struct PomReader;

impl PomReader {
    /// Parse `path` with the given explicit profiles and settings.
    ///
    /// Performs file I/O; callers must not hold tree locks.
    pub fn read(
        path: &Path,
        explicit: &ExplicitProfiles,
        settings: &dyn SettingsProvider,
    ) -> ProjectState {
        let mut state = ProjectState::unread(path);
        state.last_read_stamp = next_read_stamp();

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                tracing::debug!(
                    target = "strata.project",
                    path = %path.display(),
                    error = %err,
                    "failed to read project file"
                );
                state.problems.push(ReadProblem::new(
                    path,
                    ProblemKind::Missing,
                    format!("cannot read file: {err}"),
                ));
                return state;
            }
        };

        let doc = match roxmltree::Document::parse(&contents) {
            Ok(doc) => doc,
            Err(err) => {
                state.problems.push(ReadProblem::new(
                    path,
                    ProblemKind::Syntax,
                    err.to_string(),
                ));
                return state;
            }
        };

        let project = doc.root_element();
        if project.tag_name().name() != "project" {
            state.problems.push(ReadProblem::new(
                path,
                ProblemKind::Structure,
                format!(
                    "expected <project> root element, found <{}>",
                    project.tag_name().name()
                ),
            ));
            return state;
        }

        let raw = RawPom::parse(project);
        let mut profiles = raw.profiles.clone();
        profiles.extend(read_profiles_xml(path, &mut state.problems));

        build_state(path, raw, profiles, explicit, settings, state)
    }
}

#[derive(Debug, Clone, Default)]
struct RawParent {
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
    relative_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct RawDependency {
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
    scope: Option<String>,
    classifier: Option<String>,
    type_: Option<String>,
    optional: bool,
}

#[derive(Debug, Clone, Default)]
struct RawPlugin {
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
    extensions: bool,
}

/// Elements allowed both at the top level and inside a `<profile>`.
#[derive(Debug, Clone, Default)]
struct RawSection {
    modules: Vec<String>,
    properties: BTreeMap<String, String>,
    dependencies: Vec<RawDependency>,
    dependency_management: Vec<RawDependency>,
    plugins: Vec<RawPlugin>,
    plugin_management: Vec<RawPlugin>,
    resources: Vec<String>,
    test_resources: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct RawActivation {
    active_by_default: bool,
    property: Option<(String, Option<String>)>,
    file_exists: Option<String>,
    file_missing: Option<String>,
}

impl RawActivation {
    fn has_rules(&self) -> bool {
        self.property.is_some() || self.file_exists.is_some() || self.file_missing.is_some()
    }
}

#[derive(Debug, Clone, Default)]
struct RawProfile {
    id: String,
    activation: RawActivation,
    section: RawSection,
}

#[derive(Debug, Clone, Default)]
struct RawPom {
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
    name: Option<String>,
    packaging: Option<String>,
    parent: Option<RawParent>,
    source_directory: Option<String>,
    test_source_directory: Option<String>,
    build_directory: Option<String>,
    output_directory: Option<String>,
    test_output_directory: Option<String>,
    section: RawSection,
    profiles: Vec<RawProfile>,
}

impl RawPom {
    fn parse(project: roxmltree::Node<'_, '_>) -> Self {
        let mut pom = RawPom {
            group_id: child_text(project, "groupId"),
            artifact_id: child_text(project, "artifactId"),
            version: child_text(project, "version"),
            name: child_text(project, "name"),
            packaging: child_text(project, "packaging"),
            section: RawSection::parse(project),
            ..RawPom::default()
        };

        if let Some(parent) = child_element(project, "parent") {
            pom.parent = Some(RawParent {
                group_id: child_text(parent, "groupId"),
                artifact_id: child_text(parent, "artifactId"),
                version: child_text(parent, "version"),
                relative_path: child_text(parent, "relativePath"),
            });
        }

        if let Some(build) = child_element(project, "build") {
            pom.source_directory = child_text(build, "sourceDirectory");
            pom.test_source_directory = child_text(build, "testSourceDirectory");
            pom.build_directory = child_text(build, "directory");
            pom.output_directory = child_text(build, "outputDirectory");
            pom.test_output_directory = child_text(build, "testOutputDirectory");
        }

        if let Some(profiles) = child_element(project, "profiles") {
            pom.profiles = parse_profiles(profiles);
        }

        pom
    }
}

impl RawSection {
    fn parse(node: roxmltree::Node<'_, '_>) -> Self {
        let mut section = RawSection::default();

        if let Some(modules) = child_element(node, "modules") {
            section.modules = child_texts(modules, "module");
        }

        if let Some(props) = child_element(node, "properties") {
            for child in props.children().filter(|n| n.is_element()) {
                let key = child.tag_name().name().to_string();
                let value = child.text().map(str::trim).unwrap_or_default();
                section.properties.insert(key, value.to_string());
            }
        }

        if let Some(deps) = child_element(node, "dependencies") {
            section.dependencies = parse_dependencies(deps);
        }
        if let Some(deps) = child_element(node, "dependencyManagement")
            .and_then(|mgmt| child_element(mgmt, "dependencies"))
        {
            section.dependency_management = parse_dependencies(deps);
        }

        if let Some(build) = child_element(node, "build") {
            if let Some(plugins) = child_element(build, "plugins") {
                section.plugins = parse_plugins(plugins);
            }
            if let Some(plugins) = child_element(build, "pluginManagement")
                .and_then(|mgmt| child_element(mgmt, "plugins"))
            {
                section.plugin_management = parse_plugins(plugins);
            }
            if let Some(resources) = child_element(build, "resources") {
                section.resources = parse_resource_dirs(resources, "resource");
            }
            if let Some(resources) = child_element(build, "testResources") {
                section.test_resources = parse_resource_dirs(resources, "testResource");
            }
        }

        section
    }

    fn merge(&mut self, other: &RawSection) {
        self.modules.extend(other.modules.iter().cloned());
        for (key, value) in &other.properties {
            self.properties.insert(key.clone(), value.clone());
        }
        self.dependencies.extend(other.dependencies.iter().cloned());
        self.dependency_management
            .extend(other.dependency_management.iter().cloned());
        self.plugins.extend(other.plugins.iter().cloned());
        self.plugin_management
            .extend(other.plugin_management.iter().cloned());
        self.resources.extend(other.resources.iter().cloned());
        self.test_resources.extend(other.test_resources.iter().cloned());
    }
}

fn parse_dependencies(node: roxmltree::Node<'_, '_>) -> Vec<RawDependency> {
    node.children()
        .filter(|n| n.is_element() && n.has_tag_name("dependency"))
        .map(|dep| RawDependency {
            group_id: child_text(dep, "groupId"),
            artifact_id: child_text(dep, "artifactId"),
            version: child_text(dep, "version"),
            scope: child_text(dep, "scope"),
            classifier: child_text(dep, "classifier"),
            type_: child_text(dep, "type"),
            optional: child_text(dep, "optional").is_some_and(|v| v == "true"),
        })
        .collect()
}

fn parse_plugins(node: roxmltree::Node<'_, '_>) -> Vec<RawPlugin> {
    node.children()
        .filter(|n| n.is_element() && n.has_tag_name("plugin"))
        .map(|plugin| RawPlugin {
            group_id: child_text(plugin, "groupId"),
            artifact_id: child_text(plugin, "artifactId"),
            version: child_text(plugin, "version"),
            extensions: child_text(plugin, "extensions").is_some_and(|v| v == "true"),
        })
        .collect()
}

fn parse_resource_dirs(node: roxmltree::Node<'_, '_>, tag: &str) -> Vec<String> {
    node.children()
        .filter(|n| n.is_element() && n.has_tag_name(tag))
        .filter_map(|n| child_text(n, "directory"))
        .collect()
}

fn parse_profiles(node: roxmltree::Node<'_, '_>) -> Vec<RawProfile> {
    node.children()
        .filter(|n| n.is_element() && n.has_tag_name("profile"))
        .filter_map(|profile| {
            let id = child_text(profile, "id")?;
            let mut activation = RawActivation::default();
            if let Some(node) = child_element(profile, "activation") {
                activation.active_by_default =
                    child_text(node, "activeByDefault").is_some_and(|v| v == "true");
                if let Some(property) = child_element(node, "property") {
                    if let Some(name) = child_text(property, "name") {
                        activation.property = Some((name, child_text(property, "value")));
                    }
                }
                if let Some(file) = child_element(node, "file") {
                    activation.file_exists = child_text(file, "exists");
                    activation.file_missing = child_text(file, "missing");
                }
            }
            Some(RawProfile {
                id,
                activation,
                section: RawSection::parse(profile),
            })
        })
        .collect()
}

/// Profiles from `profiles.xml` next to `pom`. Both the
/// `<profilesXml><profiles>` and a bare `<profiles>` root are accepted.
fn read_profiles_xml(pom: &Path, problems: &mut Vec<ReadProblem>) -> Vec<RawProfile> {
    let Some(dir) = pom.parent() else {
        return Vec::new();
    };
    let path = dir.join(PROFILES_XML);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            problems.push(ReadProblem::new(
                &path,
                ProblemKind::Missing,
                format!("cannot read file: {err}"),
            ));
            return Vec::new();
        }
    };
    let doc = match roxmltree::Document::parse(&contents) {
        Ok(doc) => doc,
        Err(err) => {
            problems.push(ReadProblem::new(&path, ProblemKind::Syntax, err.to_string()));
            return Vec::new();
        }
    };

    let root = doc.root_element();
    let profiles = if root.has_tag_name("profiles") {
        Some(root)
    } else {
        child_element(root, "profiles")
    };
    profiles.map(parse_profiles).unwrap_or_default()
}

fn build_state(
    path: &Path,
    raw: RawPom,
    profiles: Vec<RawProfile>,
    explicit: &ExplicitProfiles,
    settings: &dyn SettingsProvider,
    mut state: ProjectState,
) -> ProjectState {
    let dir = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();

    let parent = raw.parent.as_ref();
    let group_id = raw
        .group_id
        .clone()
        .or_else(|| parent.and_then(|p| p.group_id.clone()));
    let version = raw
        .version
        .clone()
        .or_else(|| parent.and_then(|p| p.version.clone()));

    // Placeholders inside coordinates only see the plain properties.
    let mut props = builtin_properties(&dir, group_id.as_deref(), raw.artifact_id.as_deref(), version.as_deref(), parent);
    for (key, value) in &raw.section.properties {
        props.insert(key.clone(), value.clone());
    }

    let mut seen_ids = HashSet::new();
    let mut declared_profiles = Vec::new();
    for profile in &profiles {
        if seen_ids.insert(profile.id.clone()) {
            declared_profiles.push(profile.id.clone());
        }
    }

    let active = select_active_profiles(&profiles, explicit, settings, &props, &dir);

    let mut section = raw.section.clone();
    for profile in profiles.iter().filter(|p| active.contains(&p.id)) {
        section.merge(&profile.section);
    }
    for (key, value) in &section.properties {
        props.insert(key.clone(), value.clone());
    }
    let props = expand_properties(props);
    let resolve = |text: &str| resolve_placeholders(text, &props);
    let resolve_opt = |text: &Option<String>| text.as_deref().map(|t| resolve(t));

    state.id = MavenId::from_parts(
        group_id.as_deref().map(resolve),
        raw.artifact_id.as_deref().map(resolve),
        version.as_deref().map(resolve),
    );
    if raw.artifact_id.is_none() {
        state.problems.push(ReadProblem::new(
            path,
            ProblemKind::Structure,
            "<artifactId> is missing",
        ));
    }
    if let Some(parent) = parent {
        state.parent_id = Some(MavenId::from_parts(
            resolve_opt(&parent.group_id),
            resolve_opt(&parent.artifact_id),
            resolve_opt(&parent.version),
        ));
        state.parent_relative_path = Some(
            parent
                .relative_path
                .clone()
                .unwrap_or_else(|| DEFAULT_PARENT_PATH.to_string()),
        );
    }
    state.name = resolve_opt(&raw.name);
    if let Some(packaging) = resolve_opt(&raw.packaging) {
        state.packaging = packaging;
    }

    let (declared_modules, module_files) = resolve_modules(&dir, &section.modules, &resolve);
    state.declared_modules = declared_modules;
    state.module_files = module_files;

    let build_dir = dir_or_default(&dir, resolve_opt(&raw.build_directory), "target");
    let mut build_props = props.clone();
    build_props.insert(
        "project.build.directory".to_string(),
        build_dir.to_string_lossy().into_owned(),
    );
    let resolve_build = |text: &Option<String>| {
        text.as_deref()
            .map(|t| resolve_placeholders(t, &build_props))
    };
    state.output_directory = match resolve_build(&raw.output_directory) {
        Some(out) => normalize_path(&dir.join(out)),
        None => build_dir.join("classes"),
    };
    state.test_output_directory = match resolve_build(&raw.test_output_directory) {
        Some(out) => normalize_path(&dir.join(out)),
        None => build_dir.join("test-classes"),
    };
    state.build_directory = build_dir;

    state.sources = vec![dir_or_default(
        &dir,
        resolve_opt(&raw.source_directory),
        "src/main/java",
    )];
    state.test_sources = vec![dir_or_default(
        &dir,
        resolve_opt(&raw.test_source_directory),
        "src/test/java",
    )];
    state.resources = resource_dirs(&dir, &section.resources, "src/main/resources", &resolve);
    state.test_resources =
        resource_dirs(&dir, &section.test_resources, "src/test/resources", &resolve);

    state.dependencies = resolve_dependencies(path, &section, &resolve, &mut state.problems);
    state.plugins = resolve_plugins(&section, &resolve);

    state.declared_profiles = declared_profiles;
    state.activated_profiles = active;
    state.properties = section
        .properties
        .iter()
        .map(|(key, value)| (key.clone(), resolve(value)))
        .collect();

    state
}

fn builtin_properties(
    dir: &Path,
    group_id: Option<&str>,
    artifact_id: Option<&str>,
    version: Option<&str>,
    parent: Option<&RawParent>,
) -> BTreeMap<String, String> {
    let mut props = BTreeMap::new();
    let basedir = dir.to_string_lossy().into_owned();
    props.insert("basedir".to_string(), basedir.clone());
    props.insert("project.basedir".to_string(), basedir);

    let mut insert = |suffix: &str, value: Option<&str>| {
        if let Some(value) = value {
            props.insert(format!("project.{suffix}"), value.to_string());
            props.insert(format!("pom.{suffix}"), value.to_string());
        }
    };
    insert("groupId", group_id);
    insert("artifactId", artifact_id);
    insert("version", version);
    if let Some(parent) = parent {
        insert("parent.groupId", parent.group_id.as_deref());
        insert("parent.artifactId", parent.artifact_id.as_deref());
        insert("parent.version", parent.version.as_deref());
    }
    props
}

/// Resolve references between properties; a few passes are enough for the
/// chains seen in practice and stop runaway self references.
fn expand_properties(mut props: BTreeMap<String, String>) -> BTreeMap<String, String> {
    for _ in 0..4 {
        let mut changed = false;
        let snapshot = props.clone();
        for value in props.values_mut() {
            if value.contains("${") {
                let expanded = resolve_placeholders(value, &snapshot);
                if expanded != *value {
                    *value = expanded;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    props
}

fn select_active_profiles(
    profiles: &[RawProfile],
    explicit: &ExplicitProfiles,
    settings: &dyn SettingsProvider,
    props: &BTreeMap<String, String>,
    dir: &Path,
) -> BTreeSet<String> {
    let mut active = BTreeSet::new();
    for profile in profiles {
        if explicit.enabled.contains(&profile.id)
            || settings.active_profiles().contains(&profile.id)
            || is_activated(&profile.activation, props, dir)
        {
            active.insert(profile.id.clone());
        }
    }
    if active.is_empty() {
        for profile in profiles.iter().filter(|p| p.activation.active_by_default) {
            active.insert(profile.id.clone());
        }
    }
    active.retain(|id| !explicit.disabled.contains(id));
    active
}

fn is_activated(activation: &RawActivation, props: &BTreeMap<String, String>, dir: &Path) -> bool {
    if !activation.has_rules() {
        return false;
    }

    if let Some((name, expected)) = &activation.property {
        let (name, negated) = match name.strip_prefix('!') {
            Some(name) => (name, true),
            None => (name.as_str(), false),
        };
        let actual = props.get(name);
        let matches = match (expected, actual) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(expected), Some(actual)) => match expected.strip_prefix('!') {
                Some(expected) => actual != expected,
                None => actual == expected,
            },
        };
        if matches == negated {
            return false;
        }
    }

    let file_path = |file: &str| {
        let file = resolve_placeholders(file, props);
        let file = Path::new(&file);
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            dir.join(file)
        }
    };
    if let Some(file) = &activation.file_exists {
        if !file_path(file).exists() {
            return false;
        }
    }
    if let Some(file) = &activation.file_missing {
        if file_path(file).exists() {
            return false;
        }
    }

    true
}

fn resolve_modules(
    dir: &Path,
    modules: &[String],
    resolve: &dyn Fn(&str) -> String,
) -> (Vec<String>, Vec<PathBuf>) {
    let mut declared = Vec::new();
    let mut files = Vec::new();
    let mut seen = HashSet::new();
    for module in modules {
        let module = resolve(module).replace('\\', "/");
        let module = module.trim_end_matches('/');
        if module.is_empty() {
            continue;
        }
        let file = if module.ends_with(".xml") {
            dir.join(module)
        } else {
            dir.join(module).join("pom.xml")
        };
        let file = normalize_path(&file);
        if seen.insert(file.clone()) {
            declared.push(module.to_string());
            files.push(file);
        }
    }
    (declared, files)
}

fn dir_or_default(dir: &Path, configured: Option<String>, default: &str) -> PathBuf {
    normalize_path(&dir.join(configured.as_deref().unwrap_or(default)))
}

fn resource_dirs(
    dir: &Path,
    configured: &[String],
    default: &str,
    resolve: &dyn Fn(&str) -> String,
) -> Vec<PathBuf> {
    if configured.is_empty() {
        return vec![normalize_path(&dir.join(default))];
    }
    let mut out: Vec<PathBuf> = Vec::new();
    for resource in configured {
        let path = normalize_path(&dir.join(resolve(resource)));
        if !out.contains(&path) {
            out.push(path);
        }
    }
    out
}

fn resolve_dependencies(
    path: &Path,
    section: &RawSection,
    resolve: &dyn Fn(&str) -> String,
    problems: &mut Vec<ReadProblem>,
) -> Vec<Dependency> {
    let resolve_opt = |text: &Option<String>| text.as_deref().map(resolve);

    let mut managed: HashMap<(String, String), String> = HashMap::new();
    for dep in &section.dependency_management {
        if let (Some(g), Some(a), Some(v)) = (
            resolve_opt(&dep.group_id),
            resolve_opt(&dep.artifact_id),
            resolve_opt(&dep.version),
        ) {
            managed.entry((g, a)).or_insert(v);
        }
    }

    let mut out = Vec::new();
    for raw in &section.dependencies {
        let (Some(group_id), Some(artifact_id)) =
            (resolve_opt(&raw.group_id), resolve_opt(&raw.artifact_id))
        else {
            problems.push(ReadProblem::new(
                path,
                ProblemKind::Dependency,
                "dependency without <groupId> or <artifactId>",
            ));
            continue;
        };
        let version = resolve_opt(&raw.version)
            .or_else(|| managed.get(&(group_id.clone(), artifact_id.clone())).cloned());
        if version.is_none() {
            problems.push(ReadProblem::new(
                path,
                ProblemKind::Dependency,
                format!("version is missing for {group_id}:{artifact_id}"),
            ));
        }

        let mut dep = Dependency::new(MavenId::from_parts(
            Some(group_id),
            Some(artifact_id),
            version,
        ));
        dep.scope = resolve_opt(&raw.scope);
        dep.classifier = resolve_opt(&raw.classifier);
        dep.type_ = resolve_opt(&raw.type_);
        dep.optional = raw.optional;
        out.push(dep);
    }
    dedup_dependencies(&mut out);
    out
}

fn resolve_plugins(section: &RawSection, resolve: &dyn Fn(&str) -> String) -> Vec<Plugin> {
    let resolve_opt = |text: &Option<String>| text.as_deref().map(resolve);
    let group_of = |plugin: &RawPlugin| {
        resolve_opt(&plugin.group_id).unwrap_or_else(|| DEFAULT_PLUGIN_GROUP.to_string())
    };

    let mut managed: HashMap<(String, String), String> = HashMap::new();
    for plugin in &section.plugin_management {
        if let (Some(a), Some(v)) = (resolve_opt(&plugin.artifact_id), resolve_opt(&plugin.version))
        {
            managed.entry((group_of(plugin), a)).or_insert(v);
        }
    }

    let mut out: Vec<Plugin> = Vec::new();
    for raw in &section.plugins {
        let Some(artifact_id) = resolve_opt(&raw.artifact_id) else {
            continue;
        };
        let group_id = group_of(raw);
        let version = resolve_opt(&raw.version)
            .or_else(|| managed.get(&(group_id.clone(), artifact_id.clone())).cloned());
        let plugin = Plugin {
            id: MavenId::from_parts(Some(group_id), Some(artifact_id), version),
            extensions: raw.extensions,
        };
        if !out.iter().any(|p| p.id == plugin.id) {
            out.push(plugin);
        }
    }
    out
}

fn child_element<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn child_text(node: roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    child_element(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn child_texts(node: roxmltree::Node<'_, '_>, name: &str) -> Vec<String> {
    node.children()
        .filter(|n| n.is_element() && n.has_tag_name(name))
        .filter_map(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn resolve_placeholders(text: &str, props: &BTreeMap<String, String>) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid regex"));

    re.replace_all(text, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        props
            .get(key)
            .cloned()
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}
