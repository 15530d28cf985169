use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use strata_config::StrataConfig;
use strata_core::canonical_path;
use strata_index::{ArtifactInfo, PackageIndex};
use strata_project::{DependencyState, ExplicitProfiles, ProjectDescriptor, ProjectsTree};
use strata_workspace::WorkspaceContext;

#[derive(Parser)]
#[command(name = "strata", version, about = "Strata CLI (project tree, package indices)")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read a root POM with its modules and print the project tree
    Tree(TreeArgs),
    /// Inspect and maintain the package indices of a workspace
    Index(IndexArgs),
}

#[derive(Args)]
struct TreeArgs {
    /// Root `pom.xml`, or the directory containing it
    path: PathBuf,
    /// Profiles to enable (comma separated)
    #[arg(long, value_delimiter = ',')]
    profiles: Vec<String>,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct IndexArgs {
    #[command(subcommand)]
    command: IndexCommand,
    /// Workspace root (defaults to current directory)
    #[arg(long, default_value = ".")]
    path: PathBuf,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum IndexCommand {
    /// List indices with their state
    Status,
    /// Update every index
    Update {
        /// Rescan instead of carrying known artifacts forward
        #[arg(long)]
        full: bool,
    },
    /// Rebuild indices that are broken or whose last update failed
    Repair,
    /// Search artifacts by coordinates
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        max: usize,
    },
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Tree(args) => run_tree(args),
        Command::Index(args) => run_index(args),
    }
}

/// Load the workspace configuration, install logging and open the context.
///
/// The CLI is short-lived: periodic snapshot saves are off, and index updates
/// only run when asked for.
fn open_workspace(root: &Path) -> Result<WorkspaceContext> {
    let (mut config, config_path) = strata_config::load_for_workspace(root)
        .with_context(|| format!("failed to load configuration for {}", root.display()))?;
    strata_config::init_tracing(&config.logging);
    tracing::debug!(
        target = "strata.cli",
        root = %root.display(),
        config = ?config_path,
        "opening workspace"
    );
    config.workspace.snapshot_interval_ms = 0;
    config.index.update_on_startup = false;
    open_with(root, config)
}

fn open_with(root: &Path, config: StrataConfig) -> Result<WorkspaceContext> {
    WorkspaceContext::with_config(root, config)
        .with_context(|| format!("failed to open workspace {}", root.display()))
}

// --- tree --------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct TreeReport {
    root: PathBuf,
    projects: Vec<ProjectNode>,
    summary: TreeSummary,
}

#[derive(Debug, Default, Serialize)]
struct TreeSummary {
    projects: usize,
    read_errors: usize,
    unresolved: usize,
}

#[derive(Debug, Serialize)]
struct ProjectNode {
    id: String,
    path: PathBuf,
    packaging: String,
    ignored: bool,
    problems: Vec<String>,
    unresolved: Vec<String>,
    modules: Vec<ProjectNode>,
}

fn run_tree(args: TreeArgs) -> Result<i32> {
    let path = canonical_path(&args.path);
    let pom = if path.is_dir() {
        path.join("pom.xml")
    } else {
        path
    };
    if !pom.is_file() {
        bail!("no project file at {}", pom.display());
    }
    let root = pom
        .parent()
        .map(Path::to_path_buf)
        .context("project file has no parent directory")?;

    let ctx = open_workspace(&root)?;
    ctx.add_managed_files(
        std::slice::from_ref(&pom),
        &ExplicitProfiles::enabled(args.profiles),
    );
    ctx.wait_for_all();

    let tree = ctx.tree();
    let mut summary = TreeSummary::default();
    let projects = tree
        .root_projects()
        .iter()
        .map(|project| project_node(tree, project, &mut summary))
        .collect();
    let report = TreeReport {
        root,
        projects,
        summary,
    };

    let exit = if report.summary.read_errors > 0 { 1 } else { 0 };
    if args.json {
        print_json(&report)?;
    } else {
        for project in &report.projects {
            print_project(project, 0);
        }
        println!(
            "summary: {} projects, {} with read errors, {} unresolved dependencies",
            report.summary.projects, report.summary.read_errors, report.summary.unresolved
        );
    }
    Ok(exit)
}

fn project_node(
    tree: &ProjectsTree,
    project: &ProjectDescriptor,
    summary: &mut TreeSummary,
) -> ProjectNode {
    let state = project.state();
    summary.projects += 1;
    if state.has_read_errors() {
        summary.read_errors += 1;
    }
    let unresolved: Vec<String> = state
        .dependencies
        .iter()
        .filter(|dep| dep.state == DependencyState::Unresolved)
        .map(|dep| dep.id.to_string())
        .collect();
    summary.unresolved += unresolved.len();

    ProjectNode {
        id: state.id.to_string(),
        path: project.path().to_path_buf(),
        packaging: state.packaging.clone(),
        ignored: tree.is_ignored(project),
        problems: state
            .problems
            .iter()
            .map(|problem| format!("{:?}: {}", problem.kind, problem.message))
            .collect(),
        unresolved,
        modules: tree
            .modules(project)
            .iter()
            .map(|module| project_node(tree, module, summary))
            .collect(),
    }
}

fn print_project(node: &ProjectNode, depth: usize) {
    let indent = "  ".repeat(depth);
    let ignored = if node.ignored { " (ignored)" } else { "" };
    println!("{indent}{} [{}]{ignored}", node.id, node.packaging);
    for problem in &node.problems {
        println!("{indent}  ! {problem}");
    }
    for dep in &node.unresolved {
        println!("{indent}  ? {dep}");
    }
    for module in &node.modules {
        print_project(module, depth + 1);
    }
}

// --- index -------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct IndexStatus {
    path_or_url: String,
    kind: &'static str,
    repository_ids: Vec<String>,
    state: String,
    last_update: Option<u64>,
    failure_message: Option<String>,
}

impl IndexStatus {
    fn of(index: &PackageIndex) -> Self {
        Self {
            path_or_url: index.path_or_url(),
            kind: index.kind().as_str(),
            repository_ids: index.repository_ids().into_iter().collect(),
            state: format!("{:?}", index.state()).to_lowercase(),
            last_update: index.last_update(),
            failure_message: index.failure_message(),
        }
    }
}

fn run_index(args: IndexArgs) -> Result<i32> {
    let root = canonical_path(&args.path);
    let ctx = open_workspace(&root)?;
    let indices = ctx.index_manager();

    match args.command {
        IndexCommand::Status => {}
        IndexCommand::Update { full } => {
            ctx.schedule_index_update(full);
            ctx.wait_for_all();
        }
        IndexCommand::Repair => {
            let stale: Vec<_> = indices
                .indices()
                .into_iter()
                .filter(|index| index.is_broken() || index.failure_message().is_some())
                .collect();
            indices.schedule_update(&stale, true);
            ctx.wait_for_all();
        }
        IndexCommand::Search { query, max } => {
            let hits = ctx.search_artifacts(&query, max);
            print_hits(&hits, args.json)?;
            return Ok(if hits.is_empty() { 1 } else { 0 });
        }
    }

    let statuses: Vec<IndexStatus> = indices
        .indices()
        .iter()
        .map(|index| IndexStatus::of(index))
        .collect();
    let failed = statuses.iter().any(|s| s.failure_message.is_some());
    if args.json {
        print_json(&statuses)?;
    } else {
        for status in &statuses {
            println!("{} ({})", status.path_or_url, status.kind);
            println!("  ids: {}", status.repository_ids.join(", "));
            println!("  state: {}", status.state);
            match status.last_update {
                Some(millis) => println!("  last_update: {millis}"),
                None => println!("  last_update: never"),
            }
            if let Some(message) = &status.failure_message {
                println!("  failure: {message}");
            }
        }
    }
    Ok(if failed { 1 } else { 0 })
}

fn print_hits(hits: &[ArtifactInfo], json: bool) -> Result<()> {
    if json {
        return print_json(&hits);
    }
    for hit in hits {
        println!("{hit}");
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}
