use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use scriptsync::config::AppConfig;
use scriptsync::object_type::ObjectType;
use scriptsync::registry::{Connection, WorkspaceSource};
use scriptsync::runtime::{AppRuntime, TerminalHost, print_compare, print_snapshot, report_error};
use scriptsync::sync::actions::PullOutcome;
use scriptsync::sync::tree::{LeafRef, render_lines};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "scriptsync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Mirror, edit and push repository scripts and web templates", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List configured connections
    Connections,
    /// Add, remove or choose the default connection
    Connection {
        #[command(subcommand)]
        command: ConnectionCommand,
    },
    /// List the workspaces of a connection
    Workspaces {
        /// Connection to query; defaults to the active one
        #[arg(short, long)]
        connection: Option<String>,
    },
    /// Search objects of one type by name prefix and print the tree
    Search {
        #[command(flatten)]
        scope: ScopeArgs,
        query: String,
    },
    /// Print the scripts of one object
    Expand {
        #[command(flatten)]
        scope: ScopeArgs,
        object: String,
    },
    /// Fetch one script (with --parent) or template into the mirror
    Fetch {
        #[command(flatten)]
        scope: ScopeArgs,
        /// Object owning the script; omit for templates
        #[arg(short, long)]
        parent: Option<String>,
        name: String,
    },
    /// Overwrite a mirror file with its remote copy
    Pull { file: PathBuf },
    /// Upload a mirror file
    Push { file: PathBuf },
    /// Upload every script of an object folder
    PushAll { folder: PathBuf },
    /// Compare a mirror file with another workspace, or list the candidates
    Compare {
        file: PathBuf,
        #[arg(short, long)]
        workspace: Option<String>,
    },
    /// Line-driven session on stdin
    Interactive,
}

#[derive(Debug, Subcommand)]
enum ConnectionCommand {
    /// Add a connection or replace the one with the same name
    Add(AddConnectionArgs),
    /// Remove a connection
    Remove { name: String },
    /// Remember a connection as the one to start with
    Default { name: String },
}

#[derive(Debug, Args)]
struct AddConnectionArgs {
    #[arg(short, long)]
    name: String,
    /// REST base URL, e.g. https://host/siebel/v1.0
    #[arg(short, long)]
    url: String,
    #[arg(long)]
    user: String,
    #[arg(long, default_value = "")]
    password: String,
    /// Workspace offered for this connection; repeatable
    #[arg(short, long = "workspace")]
    workspaces: Vec<String>,
    #[arg(long)]
    default_workspace: Option<String>,
    /// Ask the server for editable workspaces instead of the configured list
    #[arg(long)]
    remote_workspaces: bool,
}

#[derive(Debug, Args)]
struct ScopeArgs {
    /// Object type folder: service, buscomp, applet, application, webtemplate
    #[arg(short = 't', long = "type", default_value = "service")]
    object_type: ObjectType,
    #[arg(short, long)]
    connection: Option<String>,
    #[arg(short, long)]
    workspace: Option<String>,
}

impl From<AddConnectionArgs> for Connection {
    fn from(args: AddConnectionArgs) -> Self {
        Connection {
            name: args.name,
            base_url: args.url,
            username: args.user,
            password: args.password,
            workspaces: args.workspaces,
            default_workspace: args.default_workspace,
            workspace_source: if args.remote_workspaces {
                WorkspaceSource::Remote
            } else {
                WorkspaceSource::Static
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("scriptsync=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let runtime = AppRuntime::bootstrap(config, Arc::new(TerminalHost)).await?;
    if let Err(err) = run(cli.command, &runtime).await {
        report_error(&*err);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: Command, runtime: &AppRuntime) -> anyhow::Result<()> {
    let explorer = runtime.explorer();
    let registry = explorer.session().registry();
    match command {
        Command::Connections => {
            let default = registry.default_connection()?;
            for connection in registry.list()? {
                let marker = if default.as_deref() == Some(connection.name.as_str()) {
                    '*'
                } else {
                    ' '
                };
                println!("{marker} {} ({})", connection.name, connection.base_url);
            }
        }
        Command::Connection { command } => match command {
            ConnectionCommand::Add(args) => {
                let name = args.name.clone();
                registry.upsert(args.into())?;
                println!("saved connection {name}");
            }
            ConnectionCommand::Remove { name } => {
                registry.remove(&name)?;
                println!("removed connection {name}");
            }
            ConnectionCommand::Default { name } => {
                registry.set_default(&name)?;
                println!("default connection is now {name}");
            }
        },
        Command::Workspaces { connection } => {
            let snapshot = match connection {
                Some(name) => explorer.select_connection(&name).await?,
                None => explorer.activate().await?,
            };
            for workspace in &snapshot.workspaces {
                let marker = if snapshot.active_workspace.as_ref() == Some(workspace) {
                    '*'
                } else {
                    ' '
                };
                println!("{marker} {workspace}");
            }
        }
        Command::Search { scope, query } => {
            apply_scope(runtime, &scope).await?;
            explorer.search_now(&query).await?;
            print_tree(runtime);
        }
        Command::Expand { scope, object } => {
            apply_scope(runtime, &scope).await?;
            explorer.search_now(&object).await?;
            explorer.expand(&object).await?;
            print_tree(runtime);
        }
        Command::Fetch {
            scope,
            parent,
            name,
        } => {
            apply_scope(runtime, &scope).await?;
            let leaf = match parent {
                Some(parent) => LeafRef::script(parent, name),
                None => LeafRef::template(name),
            };
            explorer.select_leaf(&leaf).await?;
        }
        Command::Pull { file } => match explorer.pull(&file).await? {
            PullOutcome::Updated => println!("pulled {}", file.display()),
            PullOutcome::Absent => println!("remote has no content for {}", file.display()),
        },
        Command::Push { file } => {
            explorer.push(&file).await?;
            println!("pushed {}", file.display());
        }
        Command::PushAll { folder } => {
            let count = explorer.push_all(&folder).await?;
            println!("pushed {count} script(s) from {}", folder.display());
        }
        Command::Compare { file, workspace } => {
            explorer.activate().await?;
            match workspace {
                Some(workspace) => print_compare(&explorer.compare(&file, &workspace).await?),
                None => {
                    for candidate in explorer.compare_candidates(&file).await? {
                        println!("  {candidate}");
                    }
                }
            }
        }
        Command::Interactive => runtime.run_interactive().await?,
    }
    Ok(())
}

async fn apply_scope(runtime: &AppRuntime, scope: &ScopeArgs) -> anyhow::Result<()> {
    let explorer = runtime.explorer();
    match scope.connection.as_deref() {
        Some(name) => {
            explorer
                .select_connection(name)
                .await
                .with_context(|| format!("cannot select connection {name}"))?;
        }
        None => {
            explorer.activate().await?;
        }
    }
    if let Some(workspace) = scope.workspace.as_deref() {
        explorer.select_workspace(workspace)?;
    }
    explorer.select_object_type(scope.object_type);
    print_snapshot(&explorer.session().snapshot()?);
    Ok(())
}

fn print_tree(runtime: &AppRuntime) {
    for line in render_lines(&runtime.explorer().active_engine().snapshot()) {
        println!("{line}");
    }
}
