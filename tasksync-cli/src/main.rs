//! tasksync command-line front end.
//!
//! Usage:
//!   tasksync group add Family
//!   tasksync task add "Buy milk" --group <id>
//!   tasksync task toggle <id>
//!   tasksync demo

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tasksync_cli::{format_group, format_task, run_demo, CliConfig};
use tasksync_model::{Color, GroupDraft, TaskDraft};
use tasksync_storage::{GroupRepository, LocalStore, PrivateTaskRepository, TaskRepository};
use tasksync_types::EntityId;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tasksync")]
#[command(about = "Local-first tasks and groups with per-device private state")]
struct Args {
    /// JSON config file with `store` and `sync` sections
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store file; overrides the config file
    #[arg(long)]
    db: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage groups
    #[command(subcommand)]
    Group(GroupCommand),
    /// Manage tasks
    #[command(subcommand)]
    Task(TaskCommand),
    /// Sync two in-memory devices through an in-memory remote
    Demo,
}

#[derive(Subcommand, Debug)]
enum GroupCommand {
    Add {
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// `#RRGGBB` or `#RRGGBBAA`
        #[arg(long)]
        color: Option<Color>,
    },
    List,
    Delete { id: EntityId },
}

#[derive(Subcommand, Debug)]
enum TaskCommand {
    Add {
        title: String,
        #[arg(long)]
        group: Option<EntityId>,
        #[arg(long, default_value = "")]
        content: String,
    },
    List {
        /// Only tasks of this group
        #[arg(long)]
        group: Option<EntityId>,
    },
    /// Complete an open task, or reopen a completed one
    Toggle { id: EntityId },
    Delete { id: EntityId },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut config = CliConfig::load(args.config.as_deref())?;
    if let Some(db) = args.db {
        config.store.path = db;
    }
    debug!(?config, "loaded configuration");

    match args.command {
        Command::Demo => demo(&config).await,
        Command::Group(command) => {
            let store = open_store(&config)?;
            group(GroupRepository::new(store), command)
        }
        Command::Task(command) => {
            let store = open_store(&config)?;
            task(store, command)
        }
    }
}

fn open_store(config: &CliConfig) -> Result<Arc<LocalStore>> {
    let store = LocalStore::open(&config.store)
        .with_context(|| format!("Failed to open store at {}", config.store.path.display()))?;
    Ok(Arc::new(store))
}

fn group(groups: GroupRepository, command: GroupCommand) -> Result<()> {
    match command {
        GroupCommand::Add {
            name,
            description,
            color,
        } => {
            let mut draft = GroupDraft::new(name);
            if let Some(description) = description {
                draft = draft.with_description(description);
            }
            if let Some(color) = color {
                draft = draft.with_color(color);
            }
            println!("{}", format_group(&groups.create(draft)?));
        }
        GroupCommand::List => {
            for group in groups.list()? {
                println!("{}", format_group(&group));
            }
        }
        GroupCommand::Delete { id } => {
            if !groups.delete(id)? {
                anyhow::bail!("no group {id}");
            }
            info!(%id, "deleted group");
        }
    }
    Ok(())
}

fn task(store: Arc<LocalStore>, command: TaskCommand) -> Result<()> {
    let tasks = TaskRepository::new(store.clone());
    match command {
        TaskCommand::Add {
            title,
            group,
            content,
        } => {
            let mut draft = TaskDraft::new(title).with_content(content);
            if let Some(group) = group {
                draft = draft.in_group(group);
            }
            let task = tasks.create(draft)?;
            println!("{}", task.id);
        }
        TaskCommand::List { group } => {
            let listed = tasks.with_private_data()?;
            for task in listed
                .iter()
                .filter(|t| group.is_none() || t.task.group_id == group)
            {
                println!("{}", format_task(task));
            }
        }
        TaskCommand::Toggle { id } => {
            let state = PrivateTaskRepository::new(store).toggle_completion(id)?;
            println!("{}", if state.is_completed() { "completed" } else { "reopened" });
        }
        TaskCommand::Delete { id } => {
            if !tasks.delete(id)? {
                anyhow::bail!("no task {id}");
            }
            info!(%id, "deleted task");
        }
    }
    Ok(())
}

async fn demo(config: &CliConfig) -> Result<()> {
    let summary = run_demo(&config.sync).await?;

    println!("\n========================================");
    println!("  Shared: {}", summary.invitation_url);
    println!("========================================");
    println!("  alice:");
    for task in &summary.alice_tasks {
        println!("    {}", format_task(task));
    }
    println!("  bob:");
    for group in &summary.bob_groups {
        println!("    {}", format_group(group));
    }
    for task in &summary.bob_tasks {
        println!("    {}", format_task(task));
    }
    println!("========================================\n");
    Ok(())
}
