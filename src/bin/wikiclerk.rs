//! CLI binary for wikiclerk.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wikiclerk::store::replica::{ReplicaFactory, ReplicaPool, ReplicaStore};
use wikiclerk::task::RunContext;
use wikiclerk::wiki::WikiPool;
use wikiclerk::{BotSettings, TaskRegistry, TaskStore, interrupt, runner};

/// Wikiclerk: a maintenance bot platform for MediaWiki wikis.
#[derive(Parser)]
#[command(name = "wikiclerk", version, about)]
struct Cli {
    /// Path to the TOML settings file.
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand)]
#[command(rename_all = "snake_case")]
enum Command {
    /// Print the logged-in username on the default wiki.
    Whoami,

    /// List every registered task and its authorization state.
    TaskList,

    /// Print the replication lag of one replica mirror.
    CheckReplica {
        /// Wiki database name, e.g. `enwiki`.
        dbname: String,
    },

    /// Inspect or run a single task.
    Task(TaskArgs),
}

#[derive(Args)]
struct TaskArgs {
    /// Task number.
    number: u32,

    /// Run the task unattended.
    #[arg(long)]
    run: bool,

    /// Run interactively, confirming each edit on stdin.
    #[arg(long, conflicts_with = "run")]
    manual: bool,

    /// Print the merged live configuration as JSON and exit.
    #[arg(long, alias = "config", conflicts_with_all = ["run", "manual"])]
    show_config: bool,

    /// Job name recorded for this run.
    #[arg(long, default_value = "cronjob")]
    job_name: String,

    /// Mode parameter handed to the task.
    #[arg(long)]
    param: Option<String>,
}

fn main() -> anyhow::Result<()> {
    // Log to stderr only (stdout is reserved for command output).
    // Suppress noisy dependency logs by default; RUST_LOG overrides.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wikiclerk=info")),
        )
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version go to stdout and exit 0; parse errors exit 1.
            let code = i32::from(err.use_stderr());
            let _ = err.print();
            std::process::exit(code);
        }
    };

    let settings = BotSettings::load_or_default(cli.settings.as_deref())?;
    match cli.command {
        Command::Whoami => whoami(&settings),
        Command::TaskList => task_list(&settings),
        Command::CheckReplica { dbname } => check_replica(&settings, &dbname),
        Command::Task(args) => task_command(&settings, args),
    }
}

fn whoami(settings: &BotSettings) -> anyhow::Result<()> {
    let pool = WikiPool::new(settings.wiki.clone());
    let wiki = pool.default_wiki()?;
    println!("I am {}", wiki.username()?);
    Ok(())
}

fn task_list(settings: &BotSettings) -> anyhow::Result<()> {
    let store = Arc::new(TaskStore::open(&settings.store.resolved_path())?);
    let mut registry = TaskRegistry::builtin()?;
    for task in registry.all_mut() {
        task.activate(Arc::clone(&store))?;
        println!(
            "Task {} ({}) on wiki {} | Approved: {} | Trial: {} | Bot flag: {}",
            task.number(),
            task.name(),
            task.meta().dbname(),
            task.approved(),
            task.trial().is_some(),
            task.should_use_bot_flag(),
        );
    }
    Ok(())
}

fn check_replica(settings: &BotSettings, dbname: &str) -> anyhow::Result<()> {
    let replicas = ReplicaPool::new(settings.replica.resolved_dir());
    let replica = replicas.open(dbname)?;
    println!(
        "Replication lag for {dbname}: {:.1} seconds",
        replica.replication_lag()?
    );
    Ok(())
}

fn task_command(settings: &BotSettings, args: TaskArgs) -> anyhow::Result<()> {
    let store = Arc::new(TaskStore::open(&settings.store.resolved_path())?);
    let mut registry = TaskRegistry::builtin()?;
    let Some(task) = registry.get_mut(args.number) else {
        bail!("task {} not found", args.number);
    };
    task.activate(Arc::clone(&store))?;
    task.set_param(args.param);

    let pool = WikiPool::new(settings.wiki.clone());
    let wiki = pool.get(&task.meta().site, &task.meta().family)?;

    if args.show_config {
        let map = task.merged_configuration(wiki.as_ref())?;
        let rendered = serde_json::to_string_pretty(&serde_json::Value::Object(map))?;
        println!("{rendered}");
        return Ok(());
    }
    if !args.run && !args.manual {
        bail!("no action given, pass --run, --manual or --show-config");
    }
    if args.manual && !task.meta().supports_manual_run {
        bail!("task {} does not support manual runs", args.number);
    }
    if !task.should_edit() {
        bail!("task {} is not approved to edit", args.number);
    }

    let replicas = Arc::new(ReplicaPool::new(settings.replica.resolved_dir()));
    let ctx = RunContext::new(wiki, replicas).with_stop_flag(interrupt::install()?);

    println!("Starting task {}", args.number);
    if args.manual {
        runner::run_task_manually(task, &store, &ctx, Some(&args.job_name))?;
    } else {
        runner::run_task(task, &store, &ctx, Some(&args.job_name))?;
    }
    Ok(())
}
