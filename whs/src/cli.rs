use std::io::Read as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use whs_core::ci::cli::CliCiGateway;
use whs_core::config::Config;
use whs_core::dispatcher::Dispatcher;
use whs_core::error::DispatcherError;
use whs_core::lock::DispatcherLock;
use whs_core::model::{IsolationMode, IssueType, Project};
use whs_core::notify::{HookNotifier, NoopNotifier, Notifier};
use whs_core::projects::{self, ProjectRegistry};
use whs_core::question;
use whs_core::runner::subprocess::SubprocessRunner;
use whs_core::signals::{self, SignalEvent};
use whs_core::tracker::cli::CliTrackerGateway;
use whs_core::tracker::{NewIssue, ReadyFilter, TrackerGateway};
use whs_core::workflow::WorkflowService;
use whs_core::worktree::cli::CliWorktreeGateway;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Role a freshly planned workflow hands its first step to.
const DEFAULT_FIRST_ROLE: &str = "implementation";

#[derive(Parser)]
#[command(name = "whs", version = VERSION, about = "Multi-project agent dispatcher")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize the configuration directory and the tracker
    Init {
        /// Run the tracker in stealth mode (no forge side effects)
        #[arg(long)]
        stealth: bool,
        /// Prefix for issue ids the tracker assigns
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Run the dispatcher tick loop until a shutdown signal arrives
    Start,

    /// Signal a running dispatcher to shut down
    Stop {
        /// Skip the graceful grace window and shut down immediately
        #[arg(long)]
        force: bool,
    },

    /// Stop a running dispatcher, then start a new one in its place
    Restart,

    /// Register a project (defaults to the current directory)
    Add {
        /// Path to the project's repository
        path: Option<PathBuf>,
        /// Registry name (defaults to the path's final component)
        #[arg(long)]
        name: Option<String>,
        /// Default branch new worktrees branch from
        #[arg(long, default_value = "main")]
        default_branch: String,
        /// Register the project in stealth isolation mode
        #[arg(long)]
        stealth: bool,
    },

    /// Unregister a project by name
    Remove {
        /// Registry name
        name: String,
    },

    /// Start a new workflow from a source issue in the current project
    Plan {
        /// Issue description; read from stdin if omitted
        description: Option<String>,
    },

    /// Answer a pending question, unblocking the step that asked it
    Answer {
        /// Id of the question issue
        question_id: String,
        /// The answer text
        answer: String,
    },

    /// Show active work, pending questions, and errored workflows
    Status {
        /// Print per-stage tick detail
        #[arg(short, long)]
        verbose: bool,
    },

    /// Pause admission of new work on a running dispatcher
    Pause,

    /// Resume admission of new work on a running dispatcher
    Resume,

    /// List registered projects
    List,

    /// Read or write a tracker configuration value
    Config {
        /// Configuration key
        key: String,
        /// New value; prints the current value if omitted
        value: Option<String>,
    },
}

/// Resolve the configuration directory: `WHS_CONFIG_DIR`, or `~/.whs`.
fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("WHS_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME is not set and WHS_CONFIG_DIR is unset")?;
    Ok(PathBuf::from(home).join(".whs"))
}

fn require_initialized(config: &Config) -> Result<()> {
    if !config.is_initialized() {
        return Err(DispatcherError::not_initialized().into());
    }
    Ok(())
}

pub fn run(cli: Cli) -> Result<()> {
    let config_dir = config_dir()?;
    let config = Config::load(&config_dir);

    match cli.command {
        Commands::Init { stealth, prefix } => cmd_init(&config, stealth, prefix.as_deref()),
        Commands::Start => cmd_start(&config),
        Commands::Stop { force } => cmd_stop(&config, force),
        Commands::Restart => cmd_restart(&config),
        Commands::Add {
            path,
            name,
            default_branch,
            stealth,
        } => cmd_add(&config, path, name, default_branch, stealth),
        Commands::Remove { name } => cmd_remove(&config, &name),
        Commands::Plan { description } => cmd_plan(&config, description),
        Commands::Answer { question_id, answer } => cmd_answer(&config, &question_id, &answer),
        Commands::Status { verbose } => cmd_status(&config, verbose),
        Commands::Pause => cmd_pause(&config),
        Commands::Resume => cmd_resume(&config),
        Commands::List => cmd_list(&config),
        Commands::Config { key, value } => cmd_config(&config, &key, value.as_deref()),
    }
}

fn cmd_init(config: &Config, stealth: bool, prefix: Option<&str>) -> Result<()> {
    std::fs::create_dir_all(&config.config_dir)?;
    let tracker = CliTrackerGateway::new(config.tracker_binary.clone());
    tracker.init(stealth, prefix).context("initializing tracker")?;
    std::fs::write(config.config_dir.join("config.json"), "{}\n")
        .context("writing initialization marker")?;
    println!("Initialized {}", config.config_dir.display());
    Ok(())
}

fn cmd_start(config: &Config) -> Result<()> {
    require_initialized(config)?;
    let lock = DispatcherLock::acquire(&config.lock_path()).context("acquiring dispatcher lock")?;

    let tracker = CliTrackerGateway::new(config.tracker_binary.clone());
    let worktree = CliWorktreeGateway::new(config.worktree_binary.clone());
    let ci = CliCiGateway::new(config.tracker_binary.clone());
    let notifier: Box<dyn Notifier> = match notification_hooks_dir(config) {
        Some(dir) => Box::new(HookNotifier::new(dir)),
        None => Box::new(NoopNotifier),
    };
    let runner = Arc::new(SubprocessRunner::new(config.agent_binary.clone()));

    let mut dispatcher = Dispatcher::new(config, &tracker, &worktree, &ci, notifier.as_ref(), runner);
    let mut state = whs_core::store::FileStateStore::new(config.state_path()).load();

    let signal_rx = signals::install();
    println!("whs dispatcher started (pid {})", std::process::id());

    loop {
        dispatcher.tick(&mut state)?;

        match signal_rx.recv_timeout(Duration::from_secs(config.poll_interval_secs)) {
            Ok(SignalEvent::GracefulShutdown) => {
                println!("shutdown requested, draining active work");
                dispatcher.request_shutdown();
                break;
            }
            Ok(SignalEvent::ForcefulShutdown) => {
                println!("forceful shutdown requested");
                dispatcher.request_shutdown();
                break;
            }
            Ok(SignalEvent::Pause) => state.paused = true,
            Ok(SignalEvent::Resume) => state.paused = false,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    lock.release();
    Ok(())
}

fn notification_hooks_dir(config: &Config) -> Option<PathBuf> {
    let dir = config.config_dir.join("hooks");
    dir.is_dir().then_some(dir)
}

/// Send a signal to the running dispatcher named by the lock file.
#[cfg(unix)]
fn signal_daemon(config: &Config, signal: libc::c_int) -> Result<u32> {
    let (pid, _) =
        DispatcherLock::peek(&config.lock_path()).ok_or_else(DispatcherError::no_lock)?;
    // SAFETY: kill(2) with a valid signal number and no special target semantics.
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc != 0 {
        bail!("failed to signal dispatcher (pid {pid})");
    }
    Ok(pid)
}

#[cfg(not(unix))]
fn signal_daemon(_config: &Config, _signal: i32) -> Result<u32> {
    bail!("signalling a running dispatcher is only supported on Unix")
}

fn cmd_stop(config: &Config, force: bool) -> Result<()> {
    let pid = signal_daemon(config, libc::SIGTERM)?;
    if force {
        // A second SIGTERM within the escalation window turns a graceful
        // shutdown into a forceful one (signals::InterruptTracker).
        std::thread::sleep(Duration::from_millis(50));
        signal_daemon(config, libc::SIGTERM)?;
    }
    println!("stop signal sent to pid {pid}");
    Ok(())
}

fn cmd_restart(config: &Config) -> Result<()> {
    if let Some((pid, _)) = DispatcherLock::peek(&config.lock_path()) {
        signal_daemon(config, libc::SIGTERM)?;
        println!("waiting for pid {pid} to exit");
        for _ in 0..100 {
            if DispatcherLock::peek(&config.lock_path()).is_none() {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }
    cmd_start(config)
}

fn cmd_pause(config: &Config) -> Result<()> {
    signal_daemon(config, libc::SIGUSR1)?;
    println!("pause signal sent");
    Ok(())
}

fn cmd_resume(config: &Config) -> Result<()> {
    signal_daemon(config, libc::SIGUSR2)?;
    println!("resume signal sent");
    Ok(())
}

fn cmd_add(
    config: &Config,
    path: Option<PathBuf>,
    name: Option<String>,
    default_branch: String,
    stealth: bool,
) -> Result<()> {
    let path = match path {
        Some(p) => p,
        None => std::env::current_dir().context("resolving current directory")?,
    };
    let path = path.canonicalize().with_context(|| format!("{} does not exist", path.display()))?;
    let name = match name {
        Some(n) => n,
        None => projects::name_from_path(&path)?,
    };
    let registry = ProjectRegistry::new(config.projects_path());
    registry.add(Project {
        name: name.clone(),
        roles_dir: path.join(".whs/roles"),
        path,
        default_branch,
        isolation_mode: if stealth {
            IsolationMode::Stealth
        } else {
            IsolationMode::Committed
        },
    })?;
    println!("Registered project '{name}'");
    Ok(())
}

fn cmd_remove(config: &Config, name: &str) -> Result<()> {
    let registry = ProjectRegistry::new(config.projects_path());
    registry.remove(name)?;
    println!("Removed project '{name}'");
    Ok(())
}

fn cmd_list(config: &Config) -> Result<()> {
    let registry = ProjectRegistry::new(config.projects_path());
    let projects = registry.list()?;
    if projects.is_empty() {
        println!("No projects registered. Use: whs add [path]");
        return Ok(());
    }
    for project in projects {
        println!(
            "{}\t{}\t{}\t{}",
            project.name,
            project.path.display(),
            project.default_branch,
            project.isolation_mode
        );
    }
    Ok(())
}

fn current_project(config: &Config) -> Result<Project> {
    let cwd = std::env::current_dir().context("resolving current directory")?;
    let name = projects::name_from_path(&cwd)?;
    ProjectRegistry::new(config.projects_path())
        .get(&name)?
        .with_context(|| format!("'{name}' is not a registered project; run: whs add"))
}

fn cmd_plan(config: &Config, description: Option<String>) -> Result<()> {
    let project = current_project(config)?;
    let description = match description {
        Some(d) => d,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading issue description from stdin")?;
            if buf.trim().is_empty() {
                bail!("no description given and stdin was empty");
            }
            buf
        }
    };
    let title = description.lines().next().unwrap_or(&description).to_string();

    let tracker = CliTrackerGateway::new(config.tracker_binary.clone());
    let source = tracker
        .create(&NewIssue {
            title,
            issue_type: IssueType::Task,
            priority: 2,
            parent: None,
            labels: vec![],
            description,
        })
        .context("creating source issue")?;

    let workflow = WorkflowService::new(&tracker);
    let (epic_id, step_id) = workflow.start_workflow(&project.name, &source, DEFAULT_FIRST_ROLE)?;
    println!("Planned {}:{} — epic {epic_id}, first step {step_id}", project.name, source.id);
    Ok(())
}

fn cmd_answer(config: &Config, question_id: &str, answer: &str) -> Result<()> {
    let tracker = CliTrackerGateway::new(config.tracker_binary.clone());
    tracker.show(question_id).context("looking up question")?;

    let steps = tracker
        .list(&ReadyFilter {
            issue_type: Some(IssueType::Task),
            label_all: vec![whs_core::labels::WHS_STEP.to_string()],
            ..Default::default()
        })
        .context("listing workflow steps")?;
    let step = steps
        .into_iter()
        .find(|s| s.dependencies.iter().any(|d| d == question_id))
        .with_context(|| format!("no step depends on question {question_id}"))?;

    tracker
        .comment(question_id, &question::format_answer_comment(answer))
        .context("commenting the answer")?;
    tracker.close(question_id, "answered").context("closing question")?;
    tracker
        .remove_dep(&step.id, question_id)
        .context("removing the answered question as a dependency")?;

    let workflow = WorkflowService::new(&tracker);
    if let Some(mut info) = workflow.get_step_resume_info(&step) {
        info.answer = answer.to_string();
        workflow.clear_step_resume_info(&step)?;
        workflow.set_step_resume_info(&step.id, &info)?;
    }

    println!("Answered {question_id}; step {} will resume with the answer inlined", step.id);
    Ok(())
}

fn cmd_status(config: &Config, verbose: bool) -> Result<()> {
    require_initialized(config)?;
    let state = whs_core::store::FileStateStore::new(config.state_path()).load();

    match DispatcherLock::peek(&config.lock_path()) {
        Some((pid, started_at)) => println!("dispatcher running (pid {pid}, started {started_at})"),
        None => println!("dispatcher not running"),
    }
    println!("paused: {}", state.paused);
    println!("active work: {}", state.active_work.len());

    let total_cost: f64 = state.active_work.values().map(|e| e.cost_so_far).sum();
    println!("cost so far (active work): {total_cost:.4}");

    if verbose || !state.active_work.is_empty() {
        for (source_id, entry) in &state.active_work {
            println!(
                "  [{source_id}] step={} agent={} started={}",
                entry.workflow_step_id, entry.agent, entry.started_at
            );
        }
    }

    let tracker = CliTrackerGateway::new(config.tracker_binary.clone());
    let questions = tracker
        .list(&ReadyFilter {
            label_all: vec![whs_core::labels::WHS_QUESTION.to_string()],
            status: Some(whs_core::model::IssueStatus::Open),
            ..Default::default()
        })
        .unwrap_or_default();
    println!("pending questions: {}", questions.len());
    for q in &questions {
        println!("  [{}] {}", q.id, q.title);
    }

    let errored = tracker
        .list(&ReadyFilter {
            label_any: vec!["errored:auth".to_string(), "errored:circuit-breaker".to_string()],
            ..Default::default()
        })
        .unwrap_or_default();
    println!("errored workflows: {}", errored.len());
    for e in &errored {
        println!("  [{}] {}", e.id, e.title);
    }

    Ok(())
}

fn cmd_config(config: &Config, key: &str, value: Option<&str>) -> Result<()> {
    let tracker = CliTrackerGateway::new(config.tracker_binary.clone());
    match value {
        Some(v) => {
            tracker.config_set(key, v)?;
            println!("{key}={v}");
        }
        None => match tracker.config_get(key)? {
            Some(v) => println!("{key}={v}"),
            None => println!("{key} is unset"),
        },
    }
    Ok(())
}
