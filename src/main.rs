#![forbid(unsafe_code)]

//! `hcom` — coordination substrate CLI and daemon binary.
//!
//! Short-lived subcommands (`send`, `events`, `list`, ...) perform one
//! store operation and exit; `daemon` runs the long-lived coordinating
//! process. Neither path requires the other for basic append/query — only
//! live wake-ups and blocking waits go through the daemon, with a polling
//! fallback.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use hcom::daemon::ipc::IpcContext;
use hcom::daemon::{resolve_targets, Daemon, SubscriptionManager};
use hcom::filter::Filter;
use hcom::models::{
    Bundle, BundleRefs, EventDraft, EventPayload, EventRange, Intent, LifeAction, LifePayload,
    SenderKind, StatusVal,
};
use hcom::persistence::{db, BundleRepo, EventStore, Order, SubscriptionRepo};
use hcom::registry::InstanceRegistry;
use hcom::wait::{WaitCoordinator, Waited};
use hcom::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "hcom", about = "Agent coordination substrate", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file (defaults to
    /// `<data_dir>/config.toml` when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the coordinating daemon.
    Daemon,
    /// Register an instance (appends `life:created`).
    Start {
        /// Instance base name.
        name: String,
        /// Display tag; full name becomes `TAG-NAME`.
        #[arg(long)]
        tag: Option<String>,
        /// Agent platform (claude, gemini, codex, external).
        #[arg(long, default_value = "claude")]
        tool: String,
        /// Parent instance for subagents.
        #[arg(long)]
        parent: Option<String>,
        /// Working directory.
        #[arg(long)]
        directory: Option<String>,
        /// Platform session identifier.
        #[arg(long)]
        session_id: Option<String>,
        /// Launch batch this instance belongs to.
        #[arg(long)]
        batch_id: Option<String>,
        /// Who performed the launch.
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Terminate an instance (appends `life:stopped`).
    Stop {
        /// Instance base name.
        name: String,
        /// Why the instance stopped.
        #[arg(long)]
        reason: Option<String>,
        /// Who performed the stop.
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Append a message event. Mentions are parsed from the text.
    Send {
        /// Message text; `@name` tokens address specific instances.
        text: String,
        /// Sender name.
        #[arg(long, default_value = "bigboss")]
        from: String,
        /// The sender is a registered instance (default: external).
        #[arg(long)]
        as_instance: bool,
        /// Conversational intent (request, inform, ack).
        #[arg(long)]
        intent: Option<String>,
        /// Thread label.
        #[arg(long)]
        thread: Option<String>,
        /// Event id this message replies to.
        #[arg(long)]
        reply_to: Option<i64>,
        /// Bundle id attached to this message.
        #[arg(long)]
        bundle: Option<String>,
    },
    /// Append a status event for an instance.
    Status {
        /// Instance base name.
        name: String,
        /// Status value (listening, active, blocked).
        val: String,
        /// Free-form context tag, e.g. `tool:Bash`.
        #[arg(long, default_value = "")]
        context: String,
        /// Detail; for file-write contexts, the file path.
        #[arg(long)]
        detail: Option<String>,
    },
    /// Query events, or block until one matches with `--wait`.
    Events {
        /// Number of most-recent events to print.
        #[arg(long, default_value_t = 20)]
        last: u32,
        /// Filter by event type (repeatable; repeated values OR).
        #[arg(long = "type")]
        types: Vec<String>,
        /// Filter by origin instance (repeatable; repeated values OR).
        #[arg(long = "agent")]
        agents: Vec<String>,
        /// Filter by message sender.
        #[arg(long)]
        from: Option<String>,
        /// Shortcut: events from NAME while it is listening.
        #[arg(long, value_name = "NAME")]
        idle: Option<String>,
        /// Shortcut: events from NAME while it is blocked.
        #[arg(long, value_name = "NAME")]
        blocked: Option<String>,
        /// Only events at or after this RFC 3339 timestamp.
        #[arg(long)]
        since: Option<String>,
        /// Only events at or before this RFC 3339 timestamp.
        #[arg(long)]
        until: Option<String>,
        /// Raw SQL predicate, ANDed with the structured filters.
        #[arg(long)]
        sql: Option<String>,
        /// Query an archive slot instead of the live log (1 = most recent).
        #[arg(long)]
        archive: Option<u32>,
        /// Block until a matching event arrives (seconds; 0 = configured
        /// default).
        #[arg(long, value_name = "SECS", num_args = 0..=1, default_missing_value = "0")]
        wait: Option<u64>,
    },
    /// Create a subscription, or list subscriptions with no arguments.
    Sub {
        /// Filter terms as `key=value` pairs.
        terms: Vec<String>,
        /// Raw SQL predicate, ANDed with the terms.
        #[arg(long)]
        sql: Option<String>,
        /// Remove the subscription after its first match.
        #[arg(long)]
        once: bool,
        /// Owner to notify (defaults to the external CLI identity).
        #[arg(long = "for", value_name = "NAME", default_value = "bigboss")]
        owner: String,
    },
    /// Remove a subscription by id.
    Unsub {
        /// Subscription id (`sub-xxxx`, or just `xxxx`).
        id: String,
    },
    /// Show the instance registry.
    List,
    /// Bundle operations.
    #[command(subcommand)]
    Bundle(BundleCommand),
    /// Archive the live log and reset it to empty.
    Reset,
}

#[derive(Debug, Subcommand)]
enum BundleCommand {
    /// Create an immutable bundle.
    Create {
        /// Short human title.
        #[arg(long)]
        title: String,
        /// Longer description.
        #[arg(long, default_value = "")]
        description: String,
        /// Event-id ranges, `START-END` or a single id (repeatable).
        #[arg(long = "events", value_name = "RANGE")]
        events: Vec<String>,
        /// File paths (repeatable).
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<String>,
        /// Parent bundle this one extends.
        #[arg(long)]
        extends: Option<String>,
        /// Creator instance name.
        #[arg(long, default_value = "bigboss")]
        by: String,
    },
    /// Show a bundle by id.
    Show {
        /// Bundle id.
        id: String,
    },
    /// Resolve a bundle's event references against the live log.
    Resolve {
        /// Bundle id.
        id: String,
    },
    /// List bundles, newest first.
    List,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = Arc::new(GlobalConfig::load_or_default(args.config.as_deref())?);

    match args.command {
        Command::Daemon => run_daemon(config).await,
        Command::Start {
            name,
            tag,
            tool,
            parent,
            directory,
            session_id,
            batch_id,
            by,
        } => {
            let store = open_store(&config).await?;
            let draft = EventDraft::life(
                name,
                LifePayload {
                    action: LifeAction::Created,
                    by,
                    batch_id,
                    reason: None,
                    tag,
                    tool: Some(tool),
                    parent_name: parent,
                    directory,
                    session_id,
                    launched: None,
                },
            );
            let id = store.append(&draft, config.append_retries).await?;
            print_json(&serde_json::json!({ "id": id, "created": draft.instance }));
            Ok(())
        }
        Command::Stop { name, reason, by } => {
            let store = open_store(&config).await?;
            let draft = EventDraft::life(
                name,
                LifePayload {
                    action: LifeAction::Stopped,
                    by,
                    batch_id: None,
                    reason,
                    tag: None,
                    tool: None,
                    parent_name: None,
                    directory: None,
                    session_id: None,
                    launched: None,
                },
            );
            let id = store.append(&draft, config.append_retries).await?;
            print_json(&serde_json::json!({ "id": id, "stopped": draft.instance }));
            Ok(())
        }
        Command::Send {
            text,
            from,
            as_instance,
            intent,
            thread,
            reply_to,
            bundle,
        } => run_send(&config, text, from, as_instance, intent, thread, reply_to, bundle).await,
        Command::Status {
            name,
            val,
            context,
            detail,
        } => {
            let store = open_store(&config).await?;
            let val = StatusVal::parse(&val).map_err(|_| {
                AppError::Filter(format!("invalid status value: {val} (listening|active|blocked)"))
            })?;
            let draft = EventDraft::status(name, val, context, detail);
            let id = store.append(&draft, config.append_retries).await?;
            print_json(&serde_json::json!({ "id": id }));
            Ok(())
        }
        Command::Events {
            last,
            types,
            agents,
            from,
            idle,
            blocked,
            since,
            until,
            sql,
            archive,
            wait,
        } => {
            let store = open_store(&config).await?;
            let filter = build_filter(
                &types, &agents, from.as_deref(), idle.as_deref(), blocked.as_deref(),
                since.as_deref(), until.as_deref(), sql.as_deref(),
            )?;

            if let Some(secs) = wait {
                let timeout = if secs == 0 {
                    Duration::from_secs(config.wait.default_timeout_seconds)
                } else {
                    Duration::from_secs(secs)
                };
                let coordinator = WaitCoordinator::new(&store, &config);
                return match coordinator.wait(&filter, timeout).await? {
                    Waited::Matched(event) => {
                        print_json(&event.to_wire()?);
                        Ok(())
                    }
                    Waited::TimedOut => {
                        print_json(&serde_json::json!({ "timed_out": true }));
                        std::process::exit(1);
                    }
                };
            }

            let events = match archive {
                Some(slot) => {
                    store
                        .query_archive(slot, &filter, Some(last), Order::Descending)
                        .await?
                }
                None => store.query(&filter, Some(last), Order::Descending).await?,
            };
            // Newest-limited, printed oldest first.
            for event in events.iter().rev() {
                print_json(&event.to_wire()?);
            }
            Ok(())
        }
        Command::Sub {
            terms,
            sql,
            once,
            owner,
        } => run_sub(&config, &terms, sql.as_deref(), once, owner).await,
        Command::Unsub { id } => {
            let store = open_store(&config).await?;
            let manager =
                SubscriptionManager::new(store.clone(), SubscriptionRepo::new(store.db().clone()));
            let id = if id.starts_with("sub-") {
                id
            } else {
                format!("sub-{id}")
            };
            if manager.unsubscribe(&id).await? {
                print_json(&serde_json::json!({ "removed": id }));
                Ok(())
            } else {
                Err(AppError::NotFound(format!("subscription {id}")))
            }
        }
        Command::List => {
            let store = open_store(&config).await?;
            let registry = InstanceRegistry::new(store.clone())
                .snapshot_projected(Utc::now(), &config.staleness)
                .await?;
            let now = Utc::now();
            for instance in registry.values() {
                let age_seconds = (now - instance.status_time).num_seconds().max(0);
                let status = if instance.stopped {
                    "stopped"
                } else {
                    instance.status.as_str()
                };
                print_json(&serde_json::json!({
                    "name": instance.name,
                    "full_name": instance.full_name(),
                    "tool": instance.tool.as_str(),
                    "status": status,
                    "context": instance.status_context,
                    "detail": instance.status_detail,
                    "age_seconds": age_seconds,
                }));
            }
            Ok(())
        }
        Command::Bundle(cmd) => run_bundle(&config, cmd).await,
        Command::Reset => {
            let store = open_store(&config).await?;
            let archive_id = store.archive().await?;
            print_json(&serde_json::json!({ "archived": true, "archive_id": archive_id }));
            Ok(())
        }
    }
}

async fn open_store(config: &GlobalConfig) -> Result<EventStore> {
    let pool = db::connect(config).await?;
    Ok(EventStore::new(pool))
}

#[allow(clippy::too_many_arguments)] // CLI plumbing mirrors the flag surface.
async fn run_send(
    config: &Arc<GlobalConfig>,
    text: String,
    from: String,
    as_instance: bool,
    intent: Option<String>,
    thread: Option<String>,
    reply_to: Option<i64>,
    bundle: Option<String>,
) -> Result<()> {
    let store = open_store(config).await?;

    let sender_kind = if as_instance {
        SenderKind::Instance
    } else {
        SenderKind::External
    };
    let mut draft = EventDraft::message(from, text, sender_kind);
    if let EventPayload::Message(msg) = &mut draft.payload {
        msg.intent = intent.as_deref().map(parse_intent).transpose()?;
        msg.thread = thread;
        msg.reply_to = reply_to;
        msg.bundle_id = bundle;
    }

    let id = store.append(&draft, config.append_retries).await?;

    // Report the intended recipients so callers can detect an unknown
    // target (empty set); the daemon performs the actual delivery marking.
    let registry = InstanceRegistry::new(store.clone())
        .snapshot_projected(Utc::now(), &config.staleness)
        .await?;
    let targets = match &draft.payload {
        EventPayload::Message(msg) => resolve_targets(msg, &registry),
        _ => Vec::new(),
    };

    print_json(&serde_json::json!({ "id": id, "targets": targets }));
    Ok(())
}

async fn run_sub(
    config: &Arc<GlobalConfig>,
    terms: &[String],
    sql: Option<&str>,
    once: bool,
    owner: String,
) -> Result<()> {
    let store = open_store(config).await?;
    let manager = SubscriptionManager::new(store.clone(), SubscriptionRepo::new(store.db().clone()));

    if terms.is_empty() && sql.is_none() {
        let subs = manager.list().await?;
        for sub in subs {
            print_json(&serde_json::json!({
                "id": sub.id,
                "for": sub.owner,
                "mode": if sub.once { "once" } else { "continuous" },
                "filter": sub.filter_sql,
            }));
        }
        return Ok(());
    }

    let mut filter = Filter::new();
    for term in terms {
        let (key, value) = term.split_once('=').ok_or_else(|| {
            AppError::Filter(format!("expected key=value filter term, got '{term}'"))
        })?;
        filter.push(key, value)?;
    }
    if let Some(raw) = sql {
        filter.raw(raw);
    }
    let predicate = filter.compile()?;

    let sub = manager.subscribe(&owner, &predicate, once).await?;
    print_json(&serde_json::json!({
        "id": sub.id,
        "for": sub.owner,
        "mode": if sub.once { "once" } else { "continuous" },
        "filter": sub.filter_sql,
    }));
    Ok(())
}

async fn run_bundle(config: &Arc<GlobalConfig>, cmd: BundleCommand) -> Result<()> {
    let store = open_store(config).await?;
    let repo = BundleRepo::new(store.db().clone());

    match cmd {
        BundleCommand::Create {
            title,
            description,
            events,
            files,
            extends,
            by,
        } => {
            let ranges = events
                .iter()
                .map(|raw| parse_event_range(raw))
                .collect::<Result<Vec<_>>>()?;
            let bundle = Bundle::new(
                title,
                description,
                BundleRefs {
                    events: ranges,
                    files,
                    transcript: Vec::new(),
                },
                extends,
                by,
            );
            repo.create(&bundle).await?;
            print_json(&serde_json::json!({ "id": bundle.id }));
            Ok(())
        }
        BundleCommand::Show { id } => {
            let bundle = repo
                .get_by_id(&id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("bundle {id}")))?;
            let value = serde_json::to_value(&bundle)
                .map_err(|err| AppError::Db(format!("serialize bundle: {err}")))?;
            print_json(&value);
            Ok(())
        }
        BundleCommand::Resolve { id } => {
            let events = repo.resolve_events(&store, &id).await?;
            for event in &events {
                print_json(&event.to_wire()?);
            }
            Ok(())
        }
        BundleCommand::List => {
            for bundle in repo.list().await? {
                print_json(&serde_json::json!({
                    "id": bundle.id,
                    "title": bundle.title,
                    "created_by": bundle.created_by,
                    "extends": bundle.extends,
                }));
            }
            Ok(())
        }
    }
}

async fn run_daemon(config: Arc<GlobalConfig>) -> Result<()> {
    info!("hcom daemon bootstrap");
    let pool = db::connect(&config).await?;
    info!("database connected");

    let daemon = Daemon::new(Arc::clone(&config), pool.clone());
    let ct = CancellationToken::new();

    let ipc_ctx = Arc::new(IpcContext {
        store: EventStore::new(pool.clone()),
        subscriptions: SubscriptionRepo::new(pool),
        notify_tx: daemon.notify_sender(),
    });
    let ipc_handle = hcom::daemon::ipc::spawn_ipc_server(ipc_ctx, &config.ipc_name, ct.clone())?;

    let daemon_ct = ct.clone();
    let daemon_handle = tokio::spawn(async move {
        if let Err(err) = daemon.run(daemon_ct).await {
            error!(%err, "daemon loop failed");
        }
    });

    info!("hcom daemon ready");
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    let _ = tokio::join!(daemon_handle, ipc_handle);
    info!("hcom daemon shut down");
    Ok(())
}

#[allow(clippy::too_many_arguments)] // CLI plumbing mirrors the flag surface.
fn build_filter(
    types: &[String],
    agents: &[String],
    from: Option<&str>,
    idle: Option<&str>,
    blocked: Option<&str>,
    since: Option<&str>,
    until: Option<&str>,
    sql: Option<&str>,
) -> Result<Filter> {
    let mut filter = Filter::new();
    for t in types {
        filter.push("type", &format!("={t}"))?;
    }
    for agent in agents {
        filter.push("agent", agent)?;
    }
    if let Some(from) = from {
        filter.push("from", from)?;
    }
    if let Some(name) = idle {
        filter.idle(name)?;
    }
    if let Some(name) = blocked {
        filter.blocked(name)?;
    }
    if let Some(since) = since {
        filter.since(parse_ts(since)?);
    }
    if let Some(until) = until {
        filter.until(parse_ts(until)?);
    }
    if let Some(raw) = sql {
        filter.raw(raw);
    }
    Ok(filter)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| AppError::Filter(format!("invalid timestamp '{raw}': {err}")))
}

fn parse_intent(raw: &str) -> Result<Intent> {
    match raw {
        "request" => Ok(Intent::Request),
        "inform" => Ok(Intent::Inform),
        "ack" => Ok(Intent::Ack),
        other => Err(AppError::Filter(format!(
            "invalid intent: {other} (request|inform|ack)"
        ))),
    }
}

fn parse_event_range(raw: &str) -> Result<EventRange> {
    let parse_id = |s: &str| {
        s.trim()
            .parse::<i64>()
            .map_err(|_| AppError::Filter(format!("invalid event range '{raw}'")))
    };
    match raw.split_once('-') {
        Some((start, end)) => Ok(EventRange {
            start: parse_id(start)?,
            end: parse_id(end)?,
        }),
        None => {
            let id = parse_id(raw)?;
            Ok(EventRange { start: id, end: id })
        }
    }
}

fn print_json(value: &serde_json::Value) {
    println!("{value}");
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
