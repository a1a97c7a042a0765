//! CLI entry point for mender.

mod cli;

use clap::Parser;
use mender::agent::approvals::{ApprovalBroker, ApprovalDecision, ApprovalKind, ApprovalRequest};
use mender::agent::{Agent, AgentEvent, StopReason, TurnOutcome};
use mender::config::{load_config, Config};
use mender::error::AgentError;
use mender::render::Renderer;
use mender::session::SessionStore;
use mender::snapshot::{SharedSnapshots, SnapshotEngine};
use mender::tools::default_registry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Typed during a running turn to move a long shell command to the background.
const DETACH_COMMAND: &str = "bg";

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MENDER_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mut config = match load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    // Apply CLI overrides.
    if let Some(model) = &args.model {
        config.api.model = model.clone();
    }
    if let Some(url) = &args.base_url {
        config.api.base_url = url.clone();
    }
    if args.no_color {
        config.display.color = false;
    }

    let renderer = Renderer::new(&config.display);

    if let Some(cli::Command::Changes { action }) = args.command {
        let result = match open_snapshots(&config) {
            Ok(mut engine) => run_changes(&mut engine, action, &renderer),
            Err(msg) => Err(msg),
        };
        if let Err(msg) = result {
            renderer.error(&msg);
            std::process::exit(1);
        }
        return;
    }

    if config.api.base_url.is_empty() {
        renderer.error("No API base URL configured. Set api.base_url in mender.toml or MENDER_BASE_URL.");
        std::process::exit(1);
    }

    let snapshots: Option<SharedSnapshots> = if config.snapshots.enabled {
        match open_snapshots(&config) {
            Ok(engine) => Some(engine.into_shared()),
            Err(msg) => {
                renderer.warn(&format!("{msg}; file edits will not be reversible"));
                None
            }
        }
    } else {
        None
    };

    let root = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            renderer.error(&format!("cannot determine working directory: {e}"));
            std::process::exit(1);
        }
    };
    let tools = default_registry(&config, root, snapshots);
    let model = config.api.model.clone();
    let mut agent = Agent::new(config, tools);
    agent.set_auto_approve(args.yes);

    match SessionStore::open_default() {
        Ok(store) => {
            let requested = args.session.as_deref().map(|s| store.resolve(s));
            agent.set_store(Some(Arc::new(store)));
            if let Some(requested) = requested {
                if let Err(msg) = requested.and_then(|id| resume_or_start(&mut agent, &id)) {
                    renderer.error(&msg);
                    std::process::exit(1);
                }
            }
        }
        Err(msg) => renderer.warn(&format!("{msg}; this session will not be saved")),
    }

    let (broker, approvals_rx) = ApprovalBroker::channel();
    agent.set_approvals(Some(broker.clone()));

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    agent.set_event_sink(Some(events_tx));

    let (cancel_tx, cancel_rx) = watch::channel(false);
    agent.set_cancellation_receiver(Some(cancel_rx));
    let cancel_tx = Arc::new(cancel_tx);
    let busy = Arc::new(AtomicBool::new(false));
    spawn_interrupt_handler(Arc::clone(&cancel_tx), Arc::clone(&busy));

    let mut io = TurnIo {
        renderer,
        events: events_rx,
        approvals: approvals_rx,
        lines: spawn_stdin_reader(),
        detach: agent.detach_handle(),
    };

    if let Some(prompt) = args.prompt {
        busy.store(true, Ordering::SeqCst);
        let result = io.drive(&mut agent, &prompt).await;
        broker.shutdown();
        if let Err(e) = result {
            io.renderer.error(&e.to_string());
            std::process::exit(1);
        }
        return;
    }

    io.renderer.header(&model, agent.session_id());
    loop {
        io.renderer.prompt();
        let Some(line) = io.lines.recv().await else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit" | "/exit" | "/quit") {
            break;
        }

        cancel_tx.send_replace(false);
        busy.store(true, Ordering::SeqCst);
        if let Err(e) = io.drive(&mut agent, input).await {
            io.renderer.error(&e.to_string());
        }
        busy.store(false, Ordering::SeqCst);
    }
    broker.shutdown();
}

fn open_snapshots(config: &Config) -> Result<SnapshotEngine, String> {
    let dir = config
        .snapshots
        .dir
        .clone()
        .unwrap_or_else(SnapshotEngine::default_dir);
    SnapshotEngine::open(&dir, config.snapshots.max_tracked_files)
        .map_err(|e| format!("failed to open snapshot store {}: {e}", dir.display()))
}

fn resume_or_start(agent: &mut Agent, id: &str) -> Result<(), String> {
    if agent.resume_session(id)? {
        debug!(session = id, "resumed session");
    } else {
        agent.set_session_id(id);
        debug!(session = id, "starting new session");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Turn driver
// ---------------------------------------------------------------------------

/// Terminal-side channels serviced while a turn runs.
struct TurnIo {
    renderer: Renderer,
    events: mpsc::UnboundedReceiver<AgentEvent>,
    approvals: mpsc::UnboundedReceiver<ApprovalRequest>,
    lines: mpsc::UnboundedReceiver<String>,
    detach: Arc<Notify>,
}

impl TurnIo {
    /// Run one turn, rendering events and answering approvals as they arrive.
    async fn drive(&mut self, agent: &mut Agent, prompt: &str) -> Result<TurnOutcome, AgentError> {
        let mut streamed = false;
        let send = agent.send(prompt);
        tokio::pin!(send);

        let result = loop {
            tokio::select! {
                result = &mut send => break result,
                Some(event) = self.events.recv() => {
                    streamed |= matches!(event, AgentEvent::Content(_));
                    self.renderer.event(&event);
                }
                Some(request) = self.approvals.recv() => {
                    answer_approval(request, &self.renderer, &mut self.lines).await;
                }
                Some(line) = self.lines.recv() => {
                    if line.trim() == DETACH_COMMAND {
                        self.detach.notify_waiters();
                    }
                }
            }
        };

        while let Ok(event) = self.events.try_recv() {
            streamed |= matches!(event, AgentEvent::Content(_));
            self.renderer.event(&event);
        }

        let outcome = result?;
        match outcome.stop_reason {
            StopReason::Completed | StopReason::ForcedStop if streamed => self.renderer.finish_answer(),
            StopReason::Cancelled => self.renderer.warn("cancelled"),
            _ => println!("{}", outcome.answer),
        }
        Ok(outcome)
    }
}

async fn answer_approval(
    request: ApprovalRequest,
    renderer: &Renderer,
    lines: &mut mpsc::UnboundedReceiver<String>,
) {
    let kind = request.kind();
    let question = match kind {
        ApprovalKind::TerminalCommand => "run command?",
        ApprovalKind::IterationExtension => "keep going?",
    };
    renderer.approval_prompt(question, request.detail());

    let Some(answer) = lines.recv().await else {
        request.deny();
        return;
    };
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => request.approve(),
        "e" | "edit" if kind == ApprovalKind::TerminalCommand => {
            renderer.approval_prompt("edited command:", "");
            match lines.recv().await {
                Some(edited) if !edited.trim().is_empty() => {
                    request.respond(ApprovalDecision::Edited(edited.trim().to_string()))
                }
                _ => request.deny(),
            }
        }
        _ => request.deny(),
    }
}

/// Forward stdin lines to a channel so prompts and approvals share one reader.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });
    rx
}

/// Ctrl-C cancels the running turn, or exits when idle.
fn spawn_interrupt_handler(cancel_tx: Arc<watch::Sender<bool>>, busy: Arc<AtomicBool>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !busy.load(Ordering::SeqCst) {
                eprintln!();
                std::process::exit(130);
            }
            cancel_tx.send_replace(true);
        }
    });
}

// ---------------------------------------------------------------------------
// `mender changes`
// ---------------------------------------------------------------------------

fn run_changes(
    engine: &mut SnapshotEngine,
    action: cli::ChangesAction,
    renderer: &Renderer,
) -> Result<(), String> {
    match action {
        cli::ChangesAction::List => {
            let pending = engine.list();
            if pending.is_empty() {
                renderer.field("pending", "none");
                return Ok(());
            }
            for snapshot in pending {
                renderer.section(&snapshot.file_path);
                renderer.field("id", &snapshot.id);
                renderer.field("kind", snapshot.tool.as_str());
                renderer.field("changes", &snapshot.changes.len().to_string());
                renderer.field(
                    "lines",
                    &format!(
                        "+{} -{}",
                        snapshot.total_lines_added, snapshot.total_lines_removed
                    ),
                );
            }
        }
        cli::ChangesAction::Show { id } => {
            let snapshot = engine
                .get(&id)
                .ok_or_else(|| format!("no pending snapshot `{id}`"))?;
            renderer.section(&snapshot.file_path);
            for change in &snapshot.changes {
                renderer.field(
                    "change",
                    &format!(
                        "{} {}",
                        change.id,
                        describe_position(engine, &snapshot.id, &change.id)
                    ),
                );
                for line in &change.old_lines {
                    println!("-{line}");
                }
                for line in &change.new_lines {
                    println!("+{line}");
                }
            }
        }
        cli::ChangesAction::Undo { id, change } => {
            match change {
                Some(change_id) => engine.rollback_change(&id, &change_id),
                None => engine.rollback_snapshot(&id),
            }
            .map_err(|e| e.to_string())?;
            renderer.field("reverted", &id);
        }
        cli::ChangesAction::Accept { id, all } => {
            if all {
                let count = engine.confirm_all();
                renderer.field("accepted", &format!("{count} file(s)"));
            } else {
                let id = id.ok_or("snapshot id required without --all")?;
                if !engine.confirm(&id) {
                    return Err(format!("no pending snapshot `{id}`"));
                }
                renderer.field("accepted", &id);
            }
        }
    }
    Ok(())
}

/// Where a recorded change currently sits in its file on disk.
fn describe_position(engine: &SnapshotEngine, snapshot_id: &str, change_id: &str) -> String {
    match engine.find_change(snapshot_id, change_id) {
        Ok(Some(line)) => format!("at line {}", line + 1),
        Ok(None) => "not found in current file".to_string(),
        Err(e) => format!("not found ({e})"),
    }
}
