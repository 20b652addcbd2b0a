use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::*;
use tokio::sync::broadcast;

use model_arena::api::{ApiClient, Backend};
use model_arena::auth::{Identity, StaticIdentity};
use model_arena::cli::{Args, Command, CompareArgs, HistoryArgs, ModelsArgs};
use model_arena::config::ArenaConfig;
use model_arena::error::{ArenaError, Result};
use model_arena::history::{self, filter_items, HistoryItem, HistoryReconciler};
use model_arena::lifecycle::SessionManager;
use model_arena::logging;
use model_arena::models::ModelCatalog;
use model_arena::playground::Playground;
use model_arena::store::SessionStore;
use model_arena::streaming::{ModelStatus, StreamingState};
use model_arena::transport::WsTransport;
use model_arena::ui::{Notification, NotificationKind, Ui};

// ---------------------------------------------------------------------------
// Notification echo
// ---------------------------------------------------------------------------

fn print_notification(n: &Notification) {
    let label = match n.kind {
        NotificationKind::Success => n.title.bright_green(),
        NotificationKind::Error => n.title.bright_red(),
        NotificationKind::Warning => n.title.bright_yellow(),
        NotificationKind::Info => n.title.bright_blue(),
    };
    match &n.message {
        Some(m) => eprintln!("[{}] {}: {}", n.kind, label, m),
        None => eprintln!("[{}] {}", n.kind, label),
    }
}

fn echo_pending(rx: &mut broadcast::Receiver<Notification>) {
    loop {
        match rx.try_recv() {
            Ok(n) => print_notification(&n),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_round(state: &StreamingState) {
    for model in state.models() {
        let status = state.status(model).unwrap_or_default();
        let header = match status {
            ModelStatus::Complete => model.bright_green().bold(),
            ModelStatus::Error => model.bright_red().bold(),
            _ => model.bright_yellow().bold(),
        };
        println!("{}", "=".repeat(50).bright_blue());
        println!("{} [{}]", header, status);
        println!("{}", state.response(model).unwrap_or(""));
        if let Some(m) = state.metrics(model) {
            let tokens = m
                .token_usage
                .map(|t| t.total_tokens.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{}",
                format!(
                    "{} chars in {} ms ({} chars/s), tokens {}, cost ${:.6}",
                    m.char_count,
                    m.duration_ms,
                    m.chars_per_sec,
                    tokens,
                    m.cost_usd.unwrap_or(0.0)
                )
                .dimmed()
            );
        }
    }
    println!("{}", "=".repeat(50).bright_blue());
    println!(
        "Completed {}/{} models ({:.0}%), avg {:.1} chars/s, {} tokens, ${:.6}",
        state.completed_models().len(),
        state.total_models(),
        state.completion_ratio() * 100.0,
        state.average_chars_per_sec(),
        state.total_tokens(),
        state.total_cost_usd()
    );
}

fn print_history(items: &[HistoryItem]) {
    if items.is_empty() {
        println!("{}", "No comparisons found.".dimmed());
        return;
    }
    for item in items {
        let models: Vec<&str> = item.result.results.keys().map(String::as_str).collect();
        println!(
            "{}  {}  {}",
            item.result.created_at.dimmed(),
            item.result.prompt.bright_white(),
            models.join(", ").bright_cyan()
        );
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

struct App {
    cfg: ArenaConfig,
    ui: Ui,
    identity: Arc<dyn Identity>,
    backend: Arc<dyn Backend>,
}

impl App {
    fn new(cfg: ArenaConfig) -> Self {
        let ui = Ui::new(Duration::from_millis(cfg.notifications.default_duration_ms));
        let identity: Arc<dyn Identity> = Arc::new(StaticIdentity::new(cfg.token.clone()));
        let backend: Arc<dyn Backend> =
            Arc::new(ApiClient::from_config(&cfg, Some(Arc::clone(&identity))));
        Self {
            cfg,
            ui,
            identity,
            backend,
        }
    }

    fn history(&self) -> Arc<HistoryReconciler> {
        Arc::new(HistoryReconciler::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.identity),
            self.ui.clone(),
            self.cfg.history,
        ))
    }

    async fn models(&self, args: &ModelsArgs) -> Result<()> {
        let mut catalog = ModelCatalog::default();
        catalog.load(&self.backend, &self.ui).await?;

        if args.providers {
            for p in catalog.providers() {
                println!("{}", p.bright_cyan());
            }
            return Ok(());
        }
        if args.capabilities {
            for (cap, ids) in &catalog.capabilities {
                println!("{}: {}", cap.bright_magenta(), ids.join(", "));
            }
            return Ok(());
        }
        if args.stats {
            if let Some(s) = &catalog.stats {
                println!("{}", serde_json::to_string_pretty(s)?);
            }
            return Ok(());
        }

        let matches = catalog.filter(&args.filter());
        if args.grouped {
            for provider in catalog.providers() {
                let in_group: Vec<_> = matches.iter().filter(|m| m.provider == provider).collect();
                if in_group.is_empty() {
                    continue;
                }
                println!("{}", provider.bright_cyan().bold());
                for m in in_group {
                    println!("  {} {}", m.id.bright_white(), m.name.dimmed());
                }
            }
        } else {
            for m in matches {
                println!(
                    "{:<32} {:<12} {:>9} ctx  ${}/1k  [{}]",
                    m.id.bright_white(),
                    m.provider.bright_cyan(),
                    m.context_window,
                    m.cost_per_1k_tokens,
                    m.capabilities.join(", ")
                );
            }
        }
        Ok(())
    }

    async fn compare(&self, args: &CompareArgs) -> Result<()> {
        let store = SessionStore::new();
        let manager = SessionManager::from_config(
            &self.cfg,
            Arc::clone(&self.backend),
            Arc::clone(&self.identity),
            store.clone(),
            self.ui.clone(),
        );
        let created = args.session.is_none();
        match &args.session {
            Some(id) => manager.resume_session(id).await?,
            None => manager.create_session(&args.models).await?,
        };

        let transport = Arc::new(WsTransport::new(
            self.cfg.backend.ws_url.clone(),
            self.cfg.transport.reconnect,
        ));
        let playground = Playground::new(
            transport,
            Arc::clone(&self.backend),
            store.clone(),
            self.history(),
            self.ui.clone(),
            self.cfg.streaming,
        );

        let outcome = if args.http {
            playground.submit_prompt_http(&args.prompt).await.map(|_| ())
        } else {
            self.stream(&playground, &args.prompt).await
        };
        if outcome.is_ok() {
            print_round(&store.streaming());
        }

        if created && !args.keep_session {
            // Failure is already reported through a notification.
            let _ = manager.end_session().await;
        } else if let Some(id) = store.session_id() {
            println!("{} {}", "Session kept:".dimmed(), id.bright_white());
        }
        outcome
    }

    async fn stream(&self, playground: &Arc<Playground>, prompt: &str) -> Result<()> {
        playground.attach()?;
        let connect_limit = self
            .cfg
            .transport
            .reconnect
            .delay_for(self.cfg.transport.reconnect.max_attempts)
            .saturating_mul(self.cfg.transport.reconnect.max_attempts)
            + self.cfg.connect_timeout();
        let result = async {
            playground.wait_connected(connect_limit).await?;
            playground.submit_prompt(prompt)?;
            playground.wait_round_closed().await;
            Ok::<(), ArenaError>(())
        }
        .await;
        playground.detach();
        result
    }

    async fn history_cmd(&self, args: &HistoryArgs) -> Result<()> {
        let reconciler = self.history();
        let items = match &args.session {
            Some(id) => reconciler.session_history(id).await,
            None => {
                reconciler.refresh().await?;
                reconciler.items()
            }
        };
        let items = filter_items(&items, &args.filter());
        print_history(&items);

        let stats = history::compute_stats(&items);
        println!(
            "{} comparisons, {} tokens, ${:.4}, avg {:.0} ms",
            stats.total_comparisons,
            stats.total_tokens_used,
            stats.total_cost,
            stats.average_response_time
        );
        if let Some(path) = &args.export {
            history::export_to(path, &items)?;
            println!("{} {}", "Exported to".bright_green(), path.display());
        }
        Ok(())
    }
}

async fn run(args: Args, rx: &mut broadcast::Receiver<Notification>) -> Result<()> {
    let cfg = match &args.config {
        Some(path) => ArenaConfig::load(path)?,
        None => ArenaConfig::discover()?,
    };
    let app = App::new(cfg);
    *rx = app.ui.subscribe();

    match &args.command {
        Command::Models(m) => app.models(m).await,
        Command::Compare(c) => app.compare(c).await,
        Command::History(h) => app.history_cmd(h).await,
        Command::Import { path } => {
            let export = history::import_from(path)?;
            println!(
                "{} {} items exported {}",
                "Imported".bright_green(),
                export.total_items,
                export.export_date.dimmed()
            );
            print_history(&export.items);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init();

    let (_tx, mut rx) = broadcast::channel::<Notification>(1);
    let outcome = run(args, &mut rx).await;
    echo_pending(&mut rx);

    match outcome {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("{} {}", "error:".bright_red().bold(), e.user_message());
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
