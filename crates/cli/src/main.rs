//! tutti CLI - substitute musician request dispatch.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tutti_core::{Musician, Need, Project, RankingList, Strategy, SystemClock};
use tutti_engine::{
    DispatchEngine, DispatchOutcome, NeedPreview, ResponseChoice, ResponseHandler, SweepConfig,
    TimeoutSweeper,
};
use tutti_notify::{DispatchEvent, Notifier, WebhookNotifier};
use tutti_storage::{JsonStorage, Storage};

#[derive(Parser)]
#[command(name = "tutti")]
#[command(about = "Request dispatch for substitute musicians", long_about = None)]
struct Cli {
    /// Data directory
    #[arg(long, default_value = ".tutti")]
    data: std::path::PathBuf,

    /// POST dispatch events to this URL instead of printing them
    #[arg(long)]
    webhook: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a demo project with musicians, a ranking list and needs
    Seed,
    /// List the needs of a project
    Needs {
        /// Project ID
        project: String,
    },
    /// Show what a dispatch call would do, without sending anything
    Preview {
        /// Need ID
        need: String,
    },
    /// Preview every open need of a project
    PreviewAll {
        /// Project ID
        project: String,
    },
    /// Evaluate a need and send whatever its strategy wants
    Dispatch {
        /// Need ID
        need: String,
    },
    /// Dispatch every open need of a project
    DispatchAll {
        /// Project ID
        project: String,
    },
    /// Apply a musician's response
    Respond {
        /// Response token from the request link
        token: String,
        /// "accept" or "decline"
        choice: String,
    },
    /// Expire overdue pending requests
    Sweep {
        /// Keep sweeping on an interval instead of running once
        #[arg(long)]
        watch: bool,
        /// Seconds between sweeps with --watch
        #[arg(long, default_value = "60")]
        interval: u64,
    },
}

/// Prints dispatch events to stdout; the default when no webhook is set.
struct ConsoleNotifier;

#[async_trait::async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, event: DispatchEvent) {
        match event {
            DispatchEvent::RequestSent {
                request_id,
                musician_id,
                token,
                ..
            } => println!("sent {request_id} to {musician_id} (token {token})"),
            DispatchEvent::RequestAccepted { musician_id, .. } => {
                println!("accepted by {musician_id}")
            }
            DispatchEvent::RequestDeclined { musician_id, .. } => {
                println!("declined by {musician_id}")
            }
            DispatchEvent::RequestTimedOut { musician_id, .. } => {
                println!("timed out for {musician_id}")
            }
            DispatchEvent::RequestCancelled { musician_id, .. } => {
                println!("cancelled for {musician_id} (need filled)")
            }
            DispatchEvent::NeedCompleted { need_id, .. } => {
                println!("need {need_id} completed")
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    let storage = Arc::new(JsonStorage::new(&cli.data).await?);
    let notifier: Arc<dyn Notifier> = match &cli.webhook {
        Some(url) => Arc::new(WebhookNotifier::new(url.as_str())),
        None => Arc::new(ConsoleNotifier),
    };
    let engine = DispatchEngine::new(storage.clone(), Arc::new(SystemClock), notifier);

    match cli.command {
        Commands::Seed => {
            let now = chrono::Utc::now();
            let project = Project::new("Demo Season", now);
            storage.save_project(&project).await?;

            let mut list = RankingList::standard("Violin I");
            for i in 1..=6 {
                let musician = Musician::new(format!("Musician {i}"), format!("m{i}@example.org"));
                list.push(musician.id);
                storage.save_musician(&musician).await?;
            }
            storage.save_ranking_list(&list).await?;

            let window = Duration::from_secs(48 * 3600);
            let sequential = Need::new(
                project.id,
                "Violin I",
                1,
                Strategy::Sequential,
                list.id,
                window,
                now,
            );
            sequential.validate()?;
            storage.save_need(&sequential).await?;

            let parallel = Need::new(
                project.id,
                "Violin I",
                2,
                Strategy::Parallel,
                list.id,
                window,
                now,
            );
            parallel.validate()?;
            storage.save_need(&parallel).await?;

            println!("Project: {}", project.id);
            println!("  Need (sequential): {}", sequential.id);
            println!("  Need (parallel):   {}", parallel.id);
        }
        Commands::Needs { project } => {
            let project_id = project
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid project ID"))?;
            let needs = storage.list_needs(project_id).await?;

            println!("Needs ({})", needs.len());
            for need in needs {
                println!(
                    "  {} | {} | {} | quantity {} | {:?}",
                    need.id, need.position, need.strategy, need.quantity, need.lifecycle,
                );
            }
        }
        Commands::Preview { need } => {
            let need_id = need
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid need ID"))?;
            print_preview(&engine.preview(need_id).await?);
        }
        Commands::PreviewAll { project } => {
            let project_id = project
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid project ID"))?;
            for preview in engine.preview_all(project_id).await? {
                print_preview(&preview);
            }
        }
        Commands::Dispatch { need } => {
            let need_id = need
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid need ID"))?;
            print_outcome(&engine.dispatch(need_id).await?);
        }
        Commands::DispatchAll { project } => {
            let project_id = project
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid project ID"))?;
            for (need_id, outcome) in engine.dispatch_all(project_id).await? {
                println!("Need {need_id}:");
                print_outcome(&outcome);
            }
        }
        Commands::Respond { token, choice } => {
            let choice = parse_choice(&choice)
                .ok_or_else(|| anyhow::anyhow!("choice must be \"accept\" or \"decline\""))?;
            let handler = ResponseHandler::new(engine);
            let outcome = handler.respond(&token, choice).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Sweep { watch, interval } => {
            let sweeper = TimeoutSweeper::new(engine).with_config(SweepConfig {
                interval: Duration::from_secs(interval),
            });
            if watch {
                sweeper.run().await;
            } else {
                let report = sweeper.sweep().await?;
                println!("Expired {} request(s)", report.expired);
            }
        }
    }

    Ok(())
}

fn parse_choice(s: &str) -> Option<ResponseChoice> {
    match s.to_lowercase().as_str() {
        "accept" => Some(ResponseChoice::Accept),
        "decline" => Some(ResponseChoice::Decline),
        _ => None,
    }
}

fn print_preview(preview: &NeedPreview) {
    println!(
        "Need {} | {} | {}{}",
        preview.need_id,
        preview.position,
        preview.strategy,
        if preview.already_complete {
            " | already complete"
        } else {
            ""
        },
    );
    println!("  Would contact ({})", preview.to_contact.len());
    for c in &preview.to_contact {
        println!("    {:>3}. {} ({})", c.rank, c.name, c.musician_id);
    }
    println!("  Excluded ({})", preview.excluded.len());
    for e in &preview.excluded {
        println!("    {:>3}. {} - {}", e.rank, e.name, e.reason);
    }
    println!("  Next in queue ({})", preview.next_in_queue.len());
    for c in &preview.next_in_queue {
        println!("    {:>3}. {} ({})", c.rank, c.name, c.musician_id);
    }
}

fn print_outcome(outcome: &DispatchOutcome) {
    if outcome.already_complete && outcome.created.is_empty() {
        println!("  already complete, nothing sent");
        return;
    }
    println!("  Sent {} request(s)", outcome.created.len());
    for sent in &outcome.created {
        println!(
            "    {:>3}. {} -> request {}",
            sent.rank, sent.musician_id, sent.request_id,
        );
    }
}
