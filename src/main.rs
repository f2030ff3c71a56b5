mod doctor;

use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use delve_core::config::{AppConfig, ModelConfig, WebSearchConfig};
use delve_core::event::EventBus;
use delve_core::traits::{EmbeddingProvider, PdfExtractor, ScrapeTool, SearchTool};
use delve_core::types::WorkflowEvent;
use delve_graph::{Collaborators, RunLogger, RunStatus, WorkflowEngine, WorkflowOutcome};
use delve_index::HttpEmbeddingProvider;
use delve_tools::{create_search_tool, PdftotextExtractor, WebScraper};

#[derive(Parser)]
#[command(name = "delve", version, about = "Multi-agent research answering from the terminal")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "delve.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question and exit
    Ask {
        /// PDF document to ground the answer in
        #[arg(long)]
        pdf: Option<PathBuf>,
        /// Step budget for this run (defaults to workflow.max_steps)
        #[arg(long)]
        max_steps: Option<usize>,
        /// The research question (read from stdin when omitted)
        #[arg(trailing_var_arg = true)]
        question: Vec<String>,
    },
    /// Answer questions interactively
    Repl {
        /// PDF document attached to every question
        #[arg(long)]
        pdf: Option<PathBuf>,
    },
    /// Show the effective configuration
    Config,
    /// Run system health checks
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("delve=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "delve", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Some(Commands::Doctor) => {
            println!("Delve Doctor");
            println!("============");
            if !doctor::run_doctor(&config) {
                std::process::exit(1);
            }
            return Ok(());
        }
        _ => {}
    }

    let event_bus = Arc::new(EventBus::default());
    let engine = build_engine(&config, event_bus.clone())?;

    // Spawn RunLogger if logging is enabled
    let cancel = CancellationToken::new();
    let logger_handle = match &config.log {
        Some(log_config) if log_config.enabled => {
            let logger = RunLogger::new(log_config.dir(), log_config.level);
            info!(dir = %log_config.dir().display(), level = log_config.level, "RunLogger started");
            Some(tokio::spawn(logger.run(event_bus.clone(), cancel.clone())))
        }
        _ => None,
    };

    let result = match cli.command {
        Some(Commands::Ask {
            pdf,
            max_steps,
            question,
        }) => {
            let mut text = question.join(" ");
            if text.trim().is_empty() {
                io::stdin().read_to_string(&mut text)?;
            }
            let text = text.trim();
            if text.is_empty() {
                anyhow::bail!("No question given");
            }
            let max_steps = max_steps.unwrap_or(config.workflow.max_steps);
            ask(&engine, &event_bus, text, path_arg(pdf), max_steps).await
        }
        Some(Commands::Repl { pdf }) => {
            run_repl(&engine, &event_bus, &config, path_arg(pdf)).await
        }
        None => run_repl(&engine, &event_bus, &config, None).await,
        Some(Commands::Config | Commands::Doctor | Commands::Completions { .. }) => {
            unreachable!("handled above")
        }
    };

    // Closing the bus lets the logger drain what is left and stop.
    drop(engine);
    drop(event_bus);
    if let Some(handle) = logger_handle {
        handle.await.ok();
    }
    cancel.cancel();

    result
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    // Check for config in the home directory
    if let Some(home_config) = dirs_home().map(|h| h.join(".delve").join("config.toml")) {
        if home_config.exists() {
            info!(path = %home_config.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home_config)?);
        }
    }

    eprintln!("Warning: No config file found. Set ANTHROPIC_API_KEY or create delve.toml");
    eprintln!("See delve.toml.example for reference.");
    Ok(create_env_config())
}

fn build_engine(config: &AppConfig, event_bus: Arc<EventBus>) -> anyhow::Result<WorkflowEngine> {
    let search: Option<Arc<dyn SearchTool>> = match &config.web_search {
        Some(ws) => Some(Arc::from(create_search_tool(ws)?)),
        None => None,
    };
    let embedder: Option<Arc<dyn EmbeddingProvider>> = config
        .embedding
        .as_ref()
        .map(|e| Arc::new(HttpEmbeddingProvider::from_config(e)) as Arc<dyn EmbeddingProvider>);

    let deps = Collaborators {
        generator: delve_llm::build_generator(config)?,
        search,
        scraper: Arc::new(WebScraper::new(&config.scrape)?) as Arc<dyn ScrapeTool>,
        pdf: Arc::new(PdftotextExtractor::new(&config.pdf)) as Arc<dyn PdfExtractor>,
        embedder,
    };

    Ok(WorkflowEngine::new(deps, config.workflow.clone())
        .with_pdf_top_k(config.pdf.top_k)
        .with_event_bus(event_bus))
}

fn path_arg(path: Option<PathBuf>) -> Option<String> {
    path.map(|p| p.to_string_lossy().into_owned())
}

/// Run one question, printing progress to stderr and the answer to stdout.
async fn ask(
    engine: &WorkflowEngine,
    event_bus: &EventBus,
    question: &str,
    pdf: Option<String>,
    max_steps: usize,
) -> anyhow::Result<()> {
    let rx = event_bus.subscribe();
    let (outcome, ()) = tokio::join!(
        engine.run(question, pdf, max_steps),
        print_progress(rx)
    );
    report(&outcome, max_steps)
}

async fn print_progress(mut rx: broadcast::Receiver<WorkflowEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            WorkflowEvent::RunStarted { pdf_path, .. } => {
                if let Some(path) = pdf_path {
                    eprintln!("[document: {}]", path);
                }
            }
            WorkflowEvent::StepStarted { step, index, .. } => {
                eprint!("[{:>2}] {} ...", index + 1, step);
                io::stderr().flush().ok();
            }
            WorkflowEvent::StepCompleted { elapsed_ms, .. } => {
                eprintln!(" done ({} ms)", elapsed_ms);
            }
            WorkflowEvent::StepRetry { attempt, error, .. } => {
                eprint!(" retry {} ({})", attempt, truncate(&error, 80));
            }
            WorkflowEvent::StepFailed { error, .. } => {
                eprintln!(" failed: {}", error);
            }
            WorkflowEvent::RouteChosen {
                next_step, reason, ..
            } => {
                eprintln!("     -> {}: {}", next_step, truncate(&reason, 120));
            }
            WorkflowEvent::RunFinished { .. } => break,
        }
    }
}

fn report(outcome: &WorkflowOutcome, max_steps: usize) -> anyhow::Result<()> {
    match &outcome.status {
        RunStatus::Answered(answer) => {
            println!("\n{}", answer);
            eprintln!(
                "\n[{} steps, run {}]",
                outcome.steps_executed, outcome.run_id
            );
            Ok(())
        }
        RunStatus::BudgetExceeded { partial } => {
            eprintln!("\nDid not converge within {} steps.", max_steps);
            if partial.is_empty() {
                eprintln!("No partial answers were produced.");
            }
            for (label, answer) in [
                ("Direct answer", &partial.direct),
                ("Document answer", &partial.pdf),
                ("Web report", &partial.web),
            ] {
                if let Some(answer) = answer {
                    println!("\n## {}\n{}", label, answer);
                }
            }
            Ok(())
        }
        RunStatus::NoReview => {
            eprintln!("\nNothing has been reviewed yet; no route to take.");
            Ok(())
        }
        RunStatus::Failed { step, cause } => {
            anyhow::bail!("step '{}' failed: {}", step, cause)
        }
    }
}

async fn run_repl(
    engine: &WorkflowEngine,
    event_bus: &EventBus,
    config: &AppConfig,
    mut pdf: Option<String>,
) -> anyhow::Result<()> {
    let mut max_steps = config.workflow.max_steps;

    println!("Delve v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Model: {} ({})",
        config.model.model_id, config.model.provider
    );
    println!("Type a question, /help for commands, /quit to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break; // EOF
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let parts: Vec<&str> = input.split_whitespace().collect();
        match parts[0] {
            "/quit" | "/exit" | "/q" => {
                println!("Goodbye!");
                break;
            }
            "/help" => {
                println!("Commands:");
                println!("  /pdf <path>    Attach a document to the next questions");
                println!("  /pdf off       Detach the document");
                println!("  /steps <n>     Set the step budget");
                println!("  /status        Show current settings");
                println!("  /quit          Exit");
                continue;
            }
            "/pdf" => {
                match parts.get(1) {
                    Some(&"off") | None => {
                        pdf = None;
                        println!("Document detached.");
                    }
                    Some(path) => {
                        pdf = Some(path.to_string());
                        println!("Document attached: {}", path);
                    }
                }
                continue;
            }
            "/steps" => {
                match parts.get(1).and_then(|n| n.parse::<usize>().ok()) {
                    Some(n) if n > 0 => {
                        max_steps = n;
                        println!("Step budget: {}", n);
                    }
                    _ => println!("Usage: /steps <n> (n >= 1)"),
                }
                continue;
            }
            "/status" => {
                println!(
                    "Model: {} ({})",
                    config.model.model_id, config.model.provider
                );
                println!("Entry: {:?}", engine.config().entry);
                println!("Step budget: {}", max_steps);
                println!("Document: {}", pdf.as_deref().unwrap_or("none"));
                println!(
                    "Web search: {}",
                    config
                        .web_search
                        .as_ref()
                        .map_or("not configured", |ws| ws.provider.as_str())
                );
                continue;
            }
            cmd if cmd.starts_with('/') => {
                println!("Unknown command: {}. Type /help.", cmd);
                continue;
            }
            _ => {}
        }

        if let Err(e) = ask(engine, event_bus, input, pdf.clone(), max_steps).await {
            eprintln!("Error: {}", e);
        }
        println!();
    }

    Ok(())
}

/// Minimal config from environment variables.
fn create_env_config() -> AppConfig {
    let anthropic_key = std::env::var("ANTHROPIC_API_KEY").ok();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();

    let model = match (anthropic_key, openai_key) {
        (Some(key), _) => {
            let mut model = ModelConfig::new("anthropic", "claude-sonnet-4-20250514");
            model.api_key = Some(key);
            model
        }
        (None, Some(key)) => {
            let mut model = ModelConfig::new("openai", "gpt-4o");
            model.api_key = Some(key);
            model
        }
        // Default to Ollama (local)
        (None, None) => ModelConfig::new("ollama", "llama3.2"),
    };

    let web_search = [("SERPER_API_KEY", "serper"), ("TAVILY_API_KEY", "tavily")]
        .into_iter()
        .find_map(|(var, provider)| {
            std::env::var(var).ok().map(|api_key| WebSearchConfig {
                provider: provider.to_string(),
                api_key,
                max_results: 10,
                timeout_secs: 30,
            })
        });

    AppConfig {
        model,
        fallback_models: Vec::new(),
        workflow: Default::default(),
        web_search,
        scrape: Default::default(),
        pdf: Default::default(),
        embedding: None,
        log: None,
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
