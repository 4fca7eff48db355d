//! reel - generate animation videos from natural-language requests.
//!
//! Main entry point for the CLI binary.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::{Args, Parser, Subcommand};
use eyre::{bail, WrapErr};
use reel::llm::opening_messages;
use reel::{
    ClientConfig, CompletionClient, Renderer, RendererConfig, Session, SessionConfig,
    SessionError, SessionEvent, SessionOutcome,
};
use reel_core::Config;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Lines of each candidate shown before rendering.
const PREVIEW_LINES: usize = 15;

const RULE_WIDTH: usize = 60;

/// Generate animation videos from natural-language requests.
#[derive(Parser)]
#[command(name = "reel", version)]
#[command(about = "Generate Manim animation videos with an LLM generate-render-repair loop")]
struct Cli {
    /// Config file path (overrides .reel/config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a video for a request
    Generate {
        #[command(flatten)]
        request: RequestArgs,

        /// Model identifier (overrides config and LLM_MODEL)
        #[arg(long)]
        model: Option<String>,

        /// Quality preset: low_quality, medium_quality, high_quality, production_quality
        #[arg(long)]
        quality: Option<String>,

        /// Maximum render attempts
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_attempts: Option<u32>,
    },

    /// Show the messages that would open the conversation (no network access)
    Prompt {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Show the effective configuration (credential redacted)
    Config,
}

#[derive(Args)]
struct RequestArgs {
    /// What to animate (read from stdin when omitted)
    request: Option<String>,

    /// Extra context appended to the request
    #[arg(long, conflicts_with = "context_file")]
    context: Option<String>,

    /// Read extra context from a file
    #[arg(long)]
    context_file: Option<PathBuf>,

    /// Generate code directly, without planning a script first
    #[arg(long)]
    single_phase: bool,
}

impl RequestArgs {
    fn context(&self) -> eyre::Result<Option<String>> {
        match (&self.context, &self.context_file) {
            (Some(context), _) => Ok(Some(context.clone())),
            (None, Some(path)) => std::fs::read_to_string(path)
                .map(Some)
                .wrap_err_with(|| format!("failed to read context file {}", path.display())),
            (None, None) => Ok(None),
        }
    }

    fn request(&self) -> eyre::Result<String> {
        let request = match &self.request {
            Some(request) => request.clone(),
            None => read_request_from_stdin()?,
        };
        let request = request.trim().to_string();
        if request.is_empty() {
            bail!("request is empty");
        }
        Ok(request)
    }
}

fn read_request_from_stdin() -> eyre::Result<String> {
    println!("What would you like to animate?");
    print!("> ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .wrap_err("failed to read request from stdin")?;
    Ok(line)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> eyre::Result<ExitCode> {
    let root = std::env::current_dir().wrap_err("failed to resolve working directory")?;
    let mut config = Config::load(&root, cli.config.as_deref())?;

    match cli.command {
        Command::Generate {
            request,
            model,
            quality,
            max_attempts,
        } => {
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(quality) = quality {
                config.quality = Config::parse_quality(&quality)?;
            }
            if let Some(max_attempts) = max_attempts {
                config.max_attempts = max_attempts;
            }
            if request.single_phase {
                config.two_phase = false;
            }
            generate(&config, &request).await
        }
        Command::Prompt { request } => {
            if request.single_phase {
                config.two_phase = false;
            }
            print_prompt(&config, &request)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_prompt(config: &Config, args: &RequestArgs) -> eyre::Result<()> {
    let request = args.request()?;
    let context = args.context()?;
    let messages = opening_messages(&ClientConfig::from_config(config), &request, context.as_deref());

    for message in messages {
        println!("=== {} ===", message.role.as_str());
        println!("{}", message.content);
        println!();
    }
    Ok(())
}

async fn generate(config: &Config, args: &RequestArgs) -> eyre::Result<ExitCode> {
    let client = CompletionClient::from_config(config)?;

    let request = args.request()?;
    let context = args.context()?;

    print_banner(config, &request);

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received SIGINT, aborting session");
            signal_token.cancel();
        }
    });

    let renderer = Renderer::new(RendererConfig::from_config(config));
    let mut session = Session::new(client, renderer, SessionConfig::from_config(config))
        .with_cancel_token(cancel_token)
        .with_observer(print_event);

    let result = session.run(&request, context.as_deref()).await;

    if config.summary_json {
        match session.report().write_json(&config.output_dir) {
            Ok(path) => info!(path = %path.display(), "session summary written"),
            Err(err) => warn!(error = %err, "failed to write session summary"),
        }
    }

    let rule = "=".repeat(RULE_WIDTH);
    match result {
        Ok(SessionOutcome::Rendered {
            artifact, attempts, ..
        }) => {
            println!("\n{rule}");
            println!("Video generated after {attempts} attempt(s)");
            println!("Output: {}", artifact.display());
            println!("{rule}");
            Ok(ExitCode::SUCCESS)
        }
        Ok(SessionOutcome::Exhausted {
            diagnostic,
            candidate,
            scene_file,
            attempts,
        }) => {
            println!("\n{rule}");
            println!("Failed to generate a video after {attempts} attempt(s)");
            println!("{rule}");
            println!("\nLast error:\n{}", diagnostic.prompt_text());
            print_final_code(&scene_file, &candidate);
            Ok(ExitCode::FAILURE)
        }
        Err(SessionError::Repair {
            attempt,
            source,
            last_candidate,
            last_diagnostic,
            scene_file,
        }) => {
            println!("\nRepair request after attempt {attempt} failed: {source}");
            println!("\nLast error:\n{last_diagnostic}");
            print_final_code(&scene_file, &last_candidate);
            Ok(ExitCode::FAILURE)
        }
        Err(SessionError::Interrupted { attempts }) => {
            println!("\nInterrupted after {attempts} render attempt(s)");
            Ok(ExitCode::from(130))
        }
        Err(err) => Err(err.into()),
    }
}

fn print_banner(config: &Config, request: &str) {
    let rule = "=".repeat(RULE_WIDTH);
    println!("{rule}");
    println!("reel - animation generator");
    println!("{rule}");
    println!("Model:        {}", config.model);
    println!("Quality:      {}", config.quality);
    println!("Max attempts: {}", config.max_attempts);
    println!("Mode:         {}", if config.two_phase { "script + code" } else { "code only" });
    println!("Request:      {request}");
    println!("{rule}");
}

fn print_event(event: SessionEvent<'_>) {
    match event {
        SessionEvent::Generating => println!("\nGenerating code..."),
        SessionEvent::Rendering {
            attempt,
            max_attempts,
            candidate,
        } => {
            println!("\n--- Attempt {attempt}/{max_attempts} ---");
            let lines: Vec<&str> = candidate.lines().collect();
            for line in lines.iter().take(PREVIEW_LINES) {
                println!("  {line}");
            }
            if lines.len() > PREVIEW_LINES {
                println!("  ... ({} more lines)", lines.len() - PREVIEW_LINES);
            }
            println!("Rendering...");
        }
        SessionEvent::RenderFailed {
            attempt,
            diagnostic,
        } => {
            println!("Attempt {attempt} failed: {diagnostic}");
        }
        SessionEvent::Repairing { .. } => println!("Asking the model for a fix..."),
        SessionEvent::Rendered { artifact, .. } => {
            println!("Rendered {}", artifact.display());
        }
    }
}

fn print_final_code(scene_file: &Path, candidate: &str) {
    println!("\nFinal code ({}):", scene_file.display());
    println!("{}", "-".repeat(RULE_WIDTH));
    println!("{candidate}");
    println!("{}", "-".repeat(RULE_WIDTH));
}
