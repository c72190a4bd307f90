//! Claude CLI Provider - run generations through the Claude Code CLI.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_cli_provider::config::{ConfigLoader, PermissionMode, Settings};
use claude_cli_provider::display::{self, EventPrinter};
use claude_cli_provider::provider::{
    ClaudeCodeProvider, GenerationRequest, ProviderError, StreamEvent,
};

#[derive(Parser)]
#[command(
    name = "claude-cli-provider",
    about = "Run text generation through the Claude Code CLI",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file to load instead of the default search paths.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a response for a prompt.
    Generate {
        /// The prompt sent to Claude Code.
        prompt: String,
        /// Model name or alias; defaults to the configured model.
        #[arg(short, long, default_value = "")]
        model: String,
        /// System prompt replacing the CLI default.
        #[arg(long)]
        system_prompt: Option<String>,
        /// Print events as they arrive.
        #[arg(long)]
        stream: bool,
        /// Print JSON instead of formatted output.
        #[arg(long)]
        json: bool,
        /// Show tool inputs, results and errors without truncation.
        #[arg(long)]
        raw: bool,
        /// Overall request timeout in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Maximum concurrently running processes.
        #[arg(long)]
        max_concurrent: Option<usize>,
        /// Permission mode passed to the CLI.
        #[arg(long)]
        permission_mode: Option<PermissionMode>,
        /// Tools the CLI may use without prompting.
        #[arg(long, value_delimiter = ',')]
        allowed_tools: Vec<String>,
        /// Tools the CLI must not use.
        #[arg(long, value_delimiter = ',')]
        disallowed_tools: Vec<String>,
        /// Working directory for the CLI process.
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Resume an existing session.
        #[arg(long)]
        resume: Option<String>,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let loader = cli.config.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let mut config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Generate {
            prompt,
            model,
            system_prompt,
            stream,
            json,
            raw,
            timeout_secs,
            max_concurrent,
            permission_mode,
            allowed_tools,
            disallowed_tools,
            cwd,
            resume,
        } => {
            if let Some(limit) = max_concurrent {
                config.max_concurrent_processes = Some(limit);
            }
            let provider = match ClaudeCodeProvider::new(config) {
                Ok(provider) => provider,
                Err(e) => {
                    eprintln!("{e}");
                    return ExitCode::FAILURE;
                }
            };

            let settings = Settings {
                timeout_secs,
                allowed_tools,
                disallowed_tools,
                permission_mode,
                working_dir: cwd,
                resume,
                ..Default::default()
            };
            let cancel = CancellationToken::new();
            let mut request = GenerationRequest::new(model, prompt)
                .settings(settings)
                .with_cancellation(cancel.clone());
            if let Some(system_prompt) = system_prompt {
                request = request.system_prompt(system_prompt);
            }

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupted, cancelling request");
                    cancel.cancel();
                }
            });

            let outcome = if stream {
                run_streaming(&provider, request, json, raw).await
            } else {
                run_blocking(&provider, request, json).await
            };

            match outcome {
                Ok(()) => ExitCode::SUCCESS,
                Err(ProviderError::Generation(error)) => {
                    if !stream {
                        display::print_error(&error, raw);
                    }
                    ExitCode::FAILURE
                }
                Err(e) => {
                    eprintln!("{e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

async fn run_streaming(
    provider: &ClaudeCodeProvider,
    request: GenerationRequest,
    json: bool,
    raw: bool,
) -> Result<(), ProviderError> {
    let model = if request.model.is_empty() {
        provider.config().default_model.clone()
    } else {
        request.model.clone()
    };
    let mut printer = EventPrinter::new(model, raw);
    let mut events = provider.stream(request).await?;
    tracing::debug!(request_id = %events.request_id(), "Streaming events");

    let mut failure = None;
    while let Some(event) = events.next().await {
        if json {
            display::print_json_event(&event);
        } else {
            printer.print(&event);
        }
        if let StreamEvent::Error { error } = event {
            failure = Some(error);
        }
    }
    match failure {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

async fn run_blocking(
    provider: &ClaudeCodeProvider,
    request: GenerationRequest,
    json: bool,
) -> Result<(), ProviderError> {
    let result = provider.generate(request).await?;
    if json {
        match serde_json::to_string_pretty(&result) {
            Ok(text) => println!("{text}"),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize result"),
        }
    } else {
        println!("{}", result.text);
        tracing::info!(
            finish_reason = result.finish_reason.as_str(),
            usage = %display::format_usage(&result.usage),
            "Generation finished"
        );
    }
    Ok(())
}
