//! # SEI chatbot CLI (`sei`)
//!
//! Answers questions about SEI case files ("processos") through a
//! supervisor/worker agent pipeline, with the case archive downloaded in the
//! background.
//!
//! ## Usage
//!
//! ```bash
//! sei --config ./config/sei.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sei chat` | Interactive chat on the terminal |
//! | `sei ask "<question>"` | Answer one question and exit |
//! | `sei fetch [--force]` | Download and extract the case archive |
//! | `sei status` | Show what is on disk under the archive root |
//! | `sei tools list` | List the case-file tools |
//! | `sei tools call <name> --param k=v` | Call a tool directly |
//! | `sei serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Chat (the archive downloads while you type)
//! sei chat
//!
//! # One question, no TTY needed
//! sei ask "Quantos documentos tem o processo 123/2024?"
//!
//! # Call a tool without any model
//! sei tools call get_document_list_from_process --param id=123/2024 --param limit=5
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sei_chat::progress::BannerMode;
use sei_chat::status::StatusCell;
use sei_chat::traits::{ToolContext, ToolRegistry};
use sei_chat::{archive_cmd, chat, config, server};

/// SEI chatbot: ask about case files of the SEI archive.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means defaults.
#[derive(Parser)]
#[command(
    name = "sei",
    about = "SEI case-file chatbot: agents that look up processes and their documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sei.toml")]
    config: PathBuf,

    /// Download banner style for `chat`. Defaults to human on a TTY.
    #[arg(long, global = true, value_enum)]
    banner: Option<BannerArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum BannerArg {
    Off,
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat.
    ///
    /// Starts the archive download in the background when needed; you can
    /// chat while it runs. Type `/sair` to leave.
    Chat,

    /// Answer one question and exit.
    ///
    /// Waits for the archive download before asking the agents.
    Ask {
        /// The question.
        question: String,
    },

    /// Download and extract the case archive.
    Fetch {
        /// Download even if the archive is already present.
        #[arg(long)]
        force: bool,
    },

    /// Show the archive root, process and document counts.
    Status,

    /// Inspect and call the case-file tools.
    Tools {
        #[command(subcommand)]
        action: ToolAction,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum ToolAction {
    /// List tools with their parameter schemas.
    List,
    /// Call a tool with `key=value` parameters and print the JSON result.
    Call {
        /// Tool name (e.g. `search_process`).
        name: String,
        /// Tool parameters as `key=value` pairs.
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },
}

/// Parse a `key=value` pair for `--param` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Type `--param` values by the tool schema: integer and boolean
/// properties are parsed, everything else stays a string.
fn typed_params(
    schema: &serde_json::Value,
    params: Vec<(String, String)>,
) -> serde_json::Map<String, serde_json::Value> {
    params
        .into_iter()
        .map(|(key, raw)| {
            let kind = schema["properties"][key.as_str()]["type"].as_str();
            let value = match kind {
                Some("integer") => raw.parse::<i64>().map(serde_json::Value::from).ok(),
                Some("boolean") => raw.parse::<bool>().map(serde_json::Value::from).ok(),
                _ => None,
            }
            .unwrap_or_else(|| serde_json::Value::String(raw));
            (key, value)
        })
        .collect()
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;

    match cli.command {
        Commands::Chat => {
            let mode = match cli.banner {
                Some(BannerArg::Off) => BannerMode::Off,
                Some(BannerArg::Human) => BannerMode::Human,
                Some(BannerArg::Json) => BannerMode::Json,
                None => BannerMode::default_for_tty(),
            };
            chat::run_chat(&cfg, mode).await?;
        }
        Commands::Ask { question } => {
            chat::run_ask(&cfg, &question).await?;
        }
        Commands::Fetch { force } => {
            archive_cmd::run_fetch(&cfg, force).await?;
        }
        Commands::Status => {
            archive_cmd::run_status(&cfg)?;
        }
        Commands::Tools { action } => {
            let registry = ToolRegistry::with_builtins();
            match action {
                ToolAction::List => {
                    for t in registry.tools() {
                        println!("{}", t.name());
                        println!("  {}", t.description());
                        println!("  params: {}", t.parameters_schema());
                    }
                }
                ToolAction::Call { name, params } => {
                    let status = StatusCell::new();
                    status.complete(None);
                    let ctx = ToolContext::from_config(&cfg, status);
                    let schema = registry
                        .find(&name)
                        .map(|t| t.parameters_schema())
                        .unwrap_or_default();
                    let params = typed_params(&schema, params);
                    let result = registry
                        .call(&name, serde_json::Value::Object(params), &ctx)
                        .await?;
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
