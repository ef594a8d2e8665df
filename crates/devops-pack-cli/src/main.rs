mod logging;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

use devops_pack_client::{EventChannel, FormFields, RunScriptPanel};
use devops_pack_core::config::Config;
use devops_pack_core::protocol::EVENT_OUTPUT;
use devops_pack_gateway::{GatewayState, ProvisionRunner};

#[derive(Parser)]
#[command(
    name = "devops-pack",
    about = "Provision a DevOps tools pack from a browser form or the terminal",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Gateway {
        /// Port to listen on (default: 5555)
        #[arg(long)]
        port: Option<u16>,

        /// Serve the run-script page at /
        #[arg(long)]
        ui: bool,
    },

    /// Send one run_script to a gateway and print its output
    Run {
        /// Gateway socket URL (default: ws://127.0.0.1:<gateway port>/ws)
        #[arg(long)]
        url: Option<String>,

        #[arg(long, env = "AWS_ACCESS_KEY_ID", default_value = "", hide_env_values = true)]
        aws_access_key_id: String,

        #[arg(long, env = "AWS_SECRET_ACCESS_KEY", default_value = "", hide_env_values = true)]
        aws_secret_access_key: String,

        #[arg(long, env = "AWS_DEFAULT_REGION", default_value = "")]
        region: String,

        /// Exit after this many seconds without output
        #[arg(long, default_value_t = 30)]
        idle_timeout_secs: u64,

        /// Print the accumulated output region as HTML instead of line by line
        #[arg(long)]
        html: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::config_path);

    let config = Config::load(&config_path)?;
    logging::init(config.logging.as_ref(), cli.verbose);

    match cli.command {
        Commands::Gateway { port, ui } => {
            let port = port.unwrap_or_else(|| config.gateway_port());
            info!("Starting devops-pack gateway on port {port}");
            let runner = Arc::new(ProvisionRunner::from_config(&config));
            let state = Arc::new(GatewayState::new(Arc::new(config), runner));
            devops_pack_gateway::start_gateway(state, port, ui).await?;
        }
        Commands::Run {
            url,
            aws_access_key_id,
            aws_secret_access_key,
            region,
            idle_timeout_secs,
            html,
        } => {
            let url = url.unwrap_or_else(|| format!("ws://127.0.0.1:{}/ws", config.gateway_port()));
            let form = FormFields::credentials(aws_access_key_id, aws_secret_access_key, region);
            run_client(&url, &form, Duration::from_secs(idle_timeout_secs), html).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} config error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
        Commands::Status => {
            let port = config.gateway_port();
            println!("devops-pack v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Gateway: {}:{port}", config.gateway_bind());
            println!("Credentials dir: {}", config.credentials_dir().display());
            println!(
                "Run command: {}",
                config.runner().command.as_deref().unwrap_or("(none)")
            );
            match gateway_health(port).await {
                Some(health) => println!(
                    "Status: running ({} connections)",
                    health["connections"].as_u64().unwrap_or(0)
                ),
                None => println!("Status: not running"),
            }
        }
    }

    Ok(())
}

/// Emit one `run_script` from `form` and relay `output` lines until the
/// gateway goes quiet, closes the socket, or the user hits Ctrl+C.
async fn run_client(
    url: &str,
    form: &FormFields,
    idle_timeout: Duration,
    html: bool,
) -> anyhow::Result<()> {
    let panel = RunScriptPanel::new(EventChannel::connect(url).await?);

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    panel.channel().on_text(EVENT_OUTPUT, move |line| {
        let _ = line_tx.send(line.to_string());
    });

    panel.run_script(form);

    loop {
        tokio::select! {
            line = tokio::time::timeout(idle_timeout, line_rx.recv()) => match line {
                Ok(Some(line)) => {
                    if !html {
                        println!("{line}");
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    info!(secs = idle_timeout.as_secs(), "No output before idle timeout, exiting");
                    break;
                }
            },
            _ = panel.channel().closed() => {
                info!("Gateway closed the connection");
                while let Ok(line) = line_rx.try_recv() {
                    if !html {
                        println!("{line}");
                    }
                }
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    if html {
        println!("{}", panel.content());
    }
    panel.close().await;
    Ok(())
}

async fn gateway_health(port: u16) -> Option<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .ok()?;
    let resp = client
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .ok()?;
    resp.json().await.ok()
}
