//! CLI for ccpubsub
//!
//! Subcommands:
//! - `listen`: subscribe to topics and print every event published on them
//! - `call`: invoke one broker RPC method and print the result

use std::time::Duration;

use ccpubsub::config::{Settings, load_config};
use ccpubsub::utils::logging;
use ccpubsub::{ClientEvent, Credentials, PubSubClient};
use clap::{Args, Parser};
use config::ConfigError;
use serde_json::Value;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "ccpubsub")]
enum Command {
    /// Subscribe to topics and print their events until interrupted
    Listen {
        #[command(flatten)]
        connection: ConnectionArgs,
        /// Topic to subscribe to; repeat for several
        #[arg(long = "topic", required = true)]
        topics: Vec<String>,
    },
    /// Call a broker RPC method
    Call {
        #[command(flatten)]
        connection: ConnectionArgs,
        /// Method name, e.g. `getEffects`
        method: String,
        /// JSON arguments; plain words are passed as strings
        args: Vec<String>,
        /// Seconds to wait for the response
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Args)]
struct ConnectionArgs {
    /// Broker URL (overrides configuration)
    #[arg(long)]
    url: Option<String>,
    /// Auth token (overrides configuration)
    #[arg(long)]
    token: Option<String>,
    /// Log level when RUST_LOG is unset (overrides configuration)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let result = match cmd {
        Command::Listen { connection, topics } => run_listen(connection, topics).await,
        Command::Call {
            connection,
            method,
            args,
            timeout,
        } => run_call(connection, &method, args, timeout).await,
    };

    if let Err(e) = result {
        error!("ccpubsub failed: {}", e);
        std::process::exit(1);
    }
}

/// Load settings, apply command line overrides and start logging.
fn prepare(args: ConnectionArgs) -> Result<(PubSubClient, Credentials), Box<dyn std::error::Error>> {
    let settings = load_settings(args, load_config)?;
    let credentials = Credentials {
        token: settings.connection.token.clone(),
        key: settings.connection.key.clone(),
    };
    Ok((PubSubClient::new(settings.client_config()), credentials))
}

/// Logging is started on both paths so a configuration error gets reported.
fn load_settings(
    args: ConnectionArgs,
    load: impl FnOnce() -> Result<Settings, ConfigError>,
) -> Result<Settings, ConfigError> {
    let mut settings = match load() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init(args.log_level.as_deref().unwrap_or("info"));
            return Err(e);
        }
    };
    if let Some(url) = args.url {
        settings.connection.url = url;
    }
    if let Some(token) = args.token {
        settings.connection.token = Some(token);
    }
    if let Some(level) = args.log_level {
        settings.logging.level = level;
    }
    logging::init(&settings.logging.level);
    Ok(settings)
}

async fn run_listen(args: ConnectionArgs, topics: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let (client, credentials) = prepare(args)?;

    for topic in &topics {
        let name = topic.clone();
        client.subscribe(topic, move |payload: &Value| {
            println!("{name}: {payload}");
        });
    }

    let mut events = client.events();
    let ready = client.connect(credentials).await?;
    info!("Listening on {} topics (connection id {:?})", topics.len(), ready.connection_id);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ClientEvent::SubscriptionFailed { topic, reason }) => {
                    warn!("Subscription to {} failed: {}", topic, reason);
                }
                Ok(ClientEvent::Disconnected { will_retry: false, .. }) => break,
                Ok(_) => {}
                Err(e) => warn!("Missed events: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting gracefully.");
                break;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

async fn run_call(
    args: ConnectionArgs,
    method: &str,
    raw_args: Vec<String>,
    timeout: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (client, credentials) = prepare(args)?;
    let args = raw_args
        .iter()
        .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone())))
        .collect();

    client.connect(credentials).await?;
    let result = client
        .call(method, args, timeout.map(Duration::from_secs))
        .await;
    client.disconnect().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ConnectionArgs {
        ConnectionArgs {
            url: Some("wss://broker.test/".into()),
            token: Some("cli-token".into()),
            log_level: Some("debug".into()),
        }
    }

    #[test]
    fn test_config_error_starts_logging_first() {
        let result = load_settings(args(), || Err(ConfigError::Message("bad config".into())));

        assert!(matches!(result, Err(ConfigError::Message(m)) if m == "bad config"));
        assert!(tracing::dispatcher::has_been_set());
    }

    #[test]
    fn test_command_line_overrides_loaded_settings() {
        let settings = load_settings(args(), || Ok(Settings::default())).unwrap();

        assert_eq!(settings.connection.url, "wss://broker.test/");
        assert_eq!(settings.connection.token.as_deref(), Some("cli-token"));
        assert_eq!(settings.logging.level, "debug");
    }
}
