use color_eyre::{eyre::eyre, Result};
use meter_mqtt_bridge::config::{default_config_path, BridgeConfig};
use meter_mqtt_bridge::meter::{AggMode, Channel, Reading};
use meter_mqtt_bridge::mqtt::{MqttHandler, Publisher, RumqttConnector};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Reads `<channel> <uuid> <value> [agg|raw] [aggmode]` lines from stdin and
/// publishes them.
#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let config = BridgeConfig::load(&path)
        .await
        .map_err(|e| eyre!("Failed to load config: {}", e))?;
    setup_logging(config.log_level());
    info!("Loaded config from {}", path.display());

    let stop = CancellationToken::new();
    let handler = MqttHandler::start(
        config.mqtt.as_ref(),
        &RumqttConnector::default(),
        stop.clone(),
    )
    .await
    .map_err(|e| eyre!("Failed to set up mqtt client: {}", e))?;
    let publisher = handler.publisher();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(&line, &publisher),
                Ok(None) => {
                    info!("End of input, shutting down");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read input: {}", e);
                    break;
                }
            }
        }
    }

    info!("mqtt status: {:?}", handler.status());

    // the reconnect loop has to be stopped before the client goes away
    stop.cancel();
    handler
        .shutdown()
        .await
        .map_err(|e| eyre!("Failed to shut down mqtt client: {}", e))?;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

#[derive(Debug, PartialEq)]
struct InputLine<'a> {
    channel: &'a str,
    uuid: &'a str,
    value: f64,
    is_aggregate: bool,
    aggmode: AggMode,
}

fn parse_line(line: &str) -> Option<InputLine<'_>> {
    let mut parts = line.split_whitespace();
    let channel = parts.next()?;
    let uuid = parts.next()?;
    let value = parts.next()?.parse().ok()?;
    let is_aggregate = match parts.next() {
        None | Some("raw") => false,
        Some("agg") => true,
        Some(_) => return None,
    };
    let aggmode = match parts.next() {
        None => AggMode::None,
        Some(mode) => mode.parse().ok()?,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(InputLine {
        channel,
        uuid,
        value,
        is_aggregate,
        aggmode,
    })
}

/// The first line of a channel fixes its uuid and aggregation mode for the
/// rest of the run.
fn handle_line(line: &str, publisher: &Publisher) {
    if line.trim().is_empty() {
        return;
    }
    let Some(input) = parse_line(line) else {
        warn!("Ignoring malformed input line: {}", line);
        return;
    };
    trace!("input {:?}", input);

    let channel = Channel::new(input.channel, input.uuid, input.aggmode);
    publisher.publish(
        Some(&channel),
        &Reading::new(input.value),
        input.is_aggregate,
    );
}
