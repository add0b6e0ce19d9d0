use meter_mqtt_bridge::meter::{AggMode, Channel, Reading};
use meter_mqtt_bridge::mqtt::{
    ClientConfig, ConnectionState, MqttError, MqttHandler, ReconnectSettings, RumqttConnector,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const DISCONNECT: u8 = 14;
const WAIT: Duration = Duration::from_secs(5);

/// How the fake broker treats one client connection
#[derive(Clone, Copy, Debug)]
enum Session {
    /// CONNACK accepted, then read until the client hangs up
    Serve,
    /// CONNACK with the given refusal code
    Refuse(u8),
    /// CONNACK accepted, then the socket is closed right away
    Hangup,
}

#[derive(Debug)]
struct Seen {
    connection: usize,
    kind: u8,
    body: Vec<u8>,
}

/// Reads one MQTT control packet, `None` on a clean end of stream.
async fn read_packet(stream: &mut TcpStream) -> std::io::Result<Option<(u8, Vec<u8>)>> {
    let mut header = [0u8; 1];
    if stream.read(&mut header).await? == 0 {
        return Ok(None);
    }
    let mut length = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        length |= usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; length];
    stream.read_exact(&mut body).await?;
    Ok(Some((header[0] >> 4, body)))
}

async fn serve_connection(
    mut stream: TcpStream,
    connection: usize,
    session: Session,
    seen: mpsc::UnboundedSender<Seen>,
) {
    let Ok(Some((kind, body))) = read_packet(&mut stream).await else {
        return;
    };
    let _ = seen.send(Seen {
        connection,
        kind,
        body,
    });

    let code = match session {
        Session::Refuse(code) => code,
        Session::Serve | Session::Hangup => 0,
    };
    if stream.write_all(&[0x20, 0x02, 0x00, code]).await.is_err() {
        return;
    }
    if let Session::Hangup = session {
        return;
    }

    while let Ok(Some((kind, body))) = read_packet(&mut stream).await {
        let _ = seen.send(Seen {
            connection,
            kind,
            body,
        });
    }
}

/// Local broker stand-in; `sessions` picks the behaviour per connection index.
async fn fake_broker(sessions: fn(usize) -> Session) -> (u16, mpsc::UnboundedReceiver<Seen>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut connection = 0;
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_connection(
                stream,
                connection,
                sessions(connection),
                tx.clone(),
            ));
            connection += 1;
        }
    });

    (port, rx)
}

/// Waits for the next packet of `kind`, skipping everything else.
async fn next_packet(seen: &mut mpsc::UnboundedReceiver<Seen>, kind: u8) -> Seen {
    tokio::time::timeout(WAIT, async {
        loop {
            let packet = seen.recv().await.expect("broker gone");
            if packet.kind == kind {
                return packet;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no packet of type {} within {:?}", kind, WAIT))
}

/// Topic and payload of a QoS 0 PUBLISH body
fn split_publish(body: &[u8]) -> (String, String) {
    let len = usize::from(u16::from_be_bytes([body[0], body[1]]));
    let topic = String::from_utf8(body[2..2 + len].to_vec()).unwrap();
    let payload = String::from_utf8(body[2 + len..].to_vec()).unwrap();
    (topic, payload)
}

fn local_broker(port: u16) -> ClientConfig {
    ClientConfig {
        enabled: true,
        host: "127.0.0.1".to_string(),
        port,
        ..ClientConfig::default()
    }
}

fn connector() -> RumqttConnector {
    RumqttConnector {
        connect_timeout: Duration::from_secs(2),
        ..RumqttConnector::default()
    }
}

async fn start(config: ClientConfig, stop: &CancellationToken) -> MqttHandler {
    MqttHandler::start_with_config(
        config,
        &connector(),
        stop.clone(),
        ReconnectSettings::default(),
    )
    .await
}

fn unreachable_broker() -> ClientConfig {
    ClientConfig {
        enabled: true,
        host: "127.0.0.1".to_string(),
        // nothing listens on the tcpmux port
        port: 1,
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn unreachable_broker_disables_publishing() {
    let handler = start(unreachable_broker(), &CancellationToken::new()).await;

    assert!(!handler.is_enabled());
    assert_ne!(handler.state(), ConnectionState::Connected);

    let channel = Channel::new("power1", "uuid-1", AggMode::None);
    handler
        .publisher()
        .publish(Some(&channel), &Reading::new(42.5), false);
    assert_eq!(handler.status().messages_sent, 0);
    assert_eq!(handler.publisher().channel_count(), 0);

    handler.shutdown().await.unwrap();
}

#[tokio::test]
async fn disabled_config_never_connects() {
    let options: toml::Table = "enabled = false\nhost = \"127.0.0.1\"".parse().unwrap();
    let handler = MqttHandler::start(
        Some(&options),
        &RumqttConnector::default(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(!handler.is_enabled());
    assert_eq!(handler.state(), ConnectionState::Disconnected);
    assert!(handler.client_id().starts_with("vzlogger_"));
    handler.shutdown().await.unwrap();
}

#[tokio::test]
async fn missing_options_are_fatal() {
    let result =
        MqttHandler::start(None, &RumqttConnector::default(), CancellationToken::new()).await;
    assert!(matches!(result, Err(MqttError::ConfigurationError(_))));
}

#[tokio::test]
async fn accepted_connection_publishes_and_flushes_disconnect() {
    let (port, mut seen) = fake_broker(|_| Session::Serve).await;
    let stop = CancellationToken::new();
    let handler = start(local_broker(port), &stop).await;

    assert!(handler.is_enabled());
    assert_eq!(handler.state(), ConnectionState::Connected);
    let connect = next_packet(&mut seen, CONNECT).await;
    assert_eq!(connect.connection, 0);

    let channel = Channel::new("power1", "uuid-1", AggMode::None);
    handler
        .publisher()
        .publish(Some(&channel), &Reading::new(42.5), false);

    let announce = next_packet(&mut seen, PUBLISH).await;
    assert_eq!(
        split_publish(&announce.body),
        ("vzlogger/power1/uuid".to_string(), "uuid-1".to_string())
    );
    let reading = next_packet(&mut seen, PUBLISH).await;
    assert_eq!(
        split_publish(&reading.body),
        ("vzlogger/power1/raw".to_string(), "42.5".to_string())
    );

    stop.cancel();
    handler.shutdown().await.unwrap();

    let disconnect = next_packet(&mut seen, DISCONNECT).await;
    assert_eq!(disconnect.connection, 0);
    assert!(disconnect.body.is_empty());
}

#[tokio::test]
async fn refused_connection_stays_enabled_and_retries() {
    // not authorized
    let (port, mut seen) = fake_broker(|_| Session::Refuse(5)).await;
    let stop = CancellationToken::new();
    let handler = start(local_broker(port), &stop).await;

    assert!(handler.is_enabled());
    assert_eq!(handler.state(), ConnectionState::Failed);
    assert!(handler.publisher().is_enabled());

    assert_eq!(next_packet(&mut seen, CONNECT).await.connection, 0);
    assert!(next_packet(&mut seen, CONNECT).await.connection >= 1);

    stop.cancel();
    handler.shutdown().await.unwrap();
}

#[tokio::test]
async fn lost_connection_is_reported_and_reestablished() {
    let (port, mut seen) = fake_broker(|connection| {
        if connection == 0 {
            Session::Hangup
        } else {
            Session::Serve
        }
    })
    .await;
    let stop = CancellationToken::new();
    let handler = start(local_broker(port), &stop).await;
    assert_eq!(handler.state(), ConnectionState::Connected);

    let mut state = handler.subscribe_state();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s != ConnectionState::Connected))
        .await
        .expect("connection loss not noticed")
        .unwrap();

    assert_eq!(next_packet(&mut seen, CONNECT).await.connection, 0);
    assert_eq!(next_packet(&mut seen, CONNECT).await.connection, 1);
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .expect("no reconnect")
        .unwrap();

    stop.cancel();
    handler.shutdown().await.unwrap();
}
