//! MQTT transport over the rumqttc blocking client

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use rumqttc::{Client, ConnectReturnCode, Connection, Event, MqttOptions, Outgoing, Packet, QoS};
use tracing::{debug, trace, warn};

use crate::{InboundMessage, MessageBus, TransportError};

/// Broker address and session options
#[derive(Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Upper bound on waiting for CONNACK or for a publish to hit the wire
    pub io_timeout: Duration,
    /// How long a poll waits for network progress
    pub poll_wait: Duration,
    /// Capacity of the client's request queue
    pub request_capacity: usize,
}

impl MqttSettings {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            io_timeout: Duration::from_secs(5),
            poll_wait: Duration::from_millis(10),
            request_capacity: 64,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        options
    }
}

impl fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

struct Session {
    client: Client,
    connection: Connection,
}

/// [`MessageBus`] backed by a real broker
///
/// All traffic uses QoS 0. Publishes block until the packet has been handed
/// to the socket so that transport failures surface on the publishing call.
pub struct RumqttBus {
    settings: MqttSettings,
    session: Option<Session>,
    /// Inbound publishes seen while waiting on something else
    inbound: VecDeque<InboundMessage>,
}

impl RumqttBus {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            session: None,
            inbound: VecDeque::new(),
        }
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    fn session(&mut self) -> Result<&mut Session, TransportError> {
        self.session.as_mut().ok_or(TransportError::NotConnected)
    }

    /// Drive the event loop until `done` matches an event
    fn drive_until(
        &mut self,
        done: impl Fn(&Event) -> bool,
        on_error: impl Fn(String) -> TransportError,
    ) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.settings.io_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(on_error("timed out".to_string()));
            }

            let session = self.session()?;
            match session.connection.recv_timeout(remaining) {
                Ok(Ok(event)) => {
                    if done(&event) {
                        return Ok(());
                    }
                    self.buffer(event);
                }
                Ok(Err(err)) => {
                    self.session = None;
                    return Err(on_error(err.to_string()));
                }
                Err(_) => return Err(on_error("timed out".to_string())),
            }
        }
    }

    fn buffer(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::Publish(publish)) => {
                self.inbound
                    .push_back(InboundMessage::new(publish.topic, publish.payload.to_vec()));
            }
            other => trace!(event = ?other, "MQTT event"),
        }
    }
}

impl MessageBus for RumqttBus {
    fn connect(&mut self) -> Result<(), TransportError> {
        if let Some(old) = self.session.take() {
            // best effort, the old socket may already be gone
            let _ = old.client.disconnect();
        }
        self.inbound.clear();

        debug!(host = %self.settings.host, port = self.settings.port, "Opening MQTT session");
        let (client, connection) = Client::new(self.settings.options(), self.settings.request_capacity);
        self.session = Some(Session { client, connection });

        let deadline = Instant::now() + self.settings.io_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.session = None;
                return Err(TransportError::Connect("timed out waiting for CONNACK".to_string()));
            }

            let session = self.session()?;
            match session.connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    if ack.code == ConnectReturnCode::Success {
                        return Ok(());
                    }
                    self.session = None;
                    return Err(TransportError::Connect(format!("refused: {:?}", ack.code)));
                }
                Ok(Ok(event)) => trace!(event = ?event, "MQTT event before CONNACK"),
                Ok(Err(err)) => {
                    self.session = None;
                    return Err(TransportError::Connect(err.to_string()));
                }
                Err(_) => {
                    self.session = None;
                    return Err(TransportError::Connect("timed out waiting for CONNACK".to_string()));
                }
            }
        }
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let subscribe_error = |reason: String| TransportError::Subscribe {
            topic: topic.to_string(),
            reason,
        };

        let session = self.session()?;
        session
            .client
            .subscribe(topic, QoS::AtMostOnce)
            .map_err(|err| subscribe_error(err.to_string()))?;

        // flush before queueing more, the request queue is bounded
        self.drive_until(
            |event| matches!(event, Event::Outgoing(Outgoing::Subscribe(_))),
            subscribe_error,
        )
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        let publish_error = |reason: String| TransportError::Publish {
            topic: topic.to_string(),
            reason,
        };

        let session = self.session()?;
        session
            .client
            .publish(topic, QoS::AtMostOnce, retain, payload.to_vec())
            .map_err(|err| publish_error(err.to_string()))?;

        self.drive_until(
            |event| matches!(event, Event::Outgoing(Outgoing::Publish(_))),
            publish_error,
        )
    }

    fn poll(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        if let Some(message) = self.inbound.pop_front() {
            return Ok(Some(message));
        }

        let wait = self.settings.poll_wait;
        let session = self.session()?;
        match session.connection.recv_timeout(wait) {
            Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => Ok(Some(InboundMessage::new(
                publish.topic,
                publish.payload.to_vec(),
            ))),
            Ok(Ok(event)) => {
                trace!(event = ?event, "MQTT event");
                Ok(None)
            }
            Ok(Err(err)) => {
                warn!(%err, "MQTT connection error");
                self.session = None;
                Err(TransportError::Receive(err.to_string()))
            }
            // nothing arrived within the wait
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc;
    use std::thread;

    /// Read one MQTT packet, returning its type nibble
    fn read_packet(stream: &mut TcpStream) -> std::io::Result<u8> {
        let mut header = [0u8; 1];
        stream.read_exact(&mut header)?;

        let mut remaining = 0usize;
        let mut shift = 0;
        loop {
            let mut byte = [0u8; 1];
            stream.read_exact(&mut byte)?;
            remaining |= usize::from(byte[0] & 0x7f) << shift;
            if byte[0] & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0u8; remaining];
        stream.read_exact(&mut body)?;
        Ok(header[0] >> 4)
    }

    /// Accept one client, acknowledge its CONNECT and count SUBSCRIBEs
    fn fake_broker(expected: usize) -> (u16, mpsc::Receiver<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            assert_eq!(read_packet(&mut stream).unwrap(), 1);
            stream.write_all(&[0x20, 0x02, 0x00, 0x00]).unwrap();

            let mut subscribes = 0;
            while subscribes < expected {
                match read_packet(&mut stream) {
                    Ok(8) => subscribes += 1,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            let _ = tx.send(subscribes);
        });
        (port, rx)
    }

    #[test]
    fn test_settings_debug_redacts_password() {
        let settings = MqttSettings::new("broker.lan", 1883, "disco-abc").with_credentials("user", "hunter2");
        let debug = format!("{settings:?}");
        assert!(debug.contains("broker.lan"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_operations_require_session() {
        let mut bus = RumqttBus::new(MqttSettings::new("localhost", 1883, "disco-test"));
        assert_eq!(bus.subscribe("a"), Err(TransportError::NotConnected));
        assert_eq!(bus.publish("a", b"x", false), Err(TransportError::NotConnected));
        assert_eq!(bus.poll(), Err(TransportError::NotConnected));
    }

    #[test]
    fn test_subscribes_beyond_request_capacity() {
        let (port, subscribed) = fake_broker(5);
        let mut settings = MqttSettings::new("127.0.0.1", port, "disco-test");
        settings.request_capacity = 1;

        let mut bus = RumqttBus::new(settings);
        bus.connect().unwrap();
        for n in 0..5 {
            bus.subscribe(&format!("homeassistant/switch/abc/s{n}/set")).unwrap();
        }
        assert_eq!(subscribed.recv_timeout(Duration::from_secs(5)), Ok(5));
    }
}
