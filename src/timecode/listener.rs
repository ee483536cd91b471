//! Timecode broadcast listener
//!
//! Receives OSC packets on a UDP (multicast) socket and feeds the timecode
//! carried at the configured address into the clock. Runs as its own task so
//! ingestion never waits on capture or disk.

use super::clock::TimecodeClock;
use crate::config::TimecodeConfig;
use rosc::{OscPacket, OscType};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const MAX_DATAGRAM_SIZE: usize = 1536;

/// Listener socket settings
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub port: u16,
    pub multicast_group: Ipv4Addr,
    pub interface: Ipv4Addr,
    pub osc_address: String,
}

impl From<&TimecodeConfig> for ListenerConfig {
    fn from(config: &TimecodeConfig) -> Self {
        Self {
            port: config.port,
            multicast_group: config.multicast_group,
            interface: config.interface,
            osc_address: config.osc_address.clone(),
        }
    }
}

/// Running listener task
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop receiving and wait for the task to exit
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

/// Bind the broadcast socket and start feeding `clock`
pub async fn spawn_listener(
    clock: Arc<TimecodeClock>,
    config: ListenerConfig,
) -> std::io::Result<ListenerHandle> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port)).await?;
    if config.multicast_group.is_multicast() {
        socket.join_multicast_v4(config.multicast_group, config.interface)?;
    }
    let local_addr = socket.local_addr()?;

    tracing::info!(
        "Listening for OSC timecode on {} (multicast {}, address {})",
        local_addr,
        config.multicast_group,
        config.osc_address
    );

    let (shutdown, mut shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => handle_datagram(&clock, &buf[..len], &config.osc_address, peer),
                    Err(e) => {
                        tracing::warn!("Timecode socket receive failed: {}", e);
                    }
                },
            }
        }
        tracing::info!("Timecode listener stopped");
    });

    Ok(ListenerHandle {
        local_addr,
        shutdown: Some(shutdown),
        task,
    })
}

fn handle_datagram(clock: &TimecodeClock, datagram: &[u8], address: &str, peer: SocketAddr) {
    match decode_timecode_payloads(datagram, address) {
        Ok(payloads) => {
            for payload in payloads {
                // errors are counted and logged by the clock
                let _ = clock.on_message(&payload);
            }
        }
        Err(e) => tracing::debug!("Ignoring undecodable datagram from {}: {}", peer, e),
    }
}

/// Extract the timecode strings carried at `address` in one datagram
pub fn decode_timecode_payloads(datagram: &[u8], address: &str) -> Result<Vec<String>, rosc::OscError> {
    let (_, packet) = rosc::decoder::decode_udp(datagram)?;
    let mut payloads = Vec::new();
    collect_payloads(&packet, address, &mut payloads);
    Ok(payloads)
}

fn collect_payloads(packet: &OscPacket, address: &str, out: &mut Vec<String>) {
    match packet {
        OscPacket::Message(msg) if msg.addr == address => out.push(render_args(&msg.args)),
        OscPacket::Message(msg) => {
            tracing::trace!("Ignoring OSC message at {}", msg.addr);
        }
        OscPacket::Bundle(bundle) => {
            for inner in &bundle.content {
                collect_payloads(inner, address, out);
            }
        }
    }
}

/// Render message arguments as a timecode string.
///
/// A single string argument is passed through. Five integer arguments are
/// formatted as `hh:mm:ss:ff:sf`. Anything else is rendered as-is and left
/// for the clock to reject.
fn render_args(args: &[OscType]) -> String {
    if let [OscType::String(s)] = args {
        return s.clone();
    }

    let ints: Vec<i64> = args
        .iter()
        .filter_map(|arg| match arg {
            OscType::Int(v) => Some(*v as i64),
            OscType::Long(v) => Some(*v),
            _ => None,
        })
        .collect();

    match ints.as_slice() {
        [h, m, s, f, sf] if ints.len() == args.len() && ints.iter().all(|v| *v >= 0) => {
            format!("{:02}:{:02}:{:02}:{:02}:{}", h, m, s, f, sf)
        }
        _ => format!("{:?}", args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timecode::{ClockConfig, Timecode};
    use rosc::{OscBundle, OscMessage, OscTime};
    use std::time::Duration;

    const ADDR: &str = "/asil/clock";

    fn encode(packet: OscPacket) -> Vec<u8> {
        rosc::encoder::encode(&packet).unwrap()
    }

    fn message(addr: &str, args: Vec<OscType>) -> OscPacket {
        OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        })
    }

    #[test]
    fn test_string_argument() {
        let bytes = encode(message(ADDR, vec![OscType::String("01:02:03:04:1".into())]));
        assert_eq!(decode_timecode_payloads(&bytes, ADDR).unwrap(), vec!["01:02:03:04:1"]);
    }

    #[test]
    fn test_five_integer_arguments() {
        let args = [1, 2, 3, 4, 1].into_iter().map(OscType::Int).collect();
        let bytes = encode(message(ADDR, args));
        assert_eq!(decode_timecode_payloads(&bytes, ADDR).unwrap(), vec!["01:02:03:04:1"]);
    }

    #[test]
    fn test_other_address_ignored() {
        let bytes = encode(message("/other", vec![OscType::String("01:02:03:04:1".into())]));
        assert!(decode_timecode_payloads(&bytes, ADDR).unwrap().is_empty());
    }

    #[test]
    fn test_bundle_is_walked() {
        let bundle = OscPacket::Bundle(OscBundle {
            timetag: OscTime::from((0, 1)),
            content: vec![
                message("/other", vec![OscType::Int(1)]),
                message(ADDR, vec![OscType::String("00:00:10:00:0".into())]),
            ],
        });
        let payloads = decode_timecode_payloads(&encode(bundle), ADDR).unwrap();
        assert_eq!(payloads, vec!["00:00:10:00:0"]);
    }

    #[test]
    fn test_unexpected_arguments_render_malformed() {
        let bytes = encode(message(ADDR, vec![OscType::Float(1.5)]));
        let payloads = decode_timecode_payloads(&bytes, ADDR).unwrap();
        assert!(payloads[0].parse::<Timecode>().is_err());
    }

    #[test]
    fn test_garbage_datagram_is_error() {
        assert!(decode_timecode_payloads(b"\x01\x02", ADDR).is_err());
    }

    #[tokio::test]
    async fn test_listener_feeds_clock() {
        let clock = Arc::new(TimecodeClock::new(ClockConfig::default()));
        let handle = spawn_listener(
            clock.clone(),
            ListenerConfig {
                port: 0,
                multicast_group: Ipv4Addr::LOCALHOST,
                interface: Ipv4Addr::UNSPECIFIED,
                osc_address: ADDR.to_string(),
            },
        )
        .await
        .unwrap();

        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let target = SocketAddr::from((Ipv4Addr::LOCALHOST, handle.local_addr().port()));
        let bytes = encode(message(ADDR, vec![OscType::String("02:00:00:00:0".into())]));
        sender.send_to(&bytes, target).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !clock.current_value().is_synchronized() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(clock.current_value().timecode, Timecode::new(2, 0, 0, 0, 0));
        handle.stop().await;
    }
}
