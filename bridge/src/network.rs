//! RTP/UDP room transport.
//!
//! [`RtpRoom`] talks to a media server (SFU) over a single UDP socket. Each
//! published track is its own RTP stream with a random SSRC; L16 packets
//! arriving on the socket are fed into the session's room audio queue.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DeliveryError;
use crate::rtp::{l16_to_le_bytes, RtpPacket, PAYLOAD_TYPE_L16};
use crate::session::RoomAudioSender;
use crate::track::{AudioTrack, Room};

/// Largest datagram we expect from the SFU.
const MAX_DATAGRAM: usize = 2048;

/// A room reached over RTP/UDP.
pub struct RtpRoom {
    // ---
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    closed: CancellationToken,
}

impl RtpRoom {
    // ---
    /// Binds an ephemeral UDP port for talking to `remote`.
    ///
    /// # Errors
    ///
    /// Returns error if socket binding fails.
    pub async fn connect(remote: SocketAddr) -> Result<Self> {
        // ---
        let bind = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };

        let socket = UdpSocket::bind(bind)
            .await
            .context("failed to bind UDP socket")?;

        info!(
            "RTP room {} -> {}",
            socket.local_addr().context("socket has no local address")?,
            remote
        );

        Ok(Self {
            socket: Arc::new(socket),
            remote,
            closed: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        // ---
        self.socket.local_addr().context("socket has no local address")
    }

    pub fn remote(&self) -> SocketAddr {
        // ---
        self.remote
    }

    /// Spawns the receive loop feeding inbound L16 audio to `sink`.
    ///
    /// The loop ends when the room disconnects. Packets that fail to parse
    /// or carry another payload type are dropped.
    pub fn spawn_receiver(&self, sink: RoomAudioSender) -> JoinHandle<()> {
        // ---
        let socket = Arc::clone(&self.socket);
        let closed = self.closed.clone();

        tokio::spawn(async move {
            // ---
            let mut buf = vec![0u8; MAX_DATAGRAM];
            let mut packets: u64 = 0;
            let mut invalid: u64 = 0;

            loop {
                let (len, src) = tokio::select! {
                    _ = closed.cancelled() => break,
                    received = socket.recv_from(&mut buf) => match received {
                        Ok(r) => r,
                        Err(e) => {
                            warn!("RTP receive failed: {}", e);
                            continue;
                        }
                    },
                };

                match RtpPacket::deserialize(&buf[..len]) {
                    Ok(packet) if packet.payload_type == PAYLOAD_TYPE_L16 => {
                        packets += 1;
                        sink.offer(&l16_to_le_bytes(&packet.payload));

                        if packets.is_multiple_of(500) {
                            debug!("Received {} room audio packets from {}", packets, src);
                        }
                    }
                    Ok(packet) => {
                        invalid += 1;
                        debug!(
                            "Ignoring payload type {} from {}",
                            packet.payload_type, src
                        );
                    }
                    Err(e) => {
                        invalid += 1;
                        warn!("Dropped invalid packet from {}: {}", src, e);
                    }
                }
            }

            debug!(
                "RTP receiver stopped ({} packets, {} ignored)",
                packets, invalid
            );
        })
    }
}

#[async_trait]
impl Room for RtpRoom {
    async fn publish_track(&self, name: &str) -> Result<Arc<dyn AudioTrack>, DeliveryError> {
        // ---
        if self.closed.is_cancelled() {
            return Err(DeliveryError::RoomClosed);
        }

        let track = RtpTrack::new(
            name,
            Arc::clone(&self.socket),
            self.remote,
            self.closed.clone(),
        );
        debug!("Track '{}' publishing as SSRC {:#010x}", name, track.ssrc);

        Ok(Arc::new(track))
    }

    fn disconnect(&self) {
        // ---
        self.closed.cancel();
    }
}

/// Sequencing state of one outbound stream.
struct StreamClock {
    // ---
    sequence: u16,
    timestamp: u32,
    first: bool,
}

/// One outbound RTP stream.
pub struct RtpTrack {
    // ---
    name: String,
    ssrc: u32,
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    clock: Mutex<StreamClock>,
    closed: AtomicBool,
    room_closed: CancellationToken,
}

impl RtpTrack {
    // ---
    fn new(
        name: &str,
        socket: Arc<UdpSocket>,
        remote: SocketAddr,
        room_closed: CancellationToken,
    ) -> Self {
        // ---
        Self {
            name: name.to_string(),
            ssrc: rand::random(),
            socket,
            remote,
            clock: Mutex::new(StreamClock {
                sequence: rand::random(),
                timestamp: rand::random(),
                first: true,
            }),
            closed: AtomicBool::new(false),
            room_closed,
        }
    }

    pub fn ssrc(&self) -> u32 {
        // ---
        self.ssrc
    }

    /// Builds the next packet and advances the stream clock.
    fn next_packet(&self, frame: &[i16]) -> RtpPacket {
        // ---
        let mut clock = self
            .clock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut packet = RtpPacket::from_samples(clock.sequence, clock.timestamp, self.ssrc, frame);
        packet.marker = clock.first;

        clock.first = false;
        clock.sequence = clock.sequence.wrapping_add(1);
        clock.timestamp = clock.timestamp.wrapping_add(frame.len() as u32);

        packet
    }
}

#[async_trait]
impl AudioTrack for RtpTrack {
    fn name(&self) -> &str {
        // ---
        &self.name
    }

    async fn write_frame(&self, frame: &[i16]) -> Result<(), DeliveryError> {
        // ---
        if self.room_closed.is_cancelled() {
            return Err(DeliveryError::RoomClosed);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(DeliveryError::TrackClosed(self.name.clone()));
        }

        let packet = self.next_packet(frame);
        self.socket
            .send_to(&packet.serialize(), self.remote)
            .await
            .map_err(|e| DeliveryError::Io(e.to_string()))?;

        Ok(())
    }

    fn close(&self) {
        // ---
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::config::BridgeConfig;
    use crate::session::RoomSession;
    use bridge_common::MetricsContext;
    use std::time::Duration;

    async fn sfu() -> UdpSocket {
        // ---
        UdpSocket::bind("127.0.0.1:0").await.expect("bind fake SFU")
    }

    async fn recv_packet(socket: &UdpSocket) -> RtpPacket {
        // ---
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("packet within timeout")
            .expect("recv");
        RtpPacket::deserialize(&buf[..len]).expect("valid RTP")
    }

    #[tokio::test]
    async fn test_track_sends_sequenced_l16() {
        // ---
        let sfu = sfu().await;
        let room = RtpRoom::connect(sfu.local_addr().unwrap()).await.expect("connect");
        let track = room.publish_track("speaker").await.expect("publish");

        track.write_frame(&[1, -1]).await.expect("first write");
        track.write_frame(&[2, 3, 4]).await.expect("second write");

        let first = recv_packet(&sfu).await;
        let second = recv_packet(&sfu).await;

        assert_eq!(first.payload_type, PAYLOAD_TYPE_L16);
        assert!(first.marker);
        assert!(!second.marker);
        assert_eq!(first.ssrc, second.ssrc);
        assert_eq!(second.sequence, first.sequence.wrapping_add(1));
        assert_eq!(second.timestamp, first.timestamp.wrapping_add(2));
        assert_eq!(first.payload, vec![0x00, 0x01, 0xFF, 0xFF]);
    }

    #[tokio::test]
    async fn test_tracks_have_distinct_streams() {
        // ---
        let sfu = sfu().await;
        let room = RtpRoom::connect(sfu.local_addr().unwrap()).await.expect("connect");

        let a = room.publish_track("speaker").await.expect("publish");
        let b = room.publish_track("tts").await.expect("publish");
        a.write_frame(&[0]).await.expect("write");
        b.write_frame(&[0]).await.expect("write");

        let first = recv_packet(&sfu).await;
        let second = recv_packet(&sfu).await;
        // Random SSRCs; a collision here is a 1 in 2^32 event
        assert_ne!(first.ssrc, second.ssrc);
    }

    #[tokio::test]
    async fn test_closed_track_and_room_reject_writes() {
        // ---
        let sfu = sfu().await;
        let room = RtpRoom::connect(sfu.local_addr().unwrap()).await.expect("connect");

        let track = room.publish_track("speaker").await.expect("publish");
        track.close();
        assert_eq!(
            track.write_frame(&[0]).await,
            Err(DeliveryError::TrackClosed("speaker".into()))
        );

        let other = room.publish_track("tts").await.expect("publish");
        room.disconnect();
        assert_eq!(other.write_frame(&[0]).await, Err(DeliveryError::RoomClosed));
        assert!(room.publish_track("app_audio").await.is_err());
    }

    #[tokio::test]
    async fn test_inbound_audio_reaches_session_queue() {
        // ---
        let sfu = sfu().await;
        let room = Arc::new(RtpRoom::connect(sfu.local_addr().unwrap()).await.expect("connect"));
        let session = RoomSession::new(
            "room-rtp",
            room.clone(),
            &BridgeConfig::default(),
            MetricsContext::new("network-test").expect("metrics"),
        );
        let mut rx = session.take_room_audio().expect("queue");
        let receiver = room.spawn_receiver(session.room_audio());

        let bridge_addr = room.local_addr().expect("local addr");
        let mut ignored = RtpPacket::from_samples(1, 0, 9, &[5]);
        ignored.payload_type = 0;
        sfu.send_to(&ignored.serialize(), bridge_addr).await.expect("send");
        sfu.send_to(b"junk", bridge_addr).await.expect("send");
        let audio = RtpPacket::from_samples(2, 160, 9, &[0x0102, -2]);
        sfu.send_to(&audio.serialize(), bridge_addr).await.expect("send");

        let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("payload within timeout")
            .expect("queue open");
        assert_eq!(&payload[..], &[0x02, 0x01, 0xFE, 0xFF]);

        session.close();
        tokio::time::timeout(Duration::from_secs(2), receiver)
            .await
            .expect("receiver stops after disconnect")
            .expect("receiver task");
    }
}
