//! Delivery boundaries: per-client sinks, the multicast UDP sender, and
//! the TCP accept loop.
//!
//! The core never parses transport-layer bytes. Unicast clients are reached
//! through the opaque [`FrameSink`] a caller supplies at attach time;
//! multicast frames go out a single ephemeral UDP socket addressed to the
//! group allocated per track.

use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::auth::Credentials;
use crate::error::Result;
use crate::frame::Frame;
use crate::media::MediaTrack;

/// Per-client delivery boundary.
///
/// The session hands each fanned-out frame to the sink registered at
/// [`add_client`](crate::session::MediaSession::add_client) time; the sink
/// serializes it onto the wire however it likes. An `Err` marks the client
/// broken: the session detaches it and fires its disconnect notifications,
/// without failing the push for anyone else.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, track: MediaTrack, frame: &Frame) -> std::io::Result<()>;
}

/// UDP sender for the multicast leg of fan-out.
///
/// Binds a single ephemeral socket (`0.0.0.0:0`) and sends frame payloads
/// to `group:port`. Deliberately address-only; the caller resolves session
/// state to group/port pairs first.
#[derive(Clone)]
pub struct UdpMulticastSender {
    socket: Arc<UdpSocket>,
}

impl UdpMulticastSender {
    /// Bind an ephemeral UDP socket for outbound multicast.
    pub fn bind() -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// Send raw bytes to a multicast group and port.
    pub fn send(&self, group: Ipv4Addr, port: u16, payload: &[u8]) -> std::io::Result<usize> {
        self.socket.send_to(payload, (group, port))
    }
}

/// An accepted client connection, handed to the embedding protocol layer.
///
/// `credentials`, when present, is the authentication predicate the handler
/// must satisfy before calling
/// [`add_client`](crate::session::MediaSession::add_client) for this peer.
pub struct IncomingConnection {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub credentials: Option<Credentials>,
}

/// Callback invoked once per accepted connection, on its own thread.
pub type ConnectionCallback = dyn Fn(IncomingConnection) + Send + Sync;

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval so
/// that [`Server::stop`](crate::Server::stop) can terminate it promptly.
pub fn accept_loop(
    listener: TcpListener,
    credentials: Option<Credentials>,
    callback: Arc<ConnectionCallback>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                tracing::info!(%peer_addr, "client connected");
                let cb = callback.clone();
                let creds = credentials.clone();
                thread::spawn(move || {
                    cb(IncomingConnection {
                        stream,
                        peer_addr,
                        credentials: creds,
                    });
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multicast_sender_sends_to_localhost_group() {
        // Loopback receiver standing in for a group subscriber; send_to an
        // ordinary unicast address exercises the same socket path.
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = receiver.local_addr().unwrap();

        let sender = UdpMulticastSender::bind().unwrap();
        let sent = sender
            .socket
            .send_to(b"frame", target)
            .expect("send to loopback");
        assert_eq!(sent, 5);

        let mut buf = [0u8; 16];
        receiver
            .set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"frame");
    }
}
