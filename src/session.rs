//! Media session lifecycle and frame fan-out.
//!
//! A [`MediaSession`] is one logical stream: an ordered set of registered
//! tracks, the set of clients currently receiving it, and optional
//! multicast state. Sessions move `Created → Ready (tracks) → Active
//! (clients or multicast) → Destroyed`; every transition is guarded by a
//! short per-session critical section, never shared with other sessions.
//!
//! Fan-out takes a stable snapshot of the attached clients under the lock,
//! releases it, then delivers — one slow or broken client never stalls
//! concurrent attaches, detaches, or other sessions' pushes. A broken
//! client is detached and its disconnect notifications fire; the push
//! itself still succeeds.

use std::collections::{BTreeMap, HashMap};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::error::{MediaError, Result};
use crate::frame::Frame;
use crate::media::{CodecType, MediaTrack, TrackInfo};
use crate::multicast::MulticastAddressPool;
use crate::sdp::{self, SdpTrack};
use crate::transport::{FrameSink, UdpMulticastSender};

static SESSION_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Base port for multicast RTP; each track gets `base + 2 * track index`
/// (RTP even, RTCP odd per RFC 3550 §11).
pub const MULTICAST_PORT_BASE: u16 = 16000;

/// Notification observer: receives `(session_id, client_ip, client_port)`.
pub type NotifyCallback = dyn Fn(u32, &str, u16) + Send + Sync;

/// What `add_client` does when the handle is already attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Fail with [`DuplicateClient`](MediaError::DuplicateClient).
    Reject,
    /// Detach the prior attachment (firing its disconnect notifications)
    /// and attach the new one.
    Replace,
}

/// Per-session behavior knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub duplicate_client: DuplicatePolicy,
    /// When true (the default), `add_source`/`remove_source` fail with
    /// [`TracksLocked`](MediaError::TracksLocked) while multicast is
    /// active, since the per-track group allocations would go stale.
    pub lock_tracks_after_multicast: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duplicate_client: DuplicatePolicy::Reject,
            lock_tracks_after_multicast: true,
        }
    }
}

struct ClientEntry {
    addr: SocketAddr,
    sink: Arc<dyn FrameSink>,
}

struct MulticastTrack {
    group: String,
    group_ip: Ipv4Addr,
    port: u16,
}

struct MulticastState {
    tracks: BTreeMap<MediaTrack, MulticastTrack>,
    sender: UdpMulticastSender,
}

/// Track registrations and multicast state share one lock: a track must
/// not appear or vanish halfway through a multicast start.
struct SessionState {
    tracks: BTreeMap<MediaTrack, TrackInfo>,
    multicast: Option<MulticastState>,
}

/// One logical stream served to zero or more clients, optionally mirrored
/// to multicast groups.
pub struct MediaSession {
    id: u32,
    config: SessionConfig,
    addr_pool: Arc<MulticastAddressPool>,
    suffix: RwLock<String>,
    state: RwLock<SessionState>,
    clients: RwLock<HashMap<u64, ClientEntry>>,
    connected_cbs: RwLock<Vec<Arc<NotifyCallback>>>,
    disconnected_cbs: RwLock<Vec<Arc<NotifyCallback>>>,
}

impl MediaSession {
    /// Create a session with a process-unique id.
    ///
    /// The multicast address pool is shared in explicitly (typically by the
    /// [`Server`](crate::Server) that owns the session).
    pub fn new(
        suffix: &str,
        addr_pool: Arc<MulticastAddressPool>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let id = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(session_id = id, suffix, "session created");
        Arc::new(Self {
            id,
            config,
            addr_pool,
            suffix: RwLock::new(suffix.to_string()),
            state: RwLock::new(SessionState {
                tracks: BTreeMap::new(),
                multicast: None,
            }),
            clients: RwLock::new(HashMap::new()),
            connected_cbs: RwLock::new(Vec::new()),
            disconnected_cbs: RwLock::new(Vec::new()),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn get_url_suffix(&self) -> String {
        self.suffix.read().clone()
    }

    /// Raw suffix mutation. Registered sessions must be renamed through
    /// [`Server::set_session_suffix`](crate::Server::set_session_suffix) so
    /// the routing table stays consistent.
    pub(crate) fn set_url_suffix(&self, suffix: &str) {
        *self.suffix.write() = suffix.to_string();
    }

    /// Register a track with its codec. The clock rate and payload type are
    /// derived from the codec.
    pub fn add_source(&self, track: MediaTrack, codec: CodecType) -> Result<()> {
        let mut state = self.state.write();
        if state.multicast.is_some() && self.config.lock_tracks_after_multicast {
            return Err(MediaError::TracksLocked);
        }
        if state.tracks.contains_key(&track) {
            return Err(MediaError::DuplicateTrack(track));
        }
        state.tracks.insert(track, TrackInfo::new(track, codec));
        tracing::debug!(session_id = self.id, %track, ?codec, "track registered");
        Ok(())
    }

    /// Unregister a track.
    pub fn remove_source(&self, track: MediaTrack) -> Result<()> {
        let mut state = self.state.write();
        if state.multicast.is_some() && self.config.lock_tracks_after_multicast {
            return Err(MediaError::TracksLocked);
        }
        if state.tracks.remove(&track).is_none() {
            return Err(MediaError::UnknownTrack(track));
        }
        tracing::debug!(session_id = self.id, %track, "track unregistered");
        Ok(())
    }

    /// Start mirroring this session to multicast groups, one per track.
    ///
    /// Allocation is all-or-nothing: if any track's group cannot be
    /// obtained, every address allocated by this call is released before
    /// the error returns. Calling again while already multicast is a no-op
    /// success. Fails with [`NoTracks`](MediaError::NoTracks) before any
    /// track is registered, since a vacuous start would only lock the
    /// track set.
    pub fn start_multicast(&self) -> Result<()> {
        if self.state.read().multicast.is_some() {
            return Ok(());
        }

        // Socket setup stays outside the state lock.
        let sender = UdpMulticastSender::bind()?;

        let mut state = self.state.write();
        if state.multicast.is_some() {
            return Ok(());
        }
        if state.tracks.is_empty() {
            return Err(MediaError::NoTracks);
        }

        let mut allocated: BTreeMap<MediaTrack, MulticastTrack> = BTreeMap::new();
        for track in state.tracks.keys().copied() {
            let group = match self.addr_pool.get_address() {
                Ok(group) => group,
                Err(e) => {
                    for mc in allocated.values() {
                        self.addr_pool.release(&mc.group);
                    }
                    tracing::warn!(session_id = self.id, error = %e, "multicast start rolled back");
                    return Err(e);
                }
            };
            let group_ip: Ipv4Addr = match group.parse() {
                Ok(ip) => ip,
                Err(_) => {
                    self.addr_pool.release(&group);
                    for mc in allocated.values() {
                        self.addr_pool.release(&mc.group);
                    }
                    return Err(MediaError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "address pool returned a non-IPv4 address",
                    )));
                }
            };
            let port = MULTICAST_PORT_BASE + 2 * track.index() as u16;
            allocated.insert(
                track,
                MulticastTrack {
                    group,
                    group_ip,
                    port,
                },
            );
        }

        for (track, mc) in &allocated {
            tracing::info!(session_id = self.id, %track, group = %mc.group, port = mc.port, "multicast started");
        }
        state.multicast = Some(MulticastState {
            tracks: allocated,
            sender,
        });
        Ok(())
    }

    /// Stop multicast and return the group addresses to the pool.
    /// Idempotent; also runs on session teardown.
    pub fn stop_multicast(&self) {
        let taken = self.state.write().multicast.take();
        if let Some(mc) = taken {
            for entry in mc.tracks.values() {
                self.addr_pool.release(&entry.group);
            }
            tracing::info!(session_id = self.id, "multicast stopped");
        }
    }

    /// Fan a frame out to every attached client and, when active, to the
    /// track's multicast group.
    ///
    /// A delivery failure to one client is contained: the client is
    /// detached (its disconnect notifications fire) and delivery to the
    /// remaining clients and to multicast proceeds. The push only fails
    /// when the track was never registered.
    pub fn push_data(&self, track: MediaTrack, frame: &Frame) -> Result<()> {
        let mcast_target = {
            let state = self.state.read();
            if !state.tracks.contains_key(&track) {
                return Err(MediaError::UnknownTrack(track));
            }
            state.multicast.as_ref().and_then(|mc| {
                mc.tracks
                    .get(&track)
                    .map(|entry| (mc.sender.clone(), entry.group_ip, entry.port))
            })
        };

        // Stable snapshot; delivery happens with no session lock held.
        let clients: Vec<(u64, Arc<dyn FrameSink>)> = self
            .clients
            .read()
            .iter()
            .map(|(id, entry)| (*id, entry.sink.clone()))
            .collect();

        let mut broken = Vec::new();
        for (client_id, sink) in clients {
            if let Err(e) = sink.deliver(track, frame) {
                tracing::warn!(
                    session_id = self.id,
                    client = client_id,
                    error = %e,
                    "client delivery failed, detaching"
                );
                broken.push(client_id);
            }
        }

        if let Some((sender, group, port)) = mcast_target {
            if let Err(e) = sender.send(group, port, frame.data()) {
                tracing::warn!(session_id = self.id, %track, error = %e, "multicast delivery failed");
            }
        }

        for client_id in broken {
            self.remove_client(client_id);
        }
        Ok(())
    }

    /// Attach a client. Duplicate handles follow
    /// [`SessionConfig::duplicate_client`]; on success every connected
    /// observer fires with the session id and the client's endpoint.
    pub fn add_client(
        &self,
        client_id: u64,
        addr: SocketAddr,
        sink: Arc<dyn FrameSink>,
    ) -> Result<()> {
        let replaced = {
            let mut clients = self.clients.write();
            if clients.contains_key(&client_id) {
                match self.config.duplicate_client {
                    DuplicatePolicy::Reject => {
                        return Err(MediaError::DuplicateClient(client_id));
                    }
                    DuplicatePolicy::Replace => {}
                }
            }
            clients.insert(client_id, ClientEntry { addr, sink })
        };

        if let Some(old) = replaced {
            tracing::debug!(session_id = self.id, client = client_id, "prior attachment replaced");
            self.notify_disconnected(&old);
        }
        tracing::info!(session_id = self.id, client = client_id, %addr, "client attached");
        self.notify_connected(addr);
        Ok(())
    }

    /// Detach a client. No-op for unattached handles; on an actual
    /// detachment the disconnected observers fire exactly once.
    pub fn remove_client(&self, client_id: u64) {
        let removed = self.clients.write().remove(&client_id);
        if let Some(entry) = removed {
            tracing::info!(session_id = self.id, client = client_id, addr = %entry.addr, "client detached");
            self.notify_disconnected(&entry);
        }
    }

    /// Register a connected observer. Applies to subsequent attaches only.
    pub fn add_connected_notify_callback(
        &self,
        callback: impl Fn(u32, &str, u16) + Send + Sync + 'static,
    ) {
        self.connected_cbs.write().push(Arc::new(callback));
    }

    /// Register a disconnected observer. Applies to subsequent detaches only.
    pub fn add_disconnected_notify_callback(
        &self,
        callback: impl Fn(u32, &str, u16) + Send + Sync + 'static,
    ) {
        self.disconnected_cbs.write().push(Arc::new(callback));
    }

    fn notify_connected(&self, addr: SocketAddr) {
        let observers: Vec<_> = self.connected_cbs.read().iter().cloned().collect();
        let ip = addr.ip().to_string();
        for cb in observers {
            cb(self.id, &ip, addr.port());
        }
    }

    fn notify_disconnected(&self, entry: &ClientEntry) {
        let observers: Vec<_> = self.disconnected_cbs.read().iter().cloned().collect();
        let ip = entry.addr.ip().to_string();
        for cb in observers {
            cb(self.id, &ip, entry.addr.port());
        }
    }

    /// Generate the session description for the current state. Regenerated
    /// on demand; reflects only currently registered tracks and
    /// currently active multicast groups.
    pub fn get_sdp_message(&self, ip: &str, session_name: &str) -> String {
        let tracks: Vec<SdpTrack> = {
            let state = self.state.read();
            state
                .tracks
                .values()
                .map(|info| SdpTrack {
                    info: info.clone(),
                    multicast: state.multicast.as_ref().and_then(|mc| {
                        mc.tracks
                            .get(&info.track)
                            .map(|entry| (entry.group.clone(), entry.port))
                    }),
                })
                .collect()
        };
        sdp::generate_sdp(ip, session_name, self.id, &tracks)
    }

    pub fn get_num_client(&self) -> usize {
        self.clients.read().len()
    }

    pub fn has_channel(&self, track: MediaTrack) -> bool {
        self.state.read().tracks.contains_key(&track)
    }

    pub fn is_multicast(&self) -> bool {
        self.state.read().multicast.is_some()
    }

    /// Group address of the session's primary (first-registered in track
    /// order) multicast track, while multicast is active.
    pub fn get_multicast_ip(&self) -> Option<String> {
        self.state
            .read()
            .multicast
            .as_ref()
            .and_then(|mc| mc.tracks.values().next().map(|entry| entry.group.clone()))
    }

    /// Group address allocated to one track, while multicast is active.
    pub fn get_multicast_addr(&self, track: MediaTrack) -> Option<String> {
        self.state
            .read()
            .multicast
            .as_ref()
            .and_then(|mc| mc.tracks.get(&track).map(|entry| entry.group.clone()))
    }

    /// Multicast port for a registered track; 0 while multicast is inactive.
    pub fn get_multicast_port(&self, track: MediaTrack) -> Result<u16> {
        let state = self.state.read();
        if !state.tracks.contains_key(&track) {
            return Err(MediaError::UnknownTrack(track));
        }
        Ok(state
            .multicast
            .as_ref()
            .and_then(|mc| mc.tracks.get(&track).map(|entry| entry.port))
            .unwrap_or(0))
    }

    pub fn get_clock_rate(&self, track: MediaTrack) -> Result<u32> {
        self.state
            .read()
            .tracks
            .get(&track)
            .map(|info| info.clock_rate)
            .ok_or(MediaError::UnknownTrack(track))
    }

    pub fn get_payload_type(&self, track: MediaTrack) -> Result<u8> {
        self.state
            .read()
            .tracks
            .get(&track)
            .map(|info| info.payload_type)
            .ok_or(MediaError::UnknownTrack(track))
    }

    /// Force-detach every client (firing disconnect notifications) and stop
    /// multicast. Called on registry removal and server shutdown.
    pub fn shutdown(&self) {
        let drained: Vec<(u64, ClientEntry)> = self.clients.write().drain().collect();
        for (client_id, entry) in &drained {
            tracing::info!(session_id = self.id, client = *client_id, "client detached on shutdown");
            self.notify_disconnected(entry);
        }
        self.stop_multicast();
        tracing::debug!(session_id = self.id, "session shut down");
    }
}
