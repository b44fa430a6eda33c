//! Server-side session registry and listener lifecycle.
//!
//! The [`Server`] owns the set of live sessions, keyed both by numeric id
//! and by URL suffix (the routing key). Both maps live behind one registry
//! lock so a reader can never observe a session present in one map and
//! missing from the other; the lock is released before any frame delivery,
//! so independent sessions never serialize each other's pushes.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::RwLock;

use crate::auth::Credentials;
use crate::error::{MediaError, Result};
use crate::frame::Frame;
use crate::media::MediaTrack;
use crate::multicast::MulticastAddressPool;
use crate::session::{MediaSession, SessionConfig};
use crate::transport::{self, ConnectionCallback};

/// Server-level configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// When set, the accept path carries these credentials to the
    /// connection handler as the precondition for attaching clients.
    pub credentials: Option<Credentials>,
    /// Behavior knobs applied to every session this server creates.
    pub session: SessionConfig,
}

struct Registry {
    by_id: HashMap<u32, Arc<MediaSession>>,
    by_suffix: HashMap<String, u32>,
}

/// Session registry plus listener lifecycle: `Stopped → Started → Stopped`.
pub struct Server {
    config: ServerConfig,
    running: Arc<AtomicBool>,
    addr_pool: Arc<MulticastAddressPool>,
    registry: RwLock<Registry>,
    on_connect: Arc<ConnectionCallback>,
    bound_addr: Option<SocketAddr>,
}

impl Server {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self::with_address_pool(config, Arc::new(MulticastAddressPool::new()))
    }

    /// Create a server sharing an externally owned multicast address pool
    /// (e.g. one pool spanning several servers in one process).
    pub fn with_address_pool(config: ServerConfig, addr_pool: Arc<MulticastAddressPool>) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            addr_pool,
            registry: RwLock::new(Registry {
                by_id: HashMap::new(),
                by_suffix: HashMap::new(),
            }),
            on_connect: Arc::new(|conn: transport::IncomingConnection| {
                tracing::debug!(peer = %conn.peer_addr, "connection accepted with no handler installed");
            }),
            bound_addr: None,
        }
    }

    /// Install the handler invoked (on its own thread) for each accepted
    /// connection. Must be called before [`start`](Self::start).
    pub fn set_connection_callback(
        &mut self,
        callback: impl Fn(crate::transport::IncomingConnection) + Send + Sync + 'static,
    ) {
        self.on_connect = Arc::new(callback);
    }

    /// Bind the listening endpoint and spawn the accept loop.
    pub fn start(&mut self, ip: &str, port: u16) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(MediaError::AlreadyRunning);
        }

        let listener = TcpListener::bind((ip, port))?;
        listener.set_nonblocking(true)?;
        self.bound_addr = Some(listener.local_addr()?);
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let credentials = self.config.credentials.clone();
        let callback = self.on_connect.clone();

        tracing::info!(%ip, port, auth = credentials.is_some(), "server listening");

        thread::spawn(move || {
            transport::accept_loop(listener, credentials, callback, running);
        });

        Ok(())
    }

    /// Close the listener and force-tear-down every live session: each
    /// attached client detaches (firing disconnect notifications) before
    /// its session is destroyed. Idempotent.
    pub fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.bound_addr = None;

        let drained: Vec<Arc<MediaSession>> = {
            let mut registry = self.registry.write();
            registry.by_suffix.clear();
            registry.by_id.drain().map(|(_, s)| s).collect()
        };
        for session in &drained {
            session.shutdown();
        }

        if was_running || !drained.is_empty() {
            tracing::info!(sessions = drained.len(), "server stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The endpoint the listener is bound to (useful with port 0 binds).
    /// Fails with [`NotStarted`](MediaError::NotStarted) while stopped.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.bound_addr.ok_or(MediaError::NotStarted)
    }

    /// Create and register a session routed at `suffix`.
    pub fn add_session(&self, suffix: &str) -> Result<Arc<MediaSession>> {
        let mut registry = self.registry.write();
        if registry.by_suffix.contains_key(suffix) {
            return Err(MediaError::DuplicateSuffix(suffix.to_string()));
        }

        let session = MediaSession::new(suffix, self.addr_pool.clone(), self.config.session.clone());
        registry.by_suffix.insert(suffix.to_string(), session.id());
        registry.by_id.insert(session.id(), session.clone());
        tracing::info!(session_id = session.id(), suffix, total = registry.by_id.len(), "session registered");
        Ok(session)
    }

    /// Destroy a session, detaching its clients first. No-op for unknown ids.
    pub fn remove_session(&self, session_id: u32) {
        let removed = {
            let mut registry = self.registry.write();
            let removed = registry.by_id.remove(&session_id);
            if let Some(session) = &removed {
                registry.by_suffix.remove(&session.get_url_suffix());
            }
            removed
        };
        if let Some(session) = removed {
            // Teardown happens outside the registry lock; it fires callbacks.
            session.shutdown();
            tracing::info!(session_id, "session removed");
        }
    }

    /// Re-route a session to a new suffix, preserving the one-suffix-one-
    /// session invariant.
    pub fn set_session_suffix(&self, session_id: u32, suffix: &str) -> Result<()> {
        let mut registry = self.registry.write();
        let session = registry
            .by_id
            .get(&session_id)
            .cloned()
            .ok_or(MediaError::UnknownSession(session_id))?;

        if let Some(&owner) = registry.by_suffix.get(suffix) {
            if owner == session_id {
                return Ok(());
            }
            return Err(MediaError::DuplicateSuffix(suffix.to_string()));
        }

        registry.by_suffix.remove(&session.get_url_suffix());
        registry.by_suffix.insert(suffix.to_string(), session_id);
        session.set_url_suffix(suffix);
        tracing::debug!(session_id, suffix, "session re-routed");
        Ok(())
    }

    /// Route a frame to the named session's fan-out.
    pub fn push_frame(&self, session_id: u32, track: MediaTrack, frame: &Frame) -> Result<()> {
        let session = self
            .get_session(session_id)
            .ok_or(MediaError::UnknownSession(session_id))?;
        session.push_data(track, frame)
    }

    pub fn get_session(&self, session_id: u32) -> Option<Arc<MediaSession>> {
        self.registry.read().by_id.get(&session_id).cloned()
    }

    pub fn get_session_by_suffix(&self, suffix: &str) -> Option<Arc<MediaSession>> {
        let registry = self.registry.read();
        registry
            .by_suffix
            .get(suffix)
            .and_then(|id| registry.by_id.get(id))
            .cloned()
    }

    pub fn session_count(&self) -> usize {
        self.registry.read().by_id.len()
    }

    /// The multicast address pool shared with this server's sessions.
    pub fn address_pool(&self) -> Arc<MulticastAddressPool> {
        self.addr_pool.clone()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::CodecType;
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn local_addr_requires_started() {
        let mut server = Server::new();
        assert!(matches!(server.local_addr(), Err(MediaError::NotStarted)));

        server.start("127.0.0.1", 0).unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        server.stop();
        assert!(matches!(server.local_addr(), Err(MediaError::NotStarted)));
    }

    #[test]
    fn duplicate_suffix_is_rejected() {
        let server = Server::new();
        server.add_session("live").unwrap();
        assert!(matches!(
            server.add_session("live"),
            Err(MediaError::DuplicateSuffix(_))
        ));
        assert_eq!(server.session_count(), 1);
    }

    #[test]
    fn concurrent_creation_yields_distinct_ids_and_routes() {
        let server = Arc::new(Server::new());
        let handles: Vec<_> = (0..16)
            .map(|n| {
                let server = server.clone();
                thread::spawn(move || server.add_session(&format!("cam{}", n)).unwrap().id())
            })
            .collect();

        let ids: HashSet<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 16, "session ids must not collide");
        assert_eq!(server.session_count(), 16);
    }

    #[test]
    fn remove_session_is_idempotent_and_unroutes() {
        let server = Server::new();
        let session = server.add_session("live").unwrap();
        let id = session.id();

        server.remove_session(id);
        assert!(server.get_session(id).is_none());
        assert!(server.get_session_by_suffix("live").is_none());

        // Unknown id: no-op.
        server.remove_session(id);

        // Suffix becomes reusable.
        server.add_session("live").unwrap();
    }

    #[test]
    fn push_frame_routes_by_session_id() {
        let server = Server::new();
        let session = server.add_session("live").unwrap();
        session
            .add_source(MediaTrack::Video, CodecType::H264)
            .unwrap();

        let frame = Frame::copy_from(&[1, 2, 3], 0, 0, crate::FrameKind::Key);
        server
            .push_frame(session.id(), MediaTrack::Video, &frame)
            .unwrap();

        assert!(matches!(
            server.push_frame(9999, MediaTrack::Video, &frame),
            Err(MediaError::UnknownSession(9999))
        ));
    }

    #[test]
    fn rename_preserves_single_route_per_suffix() {
        let server = Server::new();
        let a = server.add_session("a").unwrap();
        let _b = server.add_session("b").unwrap();

        assert!(matches!(
            server.set_session_suffix(a.id(), "b"),
            Err(MediaError::DuplicateSuffix(_))
        ));

        server.set_session_suffix(a.id(), "c").unwrap();
        assert_eq!(a.get_url_suffix(), "c");
        assert!(server.get_session_by_suffix("a").is_none());
        assert!(server.get_session_by_suffix("c").is_some());

        // Renaming to its own suffix is fine.
        server.set_session_suffix(a.id(), "c").unwrap();

        assert!(matches!(
            server.set_session_suffix(424242, "d"),
            Err(MediaError::UnknownSession(424242))
        ));
    }

    #[test]
    fn stop_tears_down_sessions_and_notifies() {
        struct NullSink;
        impl crate::transport::FrameSink for NullSink {
            fn deliver(&self, _: MediaTrack, _: &Frame) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut server = Server::new();
        let session = server.add_session("live").unwrap();

        let disconnects = Arc::new(AtomicUsize::new(0));
        let seen = disconnects.clone();
        session.add_disconnected_notify_callback(move |_, _, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        session
            .add_client(1, SocketAddr::from(([127, 0, 0, 1], 4000)), Arc::new(NullSink))
            .unwrap();

        server.stop();
        assert_eq!(server.session_count(), 0);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);

        // Idempotent.
        server.stop();
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }
}
