//! Error types for the media-session core.

/// Errors that can occur in the media-session core.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Session**: [`DuplicateTrack`](Self::DuplicateTrack),
///   [`UnknownTrack`](Self::UnknownTrack),
///   [`DuplicateClient`](Self::DuplicateClient),
///   [`TracksLocked`](Self::TracksLocked), [`NoTracks`](Self::NoTracks).
/// - **Registry**: [`DuplicateSuffix`](Self::DuplicateSuffix),
///   [`UnknownSession`](Self::UnknownSession).
/// - **Multicast**: [`AddressExhausted`](Self::AddressExhausted).
/// - **Resource pool**: [`PoolTimeout`](Self::PoolTimeout).
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning), [`Io`](Self::Io).
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// [`MediaSession::add_source`](crate::session::MediaSession::add_source)
    /// called for a track that is already registered.
    #[error("track already registered: {0}")]
    DuplicateTrack(crate::media::MediaTrack),

    /// The referenced track was never added to the session.
    #[error("unknown track: {0}")]
    UnknownTrack(crate::media::MediaTrack),

    /// Track mutation attempted while multicast is active and the session
    /// is configured to lock its track set
    /// (see [`SessionConfig`](crate::session::SessionConfig)).
    #[error("track set is locked while multicast is active")]
    TracksLocked,

    /// [`MediaSession::start_multicast`](crate::session::MediaSession::start_multicast)
    /// called before any track was registered.
    #[error("session has no registered tracks")]
    NoTracks,

    /// A client with this handle is already attached to the session and the
    /// session's duplicate policy is
    /// [`Reject`](crate::session::DuplicatePolicy::Reject).
    #[error("client already attached: {0}")]
    DuplicateClient(u64),

    /// [`Server::add_session`](crate::Server::add_session) called with a URL
    /// suffix that already routes to a live session.
    #[error("url suffix already in use: {0}")]
    DuplicateSuffix(String),

    /// No session with the given id exists in the registry.
    #[error("unknown session: {0}")]
    UnknownSession(u32),

    /// The multicast address pool has no free address for the configured
    /// range/policy.
    #[error("multicast address space exhausted")]
    AddressExhausted,

    /// A [`ResourcePool`](crate::pool::ResourcePool) acquisition timed out
    /// (or the pool was shut down).
    #[error("resource pool acquisition timed out")]
    PoolTimeout,

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already
    /// running.
    #[error("server already running")]
    AlreadyRunning,
}

/// Convenience alias for `Result<T, MediaError>`.
pub type Result<T> = std::result::Result<T, MediaError>;
