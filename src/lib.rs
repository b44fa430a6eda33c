pub mod auth;
pub mod error;
pub mod frame;
pub mod media;
pub mod multicast;
pub mod pool;
pub mod sdp;
pub mod server;
pub mod session;
pub mod transport;

pub use auth::Credentials;
pub use error::{MediaError, Result};
pub use frame::{Frame, FrameHolder, FrameKind};
pub use media::{CodecType, MediaTrack};
pub use multicast::MulticastAddressPool;
pub use pool::{PoolSlot, ResourcePool};
pub use server::{Server, ServerConfig};
pub use session::{DuplicatePolicy, MediaSession, SessionConfig};
pub use transport::FrameSink;
