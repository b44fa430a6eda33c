//! Media track and codec metadata.
//!
//! A session carries at most one [`MediaTrack::Video`] and one
//! [`MediaTrack::Audio`] registration. Each registration binds a
//! [`CodecType`], from which the RTP payload type and clock rate used by
//! downstream packetization are derived.

use std::fmt;

/// Identifier of a media track within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MediaTrack {
    Video,
    Audio,
}

impl MediaTrack {
    /// SDP media type for the `m=` line.
    pub fn sdp_media(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    /// Control-URL index: video is `track0`, audio is `track1`.
    pub fn index(&self) -> usize {
        match self {
            Self::Video => 0,
            Self::Audio => 1,
        }
    }
}

impl fmt::Display for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Supported codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecType {
    H264,
    H265,
    Aac,
    Pcma,
}

impl CodecType {
    /// RTP payload type number (RFC 3551; dynamic range for H.264/H.265).
    pub fn payload_type(&self) -> u8 {
        match self {
            Self::H264 => 96,
            Self::H265 => 98,
            Self::Aac => 37,
            Self::Pcma => 8,
        }
    }

    /// RTP clock rate in Hz (90 kHz for video per RFC 3551 §4).
    pub fn clock_rate(&self) -> u32 {
        match self {
            Self::H264 | Self::H265 => 90_000,
            Self::Aac => 44_100,
            Self::Pcma => 8_000,
        }
    }

    /// Codec name for the SDP `a=rtpmap` attribute.
    pub fn rtpmap_name(&self) -> &'static str {
        match self {
            Self::H264 => "H264",
            Self::H265 => "H265",
            Self::Aac => "MPEG4-GENERIC",
            Self::Pcma => "PCMA",
        }
    }
}

/// A registered track: codec plus the derived RTP parameters.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub track: MediaTrack,
    pub codec: CodecType,
    pub payload_type: u8,
    pub clock_rate: u32,
}

impl TrackInfo {
    pub fn new(track: MediaTrack, codec: CodecType) -> Self {
        Self {
            track,
            codec,
            payload_type: codec.payload_type(),
            clock_rate: codec.clock_rate(),
        }
    }

    /// SDP media-level attribute lines for this track.
    ///
    /// Returned strings include the `a=` prefix, e.g.:
    /// - `"a=rtpmap:96 H264/90000"`
    /// - `"a=control:track0"`
    pub fn sdp_attributes(&self) -> Vec<String> {
        vec![
            format!(
                "a=rtpmap:{} {}/{}",
                self.payload_type,
                self.codec.rtpmap_name(),
                self.clock_rate
            ),
            format!("a=control:track{}", self.track.index()),
        ]
    }
}
