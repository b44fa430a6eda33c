//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the description text a DESCRIBE-style request returns for the
//! current session state. Regenerated on demand from a snapshot — never
//! cached — so it reflects exactly the tracks registered and the multicast
//! state active at call time. Format:
//!
//! ```text
//! v=0                                    ← protocol version
//! o=- <session-id> 0 IN IP4 <addr>       ← origin
//! s=<session-name>                       ← session name
//! c=IN IP4 <addr>                        ← connection address
//! t=0 0                                  ← timing (live stream)
//! a=tool:mediahub                        ← server software
//! a=sendonly                             ← direction
//! m=video 0 RTP/AVP 96                   ← media description
//! c=IN IP4 239.x.y.z/255                 ← per-track group (multicast only)
//! a=rtpmap:96 H264/90000                 ← codec/clock rate
//! a=control:track0                       ← track control URL
//! ```

use crate::media::TrackInfo;

/// One track's contribution to the description: its RTP parameters plus,
/// while multicast is active, the allocated group address and port.
pub struct SdpTrack {
    pub info: TrackInfo,
    pub multicast: Option<(String, u16)>,
}

/// Generate an SDP session description from a session snapshot.
pub fn generate_sdp(ip: &str, session_name: &str, session_id: u32, tracks: &[SdpTrack]) -> String {
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!("o=- {} 0 IN IP4 {}", session_id, ip));
    sdp.push(format!("s={}", session_name));
    sdp.push(format!("c=IN IP4 {}", ip));
    sdp.push("t=0 0".to_string());
    sdp.push("a=tool:mediahub".to_string());
    sdp.push("a=sendonly".to_string());

    for track in tracks {
        let port = track.multicast.as_ref().map(|(_, p)| *p).unwrap_or(0);
        sdp.push(format!(
            "m={} {} RTP/AVP {}",
            track.info.track.sdp_media(),
            port,
            track.info.payload_type
        ));
        if let Some((group, _)) = &track.multicast {
            // TTL 255 per RFC 8866 §5.7 multicast connection form.
            sdp.push(format!("c=IN IP4 {}/255", group));
        }
        sdp.extend(track.info.sdp_attributes());
    }

    tracing::debug!(session_id, tracks = tracks.len(), "SDP generated");

    format!("{}\r\n", sdp.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{CodecType, MediaTrack};

    #[test]
    fn unicast_description_has_zero_ports() {
        let tracks = [SdpTrack {
            info: TrackInfo::new(MediaTrack::Video, CodecType::H264),
            multicast: None,
        }];
        let sdp = generate_sdp("192.168.1.100", "cam1", 7, &tracks);

        assert!(sdp.contains("v=0\r\n"));
        assert!(sdp.contains("o=- 7 0 IN IP4 192.168.1.100\r\n"));
        assert!(sdp.contains("s=cam1\r\n"));
        assert!(
            sdp.contains("c=IN IP4 192.168.1.100\r\n"),
            "c= must use the caller-provided IP"
        );
        assert!(sdp.contains("m=video 0 RTP/AVP 96\r\n"));
        assert!(sdp.contains("a=rtpmap:96 H264/90000\r\n"));
        assert!(sdp.contains("a=control:track0\r\n"));
        assert!(!sdp.contains("/255"), "no group line without multicast");
        assert!(sdp.ends_with("\r\n"));
    }

    #[test]
    fn multicast_description_carries_group_and_port() {
        let tracks = [
            SdpTrack {
                info: TrackInfo::new(MediaTrack::Video, CodecType::H264),
                multicast: Some(("239.1.2.3".to_string(), 16000)),
            },
            SdpTrack {
                info: TrackInfo::new(MediaTrack::Audio, CodecType::Pcma),
                multicast: Some(("239.1.2.4".to_string(), 16002)),
            },
        ];
        let sdp = generate_sdp("10.0.0.1", "cam1", 3, &tracks);

        assert!(sdp.contains("m=video 16000 RTP/AVP 96\r\n"));
        assert!(sdp.contains("c=IN IP4 239.1.2.3/255\r\n"));
        assert!(sdp.contains("m=audio 16002 RTP/AVP 8\r\n"));
        assert!(sdp.contains("c=IN IP4 239.1.2.4/255\r\n"));
        assert!(sdp.contains("a=rtpmap:8 PCMA/8000\r\n"));

        // Session-level attributes precede the first media section.
        let sendonly_idx = sdp.find("a=sendonly").unwrap();
        let m_idx = sdp.find("m=video").unwrap();
        assert!(sendonly_idx < m_idx, "session attrs must precede m= line");

        // Each group line follows its own m= line.
        let group_idx = sdp.find("c=IN IP4 239.1.2.3/255").unwrap();
        assert!(group_idx > m_idx);
    }
}
