//! Codec preference rewriting
//!
//! [`PreferCodec`] moves the payload types of a preferred codec to the front
//! of the `m=` line of one media section and, optionally, drops comfort
//! noise (CN). A preferred payload with an `a=rtpmap` line in the section is
//! placed first even if the `m=` line did not list it. CN stripping deletes
//! every `a=rtpmap:<pt> CN/<rate>` line in the document and removes those
//! payloads from the target `m=` line only. A section without the preferred
//! codec keeps its payload order.

use super::{SdpTransform, CRLF};
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

static OPUS_RTPMAP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^a=rtpmap:(\d+) opus/48000(?:/|$)").unwrap());

static CN_RTPMAP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^a=rtpmap:(\d+) CN/\d+").unwrap());

/// Preferred-codec transform
#[derive(Debug, Clone)]
pub struct PreferCodec {
    media: String,
    rtpmap: Regex,
    strip_comfort_noise: bool,
}

impl PreferCodec {
    /// Prefer `codec/clock_rate` in the `m=<media>` section
    pub fn new(media: impl Into<String>, codec: &str, clock_rate: u32) -> Result<Self> {
        let pattern = format!(
            r"(?i)^a=rtpmap:(\d+) {}/{}(?:/|$)",
            regex::escape(codec),
            clock_rate
        );
        let rtpmap = Regex::new(&pattern)
            .map_err(|e| Error::validation(format!("invalid codec pattern: {}", e)))?;
        Ok(Self {
            media: media.into(),
            rtpmap,
            strip_comfort_noise: false,
        })
    }

    /// Opus at 48 kHz in the audio section, comfort noise stripped
    pub fn opus() -> Self {
        Self {
            media: "audio".to_string(),
            rtpmap: OPUS_RTPMAP.clone(),
            strip_comfort_noise: true,
        }
    }

    /// Also remove CN payloads from the section
    pub fn strip_comfort_noise(mut self, strip: bool) -> Self {
        self.strip_comfort_noise = strip;
        self
    }

    /// Rewrite SDP text
    pub fn rewrite(&self, sdp: &str) -> String {
        let mut lines: Vec<String> = sdp.split(CRLF).map(str::to_string).collect();
        let prefix = format!("m={} ", self.media);
        let Some(m_index) = lines.iter().position(|line| line.starts_with(&prefix)) else {
            return sdp.to_string();
        };
        let section_end = lines[m_index + 1..]
            .iter()
            .position(|line| line.starts_with("m="))
            .map_or(lines.len(), |offset| m_index + 1 + offset);

        let preferred: Vec<String> = lines[m_index + 1..section_end]
            .iter()
            .filter_map(|line| capture_payload(&self.rtpmap, line))
            .collect();

        let mut tokens: Vec<String> = lines[m_index].split(' ').map(str::to_string).collect();
        if tokens.len() > 3 && !preferred.is_empty() {
            // preferred payloads lead even when the m-line omitted them
            let rest: Vec<String> = tokens
                .split_off(3)
                .into_iter()
                .filter(|payload| !preferred.contains(payload))
                .collect();
            tokens.extend(preferred.iter().cloned());
            tokens.extend(rest);
        }

        if self.strip_comfort_noise {
            // CN rtpmap lines go wherever they appear; only the target m-line loses the token
            for index in (0..lines.len()).rev() {
                if let Some(payload) = capture_payload(&CN_RTPMAP, &lines[index]) {
                    trace!(payload = %payload, "removing comfort noise payload");
                    if let Some(position) = tokens.iter().skip(3).position(|t| *t == payload) {
                        tokens.remove(position + 3);
                    }
                    lines.remove(index);
                }
            }
        }
        let m_index = lines
            .iter()
            .position(|line| line.starts_with(&prefix))
            .unwrap_or(m_index);
        lines[m_index] = tokens.join(" ");
        lines.join(CRLF)
    }
}

fn capture_payload(pattern: &Regex, line: &str) -> Option<String> {
    pattern
        .captures(line)
        .and_then(|captures| captures.get(1))
        .map(|payload| payload.as_str().to_string())
}

impl SdpTransform for PreferCodec {
    fn transform(&self, sdp: &str) -> String {
        self.rewrite(sdp)
    }

    fn name(&self) -> &str {
        "prefer-codec"
    }
}

/// Prefer Opus/48000 and strip comfort noise from the audio section
pub fn prefer_opus(sdp: &str) -> String {
    PreferCodec::opus().rewrite(sdp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opus_already_first() {
        let sdp = "m=audio 9 UDP/TLS/RTP/SAVPF 111 103 104\r\na=rtpmap:111 opus/48000/2\r\na=rtpmap:103 CN/8000\r\n";
        assert_eq!(
            prefer_opus(sdp),
            "m=audio 9 UDP/TLS/RTP/SAVPF 111 104\r\na=rtpmap:111 opus/48000/2\r\n"
        );
    }

    #[test]
    fn test_opus_moved_first() {
        let sdp = "m=audio 9 UDP/TLS/RTP/SAVPF 103 111\r\na=rtpmap:111 opus/48000/2\r\na=rtpmap:103 CN/8000\r\n";
        assert_eq!(
            prefer_opus(sdp),
            "m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=rtpmap:111 opus/48000/2\r\n"
        );
    }

    #[test]
    fn test_missing_audio_section_is_noop() {
        let sdp = "v=0\r\nm=video 9 RTP/AVP 96\r\na=rtpmap:13 CN/8000\r\n";
        assert_eq!(prefer_opus(sdp), sdp);
    }

    #[test]
    fn test_no_preferred_codec_keeps_order() {
        let sdp = "m=audio 9 RTP/AVP 0 8 13\r\na=rtpmap:0 PCMU/8000\r\na=rtpmap:8 PCMA/8000\r\na=rtpmap:13 CN/8000";
        assert_eq!(
            prefer_opus(sdp),
            "m=audio 9 RTP/AVP 0 8\r\na=rtpmap:0 PCMU/8000\r\na=rtpmap:8 PCMA/8000"
        );
    }

    #[test]
    fn test_comfort_noise_removed_from_every_section() {
        let sdp = "m=audio 9 RTP/AVP 13 111\r\na=rtpmap:13 CN/8000\r\na=rtpmap:111 opus/48000/2\r\nm=video 9 RTP/AVP 13 96\r\na=rtpmap:96 VP8/90000\r\na=rtpmap:13 CN/8000\r\n";
        assert_eq!(
            prefer_opus(sdp),
            "m=audio 9 RTP/AVP 111\r\na=rtpmap:111 opus/48000/2\r\nm=video 9 RTP/AVP 13 96\r\na=rtpmap:96 VP8/90000\r\n"
        );
    }

    #[test]
    fn test_custom_codec_preference() {
        let prefer_pcma = PreferCodec::new("audio", "PCMA", 8000).unwrap();
        let sdp = "m=audio 9 RTP/AVP 0 8 13\r\na=rtpmap:0 PCMU/8000\r\na=rtpmap:8 PCMA/8000\r\na=rtpmap:13 CN/8000";
        assert_eq!(
            prefer_pcma.rewrite(sdp),
            "m=audio 9 RTP/AVP 8 0 13\r\na=rtpmap:0 PCMU/8000\r\na=rtpmap:8 PCMA/8000\r\na=rtpmap:13 CN/8000"
        );
    }

    #[test]
    fn test_rtpmap_missing_from_m_line_is_promoted() {
        let sdp = "m=audio 9 RTP/AVP 0\r\na=rtpmap:111 opus/48000/2\r\n";
        assert_eq!(
            prefer_opus(sdp),
            "m=audio 9 RTP/AVP 111 0\r\na=rtpmap:111 opus/48000/2\r\n"
        );
    }
}
