//! Codec preference rewriting on whole session descriptions

use hangout_core::sdp::{payload_order, CodecPipeline};
use hangout_core::{prefer_opus, PreferCodec};
use proptest::prelude::*;
use std::sync::Arc;

#[test]
fn opus_already_first_drops_comfort_noise() {
    let sdp = "m=audio 9 UDP/TLS/RTP/SAVPF 111 103 104\r\n\
               a=rtpmap:111 opus/48000/2\r\n\
               a=rtpmap:103 CN/8000\r\n";
    assert_eq!(
        prefer_opus(sdp),
        "m=audio 9 UDP/TLS/RTP/SAVPF 111 104\r\na=rtpmap:111 opus/48000/2\r\n"
    );
}

#[test]
fn opus_moves_first_and_comfort_noise_goes() {
    let sdp = "m=audio 9 UDP/TLS/RTP/SAVPF 103 111\r\n\
               a=rtpmap:111 opus/48000/2\r\n\
               a=rtpmap:103 CN/8000\r\n";
    assert_eq!(
        prefer_opus(sdp),
        "m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=rtpmap:111 opus/48000/2\r\n"
    );
}

#[test]
fn missing_audio_section_is_untouched() {
    let sdp = "v=0\r\nm=video 9 RTP/AVP 96\r\na=rtpmap:96 VP8/90000\r\n";
    assert_eq!(prefer_opus(sdp), sdp);
}

#[test]
fn comfort_noise_outside_audio_is_dropped() {
    let sdp = "v=0\r\n\
               m=audio 9 RTP/AVP 111 13\r\n\
               a=rtpmap:111 opus/48000/2\r\n\
               m=video 9 RTP/AVP 96\r\n\
               a=rtpmap:96 VP8/90000\r\n\
               a=rtpmap:13 CN/8000\r\n";
    assert_eq!(
        prefer_opus(sdp),
        "v=0\r\nm=audio 9 RTP/AVP 111\r\na=rtpmap:111 opus/48000/2\r\n\
         m=video 9 RTP/AVP 96\r\na=rtpmap:96 VP8/90000\r\n"
    );
}

#[test]
fn opus_listed_only_in_rtpmap_is_promoted() {
    let sdp = "m=audio 9 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\na=rtpmap:111 opus/48000/2\r\n";
    assert_eq!(payload_order(&prefer_opus(sdp), "audio").unwrap(), vec!["111", "0"]);
}

#[test]
fn pipeline_composes_in_order() {
    let mut pipeline = CodecPipeline::new();
    pipeline.push(Arc::new(
        PreferCodec::new("audio", "PCMU", 8000)
            .unwrap()
            .strip_comfort_noise(false),
    ));
    pipeline.push(Arc::new(PreferCodec::opus()));

    let sdp = "m=audio 9 RTP/AVP 0 13 111\r\n\
               a=rtpmap:0 PCMU/8000\r\n\
               a=rtpmap:13 CN/8000\r\n\
               a=rtpmap:111 opus/48000/2\r\n";
    let rewritten = pipeline.apply(sdp);
    assert_eq!(payload_order(&rewritten, "audio").unwrap(), vec!["111", "0"]);
}

const CODECS: [&str; 4] = ["opus/48000/2", "CN/8000", "PCMU/8000", "ISAC/16000"];

fn session() -> impl Strategy<Value = String> {
    prop::collection::vec(0..CODECS.len(), 1..6).prop_map(|codecs| {
        let payloads: Vec<String> = (0..codecs.len()).map(|i| (100 + i).to_string()).collect();
        let mut sdp = format!("v=0\r\nm=audio 9 RTP/AVP {}\r\n", payloads.join(" "));
        for (payload, codec) in payloads.iter().zip(&codecs) {
            sdp.push_str(&format!("a=rtpmap:{} {}\r\n", payload, CODECS[*codec]));
        }
        sdp.push_str("m=video 9 RTP/AVP 96\r\na=rtpmap:96 VP8/90000\r\n");
        sdp
    })
}

proptest! {
    #[test]
    fn rewrite_is_idempotent(sdp in session()) {
        let once = prefer_opus(&sdp);
        prop_assert_eq!(prefer_opus(&once), once.clone());
        prop_assert!(!once.contains("CN/8000"));
        prop_assert!(once.ends_with("m=video 9 RTP/AVP 96\r\na=rtpmap:96 VP8/90000\r\n"));
    }

    #[test]
    fn opus_payloads_lead(sdp in session()) {
        let rewritten = prefer_opus(&sdp);
        let order = payload_order(&rewritten, "audio").unwrap();
        let opus: Vec<&str> = rewritten
            .split("\r\n")
            .filter_map(|line| line.strip_prefix("a=rtpmap:"))
            .filter(|rest| rest.contains(" opus/48000"))
            .filter_map(|rest| rest.split(' ').next())
            .collect();
        prop_assert_eq!(&order[..opus.len()], &opus[..]);
    }
}
