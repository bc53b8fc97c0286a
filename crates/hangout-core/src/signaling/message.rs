//! Relay wire messages
//!
//! Messages serialise as `{"event": <name>, "data": <payload>}` using the
//! event names both endpoints and the relay agree on.

use crate::error::Result;
use crate::peer::IceCandidate;
use crate::sdp::SessionDescription;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message exchanged over the relay channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SignalMessage {
    /// Join a room (client to relay)
    #[serde(rename = "join")]
    Join(String),
    /// You joined an empty room (relay to client)
    #[serde(rename = "master")]
    Master,
    /// Somebody joined your room (relay to client)
    #[serde(rename = "slave")]
    Slave,
    /// One ICE candidate (trickle mode)
    #[serde(rename = "candidate")]
    Candidate(IceCandidate),
    /// Offer from the master
    #[serde(rename = "master offer")]
    MasterOffer(SessionDescription),
    /// Answer from the slave
    #[serde(rename = "slave offer")]
    SlaveOffer(SessionDescription),
}

impl SignalMessage {
    /// Wire event name
    pub fn event(&self) -> &'static str {
        match self {
            SignalMessage::Join(_) => "join",
            SignalMessage::Master => "master",
            SignalMessage::Slave => "slave",
            SignalMessage::Candidate(_) => "candidate",
            SignalMessage::MasterOffer(_) => "master offer",
            SignalMessage::SlaveOffer(_) => "slave offer",
        }
    }

    /// Encode as JSON text
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl fmt::Display for SignalMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let join = serde_json::to_value(SignalMessage::Join("hangout".into())).unwrap();
        assert_eq!(join, json!({"event": "join", "data": "hangout"}));

        let slave = serde_json::to_value(SignalMessage::Slave).unwrap();
        assert_eq!(slave, json!({"event": "slave"}));

        let offer = SignalMessage::MasterOffer(SessionDescription::offer("v=0\r\n"));
        assert_eq!(
            serde_json::to_value(&offer).unwrap(),
            json!({"event": "master offer", "data": {"type": "offer", "sdp": "v=0\r\n"}})
        );
    }

    #[test]
    fn test_decode() {
        let message = SignalMessage::from_json(
            r#"{"event":"candidate","data":{"candidate":"candidate:1 1 udp 1 10.0.0.1 9 typ host","sdpMid":"0","sdpMLineIndex":0}}"#,
        )
        .unwrap();
        assert_eq!(message.event(), "candidate");
        assert!(SignalMessage::from_json(r#"{"event":"bye"}"#).is_err());
    }
}
