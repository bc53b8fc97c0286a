//! Peer and signaling configuration
//!
//! Configuration is plain serde data so it can arrive as JSON on a command
//! line or in a config file. A [`PeerConfig`] seeds the peer store
//! attributes `servers`, `optional` and `mandatory`, which the peer reads
//! back when it allocates its transport.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Default public STUN server
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Default signaling room
pub const DEFAULT_ROOM: &str = "hangout";

/// STUN/TURN server entry, JSON compatible with the browser `RTCIceServer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    /// Server URLs (`stun:` or `turn:`); the legacy single `url` field is accepted
    #[serde(alias = "url", deserialize_with = "one_or_many")]
    pub urls: Vec<String>,

    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// STUN server without credentials
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// TURN server with credentials
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.urls.is_empty() {
            return Err(Error::config("ICE server without urls"));
        }
        for url in &self.urls {
            let is_turn = url.starts_with("turn:") || url.starts_with("turns:");
            if !(is_turn || url.starts_with("stun:") || url.starts_with("stuns:")) {
                return Err(Error::config(format!("unsupported ICE server url: {}", url)));
            }
            if is_turn && (self.username.is_none() || self.credential.is_none()) {
                return Err(Error::config(format!("TURN server {} needs credentials", url)));
            }
        }
        Ok(())
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// Transport constraints handed to the connection primitive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportConstraints {
    /// Optional constraints, in priority order
    #[serde(default)]
    pub optional: Vec<Value>,

    /// Mandatory constraints
    #[serde(default)]
    pub mandatory: Map<String, Value>,
}

/// Configuration for a [`Peer`](crate::peer::Peer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerConfig {
    /// ICE servers used when the transport is allocated
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,

    /// Transport constraints
    #[serde(default)]
    pub constraints: TransportConstraints,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::stun(DEFAULT_STUN_SERVER)],
            constraints: TransportConstraints::default(),
        }
    }
}

impl PeerConfig {
    /// Configuration with no ICE servers (host candidates only)
    pub fn host_only() -> Self {
        Self {
            ice_servers: Vec::new(),
            constraints: TransportConstraints::default(),
        }
    }

    /// Parse configuration from JSON.
    ///
    /// Accepts either a bare array of ICE servers or a full object.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        let config = match value {
            Value::Array(_) => Self {
                ice_servers: serde_json::from_value(value)?,
                constraints: TransportConstraints::default(),
            },
            Value::Object(_) => serde_json::from_value(value)?,
            other => {
                return Err(Error::config(format!(
                    "expected an array or object, got {}",
                    other
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Add an ICE server
    pub fn with_ice_server(mut self, server: IceServer) -> Self {
        self.ice_servers.push(server);
        self
    }

    /// Append an optional constraint
    pub fn with_optional(mut self, constraint: Value) -> Self {
        self.constraints.optional.push(constraint);
        self
    }

    /// Set a mandatory constraint
    pub fn with_mandatory(mut self, key: impl Into<String>, value: Value) -> Self {
        self.constraints.mandatory.insert(key.into(), value);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.ice_servers.iter().try_for_each(IceServer::validate)
    }

    /// Store attributes seeded into a peer
    pub fn to_attributes(&self) -> Result<Map<String, Value>> {
        let mut attributes = Map::new();
        attributes.insert("servers".into(), serde_json::to_value(&self.ice_servers)?);
        attributes.insert(
            "optional".into(),
            Value::Array(self.constraints.optional.clone()),
        );
        attributes.insert(
            "mandatory".into(),
            Value::Object(self.constraints.mandatory.clone()),
        );
        Ok(attributes)
    }
}

/// How candidates travel over the relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationMode {
    /// Relay each candidate as it is gathered
    Trickle,
    /// Wait for gathering to finish and relay one complete description
    #[default]
    NonTrickle,
}

impl std::fmt::Display for NegotiationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NegotiationMode::Trickle => write!(f, "trickle"),
            NegotiationMode::NonTrickle => write!(f, "non-trickle"),
        }
    }
}

/// Configuration for a [`Signaler`](crate::signaling::Signaler)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingConfig {
    /// Room both endpoints join
    pub room: String,

    /// Candidate exchange mode, fixed for the signaler's lifetime
    #[serde(default)]
    pub mode: NegotiationMode,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            room: DEFAULT_ROOM.to_string(),
            mode: NegotiationMode::default(),
        }
    }
}

impl SignalingConfig {
    /// Configuration for a named room
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            ..Default::default()
        }
    }

    /// Set the negotiation mode
    pub fn with_mode(mut self, mode: NegotiationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.room.trim().is_empty() {
            return Err(Error::config("room name must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_uses_public_stun() {
        let config = PeerConfig::default();
        assert_eq!(config.ice_servers, vec![IceServer::stun(DEFAULT_STUN_SERVER)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_bare_array() {
        let config = PeerConfig::from_json(
            r#"[{"url":"stun:stun.example.org"},{"urls":["turn:turn.example.org"],"username":"u","credential":"p"}]"#,
        )
        .unwrap();
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[0].urls, vec!["stun:stun.example.org"]);
        assert_eq!(config.ice_servers[1].username.as_deref(), Some("u"));
    }

    #[test]
    fn test_from_json_object() {
        let config = PeerConfig::from_json(
            r#"{"iceServers":[{"urls":"stun:a.example"}],"constraints":{"optional":[{"DtlsSrtpKeyAgreement":true}]}}"#,
        )
        .unwrap();
        assert_eq!(config.ice_servers[0].urls, vec!["stun:a.example"]);
        assert_eq!(config.constraints.optional.len(), 1);
        assert!(config.constraints.mandatory.is_empty());
    }

    #[test]
    fn test_from_json_rejects_scalars_and_bad_servers() {
        assert!(matches!(
            PeerConfig::from_json("42"),
            Err(Error::Configuration { .. })
        ));
        assert!(PeerConfig::from_json(r#"[{"urls":"http://nope"}]"#).is_err());
        assert!(PeerConfig::from_json(r#"[{"urls":"turn:t.example"}]"#).is_err());
    }

    #[test]
    fn test_attributes() {
        let config = PeerConfig::host_only()
            .with_optional(json!({"RtpDataChannels": true}))
            .with_mandatory("OfferToReceiveAudio", json!(true));
        let attributes = config.to_attributes().unwrap();
        assert_eq!(attributes["servers"], json!([]));
        assert_eq!(attributes["optional"], json!([{"RtpDataChannels": true}]));
        assert_eq!(attributes["mandatory"], json!({"OfferToReceiveAudio": true}));
    }

    #[test]
    fn test_signaling_defaults() {
        let config = SignalingConfig::default();
        assert_eq!(config.room, "hangout");
        assert_eq!(config.mode, NegotiationMode::NonTrickle);
        assert!(SignalingConfig::new("  ").validate().is_err());
        assert_eq!(NegotiationMode::Trickle.to_string(), "trickle");
    }
}
