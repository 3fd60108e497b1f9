use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  QoS
// ════════════════════════════════════════════════════════════════

/// MQTT delivery guarantee of a message or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn as_u8(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("qos must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos.as_u8()
    }
}

impl std::fmt::Display for QoS {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

// ════════════════════════════════════════════════════════════════
//  Message
// ════════════════════════════════════════════════════════════════

/// A message as the broker delivers it and as replay publishes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Record
// ════════════════════════════════════════════════════════════════

/// One row of the capture log.
///
/// `payload` holds the text form produced by the payload codec, not the
/// raw bytes. Rows are ordered by arrival; the index in the log is the order.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub topic: String,
    /// Encoded payload (base64 or UTF-8 text, depending on `PayloadEncoding`).
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
    /// Seconds since Unix epoch at capture. Metadata only, replay ignores it.
    pub arrival_time: f64,
    /// Seconds since the previous arrival (or since recording start for the
    /// first row). Never negative.
    pub delta: f64,
}

// ════════════════════════════════════════════════════════════════
//  Payload encoding
// ════════════════════════════════════════════════════════════════

/// How payload bytes are stored in the text log.
///
/// Chosen per session and not recorded in the log: capture and replay must
/// agree on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadEncoding {
    /// Payload stored as UTF-8 text. Non-UTF-8 payloads cannot be captured.
    #[default]
    Text,
    /// Payload stored as standard base64. Any byte sequence round-trips.
    Base64,
}

impl PayloadEncoding {
    /// Map the `encode_b64` switch onto an encoding.
    pub fn from_flag(encode_b64: bool) -> Self {
        if encode_b64 { PayloadEncoding::Base64 } else { PayloadEncoding::Text }
    }
}

impl std::fmt::Display for PayloadEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadEncoding::Text => f.write_str("text"),
            PayloadEncoding::Base64 => f.write_str("base64"),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  SslConfig
// ════════════════════════════════════════════════════════════════

/// Connection trust settings. Only the transport reads them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SslConfig {
    pub enable: bool,
    /// CA bundle (PEM) used to verify the broker certificate.
    pub ca_cert: Option<PathBuf>,
    /// Client certificate (PEM). Used only together with `keyfile`.
    pub certfile: Option<PathBuf>,
    /// Client private key (PEM). Used only together with `certfile`.
    pub keyfile: Option<PathBuf>,
    /// Skip certificate and hostname verification.
    pub insecure: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_from_level() {
        assert_eq!(QoS::try_from(0u8), Ok(QoS::AtMostOnce));
        assert_eq!(QoS::try_from(1u8), Ok(QoS::AtLeastOnce));
        assert_eq!(QoS::try_from(2u8), Ok(QoS::ExactlyOnce));
        assert!(QoS::try_from(3u8).is_err());
    }

    #[test]
    fn qos_displays_as_digit() {
        assert_eq!(QoS::ExactlyOnce.to_string(), "2");
        assert_eq!(u8::from(QoS::AtLeastOnce), 1);
    }

    #[test]
    fn encoding_from_flag() {
        assert_eq!(PayloadEncoding::from_flag(true), PayloadEncoding::Base64);
        assert_eq!(PayloadEncoding::from_flag(false), PayloadEncoding::Text);
    }
}
