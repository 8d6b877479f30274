//! Outbound frames sent by the client.

use serde::{Deserialize, Serialize};

/// Client-to-server frame, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Application-level keepalive, sent when the link has been idle for a
    /// full heartbeat interval.
    Ping,
}

impl ClientFrame {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_wire_format() {
        assert_eq!(ClientFrame::Ping.to_json().unwrap(), r#"{"type":"ping"}"#);
    }
}
