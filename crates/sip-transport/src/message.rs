use std::net::SocketAddr;

use crate::error::{Error, Result};

const USER_AGENT: &str = "hct_controller";
const FROM_URI: &str = "sip:hct@controller.void:5060";

/// Body of the `allow` command
pub fn allow_body(ip: &str) -> String {
    serde_json::json!({ "cmd": "allow", "ip": ip }).to_string()
}

/// A single out-of-dialog MESSAGE request carrying a JSON command
#[derive(Debug, Clone)]
pub struct ControlRequest {
    /// `host:port` of the peer, also used in the request URI and To header
    pub target: String,
    /// Local socket address advertised in Via
    pub source: SocketAddr,
    pub call_id: String,
    pub branch: String,
    pub tag: String,
    pub body: String,
}

impl ControlRequest {
    pub fn new(target: impl Into<String>, source: SocketAddr, body: impl Into<String>) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            target: target.into(),
            source,
            call_id: uuid::Uuid::new_v4().to_string(),
            branch: format!("z9hG4bK-{}", &id[..12]),
            tag: id[12..24].to_string(),
            body: body.into(),
        }
    }

    /// Serialize to wire format (CRLF line endings, body after a blank line)
    pub fn to_wire(&self) -> String {
        let lines = [
            format!("MESSAGE sip:echo@{} SIP/2.0", self.target),
            format!("Via: SIP/2.0/UDP {};branch={}", self.source, self.branch),
            format!("To: <sip:{}>", self.target),
            format!("From: <{}>;tag={}", FROM_URI, self.tag),
            "CSeq: 1 MESSAGE".to_string(),
            format!("Call-ID: {}", self.call_id),
            "Max-Forwards: 70".to_string(),
            format!("User-Agent: {}", USER_AGENT),
            format!("Content-Length: {}", self.body.len()),
            "Content-Type: text/json".to_string(),
            String::new(),
            self.body.clone(),
        ];
        lines.join("\r\n")
    }
}

/// Extract the three-digit status code of a response datagram.
///
/// `SIP/2.0 200 OK` → 200. The datagram must start with `SIP` and be at least 12 bytes.
pub fn parse_status_code(datagram: &[u8]) -> Result<u16> {
    if datagram.len() < 12 || !datagram.starts_with(b"SIP") {
        return Err(Error::InvalidResponse(
            String::from_utf8_lossy(&datagram[..datagram.len().min(32)]).into_owned(),
        ));
    }
    std::str::from_utf8(&datagram[8..11])
        .ok()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| Error::InvalidResponse("status code is not numeric".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_body() {
        let body: serde_json::Value = serde_json::from_str(&allow_body("10.1.2.3")).unwrap();
        assert_eq!(body["cmd"], "allow");
        assert_eq!(body["ip"], "10.1.2.3");
    }

    #[test]
    fn test_wire_format() {
        let source: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let request = ControlRequest::new("10.0.0.9:5062", source, "{}");
        let wire = request.to_wire();

        assert!(wire.starts_with("MESSAGE sip:echo@10.0.0.9:5062 SIP/2.0\r\n"));
        assert!(wire.contains("Via: SIP/2.0/UDP 127.0.0.1:40000;branch=z9hG4bK-"));
        assert!(wire.contains(&format!("Call-ID: {}\r\n", request.call_id)));
        assert!(wire.contains("Content-Length: 2\r\n"));
        assert!(wire.ends_with("\r\n\r\n{}"));
    }

    #[test]
    fn test_parse_status_code() {
        assert_eq!(parse_status_code(b"SIP/2.0 200 OK\r\n\r\n").unwrap(), 200);
        assert_eq!(parse_status_code(b"SIP/2.0 403 Forbidden").unwrap(), 403);
    }

    #[test]
    fn test_parse_status_code_rejects_garbage() {
        assert!(parse_status_code(b"SIP/2.0").is_err());
        assert!(parse_status_code(b"HTTP/1.1 200 OK").is_err());
        assert!(parse_status_code(b"SIP/2.0 2x0 OK").is_err());
    }
}
