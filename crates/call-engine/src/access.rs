//! Access-control seam for the `allow` directive

use async_trait::async_trait;
use std::time::Duration;

use hct_sip_transport::ControlClient;

/// Opens the system under test to a source address
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Status code returned by the peer; 200 means allowed
    async fn allow(&self, ip: &str) -> u16;
}

/// [`AccessControl`] over a SIP MESSAGE sent to a fixed peer
pub struct SipAccessControl {
    server: String,
    client: ControlClient,
}

impl SipAccessControl {
    pub fn new(server: impl Into<String>, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            client: ControlClient::new(timeout),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }
}

#[async_trait]
impl AccessControl for SipAccessControl {
    async fn allow(&self, ip: &str) -> u16 {
        self.client.allow_ip(&self.server, ip).await
    }
}
