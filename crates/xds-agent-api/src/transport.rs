// Shared transport configuration for building the backend reqwest::Client.
//
// Every backend connection shares the same timeout and agent identity
// header, so the builder logic lives here once.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::Error;

/// Header the backend uses to recognise which agent issued a request.
pub const AGENT_SID_HEADER: &str = "xds-agent-sid";

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    /// Agent session id sent with every request.
    pub agent_sid: Option<String>,
    pub accept_invalid_certs: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            agent_sid: None,
            accept_invalid_certs: false,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut headers = HeaderMap::new();
        if let Some(ref sid) = self.agent_sid {
            let value = HeaderValue::from_str(sid)
                .map_err(|e| Error::ClientSetup(format!("invalid agent sid: {e}")))?;
            headers.insert(HeaderName::from_static(AGENT_SID_HEADER), value);
        }

        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("xds-agent/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers);

        if self.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder
            .build()
            .map_err(|e| Error::ClientSetup(format!("failed to build HTTP client: {e}")))
    }
}
