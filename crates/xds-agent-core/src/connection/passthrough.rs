// ── Passthrough routes ──
//
// A passthrough route relays a locally received request verbatim to the
// XDS server and hands the raw answer back.

use bytes::Bytes;

use super::ServerConnection;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassthroughMethod {
    Get,
    Post,
}

/// A forwarding rule installed on a [`ServerConnection`].
#[derive(Clone)]
pub struct PassthroughRoute {
    pub(crate) method: PassthroughMethod,
    pub(crate) pattern: String,
    pub(crate) conn: ServerConnection,
}

impl PassthroughRoute {
    pub fn method(&self) -> PassthroughMethod {
        self.method
    }

    /// Server-side pattern, e.g. `/sdks/:id`.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Full local path pattern, i.e. the connection prefix plus the pattern.
    pub fn local_pattern(&self) -> String {
        format!("{}{}", self.conn.api_prefix().trim_end_matches('/'), self.pattern)
    }

    /// Whether a local request path is served by this route.
    pub fn matches(&self, request_path: &str) -> bool {
        let pattern = self.local_pattern();
        let mut want = pattern.split('/');
        let mut got = request_path.split('/');
        loop {
            match (want.next(), got.next()) {
                (None, None) => return true,
                (Some(w), Some(g)) if w.starts_with(':') && !g.is_empty() => {}
                (Some(w), Some(g)) if w == g => {}
                _ => return false,
            }
        }
    }

    /// Path sent to the server for a local request.
    ///
    /// Patterns without parameters always map to themselves; patterns with
    /// `:param` segments forward the request path minus the local prefix.
    pub fn server_path(&self, request_path: &str) -> String {
        if !self.pattern.contains(':') {
            return self.pattern.clone();
        }
        let prefix = self.conn.api_prefix().trim_end_matches('/');
        request_path
            .strip_prefix(prefix)
            .unwrap_or(request_path)
            .to_owned()
    }

    /// Relay a request and return the raw answer body.
    ///
    /// A refused connection also flags the server as disconnected.
    pub async fn forward(&self, request_path: &str, body: Bytes) -> Result<Bytes, CoreError> {
        let path = self.server_path(request_path);
        let client = self.conn.client();
        let result = match self.method {
            PassthroughMethod::Get => client.raw_get(&path).await,
            PassthroughMethod::Post => client.raw_post(&path, body).await,
        };
        self.conn.track(result)
    }
}

impl std::fmt::Debug for PassthroughRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassthroughRoute")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}
