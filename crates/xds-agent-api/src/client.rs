// Backend HTTP client
//
// Thin typed wrapper over the XDS backend REST API rooted at
// `<base>/api/v1`. Non-2xx answers become `Error::Api` carrying the body
// the backend sent, transport failures stay `Error::Transport`.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;
use crate::types::{
    BackendConfig, EventRegisterArgs, ExecArgs, ExecResult, ExecSignalArgs, FolderConfig,
    VersionData,
};

/// REST API path appended to a backend base URL.
pub const API_PATH: &str = "/api/v1";

/// Raw HTTP client for the XDS backend.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    api_url: Url,
}

impl BackendClient {
    /// Create a client for the backend at `base_url`.
    pub fn new(base_url: &Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, api_url(base_url)?))
    }

    /// Create a client from an existing `reqwest::Client` and a full API URL.
    pub fn with_client(http: reqwest::Client, api_url: Url) -> Self {
        Self { http, api_url }
    }

    /// The `<base>/api/v1` URL every call is rooted at.
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    // ── Server info ──────────────────────────────────────────────────

    /// `GET /version`, used as the connect handshake.
    pub async fn get_version(&self) -> Result<VersionData, Error> {
        self.get("/version").await
    }

    /// `GET /config`: backend identity and capabilities.
    pub async fn get_config(&self) -> Result<BackendConfig, Error> {
        self.get("/config").await
    }

    // ── Folders ──────────────────────────────────────────────────────

    pub async fn get_folders(&self) -> Result<Vec<FolderConfig>, Error> {
        self.get("/folders").await
    }

    pub async fn folder_add(&self, folder: &FolderConfig) -> Result<FolderConfig, Error> {
        self.post("/folders", folder).await
    }

    pub async fn folder_update(&self, folder: &FolderConfig) -> Result<FolderConfig, Error> {
        let path = format!("/folders/{}", folder.id);
        let resp = self.request(reqwest::Method::PUT, &path).json(folder).send().await?;
        parse_json(resp).await
    }

    pub async fn folder_delete(&self, id: &str) -> Result<FolderConfig, Error> {
        let path = format!("/folders/{id}");
        let resp = self.request(reqwest::Method::DELETE, &path).send().await?;
        parse_json(resp).await
    }

    /// `POST /folders/sync/:id`: ask the backend to resynchronize a folder.
    pub async fn folder_sync(&self, id: &str) -> Result<(), Error> {
        let path = format!("/folders/sync/{id}");
        let resp = self.request(reqwest::Method::POST, &path).send().await?;
        check_status(resp).await.map(drop)
    }

    // ── Exec ─────────────────────────────────────────────────────────

    pub async fn exec(&self, args: &ExecArgs) -> Result<ExecResult, Error> {
        self.post("/exec", args).await
    }

    pub async fn signal(&self, args: &ExecSignalArgs) -> Result<ExecResult, Error> {
        self.post("/signal", args).await
    }

    // ── Events ───────────────────────────────────────────────────────

    /// `POST /events/register`: ask the backend to push `args.name` events,
    /// optionally filtered to one folder.
    pub async fn event_register(&self, args: &EventRegisterArgs) -> Result<(), Error> {
        let resp = self
            .request(reqwest::Method::POST, "/events/register")
            .json(args)
            .send()
            .await?;
        check_status(resp).await.map(drop)
    }

    // ── Generic commands ─────────────────────────────────────────────

    /// POST an arbitrary command. A missing leading `/` is added.
    pub async fn send_command<B, T>(&self, cmd: &str, body: &B) -> Result<T, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let path = if cmd.starts_with('/') {
            cmd.to_owned()
        } else {
            format!("/{cmd}")
        };
        self.post(&path, body).await
    }

    /// GET `path` and return the raw body.
    pub async fn raw_get(&self, path: &str) -> Result<Bytes, Error> {
        let resp = self.request(reqwest::Method::GET, path).send().await?;
        let resp = check_status(resp).await?;
        Ok(resp.bytes().await?)
    }

    /// POST a raw JSON body to `path` and return the raw answer.
    pub async fn raw_post(&self, path: &str, body: Bytes) -> Result<Bytes, Error> {
        let resp = self
            .request(reqwest::Method::POST, path)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(resp.bytes().await?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.api_url.as_str().trim_end_matches('/'));
        debug!(%method, %url, "backend request");
        self.http.request(method, url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let resp = self.request(reqwest::Method::GET, path).send().await?;
        parse_json(resp).await
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await?;
        parse_json(resp).await
    }
}

/// Derive `<base>/api/v1` from a backend base URL.
pub fn api_url(base_url: &Url) -> Result<Url, Error> {
    let base = base_url.as_str().trim_end_matches('/');
    Ok(Url::parse(&format!("{base}{API_PATH}"))?)
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_owned()
    } else {
        body.chars().take(200).collect()
    };
    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let resp = check_status(resp).await?;
    let body = resp.text().await?;
    trace!(body = %body, "backend response");
    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}
