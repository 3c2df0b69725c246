// xds-agent-api: Async Rust client for the XDS backend server (HTTP + event socket)

pub mod client;
pub mod error;
pub mod events;
pub mod socket;
pub mod transport;
pub mod types;

pub use client::BackendClient;
pub use error::Error;
pub use events::{BackendEvent, BackendEventKind};
pub use socket::{EventSocket, SocketEvent};
pub use transport::TransportConfig;
pub use types::{
    BackendConfig, BuilderConfig, CloudSyncConfig, EventRegisterArgs, ExecArgs, ExecExitMsg,
    ExecInMsg, ExecOutMsg, ExecResult, ExecSignalArgs, FolderConfig, FolderStatus, FolderType,
    PathMapConfig, SdkEvent, VersionData,
};
