// ── Backend event payloads ──
//
// The backend pushes named events over the event socket. Each known name
// maps to exactly one payload shape, so the whole set is a closed enum and
// anything else is rejected at decode time.

use serde::de::DeserializeOwned;
use serde_json::Value;
use strum::{EnumIter, IntoStaticStr};

use crate::error::Error;
use crate::types::{ExecExitMsg, ExecInMsg, ExecOutMsg, FolderConfig, SdkEvent};

/// Event names emitted by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, EnumIter)]
pub enum BackendEventKind {
    #[strum(serialize = "event:folder-state-change")]
    FolderStateChange,
    #[strum(serialize = "exec:input")]
    ExecInput,
    #[strum(serialize = "exec:output")]
    ExecOutput,
    #[strum(serialize = "exec:exit")]
    ExecExit,
    #[strum(serialize = "exec:inferior-input")]
    ExecInferiorInput,
    #[strum(serialize = "exec:inferior-output")]
    ExecInferiorOutput,
    #[strum(serialize = "event:sdk-install")]
    SdkInstall,
    #[strum(serialize = "event:sdk-remove")]
    SdkRemove,
}

impl BackendEventKind {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        use strum::IntoEnumIterator;
        Self::iter().find(|kind| kind.name() == name)
    }
}

/// A decoded backend event.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    FolderStateChange(FolderConfig),
    ExecInput(ExecInMsg),
    ExecOutput(ExecOutMsg),
    ExecExit(ExecExitMsg),
    ExecInferiorInput(ExecInMsg),
    ExecInferiorOutput(ExecOutMsg),
    SdkInstall(SdkEvent),
    SdkRemove(SdkEvent),
}

impl BackendEvent {
    /// Decode the payload of event `name`.
    ///
    /// Unknown names yield [`Error::UnknownEvent`]; payloads that do not
    /// match the expected shape yield [`Error::Deserialization`].
    pub fn decode(name: &str, data: Value) -> Result<Self, Error> {
        let kind = BackendEventKind::from_name(name).ok_or_else(|| Error::UnknownEvent {
            name: name.to_owned(),
        })?;

        Ok(match kind {
            BackendEventKind::FolderStateChange => Self::FolderStateChange(payload(name, data)?),
            BackendEventKind::ExecInput => Self::ExecInput(payload(name, data)?),
            BackendEventKind::ExecOutput => Self::ExecOutput(payload(name, data)?),
            BackendEventKind::ExecExit => Self::ExecExit(payload(name, data)?),
            BackendEventKind::ExecInferiorInput => Self::ExecInferiorInput(payload(name, data)?),
            BackendEventKind::ExecInferiorOutput => {
                Self::ExecInferiorOutput(payload(name, data)?)
            }
            BackendEventKind::SdkInstall => Self::SdkInstall(payload(name, data)?),
            BackendEventKind::SdkRemove => Self::SdkRemove(payload(name, data)?),
        })
    }

    pub fn kind(&self) -> BackendEventKind {
        match self {
            Self::FolderStateChange(_) => BackendEventKind::FolderStateChange,
            Self::ExecInput(_) => BackendEventKind::ExecInput,
            Self::ExecOutput(_) => BackendEventKind::ExecOutput,
            Self::ExecExit(_) => BackendEventKind::ExecExit,
            Self::ExecInferiorInput(_) => BackendEventKind::ExecInferiorInput,
            Self::ExecInferiorOutput(_) => BackendEventKind::ExecInferiorOutput,
            Self::SdkInstall(_) => BackendEventKind::SdkInstall,
            Self::SdkRemove(_) => BackendEventKind::SdkRemove,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Command id carried by exec events.
    pub fn cmd_id(&self) -> Option<&str> {
        match self {
            Self::ExecInput(m) | Self::ExecInferiorInput(m) => Some(&m.cmd_id),
            Self::ExecOutput(m) | Self::ExecInferiorOutput(m) => Some(&m.cmd_id),
            Self::ExecExit(m) => Some(&m.cmd_id),
            _ => None,
        }
    }
}

fn payload<T: DeserializeOwned>(name: &str, data: Value) -> Result<T, Error> {
    serde_json::from_value(data.clone()).map_err(|e| Error::Deserialization {
        message: format!("{name}: {e}"),
        body: data.to_string(),
    })
}
