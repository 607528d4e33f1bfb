use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

/// Identifier tying every lifecycle event to the request that caused it.
pub type RequestId = u64;

/// A single unit of work for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LaunchRequest {
    Launch {
        path: String,
        #[serde(default, rename = "explicitEntry")]
        explicit_entry: Option<String>,
        #[serde(rename = "emulatorId")]
        emulator_id: String,
    },
    Clear {
        #[serde(deserialize_with = "require_true")]
        clear: bool,
    },
}

/// `{"clear": false}` is not a request.
fn require_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    if bool::deserialize(deserializer)? {
        Ok(true)
    } else {
        Err(serde::de::Error::custom("`clear` must be true"))
    }
}

impl LaunchRequest {
    pub fn launch(path: impl Into<String>, emulator_id: impl Into<String>) -> Self {
        LaunchRequest::Launch {
            path: path.into(),
            explicit_entry: None,
            emulator_id: emulator_id.into(),
        }
    }

    /// Launch `entry` from the archive instead of the automatic choice.
    pub fn with_entry(self, entry: Option<String>) -> Self {
        match self {
            LaunchRequest::Launch {
                path, emulator_id, ..
            } => LaunchRequest::Launch {
                path,
                explicit_entry: entry,
                emulator_id,
            },
            other => other,
        }
    }

    #[cfg(test)]
    pub fn clear() -> Self {
        LaunchRequest::Clear { clear: true }
    }
}

/// One entry of an archive listing, as reported by the archive tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    StatusMarker,
    ExtractionLog,
    EmulatorLog,
    EmulatorErrorLog,
    ConflictWarning,
}

/// Payloads carried by `EventKind::StatusMarker`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusMarker {
    IsZip,
    ZipSuccess,
    ZipError(String),
    Running,
    Closed,
}

impl StatusMarker {
    pub fn to_payload(&self) -> String {
        match self {
            StatusMarker::IsZip => "isZip".to_string(),
            StatusMarker::ZipSuccess => "zip-success".to_string(),
            StatusMarker::ZipError(details) => format!("zip-error {details}"),
            StatusMarker::Running => "running".to_string(),
            StatusMarker::Closed => "closed".to_string(),
        }
    }

    pub fn parse(payload: &str) -> Option<Self> {
        match payload {
            "isZip" => Some(StatusMarker::IsZip),
            "zip-success" => Some(StatusMarker::ZipSuccess),
            "running" => Some(StatusMarker::Running),
            "closed" => Some(StatusMarker::Closed),
            other => other
                .strip_prefix("zip-error")
                .map(|details| StatusMarker::ZipError(details.trim_start().to_string())),
        }
    }
}

/// Lifecycle event published on the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: String,
}

impl LifecycleEvent {
    pub fn status(request_id: RequestId, marker: StatusMarker) -> Self {
        Self {
            request_id,
            kind: EventKind::StatusMarker,
            data: marker.to_payload(),
        }
    }

    pub fn log(request_id: RequestId, kind: EventKind, data: impl Into<String>) -> Self {
        Self {
            request_id,
            kind,
            data: data.into(),
        }
    }

    /// The status marker carried by this event, if it is one.
    pub fn marker(&self) -> Option<StatusMarker> {
        if self.kind == EventKind::StatusMarker {
            StatusMarker::parse(&self.data)
        } else {
            None
        }
    }

    /// Terminal events end the lifecycle of a request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.marker(),
            Some(StatusMarker::Closed) | Some(StatusMarker::ZipError(_))
        )
    }
}

/// An extraction directory known to the cache.
#[derive(Debug, Clone)]
pub struct ExtractionRecord {
    pub identity: String,
    pub system: String,
    pub dir: PathBuf,
    pub last_used: SystemTime,
    pub size_bytes: u64,
}

/// Snapshot of the single supervised emulator process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningProcess {
    pub emulator_id: String,
    pub display_name: String,
    pub output_path: PathBuf,
    pub pid: Option<u32>,
    pub started_at_utc: String,
    #[serde(skip)]
    pub generation: u64,
}

/// Outcome of an eviction sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    #[serde(rename = "deletedFolders")]
    pub deleted_folders: u64,
    #[serde(rename = "freedSpaceMB")]
    pub freed_space_mb: f64,
    #[serde(rename = "totalSizeMB")]
    pub total_size_mb: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_marker_payloads_round_trip() {
        let markers = [
            StatusMarker::IsZip,
            StatusMarker::ZipSuccess,
            StatusMarker::ZipError("crc mismatch".into()),
            StatusMarker::Running,
            StatusMarker::Closed,
        ];
        for m in markers {
            assert_eq!(StatusMarker::parse(&m.to_payload()), Some(m));
        }
    }

    #[test]
    fn launch_request_accepts_both_json_shapes() {
        let launch: LaunchRequest = serde_json::from_str(
            r#"{"path":"/roms/Game.zip","explicitEntry":"Game (U).smc","emulatorId":"snes"}"#,
        )
        .unwrap();
        assert_eq!(
            launch,
            LaunchRequest::Launch {
                path: "/roms/Game.zip".into(),
                explicit_entry: Some("Game (U).smc".into()),
                emulator_id: "snes".into(),
            }
        );

        let clear: LaunchRequest = serde_json::from_str(r#"{"clear":true}"#).unwrap();
        assert_eq!(clear, LaunchRequest::clear());
    }

    #[test]
    fn clear_false_is_not_a_request() {
        assert!(serde_json::from_str::<LaunchRequest>(r#"{"clear":false}"#).is_err());
        assert!(serde_json::from_str::<LaunchRequest>(r#"{"clear":"yes"}"#).is_err());
    }

    #[test]
    fn with_entry_only_changes_launches() {
        let req = LaunchRequest::launch("Game.zip", "snes").with_entry(Some("Game (U).sfc".into()));
        assert_eq!(
            req,
            LaunchRequest::Launch {
                path: "Game.zip".into(),
                explicit_entry: Some("Game (U).sfc".into()),
                emulator_id: "snes".into(),
            }
        );
        assert_eq!(
            LaunchRequest::clear().with_entry(Some("x".into())),
            LaunchRequest::clear()
        );
    }

    #[test]
    fn event_serializes_with_type_field() {
        let ev = LifecycleEvent::status(7, StatusMarker::Running);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "StatusMarker");
        assert_eq!(json["data"], "running");
        assert_eq!(json["requestId"], 7);
    }
}
