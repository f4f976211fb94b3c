//! JSON messages exchanged over the video WebSocket.

use crate::error::SessionError;
use crate::source::SourceDescriptor;
use common::plates::PlateDetection;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Webcam,
    Mjpeg,
}

/// Commands sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    StartCamera {
        #[serde(default = "default_source_type")]
        source_type: SourceType,
        #[serde(default)]
        camera_id: Option<i32>,
        #[serde(default)]
        mjpeg_url: Option<String>,
        #[serde(default)]
        detection_enabled: Option<bool>,
    },
    StopCamera,
    ToggleDetection {
        enabled: bool,
    },
    /// Base64 image, optionally as a `data:` URL
    ProcessFrame {
        frame: String,
    },
    ChangeDetectionFrequency {
        frequency: i64,
    },
}

fn default_source_type() -> SourceType {
    SourceType::Webcam
}

impl ClientCommand {
    /// Parse one text frame from the socket
    pub fn parse(text: &str) -> Result<Self, SessionError> {
        serde_json::from_str(text).map_err(|e| SessionError::protocol(e.to_string()))
    }
}

/// Resolve a start command into a source, filling in defaults
pub fn source_descriptor(
    source_type: SourceType,
    camera_id: Option<i32>,
    mjpeg_url: Option<String>,
    default_mjpeg_url: &str,
) -> Result<SourceDescriptor, SessionError> {
    match source_type {
        SourceType::Webcam => Ok(SourceDescriptor::Webcam {
            device_id: camera_id.unwrap_or(0),
        }),
        SourceType::Mjpeg => {
            let url = mjpeg_url
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| default_mjpeg_url.to_string());
            common::validation::validate_stream_url(&url, "mjpeg_url")
                .map_err(|e| SessionError::protocol(e.to_string()))?;
            Ok(SourceDescriptor::Mjpeg { url })
        }
    }
}

/// Messages sent to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connection {
        status: String,
        message: String,
    },
    CameraStarted {
        message: String,
    },
    CameraStopped {
        message: String,
    },
    DetectionToggled {
        enabled: bool,
        message: String,
    },
    Error {
        message: String,
    },
    Frame {
        /// Base64 JPEG
        frame: String,
        plates: Vec<PlateDetection>,
        /// Seconds since the Unix epoch
        timestamp: f64,
        frame_count: u64,
    },
    ProcessedFrame {
        frame: String,
        plates: Vec<PlateDetection>,
    },
}

impl ServerMessage {
    pub fn connected() -> Self {
        ServerMessage::Connection {
            status: "connected".to_string(),
            message: "WebSocket connected".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize server message");
            r#"{"type":"error","message":"internal serialization error"}"#.to_string()
        })
    }
}

impl From<&SessionError> for ServerMessage {
    fn from(err: &SessionError) -> Self {
        ServerMessage::error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_start_camera() {
        let cmd = ClientCommand::parse(
            r#"{"command":"start_camera","source_type":"mjpeg","mjpeg_url":"http://cam/video","detection_enabled":false}"#,
        )
        .unwrap();

        assert_eq!(
            cmd,
            ClientCommand::StartCamera {
                source_type: SourceType::Mjpeg,
                camera_id: None,
                mjpeg_url: Some("http://cam/video".to_string()),
                detection_enabled: Some(false),
            }
        );
    }

    #[test]
    fn test_parse_minimal_commands() {
        assert!(matches!(
            ClientCommand::parse(r#"{"command":"start_camera"}"#).unwrap(),
            ClientCommand::StartCamera {
                source_type: SourceType::Webcam,
                camera_id: None,
                ..
            }
        ));
        assert_eq!(
            ClientCommand::parse(r#"{"command":"stop_camera"}"#).unwrap(),
            ClientCommand::StopCamera
        );
        assert_eq!(
            ClientCommand::parse(r#"{"command":"change_detection_frequency","frequency":-3}"#).unwrap(),
            ClientCommand::ChangeDetectionFrequency { frequency: -3 }
        );
    }

    #[test]
    fn test_malformed_commands_are_protocol_errors() {
        for text in [
            "not json",
            r#"{"command":"launch_rocket"}"#,
            r#"{"command":"toggle_detection"}"#,
            r#"{"enabled":true}"#,
        ] {
            let err = ClientCommand::parse(text).unwrap_err();
            assert!(matches!(err, SessionError::Protocol(_)), "{}", text);
        }
    }

    #[test]
    fn test_source_descriptor_defaults() {
        assert_eq!(
            source_descriptor(SourceType::Webcam, None, None, "http://x").unwrap(),
            SourceDescriptor::Webcam { device_id: 0 }
        );
        assert_eq!(
            source_descriptor(SourceType::Mjpeg, None, Some(" ".to_string()), "http://default/mjpg").unwrap(),
            SourceDescriptor::Mjpeg {
                url: "http://default/mjpg".to_string()
            }
        );
        assert!(source_descriptor(SourceType::Mjpeg, None, Some("file:///etc/passwd".to_string()), "").is_err());
    }

    #[test]
    fn test_server_message_shape() {
        let value: serde_json::Value = serde_json::from_str(
            &ServerMessage::Frame {
                frame: "abc".to_string(),
                plates: vec![],
                timestamp: 1.5,
                frame_count: 10,
            }
            .to_json(),
        )
        .unwrap();

        assert_eq!(
            value,
            json!({"type": "frame", "frame": "abc", "plates": [], "timestamp": 1.5, "frame_count": 10})
        );

        let value = serde_json::to_value(ServerMessage::connected()).unwrap();
        assert_eq!(value["type"], "connection");
        assert_eq!(value["status"], "connected");
    }
}
