//! The video WebSocket: one stream session per connection.

use crate::api::AppState;
use crate::error::SessionError;
use crate::protocol::{source_descriptor, ClientCommand, ServerMessage};
use crate::session::{encode_jpeg, SessionResources, StreamSession};
use crate::sink::{ChannelSink, Outbound};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use base64::Engine;
use common::plates::PlateDetection;
use futures::{sink::SinkExt, stream::StreamExt};
use plate_engine::{MatchPurpose, OcrMode};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

type SharedSession = Arc<Mutex<StreamSession>>;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();

    let (sink, mut rx) = ChannelSink::channel(state.config.delivery_buffer);
    let tx = sink.sender();
    let session: SharedSession = Arc::new(Mutex::new(StreamSession::new(
        session_id.clone(),
        state.resources.clone(),
        Arc::new(sink),
    )));

    info!(session_id = %session_id, "client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let message: ServerMessage = outbound.into();
            if sender.send(Message::Text(message.to_json())).await.is_err() {
                break;
            }
        }
    });

    if tx.send(Outbound::Message(ServerMessage::connected())).await.is_ok() {
        loop {
            tokio::select! {
                _ = &mut send_task => break,
                msg = receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_text(&state, &session, &session_id, &text).await {
                            if tx.send(Outbound::Message(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(session_id = %session_id, error = %e, "socket receive failed");
                        break;
                    }
                },
            }
        }
    }

    if let Err(e) = with_session(&session, |s| s.stop()).await {
        warn!(session_id = %session_id, error = %e, "failed to stop session on disconnect");
    }
    drop(session);
    drop(tx);
    send_task.abort();

    info!(session_id = %session_id, "client disconnected");
}

/// Apply one text frame; returns the reply to queue, if any
async fn handle_text(state: &AppState, session: &SharedSession, session_id: &str, text: &str) -> Option<ServerMessage> {
    let command = match ClientCommand::parse(text) {
        Ok(command) => command,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "rejected client command");
            return Some(ServerMessage::from(&e));
        }
    };

    match handle_command(state, session, command).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "command failed");
            Some(ServerMessage::from(&e))
        }
    }
}

async fn handle_command(
    state: &AppState,
    session: &SharedSession,
    command: ClientCommand,
) -> Result<Option<ServerMessage>, SessionError> {
    match command {
        ClientCommand::StartCamera {
            source_type,
            camera_id,
            mjpeg_url,
            detection_enabled,
        } => {
            let source = source_descriptor(
                source_type,
                camera_id,
                mjpeg_url,
                &state.resources.settings.default_mjpeg_url,
            )?;
            // The worker reports camera_started or an error once the source opens
            with_session(session, move |s| s.start(source, detection_enabled)).await??;
            Ok(None)
        }
        ClientCommand::StopCamera => {
            with_session(session, |s| s.stop()).await?;
            Ok(Some(ServerMessage::CameraStopped {
                message: "camera stopped".to_string(),
            }))
        }
        ClientCommand::ToggleDetection { enabled } => {
            with_session(session, move |s| s.set_detection_enabled(enabled)).await?;
            Ok(Some(ServerMessage::DetectionToggled {
                enabled,
                message: format!("detection {}", if enabled { "enabled" } else { "disabled" }),
            }))
        }
        ClientCommand::ChangeDetectionFrequency { frequency } => {
            let interval = with_session(session, move |s| s.set_detection_interval(frequency)).await?;
            debug!(interval, "detection interval changed");
            Ok(None)
        }
        ClientCommand::ProcessFrame { frame } => {
            let bytes = decode_frame_payload(&frame)?;
            let resources = state.resources.clone();
            let reply = tokio::task::spawn_blocking(move || annotate_frame(&resources, &bytes))
                .await
                .map_err(|e| SessionError::Inference(format!("frame task failed: {}", e)))??;
            Ok(Some(reply))
        }
    }
}

/// Run `f` against the session off the async runtime; start and stop block
async fn with_session<R, F>(session: &SharedSession, f: F) -> Result<R, SessionError>
where
    F: FnOnce(&mut StreamSession) -> R + Send + 'static,
    R: Send + 'static,
{
    let session = session.clone();
    tokio::task::spawn_blocking(move || {
        let mut guard = session
            .lock()
            .map_err(|_| SessionError::acquisition("session state poisoned"))?;
        Ok(f(&mut *guard))
    })
    .await
    .map_err(|e| SessionError::acquisition(format!("session task failed: {}", e)))?
}

/// Base64 image payload, with or without a `data:` URL prefix
pub fn decode_frame_payload(payload: &str) -> Result<Vec<u8>, SessionError> {
    let data = match payload.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => payload,
    };
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| SessionError::protocol(format!("invalid base64 frame: {}", e)))
}

/// Detect and read plates on one uploaded frame and draw them
pub fn annotate_frame(resources: &SessionResources, bytes: &[u8]) -> Result<ServerMessage, SessionError> {
    let mut frame = image::load_from_memory(bytes)
        .map_err(|e| SessionError::protocol(format!("undecodable frame: {}", e)))?
        .to_rgb8();

    let plates: Vec<PlateDetection> = resources
        .engine
        .analyze_frame(&frame, OcrMode::Fast, MatchPurpose::Stream)
        .map_err(|e| SessionError::Inference(e.to_string()))?
        .into_iter()
        .map(|report| report.detection)
        .collect();

    resources.overlay.draw(&mut frame, &plates);
    let jpeg = encode_jpeg(&frame, resources.settings.jpeg_quality)?;

    Ok(ServerMessage::ProcessedFrame {
        frame: base64::engine::general_purpose::STANDARD.encode(jpeg),
        plates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_and_data_url_payloads() {
        assert_eq!(decode_frame_payload("/9j/2Q==").unwrap(), vec![0xFF, 0xD8, 0xFF, 0xD9]);
        assert_eq!(
            decode_frame_payload("data:image/jpeg;base64,/9j/2Q==").unwrap(),
            vec![0xFF, 0xD8, 0xFF, 0xD9]
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_frame_payload("not base64!"), Err(SessionError::Protocol(_))));
    }
}
