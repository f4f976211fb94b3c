//! Hand-off of frames and session events from a worker thread to one consumer.

use crate::error::SinkError;
use crate::protocol::ServerMessage;
use base64::Engine;
use common::plates::PlateDetection;
use telemetry::metrics::{STREAM_FRAMES_DELIVERED, STREAM_FRAMES_DROPPED};
use tokio::sync::mpsc;

/// One annotated frame with the plates reported on it
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub jpeg: Vec<u8>,
    pub plates: Vec<PlateDetection>,
    pub frame_count: u64,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

impl From<FramePacket> for ServerMessage {
    fn from(packet: FramePacket) -> Self {
        ServerMessage::Frame {
            frame: base64::engine::general_purpose::STANDARD.encode(&packet.jpeg),
            plates: packet.plates,
            timestamp: packet.timestamp,
            frame_count: packet.frame_count,
        }
    }
}

/// Lifecycle notifications raised by the worker
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started { source: String },
    Error { message: String },
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Started { source } => ServerMessage::CameraStarted {
                message: format!("{} started", source),
            },
            SessionEvent::Error { message } => ServerMessage::Error { message },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The consumer was busy and the frame was discarded
    Dropped,
}

/// Destination for a session's output
///
/// Both methods are called from the worker thread only.
pub trait FrameSink: Send + Sync {
    fn deliver_frame(&self, packet: FramePacket) -> Result<Delivery, SinkError>;

    fn notify(&self, event: SessionEvent) -> Result<(), SinkError>;
}

/// Items queued for the socket writer
#[derive(Debug)]
pub enum Outbound {
    Frame(FramePacket),
    Message(ServerMessage),
}

impl From<Outbound> for ServerMessage {
    fn from(outbound: Outbound) -> Self {
        match outbound {
            Outbound::Frame(packet) => packet.into(),
            Outbound::Message(message) => message,
        }
    }
}

/// Sink backed by a bounded channel drained by an async task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Outbound>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end, with room for `buffer` items
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    pub fn sender(&self) -> mpsc::Sender<Outbound> {
        self.tx.clone()
    }
}

impl FrameSink for ChannelSink {
    fn deliver_frame(&self, packet: FramePacket) -> Result<Delivery, SinkError> {
        match self.tx.try_send(Outbound::Frame(packet)) {
            Ok(()) => {
                STREAM_FRAMES_DELIVERED.inc();
                Ok(Delivery::Sent)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                STREAM_FRAMES_DROPPED.with_label_values(&["consumer_busy"]).inc();
                Ok(Delivery::Dropped)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }

    fn notify(&self, event: SessionEvent) -> Result<(), SinkError> {
        self.tx
            .blocking_send(Outbound::Message(event.into()))
            .map_err(|_| SinkError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(frame_count: u64) -> FramePacket {
        FramePacket {
            jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
            plates: Vec::new(),
            frame_count,
            timestamp: 0.0,
        }
    }

    #[test]
    fn test_full_channel_drops_frames() {
        let (sink, mut rx) = ChannelSink::channel(1);

        assert_eq!(sink.deliver_frame(packet(1)).unwrap(), Delivery::Sent);
        assert_eq!(sink.deliver_frame(packet(2)).unwrap(), Delivery::Dropped);

        match rx.try_recv().unwrap() {
            Outbound::Frame(p) => assert_eq!(p.frame_count, 1),
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_channel_is_an_error() {
        let (sink, rx) = ChannelSink::channel(1);
        drop(rx);

        assert_eq!(sink.deliver_frame(packet(1)), Err(SinkError::Closed));
        assert_eq!(
            sink.notify(SessionEvent::Error {
                message: "x".to_string()
            }),
            Err(SinkError::Closed)
        );
    }

    #[test]
    fn test_events_become_server_messages() {
        let (sink, mut rx) = ChannelSink::channel(2);
        sink.notify(SessionEvent::Started {
            source: "webcam 1 (v4l2)".to_string(),
        })
        .unwrap();

        let message: ServerMessage = rx.try_recv().unwrap().into();
        assert_eq!(
            message,
            ServerMessage::CameraStarted {
                message: "webcam 1 (v4l2) started".to_string()
            }
        );
    }

    #[test]
    fn test_frame_packet_is_base64_encoded() {
        let message: ServerMessage = packet(7).into();
        match message {
            ServerMessage::Frame {
                frame, frame_count, ..
            } => {
                assert_eq!(frame, "/9j/2Q==");
                assert_eq!(frame_count, 7);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
