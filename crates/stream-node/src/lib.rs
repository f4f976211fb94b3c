//! Live plate recognition over video streams.
//!
//! A stream session pulls frames from a webcam or MJPEG source on its own
//! thread, runs throttled plate detection, draws the results and hands
//! annotated frames to a WebSocket consumer.

pub mod api;
pub mod config;
pub mod error;
pub mod overlay;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod source;
pub mod ws;

pub use api::{router, AppState};
pub use config::Config;
pub use error::SessionError;
pub use session::{SessionPhase, SessionResources, StreamSession};
