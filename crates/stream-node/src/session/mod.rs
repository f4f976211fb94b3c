//! Stream sessions: one video source, one worker thread, one consumer.
//!
//! The session object only owns control state (stop token, detection flags).
//! Frame count, throttle timing and the duplicate cache live on the worker.

mod throttle;
mod worker;

pub use throttle::DetectionThrottle;
pub use worker::{encode_jpeg, resize_to_width};

use crate::config::SessionSettings;
use crate::error::SessionError;
use crate::overlay::OverlayRenderer;
use crate::sink::FrameSink;
use crate::source::{SourceDescriptor, SourceOpener};
use plate_engine::PlateEngine;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Starting,
    Streaming,
    Stopping,
}

/// Flags the command path may change while a worker runs
#[derive(Debug)]
pub struct SessionControls {
    detection_enabled: AtomicBool,
    detection_interval: AtomicU32,
}

impl SessionControls {
    fn new(detection_interval: u32) -> Self {
        Self {
            detection_enabled: AtomicBool::new(true),
            detection_interval: AtomicU32::new(detection_interval.max(1)),
        }
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection_enabled.load(Ordering::Relaxed)
    }

    pub fn detection_interval(&self) -> u32 {
        self.detection_interval.load(Ordering::Relaxed)
    }
}

/// Everything a session hands to its workers
#[derive(Clone)]
pub struct SessionResources {
    pub engine: Arc<PlateEngine>,
    pub opener: Arc<dyn SourceOpener>,
    pub overlay: Arc<OverlayRenderer>,
    pub settings: SessionSettings,
}

struct WorkerHandle {
    source: SourceDescriptor,
    cancel: CancellationToken,
    phase: Arc<Mutex<SessionPhase>>,
    thread: JoinHandle<()>,
}

pub struct StreamSession {
    id: String,
    resources: SessionResources,
    sink: Arc<dyn FrameSink>,
    controls: Arc<SessionControls>,
    worker: Option<WorkerHandle>,
}

impl StreamSession {
    pub fn new(id: impl Into<String>, resources: SessionResources, sink: Arc<dyn FrameSink>) -> Self {
        let controls = Arc::new(SessionControls::new(resources.settings.detection_interval));
        Self {
            id: id.into(),
            resources,
            sink,
            controls,
            worker: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn controls(&self) -> &SessionControls {
        &self.controls
    }

    pub fn phase(&self) -> SessionPhase {
        self.worker
            .as_ref()
            .map_or(SessionPhase::Idle, |worker| read_phase(&worker.phase))
    }

    /// Source of the current worker, if one was started
    pub fn source(&self) -> Option<&SourceDescriptor> {
        self.worker.as_ref().map(|worker| &worker.source)
    }

    /// Stop any running worker, then start a new one on `source`
    ///
    /// Opening happens on the worker; failures arrive as sink events.
    pub fn start(&mut self, source: SourceDescriptor, detection_enabled: Option<bool>) -> Result<(), SessionError> {
        self.stop();

        if let Some(enabled) = detection_enabled {
            self.set_detection_enabled(enabled);
        }

        let cancel = CancellationToken::new();
        let phase = Arc::new(Mutex::new(SessionPhase::Starting));

        let worker = worker::Worker {
            session_id: self.id.clone(),
            source: source.clone(),
            resources: self.resources.clone(),
            sink: self.sink.clone(),
            controls: self.controls.clone(),
            phase: phase.clone(),
            cancel: cancel.clone(),
        };

        let thread = std::thread::Builder::new()
            .name(format!("stream-{}", self.id))
            .spawn(move || worker.run())
            .map_err(|e| SessionError::acquisition(format!("failed to spawn stream worker: {}", e)))?;

        info!(session_id = %self.id, source = %source, "stream session starting");

        self.worker = Some(WorkerHandle {
            source,
            cancel,
            phase,
            thread,
        });
        Ok(())
    }

    /// Cancel the worker and wait for it, at most the configured join timeout
    ///
    /// Returns whether a worker was present.
    pub fn stop(&mut self) -> bool {
        let Some(worker) = self.worker.take() else {
            return false;
        };

        worker.cancel.cancel();
        if !worker.thread.is_finished() {
            write_phase(&worker.phase, SessionPhase::Stopping);
        }

        let deadline = Instant::now() + self.resources.settings.stop_join_timeout;
        while !worker.thread.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        if worker.thread.is_finished() {
            if worker.thread.join().is_err() {
                warn!(session_id = %self.id, "stream worker panicked");
            }
        } else {
            warn!(
                session_id = %self.id,
                timeout_ms = self.resources.settings.stop_join_timeout.as_millis() as u64,
                "stream worker did not stop in time, detaching"
            );
        }

        info!(session_id = %self.id, source = %worker.source, "stream session stopped");
        true
    }

    pub fn set_detection_enabled(&self, enabled: bool) {
        self.controls.detection_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Run detection every `frequency` frames; values below 1 mean every frame
    pub fn set_detection_interval(&self, frequency: i64) -> u32 {
        let interval = frequency.clamp(1, i64::from(u32::MAX)) as u32;
        self.controls.detection_interval.store(interval, Ordering::Relaxed);
        interval
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_phase(phase: &Mutex<SessionPhase>) -> SessionPhase {
    match phase.lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

fn write_phase(phase: &Mutex<SessionPhase>, value: SessionPhase) {
    match phase.lock() {
        Ok(mut guard) => *guard = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}
