//! The `dataSend` subprotocol: recording streams from accessory to
//! controller.
//!
//! A controller opens a stream with a `dataSend.open` request; the accessory
//! checks its recording gates, answers, and then pushes `dataSend.data`
//! events carrying the delegate's media packets until the stream ends. One
//! recording stream is active at a time.

mod stream;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::{HdsStatus, Protocol, ProtocolSpecificErrorReason, Topic};
use crate::opack::Value;
use crate::server::{ConnectionHandle, HandlerId, HdsServer};
use crate::session::Message;

/// Stream type accepted by the recording gate.
const STREAM_TYPE_RECORDING: &str = "ipcamera.recording";
/// Target accepted by the recording gate.
const TARGET_CONTROLLER: &str = "controller";

/// One media fragment produced by the camera delegate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingPacket {
    /// Raw media bytes of this packet.
    pub data: Vec<u8>,
    /// True on the final packet of the recording.
    pub last: bool,
}

/// Supplies recorded media for an opened stream.
///
/// The delegate hands back a channel; the subprotocol drains it, fragments
/// each packet, and drops the receiver when the stream terminates, which is
/// the producer's signal to stop.
pub trait CameraDelegate: Send + Sync + 'static {
    /// Begin producing media for `stream_id`.
    fn handle_recording_stream(&self, stream_id: i64) -> mpsc::Receiver<RecordingPacket>;
}

/// The recording configuration selected by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingConfig {
    /// Prebuffer the controller asked for, in milliseconds.
    pub prebuffer_length_ms: u32,
    /// Fragment duration of the selected media container, in milliseconds.
    pub fragment_length_ms: u32,
}

struct ActiveStream {
    stream_id: i64,
    task: JoinHandle<()>,
}

/// Recording gate state and the `dataSend.open` entry point.
pub struct RecordingManager {
    delegate: Arc<dyn CameraDelegate>,
    recording_active: AtomicBool,
    camera_active: AtomicBool,
    selected_config: Mutex<Option<RecordingConfig>>,
    active: Mutex<Option<ActiveStream>>,
}

impl RecordingManager {
    /// Create a manager around a delegate.
    ///
    /// Recording and the camera start enabled; no configuration is selected
    /// until the controller writes one.
    pub fn new(delegate: impl CameraDelegate) -> Arc<Self> {
        Arc::new(Self {
            delegate: Arc::new(delegate),
            recording_active: AtomicBool::new(true),
            camera_active: AtomicBool::new(true),
            selected_config: Mutex::new(None),
            active: Mutex::new(None),
        })
    }

    /// Register the `dataSend.open` handler with the server.
    pub fn register(self: &Arc<Self>, server: &HdsServer) -> HandlerId {
        let manager = self.clone();
        server.add_request_handler(
            Protocol::DataSend,
            Topic::Open,
            Arc::new(move |handle, message| {
                if let Message::Request { id, body, .. } = message {
                    manager.handle_open(handle, *id, body);
                }
                Ok(())
            }),
        )
    }

    /// Enable or disable recording.
    pub fn set_recording_active(&self, active: bool) {
        self.recording_active.store(active, Ordering::SeqCst);
    }

    /// Mark the camera as on or off.
    pub fn set_camera_active(&self, active: bool) {
        self.camera_active.store(active, Ordering::SeqCst);
    }

    /// Select or clear the recording configuration.
    pub fn set_selected_config(&self, config: Option<RecordingConfig>) {
        *self.selected_config.lock().unwrap_or_else(|e| e.into_inner()) = config;
    }

    /// True while a recording stream is active.
    pub fn is_streaming(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn handle_open(self: &Arc<Self>, handle: &ConnectionHandle, request_id: u64, body: &Value) {
        debug!(peer = %handle.peer_addr(), "received data send open request");

        let stream_id = body.get("streamId").and_then(Value::as_i64);
        let stream_type = body.get("type").and_then(Value::as_str);
        let target = body.get("target").and_then(Value::as_str);
        let reason = body.get("reason").and_then(Value::as_str);

        let (Some(stream_id), Some(stream_type), Some(target)) = (stream_id, stream_type, target)
        else {
            self.reject(handle, request_id, ProtocolSpecificErrorReason::UnexpectedFailure);
            return;
        };

        if target != TARGET_CONTROLLER || stream_type != STREAM_TYPE_RECORDING {
            warn!(peer = %handle.peer_addr(), target, stream_type,
                "data send open with unexpected target or type");
            self.reject(handle, request_id, ProtocolSpecificErrorReason::UnexpectedFailure);
            return;
        }
        if !self.recording_active.load(Ordering::SeqCst) {
            self.reject(handle, request_id, ProtocolSpecificErrorReason::NotAllowed);
            return;
        }
        if !self.camera_active.load(Ordering::SeqCst) {
            self.reject(handle, request_id, ProtocolSpecificErrorReason::NotAllowed);
            return;
        }

        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(stream) = active.as_ref() {
            warn!(peer = %handle.peer_addr(), active_stream_id = stream.stream_id,
                "rejecting data send open, another stream is recording");
            drop(active);
            self.reject(handle, request_id, ProtocolSpecificErrorReason::Busy);
            return;
        }
        if self
            .selected_config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
        {
            drop(active);
            self.reject(handle, request_id, ProtocolSpecificErrorReason::InvalidConfiguration);
            return;
        }

        debug!(peer = %handle.peer_addr(), stream_id, reason, "opening recording stream");
        let packets = self.delegate.handle_recording_stream(stream_id);
        let task = tokio::spawn(stream::run(
            handle.clone(),
            self.clone(),
            request_id,
            stream_id,
            packets,
        ));
        *active = Some(ActiveStream { stream_id, task });
    }

    fn reject(&self, handle: &ConnectionHandle, request_id: u64, reason: ProtocolSpecificErrorReason) {
        let body = Value::Dictionary(vec![(
            Value::from("status"),
            Value::Int(reason.as_u64() as i64),
        )]);
        let _ = handle.send_response(
            Protocol::DataSend,
            Topic::Open,
            request_id,
            HdsStatus::ProtocolSpecificError,
            body,
        );
    }

    /// Release the active stream if it matches `stream_id`, aborting the
    /// pump task unless the pump itself is the caller.
    pub(crate) fn release(&self, stream_id: i64, abort: bool) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(stream) = active.as_ref() {
            if stream.stream_id != stream_id {
                return;
            }
            let stream = active.take().unwrap_or_else(|| unreachable!("checked above"));
            if abort {
                stream.task.abort();
            }
            debug!(stream_id, "released recording stream");
        }
    }
}

pub use stream::PacketDataType;
