//! The recording stream pump: fragments delegate packets into
//! `dataSend.data` events.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::{DATA_SEND_CHUNK_SIZE, HdsStatus, Protocol, Topic};
use crate::opack::Value;
use crate::server::ConnectionHandle;
use crate::session::ProtocolHandler;

use super::{RecordingManager, RecordingPacket};

/// The `dataType` labels carried in chunk metadata.
pub struct PacketDataType;

impl PacketDataType {
    /// First packet of a stream: container initialization data.
    pub const MEDIA_INITIALIZATION: &'static str = "mediaInitialization";
    /// Every following packet: a media fragment.
    pub const MEDIA_FRAGMENT: &'static str = "mediaFragment";
}

/// Drive one recording stream to completion.
///
/// Sends the open response, registers the per-connection `close`/`ack`
/// handlers, then fragments every delegate packet into chunks of at most
/// [`DATA_SEND_CHUNK_SIZE`] bytes. Terminates after the packet marked
/// `last`, when the delegate hangs up, or when the connection goes away.
pub(crate) async fn run(
    handle: ConnectionHandle,
    manager: Arc<RecordingManager>,
    request_id: u64,
    stream_id: i64,
    mut packets: mpsc::Receiver<RecordingPacket>,
) {
    // Controller-sent close tears the stream down; acks are accepted
    // silently.
    let close_manager = manager.clone();
    let close_handle = handle.clone();
    let registration = handle
        .add_protocol_handler(
            Protocol::DataSend,
            ProtocolHandler::new()
                .on_event(Topic::Close, move |body| {
                    debug!(stream_id = ?body.get("streamId"), "controller closed recording stream");
                    close_manager.release(stream_id, true);
                    close_handle.remove_protocol_handler(Protocol::DataSend);
                    Ok(())
                })
                .on_event(Topic::Ack, move |body| {
                    debug!(stream_id = ?body.get("streamId"), "controller acknowledged data");
                    Ok(())
                }),
        )
        .await;
    if let Err(e) = registration {
        warn!(stream_id, error = %e, "could not register stream handlers");
    }

    // If the connection dies mid-stream, drop the generator right away.
    let drop_manager = manager.clone();
    handle.add_close_handler(move || drop_manager.release(stream_id, true));

    debug!(peer = %handle.peer_addr(), stream_id, "sending data send open response");
    let ok = handle.send_response(
        Protocol::DataSend,
        Topic::Open,
        request_id,
        HdsStatus::Success,
        Value::Dictionary(vec![(
            Value::from("status"),
            Value::Int(HdsStatus::Success.as_u64() as i64),
        )]),
    );
    if ok.is_err() {
        manager.release(stream_id, false);
        return;
    }

    let mut initializing = true;
    let mut data_sequence: i64 = 1;

    'stream: while let Some(packet) = packets.recv().await {
        let fragment = packet.data;
        let mut offset = 0;
        let mut chunk_sequence: i64 = 1;

        while offset < fragment.len() {
            let end = usize::min(offset + DATA_SEND_CHUNK_SIZE, fragment.len());
            let chunk = &fragment[offset..end];
            offset = end;
            let last_chunk = offset >= fragment.len();

            let data_type = if initializing {
                PacketDataType::MEDIA_INITIALIZATION
            } else {
                PacketDataType::MEDIA_FRAGMENT
            };
            let total_size = if chunk_sequence == 1 {
                Value::Int(fragment.len() as i64)
            } else {
                Value::Null
            };
            let end_of_stream = if last_chunk && packet.last {
                Value::Bool(true)
            } else {
                Value::Null
            };

            let metadata = Value::Dictionary(vec![
                (Value::from("dataType"), Value::from(data_type)),
                (Value::from("dataSequenceNumber"), Value::Int(data_sequence)),
                (Value::from("dataChunkSequenceNumber"), Value::Int(chunk_sequence)),
                (Value::from("isLastDataChunk"), Value::Bool(last_chunk)),
                (Value::from("dataTotalSize"), total_size),
            ]);
            let event = Value::Dictionary(vec![
                (Value::from("streamId"), Value::Int(stream_id)),
                (
                    Value::from("packets"),
                    Value::Array(vec![Value::Dictionary(vec![
                        (Value::from("data"), Value::Bytes(chunk.to_vec())),
                        (Value::from("metadata"), metadata),
                    ])]),
                ),
                (Value::from("endOfStream"), end_of_stream),
            ]);

            debug!(stream_id, data_sequence, chunk_sequence, len = chunk.len(),
                "sending data send data event");
            if handle
                .send_event(Protocol::DataSend, Topic::Data, event)
                .is_err()
            {
                // Connection is gone; release the generator promptly.
                break 'stream;
            }

            chunk_sequence += 1;
            initializing = false;
        }

        if packet.last {
            break;
        }
        data_sequence += 1;
    }

    manager.release(stream_id, false);
    handle.remove_protocol_handler(Protocol::DataSend);
}
