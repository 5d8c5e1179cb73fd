//! RTMP message types and parsing
//!
//! A [`RawMessage`] coming out of the chunk decoder is classified by type id:
//! - Protocol control (1-6): chunk size, abort, acks, bandwidth, user control
//! - Commands (17, 20): kept as raw AMF so the dispatcher can decode them
//!   with the parameter shape of the named command
//! - Data (15, 18): `@setDataFrame` / `onMetaData`
//! - Audio and video (8, 9)

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{Amf0Decoder, Amf0Encoder, AmfObject, AmfValue};
use crate::error::{AmfError, ProtocolError, Result};
use crate::protocol::chunk::RawMessage;
use crate::protocol::constants::*;

/// Parsed RTMP message
#[derive(Debug, Clone, PartialEq)]
pub enum RtmpMessage {
    /// Set Chunk Size (type 1)
    SetChunkSize(u32),

    /// Abort Message (type 2)
    Abort { csid: u32 },

    /// Acknowledgement (type 3)
    Acknowledgement { sequence: u32 },

    /// User Control Message (type 4)
    UserControl(UserControlEvent),

    /// Window Acknowledgement Size (type 5)
    WindowAckSize(u32),

    /// Set Peer Bandwidth (type 6)
    SetPeerBandwidth { size: u32, limit_type: u8 },

    /// Audio data (type 8)
    Audio { timestamp: u32, data: Bytes },

    /// Video data (type 9)
    Video { timestamp: u32, data: Bytes },

    /// Command (type 17 or 20). `payload` starts at the command name; the
    /// AMF3 format byte has already been stripped.
    Command { stream_id: u32, payload: Bytes },

    /// Data message (type 15 or 18)
    Data(DataMessage),

    /// Anything else, including aggregates
    Unknown { type_id: u8, data: Bytes },
}

/// User Control Event
#[derive(Debug, Clone, PartialEq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
    Unknown { event_type: u16, data: Bytes },
}

/// Outbound command (`_result`, `_error`, `onStatus`)
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    /// Command object (often null for responses)
    pub command_object: AmfValue,
    pub arguments: Vec<AmfValue>,
    /// Message stream ID the command is sent on
    pub stream_id: u32,
}

/// Data message (@setDataFrame, onMetaData, etc.)
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    /// Handler name (e.g., "@setDataFrame", "onMetaData")
    pub name: String,
    pub values: Vec<AmfValue>,
    pub stream_id: u32,
}

impl DataMessage {
    /// Metadata carried by `@setDataFrame onMetaData {..}` or `onMetaData {..}`
    pub fn metadata(&self) -> Option<&AmfObject> {
        let values = match self.name.as_str() {
            DATA_SET_DATA_FRAME => {
                if self.values.first()?.as_str()? != DATA_ON_METADATA {
                    return None;
                }
                &self.values[1..]
            }
            DATA_ON_METADATA => &self.values[..],
            _ => return None,
        };
        values.iter().find_map(|v| v.as_object())
    }

    /// `onMetaData` message as subscribers expect it
    pub fn on_metadata(metadata: &AmfObject, stream_id: u32) -> Self {
        DataMessage {
            name: DATA_ON_METADATA.to_string(),
            values: vec![AmfValue::EcmaArray(metadata.clone())],
            stream_id,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut encoder = Amf0Encoder::new();
        encoder.encode(&AmfValue::String(self.name.clone()));
        encoder.encode_all(&self.values);
        encoder.finish()
    }
}

impl RtmpMessage {
    /// Classify a reassembled message
    pub fn from_raw(raw: &RawMessage) -> Result<Self> {
        let mut payload = raw.payload.clone();

        match raw.message_type {
            MSG_SET_CHUNK_SIZE => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                // Top bit is reserved
                Ok(RtmpMessage::SetChunkSize(payload.get_u32() & 0x7FFF_FFFF))
            }

            MSG_ABORT => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                Ok(RtmpMessage::Abort { csid: payload.get_u32() })
            }

            MSG_ACKNOWLEDGEMENT => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                Ok(RtmpMessage::Acknowledgement { sequence: payload.get_u32() })
            }

            MSG_USER_CONTROL => Self::parse_user_control(&mut payload),

            MSG_WINDOW_ACK_SIZE => {
                if payload.len() < 4 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                Ok(RtmpMessage::WindowAckSize(payload.get_u32()))
            }

            MSG_SET_PEER_BANDWIDTH => {
                if payload.len() < 5 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                let size = payload.get_u32();
                let limit_type = payload.get_u8();
                Ok(RtmpMessage::SetPeerBandwidth { size, limit_type })
            }

            MSG_AUDIO => Ok(RtmpMessage::Audio {
                timestamp: raw.timestamp,
                data: payload,
            }),

            MSG_VIDEO => Ok(RtmpMessage::Video {
                timestamp: raw.timestamp,
                data: payload,
            }),

            MSG_COMMAND_AMF0 | MSG_COMMAND_AMF3 => {
                if raw.message_type == MSG_COMMAND_AMF3 && payload.first() == Some(&0x00) {
                    payload.advance(1);
                }
                Ok(RtmpMessage::Command {
                    stream_id: raw.stream_id,
                    payload,
                })
            }

            MSG_DATA_AMF0 | MSG_DATA_AMF3 => {
                if raw.message_type == MSG_DATA_AMF3 && payload.first() == Some(&0x00) {
                    payload.advance(1);
                }
                let data = Self::parse_data(&mut payload, raw.stream_id)?;
                Ok(RtmpMessage::Data(data))
            }

            _ => Ok(RtmpMessage::Unknown {
                type_id: raw.message_type,
                data: payload,
            }),
        }
    }

    fn parse_user_control(payload: &mut Bytes) -> Result<Self> {
        if payload.len() < 6 {
            return Err(ProtocolError::InvalidChunkHeader.into());
        }

        let event_type = payload.get_u16();
        let event = match event_type {
            UC_STREAM_BEGIN => UserControlEvent::StreamBegin(payload.get_u32()),
            UC_STREAM_EOF => UserControlEvent::StreamEof(payload.get_u32()),
            UC_STREAM_DRY => UserControlEvent::StreamDry(payload.get_u32()),
            UC_SET_BUFFER_LENGTH => {
                if payload.len() < 8 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                let stream_id = payload.get_u32();
                let buffer_ms = payload.get_u32();
                UserControlEvent::SetBufferLength { stream_id, buffer_ms }
            }
            UC_STREAM_IS_RECORDED => UserControlEvent::StreamIsRecorded(payload.get_u32()),
            UC_PING_REQUEST => UserControlEvent::PingRequest(payload.get_u32()),
            UC_PING_RESPONSE => UserControlEvent::PingResponse(payload.get_u32()),
            _ => UserControlEvent::Unknown {
                event_type,
                data: payload.clone(),
            },
        };

        Ok(RtmpMessage::UserControl(event))
    }

    fn parse_data(payload: &mut Bytes, stream_id: u32) -> Result<DataMessage> {
        let mut decoder = Amf0Decoder::new();

        let name = match decoder.decode(payload)? {
            AmfValue::String(s) => s,
            _ => String::new(),
        };

        let mut values = Vec::new();
        while payload.has_remaining() {
            match decoder.decode(payload) {
                Ok(v) => values.push(v),
                Err(AmfError::UnexpectedEof) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(DataMessage { name, values, stream_id })
    }

    /// Encode to a message type id and payload
    pub fn encode(&self) -> (u8, Bytes) {
        match self {
            RtmpMessage::SetChunkSize(size) => (MSG_SET_CHUNK_SIZE, u32_payload(*size)),
            RtmpMessage::Abort { csid } => (MSG_ABORT, u32_payload(*csid)),
            RtmpMessage::Acknowledgement { sequence } => {
                (MSG_ACKNOWLEDGEMENT, u32_payload(*sequence))
            }
            RtmpMessage::WindowAckSize(size) => (MSG_WINDOW_ACK_SIZE, u32_payload(*size)),

            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u32(*size);
                buf.put_u8(*limit_type);
                (MSG_SET_PEER_BANDWIDTH, buf.freeze())
            }

            RtmpMessage::UserControl(event) => {
                let mut buf = BytesMut::with_capacity(10);
                match event {
                    UserControlEvent::StreamBegin(id) => {
                        buf.put_u16(UC_STREAM_BEGIN);
                        buf.put_u32(*id);
                    }
                    UserControlEvent::StreamEof(id) => {
                        buf.put_u16(UC_STREAM_EOF);
                        buf.put_u32(*id);
                    }
                    UserControlEvent::StreamDry(id) => {
                        buf.put_u16(UC_STREAM_DRY);
                        buf.put_u32(*id);
                    }
                    UserControlEvent::SetBufferLength { stream_id, buffer_ms } => {
                        buf.put_u16(UC_SET_BUFFER_LENGTH);
                        buf.put_u32(*stream_id);
                        buf.put_u32(*buffer_ms);
                    }
                    UserControlEvent::StreamIsRecorded(id) => {
                        buf.put_u16(UC_STREAM_IS_RECORDED);
                        buf.put_u32(*id);
                    }
                    UserControlEvent::PingRequest(ts) => {
                        buf.put_u16(UC_PING_REQUEST);
                        buf.put_u32(*ts);
                    }
                    UserControlEvent::PingResponse(ts) => {
                        buf.put_u16(UC_PING_RESPONSE);
                        buf.put_u32(*ts);
                    }
                    UserControlEvent::Unknown { event_type, data } => {
                        buf.put_u16(*event_type);
                        buf.put_slice(data);
                    }
                }
                (MSG_USER_CONTROL, buf.freeze())
            }

            RtmpMessage::Audio { data, .. } => (MSG_AUDIO, data.clone()),
            RtmpMessage::Video { data, .. } => (MSG_VIDEO, data.clone()),
            RtmpMessage::Command { payload, .. } => (MSG_COMMAND_AMF0, payload.clone()),
            RtmpMessage::Data(data) => (MSG_DATA_AMF0, data.encode()),
            RtmpMessage::Unknown { type_id, data } => (*type_id, data.clone()),
        }
    }
}

fn u32_payload(value: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(value);
    buf.freeze()
}

/// Build common response messages
impl Command {
    /// Create a _result response
    pub fn result(transaction_id: f64, properties: AmfValue, info: AmfValue) -> Self {
        Command {
            name: CMD_RESULT.to_string(),
            transaction_id,
            command_object: properties,
            arguments: vec![info],
            stream_id: 0,
        }
    }

    /// Create an _error response
    pub fn error(transaction_id: f64, properties: AmfValue, info: AmfValue) -> Self {
        Command {
            name: CMD_ERROR.to_string(),
            transaction_id,
            command_object: properties,
            arguments: vec![info],
            stream_id: 0,
        }
    }

    /// Create an onStatus response
    pub fn on_status(stream_id: u32, level: &str, code: &str, description: &str) -> Self {
        let info = AmfValue::object([
            ("level", AmfValue::from(level)),
            ("code", AmfValue::from(code)),
            ("description", AmfValue::from(description)),
        ]);

        Command {
            name: CMD_ON_STATUS.to_string(),
            transaction_id: 0.0,
            command_object: AmfValue::Null,
            arguments: vec![info],
            stream_id,
        }
    }

    /// AMF0 payload
    pub fn encode(&self) -> Bytes {
        let mut encoder = Amf0Encoder::new();
        encoder.encode(&AmfValue::String(self.name.clone()));
        encoder.encode(&AmfValue::Number(self.transaction_id));
        encoder.encode(&self.command_object);
        encoder.encode_all(&self.arguments);
        encoder.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::amf0;

    fn raw(message_type: u8, payload: Bytes) -> RawMessage {
        RawMessage {
            csid: CSID_COMMAND,
            timestamp: 40,
            message_type,
            stream_id: 1,
            payload,
        }
    }

    #[test]
    fn test_control_messages() {
        let msg = RtmpMessage::from_raw(&raw(MSG_SET_CHUNK_SIZE, u32_payload(0x8000_1000))).unwrap();
        assert_eq!(msg, RtmpMessage::SetChunkSize(0x1000));

        let (type_id, payload) = RtmpMessage::SetPeerBandwidth {
            size: DEFAULT_PEER_BANDWIDTH,
            limit_type: BANDWIDTH_LIMIT_DYNAMIC,
        }
        .encode();
        assert_eq!(type_id, MSG_SET_PEER_BANDWIDTH);
        assert_eq!(&payload[..], &[0x00, 0x26, 0x25, 0xA0, 0x02]);

        assert!(RtmpMessage::from_raw(&raw(MSG_WINDOW_ACK_SIZE, Bytes::from_static(&[0, 1]))).is_err());
    }

    #[test]
    fn test_user_control() {
        let (type_id, payload) = RtmpMessage::UserControl(UserControlEvent::PingRequest(77)).encode();
        let msg = RtmpMessage::from_raw(&raw(type_id, payload)).unwrap();
        assert_eq!(msg, RtmpMessage::UserControl(UserControlEvent::PingRequest(77)));

        let (_, payload) = RtmpMessage::UserControl(UserControlEvent::SetBufferLength {
            stream_id: 1,
            buffer_ms: 3000,
        })
        .encode();
        assert_eq!(payload.len(), 10);
    }

    #[test]
    fn test_amf3_command_marker_stripped() {
        let body = amf0::encode_all(&[AmfValue::from("play"), AmfValue::Number(4.0)]);
        let mut payload = BytesMut::new();
        payload.put_u8(0x00);
        payload.put_slice(&body);

        let msg = RtmpMessage::from_raw(&raw(MSG_COMMAND_AMF3, payload.freeze())).unwrap();
        assert_eq!(msg, RtmpMessage::Command { stream_id: 1, payload: body });
    }

    #[test]
    fn test_set_data_frame_metadata() {
        let mut meta = AmfObject::new();
        meta.insert("width".into(), AmfValue::Number(1280.0));
        let payload = amf0::encode_all(&[
            AmfValue::from(DATA_SET_DATA_FRAME),
            AmfValue::from(DATA_ON_METADATA),
            AmfValue::EcmaArray(meta.clone()),
        ]);

        let RtmpMessage::Data(data) = RtmpMessage::from_raw(&raw(MSG_DATA_AMF0, payload)).unwrap() else {
            panic!("expected data message");
        };
        assert_eq!(data.metadata(), Some(&meta));

        let forwarded = DataMessage::on_metadata(&meta, 1);
        let values = amf0::decode_all(&forwarded.encode()).unwrap();
        assert_eq!(values[0], AmfValue::from(DATA_ON_METADATA));
        assert_eq!(values[1].get_number("width"), Some(1280.0));
    }

    #[test]
    fn test_on_status_encoding() {
        let cmd = Command::on_status(1, "status", NS_PUBLISH_START, "live/demo is now published");
        let values = amf0::decode_all(&cmd.encode()).unwrap();
        assert_eq!(values[0], AmfValue::from(CMD_ON_STATUS));
        assert_eq!(values[1], AmfValue::Number(0.0));
        assert_eq!(values[2], AmfValue::Null);
        assert_eq!(values[3].get_string("code"), Some(NS_PUBLISH_START));
    }
}
