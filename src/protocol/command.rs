//! Command decoding
//!
//! A command payload is `name, transaction id, params...` in AMF. Each known
//! command registers how many parameters it takes and a function turning
//! them into an [`RtmpCommand`]. The dispatcher reads exactly that many
//! values; parameters missing from the end of the payload are simply absent,
//! and the decode function falls back to defaults.
//!
//! Unknown command names decode to `None` so newer clients can send
//! commands this server has never heard of.

use bytes::Bytes;
use std::collections::HashMap;
use tracing::trace;

use crate::amf::{Amf0Decoder, AmfObject, AmfValue};
use crate::error::{AmfError, ProtocolError, Result};
use crate::protocol::constants::*;

/// Connect command parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectParams {
    /// Application name
    pub app: String,
    pub flash_ver: Option<String>,
    pub swf_url: Option<String>,
    /// Full RTMP URL
    pub tc_url: Option<String>,
    pub page_url: Option<String>,
    /// AMF version the client wants responses in
    pub object_encoding: f64,
    /// Properties we don't interpret
    pub extra: AmfObject,
    /// Optional object after the command object
    pub arguments: Option<AmfObject>,
}

impl ConnectParams {
    /// Parse from the AMF command object
    pub fn from_amf(obj: &AmfValue) -> Self {
        let mut params = ConnectParams::default();

        if let Some(map) = obj.as_object() {
            for (key, value) in map {
                match key.as_str() {
                    "app" => {
                        if let Some(s) = value.as_str() {
                            params.app = s.to_string();
                        }
                    }
                    "flashVer" | "flashver" => params.flash_ver = value.as_str().map(str::to_string),
                    "swfUrl" | "swfurl" => params.swf_url = value.as_str().map(str::to_string),
                    "tcUrl" | "tcurl" => params.tc_url = value.as_str().map(str::to_string),
                    "pageUrl" | "pageurl" => params.page_url = value.as_str().map(str::to_string),
                    "objectEncoding" | "objectencoding" => {
                        params.object_encoding = value.as_number().unwrap_or(0.0);
                    }
                    _ => {
                        params.extra.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        // Some encoders append the instance to the app ("live/instance")
        // and put the query string there too
        if let Some(idx) = params.app.find('?') {
            params.app.truncate(idx);
        }

        params
    }
}

/// Publish command parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishParams {
    /// Stream name, possibly followed by `?query`
    pub stream_name: String,
    /// "live", "record" or "append"
    pub publish_type: String,
}

/// Play command parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PlayParams {
    /// Stream name, possibly followed by `?query`
    pub stream_name: String,
    /// -2 = live or recorded, -1 = live only, >= 0 = offset
    pub start: f64,
    /// -1 = until the end
    pub duration: f64,
    pub reset: bool,
}

impl Default for PlayParams {
    fn default() -> Self {
        Self {
            stream_name: String::new(),
            start: -2.0,
            duration: -1.0,
            reset: true,
        }
    }
}

/// A decoded command, one variant per command the server understands
#[derive(Debug, Clone, PartialEq)]
pub enum RtmpCommand {
    Connect(ConnectParams),
    CreateStream,
    Publish(PublishParams),
    Play(PlayParams),
    CloseStream,
    /// Stream id named in the parameters, not the message stream id
    DeleteStream { stream_id: u32 },
    Pause { pause: bool, milliseconds: f64 },
    ReceiveAudio(bool),
    ReceiveVideo(bool),
    ReleaseStream { stream_name: String },
    FcPublish { stream_name: String },
    FcUnpublish { stream_name: String },
}

/// A command together with its envelope
#[derive(Debug, Clone, PartialEq)]
pub struct CommandCall {
    pub name: String,
    pub transaction_id: f64,
    /// Message stream id the command arrived on
    pub stream_id: u32,
    pub command: RtmpCommand,
}

type DecodeFn = fn(&[AmfValue]) -> RtmpCommand;

struct CommandShape {
    /// Parameters after the transaction id, command object included
    arity: usize,
    decode: DecodeFn,
}

/// Name-to-decoder table for command messages
pub struct CommandDispatcher {
    commands: HashMap<&'static str, CommandShape>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        let mut dispatcher = Self {
            commands: HashMap::new(),
        };
        dispatcher.register(CMD_CONNECT, 2, decode_connect);
        dispatcher.register(CMD_CREATE_STREAM, 1, |_| RtmpCommand::CreateStream);
        dispatcher.register(CMD_PUBLISH, 3, decode_publish);
        dispatcher.register(CMD_PLAY, 5, decode_play);
        dispatcher.register(CMD_CLOSE_STREAM, 1, |_| RtmpCommand::CloseStream);
        dispatcher.register(CMD_DELETE_STREAM, 2, |params| RtmpCommand::DeleteStream {
            stream_id: number_at(params, 1).unwrap_or(0.0) as u32,
        });
        dispatcher.register(CMD_PAUSE, 3, |params| RtmpCommand::Pause {
            pause: bool_at(params, 1).unwrap_or(false),
            milliseconds: number_at(params, 2).unwrap_or(0.0),
        });
        dispatcher.register(CMD_RECEIVE_AUDIO, 2, |params| {
            RtmpCommand::ReceiveAudio(bool_at(params, 1).unwrap_or(true))
        });
        dispatcher.register(CMD_RECEIVE_VIDEO, 2, |params| {
            RtmpCommand::ReceiveVideo(bool_at(params, 1).unwrap_or(true))
        });
        dispatcher.register(CMD_RELEASE_STREAM, 2, |params| RtmpCommand::ReleaseStream {
            stream_name: string_at(params, 1),
        });
        dispatcher.register(CMD_FC_PUBLISH, 2, |params| RtmpCommand::FcPublish {
            stream_name: string_at(params, 1),
        });
        dispatcher.register(CMD_FC_UNPUBLISH, 2, |params| RtmpCommand::FcUnpublish {
            stream_name: string_at(params, 1),
        });
        dispatcher
    }

    fn register(&mut self, name: &'static str, arity: usize, decode: DecodeFn) {
        self.commands.insert(name, CommandShape { arity, decode });
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Decode a command payload (AMF3 format byte already stripped)
    ///
    /// Returns `Ok(None)` for commands without a registered decoder.
    pub fn decode(&self, stream_id: u32, payload: &Bytes) -> Result<Option<CommandCall>> {
        let mut buf = payload.clone();
        let mut decoder = Amf0Decoder::new();

        let name = match decoder.decode(&mut buf)? {
            AmfValue::String(s) => s,
            other => {
                return Err(
                    ProtocolError::InvalidCommand(format!("expected command name, got {:?}", other))
                        .into(),
                )
            }
        };

        let shape = match self.commands.get(name.as_str()) {
            Some(shape) => shape,
            None => {
                trace!(command = %name, "Ignoring unknown command");
                return Ok(None);
            }
        };

        let transaction_id = match decoder.decode(&mut buf) {
            Ok(value) => value.as_number().unwrap_or(0.0),
            Err(AmfError::UnexpectedEof) => 0.0,
            Err(e) => return Err(e.into()),
        };

        let mut params = Vec::with_capacity(shape.arity);
        while params.len() < shape.arity {
            match decoder.decode(&mut buf) {
                Ok(value) => params.push(value),
                Err(AmfError::UnexpectedEof) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Some(CommandCall {
            name,
            transaction_id,
            stream_id,
            command: (shape.decode)(&params),
        }))
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_connect(params: &[AmfValue]) -> RtmpCommand {
    let mut connect = params
        .first()
        .map(ConnectParams::from_amf)
        .unwrap_or_default();
    connect.arguments = params.get(1).and_then(|v| v.as_object()).cloned();
    RtmpCommand::Connect(connect)
}

fn decode_publish(params: &[AmfValue]) -> RtmpCommand {
    RtmpCommand::Publish(PublishParams {
        stream_name: string_at(params, 1),
        publish_type: params
            .get(2)
            .and_then(|v| v.as_str())
            .unwrap_or("live")
            .to_string(),
    })
}

fn decode_play(params: &[AmfValue]) -> RtmpCommand {
    let defaults = PlayParams::default();
    RtmpCommand::Play(PlayParams {
        stream_name: string_at(params, 1),
        start: number_at(params, 2).unwrap_or(defaults.start),
        duration: number_at(params, 3).unwrap_or(defaults.duration),
        reset: bool_at(params, 4).unwrap_or(defaults.reset),
    })
}

fn string_at(params: &[AmfValue], index: usize) -> String {
    params
        .get(index)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn number_at(params: &[AmfValue], index: usize) -> Option<f64> {
    params.get(index)?.as_number()
}

fn bool_at(params: &[AmfValue], index: usize) -> Option<bool> {
    match params.get(index)? {
        AmfValue::Boolean(b) => Some(*b),
        // Some players send 0/1
        AmfValue::Number(n) => Some(*n != 0.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::amf0;

    fn payload(values: &[AmfValue]) -> Bytes {
        amf0::encode_all(values)
    }

    #[test]
    fn test_connect() {
        let body = payload(&[
            AmfValue::from("connect"),
            AmfValue::Number(1.0),
            AmfValue::object([
                ("app", AmfValue::from("live")),
                ("tcUrl", AmfValue::from("rtmp://localhost/live")),
                ("objectEncoding", AmfValue::Number(3.0)),
                ("fpad", AmfValue::Boolean(false)),
            ]),
        ]);

        let call = CommandDispatcher::new().decode(0, &body).unwrap().unwrap();
        assert_eq!(call.name, "connect");
        assert_eq!(call.transaction_id, 1.0);
        let RtmpCommand::Connect(params) = call.command else {
            panic!("expected connect");
        };
        assert_eq!(params.app, "live");
        assert_eq!(params.tc_url.as_deref(), Some("rtmp://localhost/live"));
        assert_eq!(params.object_encoding, 3.0);
        assert!(params.extra.contains_key("fpad"));
        assert_eq!(params.arguments, None);
    }

    #[test]
    fn test_publish_and_play() {
        let dispatcher = CommandDispatcher::new();

        let body = payload(&[
            AmfValue::from("publish"),
            AmfValue::Number(5.0),
            AmfValue::Null,
            AmfValue::from("demo?token=abc"),
            AmfValue::from("live"),
        ]);
        let call = dispatcher.decode(1, &body).unwrap().unwrap();
        assert_eq!(call.stream_id, 1);
        assert_eq!(
            call.command,
            RtmpCommand::Publish(PublishParams {
                stream_name: "demo?token=abc".into(),
                publish_type: "live".into(),
            })
        );

        let body = payload(&[
            AmfValue::from("play"),
            AmfValue::Number(0.0),
            AmfValue::Null,
            AmfValue::from("demo"),
            AmfValue::Number(-1.0),
        ]);
        let RtmpCommand::Play(play) = dispatcher.decode(1, &body).unwrap().unwrap().command else {
            panic!("expected play");
        };
        assert_eq!(play.stream_name, "demo");
        assert_eq!(play.start, -1.0);
        // Missing trailing parameters fall back to defaults
        assert_eq!(play.duration, -1.0);
        assert!(play.reset);
    }

    #[test]
    fn test_reads_only_declared_arity() {
        let body = payload(&[
            AmfValue::from("receiveVideo"),
            AmfValue::Number(0.0),
            AmfValue::Null,
            AmfValue::Boolean(false),
            AmfValue::from("trailing junk"),
        ]);
        let call = CommandDispatcher::new().decode(1, &body).unwrap().unwrap();
        assert_eq!(call.command, RtmpCommand::ReceiveVideo(false));
    }

    #[test]
    fn test_truncated_params_tolerated() {
        let body = payload(&[AmfValue::from("deleteStream"), AmfValue::Number(6.0)]);
        let call = CommandDispatcher::new().decode(0, &body).unwrap().unwrap();
        assert_eq!(call.command, RtmpCommand::DeleteStream { stream_id: 0 });
    }

    #[test]
    fn test_unknown_command_is_ignored() {
        let body = payload(&[
            AmfValue::from("getStreamLength"),
            AmfValue::Number(3.0),
            AmfValue::Null,
        ]);
        let dispatcher = CommandDispatcher::new();
        assert!(!dispatcher.is_known("getStreamLength"));
        assert_eq!(dispatcher.decode(0, &body).unwrap(), None);
    }

    #[test]
    fn test_non_string_name_is_error() {
        let body = payload(&[AmfValue::Number(1.0)]);
        assert!(CommandDispatcher::new().decode(0, &body).is_err());
    }
}
