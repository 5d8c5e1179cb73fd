//! Per-connection RTMP session loop
//!
//! Manages the lifecycle of a single RTMP connection:
//! 1. Handshake
//! 2. Connect command
//! 3. Stream commands (publish/play)
//! 4. Media handling
//! 5. Disconnect
//!
//! The read side runs here, one message at a time. Everything the session
//! sends goes through its outbound queue to a separate writer task, so a
//! slow socket never blocks a publisher fanning media out to it.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::amf::AmfValue;
use crate::error::{Error, ProtocolError, RegistryError, Result};
use crate::media::MediaKind;
use crate::protocol::chunk::{ChunkDecoder, RawMessage};
use crate::protocol::command::{CommandCall, ConnectParams, PlayParams, PublishParams, RtmpCommand};
use crate::protocol::constants::*;
use crate::protocol::control::ProtocolControl;
use crate::protocol::handshake::Handshake;
use crate::protocol::message::{Command, DataMessage, RtmpMessage, UserControlEvent};
use crate::registry::{PublishRequest, StreamPath, SubscribeRequest};
use crate::server::config::ServerConfig;
use crate::server::handler::{AuthResult, PublishAuth, RtmpHandler};
use crate::server::listener::Shared;
use crate::server::writer::Writer;
use crate::session::outbound::{OutboundMessage, OutboundQueue, OutboundReceiver};
use crate::session::{Activity, SessionContext, SessionPhase, SessionState, StreamMode};

/// Per-connection handler
pub(crate) struct Connection<H: RtmpHandler> {
    /// Session state
    state: SessionState,

    /// Session context for callbacks
    context: SessionContext,

    reader: BufReader<OwnedReadHalf>,

    /// Handed to the writer task once the handshake is done
    write_half: Option<OwnedWriteHalf>,

    /// Read buffer
    read_buf: BytesMut,

    decoder: ChunkDecoder,
    control: ProtocolControl,

    /// Everything this session sends
    queue: OutboundQueue,
    outbound_rx: Option<OutboundReceiver>,

    /// Traffic in either direction keeps the session alive
    activity: Activity,

    config: ServerConfig,
    handler: Arc<H>,
    shared: Arc<Shared>,
}

impl<H: RtmpHandler> Connection<H> {
    pub fn new(
        session_id: u64,
        socket: TcpStream,
        peer_addr: SocketAddr,
        config: ServerConfig,
        handler: Arc<H>,
        shared: Arc<Shared>,
    ) -> Self {
        let (read_half, write_half) = socket.into_split();
        let (queue, outbound_rx) = OutboundQueue::new();

        let mut decoder = ChunkDecoder::new();
        decoder.set_max_message_size(config.max_message_size);

        Self {
            state: SessionState::new(session_id, peer_addr),
            context: SessionContext::new(session_id, peer_addr),
            reader: BufReader::with_capacity(config.read_buffer_size, read_half),
            write_half: Some(write_half),
            read_buf: BytesMut::with_capacity(config.read_buffer_size),
            decoder,
            control: ProtocolControl::new(config.max_chunk_size),
            queue,
            outbound_rx: Some(outbound_rx),
            activity: Activity::new(),
            config,
            handler,
            shared,
        }
    }

    /// Run the connection to completion
    pub async fn run(mut self) -> Result<()> {
        // Check if handler allows connection
        if !self.handler.on_connection(&self.context).await {
            return Err(Error::Rejected("Connection rejected by handler".into()));
        }
        self.shared.events.client_connected(&self.context);

        let result = match self.do_handshake().await {
            Ok(()) => self.serve().await,
            Err(e) => Err(e),
        };

        self.cleanup_on_disconnect();
        self.shared.events.client_disconnected(&self.context);
        self.handler.on_disconnect(&self.context).await;

        tracing::debug!(
            session_id = self.state.id,
            bytes_received = self.state.stats.bytes_received,
            bytes_sent = self.state.stats.bytes_sent,
            messages = self.state.stats.messages_received,
            "Session finished"
        );
        result
    }

    /// Perform RTMP handshake
    async fn do_handshake(&mut self) -> Result<()> {
        let mut handshake = Handshake::new();
        let connection_timeout = self.config.connection_timeout;

        let Self {
            reader,
            write_half,
            read_buf,
            state,
            ..
        } = self;
        let writer = write_half.as_mut().ok_or(Error::ConnectionClosed)?;

        timeout(connection_timeout, async {
            loop {
                if handshake.is_done() {
                    break;
                }
                if read_buf.len() < handshake.bytes_needed() {
                    let n = reader.read_buf(read_buf).await?;
                    if n == 0 {
                        return Err(Error::ConnectionClosed);
                    }
                    state.stats.bytes_received += n as u64;
                }

                if let Some(response) = handshake.process(read_buf)? {
                    writer.write_all(&response).await?;
                    writer.flush().await?;
                    state.stats.bytes_sent += response.len() as u64;
                }
            }
            Ok::<_, Error>(())
        })
        .await
        .map_err(|_| Error::Timeout)??;

        self.state.complete_handshake();
        self.activity.touch();
        tracing::debug!(
            session_id = self.state.id,
            schema = ?handshake.schema(),
            "Handshake complete"
        );
        self.shared.events.handshake_complete(&self.context);
        Ok(())
    }

    /// Main message loop, running alongside the writer task
    async fn serve(&mut self) -> Result<()> {
        let (write_half, rx) = match (self.write_half.take(), self.outbound_rx.take()) {
            (Some(w), Some(rx)) => (w, rx),
            _ => return Err(Error::ConnectionClosed),
        };
        let (stop_writer, shutdown) = oneshot::channel();
        let mut writer: JoinHandle<Result<u64>> = tokio::spawn(
            Writer::new(write_half, self.config.write_buffer_size)
                .with_activity(self.activity.clone())
                .run(rx, shutdown),
        );

        // Switch our outbound chunk size; the writer follows once it is sent
        self.queue
            .send_control(&RtmpMessage::SetChunkSize(self.config.chunk_size));
        self.state.out_chunk_size = self.config.chunk_size;

        let mut writer_done = false;
        let result = loop {
            tokio::select! {
                read = self.read_and_process() => match read {
                    Ok(true) => continue,
                    Ok(false) => break Ok(()),
                    Err(e) => {
                        tracing::debug!(session_id = self.state.id, error = %e, "Processing error");
                        break Err(e);
                    }
                },
                written = &mut writer => {
                    writer_done = true;
                    break match written {
                        Ok(Ok(bytes)) => {
                            self.state.stats.bytes_sent += bytes;
                            Ok(())
                        }
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(Error::ConnectionClosed),
                    };
                }
            }
        };

        if !writer_done {
            // Flush whatever is queued (a final `_error` or status) and stop
            let _ = stop_writer.send(());
            match timeout(self.config.connection_timeout, &mut writer).await {
                Ok(Ok(Ok(bytes))) => self.state.stats.bytes_sent += bytes,
                Ok(_) => {}
                Err(_) => writer.abort(),
            }
        }
        result
    }

    /// Wait for inbound bytes, giving up once neither direction has seen
    /// traffic for the idle timeout. Only the socket read is timed, so a
    /// message is never abandoned halfway through its handling.
    async fn read_until_idle(&mut self) -> Result<usize> {
        loop {
            let remaining = self
                .config
                .idle_timeout
                .saturating_sub(self.activity.idle_for());
            if remaining.is_zero() {
                tracing::debug!(session_id = self.state.id, "Idle timeout");
                return Err(Error::Timeout);
            }
            // Outbound traffic may have moved the deadline; re-check when this expires
            if let Ok(read) = timeout(remaining, self.reader.read_buf(&mut self.read_buf)).await {
                return Ok(read?);
            }
        }
    }

    /// Read data and process messages
    ///
    /// Returns false once the peer has closed the connection.
    async fn read_and_process(&mut self) -> Result<bool> {
        // Bytes that arrived with C2 may already hold complete messages
        while let Some(raw) = self.decoder.decode(&mut self.read_buf)? {
            self.handle_message(raw).await?;
        }

        let n = self.read_until_idle().await?;
        if n == 0 {
            return Ok(false);
        }
        self.activity.touch();
        self.state.stats.bytes_received += n as u64;

        while let Some(raw) = self.decoder.decode(&mut self.read_buf)? {
            self.handle_message(raw).await?;
        }

        if let Some(sequence) = self.control.acks_mut().on_bytes(n) {
            self.queue
                .send_control(&RtmpMessage::Acknowledgement { sequence });
        }

        Ok(true)
    }

    /// Route one reassembled message
    async fn handle_message(&mut self, raw: RawMessage) -> Result<()> {
        self.state.stats.messages_received += 1;
        let message = RtmpMessage::from_raw(&raw)?;

        match message {
            RtmpMessage::SetChunkSize(_)
            | RtmpMessage::Abort { .. }
            | RtmpMessage::Acknowledgement { .. }
            | RtmpMessage::WindowAckSize(_)
            | RtmpMessage::SetPeerBandwidth { .. }
            | RtmpMessage::UserControl(_) => {
                if let Some(reply) = self.control.handle(&message, &mut self.decoder)? {
                    self.queue.send_control(&reply);
                }
                self.state.in_chunk_size = self.decoder.chunk_size();
                self.state.in_window_ack_size = self.control.acks().window();
            }

            RtmpMessage::Command { stream_id, payload } => {
                match self.shared.commands.decode(stream_id, &payload)? {
                    Some(call) => self.handle_command(call).await?,
                    None => tracing::trace!(session_id = self.state.id, "Unknown command ignored"),
                }
            }

            RtmpMessage::Data(data) => self.handle_data(data),

            RtmpMessage::Audio { timestamp, data } => {
                self.handle_media(MediaKind::Audio, raw.stream_id, timestamp, &data)
            }

            RtmpMessage::Video { timestamp, data } => {
                self.handle_media(MediaKind::Video, raw.stream_id, timestamp, &data)
            }

            RtmpMessage::Unknown { type_id, .. } => {
                tracing::trace!(session_id = self.state.id, type_id, "Unhandled message");
            }
        }

        Ok(())
    }

    /// Handle a decoded command
    async fn handle_command(&mut self, call: CommandCall) -> Result<()> {
        tracing::trace!(session_id = self.state.id, command = %call.name, "Command");

        let CommandCall {
            transaction_id,
            stream_id,
            command,
            name,
        } = call;

        if !self.state.is_connected() && !matches!(command, RtmpCommand::Connect(_)) {
            return Err(ProtocolError::UnexpectedMessage(format!("{} before connect", name)).into());
        }

        match command {
            RtmpCommand::Connect(params) => self.handle_connect(transaction_id, params).await?,
            RtmpCommand::CreateStream => self.handle_create_stream(transaction_id),
            RtmpCommand::Publish(params) => self.handle_publish(stream_id, params).await,
            RtmpCommand::Play(params) => self.handle_play(stream_id, params).await,
            RtmpCommand::CloseStream => {
                let mode = self.state.take_mode(stream_id);
                self.stop_stream(stream_id, mode, true);
            }
            RtmpCommand::DeleteStream { stream_id: target } => {
                if let Some(mode) = self.state.remove_stream(target) {
                    self.stop_stream(target, mode, true);
                }
            }
            RtmpCommand::Pause { pause, milliseconds } => {
                self.handle_pause(stream_id, pause, milliseconds)
            }
            RtmpCommand::ReceiveAudio(enabled) => {
                if let Some(subscriber) = self.state.playing(stream_id) {
                    subscriber.set_receive_audio(enabled);
                }
            }
            RtmpCommand::ReceiveVideo(enabled) => {
                if let Some(subscriber) = self.state.playing(stream_id) {
                    subscriber.set_receive_video(enabled);
                }
            }
            RtmpCommand::ReleaseStream { stream_name } => {
                tracing::debug!(session_id = self.state.id, stream = %stream_name, "releaseStream");
            }
            RtmpCommand::FcPublish { stream_name } => {
                self.send_fc_status(CMD_ON_FC_PUBLISH, NS_PUBLISH_START, &stream_name);
            }
            RtmpCommand::FcUnpublish { stream_name } => {
                self.send_fc_status(CMD_ON_FC_UNPUBLISH, NS_UNPUBLISH_SUCCESS, &stream_name);
            }
        }
        Ok(())
    }

    /// Handle connect command
    async fn handle_connect(&mut self, transaction_id: f64, params: ConnectParams) -> Result<()> {
        if self.state.is_connected() {
            tracing::debug!(session_id = self.state.id, "Duplicate connect ignored");
            return Ok(());
        }

        match self.handler.on_connect(&self.context, &params).await {
            AuthResult::Accept | AuthResult::AcceptAs(_) => {
                let object_encoding = params.object_encoding;
                self.state.on_connect();
                self.context.with_connect(params);

                self.queue
                    .send_control(&RtmpMessage::WindowAckSize(self.config.window_ack_size));
                self.state.out_window_ack_size = self.config.window_ack_size;
                self.queue.send_control(&RtmpMessage::SetPeerBandwidth {
                    size: self.config.peer_bandwidth,
                    limit_type: BANDWIDTH_LIMIT_DYNAMIC,
                });
                self.queue.send_user_control(UserControlEvent::StreamBegin(0));

                let properties = AmfValue::object([
                    ("fmsVer", AmfValue::from("FMS/3,5,7,7009")),
                    ("capabilities", AmfValue::Number(31.0)),
                    ("mode", AmfValue::Number(1.0)),
                ]);
                let info = AmfValue::object([
                    ("level", AmfValue::from("status")),
                    ("code", AmfValue::from(NC_CONNECT_SUCCESS)),
                    ("description", AmfValue::from("Connection succeeded.")),
                    ("objectEncoding", AmfValue::Number(object_encoding)),
                ]);
                self.queue
                    .send_command(&Command::result(transaction_id, properties, info));

                tracing::info!(
                    session_id = self.state.id,
                    app = %self.context.app,
                    "Connected"
                );
                Ok(())
            }
            AuthResult::Reject(reason) => {
                let info = AmfValue::object([
                    ("level", AmfValue::from("error")),
                    ("code", AmfValue::from(NC_CONNECT_REJECTED)),
                    ("description", AmfValue::from(reason.as_str())),
                ]);
                self.queue
                    .send_command(&Command::error(transaction_id, AmfValue::Null, info));
                Err(Error::Rejected(reason))
            }
        }
    }

    /// Handle createStream command
    fn handle_create_stream(&mut self, transaction_id: f64) {
        let stream_id = self.state.allocate_stream_id();
        self.queue.send_command(&Command::result(
            transaction_id,
            AmfValue::Null,
            AmfValue::Number(stream_id as f64),
        ));
        tracing::debug!(session_id = self.state.id, stream_id = stream_id, "Stream created");
    }

    /// Handle publish command
    ///
    /// Failures are reported with an onStatus error; the session stays up.
    async fn handle_publish(&mut self, stream_id: u32, params: PublishParams) {
        if !self.claim_stream_id(stream_id) {
            self.send_error_status(stream_id, NS_PUBLISH_BAD_NAME, "Stream id already in use");
            return;
        }

        let (path, args) = match StreamPath::parse(&self.context.app, &params.stream_name) {
            Some(parsed) => parsed,
            None => {
                self.send_error_status(stream_id, NS_PUBLISH_BAD_NAME, "Missing stream name");
                return;
            }
        };

        let auth = PublishAuth {
            path: &path,
            args: &args,
            publish_type: &params.publish_type,
        };
        let decision = self.handler.authorize_publish(&self.context, &auth).await;
        let path = match decision {
            AuthResult::Accept => path,
            AuthResult::AcceptAs(rewritten) => rewritten,
            AuthResult::Reject(reason) => {
                tracing::info!(session_id = self.state.id, stream = %path, reason = %reason, "Publish rejected");
                self.send_error_status(stream_id, NS_PUBLISH_UNAUTHORIZED, &reason);
                return;
            }
        };

        let request = PublishRequest {
            session_id: self.state.id,
            path: path.clone(),
            args: args.clone(),
            publish_type: params.publish_type,
        };
        let stream = match self.shared.registry.start_publishing(request) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(session_id = self.state.id, stream = %path, error = %e, "Publish refused");
                self.send_error_status(stream_id, NS_PUBLISH_BAD_NAME, &e.to_string());
                return;
            }
        };

        self.state.set_mode(stream_id, StreamMode::Publishing(stream));
        self.queue
            .send_user_control(UserControlEvent::StreamBegin(stream_id));
        self.queue.send_status(
            stream_id,
            "status",
            NS_PUBLISH_START,
            &format!("{} is now published.", path),
        );
        self.shared.events.stream_published(&self.context, &path, &args);
    }

    /// Handle play command
    async fn handle_play(&mut self, stream_id: u32, params: PlayParams) {
        if !self.claim_stream_id(stream_id) {
            self.send_error_status(stream_id, NS_FAILED, "Stream id already in use");
            return;
        }

        let (path, args) = match StreamPath::parse(&self.context.app, &params.stream_name) {
            Some(parsed) => parsed,
            None => {
                self.send_error_status(stream_id, NS_PLAY_STREAM_NOT_FOUND, "Missing stream name");
                return;
            }
        };

        let decision = self
            .handler
            .authorize_subscribe(&self.context, &path, &args)
            .await;
        let path = match decision {
            AuthResult::Accept => path,
            AuthResult::AcceptAs(rewritten) => rewritten,
            AuthResult::Reject(reason) => {
                tracing::info!(session_id = self.state.id, stream = %path, reason = %reason, "Play rejected");
                self.send_error_status(stream_id, NS_PLAY_UNAUTHORIZED, &reason);
                return;
            }
        };

        let request = SubscribeRequest {
            session_id: self.state.id,
            stream_id,
            path: path.clone(),
            args: args.clone(),
            queue: self.queue.clone(),
        };
        match self.shared.registry.start_subscribing(request) {
            Ok((stream, subscriber)) => {
                self.state
                    .set_mode(stream_id, StreamMode::Playing { stream, subscriber });
                self.shared.events.stream_subscribed(&self.context, &path, &args);
            }
            Err(e) => {
                tracing::debug!(session_id = self.state.id, stream = %path, error = %e, "Play refused");
                let code = match e {
                    RegistryError::StreamNotFound(_) => NS_PLAY_STREAM_NOT_FOUND,
                    _ => NS_FAILED,
                };
                self.send_error_status(stream_id, code, &e.to_string());
            }
        }
    }

    fn handle_pause(&mut self, stream_id: u32, pause: bool, milliseconds: f64) {
        let Some(subscriber) = self.state.playing(stream_id) else {
            return;
        };
        subscriber.set_paused(pause);
        let (code, description) = if pause {
            (NS_PAUSE_NOTIFY, "Paused live")
        } else {
            (NS_UNPAUSE_NOTIFY, "Unpaused live")
        };
        self.queue.send_status(stream_id, "status", code, description);
        tracing::debug!(session_id = self.state.id, pause, milliseconds, "Pause");
    }

    /// Handle data message
    fn handle_data(&mut self, data: DataMessage) {
        let Some(stream) = self.state.publishing(data.stream_id).cloned() else {
            tracing::trace!(name = %data.name, "Data message outside a publish");
            return;
        };

        if let Some(metadata) = data.metadata() {
            self.shared.events.stream_metadata(&self.context, stream.path(), metadata);
            self.shared
                .distributor
                .distribute_metadata(&stream, metadata.clone());
            tracing::debug!(
                session_id = self.state.id,
                stream = %stream.path(),
                keys = metadata.len(),
                "Received metadata"
            );
        } else if data.name == DATA_CLEAR_DATA_FRAME {
            self.shared.distributor.clear_metadata(&stream);
        } else {
            tracing::trace!(name = %data.name, "Unknown data message");
        }
    }

    /// Handle audio or video message
    fn handle_media(&mut self, kind: MediaKind, stream_id: u32, timestamp: u32, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let Some(stream) = self.state.publishing(stream_id) else {
            tracing::trace!(session_id = self.state.id, stream_id, "Media outside a publish");
            return;
        };
        self.shared
            .distributor
            .distribute(stream, kind, timestamp, data);
    }

    /// Tear down whatever `stream_id` was doing
    ///
    /// `notify` sends the closing status to our own peer; skipped on
    /// disconnect since nobody is listening.
    fn stop_stream(&mut self, stream_id: u32, mode: StreamMode, notify: bool) {
        match mode {
            StreamMode::Idle => {}
            StreamMode::Publishing(stream) => {
                if self.shared.registry.stop_publishing(&stream) {
                    self.shared.events.clear_gop_cache(stream.path());
                    self.shared.events.stream_unpublished(&self.context, stream.path());
                }
                if notify {
                    self.queue.send_status(
                        stream_id,
                        "status",
                        NS_UNPUBLISH_SUCCESS,
                        &format!("{} is now unpublished.", stream.path()),
                    );
                }
            }
            StreamMode::Playing { stream, subscriber } => {
                if self.shared.registry.stop_subscribing(&stream, &subscriber) {
                    self.shared.events.stream_unsubscribed(&self.context, stream.path());
                }
                if notify {
                    self.queue.send_status(
                        stream_id,
                        "status",
                        NS_PLAY_STOP,
                        &format!("Stopped playing {}.", stream.path()),
                    );
                }
            }
        }
    }

    /// Cleanup when connection disconnects
    fn cleanup_on_disconnect(&mut self) {
        self.state.phase = SessionPhase::Closing;
        for (stream_id, mode) in self.state.drain_streams() {
            self.stop_stream(stream_id, mode, false);
        }
    }

    /// Whether `stream_id` is free for a new publish or play. A play whose
    /// publisher has gone away is released first.
    fn claim_stream_id(&mut self, stream_id: u32) -> bool {
        let ended = matches!(
            self.state.stream(stream_id),
            Some(StreamMode::Playing { subscriber, .. }) if subscriber.has_ended()
        );
        if ended {
            let mode = self.state.take_mode(stream_id);
            self.stop_stream(stream_id, mode, false);
        }
        self.state
            .stream(stream_id)
            .map(StreamMode::is_idle)
            .unwrap_or(true)
    }

    fn send_error_status(&self, stream_id: u32, code: &str, description: &str) {
        self.queue.send_status(stream_id, "error", code, description);
    }

    fn send_fc_status(&self, name: &str, code: &str, stream_name: &str) {
        let info = AmfValue::object([
            ("code", AmfValue::from(code)),
            ("description", AmfValue::from(stream_name)),
        ]);
        self.queue.send(OutboundMessage::command(&Command {
            name: name.to_string(),
            transaction_id: 0.0,
            command_object: AmfValue::Null,
            arguments: vec![info],
            stream_id: 0,
        }));
    }
}
