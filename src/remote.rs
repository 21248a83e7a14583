//! Remote control of the playback service.
//!
//! Commands are fire-and-forget: components emit them through a [`Remote`]
//! and never learn whether the service honored them. The service reports
//! back asynchronously through `pushState` events, which the [`Client`]
//! feeds into the [`PlaybackState`] cache.
//!
//! The playback service speaks Socket.IO v2 over a websocket. See
//! [`protocol::socketio`](crate::protocol::socketio) for the framing.

use std::{fmt, ops::ControlFlow, time::Duration};

use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    tungstenite::Message as WebsocketMessage, MaybeTlsStream, WebSocketStream,
};
use url::Url;

use crate::{
    config::RemoteConfig,
    error::{Error, Result},
    protocol::socketio::{Packet, DEFAULT_PING_INTERVAL},
    state::PlaybackState,
};

/// Playback sources known to the service.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum Service {
    /// The local music library, also used for feedback sounds.
    Mpd,
    WebRadio,
    Spotify,
}

impl Service {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mpd => "mpd",
            Self::WebRadio => "webradio",
            Self::Spotify => "spop",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands understood by the playback service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Replace the queue with `uri` and start playing it.
    ReplaceAndPlay { service: Service, uri: String },
    /// Append `uri` to the queue without starting playback.
    AddToQueue { service: Service, uri: String },
    ClearQueue,
    Play,
    Pause,
    Stop,
    Prev,
    Next,
    /// Seek to an absolute position in seconds.
    Seek(i64),
    /// Ask the service to push its current state.
    GetState,
}

impl Command {
    /// Socket.IO event name of the command.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReplaceAndPlay { .. } => "replaceAndPlay",
            Self::AddToQueue { .. } => "addToQueue",
            Self::ClearQueue => "clearQueue",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Prev => "prev",
            Self::Next => "next",
            Self::Seek(_) => "seek",
            Self::GetState => "getState",
        }
    }

    #[must_use]
    pub fn payload(&self) -> Option<Value> {
        match self {
            Self::ReplaceAndPlay { service, uri } | Self::AddToQueue { service, uri } => {
                Some(json!({ "service": service.as_str(), "uri": uri }))
            }
            Self::Seek(position) => Some(json!(position)),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_packet(self) -> Packet {
        Packet::event(self.name(), self.payload())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReplaceAndPlay { service, uri } => write!(f, "play {uri} on {service}"),
            Self::AddToQueue { service, uri } => write!(f, "queue {uri} on {service}"),
            Self::Seek(position) => write!(f, "seek {position}"),
            other => write!(f, "{}", other.name().to_uppercase()),
        }
    }
}

/// Emitter of commands to the playback service.
///
/// Emitting never blocks and never fails: delivery problems are the
/// transport's to log, not the caller's to handle.
pub trait Remote: Send + Sync {
    fn emit(&self, command: Command);
}

/// Cloneable [`Remote`] that queues commands for a [`Client`].
#[derive(Clone, Debug)]
pub struct Handle {
    tx: mpsc::UnboundedSender<Command>,
}

impl Handle {
    /// Creates a handle and the receiving end of its queue.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Remote for Handle {
    fn emit(&self, command: Command) {
        info!("{command}");
        if self.tx.send(command).is_err() {
            debug!("remote client is gone, dropping command");
        }
    }
}

type WebsocketSink =
    SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, WebsocketMessage>;

/// Socket.IO client for the playback service.
///
/// A client can be [started](Self::start) repeatedly; each start opens a new
/// connection and runs until that connection is lost.
///
/// Commands emitted while there is no connection wait in the queue and are
/// delivered in order once the service has connected the namespace.
pub struct Client {
    url: Url,
    commands: mpsc::UnboundedReceiver<Command>,
    state: PlaybackState,
    ws_tx: Option<WebsocketSink>,
    connected: bool,
}

impl Client {
    /// Creates a client and the handle through which commands reach it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured URL cannot be turned into a
    /// websocket endpoint.
    pub fn new(config: &RemoteConfig, state: PlaybackState) -> Result<(Self, Handle)> {
        let url = Self::endpoint(&config.url)?;
        debug!("remote endpoint: {url}");

        let (handle, commands) = Handle::channel();
        let client = Self {
            url,
            commands,
            state,
            ws_tx: None,
            connected: false,
        };

        Ok((client, handle))
    }

    /// Derives the Socket.IO websocket endpoint from the service URL.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the scheme is not one of `http`,
    /// `https`, `ws` or `wss`.
    pub fn endpoint(base: &Url) -> Result<Url> {
        let scheme = match base.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(Error::invalid_argument(format!(
                    "unsupported remote scheme: {other}"
                )))
            }
        };

        let mut url = base.clone();
        url.set_scheme(scheme)
            .map_err(|()| Error::invalid_argument(format!("cannot use {scheme} for {base}")))?;
        url.set_path("/socket.io/");
        url.set_query(Some("EIO=3&transport=websocket"));

        Ok(url)
    }

    /// Connects and services the connection until it drops.
    ///
    /// Returns `Ok` only when every [`Handle`] has been dropped.
    ///
    /// # Errors
    ///
    /// Returns an error when connecting fails or the connection is lost.
    pub async fn start(&mut self) -> Result<()> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let (ws_tx, mut ws_rx) = ws_stream.split();
        self.ws_tx = Some(ws_tx);
        self.connected = false;

        let mut ping = Self::ping_timer(DEFAULT_PING_INTERVAL);

        loop {
            tokio::select! {
                message = ws_rx.next() => {
                    let message = match message {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(Error::cancelled("connection closed")),
                    };

                    if let ControlFlow::Break(e) = self.handle_message(message, &mut ping).await {
                        return Err(e);
                    }
                }

                // Commands sent before the namespace is connected are lost.
                command = self.commands.recv(), if self.connected => {
                    match command {
                        Some(command) => self.send_packet(command.into_packet()).await?,
                        None => {
                            self.stop().await;
                            return Ok(());
                        }
                    }
                }

                _ = ping.tick() => {
                    self.send_packet(Packet::Ping(String::new())).await?;
                }
            }
        }
    }

    /// Closes the connection, if any.
    pub async fn stop(&mut self) {
        self.connected = false;
        if let Some(mut tx) = self.ws_tx.take() {
            let close = WebsocketMessage::Text(Packet::Close.to_string().into());
            if let Err(e) = tx.send(close).await {
                trace!("error sending close packet: {e}");
            }
            if let Err(e) = tx.close().await {
                trace!("error closing websocket: {e}");
            }
        }
    }

    fn ping_timer(period: Duration) -> tokio::time::Interval {
        let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        timer
    }

    async fn handle_message(
        &mut self,
        message: WebsocketMessage,
        ping: &mut tokio::time::Interval,
    ) -> ControlFlow<Error, ()> {
        let text = match message {
            WebsocketMessage::Text(text) => text,
            WebsocketMessage::Close(payload) => {
                return ControlFlow::Break(Error::cancelled(format!(
                    "connection closed by server: {payload:?}"
                )))
            }
            // Websocket pings are answered by tungstenite itself.
            _ => {
                trace!("message type unimplemented");
                return ControlFlow::Continue(());
            }
        };

        let packet = match text.as_str().parse::<Packet>() {
            Ok(packet) => packet,
            Err(e) => {
                debug!("ignoring packet: {e}");
                trace!("{}", text.as_str());
                return ControlFlow::Continue(());
            }
        };

        let result = match packet {
            Packet::Open(handshake) => {
                debug!("session {} opened", handshake.sid);
                *ping = Self::ping_timer(handshake.ping_interval());
                Ok(())
            }
            Packet::Ping(data) => self.send_packet(Packet::Pong(data)).await,
            Packet::Pong(_) => {
                trace!("pong");
                Ok(())
            }
            Packet::Connect => {
                info!("connected to playback service");
                self.connected = true;
                self.send_packet(Command::GetState.into_packet()).await
            }
            Packet::Disconnect | Packet::Close => {
                self.connected = false;
                Err(Error::cancelled("disconnected by playback service"))
            }
            Packet::Event { name, args } => {
                if name == "pushState" {
                    if let Some(payload) = args.into_iter().next() {
                        trace!("push state: {payload}");
                        self.state.apply_value(payload);
                    }
                } else {
                    trace!("ignoring event {name}");
                }
                Ok(())
            }
            Packet::Error(e) => {
                warn!("playback service error: {e}");
                Ok(())
            }
            Packet::Noop => Ok(()),
        };

        match result {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => ControlFlow::Break(e),
        }
    }

    async fn send_packet(&mut self, packet: Packet) -> Result<()> {
        let text = packet.to_string();
        trace!("sending packet: {text}");
        match &mut self.ws_tx {
            Some(tx) => tx
                .send(WebsocketMessage::Text(text.into()))
                .await
                .map_err(Into::into),
            None => Err(Error::failed_precondition("websocket stream unavailable")),
        }
    }
}
