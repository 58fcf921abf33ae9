//! Client builder and session runtime.
//!
//! The [`ClientBuilder`] configures the client. The [`Client`] manages the
//! lifecycle:
//! 1. Resolve the device address and bind a UDP socket
//! 2. Let feature modules attach to the dispatcher
//! 3. Send Hello and wait for the initial state burst
//! 4. Ack, decode and dispatch every received datagram
//! 5. Frame and send queued commands
//!
//! After [`Client::disconnect`] or a transport error the client may be
//! started again. The socket, the dispatcher and the command queue are
//! kept, so attached feature modules keep working.
//!
//! One task at a time runs the [`Session`]; everything else talks to it
//! through channels.
//!
//! ```text
//!                 ┌──────────────── session task ────────────────┐
//!  UDP socket ───►│ Session::receive ─► acks ─► UDP              │
//!                 │        └─► records ─► CommandDispatcher ─────┼─► feature modules
//!  CommandWriter ►│ Session::build_command ─► UDP                │
//!                 └──────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use atem_client::{Client, MixEffect};
//!
//! #[tokio::main]
//! async fn main() -> atem_client::Result<()> {
//!     let mut client = Client::builder().bind("192.168.10.240").await?;
//!     let mix_effect = MixEffect::attach(&client);
//!
//!     client.start()?;
//!     client.wait_connected().await?;
//!
//!     mix_effect.set_program_input(0, 2)?;
//!     client.join().await
//! }
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::error::{AtemError, Result};
use crate::handler::CommandDispatcher;
use crate::protocol::{Record, Tag};
use crate::transport::{open_socket, resolve_address, Session, SessionState};
use crate::writer::{command_channel, CommandSink, CommandWriter, OutboundCommand};

/// Connection lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Handshake finished; commands are accepted from now on.
    Connected { session_id: u16 },
    /// Session task stopped. `reason` is set when it stopped on an error.
    Disconnected { reason: Option<String> },
}

/// Builder for configuring and creating a client.
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::from_config(ClientConfig::default())
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Device port used when the address has none.
    ///
    /// Default: 9910
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Local address to bind.
    ///
    /// Default: `0.0.0.0:0`
    pub fn bind_address(mut self, address: impl Into<String>) -> Self {
        self.config.bind_address = address.into();
        self
    }

    /// Outbound commands that may queue before `Backpressure` is reported.
    ///
    /// Default: 256
    pub fn command_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.command_queue_capacity = capacity;
        self
    }

    /// Buffered notifications per channel.
    ///
    /// Default: 64
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Default: 2048
    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.config.receive_buffer_size = size;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolve `address` and open the socket without starting the handshake.
    ///
    /// Attach feature modules to the returned client, then call
    /// [`Client::start`].
    pub async fn bind(self, address: &str) -> Result<Client> {
        self.config.validate()?;
        let peer = resolve_address(address, self.config.port).await?;
        let socket = open_socket(&self.config.bind_address, peer).await?;
        Client::new(socket, peer, self.config)
    }

    /// [`bind`](Self::bind) followed by [`Client::start`].
    pub async fn connect(self, address: &str) -> Result<Client> {
        let mut client = self.bind(address).await?;
        client.start()?;
        Ok(client)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A client bound to one device.
///
/// Dropping the client stops its session task.
pub struct Client {
    peer: SocketAddr,
    local: SocketAddr,
    config: ClientConfig,
    socket: Arc<UdpSocket>,
    dispatcher: CommandDispatcher,
    writer: CommandWriter,
    /// Held by the running session task.
    commands: Arc<Mutex<mpsc::Receiver<OutboundCommand>>>,
    state_tx: Arc<watch::Sender<SessionState>>,
    state: watch::Receiver<SessionState>,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Bind and start with default settings.
    pub async fn connect(address: &str) -> Result<Self> {
        ClientBuilder::new().connect(address).await
    }

    fn new(socket: UdpSocket, peer: SocketAddr, config: ClientConfig) -> Result<Self> {
        let local = socket.local_addr()?;
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (writer, commands) = command_channel(config.command_queue_capacity, state_rx.clone());
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Ok(Self {
            peer,
            local,
            config,
            socket: Arc::new(socket),
            dispatcher: CommandDispatcher::new(),
            writer,
            commands: Arc::new(Mutex::new(commands)),
            state_tx: Arc::new(state_tx),
            state: state_rx,
            events,
            shutdown: None,
            task: None,
        })
    }

    /// Send Hello and spawn the session task. Must run inside a tokio runtime.
    ///
    /// Allowed whenever the session is `Disconnected`: first use, after
    /// [`disconnect`](Self::disconnect) or after a transport error. Each
    /// start begins a fresh session with the packet counter reset.
    pub fn start(&mut self) -> Result<()> {
        if self.state() != SessionState::Disconnected {
            return Err(AtemError::Connect("session already started".to_string()));
        }

        let (shutdown, stop) = watch::channel(false);
        let mut task = SessionTask {
            socket: Arc::clone(&self.socket),
            session: Session::new(),
            dispatcher: self.dispatcher.clone(),
            commands: Arc::clone(&self.commands),
            stop,
            state: Arc::clone(&self.state_tx),
            events: self.events.clone(),
            buf: vec![0u8; self.config.receive_buffer_size],
        };

        let hello = task.session.connect();
        self.state_tx.send_replace(task.session.state());
        tracing::debug!("Connecting to {}", self.peer);
        self.shutdown = Some(shutdown);
        self.task = Some(tokio::spawn(task.run(hello)));
        Ok(())
    }

    /// Device address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Capacity feature modules use for their notification channels.
    pub fn event_capacity(&self) -> usize {
        self.config.event_capacity
    }

    /// Dispatcher to subscribe record handlers to.
    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn writer(&self) -> &CommandWriter {
        &self.writer
    }

    /// Shared sink for feature modules.
    pub fn command_sink(&self) -> Arc<dyn CommandSink> {
        Arc::new(self.writer.clone())
    }

    /// Queue a raw command record.
    pub fn send(&self, tag: Tag, body: impl Into<Bytes>) -> Result<()> {
        self.writer.send_command(tag, body.into())
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Watch handshake progress.
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Lifecycle notifications from now on.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Wait until the handshake finishes.
    ///
    /// Fails with `NotConnected` before [`start`](Self::start) and with
    /// `ConnectionClosed` if the session ends first.
    pub async fn wait_connected(&self) -> Result<()> {
        if self.task.is_none() {
            return Err(AtemError::NotConnected);
        }

        let mut state = self.state.clone();
        loop {
            match *state.borrow_and_update() {
                SessionState::Ready => return Ok(()),
                SessionState::Disconnected => return Err(AtemError::ConnectionClosed),
                SessionState::AwaitingHello => {}
            }
            state
                .changed()
                .await
                .map_err(|_| AtemError::ConnectionClosed)?;
        }
    }

    /// Stop the session. Local only; the device times the session out.
    ///
    /// Never waits on the command queue. Does nothing when no session runs.
    pub fn disconnect(&self) {
        if let Some(shutdown) = &self.shutdown {
            shutdown.send_replace(true);
        }
    }

    /// Wait for the session task to finish and return how it ended.
    pub async fn join(mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task.await.map_err(|e| {
                tracing::error!("Session task failed: {}", e);
                AtemError::ConnectionClosed
            })?,
            None => Ok(()),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// State owned by one run of the session.
struct SessionTask {
    socket: Arc<UdpSocket>,
    session: Session,
    dispatcher: CommandDispatcher,
    commands: Arc<Mutex<mpsc::Receiver<OutboundCommand>>>,
    stop: watch::Receiver<bool>,
    state: Arc<watch::Sender<SessionState>>,
    events: broadcast::Sender<ConnectionEvent>,
    buf: Vec<u8>,
}

impl SessionTask {
    async fn run(mut self, hello: Vec<u8>) -> Result<()> {
        let queue = Arc::clone(&self.commands);
        let mut commands = queue.lock().await;
        // Left over from an earlier session.
        while commands.try_recv().is_ok() {}

        let result = self.drive(&mut commands, hello).await;
        drop(commands);

        self.session.disconnect();
        self.state.send_replace(SessionState::Disconnected);
        let reason = match &result {
            Ok(()) => None,
            Err(e) => {
                tracing::error!("Session ended: {}", e);
                Some(e.to_string())
            }
        };
        let _ = self.events.send(ConnectionEvent::Disconnected { reason });
        result
    }

    async fn drive(
        &mut self,
        commands: &mut mpsc::Receiver<OutboundCommand>,
        hello: Vec<u8>,
    ) -> Result<()> {
        self.socket.send(&hello).await?;

        loop {
            tokio::select! {
                received = self.socket.recv(&mut self.buf) => {
                    let n = received?;
                    self.process(n).await?;
                    self.drain().await?;
                }
                outbound = commands.recv() => match outbound {
                    Some(command) => self.send_command(command).await?,
                    None => return Ok(()),
                },
                // A dropped sender means the client is gone.
                _ = self.stop.changed() => return Ok(()),
            }
        }
    }

    /// Handle everything already buffered before taking the next command.
    async fn drain(&mut self) -> Result<()> {
        loop {
            match self.socket.try_recv(&mut self.buf) {
                Ok(n) => self.process(n).await?,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Feed `buf[..n]` to the session, send replies, dispatch records.
    ///
    /// Only socket errors are returned; decode errors drop the datagram.
    async fn process(&mut self, n: usize) -> Result<()> {
        let bytes = Bytes::copy_from_slice(&self.buf[..n]);
        let inbound = match self.session.receive(bytes) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!("Dropping datagram of {} bytes: {}", n, e);
                return Ok(());
            }
        };

        for reply in &inbound.replies {
            self.socket.send(reply).await?;
        }

        if inbound.connected {
            self.state.send_replace(SessionState::Ready);
            let session_id = self.session.session_id();
            tracing::debug!("Connected, session {:#06x}", session_id);
            let _ = self.events.send(ConnectionEvent::Connected { session_id });
        }

        dispatch_all(&self.dispatcher, &inbound.records);
        Ok(())
    }

    async fn send_command(&mut self, command: OutboundCommand) -> Result<()> {
        match self.session.build_command(command.tag, &command.body) {
            Ok(datagram) => {
                self.socket.send(&datagram).await?;
            }
            Err(e) => tracing::warn!("Dropping command {}: {}", command.tag, e),
        }
        Ok(())
    }
}

/// Hand records to their subscribers in order; failures are logged only.
fn dispatch_all(dispatcher: &CommandDispatcher, records: &[Record]) {
    for record in records {
        match dispatcher.dispatch(record) {
            Ok(_) => {}
            Err(AtemError::UnknownTag(tag)) => {
                tracing::debug!("No subscriber for {}", tag);
            }
            Err(e) => tracing::warn!("Dispatch of {} failed: {}", record.tag, e),
        }
    }
}
