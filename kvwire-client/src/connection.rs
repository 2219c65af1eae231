//! Connection management.
//!
//! A connection multiplexes many requests over one byte stream. Frames are
//! queued to a writer task that writes them in call order; a reader task
//! splits incoming bytes into frames and completes pending requests by
//! opaque id, so responses may arrive in any order.

use crate::config::ClientConfig;
use crate::dispatch::{PendingTable, DEFAULT_MAX_IN_FLIGHT};
use crate::error::ClientError;
use crate::event::{Event, EventContext, EventSink, Severity};
use crate::lifecycle::{Lifecycle, RequestState};
use crate::transport::{Transport, TransportSecurity};
use bytes::Bytes;
use kvwire_protocol::{
    peek_opaque, ChannelContext, FrameDecoder, KvRequest, KvResponse, ResponseFrame,
    MAX_FRAME_SIZE,
};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Default read buffer size (16 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

const WRITE_QUEUE_CAPACITY: usize = 1024;

/// Tuning for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub max_in_flight: usize,
    pub read_buffer_size: usize,
    pub max_frame_size: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl ConnectionOptions {
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

struct OutboundFrame {
    frame: Bytes,
    written: oneshot::Sender<io::Result<()>>,
}

/// A multiplexed connection to one server.
pub struct Connection {
    context: ChannelContext,
    pending: Arc<PendingTable>,
    writer: mpsc::Sender<OutboundFrame>,
    connected: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    events: Arc<dyn EventSink>,
    event_context: EventContext,
}

impl Connection {
    /// Connects over TCP (and TLS when `security` is given) using `config`.
    pub async fn connect(
        config: &ClientConfig,
        security: Option<&TransportSecurity>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, ClientError> {
        let transport = Transport::connect(
            &config.network.address,
            config.network.connect_timeout(),
            config.network.tcp_nodelay,
            security,
        )
        .await?;
        let remote = transport
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| config.network.address.clone());
        if transport.is_tls() {
            tracing::info!("Connected to {} (TLS)", remote);
        } else {
            tracing::info!("Connected to {}", remote);
        }

        Ok(Self::from_stream(
            transport,
            remote,
            config.channel_context(),
            config.connection_options(),
            events,
        ))
    }

    /// Runs the protocol over an already established stream.
    ///
    /// Spawns the reader and writer tasks, so it must be called from within
    /// a Tokio runtime.
    pub fn from_stream<S>(
        stream: S,
        remote: impl Into<String>,
        context: ChannelContext,
        options: ConnectionOptions,
        events: Arc<dyn EventSink>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let remote = remote.into();
        let event_context = EventContext::builder()
            .remote(remote)
            .bucket(context.bucket_name.clone())
            .build();

        let pending = Arc::new(PendingTable::new(options.max_in_flight));
        let connected = Arc::new(AtomicBool::new(true));
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, queue) = mpsc::channel(WRITE_QUEUE_CAPACITY);

        let write_task = tokio::spawn(write_loop(
            write_half,
            queue,
            Arc::clone(&pending),
            Arc::clone(&connected),
        ));
        let read_task = tokio::spawn(read_loop(
            read_half,
            FrameDecoder::with_max_frame_size(options.max_frame_size),
            options.read_buffer_size.max(MIN_READ_BUFFER_SIZE),
            Arc::clone(&pending),
            Arc::clone(&connected),
            Arc::clone(&events),
            event_context.clone(),
        ));

        events.emit(Event::new(
            "connected",
            Severity::Info,
            event_context.clone(),
        ));

        Self {
            context,
            pending,
            writer,
            connected,
            tasks: Mutex::new(vec![write_task, read_task]),
            events,
            event_context,
        }
    }

    pub fn context(&self) -> &ChannelContext {
        &self.context
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns the number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Sends one request and waits for its response, without retrying.
    ///
    /// Non-success statuses are returned as responses, not errors.
    pub async fn dispatch(
        &self,
        request: &KvRequest,
        timeout: Duration,
    ) -> Result<KvResponse, ClientError> {
        let mut lifecycle = self.lifecycle_for(request);
        let result = self.attempt(request, timeout, &mut lifecycle).await;
        let end = if result.is_ok() {
            RequestState::Completed
        } else {
            RequestState::Failed
        };
        if !lifecycle.state().is_terminal() {
            let _ = lifecycle.transition(end);
        }
        result
    }

    /// Starts a lifecycle that reports through this connection's event sink.
    pub(crate) fn lifecycle_for(&self, request: &KvRequest) -> Lifecycle {
        Lifecycle::new().with_events(Arc::clone(&self.events), self.request_context(request))
    }

    pub(crate) fn request_context(&self, request: &KvRequest) -> EventContext {
        let id = request.doc_id();
        EventContext::builder_from(&self.event_context)
            .field("opcode", format!("{:?}", request.opcode()))
            .field("key", id.key.clone())
            .field("partition", id.partition)
            .build()
    }

    /// One attempt: encode, register, write, await.
    ///
    /// Leaves `lifecycle` in `Sent` when a response was decoded, so the
    /// caller decides between completing and retrying.
    pub(crate) async fn attempt(
        &self,
        request: &KvRequest,
        timeout: Duration,
        lifecycle: &mut Lifecycle,
    ) -> Result<KvResponse, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        request.validate()?;

        let (guard, response) = self.pending.register()?;
        let opaque = guard.opaque();
        let frame = request.encode(opaque, &self.context, timeout)?;
        lifecycle.transition(RequestState::Encoded)?;

        let (written_tx, written_rx) = oneshot::channel();
        self.writer
            .send(OutboundFrame {
                frame: frame.freeze(),
                written: written_tx,
            })
            .await
            .map_err(|_| ClientError::ConnectionClosed)?;
        lifecycle.transition(RequestState::Sent { opaque })?;
        tracing::debug!(opaque, opcode = ?request.opcode(), "request sent");

        let outcome = tokio::time::timeout(timeout, async {
            match written_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(ClientError::TransportFailure(e)),
                Err(_) => return Err(ClientError::ConnectionClosed),
            }
            response.await.map_err(|_| ClientError::ConnectionClosed)
        })
        .await;

        let frame = match outcome {
            Err(_) => {
                drop(guard);
                lifecycle.transition(RequestState::TimedOut)?;
                tracing::debug!(opaque, "request timed out after {:?}", timeout);
                self.events.emit(Event::new(
                    "request_timeout",
                    Severity::Warn,
                    EventContext::builder_from(&self.request_context(request))
                        .field("opaque", opaque)
                        .field("timeout_ms", timeout.as_millis() as u64)
                        .build(),
                ));
                return Err(ClientError::Timeout);
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(Err(e))) => return Err(e.into()),
            Ok(Ok(Ok(frame))) => frame,
        };
        drop(guard);

        let decoded = request.decode(&frame, &self.context)?;
        tracing::debug!(opaque, status = %decoded.status(), "response matched");
        Ok(decoded)
    }

    /// Closes the connection and fails everything still in flight.
    pub fn close(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let failed = self.pending.close();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::debug!(failed, "connection closed");
        self.events.emit(Event::new(
            "disconnected",
            Severity::Info,
            EventContext::builder_from(&self.event_context)
                .field("failed_requests", failed)
                .build(),
        ));
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        self.pending.close();
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut queue: mpsc::Receiver<OutboundFrame>,
    pending: Arc<PendingTable>,
    connected: Arc<AtomicBool>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(outbound) = queue.recv().await {
        let result = write_frame(&mut writer, &outbound.frame).await;
        let failed = result.is_err();
        if let Err(e) = &result {
            tracing::warn!("write failed: {}", e);
            connected.store(false, Ordering::SeqCst);
        }
        let _ = outbound.written.send(result);
        if failed {
            pending.close();
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

async fn read_loop<R>(
    mut reader: R,
    mut decoder: FrameDecoder,
    buffer_size: usize,
    pending: Arc<PendingTable>,
    connected: Arc<AtomicBool>,
    events: Arc<dyn EventSink>,
    event_context: EventContext,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let reason = 'read: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break 'read "closed by peer".to_string(),
            Ok(n) => n,
            Err(e) => break 'read format!("read failed: {}", e),
        };
        decoder.extend(&buf[..n]);

        loop {
            match decoder.decode_frame() {
                Ok(Some(frame)) => route_frame(&pending, frame),
                Ok(None) => break,
                Err(e) => break 'read format!("unrecoverable framing error: {}", e),
            }
        }
    };

    connected.store(false, Ordering::SeqCst);
    let failed = pending.close();
    tracing::info!(failed, "connection lost: {}", reason);
    events.emit(Event::new(
        "connection_lost",
        Severity::Warn,
        EventContext::builder_from(&event_context)
            .field("reason", reason)
            .field("failed_requests", failed)
            .build(),
    ));
}

/// Hands one frame to the request waiting on its opaque id.
///
/// A frame that fails to parse still fails only its own request.
fn route_frame(pending: &PendingTable, frame: Bytes) {
    let Some(opaque) = peek_opaque(&frame) else {
        return;
    };
    let response = ResponseFrame::parse(frame);
    if let Err(e) = &response {
        tracing::warn!(opaque, "malformed response: {}", e);
    }
    pending.complete(opaque, response);
}
