//! High-level client API.

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::ClientError;
use crate::event::{Event, EventContext, EventSink, Severity, TracingEventSink};
use crate::lifecycle::{Lifecycle, RequestState};
use crate::retry::{RetryAction, RetryContext, RetryReason, RetryStrategy};
use crate::transport::TransportSecurity;
use kvwire_protocol::ops::{
    CounterDirection, CounterRequest, CounterResponse, GetRequest, GetResponse, LookupInRequest,
    LookupInResponse, MutationRequest, MutationResponse, RemoveRequest,
};
use kvwire_protocol::{DocId, KvRequest, KvResponse};
use parking_lot::RwLock;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Future returned by a [`ConnectionFactory`].
pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<Connection, ClientError>> + Send>>;

/// Opens a fresh connection whenever the client needs one.
pub type ConnectionFactory = Arc<dyn Fn() -> ConnectFuture + Send + Sync>;

/// High-level client.
///
/// Owns one connection at a time. A connection that fails at the transport
/// level is replaced before any retry is sent.
pub struct Client {
    config: ClientConfig,
    factory: ConnectionFactory,
    retry: Arc<dyn RetryStrategy>,
    events: Arc<dyn EventSink>,
    current: RwLock<Option<Arc<Connection>>>,
    reconnect: tokio::sync::Mutex<()>,
}

impl Client {
    /// Creates a client that connects over TCP, or TLS with `security`.
    pub fn new(config: ClientConfig, security: Option<TransportSecurity>) -> Self {
        Self::with_events(config, security, Arc::new(TracingEventSink))
    }

    pub fn with_events(
        config: ClientConfig,
        security: Option<TransportSecurity>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let factory: ConnectionFactory = {
            let config = config.clone();
            let events = Arc::clone(&events);
            Arc::new(move || -> ConnectFuture {
                let config = config.clone();
                let security = security.clone();
                let events = Arc::clone(&events);
                Box::pin(async move { Connection::connect(&config, security.as_ref(), events).await })
            })
        };
        Self::with_factory(config, factory, events)
    }

    /// Creates a client over connections produced by `factory`.
    pub fn with_factory(
        config: ClientConfig,
        factory: ConnectionFactory,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let retry = config.retry.build_strategy();
        Self {
            config,
            factory,
            retry,
            events,
            current: RwLock::new(None),
            reconnect: tokio::sync::Mutex::new(()),
        }
    }

    /// Replaces the retry strategy taken from the configuration.
    pub fn with_retry_strategy(mut self, retry: Arc<dyn RetryStrategy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connects eagerly; requests otherwise connect on first use.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.connection().await.map(|_| ())
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.current
            .read()
            .as_ref()
            .map(|conn| conn.is_connected())
            .unwrap_or(false)
    }

    /// Closes the current connection.
    pub fn close(&self) {
        if let Some(conn) = self.current.write().take() {
            conn.close();
        }
    }

    // =========================================================================
    // Key-value operations
    // =========================================================================

    pub async fn get(&self, id: DocId) -> Result<GetResponse, ClientError> {
        match self.execute(KvRequest::Get(GetRequest::new(id))).await? {
            KvResponse::Get(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    /// Creates a document; fails with `KeyExists` if it is already there.
    pub async fn insert(&self, request: MutationRequest) -> Result<MutationResponse, ClientError> {
        self.mutation(KvRequest::Insert(request)).await
    }

    pub async fn upsert(&self, request: MutationRequest) -> Result<MutationResponse, ClientError> {
        self.mutation(KvRequest::Upsert(request)).await
    }

    /// Replaces an existing document, optionally guarded by CAS.
    pub async fn replace(&self, request: MutationRequest) -> Result<MutationResponse, ClientError> {
        self.mutation(KvRequest::Replace(request)).await
    }

    pub async fn remove(&self, request: RemoveRequest) -> Result<MutationResponse, ClientError> {
        self.mutation(KvRequest::Remove(request)).await
    }

    pub async fn increment(&self, request: CounterRequest) -> Result<CounterResponse, ClientError> {
        self.counter(CounterDirection::Increment, request).await
    }

    pub async fn decrement(&self, request: CounterRequest) -> Result<CounterResponse, ClientError> {
        self.counter(CounterDirection::Decrement, request).await
    }

    /// Runs several read commands against one document.
    ///
    /// Per-path failures are reported in the results, not as an error.
    pub async fn lookup_in(&self, request: LookupInRequest) -> Result<LookupInResponse, ClientError> {
        match self.execute(KvRequest::LookupIn(request)).await? {
            KvResponse::LookupIn(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    async fn mutation(&self, request: KvRequest) -> Result<MutationResponse, ClientError> {
        match self.execute(request).await? {
            KvResponse::Mutation(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    async fn counter(
        &self,
        direction: CounterDirection,
        request: CounterRequest,
    ) -> Result<CounterResponse, ClientError> {
        match self.execute(KvRequest::counter(direction, request)).await? {
            KvResponse::Counter(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Sends `request`, retrying per the retry strategy.
    ///
    /// A non-success status becomes [`ClientError::ServerStatus`].
    pub async fn execute(&self, request: KvRequest) -> Result<KvResponse, ClientError> {
        request.validate()?;
        let timeout = self.timeout_for(&request);
        let mut lifecycle: Option<Lifecycle> = None;
        let mut tries = 0u32;

        loop {
            tries += 1;
            let sent_before = lifecycle.as_ref().map_or(0, |l| l.attempts());
            let (conn, result) = match self.connection().await {
                Ok(conn) => {
                    let lifecycle = lifecycle.get_or_insert_with(|| conn.lifecycle_for(&request));
                    let result = conn.attempt(&request, timeout, lifecycle).await;
                    (Some(conn), result.and_then(check_status))
                }
                Err(e) => (None, Err(e)),
            };

            let err = match result {
                Ok(response) => {
                    finish(&mut lifecycle, RequestState::Completed);
                    return Ok(response);
                }
                Err(e) => e,
            };

            let reason = match RetryReason::from_error(&err) {
                Some(reason) => reason,
                None => {
                    let end = match err {
                        ClientError::ServerStatus { .. } => RequestState::Completed,
                        _ => RequestState::Failed,
                    };
                    finish(&mut lifecycle, end);
                    return Err(err);
                }
            };

            // a frame that never reached the writer cannot have been applied
            let reached_wire = lifecycle.as_ref().map_or(0, |l| l.attempts()) > sent_before;
            let ctx = RetryContext::new(tries, reason)
                .idempotent(request.is_idempotent())
                .reached_wire(reached_wire);

            let delay = match self.retry.decide(&ctx) {
                RetryAction::RetryAfter(delay) => delay,
                RetryAction::GiveUp => {
                    tracing::debug!(tries, "giving up: {}", err);
                    finish(&mut lifecycle, RequestState::Failed);
                    return Err(err);
                }
            };

            if let Some(lifecycle) = lifecycle.as_mut() {
                if !matches!(lifecycle.state(), RequestState::Created | RequestState::Retried) {
                    lifecycle.transition(RequestState::Retried)?;
                }
            }
            tracing::debug!(tries, ?reason, ?delay, "retrying: {}", err);
            self.events.emit(Event::new(
                "request_retry",
                Severity::Debug,
                EventContext::builder()
                    .bucket(self.config.features.bucket.clone())
                    .field("key", request.doc_id().key.clone())
                    .field("attempt", tries)
                    .field("reason", format!("{:?}", reason))
                    .field("delay_ms", delay.as_millis() as u64)
                    .build(),
            ));
            if reason.needs_reconnect() {
                if let Some(conn) = conn {
                    self.invalidate(&conn);
                }
            }
            tokio::time::sleep(delay).await;
        }
    }

    fn timeout_for(&self, request: &KvRequest) -> Duration {
        if request.durability().is_some() {
            self.config.timeouts.kv_durable_timeout()
        } else {
            self.config.timeouts.kv_timeout()
        }
    }

    /// Returns a live connection, opening a new one if needed.
    async fn connection(&self) -> Result<Arc<Connection>, ClientError> {
        if let Some(conn) = self.live_connection() {
            return Ok(conn);
        }

        let _guard = self.reconnect.lock().await;
        // another caller may have reconnected while we waited
        if let Some(conn) = self.live_connection() {
            return Ok(conn);
        }

        let conn = Arc::new((self.factory)().await?);
        if let Some(stale) = self.current.write().replace(Arc::clone(&conn)) {
            stale.close();
        }
        Ok(conn)
    }

    fn live_connection(&self) -> Option<Arc<Connection>> {
        self.current
            .read()
            .as_ref()
            .filter(|conn| conn.is_connected())
            .cloned()
    }

    /// Drops `conn` so the next attempt reconnects.
    fn invalidate(&self, conn: &Arc<Connection>) {
        let mut current = self.current.write();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn)) {
            current.take();
            drop(current);
            conn.close();
        }
    }
}

fn check_status(response: KvResponse) -> Result<KvResponse, ClientError> {
    if response.is_success() {
        return Ok(response);
    }
    Err(ClientError::ServerStatus {
        status: response.status(),
        cas: response.cas(),
    })
}

fn finish(lifecycle: &mut Option<Lifecycle>, end: RequestState) {
    if let Some(lifecycle) = lifecycle.as_mut() {
        if !lifecycle.state().is_terminal() {
            let end = match (lifecycle.state(), end) {
                (RequestState::Sent { .. }, end) => end,
                _ => RequestState::Failed,
            };
            let _ = lifecycle.transition(end);
        }
    }
}

fn unexpected(response: KvResponse) -> ClientError {
    ClientError::MalformedResponse(format!("unexpected response shape: {:?}", response))
}
