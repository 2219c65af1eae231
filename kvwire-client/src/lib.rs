//! # kvwire-client
//!
//! Async client for the kvwire binary protocol.
//!
//! This crate provides:
//! - Request dispatch with opaque-id correlation and out-of-order responses
//! - Per-request lifecycle tracking with cancellation on drop
//! - Pluggable retry strategies and reconnect-before-retry
//! - Plain TCP or TLS transports
//! - YAML/environment configuration and structured client events

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod retry;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{Client, ConnectFuture, ConnectionFactory};
pub use config::{ClientConfig, ConfigError};
pub use connection::{Connection, ConnectionOptions};
pub use dispatch::{PendingGuard, PendingTable};
pub use error::ClientError;
pub use event::{Event, EventContext, EventSink, MemoryEventSink, Severity, TracingEventSink};
pub use lifecycle::{Lifecycle, RequestState};
pub use retry::{
    BestEffortRetryStrategy, FailFastRetryStrategy, RetryAction, RetryContext, RetryReason,
    RetryStrategy,
};
pub use transport::{Transport, TransportSecurity};
