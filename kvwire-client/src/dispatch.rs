//! Correlation of in-flight requests to responses by opaque id.

use crate::error::ClientError;
use kvwire_protocol::{ProtocolError, ResponseFrame};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Default bound on concurrently outstanding requests per connection.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4096;

/// Hard ceiling on the in-flight bound, far below the opaque id range.
pub const MAX_IN_FLIGHT_LIMIT: usize = 1 << 20;

/// What the reader delivers for one opaque id.
pub type ResponseResult = Result<ResponseFrame, ProtocolError>;

struct Inner {
    next_opaque: u32,
    entries: HashMap<u32, oneshot::Sender<ResponseResult>>,
    closed: bool,
}

/// Table of requests awaiting a response on one connection.
///
/// The lock is only ever held for a map operation, never across an await.
pub struct PendingTable {
    inner: Mutex<Inner>,
    max_in_flight: usize,
}

impl PendingTable {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_opaque: 1,
                entries: HashMap::new(),
                closed: false,
            }),
            max_in_flight: max_in_flight.clamp(1, MAX_IN_FLIGHT_LIMIT),
        }
    }

    /// Allocates an opaque id and a slot for its response.
    ///
    /// Ids wrap around; any id still in flight is skipped so a late response
    /// can never complete the wrong request.
    pub fn register(
        self: &Arc<Self>,
    ) -> Result<(PendingGuard, oneshot::Receiver<ResponseResult>), ClientError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(ClientError::ConnectionClosed);
        }
        if inner.entries.len() >= self.max_in_flight {
            return Err(ClientError::TooManyInFlight {
                limit: self.max_in_flight,
            });
        }

        let mut opaque = inner.next_opaque;
        while inner.entries.contains_key(&opaque) {
            opaque = opaque.wrapping_add(1);
        }
        inner.next_opaque = opaque.wrapping_add(1);

        let (tx, rx) = oneshot::channel();
        inner.entries.insert(opaque, tx);
        drop(inner);

        Ok((
            PendingGuard {
                table: Arc::clone(self),
                opaque,
            },
            rx,
        ))
    }

    /// Delivers a response to the request registered under `opaque`.
    ///
    /// Returns `false` when nothing is waiting for it (timed out, cancelled,
    /// or never sent); the response is dropped.
    pub fn complete(&self, opaque: u32, response: ResponseResult) -> bool {
        let sender = self.inner.lock().entries.remove(&opaque);
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                tracing::debug!(opaque, "no pending request, response discarded");
                false
            }
        }
    }

    /// Drops every waiting request; their receivers observe a closed channel.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.inner.lock().entries.drain().collect();
        drained.len()
    }

    /// Fails everything in flight and rejects new registrations.
    pub fn close(&self) -> usize {
        self.inner.lock().closed = true;
        self.fail_all()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    fn remove(&self, opaque: u32) -> bool {
        self.inner.lock().entries.remove(&opaque).is_some()
    }

    #[cfg(test)]
    fn set_next_opaque(&self, opaque: u32) {
        self.inner.lock().next_opaque = opaque;
    }
}

/// Owns one pending entry; dropping it withdraws the request.
pub struct PendingGuard {
    table: Arc<PendingTable>,
    opaque: u32,
}

impl PendingGuard {
    pub fn opaque(&self) -> u32 {
        self.opaque
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.table.remove(self.opaque) {
            tracing::trace!(opaque = self.opaque, "pending entry withdrawn");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvwire_protocol::{build_response, Datatype, Opcode, ResponseHeader, Status};

    fn frame(opaque: u32) -> ResponseResult {
        let raw = build_response(
            ResponseHeader {
                opcode: Opcode::Get,
                datatype: Datatype::new(),
                status: Status::Success,
                opaque,
                cas: 0,
            },
            &[0, 0, 0, 0],
            &[],
            b"v",
        )
        .unwrap();
        ResponseFrame::parse(raw.freeze())
    }

    #[tokio::test]
    async fn test_complete_out_of_order() {
        let table = Arc::new(PendingTable::new(16));
        let (g1, rx1) = table.register().unwrap();
        let (g2, rx2) = table.register().unwrap();
        assert_ne!(g1.opaque(), g2.opaque());

        assert!(table.complete(g2.opaque(), frame(g2.opaque())));
        assert!(table.complete(g1.opaque(), frame(g1.opaque())));

        assert_eq!(rx1.await.unwrap().unwrap().opaque(), g1.opaque());
        assert_eq!(rx2.await.unwrap().unwrap().opaque(), g2.opaque());
        assert!(table.is_empty());
    }

    #[test]
    fn test_completes_exactly_once() {
        let table = Arc::new(PendingTable::new(16));
        let (guard, _rx) = table.register().unwrap();
        assert!(table.complete(guard.opaque(), frame(guard.opaque())));
        assert!(!table.complete(guard.opaque(), frame(guard.opaque())));
    }

    #[test]
    fn test_unknown_opaque_discarded() {
        let table = Arc::new(PendingTable::new(16));
        let (_guard, _rx) = table.register().unwrap();
        assert!(!table.complete(9999, frame(9999)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_guard_drop_withdraws() {
        let table = Arc::new(PendingTable::new(16));
        let (guard, _rx) = table.register().unwrap();
        let opaque = guard.opaque();
        drop(guard);
        assert!(table.is_empty());
        assert!(!table.complete(opaque, frame(opaque)));
    }

    #[test]
    fn test_in_flight_bound() {
        let table = Arc::new(PendingTable::new(2));
        let _a = table.register().unwrap();
        let _b = table.register().unwrap();
        assert!(matches!(
            table.register(),
            Err(ClientError::TooManyInFlight { limit: 2 })
        ));
    }

    #[test]
    fn test_wraparound_skips_in_flight_ids() {
        let table = Arc::new(PendingTable::new(16));
        table.set_next_opaque(u32::MAX);
        let (a, _ra) = table.register().unwrap();
        let (b, _rb) = table.register().unwrap();
        assert_eq!(a.opaque(), u32::MAX);
        assert_eq!(b.opaque(), 0);

        // force the counter back onto ids that are still outstanding
        table.set_next_opaque(u32::MAX);
        let (c, _rc) = table.register().unwrap();
        assert_eq!(c.opaque(), 1);
    }

    #[tokio::test]
    async fn test_fail_all_closes_receivers() {
        let table = Arc::new(PendingTable::new(16));
        let (_g, rx) = table.register().unwrap();
        assert_eq!(table.close(), 1);
        assert!(rx.await.is_err());
        assert!(matches!(table.register(), Err(ClientError::ConnectionClosed)));
    }

    #[test]
    fn test_concurrent_register_and_complete() {
        let table = Arc::new(PendingTable::new(DEFAULT_MAX_IN_FLIGHT));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let (guard, mut rx) = table.register().unwrap();
                        assert!(table.complete(guard.opaque(), frame(guard.opaque())));
                        assert_eq!(rx.try_recv().unwrap().unwrap().opaque(), guard.opaque());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(table.is_empty());
    }
}
