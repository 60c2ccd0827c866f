//! Audit instrumentation: exactly one asynchronous log write per request.
//!
//! An [`AuditTicket`] is armed once per evaluated request. Blocked and
//! proxy-failure paths finalize it directly; forwarded responses carry it
//! inside an [`InstrumentedBody`], which fires it when the stream ends, errors
//! or is dropped by a disconnecting client. Firing consumes the ticket, so a
//! second write is impossible by construction.

use crate::metrics::MetricsCollector;
use crate::model::RequestLog;
use crate::storage::MemoryStore;
use bytes::Bytes;
use hyper::body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

/// Status recorded when the client goes away before the response finishes.
const STATUS_CLIENT_CLOSED: u16 = 499;

pub struct AuditTicket {
    inner: Option<TicketInner>,
}

struct TicketInner {
    store: Arc<MemoryStore>,
    metrics: Arc<MetricsCollector>,
    template: RequestLog,
    started: Instant,
}

impl AuditTicket {
    /// `template` carries everything known at decision time; response status
    /// and elapsed time are filled in at finalization.
    pub fn new(
        store: Arc<MemoryStore>,
        metrics: Arc<MetricsCollector>,
        template: RequestLog,
        started: Instant,
    ) -> Self {
        Self {
            inner: Some(TicketInner {
                store,
                metrics,
                template,
                started,
            }),
        }
    }

    /// Write the audit entry with the final status. Consumes the ticket.
    pub fn finalize(mut self, status: u16) {
        self.fire(status);
    }

    fn fire(&mut self, status: u16) {
        let Some(inner) = self.inner.take() else {
            return;
        };

        let elapsed_ms = inner.started.elapsed().as_millis() as u64;
        let mut entry = inner.template;
        entry.response_status = status;
        entry.response_time_ms = elapsed_ms;

        inner
            .metrics
            .record_request(&entry.method, status, elapsed_ms as f64 / 1000.0);

        let store = inner.store;
        let blocked = entry.is_blocked;
        // The write must not block response delivery; outside a runtime
        // (process teardown) the entry is dropped rather than panicking.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                store.create_request_log(entry).await;
                store.record_request(elapsed_ms as f64, blocked).await;
            });
        }
    }
}

impl Drop for AuditTicket {
    fn drop(&mut self) {
        self.fire(STATUS_CLIENT_CLOSED);
    }
}

/// Response body wrapper that fires its ticket exactly once on end-of-stream,
/// stream error, or drop.
pub struct InstrumentedBody<B> {
    inner: B,
    ticket: Option<AuditTicket>,
    status: u16,
}

impl<B> InstrumentedBody<B> {
    pub fn new(inner: B, ticket: AuditTicket, status: u16) -> Self {
        Self {
            inner,
            ticket: Some(ticket),
            status,
        }
    }

    fn fire(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            ticket.finalize(self.status);
        }
    }
}

impl<B> Body for InstrumentedBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    Self: Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(None) => {
                this.fire();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.fire();
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for InstrumentedBody<B> {
    fn drop(&mut self) {
        self.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use http_body_util::{BodyExt, Full};
    use std::time::Duration;

    fn template() -> RequestLog {
        RequestLog {
            id: 0,
            ip_address: "9.9.9.9".to_string(),
            method: "GET".to_string(),
            path: "/".to_string(),
            headers: Default::default(),
            body: String::new(),
            is_blocked: false,
            attack_type: None,
            rule_id: None,
            response_status: 0,
            response_time_ms: 0,
            domain_id: Some(1),
            country_code: None,
            timestamp: Utc::now(),
        }
    }

    async fn settle(store: &MemoryStore, expected: usize) {
        for _ in 0..50 {
            if store.request_log_count().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {expected} log entries");
    }

    #[tokio::test]
    async fn test_finalize_writes_one_entry() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(MetricsCollector::new());
        let ticket = AuditTicket::new(
            Arc::clone(&store),
            metrics,
            template(),
            Instant::now(),
        );

        ticket.finalize(502);
        settle(&store, 1).await;

        let logs = store
            .get_request_logs_since(Utc::now() - chrono::Duration::hours(1), None)
            .await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].response_status, 502);
        assert!(!logs[0].is_blocked);
    }

    #[tokio::test]
    async fn test_body_end_of_stream_fires_once() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(MetricsCollector::new());
        let ticket = AuditTicket::new(
            Arc::clone(&store),
            metrics,
            template(),
            Instant::now(),
        );

        let body = Full::new(Bytes::from_static(b"origin payload"));
        let mut wrapped = InstrumentedBody::new(body, ticket, 200);

        let mut payload = Vec::new();
        while let Some(frame) = wrapped.frame().await {
            if let Some(data) = frame.unwrap().data_ref() {
                payload.extend_from_slice(data);
            }
        }
        drop(wrapped);

        settle(&store, 1).await;
        assert_eq!(payload, b"origin payload");

        let logs = store
            .get_request_logs_since(Utc::now() - chrono::Duration::hours(1), None)
            .await;
        // drop after end-of-stream must not produce a second entry
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].response_status, 200);
    }

    #[tokio::test]
    async fn test_dropped_body_still_logs() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(MetricsCollector::new());
        let ticket = AuditTicket::new(
            Arc::clone(&store),
            metrics,
            template(),
            Instant::now(),
        );

        let body = Full::new(Bytes::from_static(b"never read"));
        let wrapped = InstrumentedBody::new(body, ticket, 200);
        drop(wrapped);

        settle(&store, 1).await;
        let logs = store
            .get_request_logs_since(Utc::now() - chrono::Duration::hours(1), None)
            .await;
        assert_eq!(logs[0].response_status, 200);
    }

    #[tokio::test]
    async fn test_unused_ticket_records_client_disconnect() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(MetricsCollector::new());
        let ticket = AuditTicket::new(
            Arc::clone(&store),
            metrics,
            template(),
            Instant::now(),
        );

        drop(ticket);
        settle(&store, 1).await;

        let logs = store
            .get_request_logs_since(Utc::now() - chrono::Duration::hours(1), None)
            .await;
        assert_eq!(logs[0].response_status, STATUS_CLIENT_CLOSED);
    }
}
