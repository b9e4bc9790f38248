// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! One-shot value reads.
//!
//! One request per call, no caching. A Bad status from the server is
//! surfaced as [`OperationError::BadStatus`]; Good and Uncertain values are
//! returned as read.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::client::{DataValue, SessionInfo, UaTransport};
use crate::error::{OpcUaErrorContext, OpcUaResult, OperationError, TimeoutError};
use crate::types::NodeId;

/// Reads node values over an established session.
pub struct VariableReader {
    transport: Arc<dyn UaTransport>,
    request_timeout: Duration,
    reads: AtomicU64,
    failures: AtomicU64,
}

impl VariableReader {
    /// Creates a reader.
    pub fn new(transport: Arc<dyn UaTransport>, request_timeout: Duration) -> Self {
        Self {
            transport,
            request_timeout,
            reads: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Reads the current value of `node_id`.
    pub async fn read_value(&self, session: &SessionInfo, node_id: &NodeId) -> OpcUaResult<DataValue> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let result = match tokio::time::timeout(
            self.request_timeout,
            self.transport.read_value(session, node_id),
        )
        .await
        {
            Ok(Ok(value)) if value.is_bad() => {
                Err(OperationError::bad_status(node_id.to_string(), value.status_code.0).into())
            }
            Ok(result) => result,
            Err(_) => Err(TimeoutError::read(self.request_timeout).into()),
        };

        if result.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        result.with_node(&node_id.to_string())
    }

    /// Returns `(reads, failures)`.
    pub fn counters(&self) -> (u64, u64) {
        (
            self.reads.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        )
    }
}

impl fmt::Debug for VariableReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableReader")
            .field("transport", &self.transport.display_name())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{FaultPoint, SessionRequest, SimulatedTransport, Variant};
    use crate::types::{ConnectionStrategy, Endpoint};

    async fn setup() -> (Arc<SimulatedTransport>, SessionInfo) {
        let transport = Arc::new(SimulatedTransport::new());
        transport.add_variable(NodeId::numeric(2, 5), "Temperature", 20.5);
        transport
            .connect(&Endpoint::new("localhost", 4840).unwrap(), &ConnectionStrategy::default())
            .await
            .unwrap();
        let session = transport
            .create_session(&SessionRequest {
                application_name: "test".into(),
                session_name: "test".into(),
                timeout: Duration::from_secs(60),
            })
            .await
            .unwrap();
        (transport, session)
    }

    #[tokio::test]
    async fn test_read_value() {
        let (transport, session) = setup().await;
        let reader = VariableReader::new(transport.clone(), Duration::from_secs(1));

        let value = reader.read_value(&session, &NodeId::numeric(2, 5)).await.unwrap();
        assert_eq!(value.value, Variant::Double(20.5));
        assert!(value.is_good());
        assert_eq!(reader.counters(), (1, 0));
    }

    #[tokio::test]
    async fn test_read_unknown_node_surfaces_bad_status() {
        let (transport, session) = setup().await;
        let reader = VariableReader::new(transport.clone(), Duration::from_secs(1));

        let error = reader
            .read_value(&session, &NodeId::numeric(2, 404))
            .await
            .unwrap_err();
        assert_eq!(error.category(), "operation");
        assert!(error.to_string().contains("BadNodeIdUnknown"));
        assert_eq!(reader.counters(), (1, 1));
    }

    #[tokio::test]
    async fn test_read_fault_is_verbatim() {
        let (transport, session) = setup().await;
        transport.fail_next(FaultPoint::Read);
        let reader = VariableReader::new(transport.clone(), Duration::from_secs(1));

        let error = reader
            .read_value(&session, &NodeId::numeric(2, 5))
            .await
            .unwrap_err();
        assert_eq!(error.category(), "operation");

        // The fault is one-shot.
        assert!(reader.read_value(&session, &NodeId::numeric(2, 5)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_times_out() {
        let (transport, session) = setup().await;
        transport.set_delay(FaultPoint::Read, Duration::from_secs(30));
        let reader = VariableReader::new(transport.clone(), Duration::from_millis(500));

        let error = reader
            .read_value(&session, &NodeId::numeric(2, 5))
            .await
            .unwrap_err();
        assert_eq!(error.category(), "timeout");
    }
}
