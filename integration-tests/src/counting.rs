//! Client-side round trip accounting

use async_trait::async_trait;
use parking_lot::Mutex;
use redrate::{Cmd, Connection, TransportError, Value};
use std::sync::Arc;

/// Wraps a connection and records every batch submitted through it
///
/// Clones share the record, so one clone can back a limiter while another
/// is inspected.
#[derive(Debug, Clone)]
pub struct CountingConnection<C> {
    inner: C,
    batches: Arc<Mutex<Vec<Vec<Cmd>>>>,
}

impl<C> CountingConnection<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            batches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Round trips attempted so far, failed ones included
    pub fn round_trips(&self) -> usize {
        self.batches.lock().len()
    }

    /// Commands of the most recent round trip
    pub fn last_batch(&self) -> Vec<Cmd> {
        self.batches.lock().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl<C: Connection> Connection for CountingConnection<C> {
    async fn pipeline(&self, cmds: &[Cmd]) -> Result<Vec<Value>, TransportError> {
        self.batches.lock().push(cmds.to_vec());
        self.inner.pipeline(cmds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redrate::memory::MemoryStore;

    #[tokio::test]
    async fn test_records_batches() {
        let conn = CountingConnection::new(MemoryStore::new());
        let observer = conn.clone();
        assert_eq!(observer.round_trips(), 0);
        assert!(observer.last_batch().is_empty());

        conn.pipeline(&[Cmd::new("PING"), Cmd::new("GET").arg("k")])
            .await
            .unwrap();
        conn.pipeline(&[Cmd::new("PING")]).await.unwrap();

        assert_eq!(observer.round_trips(), 2);
        assert_eq!(observer.last_batch(), vec![Cmd::new("PING")]);
    }
}
