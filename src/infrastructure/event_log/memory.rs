use super::{check_batch, EventLog, EventLogError};
use crate::domain::entities::MarketKey;
use crate::domain::events::MarketEvent;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// In-process event log.
///
/// Several engines sharing one `Arc<InMemoryEventLog>` behave like instances
/// sharing a durable log. Failure and latency can be injected for tests.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    streams: RwLock<HashMap<MarketKey, Vec<MarketEvent>>>,
    offsets: RwLock<HashMap<(String, MarketKey), u64>>,
    fail_appends: AtomicBool,
    append_delay_ms: AtomicU64,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `append` fail until switched off.
    pub fn inject_append_failures(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Delays every following `append`.
    pub fn set_append_delay(&self, delay: Duration) {
        self.append_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn len(&self, market: MarketKey) -> usize {
        self.streams.read().get(&market).map_or(0, Vec::len)
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, market: MarketKey, events: &[MarketEvent]) -> Result<u64, EventLogError> {
        let delay = self.append_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(EventLogError::Unavailable("injected append failure".into()));
        }

        let mut streams = self.streams.write();
        let stream = streams.entry(market).or_default();
        let last = stream.last().map_or(0, |e| e.sequence);
        check_batch(market, last, events)?;
        stream.extend_from_slice(events);
        Ok(stream.last().map_or(0, |e| e.sequence))
    }

    async fn read_from(&self, market: MarketKey, from_sequence: u64) -> Result<Vec<MarketEvent>, EventLogError> {
        let streams = self.streams.read();
        Ok(streams
            .get(&market)
            .map(|s| s.iter().filter(|e| e.sequence >= from_sequence).cloned().collect())
            .unwrap_or_default())
    }

    async fn last_sequence(&self, market: MarketKey) -> Result<u64, EventLogError> {
        Ok(self
            .streams
            .read()
            .get(&market)
            .and_then(|s| s.last())
            .map_or(0, |e| e.sequence))
    }

    async fn markets(&self) -> Result<Vec<MarketKey>, EventLogError> {
        let mut markets: Vec<_> = self
            .streams
            .read()
            .iter()
            .filter(|(_, s)| !s.is_empty())
            .map(|(k, _)| *k)
            .collect();
        markets.sort();
        Ok(markets)
    }

    async fn commit_offset(&self, consumer: &str, market: MarketKey, sequence: u64) -> Result<(), EventLogError> {
        let mut offsets = self.offsets.write();
        let entry = offsets.entry((consumer.to_string(), market)).or_insert(0);
        *entry = (*entry).max(sequence);
        Ok(())
    }

    async fn committed_offset(&self, consumer: &str, market: MarketKey) -> Result<u64, EventLogError> {
        Ok(self
            .offsets
            .read()
            .get(&(consumer.to_string(), market))
            .copied()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::submitted;
    use super::*;

    const MARKET: MarketKey = MarketKey::new(4, 1);

    #[tokio::test]
    async fn test_append_and_read() {
        let log = InMemoryEventLog::new();
        let last = log
            .append(MARKET, &[submitted(MARKET, 1, 1), submitted(MARKET, 2, 2)])
            .await
            .unwrap();
        assert_eq!(last, 2);
        assert_eq!(log.last_sequence(MARKET).await.unwrap(), 2);

        let tail = log.read_from(MARKET, 2).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].sequence, 2);
        assert_eq!(log.markets().await.unwrap(), vec![MARKET]);
    }

    #[tokio::test]
    async fn test_conflicting_append_rejected_atomically() {
        let log = InMemoryEventLog::new();
        log.append(MARKET, &[submitted(MARKET, 1, 1)]).await.unwrap();

        let err = log
            .append(MARKET, &[submitted(MARKET, 2, 2), submitted(MARKET, 4, 3)])
            .await
            .unwrap_err();
        assert!(matches!(err, EventLogError::SequenceConflict { expected: 3, got: 4, .. }));
        assert_eq!(log.len(MARKET), 1);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let log = InMemoryEventLog::new();
        log.inject_append_failures(true);
        assert!(log.append(MARKET, &[submitted(MARKET, 1, 1)]).await.is_err());
        log.inject_append_failures(false);
        assert!(log.append(MARKET, &[submitted(MARKET, 1, 1)]).await.is_ok());
    }

    #[tokio::test]
    async fn test_offsets_only_move_forward() {
        let log = InMemoryEventLog::new();
        assert_eq!(log.committed_offset("settlement", MARKET).await.unwrap(), 0);
        log.commit_offset("settlement", MARKET, 5).await.unwrap();
        log.commit_offset("settlement", MARKET, 3).await.unwrap();
        assert_eq!(log.committed_offset("settlement", MARKET).await.unwrap(), 5);
        assert_eq!(log.committed_offset("cache", MARKET).await.unwrap(), 0);
    }
}
