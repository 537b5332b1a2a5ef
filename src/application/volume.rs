/// Rolling 24h traded volume
///
/// Fed from `TradeExecuted` events, whether this instance matched them or
/// caught them up from the log, so every instance sharing a market computes
/// the same figure.

use crate::shared::timestamp::now_nanos;
use std::collections::VecDeque;

pub const WINDOW_NANOS: u64 = 24 * 60 * 60 * 1_000_000_000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeWindow {
    /// (executed_at, quantity), oldest first
    entries: VecDeque<(u64, u64)>,
}

impl VolumeWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, executed_at: u64, quantity: u64) {
        self.entries.push_back((executed_at, quantity));
        self.prune(now_nanos());
    }

    pub fn prune(&mut self, now: u64) {
        let cutoff = now.saturating_sub(WINDOW_NANOS);
        while self.entries.front().is_some_and(|(ts, _)| *ts < cutoff) {
            self.entries.pop_front();
        }
    }

    /// Volume traded in the 24h before `now`.
    pub fn volume_at(&self, now: u64) -> u64 {
        let cutoff = now.saturating_sub(WINDOW_NANOS);
        self.entries
            .iter()
            .filter(|(ts, _)| *ts >= cutoff)
            .map(|(_, qty)| qty)
            .sum()
    }

    pub fn volume_24h(&self) -> u64 {
        self.volume_at(now_nanos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_sums_recent_trades() {
        let now = now_nanos();
        let mut window = VolumeWindow::new();
        window.record(now - 1_000, 5);
        window.record(now, 3);
        assert_eq!(window.volume_at(now), 8);
        assert_eq!(window.volume_24h(), 8);
    }

    #[test]
    fn test_expired_trades_are_dropped() {
        let now = now_nanos();
        let mut window = VolumeWindow::new();
        window.record(now - WINDOW_NANOS - 1, 7);
        window.record(now, 2);
        assert_eq!(window.volume_at(now), 2);
        // 记录时已清理过期条目
        assert_eq!(window.entries.len(), 1);
    }

    #[test]
    fn test_window_moves_with_clock() {
        let mut window = VolumeWindow::new();
        let now = now_nanos();
        window.record(now, 4);
        assert_eq!(window.volume_at(now + WINDOW_NANOS), 4);
        assert_eq!(window.volume_at(now + WINDOW_NANOS + 1), 0);
    }
}
