/// 时间戳工具
///
/// 撮合路径使用纳秒级墙钟时间作为订单的提交时间（FIFO 排序依据）。
/// 同一市场内的单调性由调用方在持锁时保证：
/// `ts = max(now, last + 1)`，参见 `monotonic_after`。

use std::time::{SystemTime, UNIX_EPOCH};

pub const NANOS_PER_MILLI: u64 = 1_000_000;

/// 获取精确时间戳（纳秒，无缓存）
#[inline]
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// 毫秒时间戳，用于 24h 滚动窗口等粗粒度统计
#[inline]
pub fn now_millis() -> u64 {
    now_nanos() / NANOS_PER_MILLI
}

/// Returns a timestamp strictly greater than `last`, preferring the wall clock.
#[inline]
pub fn monotonic_after(last: u64) -> u64 {
    now_nanos().max(last.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_precise_timestamp_always_updates() {
        let ts1 = now_nanos();
        thread::sleep(Duration::from_micros(100));
        let ts2 = now_nanos();
        assert!(ts2 > ts1, "Precise timestamp should always be fresh");
    }

    #[test]
    fn test_monotonic_after_clock_skew() {
        // 上一个时间戳来自“未来”（例如另一实例时钟更快）
        let future = now_nanos() + 10_000_000_000;
        assert_eq!(monotonic_after(future), future + 1);

        let past = now_nanos() - 1;
        assert!(monotonic_after(past) > past);
    }

    #[test]
    fn test_millis_matches_nanos() {
        let ms = now_millis();
        let ns = now_nanos();
        assert!(ns / NANOS_PER_MILLI >= ms);
    }
}
