//! IdGenerator port - ジョブ ID 生成の抽象化
//!
//! # 実装
//! - **SequenceIdGenerator**: 起動時刻（ナノ秒）を種にした単調増加カウンタ
//!
//! Ids are unique for the lifetime of the process only. A restart reseeds
//! from the new startup time, which is later than any id handed out before.

use std::sync::{Arc, Mutex};

use crate::ports::Clock;

/// IdGenerator はジョブ ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（全コネクションで共有する）
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Monotonic counter rendered in base 32.
pub struct SequenceIdGenerator {
    counter: Mutex<u64>,
}

impl SequenceIdGenerator {
    /// Seed the counter from the clock's current nanosecond timestamp.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let seed = clock
            .now()
            .timestamp_nanos_opt()
            .map(|n| n.max(0) as u64)
            .unwrap_or_default();
        Self::with_seed(seed)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            counter: Mutex::new(seed),
        }
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> String {
        let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
        *counter = counter.wrapping_add(1);
        to_base32(*counter)
    }
}

const DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Lowercase base-32 rendering (`0-9a-v`).
pub fn to_base32(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::with_capacity(13);
    while n > 0 {
        buf.push(DIGITS[(n % 32) as usize]);
        n /= 32;
    }
    buf.reverse();
    // DIGITS is pure ASCII.
    String::from_utf8_lossy(&buf).into_owned()
}
