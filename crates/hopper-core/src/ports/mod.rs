//! Ports - 抽象化レイヤー
//!
//! 時刻と ID 生成をトレイトで差し替え可能にしておく。
//! 本番では SystemClock / SequenceIdGenerator、テストでは FixedClock を使う。

pub mod clock;
pub mod id_generator;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, SequenceIdGenerator};
