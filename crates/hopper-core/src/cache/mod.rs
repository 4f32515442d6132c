//! Result cache - ジョブの戻り値を TTL 付きで保持する
//!
//! Producers block in `await_value` until a worker posts the result for their
//! job id, the deadline passes, or their connection goes away.

mod item;
mod store;

pub use item::CacheItem;
pub use store::{DEFAULT_RESULT_TTL, ResultCache};
