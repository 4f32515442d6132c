//! hopper-core
//!
//! In-memory job broker: producers push work onto named tubes, workers reserve
//! it, and producers block on a result cache until the worker posts back.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（Job の状態遷移, SessionId）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator）
//! - **shard / waiter**: ストア共通の部品（シャーディング, 待ち合わせ登録簿）
//! - **queue**: Tube と JobStore（予約・完了・切断時の復旧）
//! - **cache**: TTL 付き結果キャッシュ（ブロッキング取得）
//! - **protocol**: フレームの codec と返信
//! - **app**: コマンド実行（builder, runtime, commands, reaper_loop）
//! - **server / client**: TCP の入口と出口

pub mod app;
pub mod cache;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod ports;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod shard;
pub mod waiter;

// 主要な型を再エクスポート
pub use app::{BrokerBuilder, Runtime};
pub use client::{Client, GetReturnOutcome};
pub use config::BrokerConfig;
pub use error::{HopperError, Result};
pub use server::Server;
