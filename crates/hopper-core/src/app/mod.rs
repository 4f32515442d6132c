//! App - アプリケーション層
//!
//! ストアとプロトコルを組み合わせてコマンドを実行する。
//!
//! # 主要コンポーネント
//! - **BrokerBuilder**: 設定からストア・ID 生成・コマンド表を組み立てる
//! - **Runtime**: コマンド名で handler を引いて実行する
//! - **commands**: AddJob / GetJob / SetReturn / GetReturn / Usr1 / Status / StopServer
//! - **ReaperLoop**: 期限切れの結果・完了済みジョブ・放置された tube の回収

pub mod builder;
pub mod commands;
pub mod reaper_loop;
pub mod runtime;

// 主要な型を再エクスポート
pub use self::builder::BrokerBuilder;
pub use self::reaper_loop::{ReapReport, ReaperLoop};
pub use self::runtime::{CommandHandler, HandlerRegistry, RequestContext, Runtime, Services};
