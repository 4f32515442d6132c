//! BrokerBuilder - 設定からブローカーを組み立てる
//!
//! # 学習ポイント
//! - Builder パターンでストア・時計・ID 生成器を差し替え可能にする
//! - 起動時検証（Fail-fast 設計）: 設定の妥当性と必須コマンドの登録漏れを build() で検出

use std::sync::Arc;

use super::commands;
use super::runtime::{CommandHandler, HandlerRegistry, Runtime, Services};
use crate::cache::ResultCache;
use crate::config::BrokerConfig;
use crate::error::{HopperError, Result};
use crate::ports::{Clock, IdGenerator, SequenceIdGenerator, SystemClock};
use crate::queue::JobStore;

/// Wires a [`BrokerConfig`] into a ready-to-serve [`Runtime`].
///
/// # 使用例
/// ```ignore
/// let runtime = BrokerBuilder::new(config)
///     .with_default_commands()?
///     .expect_commands(&commands::ALL)
///     .build()?;
/// ```
pub struct BrokerBuilder {
    config: BrokerConfig,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    registry: HandlerRegistry,
    expected_commands: Option<Vec<String>>,
}

impl BrokerBuilder {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            ids: None,
            registry: HandlerRegistry::new(),
            expected_commands: None,
        }
    }

    /// Clock used for TTLs, tube retention and id seeding.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Register the seven stock commands.
    pub fn with_default_commands(mut self) -> Result<Self> {
        commands::register_defaults(&mut self.registry)?;
        Ok(self)
    }

    pub fn register(mut self, name: &str, handler: Arc<dyn CommandHandler>) -> Result<Self> {
        self.registry.register(name, handler)?;
        Ok(self)
    }

    /// Commands that must be registered by the time `build()` runs.
    pub fn expect_commands(mut self, names: &[&str]) -> Self {
        self.expected_commands = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// # 検証
    /// - 設定の妥当性 (`BrokerConfig::validate`)
    /// - expect_commands() の全コマンドが登録済みか
    pub fn build(self) -> Result<Runtime> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_commands {
            let registered = self.registry.names();
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !registered.contains(name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(HopperError::MissingHandlers(missing));
            }
        }

        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(SequenceIdGenerator::new(Arc::clone(&self.clock))));
        let services = Services {
            jobs: JobStore::new(
                self.config.shard_count,
                self.config.tube_retention(),
                Arc::clone(&self.clock),
            ),
            cache: ResultCache::new(self.config.shard_count, Arc::clone(&self.clock)),
            ids,
            config: self.config,
        };

        Ok(Runtime::new(Arc::new(self.registry), Arc::new(services)))
    }
}
