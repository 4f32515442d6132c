//! Runtime - コマンドの登録とディスパッチ

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::cache::ResultCache;
use crate::config::BrokerConfig;
use crate::domain::SessionId;
use crate::error::{HopperError, Result};
use crate::observability::BrokerCounts;
use crate::ports::IdGenerator;
use crate::protocol::{Frame, Reply};
use crate::queue::JobStore;

/// Process-wide state every command runs against.
///
/// Built once at startup and shared by reference; nothing here is global.
pub struct Services {
    pub jobs: JobStore,
    pub cache: ResultCache,
    pub ids: Arc<dyn IdGenerator>,
    pub config: BrokerConfig,
}

impl Services {
    pub async fn counts(&self) -> BrokerCounts {
        BrokerCounts {
            queue: self.jobs.counts().await,
            cache: self.cache.counts().await,
        }
    }
}

/// Per-request view of the connection issuing it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session: SessionId,
    /// Fires when the connection goes away (or the server stops).
    pub cancel: CancellationToken,
    /// Cancelling this stops the whole server.
    pub shutdown: CancellationToken,
}

/// A handler for one command name.
///
/// `args` excludes the command name itself. `Ok(None)` means the request was
/// abandoned (its connection closed mid-wait) and nothing must be written.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        services: &Services,
        ctx: &RequestContext,
        args: &[Bytes],
    ) -> Result<Option<Reply>>;
}

/// Registry of handlers (command name -> handler).
///
/// Filled during startup, read-only afterwards, so no lock.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn is_valid_command_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, handler: Arc<dyn CommandHandler>) -> Result<()> {
        if !is_valid_command_name(name) {
            return Err(HopperError::InvalidCommandName(name.to_string()));
        }
        if self.handlers.contains_key(name) {
            return Err(HopperError::DuplicateHandler(name.to_string()));
        }
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CommandHandler>> {
        self.handlers.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Runtime executes a request frame by dispatching to a registered handler.
pub struct Runtime {
    registry: Arc<HandlerRegistry>,
    services: Arc<Services>,
}

impl Runtime {
    pub fn new(registry: Arc<HandlerRegistry>, services: Arc<Services>) -> Self {
        Self { registry, services }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Execute one request.
    ///
    /// Unknown commands get `404`; a handler error is logged and becomes `-1`.
    /// `None` means no reply is owed (empty frame or abandoned wait).
    pub async fn dispatch(&self, ctx: &RequestContext, frame: &Frame) -> Option<Reply> {
        let (name, args) = frame.split_first()?;
        let name = String::from_utf8_lossy(name);

        let Some(handler) = self.registry.get(&name) else {
            tracing::debug!(session = %ctx.session, command = %name, "unknown command");
            return Some(Reply::not_found("unknown command"));
        };

        match handler.handle(&self.services, ctx, args).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(session = %ctx.session, command = %name, error = %e, "command failed");
                Some(Reply::internal())
            }
        }
    }
}
