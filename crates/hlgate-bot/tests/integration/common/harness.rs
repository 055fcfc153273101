//! Application harness for integration tests.
//!
//! Builds an `Application` around a scripted exchange client and an
//! in-memory audit sink so tests can inspect every call and event.

use hlgate_bot::{AppConfig, Application};
use hlgate_core::{AuditEvent, AuditEventKind};
use hlgate_executor::MockExecutionClient;
use hlgate_persistence::MemoryAuditSink;
use std::sync::Arc;

pub struct Harness {
    pub app: Application,
    pub sink: Arc<MemoryAuditSink>,
    pub exchange: Arc<MockExecutionClient>,
}

impl Harness {
    /// Default config with live trading switched on.
    pub fn live() -> Self {
        let mut config = AppConfig::default();
        config.trading.enabled = true;
        Self::with_config(config)
    }

    pub fn with_config(config: AppConfig) -> Self {
        let sink = Arc::new(MemoryAuditSink::new());
        let exchange = Arc::new(MockExecutionClient::new());
        let app = Application::with_client(config, exchange.clone(), sink.clone())
            .expect("application should build");
        Self {
            app,
            sink,
            exchange,
        }
    }

    /// Audit events of one kind, oldest first.
    pub fn events(&self, kind: AuditEventKind) -> Vec<AuditEvent> {
        self.sink
            .events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}
