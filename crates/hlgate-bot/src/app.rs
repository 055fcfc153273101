//! Main application orchestration.
//!
//! Wires the admission and execution pipeline:
//! - Reference prices and risk limits for the validator
//! - Circuit breakers, budget guard and live guard
//! - Idempotency cache, order bus and audit sink
//! - Order rate limiter and submission client
//!
//! Intents arrive as JSON Lines (one `OrderIntent` per line) from a file or
//! stdin. Each is admitted through the bus and, when accepted, executed.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::paper::PaperExecutionClient;
use hlgate_core::{EnqueuedResult, OrderIntent, Price, Symbol};
use hlgate_executor::{
    Channel, ExecutionClient, ExecutionOutcome, ExecutorConfig, IdempotencyCache, OrderBus,
    OrderExecutor, RateLimiters, SubmissionClient,
};
use hlgate_persistence::{AuditSink, JsonLinesAuditSink};
use hlgate_risk::{
    BudgetGuard, CircuitBreakers, DataHealth, LiveGuard, OrderValidator, Positions,
    StaticDataHealth, StaticPriceProvider,
};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, error, info, warn};

/// Per-run counters, logged on shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub lines: usize,
    pub invalid: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub failed: usize,
    pub executed: usize,
}

/// What happened to one intent.
#[derive(Debug, Clone)]
pub struct IntentOutcome {
    pub enqueued: EnqueuedResult,
    /// Present when the order was accepted and execution ran.
    pub execution: Option<ExecutionOutcome>,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    prices: Arc<StaticPriceProvider>,
    health: Arc<StaticDataHealth>,
    breakers: Arc<CircuitBreakers>,
    budget: Arc<BudgetGuard>,
    bus: Arc<OrderBus>,
    executor: OrderExecutor,
    positions: Positions,
    stats: RunStats,
}

impl Application {
    /// Create an application with the paper client and a file audit sink
    /// under `config.audit.dir`.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let sink = Arc::new(JsonLinesAuditSink::new(&config.audit.dir)?);
        Self::with_client(config, Arc::new(PaperExecutionClient::new()), sink)
    }

    /// Create an application around a specific exchange client and sink.
    pub fn with_client(
        config: AppConfig,
        client: Arc<dyn ExecutionClient>,
        sink: Arc<dyn AuditSink>,
    ) -> AppResult<Self> {
        config.validate()?;

        let prices = Arc::new(StaticPriceProvider::with_reference_prices());
        for (symbol, px) in config.reference_prices()? {
            prices.set_price(symbol, Price::new(px));
        }
        let validator = Arc::new(OrderValidator::new(
            config.risk.limits.clone(),
            prices.clone(),
        ));

        let breakers = Arc::new(CircuitBreakers::new(
            config.breaker.defaults.clone(),
            config.breaker.paths.clone(),
        ));
        let budget = Arc::new(BudgetGuard::new(config.budget.clone())?);
        let health = Arc::new(StaticDataHealth::new(DataHealth::Healthy));
        let guard = Arc::new(LiveGuard::new(
            config.trading.live_guard,
            health.clone(),
            Arc::clone(&breakers),
            Arc::clone(&budget),
        ));

        let idempotency = Arc::new(IdempotencyCache::new(config.idempotency.clone()));
        let bus = Arc::new(OrderBus::new(
            config.order_bus(),
            idempotency,
            validator,
            sink,
        ));

        let limiters = RateLimiters::new(&config.rate_limit)?;
        let submission = Arc::new(SubmissionClient::new(
            client,
            Arc::clone(limiters.bucket(Channel::Order)),
            limiters.acquire_timeout(),
            config.retry.clone(),
        ));
        let executor = OrderExecutor::new(
            ExecutorConfig {
                trading_enabled: config.trading.enabled,
                breaker_path: config.trading.default_path.clone(),
            },
            Arc::clone(&bus),
            guard,
            Arc::clone(&breakers),
            Arc::clone(&budget),
            submission,
        );

        info!(
            trading_enabled = config.trading.enabled,
            live_guard = config.trading.live_guard,
            auto_clip = config.risk.auto_clip,
            breaker_path = %config.trading.default_path,
            "Application initialized"
        );

        Ok(Self {
            config,
            prices,
            health,
            breakers,
            budget,
            bus,
            executor,
            positions: Positions::new(),
            stats: RunStats::default(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<OrderBus> {
        &self.bus
    }

    #[must_use]
    pub fn executor(&self) -> &OrderExecutor {
        &self.executor
    }

    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    #[must_use]
    pub fn budget(&self) -> &Arc<BudgetGuard> {
        &self.budget
    }

    #[must_use]
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Market data health seen by the live guard.
    pub fn set_data_health(&self, status: DataHealth) {
        self.health.set(status);
    }

    pub fn set_reference_price(&self, symbol: Symbol, px: Price) {
        self.prices.set_price(symbol, px);
    }

    /// Signed position used for exposure checks on later intents.
    pub fn set_position(&mut self, symbol: Symbol, qty: Decimal) {
        self.positions.insert(symbol, qty);
    }

    /// Admit one intent and execute it if accepted.
    pub async fn handle_intent(&mut self, intent: &OrderIntent) -> AppResult<IntentOutcome> {
        intent.check_invariants()?;

        let enqueued = self.bus.submit(intent, &self.positions);
        if enqueued.idempotent {
            self.stats.duplicates += 1;
            debug!(intent_id = %enqueued.intent_id, "Duplicate intent ignored");
            return Ok(IntentOutcome {
                enqueued,
                execution: None,
            });
        }

        let Some(order_id) = enqueued.order_id.clone() else {
            match &enqueued.validation {
                Some(v) if !v.valid => self.stats.rejected += 1,
                _ => self.stats.failed += 1,
            }
            info!(
                intent_id = %enqueued.intent_id,
                classification = ?enqueued.classification,
                error = enqueued.error.as_deref().unwrap_or(""),
                "Intent not admitted"
            );
            return Ok(IntentOutcome {
                enqueued,
                execution: None,
            });
        };

        self.stats.accepted += 1;
        let execution = self.executor.execute(&order_id).await?;
        self.stats.executed += 1;
        Ok(IntentOutcome {
            enqueued,
            execution: Some(execution),
        })
    }

    /// Parse one JSON Lines record. Blank lines and `#` comments yield None.
    pub fn parse_line(line_no: usize, line: &str) -> AppResult<Option<OrderIntent>> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }
        serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|e| AppError::Intent {
                line: line_no,
                reason: e.to_string(),
            })
    }

    /// Process every intent from `reader`. Bad lines are logged and
    /// skipped; executor and audit errors stop the run.
    pub async fn process_reader<R>(&mut self, reader: R) -> AppResult<RunStats>
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        let mut line_no = 0usize;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    line_no += 1;
                    self.process_line(line_no, &line).await?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.log_summary();
        Ok(self.stats)
    }

    async fn process_line(&mut self, line_no: usize, line: &str) -> AppResult<()> {
        let intent = match Self::parse_line(line_no, line) {
            Ok(Some(intent)) => intent,
            Ok(None) => return Ok(()),
            Err(e) => {
                self.stats.invalid += 1;
                warn!(%e, "Skipping unparseable intent");
                return Ok(());
            }
        };
        self.stats.lines += 1;

        match self.handle_intent(&intent).await {
            Ok(outcome) => {
                if let Some(exec) = outcome.execution {
                    info!(
                        intent_id = %intent.intent_id,
                        order_id = %exec.order_id,
                        status = %exec.status,
                        dry_run = exec.dry_run,
                        "Intent processed"
                    );
                }
                Ok(())
            }
            Err(AppError::Core(e)) => {
                self.stats.invalid += 1;
                warn!(line = line_no, %e, "Skipping malformed intent");
                Ok(())
            }
            Err(e) => {
                error!(line = line_no, %e, "Intent processing failed");
                Err(e)
            }
        }
    }

    /// Process intents from `path`, or stdin when None.
    pub async fn run(mut self, path: Option<&Path>) -> AppResult<RunStats> {
        match path {
            Some(path) => {
                info!(path = %path.display(), "Reading intents from file");
                let file = tokio::fs::File::open(path).await?;
                self.process_reader(file).await
            }
            None => {
                info!("Reading intents from stdin");
                self.process_reader(tokio::io::stdin()).await
            }
        }
    }

    fn log_summary(&self) {
        let s = &self.stats;
        info!(
            lines = s.lines,
            invalid = s.invalid,
            accepted = s.accepted,
            duplicates = s.duplicates,
            rejected = s.rejected,
            failed = s.failed,
            executed = s.executed,
            pending_orders = self.bus.order_count(),
            "Final statistics summary"
        );
        let tripped = self.breakers.tripped_paths();
        if !tripped.is_empty() {
            warn!(?tripped, "Breakers tripped at shutdown");
        }
        let budget = self.budget.status();
        if budget.triggered {
            warn!(?budget, "Budget guard triggered at shutdown");
        }
    }
}
