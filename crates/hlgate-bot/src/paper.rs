//! Paper execution client.
//!
//! Acknowledges every order without contacting an exchange. Used when no
//! signed exchange client is wired in.

use hlgate_executor::{BoxFuture, ExchangeError, ExchangeResponse, ExecutionClient, OrderPayload};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Default)]
pub struct PaperExecutionClient {
    orders_sent: AtomicU64,
}

impl PaperExecutionClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn orders_sent(&self) -> u64 {
        self.orders_sent.load(Ordering::Relaxed)
    }
}

impl ExecutionClient for PaperExecutionClient {
    fn send_order<'a>(
        &'a self,
        payload: &'a OrderPayload,
    ) -> BoxFuture<'a, Result<ExchangeResponse, ExchangeError>> {
        Box::pin(async move {
            self.orders_sent.fetch_add(1, Ordering::Relaxed);
            debug!(
                client_order_id = %payload.client_order_id,
                asset = payload.asset,
                is_buy = payload.is_buy,
                size = %payload.size,
                "Paper order acknowledged"
            );
            Ok(ExchangeResponse {
                order_id: Some(format!("paper_{}", payload.client_order_id)),
                raw: json!({ "status": "ok", "paper": true }),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlgate_core::{OrderId, OrderIntent, OrderSide, Size, Symbol};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_paper_client_acknowledges() {
        let intent = OrderIntent::market(Symbol::Sol, OrderSide::Buy, Size::new(dec!(2))).unwrap();
        let order_id = OrderId::derive(&intent.intent_id, 1_700_000_000_000, 1);
        let payload = OrderPayload::from_order(&order_id, &intent);

        let client = PaperExecutionClient::new();
        let response = client.send_order(&payload).await.unwrap();

        assert_eq!(
            response.order_id,
            Some(format!("paper_{}", payload.client_order_id))
        );
        assert_eq!(response.raw["paper"], true);
        assert_eq!(client.orders_sent(), 1);
    }
}
