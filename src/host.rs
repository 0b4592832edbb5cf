//! Host Terminal (§4.7, §6): the `place_order` capability a receiver's host
//! platform provides. One trait, one production-shaped adapter, one
//! simulation adapter for tests.

use crate::signal::{Side, Signal};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl From<&Signal> for OrderRequest {
    fn from(signal: &Signal) -> Self {
        Self {
            symbol: signal.symbol.clone(),
            side: signal.side,
            volume: signal.volume,
            price: signal.price,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub ticket_id: String,
}

/// Synchronous from the caller's perspective but may block up to a bounded
/// timeout (§6) — callers are expected to wrap the call in their own
/// deadline, not rely on the adapter to self-limit.
#[async_trait]
pub trait HostTerminal: Send + Sync {
    async fn place_order(&self, request: OrderRequest) -> anyhow::Result<OrderAck>;
}

/// Deterministic-enough stand-in for a real terminal binding, used in tests
/// and lab runs. Never rejects; assigns a sequential ticket id.
pub struct StubHostTerminal {
    counter: std::sync::atomic::AtomicU64,
}

impl Default for StubHostTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl StubHostTerminal {
    pub fn new() -> Self {
        Self {
            counter: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl HostTerminal for StubHostTerminal {
    async fn place_order(&self, _request: OrderRequest) -> anyhow::Result<OrderAck> {
        let n = self.counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(OrderAck {
            ticket_id: format!("stub-{n}"),
        })
    }
}

/// Simulated host with configurable latency and rejection rate, for
/// exercising `ORDER_PLACEMENT_FAILED` rollback paths in tests.
pub struct SimulatedHostTerminal {
    latency: Duration,
    rejection_rate: f64,
}

impl SimulatedHostTerminal {
    pub fn new(latency: Duration, rejection_rate: f64) -> Self {
        Self { latency, rejection_rate }
    }
}

#[async_trait]
impl HostTerminal for SimulatedHostTerminal {
    async fn place_order(&self, _request: OrderRequest) -> anyhow::Result<OrderAck> {
        tokio::time::sleep(self.latency).await;
        if rand::thread_rng().gen::<f64>() < self.rejection_rate {
            anyhow::bail!("simulated order rejection");
        }
        Ok(OrderAck {
            ticket_id: uuid::Uuid::new_v4().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> OrderRequest {
        OrderRequest {
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            volume: 1.0,
            price: 1.1,
            stop_loss: 1.095,
            take_profit: 1.105,
        }
    }

    #[tokio::test]
    async fn stub_terminal_always_succeeds_with_unique_tickets() {
        let terminal = StubHostTerminal::new();
        let first = terminal.place_order(sample_request()).await.unwrap();
        let second = terminal.place_order(sample_request()).await.unwrap();
        assert_ne!(first.ticket_id, second.ticket_id);
    }

    #[tokio::test]
    async fn simulated_terminal_always_rejects_at_rate_one() {
        let terminal = SimulatedHostTerminal::new(Duration::from_millis(0), 1.0);
        assert!(terminal.place_order(sample_request()).await.is_err());
    }

    #[tokio::test]
    async fn simulated_terminal_never_rejects_at_rate_zero() {
        let terminal = SimulatedHostTerminal::new(Duration::from_millis(0), 0.0);
        assert!(terminal.place_order(sample_request()).await.is_ok());
    }
}
