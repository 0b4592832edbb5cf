//! Per-master broadcast tap (§4.4 expansion note): each live subscriber
//! connection taps its master's `tokio::sync::broadcast` channel rather
//! than the gateway writing directly to N per-subscriber queues.

use crate::signal::Signal;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::broadcast;

pub struct SignalHub {
    capacity: usize,
    taps: Mutex<HashMap<String, broadcast::Sender<Signal>>>,
}

impl SignalHub {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, taps: Mutex::new(HashMap::new()) }
    }

    fn sender_for(&self, master_id: &str) -> broadcast::Sender<Signal> {
        let mut taps = self.taps.lock();
        taps.entry(master_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish a signal to every live tap for `master_id`. A send error
    /// (no active receivers) is expected and silently dropped — fan-out
    /// delivery is reconnect-driven, not queued server-side beyond the
    /// broadcast channel's own ring buffer.
    pub fn publish(&self, master_id: &str, signal: Signal) {
        let sender = self.sender_for(master_id);
        let _ = sender.send(signal);
    }

    pub fn subscribe(&self, master_id: &str) -> broadcast::Receiver<Signal> {
        self.sender_for(master_id).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Side;

    fn sample(master_id: &str, seq: i64) -> Signal {
        Signal {
            subscription_id: master_id.to_string(),
            master_id: master_id.to_string(),
            sequence_number: seq,
            generated_at_ms: 0,
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            volume: 1.0,
            price: 1.1,
            stop_loss: 1.095,
            take_profit: 1.105,
            signature: "sig".to_string(),
            server_arrival_time: Some(0),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_signal() {
        let hub = SignalHub::new(16);
        let mut rx = hub.subscribe("master-1");
        hub.publish("master-1", sample("master-1", 1));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.sequence_number, 1);
    }

    #[tokio::test]
    async fn taps_are_isolated_per_master() {
        let hub = SignalHub::new(16);
        let mut rx_a = hub.subscribe("master-a");
        let _rx_b = hub.subscribe("master-b");
        hub.publish("master-b", sample("master-b", 1));
        assert!(rx_a.try_recv().is_err());
    }
}
