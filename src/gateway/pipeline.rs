//! The fixed seven-step per-packet ingest pipeline (§4.1).

use super::credentials::CredentialStore;
use super::wire::ProducerPacket;
use crate::error::GatewayRejection;
use crate::log::SignalLog;
use crate::signal::{Side, Signal};
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub enum PacketOutcome {
    Accepted { signal: Signal },
    Rejected { sequence_number: i64, reason: GatewayRejection },
}

/// Shared, process-wide pipeline state: credential store, log, and a
/// per-master in-memory high-water mark cache seeded from the log on first
/// sight of a stream (§4.1 step 3 "stream monotonicity").
pub struct GatewayPipeline {
    credentials: Arc<dyn CredentialStore>,
    log: Arc<dyn SignalLog>,
    max_clock_skew: Duration,
    last_sequence: Mutex<HashMap<String, i64>>,
}

impl GatewayPipeline {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        log: Arc<dyn SignalLog>,
        max_clock_skew: Duration,
    ) -> Self {
        Self {
            credentials,
            log,
            max_clock_skew,
            last_sequence: Mutex::new(HashMap::new()),
        }
    }

    fn last_for(&self, master_id: &str) -> Result<i64> {
        if let Some(&seq) = self.last_sequence.lock().get(master_id) {
            return Ok(seq);
        }
        let seeded = self.log.highest_sequence(master_id)?.unwrap_or(0);
        self.last_sequence.lock().insert(master_id.to_string(), seeded);
        Ok(seeded)
    }

    pub async fn process(&self, packet: ProducerPacket, now_ms: i64) -> Result<PacketOutcome> {
        let sequence_number = packet.sequence_number;

        // 1. Credential resolution.
        let Some(credential) = self.credentials.resolve(&packet.credential_token)? else {
            return Ok(PacketOutcome::Rejected {
                sequence_number,
                reason: GatewayRejection::InvalidCredential,
            });
        };
        if !credential.is_valid_at(now_ms) {
            return Ok(PacketOutcome::Rejected {
                sequence_number,
                reason: GatewayRejection::InvalidCredential,
            });
        }

        // `wire::read_packet` already rejects an out-of-range side byte as a
        // connection-level decode error before a packet ever reaches here.
        let side = Side::from_u8(packet.side).expect("side validated at decode");

        let mut signal = Signal {
            subscription_id: packet.subscription_id,
            master_id: credential.master_id.clone(),
            sequence_number,
            generated_at_ms: packet.generated_at_ms,
            symbol: packet.symbol,
            side,
            volume: packet.volume,
            price: packet.price,
            stop_loss: packet.stop_loss,
            take_profit: packet.take_profit,
            signature: packet.signature,
            server_arrival_time: None,
        };

        // 2. Signature check.
        if !signal.verify_signature(credential.secret_key.as_bytes()) {
            return Ok(PacketOutcome::Rejected {
                sequence_number,
                reason: GatewayRejection::InvalidSignature,
            });
        }

        // 3. Stream monotonicity.
        let last = self.last_for(&credential.master_id)?;
        if sequence_number <= last {
            return Ok(PacketOutcome::Rejected {
                sequence_number,
                reason: GatewayRejection::ReplayOrDuplicate,
            });
        }

        // 4. Bounded-freshness guard.
        let skew_ms = (now_ms - signal.generated_at_ms).abs();
        if skew_ms as u128 > self.max_clock_skew.as_millis() {
            return Ok(PacketOutcome::Rejected {
                sequence_number,
                reason: GatewayRejection::ClockSkew,
            });
        }

        // 5. Server stamp.
        signal.server_arrival_time = Some(now_ms);

        // 6. Append.
        match self.log.append(&signal) {
            Ok(true) => {
                self.last_sequence
                    .lock()
                    .insert(credential.master_id.clone(), sequence_number);
            }
            Ok(false) => {
                return Ok(PacketOutcome::Rejected {
                    sequence_number,
                    reason: GatewayRejection::ReplayOrDuplicate,
                });
            }
            Err(_) => {
                return Ok(PacketOutcome::Rejected {
                    sequence_number,
                    reason: GatewayRejection::LogUnavailable,
                });
            }
        }

        // 7. Ack (caller writes the frame and publishes to the fan-out hub;
        // we just report the accepted signal).
        Ok(PacketOutcome::Accepted { signal })
    }
}
