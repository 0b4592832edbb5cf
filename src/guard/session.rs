//! Receiver-process session driver: connects to a distributor's push port,
//! runs every delivered signal through the [`ExecutionGuard`], and replies
//! with the ack/sync-request frames [`crate::fanout::transport`] expects
//! (§4.4 "Delivery cursor", §4.5 full-sync recovery).

use super::pipeline::{ExecutionGuard, GuardOutcome};
use crate::fanout::transport::{read_pushed_signal, send_ack, send_sync_request};
use crate::signal::Signal;
use anyhow::{Context, Result};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Drive one push connection until it closes or errors. The caller owns
/// reconnect policy (§5 "Fan-out delivery retries on receiver reconnect,
/// never on the same open channel").
pub async fn run_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    guard: &ExecutionGuard,
) -> Result<()> {
    loop {
        let signal = read_pushed_signal(stream).await.context("read pushed signal")?;
        handle_signal(stream, guard, &signal).await?;
    }
}

async fn handle_signal<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    guard: &ExecutionGuard,
    signal: &Signal,
) -> Result<()> {
    let now = now_ms();
    let outcome = if guard.local_state() == super::pipeline::LocalState::DegradedGap {
        guard.process_recovery(signal, now).await
    } else {
        guard.process(signal, now).await
    };

    match outcome {
        Ok(GuardOutcome::Accepted(ack)) => {
            info!(ticket_id = %ack.ticket_id, sequence = signal.sequence_number, "signal executed");
            send_ack(stream, signal.sequence_number).await
        }
        Ok(GuardOutcome::Rejected { reason, sync_request: Some(request) }) => {
            warn!(reason = %reason, have_through = request.have_through, "requesting full sync");
            send_sync_request(stream, &request).await
        }
        Ok(GuardOutcome::Rejected { reason, sync_request: None }) => {
            warn!(reason = %reason, sequence = signal.sequence_number, "signal rejected by guard");
            send_ack(stream, signal.sequence_number).await
        }
        Err(err) => {
            warn!(error = %err, sequence = signal.sequence_number, "guard pipeline error");
            Err(err)
        }
    }
}

/// Apply a batch of full-sync replay signals through the recovery entry
/// point, then mark the subscription synced again once the batch lands
/// without a further gap (§4.3 `FullSyncDone`).
pub async fn replay_full_sync(guard: &ExecutionGuard, signals: &[Signal]) -> Result<()> {
    for signal in signals {
        let now = now_ms();
        guard.process_recovery(signal, now).await?;
    }
    guard.mark_synced();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardConfig;
    use crate::host::StubHostTerminal;
    use crate::quote::{Quote, StaticQuoteSource};
    use crate::registry::Policy;
    use crate::signal::Side;
    use crate::sink::SqliteProtectionEventSink;
    use crate::wallet::StaticWalletOracle;
    use std::sync::Arc;

    fn test_policy() -> Policy {
        Policy { max_price_deviation_pips: 50.0, max_ttl_ms: 60_000, max_lot: 10.0, secret_key_ref: "s".into() }
    }

    fn sample_signal(seq: i64, secret: &[u8]) -> Signal {
        let mut s = Signal {
            subscription_id: "sub-1".to_string(),
            master_id: "master-1".to_string(),
            sequence_number: seq,
            generated_at_ms: now_ms(),
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            volume: 1.0,
            price: 1.10000,
            stop_loss: 1.09500,
            take_profit: 1.10500,
            signature: String::new(),
            server_arrival_time: Some(now_ms()),
        };
        s.signature = s.sign(secret);
        s
    }

    fn test_guard(dir: &tempfile::TempDir) -> ExecutionGuard {
        let mut config = GuardConfig::default();
        config.sequence_file_path = dir.path().join("seq.bin");
        ExecutionGuard::new(
            "sub-1".to_string(),
            test_policy(),
            Arc::new(StaticWalletOracle::new(true)),
            Arc::new(StaticQuoteSource::new(Quote { bid: 1.0999, ask: 1.1001, digits: 5, point: 0.00001 })),
            Arc::new(StubHostTerminal::new()),
            Arc::new(SqliteProtectionEventSink::new(":memory:").unwrap()),
            &config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn accepted_signal_acks_over_the_wire() {
        let dir = tempfile::tempdir().unwrap();
        let guard = test_guard(&dir);
        let signal = sample_signal(1, b"s");

        let (mut server, mut client) = tokio::io::duplex(8192);
        crate::fanout::transport::write_signal(&mut server, &signal).await.unwrap();

        let session = tokio::spawn(async move {
            let _ = tokio::time::timeout(
                std::time::Duration::from_millis(200),
                run_session(&mut client, &guard),
            )
            .await;
        });

        let frame = crate::fanout::transport::read_receiver_frame(&mut server).await.unwrap();
        matches!(frame, crate::fanout::transport::ReceiverFrame::Ack { sequence_number: 1 });

        drop(server);
        session.await.unwrap();
    }
}
