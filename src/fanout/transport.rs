//! Receiver push connection (§4.4, §6 "Wire — receiver push"): an ordered,
//! at-least-once channel per subscription carrying `Signal`s downstream and
//! `{ack, last_accepted_sequence}` / `{sync_request, have_through}` frames
//! upstream. Framing reuses the gateway's length-prefixed JSON envelope.

use super::FanoutDistributor;
use crate::guard::SyncRequest;
use crate::registry::state::SubscriptionState;
use crate::signal::Signal;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_FRAME_LEN: u32 = 64 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReceiverFrame {
    Ack { sequence_number: i64 },
    SyncRequest { have_through: i64 },
}

/// First frame a receiver sends on a freshly-accepted connection, identifying
/// which subscription it's pushing for. The distributor resolves `master_id`
/// from the registry before handing the connection to
/// [`run_subscriber_session`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverHello {
    pub subscription_id: String,
}

/// Receiver-side helper: identify this connection's subscription before
/// entering the push/ack loop.
pub async fn send_hello<W: AsyncWrite + Unpin>(writer: &mut W, subscription_id: &str) -> Result<()> {
    let hello = ReceiverHello { subscription_id: subscription_id.to_string() };
    let buf = serde_json::to_vec(&hello).context("encode receiver hello")?;
    write_frame(writer, &buf).await
}

/// Distributor-side helper: read the handshake frame a newly-accepted
/// connection must send first.
pub async fn read_hello<R: AsyncRead + Unpin>(reader: &mut R) -> Result<ReceiverHello> {
    let buf = read_frame(reader).await?;
    serde_json::from_slice(&buf).context("decode receiver hello")
}

pub async fn write_signal<W: AsyncWrite + Unpin>(writer: &mut W, signal: &Signal) -> Result<()> {
    let buf = serde_json::to_vec(signal).context("encode signal")?;
    write_frame(writer, &buf).await
}

pub async fn read_receiver_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<ReceiverFrame> {
    let buf = read_frame(reader).await?;
    serde_json::from_slice(&buf).context("decode receiver frame")
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let len = reader.read_u32_le().await.context("read push frame length")?;
    anyhow::ensure!(len <= MAX_FRAME_LEN, "push frame length {len} exceeds max {MAX_FRAME_LEN}");
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await.context("read push frame body")?;
    Ok(buf)
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    writer.write_u32_le(payload.len() as u32).await.context("write push frame length")?;
    writer.write_all(payload).await.context("write push frame body")?;
    writer.flush().await.context("flush push frame")?;
    Ok(())
}

/// Drive one subscriber's live session: tap the hub for `master_id`, push
/// signals subject to the suppression policy, and apply whatever the
/// receiver sends back (acks advance the cursor; sync requests trigger a
/// bounded full-sync replay) until the connection closes.
pub async fn run_subscriber_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    distributor: &FanoutDistributor,
    subscription_id: &str,
    master_id: &str,
) -> Result<()> {
    let mut rx = distributor.hub.subscribe(master_id);

    loop {
        tokio::select! {
            signal = rx.recv() => {
                let signal = match signal {
                    Ok(s) => s,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
                };
                let snap = distributor.registry.snapshot(subscription_id)?;
                let state = snap.map(|s| s.state).unwrap_or(SubscriptionState::Synced);
                if distributor.should_push(state) {
                    write_signal(stream, &signal).await?;
                }
            }
            frame = read_receiver_frame(stream) => {
                match frame? {
                    ReceiverFrame::Ack { sequence_number } => {
                        distributor.ack_delivery(subscription_id, sequence_number)?;
                    }
                    ReceiverFrame::SyncRequest { have_through } => {
                        if let Some(signals) = distributor.full_sync_replay(master_id, have_through, 1000)? {
                            for signal in signals {
                                write_signal(stream, &signal).await?;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Helper for a receiver process: send a sync request bearing `have_through`.
pub async fn send_sync_request<W: AsyncWrite + Unpin>(writer: &mut W, request: &SyncRequest) -> Result<()> {
    let frame = ReceiverFrame::SyncRequest { have_through: request.have_through };
    let buf = serde_json::to_vec(&frame).context("encode sync request")?;
    write_frame(writer, &buf).await
}

/// Helper for a receiver process: send a positive ack for `sequence_number`.
pub async fn send_ack<W: AsyncWrite + Unpin>(writer: &mut W, sequence_number: i64) -> Result<()> {
    let frame = ReceiverFrame::Ack { sequence_number };
    let buf = serde_json::to_vec(&frame).context("encode ack")?;
    write_frame(writer, &buf).await
}

/// Helper for a receiver process: read the next pushed signal off the wire.
pub async fn read_pushed_signal<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Signal> {
    let buf = read_frame(reader).await?;
    serde_json::from_slice(&buf).context("decode pushed signal")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::SqliteSignalLog;
    use crate::registry::{Policy, SqliteRegistry};
    use crate::fanout::hub::SignalHub;
    use crate::signal::Side;
    use std::sync::Arc;

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
    async fn published_signal_is_pushed_and_ack_advances_cursor() {
        let registry_db = tempfile::NamedTempFile::new().unwrap();
        let log_db = tempfile::NamedTempFile::new().unwrap();
        let registry = Arc::new(SqliteRegistry::new(registry_db.path().to_str().unwrap()).unwrap());
        let log = Arc::new(SqliteSignalLog::new(log_db.path().to_str().unwrap(), 2).unwrap());
        let hub = Arc::new(SignalHub::new(16));
        registry
            .create(
                "sub-1",
                "alice",
                "master-1",
                Policy { max_price_deviation_pips: 50.0, max_ttl_ms: 5000, max_lot: 10.0, secret_key_ref: "s".into() },
            )
            .unwrap();
        let distributor = FanoutDistributor::new(registry.clone(), log, hub.clone(), true, 100_000);

        let (mut server_side, mut client_side) = tokio::io::duplex(8192);

        hub.publish("master-1", sample("master-1", 1));

        let session = tokio::spawn(async move {
            let _ = tokio::time::timeout(
                std::time::Duration::from_millis(200),
                run_subscriber_session(&mut server_side, &distributor, "sub-1", "master-1"),
            )
            .await;
        });

        let received = read_pushed_signal(&mut client_side).await.unwrap();
        assert_eq!(received.sequence_number, 1);

        let ack = ReceiverFrame::Ack { sequence_number: 1 };
        let buf = serde_json::to_vec(&ack).unwrap();
        write_frame(&mut client_side, &buf).await.unwrap();

        session.await.unwrap();

        let snap = registry.snapshot("sub-1").unwrap().unwrap();
        assert_eq!(snap.last_accepted_sequence, 1);
    }

    #[tokio::test]
    async fn hello_round_trips_the_subscription_id() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        send_hello(&mut client, "sub-1").await.unwrap();
        let hello = read_hello(&mut server).await.unwrap();
        assert_eq!(hello.subscription_id, "sub-1");
    }
}
