//! Ingest Gateway wire framing (§4.1, §6): length-prefixed packets over a
//! long-lived TCP connection per master. The payload itself is JSON — the
//! teacher's binary `EdgeTick` framing inspired the length-prefix envelope,
//! but the signal schema here is small and low-frequency enough that a
//! textual payload keeps the compatibility contract (§6's canonical MAC
//! string) easy to eyeball and log.

use crate::signal::Side;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Cap on a single frame's length, guarding against a misbehaving or
/// malicious producer forcing a huge allocation.
const MAX_FRAME_LEN: u32 = 64 * 1024;

/// One producer-submitted packet (§6 "Wire — producer ingress").
/// `subscription_id` here is bound to the master stream, not an individual
/// subscriber row — the same signed packet is fanned out unchanged to every
/// subscriber of this master, so this field (and the signature computed
/// over it) must stay constant across delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerPacket {
    pub credential_token: String,
    pub subscription_id: String,
    pub sequence_number: i64,
    pub generated_at_ms: i64,
    pub symbol: String,
    pub side: u8,
    pub volume: f64,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub signature: String,
}

/// Bounded ack returned for every packet (§4.1 step 7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckFrame {
    pub sequence_number: i64,
    pub accepted: bool,
    pub reason: Option<String>,
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let len = reader.read_u32_le().await.context("read frame length")?;
    if len > MAX_FRAME_LEN {
        bail!("frame length {len} exceeds max {MAX_FRAME_LEN}");
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await.context("read frame body")?;
    Ok(buf)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() as u64 > MAX_FRAME_LEN as u64 {
        bail!("outgoing frame exceeds max {MAX_FRAME_LEN}");
    }
    writer.write_u32_le(payload.len() as u32).await.context("write frame length")?;
    writer.write_all(payload).await.context("write frame body")?;
    writer.flush().await.context("flush frame")?;
    Ok(())
}

/// A packet whose `side` byte falls outside `Side::from_u8`'s 1-3 range is
/// a malformed-schema packet, the same class as a framing/JSON decode
/// failure (§4.1 "on decode error... close connection... do not attempt to
/// resync mid-stream") — not a credential problem, so it must not produce
/// an `INVALID_CREDENTIAL` ack on an otherwise-live connection.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<ProducerPacket> {
    let buf = read_frame(reader).await?;
    let packet: ProducerPacket = serde_json::from_slice(&buf).context("decode producer packet")?;
    if Side::from_u8(packet.side).is_none() {
        bail!("decode producer packet: side byte {} outside 1..=3", packet.side);
    }
    Ok(packet)
}

pub async fn write_ack<W: AsyncWrite + Unpin>(writer: &mut W, ack: &AckFrame) -> Result<()> {
    let buf = serde_json::to_vec(ack).context("encode ack frame")?;
    write_frame(writer, &buf).await
}
