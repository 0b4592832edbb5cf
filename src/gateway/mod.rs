//! Ingest Gateway (§4.1): hot-path TCP server accepting framed, signed
//! packets from masters. One task per connection, pulled from a bounded
//! semaphore-guarded pool so a burst of reconnects cannot unbounded-spawn
//! tasks (§4.1 "Transport" expansion note).

pub mod credentials;
pub mod pipeline;
pub mod ratelimit;
pub mod wire;

use crate::config::GatewayConfig;
use crate::error::GatewayRejection;
use crate::fanout::FanoutDistributor;
use anyhow::{Context, Result};
use pipeline::{GatewayPipeline, PacketOutcome};
use ratelimit::TokenBucket;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};
use wire::AckFrame;

pub struct Gateway {
    config: GatewayConfig,
    pipeline: Arc<GatewayPipeline>,
    distributor: Arc<FanoutDistributor>,
    connection_permits: Arc<Semaphore>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, pipeline: Arc<GatewayPipeline>, distributor: Arc<FanoutDistributor>) -> Self {
        let connection_permits = Arc::new(Semaphore::new(config.max_connections));
        Self { config, pipeline, distributor, connection_permits }
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .with_context(|| format!("bind gateway listener on {}", self.config.listen_addr))?;
        info!(addr = %self.config.listen_addr, "ingest gateway listening");

        loop {
            let (socket, peer_addr) = listener.accept().await.context("accept producer connection")?;
            let permit = match self.connection_permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(%peer_addr, "dropping connection: max_connections reached");
                    continue;
                }
            };

            let pipeline = self.pipeline.clone();
            let distributor = self.distributor.clone();
            let rate_limit_per_sec = self.config.rate_limit_per_sec;
            let rate_limit_burst = self.config.rate_limit_burst;
            let packet_deadline = self.config.packet_deadline;

            tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) = handle_connection(
                    socket,
                    pipeline,
                    distributor,
                    rate_limit_per_sec,
                    rate_limit_burst,
                    packet_deadline,
                )
                .await
                {
                    warn!(%peer_addr, error = %err, "producer connection closed");
                }
            });
        }
    }
}

#[instrument(skip(socket, pipeline, distributor))]
async fn handle_connection(
    mut socket: TcpStream,
    pipeline: Arc<GatewayPipeline>,
    distributor: Arc<FanoutDistributor>,
    rate_limit_per_sec: u32,
    rate_limit_burst: u32,
    packet_deadline: std::time::Duration,
) -> Result<()> {
    let mut bucket = TokenBucket::new(rate_limit_per_sec, rate_limit_burst);

    loop {
        // Framing/decode errors are a connection-level protocol violation
        // (§4.1 "do not attempt to resync mid-stream") — propagate and let
        // the caller close the connection.
        let packet = wire::read_packet(&mut socket).await?;

        if !bucket.try_acquire() {
            let ack = AckFrame {
                sequence_number: packet.sequence_number,
                accepted: false,
                reason: Some(GatewayRejection::RateLimit.as_str().to_string()),
            };
            wire::write_ack(&mut socket, &ack).await?;
            continue;
        }

        let now_ms = credentials::now_ms();
        let sequence_number = packet.sequence_number;
        let outcome = tokio::time::timeout(packet_deadline, pipeline.process(packet, now_ms)).await;

        let ack = match outcome {
            Ok(Ok(PacketOutcome::Accepted { signal })) => {
                distributor.publish(&signal);
                AckFrame {
                    sequence_number: signal.sequence_number,
                    accepted: true,
                    reason: None,
                }
            }
            Ok(Ok(PacketOutcome::Rejected { sequence_number, reason })) => AckFrame {
                sequence_number,
                accepted: false,
                reason: Some(reason.as_str().to_string()),
            },
            Ok(Err(err)) => {
                warn!(error = %err, "pipeline error processing packet");
                AckFrame {
                    sequence_number,
                    accepted: false,
                    reason: Some(GatewayRejection::LogUnavailable.as_str().to_string()),
                }
            }
            Err(_) => AckFrame {
                sequence_number,
                accepted: false,
                reason: Some(GatewayRejection::Timeout.as_str().to_string()),
            },
        };

        wire::write_ack(&mut socket, &ack).await?;
    }
}
