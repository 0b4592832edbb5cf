//! Signal data model and the canonical MAC payload (§3, §6).
//!
//! The canonical payload format is a compatibility contract: it must match
//! bit-for-bit between producer, ingest gateway, and receiver. Field order,
//! numeric formatting, and the unit of `generated_at` are fixed here, once,
//! per §9's instruction to resolve (not guess) this ambiguity.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Trade direction. `Close` flattens an existing position rather than
/// opening a new one; both gateway and guard treat it like any other side
/// for ordering/admission purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    Buy = 1,
    Sell = 2,
    Close = 3,
}

impl Side {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Buy),
            2 => Some(Self::Sell),
            3 => Some(Self::Close),
            _ => None,
        }
    }
}

/// A single trade intent (§3 `Signal`).
///
/// `server_arrival_time` is `None` until the gateway stamps it (§4.1 step 5);
/// it is the only timestamp downstream TTL decisions may use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub subscription_id: String,
    pub master_id: String,
    pub sequence_number: i64,
    pub generated_at_ms: i64,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub signature: String,
    #[serde(default)]
    pub server_arrival_time: Option<i64>,
}

impl Signal {
    /// Build the canonical string over which the keyed MAC is computed.
    ///
    /// Field order is fixed: `subscription_id | sequence_number |
    /// generated_at_ms | symbol | side | volume | price | stop_loss |
    /// take_profit`, with prices and volume formatted `%.5f` and the side as
    /// its wire integer code. This must never change without a protocol
    /// version bump.
    pub fn canonical_payload(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{:.5}|{:.5}|{:.5}|{:.5}",
            self.subscription_id,
            self.sequence_number,
            self.generated_at_ms,
            self.symbol,
            self.side as u8,
            self.volume,
            self.price,
            self.stop_loss,
            self.take_profit,
        )
    }

    /// Sign the canonical payload with the master's secret key, producing
    /// the hex-encoded signature that populates `self.signature`.
    pub fn sign(&self, secret: &[u8]) -> String {
        sign_payload(&self.canonical_payload(), secret)
    }

    /// Verify `self.signature` against a recomputed MAC, constant-time.
    pub fn verify_signature(&self, secret: &[u8]) -> bool {
        verify_payload(&self.canonical_payload(), &self.signature, secret)
    }
}

/// Sign an arbitrary canonical payload string with a keyed MAC, hex-encoded.
/// Shared by the gateway (verifying producer signatures) and the receiver
/// (verifying the server-relayed signature); also usable by test fixtures
/// acting as a master.
pub fn sign_payload(payload: &str, secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex-encoded MAC against a payload, using constant-time
/// comparison (the `hmac` crate's `verify_slice` is constant-time; decoding
/// the candidate signature is not part of the secret-dependent comparison).
pub fn verify_payload(payload: &str, signature_hex: &str, secret: &[u8]) -> bool {
    let Ok(candidate) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    mac.verify_slice(&candidate).is_ok()
}
