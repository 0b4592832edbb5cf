//! Wallet Oracle (§4.7, §6): a read-side capability answering "does this
//! subscription currently have spendable balance?". Out of scope: the
//! wallet/billing system itself — only this narrow interface is modeled.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

#[async_trait]
pub trait WalletOracle: Send + Sync {
    /// Eventually consistent. A definitive `false` is authoritative for the
    /// caller's current admission decision only (§6).
    async fn has_funds(&self, subscription_id: &str) -> anyhow::Result<bool>;
}

/// Config-seeded balances, useful for tests and lab deployments without a
/// live wallet backend.
pub struct StaticWalletOracle {
    balances: RwLock<HashMap<String, bool>>,
    default_has_funds: bool,
}

impl StaticWalletOracle {
    pub fn new(default_has_funds: bool) -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
            default_has_funds,
        }
    }

    pub fn set(&self, subscription_id: &str, has_funds: bool) {
        self.balances
            .write()
            .unwrap()
            .insert(subscription_id.to_string(), has_funds);
    }
}

#[async_trait]
impl WalletOracle for StaticWalletOracle {
    async fn has_funds(&self, subscription_id: &str) -> anyhow::Result<bool> {
        Ok(self
            .balances
            .read()
            .unwrap()
            .get(subscription_id)
            .copied()
            .unwrap_or(self.default_has_funds))
    }
}

#[derive(Debug, Deserialize)]
struct WalletResponse {
    has_funds: bool,
}

/// HTTP-backed wallet oracle: `GET {base_url}/{subscription_id}` expected to
/// return `{"has_funds": bool}`. Every failure mode (connect error, non-2xx,
/// malformed body) is surfaced as `Err` rather than swallowed here — the
/// caller's own `WalletUnavailablePolicy` (§config) decides the fallback, so
/// the operator-configurable policy isn't shadowed by an oracle-private one.
pub struct HttpWalletOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWalletOracle {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(250))
            .build()
            .expect("reqwest client builds with a fixed timeout");
        Self { client, base_url }
    }
}

#[async_trait]
impl WalletOracle for HttpWalletOracle {
    async fn has_funds(&self, subscription_id: &str) -> anyhow::Result<bool> {
        let url = format!("{}/{}", self.base_url, subscription_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("wallet oracle request failed")?;
        anyhow::ensure!(resp.status().is_success(), "wallet oracle returned {}", resp.status());
        let body: WalletResponse = resp.json().await.context("decode wallet oracle response")?;
        Ok(body.has_funds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_oracle_uses_override_then_default() {
        let oracle = StaticWalletOracle::new(true);
        assert!(oracle.has_funds("sub-1").await.unwrap());

        oracle.set("sub-1", false);
        assert!(!oracle.has_funds("sub-1").await.unwrap());
        assert!(oracle.has_funds("sub-2").await.unwrap());
    }
}
