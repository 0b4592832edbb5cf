//! Quote Source (§4.7, §6): `quote(symbol) -> {bid, ask, digits, point}`,
//! assumed fresh within low single-digit milliseconds. Used by the
//! ExecutionGuard's price-deviation guard to convert a signal price into a
//! pip deviation against the live market.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub digits: u32,
    pub point: f64,
}

impl Quote {
    /// Pip-size deviation between a signal price and this quote's relevant
    /// side (ask for BUY, bid for SELL — §4.5 guard 4).
    pub fn deviation_pips(&self, signal_price: f64, reference: f64) -> f64 {
        ((signal_price - reference).abs() / self.point).round()
    }
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn quote(&self, symbol: &str) -> anyhow::Result<Quote>;
}

/// Config-seeded quotes for tests and lab deployments.
pub struct StaticQuoteSource {
    quotes: RwLock<HashMap<String, Quote>>,
    default_quote: Quote,
}

impl StaticQuoteSource {
    pub fn new(default_quote: Quote) -> Self {
        Self {
            quotes: RwLock::new(HashMap::new()),
            default_quote,
        }
    }

    pub fn set(&self, symbol: &str, quote: Quote) {
        self.quotes.write().unwrap().insert(symbol.to_string(), quote);
    }
}

#[async_trait]
impl QuoteSource for StaticQuoteSource {
    async fn quote(&self, symbol: &str) -> anyhow::Result<Quote> {
        Ok(self
            .quotes
            .read()
            .unwrap()
            .get(symbol)
            .copied()
            .unwrap_or(self.default_quote))
    }
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    bid: f64,
    ask: f64,
    digits: u32,
    point: f64,
}

/// HTTP-backed quote source: `GET {base_url}/{symbol}`.
pub struct HttpQuoteSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpQuoteSource {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("reqwest client builds with a fixed timeout");
        Self { client, base_url }
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn quote(&self, symbol: &str) -> anyhow::Result<Quote> {
        let url = format!("{}/{}", self.base_url, symbol);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let body: QuoteResponse = resp.json().await?;
        Ok(Quote {
            bid: body.bid,
            ask: body.ask,
            digits: body.digits,
            point: body.point,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deviation_is_measured_in_whole_pips() {
        let quote = Quote {
            bid: 1.1000,
            ask: 1.1002,
            digits: 5,
            point: 0.00001,
        };
        // 1.1002 -> 1.1012 is 10 pips at a 0.00001 point size.
        assert_eq!(quote.deviation_pips(1.1012, quote.ask), 100.0);
    }

    #[tokio::test]
    async fn static_source_uses_override_then_default() {
        let default_quote = Quote { bid: 1.0, ask: 1.0001, digits: 5, point: 0.00001 };
        let source = StaticQuoteSource::new(default_quote);
        assert_eq!(source.quote("EURUSD").await.unwrap(), default_quote);

        let eur_quote = Quote { bid: 1.1, ask: 1.1002, digits: 5, point: 0.00001 };
        source.set("EURUSD", eur_quote);
        assert_eq!(source.quote("EURUSD").await.unwrap(), eur_quote);
    }
}
