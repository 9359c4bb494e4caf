// =============================================================================
// Enriched OHLCV client — external base/quote price feed
// =============================================================================
//
// GET {host}/defi/ohlcv/base_quote?base_address=..&quote_address=..&type=..
//     &time_from=..&time_to=..
//
// Rows come back oldest-first as `{ unixTime, o, h, l, c, vQuote }`. The feed
// is time-ranged, not paginated, so pages never carry a cursor.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{unwrap_envelope, HistorySource, Page, PageRequest, RawSamples};
use crate::error::FeedError;
use crate::market_data::EnrichedRow;
use crate::types::FeedVariant;

#[derive(Debug, Deserialize)]
struct OhlcvResponse {
    #[serde(default)]
    items: Vec<EnrichedRow>,
}

/// REST client for the enriched OHLCV feed.
#[derive(Clone)]
pub struct EnrichedClient {
    base_url: String,
    client: reqwest::Client,
}

impl EnrichedClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "EnrichedClient initialised");

        Self { base_url, client }
    }

    fn ohlcv_url(&self, base: &str, quote: &str, frame: &str, from: i64, to: i64) -> String {
        format!(
            "{}/defi/ohlcv/base_quote?base_address={}&quote_address={}&type={}&time_from={}&time_to={}",
            self.base_url, base, quote, frame, from, to
        )
    }

    /// GET /defi/ohlcv/base_quote — rows for a time range.
    #[instrument(skip(self), name = "enriched::get_ohlcv")]
    pub async fn get_ohlcv(
        &self,
        base: &str,
        quote: &str,
        frame: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<EnrichedRow>> {
        let url = self.ohlcv_url(base, quote, frame, from, to);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /defi/ohlcv/base_quote request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse ohlcv response")?;

        if !status.is_success() {
            anyhow::bail!("enriched GET /defi/ohlcv/base_quote returned {}: {}", status, body);
        }

        let page: OhlcvResponse = serde_json::from_value(unwrap_envelope(body))
            .context("ohlcv response has unexpected shape")?;

        debug!(base, quote, frame, count = page.items.len(), "ohlcv rows fetched");
        Ok(page.items)
    }
}

#[async_trait]
impl HistorySource for EnrichedClient {
    fn variant(&self) -> FeedVariant {
        FeedVariant::Enriched
    }

    async fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Page, FeedError> {
        let frame = request.resolution.enriched_frame();
        let rows = self
            .get_ohlcv(
                &request.symbol.base_mint,
                &request.symbol.quote_mint,
                &frame,
                request.from,
                request.to,
            )
            .await?;

        Ok(Page {
            samples: RawSamples::Enriched(rows),
            next_cursor: None,
        })
    }
}

impl std::fmt::Debug for EnrichedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichedClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_carries_range_and_frame() {
        let client = EnrichedClient::new("https://ohlcv.test", Duration::from_secs(1));
        assert_eq!(
            client.ohlcv_url("BASE", "QUOTE", "15m", 100, 200),
            "https://ohlcv.test/defi/ohlcv/base_quote?base_address=BASE&quote_address=QUOTE&type=15m&time_from=100&time_to=200"
        );
    }

    #[test]
    fn response_parses_items() {
        let body = serde_json::json!({
            "success": true,
            "data": {
                "items": [
                    { "unixTime": 1000, "o": 1.0, "h": 2.0, "l": 0.5, "c": 1.5, "vQuote": 10.0, "vBase": 4.0 }
                ]
            }
        });
        let page: OhlcvResponse = serde_json::from_value(unwrap_envelope(body)).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].unix_time, 1000);
        assert_eq!(page.items[0].v_quote, 10.0);
    }
}
