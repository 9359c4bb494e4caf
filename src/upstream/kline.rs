// =============================================================================
// Kline history client — launchpad pool history service
// =============================================================================
//
// GET {host}/kline?poolId=..&interval=..&limit=..[&nextPageKey=..]
//
// Rows come back newest-first as `{ t, o, h, l, c, poolId, vA, vB, vU }` with a
// `nextPageKey` cursor for the next (older) page. The cursor is opaque and is
// sent back percent-encoded, exactly as received.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{unwrap_envelope, HistorySource, Page, PageRequest, RawSamples};
use crate::error::FeedError;
use crate::market_data::KlineRow;
use crate::types::FeedVariant;

#[derive(Debug, Deserialize)]
struct KlineResponse {
    #[serde(default)]
    rows: Vec<KlineRow>,
    #[serde(default, rename = "nextPageKey")]
    next_page_key: Option<String>,
}

/// REST client for the kline history service.
#[derive(Clone)]
pub struct KlineClient {
    base_url: String,
    client: reqwest::Client,
}

impl KlineClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "KlineClient initialised");

        Self { base_url, client }
    }

    fn kline_request(
        &self,
        pool_id: &str,
        interval: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut query = vec![
            ("poolId", pool_id.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(key) = cursor {
            query.push(("nextPageKey", key.to_string()));
        }
        self.client.get(format!("{}/kline", self.base_url)).query(&query)
    }

    /// GET /kline — one page of rows.
    #[instrument(skip(self), name = "kline::get_klines")]
    pub async fn get_klines(
        &self,
        pool_id: &str,
        interval: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<(Vec<KlineRow>, Option<String>)> {
        let resp = self
            .kline_request(pool_id, interval, limit, cursor)
            .send()
            .await
            .context("GET /kline request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse kline response")?;

        if !status.is_success() {
            anyhow::bail!("history GET /kline returned {}: {}", status, body);
        }

        let page: KlineResponse = serde_json::from_value(unwrap_envelope(body))
            .context("kline response has unexpected shape")?;

        debug!(
            pool_id,
            interval,
            count = page.rows.len(),
            has_next = page.next_page_key.is_some(),
            "klines fetched"
        );
        Ok((page.rows, page.next_page_key))
    }
}

#[async_trait]
impl HistorySource for KlineClient {
    fn variant(&self) -> FeedVariant {
        FeedVariant::Kline
    }

    async fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Page, FeedError> {
        let interval = request.resolution.kline_interval();
        let (rows, next_cursor) = self
            .get_klines(&request.symbol.pool_id, &interval, request.limit, request.cursor)
            .await?;

        Ok(Page {
            samples: RawSamples::Kline(rows),
            next_cursor,
        })
    }

    async fn has_data(&self, pool_id: &str) -> bool {
        match self.get_klines(pool_id, "1m", 1, None).await {
            Ok((rows, _)) => !rows.is_empty(),
            Err(e) => {
                warn!(pool_id, error = %e, "readiness probe failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for KlineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KlineClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
