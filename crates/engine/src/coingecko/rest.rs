use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{Error, PriceSource, PriceTable, Result};

const BASE_URL: &str = "https://api.coingecko.com/api/v3";
const API_KEY_HEADER: &str = "x-cg-demo-api-key";
/// Search results are narrowed to this many coins before fetching market data.
const SEARCH_LIMIT: usize = 10;

/// REST client for the public CoinGecko API.
///
/// The demo API key can be replaced at runtime. A key set that way takes
/// precedence over the one given at construction; clearing it falls back.
pub struct CoinGeckoClient {
    default_key: Option<String>,
    override_key: RwLock<Option<String>>,
    http: Client,
}

/// Where the key currently sent with requests comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeySource {
    Stored,
    Environment,
    None,
}

/// One row of `/coins/markets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinMarket {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
}

impl CoinGeckoClient {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            default_key: non_blank(api_key),
            override_key: RwLock::new(None),
            http,
        })
    }

    /// Install a key for subsequent requests, or drop back to the default
    /// with `None`. Blank keys count as `None`.
    pub async fn set_api_key(&self, key: Option<String>) {
        let key = non_blank(key);
        info!(stored = key.is_some(), "CoinGecko API key updated");
        *self.override_key.write().await = key;
    }

    pub async fn api_key_source(&self) -> ApiKeySource {
        if self.override_key.read().await.is_some() {
            ApiKeySource::Stored
        } else if self.default_key.is_some() {
            ApiKeySource::Environment
        } else {
            ApiKeySource::None
        }
    }

    async fn api_key(&self) -> Option<String> {
        let override_key = self.override_key.read().await.clone();
        override_key.or_else(|| self.default_key.clone())
    }

    async fn get_text(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let url = format!("{BASE_URL}{path}");
        let mut request = self.http.get(&url).query(query);
        let api_key = self.api_key().await;
        if let Some(key) = &api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        debug!(path, authenticated = api_key.is_some(), "CoinGecko request");
        let resp = request.send().await.map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::PriceSource(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let body = self.get_text(path, query).await?;
        serde_json::from_str(&body).map_err(|e| Error::PriceSource(e.to_string()))
    }

    /// Top coins by market cap, priced in `vs_currency`.
    pub async fn top_coins(&self, vs_currency: &str, count: u32) -> Result<Vec<CoinMarket>> {
        let query = [
            ("vs_currency", vs_currency.to_lowercase()),
            ("order", "market_cap_desc".to_string()),
            ("per_page", count.clamp(1, 250).to_string()),
            ("page", "1".to_string()),
            ("sparkline", "false".to_string()),
        ];
        self.get_json("/coins/markets", &query).await
    }

    /// Resolve a free-text query to at most ten coins with market data.
    pub async fn search_coins(&self, text: &str, vs_currency: &str) -> Result<Vec<CoinMarket>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let hits: SearchResponse = self.get_json("/search", &[("query", text.to_string())]).await?;
        let ids = search_ids(&hits);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = [("vs_currency", vs_currency.to_lowercase()), ("ids", ids)];
        self.get_json("/coins/markets", &query).await
    }
}

#[async_trait]
impl PriceSource for CoinGeckoClient {
    async fn prices(
        &self,
        coin_ids: &BTreeSet<String>,
        currencies: &BTreeSet<String>,
    ) -> Result<PriceTable> {
        let query = [
            ("ids", join(coin_ids)),
            ("vs_currencies", join(currencies)),
        ];
        let body = self.get_text("/simple/price", &query).await?;
        parse_simple_price(&body)
    }
}

fn non_blank(key: Option<String>) -> Option<String> {
    key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty())
}

fn join(items: &BTreeSet<String>) -> String {
    items.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// Keep only numeric quotes; CoinGecko reports unknown pairs as `null` or omits them.
fn parse_simple_price(body: &str) -> Result<PriceTable> {
    let raw: HashMap<String, HashMap<String, serde_json::Value>> =
        serde_json::from_str(body).map_err(|e| Error::PriceSource(e.to_string()))?;

    Ok(raw
        .into_iter()
        .map(|(coin, quotes)| {
            let quotes = quotes
                .into_iter()
                .filter_map(|(currency, value)| value.as_f64().map(|price| (currency, price)))
                .collect();
            (coin, quotes)
        })
        .collect())
}

fn search_ids(hits: &SearchResponse) -> String {
    hits.coins
        .iter()
        .take(SEARCH_LIMIT)
        .map(|c| c.id.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    coins: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_price_drops_null_and_non_numeric_quotes() {
        let body = r#"{
            "bitcoin": {"usd": 51000, "eur": 47000.5},
            "ethereum": {"usd": null, "eur": "n/a"}
        }"#;
        let table = parse_simple_price(body).unwrap();
        assert_eq!(table["bitcoin"]["usd"], 51_000.0);
        assert_eq!(table["bitcoin"]["eur"], 47_000.5);
        assert!(table["ethereum"].is_empty());
    }

    #[test]
    fn malformed_body_is_a_price_source_error() {
        let err = parse_simple_price("<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, Error::PriceSource(_)));
    }

    #[test]
    fn ids_are_joined_in_sorted_order() {
        let ids: BTreeSet<String> = ["solana", "bitcoin", "ethereum"].map(String::from).into();
        assert_eq!(join(&ids), "bitcoin,ethereum,solana");
    }

    #[test]
    fn search_keeps_first_ten_hits() {
        let coins = (0..15)
            .map(|i| format!(r#"{{"id":"coin{i}"}}"#))
            .collect::<Vec<_>>()
            .join(",");
        let body = format!(r#"{{"coins":[{coins}]}}"#);
        let hits: SearchResponse = serde_json::from_str(&body).unwrap();
        let ids = search_ids(&hits);
        assert_eq!(ids.split(',').count(), 10);
        assert!(ids.starts_with("coin0,coin1"));
    }

    #[tokio::test]
    async fn blank_api_key_is_ignored() {
        let client = CoinGeckoClient::new(Some("   ".into())).unwrap();
        assert_eq!(client.api_key().await, None);
        assert_eq!(client.api_key_source().await, ApiKeySource::None);
    }

    #[tokio::test]
    async fn stored_key_overrides_and_falls_back_to_default() {
        let client = CoinGeckoClient::new(Some("env-key".into())).unwrap();
        assert_eq!(client.api_key_source().await, ApiKeySource::Environment);

        client.set_api_key(Some(" user-key ".into())).await;
        assert_eq!(client.api_key().await.as_deref(), Some("user-key"));
        assert_eq!(client.api_key_source().await, ApiKeySource::Stored);

        client.set_api_key(None).await;
        assert_eq!(client.api_key().await.as_deref(), Some("env-key"));
    }

    #[test]
    fn market_rows_tolerate_missing_fields() {
        let row: CoinMarket =
            serde_json::from_str(r#"{"id":"bitcoin","symbol":"btc","name":"Bitcoin"}"#).unwrap();
        assert_eq!(row.current_price, None);
    }
}
