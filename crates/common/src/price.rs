use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use crate::Result;

/// `coin_id -> (currency -> price)`. Not every requested pair need be present.
pub type PriceTable = HashMap<String, HashMap<String, f64>>;

/// Abstraction over the public market-data API.
///
/// `CoinGeckoClient` implements this for the live service. Tests supply
/// their own fixed tables.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch current prices for the cross product of `coin_ids` and
    /// `currencies` in a single request.
    async fn prices(
        &self,
        coin_ids: &BTreeSet<String>,
        currencies: &BTreeSet<String>,
    ) -> Result<PriceTable>;
}
