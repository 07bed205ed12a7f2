//! Pure alarm evaluation: building the batched price query and splitting the
//! active list into alarms that fired and alarms that keep waiting.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use common::{Alarm, PriceTable};

/// Distinct coin ids and quote currencies across a set of alarms.
/// Query cost depends only on the distinct pairs, not on the alarm count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceQuery {
    pub coin_ids: BTreeSet<String>,
    pub currencies: BTreeSet<String>,
}

impl PriceQuery {
    pub fn for_alarms(alarms: &[Alarm]) -> Self {
        let mut query = Self::default();
        for alarm in alarms {
            query.coin_ids.insert(alarm.coin_id.clone());
            query.currencies.insert(alarm.currency.clone());
        }
        query
    }

    pub fn is_empty(&self) -> bool {
        self.coin_ids.is_empty()
    }
}

/// Current quote for an alarm's pair, if the table holds a usable one.
/// Missing, zero, negative and non-finite values all count as "no data".
pub fn quote_for(prices: &PriceTable, alarm: &Alarm) -> Option<f64> {
    prices
        .get(&alarm.coin_id)
        .and_then(|by_currency| by_currency.get(&alarm.currency))
        .copied()
        .filter(|price| price.is_finite() && *price > 0.0)
}

/// Outcome of evaluating one active list.
#[derive(Debug, Default)]
pub struct Partition {
    /// Alarms left untouched, in their original order.
    pub still_active: Vec<Alarm>,
    /// Alarms stamped with `triggered_at`/`triggered_price`, in evaluation order.
    pub fired: Vec<Alarm>,
}

/// Evaluate every active alarm independently against `prices`.
pub fn partition(active: Vec<Alarm>, prices: &PriceTable, now: DateTime<Utc>) -> Partition {
    let mut out = Partition::default();

    for alarm in active {
        let Some(current_price) = quote_for(prices, &alarm) else {
            out.still_active.push(alarm);
            continue;
        };

        if alarm.kind.is_crossed(current_price, alarm.target_price) {
            out.fired.push(alarm.into_fired(current_price, now));
        } else {
            out.still_active.push(alarm);
        }
    }

    out
}
