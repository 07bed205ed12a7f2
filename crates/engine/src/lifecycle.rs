use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use common::{Alarm, AlarmSet, AlarmStore, PriceSource, Result};

use crate::dispatch::Dispatcher;
use crate::evaluate::{partition, Partition, PriceQuery};

/// What a single `run_cycle` call did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum CycleReport {
    /// Another cycle was still in flight; nothing was done.
    Skipped,
    /// No active alarms, so no price query was made.
    Idle,
    /// Prices were checked but nothing fired. The store was not written.
    Quiet { checked: usize },
    /// These alarms moved to history, in evaluation order.
    Fired { alarms: Vec<Alarm> },
}

/// Owns the alarm lifecycle: periodic evaluation plus the user-facing
/// add/dismiss/clear operations.
///
/// Every read-modify-write of the persisted `AlarmSet` happens under one
/// async mutex, so a user action can never interleave with a cycle's commit.
/// The mutex is not held while waiting on the price source.
pub struct AlarmEngine {
    store: Arc<dyn AlarmStore>,
    prices: Arc<dyn PriceSource>,
    dispatcher: Dispatcher,
    changes_tx: broadcast::Sender<AlarmSet>,
    lock: Mutex<()>,
    in_flight: AtomicBool,
}

impl AlarmEngine {
    pub fn new(
        store: Arc<dyn AlarmStore>,
        prices: Arc<dyn PriceSource>,
        dispatcher: Dispatcher,
    ) -> Self {
        let (changes_tx, _) = broadcast::channel(64);
        Self {
            store,
            prices,
            dispatcher,
            changes_tx,
            lock: Mutex::new(()),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Subscribe to the full `AlarmSet` after every committed change.
    pub fn subscribe(&self) -> broadcast::Receiver<AlarmSet> {
        self.changes_tx.subscribe()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Current persisted state.
    pub async fn alarms(&self) -> Result<AlarmSet> {
        let _guard = self.lock.lock().await;
        self.store.read().await
    }

    /// One evaluation pass: query, decide, commit, notify.
    ///
    /// A price-source or store error aborts the cycle with the persisted set
    /// untouched; the next cycle starts again from whatever was last committed.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            debug!("Alarm cycle already in flight, skipping");
            return Ok(CycleReport::Skipped);
        };

        let query = {
            let _guard = self.lock.lock().await;
            PriceQuery::for_alarms(&self.store.read().await?.active)
        };
        if query.is_empty() {
            return Ok(CycleReport::Idle);
        }

        debug!(
            coins = query.coin_ids.len(),
            currencies = query.currencies.len(),
            "Querying prices"
        );
        let prices = self.prices.prices(&query.coin_ids, &query.currencies).await?;

        let (remaining, fired) = {
            let _guard = self.lock.lock().await;
            // Re-read: user actions may have landed while the query was out.
            let AlarmSet { active, mut history } = self.store.read().await?;
            let checked = active.len();
            let Partition { still_active, fired } = partition(active, &prices, Utc::now());

            if fired.is_empty() {
                debug!(checked, "No alarm triggered");
                return Ok(CycleReport::Quiet { checked });
            }

            history.extend(fired.iter().cloned());
            let updated = AlarmSet { active: still_active, history };
            self.store.write(&updated).await?;
            let remaining = updated.active.len();
            // Published under the lock so subscribers see commits in order.
            self.publish(updated);
            (remaining, fired)
        };

        info!(fired = fired.len(), remaining, "Alarms triggered and moved to history");
        self.dispatcher.dispatch(fired.clone()).await;

        Ok(CycleReport::Fired { alarms: fired })
    }

    /// Append `alarm` to the active list.
    pub async fn add_alarm(&self, alarm: Alarm) -> Result<AlarmSet> {
        info!(
            alarm_id = %alarm.id,
            coin = %alarm.coin_id,
            kind = %alarm.kind,
            target = alarm.target_price,
            currency = %alarm.currency,
            "Alarm added"
        );
        self.mutate(move |set| set.active.push(alarm)).await
    }

    /// Remove an active alarm by id. History is never consulted; an unknown
    /// id leaves the set as it was.
    pub async fn dismiss_alarm(&self, id: &str) -> Result<AlarmSet> {
        self.mutate(|set| {
            let before = set.active.len();
            set.active.retain(|a| a.id != id);
            if set.active.len() == before {
                debug!(alarm_id = id, "Dismiss requested for unknown alarm");
            } else {
                info!(alarm_id = id, "Alarm dismissed");
            }
        })
        .await
    }

    /// Empty the history; active alarms are untouched.
    pub async fn clear_history(&self) -> Result<AlarmSet> {
        self.mutate(|set| {
            info!(cleared = set.history.len(), "Alarm history cleared");
            set.history.clear();
        })
        .await
    }

    /// Stop pending notification deliveries.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    async fn mutate<F>(&self, apply: F) -> Result<AlarmSet>
    where
        F: FnOnce(&mut AlarmSet),
    {
        let _guard = self.lock.lock().await;
        let mut set = self.store.read().await?;
        apply(&mut set);
        self.store.write(&set).await?;
        self.publish(set.clone());
        Ok(set)
    }

    fn publish(&self, set: AlarmSet) {
        // No subscribers is fine.
        let _ = self.changes_tx.send(set);
    }
}

/// Single in-flight flag around `run_cycle`, released on drop.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::dispatch::tests::RecordingSink;
    use common::{AlarmKind, Error, KeyValueStore, PriceTable};
    use store::MemoryStore;

    /// Price source returning a fixed table and recording every query.
    #[derive(Default)]
    struct FixedPrices {
        table: std::sync::Mutex<PriceTable>,
        fail: AtomicBool,
        queries: std::sync::Mutex<Vec<(BTreeSet<String>, BTreeSet<String>)>>,
    }

    impl FixedPrices {
        fn with(entries: &[(&str, &str, f64)]) -> Arc<Self> {
            let prices = Self::default();
            prices.set(entries);
            Arc::new(prices)
        }

        fn set(&self, entries: &[(&str, &str, f64)]) {
            let mut table: PriceTable = HashMap::new();
            for (coin, currency, price) in entries {
                table
                    .entry(coin.to_string())
                    .or_default()
                    .insert(currency.to_string(), *price);
            }
            *self.table.lock().unwrap() = table;
        }

        fn query_count(&self) -> usize {
            self.queries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PriceSource for FixedPrices {
        async fn prices(
            &self,
            coin_ids: &BTreeSet<String>,
            currencies: &BTreeSet<String>,
        ) -> Result<PriceTable> {
            self.queries
                .lock()
                .unwrap()
                .push((coin_ids.clone(), currencies.clone()));
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::PriceSource("HTTP 429".into()));
            }
            Ok(self.table.lock().unwrap().clone())
        }
    }

    /// Memory store that counts writes and can be told to reject them.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        writes: AtomicUsize,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl KeyValueStore for CountingStore {
        async fn get_raw(&self, key: &str) -> Result<Option<String>> {
            self.inner.get_raw(key).await
        }

        async fn set_raw(&self, key: &str, value: String) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::Store("disk full".into()));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set_raw(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
    }

    struct Harness {
        engine: AlarmEngine,
        store: Arc<CountingStore>,
        prices: Arc<FixedPrices>,
        sink: Arc<RecordingSink>,
    }

    async fn harness(
        active: Vec<Alarm>,
        history: Vec<Alarm>,
        prices: Arc<FixedPrices>,
    ) -> Harness {
        let store = Arc::new(CountingStore::default());
        store.write(&AlarmSet { active, history }).await.unwrap();
        store.writes.store(0, Ordering::SeqCst);

        let sink = RecordingSink::new("recording");
        let dispatcher = Dispatcher::new(vec![sink.clone()], Duration::from_millis(500));
        let engine = AlarmEngine::new(store.clone(), prices.clone(), dispatcher);
        Harness { engine, store, prices, sink }
    }

    /// Single alarm, single quote.
    async fn single(alarm: Alarm, coin: &str, price: f64) -> Harness {
        harness(vec![alarm], vec![], FixedPrices::with(&[(coin, "usd", price)])).await
    }

    fn up(coin: &str, target: f64) -> Alarm {
        Alarm::new(coin, coin, AlarmKind::Up, target, "usd")
    }

    fn down(coin: &str, target: f64) -> Alarm {
        Alarm::new(coin, coin, AlarmKind::Down, target, "usd")
    }

    #[tokio::test(start_paused = true)]
    async fn bitcoin_scenario_fires_once_and_notifies_once() {
        let mut alarm = up("bitcoin", 50_000.0);
        alarm.id = "a1".into();
        alarm.coin_name = "Bitcoin".into();
        let h = single(alarm, "bitcoin", 51_000.0).await;
        let mut changes = h.engine.subscribe();

        let report = h.engine.run_cycle().await.unwrap();
        assert!(matches!(report, CycleReport::Fired { ref alarms } if alarms.len() == 1));

        let set = h.engine.alarms().await.unwrap();
        assert!(set.active.is_empty());
        assert_eq!(set.history.len(), 1);
        assert_eq!(set.history[0].triggered_price, Some(51_000.0));
        assert!(set.history[0].triggered_at.is_some());

        assert_eq!(changes.recv().await.unwrap(), set);
        assert!(matches!(changes.try_recv(), Err(TryRecvError::Empty)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.sink.ids(), vec!["a1".to_string()]);
    }

    #[tokio::test]
    async fn up_alarm_boundaries() {
        for (price, fires) in [(100.0, true), (105.0, true), (99.0, false)] {
            let h = single(up("bitcoin", 100.0), "bitcoin", price).await;
            h.engine.run_cycle().await.unwrap();
            let set = h.engine.alarms().await.unwrap();
            assert_eq!(set.history.len() == 1, fires, "price {price}");
            assert_eq!(set.active.len() == 1, !fires, "price {price}");
        }
    }

    #[tokio::test]
    async fn down_alarm_boundaries() {
        for (price, fires) in [(50.0, true), (45.0, true), (51.0, false)] {
            let h = single(down("ethereum", 50.0), "ethereum", price).await;
            h.engine.run_cycle().await.unwrap();
            let set = h.engine.alarms().await.unwrap();
            assert_eq!(set.history.len() == 1, fires, "price {price}");
        }
    }

    #[tokio::test]
    async fn stored_target_fires_at_exactly_equal_price() {
        // Needs all 17 significant digits to survive the JSON round trip.
        let target = 508.904_295_621_815_15;
        for alarm in [down("bnb", target), up("bnb", target)] {
            let h = single(alarm.clone(), "bnb", target).await;

            let stored = h.engine.alarms().await.unwrap();
            assert_eq!(stored.active, vec![alarm]);
            assert_eq!(stored.active[0].target_price.to_bits(), target.to_bits());

            let report = h.engine.run_cycle().await.unwrap();
            assert!(matches!(report, CycleReport::Fired { .. }), "{report:?}");
            let fired = &h.engine.alarms().await.unwrap().history[0];
            assert_eq!(fired.triggered_price, Some(target));
        }
    }

    #[tokio::test]
    async fn missing_quote_leaves_alarm_active() {
        let alarm = up("obscurecoin", 1.0);
        let h = single(alarm.clone(), "bitcoin", 1.0).await;

        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report, CycleReport::Quiet { checked: 1 });
        assert_eq!(h.engine.alarms().await.unwrap().active, vec![alarm]);
    }

    #[tokio::test]
    async fn empty_active_list_makes_no_query_and_no_write() {
        let h = harness(vec![], vec![up("bitcoin", 1.0)], FixedPrices::with(&[])).await;

        assert_eq!(h.engine.run_cycle().await.unwrap(), CycleReport::Idle);
        assert_eq!(h.prices.query_count(), 0);
        assert_eq!(h.store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shared_pair_is_queried_once() {
        let h = harness(
            vec![up("bitcoin", 10.0), down("bitcoin", 1.0)],
            vec![],
            FixedPrices::with(&[("bitcoin", "usd", 5.0)]),
        )
        .await;

        h.engine.run_cycle().await.unwrap();

        let queries = h.prices.queries.lock().unwrap().clone();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].0, BTreeSet::from(["bitcoin".to_string()]));
        assert_eq!(queries[0].1, BTreeSet::from(["usd".to_string()]));
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_cycle_changes_nothing() {
        let h = single(up("bitcoin", 100.0), "bitcoin", 99.0).await;
        let before = h.store.get_raw(common::store::ALARMS_KEY).await.unwrap();
        let mut changes = h.engine.subscribe();

        h.engine.run_cycle().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let after = h.store.get_raw(common::store::ALARMS_KEY).await.unwrap();
        assert_eq!(after, before);
        assert_eq!(h.store.writes.load(Ordering::SeqCst), 0);
        assert!(matches!(changes.try_recv(), Err(TryRecvError::Empty)));
        assert!(h.sink.ids().is_empty());
    }

    #[tokio::test]
    async fn history_appends_in_evaluation_order() {
        let x = up("old", 1.0).into_fired(2.0, Utc::now());
        let a = up("bitcoin", 10.0);
        let b = down("ethereum", 10.0);
        let h = harness(
            vec![a.clone(), b.clone()],
            vec![x.clone()],
            FixedPrices::with(&[("bitcoin", "usd", 11.0), ("ethereum", "usd", 9.0)]),
        )
        .await;

        h.engine.run_cycle().await.unwrap();

        let history = h.engine.alarms().await.unwrap().history;
        let ids: Vec<String> = history.into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![x.id, a.id, b.id]);
    }

    #[tokio::test]
    async fn price_failure_aborts_cycle_untouched() {
        let h = single(up("bitcoin", 1.0), "bitcoin", 2.0).await;
        h.prices.fail.store(true, Ordering::SeqCst);

        assert!(h.engine.run_cycle().await.is_err());
        assert_eq!(h.engine.alarms().await.unwrap().active.len(), 1);
        assert_eq!(h.store.writes.load(Ordering::SeqCst), 0);

        // Next cycle retries from a clean slate.
        h.prices.fail.store(false, Ordering::SeqCst);
        let report = h.engine.run_cycle().await.unwrap();
        assert!(matches!(report, CycleReport::Fired { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_is_not_committed_and_does_not_notify() {
        let h = single(up("bitcoin", 1.0), "bitcoin", 2.0).await;
        let mut changes = h.engine.subscribe();
        h.store.fail_writes.store(true, Ordering::SeqCst);

        assert!(h.engine.run_cycle().await.is_err());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.sink.ids().is_empty());
        assert!(matches!(changes.try_recv(), Err(TryRecvError::Empty)));

        h.store.fail_writes.store(false, Ordering::SeqCst);
        let set = h.engine.alarms().await.unwrap();
        assert_eq!(set.active.len(), 1, "the alarm is still active and will be re-evaluated");
        assert!(set.history.is_empty());
    }

    #[tokio::test]
    async fn dismiss_unknown_id_returns_unchanged_set() {
        let alarm = up("bitcoin", 1.0);
        let fired = up("ethereum", 1.0).into_fired(1.0, Utc::now());
        let h = harness(vec![alarm], vec![fired.clone()], FixedPrices::with(&[])).await;
        let before = h.engine.alarms().await.unwrap();

        let after = h.engine.dismiss_alarm("does-not-exist").await.unwrap();
        assert_eq!(after, before);

        // History ids are not considered.
        let after = h.engine.dismiss_alarm(&fired.id).await.unwrap();
        assert_eq!(after.history, vec![fired]);
    }

    #[tokio::test]
    async fn crud_touches_only_its_collection_and_publishes() {
        let fired = up("ethereum", 1.0).into_fired(1.0, Utc::now());
        let h = harness(vec![], vec![fired.clone()], FixedPrices::with(&[])).await;
        let mut changes = h.engine.subscribe();

        let alarm = up("bitcoin", 1.0);
        let set = h.engine.add_alarm(alarm.clone()).await.unwrap();
        assert_eq!(set.active, vec![alarm.clone()]);
        assert_eq!(set.history, vec![fired]);
        assert_eq!(changes.recv().await.unwrap(), set);

        let set = h.engine.clear_history().await.unwrap();
        assert_eq!(set.active, vec![alarm.clone()]);
        assert!(set.history.is_empty());

        let set = h.engine.dismiss_alarm(&alarm.id).await.unwrap();
        assert!(set.active.is_empty());
        assert_eq!(h.store.writes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_changes_are_published_in_commit_order() {
        let h = harness(vec![], vec![], FixedPrices::with(&[])).await;
        let engine = Arc::new(h.engine);
        let mut changes = engine.subscribe();

        let adds: Vec<_> = (0..32)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.add_alarm(up("bitcoin", i as f64 + 1.0)).await })
            })
            .collect();
        for add in adds {
            add.await.unwrap().unwrap();
        }

        for expected in 1..=32 {
            assert_eq!(changes.recv().await.unwrap().active.len(), expected);
        }
    }

    #[tokio::test]
    async fn dismissal_during_price_query_wins() {
        /// Price source that dismisses the alarm before answering.
        struct DismissingPrices {
            engine: std::sync::OnceLock<Arc<AlarmEngine>>,
            alarm_id: String,
        }

        #[async_trait]
        impl PriceSource for DismissingPrices {
            async fn prices(
                &self,
                _: &BTreeSet<String>,
                _: &BTreeSet<String>,
            ) -> Result<PriceTable> {
                if let Some(engine) = self.engine.get() {
                    engine.dismiss_alarm(&self.alarm_id).await?;
                }
                let mut table: PriceTable = HashMap::new();
                table.entry("bitcoin".into()).or_default().insert("usd".into(), 10.0);
                Ok(table)
            }
        }

        let alarm = up("bitcoin", 1.0);
        let store = Arc::new(MemoryStore::default());
        let initial = AlarmSet { active: vec![alarm.clone()], history: vec![] };
        store.write(&initial).await.unwrap();
        let prices = Arc::new(DismissingPrices {
            engine: Default::default(),
            alarm_id: alarm.id.clone(),
        });
        let engine = Arc::new(AlarmEngine::new(
            store.clone(),
            prices.clone(),
            Dispatcher::new(Vec::new(), Duration::ZERO),
        ));
        let _ = prices.engine.set(engine.clone());

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report, CycleReport::Quiet { checked: 0 });
        let set = engine.alarms().await.unwrap();
        assert!(set.active.is_empty() && set.history.is_empty());
    }

    #[tokio::test]
    async fn overlapping_cycle_is_skipped() {
        let h = single(up("bitcoin", 1.0), "bitcoin", 1.0).await;
        let _held = InFlight::acquire(&h.engine.in_flight).unwrap();

        assert_eq!(h.engine.run_cycle().await.unwrap(), CycleReport::Skipped);
        assert_eq!(h.prices.query_count(), 0);
    }
}
