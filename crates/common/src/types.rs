use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of an alarm's trigger condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmKind {
    /// Fires once the price rises to or above the target.
    Up,
    /// Fires once the price falls to or below the target.
    Down,
}

impl AlarmKind {
    /// Level-triggered predicate. Equality with the target fires in both directions.
    pub fn is_crossed(self, current_price: f64, target_price: f64) -> bool {
        match self {
            AlarmKind::Up => current_price >= target_price,
            AlarmKind::Down => current_price <= target_price,
        }
    }
}

impl std::fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmKind::Up => write!(f, "up"),
            AlarmKind::Down => write!(f, "down"),
        }
    }
}

/// A user's watch condition on one coin, quoted in one currency.
///
/// `triggered_at` and `triggered_price` stay `None` while the alarm is active
/// and are stamped exactly once, when a cycle observes the condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    pub id: String,
    /// Asset id in the price source's namespace, e.g. "bitcoin".
    pub coin_id: String,
    /// Display name captured at creation; never re-resolved.
    pub coin_name: String,
    #[serde(rename = "type")]
    pub kind: AlarmKind,
    pub target_price: f64,
    /// Lowercase quote currency code, e.g. "usd".
    pub currency: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_price: Option<f64>,
}

impl Alarm {
    pub fn new(
        coin_id: impl Into<String>,
        coin_name: impl Into<String>,
        kind: AlarmKind,
        target_price: f64,
        currency: impl AsRef<str>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            coin_id: coin_id.into(),
            coin_name: coin_name.into(),
            kind,
            target_price,
            currency: currency.as_ref().trim().to_lowercase(),
            created_at: Utc::now(),
            triggered_at: None,
            triggered_price: None,
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered_at.is_some()
    }

    /// Stamp the firing details. Consumes the active alarm so the fired copy
    /// is the only one left.
    pub fn into_fired(mut self, price: f64, at: DateTime<Utc>) -> Self {
        self.triggered_at = Some(at);
        self.triggered_price = Some(price);
        self
    }
}

/// The aggregate persisted as one unit: alarms still being watched and
/// alarms that have already fired.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlarmSet {
    #[serde(default)]
    pub active: Vec<Alarm>,
    #[serde(default)]
    pub history: Vec<Alarm>,
}

impl AlarmSet {
    /// True when no alarm id appears in both collections.
    pub fn is_disjoint(&self) -> bool {
        let active: std::collections::HashSet<&str> =
            self.active.iter().map(|a| a.id.as_str()).collect();
        self.history.iter().all(|a| !active.contains(a.id.as_str()))
    }
}
