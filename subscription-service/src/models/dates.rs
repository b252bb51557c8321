//! Date helpers shared by the stored models.

use chrono::{DateTime, Utc};
use mongodb::bson;
use serde::{de::IgnoredAny, Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredDate {
    Chrono(DateTime<Utc>),
    Bson(bson::DateTime),
    Unreadable(IgnoredAny),
}

/// Deserialize an optional timestamp, mapping anything unreadable to `None`.
///
/// Entitlement checks treat a missing window end as "no access", so a
/// corrupted date can only ever narrow what a user is allowed to do.
pub fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let stored = Option::<StoredDate>::deserialize(deserializer)?;
    Ok(match stored {
        Some(StoredDate::Chrono(date)) => Some(date),
        Some(StoredDate::Bson(date)) => Some(date.to_chrono()),
        Some(StoredDate::Unreadable(_)) => {
            tracing::warn!("Discarding unreadable stored date");
            None
        }
        None => None,
    })
}

/// Gateway timestamps are epoch seconds.
pub fn from_epoch_seconds(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
}
