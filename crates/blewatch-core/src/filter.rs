//! Filtering and sorting of device snapshots.
//!
//! [`query`] is a pure function over a store snapshot: it never mutates its
//! input and its output depends only on its arguments.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use blewatch_types::DeviceRecord;

/// Default inclusive RSSI lower bound.
pub const DEFAULT_MIN_RSSI: i16 = -100;

/// Record field matched by [`QueryConfig::filter_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterField {
    /// Device name.
    #[default]
    Name,
    /// Device id.
    Id,
}

/// Sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    /// Latest RSSI.
    #[default]
    Rssi,
    /// Time of the last packet.
    LastSeen,
    /// Packets in the last sampling interval.
    Rate,
    /// Packets since first seen.
    Total,
    /// `|rssiMax - rssiMin|`.
    Delta,
    /// Name, case-insensitive.
    Name,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Smallest first.
    Asc,
    /// Largest first.
    #[default]
    Desc,
}

/// Query parameters.
///
/// Deserializes from the camelCase form (`minRssi`, `filterText`,
/// `filterField`, `sortKey`, `sortOrder`); missing fields take defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryConfig {
    /// Inclusive RSSI lower bound.
    pub min_rssi: i16,
    /// Case-insensitive substring; empty matches everything.
    pub filter_text: String,
    /// Field `filter_text` is matched against.
    pub filter_field: FilterField,
    /// Sort key.
    pub sort_key: SortKey,
    /// Sort direction.
    pub sort_order: SortOrder,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            min_rssi: DEFAULT_MIN_RSSI,
            filter_text: String::new(),
            filter_field: FilterField::default(),
            sort_key: SortKey::default(),
            sort_order: SortOrder::default(),
        }
    }
}

impl QueryConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the RSSI lower bound.
    #[must_use]
    pub fn min_rssi(mut self, min_rssi: i16) -> Self {
        self.min_rssi = min_rssi;
        self
    }

    /// Filter by substring on the given field.
    #[must_use]
    pub fn filter(mut self, field: FilterField, text: impl Into<String>) -> Self {
        self.filter_field = field;
        self.filter_text = text.into();
        self
    }

    /// Sort by `key` in `order`.
    #[must_use]
    pub fn sort(mut self, key: SortKey, order: SortOrder) -> Self {
        self.sort_key = key;
        self.sort_order = order;
        self
    }
}

/// Filter and sort a snapshot.
///
/// Keeps records with `rssi >= min_rssi` whose selected field contains
/// `filter_text` (case-insensitive), then sorts by the selected key. Records
/// comparing equal keep their snapshot order, in either direction.
///
/// ```
/// use blewatch_core::filter::{query, QueryConfig, SortKey, SortOrder};
/// use blewatch_types::DeviceRecord;
/// use time::OffsetDateTime;
///
/// let now = OffsetDateTime::now_utc();
/// let snapshot = vec![
///     DeviceRecord::new("1", Some("Zebra"), -50, now),
///     DeviceRecord::new("2", Some("Alpha"), -90, now),
/// ];
///
/// let names: Vec<String> = query(&snapshot, &QueryConfig::new().sort(SortKey::Name, SortOrder::Asc))
///     .into_iter()
///     .map(|r| r.name)
///     .collect();
/// assert_eq!(names, ["Alpha", "Zebra"]);
///
/// assert_eq!(query(&snapshot, &QueryConfig::new().min_rssi(-80)).len(), 1);
/// ```
pub fn query(snapshot: &[DeviceRecord], config: &QueryConfig) -> Vec<DeviceRecord> {
    let needle = config.filter_text.to_lowercase();

    let mut matches: Vec<(usize, &DeviceRecord)> = snapshot
        .iter()
        .enumerate()
        .filter(|(_, record)| record.rssi >= config.min_rssi)
        .filter(|(_, record)| {
            needle.is_empty()
                || match config.filter_field {
                    FilterField::Name => record.name.to_lowercase().contains(&needle),
                    FilterField::Id => record.id.to_lowercase().contains(&needle),
                }
        })
        .collect();

    matches.sort_unstable_by(|(ia, a), (ib, b)| {
        let by_key = compare(a, b, config.sort_key);
        let by_key = match config.sort_order {
            SortOrder::Asc => by_key,
            SortOrder::Desc => by_key.reverse(),
        };
        by_key.then(ia.cmp(ib))
    });

    matches.into_iter().map(|(_, record)| record.clone()).collect()
}

fn compare(a: &DeviceRecord, b: &DeviceRecord, key: SortKey) -> Ordering {
    match key {
        SortKey::Rssi => a.rssi.cmp(&b.rssi),
        SortKey::LastSeen => a.last_seen.cmp(&b.last_seen),
        SortKey::Rate => a.stats.rate.cmp(&b.stats.rate),
        SortKey::Total => a.stats.total.cmp(&b.stats.total),
        SortKey::Delta => a.stats.rssi_delta().cmp(&b.stats.rssi_delta()),
        SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    }
}

/// Error parsing a query option from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} '{value}' (expected one of: {expected})")]
pub struct ParseQueryOptionError {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

macro_rules! text_enum {
    ($ty:ident, $kind:literal, { $($text:literal => $variant:ident),+ $(,)? }) => {
        impl $ty {
            /// Canonical text form.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseQueryOptionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($text) {
                        return Ok($ty::$variant);
                    }
                )+
                Err(ParseQueryOptionError {
                    kind: $kind,
                    value: s.to_string(),
                    expected: concat!($($text, " "),+),
                })
            }
        }
    };
}

text_enum!(FilterField, "filter field", { "name" => Name, "id" => Id });
text_enum!(SortKey, "sort key", {
    "rssi" => Rssi,
    "lastSeen" => LastSeen,
    "rate" => Rate,
    "total" => Total,
    "delta" => Delta,
    "name" => Name,
});
text_enum!(SortOrder, "sort order", { "asc" => Asc, "desc" => Desc });
