//! Classification of an incoming batch against the rows already stored in a table.
//!
//! Every incoming row ends up in exactly one of three partitions:
//!
//! - `ignore`: the row matches an existing row by key and the checksums are equal;
//! - `update`: the row matches an existing row by key and no checksum column was given or
//!   the checksums differ;
//! - `insert`: the row matches no existing row.
//!
//! Matching walks the existing rows in order and binds each one to the first incoming row
//! with an equal key. Lookups go through a hash index over the incoming keys, so the cost is
//! linear in the size of both inputs.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tracing::{debug, warn};

use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;
use crate::types::{Row, Value};

/// Result of classifying an incoming batch.
///
/// The three partitions are disjoint and their union is exactly the incoming batch. `ignore`
/// and `update` follow the order of the existing rows that matched them, `insert` follows the
/// order of the incoming batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub ignore: Vec<Row>,
    pub update: Vec<Row>,
    pub insert: Vec<Row>,
}

impl Classification {
    /// Returns the total number of classified rows.
    pub fn len(&self) -> usize {
        self.ignore.len() + self.update.len() + self.insert.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hashable view over a key [`Value`] with the same equality as [`Value`]'s `PartialEq`.
#[derive(Debug, PartialEq, Eq, Hash)]
enum MatchKey<'a> {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(u64),
    String(&'a str),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Bytes(&'a [u8]),
    Json(String),
}

impl<'a> MatchKey<'a> {
    /// Builds the hashable key for `value`.
    ///
    /// Returns `None` for NaN, which is not equal to anything and can never match.
    fn new(value: &'a Value) -> Option<MatchKey<'a>> {
        let key = match value {
            Value::Null => MatchKey::Null,
            Value::Bool(value) => MatchKey::Bool(*value),
            Value::Int64(value) => MatchKey::Int64(*value),
            Value::Float64(value) if value.is_nan() => return None,
            // 0.0 and -0.0 compare equal.
            Value::Float64(value) if *value == 0.0 => MatchKey::Float64(0.0f64.to_bits()),
            Value::Float64(value) => MatchKey::Float64(value.to_bits()),
            Value::String(value) => MatchKey::String(value),
            Value::Timestamp(value) => MatchKey::Timestamp(*value),
            Value::Date(value) => MatchKey::Date(*value),
            Value::Bytes(value) => MatchKey::Bytes(value),
            Value::Json(value) => MatchKey::Json(value.to_string()),
        };

        Some(key)
    }
}

/// Returns the key value of `row`, failing with [`ErrorKind::MissingKeyColumn`] when absent.
pub(crate) fn key_of<'a>(row: &'a Row, key_column: &str, side: &str) -> SyncResult<&'a Value> {
    row.get(key_column).ok_or_else(|| {
        sync_error!(
            ErrorKind::MissingKeyColumn,
            "Row is missing the key column",
            format!("{side} row has no column `{key_column}`")
        )
    })
}

/// Checks that every incoming row carries `key_column`.
///
/// Fails with [`ErrorKind::MissingKeyColumn`] on the first row without it.
pub(crate) fn validate_incoming(incoming: &[Row], key_column: &str) -> SyncResult<()> {
    for row in incoming {
        key_of(row, key_column, "incoming")?;
    }

    Ok(())
}

/// Partitions `incoming` into rows to ignore, update and insert.
///
/// Fails with [`ErrorKind::MissingKeyColumn`] when any incoming or existing row lacks the key
/// column. When several existing rows share a key only the first one binds. When several
/// incoming rows share a key the first one is the match and the others are inserted.
pub fn classify(
    existing: &[Row],
    incoming: Vec<Row>,
    key_column: &str,
    checksum_column: Option<&str>,
) -> SyncResult<Classification> {
    let mut index: HashMap<MatchKey<'_>, usize> = HashMap::with_capacity(incoming.len());
    for (position, row) in incoming.iter().enumerate() {
        let key = key_of(row, key_column, "incoming")?;
        let Some(match_key) = MatchKey::new(key) else {
            continue;
        };

        match index.entry(match_key) {
            Entry::Vacant(entry) => {
                entry.insert(position);
            }
            Entry::Occupied(_) => {
                warn!(
                    %key_column,
                    %key,
                    position,
                    "duplicate key in incoming batch, only the first occurrence is matched"
                );
            }
        }
    }

    let mut matched = vec![false; incoming.len()];
    let mut ignore_positions = Vec::new();
    let mut update_positions = Vec::new();

    for existing_row in existing {
        let key = key_of(existing_row, key_column, "existing")?;
        let Some(position) = MatchKey::new(key).and_then(|match_key| index.get(&match_key))
        else {
            continue;
        };
        let position = *position;

        if matched[position] {
            debug!(%key_column, %key, "existing key already matched, skipping duplicate existing row");
            continue;
        }

        let incoming_row = &incoming[position];
        let unchanged = checksum_column.is_some_and(|checksum_column| {
            match (
                existing_row.get(checksum_column),
                incoming_row.get(checksum_column),
            ) {
                (Some(existing_checksum), Some(incoming_checksum)) => {
                    existing_checksum == incoming_checksum
                }
                _ => false,
            }
        });

        matched[position] = true;
        if unchanged {
            ignore_positions.push(position);
        } else {
            update_positions.push(position);
        }
    }

    let mut slots: Vec<Option<Row>> = incoming.into_iter().map(Some).collect();
    let mut take_all = |positions: Vec<usize>| -> Vec<Row> {
        positions
            .into_iter()
            .filter_map(|position| slots[position].take())
            .collect()
    };

    let ignore = take_all(ignore_positions);
    let update = take_all(update_positions);
    let insert = slots.into_iter().flatten().collect();

    let classification = Classification {
        ignore,
        update,
        insert,
    };

    debug!(
        ignored = classification.ignore.len(),
        updated = classification.update.len(),
        inserted = classification.insert.len(),
        "classified incoming rows"
    );

    Ok(classification)
}
