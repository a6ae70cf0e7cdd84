//! Normalized tabular results.
//!
//! A [`RowSet`] keeps its column list once and each row as a value vector of
//! the same width. It serializes as a JSON array of objects whose keys follow
//! column order, and deserializes from the same shape without losing that order.

use crate::value::ScalarValue;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSet {
    columns: Arc<[String]>,
    rows: Vec<Vec<ScalarValue>>,
}

/// A row whose width does not match the column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowWidthMismatch {
    pub row: usize,
    pub expected: usize,
    pub actual: usize,
}

impl fmt::Display for RowWidthMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {} has {} fields but the result declares {} columns",
            self.row, self.actual, self.expected
        )
    }
}

impl std::error::Error for RowWidthMismatch {}

impl RowSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns: columns.into(),
            rows: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn push_row(&mut self, values: Vec<ScalarValue>) -> Result<(), RowWidthMismatch> {
        if values.len() != self.columns.len() {
            return Err(RowWidthMismatch {
                row: self.rows.len(),
                expected: self.columns.len(),
                actual: values.len(),
            });
        }
        self.rows.push(values);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = Row<'_>> + '_ {
        self.rows.iter().map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// Build a row set from order-preserving rows, using the first row's keys as columns.
    pub fn from_ordered_rows(rows: Vec<OrderedRow>) -> Result<Self, String> {
        let mut rows = rows.into_iter();
        let Some(first) = rows.next() else {
            return Ok(Self::empty());
        };

        let (columns, values): (Vec<String>, Vec<ScalarValue>) = first.0.into_iter().unzip();
        let mut set = Self::new(columns);
        set.rows.push(values);

        for (offset, row) in rows.enumerate() {
            let index = offset + 1;
            let values = set.align(row).ok_or_else(|| {
                format!("row {} has columns that differ from the first row", index)
            })?;
            set.rows.push(values);
        }
        Ok(set)
    }

    fn align(&self, row: OrderedRow) -> Option<Vec<ScalarValue>> {
        if row.0.len() != self.columns.len() {
            return None;
        }
        if row.0.iter().zip(self.columns.iter()).all(|((k, _), c)| k == c) {
            return Some(row.0.into_iter().map(|(_, v)| v).collect());
        }
        let mut fields: Vec<Option<(String, ScalarValue)>> = row.0.into_iter().map(Some).collect();
        self.columns
            .iter()
            .map(|column| {
                fields
                    .iter_mut()
                    .find(|f| matches!(f, Some((k, _)) if k == column))
                    .and_then(Option::take)
                    .map(|(_, v)| v)
            })
            .collect()
    }
}

/// Borrowed view of one row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [ScalarValue],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a ScalarValue> {
        let values = self.values;
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &values[i])
    }

    pub fn values(&self) -> &'a [ScalarValue] {
        self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a ScalarValue)> + 'a {
        let (columns, values) = (self.columns, self.values);
        columns.iter().map(String::as_str).zip(values.iter())
    }
}

impl Serialize for Row<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl Serialize for RowSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in self.rows() {
            seq.serialize_element(&row)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for RowSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowSetVisitor;

        impl<'de> Visitor<'de> for RowSetVisitor {
            type Value = RowSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an array of row objects")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<RowSet, A::Error> {
                let mut rows = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(row) = seq.next_element::<OrderedRow>()? {
                    rows.push(row);
                }
                RowSet::from_ordered_rows(rows).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_seq(RowSetVisitor)
    }
}

/// A JSON object decoded with its key order intact.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderedRow(pub Vec<(String, ScalarValue)>);

impl<'de> Deserialize<'de> for OrderedRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedRowVisitor;

        impl<'de> Visitor<'de> for OrderedRowVisitor {
            type Value = OrderedRow;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a row object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<OrderedRow, A::Error> {
                let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, ScalarValue>()? {
                    fields.push((key, value));
                }
                Ok(OrderedRow(fields))
            }
        }

        deserializer.deserialize_map(OrderedRowVisitor)
    }
}
