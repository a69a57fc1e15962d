//! Work items read from the source file and their normalization.
//!
//! A [`WorkItem`] is immutable once loaded. Before the first attempt the
//! retry coordinator calls [`WorkItem::prepare`], which decodes the day-serial
//! date into `DD-MM-YYYY` and yields a [`PreparedItem`] for the step sequence.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{SourceError, ValidationError};

/// Day-serial calendars count 1900-01-01 as day 1 and also count a
/// non-existent 1900-02-29.
const LEAP_YEAR_CORRECTION_DAYS: i64 = 2;

/// A field value as found in the source: spreadsheets export both numbers and text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Integral numbers print without a trailing ".0" (heights, weights, ids).
            FieldValue::Number(n) if n.fract() == 0.0 && n.abs() < 9e15 => {
                write!(f, "{}", *n as i64)
            }
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One input record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique, stable key. Numeric identifiers in the source are accepted.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Date in day-serial form (number or numeric string).
    #[serde(default)]
    pub date: Option<FieldValue>,
    /// Auxiliary fields: measurements, free text.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

/// A work item whose required fields passed normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedItem {
    pub item: WorkItem,
    /// Normalized date, `DD-MM-YYYY`.
    pub date: String,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, date: Option<FieldValue>) -> Self {
        Self {
            id: id.into(),
            date,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Runs the validation pass. Failure here is final for the item.
    pub fn prepare(&self) -> Result<PreparedItem, ValidationError> {
        let date = decode_serial_date(self.date.as_ref())?;
        Ok(PreparedItem {
            item: self.clone(),
            date,
        })
    }
}

impl PreparedItem {
    pub fn id(&self) -> &str {
        &self.item.id
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.item.fields.get(name)
    }
}

/// Decodes a day-serial date into `DD-MM-YYYY`.
///
/// Serial 2 is 1900-01-01 and anything lower is rejected; the serial is reduced by the two-day leap-year
/// correction and fractional days are dropped.
pub fn decode_serial_date(raw: Option<&FieldValue>) -> Result<String, ValidationError> {
    let raw = raw.ok_or(ValidationError::MissingField("date"))?;
    let serial = match raw {
        FieldValue::Number(n) => *n,
        FieldValue::Text(s) => s.trim().parse::<f64>().map_err(|_| ValidationError::NotASerial {
            field: "date",
            value: s.clone(),
        })?,
    };
    if !serial.is_finite() || serial < 2.0 {
        return Err(ValidationError::NotASerial {
            field: "date",
            value: raw.to_string(),
        });
    }
    if serial > i64::MAX as f64 {
        return Err(ValidationError::OutOfRange(i64::MAX));
    }

    let whole = serial.trunc() as i64;
    let offset = whole - LEAP_YEAR_CORRECTION_DAYS;
    let reference =
        NaiveDate::from_ymd_opt(1900, 1, 1).ok_or(ValidationError::OutOfRange(whole))?;
    let date = if offset >= 0 {
        reference.checked_add_days(Days::new(offset.unsigned_abs()))
    } else {
        reference.checked_sub_days(Days::new(offset.unsigned_abs()))
    }
    .ok_or(ValidationError::OutOfRange(whole))?;

    Ok(date.format("%d-%m-%Y").to_string())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
}

// Long numeric identifiers must not pass through f64.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Unsigned(n) => n.to_string(),
        RawId::Signed(n) => n.to_string(),
        RawId::Float(n) => FieldValue::Number(n).to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct TomlSource {
    #[serde(default)]
    items: Vec<WorkItem>,
}

/// Loads work items from a `.json` array or a `.toml` file with `[[items]]` tables.
///
/// Order is preserved. Empty and duplicate identifiers are rejected.
pub fn load_items(path: &Path) -> Result<Vec<WorkItem>, SourceError> {
    let contents = std::fs::read_to_string(path).map_err(|source| SourceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let items = match extension.as_str() {
        "json" => serde_json::from_str::<Vec<WorkItem>>(&contents).map_err(|e| {
            SourceError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?,
        "toml" => {
            toml::from_str::<TomlSource>(&contents)
                .map_err(|e| SourceError::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?
                .items
        }
        other => return Err(SourceError::Format(other.to_string())),
    };

    check_identifiers(&items)?;
    Ok(items)
}

fn check_identifiers(items: &[WorkItem]) -> Result<(), SourceError> {
    let mut seen = HashSet::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        if item.id.trim().is_empty() {
            return Err(SourceError::EmptyId(i + 1));
        }
        if !seen.insert(item.id.as_str()) {
            return Err(SourceError::Duplicate(item.id.clone()));
        }
    }
    Ok(())
}
