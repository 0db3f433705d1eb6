//! Module defining the per-source cleaning rules applied to every batch.
//!
//! Rules never fail on bad data: unparseable numbers and dates degrade to [`Cell::Missing`].
//! The only error is structural, a required column that is absent from the input.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::domain::{Cell, RawTable, Table};
use crate::error::{Error, missing_column};


/// Declarative transform rules for one source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleSet {
    /// Columns whose absence is a structural error
    #[serde(default)]
    pub required: Vec<String>,
    /// Date/time columns, applied in order
    #[serde(default)]
    pub temporal: Vec<TemporalRule>,
    #[serde(default)]
    pub numeric: NumericColumns,
    /// Derived `amount / 10^exponent` columns
    #[serde(default)]
    pub scaled: Vec<ScaledRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalRule {
    pub column: String,
    pub convention: DateConvention,
    /// When set, the parsed value goes into this new column instead of replacing `column`.
    /// The rule is skipped if the input already has a column named `target`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateConvention {
    /// `DD/MM/YYYY` style dates, optionally followed by a time
    DayFirst,
    /// ISO 8601 / RFC 3339 date-times, an explicit UTC offset is kept on the value
    Iso,
    /// Like `Iso`, truncated to the calendar date
    DateOnly,
    /// Seconds since the unix epoch, fractional seconds allowed
    EpochSeconds,
}

/// Selects which of the remaining columns are coerced to numbers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NumericColumns {
    /// Every column not claimed by a temporal rule
    #[default]
    AllExceptTemporal,
    Matching {
        #[serde(default)]
        prefixes: Vec<String>,
        #[serde(default)]
        suffixes: Vec<String>,
        #[serde(default)]
        names: Vec<String>,
    },
}

impl NumericColumns {
    fn selects(&self, column: &str) -> bool {
        match self {
            NumericColumns::AllExceptTemporal => true,
            NumericColumns::Matching {
                prefixes,
                suffixes,
                names,
            } => {
                prefixes.iter().any(|p| column.starts_with(p.as_str()))
                    || suffixes.iter().any(|s| column.ends_with(s.as_str()))
                    || names.iter().any(|n| n == column)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaledRule {
    pub amount: String,
    pub exponent: String,
    pub target: String,
}

impl RuleSet {
    /// Daily bank prices: a day-first `Date`, everything else numeric.
    pub fn bank_prices() -> Self {
        Self {
            required: vec!["Date".into()],
            temporal: vec![TemporalRule::new("Date", DateConvention::DayFirst)],
            numeric: NumericColumns::AllExceptTemporal,
            scaled: Vec::new(),
        }
    }

    /// Intraday stock quotes: an ISO `timestamp`, a calendar `date`, everything else numeric.
    pub fn tata_motors() -> Self {
        Self {
            required: vec!["timestamp".into()],
            temporal: vec![
                TemporalRule::new("timestamp", DateConvention::Iso),
                TemporalRule::new("date", DateConvention::DateOnly),
            ],
            numeric: NumericColumns::AllExceptTemporal,
            scaled: Vec::new(),
        }
    }

    /// On-chain pool swaps. `date` falls back to `block_time` (unix seconds), token amounts are
    /// normalized by their per-row decimals.
    pub fn pool_swaps() -> Self {
        Self {
            required: Vec::new(),
            temporal: vec![
                TemporalRule::new("date", DateConvention::Iso),
                TemporalRule {
                    column: "block_time".into(),
                    convention: DateConvention::EpochSeconds,
                    target: Some("date".into()),
                },
            ],
            numeric: NumericColumns::Matching {
                prefixes: vec!["token_amount".into()],
                suffixes: vec!["_usd".into()],
                names: ["slot", "num_swaps", "decimals_a", "decimals_b"]
                    .map(String::from)
                    .to_vec(),
            },
            scaled: vec![
                ScaledRule {
                    amount: "token_amount_a".into(),
                    exponent: "decimals_a".into(),
                    target: "token_amount_a_ui_calc".into(),
                },
                ScaledRule {
                    amount: "token_amount_b".into(),
                    exponent: "decimals_b".into(),
                    target: "token_amount_b_ui_calc".into(),
                },
            ],
        }
    }

    /// Applies the rules to one batch of `source_name`, returning the typed batch.
    /// Row order is preserved.
    pub fn apply(&self, source_name: &str, raw: &RawTable) -> Result<Table, Error> {
        let plan = self.plan(source_name, raw)?;

        let mut table = Table::new(plan.columns.clone());
        for record in raw.rows() {
            let mut row: Vec<Cell> = plan
                .input
                .iter()
                .enumerate()
                .map(|(i, role)| role.convert(record.get(i).unwrap_or("")))
                .collect();
            for (source, convention) in &plan.derived_temporal {
                row.push(parse_temporal(record.get(*source).unwrap_or(""), *convention));
            }
            for scaled in &plan.scaled {
                let value = scale(&row[scaled.amount], &row[scaled.exponent]);
                match scaled.target {
                    Target::Replace(i) => row[i] = value,
                    Target::Append => row.push(value),
                }
            }
            table.push_row(row);
        }
        Ok(table)
    }

    /// Resolves the rules against the columns of a batch. Done once per batch, not per row.
    fn plan(&self, source_name: &str, raw: &RawTable) -> Result<Plan, Error> {
        if let Some(absent) = self
            .required
            .iter()
            .find(|c| raw.column_index(c).is_none())
        {
            return Err(missing_column(source_name, absent.as_str()));
        }

        let mut columns = raw.columns().to_vec();
        let mut input: Vec<Role> = columns
            .iter()
            .map(|name| {
                if self.numeric.selects(name) {
                    Role::Numeric
                } else {
                    Role::Text
                }
            })
            .collect();

        let mut derived_temporal = Vec::new();
        for rule in &self.temporal {
            let Some(source) = raw.column_index(&rule.column) else {
                continue;
            };
            match &rule.target {
                None => input[source] = Role::Temporal(rule.convention),
                Some(target) if raw.column_index(target).is_none() => {
                    // a second rule targeting the same new column loses to the first
                    if !columns.contains(target) {
                        columns.push(target.clone());
                        derived_temporal.push((source, rule.convention));
                    }
                }
                Some(_) => {}
            }
        }
        let mut scaled = Vec::new();
        for rule in &self.scaled {
            let (Some(amount), Some(exponent)) = (
                columns.iter().position(|c| *c == rule.amount),
                columns.iter().position(|c| *c == rule.exponent),
            ) else {
                continue;
            };
            let target = match columns.iter().position(|c| *c == rule.target) {
                Some(i) => Target::Replace(i),
                None => {
                    columns.push(rule.target.clone());
                    Target::Append
                }
            };
            scaled.push(PlannedScale {
                amount,
                exponent,
                target,
            });
        }

        Ok(Plan {
            columns,
            input,
            derived_temporal,
            scaled,
        })
    }
}

impl TemporalRule {
    pub fn new(column: impl Into<String>, convention: DateConvention) -> Self {
        Self {
            column: column.into(),
            convention,
            target: None,
        }
    }
}

struct Plan {
    columns: Vec<String>,
    input: Vec<Role>,
    derived_temporal: Vec<(usize, DateConvention)>,
    scaled: Vec<PlannedScale>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Temporal(DateConvention),
    Numeric,
    Text,
}

impl Role {
    fn convert(self, raw: &str) -> Cell {
        match self {
            Role::Temporal(convention) => parse_temporal(raw, convention),
            Role::Numeric => clean_numeric(raw).map_or(Cell::Missing, Cell::Number),
            Role::Text if raw.is_empty() => Cell::Missing,
            Role::Text => Cell::Text(raw.to_string()),
        }
    }
}

struct PlannedScale {
    amount: usize,
    exponent: usize,
    target: Target,
}

enum Target {
    Replace(usize),
    Append,
}

/// Coerces a raw string to a number, or `None` if it does not hold one.
///
/// Surrounding whitespace, thousands separators and non-breaking spaces are removed, and zeros
/// directly in front of the decimal point are stripped (`"00.5"` reads as `0.5`).
/// Non-finite values count as unparseable.
pub fn clean_numeric(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '\u{a0}')
        .collect();
    let digits = cleaned.trim_start_matches('0');
    let cleaned = if digits.starts_with('.') {
        digits
    } else {
        cleaned.as_str()
    };
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `amount / 10^trunc(exponent)`, missing unless both operands are numbers.
fn scale(amount: &Cell, exponent: &Cell) -> Cell {
    match (amount.as_number(), exponent.as_number()) {
        (Some(amount), Some(exponent)) => {
            let value = amount / 10f64.powi(exponent.trunc() as i32);
            if value.is_finite() {
                Cell::Number(value)
            } else {
                Cell::Missing
            }
        }
        _ => Cell::Missing,
    }
}

const DAY_FIRST_DATE_TIMES: &[&str] = &[
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
];
const DAY_FIRST_DATES: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];
const ISO_DATE_TIMES: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];
const ZONED_DATE_TIMES: &[&str] = &["%Y-%m-%d %H:%M:%S%z", "%Y-%m-%d %H:%M:%S%.f%z"];
const ISO_DATES: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Parses a date/time according to `convention`, or [`Cell::Missing`] if it cannot.
pub fn parse_temporal(raw: &str, convention: DateConvention) -> Cell {
    let raw = raw.trim();
    if raw.is_empty() {
        return Cell::Missing;
    }
    let parsed = match convention {
        DateConvention::DayFirst => parse_with(raw, DAY_FIRST_DATE_TIMES, DAY_FIRST_DATES)
            .or_else(|| parse_iso(raw)),
        DateConvention::Iso => parse_iso(raw),
        DateConvention::DateOnly => parse_iso(raw).map(|cell| match cell {
            Cell::DateTime(dt) => Cell::Date(dt.date()),
            // the date as written, in the value's own offset
            Cell::ZonedDateTime(dt) => Cell::Date(dt.date_naive()),
            other => other,
        }),
        DateConvention::EpochSeconds => clean_numeric(raw).and_then(from_epoch_seconds),
    };
    parsed.unwrap_or(Cell::Missing)
}

fn parse_iso(raw: &str) -> Option<Cell> {
    if let Some(dt) = DateTime::parse_from_rfc3339(raw).ok().or_else(|| {
        ZONED_DATE_TIMES
            .iter()
            .find_map(|fmt| DateTime::parse_from_str(raw, fmt).ok())
    }) {
        return Some(Cell::ZonedDateTime(dt));
    }
    parse_with(raw, ISO_DATE_TIMES, ISO_DATES)
}

fn parse_with(raw: &str, date_times: &[&str], dates: &[&str]) -> Option<Cell> {
    date_times
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(Cell::DateTime)
        .or_else(|| {
            dates
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .map(Cell::Date)
        })
}

fn from_epoch_seconds(seconds: f64) -> Option<Cell> {
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp(whole as i64, nanos).map(|dt| Cell::DateTime(dt.naive_utc()))
}
