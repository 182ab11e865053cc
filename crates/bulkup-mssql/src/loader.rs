//! Bulk row transport over the TDS bulk load protocol

use std::borrow::Cow;
use std::time::Instant;

use async_trait::async_trait;
use bulkup_core::{BulkLoadRequest, BulkLoader, BulkUpError, ColumnDescriptor, Result, Value};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use tiberius::numeric::Numeric;
use tiberius::time::{Date, DateTime as TdsDateTime, DateTime2, DateTimeOffset, SmallDateTime, Time};
use tiberius::{ColumnData, TokenRow};
use uuid::Uuid;

use crate::MssqlConnection;

/// Scale used for `time`, `datetime2` and `datetimeoffset` values
const TIME_SCALE: u8 = 7;

/// `datetime` ticks (1/300 s) in one day
const DATETIME_TICKS_PER_DAY: u32 = 86_400 * 300;

#[async_trait]
impl BulkLoader for MssqlConnection {
    #[tracing::instrument(
        skip(self, request),
        fields(destination = request.destination, rows = request.rows.len())
    )]
    async fn bulk_load(&self, request: BulkLoadRequest<'_>) -> Result<u64> {
        self.ensure_not_closed()?;
        let plan = LoadPlan::new(&request)?;
        if request.rows.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        let batch_size = request.batch_size.max(1);
        let load = async {
            let mut client = self.client().lock().await;
            let mut total = 0u64;
            for (batch, rows) in request.rows.rows().chunks(batch_size).enumerate() {
                let mut bulk = client
                    .bulk_insert(request.destination)
                    .await
                    .map_err(transport_error)?;
                for row in rows {
                    bulk.send(plan.token_row(row)?)
                        .await
                        .map_err(transport_error)?;
                }
                let result = bulk.finalize().await.map_err(transport_error)?;
                total += result.total();
                tracing::trace!(batch, rows = rows.len(), "batch sent");
            }
            Ok::<u64, BulkUpError>(total)
        };

        let total = match tokio::time::timeout(request.timeout, load).await {
            Ok(loaded) => loaded?,
            Err(_) => {
                self.mark_broken();
                return Err(BulkUpError::Transport(format!(
                    "bulk load into {} timed out after {}s",
                    request.destination,
                    request.timeout.as_secs()
                )));
            }
        };

        tracing::debug!(
            rows_loaded = total,
            duration_ms = start.elapsed().as_millis() as u64,
            "bulk load completed"
        );
        Ok(total)
    }
}

fn transport_error(e: tiberius::error::Error) -> BulkUpError {
    tracing::error!(error = %e, "bulk load failed");
    BulkUpError::Transport(e.to_string())
}

/// One column of the wire row
#[derive(Debug, Clone, Copy)]
pub(crate) struct PlannedColumn<'a> {
    pub name: &'a str,
    /// Index into the row set, `None` when no source field feeds the column
    pub source: Option<usize>,
    pub descriptor: Option<&'a ColumnDescriptor>,
}

/// Column order and sources for the rows of one bulk load
///
/// With a known layout the wire row follows the table's non-identity
/// columns, the ones the server expects; otherwise it follows the mapping.
#[derive(Debug)]
pub(crate) struct LoadPlan<'a> {
    pub columns: Vec<PlannedColumn<'a>>,
}

impl<'a> LoadPlan<'a> {
    pub fn new(request: &BulkLoadRequest<'a>) -> Result<Self> {
        let rows = request.rows;
        let source_index = |source: &str| {
            rows.column_index(source).ok_or_else(|| {
                BulkUpError::Configuration(format!(
                    "mapped source field '{}' is not in the row set",
                    source
                ))
            })
        };

        if request.columns.is_empty() {
            let columns = request
                .mapping
                .iter()
                .map(|m| {
                    Ok(PlannedColumn {
                        name: m.destination.as_str(),
                        source: Some(source_index(&m.source)?),
                        descriptor: None,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Self { columns });
        }

        for mapping in request.mapping {
            let target = request
                .columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(&mapping.destination));
            match target {
                None => {
                    return Err(BulkUpError::Configuration(format!(
                        "mapped column '{}' does not exist in {}",
                        mapping.destination, request.destination
                    )));
                }
                Some(column) if column.is_identity => {
                    tracing::debug!(column = %column.name, "identity column is generated by the server, mapping ignored");
                }
                Some(_) => {}
            }
        }

        let columns = request
            .columns
            .iter()
            .filter(|c| !c.is_identity)
            .map(|column| {
                let source = request
                    .mapping
                    .iter()
                    .find(|m| m.destination.eq_ignore_ascii_case(&column.name))
                    .map(|m| source_index(&m.source))
                    .transpose()?;
                Ok(PlannedColumn {
                    name: column.name.as_str(),
                    source,
                    descriptor: Some(column),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { columns })
    }

    /// Build the wire row for one row of the row set
    pub fn token_row(&self, row: &[Value]) -> Result<TokenRow<'static>> {
        let mut token_row = TokenRow::new();
        for column in &self.columns {
            let value = column
                .source
                .and_then(|i| row.get(i))
                .unwrap_or(&Value::Null);
            let data = coerce(value, column.descriptor).map_err(|reason| {
                BulkUpError::Transport(format!("column '{}': {}", column.name, reason))
            })?;
            token_row.push(data);
        }
        Ok(token_row)
    }
}

/// Convert a value into the wire representation of the destination column type
pub(crate) fn coerce(
    value: &Value,
    column: Option<&ColumnDescriptor>,
) -> std::result::Result<ColumnData<'static>, String> {
    let Some(column) = column else {
        return natural(value);
    };
    let data_type = column.data_type.to_ascii_lowercase();
    let mismatch = || format!("cannot convert {:?} to {}", value, data_type);

    let data = match data_type.as_str() {
        "bit" => ColumnData::Bit(nullable(value, |v| v.as_bool().ok_or_else(mismatch))?),
        "tinyint" => ColumnData::U8(nullable(value, |v| integer(v, &data_type))?),
        "smallint" => ColumnData::I16(nullable(value, |v| integer(v, &data_type))?),
        "int" => ColumnData::I32(nullable(value, |v| integer(v, &data_type))?),
        "bigint" => ColumnData::I64(nullable(value, |v| integer(v, &data_type))?),
        "real" => ColumnData::F32(nullable(value, |v| float(v).map(|f| f as f32).ok_or_else(mismatch))?),
        "float" => ColumnData::F64(nullable(value, |v| float(v).ok_or_else(mismatch))?),
        "decimal" | "numeric" | "money" | "smallmoney" => {
            let scale = match data_type.as_str() {
                "money" | "smallmoney" => 4,
                _ => column.numeric_scale.unwrap_or(0),
            };
            ColumnData::Numeric(nullable(value, |v| {
                decimal_text(v)
                    .and_then(|text| parse_decimal(&text, scale))
                    .map(|n| Numeric::new_with_scale(n, scale))
                    .ok_or_else(mismatch)
            })?)
        }
        "char" | "varchar" | "nchar" | "nvarchar" | "text" | "ntext" | "xml" | "sysname" => {
            ColumnData::String(nullable(value, |v| match v {
                Value::Bytes(_) => Err(mismatch()),
                other => Ok(Cow::Owned(other.to_string())),
            })?)
        }
        "binary" | "varbinary" | "image" => ColumnData::Binary(nullable(value, |v| match v {
            Value::Bytes(b) => Ok(Cow::Owned(b.clone())),
            _ => Err(mismatch()),
        })?),
        "uniqueidentifier" => ColumnData::Guid(nullable(value, |v| match v {
            Value::Uuid(u) => Ok(*u),
            Value::String(s) => Uuid::parse_str(s).map_err(|e| e.to_string()),
            _ => Err(mismatch()),
        })?),
        "date" => ColumnData::Date(nullable(value, |v| {
            naive_datetime(v).ok_or_else(mismatch).and_then(|dt| tds_date(dt.date()))
        })?),
        "time" => ColumnData::Time(nullable(value, |v| {
            naive_datetime(v).map(|dt| tds_time(dt.time())).ok_or_else(mismatch)
        })?),
        "datetime" => ColumnData::DateTime(nullable(value, |v| {
            naive_datetime(v).and_then(tds_datetime).ok_or_else(mismatch)
        })?),
        "smalldatetime" => ColumnData::SmallDateTime(nullable(value, |v| {
            naive_datetime(v).and_then(tds_small_datetime).ok_or_else(mismatch)
        })?),
        "datetime2" => ColumnData::DateTime2(nullable(value, |v| {
            naive_datetime(v).ok_or_else(mismatch).and_then(tds_datetime2)
        })?),
        "datetimeoffset" => ColumnData::DateTimeOffset(nullable(value, |v| {
            naive_datetime(v)
                .ok_or_else(mismatch)
                .and_then(tds_datetime2)
                .map(|dt2| DateTimeOffset::new(dt2, 0))
        })?),
        _ => natural(value)?,
    };
    Ok(data)
}

fn nullable<T>(
    value: &Value,
    convert: impl FnOnce(&Value) -> std::result::Result<T, String>,
) -> std::result::Result<Option<T>, String> {
    if value.is_null() {
        Ok(None)
    } else {
        convert(value).map(Some)
    }
}

fn integer<T: TryFrom<i64>>(value: &Value, data_type: &str) -> std::result::Result<T, String> {
    let wide = match value {
        Value::Bool(b) => Some(*b as i64),
        other => other.as_i64(),
    }
    .ok_or_else(|| format!("cannot convert {:?} to {}", value, data_type))?;
    T::try_from(wide).map_err(|_| format!("{} is out of range for {}", wide, data_type))
}

fn float(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_i64().map(|i| i as f64))
}

fn decimal_text(value: &Value) -> Option<String> {
    match value {
        Value::Decimal(s) | Value::String(s) => Some(s.trim().to_string()),
        Value::UInt8(_) | Value::Int16(_) | Value::Int32(_) | Value::Int64(_) => {
            value.as_i64().map(|i| i.to_string())
        }
        Value::Float32(f) => Some(f.to_string()),
        Value::Float64(f) => Some(f.to_string()),
        _ => None,
    }
}

/// Parse a plain decimal literal into an integer at `scale`, rounding half away from zero
pub(crate) fn parse_decimal(text: &str, scale: u8) -> Option<i128> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let scale = scale as usize;
    let mut unscaled: i128 = 0;
    for c in whole.chars().chain(fraction.chars().chain(std::iter::repeat('0')).take(scale)) {
        unscaled = unscaled.checked_mul(10)?.checked_add(c.to_digit(10)? as i128)?;
    }
    if fraction.chars().nth(scale).is_some_and(|c| c >= '5') {
        unscaled = unscaled.checked_add(1)?;
    }

    Some(if negative { -unscaled } else { unscaled })
}

fn naive_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::DateTime(dt) => Some(*dt),
        Value::DateTimeUtc(dt) => Some(dt.naive_utc()),
        Value::Date(d) => Some(d.and_time(NaiveTime::MIN)),
        Value::Time(t) => NaiveDate::from_ymd_opt(1900, 1, 1).map(|d| d.and_time(*t)),
        Value::String(s) => s
            .parse::<NaiveDateTime>()
            .ok()
            .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok())
            .or_else(|| s.parse::<DateTime<Utc>>().ok().map(|dt| dt.naive_utc()))
            .or_else(|| s.parse::<NaiveDate>().ok().map(|d| d.and_time(NaiveTime::MIN))),
        _ => None,
    }
}

fn days_since(date: NaiveDate, year: i32) -> Option<i64> {
    NaiveDate::from_ymd_opt(year, 1, 1).map(|base| (date - base).num_days())
}

fn tds_date(date: NaiveDate) -> std::result::Result<Date, String> {
    u32::try_from(date.num_days_from_ce() - 1)
        .map(Date::new)
        .map_err(|_| format!("date {} is before 0001-01-01", date))
}

fn tds_time(time: NaiveTime) -> Time {
    let increments =
        time.num_seconds_from_midnight() as u64 * 10_000_000 + (time.nanosecond() as u64 / 100);
    Time::new(increments, TIME_SCALE)
}

fn tds_datetime2(dt: NaiveDateTime) -> std::result::Result<DateTime2, String> {
    Ok(DateTime2::new(tds_date(dt.date())?, tds_time(dt.time())))
}

fn tds_datetime(dt: NaiveDateTime) -> Option<TdsDateTime> {
    let mut days = i32::try_from(days_since(dt.date(), 1900)?).ok()?;
    let time = dt.time();
    // 1/300 second ticks; rounding up from the last tick of a day carries into the next
    let mut fragments = time.num_seconds_from_midnight() * 300
        + ((time.nanosecond() as u64 * 300 + 500_000_000) / 1_000_000_000) as u32;
    if fragments >= DATETIME_TICKS_PER_DAY {
        days = days.checked_add(1)?;
        fragments -= DATETIME_TICKS_PER_DAY;
    }
    Some(TdsDateTime::new(days, fragments))
}

fn tds_small_datetime(dt: NaiveDateTime) -> Option<SmallDateTime> {
    let days = u16::try_from(days_since(dt.date(), 1900)?).ok()?;
    let minutes = (dt.time().num_seconds_from_midnight() / 60) as u16;
    Some(SmallDateTime::new(days, minutes))
}

/// Wire representation of a value when the destination type is unknown
fn natural(value: &Value) -> std::result::Result<ColumnData<'static>, String> {
    let data = match value {
        Value::Null => ColumnData::String(None),
        Value::Bool(v) => ColumnData::Bit(Some(*v)),
        Value::UInt8(v) => ColumnData::U8(Some(*v)),
        Value::Int16(v) => ColumnData::I16(Some(*v)),
        Value::Int32(v) => ColumnData::I32(Some(*v)),
        Value::Int64(v) => ColumnData::I64(Some(*v)),
        Value::Float32(v) => ColumnData::F32(Some(*v)),
        Value::Float64(v) => ColumnData::F64(Some(*v)),
        Value::Decimal(s) => {
            let scale = s
                .split_once('.')
                .map(|(_, fraction)| fraction.len().min(38) as u8)
                .unwrap_or(0);
            match parse_decimal(s.trim(), scale) {
                Some(n) => ColumnData::Numeric(Some(Numeric::new_with_scale(n, scale))),
                None => ColumnData::String(Some(Cow::Owned(s.clone()))),
            }
        }
        Value::String(s) => ColumnData::String(Some(Cow::Owned(s.clone()))),
        Value::Bytes(b) => ColumnData::Binary(Some(Cow::Owned(b.clone()))),
        Value::Uuid(u) => ColumnData::Guid(Some(*u)),
        Value::Date(d) => ColumnData::Date(Some(tds_date(*d)?)),
        Value::Time(t) => ColumnData::Time(Some(tds_time(*t))),
        Value::DateTime(dt) => ColumnData::DateTime2(Some(tds_datetime2(*dt)?)),
        Value::DateTimeUtc(dt) => ColumnData::DateTimeOffset(Some(DateTimeOffset::new(
            tds_datetime2(dt.naive_utc())?,
            0,
        ))),
    };
    Ok(data)
}
