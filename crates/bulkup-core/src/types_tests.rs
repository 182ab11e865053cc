//! Tests for core value types

use crate::{QueryResult, Row, Value};
use chrono::NaiveDate;

#[test]
fn test_value_from_option() {
    assert_eq!(Value::from(None::<i32>), Value::Null);
    assert_eq!(Value::from(Some(7i32)), Value::Int32(7));
    assert_eq!(Value::from(Some("x")), Value::String("x".to_string()));
}

#[test]
fn test_value_accessors() {
    assert_eq!(Value::Int16(5).as_i64(), Some(5));
    assert_eq!(Value::String("42".into()).as_i64(), Some(42));
    assert_eq!(Value::Decimal("1.5".into()).as_f64(), Some(1.5));
    assert_eq!(Value::Int32(1).as_bool(), Some(true));
    assert_eq!(Value::UInt8(0).as_bool(), Some(false));
    assert_eq!(Value::String("true".into()).as_bool(), None);
    assert!(Value::Null.is_null());
}

#[test]
fn test_value_display() {
    let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    assert_eq!(Value::Date(date).to_string(), "2024-03-01");
    assert_eq!(Value::Bytes(vec![1, 2, 3]).to_string(), "<3 bytes>");
    assert_eq!(Value::Null.to_string(), "NULL");
}

#[test]
fn test_row_get_by_name_ignores_case() {
    let row = Row::new(
        vec!["COLUMN_NAME".to_string(), "IsIdentity".to_string()],
        vec![Value::from("Id"), Value::Int32(1)],
    );
    assert_eq!(row.get_by_name("column_name"), Some(&Value::from("Id")));
    assert_eq!(row.get(1), Some(&Value::Int32(1)));
    assert_eq!(row.get(2), None);
}

#[test]
fn test_query_result_empty() {
    let result = QueryResult::empty();
    assert!(result.rows.is_empty());
    assert!(result.columns.is_empty());
    assert_eq!(result.execution_time_ms, 0);
}
