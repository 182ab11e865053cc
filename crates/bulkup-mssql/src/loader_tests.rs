//! Tests for the bulk transport plan and value coercion

use std::time::Duration;

use crate::loader::{LoadPlan, coerce, parse_decimal};
use bulkup_core::{
    BulkLoadRequest, BulkUpError, ColumnDescriptor, FieldMapping, RowSet, RowSetColumn,
    SourceType, Value,
};
use chrono::{NaiveDate, NaiveDateTime};
use pretty_assertions::assert_eq;
use rstest::rstest;
use tiberius::ColumnData;

fn users_columns() -> Vec<ColumnDescriptor> {
    vec![
        ColumnDescriptor::new("Id", "int").primary_key().identity(),
        ColumnDescriptor::new("Email", "nvarchar").with_char_length(256),
        ColumnDescriptor::new("Name", "nvarchar").with_char_length(100),
        ColumnDescriptor::new("Created", "datetime"),
    ]
}

fn users_rows() -> RowSet {
    let mut rows = RowSet::new(vec![
        RowSetColumn::new("email", SourceType::String),
        RowSetColumn::new("name", SourceType::String),
    ]);
    rows.push_row(vec![Value::from("a@example.com"), Value::from("A")])
        .unwrap();
    rows
}

fn request<'a>(
    rows: &'a RowSet,
    mapping: &'a [FieldMapping],
    columns: &'a [ColumnDescriptor],
) -> BulkLoadRequest<'a> {
    BulkLoadRequest {
        destination: "[##Tstage]",
        rows,
        mapping,
        columns,
        batch_size: 5000,
        timeout: Duration::from_secs(60),
    }
}

mod plan_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plan_follows_table_layout_without_identity() {
        let rows = users_rows();
        let columns = users_columns();
        let mapping = vec![
            FieldMapping::new("name", "Name"),
            FieldMapping::new("email", "Email"),
        ];
        let plan = LoadPlan::new(&request(&rows, &mapping, &columns)).unwrap();

        let planned: Vec<(&str, Option<usize>)> =
            plan.columns.iter().map(|c| (c.name, c.source)).collect();
        assert_eq!(
            planned,
            vec![("Email", Some(0)), ("Name", Some(1)), ("Created", None)]
        );
        assert!(plan.token_row(&rows.rows()[0]).is_ok());
    }

    #[test]
    fn test_plan_without_layout_follows_mapping() {
        let rows = users_rows();
        let mapping = vec![
            FieldMapping::new("name", "FullName"),
            FieldMapping::new("email", "Email"),
        ];
        let plan = LoadPlan::new(&request(&rows, &mapping, &[])).unwrap();

        let planned: Vec<(&str, Option<usize>)> =
            plan.columns.iter().map(|c| (c.name, c.source)).collect();
        assert_eq!(planned, vec![("FullName", Some(1)), ("Email", Some(0))]);
        assert!(plan.columns.iter().all(|c| c.descriptor.is_none()));
    }

    #[test]
    fn test_mapping_to_unknown_column() {
        let rows = users_rows();
        let columns = users_columns();
        let mapping = vec![FieldMapping::new("email", "Mail")];
        let err = LoadPlan::new(&request(&rows, &mapping, &columns)).unwrap_err();
        assert!(matches!(err, BulkUpError::Configuration(msg) if msg.contains("Mail")));
    }

    #[test]
    fn test_mapping_from_unknown_field() {
        let rows = users_rows();
        let columns = users_columns();
        let mapping = vec![FieldMapping::new("phone", "Email")];
        let err = LoadPlan::new(&request(&rows, &mapping, &columns)).unwrap_err();
        assert!(matches!(err, BulkUpError::Configuration(msg) if msg.contains("phone")));
    }

    #[test]
    fn test_unconvertible_value_is_transport_error() {
        let mut rows = RowSet::new(vec![RowSetColumn::new("Created", SourceType::Binary)]);
        rows.push_row(vec![Value::Bytes(vec![1, 2])]).unwrap();
        let columns = users_columns();
        let mapping = vec![FieldMapping::identity("Created")];
        let plan = LoadPlan::new(&request(&rows, &mapping, &columns)).unwrap();

        let err = plan.token_row(&rows.rows()[0]).unwrap_err();
        assert!(matches!(err, BulkUpError::Transport(msg) if msg.contains("Created")));
    }
}

mod coerce_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn column(data_type: &str) -> ColumnDescriptor {
        ColumnDescriptor::new("c", data_type)
    }

    #[test]
    fn test_integers_narrow_with_range_check() {
        assert!(matches!(
            coerce(&Value::Int64(5), Some(&column("int"))),
            Ok(ColumnData::I32(Some(5)))
        ));
        assert!(matches!(
            coerce(&Value::Int32(200), Some(&column("tinyint"))),
            Ok(ColumnData::U8(Some(200)))
        ));
        let err = coerce(&Value::Int64(300), Some(&column("tinyint"))).unwrap_err();
        assert!(err.contains("out of range"));
    }

    #[test]
    fn test_null_is_typed() {
        assert!(matches!(
            coerce(&Value::Null, Some(&column("nvarchar"))),
            Ok(ColumnData::String(None))
        ));
        assert!(matches!(
            coerce(&Value::Null, Some(&column("bigint"))),
            Ok(ColumnData::I64(None))
        ));
    }

    #[test]
    fn test_scalars_render_into_strings() {
        match coerce(&Value::Int32(42), Some(&column("NVARCHAR"))) {
            Ok(ColumnData::String(Some(s))) => assert_eq!(s, "42"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(coerce(&Value::Bytes(vec![1]), Some(&column("nvarchar"))).is_err());
    }

    #[test]
    fn test_bit_from_integer() {
        assert!(matches!(
            coerce(&Value::Int32(1), Some(&column("bit"))),
            Ok(ColumnData::Bit(Some(true)))
        ));
    }

    #[test]
    fn test_decimal_rescaled_to_column() {
        let price = ColumnDescriptor::new("Price", "decimal").with_precision(10, 2);
        match coerce(&Value::Decimal("12.345".into()), Some(&price)) {
            Ok(ColumnData::Numeric(Some(n))) => {
                assert_eq!(n.value(), 1235);
                assert_eq!(n.scale(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        match coerce(&Value::Int32(7), Some(&price)) {
            Ok(ColumnData::Numeric(Some(n))) => assert_eq!(n.value(), 700),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_legacy_datetime() {
        let value = NaiveDate::from_ymd_opt(1900, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 1)
            .unwrap();
        match coerce(&Value::DateTime(value), Some(&column("datetime"))) {
            Ok(ColumnData::DateTime(Some(dt))) => {
                assert_eq!(dt.days(), 1);
                assert_eq!(dt.seconds_fragments(), 300);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_legacy_datetime_rounding_carries_into_next_day() {
        let value = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_milli_opt(23, 59, 59, 999)
            .unwrap();
        match coerce(&Value::DateTime(value), Some(&column("datetime"))) {
            Ok(ColumnData::DateTime(Some(dt))) => {
                assert_eq!(dt.days(), 45_291);
                assert_eq!(dt.seconds_fragments(), 0);
            }
            other => panic!("unexpected {:?}", other),
        }

        let value = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_milli_opt(23, 59, 59, 997)
            .unwrap();
        match coerce(&Value::DateTime(value), Some(&column("datetime"))) {
            Ok(ColumnData::DateTime(Some(dt))) => {
                assert_eq!(dt.days(), 45_290);
                assert_eq!(dt.seconds_fragments(), 25_919_999);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_dates_before_year_one_are_rejected() {
        let ancient = NaiveDate::from_ymd_opt(0, 12, 31).unwrap();
        let err = coerce(&Value::Date(ancient), Some(&column("date"))).unwrap_err();
        assert!(err.contains("before 0001-01-01"));

        let err = coerce(&Value::Date(ancient), None).unwrap_err();
        assert!(err.contains("before 0001-01-01"));

        let err = coerce(
            &Value::DateTime(ancient.and_hms_opt(12, 0, 0).unwrap()),
            Some(&column("datetime2")),
        )
        .unwrap_err();
        assert!(err.contains("before 0001-01-01"));
    }

    #[test]
    fn test_date_from_string() {
        let value = Value::from("0001-01-11");
        match coerce(&value, Some(&column("date"))) {
            Ok(ColumnData::Date(Some(d))) => assert_eq!(d.days(), 10),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_guid_from_string() {
        let id = uuid::Uuid::new_v4();
        match coerce(&Value::String(id.to_string()), Some(&column("uniqueidentifier"))) {
            Ok(ColumnData::Guid(Some(parsed))) => assert_eq!(parsed, id),
            other => panic!("unexpected {:?}", other),
        }
        assert!(coerce(&Value::from("nope"), Some(&column("uniqueidentifier"))).is_err());
    }

    #[test]
    fn test_unknown_destination_uses_value_type() {
        assert!(matches!(
            coerce(&Value::Int16(3), None),
            Ok(ColumnData::I16(Some(3)))
        ));
        let dt: NaiveDateTime = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert!(matches!(
            coerce(&Value::DateTime(dt), Some(&column("sql_variant"))),
            Ok(ColumnData::DateTime2(Some(_)))
        ));
    }
}

#[rstest]
#[case("12.345", 2, Some(1235))]
#[case("-1.5", 0, Some(-2))]
#[case("10", 3, Some(10_000))]
#[case(".5", 1, Some(5))]
#[case("1.", 0, Some(1))]
#[case("+3.14159", 4, Some(31_416))]
#[case("abc", 2, None)]
#[case("1e5", 0, None)]
#[case("", 0, None)]
#[case("-", 0, None)]
fn test_parse_decimal(#[case] text: &str, #[case] scale: u8, #[case] expected: Option<i128>) {
    assert_eq!(parse_decimal(text, scale), expected);
}
