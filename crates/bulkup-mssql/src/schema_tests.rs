//! Tests for destination table introspection

use crate::SchemaInspector;
use crate::schema::descriptor_from_row;
use crate::test_support::{MockConnection, catalog_row};
use bulkup_core::{BulkUpError, ColumnDescriptor, TableName, Value};
use pretty_assertions::assert_eq;

#[test]
fn test_query_for_qualified_name() {
    let table = TableName::parse("[sales].[Orders]").unwrap();
    let (sql, params) = SchemaInspector::columns_query(&table);
    assert!(sql.contains("c.TABLE_NAME = @P1 AND c.TABLE_SCHEMA = @P2"));
    assert!(sql.ends_with("ORDER BY c.ORDINAL_POSITION"));
    assert_eq!(params, vec![Value::from("Orders"), Value::from("sales")]);
}

#[test]
fn test_query_for_unqualified_name_uses_default_schema() {
    let table = TableName::parse("Orders").unwrap();
    let (sql, params) = SchemaInspector::columns_query(&table);
    assert!(sql.contains("c.TABLE_SCHEMA = SCHEMA_NAME()"));
    assert_eq!(params, vec![Value::from("Orders")]);
}

#[test]
fn test_query_flags_only_primary_key_constraints() {
    let table = TableName::parse("Orders").unwrap();
    let (sql, _) = SchemaInspector::columns_query(&table);
    assert!(sql.contains("CONSTRAINT_TYPE = 'PRIMARY KEY'"));
    assert!(sql.contains("'IsIdentity'"));
}

#[test]
fn test_descriptor_from_row() {
    let expected = ColumnDescriptor::new("Price", "decimal")
        .with_precision(18, 2)
        .with_default("((0))")
        .primary_key();
    assert_eq!(descriptor_from_row(&catalog_row(&expected)), expected);

    let identity = ColumnDescriptor::new("Id", "int").identity();
    assert_eq!(descriptor_from_row(&catalog_row(&identity)), identity);

    let text = ColumnDescriptor::new("Notes", "nvarchar").with_char_length(-1);
    assert_eq!(descriptor_from_row(&catalog_row(&text)), text);
}

#[tokio::test]
async fn test_inspect_existing_table() {
    let columns = vec![
        ColumnDescriptor::new("Id", "int").primary_key().identity(),
        ColumnDescriptor::new("Email", "nvarchar").with_char_length(256),
    ];
    let mock = MockConnection::new().with_table("dbo.Users", columns.clone());

    let inspected = SchemaInspector::inspect(&mock, "dbo.Users").await.unwrap();
    assert_eq!(inspected, columns);
}

#[tokio::test]
async fn test_inspect_missing_table_is_empty() {
    let mock = MockConnection::new();
    let inspected = SchemaInspector::inspect(&mock, "dbo.Nope").await.unwrap();
    assert!(inspected.is_empty());
}

#[tokio::test]
async fn test_inspect_invalid_name() {
    let mock = MockConnection::new();
    let err = SchemaInspector::inspect(&mock, "").await.unwrap_err();
    assert!(matches!(err, BulkUpError::Configuration(_)));
    assert!(mock.statements().is_empty());
}
