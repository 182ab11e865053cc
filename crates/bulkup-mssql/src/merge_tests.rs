//! Tests for MERGE synthesis

use crate::MergeStatement;
use bulkup_core::{BulkUpError, MergeColumns};
use indoc::indoc;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn columns(update: &[&str], insert: &[&str]) -> MergeColumns {
    MergeColumns {
        update: strings(update),
        insert: strings(insert),
    }
}

mod to_sql_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_full_statement_with_delete_predicate() {
        let merge = MergeStatement::build(
            "dbo.Users",
            "##Tstage",
            &strings(&["Email"]),
            &columns(&["Name", "Created"], &["Email", "Name", "Created"]),
            true,
            Some("t.[Archived] = 0"),
        )
        .unwrap();

        let expected = indoc! {"
            MERGE INTO [dbo].[Users] AS t
            USING [##Tstage] AS s
                ON (t.[Email] = s.[Email])
            WHEN MATCHED THEN
                UPDATE SET [Name] = s.[Name], [Created] = s.[Created]
            WHEN NOT MATCHED BY TARGET THEN
                INSERT ([Email], [Name], [Created]) VALUES (s.[Email], s.[Name], s.[Created])
            WHEN NOT MATCHED BY SOURCE AND (t.[Archived] = 0) THEN
                DELETE;"};
        assert_eq!(merge.to_sql(), expected);
    }

    #[test]
    fn test_without_delete() {
        let merge = MergeStatement::build(
            "Users",
            "##Tstage",
            &strings(&["Id"]),
            &columns(&["Name"], &["Id", "Name"]),
            false,
            Some("t.[Archived] = 0"),
        )
        .unwrap();

        let sql = merge.to_sql();
        assert!(!sql.contains("NOT MATCHED BY SOURCE"));
        assert!(!sql.contains("Archived"));
        assert!(sql.ends_with("VALUES (s.[Id], s.[Name]);"));
    }

    #[test]
    fn test_delete_without_predicate_has_no_extra_condition() {
        for predicate in [None, Some(""), Some("   ")] {
            let merge = MergeStatement::build(
                "Users",
                "##Tstage",
                &strings(&["Id"]),
                &columns(&["Name"], &["Id", "Name"]),
                true,
                predicate,
            )
            .unwrap();
            assert!(
                merge
                    .to_sql()
                    .ends_with("WHEN NOT MATCHED BY SOURCE THEN\n    DELETE;")
            );
        }
    }

    #[test]
    fn test_one_equality_per_key_joined_with_and() {
        let keys = strings(&["Region", "OrderId", "Line"]);
        let merge = MergeStatement::build(
            "Orders",
            "##Tstage",
            &keys,
            &columns(&["Qty"], &["Region", "OrderId", "Line", "Qty"]),
            false,
            None,
        )
        .unwrap();

        let sql = merge.to_sql();
        assert!(sql.contains(
            "ON (t.[Region] = s.[Region] AND t.[OrderId] = s.[OrderId] AND t.[Line] = s.[Line])"
        ));
        assert_eq!(sql.matches(" AND t.").count(), keys.len() - 1);
    }

    #[test]
    fn test_empty_update_set_omits_matched_clause() {
        let merge = MergeStatement::build(
            "Tags",
            "##Tstage",
            &strings(&["Tag"]),
            &columns(&[], &["Tag"]),
            false,
            None,
        )
        .unwrap();

        let sql = merge.to_sql();
        assert!(!sql.contains("WHEN MATCHED"));
        assert!(sql.contains("INSERT ([Tag]) VALUES (s.[Tag])"));
    }

    #[test]
    fn test_identifiers_are_bracket_quoted() {
        let merge = MergeStatement::build(
            "[sales].[Order]]Lines]",
            "##Tstage",
            &strings(&["key"]),
            &columns(&["my col"], &["key", "my col"]),
            false,
            None,
        )
        .unwrap();

        let sql = merge.to_sql();
        assert!(sql.starts_with("MERGE INTO [sales].[Order]]Lines] AS t"));
        assert!(sql.contains("t.[key] = s.[key]"));
        assert!(sql.contains("[my col] = s.[my col]"));
    }
}

mod build_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_keys_removed_from_update_set() {
        let merge = MergeStatement::build(
            "Users",
            "##Tstage",
            &strings(&["email"]),
            &columns(&["Email", "Name"], &["Email", "Name"]),
            false,
            None,
        )
        .unwrap();
        assert_eq!(merge.update_columns(), &strings(&["Name"])[..]);
        assert_eq!(merge.insert_columns(), &strings(&["Email", "Name"])[..]);
    }

    #[test]
    fn test_no_keys_is_configuration_error() {
        let err = MergeStatement::build(
            "Users",
            "##Tstage",
            &[],
            &columns(&["Name"], &["Name"]),
            false,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, BulkUpError::Configuration(_)));
    }

    #[test]
    fn test_no_insert_columns_is_configuration_error() {
        let err = MergeStatement::build(
            "Users",
            "##Tstage",
            &strings(&["Id"]),
            &columns(&[], &[]),
            false,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, BulkUpError::Configuration(msg) if msg.contains("insertable")));
    }

    #[test]
    fn test_invalid_table_name() {
        let err = MergeStatement::build(
            "a.b.c",
            "##Tstage",
            &strings(&["Id"]),
            &columns(&[], &["Id"]),
            false,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, BulkUpError::Configuration(_)));
    }
}
