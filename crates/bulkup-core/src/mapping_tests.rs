//! Tests for column mapping resolution

use crate::{ColumnDescriptor, ColumnMappingResolver, FieldMapping, MergeColumns};

fn users_schema() -> Vec<ColumnDescriptor> {
    vec![
        ColumnDescriptor::new("Id", "int").primary_key().identity(),
        ColumnDescriptor::new("Email", "nvarchar").with_char_length(256),
        ColumnDescriptor::new("Name", "nvarchar").with_char_length(100),
        ColumnDescriptor::new("Created", "datetime").with_default("(getdate())"),
    ]
}

fn names(mappings: &[FieldMapping]) -> Vec<(&str, &str)> {
    mappings
        .iter()
        .map(|m| (m.source.as_str(), m.destination.as_str()))
        .collect()
}

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|k| k.to_string()).collect()
}

mod resolve_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_explicit_mappings_used_verbatim() {
        let schema = users_schema();
        let mappings = vec![
            FieldMapping::new("mail", "Email"),
            FieldMapping::new("Whatever", "NotInSchema"),
        ];
        let resolver = ColumnMappingResolver::new(["mail", "Name"], &mappings, &[])
            .with_schema(&schema);
        assert_eq!(
            names(&resolver.resolve()),
            vec![("mail", "Email"), ("Whatever", "NotInSchema")]
        );
    }

    #[test]
    fn test_schema_maps_non_identity_columns_with_matching_fields() {
        let schema = users_schema();
        let resolver =
            ColumnMappingResolver::new(["Id", "name", "Email", "Extra"], &[], &[])
                .with_schema(&schema);
        // schema order, schema names, source spelling kept
        assert_eq!(
            names(&resolver.resolve()),
            vec![("Email", "Email"), ("name", "Name")]
        );
    }

    #[test]
    fn test_without_schema_maps_every_field_by_name() {
        let resolver = ColumnMappingResolver::new(["Id", "Name"], &[], &[]);
        assert_eq!(
            names(&resolver.resolve()),
            vec![("Id", "Id"), ("Name", "Name")]
        );
    }

    #[test]
    fn test_exclusion_wins_over_explicit_mapping() {
        let mappings = vec![
            FieldMapping::new("Email", "Email"),
            FieldMapping::new("Name", "Name"),
        ];
        let exclusions = vec![FieldMapping::identity("email")];
        let resolver = ColumnMappingResolver::new(["Email", "Name"], &mappings, &exclusions);
        assert_eq!(names(&resolver.resolve()), vec![("Name", "Name")]);
    }

    #[test]
    fn test_exclusion_matches_source_side() {
        let mappings = vec![FieldMapping::new("Mail", "Email")];
        let exclusions = vec![FieldMapping::new("Mail", "Unrelated")];
        let resolver = ColumnMappingResolver::new(["Mail"], &mappings, &exclusions);
        assert!(resolver.resolve().is_empty());
    }
}

mod merge_columns_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_schema_mode_skips_identity_and_keys_in_update() {
        let schema = users_schema();
        let resolver = ColumnMappingResolver::new(["Id", "Email", "Name"], &[], &[])
            .with_schema(&schema);
        let columns = resolver.merge_columns(&keys(&["Email"]));
        assert_eq!(
            columns,
            MergeColumns {
                update: keys(&["Name", "Created"]),
                insert: keys(&["Email", "Name", "Created"]),
            }
        );
    }

    #[test]
    fn test_schema_mode_honours_exclusions() {
        let schema = users_schema();
        let exclusions = vec![FieldMapping::identity("Created")];
        let resolver = ColumnMappingResolver::new(["Email", "Name"], &[], &exclusions)
            .with_schema(&schema);
        let columns = resolver.merge_columns(&keys(&["Email"]));
        assert_eq!(columns.insert, keys(&["Email", "Name"]));
        assert_eq!(columns.update, keys(&["Name"]));
    }

    #[test]
    fn test_source_side_exclusion_keeps_column_out_of_merge() {
        let schema = vec![
            ColumnDescriptor::new("Email", "nvarchar").primary_key(),
            ColumnDescriptor::new("NickName", "nvarchar"),
        ];
        let mappings = vec![
            FieldMapping::identity("Email"),
            FieldMapping::new("Nick", "NickName"),
        ];
        let exclusions = vec![FieldMapping::identity("Nick")];
        let resolver = ColumnMappingResolver::new(["Email", "Nick"], &mappings, &exclusions)
            .with_schema(&schema);

        assert_eq!(names(&resolver.resolve()), vec![("Email", "Email")]);
        let columns = resolver.merge_columns(&keys(&["Email"]));
        assert_eq!(columns.insert, keys(&["Email"]));
        assert!(columns.update.is_empty());
    }

    #[test]
    fn test_merge_columns_never_include_unloaded_excluded_fields() {
        let schema = users_schema();
        let exclusions = vec![FieldMapping::new("name", "")];
        let resolver = ColumnMappingResolver::new(["Email", "name"], &[], &exclusions)
            .with_schema(&schema);

        let loaded: Vec<String> = resolver.resolve().into_iter().map(|m| m.destination).collect();
        let columns = resolver.merge_columns(&keys(&["Email"]));
        assert_eq!(loaded, keys(&["Email"]));
        assert_eq!(columns.insert, keys(&["Email", "Created"]));
    }

    #[test]
    fn test_strict_mode_ignores_unmapped_schema_columns() {
        let schema = users_schema();
        let mappings = vec![
            FieldMapping::new("Email", "Email"),
            FieldMapping::new("Name", "Name"),
        ];
        let resolver = ColumnMappingResolver::new(["Email", "Name"], &mappings, &[])
            .with_schema(&schema)
            .strict(true);
        let columns = resolver.merge_columns(&keys(&["Email"]));
        assert_eq!(columns.insert, keys(&["Email", "Name"]));
        assert_eq!(columns.update, keys(&["Name"]));
        assert!(!columns.insert.contains(&"Created".to_string()));
    }

    #[test]
    fn test_strict_mode_keeps_explicitly_mapped_identity() {
        let schema = users_schema();
        let mappings = vec![FieldMapping::identity("Id"), FieldMapping::identity("Email")];
        let resolver = ColumnMappingResolver::new(["Id", "Email"], &mappings, &[])
            .with_schema(&schema)
            .strict(true);
        let columns = resolver.merge_columns(&keys(&["Email"]));
        assert_eq!(columns.insert, keys(&["Id", "Email"]));
    }

    #[test]
    fn test_strict_mode_exclusion_precedence() {
        let mappings = vec![FieldMapping::identity("A"), FieldMapping::identity("B")];
        let exclusions = vec![FieldMapping::identity("B")];
        let resolver =
            ColumnMappingResolver::new(["A", "B"], &mappings, &exclusions).strict(true);
        let columns = resolver.merge_columns(&keys(&["A"]));
        assert_eq!(columns.insert, keys(&["A"]));
        assert!(columns.update.is_empty());
    }

    #[test]
    fn test_without_schema_uses_resolved_mapping() {
        let resolver = ColumnMappingResolver::new(["Code", "Label"], &[], &[]);
        let columns = resolver.merge_columns(&keys(&["code"]));
        assert_eq!(columns.insert, keys(&["Code", "Label"]));
        assert_eq!(columns.update, keys(&["Label"]));
    }

    #[test]
    fn test_update_never_contains_keys() {
        let schema = users_schema();
        let cases: [&[&str]; 3] = [&["Email"], &["Email", "Name"], &["NAME", "created"]];
        for case in cases {
            let key_list = keys(case);
            let resolver = ColumnMappingResolver::new(["Email", "Name"], &[], &[])
                .with_schema(&schema);
            let columns = resolver.merge_columns(&key_list);
            for column in &columns.update {
                assert!(
                    !key_list.iter().any(|k| k.eq_ignore_ascii_case(column)),
                    "{column} is a key but appears in the update set"
                );
            }
        }
    }
}
