//! Structural checks on a built schema.
//!
//! Problems are reported as warnings on the schema and the offending
//! constraint or index is left out; validation never fails.

use std::collections::{HashMap, HashSet};

use keel_schema::{ConstraintKind, DatabaseSchema};

/// Checks that constraints and indexes only mention columns that exist.
///
/// Warnings name tables by their display name, which defaults to the table
/// name. The builder registers the authoring object name (`Table2`) so that
/// warnings point at the declaration rather than the SQL table.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    display_names: HashMap<String, String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `display_name` for `table` in warnings.
    pub fn with_display_name(
        mut self,
        table: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        self.display_names.insert(table.into(), display_name.into());
        self
    }

    fn display<'a>(&'a self, table: &'a str) -> &'a str {
        self.display_names
            .get(table)
            .map(String::as_str)
            .unwrap_or(table)
    }

    fn missing_column(&self, path: &str, table: &str, column: &str) -> String {
        format!(
            "[{}] Unable to find column ({}.{})",
            path,
            self.display(table),
            column
        )
    }

    /// Validate `schema` in place, appending to its warnings.
    pub fn validate(&self, schema: &mut DatabaseSchema) {
        let columns: HashMap<String, HashSet<String>> = schema
            .tables
            .iter()
            .map(|t| {
                (
                    t.name.clone(),
                    t.columns.iter().map(|c| c.name.clone()).collect(),
                )
            })
            .collect();
        let has_column = |table: &str, column: &str| {
            columns
                .get(table)
                .is_some_and(|cols| cols.contains(column))
        };

        let mut warnings = Vec::new();

        for table in &mut schema.tables {
            let table_name = table.name.clone();

            table.constraints.retain(|constraint| {
                let (path, own_columns) = match &constraint.kind {
                    ConstraintKind::ForeignKey { .. } => ("@ForeignKeyConstraint.columns", true),
                    ConstraintKind::Unique => ("@Unique.columns", true),
                    ConstraintKind::PrimaryKey => ("@PrimaryColumn", true),
                    ConstraintKind::Check { .. } => ("@Check", false),
                };

                if own_columns
                    && let Some(column) = constraint
                        .column_names
                        .iter()
                        .find(|c| !has_column(table_name.as_str(), c.as_str()))
                {
                    warnings.push(self.missing_column(path, &table_name, column));
                    return false;
                }

                let ConstraintKind::ForeignKey {
                    reference_table,
                    reference_columns,
                    ..
                } = &constraint.kind
                else {
                    return true;
                };

                if !columns.contains_key(reference_table) {
                    warnings.push(format!(
                        "[@ForeignKeyConstraint.referenceTable] Unable to find table ({})",
                        self.display(reference_table)
                    ));
                    return false;
                }

                if let Some(column) = reference_columns
                    .iter()
                    .find(|c| !has_column(reference_table.as_str(), c.as_str()))
                {
                    warnings.push(self.missing_column(
                        "@ForeignKeyConstraint.referenceColumns",
                        reference_table,
                        column,
                    ));
                    return false;
                }

                true
            });

            table.indexes.retain(|index| {
                match index
                    .column_names
                    .iter()
                    .find(|c| !has_column(table_name.as_str(), c.as_str()))
                {
                    Some(column) => {
                        warnings.push(self.missing_column("@Index.columns", &table_name, column));
                        false
                    }
                    None => true,
                }
            });
        }

        schema.warnings.extend(warnings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_schema::{Column, Constraint, Index, ReferentialAction, Table};

    fn make_schema() -> DatabaseSchema {
        let mut parent = Table::new("table1");
        parent.columns.push(Column::new("table1", "id", "uuid"));
        let mut child = Table::new("table2");
        child.columns.push(Column::new("table2", "parentId", "uuid"));

        let mut schema = DatabaseSchema::default();
        schema.tables = vec![parent, child];
        schema
    }

    fn make_fk(columns: &[&str], reference_table: &str, reference_columns: &[&str]) -> Constraint {
        Constraint {
            name: "FK_test".to_string(),
            table_name: "table2".to_string(),
            column_names: columns.iter().map(|c| c.to_string()).collect(),
            kind: ConstraintKind::ForeignKey {
                reference_table: reference_table.to_string(),
                reference_columns: reference_columns.iter().map(|c| c.to_string()).collect(),
                on_delete: ReferentialAction::NoAction,
                on_update: ReferentialAction::NoAction,
            },
            synchronize: true,
        }
    }

    #[test]
    fn test_valid_foreign_key_is_kept() {
        let mut schema = make_schema();
        schema.tables[1]
            .constraints
            .push(make_fk(&["parentId"], "table1", &["id"]));

        Validator::new().validate(&mut schema);
        assert!(schema.warnings.is_empty());
        assert_eq!(schema.tables[1].constraints.len(), 1);
    }

    #[test]
    fn test_missing_reference_column() {
        let mut schema = make_schema();
        schema.tables[1]
            .constraints
            .push(make_fk(&["parentId"], "table1", &["uuid"]));

        Validator::new()
            .with_display_name("table1", "Table1")
            .validate(&mut schema);
        assert_eq!(
            schema.warnings,
            vec!["[@ForeignKeyConstraint.referenceColumns] Unable to find column (Table1.uuid)"]
        );
        assert!(schema.tables[1].constraints.is_empty());
    }

    #[test]
    fn test_missing_reference_table() {
        let mut schema = make_schema();
        schema.tables[1]
            .constraints
            .push(make_fk(&["parentId"], "Table3", &["id"]));

        Validator::new().validate(&mut schema);
        assert_eq!(
            schema.warnings,
            vec!["[@ForeignKeyConstraint.referenceTable] Unable to find table (Table3)"]
        );
    }

    #[test]
    fn test_missing_index_column() {
        let mut schema = make_schema();
        schema.tables[1]
            .indexes
            .push(Index::new("table2", "IDX_test", ["parentId", "other"]));

        Validator::new().validate(&mut schema);
        assert_eq!(
            schema.warnings,
            vec!["[@Index.columns] Unable to find column (table2.other)"]
        );
        assert!(schema.tables[1].indexes.is_empty());
    }
}
