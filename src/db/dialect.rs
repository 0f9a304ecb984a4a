// SQL Dialect Layer
// T-SQL quoting, statement synthesis and catalog query templates.
// Everything here is pure: no I/O, no shared state.

use crate::db::traits::{Credentials, RelationKind};

/// Adapter type name
pub fn type_name() -> &'static str {
    "azure_dw"
}

/// Wrap an identifier in bracket delimiters. No validation is performed.
pub fn quote(identifier: &str) -> String {
    format!("[{}]", identifier)
}

/// `[schema].[table]`
pub fn quote_schema_and_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote(schema), quote(table))
}

/// Escape a value for use inside an `N'...'` string literal
pub fn string_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}

/// `sp_rename` within the source schema; the target is not schema-qualified
pub fn rename_statement(schema: &str, from_name: &str, to_name: &str) -> String {
    format!(
        "sp_rename {}, {}",
        quote_schema_and_table(schema, from_name),
        quote(to_name)
    )
}

/// Current-timestamp expression
pub fn date_function() -> &'static str {
    "CURRENT_TIMESTAMP()"
}

/// Brace a connection-string value when it would not survive as a bare token
fn odbc_value(value: &str) -> String {
    let needs_braces = value.contains([';', '{', '}'])
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace);
    if needs_braces {
        format!("{{{}}}", value.replace('}', "}}"))
    } else {
        value.to_string()
    }
}

/// ODBC-style driver string handed to the execution client
pub fn odbc_connection_string(driver: &str, credentials: &Credentials) -> String {
    format!(
        "DRIVER={{{}}};SERVER={};PORT={};DATABASE={};UID={};PWD={}",
        driver.replace('}', "}}"),
        odbc_value(&credentials.host),
        credentials.get_port(),
        odbc_value(&credentials.database),
        odbc_value(&credentials.username),
        odbc_value(&credentials.password)
    )
}

pub fn create_schema_sql(schema: &str) -> String {
    format!("CREATE SCHEMA {}", quote(schema))
}

pub fn drop_schema_sql(schema: &str) -> String {
    format!("DROP SCHEMA {}", quote(schema))
}

/// `DROP TABLE` / `DROP VIEW` / `DROP FUNCTION`. `Other` relations are dropped as tables.
pub fn drop_relation_sql(schema: &str, name: &str, kind: RelationKind) -> String {
    let keyword = match kind {
        RelationKind::View => "VIEW",
        RelationKind::Function => "FUNCTION",
        RelationKind::Table | RelationKind::Other => "TABLE",
    };
    format!("DROP {} {}", keyword, quote_schema_and_table(schema, name))
}

pub fn drop_constraint_sql(schema: &str, table: &str, constraint: &str) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        quote_schema_and_table(schema, table),
        quote(constraint)
    )
}

pub fn alter_column_type_sql(schema: &str, table: &str, column: &str, new_type: &str) -> String {
    format!(
        "ALTER TABLE {} ALTER COLUMN {} {}",
        quote_schema_and_table(schema, table),
        quote(column),
        new_type
    )
}

/// Look up a single relation by schema and name
pub fn relation_lookup_sql(schema: &str, name: &str) -> String {
    format!(
        r#"
        SELECT o.type
        FROM sys.objects o
        JOIN sys.schemas s ON o.schema_id = s.schema_id
        WHERE s.name = {} AND o.name = {} AND o.type IN ('U', 'V')
    "#,
        string_literal(schema),
        string_literal(name)
    )
}

/// Objects that must go before the given relation can be dropped: views and
/// tables referencing it, plus functions bound to it WITH SCHEMABINDING
pub fn referencing_objects_sql(schema: &str, name: &str) -> String {
    format!(
        r#"
        SELECT DISTINCT s.name AS schema_name, o.name AS object_name, o.type
        FROM sys.sql_expression_dependencies d
        JOIN sys.objects o ON d.referencing_id = o.object_id
        JOIN sys.schemas s ON o.schema_id = s.schema_id
        WHERE d.referenced_id = OBJECT_ID({})
          AND d.referencing_id <> d.referenced_id
          AND (o.type IN ('U', 'V')
               OR (o.type IN ('FN', 'IF', 'TF') AND d.is_schema_bound_reference = 1))
        ORDER BY s.name, o.name
    "#,
        string_literal(&quote_schema_and_table(schema, name))
    )
}

/// Foreign keys on other tables that point at the given table
pub fn referencing_foreign_keys_sql(schema: &str, name: &str) -> String {
    format!(
        r#"
        SELECT s.name AS schema_name, t.name AS table_name, fk.name AS constraint_name
        FROM sys.foreign_keys fk
        JOIN sys.tables t ON fk.parent_object_id = t.object_id
        JOIN sys.schemas s ON t.schema_id = s.schema_id
        WHERE fk.referenced_object_id = OBJECT_ID({})
          AND fk.parent_object_id <> fk.referenced_object_id
        ORDER BY s.name, t.name, fk.name
    "#,
        string_literal(&quote_schema_and_table(schema, name))
    )
}

pub fn columns_in_table_sql(schema: &str, table: &str) -> String {
    format!(
        r#"
        SELECT
            c.COLUMN_NAME,
            c.DATA_TYPE,
            c.IS_NULLABLE,
            c.ORDINAL_POSITION,
            c.CHARACTER_MAXIMUM_LENGTH,
            c.NUMERIC_PRECISION,
            c.NUMERIC_SCALE
        FROM INFORMATION_SCHEMA.COLUMNS c
        WHERE c.TABLE_SCHEMA = {} AND c.TABLE_NAME = {}
        ORDER BY c.ORDINAL_POSITION
    "#,
        string_literal(schema),
        string_literal(table)
    )
}

pub fn existing_schemas_sql() -> &'static str {
    r#"
        SELECT schema_name
        FROM INFORMATION_SCHEMA.SCHEMATA
        WHERE schema_name NOT IN ('guest', 'INFORMATION_SCHEMA', 'sys')
        ORDER BY schema_name
    "#
}

pub fn schema_exists_sql(schema: &str) -> String {
    format!(
        "SELECT COUNT(*) FROM INFORMATION_SCHEMA.SCHEMATA WHERE schema_name = {}",
        string_literal(schema)
    )
}

/// Tables and views in a set of schemas
pub fn relations_in_schemas_sql(schemas: &[String]) -> String {
    let list = schemas
        .iter()
        .map(|s| string_literal(s))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"
        SELECT t.TABLE_SCHEMA, t.TABLE_NAME, t.TABLE_TYPE
        FROM INFORMATION_SCHEMA.TABLES t
        WHERE t.TABLE_TYPE IN ('BASE TABLE', 'VIEW')
          AND t.TABLE_SCHEMA IN ({})
        ORDER BY t.TABLE_SCHEMA, t.TABLE_NAME
    "#,
        list
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        for ident in ["orders", "my table", "", "weird]name", "dbo.x"] {
            assert_eq!(quote(ident), format!("[{}]", ident));
        }
    }

    #[test]
    fn test_quote_schema_and_table() {
        assert_eq!(quote_schema_and_table("dbo", "orders"), "[dbo].[orders]");
        assert_eq!(quote_schema_and_table("", ""), "[].[]");
    }

    #[test]
    fn test_rename_statement_is_unqualified_target() {
        assert_eq!(rename_statement("dbo", "t1", "t2"), "sp_rename [dbo].[t1], [t2]");
    }

    #[test]
    fn test_date_function_and_type() {
        assert_eq!(date_function(), "CURRENT_TIMESTAMP()");
        assert_eq!(type_name(), "azure_dw");
    }

    #[test]
    fn test_odbc_connection_string() {
        let creds = Credentials::new("dw.example.net", 1433, "analytics", "loader", "s3cret");
        assert_eq!(
            odbc_connection_string("ODBC Driver 13 for SQL Server", &creds),
            "DRIVER={ODBC Driver 13 for SQL Server};SERVER=dw.example.net;PORT=1433;\
             DATABASE=analytics;UID=loader;PWD=s3cret"
        );
    }

    #[test]
    fn test_odbc_connection_string_braces_special_values() {
        let creds = Credentials::new("h", 1433, "d", "u", "pa;ss");
        assert!(odbc_connection_string("x", &creds).ends_with("UID=u;PWD={pa;ss}"));

        let creds = Credentials::new("h", 1433, "d", "u", "a}b{c");
        assert!(odbc_connection_string("x", &creds).ends_with("PWD={a}}b{c}"));

        let creds = Credentials::new("h", 1433, "d", "u", " padded");
        assert!(odbc_connection_string("x", &creds).ends_with("PWD={ padded}"));
    }

    #[test]
    fn test_ddl_templates() {
        assert_eq!(create_schema_sql("staging"), "CREATE SCHEMA [staging]");
        assert_eq!(drop_schema_sql("staging"), "DROP SCHEMA [staging]");
        assert_eq!(
            drop_relation_sql("dbo", "v", RelationKind::View),
            "DROP VIEW [dbo].[v]"
        );
        assert_eq!(
            drop_relation_sql("dbo", "t", RelationKind::Table),
            "DROP TABLE [dbo].[t]"
        );
        assert_eq!(
            drop_relation_sql("dbo", "fn_totals", RelationKind::Function),
            "DROP FUNCTION [dbo].[fn_totals]"
        );
        assert_eq!(
            drop_constraint_sql("dbo", "child", "fk_parent"),
            "ALTER TABLE [dbo].[child] DROP CONSTRAINT [fk_parent]"
        );
        assert_eq!(
            alter_column_type_sql("dbo", "t", "amount", "decimal(18,2)"),
            "ALTER TABLE [dbo].[t] ALTER COLUMN [amount] decimal(18,2)"
        );
    }

    #[test]
    fn test_string_literal_escapes_quotes() {
        assert_eq!(string_literal("o'brien"), "N'o''brien'");
    }

    #[test]
    fn test_catalog_queries_embed_target() {
        let sql = referencing_objects_sql("dbo", "table_t");
        assert!(sql.contains("sys.sql_expression_dependencies"));
        assert!(sql.contains("OBJECT_ID(N'[dbo].[table_t]')"));
        assert!(sql.contains("d.is_schema_bound_reference = 1"));
        assert!(sql.contains("'FN', 'IF', 'TF'"));

        let sql = referencing_foreign_keys_sql("dbo", "table_t");
        assert!(sql.contains("sys.foreign_keys"));
        assert!(sql.contains("OBJECT_ID(N'[dbo].[table_t]')"));

        let sql = relations_in_schemas_sql(&["a".to_string(), "b".to_string()]);
        assert!(sql.contains("IN (N'a', N'b')"));
    }
}
