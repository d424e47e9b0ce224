//! Declarative table definitions and the SQL they turn into.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Schema definition for the SQLite database
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub tables: Vec<TableDefinition>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add_table(mut self, table: TableDefinition) -> Self {
        self.tables.push(table);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Type fragment copied verbatim into the column definition, e.g. `TEXT` or `DECIMAL(10,2)`.
    pub sql_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Text,
    Real,
    Blob,
}

impl DataType {
    pub const fn as_sql(self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Text => "TEXT",
            DataType::Real => "REAL",
            DataType::Blob => "BLOB",
        }
    }
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
        }
    }

    pub fn typed(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(name, data_type.as_sql())
    }
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    /// Pairs field names with field types, in order.
    pub fn from_fields<N, T>(name: &str, field_names: &[N], field_types: &[T]) -> Result<Self>
    where
        N: AsRef<str>,
        T: AsRef<str>,
    {
        if field_names.len() != field_types.len() {
            return Err(Error::Schema(format!(
                "table {name}: {} field names but {} field types",
                field_names.len(),
                field_types.len()
            )));
        }
        let columns = field_names
            .iter()
            .zip(field_types)
            .map(|(n, t)| ColumnDefinition::new(n.as_ref(), t.as_ref()))
            .collect();
        Ok(Self {
            name: name.to_string(),
            columns,
        })
    }

    /// Builds the `CREATE TABLE` statement. No constraints are added beyond what the types carry.
    pub fn create_statement(&self) -> Result<String> {
        if self.columns.is_empty() {
            return Err(Error::Schema(format!("table {} has no columns", self.name)));
        }
        let mut columns = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            validate_type(&self.name, column)?;
            columns.push(format!(
                "{} {}",
                quote_identifier(&column.name)?,
                column.sql_type.trim()
            ));
        }
        Ok(format!(
            "CREATE TABLE {} ({})",
            quote_identifier(&self.name)?,
            columns.join(", ")
        ))
    }
}

/// Quotes a table or column name for use in statement text.
pub fn quote_identifier(name: &str) -> Result<String> {
    if name.is_empty() || name.contains('\0') {
        return Err(Error::Schema(format!("invalid identifier {name:?}")));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

fn validate_type(table: &str, column: &ColumnDefinition) -> Result<()> {
    if !is_safe_type_fragment(column.sql_type.trim()) {
        return Err(Error::Schema(format!(
            "table {table}: invalid type {:?} for column {}",
            column.sql_type, column.name
        )));
    }
    Ok(())
}

// Outside single-quoted literals only type names, numbers and `DEFAULT`-style
// clauses may appear; no statement separators or comments.
fn is_safe_type_fragment(ty: &str) -> bool {
    if ty.is_empty() || ty.contains('\0') {
        return false;
    }
    let mut in_literal = false;
    let mut prev = ' ';
    for c in ty.chars() {
        if in_literal {
            // A doubled quote re-enters the literal on the next iteration.
            if c == '\'' {
                in_literal = false;
            }
        } else if c == '\'' {
            in_literal = true;
        } else if c == '-' && prev == '-' {
            return false;
        } else if !(c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ',' | '-' | '+' | '.')) {
            return false;
        }
        prev = c;
    }
    !in_literal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_statement_in_field_order() {
        let table = TableDefinition::from_fields("items", &["name", "qty"], &["TEXT", "INT"]).unwrap();
        assert_eq!(
            table.create_statement().unwrap(),
            r#"CREATE TABLE "items" ("name" TEXT, "qty" INT)"#
        );
    }

    #[test]
    fn mismatched_fields_are_rejected() {
        let err = TableDefinition::from_fields("items", &["name", "qty"], &["TEXT"]).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn identifiers_are_escaped() {
        assert_eq!(quote_identifier(r#"we"ird"#).unwrap(), r#""we""ird""#);
        assert!(quote_identifier("").is_err());
    }

    #[test]
    fn type_fragments_are_restricted() {
        let ok = TableDefinition::new("t").with_column(ColumnDefinition::new("price", "DECIMAL(10,2)"));
        assert!(ok.create_statement().is_ok());

        let bad = TableDefinition::new("t").with_column(ColumnDefinition::new("x", "TEXT); DROP TABLE self; --"));
        assert!(matches!(bad.create_statement(), Err(Error::Schema(_))));

        let comment = TableDefinition::new("t").with_column(ColumnDefinition::new("x", "TEXT --"));
        assert!(matches!(comment.create_statement(), Err(Error::Schema(_))));

        let open_literal = TableDefinition::new("t").with_column(ColumnDefinition::new("x", "TEXT DEFAULT 'a"));
        assert!(matches!(open_literal.create_statement(), Err(Error::Schema(_))));

        let empty = TableDefinition::new("t");
        assert!(matches!(empty.create_statement(), Err(Error::Schema(_))));
    }

    #[test]
    fn default_clauses_are_accepted() {
        let table = TableDefinition::new("t")
            .with_column(ColumnDefinition::new("score", "REAL DEFAULT -1.0"))
            .with_column(ColumnDefinition::new("label", "TEXT DEFAULT ''"))
            .with_column(ColumnDefinition::new("note", "TEXT DEFAULT 'it''s; fine'"));
        assert_eq!(
            table.create_statement().unwrap(),
            r#"CREATE TABLE "t" ("score" REAL DEFAULT -1.0, "label" TEXT DEFAULT '', "note" TEXT DEFAULT 'it''s; fine')"#
        );
    }

    #[test]
    fn typed_columns_use_sql_names() {
        let table = TableDefinition::new("t").with_column(ColumnDefinition::typed("id", DataType::Integer));
        assert_eq!(table.create_statement().unwrap(), r#"CREATE TABLE "t" ("id" INTEGER)"#);
    }
}
