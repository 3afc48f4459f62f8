use crate::catalog::types::ColumnType;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ColumnId(pub u32);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDef {
    pub id: ColumnId,
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.name,
            self.col_type,
            if self.nullable { "NULLABLE" } else { "NOT NULL" }
        )
    }
}

/// Column layout of a replica's table. The first `num_key_columns` columns
/// form the primary key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
    pub num_key_columns: usize,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnDef>, num_key_columns: usize) -> Self {
        Self {
            columns,
            num_key_columns,
        }
    }

    pub fn find_column_by_id(&self, id: ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    pub fn column_by_id(&self, id: ColumnId) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }
}

impl fmt::Display for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "(")?;
        for col in &self.columns {
            writeln!(f, "    {}:{},", col.id, col)?;
        }
        let keys: Vec<&str> = self
            .columns
            .iter()
            .take(self.num_key_columns)
            .map(|c| c.name.as_str())
            .collect();
        write!(f, "    PRIMARY KEY ({})\n)", keys.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnDef, ColumnId, TableSchema};
    use crate::catalog::types::ColumnType;

    fn schema() -> TableSchema {
        TableSchema::new(
            vec![
                ColumnDef {
                    id: ColumnId(10),
                    name: "id".into(),
                    col_type: ColumnType::Integer,
                    nullable: false,
                },
                ColumnDef {
                    id: ColumnId(11),
                    name: "name".into(),
                    col_type: ColumnType::Text,
                    nullable: true,
                },
            ],
            1,
        )
    }

    #[test]
    fn lookup_by_id() {
        let s = schema();
        assert_eq!(s.find_column_by_id(ColumnId(11)), Some(1));
        assert_eq!(s.find_column_by_id(ColumnId(99)), None);
        assert_eq!(s.column_by_id(ColumnId(10)).map(|c| c.name.as_str()), Some("id"));
    }

    #[test]
    fn display_lists_columns_and_key() {
        let text = schema().to_string();
        assert!(text.contains("10:id INT64 NOT NULL,"));
        assert!(text.contains("11:name STRING NULLABLE,"));
        assert!(text.contains("PRIMARY KEY (id)"));
    }
}
