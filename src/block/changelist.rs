use crate::catalog::schema::{ColumnId, TableSchema};
use crate::catalog::types::Value;
use crate::error::ToolError;
use serde::{Deserialize, Serialize};

pub const CHANGE_KIND_UPDATE: u8 = 1;
pub const CHANGE_KIND_DELETE: u8 = 2;
pub const CHANGE_KIND_REINSERT: u8 = 3;

/// The change payload of one delta record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RowChangeList {
    Update(Vec<(ColumnId, Value)>),
    Delete,
    Reinsert(Vec<Value>),
}

impl RowChangeList {
    pub fn kind(&self) -> u8 {
        match self {
            RowChangeList::Update(_) => CHANGE_KIND_UPDATE,
            RowChangeList::Delete => CHANGE_KIND_DELETE,
            RowChangeList::Reinsert(_) => CHANGE_KIND_REINSERT,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ToolError> {
        rmp_serde::to_vec(self).map_err(|e| ToolError::Encode(e.to_string()))
    }

    /// Decodes a payload and checks it against `schema`. `location` names the
    /// record in error messages.
    pub fn decode(bytes: &[u8], schema: &TableSchema, location: &str) -> Result<Self, ToolError> {
        let change: RowChangeList =
            rmp_serde::from_slice(bytes).map_err(|e| ToolError::decode(location, e))?;
        change.validate(schema, location)?;
        Ok(change)
    }

    fn validate(&self, schema: &TableSchema, location: &str) -> Result<(), ToolError> {
        match self {
            RowChangeList::Update(cells) => {
                if cells.is_empty() {
                    return Err(ToolError::decode(location, "update with no columns"));
                }
                for (col_id, value) in cells {
                    let Some(col) = schema.column_by_id(*col_id) else {
                        return Err(ToolError::decode(
                            location,
                            format!("update references unknown column id {col_id}"),
                        ));
                    };
                    if !value.fits(col.col_type, col.nullable) {
                        return Err(ToolError::decode(
                            location,
                            format!("value {value} does not fit column {col}"),
                        ));
                    }
                }
            }
            RowChangeList::Delete => {}
            RowChangeList::Reinsert(values) => {
                if values.len() != schema.num_columns() {
                    return Err(ToolError::decode(
                        location,
                        format!(
                            "reinsert carries {} values for {} columns",
                            values.len(),
                            schema.num_columns()
                        ),
                    ));
                }
                for (value, col) in values.iter().zip(&schema.columns) {
                    if !value.fits(col.col_type, col.nullable) {
                        return Err(ToolError::decode(
                            location,
                            format!("value {value} does not fit column {col}"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn to_string(&self, schema: &TableSchema) -> String {
        match self {
            RowChangeList::Update(cells) => {
                let parts: Vec<String> = cells
                    .iter()
                    .map(|(id, value)| match schema.column_by_id(*id) {
                        Some(col) => format!("{}={value}", col.name),
                        None => format!("#{id}={value}"),
                    })
                    .collect();
                format!("SET {}", parts.join(", "))
            }
            RowChangeList::Delete => "DELETE".to_string(),
            RowChangeList::Reinsert(values) => {
                let parts: Vec<String> = values
                    .iter()
                    .zip(&schema.columns)
                    .map(|(value, col)| format!("{}={value}", col.name))
                    .collect();
                format!("REINSERT ({})", parts.join(", "))
            }
        }
    }
}
