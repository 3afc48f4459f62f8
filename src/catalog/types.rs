use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Blob,
    Timestamp,
    Json,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Text => "STRING",
            ColumnType::Integer => "INT64",
            ColumnType::Float => "DOUBLE",
            ColumnType::Boolean => "BOOL",
            ColumnType::Blob => "BINARY",
            ColumnType::Timestamp => "UNIXTIME_MICROS",
            ColumnType::Json => "JSON",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Text(CompactString),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Blob(Vec<u8>),
    Timestamp(i64),
    Json(CompactString),
    Null,
}

impl Value {
    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::Timestamp(_) => 3,
            Value::Float(_) => 4,
            Value::Text(_) => 5,
            Value::Json(_) => 6,
            Value::Blob(_) => 7,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value may be stored in a column of `col_type`.
    pub fn fits(&self, col_type: ColumnType, nullable: bool) -> bool {
        match (self, col_type) {
            (Value::Null, _) => nullable,
            (Value::Text(_), ColumnType::Text)
            | (Value::Integer(_), ColumnType::Integer)
            | (Value::Float(_), ColumnType::Float)
            | (Value::Boolean(_), ColumnType::Boolean)
            | (Value::Blob(_), ColumnType::Blob)
            | (Value::Timestamp(_), ColumnType::Timestamp)
            | (Value::Json(_), ColumnType::Json) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "\"{s}\""),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Blob(b) => write!(f, "0x{}", hex::encode(b)),
            Value::Timestamp(v) => write!(f, "{v}us"),
            Value::Json(s) => write!(f, "{s}"),
            Value::Null => f.write_str("NULL"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Json(a), Value::Json(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnType, Value};

    #[test]
    fn type_checks_respect_nullability() {
        assert!(Value::Integer(1).fits(ColumnType::Integer, false));
        assert!(!Value::Integer(1).fits(ColumnType::Text, true));
        assert!(Value::Null.fits(ColumnType::Text, true));
        assert!(!Value::Null.fits(ColumnType::Text, false));
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(Value::Text("bob".into()).to_string(), "\"bob\"");
        assert_eq!(Value::Blob(vec![0xab, 0x01]).to_string(), "0xab01");
        assert_eq!(Value::Null.to_string(), "NULL");
    }

    #[test]
    fn ordering_groups_by_kind_first() {
        let mut values = vec![
            Value::Text("a".into()),
            Value::Integer(3),
            Value::Null,
            Value::Integer(-1),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Integer(-1),
                Value::Integer(3),
                Value::Text("a".into())
            ]
        );
    }
}
