//! Operation families and operation sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::ConfigError;

/// CRUD family a generated tool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Read,
        Operation::Insert,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_lowercase().as_str() {
            "read" => Ok(Operation::Read),
            "insert" => Ok(Operation::Insert),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(ConfigError::Config(format!(
                "unknown operation '{}', expected one of read, insert, update, delete",
                other
            ))),
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Operation::Read)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered set of enabled operations. Serialized as a plain list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpSet(BTreeSet<Operation>);

impl OpSet {
    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    pub fn read_only() -> Self {
        Self::from_iter([Operation::Read])
    }

    pub fn all() -> Self {
        Self::from_iter(Operation::ALL)
    }

    /// Parse a comma separated list such as `"read,insert"`.
    pub fn parse_list(s: &str) -> Result<Self, ConfigError> {
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Operation::parse)
            .collect()
    }

    pub fn contains(&self, op: Operation) -> bool {
        self.0.contains(&op)
    }

    pub fn insert(&mut self, op: Operation) -> bool {
        self.0.insert(op)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Operation> + '_ {
        self.0.iter().copied()
    }

    /// Copy of this set with every write operation removed.
    pub fn without_writes(&self) -> Self {
        self.iter().filter(|op| !op.is_write()).collect()
    }

    pub fn has_writes(&self) -> bool {
        self.iter().any(|op| op.is_write())
    }
}

impl FromIterator<Operation> for OpSet {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for OpSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|op| op.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let ops = OpSet::parse_list("read, Insert,,delete").unwrap();
        assert!(ops.contains(Operation::Read));
        assert!(ops.contains(Operation::Insert));
        assert!(ops.contains(Operation::Delete));
        assert!(!ops.contains(Operation::Update));
        assert_eq!(ops.to_string(), "read,insert,delete");
    }

    #[test]
    fn test_parse_list_rejects_unknown() {
        let err = OpSet::parse_list("read,drop").unwrap_err();
        assert!(err.to_string().contains("drop"));
    }

    #[test]
    fn test_without_writes() {
        let ops = OpSet::all().without_writes();
        assert_eq!(ops, OpSet::read_only());
        assert!(!ops.has_writes());
        assert!(OpSet::all().has_writes());
    }

    #[test]
    fn test_serde_as_list() {
        let ops: OpSet = serde_yaml::from_str("[update, read]").unwrap();
        assert_eq!(serde_json::to_string(&ops).unwrap(), r#"["read","update"]"#);
    }
}
