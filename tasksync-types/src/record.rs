//! Remote record identities and version tokens.
//!
//! A shared row is known to the remote store by its record name, which
//! combines the row's immutable identity with the record type (the name of
//! the shared table it lives in). Version tokens are assigned by the remote
//! and are the only ordering the conflict policy trusts.

use crate::{EntityId, Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The type of a remote record. Equal to the name of the shared table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordType(String);

impl RecordType {
    /// Creates a record type from a table name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the record type as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl PartialEq<str> for RecordType {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for RecordType {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Remote identity of a shared row: `"<uuid>:<record_type>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordName {
    id: EntityId,
    record_type: RecordType,
}

impl RecordName {
    /// Builds the record name for a row.
    pub fn new(record_type: impl Into<RecordType>, id: EntityId) -> Self {
        Self {
            id,
            record_type: record_type.into(),
        }
    }

    /// The row identity part.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// The record type part.
    pub fn record_type(&self) -> &RecordType {
        &self.record_type
    }

    /// Parses a record name of the form `"<uuid>:<record_type>"`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let (id, record_type) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidRecordName(s.to_string()))?;
        if record_type.is_empty() {
            return Err(Error::InvalidRecordName(s.to_string()));
        }
        Ok(Self {
            id: EntityId::parse(id)?,
            record_type: RecordType::new(record_type),
        })
    }
}

impl fmt::Display for RecordName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.record_type)
    }
}

impl FromStr for RecordName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RecordName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RecordName> for String {
    fn from(value: RecordName) -> Self {
        value.to_string()
    }
}

/// Version token assigned by the remote store on every accepted write.
///
/// Tokens are opaque to callers apart from their ordering: a strictly larger
/// token is a strictly newer server-side version of the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordVersion(u64);

impl RecordVersion {
    /// Creates a version token from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Whether this version should replace `known`.
    ///
    /// Anything is newer than "never seen"; otherwise the token must be
    /// strictly greater.
    #[must_use]
    pub fn is_newer_than(&self, known: Option<RecordVersion>) -> bool {
        known.is_none_or(|k| self.0 > k.0)
    }
}

impl fmt::Display for RecordVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
