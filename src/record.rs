// 🧾 Record - One ingested entity observation
// Core fields arrive already normalized from ingestion; the core only fills
// in what ingestion left blank (name parts, entity type).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::names::AliasTable;
use crate::rules::EntityClassifier;

/// Opaque record identifier (ordering is plain string ordering)
pub type RecordId = String;

// ============================================================================
// ENTITY TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Individual,
    Trust,
    Estate,
    Department,
    Business,
    #[default]
    Unknown,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Individual => "individual",
            EntityType::Trust => "trust",
            EntityType::Estate => "estate",
            EntityType::Department => "department",
            EntityType::Business => "business",
            EntityType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// FIELDS
// ============================================================================

/// Comparable / mergeable fields of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Address,
    City,
    State,
    Zip,
    Phone,
    Email,
    ContactPerson,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Name,
        Field::Address,
        Field::City,
        Field::State,
        Field::Zip,
        Field::Phone,
        Field::Email,
        Field::ContactPerson,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Address => "address",
            Field::City => "city",
            Field::State => "state",
            Field::Zip => "zip",
            Field::Phone => "phone",
            Field::Email => "email",
            Field::ContactPerson => "contact_person",
        }
    }
}

/// Name / address / contact values shared by records and golden records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactFields {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub zip: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub contact_person: String,
}

impl ContactFields {
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Name => &self.name,
            Field::Address => &self.address,
            Field::City => &self.city,
            Field::State => &self.state,
            Field::Zip => &self.zip,
            Field::Phone => &self.phone,
            Field::Email => &self.email,
            Field::ContactPerson => &self.contact_person,
        }
    }

    pub fn set(&mut self, field: Field, value: String) {
        match field {
            Field::Name => self.name = value,
            Field::Address => self.address = value,
            Field::City => self.city = value,
            Field::State => self.state = value,
            Field::Zip => self.zip = value,
            Field::Phone => self.phone = value,
            Field::Email => self.email = value,
            Field::ContactPerson => self.contact_person = value,
        }
    }
}

/// Parsed name components
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameParts {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub first: String,
    #[serde(default)]
    pub middle: String,
    #[serde(default)]
    pub last: String,
    #[serde(default)]
    pub suffix: String,
}

impl NameParts {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.first.is_empty()
            && self.middle.is_empty()
            && self.last.is_empty()
            && self.suffix.is_empty()
    }
}

// ============================================================================
// RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,

    pub fields: ContactFields,

    #[serde(default)]
    pub name_parts: NameParts,

    #[serde(default)]
    pub entity_type: EntityType,

    /// Irreversible identity token (never raw PII)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pii_token: Option<String>,

    /// Last update at the source, used by the `most_recent` merge strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: impl Into<String>) -> Self {
        Record {
            id: id.into(),
            fields: ContactFields {
                name: name.into(),
                address: address.into(),
                ..ContactFields::default()
            },
            name_parts: NameParts::default(),
            entity_type: EntityType::Unknown,
            pii_token: None,
            updated_at: None,
        }
    }

    pub fn with_location(
        mut self,
        city: impl Into<String>,
        state: impl Into<String>,
        zip: impl Into<String>,
    ) -> Self {
        self.fields.city = city.into();
        self.fields.state = state.into();
        self.fields.zip = zip.into();
        self
    }

    pub fn with_field(mut self, field: Field, value: impl Into<String>) -> Self {
        self.fields.set(field, value.into());
        self
    }

    pub fn with_entity_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = entity_type;
        self
    }

    pub fn with_pii_token(mut self, token: impl Into<String>) -> Self {
        self.pii_token = Some(token.into());
        self
    }

    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Fill in what ingestion left blank: name parts and entity type.
    pub fn prepare(&mut self, classifier: &EntityClassifier, aliases: &AliasTable) {
        if self.name_parts.is_empty() {
            self.name_parts = aliases.parse_name(&self.fields.name);
        }
        if self.entity_type == EntityType::Unknown {
            self.entity_type = classifier.classify(&self.fields.name).entity_type;
        }
    }

    /// Normalized suffix ("jr", "sr", "3", ...) or None
    pub fn suffix(&self, aliases: &AliasTable) -> Option<String> {
        aliases.canonical_suffix(&self.name_parts.suffix)
    }

    /// PII token, treating blank tokens as absent
    pub fn token(&self) -> Option<&str> {
        self.pii_token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// Hash raw PII (e.g. an SSN) into the irreversible token the core compares.
pub fn pii_token(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    let mut hasher = Sha256::new();
    hasher.update(cleaned.to_lowercase());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// CANDIDATE PAIR
// ============================================================================

/// Two records to compare, lower id first
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidatePair {
    pub left: RecordId,
    pub right: RecordId,
    /// Blocking key that first produced this pair (e.g. "zip:62701")
    pub blocking_key: String,
}

impl CandidatePair {
    /// Canonicalize so `left < right`. Returns None for a self-pair.
    pub fn new(a: &str, b: &str, blocking_key: impl Into<String>) -> Option<Self> {
        if a == b {
            return None;
        }
        let (left, right) = if a < b { (a, b) } else { (b, a) };
        Some(CandidatePair {
            left: left.to_string(),
            right: right.to_string(),
            blocking_key: blocking_key.into(),
        })
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.left, &self.right)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_pair_canonical_order() {
        let p1 = CandidatePair::new("b", "a", "zip:1").unwrap();
        let p2 = CandidatePair::new("a", "b", "state:il").unwrap();

        assert_eq!(p1.left, "a");
        assert_eq!(p1.right, "b");
        assert_eq!(p1.key(), p2.key());
    }

    #[test]
    fn test_candidate_pair_rejects_self_pair() {
        assert!(CandidatePair::new("a", "a", "zip:1").is_none());
    }

    #[test]
    fn test_pii_token_is_irreversible_and_stable() {
        let t1 = pii_token("123-45-6789");
        let t2 = pii_token("123456789");

        assert_eq!(t1, t2);
        assert_eq!(t1.len(), 64);
        assert!(!t1.contains("6789"));
    }

    #[test]
    fn test_prepare_fills_parts_and_type() {
        let classifier = EntityClassifier::with_defaults();
        let aliases = AliasTable::default();

        let mut rec = Record::new("1", "Dr. John Smith Jr", "1 Main St");
        rec.prepare(&classifier, &aliases);

        assert_eq!(rec.entity_type, EntityType::Individual);
        assert_eq!(rec.name_parts.title, "Dr.");
        assert_eq!(rec.name_parts.first, "John");
        assert_eq!(rec.name_parts.last, "Smith");
        assert_eq!(rec.suffix(&aliases), Some("jr".to_string()));
    }

    #[test]
    fn test_prepare_keeps_supplied_entity_type() {
        let classifier = EntityClassifier::with_defaults();
        let aliases = AliasTable::default();

        let mut rec = Record::new("1", "Smith Family", "1 Main St")
            .with_entity_type(EntityType::Trust);
        rec.prepare(&classifier, &aliases);

        assert_eq!(rec.entity_type, EntityType::Trust);
    }

    #[test]
    fn test_blank_token_is_absent() {
        let rec = Record::new("1", "A", "B").with_pii_token("  ");
        assert_eq!(rec.token(), None);
    }
}
