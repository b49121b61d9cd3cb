// 📥 CSV Ingestion - Source rows into Records
// Raw identifiers (tax_id) are tokenized on load and never kept.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

use crate::record::{pii_token, EntityType, Field, Record};

#[derive(Debug, Deserialize)]
pub struct CsvRow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
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

    /// Optional explicit category; blank means classify from the name
    #[serde(default)]
    pub entity_type: Option<EntityType>,

    /// Already-tokenized identity value
    #[serde(default)]
    pub pii_token: Option<String>,

    /// Raw identifier (SSN/TIN); hashed here
    #[serde(default)]
    pub tax_id: Option<String>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CsvRow {
    pub fn into_record(self) -> Record {
        let mut record = Record::new(self.id, self.name, self.address)
            .with_location(self.city, self.state, self.zip)
            .with_field(Field::Phone, self.phone)
            .with_field(Field::Email, self.email)
            .with_field(Field::ContactPerson, self.contact_person);

        if let Some(entity_type) = self.entity_type {
            record = record.with_entity_type(entity_type);
        }

        let token = self
            .pii_token
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                self.tax_id
                    .filter(|raw| !raw.trim().is_empty())
                    .map(|raw| pii_token(&raw))
            });
        if let Some(token) = token {
            record = record.with_pii_token(token);
        }

        if let Some(at) = self.updated_at {
            record = record.with_updated_at(at);
        }
        record
    }
}

pub fn load_records(csv_path: &Path) -> Result<Vec<Record>> {
    let rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file: {:?}", csv_path))?;
    read_records(rdr)
}

pub fn read_records<R: std::io::Read>(mut rdr: csv::Reader<R>) -> Result<Vec<Record>> {
    let mut records = Vec::new();

    for (line, result) in rdr.deserialize::<CsvRow>().enumerate() {
        // +2: header row and 1-based lines
        let row = result.with_context(|| format!("Failed to deserialize record on line {}", line + 2))?;
        records.push(row.into_record());
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_reader(data: &str) -> csv::Reader<&[u8]> {
        csv::Reader::from_reader(data.as_bytes())
    }

    #[test]
    fn test_minimal_columns() {
        let data = "id,name,address\n1,Jane Doe,1 Main St\n2,John Roe,\n";
        let records = read_records(create_test_reader(data)).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fields.name, "Jane Doe");
        assert_eq!(records[1].fields.address, "");
        assert_eq!(records[1].entity_type, EntityType::Unknown);
        assert!(records[0].token().is_none());
    }

    #[test]
    fn test_tax_id_is_tokenized() {
        let data = "id,name,address,tax_id,entity_type,updated_at\n\
                    1,Smith Trust,1 Main St,123-45-6789,trust,2024-06-01T00:00:00Z\n";
        let records = read_records(create_test_reader(data)).unwrap();

        let rec = &records[0];
        assert_eq!(rec.token(), Some(pii_token("123456789").as_str()));
        assert_eq!(rec.entity_type, EntityType::Trust);
        assert!(rec.updated_at.is_some());
        assert!(!format!("{:?}", rec).contains("123-45-6789"));
    }

    #[test]
    fn test_bad_row_reports_line() {
        let data = "id,name,address,updated_at\n1,Jane,1 Main St,not-a-date\n";
        let err = read_records(create_test_reader(data)).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.csv");
        std::fs::write(&path, "id,name,address,city,state,zip\n1,Jane Doe,1 Main St,Springfield,IL,62701\n").unwrap();

        let records = load_records(&path).unwrap();
        assert_eq!(records[0].fields.zip, "62701");
    }
}
