//! Clinical survival table keyed by patient barcode

use anyhow::{Context, Result};
use std::collections::HashMap;

use super::delimited::reader::read_table;
use super::reader::{DelimitedConfig, is_missing, parse_number};
use crate::config::BASE_PATIENT_ID_LEN;

pub const BARCODE_COLUMN: &str = "bcr_patient_barcode";
pub const DSS_COLUMN: &str = "DSS";
pub const OS_COLUMN: &str = "OS";
pub const STAGE_COLUMN: &str = "clinical_stage";

/// Clinical fields copied onto matching patient documents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClinicalRecord {
    /// Disease-specific survival, days
    pub dss: Option<i64>,
    /// Overall survival, days
    pub os: Option<i64>,
    pub clinical_stage: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SurvivalTable {
    records: HashMap<String, ClinicalRecord>,
}

impl SurvivalTable {
    pub fn parse(text: &str) -> Result<Self> {
        let table = read_table(text, &DelimitedConfig::tsv()).context("Failed to read survival table")?;

        let barcode = table.require_column(BARCODE_COLUMN)?;
        let dss = table.require_column(DSS_COLUMN)?;
        let os = table.require_column(OS_COLUMN)?;
        let stage = table.require_column(STAGE_COLUMN)?;

        let mut records = HashMap::with_capacity(table.records.len());
        for record in &table.records {
            let fields = &record.fields;
            let clinical = ClinicalRecord {
                dss: parse_days(&fields[dss]),
                os: parse_days(&fields[os]),
                clinical_stage: (!is_missing(&fields[stage])).then(|| fields[stage].trim().to_string()),
            };
            records
                .entry(fields[barcode].trim().to_string())
                .or_insert(clinical);
        }

        Ok(Self { records })
    }

    pub fn get(&self, barcode: &str) -> Option<&ClinicalRecord> {
        self.records.get(barcode)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Whole days; fractional values are truncated
fn parse_days(cell: &str) -> Option<i64> {
    parse_number(cell).map(|v| v.trunc() as i64)
}

/// Patient part of a sample barcode: `TCGA-A1-A0SB-01` -> `TCGA-A1-A0SB`
pub fn base_patient_id(sample_id: &str) -> &str {
    match sample_id.char_indices().nth(BASE_PATIENT_ID_LEN) {
        Some((idx, _)) => &sample_id[..idx],
        None => sample_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "bcr_patient_barcode\ttype\tOS\tDSS\tclinical_stage\n\
                         TCGA-A1-A0SB\tBRCA\t259\t0\tStage I\n\
                         TCGA-A1-A0SD\tBRCA\t437.0\tNA\t\n\
                         TCGA-A1-A0SB\tBRCA\t1\t1\tStage IV\n";

    #[test]
    fn test_parse_records() {
        let table = SurvivalTable::parse(TABLE).unwrap();
        assert_eq!(table.len(), 2);

        assert_eq!(
            table.get("TCGA-A1-A0SB"),
            Some(&ClinicalRecord {
                dss: Some(0),
                os: Some(259),
                clinical_stage: Some("Stage I".to_string()),
            })
        );
        assert_eq!(
            table.get("TCGA-A1-A0SD"),
            Some(&ClinicalRecord {
                dss: None,
                os: Some(437),
                clinical_stage: None,
            })
        );
    }

    #[test]
    fn test_header_only_table_is_empty() {
        let table = SurvivalTable::parse("bcr_patient_barcode\tOS\tDSS\tclinical_stage\n").unwrap();
        assert!(table.is_empty());
        assert!(!SurvivalTable::parse(TABLE).unwrap().is_empty());
    }

    #[test]
    fn test_missing_column() {
        let err = SurvivalTable::parse("bcr_patient_barcode\tOS\nX\t1\n").unwrap_err();
        assert!(err.to_string().contains("DSS"));
    }

    #[test]
    fn test_base_patient_id() {
        assert_eq!(base_patient_id("TCGA-A1-A0SB-01"), "TCGA-A1-A0SB");
        assert_eq!(base_patient_id("TCGA-A1-A0SB"), "TCGA-A1-A0SB");
        assert_eq!(base_patient_id("short"), "short");
        assert_eq!(base_patient_id("ÄÄÄÄÄÄÄÄÄÄÄÄÄ"), "ÄÄÄÄÄÄÄÄÄÄÄÄ");
    }

    #[test]
    fn test_parse_days_truncates() {
        assert_eq!(parse_days("12.9"), Some(12));
        assert_eq!(parse_days("#N/A"), None);
    }
}
