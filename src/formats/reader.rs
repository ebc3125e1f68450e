use anyhow::Result;

/// A single record (row) from a delimited file
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub fields: Vec<String>,
}

/// A fully parsed delimited file: header plus data records
#[derive(Debug, Clone)]
pub struct DelimitedTable {
    pub header: Vec<String>,
    pub records: Vec<Record>,
}

impl DelimitedTable {
    /// Position of a header column, matched exactly
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Like `column_index`, but a missing column is an error
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| anyhow::anyhow!("Missing required column '{}'", name))
    }
}

/// Configuration for delimited file reading (CSV, TSV, etc.)
#[derive(Debug, Clone)]
pub struct DelimitedConfig {
    pub delimiter: u8,
    pub has_header: bool,
    pub quote: u8,
}

impl Default for DelimitedConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: true,
            quote: b'"',
        }
    }
}

impl DelimitedConfig {
    pub fn tsv() -> Self {
        Self {
            delimiter: b'\t',
            has_header: true,
            quote: b'"',
        }
    }
}

/// Cell values read as "no value"
const MISSING_MARKERS: &[&str] = &["", "NA", "NaN", "nan", "N/A", "#N/A", "null", "NULL"];

/// True when a cell holds one of the usual missing-value markers
pub fn is_missing(cell: &str) -> bool {
    MISSING_MARKERS.contains(&cell.trim())
}

/// Parse a numeric cell, treating missing markers, NaN and garbage as absent
pub fn parse_number(cell: &str) -> Option<f64> {
    if is_missing(cell) {
        return None;
    }
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_markers() {
        assert!(is_missing(""));
        assert!(is_missing(" NA "));
        assert!(is_missing("#N/A"));
        assert!(!is_missing("0"));
        assert!(!is_missing("Stage I"));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("1.5"), Some(1.5));
        assert_eq!(parse_number("-0.25"), Some(-0.25));
        assert_eq!(parse_number("1e3"), Some(1000.0));
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("abc"), None);
    }

    #[test]
    fn test_require_column() {
        let table = DelimitedTable {
            header: vec!["a".to_string(), "b".to_string()],
            records: vec![],
        };
        assert_eq!(table.require_column("b").unwrap(), 1);
        assert!(table.require_column("c").is_err());
    }
}
