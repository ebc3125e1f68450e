use anyhow::{Context, Result};

use crate::formats::reader::{DelimitedConfig, DelimitedTable, Record};

/// Parse a whole delimited document held in memory.
/// Every record must have as many fields as the header.
pub fn read_table(text: &str, config: &DelimitedConfig) -> Result<DelimitedTable> {
    read_table_filtered(text, config, |_| true)
}

/// Like `read_table`, but only records accepted by `keep` are copied out.
/// Rejected rows are still validated, then dropped as they stream past.
pub fn read_table_filtered<F>(text: &str, config: &DelimitedConfig, mut keep: F) -> Result<DelimitedTable>
where
    F: FnMut(&csv::StringRecord) -> bool,
{
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(config.delimiter)
        .quote(config.quote)
        .has_headers(false) // We split off the header ourselves
        .from_reader(text.as_bytes());

    let mut rows = csv_reader.records();

    let header = if config.has_header {
        match rows.next() {
            Some(first) => first
                .context("Failed to parse header row")?
                .iter()
                .map(|s| s.to_string())
                .collect(),
            None => anyhow::bail!("File is empty"),
        }
    } else {
        Vec::new()
    };

    let mut records = Vec::new();

    for (i, result) in rows.enumerate() {
        // +2: one for the header, one for 1-based line numbers
        let line = i + if config.has_header { 2 } else { 1 };
        let record = result.with_context(|| format!("Failed to parse record on line {}", line))?;

        // Skip blank trailing lines
        if record.len() == 1 && record.get(0) == Some("") {
            continue;
        }

        if !keep(&record) {
            continue;
        }

        records.push(Record {
            fields: record.iter().map(|s| s.to_string()).collect(),
        });
    }

    Ok(DelimitedTable { header, records })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_tsv() {
        let text = "sample\tTCGA-01\tTCGA-02\nCCL5\t1.5\t2.0\nATM\t0.1\tNA\n";
        let table = read_table(text, &DelimitedConfig::tsv()).unwrap();

        assert_eq!(table.header, vec!["sample", "TCGA-01", "TCGA-02"]);
        assert_eq!(table.records.len(), 2);
        assert_eq!(table.records[1].fields, vec!["ATM", "0.1", "NA"]);
    }

    #[test]
    fn test_read_csv_with_quotes() {
        let text = "id,stage\n1,\"Stage I, A\"\n";
        let table = read_table(text, &DelimitedConfig::default()).unwrap();

        assert_eq!(table.records[0].fields[1], "Stage I, A");
    }

    #[test]
    fn test_ragged_rows_fail() {
        let text = "a\tb\n1\t2\t3\n";
        let err = read_table(text, &DelimitedConfig::tsv()).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_filtered_keeps_matching_rows() {
        let text = "gene\tS1\nCCL5\t1\nGAPDH\t2\nATM\t3\n";
        let table =
            read_table_filtered(text, &DelimitedConfig::tsv(), |r| r.get(0) != Some("GAPDH")).unwrap();

        assert_eq!(table.header, vec!["gene", "S1"]);
        let genes: Vec<&str> = table.records.iter().map(|r| r.fields[0].as_str()).collect();
        assert_eq!(genes, vec!["CCL5", "ATM"]);
    }

    #[test]
    fn test_filtered_still_rejects_ragged_rows() {
        let text = "gene\tS1\nGAPDH\t1\t2\n";
        assert!(read_table_filtered(text, &DelimitedConfig::tsv(), |_| false).is_err());
    }

    #[test]
    fn test_empty_input() {
        assert!(read_table("", &DelimitedConfig::tsv()).is_err());
    }

    #[test]
    fn test_without_header() {
        let config = DelimitedConfig {
            has_header: false,
            ..DelimitedConfig::default()
        };
        let table = read_table("1,2\n3,4\n", &config).unwrap();

        assert!(table.header.is_empty());
        assert_eq!(table.records.len(), 2);
    }
}
