//! Gene-by-sample expression matrices
//!
//! A PANCAN file is a TSV whose first column names the gene of each row and
//! whose header lists the sample barcodes. Loading wants the transpose: one
//! profile per sample, keyed by gene. Only the rows of requested genes are
//! kept; a full file holds tens of thousands of rows.

use anyhow::Result;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::delimited::reader::read_table_filtered;
use super::reader::{DelimitedConfig, parse_number};

/// Expression values of one sample for a set of genes
#[derive(Debug, Clone, PartialEq)]
pub struct SampleProfile {
    pub sample_id: String,
    pub genes: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    /// Requested genes found in the file, in file order
    pub genes: Vec<String>,
    pub samples: Vec<String>,
    /// `values[gene_row][sample_col]`
    pub values: Vec<Vec<Option<f64>>>,
    /// Row of the first occurrence of each gene
    gene_rows: HashMap<String, usize>,
}

impl ExpressionMatrix {
    /// Parse a matrix, holding only the first row of each gene in `targets`
    pub fn parse(text: &str, targets: &[String]) -> Result<Self> {
        let wanted: HashSet<&str> = targets.iter().map(String::as_str).collect();
        let mut seen: HashSet<String> = HashSet::new();

        let table = read_table_filtered(text, &DelimitedConfig::tsv(), |record| {
            match record.get(0) {
                Some(gene) if wanted.contains(gene) => seen.insert(gene.to_string()),
                _ => false,
            }
        })?;

        if table.header.len() < 2 {
            anyhow::bail!("Expression matrix has no sample columns");
        }
        let samples: Vec<String> = table.header[1..].to_vec();

        let mut genes = Vec::with_capacity(table.records.len());
        let mut values = Vec::with_capacity(table.records.len());
        let mut gene_rows = HashMap::new();

        for record in table.records {
            let mut fields = record.fields.into_iter();
            let gene = fields.next().unwrap_or_default();
            let row: Vec<Option<f64>> = fields.map(|cell| parse_number(&cell)).collect();

            gene_rows.insert(gene.clone(), genes.len());
            genes.push(gene);
            values.push(row);
        }

        Ok(Self {
            genes,
            samples,
            values,
            gene_rows,
        })
    }

    /// Targets present in the matrix, in the order given
    pub fn genes_present(&self, targets: &[String]) -> Vec<String> {
        let mut present: Vec<String> = Vec::new();
        for target in targets {
            if self.gene_rows.contains_key(target) && !present.contains(target) {
                present.push(target.clone());
            }
        }
        present
    }

    /// Transpose to one profile per sample restricted to `genes`.
    /// Missing values are left out of a profile rather than stored as null.
    pub fn sample_profiles(&self, genes: &[String]) -> Vec<SampleProfile> {
        let rows: Vec<(&String, usize)> = genes
            .iter()
            .filter_map(|g| self.gene_rows.get(g).map(|&row| (g, row)))
            .collect();

        self.samples
            .iter()
            .enumerate()
            .map(|(col, sample_id)| SampleProfile {
                sample_id: sample_id.clone(),
                genes: rows
                    .iter()
                    .filter_map(|(gene, row)| {
                        self.values[*row]
                            .get(col)
                            .copied()
                            .flatten()
                            .map(|v| ((*gene).clone(), v))
                    })
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MATRIX: &str = "sample\tTCGA-A1-A0SB-01\tTCGA-A1-A0SD-01\tTCGA-A1-A0SE-01\n\
                          CCL5\t1.5\t-0.25\tNA\n\
                          BRCA1\t3.0\t3.1\t3.2\n\
                          IL8\t\t0.5\t0.75\n";

    fn targets(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn parse_all(text: &str) -> ExpressionMatrix {
        ExpressionMatrix::parse(text, &targets(&["CCL5", "BRCA1", "IL8"])).unwrap()
    }

    #[test]
    fn test_parse_shape() {
        let matrix = parse_all(MATRIX);

        assert_eq!(matrix.genes, vec!["CCL5", "BRCA1", "IL8"]);
        assert_eq!(matrix.samples.len(), 3);
        assert_eq!(matrix.values[0], vec![Some(1.5), Some(-0.25), None]);
    }

    #[test]
    fn test_genes_present_keeps_target_order() {
        let matrix = parse_all(MATRIX);
        let present = matrix.genes_present(&targets(&["IL8", "ATM", "CCL5", "IL8"]));

        assert_eq!(present, vec!["IL8", "CCL5"]);
    }

    #[test]
    fn test_sample_profiles_skip_missing() {
        let matrix = parse_all(MATRIX);
        let profiles = matrix.sample_profiles(&targets(&["CCL5", "IL8"]));

        assert_eq!(profiles.len(), 3);
        assert_eq!(profiles[0].sample_id, "TCGA-A1-A0SB-01");
        assert_eq!(profiles[0].genes, BTreeMap::from([("CCL5".to_string(), 1.5)]));
        assert_eq!(profiles[1].genes.len(), 2);
        assert_eq!(profiles[2].genes, BTreeMap::from([("IL8".to_string(), 0.75)]));
    }

    #[test]
    fn test_duplicate_gene_rows_use_first() {
        let text = "sample\tS1\nCCL5\t1.0\nCCL5\t9.0\n";
        let matrix = parse_all(text);
        let profiles = matrix.sample_profiles(&targets(&["CCL5"]));

        assert_eq!(matrix.genes, vec!["CCL5"]);
        assert_eq!(profiles[0].genes["CCL5"], 1.0);
    }

    #[test]
    fn test_only_target_rows_are_held() {
        let mut text = String::from("sample\tS1\tS2\n");
        for i in 0..500 {
            text.push_str(&format!("GENE{}\t{}\t{}\n", i, i, i));
        }
        text.push_str("CCL5\t0.5\tNA\n");

        let matrix = ExpressionMatrix::parse(&text, &targets(&["CCL5", "ATM"])).unwrap();

        assert_eq!(matrix.genes, vec!["CCL5"]);
        assert_eq!(matrix.values, vec![vec![Some(0.5), None]]);
        assert_eq!(matrix.samples, vec!["S1", "S2"]);
    }

    #[test]
    fn test_header_only_is_rejected() {
        assert!(ExpressionMatrix::parse("sample\n", &targets(&["CCL5"])).is_err());
    }
}
