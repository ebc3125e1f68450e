//! File format parsers

pub mod compression;
pub mod delimited;
pub mod matrix;
pub mod reader;
pub mod survival;

pub use matrix::ExpressionMatrix;
pub use survival::{ClinicalRecord, SurvivalTable, base_patient_id};
