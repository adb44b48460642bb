use crate::ArcStr;
use thiserror::Error;

/// Fatal input-contract violations.
///
/// Each variant names the violated contract and the offending value, so a
/// failure is never a plausible-looking wrong number. Recoverable oddities
/// (unmapped jurisdictions, stray text in count cells) are collected as
/// warnings in [`crate::clean::DataQualityReport`] instead of raised here.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractViolation {
    #[error("population for {jurisdiction} must be positive, got {population}")]
    NonPositivePopulation {
        jurisdiction: ArcStr,
        population: u64,
    },
    #[error("no population on record for {0}")]
    UnknownPopulation(ArcStr),
    #[error("contingency table must be at least 2x2, got {rows}x{cols}")]
    ContingencyTooSmall { rows: usize, cols: usize },
    #[error("contingency table row {row} has {got} columns, expected {expected}")]
    RaggedRow {
        row: usize,
        got: usize,
        expected: usize,
    },
    #[error("contingency table row {0} sums to zero")]
    ZeroRowMarginal(usize),
    #[error("contingency table column {0} sums to zero")]
    ZeroColumnMarginal(usize),
    #[error("reference proportion must lie in (0, 1), got {0}")]
    ReferenceProportionOutOfRange(f64),
    #[error("the {0} vocabulary is empty")]
    EmptyVocabulary(&'static str),
    #[error("no patient total found for {0}")]
    MissingTotal(ArcStr),
}
