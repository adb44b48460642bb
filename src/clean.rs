//! Cleaning passes over raw export rows: label normalization, small-cell
//! imputation, forward fill and the pivot into per-jurisdiction records.
//!
//! The passes favour silent pass-through for harmless oddities (unknown
//! labels, stray text) because the pipeline is re-run often against evolving
//! exports; everything skipped is still logged and collected in a
//! [`DataQualityReport`] so nothing disappears without trace.

use crate::{
    config::Vocabulary, error::ContractViolation, ArcStr, CellValue, CountRow, Result,
    StateRecord, StateRecords, TOTAL_LABEL,
};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counts at or below this threshold arrive masked in the export.
pub const SUPPRESSION_THRESHOLD: u64 = 10;

/// The masking token the export uses for suppressed counts.
pub const SUPPRESSION_SENTINEL: &str = "10 or fewer";

/// Canonicalize a free-text header or category label.
///
/// Lower-cases, collapses runs of whitespace, underscores and `- / ( ) , .`
/// to a single underscore, and strips leading/trailing underscores.
/// Idempotent: normalizing a normalized label changes nothing.
pub fn normalize_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_whitespace() || matches!(ch, '_' | '-' | '/' | '(' | ')' | ',' | '.') {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    if out.ends_with('_') {
        out.pop();
    }
    out
}

/// How to replace privacy-masked counts.
///
/// The surrogate defaults to half the suppression threshold rounded down,
/// the conservative midpoint for aggregate analyses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmallCellRule {
    pub sentinel: ArcStr,
    pub surrogate: u64,
}

impl Default for SmallCellRule {
    fn default() -> Self {
        SmallCellRule {
            sentinel: SUPPRESSION_SENTINEL.into(),
            surrogate: SUPPRESSION_THRESHOLD / 2,
        }
    }
}

impl SmallCellRule {
    /// Replace the masking sentinel with the surrogate count; coerce other
    /// text cells to numbers where possible.
    ///
    /// Text that is neither the sentinel nor parseable stays as-is; it
    /// surfaces as a warning when the records are pivoted. Applying the rule
    /// twice is a no-op because the sentinel no longer appears after the
    /// first pass.
    pub fn impute_cell(&self, value: CellValue) -> CellValue {
        match value {
            CellValue::Text(text) => {
                let trimmed = text.trim();
                if trimmed == &*self.sentinel {
                    CellValue::Count(self.surrogate)
                } else if let Ok(n) = trimmed.parse::<u64>() {
                    CellValue::Count(n)
                } else {
                    CellValue::Text(text)
                }
            }
            other => other,
        }
    }

    /// Impute every row in place, returning how many suppressed cells were
    /// replaced.
    pub fn impute_rows(&self, rows: &mut [CountRow]) -> usize {
        let mut imputed = 0;
        for row in rows.iter_mut() {
            let suppressed =
                matches!(&row.value, CellValue::Text(t) if t.trim() == &*self.sentinel);
            row.value = self.impute_cell(row.value.clone());
            if suppressed {
                imputed += 1;
            }
        }
        imputed
    }
}

/// Non-fatal oddities observed while cleaning, reported alongside the
/// cleaned dataset rather than interrupting the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQualityReport {
    /// Cells still non-numeric after imputation: (jurisdiction, category, text).
    pub non_numeric: Vec<(ArcStr, ArcStr, ArcStr)>,
    /// Suppressed cells replaced by the surrogate.
    pub suppressed_cells: usize,
    /// Rows dropped because no jurisdiction had been seen yet.
    pub dropped_leading_rows: usize,
    /// Roster entries with no row in the export.
    pub missing_jurisdictions: Vec<ArcStr>,
}

impl DataQualityReport {
    pub fn is_clean(&self) -> bool {
        self.non_numeric.is_empty()
            && self.dropped_leading_rows == 0
            && self.missing_jurisdictions.is_empty()
    }
}

/// Forward-fill jurisdiction names across merged-cell groups.
///
/// Exports leave the jurisdiction cell blank for every row after the first
/// in a merged group. Returns the number of leading rows dropped because no
/// jurisdiction had been seen yet.
pub fn forward_fill_states(rows: &mut Vec<CountRow>) -> usize {
    let mut current: Option<ArcStr> = None;
    let mut dropped = 0;
    rows.retain_mut(|row| match &row.state {
        Some(state) => {
            current = Some(state.clone());
            true
        }
        None => match &current {
            Some(state) => {
                row.state = Some(state.clone());
                true
            }
            None => {
                dropped += 1;
                false
            }
        },
    });
    if dropped > 0 {
        event!(Level::WARN, "dropped {dropped} rows with no jurisdiction");
    }
    dropped
}

/// Pivot long-form rows into one record per jurisdiction.
///
/// Category labels pass through the vocabulary first, so alternate raw
/// spellings land on one canonical label. Numeric cells sum into the record
/// (an export can split a category over several rows), empty cells are
/// skipped, and text that survived imputation is logged and recorded in the
/// report. Every jurisdiction must carry a patient total; a record set
/// without one fails rather than reporting rates against a made-up
/// denominator.
pub fn pivot_records(
    rows: &[CountRow],
    vocabulary: &Vocabulary,
    report: &mut DataQualityReport,
) -> Result<StateRecords, ContractViolation> {
    let mut per_state: BTreeMap<ArcStr, BTreeMap<ArcStr, u64>> = BTreeMap::new();
    for row in rows {
        let state = match &row.state {
            Some(state) => state,
            // forward fill runs first, so this only happens on rows the
            // caller chose not to fill
            None => continue,
        };
        let category = vocabulary.canonicalize(&row.category);
        match &row.value {
            CellValue::Count(n) => {
                *per_state
                    .entry(state.clone())
                    .or_default()
                    .entry(category)
                    .or_insert(0) += n;
            }
            CellValue::Empty => {}
            CellValue::Text(text) => {
                event!(
                    Level::WARN,
                    "non-numeric count for {state} / {category}: {text:?}"
                );
                report
                    .non_numeric
                    .push((state.clone(), category, text.clone()));
            }
        }
    }

    let mut records = Vec::with_capacity(per_state.len());
    for (state, mut counts) in per_state {
        let total_key = counts
            .keys()
            .find(|k| normalize_label(k) == normalize_label(TOTAL_LABEL))
            .cloned();
        let total = match total_key {
            Some(key) => counts.remove(&key).unwrap_or(0),
            None => return Err(ContractViolation::MissingTotal(state)),
        };
        records.push(StateRecord {
            state,
            total,
            counts,
        });
    }
    Ok(StateRecords::new(records))
}

#[cfg(test)]
mod test {
    use super::{
        forward_fill_states, normalize_label, pivot_records, DataQualityReport, SmallCellRule,
    };
    use crate::{config::Vocabulary, CellValue, CountRow, TOTAL_LABEL};

    fn row(state: Option<&str>, category: &str, value: CellValue) -> CountRow {
        CountRow {
            state: state.map(Into::into),
            category: category.into(),
            value,
        }
    }

    #[test]
    fn normalization_examples() {
        assert_eq!(normalize_label("State of Residence"), "state_of_residence");
        assert_eq!(
            normalize_label("Carbamazepine/Oxcarbazepine"),
            "carbamazepine_oxcarbazepine"
        );
        assert_eq!(
            normalize_label("MVD (Microvascular Decompression)"),
            "mvd_microvascular_decompression"
        );
        assert_eq!(normalize_label("SRS 61796 and 98"), "srs_61796_and_98");
        assert_eq!(normalize_label("  weird -- label , ( ) "), "weird_label");
        assert_eq!(normalize_label(""), "");
    }

    #[test]
    fn normalization_idempotent() {
        let inputs = [
            "State of Residence",
            "All Medications",
            "CRNEC SOPL EXPLORATION/DECOMPRESSION CRANIAL NRV 61458",
            "already_snake_case",
            "a__b",
            "Per-Capita (rate), v2.1",
        ];
        for input in inputs {
            let once = normalize_label(input);
            assert_eq!(normalize_label(&once), once, "not idempotent for {input:?}");
            assert!(!once.contains("__"));
            assert!(!once.starts_with('_') && !once.ends_with('_'));
        }
    }

    #[test]
    fn imputation_replaces_sentinel() {
        let rule = SmallCellRule::default();
        assert_eq!(
            rule.impute_cell(CellValue::Text("10 or fewer".into())),
            CellValue::Count(5)
        );
        assert_eq!(
            rule.impute_cell(CellValue::Text(" 10 or fewer ".into())),
            CellValue::Count(5)
        );
        assert_eq!(
            rule.impute_cell(CellValue::Text("42".into())),
            CellValue::Count(42)
        );
        // not coercible: left alone rather than guessed at
        assert_eq!(
            rule.impute_cell(CellValue::Text("1,234".into())),
            CellValue::Text("1,234".into())
        );
        assert_eq!(rule.impute_cell(CellValue::Count(7)), CellValue::Count(7));
        assert_eq!(rule.impute_cell(CellValue::Empty), CellValue::Empty);
    }

    #[test]
    fn imputation_idempotent() {
        let rule = SmallCellRule::default();
        let mut rows = vec![
            row(Some("Ohio"), "Gabapentin", CellValue::Text("10 or fewer".into())),
            row(Some("Ohio"), TOTAL_LABEL, CellValue::Count(120)),
            row(Some("Texas"), "Gabapentin", CellValue::Text("n/a".into())),
        ];
        let imputed = rule.impute_rows(&mut rows);
        assert_eq!(imputed, 1);
        let snapshot = rows.clone();
        assert_eq!(rule.impute_rows(&mut rows), 0);
        assert_eq!(rows, snapshot);
    }

    #[test]
    fn forward_fill_fills_and_drops() {
        let mut rows = vec![
            row(None, "Gabapentin", CellValue::Count(1)),
            row(Some("Ohio"), "Gabapentin", CellValue::Count(2)),
            row(None, "Baclofen", CellValue::Count(3)),
            row(None, TOTAL_LABEL, CellValue::Count(9)),
            row(Some("Texas"), "Gabapentin", CellValue::Count(4)),
            row(None, TOTAL_LABEL, CellValue::Count(8)),
        ];
        let dropped = forward_fill_states(&mut rows);
        assert_eq!(dropped, 1);
        assert_eq!(rows.len(), 5);
        assert!(rows[..3].iter().all(|r| r.state.as_deref() == Some("Ohio")));
        assert!(rows[3..].iter().all(|r| r.state.as_deref() == Some("Texas")));
    }

    #[test]
    fn pivot_builds_records_and_warnings() {
        let vocab = Vocabulary::new(
            &["Gabapentin", "Baclofen"],
            &[("gabapentin", "Gabapentin"), ("baclofen", "Baclofen")],
        );
        let rows = vec![
            row(Some("Ohio"), "gabapentin", CellValue::Count(40)),
            // same category split over two rows sums
            row(Some("Ohio"), "Gabapentin", CellValue::Count(2)),
            row(Some("Ohio"), "baclofen", CellValue::Text("junk".into())),
            row(Some("Ohio"), "Total", CellValue::Count(120)),
            row(Some("Texas"), "Gabapentin", CellValue::Count(7)),
            row(Some("Texas"), "total", CellValue::Count(30)),
        ];
        let mut report = DataQualityReport::default();
        let records = pivot_records(&rows, &vocab, &mut report).unwrap();
        assert_eq!(records.len(), 2);
        let ohio = records.find_by_state("Ohio").unwrap();
        assert_eq!(ohio.total, 120);
        assert_eq!(ohio.count("Gabapentin"), Some(42));
        assert_eq!(ohio.count("Baclofen"), None);
        let texas = records.find_by_state("Texas").unwrap();
        assert_eq!(texas.total, 30);
        assert_eq!(report.non_numeric.len(), 1);
        assert_eq!(&*report.non_numeric[0].2, "junk");
        assert!(!report.is_clean());
    }

    #[test]
    fn pivot_requires_a_total() {
        let vocab = Vocabulary::new(&["Gabapentin"], &[]);
        let rows = vec![row(Some("Ohio"), "Gabapentin", CellValue::Count(4))];
        let mut report = DataQualityReport::default();
        let err = pivot_records(&rows, &vocab, &mut report).unwrap_err();
        assert_eq!(err.to_string(), "no patient total found for Ohio");
    }
}
