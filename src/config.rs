//! Analysis configuration: which condition, which category vocabularies,
//! which statistical conventions.
//!
//! Everything is immutable once built and passed explicitly into the
//! components that need it, so the same pipeline serves a different
//! condition by supplying a different profile (or a TOML file) without code
//! changes.

use crate::{
    clean::{normalize_label, SmallCellRule},
    error::ContractViolation,
    ArcStr, Context, Result,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

/// The condition under study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub name: ArcStr,
    pub abbreviation: ArcStr,
    pub icd10_code: ArcStr,
    pub study_start: NaiveDate,
    pub study_end: NaiveDate,
    pub data_source: ArcStr,
}

/// A closed set of category labels with their raw-export spellings.
///
/// `canonicalize` is pure and deterministic: known raw spellings (CPT-code
/// descriptions, alternate drug-name casings) map to one canonical display
/// label, unknown labels pass through unchanged, and canonical labels map to
/// themselves so the function is idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    /// Canonical display labels, in reporting order.
    order: Vec<ArcStr>,
    /// Raw export spelling → canonical display label.
    aliases: BTreeMap<ArcStr, ArcStr>,
    /// Residual category ("None of the above"), kept in the data but left
    /// out of treatment tables and tests.
    #[serde(default)]
    none_label: Option<ArcStr>,
}

impl Vocabulary {
    pub fn new(order: &[&str], aliases: &[(&str, &str)]) -> Self {
        let order: Vec<ArcStr> = order.iter().copied().map(ArcStr::from).collect();
        let mut map: BTreeMap<ArcStr, ArcStr> = aliases
            .iter()
            .map(|(raw, display)| (ArcStr::from(*raw), ArcStr::from(*display)))
            .collect();
        for label in &order {
            map.entry(label.clone()).or_insert_with(|| label.clone());
        }
        Vocabulary {
            order,
            aliases: map,
            none_label: None,
        }
    }

    /// Mark one label as the residual category.
    pub fn with_none_label(mut self, label: &str) -> Self {
        self.none_label = Some(label.into());
        self
    }

    /// Map a raw export label to its canonical display label; unrecognized
    /// labels pass through (trimmed) unchanged.
    pub fn canonicalize(&self, raw: &str) -> ArcStr {
        let trimmed = raw.trim();
        self.aliases
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| ArcStr::from(trimmed))
    }

    /// All display labels, in reporting order.
    pub fn display_order(&self) -> impl Iterator<Item = &ArcStr> + '_ {
        self.order.iter()
    }

    /// Display labels that belong in treatment tables: everything except the
    /// residual category.
    pub fn reportable(&self) -> impl Iterator<Item = &ArcStr> + '_ {
        self.order
            .iter()
            .filter(move |label| Some(*label) != self.none_label.as_ref())
    }

    pub fn contains(&self, label: &str) -> bool {
        self.order.iter().any(|l| &**l == label)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Snake-case column key for a display label, for machine-readable
    /// artifacts.
    pub fn column_key(label: &str) -> String {
        normalize_label(label)
    }
}

/// Journal formatting conventions for the emitted tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportFormat {
    /// Decimal places for medication percentages.
    pub medication_decimals: usize,
    /// Procedure rates are an order of magnitude smaller and get one more.
    pub procedure_decimals: usize,
    /// Decimal places for per-capita rates.
    pub rate_decimals: usize,
}

impl Default for ReportFormat {
    fn default() -> Self {
        ReportFormat {
            medication_decimals: 1,
            procedure_decimals: 2,
            rate_decimals: 1,
        }
    }
}

/// Everything a pipeline run needs to know that is not data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub condition: Condition,
    #[serde(default)]
    pub small_cell: SmallCellRule,
    /// Confidence level for interval estimates.
    pub confidence: f64,
    /// Significance threshold for hypothesis tests.
    pub significance: f64,
    pub medications: Vocabulary,
    pub procedures: Vocabulary,
    /// Jurisdictions excluded from state-level comparisons: tiny samples
    /// make the percentages unstable. They still count towards regional and
    /// national totals.
    #[serde(default)]
    pub exclude_states: Vec<ArcStr>,
    #[serde(default)]
    pub format: ReportFormat,
}

impl AnalysisConfig {
    /// The built-in trigeminal neuralgia profile.
    pub fn trigeminal_neuralgia() -> Self {
        let medications = Vocabulary::new(
            &[
                "Carbamazepine/Oxcarbazepine",
                "Gabapentin",
                "Pregabalin",
                "Baclofen",
                "Lamotrigine",
                "OnabotulinumtoxinA",
                "None of the above",
            ],
            &[
                (
                    "Carbmazapine or Oxcarbmazapine",
                    "Carbamazepine/Oxcarbazepine",
                ),
                (
                    "Carbamazepine or Oxcarbazepine",
                    "Carbamazepine/Oxcarbazepine",
                ),
                ("baclofen", "Baclofen"),
                ("gabapentin", "Gabapentin"),
                ("lamotrigine", "Lamotrigine"),
                ("pregabalin", "Pregabalin"),
                ("onabotulinumtoxinA", "OnabotulinumtoxinA"),
            ],
        )
        .with_none_label("None of the above");

        let procedures = Vocabulary::new(
            &[
                "MVD",
                "SRS",
                "Rhizotomy",
                "Glycerol Rhizotomy",
                "Botox",
                "None of the above",
            ],
            &[
                (
                    "CRNEC SOPL EXPLORATION/DECOMPRESSION CRANIAL NRV 61458",
                    "MVD",
                ),
                ("SRS 61796 and 98", "SRS"),
                (
                    "CREATE LESION STRTCTC PRQ NEUROLYTIC GASSERIAN 61790",
                    "Rhizotomy",
                ),
                (
                    "CHEMODNRVTJ MUSC MUSC INNERVATED FACIAL NRV UNIL 64612",
                    "Botox",
                ),
            ],
        )
        .with_none_label("None of the above");

        AnalysisConfig {
            condition: Condition {
                name: "Trigeminal Neuralgia".into(),
                abbreviation: "TN".into(),
                icd10_code: "G50.0".into(),
                study_start: NaiveDate::from_ymd_opt(2022, 11, 28).unwrap(),
                study_end: NaiveDate::from_ymd_opt(2025, 11, 27).unwrap(),
                data_source: "Epic Cosmos".into(),
            },
            small_cell: SmallCellRule::default(),
            confidence: 0.95,
            significance: 0.05,
            medications,
            procedures,
            exclude_states: vec!["Alaska".into()],
            format: ReportFormat::default(),
        }
    }

    /// Load an override profile from a TOML file.
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read \"{}\"", path.display()))?;
        let config = Self::from_toml_str(&contents)
            .with_context(|| format!("invalid analysis config \"{}\"", path.display()))?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AnalysisConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make downstream numbers meaningless.
    pub fn validate(&self) -> Result<(), ContractViolation> {
        if self.medications.is_empty() {
            return Err(ContractViolation::EmptyVocabulary("medication"));
        }
        if self.procedures.is_empty() {
            return Err(ContractViolation::EmptyVocabulary("procedure"));
        }
        Ok(())
    }
}
