//! Publication table assembly.
//!
//! Each table is built as a typed row list first; writing CSV artifacts for
//! the reporting side is a separate step, and the binaries render the same
//! rows to the terminal. Counts and proportions stay numeric until the last
//! possible moment so the formatting conventions live in exactly one place.

use crate::{
    aggregate::RegionRollup,
    config::Vocabulary,
    error::ContractViolation,
    geo::Geography,
    stats::{self, RateEstimate, TestResult},
    thousands, ArcStr, Context, Result, StateRecords,
};
use itertools::Itertools;
use qu::ick_use::*;
use std::{fs, path::Path};

/// Format a proportion in `[0, 1]` as a percentage with the given decimals.
pub fn format_percent(proportion: f64, decimals: usize) -> String {
    format!("{:.*}", decimals, proportion * 100.0)
}

/// One line of the cohort table: patients per census region.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortRow {
    pub region: ArcStr,
    pub patients: u64,
    /// Share of the cohort, already in percent.
    pub percent: f64,
}

/// Cohort characteristics: regional patient totals, largest first.
pub fn cohort_by_region(rollup: &RegionRollup) -> Vec<CohortRow> {
    let grand = rollup.grand_total();
    rollup
        .regions
        .iter()
        .map(|agg| CohortRow {
            region: agg.region.label().into(),
            patients: agg.total,
            percent: if grand == 0 {
                0.0
            } else {
                agg.total as f64 / grand as f64 * 100.0
            },
        })
        .sorted_by(|a, b| b.patients.cmp(&a.patients))
        .collect()
}

/// National utilization: one rate estimate per reportable category, against
/// the cohort total.
pub fn national_utilization(
    rollup: &RegionRollup,
    vocabulary: &Vocabulary,
    total_patients: u64,
    confidence: f64,
) -> Vec<RateEstimate> {
    vocabulary
        .reportable()
        .filter(|category| {
            if rollup.has_category(category) {
                true
            } else {
                event!(Level::WARN, "no counts for {category}; left out of the table");
                false
            }
        })
        .map(|category| {
            stats::rate_estimate(
                category.clone(),
                rollup.category_total(category),
                total_patients,
                confidence,
            )
        })
        .collect()
}

/// One region's utilization rates across the reportable categories.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionalRateRow {
    pub region: ArcStr,
    pub patients: u64,
    /// (category, proportion of the region's patients).
    pub rates: Vec<(ArcStr, f64)>,
}

/// Per-region utilization rates, largest region first.
pub fn regional_rates(rollup: &RegionRollup, vocabulary: &Vocabulary) -> Vec<RegionalRateRow> {
    let categories: Vec<&ArcStr> = vocabulary
        .reportable()
        .filter(|category| rollup.has_category(category))
        .collect();
    rollup
        .regions
        .iter()
        .map(|agg| RegionalRateRow {
            region: agg.region.label().into(),
            patients: agg.total,
            rates: categories
                .iter()
                .map(|category| {
                    let count = agg.counts.get(&***category).copied().unwrap_or(0);
                    let rate = if agg.total == 0 {
                        0.0
                    } else {
                        count as f64 / agg.total as f64
                    };
                    ((*category).clone(), rate)
                })
                .collect(),
        })
        .sorted_by(|a, b| b.patients.cmp(&a.patients))
        .collect()
}

/// Per-capita diagnosis rates for one jurisdiction.
#[derive(Debug, Clone, PartialEq)]
pub struct PerCapitaRow {
    pub jurisdiction: ArcStr,
    pub abbreviation: ArcStr,
    pub patients: u64,
    pub population: u64,
    pub per_100k: f64,
    pub region: Option<ArcStr>,
}

/// Diagnosis rate per 100,000 population for every jurisdiction, highest
/// first.
///
/// A jurisdiction with no population on record fails the table outright: a
/// silently missing denominator would rank the state at zero, which is a
/// wrong number, not a gap.
pub fn per_capita_rates(
    records: &StateRecords,
    geo: &Geography,
) -> Result<Vec<PerCapitaRow>, ContractViolation> {
    let mut rows = Vec::with_capacity(records.len());
    for record in records.iter_ref() {
        let population = geo
            .population(&record.state)
            .ok_or_else(|| ContractViolation::UnknownPopulation(record.state.clone()))?;
        let per_100k = stats::per_capita_rate(&record.state, record.total, population)?;
        rows.push(PerCapitaRow {
            jurisdiction: record.state.clone(),
            abbreviation: geo
                .abbreviation(&record.state)
                .map(ArcStr::from)
                .unwrap_or_else(|| ArcStr::from("")),
            patients: record.total,
            population,
            per_100k,
            region: geo.region(&record.state).map(|r| ArcStr::from(r.label())),
        });
    }
    rows.sort_by(|a, b| b.per_100k.total_cmp(&a.per_100k));
    Ok(rows)
}

/// A named hypothesis-test outcome, one line of the tests table.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTest {
    pub name: ArcStr,
    pub result: TestResult,
}

/// Chi-square tests of regional variation: one per dataset (medication
/// preferences, surgical preferences).
///
/// Categories no region ever reported are excluded up front with a warning;
/// a category that is present but all-zero is a degenerate column and the
/// test refuses to run.
pub fn regional_variation_tests(
    medications: &RegionRollup,
    medication_vocabulary: &Vocabulary,
    procedures: &RegionRollup,
    procedure_vocabulary: &Vocabulary,
    significance: f64,
) -> Result<Vec<NamedTest>, ContractViolation> {
    let mut tests = Vec::with_capacity(2);
    for (name, rollup, vocabulary) in [
        ("Medication Preferences by Region", medications, medication_vocabulary),
        ("Surgical Preferences by Region", procedures, procedure_vocabulary),
    ] {
        let categories: Vec<ArcStr> = vocabulary
            .reportable()
            .filter(|category| {
                if rollup.has_category(category) {
                    true
                } else {
                    event!(Level::WARN, "no counts for {category}; left out of {name:?}");
                    false
                }
            })
            .cloned()
            .collect();
        let table = rollup.contingency_table(&categories);
        let result = stats::chi_square_independence(&table, significance)?;
        tests.push(NamedTest {
            name: name.into(),
            result,
        });
    }
    Ok(tests)
}

/// One jurisdiction's rate for a category compared against the national
/// rate.
#[derive(Debug, Clone, PartialEq)]
pub struct StateComparisonRow {
    pub jurisdiction: ArcStr,
    pub count: u64,
    pub total: u64,
    /// The jurisdiction's own proportion.
    pub rate: f64,
    pub above_national: bool,
    pub result: TestResult,
}

/// Two-tailed z-test of each jurisdiction's rate for `category` against the
/// national rate, excluded jurisdictions left out.
pub fn state_vs_national(
    records: &StateRecords,
    category: &str,
    exclude: &[ArcStr],
    significance: f64,
) -> Result<(f64, Vec<StateComparisonRow>), ContractViolation> {
    let included: Vec<_> = records
        .iter_ref()
        .filter(|record| !exclude.iter().any(|ex| **ex == *record.state))
        .collect();
    let national_count: u64 = included
        .iter()
        .filter_map(|record| record.count(category))
        .sum();
    let national_total: u64 = included.iter().map(|record| record.total).sum();
    let reference = if national_total == 0 {
        0.0
    } else {
        national_count as f64 / national_total as f64
    };

    let mut rows = Vec::with_capacity(included.len());
    for record in included {
        let count = record.count(category).unwrap_or(0);
        let rate = if record.total == 0 {
            0.0
        } else {
            count as f64 / record.total as f64
        };
        // a degenerate national rate surfaces here as a reference-proportion
        // violation rather than a quiet page of zeros
        let result = stats::z_test_proportion(count, record.total, reference, significance)?;
        rows.push(StateComparisonRow {
            jurisdiction: record.state.clone(),
            count,
            total: record.total,
            rate,
            above_national: rate > reference,
            result,
        });
    }
    rows.sort_by(|a, b| b.rate.total_cmp(&a.rate));
    Ok((reference, rows))
}

// CSV artifacts for the reporting side.

fn writer(path: &Path) -> Result<csv::Writer<fs::File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("could not create \"{}\"", parent.display()))?;
    }
    let out = csv::Writer::from_path(path)
        .with_context(|| format!("unable to write \"{}\"", path.display()))?;
    Ok(out)
}

pub fn write_cohort_csv(rows: &[CohortRow], total: u64, path: impl AsRef<Path>) -> Result {
    let mut out = writer(path.as_ref())?;
    out.write_record(["Characteristic", "N", "Percentage"])?;
    out.write_record(["Total Patients", thousands(total).as_str(), "100.0%"])?;
    for row in rows {
        out.write_record([
            &*row.region,
            thousands(row.patients).as_str(),
            format!("{:.1}%", row.percent).as_str(),
        ])?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_rates_csv(
    rates: &[RateEstimate],
    decimals: usize,
    path: impl AsRef<Path>,
) -> Result {
    let mut out = writer(path.as_ref())?;
    out.write_record(["Treatment", "N", "Rate (%)", "95% CI"])?;
    for rate in rates {
        out.write_record([
            &*rate.category,
            thousands(rate.count).as_str(),
            format_percent(rate.rate, decimals).as_str(),
            format!(
                "({}-{})",
                format_percent(rate.lower, decimals),
                format_percent(rate.upper, decimals)
            )
            .as_str(),
        ])?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_regional_rates_csv(
    rows: &[RegionalRateRow],
    decimals: usize,
    path: impl AsRef<Path>,
) -> Result {
    let mut out = writer(path.as_ref())?;
    let mut headers = vec!["Census Region".to_string(), "N Patients".to_string()];
    if let Some(first) = rows.first() {
        headers.extend(
            first
                .rates
                .iter()
                .map(|(category, _)| format!("{category} (%)")),
        );
    }
    out.write_record(&headers)?;
    for row in rows {
        let mut record = vec![row.region.to_string(), thousands(row.patients)];
        record.extend(
            row.rates
                .iter()
                .map(|(_, rate)| format_percent(*rate, decimals)),
        );
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_per_capita_csv(
    rows: &[PerCapitaRow],
    decimals: usize,
    path: impl AsRef<Path>,
) -> Result {
    let mut out = writer(path.as_ref())?;
    out.write_record([
        "State",
        "Abbrev",
        "Patients",
        "Population",
        "Per 100,000",
        "Census Region",
    ])?;
    for row in rows {
        out.write_record([
            &*row.jurisdiction,
            &*row.abbreviation,
            thousands(row.patients).as_str(),
            thousands(row.population).as_str(),
            format!("{:.*}", decimals, row.per_100k).as_str(),
            row.region.as_deref().unwrap_or(""),
        ])?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_tests_csv(tests: &[NamedTest], path: impl AsRef<Path>) -> Result {
    let mut out = writer(path.as_ref())?;
    out.write_record(["Test", "Statistic", "df", "P-value", "Result"])?;
    for test in tests {
        out.write_record([
            &*test.name,
            format!("{:.1}", test.result.statistic).as_str(),
            test.result
                .df
                .map(|df| df.to_string())
                .unwrap_or_default()
                .as_str(),
            stats::format_pvalue(test.result.p_value).as_str(),
            test.result.outcome_label(),
        ])?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_state_comparison_csv(
    reference: f64,
    rows: &[StateComparisonRow],
    decimals: usize,
    path: impl AsRef<Path>,
) -> Result {
    let mut out = writer(path.as_ref())?;
    out.write_record(["State", "N", "Total", "Rate (%)", "Z", "P-value", "Versus National"])?;
    for row in rows {
        let direction = if !row.result.significant {
            "Not Significantly Different"
        } else if row.above_national {
            "Significantly Above"
        } else {
            "Significantly Below"
        };
        out.write_record([
            &*row.jurisdiction,
            thousands(row.count).as_str(),
            thousands(row.total).as_str(),
            format_percent(row.rate, decimals).as_str(),
            format!("{:.2}", row.result.statistic).as_str(),
            stats::format_pvalue(row.result.p_value).as_str(),
            direction,
        ])?;
    }
    out.write_record([
        "National Average",
        "",
        "",
        format_percent(reference, decimals).as_str(),
        "",
        "",
        "",
    ])?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{
        cohort_by_region, format_percent, national_utilization, per_capita_rates, regional_rates,
        regional_variation_tests, state_vs_national,
    };
    use crate::{
        aggregate::aggregate_by_region, config::AnalysisConfig, error::ContractViolation,
        geo::Geography, ArcStr, StateRecord, StateRecords,
    };

    fn record(state: &str, total: u64, counts: &[(&str, u64)]) -> StateRecord {
        StateRecord {
            state: state.into(),
            total,
            counts: counts
                .iter()
                .map(|(category, count)| (ArcStr::from(*category), *count))
                .collect(),
        }
    }

    fn medication_records() -> StateRecords {
        StateRecords::new(vec![
            record(
                "Ohio",
                200,
                &[("Gabapentin", 80), ("Carbamazepine/Oxcarbazepine", 60)],
            ),
            record(
                "Texas",
                300,
                &[("Gabapentin", 150), ("Carbamazepine/Oxcarbazepine", 120)],
            ),
            record(
                "Maine",
                100,
                &[("Gabapentin", 40), ("Carbamazepine/Oxcarbazepine", 55)],
            ),
        ])
    }

    #[test]
    fn percent_formatting() {
        assert_eq!(format_percent(0.1, 1), "10.0");
        assert_eq!(format_percent(0.04348, 1), "4.3");
        assert_eq!(format_percent(0.0123, 2), "1.23");
    }

    #[test]
    fn cohort_rows_sorted_and_weighted() {
        let geo = Geography::us_census();
        let rollup = aggregate_by_region(&medication_records(), &geo);
        let rows = cohort_by_region(&rollup);
        assert_eq!(rows.len(), 3);
        assert_eq!(&*rows[0].region, "West South Central");
        assert_eq!(rows[0].patients, 300);
        assert!((rows[0].percent - 50.0).abs() < 1e-9);
        let percent_total: f64 = rows.iter().map(|r| r.percent).sum();
        assert!((percent_total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn national_rates_per_category() {
        let config = AnalysisConfig::trigeminal_neuralgia();
        let geo = Geography::us_census();
        let rollup = aggregate_by_region(&medication_records(), &geo);
        let total = rollup.grand_total();
        let rates = national_utilization(&rollup, &config.medications, total, config.confidence);
        // only the categories with data make the table
        assert_eq!(rates.len(), 2);
        let gabapentin = rates
            .iter()
            .find(|r| &*r.category == "Gabapentin")
            .unwrap();
        assert_eq!(gabapentin.count, 270);
        assert_eq!(gabapentin.total, 600);
        assert!((gabapentin.rate - 0.45).abs() < 1e-9);
        assert!(gabapentin.lower < gabapentin.rate && gabapentin.rate < gabapentin.upper);
    }

    #[test]
    fn regional_rate_rows() {
        let config = AnalysisConfig::trigeminal_neuralgia();
        let geo = Geography::us_census();
        let rollup = aggregate_by_region(&medication_records(), &geo);
        let rows = regional_rates(&rollup, &config.medications);
        assert_eq!(rows.len(), 3);
        let texas = rows.iter().find(|r| &*r.region == "West South Central").unwrap();
        let gabapentin = texas
            .rates
            .iter()
            .find(|(category, _)| &**category == "Gabapentin")
            .unwrap();
        assert!((gabapentin.1 - 0.5).abs() < 1e-9);
    }

    #[test]
    fn per_capita_requires_known_population() {
        let geo = Geography::us_census();
        let rows = per_capita_rates(&medication_records(), &geo).unwrap();
        assert_eq!(rows.len(), 3);
        // Maine is tiny, so it tops the per-capita ranking
        assert_eq!(&*rows[0].jurisdiction, "Maine");
        assert_eq!(&*rows[0].abbreviation, "ME");
        assert!(rows[0].per_100k > rows[2].per_100k);

        let unknown = StateRecords::new(vec![record("Atlantis", 10, &[])]);
        assert_eq!(
            per_capita_rates(&unknown, &geo).unwrap_err(),
            ContractViolation::UnknownPopulation("Atlantis".into())
        );
    }

    #[test]
    fn variation_tests_run_per_dataset() {
        let config = AnalysisConfig::trigeminal_neuralgia();
        let geo = Geography::us_census();
        let meds = aggregate_by_region(&medication_records(), &geo);
        let procs = aggregate_by_region(
            &StateRecords::new(vec![
                record("Ohio", 200, &[("MVD", 6), ("SRS", 2)]),
                record("Texas", 300, &[("MVD", 4), ("SRS", 9)]),
            ]),
            &geo,
        );
        let tests = regional_variation_tests(
            &meds,
            &config.medications,
            &procs,
            &config.procedures,
            config.significance,
        )
        .unwrap();
        assert_eq!(tests.len(), 2);
        assert_eq!(&*tests[0].name, "Medication Preferences by Region");
        assert_eq!(tests[0].result.df, Some(2));
        assert_eq!(tests[1].result.df, Some(1));
    }

    #[test]
    fn degenerate_category_refuses_to_test() {
        let config = AnalysisConfig::trigeminal_neuralgia();
        let geo = Geography::us_census();
        let meds = aggregate_by_region(&medication_records(), &geo);
        // SRS is present in both regions but zero everywhere
        let procs = aggregate_by_region(
            &StateRecords::new(vec![
                record("Ohio", 200, &[("MVD", 6), ("SRS", 0)]),
                record("Texas", 300, &[("MVD", 4), ("SRS", 0)]),
            ]),
            &geo,
        );
        let err = regional_variation_tests(
            &meds,
            &config.medications,
            &procs,
            &config.procedures,
            config.significance,
        )
        .unwrap_err();
        assert_eq!(err, ContractViolation::ZeroColumnMarginal(1));
    }

    #[test]
    fn state_comparisons_flag_direction() {
        let records = medication_records();
        let (reference, rows) =
            state_vs_national(&records, "Gabapentin", &[], 0.05).unwrap();
        assert!((reference - 0.45).abs() < 1e-9);
        assert_eq!(rows.len(), 3);
        assert_eq!(&*rows[0].jurisdiction, "Texas");
        assert!(rows[0].above_national);
        let ohio = rows.iter().find(|r| &*r.jurisdiction == "Ohio").unwrap();
        assert!(!ohio.above_national);

        // excluded jurisdictions shift the reference and leave the table
        let (_, rows) = state_vs_national(
            &records,
            "Gabapentin",
            &["Texas".into()],
            0.05,
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| &*r.jurisdiction != "Texas"));
    }
}
