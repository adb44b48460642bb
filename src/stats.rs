//! Proportions, confidence intervals and hypothesis tests over the
//! aggregated counts.
//!
//! Everything here is a pure function: inputs in, a fresh value out. The
//! engines refuse to run on inputs that would produce plausible-looking but
//! meaningless numbers (zero populations, degenerate contingency tables);
//! genuinely degenerate-but-defined cases (zero denominators) return
//! documented sentinel results instead.

use crate::{error::ContractViolation, ArcStr};
use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use std::fmt;

/// Per-capita rates are expressed per this many people.
pub const PER_CAPITA_BASE: f64 = 100_000.0;

/// A proportion with its Wilson-score interval.
///
/// `rate`, `lower` and `upper` are proportions in `[0, 1]`; formatting as a
/// percentage happens in the table layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateEstimate {
    pub category: ArcStr,
    pub count: u64,
    pub total: u64,
    pub rate: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Point estimate plus Wilson interval for one category.
pub fn rate_estimate(
    category: impl Into<ArcStr>,
    count: u64,
    total: u64,
    confidence: f64,
) -> RateEstimate {
    let (lower, upper) = wilson_interval(count, total, confidence);
    let rate = if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    };
    RateEstimate {
        category: category.into(),
        count,
        total,
        rate,
        lower,
        upper,
    }
}

/// Two-sided Wilson score interval for a binomial proportion.
///
/// Unlike the Wald interval, the Wilson interval stays inside `[0, 1]` near
/// the extremes and always contains the point estimate. A zero denominator
/// yields `(0, 0)`: there is nothing to estimate, which is not an error.
pub fn wilson_interval(successes: u64, trials: u64, confidence: f64) -> (f64, f64) {
    if trials == 0 {
        return (0.0, 0.0);
    }
    let n = trials as f64;
    let p_hat = successes as f64 / n;
    let z = Normal::new(0.0, 1.0)
        .unwrap()
        .inverse_cdf(1.0 - (1.0 - confidence) / 2.0);
    let denominator = 1.0 + z * z / n;
    let centre = (p_hat + z * z / (2.0 * n)) / denominator;
    let margin = z * ((p_hat * (1.0 - p_hat) + z * z / (4.0 * n)) / n).sqrt() / denominator;
    ((centre - margin).max(0.0), (centre + margin).min(1.0))
}

/// Diagnoses per 100,000 population.
///
/// A zero population would silently manufacture an infinite rate, so it is
/// rejected instead.
pub fn per_capita_rate(
    jurisdiction: &str,
    count: u64,
    population: u64,
) -> Result<f64, ContractViolation> {
    if population == 0 {
        return Err(ContractViolation::NonPositivePopulation {
            jurisdiction: jurisdiction.into(),
            population,
        });
    }
    Ok(count as f64 / population as f64 * PER_CAPITA_BASE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TestKind {
    ChiSquare,
    ZTest,
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TestKind::ChiSquare => f.write_str("chi-square"),
            TestKind::ZTest => f.write_str("z-test"),
        }
    }
}

/// Outcome of one hypothesis test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub kind: TestKind,
    pub statistic: f64,
    /// Degrees of freedom; chi-square only.
    pub df: Option<u64>,
    pub p_value: f64,
    /// Whether `p_value` fell below the configured threshold.
    pub significant: bool,
}

impl TestResult {
    pub fn outcome_label(&self) -> &'static str {
        if self.significant {
            "Significant"
        } else {
            "Not Significant"
        }
    }
}

/// Chi-square test of independence over an r×c table of counts.
///
/// Rows and columns must all have positive marginals: an all-zero row or
/// column makes the expected counts zero and the statistic meaningless, so
/// the test refuses to run rather than reporting nonsense. With one degree
/// of freedom the Yates continuity correction is applied, matching the
/// convention of the analyses these tables are published against.
pub fn chi_square_independence(
    table: &[Vec<u64>],
    alpha: f64,
) -> Result<TestResult, ContractViolation> {
    let rows = table.len();
    let cols = table.first().map(Vec::len).unwrap_or(0);
    if rows < 2 || cols < 2 {
        return Err(ContractViolation::ContingencyTooSmall { rows, cols });
    }

    let mut row_sums = vec![0u64; rows];
    let mut col_sums = vec![0u64; cols];
    for (i, row) in table.iter().enumerate() {
        if row.len() != cols {
            return Err(ContractViolation::RaggedRow {
                row: i,
                got: row.len(),
                expected: cols,
            });
        }
        for (j, &count) in row.iter().enumerate() {
            row_sums[i] += count;
            col_sums[j] += count;
        }
    }
    if let Some(i) = row_sums.iter().position(|&s| s == 0) {
        return Err(ContractViolation::ZeroRowMarginal(i));
    }
    if let Some(j) = col_sums.iter().position(|&s| s == 0) {
        return Err(ContractViolation::ZeroColumnMarginal(j));
    }

    let grand: u64 = row_sums.iter().sum();
    let grand = grand as f64;
    let df = ((rows - 1) * (cols - 1)) as u64;
    let yates = df == 1;
    let mut statistic = 0.0;
    for (i, row) in table.iter().enumerate() {
        for (j, &observed) in row.iter().enumerate() {
            let expected = row_sums[i] as f64 * col_sums[j] as f64 / grand;
            let mut delta = (observed as f64 - expected).abs();
            if yates {
                delta = (delta - 0.5).max(0.0);
            }
            statistic += delta * delta / expected;
        }
    }

    let p_value = 1.0 - ChiSquared::new(df as f64).unwrap().cdf(statistic);
    Ok(TestResult {
        kind: TestKind::ChiSquare,
        statistic,
        df: Some(df),
        p_value,
        significant: p_value < alpha,
    })
}

/// Two-tailed z-test of an observed proportion against a reference.
///
/// The reference must lie strictly inside (0, 1). A zero sample carries no
/// information either way; the documented degenerate result is
/// `z = 0, p = 1` rather than a division by zero.
pub fn z_test_proportion(
    successes: u64,
    trials: u64,
    reference: f64,
    alpha: f64,
) -> Result<TestResult, ContractViolation> {
    if !(reference > 0.0 && reference < 1.0) {
        return Err(ContractViolation::ReferenceProportionOutOfRange(reference));
    }
    if trials == 0 {
        return Ok(TestResult {
            kind: TestKind::ZTest,
            statistic: 0.0,
            df: None,
            p_value: 1.0,
            significant: false,
        });
    }
    let n = trials as f64;
    let p_hat = successes as f64 / n;
    let se = (reference * (1.0 - reference) / n).sqrt();
    let z = (p_hat - reference) / se;
    let p_value = 2.0 * (1.0 - Normal::new(0.0, 1.0).unwrap().cdf(z.abs()));
    Ok(TestResult {
        kind: TestKind::ZTest,
        statistic: z,
        df: None,
        p_value,
        significant: p_value < alpha,
    })
}

/// Journal display convention for p-values: three decimals, with everything
/// below 0.001 rendered as "<0.001".
pub fn format_pvalue(p: f64) -> String {
    if p < 0.001 {
        "<0.001".to_string()
    } else {
        format!("{:.3}", p)
    }
}

#[cfg(test)]
mod test {
    use super::{
        chi_square_independence, format_pvalue, per_capita_rate, rate_estimate, wilson_interval,
        z_test_proportion, TestKind,
    };
    use crate::error::ContractViolation;

    const EPS: f64 = 1e-12;

    #[test]
    fn wilson_contains_the_point_estimate() {
        for n in [1u64, 2, 7, 50, 333] {
            for x in 0..=n {
                let (lower, upper) = wilson_interval(x, n, 0.95);
                let p_hat = x as f64 / n as f64;
                assert!(lower >= 0.0 && upper <= 1.0, "x={x} n={n}: ({lower}, {upper})");
                assert!(lower <= p_hat + EPS, "x={x} n={n}: lower {lower} > {p_hat}");
                assert!(upper >= p_hat - EPS, "x={x} n={n}: upper {upper} < {p_hat}");
                assert!(lower <= upper);
            }
        }
    }

    #[test]
    fn wilson_zero_denominator() {
        assert_eq!(wilson_interval(0, 0, 0.95), (0.0, 0.0));
    }

    #[test]
    fn wilson_published_example() {
        // 5 of 50 (a "10 or fewer" cell imputed to 5): 10.0% (4.4% - 21.4%)
        let estimate = rate_estimate("Gabapentin", 5, 50, 0.95);
        assert!((estimate.rate - 0.10).abs() < EPS);
        assert!((estimate.lower - 0.044).abs() < 1e-3, "lower {}", estimate.lower);
        assert!((estimate.upper - 0.214).abs() < 1e-3, "upper {}", estimate.upper);
    }

    #[test]
    fn per_capita_checks_population() {
        let rate = per_capita_rate("Ohio", 500, 1_000_000).unwrap();
        assert!((rate - 50.0).abs() < EPS);
        let err = per_capita_rate("Nowhere", 1, 0).unwrap_err();
        assert!(matches!(
            err,
            ContractViolation::NonPositivePopulation { population: 0, .. }
        ));
    }

    #[test]
    fn chi_square_known_value() {
        // row sums 30/30/30, col sums 45/45, expected 15 everywhere:
        // statistic = 6 * 25 / 15 = 6.667, df = 2, p = exp(-10/3) = 0.0357
        let table = vec![vec![20, 10], vec![15, 15], vec![10, 20]];
        let result = chi_square_independence(&table, 0.05).unwrap();
        assert_eq!(result.kind, TestKind::ChiSquare);
        assert_eq!(result.df, Some(2));
        assert!((result.statistic - 100.0 / 15.0).abs() < 1e-9);
        assert!((result.p_value - 0.035674).abs() < 1e-5, "p {}", result.p_value);
        assert!(result.significant);
    }

    #[test]
    fn chi_square_uniform_table_is_not_significant() {
        // df = 1 engages the continuity correction; a perfectly uniform
        // table still comes out at zero
        let table = vec![vec![10, 10], vec![10, 10]];
        let result = chi_square_independence(&table, 0.05).unwrap();
        assert_eq!(result.df, Some(1));
        assert!(result.statistic.abs() < EPS);
        assert!((result.p_value - 1.0).abs() < 1e-9);
        assert!(!result.significant);
    }

    #[test]
    fn chi_square_rejects_degenerate_tables() {
        let zero_column = vec![vec![5, 0], vec![9, 0]];
        assert_eq!(
            chi_square_independence(&zero_column, 0.05).unwrap_err(),
            ContractViolation::ZeroColumnMarginal(1)
        );
        let zero_row = vec![vec![0, 0], vec![9, 4]];
        assert_eq!(
            chi_square_independence(&zero_row, 0.05).unwrap_err(),
            ContractViolation::ZeroRowMarginal(0)
        );
        let too_small = vec![vec![5, 5]];
        assert!(matches!(
            chi_square_independence(&too_small, 0.05).unwrap_err(),
            ContractViolation::ContingencyTooSmall { rows: 1, cols: 2 }
        ));
        let ragged = vec![vec![5, 5], vec![5]];
        assert!(matches!(
            chi_square_independence(&ragged, 0.05).unwrap_err(),
            ContractViolation::RaggedRow { row: 1, .. }
        ));
    }

    #[test]
    fn z_test_known_value() {
        // 60/100 vs 0.5: se = 0.05, z = 2, p = 0.0455
        let result = z_test_proportion(60, 100, 0.5, 0.05).unwrap();
        assert_eq!(result.kind, TestKind::ZTest);
        assert_eq!(result.df, None);
        assert!((result.statistic - 2.0).abs() < 1e-9);
        assert!((result.p_value - 0.045500).abs() < 1e-5, "p {}", result.p_value);
        assert!(result.significant);
    }

    #[test]
    fn z_test_zero_sample_is_defined() {
        let result = z_test_proportion(0, 0, 0.3, 0.05).unwrap();
        assert_eq!(result.statistic, 0.0);
        assert_eq!(result.p_value, 1.0);
        assert!(!result.significant);
    }

    #[test]
    fn z_test_rejects_bad_reference() {
        for reference in [0.0, 1.0, -0.2, 1.7] {
            assert!(matches!(
                z_test_proportion(5, 50, reference, 0.05).unwrap_err(),
                ContractViolation::ReferenceProportionOutOfRange(_)
            ));
        }
    }

    #[test]
    fn p_value_display_convention() {
        assert_eq!(format_pvalue(0.0004), "<0.001");
        assert_eq!(format_pvalue(0.001), "0.001");
        assert_eq!(format_pvalue(0.0421), "0.042");
        assert_eq!(format_pvalue(0.5), "0.500");
        assert_eq!(format_pvalue(1.0), "1.000");
    }
}
