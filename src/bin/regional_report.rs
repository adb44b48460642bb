use clap::Parser;
use qu::ick_use::*;
use std::path::PathBuf;
use term_data_table::{Cell, Row, Table};
use tn_regional_analysis::{
    aggregate::aggregate_by_region,
    config::AnalysisConfig,
    geo::Geography,
    header,
    stats::format_pvalue,
    tables::{self, format_percent},
    tables_path, thousands, StateRecords,
};

#[derive(Parser)]
struct Opt {
    /// Override analysis profile (TOML); defaults to the built-in one.
    #[clap(long)]
    config: Option<PathBuf>,
    /// Override geography roster (TOML).
    #[clap(long)]
    geography: Option<PathBuf>,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let config = match &opt.config {
        Some(path) => AnalysisConfig::from_toml(path)?,
        None => AnalysisConfig::trigeminal_neuralgia(),
    };
    config.validate()?;
    let geo = match &opt.geography {
        Some(path) => Geography::from_toml(path)?,
        None => Geography::us_census(),
    };
    let medications = StateRecords::load("medications_clean.bin")?;
    let procedures = StateRecords::load("procedures_clean.bin")?;

    let med_rollup = aggregate_by_region(&medications, &geo);
    let proc_rollup = aggregate_by_region(&procedures, &geo);
    for state in med_rollup.unmapped.iter().chain(&proc_rollup.unmapped) {
        event!(Level::WARN, "left out of regional sums: {state}");
    }
    let total_patients = med_rollup.grand_total();

    header("Cohort by census region");
    let cohort = tables::cohort_by_region(&med_rollup);
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Census region"))
            .with_cell(Cell::from("Patients"))
            .with_cell(Cell::from("Percentage")),
    );
    for row in &cohort {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(row.region.to_string()))
                .with_cell(Cell::from(thousands(row.patients)))
                .with_cell(Cell::from(format!("{:.1}%", row.percent))),
        );
    }
    println!("{}", table);
    println!(
        "total {} patients: {} ({} - {}, {})",
        config.condition.abbreviation,
        thousands(total_patients),
        config.condition.study_start,
        config.condition.study_end,
        config.condition.data_source,
    );
    tables::write_cohort_csv(
        &cohort,
        total_patients,
        tables_path("table1_cohort_characteristics.csv".as_ref()),
    )?;

    header("National treatment utilization");
    let med_rates = tables::national_utilization(
        &med_rollup,
        &config.medications,
        total_patients,
        config.confidence,
    );
    let proc_rates = tables::national_utilization(
        &proc_rollup,
        &config.procedures,
        total_patients,
        config.confidence,
    );
    for (label, rates, decimals) in [
        ("Medications", &med_rates, config.format.medication_decimals),
        ("Procedures", &proc_rates, config.format.procedure_decimals),
    ] {
        let mut table = Table::new().with_row(
            Row::new()
                .with_cell(Cell::from(label))
                .with_cell(Cell::from("N"))
                .with_cell(Cell::from("Rate (%)"))
                .with_cell(Cell::from("95% CI")),
        );
        for rate in rates.iter() {
            table.add_row(
                Row::new()
                    .with_cell(Cell::from(rate.category.to_string()))
                    .with_cell(Cell::from(thousands(rate.count)))
                    .with_cell(Cell::from(format_percent(rate.rate, decimals)))
                    .with_cell(Cell::from(format!(
                        "({}-{})",
                        format_percent(rate.lower, decimals),
                        format_percent(rate.upper, decimals)
                    ))),
            );
        }
        println!("{}", table);
    }
    tables::write_rates_csv(
        &med_rates,
        config.format.medication_decimals,
        tables_path("table2_national_medications.csv".as_ref()),
    )?;
    tables::write_rates_csv(
        &proc_rates,
        config.format.procedure_decimals,
        tables_path("table2_national_procedures.csv".as_ref()),
    )?;

    header("Treatment rates by census region");
    let med_regional = tables::regional_rates(&med_rollup, &config.medications);
    let proc_regional = tables::regional_rates(&proc_rollup, &config.procedures);
    for (rows, decimals) in [
        (&med_regional, config.format.medication_decimals),
        (&proc_regional, config.format.procedure_decimals),
    ] {
        let mut heading = Row::new()
            .with_cell(Cell::from("Census region"))
            .with_cell(Cell::from("N Patients"));
        if let Some(first) = rows.first() {
            for (category, _) in &first.rates {
                heading = heading.with_cell(Cell::from(format!("{category} (%)")));
            }
        }
        let mut table = Table::new().with_row(heading);
        for row in rows.iter() {
            let mut cells = Row::new()
                .with_cell(Cell::from(row.region.to_string()))
                .with_cell(Cell::from(thousands(row.patients)));
            for (_, rate) in &row.rates {
                cells = cells.with_cell(Cell::from(format_percent(*rate, decimals)));
            }
            table.add_row(cells);
        }
        println!("{}", table);
    }
    tables::write_regional_rates_csv(
        &med_regional,
        config.format.medication_decimals,
        tables_path("table3_regional_medications.csv".as_ref()),
    )?;
    tables::write_regional_rates_csv(
        &proc_regional,
        config.format.procedure_decimals,
        tables_path("table3_regional_procedures.csv".as_ref()),
    )?;

    header("Statistical tests for regional variation");
    let tests = tables::regional_variation_tests(
        &med_rollup,
        &config.medications,
        &proc_rollup,
        &config.procedures,
        config.significance,
    )?;
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Test"))
            .with_cell(Cell::from("Chi-Square"))
            .with_cell(Cell::from("df"))
            .with_cell(Cell::from("P-value"))
            .with_cell(Cell::from("Result")),
    );
    for test in &tests {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(test.name.to_string()))
                .with_cell(Cell::from(format!("{:.1}", test.result.statistic)))
                .with_cell(Cell::from(
                    test.result.df.map(|df| df.to_string()).unwrap_or_default(),
                ))
                .with_cell(Cell::from(format_pvalue(test.result.p_value)))
                .with_cell(Cell::from(test.result.outcome_label())),
        );
    }
    println!("{}", table);
    tables::write_tests_csv(&tests, tables_path("table4_chisquare_tests.csv".as_ref()))?;

    header("Per-capita diagnosis rates");
    let per_capita = tables::per_capita_rates(&medications, &geo)?;
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("State"))
            .with_cell(Cell::from("Patients"))
            .with_cell(Cell::from("Population"))
            .with_cell(Cell::from("Per 100,000"))
            .with_cell(Cell::from("Census region")),
    );
    for row in &per_capita {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(row.jurisdiction.to_string()))
                .with_cell(Cell::from(thousands(row.patients)))
                .with_cell(Cell::from(thousands(row.population)))
                .with_cell(Cell::from(format!(
                    "{:.*}",
                    config.format.rate_decimals, row.per_100k
                )))
                .with_cell(Cell::from(
                    row.region.as_deref().unwrap_or("").to_string(),
                )),
        );
    }
    println!("{}", table);
    println!("population vintage: {} estimates", geo.population_year);
    tables::write_per_capita_csv(
        &per_capita,
        config.format.rate_decimals,
        tables_path("table_per_capita_rates.csv".as_ref()),
    )?;

    // First-line comparisons: the leading medication and the leading
    // procedure, each state against the national rate.
    for (records, vocabulary, decimals, artifact) in [
        (
            &medications,
            &config.medications,
            config.format.medication_decimals,
            "state_first_line_medication.csv",
        ),
        (
            &procedures,
            &config.procedures,
            config.format.procedure_decimals,
            "state_first_line_procedure.csv",
        ),
    ] {
        let Some(category) = vocabulary.reportable().next() else {
            continue;
        };
        header(&format!("{category} by state vs national average"));
        let (reference, comparisons) = tables::state_vs_national(
            records,
            category,
            &config.exclude_states,
            config.significance,
        )?;
        let mut table = Table::new().with_row(
            Row::new()
                .with_cell(Cell::from("State"))
                .with_cell(Cell::from("Rate (%)"))
                .with_cell(Cell::from("Z"))
                .with_cell(Cell::from("P-value"))
                .with_cell(Cell::from("Versus national")),
        );
        for row in &comparisons {
            let direction = if !row.result.significant {
                "Not Significantly Different"
            } else if row.above_national {
                "Significantly Above"
            } else {
                "Significantly Below"
            };
            table.add_row(
                Row::new()
                    .with_cell(Cell::from(row.jurisdiction.to_string()))
                    .with_cell(Cell::from(format_percent(row.rate, decimals)))
                    .with_cell(Cell::from(format!("{:.2}", row.result.statistic)))
                    .with_cell(Cell::from(format_pvalue(row.result.p_value)))
                    .with_cell(Cell::from(direction)),
            );
        }
        println!("{}", table);
        println!(
            "national average: {}%",
            format_percent(reference, decimals)
        );
        tables::write_state_comparison_csv(
            reference,
            &comparisons,
            decimals,
            tables_path(artifact.as_ref()),
        )?;
    }

    Ok(())
}
