use clap::Parser;
use itertools::Itertools;
use qu::ick_use::*;
use std::path::PathBuf;
use tn_regional_analysis::{
    aggregate,
    clean::{self, DataQualityReport},
    config::AnalysisConfig,
    geo::Geography,
    load_rows, thousands,
};

#[derive(Parser)]
struct Opt {
    /// Override analysis profile (TOML); defaults to the built-in one.
    #[clap(long)]
    config: Option<PathBuf>,
    /// Override geography roster (TOML).
    #[clap(long)]
    geography: Option<PathBuf>,
    /// Expected cohort total for reconciliation, if known.
    #[clap(long)]
    expected_total: Option<u64>,
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

    for (dataset, vocabulary) in [
        ("medications", &config.medications),
        ("procedures", &config.procedures),
    ] {
        header(&format!("Cleaning {dataset}"));
        let mut rows = load_rows(format!("{dataset}_raw.bin"))?;
        println!("raw rows: {}", rows.len());

        let mut report = DataQualityReport::default();
        report.dropped_leading_rows = clean::forward_fill_states(&mut rows);
        report.suppressed_cells = config.small_cell.impute_rows(&mut rows);
        let records = clean::pivot_records(&rows, vocabulary, &mut report)?;
        report.missing_jurisdictions = geo.missing_from(records.states().map(|s| &**s));

        println!("jurisdictions: {}", records.len());
        println!("suppressed cells imputed: {}", report.suppressed_cells);
        println!(
            "total patients: {}",
            thousands(records.total_patients())
        );
        for (state, category, text) in &report.non_numeric {
            println!("still not a count: {state} / {category} = {text:?}");
        }
        if !report.missing_jurisdictions.is_empty() {
            println!(
                "jurisdictions with no rows: {}",
                report.missing_jurisdictions.iter().join(", ")
            );
        }
        if let Some(expected) = opt.expected_total {
            let check = aggregate::validate_totals(records.total_patients(), expected, 0.05);
            println!(
                "totals check: {} vs expected {} ({:.2}% difference){}",
                check.calculated,
                check.expected,
                check.percent_difference,
                if check.within_tolerance { "" } else { " - OUT OF TOLERANCE" }
            );
        }

        records.save(format!("{dataset}_clean.bin"))?;
    }
    Ok(())
}

fn header(header: &str) {
    let len = header.len();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}
