use clap::Parser;
use qu::ick_use::*;
use std::path::PathBuf;
use tn_regional_analysis::{
    extract::{read_export, SheetContract},
    raw_path, save_rows,
};

#[derive(Parser)]
struct Opt {
    /// Medication export workbook, relative to the raw data directory.
    #[clap(long, default_value = "TN Medication Data.xlsx")]
    medications: PathBuf,
    /// Procedure export workbook, relative to the raw data directory.
    #[clap(long, default_value = "TN procedures only.xlsx")]
    procedures: PathBuf,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let contract = SheetContract::new("State of Residence", "All Medications");
    let rows = read_export(raw_path(&opt.medications), &contract)?;
    println!("medication rows: {}", rows.len());
    save_rows(&rows, "medications_raw.bin")?;

    let contract = SheetContract::new("State of Residence", "Procedure");
    let rows = read_export(raw_path(&opt.procedures), &contract)?;
    println!("procedure rows: {}", rows.len());
    save_rows(&rows, "procedures_raw.bin")?;
    Ok(())
}
