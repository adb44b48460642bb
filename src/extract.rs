//! Read Epic-style spreadsheet exports into long-form count rows.
//!
//! The exports open with a block of metadata rows, then a header row, then
//! data in which the jurisdiction column is blank for every row after the
//! first of a merged-cell group. Column resolution is an explicit contract;
//! when the contract does not name a count column, a best-effort inference
//! pass picks one and logs which column it picked.

use crate::{clean::normalize_label, ArcStr, CellValue, Context, CountRow, Result};
use calamine::{open_workbook_auto, DataType, Reader};
use qu::ick_use::*;
use std::path::Path;

/// Metadata rows an export carries before the header row.
pub const DEFAULT_METADATA_ROWS: usize = 10;

/// How many data cells the count-column inference samples per column.
const INFERENCE_SAMPLE: usize = 10;

/// Which columns of an export hold what.
///
/// Column names are matched after [`normalize_label`], so `"State of
/// Residence"` in the contract matches `"state of residence"` in the sheet.
#[derive(Debug, Clone)]
pub struct SheetContract {
    pub jurisdiction_column: ArcStr,
    pub category_column: ArcStr,
    /// When `None`, the count column is inferred by sampling values.
    pub count_column: Option<ArcStr>,
    /// Metadata rows before the header row.
    pub metadata_rows: usize,
    /// Suppression token recognised by the inference pass.
    pub sentinel: ArcStr,
}

impl SheetContract {
    pub fn new(jurisdiction_column: &str, category_column: &str) -> Self {
        SheetContract {
            jurisdiction_column: jurisdiction_column.into(),
            category_column: category_column.into(),
            count_column: None,
            metadata_rows: DEFAULT_METADATA_ROWS,
            sentinel: crate::clean::SUPPRESSION_SENTINEL.into(),
        }
    }

    pub fn with_count_column(mut self, name: &str) -> Self {
        self.count_column = Some(name.into());
        self
    }

    pub fn with_metadata_rows(mut self, rows: usize) -> Self {
        self.metadata_rows = rows;
        self
    }

    pub fn with_sentinel(mut self, sentinel: &str) -> Self {
        self.sentinel = sentinel.into();
        self
    }
}

/// Read the first worksheet of an export into long-form rows.
pub fn read_export(path: impl AsRef<Path>, contract: &SheetContract) -> Result<Vec<CountRow>> {
    let path = path.as_ref();
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("unable to open \"{}\"", path.display()))?;
    let sheet_names = workbook.sheet_names().to_owned();
    let first = sheet_names
        .first()
        .cloned()
        .ok_or_else(|| format_err!("workbook has no sheets"))?;
    let range = workbook
        .worksheet_range(&first)
        .ok_or_else(|| format_err!("missing worksheet \"{}\"", first))?
        .with_context(|| format!("unable to read worksheet \"{}\"", first))?;
    let cells: Vec<Vec<DataType>> = range.rows().map(|row| row.to_vec()).collect();
    rows_from_cells(&cells, contract)
        .with_context(|| format!("while extracting \"{}\"", path.display()))
}

/// Extraction over an in-memory cell grid; `read_export` is a thin file
/// wrapper around this.
pub fn rows_from_cells(cells: &[Vec<DataType>], contract: &SheetContract) -> Result<Vec<CountRow>> {
    let (header_idx, headers) = find_header_row(cells, contract)?;

    let jurisdiction_idx = column_position(&headers, &contract.jurisdiction_column)
        .ok_or_else(|| {
            format_err!(
                "no \"{}\" column; headers are {:?}",
                contract.jurisdiction_column,
                headers
            )
        })?;
    let category_idx = column_position(&headers, &contract.category_column).ok_or_else(|| {
        format_err!(
            "no \"{}\" column; headers are {:?}",
            contract.category_column,
            headers
        )
    })?;
    let data = &cells[header_idx + 1..];
    let count_idx = match &contract.count_column {
        Some(name) => column_position(&headers, name)
            .ok_or_else(|| format_err!("no \"{}\" column; headers are {:?}", name, headers))?,
        None => {
            let idx = infer_count_column(data, &headers, jurisdiction_idx, category_idx, contract)
                .ok_or_else(|| format_err!("could not infer a count column from {:?}", headers))?;
            event!(
                Level::WARN,
                "count column not named in the contract; inferred \"{}\"",
                headers[idx]
            );
            idx
        }
    };

    let mut rows = Vec::with_capacity(data.len());
    for row in data {
        let state = match row.get(jurisdiction_idx) {
            Some(DataType::String(s)) if !s.trim().is_empty() => Some(ArcStr::from(s.trim())),
            _ => None,
        };
        let category = match row.get(category_idx) {
            Some(DataType::String(s)) if !s.trim().is_empty() => ArcStr::from(s.trim()),
            _ => {
                // an all-empty filler row, not data
                continue;
            }
        };
        let value = row.get(count_idx).map(cell_value).unwrap_or(CellValue::Empty);
        rows.push(CountRow {
            state,
            category,
            value,
        });
    }
    Ok(rows)
}

/// Locate the header row: the contract's index first, then a forward scan as
/// a fallback for exports whose metadata block grew.
fn find_header_row<'a>(
    cells: &'a [Vec<DataType>],
    contract: &SheetContract,
) -> Result<(usize, Vec<String>)> {
    let wanted = normalize_label(&contract.jurisdiction_column);
    let header_of = |row: &'a [DataType]| -> Vec<String> {
        row.iter().map(|cell| cell.to_string()).collect()
    };
    if let Some(row) = cells.get(contract.metadata_rows) {
        let headers = header_of(row);
        if headers.iter().any(|h| normalize_label(h) == wanted) {
            return Ok((contract.metadata_rows, headers));
        }
    }
    for (idx, row) in cells.iter().enumerate() {
        let headers = header_of(row);
        if headers.iter().any(|h| normalize_label(h) == wanted) {
            event!(
                Level::WARN,
                "header row found at row {}, expected row {}",
                idx,
                contract.metadata_rows
            );
            return Ok((idx, headers));
        }
    }
    bail!(
        "no header row containing \"{}\" in the first {} rows",
        contract.jurisdiction_column,
        cells.len()
    );
}

fn column_position(headers: &[String], name: &str) -> Option<usize> {
    let wanted = normalize_label(name);
    headers
        .iter()
        .position(|header| normalize_label(header) == wanted)
}

/// Pick the first column whose sampled values look like counts: numeric, or
/// the suppression sentinel.
fn infer_count_column(
    data: &[Vec<DataType>],
    headers: &[String],
    jurisdiction_idx: usize,
    category_idx: usize,
    contract: &SheetContract,
) -> Option<usize> {
    (0..headers.len())
        .filter(|idx| *idx != jurisdiction_idx && *idx != category_idx)
        .find(|&idx| {
            data.iter()
                .filter_map(|row| row.get(idx))
                .filter(|cell| !matches!(cell, DataType::Empty))
                .take(INFERENCE_SAMPLE)
                .any(|cell| match cell {
                    DataType::Int(_) | DataType::Float(_) => true,
                    DataType::String(s) => s.trim() == &*contract.sentinel,
                    _ => false,
                })
        })
}

/// Map one spreadsheet cell to a [`CellValue`].
///
/// Whole non-negative numbers become counts; everything else stays text so
/// the cleaning passes can decide what to do with it.
pub fn cell_value(cell: &DataType) -> CellValue {
    match cell {
        DataType::Int(i) if *i >= 0 => CellValue::Count(*i as u64),
        DataType::Float(f) if *f >= 0.0 && f.fract() == 0.0 => CellValue::Count(*f as u64),
        DataType::Empty => CellValue::Empty,
        DataType::String(s) if s.trim().is_empty() => CellValue::Empty,
        DataType::String(s) => CellValue::Text(s.trim().into()),
        other => CellValue::Text(other.to_string().into()),
    }
}
