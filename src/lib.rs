pub mod aggregate;
pub mod clean;
pub mod config;
mod error;
pub mod extract;
pub mod geo;
pub mod stats;
pub mod tables;
mod util;

pub use anyhow::{Context, Error};
use qu::ick_use::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs, io,
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
};

pub use crate::{
    error::ContractViolation,
    util::{header, path_exists, thousands},
};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;

/// Label under which an export carries the per-jurisdiction patient total.
pub const TOTAL_LABEL: &str = "Total";

/// One cell of an export after extraction.
///
/// Counts stay as text until the cleaning passes have dealt with the
/// suppression sentinel; whatever still cannot be read as a count after
/// that surfaces as a data-quality warning rather than failing the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellValue {
    Count(u64),
    Text(ArcStr),
    Empty,
}

impl CellValue {
    pub fn as_count(&self) -> Option<u64> {
        match self {
            CellValue::Count(n) => Some(*n),
            _ => None,
        }
    }
}

/// A long-form row of an export: one jurisdiction/category/value triple.
///
/// `state` is `None` inside a merged-cell group until the forward-fill pass
/// has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountRow {
    pub state: Option<ArcStr>,
    pub category: ArcStr,
    pub value: CellValue,
}

/// A row in the cleaned dataset: one jurisdiction with its canonical
/// category counts.
///
/// Region and population deliberately live in [`geo::Geography`] rather than
/// here, so the same records can be re-joined against a different reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub state: ArcStr,
    /// Total patients for the jurisdiction over the study period.
    pub total: u64,
    /// Canonical category label → imputed count.
    pub counts: BTreeMap<ArcStr, u64>,
}

impl StateRecord {
    pub fn count(&self, category: &str) -> Option<u64> {
        self.counts.get(category).copied()
    }
}

/// The cleaned records, with a pre-built index for the jurisdiction name.
#[derive(Debug)]
pub struct StateRecords {
    els: Arc<Vec<StateRecord>>,
    state_idx: BTreeMap<ArcStr, usize>,
}

impl StateRecords {
    pub fn new(els: Vec<StateRecord>) -> Self {
        let mut this = StateRecords {
            els: els.into(),
            state_idx: BTreeMap::new(),
        };
        this.rebuild_index();
        this
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        save(&self.els, path)
    }

    pub fn find_by_state(&self, state: &str) -> Option<&StateRecord> {
        let idx = self.state_idx.get(state)?;
        self.els.get(*idx)
    }

    /// Jurisdiction names present in the dataset, in name order.
    pub fn states(&self) -> impl Iterator<Item = &ArcStr> + '_ {
        self.state_idx.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = StateRecord> + '_ {
        self.els.iter().cloned()
    }

    pub fn iter_ref(&self) -> impl Iterator<Item = &StateRecord> + '_ {
        self.els.iter()
    }

    /// Get a `StateRecords` containing only records that match the filter.
    pub fn filter(&self, f: impl Fn(&StateRecord) -> bool) -> Self {
        self.iter().filter(|r| f(r)).collect()
    }

    /// Note this will clone the records internally if they are shared. Other
    /// clones of `self` will not be updated.
    pub fn retain(&mut self, f: impl Fn(&StateRecord) -> bool) {
        Arc::make_mut(&mut self.els).retain(f);
        self.rebuild_index();
    }

    /// Summed patient totals across all jurisdictions.
    pub fn total_patients(&self) -> u64 {
        self.els.iter().map(|r| r.total).sum()
    }

    /// Summed count for one category across all jurisdictions.
    pub fn category_total(&self, category: &str) -> u64 {
        self.els.iter().filter_map(|r| r.count(category)).sum()
    }

    fn rebuild_index(&mut self) {
        self.state_idx = self
            .els
            .iter()
            .enumerate()
            .map(|(idx, el)| (el.state.clone(), idx))
            .collect();
    }
}

impl Deref for StateRecords {
    type Target = [StateRecord];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

impl<'a> IntoIterator for &'a StateRecords {
    type IntoIter = <&'a [StateRecord] as IntoIterator>::IntoIter;
    type Item = &'a StateRecord;
    fn into_iter(self) -> Self::IntoIter {
        self.els.iter()
    }
}

impl FromIterator<StateRecord> for StateRecords {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = StateRecord>,
    {
        Self::new(iter.into_iter().collect())
    }
}

/// Load raw extracted rows saved by the import stage.
pub fn load_rows(path: impl AsRef<Path>) -> Result<Vec<CountRow>> {
    load(path)
}

/// Persist raw extracted rows for the clean stage.
pub fn save_rows(rows: &[CountRow], path: impl AsRef<Path>) -> Result {
    save(rows, path)
}

/// Load data into memory.
fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    fn inner<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        let reader = io::BufReader::new(fs::File::open(path)?);
        bincode::deserialize_from(reader).map_err(Into::into)
    }
    let path = path.as_ref();
    check_extension(path, "bin")?;
    let path = output_path(path);

    inner(&path).with_context(|| format!("unable to load data from \"{}\"", path.display()))
}

/// Save data to disk.
fn save<T: Serialize>(contents: &[T], path: impl AsRef<Path>) -> Result {
    fn inner<T: Serialize>(contents: &[T], path: &Path) -> Result {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("could not create parent")?;
        }
        if util::path_exists(path)? {
            event!(
                Level::WARN,
                "overwriting existing file at \"{}\"",
                path.display()
            );
        }
        let mut out = io::BufWriter::new(fs::File::create(path)?);
        bincode::serialize_into(&mut out, contents)?;
        Ok(())
    }
    let path = path.as_ref();
    check_extension(path, "bin")?;
    let path = output_path(path);

    inner(contents, &path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
}

/// Note: No protection from escaping the root directory.
pub fn raw_path(input: &Path) -> PathBuf {
    Path::new("data/raw").join(input)
}

/// Note: No protection from escaping the root directory.
pub fn output_path(input: &Path) -> PathBuf {
    Path::new("data/output").join(input)
}

/// Note: No protection from escaping the root directory.
pub fn tables_path(input: &Path) -> PathBuf {
    Path::new("data/tables").join(input)
}

pub fn check_extension(path: &Path, ext: &str) -> Result<()> {
    ensure!(
        matches!(path.extension(), Some(p) if p == ext),
        "filename should end with `.{}`",
        ext
    );
    Ok(())
}
