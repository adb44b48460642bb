//! Join per-jurisdiction counts to census regions and sum.

use crate::{
    geo::{CensusRegion, Geography},
    ArcStr, StateRecords,
};
use qu::ick_use::*;
use serde::Serialize;
use std::collections::BTreeMap;

/// Summed counts for one census region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionAggregate {
    pub region: CensusRegion,
    /// Total patients across the region's jurisdictions.
    pub total: u64,
    /// Canonical category label → summed count.
    pub counts: BTreeMap<ArcStr, u64>,
}

/// All regional sums plus the jurisdictions that could not be mapped.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionRollup {
    /// One aggregate per region present in the data, in region order.
    pub regions: Vec<RegionAggregate>,
    /// Jurisdictions with no region in the reference, excluded from the
    /// sums. Sorted by name.
    pub unmapped: Vec<ArcStr>,
}

impl RegionRollup {
    pub fn get(&self, region: CensusRegion) -> Option<&RegionAggregate> {
        self.regions.iter().find(|agg| agg.region == region)
    }

    /// Sum of the regional patient totals.
    pub fn grand_total(&self) -> u64 {
        self.regions.iter().map(|agg| agg.total).sum()
    }

    /// Sum of one category across all regions.
    pub fn category_total(&self, category: &str) -> u64 {
        self.regions
            .iter()
            .filter_map(|agg| agg.counts.get(category))
            .sum()
    }

    /// Whether any region carries a count (even zero) for the category.
    pub fn has_category(&self, category: &str) -> bool {
        self.regions
            .iter()
            .any(|agg| agg.counts.contains_key(category))
    }

    /// Region × category count matrix for the hypothesis-test engine.
    /// Rows follow `self.regions`; columns follow `categories`. Categories a
    /// region never saw contribute zero.
    pub fn contingency_table(&self, categories: &[ArcStr]) -> Vec<Vec<u64>> {
        self.regions
            .iter()
            .map(|agg| {
                categories
                    .iter()
                    .map(|category| agg.counts.get(category).copied().unwrap_or(0))
                    .collect()
            })
            .collect()
    }
}

/// Group the records by census region and sum each category.
///
/// Jurisdictions absent from the reference are excluded from the sums and
/// returned in `unmapped` so the caller decides whether the omission is
/// acceptable; they are never dropped silently. Summation is associative, so
/// the input order never changes the result.
pub fn aggregate_by_region(records: &StateRecords, geo: &Geography) -> RegionRollup {
    // B Tree so regions come out in a predictable order.
    let mut by_region: BTreeMap<CensusRegion, RegionAggregate> = BTreeMap::new();
    let mut unmapped = Vec::new();
    for record in records.iter_ref() {
        let region = match geo.region(&record.state) {
            Some(region) => region,
            None => {
                event!(Level::WARN, "no census region on record for {}", record.state);
                unmapped.push(record.state.clone());
                continue;
            }
        };
        let agg = by_region.entry(region).or_insert_with(|| RegionAggregate {
            region,
            total: 0,
            counts: BTreeMap::new(),
        });
        agg.total += record.total;
        for (category, count) in &record.counts {
            *agg.counts.entry(category.clone()).or_insert(0) += count;
        }
    }
    unmapped.sort();
    RegionRollup {
        regions: by_region.into_values().collect(),
        unmapped,
    }
}

/// Reconciliation of a computed grand total against an expected figure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalsCheck {
    pub calculated: u64,
    pub expected: u64,
    pub percent_difference: f64,
    pub within_tolerance: bool,
}

/// Compare a calculated total with an expected one, allowing `tolerance`
/// (a fraction, e.g. 0.05 for 5%) of drift before flagging it.
pub fn validate_totals(calculated: u64, expected: u64, tolerance: f64) -> TotalsCheck {
    let percent_difference = if expected == 0 {
        0.0
    } else {
        (calculated as f64 - expected as f64).abs() / expected as f64 * 100.0
    };
    TotalsCheck {
        calculated,
        expected,
        percent_difference,
        within_tolerance: percent_difference <= tolerance * 100.0,
    }
}
