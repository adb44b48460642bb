//! Geography reference: census regions, populations and postal
//! abbreviations for the 51 reporting jurisdictions (50 states plus the
//! District of Columbia).
//!
//! The reference is ordinary data, not global state: build the default with
//! [`Geography::us_census`] and pass it into whatever needs it, or load a
//! replacement roster from a TOML file to reuse the pipeline against a
//! different geography or population vintage.

use crate::{ArcStr, Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, fs, path::Path};

/// One of the nine US census divisions.
///
/// Ordering is arbitrary; it exists so regions can key `BTreeMap`s with a
/// predictable iteration order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CensusRegion {
    #[serde(rename = "New England")]
    NewEngland,
    #[serde(rename = "Middle Atlantic")]
    MiddleAtlantic,
    #[serde(rename = "East North Central")]
    EastNorthCentral,
    #[serde(rename = "West North Central")]
    WestNorthCentral,
    #[serde(rename = "South Atlantic")]
    SouthAtlantic,
    #[serde(rename = "East South Central")]
    EastSouthCentral,
    #[serde(rename = "West South Central")]
    WestSouthCentral,
    #[serde(rename = "Mountain")]
    Mountain,
    #[serde(rename = "Pacific")]
    Pacific,
}

impl CensusRegion {
    pub const ALL: [CensusRegion; 9] = [
        CensusRegion::NewEngland,
        CensusRegion::MiddleAtlantic,
        CensusRegion::EastNorthCentral,
        CensusRegion::WestNorthCentral,
        CensusRegion::SouthAtlantic,
        CensusRegion::EastSouthCentral,
        CensusRegion::WestSouthCentral,
        CensusRegion::Mountain,
        CensusRegion::Pacific,
    ];

    pub fn label(self) -> &'static str {
        use CensusRegion::*;
        match self {
            NewEngland => "New England",
            MiddleAtlantic => "Middle Atlantic",
            EastNorthCentral => "East North Central",
            WestNorthCentral => "West North Central",
            SouthAtlantic => "South Atlantic",
            EastSouthCentral => "East South Central",
            WestSouthCentral => "West South Central",
            Mountain => "Mountain",
            Pacific => "Pacific",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.label() == label)
    }
}

impl fmt::Display for CensusRegion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

// 2024 Census Bureau estimates, one row per jurisdiction:
// (name, postal abbreviation, population, census division).
const US_JURISDICTIONS: &[(&str, &str, u64, CensusRegion)] = &[
    ("Alabama", "AL", 5_108_468, CensusRegion::EastSouthCentral),
    ("Alaska", "AK", 733_406, CensusRegion::Pacific),
    ("Arizona", "AZ", 7_431_344, CensusRegion::Mountain),
    ("Arkansas", "AR", 3_067_732, CensusRegion::WestSouthCentral),
    ("California", "CA", 38_965_193, CensusRegion::Pacific),
    ("Colorado", "CO", 5_877_610, CensusRegion::Mountain),
    ("Connecticut", "CT", 3_617_176, CensusRegion::NewEngland),
    ("Delaware", "DE", 1_031_890, CensusRegion::SouthAtlantic),
    ("District of Columbia", "DC", 678_972, CensusRegion::SouthAtlantic),
    ("Florida", "FL", 23_372_215, CensusRegion::SouthAtlantic),
    ("Georgia", "GA", 11_029_227, CensusRegion::SouthAtlantic),
    ("Hawaii", "HI", 1_435_138, CensusRegion::Pacific),
    ("Idaho", "ID", 1_964_726, CensusRegion::Mountain),
    ("Illinois", "IL", 12_516_863, CensusRegion::EastNorthCentral),
    ("Indiana", "IN", 6_862_199, CensusRegion::EastNorthCentral),
    ("Iowa", "IA", 3_207_004, CensusRegion::WestNorthCentral),
    ("Kansas", "KS", 2_940_546, CensusRegion::WestNorthCentral),
    ("Kentucky", "KY", 4_526_154, CensusRegion::EastSouthCentral),
    ("Louisiana", "LA", 4_573_749, CensusRegion::WestSouthCentral),
    ("Maine", "ME", 1_395_722, CensusRegion::NewEngland),
    ("Maryland", "MD", 6_180_253, CensusRegion::SouthAtlantic),
    ("Massachusetts", "MA", 7_001_399, CensusRegion::NewEngland),
    ("Michigan", "MI", 10_037_261, CensusRegion::EastNorthCentral),
    ("Minnesota", "MN", 5_737_915, CensusRegion::WestNorthCentral),
    ("Mississippi", "MS", 2_939_690, CensusRegion::EastSouthCentral),
    ("Missouri", "MO", 6_196_156, CensusRegion::WestNorthCentral),
    ("Montana", "MT", 1_132_812, CensusRegion::Mountain),
    ("Nebraska", "NE", 1_978_379, CensusRegion::WestNorthCentral),
    ("Nevada", "NV", 3_194_176, CensusRegion::Mountain),
    ("New Hampshire", "NH", 1_402_054, CensusRegion::NewEngland),
    ("New Jersey", "NJ", 9_290_841, CensusRegion::MiddleAtlantic),
    ("New Mexico", "NM", 2_114_371, CensusRegion::Mountain),
    ("New York", "NY", 19_571_216, CensusRegion::MiddleAtlantic),
    ("North Carolina", "NC", 10_835_491, CensusRegion::SouthAtlantic),
    ("North Dakota", "ND", 783_926, CensusRegion::WestNorthCentral),
    ("Ohio", "OH", 11_785_935, CensusRegion::EastNorthCentral),
    ("Oklahoma", "OK", 4_053_824, CensusRegion::WestSouthCentral),
    ("Oregon", "OR", 4_233_358, CensusRegion::Pacific),
    ("Pennsylvania", "PA", 12_961_683, CensusRegion::MiddleAtlantic),
    ("Rhode Island", "RI", 1_095_962, CensusRegion::NewEngland),
    ("South Carolina", "SC", 5_373_555, CensusRegion::SouthAtlantic),
    ("South Dakota", "SD", 919_318, CensusRegion::WestNorthCentral),
    ("Tennessee", "TN", 7_126_489, CensusRegion::EastSouthCentral),
    ("Texas", "TX", 30_503_301, CensusRegion::WestSouthCentral),
    ("Utah", "UT", 3_417_734, CensusRegion::Mountain),
    ("Vermont", "VT", 647_464, CensusRegion::NewEngland),
    ("Virginia", "VA", 8_683_619, CensusRegion::SouthAtlantic),
    ("Washington", "WA", 7_812_880, CensusRegion::Pacific),
    ("West Virginia", "WV", 1_770_071, CensusRegion::SouthAtlantic),
    ("Wisconsin", "WI", 5_910_955, CensusRegion::EastNorthCentral),
    ("Wyoming", "WY", 584_057, CensusRegion::Mountain),
];

static US_CENSUS: Lazy<Geography> = Lazy::new(|| {
    let mut regions = BTreeMap::new();
    let mut populations = BTreeMap::new();
    let mut abbreviations = BTreeMap::new();
    for (name, abbrev, population, region) in US_JURISDICTIONS.iter().copied() {
        let name = ArcStr::from(name);
        regions.insert(name.clone(), region);
        populations.insert(name.clone(), population);
        abbreviations.insert(name, ArcStr::from(abbrev));
    }
    Geography {
        population_year: 2024,
        regions,
        populations,
        abbreviations,
    }
});

/// The jurisdiction → region / population / abbreviation reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geography {
    /// Census vintage the population denominators come from.
    pub population_year: u16,
    regions: BTreeMap<ArcStr, CensusRegion>,
    populations: BTreeMap<ArcStr, u64>,
    #[serde(default)]
    abbreviations: BTreeMap<ArcStr, ArcStr>,
}

impl Geography {
    /// The built-in US roster: 2024 Census Bureau population estimates and
    /// the nine census divisions.
    pub fn us_census() -> Self {
        US_CENSUS.clone()
    }

    /// Load a replacement roster from a TOML file.
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read \"{}\"", path.display()))?;
        let geo: Geography = toml::from_str(&contents)
            .with_context(|| format!("invalid geography file \"{}\"", path.display()))?;
        anyhow::ensure!(
            !geo.regions.is_empty(),
            "geography file \"{}\" maps no jurisdictions",
            path.display()
        );
        Ok(geo)
    }

    pub fn region(&self, jurisdiction: &str) -> Option<CensusRegion> {
        self.regions.get(jurisdiction).copied()
    }

    pub fn population(&self, jurisdiction: &str) -> Option<u64> {
        self.populations.get(jurisdiction).copied()
    }

    pub fn abbreviation(&self, jurisdiction: &str) -> Option<&str> {
        self.abbreviations.get(jurisdiction).map(|a| &**a)
    }

    /// All jurisdictions in the region mapping, in name order.
    pub fn roster(&self) -> impl Iterator<Item = &ArcStr> + '_ {
        self.regions.keys()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Member jurisdictions of one census division.
    pub fn members(&self, region: CensusRegion) -> impl Iterator<Item = &ArcStr> + '_ {
        self.regions
            .iter()
            .filter(move |(_, r)| **r == region)
            .map(|(name, _)| name)
    }

    /// Roster entries with no row in the data. Supports the completeness
    /// check over the full 51-jurisdiction roster.
    pub fn missing_from<'a>(&self, present: impl IntoIterator<Item = &'a str>) -> Vec<ArcStr> {
        let present: std::collections::BTreeSet<&str> = present.into_iter().collect();
        self.roster()
            .filter(|name| !present.contains(&***name))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::{CensusRegion, Geography};

    #[test]
    fn roster_is_complete() {
        let geo = Geography::us_census();
        assert_eq!(geo.len(), 51);
        for name in geo.roster() {
            assert!(geo.region(name).is_some(), "{name} has no region");
            assert!(
                matches!(geo.population(name), Some(p) if p > 0),
                "{name} has no population"
            );
            assert_eq!(geo.abbreviation(name).map(str::len), Some(2));
        }
    }

    #[test]
    fn region_membership() {
        let geo = Geography::us_census();
        assert_eq!(geo.region("Ohio"), Some(CensusRegion::EastNorthCentral));
        assert_eq!(geo.region("Alaska"), Some(CensusRegion::Pacific));
        assert_eq!(
            geo.region("District of Columbia"),
            Some(CensusRegion::SouthAtlantic)
        );
        assert_eq!(geo.region("Puerto Rico"), None);
        let pacific: Vec<_> = geo.members(CensusRegion::Pacific).collect();
        assert_eq!(pacific.len(), 5);
        // every division has at least one member
        for region in CensusRegion::ALL {
            assert!(geo.members(region).next().is_some(), "{region} is empty");
        }
    }

    #[test]
    fn missing_jurisdictions_surface() {
        let geo = Geography::us_census();
        let present: Vec<&str> = geo
            .roster()
            .map(|s| &**s)
            .filter(|s| *s != "Ohio" && *s != "Vermont")
            .collect();
        let missing = geo.missing_from(present);
        assert_eq!(missing, vec!["Ohio".into(), "Vermont".into()]);
    }

    #[test]
    fn labels_round_trip() {
        for region in CensusRegion::ALL {
            assert_eq!(CensusRegion::from_label(region.label()), Some(region));
        }
        assert_eq!(CensusRegion::from_label("Midwest"), None);
    }
}
