use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Census geography implied by the length of a FIPS-based GEOID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoLevel {
    State,
    County,
    Tract,
    BlockGroup,
    Other,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GeoIdError {
    #[error("empty geographic identifier")]
    Empty,
}

/// A geographic identifier used as the join key between EJScreen rows and
/// TIGER/Line boundaries.
///
/// Tabular sources sometimes carry the id as a float (`11001000100.0`), so
/// parsing keeps only the part before the first `.`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GeoId(String);

impl GeoId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn level(&self) -> GeoLevel {
        if !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return GeoLevel::Other;
        }
        match self.0.len() {
            2 => GeoLevel::State,
            5 => GeoLevel::County,
            11 => GeoLevel::Tract,
            12 => GeoLevel::BlockGroup,
            _ => GeoLevel::Other,
        }
    }

    /// First two digits, the state FIPS code, when the id is numeric.
    pub fn state_fips(&self) -> Option<&str> {
        match self.level() {
            GeoLevel::Other => None,
            _ => Some(&self.0[..2]),
        }
    }
}

impl FromStr for GeoId {
    type Err = GeoIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let id = trimmed.split('.').next().unwrap_or(trimmed).trim();
        if id.is_empty() {
            return Err(GeoIdError::Empty);
        }
        Ok(GeoId(id.to_string()))
    }
}

impl TryFrom<String> for GeoId {
    type Error = GeoIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GeoId> for String {
    fn from(id: GeoId) -> Self {
        id.0
    }
}

impl fmt::Display for GeoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Headline EJScreen indicators for one area, one row of the study output.
///
/// Values are kept as the text the API returned; the broker mixes numbers and
/// numeric strings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSummary {
    pub area_id: String,
    pub total_population: Option<String>,
    // Percent people of color
    pub percent_minority: Option<String>,
    pub per_capita_income: Option<String>,
    pub unemployment_rate: Option<String>,
    // Annual average PM2.5, ug/m3
    pub pm25_air_quality: Option<String>,
    // Daily traffic count / distance to road
    pub traffic_exposure: Option<String>,
    pub diesel_particulate_matter: Option<String>,
    pub life_expectancy: Option<String>,
}

impl IndicatorSummary {
    pub const COLUMNS: [&'static str; 9] = [
        "area_id",
        "total_population",
        "percent_minority",
        "per_capita_income",
        "unemployment_rate",
        "pm25_air_quality",
        "traffic_exposure",
        "diesel_particulate_matter",
        "life_expectancy",
    ];

    /// Indicator values in `COLUMNS` order, without the area id.
    pub fn values(&self) -> [Option<&str>; 8] {
        [
            self.total_population.as_deref(),
            self.percent_minority.as_deref(),
            self.per_capita_income.as_deref(),
            self.unemployment_rate.as_deref(),
            self.pm25_air_quality.as_deref(),
            self.traffic_exposure.as_deref(),
            self.diesel_particulate_matter.as_deref(),
            self.life_expectancy.as_deref(),
        ]
    }
}
