//! Project configuration.
//!
//! Every value has a built-in default describing the Southeast Anacostia
//! study, so the pipeline runs without a config file. A TOML file can
//! override any subset:
//!
//! ```toml
//! [filter]
//! state_value = "MD"
//!
//! [api]
//! request_delay_secs = 2.0
//!
//! [study]
//! block_groups = ["240338024051", "240338024052"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use census::{GeoId, GeoLevel};
use serde::Deserialize;

use crate::plot::Colormap;

pub const DEFAULT_CONFIG_FILE: &str = "ejgetter.toml";

const RAW_DATA_DIR: &str = "data/raw";
const PROCESSED_DATA_DIR: &str = "data/processed";
const EJSCREEN_TRACT_CSV: &str = "EJScreen_2024_Tract_StatePct_with_AS_CNMI_GU_VI.csv";

pub const EJSCREEN_API_URL: &str = "https://ejscreen.epa.gov/mapper/ejscreenRESTbroker1.aspx";

/// Block groups southeast of the Anacostia River, tracts 74 through 82.
pub const BLOCK_GROUPS_ANACOSTIA: [&str; 36] = [
    "110010074011",
    "110010074012",
    "110010074021",
    "110010074022",
    "110010075011",
    "110010075012",
    "110010075021",
    "110010075022",
    "110010076011",
    "110010076012",
    "110010076021",
    "110010076022",
    "110010077011",
    "110010077012",
    "110010077021",
    "110010077022",
    "110010078011",
    "110010078012",
    "110010078021",
    "110010078022",
    "110010079011",
    "110010079012",
    "110010079021",
    "110010079022",
    "110010080011",
    "110010080012",
    "110010080021",
    "110010080022",
    "110010081011",
    "110010081012",
    "110010081021",
    "110010081022",
    "110010082011",
    "110010082012",
    "110010082021",
    "110010082022",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub filter: FilterConfig,
    pub api: ApiConfig,
    pub study: StudyConfig,
    pub merge: MergeConfig,
    pub plot: PlotConfig,
    pub tiger: TigerConfig,
}

/// State filter over the national EJScreen tract file.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub state_column: String,
    pub state_value: String,
    /// Treat the first CSV column as a row index and leave it out of the output.
    pub index_column: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            input: Path::new(RAW_DATA_DIR).join(EJSCREEN_TRACT_CSV),
            output: filtered_tract_csv(),
            state_column: "ST_ABBREV".to_string(),
            state_value: "DC".to_string(),
            index_column: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub url: String,
    pub request_delay_secs: f64,
    pub timeout_secs: u64,
    /// Distance unit code expected by the broker (9035 = miles).
    pub unit: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: EJSCREEN_API_URL.to_string(),
            request_delay_secs: 1.0,
            timeout_secs: 30,
            unit: "9035".to_string(),
        }
    }
}

impl ApiConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_secs_f64(self.request_delay_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    pub block_groups: Vec<String>,
    pub output: PathBuf,
    pub city_name: String,
    pub city_area_id: String,
    pub city_output: PathBuf,
}

impl Default for StudyConfig {
    fn default() -> Self {
        let dir = Path::new(PROCESSED_DATA_DIR).join("block_group");
        Self {
            block_groups: BLOCK_GROUPS_ANACOSTIA.iter().map(|s| s.to_string()).collect(),
            output: dir.join("anacostia_ejscreen_data.csv"),
            city_name: "Washington".to_string(),
            city_area_id: "1150000".to_string(),
            city_output: dir.join("dc_ejscreen_data.csv"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Boundary layer, `.shp` or a zipped TIGER/Line download.
    pub shapefile: PathBuf,
    pub block_group_shapefile: PathBuf,
    pub data: PathBuf,
    pub output: PathBuf,
    pub geojson: Option<PathBuf>,
    pub geoid_column: String,
    pub data_id_column: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        let shapefiles = Path::new(RAW_DATA_DIR).join("shapefiles");
        Self {
            shapefile: shapefiles
                .join("tl_2024_11_tract")
                .join("tl_2024_11_tract.shp"),
            block_group_shapefile: shapefiles.join("tl_2024_11_bg").join("tl_2024_11_bg.shp"),
            data: filtered_tract_csv(),
            output: Path::new(PROCESSED_DATA_DIR)
                .join("shapefiles")
                .join("track")
                .join("merged_shapefile.shp"),
            geojson: None,
            geoid_column: "GEOID".to_string(),
            data_id_column: "ID".to_string(),
        }
    }
}

/// Choropleth of one merged column.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub column: String,
    /// One of OrRd, Reds, Blues, Greens, viridis.
    pub colormap: String,
    pub output: PathBuf,
    /// Image width in pixels, colour bar included.
    pub width: u32,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            column: "LOWINCPCT".to_string(),
            colormap: "OrRd".to_string(),
            output: Path::new(PROCESSED_DATA_DIR)
                .join("maps")
                .join("merged_LOWINCPCT.png"),
            width: 1200,
        }
    }
}

/// Census Bureau TIGER/Line download settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TigerConfig {
    pub base_url: String,
    pub year: u16,
    pub state_fips: String,
    pub dest_dir: PathBuf,
}

impl Default for TigerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www2.census.gov/geo/tiger".to_string(),
            year: 2024,
            state_fips: "11".to_string(),
            dest_dir: Path::new(RAW_DATA_DIR).join("shapefiles"),
        }
    }
}

fn filtered_tract_csv() -> PathBuf {
    Path::new(PROCESSED_DATA_DIR)
        .join("track")
        .join(format!("DC-filtered_{EJSCREEN_TRACT_CSV}"))
}

impl Config {
    /// Load configuration from `explicit`, else `ejgetter.toml` in the
    /// working directory, else the built-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                Self::from_path(path)?
            }
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::from_path(local)?
                } else {
                    tracing::debug!("no config file, using defaults");
                    Self::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let delay = self.api.request_delay_secs;
        if !delay.is_finite() || delay < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "api.request_delay_secs must be a non-negative number, got {delay}"
            )));
        }
        if self.api.url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.url is empty".to_string()));
        }
        if self.filter.state_column.is_empty() {
            return Err(ConfigError::Invalid("filter.state_column is empty".to_string()));
        }
        if Colormap::from_name(&self.plot.colormap).is_none() {
            return Err(ConfigError::Invalid(format!(
                "plot.colormap '{}' is not supported",
                self.plot.colormap
            )));
        }
        if self.plot.width < 200 {
            return Err(ConfigError::Invalid(format!(
                "plot.width must be at least 200, got {}",
                self.plot.width
            )));
        }
        for id in &self.study.block_groups {
            let level = id.parse::<GeoId>().map(|g| g.level()).ok();
            if level != Some(GeoLevel::BlockGroup) {
                tracing::warn!(block_group = %id, "not a 12-digit block group id");
            }
        }
        Ok(())
    }
}
