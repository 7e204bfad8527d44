//! Client for the EJScreen REST broker.
//!
//! The broker answers one area per request. A report carries three JSON
//! objects of indicators: `data.demographics`, `data.main` and `extras`.
//! Values come back as a mix of numbers and numeric strings, so they are kept
//! as text.

use std::fmt;

use async_trait::async_trait;
use census::IndicatorSummary;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::ApiConfig;
use crate::getter::Getter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AreaType {
    BlockGroup,
    Tract,
    County,
    City,
    State,
}

impl AreaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AreaType::BlockGroup => "blockgroup",
            AreaType::Tract => "tract",
            AreaType::County => "county",
            AreaType::City => "city",
            AreaType::State => "state",
        }
    }
}

impl fmt::Display for AreaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AreaQuery {
    pub area_id: String,
    pub area_type: AreaType,
    /// Display name sent as `namestr`; the area id is used when absent.
    pub name: Option<String>,
}

impl AreaQuery {
    pub fn new(area_id: &str, area_type: AreaType) -> Self {
        Self {
            area_id: area_id.to_string(),
            area_type,
            name: None,
        }
    }

    pub fn block_group(area_id: &str) -> Self {
        Self::new(area_id, AreaType::BlockGroup)
    }

    pub fn city(name: &str, area_id: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::new(area_id, AreaType::City)
        }
    }

    /// Query string for the broker, in the order it documents them.
    pub fn params(&self, unit: &str) -> Vec<(&'static str, String)> {
        vec![
            ("namestr", self.name.clone().unwrap_or_else(|| self.area_id.clone())),
            ("geometry", String::new()),
            ("distance", String::new()),
            ("unit", unit.to_string()),
            ("areatype", self.area_type.as_str().to_string()),
            ("areaid", self.area_id.clone()),
            ("f", "json".to_string()),
        ]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request for {area_id} failed: {source}")]
    Request {
        area_id: String,
        source: reqwest::Error,
    },
    #[error("request for {area_id} returned {status}")]
    Status { area_id: String, status: StatusCode },
    #[error("response for {area_id} is not a report: {source}")]
    Decode {
        area_id: String,
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, Default, Deserialize)]
struct ReportData {
    demographics: Option<Map<String, Value>>,
    main: Option<Map<String, Value>>,
}

/// A decoded broker response.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct EjscreenReport {
    data: Option<ReportData>,
    extras: Option<Map<String, Value>>,
}

/// Render a JSON scalar as table text; `null` is missing.
pub fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl EjscreenReport {
    pub fn from_json(area_id: &str, body: &str) -> Result<Self, FetchError> {
        serde_json::from_str(body).map_err(|source| FetchError::Decode {
            area_id: area_id.to_string(),
            source,
        })
    }

    pub fn demographics(&self) -> Option<&Map<String, Value>> {
        self.data.as_ref().and_then(|d| d.demographics.as_ref())
    }

    pub fn main(&self) -> Option<&Map<String, Value>> {
        self.data.as_ref().and_then(|d| d.main.as_ref())
    }

    pub fn extras(&self) -> Option<&Map<String, Value>> {
        self.extras.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        [self.demographics(), self.main(), self.extras()]
            .iter()
            .all(|section| section.map_or(true, |m| m.is_empty()))
    }

    fn lookup(section: Option<&Map<String, Value>>, key: &str) -> Option<String> {
        section.and_then(|m| m.get(key)).and_then(json_text)
    }

    /// All indicators in one record; `main` overrides `demographics` and
    /// `extras` overrides both on key collisions.
    pub fn flatten(&self) -> Map<String, Value> {
        let mut flat = Map::new();
        for section in [self.demographics(), self.main(), self.extras()]
            .into_iter()
            .flatten()
        {
            for (key, value) in section {
                flat.insert(key.clone(), value.clone());
            }
        }
        flat
    }

    pub fn summary(&self, area_id: &str) -> IndicatorSummary {
        let demographics = self.demographics();
        let main = self.main();
        IndicatorSummary {
            area_id: area_id.to_string(),
            total_population: Self::lookup(demographics, "TOTALPOP"),
            percent_minority: Self::lookup(demographics, "PCT_MINORITY"),
            per_capita_income: Self::lookup(demographics, "PER_CAP_INC"),
            unemployment_rate: Self::lookup(demographics, "P_EMP_STAT_UNEMPLOYED"),
            pm25_air_quality: Self::lookup(main, "RAW_E_PM25"),
            traffic_exposure: Self::lookup(main, "RAW_E_TRAFFIC"),
            diesel_particulate_matter: Self::lookup(main, "RAW_E_DIESEL"),
            life_expectancy: Self::lookup(self.extras(), "RAW_HI_LIFEEXP"),
        }
    }
}

impl fmt::Display for EjscreenReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.summary("");
        let na = |v: &Option<String>| v.clone().unwrap_or_else(|| "N/A".to_string());
        writeln!(f, "Demographics:")?;
        writeln!(f, "  Total Population: {}", na(&s.total_population))?;
        writeln!(f, "  Percent Minority: {}%", na(&s.percent_minority))?;
        writeln!(f, "  Per Capita Income: ${}", na(&s.per_capita_income))?;
        writeln!(f, "  Unemployment Rate: {}%", na(&s.unemployment_rate))?;
        writeln!(f)?;
        writeln!(f, "Environmental Factors:")?;
        writeln!(f, "  Air Quality (PM2.5): {} µg/m³", na(&s.pm25_air_quality))?;
        writeln!(f, "  Traffic Exposure: {} vehicles/day", na(&s.traffic_exposure))?;
        writeln!(
            f,
            "  Diesel Particulate Matter: {} µg/m³",
            na(&s.diesel_particulate_matter)
        )?;
        writeln!(f)?;
        write!(
            f,
            "Health Indicator - Life Expectancy: {} years",
            na(&s.life_expectancy)
        )
    }
}

/// `Getter` backed by the live broker.
#[derive(Clone, Debug)]
pub struct EjscreenClient {
    client: reqwest::Client,
    url: String,
    unit: String,
}

impl EjscreenClient {
    pub fn new(config: &ApiConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("ejgetter/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            unit: config.unit.clone(),
        })
    }
}

#[async_trait]
impl Getter for EjscreenClient {
    async fn report(&self, query: &AreaQuery) -> Result<EjscreenReport, FetchError> {
        let area_id = &query.area_id;
        tracing::debug!(area_id = %area_id, area_type = %query.area_type, "requesting report");
        let request_error = |source| FetchError::Request {
            area_id: area_id.clone(),
            source,
        };
        let response = self
            .client
            .get(&self.url)
            .query(&query.params(&self.unit))
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                area_id: area_id.clone(),
                status,
            });
        }
        let body = response.text().await.map_err(request_error)?;
        let report = EjscreenReport::from_json(area_id, &body)?;
        if report.is_empty() {
            tracing::warn!(area_id = %area_id, "report has no indicators");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample() -> Value {
        json!({
            "data": {
                "demographics": {
                    "TOTALPOP": "1520",
                    "PCT_MINORITY": "96",
                    "PER_CAP_INC": "21034",
                    "P_EMP_STAT_UNEMPLOYED": "14"
                },
                "main": {
                    "RAW_E_PM25": "8.21",
                    "RAW_E_TRAFFIC": 1250,
                    "RAW_E_DIESEL": "0.31",
                    "TOTALPOP": "1519"
                }
            },
            "extras": {
                "RAW_HI_LIFEEXP": 68.4
            }
        })
    }

    fn api(server: &MockServer) -> ApiConfig {
        ApiConfig {
            url: format!("{}/mapper/ejscreenRESTbroker1.aspx", server.uri()),
            ..ApiConfig::default()
        }
    }

    #[test]
    fn block_group_params_use_id_as_name() {
        let params = AreaQuery::block_group("110010088022").params("9035");
        assert_eq!(params[0], ("namestr", "110010088022".to_string()));
        assert_eq!(params[3], ("unit", "9035".to_string()));
        assert_eq!(params[4], ("areatype", "blockgroup".to_string()));
        assert_eq!(params[6], ("f", "json".to_string()));
    }

    #[test]
    fn city_params_use_city_name() {
        let params = AreaQuery::city("Washington", "1150000").params("9035");
        assert_eq!(params[0], ("namestr", "Washington".to_string()));
        assert_eq!(params[4], ("areatype", "city".to_string()));
        assert_eq!(params[5], ("areaid", "1150000".to_string()));
    }

    #[test]
    fn summary_picks_headline_indicators() {
        let report: EjscreenReport = serde_json::from_value(sample()).unwrap();
        let s = report.summary("110010088022");
        assert_eq!(s.area_id, "110010088022");
        assert_eq!(s.total_population.as_deref(), Some("1520"));
        assert_eq!(s.traffic_exposure.as_deref(), Some("1250"));
        assert_eq!(s.life_expectancy.as_deref(), Some("68.4"));
    }

    #[test]
    fn flatten_lets_later_sections_win() {
        let report: EjscreenReport = serde_json::from_value(sample()).unwrap();
        let flat = report.flatten();
        assert_eq!(flat.len(), 8);
        assert_eq!(flat["TOTALPOP"], json!("1519"));
        let keys: Vec<&str> = flat.keys().map(String::as_str).collect();
        assert_eq!(keys[0], "TOTALPOP");
        assert_eq!(keys[7], "RAW_HI_LIFEEXP");
    }

    #[test]
    fn missing_sections_are_empty() {
        let report = EjscreenReport::from_json("x", r#"{"data": null}"#).unwrap();
        assert!(report.is_empty());
        assert!(report.flatten().is_empty());
        assert_eq!(report.summary("x").total_population, None);
        assert!(report.to_string().contains("Total Population: N/A"));
    }

    #[test]
    fn display_formats_summary() {
        let report: EjscreenReport = serde_json::from_value(sample()).unwrap();
        let text = report.to_string();
        assert!(text.starts_with("Demographics:\n  Total Population: 1520\n"));
        assert!(text.contains("  Per Capita Income: $21034\n"));
        assert!(text.ends_with("Life Expectancy: 68.4 years"));
    }

    #[test]
    fn non_json_is_a_decode_error() {
        let err = EjscreenReport::from_json("110010088022", "<html>busy</html>").unwrap_err();
        assert!(matches!(err, FetchError::Decode { ref area_id, .. } if area_id == "110010088022"));
    }

    #[tokio::test]
    async fn client_sends_broker_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mapper/ejscreenRESTbroker1.aspx"))
            .and(query_param("areatype", "blockgroup"))
            .and(query_param("areaid", "110010088022"))
            .and(query_param("namestr", "110010088022"))
            .and(query_param("unit", "9035"))
            .and(query_param("f", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample()))
            .expect(1)
            .mount(&server)
            .await;

        let client = EjscreenClient::new(&api(&server)).unwrap();
        let report = client.block_group("110010088022").await.unwrap();
        assert_eq!(
            report.summary("110010088022").pm25_air_quality.as_deref(),
            Some("8.21")
        );
    }

    #[tokio::test]
    async fn client_reports_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = EjscreenClient::new(&api(&server)).unwrap();
        let err = client.city("Washington", "1150000").await.unwrap_err();
        match err {
            FetchError::Status { area_id, status } => {
                assert_eq!(area_id, "1150000");
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn client_reports_unreachable_host() {
        let config = ApiConfig {
            url: "http://127.0.0.1:9/unreachable".to_string(),
            timeout_secs: 2,
            ..ApiConfig::default()
        };
        let client = EjscreenClient::new(&config).unwrap();
        let err = client.block_group("110010074011").await.unwrap_err();
        assert!(matches!(err, FetchError::Request { .. }));
    }
}
