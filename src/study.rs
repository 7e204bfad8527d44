//! The block group study: one broker request per block group, a fixed pause
//! between requests, and a combined table of whatever succeeded.

use std::path::PathBuf;
use std::time::Duration;

use census::IndicatorSummary;

use crate::config::Config;
use crate::getter::Getter;
use crate::table::{self, TableError};

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub rows: Vec<IndicatorSummary>,
    /// Area id and error message of every skipped request.
    pub failures: Vec<(String, String)>,
}

impl BatchOutcome {
    pub fn attempted(&self) -> usize {
        self.rows.len() + self.failures.len()
    }
}

/// Fetch every id in order, sleeping `delay` between consecutive requests.
///
/// A failed request is logged and skipped; it never aborts the batch.
pub async fn fetch_block_groups<G: Getter>(
    getter: &G,
    ids: &[String],
    delay: Duration,
) -> BatchOutcome {
    let total = ids.len();
    let mut outcome = BatchOutcome::default();
    tracing::info!(total, "fetching block groups");

    for (i, id) in ids.iter().enumerate() {
        tracing::info!(area_id = %id, "processing {}/{}", i + 1, total);
        match getter.block_group(id).await {
            Ok(report) => outcome.rows.push(report.summary(id)),
            Err(e) => {
                tracing::warn!(area_id = %id, error = %e, "failed to fetch block group");
                outcome.failures.push((id.clone(), e.to_string()));
            }
        }
        if i + 1 < total {
            tokio::time::sleep(delay).await;
        }
    }

    if outcome.rows.is_empty() {
        tracing::error!(total, "no data was successfully fetched");
    }
    outcome
}

#[derive(Debug, Default)]
pub struct StudyReport {
    pub batch: BatchOutcome,
    pub batch_output: Option<PathBuf>,
    pub city: Option<IndicatorSummary>,
    pub city_output: Option<PathBuf>,
}

/// Run the configured block group batch, then the city-wide report.
///
/// Outputs are only written when there is something to write; a failed city
/// request is logged, not returned.
pub async fn run_study<G: Getter>(
    getter: &G,
    config: &Config,
) -> Result<StudyReport, TableError> {
    let study = &config.study;
    let mut report = StudyReport {
        batch: fetch_block_groups(getter, &study.block_groups, config.api.request_delay()).await,
        ..StudyReport::default()
    };

    if !report.batch.rows.is_empty() {
        let mut df = table::summaries_frame(&report.batch.rows)?;
        table::write_csv(&mut df, &study.output)?;
        tracing::info!(output = %study.output.display(), rows = df.height(), "data saved");
        report.batch_output = Some(study.output.clone());
    }

    match getter.city(&study.city_name, &study.city_area_id).await {
        Ok(city) => {
            let summary = city.summary(&study.city_area_id);
            let mut df = table::summaries_frame(std::slice::from_ref(&summary))?;
            table::write_csv(&mut df, &study.city_output)?;
            tracing::info!(output = %study.city_output.display(), "data saved");
            report.city = Some(summary);
            report.city_output = Some(study.city_output.clone());
        }
        Err(e) => {
            tracing::error!(city = %study.city_name, error = %e, "failed to fetch city data");
        }
    }

    Ok(report)
}
