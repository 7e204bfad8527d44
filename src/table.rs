use std::fs::File;
use std::path::{Path, PathBuf};

use census::IndicatorSummary;
use polars::prelude::{CsvWriter, DataFrame, DataType, NamedFrom, PolarsError, SerWriter, Series};
use serde_json::{Map, Value};

use crate::ejscreen::json_text;

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("failed to create {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: PolarsError },
    #[error("failed to build table: {0}")]
    Frame(#[from] PolarsError),
}

/// Write `df` as CSV with a header, creating parent directories as needed.
pub fn write_csv(df: &mut DataFrame, path: &Path) -> Result<(), TableError> {
    create_parent(path)?;
    let mut file = File::create(path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    CsvWriter::new(&mut file)
        .has_header(true)
        .finish(df)
        .map_err(|source| TableError::Write {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn create_parent(path: &Path) -> Result<(), TableError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|source| TableError::Io {
                path: parent.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

/// One row per summary, columns in `IndicatorSummary::COLUMNS` order.
pub fn summaries_frame(rows: &[IndicatorSummary]) -> Result<DataFrame, TableError> {
    let mut columns: Vec<Vec<Option<String>>> =
        vec![Vec::with_capacity(rows.len()); IndicatorSummary::COLUMNS.len()];
    for row in rows {
        columns[0].push(Some(row.area_id.clone()));
        for (i, value) in row.values().into_iter().enumerate() {
            columns[i + 1].push(value.map(str::to_string));
        }
    }
    let series = IndicatorSummary::COLUMNS
        .iter()
        .zip(columns)
        .map(|(name, values)| Series::new(name, values))
        .collect::<Vec<_>>();
    Ok(DataFrame::new(series)?)
}

/// One row per record; columns are the union of keys in first-seen order.
pub fn records_frame(records: &[Map<String, Value>]) -> Result<DataFrame, TableError> {
    let mut names: Vec<&str> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !names.contains(&key.as_str()) {
                names.push(key.as_str());
            }
        }
    }
    let series = names
        .iter()
        .map(|name| {
            let values: Vec<Option<String>> = records
                .iter()
                .map(|r| r.get(*name).and_then(json_text))
                .collect();
            Series::new(name, values)
        })
        .collect::<Vec<_>>();
    Ok(DataFrame::new(series)?)
}

/// Summary statistics (count, mean, std, quartiles, min, max) of the text
/// columns whose every value parses as a number. `None` when there are none.
pub fn describe_numeric(df: &DataFrame) -> Result<Option<DataFrame>, TableError> {
    let mut numeric = Vec::new();
    for series in df.get_columns() {
        if series.null_count() == series.len() {
            continue;
        }
        let cast = series.cast(&DataType::Float64)?;
        if cast.null_count() == series.null_count() {
            numeric.push(cast);
        }
    }
    if numeric.is_empty() {
        return Ok(None);
    }
    Ok(Some(DataFrame::new(numeric)?.describe(None)?))
}
