//! Cut the national EJScreen tract file down to one jurisdiction.

use std::path::{Path, PathBuf};

use polars::prelude::{ChunkCompare, CsvReader, DataFrame, PolarsError, SerReader};

use crate::config::FilterConfig;
use crate::table;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("input file not found: {0}")]
    InputNotFound(PathBuf),
    #[error("column '{0}' not found in dataset")]
    MissingColumn(String),
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: PolarsError },
    #[error(transparent)]
    Frame(#[from] PolarsError),
    #[error(transparent)]
    Write(#[from] table::TableError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterReport {
    pub total_rows: usize,
    pub kept_rows: usize,
    pub columns: Vec<String>,
}

/// Read a CSV with every column typed as text, so ids and figures are
/// written back exactly as they came in.
pub fn read_text_csv(path: &Path) -> Result<DataFrame, FilterError> {
    if !path.exists() {
        return Err(FilterError::InputNotFound(path.to_path_buf()));
    }
    CsvReader::from_path(path)
        .and_then(|reader| reader.has_header(true).infer_schema(Some(0)).finish())
        .map_err(|source| FilterError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Column names of a CSV file, in file order. With `drop_index` the leading
/// index column is left out, as [`filter_by_state`] does.
pub fn list_columns(path: &Path, drop_index: bool) -> Result<Vec<String>, FilterError> {
    if !path.exists() {
        return Err(FilterError::InputNotFound(path.to_path_buf()));
    }
    let mut df = CsvReader::from_path(path)
        .and_then(|reader| {
            reader
                .has_header(true)
                .infer_schema(Some(0))
                .with_n_rows(Some(1))
                .finish()
        })
        .map_err(|source| FilterError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if drop_index {
        drop_index_column(&mut df, None)?;
    }
    Ok(column_names(&df))
}

/// Drop the first column unless it is `keep`.
fn drop_index_column(df: &mut DataFrame, keep: Option<&str>) -> Result<(), FilterError> {
    if let Some(index) = df.get_column_names().first().map(|c| c.to_string()) {
        if Some(index.as_str()) != keep {
            tracing::debug!(column = %index, "dropping index column");
            df.drop_in_place(&index)?;
        }
    }
    Ok(())
}

fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|c| c.to_string()).collect()
}

/// Keep the rows of `df` whose `column` equals `value`. Nulls never match.
pub fn filter_rows(df: &DataFrame, column: &str, value: &str) -> Result<DataFrame, FilterError> {
    let series = df
        .column(column)
        .map_err(|_| FilterError::MissingColumn(column.to_string()))?;
    let mask = series.utf8()?.equal(value);
    Ok(df.filter(&mask)?)
}

/// Filter the configured input to rows of a single state and write them out.
pub fn filter_by_state(config: &FilterConfig) -> Result<FilterReport, FilterError> {
    let mut df = read_text_csv(&config.input)?;

    if config.index_column {
        drop_index_column(&mut df, Some(&config.state_column))?;
    }

    let columns = column_names(&df);
    tracing::info!(count = columns.len(), "available columns");
    for column in &columns {
        tracing::debug!(column = %column, "column");
    }

    let mut filtered = filter_rows(&df, &config.state_column, &config.state_value)?;
    table::write_csv(&mut filtered, &config.output)?;

    let report = FilterReport {
        total_rows: df.height(),
        kept_rows: filtered.height(),
        columns,
    };
    tracing::info!(
        output = %config.output.display(),
        kept = report.kept_rows,
        total = report.total_rows,
        state = %config.state_value,
        "filtered data saved"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACTS: &str = "\
OBJECTID,ID,STATE_NAME,ST_ABBREV,PEOPCOLORPCT,LOWINCPCT
1,01001020100,Alabama,AL,0.21,0.18
2,11001000100,District of Columbia,DC,0.17,0.07
3,11001000201,District of Columbia,DC,0.35,0.62
4,24031700101,Maryland,MD,0.44,0.09
5,11001000202,District of Columbia,DC,,0.11
6,51013101100,Virginia,,0.30,0.12
";

    fn config(dir: &Path) -> FilterConfig {
        let input = dir.join("tracts.csv");
        std::fs::write(&input, TRACTS).unwrap();
        FilterConfig {
            input,
            output: dir.join("processed/track/dc.csv"),
            ..FilterConfig::default()
        }
    }

    #[test]
    fn keeps_only_target_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        let report = filter_by_state(&config).unwrap();
        assert_eq!(report.total_rows, 6);
        assert_eq!(report.kept_rows, 3);
        assert!(report.kept_rows <= report.total_rows);
        assert!(!report.columns.contains(&"OBJECTID".to_string()));

        let out = read_text_csv(&config.output).unwrap();
        assert_eq!(out.height(), 3);
        let states = out.column("ST_ABBREV").unwrap().utf8().unwrap();
        assert!(states.into_iter().all(|s| s == Some("DC")));
    }

    #[test]
    fn identifiers_keep_leading_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.state_value = "AL".to_string();

        filter_by_state(&config).unwrap();
        let written = std::fs::read_to_string(&config.output).unwrap();
        assert!(written.starts_with("ID,STATE_NAME,ST_ABBREV"));
        assert!(written.contains("01001020100"));
    }

    #[test]
    fn index_column_can_be_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.index_column = false;

        let report = filter_by_state(&config).unwrap();
        assert_eq!(report.columns[0], "OBJECTID");
    }

    #[test]
    fn unknown_state_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.state_value = "GU".to_string();

        let report = filter_by_state(&config).unwrap();
        assert_eq!(report.kept_rows, 0);
        assert!(config.output.exists());
    }

    #[test]
    fn missing_column_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.state_column = "STATE".to_string();

        let err = filter_by_state(&config).unwrap_err();
        assert!(matches!(err, FilterError::MissingColumn(ref c) if c == "STATE"));
        assert!(!config.output.exists());
    }

    #[test]
    fn missing_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = FilterConfig {
            input: dir.path().join("absent.csv"),
            ..FilterConfig::default()
        };
        assert!(matches!(
            filter_by_state(&config),
            Err(FilterError::InputNotFound(_))
        ));
    }

    #[test]
    fn lists_header_columns() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let columns = list_columns(&config.input, false).unwrap();
        assert_eq!(
            columns,
            vec!["OBJECTID", "ID", "STATE_NAME", "ST_ABBREV", "PEOPCOLORPCT", "LOWINCPCT"]
        );
    }

    #[test]
    fn listed_columns_match_filtered_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let listed = list_columns(&config.input, config.index_column).unwrap();
        assert_eq!(listed[0], "ID");

        let report = filter_by_state(&config).unwrap();
        assert_eq!(listed, report.columns);
    }
}
