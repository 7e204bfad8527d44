//! TIGER/Line boundary downloads from the Census Bureau.

use std::fmt;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::config::TigerConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TigerLayer {
    Tract,
    BlockGroup,
}

impl TigerLayer {
    fn directory(&self) -> &'static str {
        match self {
            TigerLayer::Tract => "TRACT",
            TigerLayer::BlockGroup => "BG",
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            TigerLayer::Tract => "tract",
            TigerLayer::BlockGroup => "bg",
        }
    }
}

impl fmt::Display for TigerLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TigerError {
    #[error("download of {url} failed: {source}")]
    Download { url: String, source: reqwest::Error },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("bad archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("no .shp file in {0}")]
    MissingShapefile(PathBuf),
}

/// File stem of a layer, e.g. `tl_2024_11_tract`.
pub fn layer_name(year: u16, state_fips: &str, layer: TigerLayer) -> String {
    format!("tl_{year}_{state_fips}_{}", layer.suffix())
}

pub fn tiger_url(base: &str, year: u16, layer: TigerLayer, state_fips: &str) -> String {
    format!(
        "{}/TIGER{year}/{}/{}.zip",
        base.trim_end_matches('/'),
        layer.directory(),
        layer_name(year, state_fips, layer)
    )
}

/// Unpack a zipped shapefile into `dest` and return the path of its `.shp`.
pub fn unpack_shapefile<R: Read + Seek>(archive: R, dest: &Path) -> Result<PathBuf, TigerError> {
    let mut zip = zip::ZipArchive::new(archive)?;
    std::fs::create_dir_all(dest)?;
    zip.extract(dest)?;
    find_shapefile(dest)
}

fn find_shapefile(dir: &Path) -> Result<PathBuf, TigerError> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if let Ok(nested) = find_shapefile(&path) {
                found.push(nested);
            }
        } else if path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("shp"))
        {
            found.push(path);
        }
    }
    found.sort();
    found
        .into_iter()
        .next()
        .ok_or_else(|| TigerError::MissingShapefile(dir.to_path_buf()))
}

/// Download one layer into `<dest_dir>/<layer name>/` and return the `.shp`.
pub async fn download_layer(
    client: &reqwest::Client,
    config: &TigerConfig,
    layer: TigerLayer,
) -> Result<PathBuf, TigerError> {
    let url = tiger_url(&config.base_url, config.year, layer, &config.state_fips);
    let download_error = |source| TigerError::Download {
        url: url.clone(),
        source,
    };
    tracing::info!(url = %url, "downloading boundaries");
    let bytes = client
        .get(&url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(download_error)?
        .bytes()
        .await
        .map_err(download_error)?;

    let mut tmpfile = tempfile::tempfile()?;
    tmpfile.write_all(&bytes)?;
    let dest = config
        .dest_dir
        .join(layer_name(config.year, &config.state_fips, layer));
    let shp = unpack_shapefile(tmpfile, &dest)?;
    tracing::info!(path = %shp.display(), bytes = bytes.len(), "boundaries saved");
    Ok(shp)
}
