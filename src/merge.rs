//! Attribute join of tabular EJScreen data onto TIGER/Line boundaries.
//!
//! The join is a left join on the boundary side: every polygon is written
//! back, in file order, with the columns of the first data row whose id
//! matches its GEOID. Unmatched polygons get empty data columns.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use census::GeoId;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry};
use shapefile::dbase::{self, FieldName, FieldValue, TableWriterBuilder};
use shapefile::{Polygon, PolygonRing, Shape};

use crate::config::MergeConfig;
use crate::filter::{self, FilterError};
use crate::table::{self, TableError};
use crate::tiger::{self, TigerError};

/// Longest field name a dBase table accepts.
const DBF_NAME_LEN: usize = 10;
const DBF_CHAR_MAX: usize = 254;
const DBF_NUMERIC_LEN: u8 = 24;
const DBF_MAX_DECIMALS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("shapefile not found: {0}")]
    ShapefileNotFound(PathBuf),
    #[error("column '{column}' not found in {source_name}")]
    MissingColumn { column: String, source_name: String },
    #[error("unsupported shape type {0}, expected polygons")]
    UnsupportedShape(String),
    #[error("invalid field name '{name}': {reason}")]
    FieldName { name: String, reason: String },
    #[error(transparent)]
    Data(#[from] FilterError),
    #[error(transparent)]
    Archive(#[from] TigerError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("shapefile error: {0}")]
    Shapefile(#[from] shapefile::Error),
    #[error("dbf error: {0}")]
    Dbase(#[from] dbase::Error),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// An attribute value of a boundary or data column.
#[derive(Clone, Debug, PartialEq)]
pub enum Attr {
    Text(String),
    Number(f64),
}

impl Attr {
    fn as_text(&self) -> String {
        match self {
            Attr::Text(s) => s.clone(),
            Attr::Number(n) => n.to_string(),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Attr::Text(s) => serde_json::Value::String(s.clone()),
            Attr::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

fn attr_from_dbase(value: &FieldValue) -> Option<Attr> {
    match value {
        FieldValue::Character(s) => s.as_ref().map(|s| Attr::Text(s.trim().to_string())),
        FieldValue::Numeric(n) => n.map(Attr::Number),
        FieldValue::Float(f) => f.map(|f| Attr::Number(f as f64)),
        FieldValue::Integer(i) => Some(Attr::Number(*i as f64)),
        FieldValue::Double(d) => Some(Attr::Number(*d)),
        FieldValue::Logical(b) => b.map(|b| Attr::Text(if b { "T" } else { "F" }.to_string())),
        _ => None,
    }
}

#[derive(Clone, Debug)]
pub struct BoundaryFeature {
    pub polygon: Polygon,
    pub attrs: Vec<Option<Attr>>,
}

/// Polygons plus their attribute table, columns in `fields` order.
#[derive(Clone, Debug, Default)]
pub struct Layer {
    pub fields: Vec<String>,
    pub features: Vec<BoundaryFeature>,
}

impl Layer {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }
}

#[derive(Debug, Default)]
pub struct MergedLayer {
    pub layer: Layer,
    /// Fields that must stay text even when every value looks numeric.
    pub text_fields: Vec<String>,
    pub matched: usize,
}

#[derive(Debug)]
pub struct MergeReport {
    pub features: usize,
    pub matched: usize,
    pub skipped_null: usize,
    /// The merged layer as written, full column names.
    pub layer: Layer,
    pub output: PathBuf,
    pub geojson: Option<PathBuf>,
}

impl MergeReport {
    pub fn columns(&self) -> &[String] {
        &self.layer.fields
    }
}

/// Read polygons and attributes of a `.shp`, in file order.
///
/// Null shapes carry no geometry to map and are dropped; the count of dropped
/// records is returned alongside the layer.
pub fn read_boundaries(shp: &Path) -> Result<(Layer, usize), MergeError> {
    if !shp.exists() {
        return Err(MergeError::ShapefileNotFound(shp.to_path_buf()));
    }
    let fields: Vec<String> = dbase::Reader::from_path(shp.with_extension("dbf"))?
        .fields()
        .iter()
        .map(|f| f.name().to_string())
        .filter(|name| name != "DeletionFlag")
        .collect();

    let mut layer = Layer {
        fields,
        features: Vec::new(),
    };
    let mut skipped = 0;
    for (shape, record) in shapefile::read(shp)? {
        let polygon = match shape {
            Shape::Polygon(p) => p,
            Shape::NullShape => {
                skipped += 1;
                continue;
            }
            other => return Err(MergeError::UnsupportedShape(format!("{:?}", other.shapetype()))),
        };
        let attrs = layer
            .fields
            .iter()
            .map(|name| record.get(name).and_then(attr_from_dbase))
            .collect();
        layer.features.push(BoundaryFeature { polygon, attrs });
    }
    if skipped > 0 {
        tracing::warn!(skipped, path = %shp.display(), "dropped records without geometry");
    }
    Ok((layer, skipped))
}

/// Read the data CSV as text columns: names and one value vector per column.
fn read_data(path: &Path) -> Result<(Vec<String>, Vec<Vec<Option<String>>>), MergeError> {
    let df = filter::read_text_csv(path)?;
    let mut names = Vec::with_capacity(df.width());
    let mut columns = Vec::with_capacity(df.width());
    for series in df.get_columns() {
        names.push(series.name().to_string());
        let values = series
            .utf8()
            .map_err(FilterError::from)?
            .into_iter()
            .map(|v| v.filter(|s| !s.is_empty()).map(str::to_string))
            .collect::<Vec<_>>();
        columns.push(values);
    }
    Ok((names, columns))
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Left-join data columns onto `boundaries` by `geoid_column` == `data_id_column`.
///
/// When both keys share a name only the boundary column is kept. Other data
/// columns whose names clash with a boundary column are suffixed `_x`
/// (boundary side) and `_y` (data side).
pub fn join(
    mut boundaries: Layer,
    data_names: Vec<String>,
    data_columns: Vec<Vec<Option<String>>>,
    geoid_column: &str,
    data_id_column: &str,
) -> Result<MergedLayer, MergeError> {
    let geoid_index = boundaries
        .field_index(geoid_column)
        .ok_or_else(|| MergeError::MissingColumn {
            column: geoid_column.to_string(),
            source_name: "shapefile".to_string(),
        })?;
    let id_index = data_names
        .iter()
        .position(|n| n == data_id_column)
        .ok_or_else(|| MergeError::MissingColumn {
            column: data_id_column.to_string(),
            source_name: "data".to_string(),
        })?;

    let mut rows: HashMap<GeoId, usize> = HashMap::new();
    for (row, id) in data_columns[id_index].iter().enumerate() {
        let Some(id) = id.as_deref().and_then(|s| s.parse::<GeoId>().ok()) else {
            continue;
        };
        match rows.entry(id) {
            Entry::Occupied(e) => {
                tracing::warn!(id = %e.key(), row, "duplicate data id, keeping first row");
            }
            Entry::Vacant(e) => {
                e.insert(row);
            }
        }
    }

    let numeric: Vec<bool> = data_columns
        .iter()
        .enumerate()
        .map(|(i, values)| {
            i != id_index
                && values.iter().any(Option::is_some)
                && values
                    .iter()
                    .flatten()
                    .all(|v| v.trim().is_empty() || parse_number(v).is_some())
        })
        .collect();

    let shared_key = geoid_column == data_id_column;
    let appended: Vec<usize> = (0..data_names.len())
        .filter(|&col| !(shared_key && col == id_index))
        .collect();

    let mut appended_names = Vec::with_capacity(appended.len());
    for &col in &appended {
        let name = &data_names[col];
        match boundaries.field_index(name) {
            Some(clash) => {
                tracing::debug!(column = %name, "column on both sides, adding suffixes");
                boundaries.fields[clash] = format!("{name}_x");
                appended_names.push(format!("{name}_y"));
            }
            None => appended_names.push(name.clone()),
        }
    }

    let mut merged = MergedLayer::default();
    if !shared_key {
        if let Some(pos) = appended.iter().position(|&col| col == id_index) {
            merged.text_fields.push(appended_names[pos].clone());
        }
    }
    merged.layer.fields = boundaries.fields;
    merged.layer.fields.extend(appended_names);

    for mut feature in boundaries.features {
        let key = feature.attrs[geoid_index]
            .as_ref()
            .and_then(|a| a.as_text().parse::<GeoId>().ok());
        let row = key.as_ref().and_then(|k| rows.get(k).copied());
        if row.is_some() {
            merged.matched += 1;
        }
        for &col in &appended {
            let value = row
                .and_then(|r| data_columns[col][r].as_deref())
                .and_then(|v| {
                    if col == id_index {
                        v.parse::<GeoId>().ok().map(|id| Attr::Text(id.to_string()))
                    } else if numeric[col] {
                        parse_number(v).map(Attr::Number)
                    } else {
                        Some(Attr::Text(v.to_string()))
                    }
                });
            feature.attrs.push(value);
        }
        merged.layer.features.push(feature);
    }
    Ok(merged)
}

/// dBase-safe field names: at most ten characters, unique, order preserved.
pub fn dbf_field_names(names: &[String]) -> Vec<String> {
    let mut taken: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let base: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .take(DBF_NAME_LEN)
            .collect();
        let mut candidate = base.clone();
        let mut n = 1;
        while taken.iter().any(|t| t.eq_ignore_ascii_case(&candidate)) {
            let suffix = format!("_{n}");
            let keep = DBF_NAME_LEN.saturating_sub(suffix.len()).min(base.len());
            candidate = format!("{}{suffix}", &base[..keep]);
            n += 1;
        }
        if candidate != *name {
            tracing::debug!(from = %name, to = %candidate, "renamed field for dbf");
        }
        taken.push(candidate);
    }
    taken
}

enum FieldKind {
    Text(u8),
    Number(u8),
}

fn decimals(n: f64) -> usize {
    let s = n.to_string();
    s.split_once('.').map_or(0, |(_, frac)| frac.len())
}

fn field_kind(layer: &Layer, index: usize, force_text: bool) -> FieldKind {
    let values = layer.features.iter().filter_map(|f| f.attrs[index].as_ref());
    let all_numbers = values.clone().all(|a| matches!(a, Attr::Number(_)));
    if all_numbers && !force_text {
        let places = values
            .filter_map(|a| match a {
                Attr::Number(n) => Some(decimals(*n)),
                Attr::Text(_) => None,
            })
            .max()
            .unwrap_or(0)
            .min(DBF_MAX_DECIMALS);
        FieldKind::Number(places as u8)
    } else {
        let width = values
            .map(|a| a.as_text().len())
            .max()
            .unwrap_or(1)
            .clamp(1, DBF_CHAR_MAX);
        FieldKind::Text(width as u8)
    }
}

/// Write the merged layer as an ESRI shapefile, copying the projection of
/// `source` when it has one.
pub fn write_shapefile(merged: &MergedLayer, output: &Path, source: &Path) -> Result<(), MergeError> {
    table::create_parent(output)?;
    let layer = &merged.layer;
    let names = dbf_field_names(&layer.fields);

    let mut builder = TableWriterBuilder::new();
    let mut kinds = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let field_name = FieldName::try_from(name.as_str()).map_err(|e| MergeError::FieldName {
            name: name.clone(),
            reason: format!("{e:?}"),
        })?;
        let kind = field_kind(layer, i, merged.text_fields.contains(&layer.fields[i]));
        builder = match kind {
            FieldKind::Text(width) => builder.add_character_field(field_name, width),
            FieldKind::Number(places) => {
                builder.add_numeric_field(field_name, DBF_NUMERIC_LEN, places)
            }
        };
        kinds.push(kind);
    }

    let mut writer = shapefile::Writer::from_path(output, builder)?;
    for feature in &layer.features {
        let mut record = dbase::Record::default();
        for ((name, kind), attr) in names.iter().zip(&kinds).zip(&feature.attrs) {
            let value = match kind {
                FieldKind::Text(_) => FieldValue::Character(attr.as_ref().map(Attr::as_text)),
                FieldKind::Number(_) => FieldValue::Numeric(attr.as_ref().and_then(|a| match a {
                    Attr::Number(n) => Some(*n),
                    Attr::Text(_) => None,
                })),
            };
            record.insert(name.clone(), value);
        }
        writer.write_shape_and_record(&feature.polygon, &record)?;
    }
    drop(writer);

    let prj = source.with_extension("prj");
    if prj.exists() {
        let target = output.with_extension("prj");
        std::fs::copy(&prj, &target).map_err(|source| MergeError::Io {
            path: target,
            source,
        })?;
    }
    Ok(())
}

/// Shapefile rings to a multipolygon: each outer ring opens a polygon, inner
/// rings attach to the most recent outer ring.
pub fn to_multipolygon(polygon: &Polygon) -> geo::MultiPolygon<f64> {
    let mut parts: Vec<(geo::LineString<f64>, Vec<geo::LineString<f64>>)> = Vec::new();
    for ring in polygon.rings() {
        let line: geo::LineString<f64> = ring
            .points()
            .iter()
            .map(|p| geo::Coord { x: p.x, y: p.y })
            .collect::<Vec<_>>()
            .into();
        match ring {
            PolygonRing::Inner(_) if !parts.is_empty() => {
                if let Some((_, holes)) = parts.last_mut() {
                    holes.push(line);
                }
            }
            _ => parts.push((line, Vec::new())),
        }
    }
    geo::MultiPolygon::new(
        parts
            .into_iter()
            .map(|(exterior, holes)| geo::Polygon::new(exterior, holes))
            .collect(),
    )
}

/// The merged layer as a GeoJSON feature collection, full column names as
/// property keys.
pub fn to_feature_collection(layer: &Layer) -> FeatureCollection {
    let features = layer
        .features
        .iter()
        .map(|f| {
            let mut feature = Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::from(&to_multipolygon(
                    &f.polygon,
                )))),
                id: None,
                properties: None,
                foreign_members: None,
            };
            for (name, attr) in layer.fields.iter().zip(&f.attrs) {
                let value = attr
                    .as_ref()
                    .map(Attr::to_json)
                    .unwrap_or(serde_json::Value::Null);
                feature.set_property(name.clone(), value);
            }
            feature
        })
        .collect();
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

pub fn write_geojson(layer: &Layer, path: &Path) -> Result<(), MergeError> {
    table::create_parent(path)?;
    let out = GeoJson::from(to_feature_collection(layer));
    std::fs::write(path, out.to_string()).map_err(|source| MergeError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Join the configured data CSV onto the configured boundaries and write the
/// merged shapefile (and GeoJSON when configured).
pub fn merge_data_with_shapefile(config: &MergeConfig) -> Result<MergeReport, MergeError> {
    let source = &config.shapefile;
    if !source.exists() {
        return Err(MergeError::ShapefileNotFound(source.clone()));
    }
    let is_zip = source
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("zip"));
    // Extracted archives live in a temporary directory until the merge is written.
    let unpacked = if is_zip {
        Some(tempfile::tempdir().map_err(|e| MergeError::Io {
            path: std::env::temp_dir(),
            source: e,
        })?)
    } else {
        None
    };
    let shp = match &unpacked {
        Some(dir) => {
            let archive = File::open(source).map_err(|e| MergeError::Io {
                path: source.clone(),
                source: e,
            })?;
            tiger::unpack_shapefile(archive, dir.path())?
        }
        None => source.clone(),
    };

    tracing::info!(path = %shp.display(), "loading shapefile");
    let (boundaries, skipped_null) = read_boundaries(&shp)?;
    tracing::info!(path = %config.data.display(), "loading data");
    let (names, columns) = read_data(&config.data)?;

    tracing::info!("merging shapefile with data");
    let merged = join(
        boundaries,
        names,
        columns,
        &config.geoid_column,
        &config.data_id_column,
    )?;
    let features = merged.layer.features.len();
    tracing::info!(matched = merged.matched, features, "matched features");

    tracing::info!(path = %config.output.display(), "saving merged shapefile");
    write_shapefile(&merged, &config.output, &shp)?;
    if let Some(geojson) = &config.geojson {
        tracing::info!(path = %geojson.display(), "saving merged geojson");
        write_geojson(&merged.layer, geojson)?;
    }

    Ok(MergeReport {
        features,
        matched: merged.matched,
        skipped_null,
        layer: merged.layer,
        output: config.output.clone(),
        geojson: config.geojson.clone(),
    })
}
