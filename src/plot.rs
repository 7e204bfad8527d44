//! Choropleth maps of a merged boundary layer.

use std::fmt::Display;
use std::ops::Range;
use std::path::{Path, PathBuf};

use plotters::prelude::{
    BitMapBackend, ChartBuilder, Color, IntoDrawingArea, PathElement, Polygon, RGBColor, Rectangle,
    BLACK, WHITE,
};
use shapefile::PolygonRing;

use crate::config::PlotConfig;
use crate::merge::{Attr, Layer};
use crate::table::{self, TableError};

/// Fill of polygons without a value.
const MISSING: RGBColor = RGBColor(211, 211, 211);
const COLORBAR_WIDTH: u32 = 80;
const MARGIN: i32 = 20;
const COLORBAR_STEPS: i32 = 64;

#[derive(Debug, thiserror::Error)]
pub enum PlotError {
    #[error("unknown colormap '{0}'")]
    UnknownColormap(String),
    #[error("failed to draw {path}: {reason}")]
    Draw { path: PathBuf, reason: String },
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Sequential colormaps, low to high.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Colormap {
    OrRd,
    Reds,
    Blues,
    Greens,
    Viridis,
}

impl Colormap {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "orrd" => Some(Colormap::OrRd),
            "reds" => Some(Colormap::Reds),
            "blues" => Some(Colormap::Blues),
            "greens" => Some(Colormap::Greens),
            "viridis" => Some(Colormap::Viridis),
            _ => None,
        }
    }

    fn stops(&self) -> &'static [u32] {
        match self {
            Colormap::OrRd => &[
                0xfff7ec, 0xfee8c8, 0xfdd49e, 0xfdbb84, 0xfc8d59, 0xef6548, 0xd7301f, 0xb30000,
                0x7f0000,
            ],
            Colormap::Reds => &[
                0xfff5f0, 0xfee0d2, 0xfcbba1, 0xfc9272, 0xfb6a4a, 0xef3b2c, 0xcb181d, 0xa50f15,
                0x67000d,
            ],
            Colormap::Blues => &[
                0xf7fbff, 0xdeebf7, 0xc6dbef, 0x9ecae1, 0x6baed6, 0x4292c6, 0x2171b5, 0x08519c,
                0x08306b,
            ],
            Colormap::Greens => &[
                0xf7fcf5, 0xe5f5e0, 0xc7e9c0, 0xa1d99b, 0x74c476, 0x41ab5d, 0x238b45, 0x006d2c,
                0x00441b,
            ],
            Colormap::Viridis => &[
                0x440154, 0x482878, 0x3e4989, 0x31688e, 0x26828e, 0x1f9e89, 0x35b779, 0x6ece58,
                0xb5de2b, 0xfde725,
            ],
        }
    }

    /// Colour at `t` in `[0, 1]`, interpolated between stops.
    pub fn color(&self, t: f64) -> RGBColor {
        let stops = self.stops();
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let pos = t * (stops.len() - 1) as f64;
        let i = (pos.floor() as usize).min(stops.len() - 2);
        let frac = pos - i as f64;
        let (a, b) = (rgb(stops[i]), rgb(stops[i + 1]));
        let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * frac).round() as u8;
        RGBColor(mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
    }
}

fn rgb(hex: u32) -> RGBColor {
    RGBColor((hex >> 16) as u8, (hex >> 8) as u8, hex as u8)
}

/// Numeric values of `column` per feature, or `None` if the layer has no
/// such column. Text values are parsed; anything unparseable is missing.
fn column_values(layer: &Layer, column: &str) -> Option<Vec<Option<f64>>> {
    let index = layer.field_index(column)?;
    Some(
        layer
            .features
            .iter()
            .map(|f| match &f.attrs[index] {
                Some(Attr::Number(n)) => Some(*n),
                Some(Attr::Text(s)) => s.trim().parse::<f64>().ok(),
                None => None,
            })
            .map(|v| v.filter(|n| n.is_finite()))
            .collect(),
    )
}

struct Bounds {
    x: Range<f64>,
    y: Range<f64>,
}

fn layer_bounds(layer: &Layer) -> Option<Bounds> {
    let mut points = layer
        .features
        .iter()
        .flat_map(|f| f.polygon.rings())
        .flat_map(|r| r.points());
    let first = points.next()?;
    let (mut x0, mut x1, mut y0, mut y1) = (first.x, first.x, first.y, first.y);
    for p in points {
        x0 = x0.min(p.x);
        x1 = x1.max(p.x);
        y0 = y0.min(p.y);
        y1 = y1.max(p.y);
    }
    if x1 <= x0 {
        x1 = x0 + 1e-6;
    }
    if y1 <= y0 {
        y1 = y0 + 1e-6;
    }
    Some(Bounds { x: x0..x1, y: y0..y1 })
}

/// Image size for a map `width` pixels wide, keeping the layer's aspect
/// ratio. Longitude/latitude layers are corrected for latitude.
fn image_size(bounds: &Bounds, width: u32) -> (u32, u32) {
    let dx = bounds.x.end - bounds.x.start;
    let dy = bounds.y.end - bounds.y.start;
    let geographic = bounds.x.start >= -180.0
        && bounds.x.end <= 180.0
        && bounds.y.start >= -90.0
        && bounds.y.end <= 90.0;
    let mut aspect = dy / dx;
    if geographic {
        let mid = (bounds.y.start + bounds.y.end) / 2.0;
        aspect /= mid.to_radians().cos().max(0.1);
    }
    let map_width = width.saturating_sub(COLORBAR_WIDTH).max(100);
    let height = (map_width as f64 * aspect).round().clamp(100.0, 4.0 * width as f64) as u32;
    (map_width + COLORBAR_WIDTH, height)
}

/// Draw `config.column` of `layer` as a choropleth PNG at `config.output`.
///
/// A missing column or a column without numeric values is logged and yields
/// `Ok(None)`.
pub fn plot_column(layer: &Layer, config: &PlotConfig) -> Result<Option<PathBuf>, PlotError> {
    let colormap = Colormap::from_name(&config.colormap)
        .ok_or_else(|| PlotError::UnknownColormap(config.colormap.clone()))?;
    let Some(values) = column_values(layer, &config.column) else {
        tracing::warn!(column = %config.column, "column not found in data, nothing to plot");
        return Ok(None);
    };
    let (min, max) = values
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    if !min.is_finite() {
        tracing::warn!(column = %config.column, "column has no numeric values, nothing to plot");
        return Ok(None);
    }
    let Some(bounds) = layer_bounds(layer) else {
        tracing::warn!("layer has no geometry, nothing to plot");
        return Ok(None);
    };

    table::create_parent(&config.output)?;
    let size = image_size(&bounds, config.width);
    draw(layer, &values, min..max, colormap, &bounds, &config.output, size).map_err(|reason| {
        PlotError::Draw {
            path: config.output.clone(),
            reason,
        }
    })?;
    tracing::info!(
        path = %config.output.display(),
        column = %config.column,
        min,
        max,
        "plot saved"
    );
    Ok(Some(config.output.clone()))
}

fn draw_err<E: Display>(e: E) -> String {
    e.to_string()
}

fn draw(
    layer: &Layer,
    values: &[Option<f64>],
    range: Range<f64>,
    colormap: Colormap,
    bounds: &Bounds,
    path: &Path,
    size: (u32, u32),
) -> Result<(), String> {
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err)?;
    let (map_area, bar_area) = root.split_horizontally((size.0 - COLORBAR_WIDTH) as i32);

    let mut chart = ChartBuilder::on(&map_area)
        .margin(MARGIN)
        .build_cartesian_2d(bounds.x.clone(), bounds.y.clone())
        .map_err(draw_err)?;

    let span = range.end - range.start;
    for (feature, value) in layer.features.iter().zip(values) {
        let fill = value.map_or(MISSING, |v| {
            let t = if span > 0.0 { (v - range.start) / span } else { 0.5 };
            colormap.color(t)
        });
        for ring in feature.polygon.rings() {
            let points: Vec<(f64, f64)> = ring.points().iter().map(|p| (p.x, p.y)).collect();
            let style = match ring {
                PolygonRing::Outer(_) => fill.filled(),
                PolygonRing::Inner(_) => WHITE.filled(),
            };
            chart
                .draw_series(std::iter::once(Polygon::new(points.clone(), style)))
                .map_err(draw_err)?;
            chart
                .draw_series(std::iter::once(PathElement::new(points, BLACK.stroke_width(1))))
                .map_err(draw_err)?;
        }
    }

    // Colour bar, low values at the bottom.
    let (_, bar_height) = bar_area.dim_in_pixel();
    let top = MARGIN;
    let bottom = bar_height as i32 - MARGIN;
    let band = (bottom - top) as f64 / COLORBAR_STEPS as f64;
    for i in 0..COLORBAR_STEPS {
        let t = i as f64 / (COLORBAR_STEPS - 1) as f64;
        let y0 = bottom - (band * (i + 1) as f64).round() as i32;
        let y1 = bottom - (band * i as f64).round() as i32;
        bar_area
            .draw(&Rectangle::new([(20, y0), (50, y1)], colormap.color(t).filled()))
            .map_err(draw_err)?;
    }
    bar_area
        .draw(&Rectangle::new([(20, top), (50, bottom)], BLACK.stroke_width(1)))
        .map_err(draw_err)?;

    root.present().map_err(draw_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::BoundaryFeature;
    use shapefile::Point;

    fn square(x: f64) -> shapefile::Polygon {
        shapefile::Polygon::new(PolygonRing::Outer(vec![
            Point::new(x, 38.8),
            Point::new(x, 38.9),
            Point::new(x + 0.1, 38.9),
            Point::new(x + 0.1, 38.8),
            Point::new(x, 38.8),
        ]))
    }

    fn layer() -> Layer {
        let values = [
            Some(Attr::Number(0.07)),
            Some(Attr::Text("0.62".into())),
            None,
        ];
        Layer {
            fields: vec!["GEOID".into(), "LOWINCPCT".into()],
            features: values
                .into_iter()
                .enumerate()
                .map(|(i, value)| BoundaryFeature {
                    polygon: square(-77.1 + 0.1 * i as f64),
                    attrs: vec![Some(Attr::Text(format!("1100100010{i}"))), value],
                })
                .collect(),
        }
    }

    fn plot_config(dir: &Path) -> PlotConfig {
        PlotConfig {
            output: dir.join("maps/lowincpct.png"),
            width: 400,
            ..PlotConfig::default()
        }
    }

    #[test]
    fn colormap_ends_match_stops() {
        let low = Colormap::OrRd.color(0.0);
        let high = Colormap::OrRd.color(1.0);
        assert_eq!((low.0, low.1, low.2), (0xff, 0xf7, 0xec));
        assert_eq!((high.0, high.1, high.2), (0x7f, 0x00, 0x00));
        let clamped = Colormap::Viridis.color(7.0);
        assert_eq!((clamped.0, clamped.1, clamped.2), (0xfd, 0xe7, 0x25));
        assert_eq!(Colormap::from_name("orrd"), Some(Colormap::OrRd));
        assert_eq!(Colormap::from_name("jet"), None);
    }

    #[test]
    fn writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let config = plot_config(dir.path());

        let written = plot_column(&layer(), &config).unwrap();
        assert_eq!(written.as_deref(), Some(config.output.as_path()));
        let bytes = std::fs::read(&config.output).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn missing_column_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = PlotConfig {
            column: "P_PM25".into(),
            ..plot_config(dir.path())
        };
        assert!(plot_column(&layer(), &config).unwrap().is_none());
        assert!(!config.output.exists());
    }

    #[test]
    fn unknown_colormap_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = PlotConfig {
            colormap: "jet".into(),
            ..plot_config(dir.path())
        };
        assert!(matches!(
            plot_column(&layer(), &config),
            Err(PlotError::UnknownColormap(ref c)) if c == "jet"
        ));
    }

    #[test]
    fn geographic_layers_keep_aspect() {
        let bounds = layer_bounds(&layer()).unwrap();
        let (w, h) = image_size(&bounds, 400);
        assert_eq!(w, 400);
        // 0.3 by 0.1 degrees near 38.85N.
        assert!(h > 100 && h < 160, "height {h}");
    }
}
