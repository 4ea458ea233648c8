//! Chart rendering.
//!
//! One panel per plotted sensor, stacked on a shared time axis, drawn with
//! `plotters` into an RGB buffer and encoded as PNG. The CO2 panel carries
//! the 1000 ppm and 1400 ppm guide lines.
//!
//! Text needs a TrueType font. The first render looks for a system sans
//! font; without one, charts are drawn without title, ticks or labels.

use std::error::Error;
use std::io::Cursor;
use std::ops::Range;
use std::sync::OnceLock;

use image::{ImageFormat, RgbImage};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{FontStyle, register_font};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, warn};

use aranet_types::Sensor;

use crate::error::{ToolError, ToolResult};
use crate::format::Zone;
use crate::report::{Channel, PlotSeries};

pub const DEFAULT_WIDTH: u32 = 1000;
/// Height of one sensor panel.
pub const PANEL_HEIGHT: u32 = 300;
const TITLE_HEIGHT: u32 = 40;
const MIN_SIDE: u32 = 200;
const MAX_SIDE: u32 = 4000;

/// Series up to this many points also get a marker per point.
const MARKER_LIMIT: usize = 200;

/// Guide lines: above 1000 ppm ventilation is advised, above 1400 ppm air
/// quality is poor.
pub const GUIDE_LINES: [(f64, RGBColor); 2] = [(1000.0, ORANGE), (1400.0, CRIMSON)];

const ORANGE: RGBColor = RGBColor(240, 150, 20);
const CRIMSON: RGBColor = RGBColor(170, 0, 40);
const GRID: RGBColor = RGBColor(225, 225, 225);

const FONT_FAMILY: &str = "sans-serif";
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

type DrawResult = Result<(), Box<dyn Error>>;

/// Line color of each sensor's panel.
pub fn sensor_color(sensor: Sensor) -> RGBColor {
    match sensor {
        Sensor::Temperature => RGBColor(220, 40, 40),
        Sensor::Humidity => RGBColor(30, 90, 200),
        Sensor::Pressure => RGBColor(30, 140, 60),
        Sensor::Co2 => RGBColor(128, 0, 128),
    }
}

/// Image size for `panels` stacked panels at the default width.
pub fn default_size(panels: usize) -> (u32, u32) {
    let panels = u32::try_from(panels).unwrap_or(u32::MAX);
    (
        DEFAULT_WIDTH,
        PANEL_HEIGHT.saturating_mul(panels).saturating_add(TITLE_HEIGHT),
    )
}

/// Render `series` as a PNG of `width` x `height` pixels (each clamped to
/// 200..=4000).
pub fn render_png(series: &PlotSeries, zone: Zone, width: u32, height: u32) -> ToolResult<Vec<u8>> {
    if series.channels.is_empty() || series.is_empty() {
        return Err(ToolError::Render("no points to plot".to_string()));
    }

    let width = width.clamp(MIN_SIDE, MAX_SIDE);
    let height = height.clamp(MIN_SIDE, MAX_SIDE);
    let mut pixels = vec![0u8; width as usize * height as usize * 3];

    draw(&mut pixels, (width, height), series, zone, font_available())
        .map_err(|e| ToolError::Render(e.to_string()))?;

    let image = RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| ToolError::Render("pixel buffer size mismatch".to_string()))?;
    let mut png = Cursor::new(Vec::new());
    image
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| ToolError::Render(e.to_string()))?;
    Ok(png.into_inner())
}

fn draw(
    buffer: &mut [u8],
    size: (u32, u32),
    series: &PlotSeries,
    zone: Zone,
    labelled: bool,
) -> DrawResult {
    let root = BitMapBackend::with_buffer(buffer, size).into_drawing_area();
    root.fill(&WHITE)?;
    let body = if labelled {
        root.titled(&title(series, zone), (FONT_FAMILY, 22))?
    } else {
        root.clone()
    };

    let start = series.from.unix_timestamp();
    let end = series.to.unix_timestamp();
    let span = if end > start {
        start..end
    } else {
        start - 1800..end + 1800
    };

    let panels = body.split_evenly((series.channels.len(), 1));
    for (panel, channel) in panels.iter().zip(&series.channels) {
        draw_panel(panel, channel, span.clone(), zone, labelled)?;
    }

    root.present()?;
    Ok(())
}

fn draw_panel(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    channel: &Channel,
    span: Range<i64>,
    zone: Zone,
    labelled: bool,
) -> DrawResult {
    let sensor = channel.sensor;
    let color = sensor_color(sensor);
    let (lo, hi) = value_bounds(channel);

    let mut builder = ChartBuilder::on(area);
    builder.margin(12);
    if labelled {
        builder.x_label_area_size(30).y_label_area_size(64);
    }
    let mut chart = builder.build_cartesian_2d(span.clone(), lo..hi)?;

    if labelled {
        let format_x = |ts: &i64| time_label(*ts, zone);
        chart
            .configure_mesh()
            .light_line_style(GRID.stroke_width(1))
            .x_labels(6)
            .x_label_formatter(&format_x)
            .y_desc(format!("{} ({})", sensor.label(), sensor.unit()))
            .draw()?;
    }

    if sensor == Sensor::Co2 {
        for (ppm, guide) in GUIDE_LINES {
            if (lo..=hi).contains(&ppm) {
                chart.draw_series(LineSeries::new(
                    [(span.start, ppm), (span.end, ppm)],
                    guide.stroke_width(1),
                ))?;
            }
        }
    }

    let points = channel
        .points
        .iter()
        .map(|(ts, value)| (ts.unix_timestamp(), *value));
    chart.draw_series(LineSeries::new(points.clone(), color.stroke_width(2)))?;
    if channel.points.len() <= MARKER_LIMIT {
        chart.draw_series(points.map(|p| Circle::new(p, 3, color.filled())))?;
    }
    Ok(())
}

/// Y range with some headroom. The CO2 range always reaches the first
/// guide line.
fn value_bounds(channel: &Channel) -> (f64, f64) {
    let (mut lo, mut hi) = channel.range().unwrap_or((0.0, 1.0));
    if channel.sensor == Sensor::Co2 {
        hi = hi.max(GUIDE_LINES[0].0 + 100.0);
        lo = lo.min(GUIDE_LINES[0].0 - 100.0);
    }
    let pad = ((hi - lo) * 0.08).max(1.0);
    (lo - pad, hi + pad)
}

fn title(series: &PlotSeries, zone: Zone) -> String {
    format!(
        "Aranet4 {} - {} to {}",
        series.sensor_names(),
        time_label(series.from.unix_timestamp(), zone),
        time_label(series.to.unix_timestamp(), zone)
    )
}

fn time_label(ts: i64, zone: Zone) -> String {
    let Ok(ts) = OffsetDateTime::from_unix_timestamp(ts) else {
        return String::new();
    };
    ts.to_offset(zone.offset_at(ts))
        .format(format_description!("[month]-[day] [hour]:[minute]"))
        .unwrap_or_default()
}

/// Register the first system font found under [`FONT_FAMILY`].
fn font_available() -> bool {
    static FOUND: OnceLock<bool> = OnceLock::new();
    *FOUND.get_or_init(|| {
        for path in FONT_CANDIDATES {
            let Ok(bytes) = std::fs::read(path) else {
                continue;
            };
            // Registered fonts live for the rest of the process.
            let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
            if register_font(FONT_FAMILY, FontStyle::Normal, bytes).is_ok() {
                debug!("Chart font: {}", path);
                return true;
            }
        }
        warn!("No TrueType font found, charts are drawn without text");
        false
    })
}
