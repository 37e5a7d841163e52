//! Schematic ingestion (C2): parses GDSII, DXF, and SVG layout files into a
//! uniform `SchematicData` model. See `gdsii.rs`, `dxf.rs`, `svg.rs` for the
//! format-specific decoders and `dispatch.rs` for format detection.

mod dispatch;
pub mod dxf;
pub mod gdsii;
pub mod svg;

pub use dispatch::{detect_format, parse, ParseHints};
pub use dxf::emit as emit_dxf;
pub use svg::emit as emit_svg;

use crate::geometry::{enclosing, Bounds, CoordinateSystem, Point2D};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatType {
    Gdsii,
    Dxf,
    Svg,
}

impl FormatType {
    pub fn as_str(self) -> &'static str {
        match self {
            FormatType::Gdsii => "gdsii",
            FormatType::Dxf => "dxf",
            FormatType::Svg => "svg",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DieBoundary {
    pub die_id: String,
    pub bounds: Bounds,
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
    pub area: f64,
    pub available: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DieBoundary {
    pub fn from_bounds(die_id: impl Into<String>, bounds: Bounds, available: bool) -> Self {
        let center = bounds.center();
        Self {
            die_id: die_id.into(),
            center_x: center.x,
            center_y: center.y,
            width: bounds.width(),
            height: bounds.height(),
            area: bounds.area(),
            available,
            bounds,
            metadata: HashMap::new(),
        }
    }

    pub fn center(&self) -> Point2D {
        Point2D::new(self.center_x, self.center_y)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchematicStatistics {
    pub die_count: usize,
    pub available_die_count: usize,
    pub mean_die_area: f64,
    pub median_die_area: f64,
}

impl SchematicStatistics {
    fn compute(dies: &[DieBoundary]) -> Self {
        let die_count = dies.len();
        let available_die_count = dies.iter().filter(|d| d.available).count();
        if die_count == 0 {
            return Self::default();
        }
        let mut areas: Vec<f64> = dies.iter().map(|d| d.area).collect();
        let mean_die_area = areas.iter().sum::<f64>() / die_count as f64;
        areas.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median_die_area = areas[areas.len() / 2];
        Self {
            die_count,
            available_die_count,
            mean_die_area,
            median_die_area,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchematicSourceMetadata {
    pub software: Option<String>,
    pub units: Option<String>,
    pub scale_factor: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchematicData {
    pub id: String,
    pub filename: String,
    pub format_type: FormatType,
    pub upload_date: DateTime<Utc>,
    pub coordinate_system: CoordinateSystem,
    pub wafer_size: Option<String>,
    pub dies: Vec<DieBoundary>,
    pub layout_bounds: Bounds,
    pub statistics: SchematicStatistics,
    pub metadata: SchematicSourceMetadata,
    /// Mutable after ingestion even though the parsed body is immutable
    /// (spec.md 3.6): free-form tags and a notes field the repository layer
    /// lets callers edit in place.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SchematicData {
    /// Assembles the uniform model from format-specific output. Panics only
    /// if `dies` is empty; every parser must reject that case earlier with
    /// `EngineError::ParserError` / `noDiesDetected` (spec.md 4.2).
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        format_type: FormatType,
        coordinate_system: CoordinateSystem,
        wafer_size: Option<String>,
        dies: Vec<DieBoundary>,
        metadata: SchematicSourceMetadata,
    ) -> Self {
        let bounds: Vec<Bounds> = dies.iter().map(|d| d.bounds).collect();
        let layout_bounds = enclosing(&bounds);
        let statistics = SchematicStatistics::compute(&dies);
        Self {
            id: id.into(),
            filename: filename.into(),
            format_type,
            upload_date: Utc::now(),
            coordinate_system,
            wafer_size,
            dies,
            layout_bounds,
            statistics,
            metadata,
            tags: Vec::new(),
            notes: None,
        }
    }
}

/// Applies the `dieSizeFilter` hint (spec.md 4.2): drops dies whose area
/// falls outside `[min, max]`.
pub fn apply_die_size_filter(
    dies: Vec<DieBoundary>,
    filter: Option<(f64, f64)>,
) -> Vec<DieBoundary> {
    match filter {
        None => dies,
        Some((min, max)) => dies
            .into_iter()
            .filter(|d| d.area >= min && d.area <= max)
            .collect(),
    }
}
