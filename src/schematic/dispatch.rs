//! Format dispatch: extension first, then magic-byte sniff; magic wins on
//! disagreement (spec.md 4.2).

use super::{dxf, gdsii, svg, FormatType, SchematicData};
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Default)]
pub struct ParseHints {
    pub target_cell: Option<String>,
    pub target_layer: Option<String>,
    pub coordinate_scale: Option<f64>,
    pub die_size_filter: Option<(f64, f64)>,
}

/// GDSII records open with a 2-byte big-endian record length followed by a
/// record-type/data-type byte pair from a small known set; the first record
/// of any real GDSII stream is a HEADER record (type 0x0002).
fn looks_like_gdsii(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes[2] == 0x00 && bytes[3] == 0x02
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]);
    head.contains("<svg") || head.trim_start().starts_with("<?xml")
}

fn looks_like_dxf(bytes: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]);
    let mut lines = head.lines();
    matches!(lines.next(), Some(l) if l.trim() == "0")
        && matches!(lines.next(), Some(l) if l.trim() == "SECTION" || l.trim() == "HEADER")
}

/// Detects the format by filename extension first, falling back to a
/// magic-byte sniff; the sniff overrides the extension if they disagree.
pub fn detect_format(filename: &str, bytes: &[u8]) -> EngineResult<FormatType> {
    let by_ext = match filename.rsplit('.').next().map(|s| s.to_ascii_lowercase()) {
        Some(ext) if ext == "gds" || ext == "gds2" || ext == "gdsii" => Some(FormatType::Gdsii),
        Some(ext) if ext == "dxf" => Some(FormatType::Dxf),
        Some(ext) if ext == "svg" => Some(FormatType::Svg),
        _ => None,
    };

    let by_magic = if looks_like_gdsii(bytes) {
        Some(FormatType::Gdsii)
    } else if looks_like_svg(bytes) {
        Some(FormatType::Svg)
    } else if looks_like_dxf(bytes) {
        Some(FormatType::Dxf)
    } else {
        None
    };

    match (by_ext, by_magic) {
        (_, Some(magic)) => Ok(magic),
        (Some(ext), None) => Ok(ext),
        (None, None) => Err(EngineError::ParserError {
            format: "unknown",
            offset: None,
            reason: "could not detect format from extension or content; supported formats: gdsii, dxf, svg".to_string(),
        }),
    }
}

pub fn parse(filename: &str, bytes: &[u8], hints: &ParseHints) -> EngineResult<SchematicData> {
    if bytes.is_empty() {
        return Err(EngineError::FileUploadError {
            reason: "empty file".to_string(),
        });
    }
    let format = detect_format(filename, bytes)?;
    let data = match format {
        FormatType::Gdsii => gdsii::parse(filename, bytes, hints)?,
        FormatType::Dxf => dxf::parse(filename, bytes, hints)?,
        FormatType::Svg => svg::parse(filename, bytes, hints)?,
    };
    if data.dies.is_empty() {
        return Err(EngineError::ParserError {
            format: format.as_str(),
            offset: None,
            reason: "noDiesDetected".to_string(),
        });
    }
    if data.dies.len() > 100_000 {
        return Err(EngineError::TooManyDies {
            limit: 100_000,
            actual: data.dies.len(),
        });
    }
    Ok(data)
}
