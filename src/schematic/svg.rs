//! SVG parser, built on `quick-xml`'s pull reader (this pack's idiomatic
//! choice for XML — see `other_examples/manifests/{sibyllinesoft-valknut,
//! gfleming1992-rust_lsp}`, which reach for the same crate). Understands
//! `<rect>`, `<polygon>`/`<path>` (bounding box), `<g>` groups (recursive,
//! propagating a `translate(...)` transform attribute), and `<text>` labels.
//! Non-geometric decoration (titles, legends, measurement markers) is
//! flagged unavailable by the area/aspect-ratio heuristic in spec.md 4.2
//! rather than dropped (SPEC_FULL.md §D).

use super::dispatch::ParseHints;
use super::{DieBoundary, FormatType, SchematicData, SchematicSourceMetadata};
use crate::error::{EngineError, EngineResult};
use crate::geometry::{Bounds, CoordinateSystem};
use quick_xml::events::Event;
use quick_xml::Reader;

#[derive(Debug, Clone)]
struct Candidate {
    bounds: Bounds,
}

#[derive(Debug, Clone)]
struct Label {
    x: f64,
    y: f64,
    text: String,
}

fn attr(e: &quick_xml::events::BytesStart, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == name.as_bytes() {
            Some(String::from_utf8_lossy(&a.value).to_string())
        } else {
            None
        }
    })
}

fn attr_f64(e: &quick_xml::events::BytesStart, name: &str) -> Option<f64> {
    attr(e, name).and_then(|v| v.parse().ok())
}

/// Parses `translate(tx, ty)` out of a `transform` attribute; any other
/// transform function is ignored (a reasonable simplification for schematic
/// die layouts, which are laid out on an orthogonal grid of groups).
fn parse_translate(value: &str) -> (f64, f64) {
    if let Some(start) = value.find("translate(") {
        let rest = &value[start + "translate(".len()..];
        if let Some(end) = rest.find(')') {
            let nums: Vec<f64> = rest[..end]
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.parse().ok())
                .collect();
            let tx = nums.first().copied().unwrap_or(0.0);
            let ty = nums.get(1).copied().unwrap_or(0.0);
            return (tx, ty);
        }
    }
    (0.0, 0.0)
}

fn parse_points(value: &str) -> Vec<(f64, f64)> {
    value
        .split_whitespace()
        .filter_map(|pair| {
            let mut it = pair.splitn(2, ',');
            let x: f64 = it.next()?.parse().ok()?;
            let y: f64 = it.next()?.parse().ok()?;
            Some((x, y))
        })
        .collect()
}

/// Approximates a path's bounding box by treating every numeric token in `d`
/// as alternating x/y coordinates. Good enough for axis-aligned die-boundary
/// rectangles expressed as paths, which is the only case spec.md 4.2 asks a
/// bounding-box approximation to cover.
fn parse_path_points(d: &str) -> Vec<(f64, f64)> {
    let nums: Vec<f64> = d
        .split(|c: char| c.is_alphabetic() || c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    nums.chunks_exact(2).map(|c| (c[0], c[1])).collect()
}

fn bbox_of(points: &[(f64, f64)]) -> Option<Bounds> {
    if points.is_empty() {
        return None;
    }
    let xmin = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let xmax = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let ymin = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let ymax = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    Some(Bounds::new(xmin, ymin, xmax, ymax))
}

fn offset(b: Bounds, tx: f64, ty: f64) -> Bounds {
    Bounds::new(b.x_min + tx, b.y_min + ty, b.x_max + tx, b.y_max + ty)
}

pub fn parse(filename: &str, bytes: &[u8], hints: &ParseHints) -> EngineResult<SchematicData> {
    let text = std::str::from_utf8(bytes).map_err(|_| EngineError::ParserError {
        format: "svg",
        offset: None,
        reason: "file is not valid UTF-8 text".to_string(),
    })?;

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut candidates: Vec<Candidate> = Vec::new();
    let mut labels: Vec<Label> = Vec::new();
    let mut transform_stack: Vec<(f64, f64)> = vec![(0.0, 0.0)];
    let mut pending_text_pos: Option<(f64, f64)> = None;
    let mut in_text = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Err(e) => {
                return Err(EngineError::ParserError {
                    format: "svg",
                    offset: Some(reader.buffer_position() as u64),
                    reason: format!("xml error: {e}"),
                })
            }
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.name().as_ref().to_vec();
                let (parent_tx, parent_ty) = *transform_stack.last().unwrap();

                match name.as_slice() {
                    b"g" => {
                        let (tx, ty) = attr(&e, "transform")
                            .map(|v| parse_translate(&v))
                            .unwrap_or((0.0, 0.0));
                        transform_stack.push((parent_tx + tx, parent_ty + ty));
                    }
                    b"rect" => {
                        let x = attr_f64(&e, "x").unwrap_or(0.0);
                        let y = attr_f64(&e, "y").unwrap_or(0.0);
                        let w = attr_f64(&e, "width").unwrap_or(0.0);
                        let h = attr_f64(&e, "height").unwrap_or(0.0);
                        let b = Bounds::new(x, y, x + w, y + h);
                        candidates.push(Candidate {
                            bounds: offset(b, parent_tx, parent_ty),
                        });
                    }
                    b"polygon" | b"polyline" => {
                        if let Some(points) = attr(&e, "points") {
                            if let Some(b) = bbox_of(&parse_points(&points)) {
                                candidates.push(Candidate {
                                    bounds: offset(b, parent_tx, parent_ty),
                                });
                            }
                        }
                    }
                    b"path" => {
                        if let Some(d) = attr(&e, "d") {
                            if let Some(b) = bbox_of(&parse_path_points(&d)) {
                                candidates.push(Candidate {
                                    bounds: offset(b, parent_tx, parent_ty),
                                });
                            }
                        }
                    }
                    b"text" => {
                        let x = attr_f64(&e, "x").unwrap_or(0.0) + parent_tx;
                        let y = attr_f64(&e, "y").unwrap_or(0.0) + parent_ty;
                        pending_text_pos = Some((x, y));
                        in_text = true;
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"g" && transform_stack.len() > 1 {
                    transform_stack.pop();
                }
                if e.name().as_ref() == b"text" {
                    in_text = false;
                }
            }
            Ok(Event::Text(t)) => {
                if in_text {
                    if let Some((x, y)) = pending_text_pos.take() {
                        let content = t.unescape().unwrap_or_default().trim().to_string();
                        if !content.is_empty() {
                            labels.push(Label { x, y, text: content });
                        }
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }

    if candidates.is_empty() {
        return Err(EngineError::ParserError {
            format: "svg",
            offset: None,
            reason: "noDiesDetected".to_string(),
        });
    }

    // Heuristic filter (spec.md 4.2): area within one order of magnitude of
    // the median candidate area, aspect ratio <= 4:1. A shape failing this
    // is non-geometric decoration in spirit (a title box, a legend, a
    // measurement marker) but spec.md 8.2.2's scenario 2 still counts it in
    // `dieCount` and marks it unavailable rather than discarding it outright
    // (SPEC_FULL.md §D), so the census stays complete and the heuristic only
    // decides availability.
    let mut areas: Vec<f64> = candidates.iter().map(|c| c.bounds.area()).collect();
    areas.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = areas[areas.len() / 2];

    let is_die = |b: &Bounds| -> bool {
        let area = b.area();
        let area_ok = median <= 0.0 || (area / median.max(f64::MIN_POSITIVE) >= 0.1 && area / median.max(f64::MIN_POSITIVE) <= 10.0);
        let w = b.width();
        let h = b.height();
        let aspect_ok = if w <= 0.0 || h <= 0.0 {
            false
        } else {
            (w.max(h) / w.min(h)) <= 4.0
        };
        area_ok && aspect_ok
    };

    let all_bounds: Vec<Bounds> = candidates.into_iter().map(|c| c.bounds).collect();

    if !all_bounds.iter().any(|b| is_die(b)) {
        return Err(EngineError::ParserError {
            format: "svg",
            offset: None,
            reason: "noDiesDetected".to_string(),
        });
    }

    let find_label = |b: &Bounds| -> Option<String> {
        labels
            .iter()
            .find(|l| l.x >= b.x_min && l.x <= b.x_max && l.y >= b.y_min && l.y <= b.y_max)
            .map(|l| l.text.clone())
    };

    let dies: Vec<DieBoundary> = all_bounds
        .iter()
        .enumerate()
        .map(|(index, b)| {
            let die_id = find_label(b).unwrap_or_else(|| format!("die_{index}"));
            DieBoundary::from_bounds(die_id, *b, is_die(b))
        })
        .collect();

    let dies = super::apply_die_size_filter(dies, hints.die_size_filter);

    Ok(SchematicData::new(
        uuid::Uuid::new_v4().to_string(),
        filename,
        FormatType::Svg,
        CoordinateSystem::SvgUnits,
        None,
        dies,
        SchematicSourceMetadata {
            software: Some("svg".to_string()),
            units: Some("px".to_string()),
            scale_factor: hints.coordinate_scale,
        },
    ))
}

/// Re-emits a parsed schematic as SVG (spec.md 6.5's "output (re-emit)"):
/// one `<rect>` per die boundary, unavailable dies dimmed, die id as a
/// `<text>` label. Lossy relative to the original file — only what
/// `SchematicData` actually retains survives the round trip.
pub fn emit(data: &super::SchematicData) -> String {
    use std::fmt::Write;
    let b = data.layout_bounds;
    let mut out = String::new();
    writeln!(
        out,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"{} {} {} {}\">",
        b.x_min, b.y_min, b.width(), b.height()
    )
    .ok();
    for die in &data.dies {
        let fill = if die.available { "#cfe8ff" } else { "#e0e0e0" };
        writeln!(
            out,
            "  <rect x=\"{:.6}\" y=\"{:.6}\" width=\"{:.6}\" height=\"{:.6}\" fill=\"{fill}\" stroke=\"#333\"/>",
            die.bounds.x_min, die.bounds.y_min, die.width, die.height
        )
        .ok();
        writeln!(
            out,
            "  <text x=\"{:.6}\" y=\"{:.6}\" font-size=\"1\">{}</text>",
            die.center_x, die.center_y, die.die_id
        )
        .ok();
    }
    out.push_str("</svg>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_svg_grid(n: usize) -> String {
        let mut s = String::from("<svg xmlns=\"http://www.w3.org/2000/svg\">\n<g transform=\"translate(5,5)\">\n");
        for i in 0..n {
            let x = (i % 3) * 20;
            let y = (i / 3) * 20;
            s.push_str(&format!("<rect x=\"{x}\" y=\"{y}\" width=\"10\" height=\"10\"/>\n"));
        }
        s.push_str("</g>\n</svg>");
        s
    }

    #[test]
    fn simple_3x3_grid() {
        let svg = synthetic_svg_grid(9);
        let data = parse("layout.svg", svg.as_bytes(), &ParseHints::default()).unwrap();
        assert_eq!(data.dies.len(), 9);
        assert_eq!(data.coordinate_system, CoordinateSystem::SvgUnits);
        for d in &data.dies {
            assert!(data.layout_bounds.x_min <= d.bounds.x_min);
        }
    }

    #[test]
    fn rejects_outlier_shapes_by_heuristic() {
        let mut svg = String::from("<svg xmlns=\"http://www.w3.org/2000/svg\">\n");
        for i in 0..9 {
            let x = (i % 3) * 20;
            let y = (i / 3) * 20;
            svg.push_str(&format!("<rect x=\"{x}\" y=\"{y}\" width=\"10\" height=\"10\"/>\n"));
        }
        // a huge legend box, ~100x area, should be dropped by the heuristic
        svg.push_str("<rect x=\"1000\" y=\"1000\" width=\"500\" height=\"500\"/>\n");
        svg.push_str("</svg>");
        let data = parse("layout.svg", svg.as_bytes(), &ParseHints::default()).unwrap();
        assert_eq!(data.dies.len(), 9);
    }
}
