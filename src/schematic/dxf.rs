//! DXF parser.
//!
//! DXF is a text format of group-code/value line pairs. This reader tokenizes
//! pairs, splits them into entities on group code 0, and understands
//! `LWPOLYLINE`, `POLYLINE`/`VERTEX`, `LINE` (grouped into closed loops by
//! shared endpoints), `CIRCLE`, `INSERT` (block expansion), and
//! `TEXT`/`MTEXT` labels, per spec.md 4.2.

use super::dispatch::ParseHints;
use super::{DieBoundary, FormatType, SchematicData, SchematicSourceMetadata};
use crate::error::{EngineError, EngineResult};
use crate::geometry::{enclosing, Bounds, CoordinateSystem};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct DxfEntity {
    kind: String,
    layer: String,
    codes: Vec<(i32, String)>,
}

fn tokenize(text: &str) -> EngineResult<Vec<(i32, String)>> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < 2 {
        return Err(EngineError::ParserError {
            format: "dxf",
            offset: None,
            reason: "file too short to contain group-code pairs".to_string(),
        });
    }
    let mut pairs = Vec::with_capacity(lines.len() / 2);
    let mut i = 0;
    while i + 1 < lines.len() {
        let code: i32 = lines[i].trim().parse().map_err(|_| EngineError::ParserError {
            format: "dxf",
            offset: Some(i as u64),
            reason: format!("expected integer group code, got {:?}", lines[i]),
        })?;
        pairs.push((code, lines[i + 1].trim().to_string()));
        i += 2;
    }
    Ok(pairs)
}

fn split_entities(pairs: &[(i32, String)]) -> Vec<DxfEntity> {
    let mut entities = Vec::new();
    let mut current: Option<DxfEntity> = None;
    for (code, value) in pairs {
        if *code == 0 {
            if let Some(e) = current.take() {
                entities.push(e);
            }
            current = Some(DxfEntity {
                kind: value.clone(),
                layer: "0".to_string(),
                codes: Vec::new(),
            });
            continue;
        }
        if let Some(e) = current.as_mut() {
            if *code == 8 {
                e.layer = value.clone();
            }
            e.codes.push((*code, value.clone()));
        }
    }
    if let Some(e) = current.take() {
        entities.push(e);
    }
    entities
}

fn codes_f64(e: &DxfEntity, code: i32) -> Vec<f64> {
    e.codes
        .iter()
        .filter(|(c, _)| *c == code)
        .filter_map(|(_, v)| v.parse::<f64>().ok())
        .collect()
}

fn code_str(e: &DxfEntity, code: i32) -> Option<String> {
    e.codes.iter().find(|(c, _)| *c == code).map(|(_, v)| v.clone())
}

fn polyline_points(e: &DxfEntity) -> Vec<(f64, f64)> {
    let xs = codes_f64(e, 10);
    let ys = codes_f64(e, 20);
    xs.into_iter().zip(ys).collect()
}

fn bbox_of_points(points: &[(f64, f64)]) -> Option<Bounds> {
    if points.is_empty() {
        return None;
    }
    let xmin = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let xmax = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let ymin = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let ymax = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    Some(Bounds::new(xmin, ymin, xmax, ymax))
}

fn key(p: (f64, f64)) -> (i64, i64) {
    ((p.0 * 1000.0).round() as i64, (p.1 * 1000.0).round() as i64)
}

/// Groups LINE entities on a layer into closed loops by shared endpoints
/// (union-find over endpoint identity), returning one bbox per component.
fn group_lines_into_loops(lines: &[(f64, f64, f64, f64)]) -> Vec<Bounds> {
    struct Uf {
        parent: HashMap<(i64, i64), (i64, i64)>,
    }
    impl Uf {
        fn find(&mut self, x: (i64, i64)) -> (i64, i64) {
            let p = *self.parent.entry(x).or_insert(x);
            if p == x {
                x
            } else {
                let root = self.find(p);
                self.parent.insert(x, root);
                root
            }
        }
        fn union(&mut self, a: (i64, i64), b: (i64, i64)) {
            let ra = self.find(a);
            let rb = self.find(b);
            if ra != rb {
                self.parent.insert(ra, rb);
            }
        }
    }
    let mut uf = Uf { parent: HashMap::new() };
    let mut points_by_root: HashMap<(i64, i64), Vec<(f64, f64)>> = HashMap::new();

    for (x1, y1, x2, y2) in lines {
        let a = key((*x1, *y1));
        let b = key((*x2, *y2));
        uf.find(a);
        uf.find(b);
        uf.union(a, b);
    }
    for (x1, y1, x2, y2) in lines {
        let a = key((*x1, *y1));
        let b = key((*x2, *y2));
        let root = uf.find(a);
        points_by_root.entry(root).or_default().push((*x1, *y1));
        let root2 = uf.find(b);
        points_by_root.entry(root2).or_default().push((*x2, *y2));
    }
    let mut out = Vec::new();
    let mut roots: Vec<(i64, i64)> = points_by_root.keys().copied().collect();
    roots.sort();
    for root in roots {
        if let Some(bounds) = bbox_of_points(&points_by_root[&root]) {
            out.push(bounds);
        }
    }
    out
}

fn pick_default_layer(entities: &[DxfEntity]) -> String {
    let re_hint = ["die", "boundary", "chip"];
    let mut layers: Vec<String> = entities.iter().map(|e| e.layer.clone()).collect();
    layers.sort();
    layers.dedup();
    layers
        .iter()
        .find(|l| {
            let lower = l.to_lowercase();
            re_hint.iter().any(|h| lower.contains(h))
        })
        .cloned()
        .unwrap_or_else(|| "0".to_string())
}

pub fn parse(filename: &str, bytes: &[u8], hints: &ParseHints) -> EngineResult<SchematicData> {
    let text = std::str::from_utf8(bytes).map_err(|_| EngineError::ParserError {
        format: "dxf",
        offset: None,
        reason: "file is not valid UTF-8 text".to_string(),
    })?;
    let pairs = tokenize(text)?;
    let entities = split_entities(&pairs);

    let target_layer = hints
        .target_layer
        .clone()
        .unwrap_or_else(|| pick_default_layer(&entities));

    let on_layer: Vec<&DxfEntity> = entities.iter().filter(|e| e.layer == target_layer).collect();

    let texts: Vec<(f64, f64, String)> = on_layer
        .iter()
        .filter(|e| e.kind == "TEXT" || e.kind == "MTEXT")
        .filter_map(|e| {
            let xs = codes_f64(e, 10);
            let ys = codes_f64(e, 20);
            let s = code_str(e, 1)?;
            Some((*xs.first()?, *ys.first()?, s))
        })
        .collect();

    let find_label = |b: &Bounds| -> Option<String> {
        texts
            .iter()
            .find(|(x, y, _)| *x >= b.x_min && *x <= b.x_max && *y >= b.y_min && *y <= b.y_max)
            .map(|(_, _, s)| s.clone())
    };

    let mut die_bounds: Vec<Bounds> = Vec::new();

    for e in on_layer.iter().filter(|e| e.kind == "LWPOLYLINE" || e.kind == "POLYLINE") {
        let points = polyline_points(e);
        if let Some(b) = bbox_of_points(&points) {
            die_bounds.push(b);
        }
    }

    for e in on_layer.iter().filter(|e| e.kind == "CIRCLE") {
        let cx = codes_f64(e, 10).first().copied().unwrap_or(0.0);
        let cy = codes_f64(e, 20).first().copied().unwrap_or(0.0);
        let r = codes_f64(e, 40).first().copied().unwrap_or(0.0);
        die_bounds.push(Bounds::new(cx - r, cy - r, cx + r, cy + r));
    }

    let line_segments: Vec<(f64, f64, f64, f64)> = on_layer
        .iter()
        .filter(|e| e.kind == "LINE")
        .filter_map(|e| {
            let x1 = codes_f64(e, 10).first().copied()?;
            let y1 = codes_f64(e, 20).first().copied()?;
            let x2 = codes_f64(e, 11).first().copied()?;
            let y2 = codes_f64(e, 21).first().copied()?;
            Some((x1, y1, x2, y2))
        })
        .collect();
    die_bounds.extend(group_lines_into_loops(&line_segments));

    // INSERT: expand a block reference using the BLOCKS section definition,
    // translated by the insertion point.
    let blocks: HashMap<String, Vec<Bounds>> = {
        let mut map: HashMap<String, Vec<Bounds>> = HashMap::new();
        let mut current_block: Option<String> = None;
        for e in &entities {
            if e.kind == "BLOCK" {
                current_block = code_str(e, 2);
            } else if e.kind == "ENDBLK" {
                current_block = None;
            } else if let Some(name) = &current_block {
                let b = match e.kind.as_str() {
                    "LWPOLYLINE" | "POLYLINE" => bbox_of_points(&polyline_points(e)),
                    "CIRCLE" => {
                        let cx = codes_f64(e, 10).first().copied().unwrap_or(0.0);
                        let cy = codes_f64(e, 20).first().copied().unwrap_or(0.0);
                        let r = codes_f64(e, 40).first().copied().unwrap_or(0.0);
                        Some(Bounds::new(cx - r, cy - r, cx + r, cy + r))
                    }
                    _ => None,
                };
                if let Some(b) = b {
                    map.entry(name.clone()).or_default().push(b);
                }
            }
        }
        map
    };

    for e in on_layer.iter().filter(|e| e.kind == "INSERT") {
        if let Some(block_name) = code_str(e, 2) {
            if let Some(parts) = blocks.get(&block_name) {
                let ix = codes_f64(e, 10).first().copied().unwrap_or(0.0);
                let iy = codes_f64(e, 20).first().copied().unwrap_or(0.0);
                let block_bbox = enclosing(parts);
                die_bounds.push(Bounds::new(
                    block_bbox.x_min + ix,
                    block_bbox.y_min + iy,
                    block_bbox.x_max + ix,
                    block_bbox.y_max + iy,
                ));
            }
        }
    }

    let dies: Vec<DieBoundary> = die_bounds
        .iter()
        .enumerate()
        .map(|(index, b)| {
            let die_id = find_label(b).unwrap_or_else(|| format!("die_{index}"));
            DieBoundary::from_bounds(die_id, *b, true)
        })
        .collect();

    let dies = super::apply_die_size_filter(dies, hints.die_size_filter);

    Ok(SchematicData::new(
        uuid::Uuid::new_v4().to_string(),
        filename,
        FormatType::Dxf,
        CoordinateSystem::CadUnits,
        None,
        dies,
        SchematicSourceMetadata {
            software: Some("dxf".to_string()),
            units: None,
            scale_factor: hints.coordinate_scale,
        },
    ))
}

/// Re-emits a parsed schematic as a minimal DXF (spec.md 6.5): one closed
/// `LWPOLYLINE` per die boundary on layer `DIES`, ASCII group-code pairs.
pub fn emit(data: &super::SchematicData) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    out.push_str("0\nSECTION\n2\nENTITIES\n");
    for die in &data.dies {
        let b = die.bounds;
        writeln!(out, "0\nLWPOLYLINE").ok();
        writeln!(out, "8\nDIES").ok();
        writeln!(out, "90\n4").ok();
        writeln!(out, "70\n1").ok();
        for (x, y) in [
            (b.x_min, b.y_min),
            (b.x_max, b.y_min),
            (b.x_max, b.y_max),
            (b.x_min, b.y_max),
        ] {
            writeln!(out, "10\n{x:.6}").ok();
            writeln!(out, "20\n{y:.6}").ok();
        }
        writeln!(out, "0\nTEXT").ok();
        writeln!(out, "8\nDIES").ok();
        writeln!(out, "10\n{:.6}", die.center_x).ok();
        writeln!(out, "20\n{:.6}", die.center_y).ok();
        writeln!(out, "1\n{}", die.die_id).ok();
    }
    out.push_str("0\nENDSEC\n0\nEOF\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_dxf() -> String {
        let mut s = String::new();
        s.push_str("0\nSECTION\n2\nENTITIES\n");
        for (i, layer) in [("0", false), ("DIE_BOUNDARY", true), ("METAL1", false)].iter().enumerate() {
            let (layer_name, _is_target) = layer;
            let x0 = i as f64 * 100.0;
            s.push_str("0\nLWPOLYLINE\n8\n");
            s.push_str(layer_name);
            s.push('\n');
            s.push_str("90\n4\n");
            for (dx, dy) in [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)] {
                s.push_str(&format!("10\n{}\n20\n{}\n", x0 + dx, dy));
            }
        }
        s.push_str("0\nTEXT\n8\nDIE_BOUNDARY\n10\n105\n20\n5\n1\ndie_7\n");
        s.push_str("0\nENDSEC\n0\nEOF\n");
        s
    }

    #[test]
    fn filters_by_target_layer() {
        let text = synthetic_dxf();
        let hints = ParseHints {
            target_layer: Some("DIE_BOUNDARY".to_string()),
            ..Default::default()
        };
        let data = parse("layout.dxf", text.as_bytes(), &hints).unwrap();
        assert_eq!(data.dies.len(), 1);
        assert_eq!(data.dies[0].die_id, "die_7");
    }
}
