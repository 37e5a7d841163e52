//! Geometry & transforms (C1).
//! Mission: minimal, dependency-narrow numeric core shared by every parser,
//! rule, and emitter. Nobody outside this module sees `nalgebra` types.

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// A point in whatever `CoordinateSystem` the caller has in scope. Carries no
/// unit at the type level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding box, `x_min <= x_max`, `y_min <= y_max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Bounds {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        debug_assert!(x_min <= x_max && y_min <= y_max);
        Self { x_min, y_min, x_max, y_max }
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> Point2D {
        Point2D::new(
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }
}

/// Tagged coordinate system; determines origin placement and y-axis direction
/// for whoever is reading raw (x, y) pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CoordinateSystem {
    CartesianCenterOrigin,
    CartesianCornerOrigin,
    Polar,
    GdsiiUnits,
    CadUnits,
    Normalized01,
    SvgUnits,
}

/// Transform parameters. Applied in the fixed order: flip -> scale -> rotate
/// -> translate. Rotation is always around the origin; callers wanting
/// rotation about an arbitrary center must fold a pre/post translation into
/// `offset_x`/`offset_y` themselves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationConfig {
    pub rotation_angle_deg: f64,
    pub scale_factor: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub flip_x: bool,
    pub flip_y: bool,
}

impl Default for TransformationConfig {
    fn default() -> Self {
        Self {
            rotation_angle_deg: 0.0,
            scale_factor: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            flip_x: false,
            flip_y: false,
        }
    }
}

impl TransformationConfig {
    /// Bounds check used by the strategy compiler (spec.md 4.5).
    pub fn validate(&self) -> Result<(), String> {
        if !(-360.0..=360.0).contains(&self.rotation_angle_deg) {
            return Err(format!(
                "rotationAngleDeg {} out of range [-360, 360]",
                self.rotation_angle_deg
            ));
        }
        if self.scale_factor <= 0.0 {
            return Err(format!(
                "scaleFactor {} must be > 0",
                self.scale_factor
            ));
        }
        Ok(())
    }
}

/// Applies `t` to `p` in the documented fixed order: flip, then scale, then
/// rotate (about the origin), then translate.
pub fn apply_transform(p: Point2D, t: &TransformationConfig) -> Point2D {
    let mut x = p.x;
    let mut y = p.y;

    if t.flip_x {
        x = -x;
    }
    if t.flip_y {
        y = -y;
    }

    x *= t.scale_factor;
    y *= t.scale_factor;

    if t.rotation_angle_deg != 0.0 {
        let theta = t.rotation_angle_deg.to_radians();
        let rot = Matrix2::new(theta.cos(), -theta.sin(), theta.sin(), theta.cos());
        let v = rot * Vector2::new(x, y);
        x = v.x;
        y = v.y;
    }

    x += t.offset_x;
    y += t.offset_y;

    Point2D::new(x, y)
}

/// The inverse of `apply_transform`, used by the round-trip invariant test
/// (spec.md 8.1). Only meaningful when `scale_factor != 0`.
pub fn invert_transform(p: Point2D, t: &TransformationConfig) -> Point2D {
    let mut x = p.x - t.offset_x;
    let mut y = p.y - t.offset_y;

    if t.rotation_angle_deg != 0.0 {
        let theta = (-t.rotation_angle_deg).to_radians();
        let rot = Matrix2::new(theta.cos(), -theta.sin(), theta.sin(), theta.cos());
        let v = rot * Vector2::new(x, y);
        x = v.x;
        y = v.y;
    }

    x /= t.scale_factor;
    y /= t.scale_factor;

    if t.flip_y {
        y = -y;
    }
    if t.flip_x {
        x = -x;
    }

    Point2D::new(x, y)
}

/// Minimal enclosing bounds of a non-empty list of bounds. Panics on an empty
/// slice; callers hold a non-empty invariant at the call site (every
/// schematic has at least one die, spec.md 4.2 `noDiesDetected`).
pub fn enclosing(bounds: &[Bounds]) -> Bounds {
    let first = bounds[0];
    bounds.iter().skip(1).fold(first, |acc, b| {
        Bounds::new(
            acc.x_min.min(b.x_min),
            acc.y_min.min(b.y_min),
            acc.x_max.max(b.x_max),
            acc.y_max.max(b.y_max),
        )
    })
}

pub fn contains(bounds: &Bounds, point: Point2D) -> bool {
    point.x >= bounds.x_min
        && point.x <= bounds.x_max
        && point.y >= bounds.y_min
        && point.y <= bounds.y_max
}

pub fn distance(a: Point2D, b: Point2D) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_within_epsilon() {
        let cases = [
            TransformationConfig { rotation_angle_deg: 37.0, scale_factor: 2.5, offset_x: 10.0, offset_y: -4.0, flip_x: true, flip_y: false },
            TransformationConfig { rotation_angle_deg: -180.0, scale_factor: 0.3, offset_x: 0.0, offset_y: 0.0, flip_x: false, flip_y: true },
            TransformationConfig::default(),
        ];
        let points = [Point2D::new(1.0, 1.0), Point2D::new(-5.5, 3.25), Point2D::new(0.0, 0.0)];
        for t in &cases {
            for p in &points {
                let forward = apply_transform(*p, t);
                let back = invert_transform(forward, t);
                assert!((back.x - p.x).abs() < 1e-9, "{:?} {:?}", back, p);
                assert!((back.y - p.y).abs() < 1e-9, "{:?} {:?}", back, p);
            }
        }
    }

    #[test]
    fn enclosing_contains_every_input() {
        let bounds = vec![
            Bounds::new(0.0, 0.0, 1.0, 1.0),
            Bounds::new(-3.0, 2.0, -1.0, 5.0),
            Bounds::new(10.0, -10.0, 12.0, -8.0),
        ];
        let enc = enclosing(&bounds);
        for b in &bounds {
            assert!(enc.x_min <= b.x_min && enc.x_max >= b.x_max);
            assert!(enc.y_min <= b.y_min && enc.y_max >= b.y_max);
        }
    }

    #[test]
    fn transform_order_is_flip_scale_rotate_translate() {
        let t = TransformationConfig { rotation_angle_deg: 90.0, scale_factor: 2.0, offset_x: 1.0, offset_y: 1.0, flip_x: true, flip_y: false };
        let p = Point2D::new(1.0, 0.0);
        // flip_x: (-1, 0) -> scale: (-2, 0) -> rotate 90ccw: (0, -2) -> translate: (1, -1)
        let out = apply_transform(p, &t);
        assert!((out.x - 1.0).abs() < 1e-9);
        assert!((out.y - (-1.0)).abs() < 1e-9);
    }
}
