//! Wafer model: `Die` and `WaferMap` (spec.md 3.2).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DieCoord {
    pub x: i64,
    pub y: i64,
}

impl DieCoord {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Die {
    pub x: i64,
    pub y: i64,
    pub available: bool,
}

impl Die {
    pub fn coord(&self) -> DieCoord {
        DieCoord::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaferMetadata {
    pub wafer_size: Option<String>,
    pub product_type: Option<String>,
    pub lot_id: Option<String>,
}

/// A finite set of `Die`, uniquely keyed by (x, y).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaferMap {
    dies: HashMap<DieCoord, Die>,
    pub metadata: WaferMetadata,
}

impl WaferMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a die, overwriting any existing entry at the same coordinate
    /// (the invariant "no two dies share (x, y)" is enforced by the map key).
    pub fn insert(&mut self, die: Die) {
        self.dies.insert(die.coord(), die);
    }

    pub fn get(&self, coord: DieCoord) -> Option<&Die> {
        self.dies.get(&coord)
    }

    pub fn len(&self) -> usize {
        self.dies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dies.is_empty()
    }

    pub fn dies(&self) -> impl Iterator<Item = &Die> {
        self.dies.values()
    }

    pub fn available_dies(&self) -> impl Iterator<Item = &Die> {
        self.dies.values().filter(|d| d.available)
    }

    pub fn available_count(&self) -> usize {
        self.available_dies().count()
    }

    pub fn contains(&self, coord: DieCoord) -> bool {
        self.dies.contains_key(&coord)
    }

    /// Geometric centroid of available dies, in grid coordinates. `None` if
    /// there are no available dies.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        let mut sum_x = 0i64;
        let mut sum_y = 0i64;
        let mut n = 0i64;
        for d in self.available_dies() {
            sum_x += d.x;
            sum_y += d.y;
            n += 1;
        }
        if n == 0 {
            return None;
        }
        Some((sum_x as f64 / n as f64, sum_y as f64 / n as f64))
    }
}

// serde(de)serialization support for the HashMap<DieCoord, Die> isn't needed
// on the wire (consumers send/receive a plain die list); provide a simple
// list-based wire shape used by the RPC facade instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaferMapWire {
    pub dies: Vec<Die>,
    #[serde(default)]
    pub metadata: WaferMetadata,
}

impl From<WaferMapWire> for WaferMap {
    fn from(w: WaferMapWire) -> Self {
        let mut map = WaferMap::new();
        for d in w.dies {
            map.insert(d);
        }
        map.metadata = w.metadata;
        map
    }
}

impl From<&WaferMap> for WaferMapWire {
    fn from(w: &WaferMap) -> Self {
        Self {
            dies: w.dies().cloned().collect(),
            metadata: w.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_key_overwrites() {
        let mut wafer = WaferMap::new();
        wafer.insert(Die { x: 1, y: 1, available: true });
        wafer.insert(Die { x: 1, y: 1, available: false });
        assert_eq!(wafer.len(), 1);
        assert!(!wafer.get(DieCoord::new(1, 1)).unwrap().available);
    }

    #[test]
    fn available_subset_invariant() {
        let mut wafer = WaferMap::new();
        for i in 0..5 {
            wafer.insert(Die { x: i, y: 0, available: i % 2 == 0 });
        }
        assert_eq!(wafer.len(), 5);
        assert_eq!(wafer.available_count(), 3);
        assert!(wafer.available_count() <= wafer.len());
    }
}
