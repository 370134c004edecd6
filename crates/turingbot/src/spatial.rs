//! Sparse 3D tape used as the agent's working memory
//!
//! Cells are addressed by integer coordinates and hold non-empty strings.
//! Writing an empty string erases a cell, so the map only ever contains
//! written cells. A single cursor marks the active read/write position.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::ToolError;

/// A point on the tape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coord {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl Coord {
    pub fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    /// Serialized key form: `"x,y,z"`
    pub fn key(&self) -> String {
        format!("{},{},{}", self.x, self.y, self.z)
    }

    /// Parse a key produced by [`Coord::key`]
    pub fn parse_key(key: &str) -> Option<Self> {
        let mut parts = key.split(',').map(|p| p.trim().parse::<i64>());
        let coord = match (parts.next(), parts.next(), parts.next()) {
            (Some(Ok(x)), Some(Ok(y)), Some(Ok(z))) => Coord::new(x, y, z),
            _ => return None,
        };
        parts.next().is_none().then_some(coord)
    }

    /// Chebyshev distance (largest per-axis difference)
    pub fn chebyshev(&self, other: &Coord) -> u64 {
        self.x
            .abs_diff(other.x)
            .max(self.y.abs_diff(other.y))
            .max(self.z.abs_diff(other.z))
    }

    fn offset(&self, (dx, dy, dz): (i64, i64, i64)) -> Self {
        Coord::new(
            self.x.wrapping_add(dx),
            self.y.wrapping_add(dy),
            self.z.wrapping_add(dz),
        )
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// One of the six unit steps along an axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    PosX,
    NegX,
    PosY,
    NegY,
    PosZ,
    NegZ,
}

impl Direction {
    pub fn delta(&self) -> (i64, i64, i64) {
        match self {
            Direction::PosX => (1, 0, 0),
            Direction::NegX => (-1, 0, 0),
            Direction::PosY => (0, 1, 0),
            Direction::NegY => (0, -1, 0),
            Direction::PosZ => (0, 0, 1),
            Direction::NegZ => (0, 0, -1),
        }
    }
}

impl FromStr for Direction {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "+x" | "right" => Ok(Direction::PosX),
            "-x" | "left" => Ok(Direction::NegX),
            "+y" | "up" => Ok(Direction::PosY),
            "-y" | "down" => Ok(Direction::NegY),
            "+z" | "forward" => Ok(Direction::PosZ),
            "-z" | "backward" | "back" => Ok(Direction::NegZ),
            _ => Err(ToolError::InvalidDirection(s.trim().to_string())),
        }
    }
}

/// On-disk form of the tape
#[derive(Debug, Default, Serialize, Deserialize)]
struct TapeSnapshot {
    #[serde(default, alias = "head")]
    cursor: [i64; 3],
    #[serde(default)]
    cells: BTreeMap<String, String>,
}

/// Sparse, unbounded 3D tape with a movable cursor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpatialStore {
    cells: HashMap<Coord, String>,
    cursor: Coord,
}

impl SpatialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> Coord {
        self.cursor
    }

    /// Number of written cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Value under the cursor, `""` if the cell is empty
    pub fn read(&self) -> &str {
        self.cells.get(&self.cursor).map(String::as_str).unwrap_or("")
    }

    /// Write under the cursor; an empty value erases the cell
    pub fn write(&mut self, value: &str) -> String {
        if value.is_empty() {
            self.cells.remove(&self.cursor);
        } else {
            self.cells.insert(self.cursor, value.to_string());
        }
        format!("Wrote '{}' at {}", value, self.cursor)
    }

    /// Step the cursor one cell along an axis
    pub fn step(&mut self, direction: Direction) -> Coord {
        self.cursor = self.cursor.offset(direction.delta());
        self.cursor
    }

    /// Parse a direction (canonical or alias) and step; the cursor is untouched on error
    pub fn move_cursor(&mut self, direction: &str) -> Result<Coord, ToolError> {
        let direction: Direction = direction.parse()?;
        Ok(self.step(direction))
    }

    /// Place the cursor anywhere; no bounds
    pub fn jump(&mut self, x: i64, y: i64, z: i64) -> Coord {
        self.cursor = Coord::new(x, y, z);
        self.cursor
    }

    /// All written cells within Chebyshev distance `radius` of the cursor
    pub fn scan(&self, radius: i64) -> Result<BTreeMap<String, String>, ToolError> {
        let radius = u64::try_from(radius).map_err(|_| ToolError::InvalidRadius(radius))?;
        Ok(self
            .cells
            .iter()
            .filter(|(coord, _)| coord.chebyshev(&self.cursor) <= radius)
            .map(|(coord, value)| (coord.key(), value.clone()))
            .collect())
    }

    pub fn status(&self) -> String {
        format!(
            "Cursor: {} | Current cell: '{}' | Total written cells: {}",
            self.cursor,
            self.read(),
            self.cells.len()
        )
    }

    fn to_snapshot(&self) -> TapeSnapshot {
        TapeSnapshot {
            cursor: [self.cursor.x, self.cursor.y, self.cursor.z],
            cells: self
                .cells
                .iter()
                .map(|(coord, value)| (coord.key(), value.clone()))
                .collect(),
        }
    }

    fn from_snapshot(snapshot: TapeSnapshot) -> Result<Self> {
        let [x, y, z] = snapshot.cursor;
        let mut cells = HashMap::with_capacity(snapshot.cells.len());
        for (key, value) in snapshot.cells {
            let coord = Coord::parse_key(&key)
                .with_context(|| format!("Invalid cell coordinate '{}'", key))?;
            if !value.is_empty() {
                cells.insert(coord, value);
            }
        }
        Ok(Self {
            cells,
            cursor: Coord::new(x, y, z),
        })
    }

    /// Serialize to the persisted JSON form
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.to_snapshot()).context("Failed to serialize tape")
    }

    /// Deserialize from the persisted JSON form; missing fields default
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: TapeSnapshot = serde_json::from_str(json).context("Failed to parse tape state")?;
        Self::from_snapshot(snapshot)
    }

    /// Persist tape state to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write tape state to {}", path.display()))
    }

    /// Load tape state; a missing file yields an empty tape
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read tape state from {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("Invalid tape state in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let mut tape = SpatialStore::new();
        assert_eq!(tape.read(), "");

        let msg = tape.write("hello");
        assert_eq!(msg, "Wrote 'hello' at (0, 0, 0)");
        assert_eq!(tape.read(), "hello");
        assert_eq!(tape.len(), 1);
    }

    #[test]
    fn test_write_empty_erases_cell() {
        let mut tape = SpatialStore::new();
        tape.jump(2, -3, 4);
        tape.write("x");
        tape.write("");

        assert_eq!(tape.read(), "");
        assert!(tape.is_empty());
        let json: serde_json::Value = serde_json::from_str(&tape.to_json().unwrap()).unwrap();
        assert!(json["cells"].get("2,-3,4").is_none());
    }

    #[test]
    fn test_move_canonical_and_aliases() {
        let mut tape = SpatialStore::new();
        let cases = [
            ("+x", Coord::new(1, 0, 0)),
            ("-x", Coord::new(-1, 0, 0)),
            ("+y", Coord::new(0, 1, 0)),
            ("-y", Coord::new(0, -1, 0)),
            ("+z", Coord::new(0, 0, 1)),
            ("-z", Coord::new(0, 0, -1)),
            ("right", Coord::new(1, 0, 0)),
            ("left", Coord::new(-1, 0, 0)),
            ("up", Coord::new(0, 1, 0)),
            ("down", Coord::new(0, -1, 0)),
            ("forward", Coord::new(0, 0, 1)),
            ("backward", Coord::new(0, 0, -1)),
            ("back", Coord::new(0, 0, -1)),
            ("  UP  ", Coord::new(0, 1, 0)),
            ("+X", Coord::new(1, 0, 0)),
        ];

        for (direction, delta) in cases {
            tape.jump(0, 0, 0);
            let pos = tape.move_cursor(direction).unwrap();
            assert_eq!(pos, delta, "direction {:?}", direction);
        }
    }

    #[test]
    fn test_invalid_direction_leaves_cursor() {
        let mut tape = SpatialStore::new();
        tape.jump(5, 5, 5);

        for bad in ["", "x", "north", "++x", "upward", "+w"] {
            let err = tape.move_cursor(bad).unwrap_err();
            assert!(matches!(err, ToolError::InvalidDirection(_)), "{:?}", bad);
            assert_eq!(tape.cursor(), Coord::new(5, 5, 5));
        }
    }

    #[test]
    fn test_jump_unbounded() {
        let mut tape = SpatialStore::new();
        tape.move_cursor("+x").unwrap();
        let pos = tape.jump(-1_000_000_000_000, i64::MAX, 0);
        assert_eq!(pos, Coord::new(-1_000_000_000_000, i64::MAX, 0));
    }

    #[test]
    fn test_scan_chebyshev() {
        let mut tape = SpatialStore::new();
        for (x, y, z, v) in [(0, 0, 0, "o"), (1, 1, 1, "corner"), (2, 0, 0, "far"), (-1, 0, 1, "near")] {
            tape.jump(x, y, z);
            tape.write(v);
        }
        tape.jump(0, 0, 0);

        let cells = tape.scan(1).unwrap();
        let keys: Vec<&str> = cells.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["-1,0,1", "0,0,0", "1,1,1"]);

        let all = tape.scan(2).unwrap();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_scan_zero_and_negative() {
        let mut tape = SpatialStore::new();
        assert!(tape.scan(0).unwrap().is_empty());

        tape.write("here");
        tape.jump(1, 0, 0);
        tape.write("neighbour");
        tape.jump(0, 0, 0);

        let cells = tape.scan(0).unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells["0,0,0"], "here");

        assert!(matches!(tape.scan(-1), Err(ToolError::InvalidRadius(-1))));
    }

    #[test]
    fn test_status() {
        let mut tape = SpatialStore::new();
        tape.jump(1, 2, 3);
        tape.write("v");
        assert_eq!(
            tape.status(),
            "Cursor: (1, 2, 3) | Current cell: 'v' | Total written cells: 1"
        );
    }

    #[test]
    fn test_roundtrip_after_mixed_operations() {
        let mut tape = SpatialStore::new();
        tape.write("a");
        tape.move_cursor("up").unwrap();
        tape.write("b");
        tape.jump(-7, 3, 99);
        tape.write("c");
        tape.move_cursor("back").unwrap();
        tape.jump(-7, 3, 99);
        tape.write("");
        tape.move_cursor("left").unwrap();

        let restored = SpatialStore::from_json(&tape.to_json().unwrap()).unwrap();
        assert_eq!(restored, tape);
        assert_eq!(restored.cursor(), Coord::new(-8, 3, 99));
    }

    #[test]
    fn test_from_json_defaults_and_legacy_head() {
        let empty = SpatialStore::from_json("{}").unwrap();
        assert_eq!(empty.cursor(), Coord::new(0, 0, 0));
        assert!(empty.is_empty());

        let legacy = SpatialStore::from_json(r#"{"head": [1, 2, 3], "cells": {"1,2,3": "x", "0,0,0": ""}}"#).unwrap();
        assert_eq!(legacy.cursor(), Coord::new(1, 2, 3));
        assert_eq!(legacy.read(), "x");
        assert_eq!(legacy.len(), 1);

        assert!(SpatialStore::from_json(r#"{"cells": {"1,2": "x"}}"#).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state/tape.json");

        let missing = SpatialStore::load(&path).unwrap();
        assert!(missing.is_empty());

        let mut tape = SpatialStore::new();
        tape.jump(3, 3, 3);
        tape.write("persisted");
        tape.save(&path).unwrap();

        let loaded = SpatialStore::load(&path).unwrap();
        assert_eq!(loaded, tape);
    }

    #[test]
    fn test_coord_key_parsing() {
        assert_eq!(Coord::parse_key("1,-2,3"), Some(Coord::new(1, -2, 3)));
        assert_eq!(Coord::parse_key(" 1, 2 ,3"), Some(Coord::new(1, 2, 3)));
        assert_eq!(Coord::parse_key("1,2"), None);
        assert_eq!(Coord::parse_key("1,2,3,4"), None);
        assert_eq!(Coord::parse_key("a,b,c"), None);
    }
}
