//! Grid geometry: room dimensions, cells, and the spawn search.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Largest side length accepted for a room grid.
pub const MAX_GRID_SIDE: u32 = 100;

/// Number of rings searched around a spawn point before falling back to it.
pub const SPAWN_SEARCH_RINGS: u32 = 4;

/// A cell on a room grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPosition {
    pub x: u32,
    pub y: u32,
}

impl GridPosition {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Size of a room grid. `cell_size` is carried for renderers only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridDimensions {
    rows: u32,
    cols: u32,
    cell_size: u32,
}

impl GridDimensions {
    /// Create validated dimensions.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if a side is zero or exceeds
    /// `MAX_GRID_SIDE`, or if the cell size is zero.
    pub fn new(rows: u32, cols: u32, cell_size: u32) -> Result<Self, DomainError> {
        if rows == 0 || cols == 0 {
            return Err(DomainError::validation("Grid must have at least one row and column"));
        }
        if rows > MAX_GRID_SIDE || cols > MAX_GRID_SIDE {
            return Err(DomainError::validation(format!(
                "Grid sides cannot exceed {} cells",
                MAX_GRID_SIDE
            )));
        }
        if cell_size == 0 {
            return Err(DomainError::validation("Cell size must be positive"));
        }
        Ok(Self {
            rows,
            cols,
            cell_size,
        })
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn cell_size(&self) -> u32 {
        self.cell_size
    }

    pub fn contains(&self, pos: GridPosition) -> bool {
        pos.x < self.cols && pos.y < self.rows
    }

    /// Fails with `OutOfBounds` when the cell lies outside the grid.
    pub fn ensure_contains(&self, pos: GridPosition) -> Result<(), DomainError> {
        if self.contains(pos) {
            Ok(())
        } else {
            Err(DomainError::OutOfBounds {
                x: pos.x,
                y: pos.y,
                cols: self.cols,
                rows: self.rows,
            })
        }
    }

    pub fn center(&self) -> GridPosition {
        GridPosition::new(self.cols / 2, self.rows / 2)
    }

    /// Nearest in-bounds cell for which `is_free` holds, searching outward
    /// ring by ring from `spawn` (ring 0 is the spawn cell itself).
    ///
    /// Gives up after `SPAWN_SEARCH_RINGS` rings and returns `spawn`.
    pub fn nearest_free_cell(
        &self,
        spawn: GridPosition,
        mut is_free: impl FnMut(GridPosition) -> bool,
    ) -> GridPosition {
        for ring in 0..=SPAWN_SEARCH_RINGS {
            if let Some(found) = self.ring_cells(spawn, ring).into_iter().find(|p| is_free(*p)) {
                return found;
            }
        }
        spawn
    }

    /// In-bounds cells at Chebyshev distance `ring` from `center`, row-major.
    fn ring_cells(&self, center: GridPosition, ring: u32) -> Vec<GridPosition> {
        let ring = i64::from(ring);
        let (cx, cy) = (i64::from(center.x), i64::from(center.y));
        let mut cells = Vec::new();
        for dy in -ring..=ring {
            for dx in -ring..=ring {
                if dx.abs().max(dy.abs()) != ring {
                    continue;
                }
                let (x, y) = (cx + dx, cy + dy);
                if x < 0 || y < 0 {
                    continue;
                }
                let pos = GridPosition::new(x as u32, y as u32);
                if self.contains(pos) {
                    cells.push(pos);
                }
            }
        }
        cells
    }
}

impl Default for GridDimensions {
    fn default() -> Self {
        Self {
            rows: 15,
            cols: 15,
            cell_size: 50,
        }
    }
}
