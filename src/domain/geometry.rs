//! Uniform grid geometry and cell addressing
//!
//! Cells are linearized row-major with x varying fastest:
//! `index = (z * grid.y + y) * grid.x + x`. Every producer and consumer of
//! cell indices (hashing, device map, CSV dumps) goes through this module.

use glam::{IVec3, UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    world_origin: Vec3,
    world_size: Vec3,
    cell_size: Vec3,
    grid_size: UVec3,
    total_cells: u32,
}

impl GridGeometry {
    /// Build a grid with an explicit cell size and cell count per axis
    pub fn new(world_origin: Vec3, cell_size: Vec3, grid_size: UVec3) -> SimResult<Self> {
        if !cell_size.cmpgt(Vec3::ZERO).all() || !cell_size.is_finite() {
            return Err(SimError::InvalidGeometry {
                message: format!("cell size must be positive, got {}", cell_size),
            });
        }
        if grid_size.cmpeq(UVec3::ZERO).any() || grid_size.cmpgt(UVec3::splat(i32::MAX as u32)).any() {
            return Err(SimError::InvalidGeometry {
                message: format!("grid size out of range: {}", grid_size),
            });
        }
        let total_cells = (grid_size.x as u64) * (grid_size.y as u64) * (grid_size.z as u64);
        let total_cells = u32::try_from(total_cells).map_err(|_| SimError::InvalidGeometry {
            message: format!("{} cells do not fit a 32-bit cell index", total_cells),
        })?;

        Ok(Self {
            world_origin,
            world_size: cell_size * grid_size.as_vec3(),
            cell_size,
            grid_size,
            total_cells,
        })
    }

    /// Cover `world_size` with cells no smaller than `min_cell_size`
    pub fn from_extent(world_origin: Vec3, world_size: Vec3, min_cell_size: f32) -> SimResult<Self> {
        if !(min_cell_size > 0.0) || !world_size.cmpgt(Vec3::ZERO).all() {
            return Err(SimError::InvalidGeometry {
                message: format!(
                    "cannot split world of size {} into cells of {}",
                    world_size, min_cell_size
                ),
            });
        }
        let grid_size = (world_size / min_cell_size).floor().max(Vec3::ONE).as_uvec3();
        let cell_size = world_size / grid_size.as_vec3();
        let mut geometry = Self::new(world_origin, cell_size, grid_size)?;
        geometry.world_size = world_size;
        Ok(geometry)
    }

    pub fn world_origin(&self) -> Vec3 {
        self.world_origin
    }

    pub fn world_size(&self) -> Vec3 {
        self.world_size
    }

    pub fn cell_size(&self) -> Vec3 {
        self.cell_size
    }

    pub fn grid_size(&self) -> UVec3 {
        self.grid_size
    }

    pub fn total_cells(&self) -> u32 {
        self.total_cells
    }

    /// Signed coordinates of the cell containing `pos`, not clamped
    #[inline]
    pub fn cell_coord_of(&self, pos: Vec3) -> IVec3 {
        ((pos - self.world_origin) / self.cell_size).floor().as_ivec3()
    }

    /// Linear index of `coord`, each axis clamped into the grid first
    #[inline]
    pub fn linear_cell_index(&self, coord: IVec3) -> u32 {
        let clamped = coord
            .max(IVec3::ZERO)
            .min(self.grid_size.as_ivec3() - IVec3::ONE)
            .as_uvec3();
        (clamped.z * self.grid_size.y + clamped.y) * self.grid_size.x + clamped.x
    }

    /// Inverse of `linear_cell_index` for in-range coordinates
    #[inline]
    pub fn cell_coord_from_linear(&self, index: u32) -> IVec3 {
        let layer = self.grid_size.x * self.grid_size.y;
        let z = index / layer;
        let y = (index - z * layer) / self.grid_size.x;
        let x = index - z * layer - y * self.grid_size.x;
        IVec3::new(x as i32, y as i32, z as i32)
    }

    /// Linear index of the cell containing `pos`
    #[inline]
    pub fn cell_index_of(&self, pos: Vec3) -> u32 {
        self.linear_cell_index(self.cell_coord_of(pos))
    }

    /// Whether `coord` lies inside the grid without clamping
    pub fn contains_cell(&self, coord: IVec3) -> bool {
        coord.cmpge(IVec3::ZERO).all() && coord.cmplt(self.grid_size.as_ivec3()).all()
    }

    /// Iterate every cell coordinate in linear index order
    pub fn cells(&self) -> impl Iterator<Item = IVec3> + '_ {
        (0..self.total_cells).map(move |index| self.cell_coord_from_linear(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_grid(n: u32) -> GridGeometry {
        GridGeometry::new(Vec3::ZERO, Vec3::ONE, UVec3::splat(n)).unwrap()
    }

    #[test]
    fn test_cell_of_position() {
        let grid = unit_grid(2);
        let coord = grid.cell_coord_of(Vec3::new(1.5, 0.5, 1.5));
        assert_eq!(coord, IVec3::new(1, 0, 1));
        assert_eq!(grid.linear_cell_index(coord), 5);
        assert_eq!(grid.total_cells(), 8);
    }

    #[test]
    fn test_negative_positions_floor() {
        let grid = GridGeometry::new(Vec3::splat(-1.0), Vec3::splat(0.5), UVec3::splat(4)).unwrap();
        assert_eq!(grid.cell_coord_of(Vec3::new(-1.25, -1.0, 0.99)), IVec3::new(-1, 0, 3));
    }

    #[test]
    fn test_x_varies_fastest() {
        let grid = GridGeometry::new(Vec3::ZERO, Vec3::ONE, UVec3::new(4, 3, 2)).unwrap();
        assert_eq!(grid.linear_cell_index(IVec3::new(1, 0, 0)), 1);
        assert_eq!(grid.linear_cell_index(IVec3::new(0, 1, 0)), 4);
        assert_eq!(grid.linear_cell_index(IVec3::new(0, 0, 1)), 12);
        assert_eq!(grid.linear_cell_index(IVec3::new(3, 2, 1)), 23);
    }

    #[test]
    fn test_round_trip_every_cell() {
        let grid = GridGeometry::new(Vec3::ZERO, Vec3::ONE, UVec3::new(5, 3, 7)).unwrap();
        for (index, coord) in grid.cells().enumerate() {
            assert_eq!(grid.linear_cell_index(coord), index as u32);
            assert!(grid.contains_cell(coord));
        }
    }

    #[test]
    fn test_clamping() {
        let grid = GridGeometry::new(Vec3::ZERO, Vec3::ONE, UVec3::new(4, 3, 2)).unwrap();
        assert_eq!(
            grid.linear_cell_index(IVec3::new(-5, 7, 1)),
            grid.linear_cell_index(IVec3::new(0, 2, 1))
        );
        assert_eq!(
            grid.linear_cell_index(IVec3::new(100, -1, -100)),
            grid.linear_cell_index(IVec3::new(3, 0, 0))
        );
        assert!(!grid.contains_cell(IVec3::new(4, 0, 0)));
    }

    #[test]
    fn test_from_extent() {
        let grid = GridGeometry::from_extent(Vec3::ZERO, Vec3::new(1.0, 2.0, 0.5), 0.3).unwrap();
        assert_eq!(grid.grid_size(), UVec3::new(3, 6, 1));
        assert!((grid.cell_size().x - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(grid.world_size(), Vec3::new(1.0, 2.0, 0.5));
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(GridGeometry::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 1.0), UVec3::ONE).is_err());
        assert!(GridGeometry::new(Vec3::ZERO, Vec3::ONE, UVec3::new(1, 0, 1)).is_err());
        assert!(GridGeometry::new(Vec3::ZERO, Vec3::ONE, UVec3::splat(4096)).is_err());
        assert!(GridGeometry::from_extent(Vec3::ZERO, Vec3::ONE, 0.0).is_err());
    }
}
