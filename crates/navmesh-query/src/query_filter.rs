//! Polygon filters and traversal costs for navigation queries

use crate::{MeshTile, Poly, PolyFlags, PolyRef, MAX_AREAS};
use navmesh_common::vdist;

/// A polygon together with the tile that owns it
#[derive(Debug, Clone, Copy)]
pub struct PolyView<'t> {
    /// Reference of the polygon
    pub poly_ref: PolyRef,
    /// Owning tile
    pub tile: &'t MeshTile,
    /// The polygon
    pub poly: &'t Poly,
}

impl<'t> PolyView<'t> {
    /// Bundles a polygon with its tile.
    pub fn new(poly_ref: PolyRef, tile: &'t MeshTile, poly: &'t Poly) -> Self {
        Self {
            poly_ref,
            tile,
            poly,
        }
    }
}

/// Decides which polygons a query may visit and what moving across them costs
///
/// Implementations must be deterministic: the same inputs always give the
/// same answer during a query.
pub trait QueryFilter {
    /// Returns true if the polygon can be visited.
    fn pass_filter(&self, poly_ref: PolyRef, tile: &MeshTile, poly: &Poly) -> bool;

    /// Cost of moving from `pa` to `pb` across `cur`.
    ///
    /// `pa` lies on the edge shared with `prev` (or is the start position),
    /// `pb` on the edge shared with `next` (or is the end position).
    fn get_cost(
        &self,
        pa: &[f32; 3],
        pb: &[f32; 3],
        prev: Option<PolyView<'_>>,
        cur: PolyView<'_>,
        next: Option<PolyView<'_>>,
    ) -> f32;
}

/// Flag and area cost based filter
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultQueryFilter {
    area_cost: [f32; MAX_AREAS],
    include_flags: PolyFlags,
    exclude_flags: PolyFlags,
}

impl Default for DefaultQueryFilter {
    fn default() -> Self {
        Self {
            area_cost: [1.0; MAX_AREAS],
            include_flags: PolyFlags::from_bits_retain(0xffff),
            exclude_flags: PolyFlags::empty(),
        }
    }
}

impl DefaultQueryFilter {
    /// Creates a filter that accepts any flagged polygon at unit cost.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cost multiplier of an area.
    pub fn area_cost(&self, area: u8) -> f32 {
        self.area_cost.get(area as usize).copied().unwrap_or(1.0)
    }

    /// Sets the cost multiplier of an area. Areas past the table are ignored.
    pub fn set_area_cost(&mut self, area: u8, cost: f32) {
        if let Some(slot) = self.area_cost.get_mut(area as usize) {
            *slot = cost;
        }
    }

    /// Polygons need at least one of these flags.
    pub fn include_flags(&self) -> PolyFlags {
        self.include_flags
    }

    pub fn set_include_flags(&mut self, flags: PolyFlags) {
        self.include_flags = flags;
    }

    /// Polygons must have none of these flags.
    pub fn exclude_flags(&self) -> PolyFlags {
        self.exclude_flags
    }

    pub fn set_exclude_flags(&mut self, flags: PolyFlags) {
        self.exclude_flags = flags;
    }
}

impl QueryFilter for DefaultQueryFilter {
    #[inline]
    fn pass_filter(&self, _poly_ref: PolyRef, _tile: &MeshTile, poly: &Poly) -> bool {
        poly.flags.intersects(self.include_flags) && !poly.flags.intersects(self.exclude_flags)
    }

    #[inline]
    fn get_cost(
        &self,
        pa: &[f32; 3],
        pb: &[f32; 3],
        _prev: Option<PolyView<'_>>,
        cur: PolyView<'_>,
        _next: Option<PolyView<'_>>,
    ) -> f32 {
        vdist(pa, pb) * self.area_cost(cur.poly.area)
    }
}
