//! Polygon visitors for box queries
//!
//! [`NavMeshQuery::query_polygons_with`](crate::NavMeshQuery::query_polygons_with)
//! hands every polygon that overlaps the query box and passes the filter to a
//! [`PolyQuery`], in batches per tile.

use crate::{MeshTile, NavMesh, Poly, PolyRef};
use navmesh_common::{vlen_sqr, vsub};

/// Receives the polygons found by a box query
pub trait PolyQuery {
    /// Takes one batch from `tile`. `polys[i]` is the polygon behind
    /// `refs[i]`. A query spanning several tiles sees several batches.
    fn process(&mut self, tile: &MeshTile, polys: &[&Poly], refs: &[PolyRef]);
}

/// Copies found references into a caller buffer
#[derive(Debug)]
pub struct CollectPolysQuery<'b> {
    polys: &'b mut [PolyRef],
    count: usize,
    overflow: bool,
}

impl<'b> CollectPolysQuery<'b> {
    /// Collects into `polys`, dropping what does not fit.
    pub fn new(polys: &'b mut [PolyRef]) -> Self {
        Self {
            polys,
            count: 0,
            overflow: false,
        }
    }

    /// References written so far.
    pub fn polys(&self) -> &[PolyRef] {
        &self.polys[..self.count]
    }

    pub fn num_collected(&self) -> usize {
        self.count
    }

    /// Some references were dropped because the buffer was full.
    pub fn overflow(&self) -> bool {
        self.overflow
    }
}

impl PolyQuery for CollectPolysQuery<'_> {
    fn process(&mut self, _tile: &MeshTile, _polys: &[&Poly], refs: &[PolyRef]) {
        let remaining = self.polys.len() - self.count;
        let n = refs.len().min(remaining);
        if n < refs.len() {
            self.overflow = true;
        }
        self.polys[self.count..self.count + n].copy_from_slice(&refs[..n]);
        self.count += n;
    }
}

/// Tracks the polygon closest to a point
pub struct FindNearestPolyQuery<'a> {
    nav_mesh: &'a NavMesh,
    center: [f32; 3],
    nearest_distance_sqr: f32,
    nearest_ref: PolyRef,
    nearest_point: [f32; 3],
    over_poly: bool,
}

impl<'a> FindNearestPolyQuery<'a> {
    pub fn new(nav_mesh: &'a NavMesh, center: &[f32; 3]) -> Self {
        Self {
            nav_mesh,
            center: *center,
            nearest_distance_sqr: f32::MAX,
            nearest_ref: PolyRef::NULL,
            nearest_point: *center,
            over_poly: false,
        }
    }

    /// Closest polygon so far, null before any batch had one.
    pub fn nearest_ref(&self) -> PolyRef {
        self.nearest_ref
    }

    pub fn nearest_point(&self) -> &[f32; 3] {
        &self.nearest_point
    }

    /// Whether the query point lies over the closest polygon's footprint.
    pub fn is_over_poly(&self) -> bool {
        self.over_poly
    }

    pub fn nearest_distance_sqr(&self) -> f32 {
        self.nearest_distance_sqr
    }
}

impl PolyQuery for FindNearestPolyQuery<'_> {
    fn process(&mut self, tile: &MeshTile, _polys: &[&Poly], refs: &[PolyRef]) {
        let climb = tile.header.as_ref().map_or(0.0, |h| h.walkable_climb);
        for &poly_ref in refs {
            let ip = self.nav_mesh.decode_poly_id_poly(poly_ref);
            let (closest, is_over_poly) =
                self.nav_mesh.closest_point_on_tile_poly(tile, ip, &self.center);

            // Directly above the polygon within climb height counts as on it.
            let diff = vsub(&self.center, &closest);
            let d = if is_over_poly {
                let d = diff[1].abs() - climb;
                if d > 0.0 {
                    d * d
                } else {
                    0.0
                }
            } else {
                vlen_sqr(&diff)
            };

            if d < self.nearest_distance_sqr {
                self.nearest_distance_sqr = d;
                self.nearest_ref = poly_ref;
                self.nearest_point = closest;
                self.over_poly = is_over_poly;
            }
        }
    }
}
