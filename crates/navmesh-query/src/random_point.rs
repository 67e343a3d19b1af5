//! Random point sampling on the navigation mesh
//!
//! Sampling is uniform over the area of the polygons that pass the filter.
//! The random source is a closure returning numbers in `[0, 1)`, so callers
//! decide on the generator and its seed.

use crate::query_filter::QueryFilter;
use crate::status::{Outcome, QueryResult, Status};
use crate::{MeshTile, NavMesh, NavMeshQuery, NodeFlags, Poly, PolyRef};
use navmesh_common::{dist_pt_seg_sqr_2d, poly_area_2d, random_point_in_convex_poly, vdist, visfinite, vlerp};

/// A sampled location
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomPoint {
    /// Polygon containing the point
    pub poly_ref: PolyRef,
    /// The point, on the detail surface
    pub point: [f32; 3],
}

/// Area of a polygon's triangle fan.
fn ground_area(tile: &MeshTile, poly: &Poly) -> f32 {
    let (verts, nv) = tile.poly_vertices(poly);
    poly_area_2d(&verts[..nv]) * 0.5
}

/// Ground polygons of a tile that pass the filter, with their areas.
fn passable_polys<'t>(
    nav: &'t NavMesh,
    tile: &'t MeshTile,
    filter: &'t dyn QueryFilter,
) -> impl Iterator<Item = (PolyRef, &'t Poly, f32)> + 't {
    let base = nav.get_poly_ref_base(tile).id();
    tile.polys.iter().enumerate().filter_map(move |(i, poly)| {
        if poly.is_off_mesh_connection() {
            return None;
        }
        let poly_ref = PolyRef::new(base | i as u32);
        if !filter.pass_filter(poly_ref, tile, poly) {
            return None;
        }
        Some((poly_ref, poly, ground_area(tile, poly)))
    })
}

impl NavMeshQuery<'_> {
    /// Picks a random point on the mesh.
    ///
    /// Every passable polygon is chosen with probability proportional to its
    /// area: a tile by its passable area first, then a polygon within it by
    /// reservoir sampling.
    pub fn find_random_point(
        &self,
        filter: &dyn QueryFilter,
        mut frand: impl FnMut() -> f32,
    ) -> QueryResult<RandomPoint> {
        let nav = self.nav_mesh;

        // Pick a tile weighted by its passable area.
        let mut chosen_tile: Option<&MeshTile> = None;
        let mut tile_sum = 0.0;
        for tile in nav.tiles() {
            let area: f32 = passable_polys(nav, tile, filter).map(|(_, _, a)| a).sum();
            if area <= 0.0 {
                continue;
            }
            tile_sum += area;
            let u = frand();
            if u * tile_sum <= area {
                chosen_tile = Some(tile);
            }
        }
        let tile = chosen_tile.ok_or(Status::FAILURE)?;

        // Pick a polygon within the tile weighted by area.
        let mut chosen: Option<(PolyRef, &Poly)> = None;
        let mut area_sum = 0.0;
        for (poly_ref, poly, area) in passable_polys(nav, tile, filter) {
            area_sum += area;
            let u = frand();
            if u * area_sum <= area {
                chosen = Some((poly_ref, poly));
            }
        }
        let (poly_ref, poly) = chosen.ok_or(Status::FAILURE)?;

        let point = self.random_point_in_poly(tile, poly, poly_ref, &mut frand)?;
        Ok(RandomPoint { poly_ref, point })
    }

    /// Picks a random point in the mesh region reachable from `start_ref`
    /// within `max_radius` of `center`.
    ///
    /// The region is explored with a Dijkstra search and the polygon is
    /// chosen by area weighted reservoir sampling. Polygons are included
    /// whole, so the point can fall slightly outside the circle.
    pub fn find_random_point_around_circle(
        &mut self,
        start_ref: PolyRef,
        center: &[f32; 3],
        max_radius: f32,
        filter: &dyn QueryFilter,
        mut frand: impl FnMut() -> f32,
    ) -> QueryResult<Outcome<RandomPoint>> {
        if !visfinite(center) || !max_radius.is_finite() || max_radius < 0.0 {
            return Err(Status::invalid_param());
        }
        let start = self.view(start_ref).map_err(|_| Status::invalid_param())?;
        if !filter.pass_filter(start_ref, start.tile, start.poly) {
            return Err(Status::invalid_param());
        }

        self.node_pool.clear();
        self.open_list.clear();

        let start_node = self
            .node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::failure(Status::OUT_OF_NODES))?;
        {
            let node = self.node_pool.node_mut(start_node);
            node.pos = *center;
            node.parent = None;
            node.cost = 0.0;
            node.total = 0.0;
            node.flags = NodeFlags::OPEN;
        }
        self.open_list.push(start_node, 0.0);

        let radius_sqr = max_radius * max_radius;
        let mut area_sum = 0.0;
        let mut chosen = None;
        let mut status = Status::SUCCESS;

        while let Some(best_idx) = self.open_list.pop() {
            let best = self.node_pool.node_mut(best_idx);
            best.flags.remove(NodeFlags::OPEN);
            best.flags.insert(NodeFlags::CLOSED);
            let best_ref = best.id;
            let best_pos = best.pos;
            let best_total = best.total;
            let best_parent = best.parent;

            let Ok(best_view) = self.view(best_ref) else {
                continue;
            };

            // Only ground polygons hold random locations.
            if !best_view.poly.is_off_mesh_connection() {
                let area = ground_area(best_view.tile, best_view.poly);
                area_sum += area;
                let u = frand();
                if u * area_sum <= area {
                    chosen = Some(best_view);
                }
            }

            let parent_ref = best_parent.map_or(PolyRef::NULL, |p| self.node_pool.node(p).id);

            for link in best_view.tile.links_of(best_view.poly) {
                let neighbour_ref = link.reference;
                if !neighbour_ref.is_valid() || neighbour_ref == parent_ref {
                    continue;
                }
                let Ok(nei_view) = self.view(neighbour_ref) else {
                    continue;
                };
                if !filter.pass_filter(neighbour_ref, nei_view.tile, nei_view.poly) {
                    continue;
                }

                let Ok((va, vb)) = self.portal_points(best_view, nei_view) else {
                    continue;
                };
                // The circle does not reach the next polygon.
                let (dist_sqr, _) = dist_pt_seg_sqr_2d(center, &va, &vb);
                if dist_sqr > radius_sqr {
                    continue;
                }

                let Some(nei_idx) = self.node_pool.get_node(neighbour_ref, 0) else {
                    status |= Status::OUT_OF_NODES;
                    continue;
                };
                if self.node_pool.node(nei_idx).flags.contains(NodeFlags::CLOSED) {
                    continue;
                }

                if self.node_pool.node(nei_idx).flags.is_empty() {
                    self.node_pool.node_mut(nei_idx).pos = vlerp(&va, &vb, 0.5);
                }
                let total = best_total + vdist(&best_pos, &self.node_pool.node(nei_idx).pos);

                let nei = self.node_pool.node_mut(nei_idx);
                if nei.flags.contains(NodeFlags::OPEN) && total >= nei.total {
                    continue;
                }

                nei.id = neighbour_ref;
                nei.flags.remove(NodeFlags::CLOSED);
                nei.parent = Some(best_idx);
                nei.total = total;

                if nei.flags.contains(NodeFlags::OPEN) {
                    self.open_list.modify(nei_idx, total);
                } else {
                    nei.flags.insert(NodeFlags::OPEN);
                    self.open_list.push(nei_idx, total);
                }
            }
        }

        let chosen = chosen.ok_or(Status::FAILURE)?;
        let point = self.random_point_in_poly(chosen.tile, chosen.poly, chosen.poly_ref, &mut frand)?;
        Ok(Outcome::new(
            RandomPoint {
                poly_ref: chosen.poly_ref,
                point,
            },
            status,
        ))
    }

    /// Uniform point inside a polygon, lifted onto its detail surface.
    fn random_point_in_poly(
        &self,
        tile: &MeshTile,
        poly: &Poly,
        poly_ref: PolyRef,
        frand: &mut impl FnMut() -> f32,
    ) -> QueryResult<[f32; 3]> {
        let (verts, nv) = tile.poly_vertices(poly);
        let s = frand();
        let t = frand();
        let pt = random_point_in_convex_poly(&verts[..nv], s, t);
        let (point, _) = self.nav_mesh.closest_point_on_poly(poly_ref, &pt)?;
        Ok(point)
    }
}
