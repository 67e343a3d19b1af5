//! Dijkstra expansions from a seed polygon
//!
//! These searches grow outwards from a start polygon in order of cost and
//! leave their parent links in the node pool, so
//! [`NavMeshQuery::get_path_from_dijkstra_search`] can rebuild the corridor
//! to anything they closed.

use crate::query_filter::QueryFilter;
use crate::status::{Outcome, QueryResult, Status};
use crate::{NavMeshQuery, NodeFlags, PolyRef, EXT_LINK};
use navmesh_common::{
    dist_pt_seg_sqr_2d, intersect_segment_poly_2d, vdist, visfinite, vlerp, vnormalize,
};

/// Result of [`NavMeshQuery::find_distance_to_wall`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallHit {
    /// Distance to the nearest wall, the search radius when none was found
    pub distance: f32,
    /// Nearest point on the wall, the search center when none was found
    pub position: [f32; 3],
    /// Normal of the wall at the hit, zero when none was found
    pub normal: [f32; 3],
}

/// Output slices of an expansion search.
struct SearchResults<'r> {
    refs: &'r mut [PolyRef],
    parents: Option<&'r mut [PolyRef]>,
    costs: Option<&'r mut [f32]>,
    count: usize,
}

impl SearchResults<'_> {
    /// Records a polygon. Returns false when the output is full.
    fn push(&mut self, poly_ref: PolyRef, parent: PolyRef, cost: f32) -> bool {
        let n = self.count;
        if n >= self.refs.len() {
            return false;
        }
        self.refs[n] = poly_ref;
        if let Some(parents) = self.parents.as_deref_mut() {
            if let Some(slot) = parents.get_mut(n) {
                *slot = parent;
            }
        }
        if let Some(costs) = self.costs.as_deref_mut() {
            if let Some(slot) = costs.get_mut(n) {
                *slot = cost;
            }
        }
        self.count += 1;
        true
    }
}

impl NavMeshQuery<'_> {
    /// Finds the polygons whose portals the circle touches, expanding from
    /// `start_ref` in order of cost.
    ///
    /// Returns the number of polygons written. `result_parent` and
    /// `result_cost` receive the parent of each polygon and the cost to
    /// reach it. Polygons that do not fit are dropped with
    /// [`Status::BUFFER_TOO_SMALL`] but the search still completes.
    #[allow(clippy::too_many_arguments)]
    pub fn find_polys_around_circle(
        &mut self,
        start_ref: PolyRef,
        center: &[f32; 3],
        radius: f32,
        filter: &dyn QueryFilter,
        result_ref: &mut [PolyRef],
        result_parent: Option<&mut [PolyRef]>,
        result_cost: Option<&mut [f32]>,
    ) -> QueryResult<Outcome<usize>> {
        if !self.nav_mesh.is_valid_poly_ref(start_ref)
            || !visfinite(center)
            || !radius.is_finite()
            || radius < 0.0
        {
            return Err(Status::invalid_param());
        }

        let radius_sqr = radius * radius;
        let mut results = SearchResults {
            refs: result_ref,
            parents: result_parent,
            costs: result_cost,
            count: 0,
        };
        let status = self.expand_from(start_ref, center, filter, &mut results, |va, vb| {
            let (dist_sqr, _) = dist_pt_seg_sqr_2d(center, va, vb);
            dist_sqr <= radius_sqr
        })?;
        Ok(Outcome::new(results.count, status))
    }

    /// Like [`NavMeshQuery::find_polys_around_circle`], but the search area
    /// is the convex polygon `verts`, expanding from its centroid.
    pub fn find_polys_around_shape(
        &mut self,
        start_ref: PolyRef,
        verts: &[[f32; 3]],
        filter: &dyn QueryFilter,
        result_ref: &mut [PolyRef],
        result_parent: Option<&mut [PolyRef]>,
        result_cost: Option<&mut [f32]>,
    ) -> QueryResult<Outcome<usize>> {
        if !self.nav_mesh.is_valid_poly_ref(start_ref)
            || verts.len() < 3
            || verts.iter().any(|v| !visfinite(v))
        {
            return Err(Status::invalid_param());
        }

        let mut center = [0.0; 3];
        for v in verts {
            center = [center[0] + v[0], center[1] + v[1], center[2] + v[2]];
        }
        let scale = 1.0 / verts.len() as f32;
        let center = [center[0] * scale, center[1] * scale, center[2] * scale];

        let mut results = SearchResults {
            refs: result_ref,
            parents: result_parent,
            costs: result_cost,
            count: 0,
        };
        let status = self.expand_from(start_ref, &center, filter, &mut results, |va, vb| {
            intersect_segment_poly_2d(va, vb, verts).is_some_and(|(tmin, tmax, _, _)| tmin <= 1.0 && tmax >= 0.0)
        })?;
        Ok(Outcome::new(results.count, status))
    }

    /// Dijkstra expansion through every portal accepted by `touches`.
    ///
    /// Polygons are recorded as they are closed, so results come out in
    /// order of cost.
    fn expand_from(
        &mut self,
        start_ref: PolyRef,
        start_pos: &[f32; 3],
        filter: &dyn QueryFilter,
        results: &mut SearchResults<'_>,
        touches: impl Fn(&[f32; 3], &[f32; 3]) -> bool,
    ) -> QueryResult<Status> {
        self.node_pool.clear();
        self.open_list.clear();

        let start_node = self
            .node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::failure(Status::OUT_OF_NODES))?;
        {
            let node = self.node_pool.node_mut(start_node);
            node.pos = *start_pos;
            node.parent = None;
            node.cost = 0.0;
            node.total = 0.0;
            node.flags = NodeFlags::OPEN;
        }
        self.open_list.push(start_node, 0.0);

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
            let parent_ref = best_parent.map_or(PolyRef::NULL, |p| self.node_pool.node(p).id);
            let parent_view = if parent_ref.is_valid() {
                self.view(parent_ref).ok()
            } else {
                None
            };

            if !results.push(best_ref, parent_ref, best_total) {
                status |= Status::BUFFER_TOO_SMALL;
            }

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
                // The search area does not reach the next polygon.
                if !touches(&va, &vb) {
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
                let nei_pos = self.node_pool.node(nei_idx).pos;

                let cost = filter.get_cost(&best_pos, &nei_pos, parent_view, best_view, Some(nei_view));
                let total = best_total + cost;

                let nei = self.node_pool.node_mut(nei_idx);
                if nei.flags.contains(NodeFlags::OPEN) && total >= nei.total {
                    continue;
                }

                nei.id = neighbour_ref;
                nei.parent = Some(best_idx);
                nei.total = total;

                if nei.flags.contains(NodeFlags::OPEN) {
                    self.open_list.modify(nei_idx, total);
                } else {
                    nei.flags = NodeFlags::OPEN;
                    self.open_list.push(nei_idx, total);
                }
            }
        }

        Ok(status)
    }

    /// Rebuilds the corridor from the start of the last Dijkstra search
    /// ([`NavMeshQuery::find_polys_around_circle`],
    /// [`NavMeshQuery::find_polys_around_shape`] or
    /// [`NavMeshQuery::find_distance_to_wall`]) to `end_ref`.
    ///
    /// `end_ref` must have been closed by that search.
    pub fn get_path_from_dijkstra_search(
        &self,
        end_ref: PolyRef,
        path: &mut [PolyRef],
    ) -> QueryResult<Outcome<usize>> {
        if !self.nav_mesh.is_valid_poly_ref(end_ref) || path.is_empty() {
            return Err(Status::invalid_param());
        }

        let end_node = self
            .node_pool
            .find_nodes(end_ref)
            .next()
            .filter(|&i| self.node_pool.node(i).flags.contains(NodeFlags::CLOSED))
            .ok_or_else(Status::invalid_param)?;

        let (count, status) = self.get_path_to_node(end_node, path);
        Ok(Outcome::new(count, status))
    }

    /// Distance from `center` to the nearest wall within `max_radius`.
    ///
    /// A wall is any polygon edge without a neighbour that passes the
    /// filter. The search expands through the polygons the shrinking circle
    /// still reaches.
    pub fn find_distance_to_wall(
        &mut self,
        start_ref: PolyRef,
        center: &[f32; 3],
        max_radius: f32,
        filter: &dyn QueryFilter,
    ) -> QueryResult<Outcome<WallHit>> {
        let nav = self.nav_mesh;
        if !nav.is_valid_poly_ref(start_ref)
            || !visfinite(center)
            || !max_radius.is_finite()
            || max_radius < 0.0
        {
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

        let mut radius_sqr = max_radius * max_radius;
        let mut hit_pos = *center;
        let mut best_edge: Option<([f32; 3], [f32; 3])> = None;
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
            let parent_ref = best_parent.map_or(PolyRef::NULL, |p| self.node_pool.node(p).id);

            let (tile, poly) = (best_view.tile, best_view.poly);
            let (verts, nv) = tile.poly_vertices(poly);

            // Hit test the walls of this polygon.
            for j in 0..nv {
                let nei = poly.neighbors[j];
                if nei & EXT_LINK != 0 {
                    // Tile border: solid unless a passable link crosses it.
                    let passable = tile
                        .links_of(poly)
                        .filter(|l| l.edge_index as usize == j)
                        .take(1)
                        .any(|l| {
                            l.reference.is_valid()
                                && self
                                    .view(l.reference)
                                    .is_ok_and(|v| filter.pass_filter(v.poly_ref, v.tile, v.poly))
                        });
                    if passable {
                        continue;
                    }
                } else if nei != 0 {
                    // Internal edge: solid only when the neighbour is filtered out.
                    let idx = (nei - 1) as usize;
                    let nei_ref = PolyRef::new(nav.get_poly_ref_base(tile).id() | idx as u32);
                    if let Some(nei_poly) = tile.polys.get(idx) {
                        if filter.pass_filter(nei_ref, tile, nei_poly) {
                            continue;
                        }
                    }
                }

                let vj = verts[j];
                let vi = verts[(j + 1) % nv];
                let (dist_sqr, tseg) = dist_pt_seg_sqr_2d(center, &vj, &vi);
                if dist_sqr > radius_sqr {
                    continue;
                }

                // Hit a wall, shrink the search radius.
                radius_sqr = dist_sqr;
                hit_pos = vlerp(&vj, &vi, tseg);
                best_edge = Some((vj, vi));
            }

            for link in tile.links_of(poly) {
                let neighbour_ref = link.reference;
                if !neighbour_ref.is_valid() || neighbour_ref == parent_ref {
                    continue;
                }
                let Ok(nei_view) = self.view(neighbour_ref) else {
                    continue;
                };
                if nei_view.poly.is_off_mesh_connection() {
                    continue;
                }

                let va = verts[link.edge_index as usize];
                let vb = verts[(link.edge_index as usize + 1) % nv];
                let (dist_sqr, _) = dist_pt_seg_sqr_2d(center, &va, &vb);
                // The circle does not reach this polygon.
                if dist_sqr > radius_sqr {
                    continue;
                }
                if !filter.pass_filter(neighbour_ref, nei_view.tile, nei_view.poly) {
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
                    if let Ok(mid) = self.edge_mid_point(best_view, nei_view) {
                        self.node_pool.node_mut(nei_idx).pos = mid;
                    }
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

        let normal = match best_edge {
            Some((vj, vi)) => {
                let tangent = [vi[0] - vj[0], vi[1] - vj[1], vi[2] - vj[2]];
                vnormalize(&[tangent[2], 0.0, -tangent[0]])
            }
            None => [0.0; 3],
        };

        Ok(Outcome::new(
            WallHit {
                distance: radius_sqr.sqrt(),
                position: hit_pos,
                normal,
            },
            status,
        ))
    }
}
