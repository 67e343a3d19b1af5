//! Bounded local searches on the tiny node pool
//!
//! These queries only look a short distance around an agent. They use a
//! fixed 48 entry stack and the 64 node pool of the query, so their cost
//! does not depend on the mesh size.

use crate::node_pool::NodeIndex;
use crate::query_filter::QueryFilter;
use crate::status::{Outcome, QueryResult, Status};
use crate::{MeshTile, NavMesh, NavMeshQuery, NodeFlags, Poly, PolyRef, EXT_LINK};
use navmesh_common::{
    dist_pt_seg_sqr_2d, overlap_poly_poly_2d, point_in_polygon_2d, vdist, visfinite, vlerp,
};

const MAX_STACK: usize = 48;
const MAX_NEIS_PER_EDGE: usize = 8;
const MAX_INTERVALS: usize = 16;

/// Result of [`NavMeshQuery::move_along_surface`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceMove {
    /// Position reached. Its height is not adjusted to the surface.
    pub position: [f32; 3],
    /// Number of polygons written to the visited list
    pub visited_count: usize,
}

/// FIFO of tiny pool nodes with the fixed search capacity.
struct NodeStack {
    nodes: [NodeIndex; MAX_STACK],
    len: usize,
}

impl NodeStack {
    fn new() -> Self {
        Self {
            nodes: [0; MAX_STACK],
            len: 0,
        }
    }

    fn push(&mut self, idx: NodeIndex) -> bool {
        if self.len >= MAX_STACK {
            return false;
        }
        self.nodes[self.len] = idx;
        self.len += 1;
        true
    }

    fn pop_front(&mut self) -> Option<NodeIndex> {
        if self.len == 0 {
            return None;
        }
        let front = self.nodes[0];
        self.nodes.copy_within(1..self.len, 0);
        self.len -= 1;
        Some(front)
    }
}

#[derive(Debug, Clone, Copy)]
struct SegInterval {
    poly_ref: PolyRef,
    tmin: i16,
    tmax: i16,
}

/// Inserts an interval keeping the list sorted. Drops it when full.
fn insert_interval(ints: &mut [SegInterval; MAX_INTERVALS], nints: &mut usize, tmin: i16, tmax: i16, poly_ref: PolyRef) {
    if *nints + 1 > MAX_INTERVALS {
        return;
    }
    let idx = ints[..*nints].iter().position(|i| tmax <= i.tmin).unwrap_or(*nints);
    ints.copy_within(idx..*nints, idx + 1);
    ints[idx] = SegInterval { poly_ref, tmin, tmax };
    *nints += 1;
}

/// Writes a neighbourhood result. Returns false when the output is full.
fn store_result(
    refs: &mut [PolyRef],
    parents: &mut Option<&mut [PolyRef]>,
    n: &mut usize,
    poly_ref: PolyRef,
    parent: PolyRef,
) -> bool {
    if *n >= refs.len() {
        return false;
    }
    refs[*n] = poly_ref;
    if let Some(slot) = parents.as_deref_mut().and_then(|p| p.get_mut(*n)) {
        *slot = parent;
    }
    *n += 1;
    true
}

/// Neighbours across edge `edge` of a polygon that pass the filter.
fn edge_neighbours(
    nav: &NavMesh,
    tile: &MeshTile,
    poly: &Poly,
    edge: usize,
    filter: &dyn QueryFilter,
    out: &mut [PolyRef; MAX_NEIS_PER_EDGE],
) -> usize {
    let nei = poly.neighbors[edge];
    let mut n = 0;
    if nei & EXT_LINK != 0 {
        // Tile border.
        for link in tile.links_of(poly) {
            if link.edge_index as usize != edge || !link.reference.is_valid() {
                continue;
            }
            let Ok((nei_tile, nei_poly)) = nav.get_tile_and_poly_by_ref(link.reference) else {
                continue;
            };
            if filter.pass_filter(link.reference, nei_tile, nei_poly) && n < MAX_NEIS_PER_EDGE {
                out[n] = link.reference;
                n += 1;
            }
        }
    } else if nei != 0 {
        let idx = (nei - 1) as usize;
        let nei_ref = PolyRef::new(nav.get_poly_ref_base(tile).id() | idx as u32);
        if tile.polys.get(idx).is_some_and(|p| filter.pass_filter(nei_ref, tile, p)) {
            out[0] = nei_ref;
            n = 1;
        }
    }
    n
}

impl NavMeshQuery<'_> {
    /// Finds the non-overlapping polygons around `center` within `radius`,
    /// starting from `start_ref`.
    ///
    /// Polygons are added in breadth first order and skipped when they
    /// overlap an already collected polygon, so the result describes a
    /// single layer of the mesh. `result_parent` receives the polygon each
    /// result was reached from.
    pub fn find_local_neighbourhood(
        &mut self,
        start_ref: PolyRef,
        center: &[f32; 3],
        radius: f32,
        filter: &dyn QueryFilter,
        result_ref: &mut [PolyRef],
        mut result_parent: Option<&mut [PolyRef]>,
    ) -> QueryResult<Outcome<usize>> {
        let nav = self.nav_mesh;
        if !nav.is_valid_poly_ref(start_ref) || !visfinite(center) || !radius.is_finite() || radius < 0.0 {
            return Err(Status::invalid_param());
        }

        self.tiny_node_pool.clear();
        let mut stack = NodeStack::new();

        let start_node = self
            .tiny_node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::failure(Status::OUT_OF_NODES))?;
        {
            let node = self.tiny_node_pool.node_mut(start_node);
            node.parent = None;
            node.flags = NodeFlags::CLOSED;
        }
        stack.push(start_node);

        let radius_sqr = radius * radius;
        let mut status = Status::SUCCESS;
        let mut n = 0;

        if !store_result(result_ref, &mut result_parent, &mut n, start_ref, PolyRef::NULL) {
            status |= Status::BUFFER_TOO_SMALL;
        }

        while let Some(cur_idx) = stack.pop_front() {
            let cur_ref = self.tiny_node_pool.node(cur_idx).id;
            let Ok(cur) = self.view(cur_ref) else {
                continue;
            };

            for link in cur.tile.links_of(cur.poly) {
                let neighbour_ref = link.reference;
                if !neighbour_ref.is_valid() {
                    continue;
                }
                let Some(nei_idx) = self.tiny_node_pool.get_node(neighbour_ref, 0) else {
                    continue;
                };
                if self.tiny_node_pool.node(nei_idx).flags.contains(NodeFlags::CLOSED) {
                    continue;
                }

                let Ok(nei) = self.view(neighbour_ref) else {
                    continue;
                };
                if nei.poly.is_off_mesh_connection() {
                    continue;
                }
                if !filter.pass_filter(neighbour_ref, nei.tile, nei.poly) {
                    continue;
                }

                let Ok((va, vb)) = self.portal_points(cur, nei) else {
                    continue;
                };
                // The circle does not reach the next polygon.
                let (dist_sqr, _) = dist_pt_seg_sqr_2d(center, &va, &vb);
                if dist_sqr > radius_sqr {
                    continue;
                }

                // Mark visited before the overlap test so it is not tested again.
                {
                    let node = self.tiny_node_pool.node_mut(nei_idx);
                    node.flags.insert(NodeFlags::CLOSED);
                    node.parent = Some(cur_idx);
                }

                let (pa, npa) = nei.tile.poly_vertices(nei.poly);
                let overlap = result_ref[..n].iter().any(|&past_ref| {
                    // Connected polygons do not overlap.
                    if cur.tile.links_of(cur.poly).any(|l| l.reference == past_ref) {
                        return false;
                    }
                    let Ok((past_tile, past_poly)) = nav.get_tile_and_poly_by_ref(past_ref) else {
                        return false;
                    };
                    let (pb, npb) = past_tile.poly_vertices(past_poly);
                    overlap_poly_poly_2d(&pa[..npa], &pb[..npb])
                });
                if overlap {
                    continue;
                }

                if !store_result(result_ref, &mut result_parent, &mut n, neighbour_ref, cur_ref) {
                    status |= Status::BUFFER_TOO_SMALL;
                }
                stack.push(nei_idx);
            }
        }

        Ok(Outcome::new(n, status))
    }

    /// Moves from `start_pos` towards `end_pos` constrained to the mesh
    /// surface.
    ///
    /// Slides along walls instead of stopping at them. The search stays
    /// inside the circle spanning both positions, so it is only meant for
    /// short steps. `visited` receives the polygons from the start polygon
    /// to the one containing the result.
    pub fn move_along_surface(
        &mut self,
        start_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &dyn QueryFilter,
        visited: &mut [PolyRef],
    ) -> QueryResult<Outcome<SurfaceMove>> {
        let nav = self.nav_mesh;
        if !nav.is_valid_poly_ref(start_ref) || !visfinite(start_pos) || !visfinite(end_pos) || visited.is_empty()
        {
            return Err(Status::invalid_param());
        }

        self.tiny_node_pool.clear();
        let mut stack = NodeStack::new();

        let start_node = self
            .tiny_node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::failure(Status::OUT_OF_NODES))?;
        {
            let node = self.tiny_node_pool.node_mut(start_node);
            node.parent = None;
            node.cost = 0.0;
            node.total = 0.0;
            node.flags = NodeFlags::CLOSED;
        }
        stack.push(start_node);

        let mut best_pos = *start_pos;
        let mut best_dist = f32::MAX;
        let mut best_node: Option<NodeIndex> = None;

        // Search constraints.
        let search_pos = vlerp(start_pos, end_pos, 0.5);
        let search_rad = vdist(start_pos, end_pos) / 2.0 + 0.001;
        let search_rad_sqr = search_rad * search_rad;

        while let Some(cur_idx) = stack.pop_front() {
            let cur_ref = self.tiny_node_pool.node(cur_idx).id;
            let Ok(cur) = self.view(cur_ref) else {
                continue;
            };

            let (verts, nv) = cur.tile.poly_vertices(cur.poly);

            // The target is inside this polygon, done.
            if point_in_polygon_2d(end_pos, &verts[..nv]) {
                best_node = Some(cur_idx);
                best_pos = *end_pos;
                break;
            }

            // Find wall edges and the nearest point inside the walls.
            for j in 0..nv {
                let vj = verts[j];
                let vi = verts[(j + 1) % nv];

                let mut neis = [PolyRef::NULL; MAX_NEIS_PER_EDGE];
                let nneis = edge_neighbours(nav, cur.tile, cur.poly, j, filter, &mut neis);

                if nneis == 0 {
                    // Wall edge, see if it is the closest to the target.
                    let (dist_sqr, tseg) = dist_pt_seg_sqr_2d(end_pos, &vj, &vi);
                    if dist_sqr < best_dist {
                        best_pos = vlerp(&vj, &vi, tseg);
                        best_dist = dist_sqr;
                        best_node = Some(cur_idx);
                    }
                    continue;
                }

                for &nei_ref in &neis[..nneis] {
                    let Some(nei_idx) = self.tiny_node_pool.get_node(nei_ref, 0) else {
                        continue;
                    };
                    if self.tiny_node_pool.node(nei_idx).flags.contains(NodeFlags::CLOSED) {
                        continue;
                    }

                    // Skip if the edge is outside the search circle.
                    let (dist_sqr, _) = dist_pt_seg_sqr_2d(&search_pos, &vj, &vi);
                    if dist_sqr > search_rad_sqr {
                        continue;
                    }

                    if stack.push(nei_idx) {
                        let node = self.tiny_node_pool.node_mut(nei_idx);
                        node.parent = Some(cur_idx);
                        node.flags.insert(NodeFlags::CLOSED);
                    }
                }
            }
        }

        let mut status = Status::SUCCESS;
        let mut n = 0;
        if let Some(best) = best_node {
            // Reverse the parent chain so it runs from the start.
            let mut prev = None;
            let mut cur = Some(best);
            while let Some(i) = cur {
                let node = self.tiny_node_pool.node_mut(i);
                cur = node.parent;
                node.parent = prev;
                prev = Some(i);
            }

            let mut cur = prev;
            while let Some(i) = cur {
                if n >= visited.len() {
                    status |= Status::BUFFER_TOO_SMALL;
                    break;
                }
                visited[n] = self.tiny_node_pool.node(i).id;
                n += 1;
                cur = self.tiny_node_pool.parent(i);
            }
        }

        Ok(Outcome::new(
            SurfaceMove {
                position: best_pos,
                visited_count: n,
            },
            status,
        ))
    }

    /// Wall segments of a polygon, and its portals when `segment_refs` is
    /// given.
    ///
    /// Each segment is written as its two end points. Portal segments get
    /// the neighbour reference in `segment_refs`, walls get null. A tile
    /// border edge shared with several polygons is split into alternating
    /// portal and wall pieces.
    pub fn get_poly_wall_segments(
        &self,
        poly_ref: PolyRef,
        filter: &dyn QueryFilter,
        segments: &mut [[[f32; 3]; 2]],
        mut segment_refs: Option<&mut [PolyRef]>,
    ) -> QueryResult<Outcome<usize>> {
        let nav = self.nav_mesh;
        let (tile, poly) = nav.get_tile_and_poly_by_ref(poly_ref)?;

        let store_portals = segment_refs.is_some();
        let mut status = Status::SUCCESS;
        let mut n = 0;

        let mut store = |n: &mut usize, seg: [[f32; 3]; 2], r: PolyRef| -> bool {
            if *n >= segments.len() {
                return false;
            }
            segments[*n] = seg;
            if let Some(slot) = segment_refs.as_deref_mut().and_then(|refs| refs.get_mut(*n)) {
                *slot = r;
            }
            *n += 1;
            true
        };

        let (verts, nv) = tile.poly_vertices(poly);
        for j in 0..nv {
            let vj = verts[j];
            let vi = verts[(j + 1) % nv];
            let nei = poly.neighbors[j];

            if nei & EXT_LINK == 0 {
                // Internal edge.
                let mut nei_ref = PolyRef::NULL;
                if nei != 0 {
                    let idx = (nei - 1) as usize;
                    let candidate = PolyRef::new(nav.get_poly_ref_base(tile).id() | idx as u32);
                    if tile.polys.get(idx).is_some_and(|p| filter.pass_filter(candidate, tile, p)) {
                        nei_ref = candidate;
                    }
                }
                // Leads to another polygon and portals are not wanted.
                if nei_ref.is_valid() && !store_portals {
                    continue;
                }
                if !store(&mut n, [vj, vi], nei_ref) {
                    status |= Status::BUFFER_TOO_SMALL;
                }
                continue;
            }

            // Tile border: collect the linked stretches of the edge.
            let mut ints = [SegInterval {
                poly_ref: PolyRef::NULL,
                tmin: 0,
                tmax: 0,
            }; MAX_INTERVALS];
            let mut nints = 0;
            for link in tile.links_of(poly) {
                if link.edge_index as usize != j || !link.reference.is_valid() {
                    continue;
                }
                let Ok((nei_tile, nei_poly)) = nav.get_tile_and_poly_by_ref(link.reference) else {
                    continue;
                };
                if filter.pass_filter(link.reference, nei_tile, nei_poly) {
                    insert_interval(&mut ints, &mut nints, link.bmin as i16, link.bmax as i16, link.reference);
                }
            }

            // Sentinels.
            insert_interval(&mut ints, &mut nints, -1, 0, PolyRef::NULL);
            insert_interval(&mut ints, &mut nints, 255, 256, PolyRef::NULL);

            for k in 1..nints {
                // Portal piece.
                if store_portals && ints[k].poly_ref.is_valid() {
                    let tmin = ints[k].tmin as f32 / 255.0;
                    let tmax = ints[k].tmax as f32 / 255.0;
                    let seg = [vlerp(&vj, &vi, tmin), vlerp(&vj, &vi, tmax)];
                    if !store(&mut n, seg, ints[k].poly_ref) {
                        status |= Status::BUFFER_TOO_SMALL;
                    }
                }

                // Wall piece between the previous interval and this one.
                let imin = ints[k - 1].tmax;
                let imax = ints[k].tmin;
                if imin != imax {
                    let tmin = imin as f32 / 255.0;
                    let tmax = imax as f32 / 255.0;
                    let seg = [vlerp(&vj, &vi, tmin), vlerp(&vj, &vi, tmax)];
                    if !store(&mut n, seg, PolyRef::NULL) {
                        status |= Status::BUFFER_TOO_SMALL;
                    }
                }
            }
        }

        Ok(Outcome::new(n, status))
    }
}
