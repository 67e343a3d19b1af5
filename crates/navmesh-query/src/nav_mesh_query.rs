//! Navigation mesh query
//!
//! [`NavMeshQuery`] owns the search scratch memory (node pools and open
//! list) for one navigation mesh. Every searching operation takes `&mut self`,
//! so a query object serves one search at a time; create one per thread.

use crate::node_pool::{NodeIndex, MAX_POOL_NODES};
use crate::poly_query::{CollectPolysQuery, FindNearestPolyQuery, PolyQuery};
use crate::query_filter::{PolyView, QueryFilter};
use crate::status::{Outcome, QueryResult, Status};
use crate::{
    FindPathOptions, MeshTile, NavMesh, NodeFlags, NodePool, NodeQueue, Poly, PolyRef, PolyType,
    VERTS_PER_POLYGON,
};
use navmesh_common::{
    dist_pt_seg_sqr_2d, distance_pt_poly_edges_sqr, next_pow2, vdist, visfinite, visfinite_2d,
    vlerp, vsub,
};

/// Heuristic scale, slightly below one so the search stays admissible with
/// float error.
pub(crate) const H_SCALE: f32 = 0.999;

/// Node budget of the small pool used by local searches.
const TINY_POOL_NODES: usize = 64;
const TINY_POOL_HASH: usize = 32;

/// Portal edge between two adjacent polygons
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalPoints {
    /// Left end of the portal, seen from the first polygon
    pub left: [f32; 3],
    /// Right end of the portal
    pub right: [f32; 3],
    /// Type of the polygon the portal leads from
    pub from_type: PolyType,
    /// Type of the polygon the portal leads to
    pub to_type: PolyType,
}

/// Result of [`NavMeshQuery::find_nearest_poly`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPoly {
    /// Nearest polygon, null when nothing was in range
    pub poly_ref: PolyRef,
    /// Closest point on that polygon, the query center when none was found
    pub point: [f32; 3],
    /// True when the point lies directly over the polygon
    pub is_over_poly: bool,
}

/// State of an in-flight sliced path search
#[derive(Clone, Copy)]
pub(crate) struct QueryData<'a> {
    pub(crate) status: Status,
    pub(crate) last_best_node: Option<NodeIndex>,
    pub(crate) last_best_node_cost: f32,
    pub(crate) start_ref: PolyRef,
    pub(crate) end_ref: PolyRef,
    pub(crate) end_pos: [f32; 3],
    pub(crate) filter: Option<&'a dyn QueryFilter>,
    pub(crate) options: FindPathOptions,
    pub(crate) raycast_limit_sqr: f32,
}

impl Default for QueryData<'_> {
    fn default() -> Self {
        Self {
            status: Status::empty(),
            last_best_node: None,
            last_best_node_cost: 0.0,
            start_ref: PolyRef::NULL,
            end_ref: PolyRef::NULL,
            end_pos: [0.0; 3],
            filter: None,
            options: FindPathOptions::empty(),
            raycast_limit_sqr: f32::MAX,
        }
    }
}

/// Navigation mesh query
pub struct NavMeshQuery<'a> {
    pub(crate) nav_mesh: &'a NavMesh,
    pub(crate) node_pool: NodePool,
    pub(crate) tiny_node_pool: NodePool,
    pub(crate) open_list: NodeQueue,
    pub(crate) query: QueryData<'a>,
}

fn node_hash_size(max_nodes: usize) -> usize {
    next_pow2((max_nodes / 4) as u32).max(1) as usize
}

impl<'a> NavMeshQuery<'a> {
    /// Creates a query over `nav_mesh` able to visit up to `max_nodes`
    /// polygons per search.
    pub fn new(nav_mesh: &'a NavMesh, max_nodes: usize) -> QueryResult<Self> {
        if max_nodes == 0 || max_nodes > MAX_POOL_NODES {
            return Err(Status::invalid_param());
        }
        Ok(Self {
            nav_mesh,
            node_pool: NodePool::new(max_nodes, node_hash_size(max_nodes)),
            tiny_node_pool: NodePool::new(TINY_POOL_NODES, TINY_POOL_HASH),
            open_list: NodeQueue::new(max_nodes),
            query: QueryData::default(),
        })
    }

    /// Re-targets the query at a mesh, growing the node budget if needed.
    ///
    /// Existing pools are reused when they already hold `max_nodes`.
    pub fn init(&mut self, nav_mesh: &'a NavMesh, max_nodes: usize) -> QueryResult<()> {
        if max_nodes == 0 || max_nodes > MAX_POOL_NODES {
            return Err(Status::invalid_param());
        }
        self.nav_mesh = nav_mesh;
        if self.node_pool.max_nodes() < max_nodes {
            self.node_pool = NodePool::new(max_nodes, node_hash_size(max_nodes));
        } else {
            self.node_pool.clear();
        }
        self.tiny_node_pool.clear();
        if self.open_list.capacity() < max_nodes {
            self.open_list = NodeQueue::new(max_nodes);
        } else {
            self.open_list.clear();
        }
        self.query = QueryData::default();
        Ok(())
    }

    /// The navigation mesh the query works on.
    pub fn attached_nav_mesh(&self) -> &'a NavMesh {
        self.nav_mesh
    }

    /// Node pool of the last search.
    pub fn node_pool(&self) -> &NodePool {
        &self.node_pool
    }

    /// Resolves a reference into a [`PolyView`].
    pub(crate) fn view(&self, poly_ref: PolyRef) -> QueryResult<PolyView<'a>> {
        let (tile, poly) = self.nav_mesh.get_tile_and_poly_by_ref(poly_ref)?;
        Ok(PolyView::new(poly_ref, tile, poly))
    }

    /// True if the reference is valid and passes the filter.
    pub fn is_valid_poly_ref(&self, poly_ref: PolyRef, filter: &dyn QueryFilter) -> bool {
        self.nav_mesh
            .get_tile_and_poly_by_ref(poly_ref)
            .is_ok_and(|(tile, poly)| filter.pass_filter(poly_ref, tile, poly))
    }

    /// True if the polygon was closed by the last search.
    pub fn is_in_closed_list(&self, poly_ref: PolyRef) -> bool {
        self.node_pool
            .find_nodes(poly_ref)
            .any(|i| self.node_pool.node(i).flags.contains(NodeFlags::CLOSED))
    }

    /// Portal between two polygons given as views.
    pub(crate) fn portal_points(
        &self,
        from: PolyView<'_>,
        to: PolyView<'_>,
    ) -> QueryResult<([f32; 3], [f32; 3])> {
        let link = from
            .tile
            .links_of(from.poly)
            .find(|l| l.reference == to.poly_ref)
            .ok_or_else(Status::invalid_param)?;

        // Off-mesh connections meet their neighbours in a single point.
        if from.poly.is_off_mesh_connection() {
            let v = link.edge_index as usize;
            let p = from.tile.vertex(from.poly, v);
            return Ok((p, p));
        }
        if to.poly.is_off_mesh_connection() {
            let back = to
                .tile
                .links_of(to.poly)
                .find(|l| l.reference == from.poly_ref)
                .ok_or_else(Status::invalid_param)?;
            let p = to.tile.vertex(to.poly, back.edge_index as usize);
            return Ok((p, p));
        }

        let nv = from.poly.vert_count as usize;
        let edge = link.edge_index as usize;
        let v0 = from.tile.vertex(from.poly, edge);
        let v1 = from.tile.vertex(from.poly, (edge + 1) % nv);

        // Tile border links may cover only part of the edge.
        if link.is_external() && (link.bmin != 0 || link.bmax != 255) {
            let s = 1.0 / 255.0;
            let tmin = link.bmin as f32 * s;
            let tmax = link.bmax as f32 * s;
            return Ok((vlerp(&v0, &v1, tmin), vlerp(&v0, &v1, tmax)));
        }
        Ok((v0, v1))
    }

    /// Midpoint of the portal between two polygons given as views.
    pub(crate) fn edge_mid_point(&self, from: PolyView<'_>, to: PolyView<'_>) -> QueryResult<[f32; 3]> {
        let (left, right) = self.portal_points(from, to)?;
        Ok(vlerp(&left, &right, 0.5))
    }

    /// Portal between two adjacent polygons.
    pub fn get_portal_points(&self, from: PolyRef, to: PolyRef) -> QueryResult<PortalPoints> {
        let from = self.view(from)?;
        let to = self.view(to)?;
        let (left, right) = self.portal_points(from, to)?;
        Ok(PortalPoints {
            left,
            right,
            from_type: from.poly.poly_type,
            to_type: to.poly.poly_type,
        })
    }

    /// Midpoint of the portal between two adjacent polygons.
    pub fn get_edge_mid_point(&self, from: PolyRef, to: PolyRef) -> QueryResult<[f32; 3]> {
        let from = self.view(from)?;
        let to = self.view(to)?;
        self.edge_mid_point(from, to)
    }

    /// Closest point on a polygon using its detail mesh for height.
    ///
    /// The flag is true when `pos` lies over the polygon.
    pub fn closest_point_on_poly(&self, poly_ref: PolyRef, pos: &[f32; 3]) -> QueryResult<([f32; 3], bool)> {
        if !visfinite(pos) {
            return Err(Status::invalid_param());
        }
        self.nav_mesh.closest_point_on_poly(poly_ref, pos)
    }

    /// Closest point on the polygon boundary in 2D, or `pos` itself when it
    /// is inside. Does not use the detail mesh.
    pub fn closest_point_on_poly_boundary(&self, poly_ref: PolyRef, pos: &[f32; 3]) -> QueryResult<[f32; 3]> {
        let (tile, poly) = self.nav_mesh.get_tile_and_poly_by_ref(poly_ref)?;
        if !visfinite(pos) {
            return Err(Status::invalid_param());
        }

        let (verts, nv) = tile.poly_vertices(poly);
        let mut edge_dist = [0.0; VERTS_PER_POLYGON];
        let mut edge_t = [0.0; VERTS_PER_POLYGON];
        let inside =
            distance_pt_poly_edges_sqr(pos, &verts[..nv], &mut edge_dist[..nv], &mut edge_t[..nv]);
        if inside {
            return Ok(*pos);
        }

        let mut imin = 0;
        for i in 1..nv {
            if edge_dist[i] < edge_dist[imin] {
                imin = i;
            }
        }
        let va = verts[imin];
        let vb = verts[(imin + 1) % nv];
        Ok(vlerp(&va, &vb, edge_t[imin]))
    }

    /// Height of a polygon at the XZ location of `pos`.
    ///
    /// Fails when `pos` is outside the polygon footprint.
    pub fn get_poly_height(&self, poly_ref: PolyRef, pos: &[f32; 3]) -> QueryResult<f32> {
        let (tile, poly) = self.nav_mesh.get_tile_and_poly_by_ref(poly_ref)?;
        if !visfinite_2d(pos) {
            return Err(Status::invalid_param());
        }

        if poly.is_off_mesh_connection() {
            let v0 = tile.vertex(poly, 0);
            let v1 = tile.vertex(poly, 1);
            let (_, t) = dist_pt_seg_sqr_2d(pos, &v0, &v1);
            return Ok(v0[1] + (v1[1] - v0[1]) * t);
        }

        let ip = self.nav_mesh.decode_poly_id_poly(poly_ref);
        self.nav_mesh
            .get_poly_height(tile, ip, pos)
            .ok_or_else(Status::invalid_param)
    }

    /// Nearest polygon to `center` within the box `half_extents`.
    ///
    /// Finding nothing is not an error: the returned reference is null.
    pub fn find_nearest_poly(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &dyn QueryFilter,
    ) -> QueryResult<NearestPoly> {
        let mut query = FindNearestPolyQuery::new(self.nav_mesh, center);
        self.query_polygons_with(center, half_extents, filter, &mut query)?;
        Ok(NearestPoly {
            poly_ref: query.nearest_ref(),
            point: *query.nearest_point(),
            is_over_poly: query.is_over_poly(),
        })
    }

    fn query_polygons_in_tile(
        &self,
        tile: &MeshTile,
        qmin: &[f32; 3],
        qmax: &[f32; 3],
        filter: &dyn QueryFilter,
        query: &mut dyn PolyQuery,
    ) {
        const BATCH_SIZE: usize = 32;
        let Some(first) = tile.polys.first() else {
            return;
        };
        let mut refs = [PolyRef::NULL; BATCH_SIZE];
        let mut polys: [&Poly; BATCH_SIZE] = [first; BATCH_SIZE];
        let mut n = 0;

        self.nav_mesh.query_polygons_in_tile(tile, qmin, qmax, |poly_ref, ip| {
            let poly = &tile.polys[ip];
            if !filter.pass_filter(poly_ref, tile, poly) {
                return;
            }
            refs[n] = poly_ref;
            polys[n] = poly;
            n += 1;
            if n == BATCH_SIZE {
                query.process(tile, &polys, &refs);
                n = 0;
            }
        });

        if n > 0 {
            query.process(tile, &polys[..n], &refs[..n]);
        }
    }

    /// Hands every polygon overlapping the box and passing the filter to
    /// `query`, in batches per tile.
    pub fn query_polygons_with(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &dyn QueryFilter,
        query: &mut dyn PolyQuery,
    ) -> QueryResult<()> {
        if !visfinite(center) || !visfinite(half_extents) || half_extents.iter().any(|&h| h < 0.0) {
            return Err(Status::invalid_param());
        }

        let bmin = vsub(center, half_extents);
        let bmax = [
            center[0] + half_extents[0],
            center[1] + half_extents[1],
            center[2] + half_extents[2],
        ];

        let (minx, miny) = self.nav_mesh.calc_tile_loc(&bmin);
        let (maxx, maxy) = self.nav_mesh.calc_tile_loc(&bmax);
        for y in miny..=maxy {
            for x in minx..=maxx {
                for tile in self.nav_mesh.get_tiles_at(x, y) {
                    self.query_polygons_in_tile(tile, &bmin, &bmax, filter, query);
                }
            }
        }
        Ok(())
    }

    /// Collects the polygons overlapping the box into `polys`.
    ///
    /// Sets [`Status::BUFFER_TOO_SMALL`] when more polygons matched than fit.
    pub fn query_polygons(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &dyn QueryFilter,
        polys: &mut [PolyRef],
    ) -> QueryResult<Outcome<usize>> {
        if polys.is_empty() {
            return Err(Status::invalid_param());
        }
        let mut collector = CollectPolysQuery::new(polys);
        self.query_polygons_with(center, half_extents, filter, &mut collector)?;

        let mut status = Status::SUCCESS;
        if collector.overflow() {
            status |= Status::BUFFER_TOO_SMALL;
        }
        Ok(Outcome::new(collector.num_collected(), status))
    }

    /// Finds a polygon corridor from the start to the end polygon.
    ///
    /// When the end cannot be reached the corridor leads to the polygon
    /// closest to it and [`Status::PARTIAL_RESULT`] is set. Returns the
    /// number of references written to `path`.
    pub fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &dyn QueryFilter,
        path: &mut [PolyRef],
    ) -> QueryResult<Outcome<usize>> {
        let nav = self.nav_mesh;
        if !nav.is_valid_poly_ref(start_ref)
            || !nav.is_valid_poly_ref(end_ref)
            || !visfinite(start_pos)
            || !visfinite(end_pos)
            || path.is_empty()
        {
            return Err(Status::invalid_param());
        }

        if start_ref == end_ref {
            path[0] = start_ref;
            return Ok(Outcome::success(1));
        }

        self.node_pool.clear();
        self.open_list.clear();

        let start_node = self
            .node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::failure(Status::OUT_OF_NODES))?;
        let start_total = vdist(start_pos, end_pos) * H_SCALE;
        {
            let node = self.node_pool.node_mut(start_node);
            node.pos = *start_pos;
            node.parent = None;
            node.cost = 0.0;
            node.total = start_total;
            node.flags = NodeFlags::OPEN;
        }
        self.open_list.push(start_node, start_total);

        let mut last_best_node = start_node;
        let mut last_best_node_cost = start_total;
        let mut out_of_nodes = false;

        while let Some(best_idx) = self.open_list.pop() {
            let best = self.node_pool.node_mut(best_idx);
            best.flags.remove(NodeFlags::OPEN);
            best.flags.insert(NodeFlags::CLOSED);
            let best_ref = best.id;
            let best_pos = best.pos;
            let best_cost = best.cost;
            let best_parent = best.parent;

            // Reached the goal, stop searching.
            if best_ref == end_ref {
                last_best_node = best_idx;
                break;
            }

            let Ok(best_view) = self.view(best_ref) else {
                continue;
            };
            let parent_ref = best_parent.map_or(PolyRef::NULL, |p| self.node_pool.node(p).id);
            let parent_view = if parent_ref.is_valid() {
                self.view(parent_ref).ok()
            } else {
                None
            };

            for link in best_view.tile.links_of(best_view.poly) {
                let neighbour_ref = link.reference;
                // Skip invalid ids and do not expand back to where we came from.
                if !neighbour_ref.is_valid() || neighbour_ref == parent_ref {
                    continue;
                }
                let Ok(nei_view) = self.view(neighbour_ref) else {
                    continue;
                };
                if !filter.pass_filter(neighbour_ref, nei_view.tile, nei_view.poly) {
                    continue;
                }

                // Tile border crossings get their own node per side.
                let cross_side = if link.is_external() { link.side >> 1 } else { 0 };

                let Some(nei_idx) = self.node_pool.get_node(neighbour_ref, cross_side) else {
                    out_of_nodes = true;
                    continue;
                };

                // First visit: place the node on the portal midpoint.
                if self.node_pool.node(nei_idx).flags.is_empty() {
                    if let Ok(mid) = self.edge_mid_point(best_view, nei_view) {
                        self.node_pool.node_mut(nei_idx).pos = mid;
                    }
                }
                let nei_pos = self.node_pool.node(nei_idx).pos;

                let (cost, heuristic) = if neighbour_ref == end_ref {
                    // The last hop also pays for reaching the end position.
                    let cur_cost =
                        filter.get_cost(&best_pos, &nei_pos, parent_view, best_view, Some(nei_view));
                    let end_cost =
                        filter.get_cost(&nei_pos, end_pos, Some(best_view), nei_view, None);
                    (best_cost + cur_cost + end_cost, 0.0)
                } else {
                    let cur_cost =
                        filter.get_cost(&best_pos, &nei_pos, parent_view, best_view, Some(nei_view));
                    (best_cost + cur_cost, vdist(&nei_pos, end_pos) * H_SCALE)
                };
                let total = cost + heuristic;

                let nei = self.node_pool.node_mut(nei_idx);
                // Already reached as cheaply or cheaper.
                if nei.flags.intersects(NodeFlags::OPEN | NodeFlags::CLOSED) && total >= nei.total {
                    continue;
                }

                nei.id = neighbour_ref;
                nei.parent = Some(best_idx);
                nei.flags.remove(NodeFlags::CLOSED);
                nei.cost = cost;
                nei.total = total;

                if nei.flags.contains(NodeFlags::OPEN) {
                    self.open_list.modify(nei_idx, total);
                } else {
                    nei.flags.insert(NodeFlags::OPEN);
                    self.open_list.push(nei_idx, total);
                }

                if heuristic < last_best_node_cost {
                    last_best_node_cost = heuristic;
                    last_best_node = nei_idx;
                }
            }
        }

        let (count, mut status) = self.get_path_to_node(last_best_node, path);
        if self.node_pool.node(last_best_node).id != end_ref {
            status |= Status::PARTIAL_RESULT;
        }
        if out_of_nodes {
            status |= Status::OUT_OF_NODES;
        }

        log::debug!(
            "find_path {} -> {}: {} polys, {} nodes, {}",
            start_ref,
            end_ref,
            count,
            self.node_pool.node_count(),
            status
        );
        Ok(Outcome::new(count, status))
    }

    /// Writes the corridor from the search start to `end_node`.
    ///
    /// When it does not fit the prefix from the start is kept and
    /// [`Status::BUFFER_TOO_SMALL`] is set.
    pub(crate) fn get_path_to_node(&self, end_node: NodeIndex, path: &mut [PolyRef]) -> (usize, Status) {
        let mut length = 0;
        let mut cur = Some(end_node);
        while let Some(i) = cur {
            length += 1;
            cur = self.node_pool.parent(i);
        }

        // Skip the tail that does not fit.
        let mut cur = Some(end_node);
        for _ in path.len()..length {
            cur = cur.and_then(|i| self.node_pool.parent(i));
        }

        let count = length.min(path.len());
        for slot in path[..count].iter_mut().rev() {
            let Some(i) = cur else { break };
            *slot = self.node_pool.node(i).id;
            cur = self.node_pool.parent(i);
        }

        let mut status = Status::SUCCESS;
        if length > path.len() {
            status |= Status::BUFFER_TOO_SMALL;
        }
        (count, status)
    }
}
