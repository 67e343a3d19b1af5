//! Sliced pathfinding
//!
//! The sliced search runs the same A* as [`NavMeshQuery::find_path`] but in
//! bounded steps, so a caller can spread one search over several frames.
//! With [`FindPathOptions::ANY_ANGLE`] it also tries to reach each neighbour
//! straight from the grandparent with a raycast, which gives corridors
//! closer to the true shortest path on open ground.

use crate::nav_mesh_query::{QueryData, H_SCALE};
use crate::node_pool::NodeIndex;
use crate::query_filter::QueryFilter;
use crate::status::{Outcome, QueryResult, Status};
use crate::{FindPathOptions, NavMeshQuery, NodeFlags, PolyRef, RaycastOptions};
use navmesh_common::{vdist, vdist_sqr, visfinite};

/// Raycast shortcuts are only tried within this many agent radii.
const RAYCAST_LIMIT_PROPORTION: f32 = 50.0;

impl<'a> NavMeshQuery<'a> {
    /// Starts a sliced path search.
    ///
    /// The filter is kept until the search is finalized. Returns
    /// [`Status::IN_PROGRESS`], or [`Status::SUCCESS`] when start and end
    /// are the same polygon.
    pub fn init_sliced_find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &'a dyn QueryFilter,
        options: FindPathOptions,
    ) -> QueryResult<Status> {
        self.query = QueryData {
            status: Status::FAILURE,
            start_ref,
            end_ref,
            end_pos: *end_pos,
            filter: Some(filter),
            options,
            ..QueryData::default()
        };

        let nav = self.nav_mesh;
        if !nav.is_valid_poly_ref(start_ref)
            || !nav.is_valid_poly_ref(end_ref)
            || !visfinite(start_pos)
            || !visfinite(end_pos)
        {
            return Err(Status::invalid_param());
        }

        if options.contains(FindPathOptions::ANY_ANGLE) {
            let (tile, _) = nav.get_tile_and_poly_by_ref(start_ref)?;
            if let Some(header) = tile.header.as_ref() {
                let limit = header.walkable_radius * RAYCAST_LIMIT_PROPORTION;
                self.query.raycast_limit_sqr = limit * limit;
            }
        }

        if start_ref == end_ref {
            self.query.status = Status::SUCCESS;
            return Ok(Status::SUCCESS);
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

        self.query.status = Status::IN_PROGRESS;
        self.query.last_best_node = Some(start_node);
        self.query.last_best_node_cost = start_total;
        Ok(Status::IN_PROGRESS)
    }

    /// Runs up to `max_iter` node expansions of the sliced search.
    ///
    /// Returns the number of expansions done. The status stays
    /// [`Status::IN_PROGRESS`] until the goal is reached or the open list
    /// runs dry.
    pub fn update_sliced_find_path(&mut self, max_iter: usize) -> QueryResult<Outcome<usize>> {
        if self.query.status.is_failure() {
            return Err(self.query.status);
        }
        if !self.query.status.is_in_progress() {
            return Ok(Outcome::new(0, self.query.status));
        }

        let nav = self.nav_mesh;
        let (Some(filter), Some(_)) = (self.query.filter, self.query.last_best_node) else {
            self.query.status = Status::FAILURE;
            return Err(Status::FAILURE);
        };
        // The mesh may have been swapped through init.
        if !nav.is_valid_poly_ref(self.query.start_ref) || !nav.is_valid_poly_ref(self.query.end_ref) {
            self.query.status = Status::FAILURE;
            return Err(Status::FAILURE);
        }

        let end_ref = self.query.end_ref;
        let end_pos = self.query.end_pos;
        let any_angle = self.query.options.contains(FindPathOptions::ANY_ANGLE);

        let mut iter = 0;
        while iter < max_iter {
            let Some(best_idx) = self.open_list.pop() else {
                break;
            };
            iter += 1;

            let best = self.node_pool.node_mut(best_idx);
            best.flags.remove(NodeFlags::OPEN);
            best.flags.insert(NodeFlags::CLOSED);
            let best_ref = best.id;
            let best_pos = best.pos;
            let best_cost = best.cost;
            let best_parent = best.parent;

            if best_ref == end_ref {
                self.query.last_best_node = Some(best_idx);
                self.query.status = Status::SUCCESS | self.query.status.detail();
                return Ok(Outcome::new(iter, self.query.status));
            }

            // A polygon that went away mid-search fails the query.
            let Ok(best_view) = self.view(best_ref) else {
                self.query.status = Status::FAILURE;
                return Err(Status::FAILURE);
            };

            let parent = best_parent.map(|p| self.node_pool.node(p).clone());
            let parent_ref = parent.as_ref().map_or(PolyRef::NULL, |p| p.id);
            let grandpa_ref = parent
                .as_ref()
                .and_then(|p| p.parent)
                .map_or(PolyRef::NULL, |gp| self.node_pool.node(gp).id);

            let parent_view = if parent_ref.is_valid() {
                match self.view(parent_ref) {
                    Ok(v) if !grandpa_ref.is_valid() || nav.is_valid_poly_ref(grandpa_ref) => Some(v),
                    _ => {
                        self.query.status = Status::FAILURE;
                        return Err(Status::FAILURE);
                    }
                }
            } else {
                None
            };

            // Only try shortcuts from parents within the raycast limit.
            let try_los = any_angle
                && parent.as_ref().is_some_and(|p| {
                    self.query.raycast_limit_sqr >= f32::MAX
                        || vdist_sqr(&p.pos, &best_pos) < self.query.raycast_limit_sqr
                });

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

                // Tile border crossings get their own node per side.
                let cross_side = if link.is_external() { link.side >> 1 } else { 0 };

                let Some(nei_idx) = self.node_pool.get_node(neighbour_ref, cross_side) else {
                    self.query.status |= Status::OUT_OF_NODES;
                    continue;
                };

                // Already reached from the same parent as this node.
                let nei_parent = self.node_pool.node(nei_idx).parent;
                if nei_parent.is_some() && nei_parent == best_parent {
                    continue;
                }

                if self.node_pool.node(nei_idx).flags.is_empty() {
                    if let Ok(mid) = self.edge_mid_point(best_view, nei_view) {
                        self.node_pool.node_mut(nei_idx).pos = mid;
                    }
                }
                let nei_pos = self.node_pool.node(nei_idx).pos;

                let mut cost = 0.0;
                let mut found_shortcut = false;
                if try_los {
                    if let Some(parent) = parent.as_ref() {
                        let hit = self.raycast(
                            parent_ref,
                            &parent.pos,
                            &nei_pos,
                            filter,
                            RaycastOptions::USE_COSTS,
                            grandpa_ref,
                            &mut [],
                        );
                        if let Ok(hit) = hit {
                            found_shortcut = hit.value.t >= 1.0;
                            if found_shortcut {
                                cost = parent.cost + hit.value.path_cost;
                            }
                        }
                    }
                }

                if !found_shortcut {
                    let cur_cost =
                        filter.get_cost(&best_pos, &nei_pos, parent_view, best_view, Some(nei_view));
                    cost = best_cost + cur_cost;
                }

                let heuristic = if neighbour_ref == end_ref {
                    cost += filter.get_cost(&nei_pos, &end_pos, Some(best_view), nei_view, None);
                    0.0
                } else {
                    vdist(&nei_pos, &end_pos) * H_SCALE
                };
                let total = cost + heuristic;

                let nei = self.node_pool.node_mut(nei_idx);
                if nei.flags.intersects(NodeFlags::OPEN | NodeFlags::CLOSED) && total >= nei.total {
                    continue;
                }

                nei.parent = if found_shortcut { best_parent } else { Some(best_idx) };
                nei.id = neighbour_ref;
                nei.flags.remove(NodeFlags::CLOSED | NodeFlags::PARENT_DETACHED);
                nei.cost = cost;
                nei.total = total;
                if found_shortcut {
                    nei.flags.insert(NodeFlags::PARENT_DETACHED);
                }

                if nei.flags.contains(NodeFlags::OPEN) {
                    self.open_list.modify(nei_idx, total);
                } else {
                    nei.flags.insert(NodeFlags::OPEN);
                    self.open_list.push(nei_idx, total);
                }

                if heuristic < self.query.last_best_node_cost {
                    self.query.last_best_node_cost = heuristic;
                    self.query.last_best_node = Some(nei_idx);
                }
            }
        }

        // Exhausted all nodes without reaching the goal.
        if self.open_list.is_empty() {
            self.query.status = Status::SUCCESS | self.query.status.detail();
        }

        Ok(Outcome::new(iter, self.query.status))
    }

    /// Writes the corridor of the sliced search and resets its state.
    ///
    /// An unfinished search is finalized towards the node closest to the
    /// goal, with [`Status::PARTIAL_RESULT`].
    pub fn finalize_sliced_find_path(&mut self, path: &mut [PolyRef]) -> QueryResult<Outcome<usize>> {
        let result = self.finalize_sliced_with(path, |_| None);
        self.query = QueryData::default();
        result
    }

    /// Like [`NavMeshQuery::finalize_sliced_find_path`], but aims for the
    /// furthest polygon of `existing` that the search visited.
    ///
    /// Used when a search is cut short and the caller wants to keep moving
    /// along its previous corridor.
    pub fn finalize_sliced_find_path_partial(
        &mut self,
        existing: &[PolyRef],
        path: &mut [PolyRef],
    ) -> QueryResult<Outcome<usize>> {
        if existing.is_empty() {
            self.query = QueryData::default();
            return Err(Status::invalid_param());
        }
        let result = self.finalize_sliced_with(path, |query| {
            existing
                .iter()
                .rev()
                .find_map(|&r| query.node_pool.find_nodes(r).next())
        });
        self.query = QueryData::default();
        result
    }

    fn finalize_sliced_with(
        &mut self,
        path: &mut [PolyRef],
        pick_target: impl FnOnce(&Self) -> Option<NodeIndex>,
    ) -> QueryResult<Outcome<usize>> {
        if path.is_empty() {
            return Err(Status::invalid_param());
        }
        if self.query.status.is_failure() || self.query.status.is_empty() {
            return Err(Status::FAILURE);
        }

        if self.query.start_ref == self.query.end_ref {
            path[0] = self.query.start_ref;
            return Ok(Outcome::new(1, Status::SUCCESS | self.query.status.detail()));
        }

        let Some(last_best) = self.query.last_best_node else {
            return Err(Status::FAILURE);
        };
        let target = match pick_target(self) {
            Some(node) => node,
            None => last_best,
        };
        if self.node_pool.node(target).id != self.query.end_ref {
            self.query.status |= Status::PARTIAL_RESULT;
        }

        let count = self.store_sliced_path(target, path);
        Ok(Outcome::new(count, Status::SUCCESS | self.query.status.detail()))
    }

    /// Reverses the parent chain ending at `end_node` and writes it out,
    /// filling detached segments with the polygons a raycast crosses.
    fn store_sliced_path(&mut self, end_node: NodeIndex, path: &mut [PolyRef]) -> usize {
        // Reverse the chain so it runs from the start. The detached flag
        // moves with the segment it describes.
        let mut prev: Option<NodeIndex> = None;
        let mut cur = Some(end_node);
        let mut prev_ray = NodeFlags::empty();
        while let Some(i) = cur {
            let node = self.node_pool.node_mut(i);
            let next = node.parent;
            node.parent = prev;
            let next_ray = node.flags & NodeFlags::PARENT_DETACHED;
            node.flags = (node.flags - NodeFlags::PARENT_DETACHED) | prev_ray;
            prev_ray = next_ray;
            prev = Some(i);
            cur = next;
        }

        let filter = self.query.filter;
        let mut n = 0;
        let mut cur = prev;
        while let Some(i) = cur {
            let node = self.node_pool.node(i);
            let next = node.parent;
            let detached = node.flags.contains(NodeFlags::PARENT_DETACHED);

            match (detached, next, filter) {
                (true, Some(next), Some(filter)) => {
                    let node_id = node.id;
                    let node_pos = node.pos;
                    let next_id = self.node_pool.node(next).id;
                    let next_pos = self.node_pool.node(next).pos;
                    let hit = self.raycast(
                        node_id,
                        &node_pos,
                        &next_pos,
                        filter,
                        RaycastOptions::empty(),
                        PolyRef::NULL,
                        &mut path[n..],
                    );
                    match hit {
                        Ok(hit) => {
                            n += hit.value.path_count;
                            // The ray ends on the next polygon's boundary and
                            // may already list it.
                            if n > 0 && path[n - 1] == next_id {
                                n -= 1;
                            }
                            if hit.status.has_detail(Status::BUFFER_TOO_SMALL) {
                                self.query.status |= Status::BUFFER_TOO_SMALL;
                                break;
                            }
                        }
                        Err(status) => {
                            self.query.status |= status.detail();
                            break;
                        }
                    }
                }
                _ => {
                    if n >= path.len() {
                        self.query.status |= Status::BUFFER_TOO_SMALL;
                        break;
                    }
                    path[n] = node.id;
                    n += 1;
                }
            }
            cur = next;
        }
        n
    }
}
