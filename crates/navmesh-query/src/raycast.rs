//! Raycasts along the navigation mesh surface

use crate::query_filter::{PolyView, QueryFilter};
use crate::status::{Outcome, QueryResult, Status};
use crate::{NavMeshQuery, PolyRef, RaycastOptions, LINK_INTERNAL};
use navmesh_common::{intersect_segment_poly_2d, visfinite, vlerp, vnormalize};

/// Result of [`NavMeshQuery::raycast`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastHit {
    /// Hit parameter along the segment. `f32::MAX` when the end point was
    /// reached without hitting a wall.
    pub t: f32,
    /// Normal of the wall that was hit, zero when nothing was hit
    pub hit_normal: [f32; 3],
    /// Edge of the last visited polygon the ray left through
    pub hit_edge_index: Option<usize>,
    /// Number of polygons written to the caller's path
    pub path_count: usize,
    /// Filter cost along the ray, only with [`RaycastOptions::USE_COSTS`]
    pub path_cost: f32,
}

impl Default for RaycastHit {
    fn default() -> Self {
        Self {
            t: 0.0,
            hit_normal: [0.0; 3],
            hit_edge_index: None,
            path_count: 0,
            path_cost: 0.0,
        }
    }
}

impl RaycastHit {
    /// True when the ray stopped at a wall before its end point.
    pub fn hit_wall(&self) -> bool {
        self.t < 1.0
    }
}

impl<'a> NavMeshQuery<'a> {
    /// Casts a "walkability" ray along the surface from `start_pos` towards
    /// `end_pos`.
    ///
    /// The ray is tested in 2D against the polygons it crosses, following
    /// polygon links. It stops at the first wall or when the end point is
    /// inside the current polygon. `prev_ref` is the polygon the ray came
    /// from and only matters for costs. Visited polygons go into `path`,
    /// which may be empty.
    #[allow(clippy::too_many_arguments)]
    pub fn raycast(
        &self,
        start_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &dyn QueryFilter,
        options: RaycastOptions,
        prev_ref: PolyRef,
        path: &mut [PolyRef],
    ) -> QueryResult<Outcome<RaycastHit>> {
        let nav = self.nav_mesh;
        if !nav.is_valid_poly_ref(start_ref)
            || !visfinite(start_pos)
            || !visfinite(end_pos)
            || (prev_ref.is_valid() && !nav.is_valid_poly_ref(prev_ref))
        {
            return Err(Status::invalid_param());
        }

        let use_costs = options.contains(RaycastOptions::USE_COSTS);
        let mut hit = RaycastHit::default();
        let mut status = Status::SUCCESS;
        let mut n = 0;

        let dir = [
            end_pos[0] - start_pos[0],
            end_pos[1] - start_pos[1],
            end_pos[2] - start_pos[2],
        ];
        let mut cur_pos = *start_pos;

        let mut cur = self.view(start_ref)?;
        let mut prev: Option<PolyView<'a>> = if prev_ref.is_valid() {
            Some(self.view(prev_ref)?)
        } else {
            None
        };

        loop {
            let (verts, nv) = cur.tile.poly_vertices(cur.poly);
            let verts = &verts[..nv];

            let Some((_, tmax, _, seg_max)) = intersect_segment_poly_2d(start_pos, end_pos, verts)
            else {
                // Could not hit the polygon, keep the old t and report the hit.
                hit.path_count = n;
                return Ok(Outcome::new(hit, status));
            };

            hit.hit_edge_index = seg_max;
            if tmax > hit.t {
                hit.t = tmax;
            }

            if n < path.len() {
                path[n] = cur.poly_ref;
                n += 1;
            } else {
                status |= Status::BUFFER_TOO_SMALL;
            }

            // Ray end is completely inside the polygon.
            let Some(seg_max) = seg_max else {
                hit.t = f32::MAX;
                hit.path_count = n;
                if use_costs {
                    hit.path_cost += filter.get_cost(&cur_pos, end_pos, prev, cur, Some(cur));
                }
                return Ok(Outcome::new(hit, status));
            };

            let mut next: Option<PolyView<'a>> = None;
            for link in cur.tile.links_of(cur.poly) {
                if link.edge_index as usize != seg_max {
                    continue;
                }
                let Ok(candidate) = self.view(link.reference) else {
                    continue;
                };
                // Off-mesh connections cannot be raycast through.
                if candidate.poly.is_off_mesh_connection() {
                    continue;
                }
                if !filter.pass_filter(candidate.poly_ref, candidate.tile, candidate.poly) {
                    continue;
                }

                // Internal edges and full tile border portals always connect.
                if link.side == LINK_INTERNAL || (link.bmin == 0 && link.bmax == 255) {
                    next = Some(candidate);
                    break;
                }

                // Partial tile border portal: check the hit lies on the
                // linked stretch of the edge.
                let left = verts[link.edge_index as usize];
                let right = verts[(link.edge_index as usize + 1) % nv];
                let axis = if link.side == 0 || link.side == 4 { 2 } else { 0 };
                let s = 1.0 / 255.0;
                let mut lmin = left[axis] + (right[axis] - left[axis]) * (link.bmin as f32 * s);
                let mut lmax = left[axis] + (right[axis] - left[axis]) * (link.bmax as f32 * s);
                if lmin > lmax {
                    std::mem::swap(&mut lmin, &mut lmax);
                }
                let v = start_pos[axis] + (end_pos[axis] - start_pos[axis]) * tmax;
                if v >= lmin && v <= lmax {
                    next = Some(candidate);
                    break;
                }
            }

            if use_costs {
                // Ray hit point on the edge, with height from the edge.
                let last_pos = cur_pos;
                cur_pos = [
                    start_pos[0] + dir[0] * hit.t,
                    start_pos[1] + dir[1] * hit.t,
                    start_pos[2] + dir[2] * hit.t,
                ];
                let e1 = verts[seg_max];
                let e2 = verts[(seg_max + 1) % nv];
                let e_dir = [e2[0] - e1[0], e2[1] - e1[1], e2[2] - e1[2]];
                let diff = [cur_pos[0] - e1[0], cur_pos[2] - e1[2]];
                let s = if e_dir[0] * e_dir[0] > e_dir[2] * e_dir[2] {
                    diff[0] / e_dir[0]
                } else {
                    diff[1] / e_dir[2]
                };
                cur_pos[1] = e1[1] + e_dir[1] * s;

                hit.path_cost += filter.get_cost(&last_pos, &cur_pos, prev, cur, next);
            }

            let Some(next) = next else {
                // No neighbour, we hit a wall.
                let va = verts[seg_max];
                let vb = verts[(seg_max + 1) % nv];
                let dx = vb[0] - va[0];
                let dz = vb[2] - va[2];
                hit.hit_normal = vnormalize(&[dz, 0.0, -dx]);
                hit.path_count = n;
                return Ok(Outcome::new(hit, status));
            };

            prev = Some(cur);
            cur = next;
        }
    }

    /// Point where a [`RaycastHit`] stopped, on the segment `start`-`end`.
    pub fn raycast_hit_point(start_pos: &[f32; 3], end_pos: &[f32; 3], hit: &RaycastHit) -> [f32; 3] {
        if hit.t >= 1.0 {
            *end_pos
        } else {
            vlerp(start_pos, end_pos, hit.t)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{create_grid_navmesh, poly_at};
    use crate::DefaultQueryFilter;
    use approx::assert_relative_eq;

    #[test]
    fn test_hit_point() {
        let hit = RaycastHit {
            t: 0.25,
            ..RaycastHit::default()
        };
        assert!(hit.hit_wall());
        let p = NavMeshQuery::raycast_hit_point(&[0.0; 3], &[4.0, 0.0, 0.0], &hit);
        assert_relative_eq!(p[0], 1.0);

        let through = RaycastHit {
            t: f32::MAX,
            ..RaycastHit::default()
        };
        assert!(!through.hit_wall());
        assert_eq!(
            NavMeshQuery::raycast_hit_point(&[0.0; 3], &[4.0, 0.0, 0.0], &through),
            [4.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_raycast_prev_ref_must_be_valid() -> navmesh_common::Result<()> {
        let nav = create_grid_navmesh(2, 1, 1.0)?;
        let query = NavMeshQuery::new(&nav, 64)?;
        let filter = DefaultQueryFilter::new();
        let start = poly_at(&nav, 0.5, 0.5)?;
        let result = query.raycast(
            start,
            &[0.5, 0.0, 0.5],
            &[1.5, 0.0, 0.5],
            &filter,
            RaycastOptions::empty(),
            PolyRef::new(0xdead_beef),
            &mut [],
        );
        assert_eq!(result.err().map(|s| s.detail()), Some(Status::INVALID_PARAM));
        Ok(())
    }
}
