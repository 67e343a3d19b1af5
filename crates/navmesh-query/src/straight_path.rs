//! String pulling of polygon corridors into straight paths

use crate::status::{Outcome, QueryResult, Status};
use crate::{NavMeshQuery, PolyRef, PolyType, StraightPathFlags, StraightPathOptions};
use navmesh_common::{dist_pt_seg_sqr_2d, intersect_seg_seg_2d, tri_area_2d, vequal, visfinite, vlerp};

/// Portals closer than this to the start point are skipped.
const PORTAL_SKIP_DISTANCE: f32 = 0.001;

/// Vertex of a straight path
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StraightPathPoint {
    /// Position of the vertex
    pub pos: [f32; 3],
    /// Start, end or off-mesh connection marker
    pub flags: StraightPathFlags,
    /// Polygon the path enters at this vertex, null at the end
    pub poly: PolyRef,
}

/// Output buffer of the funnel.
struct StraightPathWriter<'o> {
    points: &'o mut [StraightPathPoint],
    count: usize,
    truncated: bool,
}

impl<'o> StraightPathWriter<'o> {
    fn new(points: &'o mut [StraightPathPoint]) -> Self {
        Self {
            points,
            count: 0,
            truncated: false,
        }
    }

    fn last_pos(&self) -> Option<[f32; 3]> {
        self.count.checked_sub(1).map(|i| self.points[i].pos)
    }

    /// Appends a vertex, merging it into the previous one when both are at
    /// the same location.
    ///
    /// Returns [`Status::IN_PROGRESS`] while more vertices can be added. A
    /// vertex that does not fit is dropped and ends the path.
    fn append(&mut self, pos: [f32; 3], flags: StraightPathFlags, poly: PolyRef) -> Status {
        if self.last_pos().is_some_and(|last| vequal(&last, &pos)) {
            let point = &mut self.points[self.count - 1];
            point.flags = flags;
            point.poly = poly;
            return if flags == StraightPathFlags::END {
                Status::SUCCESS
            } else {
                Status::IN_PROGRESS
            };
        }
        if self.count >= self.points.len() {
            self.truncated = true;
            return Status::SUCCESS | Status::BUFFER_TOO_SMALL;
        }

        self.points[self.count] = StraightPathPoint { pos, flags, poly };
        self.count += 1;

        if flags == StraightPathFlags::END {
            return Status::SUCCESS;
        }
        Status::IN_PROGRESS
    }

    fn finish_status(&self) -> Status {
        if self.truncated {
            Status::SUCCESS | Status::BUFFER_TOO_SMALL
        } else {
            Status::SUCCESS
        }
    }
}

fn corner_flags(poly: PolyRef, poly_type: PolyType) -> StraightPathFlags {
    if !poly.is_valid() {
        StraightPathFlags::END
    } else if poly_type == PolyType::OffMeshConnection {
        StraightPathFlags::OFFMESH_CONNECTION
    } else {
        StraightPathFlags::empty()
    }
}

impl NavMeshQuery<'_> {
    /// Finds the straight path from `start_pos` to `end_pos` within the
    /// polygon corridor `path`.
    ///
    /// Start and end are clamped to the first and last polygon. Returns the
    /// number of vertices written to `straight_path`. A corridor that breaks
    /// partway gives the path up to the break with
    /// [`Status::PARTIAL_RESULT`].
    pub fn find_straight_path(
        &self,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        path: &[PolyRef],
        straight_path: &mut [StraightPathPoint],
        options: StraightPathOptions,
    ) -> QueryResult<Outcome<usize>> {
        if !visfinite(start_pos)
            || !visfinite(end_pos)
            || path.is_empty()
            || !path[0].is_valid()
            || straight_path.is_empty()
        {
            return Err(Status::invalid_param());
        }

        let invalid = |_| Status::invalid_param();
        let closest_start = self.closest_point_on_poly_boundary(path[0], start_pos).map_err(invalid)?;
        let mut closest_end = self
            .closest_point_on_poly_boundary(path[path.len() - 1], end_pos)
            .map_err(invalid)?;

        let crossings = options.intersects(StraightPathOptions::AREA_CROSSINGS | StraightPathOptions::ALL_CROSSINGS);
        let mut out = StraightPathWriter::new(straight_path);

        let stat = out.append(closest_start, StraightPathFlags::START, path[0]);
        if stat != Status::IN_PROGRESS {
            return Ok(Outcome::new(out.count, stat));
        }

        if path.len() > 1 {
            let mut portal_apex = closest_start;
            let mut portal_left = portal_apex;
            let mut portal_right = portal_apex;
            let mut apex_index = 0;
            let mut left_index = 0;
            let mut right_index = 0;
            let mut left_poly_type = PolyType::Ground;
            let mut right_poly_type = PolyType::Ground;
            let mut left_poly_ref = path[0];
            let mut right_poly_ref = path[0];

            let mut i = 0;
            while i < path.len() {
                let left;
                let right;
                let to_type;

                if i + 1 < path.len() {
                    let Ok(portal) = self.get_portal_points(path[i], path[i + 1]) else {
                        // path[i + 1] is not usable: end the path on path[i].
                        closest_end = self.closest_point_on_poly_boundary(path[i], end_pos).map_err(invalid)?;
                        if crossings {
                            // Partial result either way, ignore the status.
                            let _ = self.append_portals(apex_index, i, &closest_end, path, &mut out, options);
                        }
                        let _ = out.append(closest_end, StraightPathFlags::empty(), path[i]);
                        let status = out.finish_status() | Status::PARTIAL_RESULT;
                        return Ok(Outcome::new(out.count, status));
                    };
                    left = portal.left;
                    right = portal.right;
                    to_type = portal.to_type;

                    // Starting really close to the first portal, advance.
                    if i == 0 {
                        let (d, _) = dist_pt_seg_sqr_2d(&portal_apex, &left, &right);
                        if d < PORTAL_SKIP_DISTANCE * PORTAL_SKIP_DISTANCE {
                            i += 1;
                            continue;
                        }
                    }
                } else {
                    // End of the path.
                    left = closest_end;
                    right = closest_end;
                    to_type = PolyType::Ground;
                }

                let next_ref = path.get(i + 1).copied().unwrap_or(PolyRef::NULL);

                // Right vertex.
                if tri_area_2d(&portal_apex, &portal_right, &right) <= 0.0 {
                    if vequal(&portal_apex, &portal_right) || tri_area_2d(&portal_apex, &portal_left, &right) > 0.0 {
                        portal_right = right;
                        right_poly_ref = next_ref;
                        right_poly_type = to_type;
                        right_index = i;
                    } else {
                        // Right over left, the left point becomes the new apex.
                        if crossings {
                            let stat = self.append_portals(apex_index, left_index, &portal_left, path, &mut out, options)?;
                            if stat != Status::IN_PROGRESS {
                                return Ok(Outcome::new(out.count, stat));
                            }
                        }

                        portal_apex = portal_left;
                        apex_index = left_index;

                        let stat = out.append(portal_apex, corner_flags(left_poly_ref, left_poly_type), left_poly_ref);
                        if stat != Status::IN_PROGRESS {
                            return Ok(Outcome::new(out.count, stat));
                        }

                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;

                        // Restart scanning from the apex.
                        i = apex_index + 1;
                        continue;
                    }
                }

                // Left vertex.
                if tri_area_2d(&portal_apex, &portal_left, &left) >= 0.0 {
                    if vequal(&portal_apex, &portal_left) || tri_area_2d(&portal_apex, &portal_right, &left) < 0.0 {
                        portal_left = left;
                        left_poly_ref = next_ref;
                        left_poly_type = to_type;
                        left_index = i;
                    } else {
                        // Left over right, the right point becomes the new apex.
                        if crossings {
                            let stat =
                                self.append_portals(apex_index, right_index, &portal_right, path, &mut out, options)?;
                            if stat != Status::IN_PROGRESS {
                                return Ok(Outcome::new(out.count, stat));
                            }
                        }

                        portal_apex = portal_right;
                        apex_index = right_index;

                        let stat =
                            out.append(portal_apex, corner_flags(right_poly_ref, right_poly_type), right_poly_ref);
                        if stat != Status::IN_PROGRESS {
                            return Ok(Outcome::new(out.count, stat));
                        }

                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;

                        i = apex_index + 1;
                        continue;
                    }
                }

                i += 1;
            }

            // Crossings along the last straight segment.
            if crossings {
                let stat = self.append_portals(apex_index, path.len() - 1, &closest_end, path, &mut out, options)?;
                if stat != Status::IN_PROGRESS {
                    return Ok(Outcome::new(out.count, stat));
                }
            }
        }

        // The end vertex may merge into the last one, the status comes from
        // the buffer state either way.
        let _ = out.append(closest_end, StraightPathFlags::END, PolyRef::NULL);
        Ok(Outcome::new(out.count, out.finish_status()))
    }

    /// Adds the points where the segment from the last vertex to `end_pos`
    /// crosses the portals between `path[start_idx]` and `path[end_idx]`.
    fn append_portals(
        &self,
        start_idx: usize,
        end_idx: usize,
        end_pos: &[f32; 3],
        path: &[PolyRef],
        out: &mut StraightPathWriter<'_>,
        options: StraightPathOptions,
    ) -> QueryResult<Status> {
        let Some(start_pos) = out.last_pos() else {
            return Ok(Status::IN_PROGRESS);
        };

        for i in start_idx..end_idx {
            let from = self.view(path[i]).map_err(|_| Status::invalid_param())?;
            let to = self.view(path[i + 1]).map_err(|_| Status::invalid_param())?;

            let Ok((left, right)) = self.portal_points(from, to) else {
                break;
            };

            if options.contains(StraightPathOptions::AREA_CROSSINGS) && from.poly.area == to.poly.area {
                continue;
            }

            if let Some((_, t)) = intersect_seg_seg_2d(&start_pos, end_pos, &left, &right) {
                let pt = vlerp(&left, &right, t);
                let stat = out.append(pt, StraightPathFlags::empty(), path[i + 1]);
                if stat != Status::IN_PROGRESS {
                    return Ok(stat);
                }
            }
        }
        Ok(Status::IN_PROGRESS)
    }
}
