//! 2D geometry operations on the XZ plane
//!
//! Polygons are convex and wound so that [`tri_area_2d`] of consecutive
//! vertices is positive. Most helpers ignore the Y component entirely.

/// Calculate twice the signed area of a 2D triangle on the XZ plane.
///
/// Positive for the navigation mesh polygon winding, zero for collinear points.
#[inline]
pub fn tri_area_2d(a: &[f32; 3], b: &[f32; 3], c: &[f32; 3]) -> f32 {
    let abx = b[0] - a[0];
    let abz = b[2] - a[2];
    let acx = c[0] - a[0];
    let acz = c[2] - a[2];
    acx * abz - abx * acz
}

/// Perp product of two vectors on the XZ plane, `u.z * v.x - u.x * v.z`.
#[inline]
pub fn vperp_2d(u: &[f32; 3], v: &[f32; 3]) -> f32 {
    u[2] * v[0] - u[0] * v[2]
}

#[inline]
pub fn vdot_2d(u: &[f32; 3], v: &[f32; 3]) -> f32 {
    u[0] * v[0] + u[2] * v[2]
}

/// Twice the area of a convex polygon, summed over its triangle fan.
pub fn poly_area_2d(verts: &[[f32; 3]]) -> f32 {
    let mut area = 0.0;
    for j in 2..verts.len() {
        area += tri_area_2d(&verts[0], &verts[j - 1], &verts[j]);
    }
    area
}

/// Squared distance from `pt` to segment `p`-`q` on the XZ plane.
///
/// Returns the squared distance and the parameter of the closest point along
/// the segment, clamped to `[0, 1]`.
pub fn dist_pt_seg_sqr_2d(pt: &[f32; 3], p: &[f32; 3], q: &[f32; 3]) -> (f32, f32) {
    let pqx = q[0] - p[0];
    let pqz = q[2] - p[2];
    let dx = pt[0] - p[0];
    let dz = pt[2] - p[2];
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = p[0] + t * pqx - pt[0];
    let dz = p[2] + t * pqz - pt[2];
    (dx * dx + dz * dz, t)
}

/// Check if a point is inside a convex or concave polygon on the XZ plane.
///
/// Uses the crossing number test, so the winding does not matter.
pub fn point_in_polygon_2d(pt: &[f32; 3], verts: &[[f32; 3]]) -> bool {
    let mut inside = false;
    let n = verts.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = &verts[i];
        let vj = &verts[j];
        if ((vi[2] > pt[2]) != (vj[2] > pt[2]))
            && (pt[0] < (vj[0] - vi[0]) * (pt[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Point-in-polygon test that also measures the distance to every edge.
///
/// `edge_dist[j]` and `edge_t[j]` receive the squared distance and segment
/// parameter for edge `j` (from vertex `j` to vertex `j + 1`). Both output
/// slices must hold at least `verts.len()` entries.
pub fn distance_pt_poly_edges_sqr(
    pt: &[f32; 3],
    verts: &[[f32; 3]],
    edge_dist: &mut [f32],
    edge_t: &mut [f32],
) -> bool {
    let mut inside = false;
    let n = verts.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = &verts[i];
        let vj = &verts[j];
        if ((vi[2] > pt[2]) != (vj[2] > pt[2]))
            && (pt[0] < (vj[0] - vi[0]) * (pt[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            inside = !inside;
        }
        let (d, t) = dist_pt_seg_sqr_2d(pt, vj, vi);
        edge_dist[j] = d;
        edge_t[j] = t;
        j = i;
    }
    inside
}

/// Clips segment `p0`-`p1` against a convex polygon on the XZ plane.
///
/// Returns `(tmin, tmax, seg_min, seg_max)`: the entry and exit parameters
/// along the segment and the indices of the edges crossed on entry and exit.
/// An edge index is `None` when the corresponding end point lies inside the
/// polygon. Returns `None` when the segment misses the polygon.
pub fn intersect_segment_poly_2d(
    p0: &[f32; 3],
    p1: &[f32; 3],
    verts: &[[f32; 3]],
) -> Option<(f32, f32, Option<usize>, Option<usize>)> {
    const EPS: f32 = 0.000001;

    let mut tmin = 0.0;
    let mut tmax = 1.0;
    let mut seg_min = None;
    let mut seg_max = None;

    let dir = [p1[0] - p0[0], 0.0, p1[2] - p0[2]];

    let n = verts.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let edge = [verts[i][0] - verts[j][0], 0.0, verts[i][2] - verts[j][2]];
        let diff = [p0[0] - verts[j][0], 0.0, p0[2] - verts[j][2]];
        let num = vperp_2d(&edge, &diff);
        let den = vperp_2d(&dir, &edge);
        if den.abs() < EPS {
            // Parallel to this edge.
            if num < 0.0 {
                return None;
            }
            j = i;
            continue;
        }
        let t = num / den;
        if den < 0.0 {
            // Entering across this edge.
            if t > tmin {
                tmin = t;
                seg_min = Some(j);
                if tmin > tmax {
                    return None;
                }
            }
        } else if t < tmax {
            // Leaving across this edge.
            tmax = t;
            seg_max = Some(j);
            if tmax < tmin {
                return None;
            }
        }
        j = i;
    }

    Some((tmin, tmax, seg_min, seg_max))
}

/// Intersects the lines through `ap`-`aq` and `bp`-`bq` on the XZ plane.
///
/// Returns the parameters `(s, t)` of the intersection along each line, or
/// `None` when the lines are parallel.
pub fn intersect_seg_seg_2d(
    ap: &[f32; 3],
    aq: &[f32; 3],
    bp: &[f32; 3],
    bq: &[f32; 3],
) -> Option<(f32, f32)> {
    let perp_xz = |a: &[f32; 3], b: &[f32; 3]| a[0] * b[2] - a[2] * b[0];
    let u = [aq[0] - ap[0], 0.0, aq[2] - ap[2]];
    let v = [bq[0] - bp[0], 0.0, bq[2] - bp[2]];
    let w = [ap[0] - bp[0], 0.0, ap[2] - bp[2]];
    let d = perp_xz(&u, &v);
    if d.abs() < 1e-6 {
        return None;
    }
    Some((perp_xz(&v, &w) / d, perp_xz(&u, &w) / d))
}

fn project_poly(axis: &[f32; 3], poly: &[[f32; 3]]) -> (f32, f32) {
    let mut rmin = f32::MAX;
    let mut rmax = f32::MIN;
    for v in poly {
        let d = vdot_2d(axis, v);
        rmin = rmin.min(d);
        rmax = rmax.max(d);
    }
    (rmin, rmax)
}

#[inline]
fn overlap_range(amin: f32, amax: f32, bmin: f32, bmax: f32, eps: f32) -> bool {
    !((amin + eps) > bmax || (amax - eps) < bmin)
}

fn has_separating_edge(edges_of: &[[f32; 3]], a: &[[f32; 3]], b: &[[f32; 3]]) -> bool {
    const EPS: f32 = 1e-4;
    let n = edges_of.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let va = &edges_of[j];
        let vb = &edges_of[i];
        let normal = [vb[2] - va[2], 0.0, -(vb[0] - va[0])];
        let (amin, amax) = project_poly(&normal, a);
        let (bmin, bmax) = project_poly(&normal, b);
        if !overlap_range(amin, amax, bmin, bmax, EPS) {
            return true;
        }
        j = i;
    }
    false
}

/// Separating axis test between two convex polygons on the XZ plane.
///
/// Polygons that merely touch along an edge do not overlap.
pub fn overlap_poly_poly_2d(polya: &[[f32; 3]], polyb: &[[f32; 3]]) -> bool {
    !has_separating_edge(polya, polya, polyb) && !has_separating_edge(polyb, polya, polyb)
}

/// Check if two axis-aligned bounding boxes overlap. Touching boxes overlap.
#[inline]
pub fn overlap_bounds(amin: &[f32; 3], amax: &[f32; 3], bmin: &[f32; 3], bmax: &[f32; 3]) -> bool {
    !(amin[0] > bmax[0]
        || amax[0] < bmin[0]
        || amin[1] > bmax[1]
        || amax[1] < bmin[1]
        || amin[2] > bmax[2]
        || amax[2] < bmin[2])
}

/// Check if two quantized bounding boxes overlap. Touching boxes overlap.
#[inline]
pub fn overlap_quant_bounds(
    amin: &[u16; 3],
    amax: &[u16; 3],
    bmin: &[u16; 3],
    bmax: &[u16; 3],
) -> bool {
    !(amin[0] > bmax[0]
        || amax[0] < bmin[0]
        || amin[1] > bmax[1]
        || amax[1] < bmin[1]
        || amin[2] > bmax[2]
        || amax[2] < bmin[2])
}

/// Height of triangle `a`, `b`, `c` at the XZ location of `p`.
///
/// Returns `None` when `p` is outside the triangle or the triangle is
/// degenerate in 2D.
pub fn closest_height_point_triangle(
    p: &[f32; 3],
    a: &[f32; 3],
    b: &[f32; 3],
    c: &[f32; 3],
) -> Option<f32> {
    const EPS: f32 = 1e-6;

    let v0 = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let v1 = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v2 = [p[0] - a[0], p[1] - a[1], p[2] - a[2]];

    // Scaled barycentric coordinates.
    let mut denom = v0[0] * v1[2] - v0[2] * v1[0];
    if denom.abs() < EPS {
        return None;
    }
    let mut u = v1[2] * v2[0] - v1[0] * v2[2];
    let mut v = v0[0] * v2[2] - v0[2] * v2[0];
    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }

    if u >= 0.0 && v >= 0.0 && (u + v) <= denom {
        Some(a[1] + (v0[1] * u + v1[1] * v) / denom)
    } else {
        None
    }
}

/// Picks a point inside a convex polygon from two uniform samples in `[0, 1)`.
///
/// `s` selects a fan triangle weighted by its area and `t` places the point
/// inside it, so the output is uniformly distributed over the polygon.
pub fn random_point_in_convex_poly(pts: &[[f32; 3]], s: f32, t: f32) -> [f32; 3] {
    let npts = pts.len();
    if npts < 3 {
        return pts.first().copied().unwrap_or_default();
    }

    let mut areasum = 0.0;
    for i in 2..npts {
        areasum += tri_area_2d(&pts[0], &pts[i - 1], &pts[i]).max(0.001);
    }

    // Find sub triangle weighted by area.
    let thr = s * areasum;
    let mut acc = 0.0;
    let mut u = 1.0;
    let mut tri = npts - 1;
    for i in 2..npts {
        let dacc = tri_area_2d(&pts[0], &pts[i - 1], &pts[i]);
        if thr >= acc && thr < (acc + dacc) {
            u = (thr - acc) / dacc;
            tri = i;
            break;
        }
        acc += dacc;
    }

    let v = t.sqrt();
    let a = 1.0 - v;
    let b = (1.0 - u) * v;
    let c = u * v;
    let pa = &pts[0];
    let pb = &pts[tri - 1];
    let pc = &pts[tri];

    [
        a * pa[0] + b * pb[0] + c * pc[0],
        a * pa[1] + b * pb[1] + c * pc[1],
        a * pa[2] + b * pb[2] + c * pc[2],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_square() -> [[f32; 3]; 4] {
        [
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [1.0, 0.0, 0.0],
        ]
    }

    #[test]
    fn test_tri_area_2d_winding() {
        let sq = unit_square();
        assert!(tri_area_2d(&sq[0], &sq[1], &sq[2]) > 0.0);
        assert!(tri_area_2d(&sq[0], &sq[2], &sq[1]) < 0.0);
        assert_eq!(
            tri_area_2d(&[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0], &[2.0, 0.0, 0.0]),
            0.0
        );
        assert_relative_eq!(poly_area_2d(&sq), 2.0);
    }

    #[test]
    fn test_dist_pt_seg_clamps_parameter() {
        let p = [0.0, 0.0, 0.0];
        let q = [2.0, 0.0, 0.0];
        let (d, t) = dist_pt_seg_sqr_2d(&[1.0, 5.0, 1.0], &p, &q);
        assert_relative_eq!(d, 1.0);
        assert_relative_eq!(t, 0.5);

        let (d, t) = dist_pt_seg_sqr_2d(&[-3.0, 0.0, 0.0], &p, &q);
        assert_relative_eq!(d, 9.0);
        assert_eq!(t, 0.0);
    }

    #[test]
    fn test_point_in_polygon() {
        let sq = unit_square();
        assert!(point_in_polygon_2d(&[0.5, 10.0, 0.5], &sq));
        assert!(!point_in_polygon_2d(&[1.5, 0.0, 0.5], &sq));
    }

    #[test]
    fn test_distance_pt_poly_edges() {
        let sq = unit_square();
        let mut ed = [0.0; 4];
        let mut et = [0.0; 4];
        let inside = distance_pt_poly_edges_sqr(&[2.0, 0.0, 0.5], &sq, &mut ed, &mut et);
        assert!(!inside);
        // Edge 2 runs along x = 1.
        assert_relative_eq!(ed[2], 1.0);
        assert_relative_eq!(et[2], 0.5);
    }

    #[test]
    fn test_intersect_segment_poly_inside() {
        let sq = unit_square();
        let hit = intersect_segment_poly_2d(&[0.2, 0.0, 0.5], &[0.8, 0.0, 0.5], &sq);
        let (tmin, tmax, seg_min, seg_max) = hit.expect("segment is inside");
        assert_eq!(tmin, 0.0);
        assert_eq!(tmax, 1.0);
        assert_eq!(seg_min, None);
        assert_eq!(seg_max, None);
    }

    #[test]
    fn test_intersect_segment_poly_exit_edge() {
        let sq = unit_square();
        let (_, tmax, seg_min, seg_max) =
            intersect_segment_poly_2d(&[0.5, 0.0, 0.5], &[1.5, 0.0, 0.5], &sq)
                .expect("segment starts inside");
        assert_relative_eq!(tmax, 0.5);
        assert_eq!(seg_min, None);
        assert_eq!(seg_max, Some(2));
    }

    #[test]
    fn test_intersect_segment_poly_miss() {
        let sq = unit_square();
        assert!(intersect_segment_poly_2d(&[2.0, 0.0, 2.0], &[3.0, 0.0, 3.0], &sq).is_none());
    }

    #[test]
    fn test_intersect_seg_seg() {
        let (s, t) = intersect_seg_seg_2d(
            &[0.0, 0.0, 0.0],
            &[2.0, 0.0, 0.0],
            &[1.0, 0.0, -1.0],
            &[1.0, 0.0, 1.0],
        )
        .expect("lines cross");
        assert_relative_eq!(s, 0.5);
        assert_relative_eq!(t, 0.5);
        assert!(intersect_seg_seg_2d(
            &[0.0, 0.0, 0.0],
            &[1.0, 0.0, 0.0],
            &[0.0, 0.0, 1.0],
            &[1.0, 0.0, 1.0]
        )
        .is_none());
    }

    #[test]
    fn test_overlap_poly_poly() {
        let a = unit_square();
        let shifted = a.map(|v| [v[0] + 0.5, v[1], v[2]]);
        let touching = a.map(|v| [v[0] + 1.0, v[1], v[2]]);
        let apart = a.map(|v| [v[0] + 3.0, v[1], v[2]]);
        assert!(overlap_poly_poly_2d(&a, &shifted));
        assert!(!overlap_poly_poly_2d(&a, &touching));
        assert!(!overlap_poly_poly_2d(&a, &apart));
    }

    #[test]
    fn test_overlap_bounds() {
        let amin = [0.0, 0.0, 0.0];
        let amax = [2.0, 2.0, 2.0];
        assert!(overlap_bounds(&amin, &amax, &[1.0; 3], &[3.0; 3]));
        assert!(overlap_bounds(&amin, &amax, &[2.0; 3], &[3.0; 3]));
        assert!(!overlap_bounds(&amin, &amax, &[3.0; 3], &[4.0; 3]));
        assert!(overlap_quant_bounds(&[0; 3], &[4; 3], &[4; 3], &[8; 3]));
        assert!(!overlap_quant_bounds(&[0; 3], &[3; 3], &[4; 3], &[8; 3]));
    }

    #[test]
    fn test_closest_height_point_triangle() {
        let a = [0.0, 0.0, 0.0];
        let b = [0.0, 0.0, 1.0];
        let c = [1.0, 2.0, 0.0];
        let h = closest_height_point_triangle(&[0.5, 0.0, 0.25], &a, &b, &c).expect("inside");
        assert_relative_eq!(h, 1.0);
        assert!(closest_height_point_triangle(&[2.0, 0.0, 2.0], &a, &b, &c).is_none());
    }

    #[test]
    fn test_random_point_stays_inside() {
        let sq = unit_square();
        for (s, t) in [(0.0, 0.0), (0.3, 0.7), (0.99, 0.99), (0.5, 0.5)] {
            let p = random_point_in_convex_poly(&sq, s, t);
            assert!(p[0] >= 0.0 && p[0] <= 1.0);
            assert!(p[2] >= 0.0 && p[2] <= 1.0);
        }
    }
}
