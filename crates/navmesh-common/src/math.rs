//! Vector math on `[f32; 3]` triplets
//!
//! Navigation data is stored as plain float triplets; these helpers keep the
//! query code free of conversions. Y is up.

use glam::Vec3;

/// Equality threshold used by [`vequal`], squared.
const EQUAL_THRESHOLD_SQR: f32 = (1.0 / 16384.0) * (1.0 / 16384.0);

#[inline]
pub fn vadd(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn vsub(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vscale(v: &[f32; 3], s: f32) -> [f32; 3] {
    [v[0] * s, v[1] * s, v[2] * s]
}

/// Scaled vector addition: `a + b * s`.
#[inline]
pub fn vmad(a: &[f32; 3], b: &[f32; 3], s: f32) -> [f32; 3] {
    [a[0] + b[0] * s, a[1] + b[1] * s, a[2] + b[2] * s]
}

/// Linear interpolation between `a` and `b`.
#[inline]
pub fn vlerp(a: &[f32; 3], b: &[f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

#[inline]
pub fn vmin(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])]
}

#[inline]
pub fn vmax(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0].max(b[0]), a[1].max(b[1]), a[2].max(b[2])]
}

#[inline]
pub fn vdot(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vdist(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    vdist_sqr(a, b).sqrt()
}

#[inline]
pub fn vdist_sqr(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let dz = b[2] - a[2];
    dx * dx + dy * dy + dz * dz
}

/// Distance between two points ignoring the Y axis.
#[inline]
pub fn vdist_2d(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    vdist_sqr_2d(a, b).sqrt()
}

/// Squared distance between two points ignoring the Y axis.
#[inline]
pub fn vdist_sqr_2d(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let dx = b[0] - a[0];
    let dz = b[2] - a[2];
    dx * dx + dz * dz
}

#[inline]
pub fn vlen_sqr(v: &[f32; 3]) -> f32 {
    vdot(v, v)
}

/// Returns the unit vector of `v`, or zero when `v` has no length.
#[inline]
pub fn vnormalize(v: &[f32; 3]) -> [f32; 3] {
    Vec3::from_array(*v).normalize_or_zero().to_array()
}

/// True when the points are closer than the mesh equality threshold.
#[inline]
pub fn vequal(a: &[f32; 3], b: &[f32; 3]) -> bool {
    vdist_sqr(a, b) < EQUAL_THRESHOLD_SQR
}

/// True when every component is finite.
#[inline]
pub fn visfinite(v: &[f32; 3]) -> bool {
    v.iter().all(|c| c.is_finite())
}

/// True when the X and Z components are finite.
#[inline]
pub fn visfinite_2d(v: &[f32; 3]) -> bool {
    v[0].is_finite() && v[2].is_finite()
}

/// Rounds up to the next power of two. Zero stays zero.
#[inline]
pub fn next_pow2(v: u32) -> u32 {
    if v == 0 {
        0
    } else {
        v.next_power_of_two()
    }
}

/// Integer base-2 logarithm, zero for zero.
#[inline]
pub fn ilog2(v: u32) -> u32 {
    v.checked_ilog2().unwrap_or(0)
}

/// Returns the tile side opposite to `side` in the 8-neighbourhood.
#[inline]
pub fn opposite_tile(side: u8) -> u8 {
    (side + 4) & 0x7
}

/// Axis-aligned bounds of a point set.
pub fn bounds_of(points: &[[f32; 3]]) -> ([f32; 3], [f32; 3]) {
    let mut bmin = [f32::MAX; 3];
    let mut bmax = [f32::MIN; 3];
    for p in points {
        bmin = vmin(&bmin, p);
        bmax = vmax(&bmax, p);
    }
    (bmin, bmax)
}
