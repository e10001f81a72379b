// math.rs - Small vector helpers over [f32; 3]

#[inline]
pub fn vsub(a: &[f32], b: &[f32]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vadd(a: &[f32], b: &[f32]) -> [f32; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn vcross(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub fn vdot(a: &[f32], b: &[f32]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vnormalize(v: &mut [f32; 3]) {
    let len = vdot(v, v).sqrt();
    if len > 0.0 {
        let inv = 1.0 / len;
        v[0] *= inv;
        v[1] *= inv;
        v[2] *= inv;
    }
}

#[inline]
pub fn vmin(out: &mut [f32; 3], v: &[f32]) {
    out[0] = out[0].min(v[0]);
    out[1] = out[1].min(v[1]);
    out[2] = out[2].min(v[2]);
}

#[inline]
pub fn vmax(out: &mut [f32; 3], v: &[f32]) {
    out[0] = out[0].max(v[0]);
    out[1] = out[1].max(v[1]);
    out[2] = out[2].max(v[2]);
}

/// Squared distance on the xz plane
#[inline]
pub fn vdist_sq_2d(a: &[f32], b: &[f32]) -> f32 {
    let dx = b[0] - a[0];
    let dz = b[2] - a[2];
    dx * dx + dz * dz
}

#[inline]
pub fn vdist_2d(a: &[f32], b: &[f32]) -> f32 {
    vdist_sq_2d(a, b).sqrt()
}

/// Unit normal of a counter-clockwise triangle
pub fn tri_normal(v0: &[f32], v1: &[f32], v2: &[f32]) -> [f32; 3] {
    let e0 = vsub(v1, v0);
    let e1 = vsub(v2, v0);
    let mut n = vcross(&e0, &e1);
    vnormalize(&mut n);
    n
}

/// Squared distance from `pt` to segment `p`-`q` on the xz plane
pub fn dist_pt_seg_sq_2d(pt: &[f32], p: &[f32], q: &[f32]) -> f32 {
    let pqx = q[0] - p[0];
    let pqz = q[2] - p[2];
    let mut dx = pt[0] - p[0];
    let mut dz = pt[2] - p[2];
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);
    dx = p[0] + t * pqx - pt[0];
    dz = p[2] + t * pqz - pt[2];
    dx * dx + dz * dz
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_triangle_points_up() {
        let n = tri_normal(&[0.0, 0.0, 0.0], &[0.0, 0.0, 1.0], &[1.0, 0.0, 0.0]);
        assert!((n[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn segment_distance_clamps_to_endpoints() {
        let d = dist_pt_seg_sq_2d(&[3.0, 0.0, 0.0], &[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0]);
        assert!((d - 4.0).abs() < 1e-6);
        let d = dist_pt_seg_sq_2d(&[0.5, 9.0, 2.0], &[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0]);
        assert!((d - 4.0).abs() < 1e-6);
    }
}
