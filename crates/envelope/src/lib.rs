//! A conservative, antimeridian-aware WGS84 bounding rectangle, its codec, and the builder
//! that derives one from a geometry's source-CRS envelope under a set of candidate transforms.
//!
//! This crate is deliberately oblivious to the object database and the SQL store: it only
//! knows about coordinates, rings, and transforms.

mod builder;
mod codec;
mod transform;

pub use builder::{build_envelope, MinMaxEnvelope};
pub use codec::{EnvelopeCodec, CodecError, DEFAULT_BITS_PER_COORDINATE};
pub use transform::CoordTransform;

/// An axis-aligned WGS84 bounding rectangle `(w, s, e, n)`.
///
/// `-180 <= w, e <= 180` and `-90 <= s <= n <= 90`. The rectangle crosses the antimeridian
/// iff `e < w`, in which case it should be read as wrapping eastward from `w` through 180/-180
/// to `e`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub w: f64,
    pub s: f64,
    pub e: f64,
    pub n: f64,
}

impl Envelope {
    pub fn new(w: f64, s: f64, e: f64, n: f64) -> Self {
        Envelope { w, s, e, n }
    }

    /// A degenerate (zero-area) envelope around a single point.
    pub fn point(x: f64, y: f64) -> Self {
        let x = wrap_lon(x);
        Envelope::new(x, y, x, y)
    }

    /// True if this rectangle wraps around the antimeridian.
    pub fn crosses_antimeridian(&self) -> bool {
        self.e < self.w
    }

    /// The longitude span, unwrapped so that `e' >= w` (may exceed 180 for wrapping rectangles).
    fn unwrapped_lon_span(&self) -> (f64, f64) {
        unwrap_lon_envelope(self.w, self.e)
    }
}

/// Puts any longitude into the half-open range `[-180, 180)` without moving its position on Earth.
pub fn wrap_lon(x: f64) -> f64 {
    (x + 180.0).rem_euclid(360.0) - 180.0
}

/// Given a longitude envelope `(w, e)` with `-180 <= w, e <= 180` and `w <= e` unless it crosses
/// the antimeridian (in which case `e < w`), returns an equivalent range `(w, e')` with `e' >= w`,
/// possibly exceeding 180, i.e. `0 <= e' - w <= 360`.
pub fn unwrap_lon_envelope(w: f64, e: f64) -> (f64, f64) {
    if w <= e {
        (w, e)
    } else {
        (w, e + 360.0)
    }
}

/// Inverse of [`unwrap_lon_envelope`]: given `w <= e` (`e` possibly exceeding 180), wraps both
/// endpoints back into `[-180, 180]`, preserving which one is "west" vs. "east" even when
/// wrapping inverts their numeric order (i.e. the rectangle turns out to cross the antimeridian).
pub fn wrap_lon_envelope(w: f64, e: f64) -> (f64, f64) {
    let wrapped_w = wrap_lon(w);
    let wrapped_e = wrap_lon(e);

    let min_x = wrapped_w.min(wrapped_e);
    let max_x = wrapped_w.max(wrapped_e);

    if (max_x - min_x - (e - w)).abs() <= 1e-3 {
        (min_x, max_x)
    } else {
        (max_x, min_x)
    }
}

/// Unions two wrapped envelopes, choosing whichever `{-360, 0, +360}` shift of the second
/// envelope's longitude range minimizes the combined width, so that the union across the
/// antimeridian is never wider than necessary (§4.D).
pub fn union_of_envelopes(a: Option<Envelope>, b: Option<Envelope>) -> Option<Envelope> {
    let (a, b) = match (a, b) {
        (None, x) => return x,
        (x, None) => return x,
        (Some(a), Some(b)) => (a, b),
    };

    let (w1, e1) = a.unwrapped_lon_span();
    let (w2, e2) = b.unwrapped_lon_span();

    let mut best_width = f64::INFINITY;
    let mut best_w = w1;
    let mut best_e = e1;

    for shift in [-360.0, 0.0, 360.0] {
        let shifted_w2 = w2 + shift;
        let shifted_e2 = e2 + shift;
        let potential_w = w1.min(shifted_w2);
        let potential_e = e1.max(shifted_e2);
        let potential_width = potential_e - potential_w;

        if potential_width < best_width {
            best_width = potential_width;
            best_w = potential_w;
            best_e = potential_e;
        }
    }

    let s = a.s.min(b.s);
    let n = a.n.max(b.n);

    if best_width >= 360.0 {
        return Some(Envelope::new(-180.0, s, 180.0, n));
    }

    let (w, e) = wrap_lon_envelope(best_w, best_e);
    Some(Envelope::new(w, s, e, n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wrap_lon_keeps_in_range() {
        assert!((wrap_lon(190.0) - (-170.0)).abs() < 1e-9);
        assert!((wrap_lon(-190.0) - 170.0).abs() < 1e-9);
        assert!((wrap_lon(10.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn union_with_none_returns_other() {
        let e = Envelope::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(union_of_envelopes(None, Some(e)), Some(e));
        assert_eq!(union_of_envelopes(Some(e), None), Some(e));
    }

    /// S3 from the specification: two envelopes whose union, under every shift, exceeds
    /// 360 degrees of width collapse to the full longitude band.
    #[test]
    fn full_band_collapse() {
        let a = Envelope::new(-170.0, 0.0, 170.0, 10.0);
        let b = Envelope::new(160.0, 0.0, -160.0, 10.0); // wraps
        let u = union_of_envelopes(Some(a), Some(b)).unwrap();
        assert_eq!(u, Envelope::new(-180.0, 0.0, 180.0, 10.0));
    }

    /// S2 from the specification.
    #[test]
    fn antimeridian_union_picks_shorter_arc() {
        let antimeridian = Envelope::new(179.5, -10.0, -179.5, 10.0);
        let other = Envelope::new(170.0, -10.0, 175.0, 10.0);
        let u = union_of_envelopes(Some(antimeridian), Some(other)).unwrap();
        assert!((u.w - 170.0).abs() < 1e-9);
        assert!((u.e - (-179.5)).abs() < 1e-9);
        assert!(u.crosses_antimeridian());
    }
}
