//! Derives a conservative WGS84 [`Envelope`](crate::Envelope) from a feature's native-CRS
//! envelope under a set of candidate transforms (component D, §4.D).

use geo::{Coord, LineString};

use crate::{wrap_lon, CoordTransform, Envelope};

/// An envelope in `(min_x, min_y, max_x, max_y)` order, in whatever CRS it was measured in.
/// Kept distinct from [`Envelope`](crate::Envelope), which is always WGS84 and `(w, s, e, n)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinMaxEnvelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl MinMaxEnvelope {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        MinMaxEnvelope { min_x, min_y, max_x, max_y }
    }

    fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    fn buffered(&self, buffer: f64) -> MinMaxEnvelope {
        MinMaxEnvelope {
            min_x: self.min_x - buffer,
            min_y: (self.min_y - buffer).max(-90.0),
            max_x: self.max_x + buffer,
            max_y: (self.max_y + buffer).min(90.0),
        }
    }

    fn is_point(&self) -> bool {
        self.min_x == self.max_x && self.min_y == self.max_y
    }
}

/// Builds the WGS84 envelope covering a feature's native-CRS envelope, trying every candidate
/// transform and unioning the results (so a feature whose CRS changed mid-history is still found
/// under any CRS it was ever indexed with). Returns `None` if the envelope could not be
/// calculated for some transform, which callers should treat as equivalent to the whole world.
pub fn build_envelope(
    native_envelope: MinMaxEnvelope,
    transforms: &[&dyn CoordTransform],
) -> Option<Envelope> {
    let mut result: Option<Envelope> = None;

    for transform in transforms {
        let envelope = transform_minmax_envelope(native_envelope, *transform, true)?;
        result = crate::union_of_envelopes(result, Some(envelope));
    }

    result
}

/// Transforms a native-CRS envelope into a WGS84 `(w, s, e, n)` envelope, handling the
/// antimeridian and (optionally) buffering for the curvature of projected lines.
fn transform_minmax_envelope(
    envelope: MinMaxEnvelope,
    transform: &dyn CoordTransform,
    buffer_for_curvature: bool,
) -> Option<Envelope> {
    if envelope.is_point() {
        let (x, y) = transform.transform_point(envelope.min_x, envelope.min_y).ok()?;
        let x = wrap_lon(x);
        return Some(Envelope::new(x, y, x, y));
    }

    let mut ring = anticlockwise_ring(envelope, None);
    transform_ring(transform, &mut ring).ok()?;

    let mut transformed = envelope_of_ring(&ring);
    let (mut width, mut height) = (transformed.width(), transformed.height());
    let mut split_x = None;

    if width >= 180.0 && is_clockwise(&ring) {
        split_x = fix_ring_winding_order(&mut ring);
        transformed = envelope_of_ring(&ring);
        width = transformed.width();
        height = transformed.height();
    }

    if width >= 180.0 {
        // Either genuinely wider than 180 degrees, or (more likely) stored non-contiguously
        // across the antimeridian; either way we can't trust min-x/max-x here.
        return None;
    }

    if buffer_for_curvature {
        let biggest_dimension = width.max(height);
        if biggest_dimension < 1.0 {
            transformed = transformed.buffered(0.1 * biggest_dimension);
        } else {
            let segments_per_side = (10.0f64).max(biggest_dimension.ceil()) as u32;
            let mut segmented = anticlockwise_ring(envelope, Some(segments_per_side));
            transform_ring(transform, &mut segmented).ok()?;
            if let Some(split_x) = split_x {
                reinterpret_to_be_east_of(split_x, &mut segmented);
            }
            transformed = envelope_of_ring(&segmented);
            transformed = transformed.buffered(0.1);
        }
    }

    let w = wrap_lon(transformed.min_x);
    let s = transformed.min_y;
    let e = wrap_lon(transformed.max_x);
    let n = transformed.max_y;

    Some(Envelope::new(w, s, e, n))
}

fn transform_ring(transform: &dyn CoordTransform, ring: &mut LineString<f64>) -> anyhow::Result<()> {
    let mut points: Vec<(f64, f64)> = ring.coords().map(|c| (c.x, c.y)).collect();
    transform.transform_points(&mut points)?;
    *ring = LineString::new(points.into_iter().map(|(x, y)| Coord { x, y }).collect());
    Ok(())
}

/// Builds an anticlockwise ring around `envelope`, starting at `(min_x, min_y)`. When
/// `segments_per_side` is given, each side is subdivided so that no segment spans more than
/// one "unit" of the larger dimension (or the smaller, if the envelope is very elongated),
/// so that projected curvature of long edges is captured by the envelope.
fn anticlockwise_ring(envelope: MinMaxEnvelope, segments_per_side: Option<u32>) -> LineString<f64> {
    let corners = [
        Coord { x: envelope.min_x, y: envelope.min_y },
        Coord { x: envelope.max_x, y: envelope.min_y },
        Coord { x: envelope.max_x, y: envelope.max_y },
        Coord { x: envelope.min_x, y: envelope.max_y },
        Coord { x: envelope.min_x, y: envelope.min_y },
    ];

    let Some(segments_per_side) = segments_per_side else {
        return LineString::new(corners.to_vec());
    };

    let width = envelope.width();
    let height = envelope.height();
    let larger_side = width.max(height);
    let smaller_side = width.min(height);
    let segment_length = if smaller_side < larger_side / 4.0 {
        larger_side / segments_per_side as f64
    } else {
        smaller_side / segments_per_side as f64
    };

    segmentize(&corners, segment_length)
}

/// Subdivides each edge of a closed polyline so no segment exceeds `max_length`.
fn segmentize(points: &[Coord<f64>], max_length: f64) -> LineString<f64> {
    if max_length <= 0.0 {
        return LineString::new(points.to_vec());
    }

    let mut out = Vec::new();
    for window in points.windows(2) {
        let (a, b) = (window[0], window[1]);
        out.push(a);
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        let length = (dx * dx + dy * dy).sqrt();
        let steps = (length / max_length).ceil() as u32;
        for step in 1..steps {
            let t = step as f64 / steps as f64;
            out.push(Coord { x: a.x + dx * t, y: a.y + dy * t });
        }
    }
    if let Some(&last) = points.last() {
        out.push(last);
    }
    LineString::new(out)
}

fn envelope_of_ring(ring: &LineString<f64>) -> MinMaxEnvelope {
    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for c in ring.coords() {
        min_x = min_x.min(c.x);
        min_y = min_y.min(c.y);
        max_x = max_x.max(c.x);
        max_y = max_y.max(c.y);
    }
    MinMaxEnvelope::new(min_x, min_y, max_x, max_y)
}

/// True if the ring (first and last point equal) winds clockwise, via the shoelace formula.
fn is_clockwise(ring: &LineString<f64>) -> bool {
    let coords: Vec<Coord<f64>> = ring.coords().copied().collect();
    let mut sum = 0.0;
    for window in coords.windows(2) {
        let (a, b) = (window[0], window[1]);
        sum += a.x * b.y - b.x * a.y;
    }
    sum < 0.0
}

fn is_anticlockwise(ring: &LineString<f64>) -> bool {
    !is_clockwise(ring)
}

/// Shifts points eastward by 360 degrees, in turn, until the ring's winding order becomes
/// anticlockwise. O(n^2), so only sensible for rectangles or similarly small rings. Returns
/// the x value all shifted points ended up east of, or `None` if no shift was needed.
fn fix_ring_winding_order(ring: &mut LineString<f64>) -> Option<f64> {
    if is_anticlockwise(ring) {
        return None;
    }

    let mut xs: Vec<f64> = ring.coords().map(|c| c.x).collect();
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
    xs.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);

    for window in xs.windows(2) {
        let split_x = (window[0] + window[1]) / 2.0;
        reinterpret_to_be_east_of(split_x, ring);
        if is_anticlockwise(ring) {
            return Some(split_x);
        }
    }

    unreachable!("a ring with at least 3 distinct x-values always has an anticlockwise shift")
}

/// Adds 360 degrees to every point west of `split_x`. The points don't move on Earth, but
/// this can change both the apparent winding order and which edges cross the antimeridian.
fn reinterpret_to_be_east_of(split_x: f64, ring: &mut LineString<f64>) {
    for c in ring.coords_mut() {
        if c.x < split_x {
            c.x += 360.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Identity;
    impl CoordTransform for Identity {
        fn transform_point(&self, x: f64, y: f64) -> anyhow::Result<(f64, f64)> {
            Ok((x, y))
        }
    }

    /// Shifts longitude eastward by a fixed amount, modelling a transform whose target CRS
    /// wraps values into [-180, 180).
    struct ShiftWrap(f64);
    impl CoordTransform for ShiftWrap {
        fn transform_point(&self, x: f64, y: f64) -> anyhow::Result<(f64, f64)> {
            Ok((wrap_lon(x + self.0), y))
        }
    }

    #[test]
    fn point_envelope_round_trips_through_identity() {
        let native = MinMaxEnvelope::new(12.0, 34.0, 12.0, 34.0);
        let identity = Identity;
        let transforms: Vec<&dyn CoordTransform> = vec![&identity];
        let e = build_envelope(native, &transforms).unwrap();
        assert_eq!(e, Envelope::new(12.0, 34.0, 12.0, 34.0));
    }

    /// S1 from the specification: a small, well-behaved envelope under the identity transform
    /// is returned buffered but otherwise unchanged in shape.
    #[test]
    fn small_envelope_gets_a_small_curvature_buffer() {
        let native = MinMaxEnvelope::new(10.0, 10.0, 10.5, 10.5);
        let identity = Identity;
        let transforms: Vec<&dyn CoordTransform> = vec![&identity];
        let e = build_envelope(native, &transforms).unwrap();
        assert!(e.w < 10.0 && e.s < 10.0 && e.e > 10.5 && e.n > 10.5);
        assert!(e.w > 9.9 && e.e < 10.6);
    }

    #[test]
    fn multiple_transforms_union_together() {
        let native = MinMaxEnvelope::new(0.0, 0.0, 1.0, 1.0);
        let identity = Identity;
        let shifted = ShiftWrap(50.0);
        let transforms: Vec<&dyn CoordTransform> = vec![&identity, &shifted];
        let e = build_envelope(native, &transforms).unwrap();
        assert!(e.w <= 0.0);
        assert!(e.e >= 51.0);
    }

    #[test]
    fn envelope_crossing_antimeridian_is_detected() {
        let native = MinMaxEnvelope::new(0.0, -5.0, 10.0, 5.0);
        let shift = ShiftWrap(175.0);
        let transforms: Vec<&dyn CoordTransform> = vec![&shift];
        let e = build_envelope(native, &transforms).unwrap();
        assert!(e.crosses_antimeridian());
    }
}
