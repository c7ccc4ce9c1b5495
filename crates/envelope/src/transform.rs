/// A coordinate transform from some source CRS into WGS84 longitude/latitude degrees.
///
/// This is the seam the CRS cache crosses to reach the envelope builder without the builder
/// depending on `proj` directly, so the builder can be unit tested with trivial fakes.
///
/// `Send + Sync` so that the per-feature worker pool (§10.5) can share a dataset's cached
/// transforms across threads; implementations backed by a non-reentrant library handle (like
/// `proj::Proj`) should guard the handle internally (e.g. behind a mutex) rather than relax this.
pub trait CoordTransform: Send + Sync {
    /// Transforms a single `(x, y)` point in the source CRS to `(lon, lat)` in WGS84 degrees.
    fn transform_point(&self, x: f64, y: f64) -> anyhow::Result<(f64, f64)>;

    /// Transforms every point in `coords` in place, as `(x, y)` pairs. The default
    /// implementation calls [`CoordTransform::transform_point`] once per coordinate;
    /// implementations backed by a batching API (e.g. `proj`'s `convert_array`) should
    /// override this for throughput.
    fn transform_points(&self, coords: &mut [(f64, f64)]) -> anyhow::Result<()> {
        for point in coords.iter_mut() {
            *point = self.transform_point(point.0, point.1)?;
        }
        Ok(())
    }
}
