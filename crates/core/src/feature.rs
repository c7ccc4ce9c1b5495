//! Decodes a feature blob's bytes into the geometry envelope the rest of the pipeline needs.
//!
//! The wire format a feature blob decodes under (`legend_id`, `[field, ...]`) is an external
//! interface (§6): this module defines a narrow [`FeatureDecoder`] capability so the orchestrator
//! never depends on one concrete encoding, the way the object database itself is reached only
//! through [`spatialidx_objectdb::ObjectDatabase`].
//!
//! [`LegendAwareDecoder`] is the one implementation shipped: fields are length-prefixed and
//! tagged, and the geometry field's column index is memoized per `legend_id` rather than
//! re-scanned on every feature (replacing the `@lru_cache`-on-a-method pattern named in the
//! design notes with an explicit map with a lifetime tied to one run).

use std::collections::HashMap;
use std::io::Cursor;

use geo::BoundingRect;
use thiserror::Error;

use spatialidx_envelope::MinMaxEnvelope;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("feature blob is truncated or malformed")]
    Malformed,
    #[error("failed to parse geometry: {0}")]
    InvalidWkb(String),
    #[error("feature has no geometry field")]
    NoGeometryField,
    #[error("geometry is empty")]
    EmptyGeometry,
}

const TAG_NULL: u8 = 0;
const TAG_GEOMETRY: u8 = 1;
const TAG_OTHER: u8 = 2;

/// Decodes a raw feature blob into a native-CRS minmax envelope, or `None` if the feature has
/// no (or an empty) geometry field (I4).
pub trait FeatureDecoder {
    fn geometry_envelope(&mut self, blob: &[u8]) -> Result<Option<MinMaxEnvelope>, GeometryError>;
}

/// Parses feature blobs of the form:
/// `legend_id: u32 LE | field_count: u32 LE | field*`, where each field is
/// `tag: u8 | (if tag != NULL) len: u32 LE | bytes`. A geometry field's bytes are WKB.
///
/// The column index of the geometry field is discovered on first encounter of a given
/// `legend_id` and memoized for the rest of the run; a dataset practically only ever uses a
/// handful of legends, so this map stays small.
#[derive(Default)]
pub struct LegendAwareDecoder {
    geometry_column_by_legend: HashMap<u32, Option<usize>>,
}

impl LegendAwareDecoder {
    pub fn new() -> Self {
        LegendAwareDecoder::default()
    }

    fn parse_fields(blob: &[u8]) -> Result<(u32, Vec<(u8, &[u8])>), GeometryError> {
        if blob.len() < 8 {
            return Err(GeometryError::Malformed);
        }
        let legend_id = u32::from_le_bytes(blob[0..4].try_into().unwrap());
        let field_count = u32::from_le_bytes(blob[4..8].try_into().unwrap()) as usize;

        let mut fields = Vec::with_capacity(field_count);
        let mut cursor = 8usize;
        for _ in 0..field_count {
            let tag = *blob.get(cursor).ok_or(GeometryError::Malformed)?;
            cursor += 1;
            if tag == TAG_NULL {
                fields.push((tag, &blob[cursor..cursor]));
                continue;
            }
            let len_bytes = blob.get(cursor..cursor + 4).ok_or(GeometryError::Malformed)?;
            let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
            cursor += 4;
            let data = blob.get(cursor..cursor + len).ok_or(GeometryError::Malformed)?;
            cursor += len;
            fields.push((tag, data));
        }

        Ok((legend_id, fields))
    }
}

impl FeatureDecoder for LegendAwareDecoder {
    fn geometry_envelope(&mut self, blob: &[u8]) -> Result<Option<MinMaxEnvelope>, GeometryError> {
        let (legend_id, fields) = Self::parse_fields(blob)?;

        let column = *self
            .geometry_column_by_legend
            .entry(legend_id)
            .or_insert_with(|| fields.iter().position(|(tag, _)| *tag == TAG_GEOMETRY));

        let Some(column) = column else {
            return Err(GeometryError::NoGeometryField);
        };

        let (tag, bytes) = fields.get(column).ok_or(GeometryError::Malformed)?;
        if *tag == TAG_NULL || bytes.is_empty() {
            return Ok(None);
        }
        if *tag != TAG_GEOMETRY {
            return Err(GeometryError::Malformed);
        }

        let geometry = wkb::wkb_to_geom(&mut Cursor::new(bytes))
            .map_err(|e| GeometryError::InvalidWkb(format!("{e:?}")))?;

        let rect = geometry.bounding_rect().ok_or(GeometryError::EmptyGeometry)?;
        Ok(Some(MinMaxEnvelope::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn encode_feature(legend_id: u32, fields: &[(u8, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&legend_id.to_le_bytes());
        out.extend_from_slice(&(fields.len() as u32).to_le_bytes());
        for (tag, data) in fields {
            out.push(*tag);
            if *tag != TAG_NULL {
                out.extend_from_slice(&(data.len() as u32).to_le_bytes());
                out.extend_from_slice(data);
            }
        }
        out
    }

    fn point_wkb(x: f64, y: f64) -> Vec<u8> {
        let geom = geo::Geometry::Point(geo::Point::new(x, y));
        wkb::geom_to_wkb(&geom).expect("encode should succeed")
    }

    #[test]
    fn decodes_point_geometry_field() {
        let mut decoder = LegendAwareDecoder::new();
        let wkb_bytes = point_wkb(12.0, 34.0);
        let blob = encode_feature(1, &[(TAG_OTHER, b"id-field"), (TAG_GEOMETRY, &wkb_bytes)]);

        let envelope = decoder.geometry_envelope(&blob).unwrap().unwrap();
        assert_eq!(envelope, MinMaxEnvelope::new(12.0, 34.0, 12.0, 34.0));
    }

    #[test]
    fn null_geometry_field_yields_none() {
        let mut decoder = LegendAwareDecoder::new();
        let blob = encode_feature(2, &[(TAG_OTHER, b"x"), (TAG_NULL, &[])]);
        assert_eq!(decoder.geometry_envelope(&blob).unwrap(), None);
    }

    #[test]
    fn missing_geometry_field_is_an_error() {
        let mut decoder = LegendAwareDecoder::new();
        let blob = encode_feature(3, &[(TAG_OTHER, b"x")]);
        assert!(matches!(
            decoder.geometry_envelope(&blob),
            Err(GeometryError::NoGeometryField)
        ));
    }

    #[test]
    fn column_index_is_memoized_per_legend() {
        let mut decoder = LegendAwareDecoder::new();
        let wkb_bytes = point_wkb(1.0, 2.0);
        let blob = encode_feature(5, &[(TAG_GEOMETRY, &wkb_bytes)]);
        decoder.geometry_envelope(&blob).unwrap();
        assert_eq!(decoder.geometry_column_by_legend.get(&5), Some(&Some(0)));
    }
}
