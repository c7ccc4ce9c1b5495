use anyhow::{bail, Context, Result};

use spatialidx_core::feature::{FeatureDecoder, LegendAwareDecoder};
use spatialidx_crs::CrsCache;
use spatialidx_envelope::{build_envelope, Envelope, EnvelopeCodec};
use spatialidx_objectdb::ObjectDatabase;
use spatialidx_oid::Oid;

use crate::args::DebugArgs;

/// Dispatches on the syntax of `args.target` per §6: a `COMMIT:DATASET:PK_OR_OID` triple
/// traces one feature's envelope build, `W,S,E,N` round-trips a raw envelope through the
/// codec, and anything else is tried as a hex-encoded already-encoded envelope.
pub fn run(args: &DebugArgs) -> Result<()> {
    if let Some((commit, dataset, pk_or_oid)) = split_feature_target(&args.target) {
        return trace_feature(&args.repo, commit, dataset, pk_or_oid);
    }

    if let Some(envelope) = parse_wsen(&args.target) {
        return round_trip_envelope(envelope, args.bits_per_coordinate);
    }

    decode_hex_envelope(&args.target)
}

fn split_feature_target(target: &str) -> Option<(&str, &str, &str)> {
    let mut parts = target.splitn(3, ':');
    let commit = parts.next()?;
    let dataset = parts.next()?;
    let pk_or_oid = parts.next()?;
    Some((commit, dataset, pk_or_oid))
}

fn parse_wsen(target: &str) -> Option<Envelope> {
    let parts: Vec<&str> = target.split(',').collect();
    if parts.len() != 4 {
        return None;
    }
    let mut values = [0.0f64; 4];
    for (slot, part) in values.iter_mut().zip(parts.iter()) {
        *slot = part.trim().parse().ok()?;
    }
    Some(Envelope::new(values[0], values[1], values[2], values[3]))
}

fn trace_feature(repo: &std::path::Path, commit: &str, dataset: &str, pk_or_oid: &str) -> Result<()> {
    let objdb = spatialidx_objectdb::open(repo)?;
    let commit_oid = objdb
        .resolve_commitish(commit)
        .with_context(|| format!("Failed to resolve commit-ish {commit:?}"))?;
    println!("commit: {} ({})", commit, commit_oid.hex());

    let blob_oid = Oid::from_hex(pk_or_oid)
        .with_context(|| format!("{pk_or_oid:?} is not a recognized blob id; primary-key lookup is not supported by this debug command"))?;

    let blob = objdb
        .read_blob(blob_oid)
        .with_context(|| format!("Failed to read feature blob {blob_oid}"))?;
    println!("feature blob: {blob_oid} ({} bytes)", blob.len());

    let mut decoder = LegendAwareDecoder::new();
    let minmax = decoder
        .geometry_envelope(&blob)
        .with_context(|| format!("Failed to decode geometry for feature {blob_oid}"))?;

    let Some(minmax) = minmax else {
        println!("feature has no geometry (null field)");
        return Ok(());
    };
    println!("native envelope: {minmax:?}");

    let cache = CrsCache::build(&objdb, dataset)
        .with_context(|| format!("Failed to build CRS cache for dataset {dataset:?}"))?;
    if cache.is_empty() {
        bail!("dataset {dataset:?} has no usable CRS transforms");
    }
    println!("CRS transforms available: {}", cache.len());

    let transforms = cache.transforms();
    let envelope = build_envelope(minmax, &transforms)
        .context("couldn't build a WGS84 envelope for this feature")?;
    println!("WGS84 envelope: {envelope:?}");

    let codec = EnvelopeCodec::default();
    let encoded = codec.encode(&envelope).context("failed to encode envelope")?;
    println!("encoded ({} bytes): {}", encoded.len(), hex::encode(&encoded));

    Ok(())
}

fn round_trip_envelope(envelope: Envelope, bits_per_coordinate: u32) -> Result<()> {
    let codec = EnvelopeCodec::new(bits_per_coordinate).context("invalid bits-per-coordinate")?;
    let encoded = codec.encode(&envelope).context("failed to encode envelope")?;
    let decoded = codec.decode(&encoded).context("failed to decode envelope")?;

    println!("input:   {envelope:?}");
    println!("encoded: {} ({} bytes)", hex::encode(&encoded), encoded.len());
    println!("decoded: {decoded:?}");
    Ok(())
}

fn decode_hex_envelope(hex_str: &str) -> Result<()> {
    let bytes = hex::decode(hex_str.trim())
        .with_context(|| format!("{hex_str:?} is neither a COMMIT:DATASET:PK_OR_OID triple, a W,S,E,N envelope, nor valid hex"))?;

    // `bytes_per_envelope = bits_per_coordinate / 2` (four coordinates packed into whole bytes
    // requires an even bit width), so the bit width is simply twice the byte count.
    let bits_per_coordinate = (bytes.len() * 2) as u32;
    let codec = EnvelopeCodec::new(bits_per_coordinate)
        .with_context(|| format!("{} bytes doesn't decode to a valid bits-per-coordinate width", bytes.len()))?;
    let decoded = codec.decode(&bytes).context("failed to decode envelope")?;

    println!("inferred bits per coordinate: {bits_per_coordinate}");
    println!("decoded: {decoded:?}");
    Ok(())
}
