//! Column chunk encoding for the native swath container
//!
//! Each block of rows is stored as one coordinate chunk plus one chunk per
//! variable, so a query only decompresses the columns it asked for.
//!
//! Strategy:
//! 1. Delta-encode row times (monotonic along-track, deltas stay small)
//! 2. Record fill rows separately instead of sentinel timestamps
//! 3. Serialize to compact binary format (bincode)
//! 4. LZ4 compress the result (optional)

use crate::swath::error::{SwathError, SwathResult};
use crate::swath::format::CompressionType;
use crate::swath::Coordinates;
use serde::{Deserialize, Serialize};

/// Intermediate format for a coordinate chunk
#[derive(Debug, Serialize, Deserialize)]
struct EncodedCoords {
    cols: u32,
    /// First valid timestamp (0 if the block has none)
    base_time: i64,
    /// Delta from the previous valid timestamp, one per row (0 for fill rows)
    time_deltas: Vec<i64>,
    /// Row offsets (within the block) whose time is fill
    missing_time: Vec<u32>,
    latitude: Vec<f64>,
    longitude: Vec<f64>,
}

/// Encode a coordinate block
pub fn encode_coords(coords: &Coordinates, compression: CompressionType) -> SwathResult<Vec<u8>> {
    coords.validate()?;

    let base_time = coords.time.iter().flatten().next().copied().unwrap_or(0);
    let mut prev = base_time;
    let mut time_deltas = Vec::with_capacity(coords.rows());
    let mut missing_time = Vec::new();

    for (row, t) in coords.time.iter().enumerate() {
        match t {
            Some(t) => {
                time_deltas.push(t - prev);
                prev = *t;
            }
            None => {
                time_deltas.push(0);
                missing_time.push(row as u32);
            }
        }
    }

    let encoded = EncodedCoords {
        cols: coords.cols as u32,
        base_time,
        time_deltas,
        missing_time,
        latitude: coords.latitude.clone(),
        longitude: coords.longitude.clone(),
    };

    pack(&bincode::serialize(&encoded)?, compression)
}

/// Decode a coordinate block
pub fn decode_coords(data: &[u8], compression: CompressionType) -> SwathResult<Coordinates> {
    let raw = unpack(data, compression)?;
    let encoded: EncodedCoords = bincode::deserialize(&raw)?;

    let mut time = Vec::with_capacity(encoded.time_deltas.len());
    let mut current = encoded.base_time;
    let mut missing = encoded.missing_time.iter().peekable();

    for (row, delta) in encoded.time_deltas.iter().enumerate() {
        if missing.peek().map(|&&m| m as usize == row).unwrap_or(false) {
            missing.next();
            time.push(None);
        } else {
            current += delta;
            time.push(Some(current));
        }
    }

    let coords = Coordinates {
        cols: encoded.cols as usize,
        latitude: encoded.latitude,
        longitude: encoded.longitude,
        time,
    };
    coords.validate()?;
    Ok(coords)
}

/// Encode one variable's values for a block
pub fn encode_values(values: &[f64], compression: CompressionType) -> SwathResult<Vec<u8>> {
    pack(&bincode::serialize(values)?, compression)
}

/// Decode one variable's values for a block
pub fn decode_values(data: &[u8], compression: CompressionType) -> SwathResult<Vec<f64>> {
    let raw = unpack(data, compression)?;
    Ok(bincode::deserialize(&raw)?)
}

fn pack(serialized: &[u8], compression: CompressionType) -> SwathResult<Vec<u8>> {
    Ok(match compression {
        CompressionType::None => serialized.to_vec(),
        CompressionType::Lz4 => lz4_flex::compress_prepend_size(serialized),
    })
}

fn unpack(data: &[u8], compression: CompressionType) -> SwathResult<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| SwathError::Compression(format!("LZ4 decompression failed: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_coords() -> Coordinates {
        Coordinates {
            cols: 2,
            latitude: vec![10.0, 10.5, 11.0, 11.5, f64::NAN, 12.5],
            longitude: vec![359.0, 0.5, 359.2, 0.7, 359.4, 0.9],
            time: vec![Some(1_000), None, Some(3_000)],
        }
    }

    #[test]
    fn test_coords_preserve_fill_rows() {
        let coords = sample_coords();
        let data = encode_coords(&coords, CompressionType::Lz4).unwrap();
        let decoded = decode_coords(&data, CompressionType::Lz4).unwrap();

        assert_eq!(decoded.cols, 2);
        assert_eq!(decoded.time, vec![Some(1_000), None, Some(3_000)]);
        assert_eq!(decoded.longitude, coords.longitude);
        assert!(decoded.latitude[4].is_nan());
        assert_eq!(decoded.latitude[5], 12.5);
    }

    #[test]
    fn test_coords_all_time_missing() {
        let coords = Coordinates {
            cols: 1,
            latitude: vec![1.0, 2.0],
            longitude: vec![3.0, 4.0],
            time: vec![None, None],
        };
        let data = encode_coords(&coords, CompressionType::None).unwrap();
        let decoded = decode_coords(&data, CompressionType::None).unwrap();
        assert_eq!(decoded.time, vec![None, None]);
    }

    #[test]
    fn test_values_uncompressed_and_lz4_agree() {
        let values: Vec<f64> = (0..500).map(|i| (i as f64 * 0.1).sin()).collect();

        let plain = encode_values(&values, CompressionType::None).unwrap();
        let lz4 = encode_values(&values, CompressionType::Lz4).unwrap();

        assert_eq!(decode_values(&plain, CompressionType::None).unwrap(), values);
        assert_eq!(decode_values(&lz4, CompressionType::Lz4).unwrap(), values);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode_values(&[1, 2, 3], CompressionType::Lz4);
        assert!(result.is_err());
    }

    #[test]
    fn test_encode_rejects_inconsistent_block() {
        let mut coords = sample_coords();
        coords.latitude.pop();
        assert!(encode_coords(&coords, CompressionType::Lz4).is_err());
    }
}
