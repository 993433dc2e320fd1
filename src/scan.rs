// SPDX-License-Identifier: Apache-2.0

//! LiDAR scan payload decoding.
//!
//! A point-cloud reading payload carries a fixed 20-byte little-endian scan
//! header followed by a packed range array:
//!
//! ```text
//! ┌───────────────┬─────────────┬─────────────────────┬───────────────┬────────────┐
//! │ start azimuth │ end azimuth │ entries per azimuth │ device stamp  │ ranges     │
//! │ f32 (deg)     │ f32 (deg)   │ u32                 │ u64 (µs)      │ u16 × n    │
//! └───────────────┴─────────────┴─────────────────────┴───────────────┴────────────┘
//! ```
//!
//! Ranges are centimeters, one u16 per measurement, ordered column-major:
//! all vertical entries for the first azimuth, then the next azimuth, and so
//! on.  Azimuth columns are spaced evenly between the start and end angles
//! (both inclusive).  A payload with zero measurements is a valid empty scan.
//!
//! Measurements outside the sensor's documented window are decoded as-is and
//! counted in [`Scan::out_of_range`]; they are never clamped or rejected.

use crate::bus::DecodeError;
use serde::{Deserialize, Serialize};

/// Length of the scan header in bytes/octets.
pub const SCAN_HEADER_LEN: usize = 20;

/// Elevation angles in degrees for the 16-beam sensor, lowest beam first.
pub const VERTICAL_ANGLES_16: [f32; 16] = [
    -15.0, -13.0, -11.0, -9.0, -7.0, -5.0, -3.0, -1.0, 1.0, 3.0, 5.0, 7.0, 9.0, 11.0, 13.0, 15.0,
];

/// Lower bound of the sensor's documented range window, in centimeters.
pub const MIN_RANGE_CM: u16 = 50;

/// Upper bound of the sensor's documented range window, in centimeters.
pub const MAX_RANGE_CM: u16 = 20_000;

/// One decoded LiDAR scan segment.
///
/// The bus splits a full revolution across several datagrams; each `Scan`
/// covers the azimuth span of one datagram.  See
/// [`LidarPayload::from_scans`] for merging segments back into a revolution.
#[derive(Clone, Debug, PartialEq)]
pub struct Scan {
    /// First azimuth angle covered by this segment, in degrees.
    pub start_azimuth: f32,
    /// Last azimuth angle covered by this segment, in degrees.
    pub end_azimuth: f32,
    /// Number of vertical entries per azimuth column (1..=16).
    pub entries_per_azimuth: u32,
    /// Sensor-side timestamp in microseconds.
    pub device_timestamp: u64,
    /// Raw range measurements in centimeters, decoded as-is.
    pub ranges: Vec<u16>,
    /// Number of measurements outside the documented range window.
    /// Informational only; the measurements themselves are kept.
    pub out_of_range: u32,
}

impl Scan {
    /// Build a scan from its parts, deriving the out-of-range count.
    ///
    /// Bus payloads always satisfy `entries_per_azimuth` in 1..=16 when the
    /// range array is non-empty; [`decode`] rejects anything else.  A
    /// hand-built scan outside that window is treated by the geometry
    /// accessors as having no columns.
    pub fn new(
        start_azimuth: f32,
        end_azimuth: f32,
        entries_per_azimuth: u32,
        device_timestamp: u64,
        ranges: Vec<u16>,
    ) -> Self {
        let out_of_range = ranges
            .iter()
            .filter(|&&r| !(MIN_RANGE_CM..=MAX_RANGE_CM).contains(&r))
            .count() as u32;
        Self {
            start_azimuth,
            end_azimuth,
            entries_per_azimuth,
            device_timestamp,
            ranges,
            out_of_range,
        }
    }

    /// Number of measurements in this scan.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Check if the scan carries no measurements.  An empty scan is valid.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of azimuth columns in this scan.
    ///
    /// Zero when the scan is empty or its entry count lies outside the
    /// sensor's 1..=16 window.
    pub fn azimuth_count(&self) -> usize {
        let entries = self.entries_per_azimuth as usize;
        if entries == 0 || entries > VERTICAL_ANGLES_16.len() {
            return 0;
        }
        self.ranges.len() / entries
    }

    /// Azimuth angle in degrees for each column, evenly spaced from the
    /// start angle to the end angle with both endpoints included.
    pub fn azimuths(&self) -> Vec<f32> {
        let n = self.azimuth_count();
        match n {
            0 => Vec::new(),
            1 => vec![self.start_azimuth],
            _ => {
                let step = (self.end_azimuth - self.start_azimuth) / (n - 1) as f32;
                (0..n)
                    .map(|i| self.start_azimuth + step * i as f32)
                    .collect()
            }
        }
    }

    /// Convert the scan to Cartesian points in meters.
    ///
    /// Uses the spherical-to-Cartesian convention of the sensor: x forward,
    /// y to port (hence the negation), z up.  Out-of-window measurements are
    /// converted like any other; callers that want to drop them can use
    /// [`Scan::out_of_range`] to decide whether it is worth a pass.
    pub fn points(&self) -> Vec<[f32; 3]> {
        let entries = self.entries_per_azimuth as usize;
        let mut points = Vec::with_capacity(self.ranges.len());

        for (col, azimuth) in self.azimuths().iter().enumerate() {
            let az = azimuth.to_radians();
            for row in 0..entries {
                let r = self.ranges[col * entries + row] as f32 / 100.0;
                let el = VERTICAL_ANGLES_16[row].to_radians();
                points.push([
                    r * el.cos() * az.cos(),
                    -r * el.cos() * az.sin(),
                    r * el.sin(),
                ]);
            }
        }

        points
    }

    /// Encode the scan back into payload bytes.
    ///
    /// Inverse of [`decode`]; used by tests, benchmarks, and bus simulators.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SCAN_HEADER_LEN + self.ranges.len() * 2);
        out.extend_from_slice(&self.start_azimuth.to_le_bytes());
        out.extend_from_slice(&self.end_azimuth.to_le_bytes());
        out.extend_from_slice(&self.entries_per_azimuth.to_le_bytes());
        out.extend_from_slice(&self.device_timestamp.to_le_bytes());
        for range in &self.ranges {
            out.extend_from_slice(&range.to_le_bytes());
        }
        out
    }
}

/// Decode a point-cloud reading payload into a [`Scan`].
///
/// Pure function of its input.  Structural problems (short header, ragged
/// range array) are `TruncatedOrMalformed`; measurement *values* are never
/// rejected.
pub fn decode(payload: &[u8]) -> Result<Scan, DecodeError> {
    if payload.len() < SCAN_HEADER_LEN {
        return Err(DecodeError::TruncatedOrMalformed(format!(
            "payload too short for scan header: {} bytes",
            payload.len()
        )));
    }

    let start_azimuth = f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let end_azimuth = f32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
    let entries_per_azimuth =
        u32::from_le_bytes([payload[8], payload[9], payload[10], payload[11]]);
    let device_timestamp = u64::from_le_bytes([
        payload[12],
        payload[13],
        payload[14],
        payload[15],
        payload[16],
        payload[17],
        payload[18],
        payload[19],
    ]);

    let rest = &payload[SCAN_HEADER_LEN..];
    if rest.len() % 2 != 0 {
        return Err(DecodeError::TruncatedOrMalformed(format!(
            "range array has odd length: {} bytes",
            rest.len()
        )));
    }

    let n_points = rest.len() / 2;
    if n_points > 0 {
        if entries_per_azimuth == 0 || entries_per_azimuth as usize > VERTICAL_ANGLES_16.len() {
            return Err(DecodeError::TruncatedOrMalformed(format!(
                "entries per azimuth out of bounds: {}",
                entries_per_azimuth
            )));
        }
        if n_points % entries_per_azimuth as usize != 0 {
            return Err(DecodeError::TruncatedOrMalformed(format!(
                "{} measurements do not divide into columns of {}",
                n_points, entries_per_azimuth
            )));
        }
    }

    let ranges: Vec<u16> = rest
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(Scan::new(
        start_azimuth,
        end_azimuth,
        entries_per_azimuth,
        device_timestamp,
        ranges,
    ))
}

/// Envelope payload for one full LiDAR revolution.
///
/// Serialized as the `payload` field of the outbound envelope; field names
/// follow the envelope schema's camelCase convention.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LidarPayload {
    /// First azimuth of the revolution, in degrees.
    pub start_azimuth: f32,
    /// Last azimuth of the revolution, in degrees.
    pub end_azimuth: f32,
    /// Sensor-side timestamp of the last segment, in microseconds.
    pub device_timestamp: u64,
    /// Bus sequence number of the segment that completed the revolution.
    pub sequence: u32,
    /// Measurements outside the documented range window, summed over the
    /// revolution's segments.
    pub out_of_range: u32,
    /// Cartesian points in meters, x forward, y port, z up.
    pub points: Vec<[f32; 3]>,
}

impl LidarPayload {
    /// Merge one revolution's scan segments into an envelope payload.
    ///
    /// Segments must be in arrival order; the merged azimuth span runs from
    /// the first segment's start angle to the last segment's end angle.
    pub fn from_scans(scans: &[Scan], sequence: u32) -> LidarPayload {
        let mut points = Vec::with_capacity(scans.iter().map(Scan::len).sum());
        for scan in scans {
            points.extend(scan.points());
        }

        LidarPayload {
            start_azimuth: scans.first().map(|s| s.start_azimuth).unwrap_or(0.0),
            end_azimuth: scans.last().map(|s| s.end_azimuth).unwrap_or(0.0),
            device_timestamp: scans.last().map(|s| s.device_timestamp).unwrap_or(0),
            sequence,
            out_of_range: scans.iter().map(|s| s.out_of_range).sum(),
            points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_scan() -> Scan {
        // Two azimuth columns of four entries each.
        Scan::new(
            0.0,
            180.0,
            4,
            1_000_000,
            vec![100, 200, 300, 400, 500, 600, 700, 800],
        )
    }

    #[test]
    fn test_round_trip() {
        let scan = sample_scan();
        let decoded = decode(&scan.encode()).unwrap();
        assert_eq!(decoded, scan);
    }

    #[test]
    fn test_empty_scan_is_valid() {
        let scan = Scan::new(0.0, 0.0, 16, 0, Vec::new());
        let decoded = decode(&scan.encode()).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded.azimuth_count(), 0);
        assert!(decoded.points().is_empty());
        assert_eq!(decoded.out_of_range, 0);
    }

    #[test]
    fn test_short_payload() {
        for len in 0..SCAN_HEADER_LEN {
            let err = decode(&vec![0u8; len]).unwrap_err();
            assert!(matches!(err, DecodeError::TruncatedOrMalformed(_)));
        }
    }

    #[test]
    fn test_odd_range_array() {
        let mut payload = sample_scan().encode();
        payload.push(0xab);
        assert!(decode(&payload).is_err());
    }

    #[test]
    fn test_ragged_columns() {
        // 7 measurements cannot divide into columns of 4.
        let scan = Scan::new(0.0, 90.0, 4, 0, vec![100; 7]);
        assert!(decode(&scan.encode()).is_err());
    }

    #[test]
    fn test_entries_per_azimuth_bounds() {
        let zero = Scan {
            entries_per_azimuth: 0,
            ..sample_scan()
        };
        assert!(decode(&zero.encode()).is_err());

        let too_many = Scan {
            entries_per_azimuth: 17,
            ..sample_scan()
        };
        assert!(decode(&too_many.encode()).is_err());
    }

    #[test]
    fn test_geometry_empty_for_unsupported_entry_counts() {
        // Hand-built scans can carry entry counts decode would reject; the
        // geometry accessors yield no columns rather than indexing past the
        // elevation table.
        let zero = Scan::new(0.0, 90.0, 0, 0, vec![100; 8]);
        assert_eq!(zero.azimuth_count(), 0);
        assert!(zero.azimuths().is_empty());
        assert!(zero.points().is_empty());

        let wide = Scan::new(0.0, 90.0, 32, 0, vec![100; 64]);
        assert_eq!(wide.azimuth_count(), 0);
        assert!(wide.points().is_empty());
    }

    #[test]
    fn test_out_of_range_flagged_not_clamped() {
        // 10cm is below the window, 25000cm above it, 0 is a null return.
        let scan = Scan::new(0.0, 90.0, 4, 0, vec![10, 25_000, 0, 5_000]);
        let decoded = decode(&scan.encode()).unwrap();
        assert_eq!(decoded.out_of_range, 3);
        // Values survive untouched.
        assert_eq!(decoded.ranges, vec![10, 25_000, 0, 5_000]);
    }

    #[test]
    fn test_azimuth_spacing() {
        let scan = Scan::new(0.0, 180.0, 4, 0, vec![100; 12]);
        let azimuths = scan.azimuths();
        assert_eq!(azimuths, vec![0.0, 90.0, 180.0]);

        let single = Scan::new(45.0, 90.0, 4, 0, vec![100; 4]);
        assert_eq!(single.azimuths(), vec![45.0]);
    }

    #[test]
    fn test_cartesian_conversion() {
        // One column at azimuth 0 with four entries: points lie in the x-z
        // plane, x = r·cos(el), z = r·sin(el).
        let scan = Scan::new(0.0, 0.0, 4, 0, vec![100, 200, 300, 400]);
        let points = scan.points();
        assert_eq!(points.len(), 4);

        for (row, point) in points.iter().enumerate() {
            let r = scan.ranges[row] as f32 / 100.0;
            let el = VERTICAL_ANGLES_16[row].to_radians();
            assert!((point[0] - r * el.cos()).abs() < 1e-5);
            assert!(point[1].abs() < 1e-5);
            assert!((point[2] - r * el.sin()).abs() < 1e-5);
        }
    }

    #[test]
    fn test_y_axis_negated() {
        // Azimuth 90°: y = -r·cos(el)·sin(az) points to starboard.
        let scan = Scan::new(90.0, 90.0, 1, 0, vec![100]);
        let points = scan.points();
        let el = VERTICAL_ANGLES_16[0].to_radians();
        assert!((points[0][1] + el.cos()).abs() < 1e-5);
    }

    #[test]
    fn test_merge_revolution() {
        let first = Scan::new(0.0, 170.0, 4, 1_000, vec![100; 8]);
        let second = Scan::new(180.0, 350.0, 4, 2_000, vec![10; 8]);
        let payload = LidarPayload::from_scans(&[first.clone(), second.clone()], 5);

        assert_eq!(payload.start_azimuth, 0.0);
        assert_eq!(payload.end_azimuth, 350.0);
        assert_eq!(payload.device_timestamp, 2_000);
        assert_eq!(payload.sequence, 5);
        assert_eq!(payload.points.len(), 16);
        assert_eq!(payload.out_of_range, 8);
    }

    #[test]
    fn test_payload_serializes_camel_case() {
        let payload = LidarPayload::from_scans(&[sample_scan()], 1);
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("startAzimuth").is_some());
        assert!(value.get("endAzimuth").is_some());
        assert!(value.get("deviceTimestamp").is_some());
        assert!(value.get("outOfRange").is_some());
        assert!(value.get("points").is_some());
    }
}
