//! Decodes one telegram payload into a [`lidar_types::Scan`].

use lidar_types::{AngularGrid, Scan, ScanPoint, LAYER_COUNT, LAYER_VERTICAL_ANGLES_DEG};
use nom::bytes::complete::take;
use nom::multi::count;
use nom::number::complete::{be_f32, be_i32, be_u16, be_u32};
use nom::IResult;
use thiserror::Error;

const SCAN_DATA_MARKER: &[u8] = b"LMDscandata";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("payload has no space separating command token from binary body")]
    MissingCommandSeparator,
    #[error("command token does not carry the scan-data marker")]
    NotScanData,
    #[error("command token is not ASCII")]
    NonAsciiCommand,
    #[error("binary body too short to decode")]
    ShortBody,
    #[error("channel content-type bytes are not ASCII")]
    NonAsciiContentType,
}

/// All inner parsers share this concrete error type, so a `?` inside any
/// function returning `PResult` resolves without a turbofish at every call.
type PResult<'a, T> = IResult<&'a [u8], T>;

/// Parses one complete PAYLOAD (the bytes the [`crate::telegram::framer::Framer`]
/// already validated the checksum for) into a `Scan`.
pub fn parse_payload(payload: &[u8]) -> Result<Scan, ParseError> {
    let space_pos = payload
        .iter()
        .skip(4)
        .position(|&b| b == b' ')
        .map(|p| p + 4)
        .ok_or(ParseError::MissingCommandSeparator)?;

    let command = &payload[..space_pos];
    if !command.is_ascii() {
        return Err(ParseError::NonAsciiCommand);
    }
    if !contains_subslice(command, SCAN_DATA_MARKER) {
        return Err(ParseError::NotScanData);
    }

    let body = &payload[space_pos + 1..];
    parse_binary_body(body).map_err(|_| ParseError::ShortBody)
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn parse_binary_body(data: &[u8]) -> PResult<Scan> {
    let (rest, _) = skip_fixed_header(data)?;
    let (rest, device_status) = be_u16(rest)?;
    let (rest, telegram_count) = be_u16(rest)?;
    let (rest, scan_number) = be_u16(rest)?;
    let (rest, timestamp_us) = be_u32(rest)?;
    let (rest, _time_of_transmission) = be_u32(rest)?;
    let (rest, freq_raw) = be_u32(rest)?;
    let (rest, _measurement_freq) = be_u32(rest)?;

    let (rest, num_encoders) = be_u16(rest)?;
    let (mut rest, _encoders) = take((num_encoders as usize) * 6)(rest)?;

    let (next_rest, num_16bit_channels) = be_u16(rest)?;
    rest = next_rest;

    let mut points: Vec<ScanPoint> = Vec::new();
    let mut grid: Option<AngularGrid> = None;

    for channel_idx in 0..num_16bit_channels {
        let (next_rest, channel_points, channel_grid) = parse_16bit_channel(rest, channel_idx)?;
        rest = next_rest;
        points.extend(channel_points);
        if grid.is_none() {
            grid = Some(channel_grid);
        }
    }

    if !rest.is_empty() {
        let (next_rest, num_8bit_channels) = be_u16(rest)?;
        rest = next_rest;
        for channel_idx in 0..num_8bit_channels {
            let (next_rest, ()) = parse_rssi_channel(rest, channel_idx, &mut points)?;
            rest = next_rest;
        }
    }

    let grid = grid.unwrap_or(AngularGrid {
        start_angle_deg: 0.0,
        angular_step_deg: 0.0,
        point_count: 0,
    });

    Ok((
        rest,
        Scan {
            timestamp_us,
            scan_number,
            telegram_count,
            device_status,
            frequency_hz: freq_raw as f32 / 100.0,
            grid,
            points,
        },
    ))
}

fn skip_fixed_header(data: &[u8]) -> PResult<()> {
    let (rest, _) = take(2usize + 2 + 4)(data)?;
    Ok((rest, ()))
}

/// Returns the remaining bytes, the decoded points, and the angular grid
/// this channel describes.
fn parse_16bit_channel(
    data: &[u8],
    channel_idx: u16,
) -> Result<(&[u8], Vec<ScanPoint>, AngularGrid), ParseError> {
    let (rest, content_type) = take::<_, _, nom::error::Error<&[u8]>>(5usize)(data)
        .map_err(|_| ParseError::ShortBody)?;
    if !content_type.is_ascii() {
        return Err(ParseError::NonAsciiContentType);
    }

    let (rest, (points, grid)) =
        parse_16bit_channel_body(rest, channel_idx).map_err(|_| ParseError::ShortBody)?;
    Ok((rest, points, grid))
}

fn parse_16bit_channel_body(
    data: &[u8],
    channel_idx: u16,
) -> PResult<(Vec<ScanPoint>, AngularGrid)> {
    let (rest, scale_factor) = be_f32(data)?;
    let (rest, scale_offset) = be_f32(rest)?;
    let (rest, start_angle_raw) = be_i32(rest)?;
    let (rest, angular_step_raw) = be_u16(rest)?;
    let (rest, num_points) = be_u16(rest)?;

    let start_angle_deg = start_angle_raw as f32 / 10_000.0;
    let angular_step_deg = angular_step_raw as f32 / 10_000.0;

    let (rest, raw_distances) = count(be_u16, num_points as usize)(rest)?;

    let layer = (channel_idx as usize % LAYER_COUNT) as u8;
    let vertical_angle = LAYER_VERTICAL_ANGLES_DEG[layer as usize];

    let points = raw_distances
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            let distance_m = (raw as f32 * scale_factor + scale_offset) / 1000.0;
            let angle_h_deg = start_angle_deg + i as f32 * angular_step_deg;
            ScanPoint {
                distance_m,
                angle_h_deg,
                angle_v_deg: vertical_angle,
                rssi: 0,
                layer,
            }
        })
        .collect();

    let grid = AngularGrid {
        start_angle_deg,
        angular_step_deg,
        point_count: num_points,
    };

    Ok((rest, (points, grid)))
}

fn parse_rssi_channel<'a>(
    data: &'a [u8],
    channel_idx: u16,
    points: &mut [ScanPoint],
) -> Result<(&'a [u8], ()), ParseError> {
    let (rest, content_type) = take::<_, _, nom::error::Error<&[u8]>>(5usize)(data)
        .map_err(|_| ParseError::ShortBody)?;
    if !content_type.is_ascii() {
        return Err(ParseError::NonAsciiContentType);
    }

    let (rest, rssi_values) =
        parse_rssi_channel_body(rest).map_err(|_| ParseError::ShortBody)?;

    let layer = (channel_idx as usize % LAYER_COUNT) as u8;
    let mut layer_point_indices = points
        .iter()
        .enumerate()
        .filter(|(_, p)| p.layer == layer)
        .map(|(i, _)| i);

    for &rssi in rssi_values {
        if let Some(idx) = layer_point_indices.next() {
            points[idx].rssi = rssi;
        } else {
            break;
        }
    }

    Ok((rest, ()))
}

fn parse_rssi_channel_body(data: &[u8]) -> PResult<&[u8]> {
    let (rest, _scale_factor) = be_f32(data)?;
    let (rest, _scale_offset) = be_f32(rest)?;
    let (rest, _start_angle) = take(4usize)(rest)?;
    let (rest, _angular_step) = take(2usize)(rest)?;
    let (rest, num_points) = be_u16(rest)?;
    take(num_points as usize)(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_payload(
        start_angle_raw: i32,
        angular_step_raw: u16,
        distances: &[u16],
        rssi: &[u8],
    ) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0u8; 2 + 2 + 4]); // version, device number, serial
        body.extend_from_slice(&0u16.to_be_bytes()); // device status
        body.extend_from_slice(&1u16.to_be_bytes()); // telegram count
        body.extend_from_slice(&7u16.to_be_bytes()); // scan number
        body.extend_from_slice(&123_456u32.to_be_bytes()); // timestamp
        body.extend_from_slice(&0u32.to_be_bytes()); // time of transmission
        body.extend_from_slice(&1250u32.to_be_bytes()); // scan frequency *100 -> 12.5 Hz
        body.extend_from_slice(&0u32.to_be_bytes()); // measurement frequency
        body.extend_from_slice(&0u16.to_be_bytes()); // num encoders

        body.extend_from_slice(&1u16.to_be_bytes()); // num 16-bit channels
        body.extend_from_slice(b"DIST1");
        body.extend_from_slice(&1.0f32.to_be_bytes()); // scale factor
        body.extend_from_slice(&0.0f32.to_be_bytes()); // scale offset
        body.extend_from_slice(&start_angle_raw.to_be_bytes());
        body.extend_from_slice(&angular_step_raw.to_be_bytes());
        body.extend_from_slice(&(distances.len() as u16).to_be_bytes());
        for d in distances {
            body.extend_from_slice(&d.to_be_bytes());
        }

        body.extend_from_slice(&1u16.to_be_bytes()); // num 8-bit channels
        body.extend_from_slice(b"RSSI1");
        body.extend_from_slice(&1.0f32.to_be_bytes());
        body.extend_from_slice(&0.0f32.to_be_bytes());
        body.extend_from_slice(&start_angle_raw.to_be_bytes());
        body.extend_from_slice(&angular_step_raw.to_be_bytes());
        body.extend_from_slice(&(rssi.len() as u16).to_be_bytes());
        body.extend_from_slice(rssi);

        let mut payload = Vec::new();
        payload.extend_from_slice(b"sRA LMDscandata ");
        payload.extend_from_slice(&body);
        payload
    }

    #[test]
    fn decodes_a_minimal_scan() {
        let payload = build_payload(-100_000, 10_000, &[1000, 2000, 3000], &[10, 20, 30]);
        let scan = parse_payload(&payload).expect("parses");
        assert_eq!(scan.scan_number, 7);
        assert_eq!(scan.timestamp_us, 123_456);
        assert_eq!(scan.frequency_hz, 12.5);
        assert_eq!(scan.grid.point_count, 3);
        assert_eq!(scan.points.len(), 3);
        assert_eq!(scan.points[0].distance_m, 1.0);
        assert_eq!(scan.points[0].rssi, 10);
        assert_eq!(scan.points[0].layer, 0);
    }

    #[test]
    fn angle_grid_matches_formula() {
        let payload = build_payload(0, 2_500, &[1000, 1000, 1000, 1000], &[1, 1, 1, 1]);
        let scan = parse_payload(&payload).unwrap();
        for (i, p) in scan.points.iter().enumerate() {
            let expected = 0.0 + i as f32 * 0.25;
            assert!((p.angle_h_deg - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn rejects_payload_without_scan_data_marker() {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"sRA LMDscancfg ");
        payload.extend_from_slice(&[0u8; 20]);
        assert_eq!(parse_payload(&payload), Err(ParseError::NotScanData));
    }

    #[test]
    fn rejects_short_body() {
        let payload = b"sRA LMDscandata \x00\x01".to_vec();
        assert_eq!(parse_payload(&payload), Err(ParseError::ShortBody));
    }
}
