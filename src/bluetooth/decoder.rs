/// Sensor node advertisement decoding
use crate::error::DecodeError;
use crate::models::DecodedAdvertisement;

/// Nordic Semiconductor company identifier, used by the sensor firmware
pub const SENSOR_MANUFACTURER_ID: u16 = 0x0059;
/// Length of the sensor payload following the manufacturer id
pub const PAYLOAD_LEN: usize = 14;

const VENDOR_ID_LEN: usize = 2;
const MIN_RECORD_LEN: usize = 6;

/// Read the little-endian manufacturer id at the front of a raw record
pub fn vendor_id(record: &[u8]) -> Option<u16> {
    match record {
        [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

/// Decode a raw manufacturer data record into scaled sensor fields
///
/// The record starts with the 2-byte little-endian manufacturer id followed
/// by a 14-byte little-endian payload:
/// - Byte 0: Payload version
/// - Byte 1: Firmware power tier hint
/// - Bytes 2-3: Battery voltage (unsigned, mV)
/// - Bytes 4-5: Temperature (signed, 0.01°C)
/// - Bytes 6-7: Pressure (unsigned, 0.1 hPa)
/// - Bytes 8-9: Relative humidity (unsigned, 0.01%)
/// - Bytes 10-13: Node timestamp (unsigned, seconds)
///
/// Nothing is returned unless the whole payload parses.
pub fn decode_advertisement(record: &[u8]) -> Result<DecodedAdvertisement, DecodeError> {
    if record.len() < MIN_RECORD_LEN {
        return Err(DecodeError::TooShort { len: record.len() });
    }

    let vendor = vendor_id(record).ok_or(DecodeError::TooShort { len: record.len() })?;
    if vendor != SENSOR_MANUFACTURER_ID {
        return Err(DecodeError::UnrecognizedVendor(vendor));
    }

    let payload = &record[VENDOR_ID_LEN..];
    if payload.len() < PAYLOAD_LEN {
        return Err(DecodeError::TooShort { len: record.len() });
    }
    let payload: &[u8; PAYLOAD_LEN] =
        payload.try_into().map_err(|_| DecodeError::MalformedPayload {
            expected: PAYLOAD_LEN,
            actual: payload.len(),
        })?;

    let temp_raw = i16::from_le_bytes([payload[4], payload[5]]);
    let pressure_raw = u16::from_le_bytes([payload[6], payload[7]]);
    let humidity_raw = u16::from_le_bytes([payload[8], payload[9]]);

    Ok(DecodedAdvertisement {
        version: payload[0],
        tier_hint: payload[1],
        battery_mv: u16::from_le_bytes([payload[2], payload[3]]),
        temperature: f64::from(temp_raw) / 100.0,
        pressure: f64::from(pressure_raw) / 10.0,
        humidity: f64::from(humidity_raw) / 100.0,
        node_timestamp: u32::from_le_bytes([payload[10], payload[11], payload[12], payload[13]]),
    })
}

#[cfg(test)]
pub(crate) fn encode_advertisement(
    tier_hint: u8,
    battery_mv: u16,
    temp_raw: i16,
    pressure_raw: u16,
    humidity_raw: u16,
    node_timestamp: u32,
) -> Vec<u8> {
    let mut record = SENSOR_MANUFACTURER_ID.to_le_bytes().to_vec();
    record.push(1);
    record.push(tier_hint);
    record.extend_from_slice(&battery_mv.to_le_bytes());
    record.extend_from_slice(&temp_raw.to_le_bytes());
    record.extend_from_slice(&pressure_raw.to_le_bytes());
    record.extend_from_slice(&humidity_raw.to_le_bytes());
    record.extend_from_slice(&node_timestamp.to_le_bytes());
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_reference_advertisement() {
        let record = [
            0x59, 0x00, // manufacturer id
            0x01, 0x00, // version, tier hint
            0x10, 0x0E, // 3600 mV
            0x2E, 0x09, // 2350 -> 23.50 °C
            0x94, 0x27, // 10132 -> 1013.2 hPa
            0x8C, 0x19, // 6540 -> 65.40 %
            0xD2, 0x02, 0x96, 0x49, // 1234567890
        ];

        let decoded = decode_advertisement(&record).unwrap();
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.tier_hint, 0);
        assert_eq!(decoded.battery_mv, 3600);
        assert!((decoded.temperature - 23.50).abs() < 1e-9);
        assert!((decoded.pressure - 1013.2).abs() < 1e-9);
        assert!((decoded.humidity - 65.40).abs() < 1e-9);
        assert_eq!(decoded.node_timestamp, 1_234_567_890);
    }

    #[test]
    fn negative_temperatures_keep_their_sign() {
        let record = encode_advertisement(3, 3100, -1525, 9870, 0, 7);
        let decoded = decode_advertisement(&record).unwrap();
        assert!((decoded.temperature + 15.25).abs() < 1e-9);
        assert!((decoded.pressure - 987.0).abs() < 1e-9);
        assert_eq!(decoded.humidity, 0.0);
        assert_eq!(decoded.tier_hint, 3);
    }

    #[test]
    fn extreme_raw_values_scale_exactly() {
        let record = encode_advertisement(0, u16::MAX, i16::MIN, u16::MAX, 10000, u32::MAX);
        let decoded = decode_advertisement(&record).unwrap();
        assert_eq!(decoded.battery_mv, u16::MAX);
        assert!((decoded.temperature + 327.68).abs() < 1e-9);
        assert!((decoded.pressure - 6553.5).abs() < 1e-9);
        assert!((decoded.humidity - 100.0).abs() < 1e-9);
        assert_eq!(decoded.node_timestamp, u32::MAX);
    }

    #[test]
    fn short_records_are_too_short() {
        let full = encode_advertisement(0, 3700, 2000, 10000, 5000, 1);
        for len in 0..full.len() {
            assert_eq!(
                decode_advertisement(&full[..len]),
                Err(DecodeError::TooShort { len }),
                "length {}",
                len
            );
        }
    }

    #[test]
    fn foreign_vendor_is_rejected_before_payload_checks() {
        let mut record = encode_advertisement(0, 3700, 2000, 10000, 5000, 1);
        record[0] = 0x99;
        record[1] = 0x04;
        assert_eq!(
            decode_advertisement(&record),
            Err(DecodeError::UnrecognizedVendor(0x0499))
        );
        assert_eq!(
            decode_advertisement(&[0x99, 0x04, 0, 0, 0, 0]),
            Err(DecodeError::UnrecognizedVendor(0x0499))
        );
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut record = encode_advertisement(0, 3700, 2000, 10000, 5000, 1);
        record.push(0xFF);
        assert_eq!(
            decode_advertisement(&record),
            Err(DecodeError::MalformedPayload {
                expected: PAYLOAD_LEN,
                actual: PAYLOAD_LEN + 1
            })
        );
    }

    #[test]
    fn vendor_id_needs_two_bytes() {
        assert_eq!(vendor_id(&[0x59]), None);
        assert_eq!(vendor_id(&[0x59, 0x00]), Some(SENSOR_MANUFACTURER_ID));
    }
}
