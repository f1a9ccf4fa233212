use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::error::ErrorKind;

/// Lowest BPM accepted from a sensor.
pub const MIN_VALID_BPM: u16 = 30;
/// Highest BPM accepted from a sensor.
pub const MAX_VALID_BPM: u16 = 220;

const FLAG_VALUE_IS_U16: u8 = 0b0000_0001;
const FLAG_CONTACT_SUPPORTED: u8 = 0b0000_0010;
const FLAG_CONTACT_DETECTED: u8 = 0b0000_0100;
const FLAG_ENERGY_EXPENDED: u8 = 0b0000_1000;
const FLAG_RR_INTERVALS: u8 = 0b0001_0000;

/// One validated Heart Rate Measurement notification.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct HeartRateReading {
    bpm: u16,
    sensor_contact_supported: bool,
    sensor_contact: Option<bool>,
    has_energy_expended: bool,
    has_rr_intervals: bool,
    energy_expended: Option<u16>,
    rr_intervals: Vec<u16>,
}

impl HeartRateReading {
    /// Beats per minute.
    #[must_use]
    pub fn bpm(&self) -> u16 {
        self.bpm
    }

    /// Whether the sensor reports skin-contact status at all.
    #[must_use]
    pub fn sensor_contact_supported(&self) -> bool {
        self.sensor_contact_supported
    }

    /// Skin-contact status; `None` when the sensor does not support it.
    #[must_use]
    pub fn sensor_contact(&self) -> Option<bool> {
        self.sensor_contact
    }

    /// Whether the energy-expended flag was set.
    #[must_use]
    pub fn has_energy_expended(&self) -> bool {
        self.has_energy_expended
    }

    /// Whether the RR-interval flag was set.
    #[must_use]
    pub fn has_rr_intervals(&self) -> bool {
        self.has_rr_intervals
    }

    /// Cumulative energy expended in kilojoules, if the field was complete.
    #[must_use]
    pub fn energy_expended(&self) -> Option<u16> {
        self.energy_expended
    }

    /// Raw RR intervals in 1/1024 second units.
    #[must_use]
    pub fn rr_intervals(&self) -> &[u16] {
        &self.rr_intervals
    }

    /// RR intervals converted to milliseconds.
    pub fn rr_intervals_ms(&self) -> impl Iterator<Item = f64> + '_ {
        self.rr_intervals
            .iter()
            .map(|raw| f64::from(*raw) * 1000.0 / 1024.0)
    }
}

/// Reasons a measurement payload is rejected.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum DecodeError {
    #[error("measurement payload has {len} bytes but needs at least {required}")]
    TooShort { len: usize, required: usize },
    #[error("decoded heart rate {bpm} BPM is outside {MIN_VALID_BPM}..={MAX_VALID_BPM}")]
    OutOfRange { bpm: u16 },
}

impl DecodeError {
    /// Category reported for a rejected payload.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::DecodeError
    }
}

/// Decodes raw `0x2A37` notification payloads.
pub struct MeasurementDecoder;

impl MeasurementDecoder {
    /// Decodes one Heart Rate Measurement payload.
    ///
    /// ```
    /// let reading = hrlink::MeasurementDecoder::decode(&[0x01, 0x46, 0x00])?;
    /// assert_eq!(70, reading.bpm());
    /// # Ok::<(), hrlink::DecodeError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is truncated or the BPM value falls
    /// outside the accepted range.
    #[instrument(skip(payload), level = "trace", fields(payload_len = payload.len()))]
    pub fn decode(payload: &[u8]) -> Result<HeartRateReading, DecodeError> {
        let [flags, rest @ ..] = payload else {
            return Err(DecodeError::TooShort {
                len: 0,
                required: 2,
            });
        };
        let flags = *flags;
        let value_width = if flags & FLAG_VALUE_IS_U16 != 0 { 2 } else { 1 };
        if rest.len() < value_width {
            return Err(DecodeError::TooShort {
                len: payload.len(),
                required: 1 + value_width,
            });
        }

        let bpm = if value_width == 2 {
            u16::from_le_bytes([rest[0], rest[1]])
        } else {
            u16::from(rest[0])
        };
        let mut optional = &rest[value_width..];
        if !(MIN_VALID_BPM..=MAX_VALID_BPM).contains(&bpm) {
            return Err(DecodeError::OutOfRange { bpm });
        }

        let sensor_contact_supported = flags & FLAG_CONTACT_SUPPORTED != 0;
        let sensor_contact =
            sensor_contact_supported.then_some(flags & FLAG_CONTACT_DETECTED != 0);

        let has_energy_expended = flags & FLAG_ENERGY_EXPENDED != 0;
        let mut energy_expended = None;
        if has_energy_expended {
            if let Some((field, remaining)) = optional.split_first_chunk::<2>() {
                energy_expended = Some(u16::from_le_bytes(*field));
                optional = remaining;
            } else {
                optional = &[];
            }
        }

        let has_rr_intervals = flags & FLAG_RR_INTERVALS != 0;
        let rr_intervals = if has_rr_intervals {
            optional
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect()
        } else {
            Vec::new()
        };

        Ok(HeartRateReading {
            bpm,
            sensor_contact_supported,
            sensor_contact,
            has_energy_expended,
            has_rr_intervals,
            energy_expended,
            rr_intervals,
        })
    }

    /// Best-effort decode that drops malformed frames.
    #[must_use]
    pub fn decode_lossy(payload: &[u8]) -> Option<HeartRateReading> {
        Self::decode(payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0x00, 30)]
    #[case(0x00, 72)]
    #[case(0x02, 150)]
    #[case(0x06, 220)]
    #[case(0x08, 64)]
    fn eight_bit_payload_decodes_bpm_byte(#[case] flags: u8, #[case] bpm: u8) {
        let reading =
            MeasurementDecoder::decode(&[flags, bpm]).expect("in-range payload should decode");
        assert_eq!(u16::from(bpm), reading.bpm());
    }

    #[test]
    fn sixteen_bit_payload_is_little_endian() {
        let reading = MeasurementDecoder::decode(&[0x01, 0x46, 0x00])
            .expect("16-bit payload should decode");
        assert_eq!(70, reading.bpm());
    }

    #[rstest]
    #[case(&[0x00, 0x0A], 10)]
    #[case(&[0x00, 0xFF], 255)]
    #[case(&[0x01, 0x2C, 0x01], 300)]
    #[case(&[0x00, 0x1D], 29)]
    fn out_of_range_values_are_rejected(#[case] payload: &[u8], #[case] bpm: u16) {
        assert_eq!(
            Err(DecodeError::OutOfRange { bpm }),
            MeasurementDecoder::decode(payload)
        );
    }

    #[rstest]
    #[case(&[])]
    #[case(&[0x00])]
    #[case(&[0x01, 0x46])]
    fn truncated_payloads_are_too_short(#[case] payload: &[u8]) {
        assert_matches!(
            MeasurementDecoder::decode(payload),
            Err(DecodeError::TooShort { .. })
        );
    }

    #[test]
    fn sixteen_bit_flag_with_two_bytes_reports_required_length() {
        assert_eq!(
            Err(DecodeError::TooShort {
                len: 2,
                required: 3
            }),
            MeasurementDecoder::decode(&[0x01, 0x46])
        );
    }

    #[rstest]
    #[case(DecodeError::TooShort { len: 1, required: 2 })]
    #[case(DecodeError::OutOfRange { bpm: 5 })]
    fn rejected_payloads_are_decode_errors(#[case] error: DecodeError) {
        assert_eq!(ErrorKind::DecodeError, error.kind());
    }

    #[rstest]
    #[case(0x00, None)]
    #[case(0x04, None)]
    #[case(0x02, Some(false))]
    #[case(0x06, Some(true))]
    fn sensor_contact_follows_support_bit(#[case] flags: u8, #[case] expected: Option<bool>) {
        let reading = MeasurementDecoder::decode(&[flags, 80]).expect("payload should decode");
        assert_eq!(expected, reading.sensor_contact());
        assert_eq!(expected.is_some(), reading.sensor_contact_supported());
    }

    #[test]
    fn optional_fields_are_decoded_when_present() {
        let payload = [0x19, 0x40, 0x00, 0x10, 0x27, 0x00, 0x04, 0x00, 0x02];
        let reading = MeasurementDecoder::decode(&payload).expect("payload should decode");

        assert_eq!(64, reading.bpm());
        assert!(reading.has_energy_expended());
        assert_eq!(Some(0x2710), reading.energy_expended());
        assert!(reading.has_rr_intervals());
        assert_eq!(&[0x0400, 0x0200], reading.rr_intervals());
        let millis: Vec<f64> = reading.rr_intervals_ms().collect();
        assert_eq!(vec![1000.0, 500.0], millis);
    }

    #[test]
    fn truncated_optional_fields_do_not_fail_decode() {
        let reading =
            MeasurementDecoder::decode(&[0x18, 0x50, 0x01]).expect("payload should decode");

        assert!(reading.has_energy_expended());
        assert_eq!(None, reading.energy_expended());
        assert!(reading.has_rr_intervals());
        assert!(reading.rr_intervals().is_empty());
    }

    #[test]
    fn decode_lossy_drops_malformed_frames() {
        assert_eq!(None, MeasurementDecoder::decode_lossy(&[0x00, 0x05]));
        assert_eq!(
            Some(90),
            MeasurementDecoder::decode_lossy(&[0x00, 90]).map(|reading| reading.bpm())
        );
    }
}
