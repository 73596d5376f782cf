/*!
Display update frames.

A frame is the address byte followed by up to four bytes of display RAM. It is
built fresh for every update and is not modified once handed to the driver.
*/

use crate::error::{Result, SharedError};
use crate::glyph;
use crate::protocol::{ADDRESS, MAX_PAYLOAD};

/// One display update: address byte plus 0-4 payload bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Create a frame starting at the first display position
    pub fn new(payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD {
            return Err(SharedError::PayloadTooLong(payload.len()));
        }
        let mut bytes = Vec::with_capacity(payload.len() + 1);
        bytes.push(ADDRESS);
        bytes.extend_from_slice(payload);
        Ok(Self { bytes })
    }

    /// Signed value in tenths: sign position plus three digits with the
    /// decimal point after the second digit, or "OFL" if |value| >= 1000
    pub fn number(tenths: i16) -> Self {
        let sign = if tenths < 0 { glyph::MINUS } else { glyph::BLANK };

        // i16::MIN has no positive counterpart, unsigned_abs avoids the overflow
        let mut n = tenths.unsigned_abs();
        let units = (n % 10) as u8;
        n /= 10;
        let tens = (n % 10) as u8;
        let hundreds = n / 10;

        let digits = if hundreds < 10 {
            [
                glyph::DIGITS[hundreds as usize],
                glyph::DIGITS[tens as usize] | glyph::DECIMAL_POINT,
                glyph::DIGITS[units as usize],
            ]
        } else {
            glyph::OVERFLOW
        };

        Self::from_parts(&[sign, digits[0], digits[1], digits[2]])
    }

    /// "Err" in the first three positions
    pub fn error() -> Self {
        Self::from_parts(&glyph::ERROR)
    }

    /// Blank sign and "---"
    pub fn waiting() -> Self {
        let [a, b, c] = glyph::WAITING;
        Self::from_parts(&[glyph::BLANK, a, b, c])
    }

    /// Blank sign and "StL"
    pub fn stale() -> Self {
        let [a, b, c] = glyph::STALE;
        Self::from_parts(&[glyph::BLANK, a, b, c])
    }

    fn from_parts(payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(payload.len() + 1);
        bytes.push(ADDRESS);
        bytes.extend_from_slice(payload);
        Self { bytes }
    }

    /// Address byte followed by the payload
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload without the address byte
    pub fn payload(&self) -> &[u8] {
        &self.bytes[1..]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glyph::{decode_digit, DECIMAL_POINT};

    fn digits_of(frame: &Frame) -> Vec<u8> {
        frame.payload()[1..]
            .iter()
            .map(|&p| decode_digit(p).expect("digit glyph"))
            .collect()
    }

    #[test]
    fn test_number_digits_and_decimal_point() {
        for v in [-999i16, -235, -23, -1, 0, 7, 42, 234, 999] {
            let frame = Frame::number(v);
            assert_eq!(frame.len(), 5);
            assert_eq!(frame.bytes()[0], ADDRESS);

            let abs = v.unsigned_abs();
            let expected = vec![(abs / 100) as u8, (abs / 10 % 10) as u8, (abs % 10) as u8];
            assert_eq!(digits_of(&frame), expected, "value {}", v);

            let p = frame.payload();
            assert_eq!(p[1] & DECIMAL_POINT, 0);
            assert_ne!(p[2] & DECIMAL_POINT, 0);
            assert_eq!(p[3] & DECIMAL_POINT, 0);
            assert_eq!(p[0] != 0, v < 0, "sign byte for {}", v);
        }
    }

    #[test]
    fn test_number_overflow() {
        for v in [1000i16, -1000, 1234, 9999, -9999, i16::MAX, i16::MIN] {
            let frame = Frame::number(v);
            assert_eq!(frame.len(), 5);
            assert_eq!(&frame.payload()[1..], &glyph::OVERFLOW, "value {}", v);
        }
    }

    #[test]
    fn test_scenario_positive_reading() {
        let frame = Frame::number(234);
        assert_eq!(frame.bytes(), &[ADDRESS, 0x00, 0x5B, 0x4F | 0x80, 0x66]);
    }

    #[test]
    fn test_scenario_negative_reading() {
        let frame = Frame::number(-23);
        assert_eq!(frame.payload()[0], glyph::MINUS);
        assert_eq!(digits_of(&frame), vec![0, 2, 3]);
    }

    #[test]
    fn test_symbol_frames() {
        assert_eq!(Frame::error().bytes(), &[ADDRESS, 0x79, 0x50, 0x50]);
        assert_eq!(Frame::waiting().len(), 5);
        assert_eq!(Frame::stale().len(), 5);
        assert_ne!(Frame::waiting(), Frame::stale());
    }

    #[test]
    fn test_payload_limit() {
        assert!(Frame::new(&[0; 4]).is_ok());
        assert!(matches!(Frame::new(&[0; 5]), Err(SharedError::PayloadTooLong(5))));
        assert_eq!(Frame::new(&[]).unwrap().bytes(), &[ADDRESS]);
    }
}
