/*!
7-segment glyph patterns.

Bit layout per position: bit 0..6 = segments a..g, bit 7 = decimal point
(on the second position, the colon on some modules).
*/

/// Segment patterns for the digits 0-9
pub const DIGITS: [u8; 10] = [
    0x3F, 0x06, 0x5B, 0x4F, 0x66, // 0, 1, 2, 3, 4
    0x6D, 0x7D, 0x07, 0x7F, 0x6F, // 5, 6, 7, 8, 9
];

/// Decimal point modifier, OR-ed into a digit pattern
pub const DECIMAL_POINT: u8 = 0x80;

/// Segment g only
pub const MINUS: u8 = 0x40;

/// All segments off
pub const BLANK: u8 = 0x00;

/// "OFL" shown when the value does not fit three digits
pub const OVERFLOW: [u8; 3] = [0x3F, 0x71, 0x38];

/// "Err" shown when the measurement could not be parsed
pub const ERROR: [u8; 3] = [0x79, 0x50, 0x50];

/// "---" shown until the first reading arrives
pub const WAITING: [u8; 3] = [MINUS, MINUS, MINUS];

/// "StL" shown when the last reading is too old
pub const STALE: [u8; 3] = [0x6D, 0x78, 0x38];

/// Segment pattern for a decimal digit
pub fn digit(value: u8) -> Option<u8> {
    DIGITS.get(value as usize).copied()
}

/// Decimal digit for a segment pattern, ignoring the decimal point
pub fn decode_digit(pattern: u8) -> Option<u8> {
    let segments = pattern & !DECIMAL_POINT;
    DIGITS.iter().position(|&d| d == segments).map(|i| i as u8)
}

/// Best-effort text for a segment pattern (for logs)
pub fn to_char(pattern: u8) -> char {
    if let Some(d) = decode_digit(pattern) {
        return (b'0' + d) as char;
    }
    match pattern & !DECIMAL_POINT {
        BLANK => ' ',
        MINUS => '-',
        0x79 => 'E',
        0x50 => 'r',
        0x71 => 'F',
        0x38 => 'L',
        0x78 => 't',
        _ => '?',
    }
}

/// Render display positions as text, decimal points included
pub fn to_text(patterns: &[u8]) -> String {
    let mut text = String::with_capacity(patterns.len() * 2);
    for &p in patterns {
        text.push(to_char(p));
        if p & DECIMAL_POINT != 0 {
            text.push('.');
        }
    }
    text
}
