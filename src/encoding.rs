//! Conversions between bytes and hexadecimal text.

/// Parses a string into bytes, assuming it is a sequence of two digit hexadecimal numbers.
/// Whitespace and invalid parts of the input are discarded.
pub fn parse_hex(s: &str) -> Vec<u8> {
    s
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<Vec<_>>()
        .chunks(2)
        .map(|c| u8::from_str_radix(&c.iter().collect::<String>(), 16))
        .filter_map(Result::ok)
        .collect::<Vec<_>>()
}

/// Formats bytes as uppercase hexadecimal with no separators.
pub fn to_hex(data: &[u8]) -> String {
    hex::encode_upper(data)
}
