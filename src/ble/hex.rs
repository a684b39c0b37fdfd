use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexError {
    #[error("hex string has odd length {0}")]
    OddLength(usize),
    #[error("invalid hex digit {digit:?} at position {index}")]
    InvalidDigit { index: usize, digit: char },
}

/// Decodes a hex string into bytes. Accepts upper and lower case digits.
pub fn decode(hex: &str) -> Result<Vec<u8>, HexError> {
    let digits = hex.as_bytes();
    if digits.len() % 2 != 0 {
        return Err(HexError::OddLength(digits.len()));
    }

    digits
        .chunks_exact(2)
        .enumerate()
        .map(|(pair, chunk)| {
            let high = nibble(chunk[0], pair * 2)?;
            let low = nibble(chunk[1], pair * 2 + 1)?;
            Ok((high << 4) | low)
        })
        .collect()
}

/// Encodes bytes as an uppercase hex string.
pub fn encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

fn nibble(digit: u8, index: usize) -> Result<u8, HexError> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        _ => Err(HexError::InvalidDigit {
            index,
            digit: digit as char,
        }),
    }
}
