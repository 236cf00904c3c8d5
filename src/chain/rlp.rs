//! Recursive length prefix encoding, restricted to what a legacy Ethereum
//! transaction needs: one flat list of byte strings.

use super::error::ChainError;

/// Big-endian bytes of `value` without leading zeros (zero is empty)
pub fn uint_bytes(value: u128) -> Vec<u8> {
    trim_leading_zeros(&value.to_be_bytes()).to_vec()
}

pub fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn encode_length(out: &mut Vec<u8>, len: usize, offset: u8) {
    if len < 56 {
        out.push(offset + len as u8);
    } else {
        let len_bytes = uint_bytes(len as u128);
        out.push(offset + 55 + len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
    }
}

fn encode_string(out: &mut Vec<u8>, bytes: &[u8]) {
    if let [single] = bytes
        && *single < 0x80
    {
        out.push(*single);
        return;
    }
    encode_length(out, bytes.len(), 0x80);
    out.extend_from_slice(bytes);
}

/// Encode `items` as a list of byte strings
pub fn encode_list<T: AsRef<[u8]>>(items: &[T]) -> Vec<u8> {
    let mut payload = Vec::new();
    for item in items {
        encode_string(&mut payload, item.as_ref());
    }
    let mut out = Vec::with_capacity(payload.len() + 9);
    encode_length(&mut out, payload.len(), 0xc0);
    out.extend_from_slice(&payload);
    out
}

/// Item header: (is_list, header length, payload length)
fn decode_header(data: &[u8]) -> Result<(bool, usize, usize), ChainError> {
    let first = *data
        .first()
        .ok_or_else(|| ChainError::Parse("rlp: unexpected end of input".into()))?;
    let (is_list, header_len, payload_len) = match first {
        0x00..=0x7f => (false, 0, 1),
        0x80..=0xb7 => (false, 1, (first - 0x80) as usize),
        0xc0..=0xf7 => (true, 1, (first - 0xc0) as usize),
        0xb8..=0xbf | 0xf8..=0xff => {
            let is_list = first >= 0xf8;
            let len_of_len = (first - if is_list { 0xf7 } else { 0xb7 }) as usize;
            let len_bytes = data
                .get(1..1 + len_of_len)
                .ok_or_else(|| ChainError::Parse("rlp: truncated length".into()))?;
            let len = len_bytes
                .iter()
                .try_fold(0usize, |acc, b| acc.checked_mul(256)?.checked_add(*b as usize))
                .ok_or_else(|| ChainError::Parse("rlp: length overflow".into()))?;
            (is_list, 1 + len_of_len, len)
        }
    };
    if header_len
        .checked_add(payload_len)
        .is_none_or(|end| data.len() < end)
    {
        return Err(ChainError::Parse("rlp: truncated item".into()));
    }
    Ok((is_list, header_len, payload_len))
}

/// Decode a list of byte strings; nested lists and trailing bytes are errors
pub fn decode_list(data: &[u8]) -> Result<Vec<Vec<u8>>, ChainError> {
    let (is_list, header_len, payload_len) = decode_header(data)?;
    if !is_list {
        return Err(ChainError::Parse("rlp: expected a list".into()));
    }
    if data.len() != header_len + payload_len {
        return Err(ChainError::Parse("rlp: trailing bytes".into()));
    }

    let mut rest = &data[header_len..];
    let mut items = Vec::new();
    while !rest.is_empty() {
        let (is_list, header_len, payload_len) = decode_header(rest)?;
        if is_list {
            return Err(ChainError::Parse("rlp: nested list".into()));
        }
        let end = header_len + payload_len;
        items.push(rest[header_len..end].to_vec());
        rest = &rest[end..];
    }
    Ok(items)
}

/// Unsigned integer of at most 16 bytes
pub fn decode_uint(bytes: &[u8]) -> Result<u128, ChainError> {
    if bytes.len() > 16 {
        return Err(ChainError::Parse("rlp: integer wider than 128 bits".into()));
    }
    Ok(bytes.iter().fold(0u128, |acc, b| (acc << 8) | *b as u128))
}
