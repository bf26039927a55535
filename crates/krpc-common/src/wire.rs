//! Primitive protobuf wire encodings.
//!
//! Every scalar a kRPC value can hold is encoded here exactly as the server's
//! protobuf runtime would encode the bare field payload (no tag). Signed
//! integers are not zig-zag encoded: a negative value is sent as its 64-bit
//! two's-complement magnitude, which is why `int32(-1)` takes ten bytes.

use crate::protocol::error::{KrpcError, Result};

/// Longest legal varint, in 7-bit groups.
pub const MAX_VARINT_LEN: usize = 10;

/// Appends `value` to `buf` as an unsigned base-128 varint.
pub fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Decodes a varint from the front of `data`.
///
/// Returns the value and the number of bytes consumed. Input that ends
/// mid-varint, runs past ten groups, or overflows 64 bits is rejected.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in data.iter().enumerate().take(MAX_VARINT_LEN) {
        let group = (byte & 0x7f) as u64;
        // The tenth group only has room for the top bit.
        if i == MAX_VARINT_LEN - 1 && group > 1 {
            return Err(KrpcError::MalformedVarint);
        }
        value |= group << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(KrpcError::MalformedVarint)
}

pub fn encode_signed(value: i64, buf: &mut Vec<u8>) {
    encode_varint(value as u64, buf);
}

pub fn decode_signed(data: &[u8]) -> Result<(i64, usize)> {
    let (raw, used) = decode_varint(data)?;
    Ok((raw as i64, used))
}

pub fn encode_int32(value: i32, buf: &mut Vec<u8>) {
    encode_signed(value as i64, buf);
}

pub fn decode_int32(data: &[u8]) -> Result<i32> {
    let (value, _) = decode_signed(data)?;
    i32::try_from(value)
        .map_err(|_| KrpcError::InvalidResponse(format!("{} does not fit in an int32", value)))
}

pub fn encode_int64(value: i64, buf: &mut Vec<u8>) {
    encode_signed(value, buf);
}

pub fn decode_int64(data: &[u8]) -> Result<i64> {
    Ok(decode_signed(data)?.0)
}

pub fn encode_uint32(value: u32, buf: &mut Vec<u8>) {
    encode_varint(value as u64, buf);
}

pub fn decode_uint32(data: &[u8]) -> Result<u32> {
    let (value, _) = decode_varint(data)?;
    u32::try_from(value)
        .map_err(|_| KrpcError::InvalidResponse(format!("{} does not fit in a uint32", value)))
}

pub fn encode_uint64(value: u64, buf: &mut Vec<u8>) {
    encode_varint(value, buf);
}

pub fn decode_uint64(data: &[u8]) -> Result<u64> {
    Ok(decode_varint(data)?.0)
}

pub fn encode_bool(value: bool, buf: &mut Vec<u8>) {
    encode_varint(value as u64, buf);
}

pub fn decode_bool(data: &[u8]) -> Result<bool> {
    Ok(decode_varint(data)?.0 != 0)
}

pub fn encode_float(value: f32, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn decode_float(data: &[u8]) -> Result<f32> {
    let bytes: [u8; 4] = fixed(data)?;
    Ok(f32::from_le_bytes(bytes))
}

pub fn encode_double(value: f64, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn decode_double(data: &[u8]) -> Result<f64> {
    let bytes: [u8; 8] = fixed(data)?;
    Ok(f64::from_le_bytes(bytes))
}

pub fn encode_bytes(value: &[u8], buf: &mut Vec<u8>) {
    encode_varint(value.len() as u64, buf);
    buf.extend_from_slice(value);
}

pub fn decode_bytes(data: &[u8]) -> Result<Vec<u8>> {
    Ok(length_delimited(data)?.to_vec())
}

pub fn encode_string(value: &str, buf: &mut Vec<u8>) {
    encode_bytes(value.as_bytes(), buf);
}

pub fn decode_string(data: &[u8]) -> Result<String> {
    let payload = length_delimited(data)?;
    String::from_utf8(payload.to_vec())
        .map_err(|e| KrpcError::InvalidResponse(format!("string is not valid UTF-8: {}", e)))
}

fn fixed<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
    data.get(..N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| {
            KrpcError::InvalidResponse(format!("expected {} bytes, got {}", N, data.len()))
        })
}

fn length_delimited(data: &[u8]) -> Result<&[u8]> {
    let (len, used) = decode_varint(data)?;
    let len = usize::try_from(len)
        .map_err(|_| KrpcError::InvalidResponse(format!("length {} is too large", len)))?;
    data.get(used..used + len).ok_or_else(|| {
        KrpcError::InvalidResponse(format!(
            "truncated payload: need {} bytes, have {}",
            len,
            data.len().saturating_sub(used)
        ))
    })
}
