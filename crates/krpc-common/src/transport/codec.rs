use prost::Message;

use crate::protocol::error::{KrpcError, Result};
use crate::wire;

/// Largest frame either side may send (100 MB).
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Protobuf codec for kRPC protocol messages.
///
/// Both client connections carry the same framing:
///
/// ```text
/// [uvarint byte length] [protobuf message]
/// ```
///
/// # Example
///
/// ```
/// use krpc_common::pb;
/// use krpc_common::transport::ProtobufCodec;
///
/// let call = pb::ProcedureCall {
///     service: "KRPC".to_string(),
///     procedure: "GetStatus".to_string(),
///     ..Default::default()
/// };
/// let request = pb::Request { calls: vec![call] };
///
/// let framed = ProtobufCodec::encode_framed(&request);
/// let (decoded, used): (pb::Request, usize) = ProtobufCodec::decode_framed(&framed).unwrap();
/// assert_eq!(decoded, request);
/// assert_eq!(used, framed.len());
/// ```
pub struct ProtobufCodec;

impl ProtobufCodec {
    /// Encode a message without a length prefix
    pub fn encode<M: Message>(message: &M) -> Vec<u8> {
        message.encode_to_vec()
    }

    /// Decode a message from its unprefixed bytes
    pub fn decode<M: Message + Default>(data: &[u8]) -> Result<M> {
        Ok(M::decode(data)?)
    }

    /// Encode a message preceded by its varint length
    pub fn encode_framed<M: Message>(message: &M) -> Vec<u8> {
        let body = message.encode_to_vec();
        let mut framed = Vec::with_capacity(body.len() + wire::MAX_VARINT_LEN);
        wire::encode_varint(body.len() as u64, &mut framed);
        framed.extend_from_slice(&body);
        framed
    }

    /// Decode one framed message from the front of `data`.
    ///
    /// Returns the message and the number of bytes the frame occupied.
    pub fn decode_framed<M: Message + Default>(data: &[u8]) -> Result<(M, usize)> {
        let (len, prefix) = wire::decode_varint(data)?;
        let body = usize::try_from(len)
            .ok()
            .and_then(|len| data.get(prefix..prefix.checked_add(len)?))
            .ok_or_else(|| {
                KrpcError::InvalidResponse(format!(
                    "truncated frame: need {} bytes, have {}",
                    len,
                    data.len() - prefix
                ))
            })?;
        let end = prefix + body.len();
        Ok((M::decode(body)?, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pb;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn test_request_with_size_prefix() {
        let request = pb::Request {
            calls: vec![pb::ProcedureCall {
                service: "ServiceName".to_string(),
                procedure: "ProcedureName".to_string(),
                ..Default::default()
            }],
        };
        assert_eq!(
            hex(&ProtobufCodec::encode_framed(&request)),
            "1e0a1c0a0b536572766963654e616d65120d50726f6365647572654e616d65"
        );
    }

    #[test]
    fn test_decode_framed_reports_consumed_length() {
        let mut data = ProtobufCodec::encode_framed(&pb::Stream { id: 7 });
        data.extend_from_slice(&[0xaa, 0xbb]);

        let (stream, used): (pb::Stream, usize) = ProtobufCodec::decode_framed(&data).unwrap();
        assert_eq!(stream.id, 7);
        assert_eq!(used, data.len() - 2);
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let data = ProtobufCodec::encode_framed(&pb::Stream { id: 300 });
        let result: Result<(pb::Stream, usize)> = ProtobufCodec::decode_framed(&data[..data.len() - 1]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_message_data_returns_error() {
        let result: Result<pb::Response> = ProtobufCodec::decode(&[0xff, 0xff, 0xff]);
        assert!(result.is_err());
    }
}
