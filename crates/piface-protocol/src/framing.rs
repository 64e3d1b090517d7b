//! 串口字节流帧编解码
//!
//! 字节流方向（蓝牙串口桥、裸 socket 串口桥）使用定长帧协议：
//! 帧头 `0xAA`，长度字段，负载。解码器在看到帧头之前丢弃所有字节，
//! 以便在噪声或半截帧之后重新同步。命令文本全部是 ASCII，
//! 所以把 `0xAA` 当帧头是安全的。
//!
//! 请求方向长度字段 1 字节，响应方向 2 字节大端，见 crate 级文档。

use crate::ProtocolError;

/// 帧头字节
pub const FRAME_HEADER: u8 = 0xAA;

/// 长度字段宽度（方向相关）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthWidth {
    /// 1 字节长度（请求方向，最长 255）
    U8,
    /// 2 字节大端长度（响应方向，最长 65535）
    U16,
}

impl LengthWidth {
    fn num_bytes(self) -> u8 {
        match self {
            LengthWidth::U8 => 1,
            LengthWidth::U16 => 2,
        }
    }

    fn max_payload(self) -> usize {
        match self {
            LengthWidth::U8 => u8::MAX as usize,
            LengthWidth::U16 => u16::MAX as usize,
        }
    }
}

/// 解码器状态机
#[derive(Debug)]
enum DecodeState {
    /// 扫描帧头，其余字节全部丢弃（重新同步点）
    AwaitHeader,
    /// 收集长度字段
    AwaitLength { bytes: [u8; 2], got: u8 },
    /// 收集负载
    AwaitPayload { expected: usize, buf: Vec<u8> },
}

/// 增量式帧解码器
///
/// 按字节推入，凑满一帧时返回负载。传输层可以按任意大小的块喂入，
/// 状态机自己维护帧边界。
///
/// # Example
///
/// ```
/// use piface_protocol::framing::FrameDecoder;
///
/// let mut decoder = FrameDecoder::request();
/// let mut frames = Vec::new();
/// for b in [0x00, 0xAA, 0x02, b'h', b'i'] {
///     if let Some(payload) = decoder.push(b) {
///         frames.push(payload);
///     }
/// }
/// assert_eq!(frames, vec![b"hi".to_vec()]);
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    width: LengthWidth,
    state: DecodeState,
}

impl FrameDecoder {
    /// 请求方向解码器（1 字节长度）
    pub fn request() -> Self {
        Self::new(LengthWidth::U8)
    }

    /// 响应方向解码器（2 字节大端长度，用于对端和测试）
    pub fn response() -> Self {
        Self::new(LengthWidth::U16)
    }

    pub fn new(width: LengthWidth) -> Self {
        Self {
            width,
            state: DecodeState::AwaitHeader,
        }
    }

    /// 推入一个字节，凑满一帧时返回完整负载
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        match &mut self.state {
            DecodeState::AwaitHeader => {
                if byte == FRAME_HEADER {
                    self.state = DecodeState::AwaitLength {
                        bytes: [0; 2],
                        got: 0,
                    };
                }
                None
            },
            DecodeState::AwaitLength { bytes, got } => {
                bytes[*got as usize] = byte;
                *got += 1;
                if *got < self.width.num_bytes() {
                    return None;
                }
                let expected = match self.width {
                    LengthWidth::U8 => bytes[0] as usize,
                    LengthWidth::U16 => u16::from_be_bytes(*bytes) as usize,
                };
                if expected == 0 {
                    // 空帧是合法的，直接产出
                    self.state = DecodeState::AwaitHeader;
                    return Some(Vec::new());
                }
                self.state = DecodeState::AwaitPayload {
                    expected,
                    buf: Vec::with_capacity(expected),
                };
                None
            },
            DecodeState::AwaitPayload { expected, buf } => {
                buf.push(byte);
                if buf.len() < *expected {
                    return None;
                }
                let payload = std::mem::take(buf);
                self.state = DecodeState::AwaitHeader;
                Some(payload)
            },
        }
    }

    /// 推入一段字节，返回其中凑满的所有帧
    pub fn push_slice(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }
}

/// 编码一个请求帧（1 字节长度）
pub fn encode_request(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    encode(payload, LengthWidth::U8)
}

/// 编码一个响应帧（2 字节大端长度）
pub fn encode_response(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    encode(payload, LengthWidth::U16)
}

fn encode(payload: &[u8], width: LengthWidth) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > width.max_payload() {
        return Err(ProtocolError::FrameTooLong {
            len: payload.len(),
            max: width.max_payload(),
        });
    }
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(FRAME_HEADER);
    match width {
        LengthWidth::U8 => frame.push(payload.len() as u8),
        LengthWidth::U16 => frame.extend_from_slice(&(payload.len() as u16).to_be_bytes()),
    }
    frame.extend_from_slice(payload);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_all(width: LengthWidth, bytes: &[u8]) -> Vec<Vec<u8>> {
        FrameDecoder::new(width).push_slice(bytes)
    }

    #[test]
    fn test_request_roundtrip() {
        let payload = b"poll";
        let frame = encode_request(payload).unwrap();
        assert_eq!(frame[0], FRAME_HEADER);
        assert_eq!(frame[1], 4);
        let decoded = decode_all(LengthWidth::U8, &frame);
        assert_eq!(decoded, vec![payload.to_vec()]);
    }

    #[test]
    fn test_response_roundtrip_long_payload() {
        // 响应方向必须支持超过 255 字节的负载
        let payload = vec![b'x'; 300];
        let frame = encode_response(&payload).unwrap();
        assert_eq!(frame[0], FRAME_HEADER);
        assert_eq!(u16::from_be_bytes([frame[1], frame[2]]), 300);
        let decoded = decode_all(LengthWidth::U16, &frame);
        assert_eq!(decoded, vec![payload]);
    }

    #[test]
    fn test_length_field_asymmetry() {
        // 请求方向 256 字节放不下，响应方向可以
        let payload = vec![0u8; 256];
        assert!(matches!(
            encode_request(&payload),
            Err(ProtocolError::FrameTooLong { len: 256, max: 255 })
        ));
        assert!(encode_request(&payload[..255]).is_ok());
        assert!(encode_response(&payload).is_ok());
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut bytes = vec![0x12, 0x99, 0x00, 0xFE];
        bytes.extend_from_slice(&encode_request(b"reset_all").unwrap());
        let decoded = decode_all(LengthWidth::U8, &bytes);
        assert_eq!(decoded, vec![b"reset_all".to_vec()]);
    }

    #[test]
    fn test_resync_after_truncated_frame() {
        // 半截帧：声称 4 字节却只来了 2 字节，后续字节被当作负载吃掉；
        // 凑满之后解码器回到扫描状态，下一个完整帧正常产出
        let mut decoder = FrameDecoder::request();
        assert!(decoder.push_slice(&[FRAME_HEADER, 4, b'a', b'b']).is_empty());
        let flushed = decoder.push_slice(&[b'c', b'd']);
        assert_eq!(flushed, vec![b"abcd".to_vec()]);
        let next = decoder.push_slice(&encode_request(b"poll").unwrap());
        assert_eq!(next, vec![b"poll".to_vec()]);
    }

    #[test]
    fn test_empty_frame() {
        let frame = encode_request(b"").unwrap();
        assert_eq!(frame, vec![FRAME_HEADER, 0]);
        let decoded = decode_all(LengthWidth::U8, &frame);
        assert_eq!(decoded, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_header_byte_inside_payload() {
        // 负载里出现 0xAA 不能被误认成新帧头
        let payload = [0xAA, 0x01, 0xAA];
        let frame = encode_request(&payload).unwrap();
        let decoded = decode_all(LengthWidth::U8, &frame);
        assert_eq!(decoded, vec![payload.to_vec()]);
    }

    #[test]
    fn test_chunked_feed() {
        let frame = encode_request(b"md/0/Forward").unwrap();
        let mut decoder = FrameDecoder::request();
        let mut out = Vec::new();
        for chunk in frame.chunks(3) {
            out.extend(decoder.push_slice(chunk));
        }
        assert_eq!(out, vec![b"md/0/Forward".to_vec()]);
    }

    proptest! {
        #[test]
        fn prop_request_roundtrip(payload in proptest::collection::vec(any::<u8>(), 0..=255)) {
            let frame = encode_request(&payload).unwrap();
            let decoded = decode_all(LengthWidth::U8, &frame);
            prop_assert_eq!(decoded, vec![payload]);
        }

        #[test]
        fn prop_response_roundtrip(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let frame = encode_response(&payload).unwrap();
            let decoded = decode_all(LengthWidth::U16, &frame);
            prop_assert_eq!(decoded, vec![payload]);
        }

        #[test]
        fn prop_resync(garbage in proptest::collection::vec(
                           any::<u8>().prop_filter("not the frame header", |b| *b != FRAME_HEADER),
                           0..64),
                       payload in proptest::collection::vec(any::<u8>(), 1..=255)) {
            // 不含帧头的任意噪声前缀必须被整段丢弃，后面的帧原样恢复
            let mut bytes = garbage;
            bytes.extend_from_slice(&encode_request(&payload).unwrap());
            let decoded = decode_all(LengthWidth::U8, &bytes);
            prop_assert_eq!(decoded, vec![payload]);
        }
    }
}
