//! 板载链路帧编解码
//!
//! 长帧: `type, len_hi, len_lo, addr1, addr2, payload.., checksum`
//! 短帧: `type, addr1, addr2, payload.., checksum`
//!
//! 长度为 14 位大端（两个 7 位字段），等于整帧在线上的字节数；
//! 校验和为之前所有字节之和对 128 取模。

use std::collections::VecDeque;

use tracing::debug;

use crate::error::FramingError;
use crate::{LONG_FRAME_OVERHEAD, MAX_PACKET_LEN, SHORT_FRAME_OVERHEAD};

/// 帧形式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameForm {
    /// 带长度字段的长帧
    Long,
    /// 不带长度字段的短帧，负载长度固定
    Short { payload_len: usize },
}

/// 已解析的数据包
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub kind: u8,
    pub addr1: u8,
    pub addr2: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(kind: u8, addr1: u8, addr2: u8, payload: Vec<u8>) -> Self {
        Self {
            kind,
            addr1,
            addr2,
            payload,
        }
    }

    /// 包地址
    pub fn address(&self) -> (u8, u8) {
        (self.addr1, self.addr2)
    }

    /// 按指定形式编码
    pub fn encode(&self, form: FrameForm) -> Result<Vec<u8>, FramingError> {
        match form {
            FrameForm::Long => encode_long(self.kind, self.addr1, self.addr2, &self.payload),
            FrameForm::Short { .. } => Ok(encode_short(
                self.kind,
                self.addr1,
                self.addr2,
                &self.payload,
            )),
        }
    }
}

/// 计算校验和: 所有字节之和 mod 128
pub fn checksum(bytes: &[u8]) -> u8 {
    (bytes.iter().map(|&b| b as u32).sum::<u32>() % 128) as u8
}

/// 编码短帧
pub fn encode_short(kind: u8, addr1: u8, addr2: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + SHORT_FRAME_OVERHEAD);
    frame.push(kind);
    frame.push(addr1);
    frame.push(addr2);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame));
    frame
}

/// 编码长帧
pub fn encode_long(
    kind: u8,
    addr1: u8,
    addr2: u8,
    payload: &[u8],
) -> Result<Vec<u8>, FramingError> {
    let total = payload.len() + LONG_FRAME_OVERHEAD;
    if total > MAX_PACKET_LEN {
        return Err(FramingError::BadLength {
            declared: total,
            max: MAX_PACKET_LEN,
        });
    }

    let mut frame = Vec::with_capacity(total);
    frame.push(kind);
    frame.push(((total >> 7) & 0x7f) as u8);
    frame.push((total & 0x7f) as u8);
    frame.push(addr1);
    frame.push(addr2);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame));
    Ok(frame)
}

// ============================================================================
// 类型表
// ============================================================================

/// 类型字节 -> 帧形式
#[derive(Clone, Debug)]
pub struct FrameTable {
    forms: [Option<FrameForm>; 256],
}

impl FrameTable {
    /// 空表
    pub fn empty() -> Self {
        Self { forms: [None; 256] }
    }

    /// 注册类型
    pub fn with(mut self, kind: u8, form: FrameForm) -> Self {
        self.forms[kind as usize] = Some(form);
        self
    }

    pub fn get(&self, kind: u8) -> Option<FrameForm> {
        self.forms[kind as usize]
    }

    /// 棋盘发往主机的所有包类型（均为长帧）
    pub fn board_responses() -> Self {
        crate::command::INBOUND_TYPES
            .iter()
            .fold(Self::empty(), |table, &kind| table.with(kind, FrameForm::Long))
    }
}

// ============================================================================
// 解码器
// ============================================================================

/// 单字节喂入的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    /// 得到完整数据包
    Packet(Packet),
    /// 仍在组帧
    Partial,
    /// 缓冲区头部无法成帧，已丢弃一个字节
    Resync(FramingError),
}

/// 流式帧解码器
///
/// 每次调用最多产出一个数据包；`Resync` 之后缓冲区中可能已有完整帧，
/// 调用方应继续 `poll()` 直到返回 `Partial`。
pub struct FrameDecoder {
    table: FrameTable,
    buffer: VecDeque<u8>,
    /// 重新同步时丢弃的字节总数
    discarded: u64,
}

impl FrameDecoder {
    pub fn new(table: FrameTable) -> Self {
        Self {
            table,
            buffer: VecDeque::with_capacity(128),
            discarded: 0,
        }
    }

    /// 喂入一个字节
    pub fn feed(&mut self, byte: u8) -> Decoded {
        self.buffer.push_back(byte);
        self.poll()
    }

    /// 不喂入新字节，尝试从缓冲区再解析一帧
    pub fn poll(&mut self) -> Decoded {
        let Some(&kind) = self.buffer.front() else {
            return Decoded::Partial;
        };

        let Some(form) = self.table.get(kind) else {
            return self.resync(FramingError::UnknownType(kind));
        };

        let (total, header) = match form {
            FrameForm::Long => {
                if self.buffer.len() < 3 {
                    return Decoded::Partial;
                }
                let (hi, lo) = (self.buffer[1], self.buffer[2]);
                let total = ((hi as usize & 0x7f) << 7) | (lo as usize & 0x7f);
                if hi & 0x80 != 0
                    || lo & 0x80 != 0
                    || total < LONG_FRAME_OVERHEAD
                    || total > MAX_PACKET_LEN
                {
                    return self.resync(FramingError::BadLength {
                        declared: total,
                        max: MAX_PACKET_LEN,
                    });
                }
                (total, 3)
            }
            FrameForm::Short { payload_len } => (payload_len + SHORT_FRAME_OVERHEAD, 1),
        };

        if self.buffer.len() < total {
            return Decoded::Partial;
        }

        let expected = checksum_deque(&self.buffer, total - 1);
        let actual = self.buffer[total - 1];
        if expected != actual {
            return self.resync(FramingError::Checksum { expected, actual });
        }

        let frame: Vec<u8> = self.buffer.drain(..total).collect();
        let addr1 = frame[header];
        let addr2 = frame[header + 1];
        let payload = frame[header + 2..total - 1].to_vec();
        Decoded::Packet(Packet::new(kind, addr1, addr2, payload))
    }

    /// 丢弃缓冲区头部一个字节
    fn resync(&mut self, error: FramingError) -> Decoded {
        if let Some(byte) = self.buffer.pop_front() {
            self.discarded += 1;
            debug!(
                "丢弃字节 {:#04x} 重新同步: {} (剩余 {} 字节)",
                byte,
                error,
                self.buffer.len()
            );
        }
        Decoded::Resync(error)
    }

    /// 缓冲字节数
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// 重新同步累计丢弃的字节数
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// 清空缓冲区
    pub fn clear(&mut self) {
        if !self.buffer.is_empty() {
            debug!("清空解码缓冲区，丢弃 {} 字节", self.buffer.len());
            self.discarded += self.buffer.len() as u64;
        }
        self.buffer.clear();
    }
}

fn checksum_deque(buffer: &VecDeque<u8>, len: usize) -> u8 {
    (buffer.iter().take(len).map(|&b| b as u32).sum::<u32>() % 128) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(
            FrameTable::empty()
                .with(0x85, FrameForm::Long)
                .with(0x90, FrameForm::Long)
                .with(0x46, FrameForm::Short { payload_len: 0 }),
        )
    }

    fn feed_all(decoder: &mut FrameDecoder, bytes: &[u8]) -> Vec<Packet> {
        let mut packets = Vec::new();
        for &b in bytes {
            let mut step = decoder.feed(b);
            loop {
                match step {
                    Decoded::Packet(p) => {
                        packets.push(p);
                        step = decoder.poll();
                    }
                    Decoded::Resync(_) => step = decoder.poll(),
                    Decoded::Partial => break,
                }
            }
        }
        packets
    }

    #[test]
    fn test_encode_short_discovery() {
        assert_eq!(encode_short(0x46, 0, 0, &[]), vec![0x46, 0x00, 0x00, 0x46]);
    }

    #[test]
    fn test_encode_long_layout() {
        let frame = encode_long(0xb1, 0x06, 0x50, &[0x4c, 0x08]).unwrap();
        assert_eq!(&frame[..5], &[0xb1, 0x00, 0x08, 0x06, 0x50]);
        assert_eq!(frame.len(), 8);
        let sum: u32 = frame[..7].iter().map(|&b| b as u32).sum();
        assert_eq!(frame[7] as u32, sum % 128);
    }

    #[test]
    fn test_long_length_spans_two_fields() {
        let payload = vec![0u8; 200];
        let frame = encode_long(0x85, 1, 2, &payload).unwrap();
        let declared = ((frame[1] as usize) << 7) | frame[2] as usize;
        assert_eq!(declared, frame.len());
        assert_eq!(frame[1], 1);
    }

    #[test]
    fn test_encode_long_rejects_oversize() {
        let payload = vec![0u8; MAX_PACKET_LEN];
        assert!(matches!(
            encode_long(0x85, 0, 0, &payload),
            Err(FramingError::BadLength { .. })
        ));
    }

    #[test]
    fn test_feed_long_roundtrip() {
        let mut dec = decoder();
        let frame = encode_long(0x85, 0x06, 0x50, &[1, 2, 3, 0x40, 0x0c]).unwrap();
        let (last, head) = frame.split_last().unwrap();
        for &b in head {
            assert_eq!(dec.feed(b), Decoded::Partial);
        }
        assert_eq!(
            dec.feed(*last),
            Decoded::Packet(Packet::new(0x85, 0x06, 0x50, vec![1, 2, 3, 0x40, 0x0c]))
        );
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn test_feed_short_form() {
        let mut dec = decoder();
        let packets = feed_all(&mut dec, &encode_short(0x46, 0, 0, &[]));
        assert_eq!(packets, vec![Packet::new(0x46, 0, 0, vec![])]);
    }

    #[test]
    fn test_unknown_type_resyncs() {
        let mut dec = decoder();
        assert_eq!(
            dec.feed(0x12),
            Decoded::Resync(FramingError::UnknownType(0x12))
        );
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn test_checksum_mismatch_discards_one_byte() {
        let mut dec = decoder();
        let mut frame = encode_long(0x90, 0x06, 0x50, &[]).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x01;
        let mut saw_resync = false;
        for &b in &frame {
            if let Decoded::Resync(FramingError::Checksum { .. }) = dec.feed(b) {
                saw_resync = true;
            }
        }
        assert!(saw_resync);
    }

    #[test]
    fn test_recovers_after_garbage() {
        let mut dec = decoder();
        let mut stream = vec![0x01, 0x85, 0x7f];
        let good = encode_long(0x90, 0x06, 0x50, &[]).unwrap();
        stream.extend_from_slice(&good);
        let packets = feed_all(&mut dec, &stream);
        assert_eq!(packets, vec![Packet::new(0x90, 0x06, 0x50, vec![])]);
        // 0x01 未知类型，0x85 长度非法，0x7f 未知类型
        assert_eq!(dec.discarded(), 3);
    }

    #[test]
    fn test_clear_counts_discarded_bytes() {
        let mut dec = decoder();
        assert_eq!(dec.feed(0x85), Decoded::Partial);
        assert_eq!(dec.feed(0x00), Decoded::Partial);
        dec.clear();
        assert_eq!(dec.buffered(), 0);
        assert_eq!(dec.discarded(), 2);
    }

    #[test]
    fn test_back_to_back_packets() {
        let mut dec = decoder();
        let mut stream = encode_long(0x85, 0x06, 0x50, &[0x41, 0x1c]).unwrap();
        stream.extend(encode_long(0x90, 0x06, 0x50, &[]).unwrap());
        let packets = feed_all(&mut dec, &stream);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].payload, vec![0x41, 0x1c]);
        assert_eq!(packets[1].kind, 0x90);
    }

    #[test]
    fn test_random_long_frames_roundtrip() {
        let mut rng = rand::thread_rng();
        let mut dec = decoder();
        for _ in 0..200 {
            let len = rng.gen_range(0..300);
            let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let a1 = rng.gen();
            let a2 = rng.gen();
            let frame = encode_long(0x85, a1, a2, &payload).unwrap();

            let declared = ((frame[1] as usize) << 7) | frame[2] as usize;
            assert_eq!(declared, frame.len());
            assert_eq!(frame[frame.len() - 1], checksum(&frame[..frame.len() - 1]));

            let packets = feed_all(&mut dec, &frame);
            assert_eq!(packets, vec![Packet::new(0x85, a1, a2, payload)]);
        }
    }
}
