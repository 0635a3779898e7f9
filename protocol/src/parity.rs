//! 奇校验 ASCII 编解码
//!
//! 每个 7 位字符的最高位用作奇校验位；消息以两位十六进制 XOR 校验结尾。

/// 编码: 低 7 位中 1 的个数为偶数时置最高位
pub fn encode(byte: u8) -> u8 {
    let low = byte & 0x7f;
    if low.count_ones() % 2 == 0 {
        low | 0x80
    } else {
        low
    }
}

/// 解码: 清除最高位
pub fn decode(byte: u8) -> u8 {
    byte & 0x7f
}

/// 字节是否满足奇校验
pub fn is_odd_parity(byte: u8) -> bool {
    byte.count_ones() % 2 == 1
}

/// 编码字符串
pub fn encode_str(text: &str) -> Vec<u8> {
    text.bytes().map(encode).collect()
}

/// 解码为字符串（非 ASCII 字节按 7 位处理）
pub fn decode_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| decode(b) as char).collect()
}

/// XOR 校验
pub fn xor_checksum(text: &str) -> u8 {
    text.bytes().fold(0, |acc, b| acc ^ (b & 0x7f))
}

/// 两位小写十六进制校验串
pub fn checksum_hex(text: &str) -> String {
    format!("{:02x}", xor_checksum(text))
}

/// 构造完整消息: 正文 + 校验，全部奇校验编码
pub fn encode_message(body: &str) -> Vec<u8> {
    let mut framed = String::with_capacity(body.len() + 2);
    framed.push_str(body);
    framed.push_str(&checksum_hex(body));
    encode_str(&framed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_sets_odd_parity() {
        for b in 0u8..128 {
            assert!(is_odd_parity(encode(b)), "byte {b:#04x}");
        }
    }

    #[test]
    fn test_known_values() {
        // 'V' = 0x56 = 0101_0110，四个 1
        assert_eq!(encode(b'V'), 0xd6);
        // 'v' = 0x76 = 0111_0110，五个 1
        assert_eq!(encode(b'v'), 0x76);
    }

    #[test]
    fn test_string_roundtrip() {
        let samples = ["", "V", "v3130", "i0055mm\n", "s........"];
        for s in samples {
            assert_eq!(decode_bytes(&encode_str(s)), s);
        }
        let all: String = (0u8..128).map(|b| b as char).collect();
        assert_eq!(decode_bytes(&encode_str(&all)), all);
    }

    #[test]
    fn test_checksum_hex_lowercase() {
        assert_eq!(xor_checksum("v3130"), b'v' ^ b'3' ^ b'1' ^ b'3' ^ b'0');
        assert_eq!(checksum_hex("v3130"), "77");
        assert_eq!(checksum_hex("x"), "78");
    }

    #[test]
    fn test_encode_message() {
        let bytes = encode_message("V");
        assert_eq!(decode_bytes(&bytes), "V56");
        assert!(bytes.iter().all(|&b| is_odd_parity(b)));
    }
}
