//! 规范JSON编码所需的serde辅助模块。
//!
//! 字节字段编码为带填充的标准base64字符串，签名分量编码为任意精度的JSON数字，
//! 与已部署节点产生的交易字节保持一致，从而保证各副本计算出相同的交易哈希。

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;

/// 信封中内层交易使用的URL安全base64：编码时不填充，解码时忽略填充
pub const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn encode_url(bytes: &[u8]) -> String {
    URL_SAFE_LENIENT.encode(bytes)
}

pub fn decode_url(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_LENIENT.decode(text.trim())
}

/// `Vec<u8>` <-> 标准base64字符串，`null` 解码为空字节串
pub mod bytes_b64 {
    use super::*;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => STANDARD.decode(text.as_bytes()).map_err(D::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

/// `BigUint` <-> 不带引号的十进制JSON数字
pub mod bigint_number {
    use num_bigint::BigUint;
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::value::RawValue;

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = RawValue::from_string(value.to_str_radix(10)).map_err(S::Error::custom)?;
        raw.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let raw = match Option::<Box<RawValue>>::deserialize(deserializer)? {
            Some(raw) => raw,
            None => return Ok(BigUint::default()),
        };
        let digits = raw.get().trim().trim_matches('"');
        if digits == "null" {
            return Ok(BigUint::default());
        }
        BigUint::parse_bytes(digits.as_bytes(), 10)
            .ok_or_else(|| D::Error::custom(format!("invalid unsigned integer: {}", digits)))
    }
}
