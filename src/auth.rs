//! # 授权模块
//!
//! 在交易修改任何存储之前检查输入携带的签名。

use log::debug;
use num_bigint::BigUint;
use ripemd::Ripemd160;
use secp256k1::{ecdsa, Message, PublicKey, Secp256k1, VerifyOnly};
use sha2::{Digest, Sha256};

use crate::error::{LedgerError, LedgerResult};
use crate::transaction::{EcdsaSignature, Transaction, TxInput};

/// 授权能力：判断某个输入是否有权对给定消息进行花费或发行
pub trait Authorizer {
    fn verify_authorization(&self, input: &TxInput, message: &[u8]) -> bool;
}

/// 不做任何检查，保持旧节点的行为
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Authorizer for AcceptAll {
    fn verify_authorization(&self, _input: &TxInput, _message: &[u8]) -> bool {
        true
    }
}

/// 使用secp256k1校验解锁脚本中的签名
pub struct Secp256k1Authorizer {
    secp: Secp256k1<VerifyOnly>,
}

impl Secp256k1Authorizer {
    pub fn new() -> Self {
        Secp256k1Authorizer {
            secp: Secp256k1::verification_only(),
        }
    }
}

impl Default for Secp256k1Authorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Authorizer for Secp256k1Authorizer {
    fn verify_authorization(&self, input: &TxInput, message: &[u8]) -> bool {
        let script = &input.unlocking_script;
        let public_key = match PublicKey::from_slice(&script.public_key) {
            Ok(key) => key,
            Err(e) => {
                debug!("rejecting input with unparseable public key: {}", e);
                return false;
            }
        };
        // 发行证明必须由引用中记录的债权人身份签署
        if input.is_debt_attestation() && script.public_key != input.reference {
            return false;
        }
        let mut signature = match signature_from_components(&script.signature) {
            Some(sig) => sig,
            None => return false,
        };
        signature.normalize_s();
        let message = match Message::from_slice(message) {
            Ok(message) => message,
            Err(_) => return false,
        };
        self.secp
            .verify_ecdsa(&message, &signature, &public_key)
            .is_ok()
    }
}

/// 校验交易的每一个输入都对交易的签名哈希授权
pub fn authorize_transaction(authorizer: &dyn Authorizer, tx: &Transaction) -> LedgerResult<()> {
    let message = tx.signing_hash();
    for (index, input) in tx.inputs.iter().enumerate() {
        if !authorizer.verify_authorization(input, &message) {
            return Err(LedgerError::Unauthorized { index });
        }
    }
    Ok(())
}

/// 将(R, S)转换为紧凑格式签名，任一分量超过32字节时返回 `None`
pub fn signature_from_components(sig: &EcdsaSignature) -> Option<ecdsa::Signature> {
    let mut compact = [0u8; 64];
    write_scalar(&sig.r, &mut compact[..32])?;
    write_scalar(&sig.s, &mut compact[32..])?;
    ecdsa::Signature::from_compact(&compact).ok()
}

pub fn components_from_signature(sig: &ecdsa::Signature) -> EcdsaSignature {
    let compact = sig.serialize_compact();
    EcdsaSignature {
        r: BigUint::from_bytes_be(&compact[..32]),
        s: BigUint::from_bytes_be(&compact[32..]),
    }
}

fn write_scalar(value: &BigUint, out: &mut [u8]) -> Option<()> {
    let bytes = value.to_bytes_be();
    if bytes.len() > out.len() {
        return None;
    }
    let offset = out.len() - bytes.len();
    out[offset..].copy_from_slice(&bytes);
    Some(())
}

/// 公钥哈希：SHA-256之后再做RIPEMD160
pub fn key_hash(public_key: &PublicKey) -> Vec<u8> {
    let sha = Sha256::digest(public_key.serialize_uncompressed());
    Ripemd160::digest(sha).to_vec()
}
