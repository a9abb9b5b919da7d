//! 提交摘要：默认对区块交易哈希构建默克尔树，另保留旧节点仅编码高度的摘要以便迁移。

use serde::{Deserialize, Serialize};

use crate::transaction::sha256;

/// 提交摘要模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DigestMode {
    /// 链式默克尔根，证明实际账本内容
    Merkle,
    /// 旧节点行为：8字节缓冲区中的zig-zag变长高度
    LegacyHeight,
}

impl Default for DigestMode {
    fn default() -> Self {
        DigestMode::Merkle
    }
}

/// 有序二叉哈希树的根；叶子为 SHA-256(交易哈希)，内部节点为 SHA-256(左 ‖ 右)
///
/// 奇数个节点时在 (n + 1) / 2 处切分，左子树较大。空列表返回 `None`。
pub fn merkle_root(hashes: &[Vec<u8>]) -> Option<Vec<u8>> {
    match hashes.len() {
        0 => None,
        1 => Some(sha256(&hashes[0])),
        n => {
            let split = (n + 1) / 2;
            let left = merkle_root(&hashes[..split])?;
            let right = merkle_root(&hashes[split..])?;
            let mut joined = left;
            joined.extend_from_slice(&right);
            Some(sha256(&joined))
        }
    }
}

/// 把本区块的默克尔根链接到上一个应用哈希；空区块保持上一个哈希不变
pub fn chain_app_hash(previous: &[u8], block_hashes: &[Vec<u8>]) -> Vec<u8> {
    match merkle_root(block_hashes) {
        Some(root) => {
            let mut joined = previous.to_vec();
            joined.extend_from_slice(&root);
            sha256(&joined)
        }
        None => previous.to_vec(),
    }
}

/// 旧节点的高度摘要：zig-zag变长编码，小端7位分组，写入至少8字节的零填充缓冲区
pub fn legacy_height_digest(height: i64) -> Vec<u8> {
    let mut zigzag = ((height << 1) ^ (height >> 63)) as u64;
    let mut buf = Vec::with_capacity(8);
    while zigzag >= 0x80 {
        buf.push((zigzag as u8) | 0x80);
        zigzag >>= 7;
    }
    buf.push(zigzag as u8);
    if buf.len() < 8 {
        buf.resize(8, 0);
    }
    buf
}
