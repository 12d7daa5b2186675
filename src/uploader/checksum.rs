// 顺序摘要聚合器
//
// SHA-1 本身是有状态的串行原语，多个 worker 乱序喂入会得到依赖
// 完成顺序的错误摘要。聚合器用互斥锁保护哈希状态，并且严格按
// 分片索引升序喂入：乱序到达的分片先缓存，等它的前驱喂完再喂。
// 最坏情况（全部乱序完成）缓存量以负载大小为上界，这是为正确性
// 接受的代价

use base64::Engine;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use thiserror::Error;

/// 负载整体摘要（SHA-1）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadDigest([u8; 20]);

impl PayloadDigest {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// 十六进制表示（日志用）
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// base64 表示（`digest: sha=` 头的格式）
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }
}

/// 聚合器错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChecksumError {
    /// 同一分片被记录两次
    #[error("分片 #{0} 已被记录过")]
    DuplicatePart(usize),

    /// 分片索引越界
    #[error("分片索引越界: {index} (总分片数 {total})")]
    OutOfRange { index: usize, total: usize },

    /// 还有分片未记录就调用了 finalize
    #[error("摘要未完成: 已喂入 {fed}/{total} 片")]
    Incomplete { fed: usize, total: usize },
}

struct AggregatorInner {
    hasher: Sha1,
    total_parts: usize,
    /// 下一个待喂入哈希的分片索引
    next_index: usize,
    /// 乱序到达、等待前驱的分片数据
    pending: BTreeMap<usize, Vec<u8>>,
}

/// 顺序摘要聚合器
///
/// `record` 可以从任意 worker 并发调用（每个分片恰好一次）；
/// `finalize` 在全部分片记录完成后调用恰好一次（消耗 self 保证）
pub struct ChecksumAggregator {
    inner: Mutex<AggregatorInner>,
}

impl ChecksumAggregator {
    pub fn new(total_parts: usize) -> Self {
        Self {
            inner: Mutex::new(AggregatorInner {
                hasher: Sha1::new(),
                total_parts,
                next_index: 0,
                pending: BTreeMap::new(),
            }),
        }
    }

    /// 记录一个上传成功的分片
    ///
    /// 轮到的分片立即喂入哈希并顺带排空 pending 中连上的后继；
    /// 没轮到的先缓存
    pub fn record(&self, index: usize, bytes: &[u8]) -> Result<(), ChecksumError> {
        let mut inner = self.inner.lock();

        if index >= inner.total_parts {
            return Err(ChecksumError::OutOfRange {
                index,
                total: inner.total_parts,
            });
        }
        if index < inner.next_index || inner.pending.contains_key(&index) {
            return Err(ChecksumError::DuplicatePart(index));
        }

        if index == inner.next_index {
            inner.hasher.update(bytes);
            inner.next_index += 1;

            // 前驱补齐后，连续的缓存分片一并喂入
            loop {
                let next = inner.next_index;
                match inner.pending.remove(&next) {
                    Some(buffered) => {
                        inner.hasher.update(&buffered);
                        inner.next_index += 1;
                    }
                    None => break,
                }
            }
        } else {
            inner.pending.insert(index, bytes.to_vec());
        }

        Ok(())
    }

    /// 已记录的分片数（含缓存中的乱序分片）
    pub fn recorded_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.next_index + inner.pending.len()
    }

    /// 完成摘要计算
    ///
    /// 只有全部分片都已喂入才允许；消耗 self，保证只能调用一次，
    /// 此后不可能再有分片写入
    pub fn finalize(self) -> Result<PayloadDigest, ChecksumError> {
        let inner = self.inner.into_inner();
        if inner.next_index != inner.total_parts {
            return Err(ChecksumError::Incomplete {
                fed: inner.next_index,
                total: inner.total_parts,
            });
        }
        Ok(PayloadDigest(inner.hasher.finalize().into()))
    }
}
