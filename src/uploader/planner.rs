// 分片规划
//
// 纯函数：把 [0, payload_size) 按固定分片大小切成有序分片列表。
// 分片大小由服务端在会话创建时指定，这里只负责切分

use crate::uploader::UploadError;

/// 分片任务描述符
///
/// 只读，worker 之间按值传递；分片状态和重试计数由调度器的
/// outcome 记录维护
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartTask {
    /// 分片索引（0 起，决定摘要喂入顺序）
    pub index: usize,
    /// 分片起始偏移（= index * part_size）
    pub offset: u64,
    /// 分片大小（末片可能小于 part_size）
    pub size: u64,
}

impl PartTask {
    /// 分片覆盖的字节范围 `[offset, offset + size)`
    pub fn range(&self) -> std::ops::Range<u64> {
        self.offset..self.offset + self.size
    }
}

/// 计算分片列表
///
/// `total_parts = ceil(payload_size / part_size)`；
/// 所有分片范围恰好无缝无重叠地覆盖 `[0, payload_size)`
pub fn plan(payload_size: u64, part_size: u64) -> Result<Vec<PartTask>, UploadError> {
    if payload_size < 1 || part_size < 1 {
        return Err(UploadError::InvalidSize {
            payload_size,
            part_size,
        });
    }

    let total_parts = payload_size.div_ceil(part_size);
    let mut tasks = Vec::with_capacity(total_parts as usize);

    for index in 0..total_parts {
        let offset = index * part_size;
        let size = part_size.min(payload_size - offset);
        tasks.push(PartTask {
            index: index as usize,
            offset,
            size,
        });
    }

    Ok(tasks)
}
