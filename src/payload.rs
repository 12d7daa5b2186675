// 负载数据源
//
// 上传引擎按分片范围读取数据，不关心数据来自本地文件还是合成填充。
// FilePayload 在 spawn_blocking 里 seek + read_exact，避免阻塞调度器

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// benchmark 合成负载的填充字节
pub const FILLER_BYTE: u8 = b'a';

/// 负载数据源
#[async_trait]
pub trait PayloadSource: Send + Sync {
    /// 负载总大小（字节）
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 读取 `[offset, offset + len)` 范围的字节
    async fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>>;
}

/// 本地文件负载
#[derive(Debug, Clone)]
pub struct FilePayload {
    path: PathBuf,
    size: u64,
}

impl FilePayload {
    /// 打开本地文件，失败（不存在/不可读）视为校验错误
    pub fn open(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("文件不存在或不可读: {:?}", path))?;
        if !metadata.is_file() {
            anyhow::bail!("不是普通文件: {:?}", path);
        }
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
        })
    }
}

#[async_trait]
impl PayloadSource for FilePayload {
    fn len(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut file =
                std::fs::File::open(&path).with_context(|| format!("无法打开文件: {:?}", path))?;
            file.seek(SeekFrom::Start(offset)).context("文件定位失败")?;

            let mut buffer = vec![0u8; len as usize];
            file.read_exact(&mut buffer).context("读取分片数据失败")?;
            Ok(buffer)
        })
        .await
        .context("读取任务异常退出")?
    }
}

/// 合成填充负载（benchmark 用）
///
/// 不在内存里持有整个负载，分片数据按需生成
#[derive(Debug, Clone, Copy)]
pub struct FillerPayload {
    size: u64,
    fill: u8,
}

impl FillerPayload {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            fill: FILLER_BYTE,
        }
    }
}

#[async_trait]
impl PayloadSource for FillerPayload {
    fn len(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        if offset + len > self.size {
            anyhow::bail!(
                "读取范围越界: offset={}, len={}, size={}",
                offset,
                len,
                self.size
            );
        }
        Ok(vec![self.fill; len as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_file_payload_read_range() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();

        let payload = FilePayload::open(file.path()).unwrap();
        assert_eq!(payload.len(), 10);

        let bytes = payload.read_range(3, 4).await.unwrap();
        assert_eq!(bytes, b"3456");

        // 越界读取必须报错
        assert!(payload.read_range(8, 4).await.is_err());
    }

    #[test]
    fn test_file_payload_missing() {
        assert!(FilePayload::open(Path::new("/nonexistent/payload.bin")).is_err());
    }

    #[tokio::test]
    async fn test_filler_payload() {
        let payload = FillerPayload::new(10);
        assert_eq!(payload.len(), 10);

        let bytes = payload.read_range(0, 10).await.unwrap();
        assert_eq!(bytes, vec![FILLER_BYTE; 10]);

        let tail = payload.read_range(8, 2).await.unwrap();
        assert_eq!(tail.len(), 2);

        assert!(payload.read_range(8, 3).await.is_err());
    }
}
