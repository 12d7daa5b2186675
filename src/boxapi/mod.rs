// Box 存储服务模块
//
// 上传引擎只依赖 StorageService trait，传输层实现（BoxClient）可替换

pub mod client;
pub mod types;

pub use client::BoxClient;
pub use types::{
    CommittedFile, StorageError, UploadDestination, UploadSession, UploadedPart,
};

use async_trait::async_trait;

/// 存储服务接口
///
/// 分块上传协议的三个操作：建会话、传分片、提交。
/// 上传引擎（UploadSessionController / PartUploader）只通过这个接口
/// 访问远端，测试时用内存 mock 替换
#[async_trait]
pub trait StorageService: Send + Sync {
    /// 创建分块上传会话
    ///
    /// 服务端返回会话 ID、分片大小和总分片数
    async fn create_upload_session(
        &self,
        payload_size: u64,
        file_name: &str,
        destination: &UploadDestination,
    ) -> Result<UploadSession, StorageError>;

    /// 上传单个分片
    ///
    /// `offset` 为分片在负载中的起始偏移，`total_size` 为负载总大小
    async fn upload_part(
        &self,
        session: &UploadSession,
        bytes: &[u8],
        offset: u64,
        total_size: u64,
    ) -> Result<UploadedPart, StorageError>;

    /// 提交会话
    ///
    /// `digest` 为整个负载的 SHA-1（base64），服务端校验后合并分片
    async fn commit_session(
        &self,
        session: &UploadSession,
        digest: &str,
        parts: &[UploadedPart],
    ) -> Result<CommittedFile, StorageError>;
}
