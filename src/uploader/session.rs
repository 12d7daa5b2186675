// 上传会话控制器
//
// 状态机: Created -> Uploading -> {Committed | Failed}
//
// 控制器独占会话和摘要聚合器的所有权：worker 只拿到只读的分片
// 描述符，结果通过调度器回收。只有调度器完全排空之后才会
// finalize 摘要，保证 finalize 之后不可能再有分片写入

use crate::boxapi::{CommittedFile, StorageService, UploadDestination, UploadSession};
use crate::payload::PayloadSource;
use crate::uploader::checksum::ChecksumAggregator;
use crate::uploader::part::PartUploader;
use crate::uploader::planner;
use crate::uploader::retry::RetryPolicy;
use crate::uploader::scheduler::UploadScheduler;
use crate::uploader::UploadError;
use anyhow::anyhow;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// 会话已创建
    Created,
    /// 分片上传中
    Uploading,
    /// 已提交（终态）
    Committed,
    /// 失败（终态）
    Failed,
}

/// 上传会话控制器
pub struct UploadSessionController {
    service: Arc<dyn StorageService>,
    payload: Arc<dyn PayloadSource>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    status: Mutex<SessionStatus>,
}

impl UploadSessionController {
    pub fn new(
        service: Arc<dyn StorageService>,
        payload: Arc<dyn PayloadSource>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            payload,
            policy,
            cancel,
            status: Mutex::new(SessionStatus::Created),
        }
    }

    /// 当前会话状态（诊断用）
    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    fn transition(&self, to: SessionStatus) {
        let mut status = self.status.lock();
        info!("会话状态: {:?} -> {:?}", *status, to);
        *status = to;
    }

    /// 执行一次完整的分块上传
    ///
    /// 成功返回提交后的文件；任何分片永久失败都不会触发 commit，
    /// 失败索引通过 `UploadError::PartsFailed` 上报
    pub async fn run(
        &self,
        file_name: &str,
        destination: &UploadDestination,
        concurrency: usize,
    ) -> Result<CommittedFile, UploadError> {
        let payload_size = self.payload.len();

        // 1. 创建会话
        let session = self
            .service
            .create_upload_session(payload_size, file_name, destination)
            .await?;
        info!(
            "ℹ️ 上传会话: id={}, part_size={}, total_parts={}",
            session.id, session.part_size, session.total_parts
        );

        match self.upload_and_commit(&session, concurrency, payload_size).await {
            Ok(file) => {
                self.transition(SessionStatus::Committed);
                info!("ℹ️ 上传完成. file_id: {}", file.id);
                Ok(file)
            }
            Err(e) => {
                self.transition(SessionStatus::Failed);
                error!("❌ 上传失败: {}", e);
                Err(e)
            }
        }
    }

    async fn upload_and_commit(
        &self,
        session: &UploadSession,
        concurrency: usize,
        payload_size: u64,
    ) -> Result<CommittedFile, UploadError> {
        // 2. 本地分片规划，必须与服务端报告一致
        let tasks = planner::plan(payload_size, session.part_size)?;
        if tasks.len() as u64 != session.total_parts {
            return Err(UploadError::ProtocolMismatch {
                planned: tasks.len(),
                reported: session.total_parts,
            });
        }

        // 3. 调度分片上传
        self.transition(SessionStatus::Uploading);
        let aggregator = Arc::new(ChecksumAggregator::new(tasks.len()));
        let uploader = Arc::new(PartUploader::new(
            self.service.clone(),
            self.payload.clone(),
            aggregator.clone(),
            self.policy,
        ));
        let scheduler = UploadScheduler::new(uploader, self.cancel.clone());
        let result = scheduler
            .run(Arc::new(session.clone()), tasks, concurrency)
            .await?;
        drop(scheduler);

        // 4. 任何永久失败都禁止提交
        if !result.is_fully_succeeded() {
            return Err(UploadError::PartsFailed {
                indices: result.failed_indices(),
            });
        }

        // 5. 调度器已排空，聚合器此时唯一持有，finalize 后不可能再有写入
        let aggregator = Arc::try_unwrap(aggregator)
            .map_err(|_| UploadError::Other(anyhow!("摘要聚合器仍被其他引用持有")))?;
        let digest = aggregator
            .finalize()
            .map_err(|e| UploadError::Other(anyhow::Error::new(e)))?;
        info!("负载摘要: sha1={}", digest.to_hex());

        // 6. 提交会话
        let file = self
            .service
            .commit_session(session, &digest.to_base64(), &result.uploaded_parts())
            .await?;
        Ok(file)
    }
}
