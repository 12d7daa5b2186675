// Box 客户端实现
//
// 分块上传协议（upload session）：
// - 创建会话: POST /files/upload_sessions（或 /files/{id}/upload_sessions 传新版本）
// - 上传分片: PUT /files/upload_sessions/{id}，content-range + digest 头
// - 提交会话: POST /files/upload_sessions/{id}/commit，携带分片列表和整体摘要
//
// 所有错误都映射为 StorageError，由上层的 RetryPolicy 决定是否重试

use crate::auth::BoxAuth;
use crate::boxapi::types::{
    CommittedFile, StorageError, UploadDestination, UploadSession, UploadedPart,
};
use crate::boxapi::StorageService;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Box API 基础地址
const API_BASE: &str = "https://api.box.com/2.0";

/// Box 上传 API 基础地址（独立域名）
const UPLOAD_BASE: &str = "https://upload.box.com/api/2.0";

/// Box 客户端
#[derive(Clone)]
pub struct BoxClient {
    /// HTTP 客户端
    http: reqwest::Client,
    /// JWT 认证器
    auth: Arc<BoxAuth>,
}

/// 会话创建响应
#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    part_size: u64,
    total_parts: u64,
}

/// 分片上传响应
#[derive(Debug, Deserialize)]
struct PartResponse {
    part: PartRecord,
}

#[derive(Debug, Deserialize)]
struct PartRecord {
    part_id: String,
    offset: u64,
    size: u64,
    sha1: String,
}

/// commit 响应
#[derive(Debug, Deserialize)]
struct CommitResponse {
    entries: Vec<CommittedFile>,
}

/// 用户/文件夹/文件查询响应（预检用，只关心 id 和 name）
#[derive(Debug, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl BoxClient {
    /// 创建新的 Box 客户端
    pub fn new(auth: Arc<BoxAuth>, request_timeout: Duration) -> Result<Self, StorageError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StorageError::Network(format!("HTTP 客户端创建失败: {e}")))?;
        Ok(Self { http, auth })
    }

    async fn bearer(&self) -> Result<String, StorageError> {
        self.auth
            .access_token()
            .await
            .map_err(|e| StorageError::Auth(e.to_string()))
    }

    /// reqwest 错误映射（区分超时和一般网络错误）
    fn map_transport_error(e: reqwest::Error) -> StorageError {
        if e.is_timeout() {
            StorageError::Timeout(e.to_string())
        } else {
            StorageError::Network(e.to_string())
        }
    }

    /// 读取错误响应体并按状态码分类
    async fn error_from_response(response: reqwest::Response) -> StorageError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        StorageError::from_status(status, message)
    }

    /// 查询当前用户（验证 --user 指定的用户存在）
    pub async fn get_user(&self, user_id: &str) -> Result<RemoteItem, StorageError> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(format!("{API_BASE}/users/{user_id}"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        response
            .json::<RemoteItem>()
            .await
            .map_err(Self::map_transport_error)
    }

    /// 查询文件夹（上传前预检目标存在）
    pub async fn get_folder(&self, folder_id: &str) -> Result<RemoteItem, StorageError> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(format!("{API_BASE}/folders/{folder_id}"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if response.status().as_u16() == 404 {
            return Err(StorageError::FolderNotFound(folder_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        response
            .json::<RemoteItem>()
            .await
            .map_err(Self::map_transport_error)
    }

    /// 查询文件（--file-id 预检）
    pub async fn get_file(&self, file_id: &str) -> Result<RemoteItem, StorageError> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(format!("{API_BASE}/files/{file_id}"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if response.status().as_u16() == 404 {
            return Err(StorageError::FileNotFound(file_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        response
            .json::<RemoteItem>()
            .await
            .map_err(Self::map_transport_error)
    }
}

#[async_trait]
impl StorageService for BoxClient {
    async fn create_upload_session(
        &self,
        payload_size: u64,
        file_name: &str,
        destination: &UploadDestination,
    ) -> Result<UploadSession, StorageError> {
        let token = self.bearer().await?;

        let (url, body) = match destination {
            UploadDestination::Folder(folder_id) => (
                format!("{UPLOAD_BASE}/files/upload_sessions"),
                json!({
                    "folder_id": folder_id,
                    "file_size": payload_size,
                    "file_name": file_name,
                }),
            ),
            UploadDestination::ExistingFile(file_id) => (
                format!("{UPLOAD_BASE}/files/{file_id}/upload_sessions"),
                json!({
                    "file_size": payload_size,
                    "file_name": file_name,
                }),
            ),
        };

        debug!("创建上传会话: file_name={}, size={}", file_name, payload_size);
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let session: SessionResponse =
            response.json().await.map_err(Self::map_transport_error)?;

        info!(
            "上传会话已创建: id={}, part_size={}, total_parts={}",
            session.id, session.part_size, session.total_parts
        );

        Ok(UploadSession {
            id: session.id,
            part_size: session.part_size,
            total_parts: session.total_parts,
        })
    }

    async fn upload_part(
        &self,
        session: &UploadSession,
        bytes: &[u8],
        offset: u64,
        total_size: u64,
    ) -> Result<UploadedPart, StorageError> {
        let token = self.bearer().await?;

        // 分片 SHA-1，Box 要求 digest: sha=<base64> 头
        let part_sha1 = Sha1::digest(bytes);
        let digest_header = format!(
            "sha={}",
            base64::engine::general_purpose::STANDARD.encode(part_sha1)
        );
        let range_header = format!(
            "bytes {}-{}/{}",
            offset,
            offset + bytes.len() as u64 - 1,
            total_size
        );

        let response = self
            .http
            .put(format!("{UPLOAD_BASE}/files/upload_sessions/{}", session.id))
            .bearer_auth(token)
            .header("content-type", "application/octet-stream")
            .header("content-range", range_header)
            .header("digest", digest_header)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let part: PartResponse = response.json().await.map_err(Self::map_transport_error)?;

        Ok(UploadedPart {
            part_id: part.part.part_id,
            offset: part.part.offset,
            size: part.part.size,
            sha1: part.part.sha1,
        })
    }

    async fn commit_session(
        &self,
        session: &UploadSession,
        digest: &str,
        parts: &[UploadedPart],
    ) -> Result<CommittedFile, StorageError> {
        let token = self.bearer().await?;

        let body = json!({
            "parts": parts
                .iter()
                .map(|p| json!({
                    "part_id": p.part_id,
                    "offset": p.offset,
                    "size": p.size,
                    "sha1": p.sha1,
                }))
                .collect::<Vec<_>>(),
        });

        info!("提交上传会话: id={}, parts={}", session.id, parts.len());
        let response = self
            .http
            .post(format!(
                "{UPLOAD_BASE}/files/upload_sessions/{}/commit",
                session.id
            ))
            .bearer_auth(token)
            .header("digest", format!("sha={digest}"))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status().as_u16();
        // 服务端以 409/412/422 拒绝摘要不一致的提交
        if matches!(status, 409 | 412 | 422) {
            return Err(StorageError::DigestMismatch);
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let commit: CommitResponse = response.json().await.map_err(Self::map_transport_error)?;
        commit.entries.into_iter().next().ok_or_else(|| {
            StorageError::Service {
                status,
                message: "commit 响应缺少文件记录".to_string(),
            }
        })
    }
}
