// Box 分块并发上传工具
//
// 模块划分：
// - cli: 命令行定义与校验
// - config: 应用配置（toml）
// - logging: tracing 日志初始化
// - auth: Box JWT 认证
// - boxapi: 存储服务接口与 Box 客户端
// - payload: 负载数据源（本地文件 / 合成填充）
// - uploader: 分块上传引擎（规划、重试、摘要、调度、会话控制）

pub mod auth;
pub mod boxapi;
pub mod cli;
pub mod config;
pub mod logging;
pub mod payload;
pub mod uploader;
