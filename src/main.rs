use anyhow::{Context, Result};
use box_thread_upload::auth::{AuthSubject, BoxAuth, JwtSettings};
use box_thread_upload::boxapi::{BoxClient, UploadDestination};
use box_thread_upload::cli::{BenchmarkArgs, Cli, Command, UploadArgs};
use box_thread_upload::config::{AppConfig, DEFAULT_CONFIG_PATH};
use box_thread_upload::logging;
use box_thread_upload::payload::{FilePayload, FillerPayload, PayloadSource};
use box_thread_upload::uploader::{RetryPolicy, UploadSessionController};
use chrono::Local;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = AppConfig::load(Path::new(DEFAULT_CONFIG_PATH));

    // 日志守卫必须保持存活到退出前，保证文件层完成刷盘
    let log_guard = logging::init_logging(&config.log);

    let result = run(cli, &config).await;
    drop(log_guard);

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &AppConfig) -> Result<()> {
    match cli.command {
        Command::Upload(args) => {
            args.validate()?;
            run_upload(args, config).await
        }
        Command::Benchmark(args) => {
            args.validate()?;
            run_benchmark(args, config).await
        }
    }
}

/// 构建 Box 客户端
///
/// 指定了 --user 时先用服务账号校验用户存在，再切换为用户身份
async fn build_client(
    jwt_file: &Path,
    user: Option<u64>,
    config: &AppConfig,
) -> Result<BoxClient> {
    let settings = JwtSettings::from_file(jwt_file)?;

    let subject = match user {
        Some(user_id) => {
            let sa_auth = Arc::new(BoxAuth::new(
                settings.clone(),
                AuthSubject::Enterprise,
                reqwest::Client::new(),
            ));
            let sa_client = BoxClient::new(sa_auth, config.upload.request_timeout())?;
            sa_client
                .get_user(&user_id.to_string())
                .await
                .with_context(|| format!("用户 {user_id} 不存在"))?;
            AuthSubject::User(user_id.to_string())
        }
        None => AuthSubject::Enterprise,
    };

    let auth = Arc::new(BoxAuth::new(settings, subject, reqwest::Client::new()));
    Ok(BoxClient::new(auth, config.upload.request_timeout())?)
}

/// 上传前预检目标存在（文件夹或已有文件）
async fn preflight_destination(client: &BoxClient, destination: &UploadDestination) -> Result<()> {
    match destination {
        UploadDestination::Folder(folder_id) => {
            client
                .get_folder(folder_id)
                .await
                .with_context(|| format!("文件夹 {folder_id} 不存在"))?;
        }
        UploadDestination::ExistingFile(file_id) => {
            client
                .get_file(file_id)
                .await
                .with_context(|| format!("文件 {file_id} 不存在"))?;
        }
    }
    Ok(())
}

/// 跑一次完整的会话上传，支持 Ctrl+C 取消
async fn run_session(
    client: BoxClient,
    payload: Arc<dyn PayloadSource>,
    file_name: &str,
    destination: &UploadDestination,
    concurrency: usize,
    config: &AppConfig,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let policy = RetryPolicy::new(config.upload.max_retries, config.upload.retry_base_unit());
    let controller =
        UploadSessionController::new(Arc::new(client), payload, policy, cancel.clone());

    let fut = controller.run(file_name, destination, concurrency);
    tokio::pin!(fut);

    let file = tokio::select! {
        result = &mut fut => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C, 取消上传, 等待在途分片退出...");
            cancel.cancel();
            // 取消后等调度器排空再退出
            fut.await?
        }
    };

    info!("✓ 完成: file_id={}, name={}", file.id, file.name);
    Ok(())
}

async fn run_upload(args: UploadArgs, config: &AppConfig) -> Result<()> {
    let payload = FilePayload::open(&args.file)?;
    let file_name = args
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .context("文件名无效")?
        .to_string();
    let concurrency = args.concurrency.unwrap_or(config.upload.concurrency);
    let destination = args.destination();

    let client = build_client(&args.jwt_file, args.user, config).await?;
    preflight_destination(&client, &destination).await?;

    info!(
        "开始上传: file={:?}, size={}, concurrency={}",
        args.file,
        payload.len(),
        concurrency
    );
    run_session(
        client,
        Arc::new(payload),
        &file_name,
        &destination,
        concurrency,
        config,
    )
    .await
}

async fn run_benchmark(args: BenchmarkArgs, config: &AppConfig) -> Result<()> {
    let payload = FillerPayload::new(args.size);
    let file_name = format!(
        "upload-bench-{}.bench",
        Local::now().format("%Y-%m-%dT%H-%M-%S%.6f")
    );
    let concurrency = args.concurrency.unwrap_or(config.upload.concurrency);
    let destination = args.destination();

    let client = build_client(&args.jwt_file, args.user, config).await?;
    preflight_destination(&client, &destination).await?;

    info!(
        "开始基准测试: size={}, concurrency={}, file_name={}",
        args.size, concurrency, file_name
    );
    run_session(
        client,
        Arc::new(payload),
        &file_name,
        &destination,
        concurrency,
        config,
    )
    .await
}
