// 命令行定义与校验
//
// 所有校验都在任何网络调用之前完成；校验失败直接以退出码 1 结束，
// 错误信息写到 stderr

use crate::boxapi::UploadDestination;
use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// benchmark 负载的最小字节数（Box 分块上传协议的下限）
pub const MIN_BENCHMARK_SIZE: u64 = 2_000_001;

#[derive(Debug, Parser)]
#[command(
    name = "box-thread-upload",
    version,
    about = "Box 分块并发上传工具",
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// 上传本地文件
    Upload(UploadArgs),
    /// 用合成负载做上传基准测试
    Benchmark(BenchmarkArgs),
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Box JWT 配置文件（boxsdk JSON 格式）
    pub jwt_file: PathBuf,

    /// 要上传的文件
    pub file: PathBuf,

    /// Box 用户 ID（缺省使用服务账号）
    #[arg(long)]
    pub user: Option<u64>,

    /// 目标文件夹 ID（0 为根目录）
    #[arg(long, default_value_t = 0)]
    pub folder: u64,

    /// 覆盖已有文件（上传新版本）；不能与非根 --folder 同时使用
    #[arg(long = "file-id")]
    pub file_id: Option<u64>,

    /// 并发 worker 数（缺省取配置文件，默认 4）
    #[arg(long)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Args)]
pub struct BenchmarkArgs {
    /// Box JWT 配置文件（boxsdk JSON 格式）
    pub jwt_file: PathBuf,

    /// 负载大小（字节，至少 2000001）
    pub size: u64,

    /// Box 用户 ID（缺省使用服务账号）
    #[arg(long)]
    pub user: Option<u64>,

    /// 目标文件夹 ID（0 为根目录）
    #[arg(long, default_value_t = 0)]
    pub folder: u64,

    /// 并发 worker 数（缺省取配置文件，默认 4）
    #[arg(long)]
    pub concurrency: Option<usize>,
}

/// 校验 JWT 文件存在且可读
fn check_jwt_file(path: &PathBuf) -> Result<()> {
    if !path.is_file() {
        bail!("JWT 配置文件不存在或不可读: {:?}", path);
    }
    Ok(())
}

fn check_concurrency(concurrency: Option<usize>) -> Result<()> {
    if let Some(0) = concurrency {
        bail!("并发数必须 >= 1");
    }
    Ok(())
}

impl UploadArgs {
    pub fn validate(&self) -> Result<()> {
        check_jwt_file(&self.jwt_file)?;
        if !self.file.is_file() {
            bail!("文件不存在或不可读: {:?}", self.file);
        }
        if self.file_id.is_some() && self.folder != 0 {
            bail!("--file-id 与 --folder 不能同时指定");
        }
        check_concurrency(self.concurrency)
    }

    /// 上传目标：指定了 --file-id 时上传新版本，否则上传到文件夹
    pub fn destination(&self) -> UploadDestination {
        match self.file_id {
            Some(file_id) => UploadDestination::ExistingFile(file_id.to_string()),
            None => UploadDestination::Folder(self.folder.to_string()),
        }
    }
}

impl BenchmarkArgs {
    pub fn validate(&self) -> Result<()> {
        check_jwt_file(&self.jwt_file)?;
        if self.size < MIN_BENCHMARK_SIZE {
            bail!(
                "负载大小 {} 太小, 至少需要 {} 字节",
                self.size,
                MIN_BENCHMARK_SIZE
            );
        }
        check_concurrency(self.concurrency)
    }

    pub fn destination(&self) -> UploadDestination {
        UploadDestination::Folder(self.folder.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn jwt_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{}").unwrap();
        file
    }

    #[test]
    fn test_parse_upload() {
        let cli = Cli::try_parse_from([
            "box-thread-upload",
            "upload",
            "jwt.json",
            "payload.bin",
            "--folder",
            "42",
            "--concurrency",
            "8",
        ])
        .unwrap();

        match cli.command {
            Command::Upload(args) => {
                assert_eq!(args.folder, 42);
                assert_eq!(args.concurrency, Some(8));
                assert_eq!(
                    args.destination(),
                    UploadDestination::Folder("42".to_string())
                );
            }
            _ => panic!("应解析为 upload 子命令"),
        }
    }

    #[test]
    fn test_non_numeric_ids_rejected() {
        // 数字字段由 clap 类型校验拦截
        assert!(Cli::try_parse_from([
            "box-thread-upload",
            "upload",
            "jwt.json",
            "payload.bin",
            "--folder",
            "abc"
        ])
        .is_err());

        assert!(Cli::try_parse_from([
            "box-thread-upload",
            "benchmark",
            "jwt.json",
            "not-a-size"
        ])
        .is_err());
    }

    #[test]
    fn test_file_id_conflicts_with_folder() {
        let jwt = jwt_file();
        let payload = jwt_file();

        let cli = Cli::try_parse_from([
            "box-thread-upload",
            "upload",
            jwt.path().to_str().unwrap(),
            payload.path().to_str().unwrap(),
            "--folder",
            "42",
            "--file-id",
            "7",
        ])
        .unwrap();

        match cli.command {
            Command::Upload(args) => assert!(args.validate().is_err()),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_file_id_with_root_folder_allowed() {
        let jwt = jwt_file();
        let payload = jwt_file();

        let cli = Cli::try_parse_from([
            "box-thread-upload",
            "upload",
            jwt.path().to_str().unwrap(),
            payload.path().to_str().unwrap(),
            "--file-id",
            "7",
        ])
        .unwrap();

        match cli.command {
            Command::Upload(args) => {
                args.validate().unwrap();
                assert_eq!(
                    args.destination(),
                    UploadDestination::ExistingFile("7".to_string())
                );
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_benchmark_minimum_size() {
        let jwt = jwt_file();

        let cli = Cli::try_parse_from([
            "box-thread-upload",
            "benchmark",
            jwt.path().to_str().unwrap(),
            "2000000",
        ])
        .unwrap();
        match cli.command {
            Command::Benchmark(args) => assert!(args.validate().is_err()),
            _ => unreachable!(),
        }

        let cli = Cli::try_parse_from([
            "box-thread-upload",
            "benchmark",
            jwt.path().to_str().unwrap(),
            "2000001",
        ])
        .unwrap();
        match cli.command {
            Command::Benchmark(args) => args.validate().unwrap(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_missing_jwt_file_rejected() {
        let payload = jwt_file();
        let cli = Cli::try_parse_from([
            "box-thread-upload",
            "upload",
            "/nonexistent/jwt.json",
            payload.path().to_str().unwrap(),
        ])
        .unwrap();
        match cli.command {
            Command::Upload(args) => assert!(args.validate().is_err()),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let jwt = jwt_file();
        let cli = Cli::try_parse_from([
            "box-thread-upload",
            "benchmark",
            jwt.path().to_str().unwrap(),
            "2000001",
            "--concurrency",
            "0",
        ])
        .unwrap();
        match cli.command {
            Command::Benchmark(args) => assert!(args.validate().is_err()),
            _ => unreachable!(),
        }
    }
}
