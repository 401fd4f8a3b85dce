use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "aloxaf", "imembed").expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap()
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imembed", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// imembed 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 批量计算图片向量并写出向量表
    Embed(EmbedCommand),
    /// 将向量表上传到数据库
    Upload(UploadCommand),
    /// 用一张图片检索相似图片
    Search(SearchCommand),
    /// 用一组查询图片评估检索质量
    Eval(EvalCommand),
    /// 启动 HTTP 检索服务
    Server(ServerCommand),
}

/// 视觉编码器参数
#[derive(Parser, Debug, Clone)]
pub struct EncoderOptions {
    /// ONNX 模型文件路径，不指定时使用配置目录下的默认模型
    #[arg(short, long, value_name = "FILE")]
    pub model: Option<PathBuf>,
    /// 编码器期望的输入边长
    #[arg(long, value_name = "N", default_value_t = 224)]
    pub input_size: u32,
    /// 输出向量的维度
    #[arg(long, value_name = "N", default_value_t = 512)]
    pub dim: usize,
    /// ONNX Runtime 单次推理使用的线程数
    #[arg(long, value_name = "N", default_value_t = 4)]
    pub intra_threads: usize,
}

impl EncoderOptions {
    /// 解析模型路径，未指定时回落到配置目录
    pub fn model_path(&self, conf_dir: &ConfDir) -> PathBuf {
        self.model.clone().unwrap_or_else(|| conf_dir.model())
    }
}

/// 检索参数
#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 显示的结果数量
    #[arg(short, long, value_name = "COUNT", default_value_t = 10)]
    pub count: usize,
    /// 输出格式
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

/// 批处理流水线参数
#[derive(Parser, Debug, Clone)]
pub struct PipelineOptions {
    /// 并行处理的迷你批次数量
    #[arg(short, long, value_name = "N", default_value_t = num_cpus::get())]
    pub jobs: usize,
    /// 每个迷你批次包含的图片数量
    #[arg(short, long, value_name = "N", default_value_t = 100)]
    pub batch_size: usize,
    /// 一次推理喂给编码器的图片数量
    #[arg(long, value_name = "N", default_value_t = 16)]
    pub encode_batch: usize,
    /// 瞬时 IO 错误的最大重试次数
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub retries: u32,
    /// 首次重试前的退避延迟，毫秒，之后每次翻倍
    #[arg(long, value_name = "MS", default_value_t = 500)]
    pub retry_delay: u64,
}

/// 数据库参数
#[derive(Parser, Debug, Clone)]
pub struct DbOptions {
    /// PostgreSQL 连接字符串
    #[arg(long, value_name = "URL", env = "DATABASE_URL")]
    pub database_url: Option<String>,
    /// 向量所在的表名
    #[arg(long, value_name = "NAME", default_value = "image_embeddings")]
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回默认的 ONNX 模型路径
    pub fn model(&self) -> PathBuf {
        self.path.join("clip_visual.onnx")
    }

    /// 返回批处理产物（向量表）的默认输出目录
    pub fn vector_dir(&self) -> PathBuf {
        self.path.join("vectors")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    /// 制表符分隔的表格
    Table,
    /// JSON
    Json,
}
