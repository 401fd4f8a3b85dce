use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// 核心错误类型
///
/// 按照处理策略分为四类：
/// - 图片级错误（`Decode` / `UnsupportedMode`）：跳过该图片，继续处理批次
/// - 加载级错误（`DimensionMismatch` / `DegenerateVector`）：中止向量库构建
/// - 批次级错误（`SchemaValidation`）：整批拒绝，不产生部分写入
/// - 瞬时错误（`TransientIo`）：带退避重试，超过次数后升级为批次失败
#[derive(Debug, Error)]
pub enum Error {
    /// 图片无法解码
    #[error("无法解码图片: {0}")]
    Decode(String),

    /// 图片颜色模式无法转换为 RGB
    #[error("不支持的图片模式: {0}")]
    UnsupportedMode(String),

    /// 向量维度与向量库不一致
    #[error("向量维度不一致: {id} 的维度为 {got}，期望 {expected}")]
    DimensionMismatch { id: String, expected: usize, got: usize },

    /// 零向量无法做 L2 归一化
    #[error("零向量无法归一化: {id}")]
    DegenerateVector { id: String },

    /// 上传前的表结构 / 向量格式校验失败
    #[error("表结构校验失败: 第 {row} 行 ({id}): {reason}")]
    SchemaValidation { row: usize, id: String, reason: String },

    /// 在加载向量库之前发起了查询
    #[error("向量库为空，查询前需要先加载向量")]
    EmptyStore,

    /// 瞬时 IO 错误，可重试
    #[error("IO 错误: {0}")]
    TransientIo(#[from] io::Error),

    /// 模型文件缺失
    #[error("模型文件不存在: {0}，请先下载视觉编码器模型")]
    ModelNotFound(PathBuf),

    /// 编码器推理失败
    #[error("编码器推理失败: {0}")]
    Inference(String),

    /// 数据库错误
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// 是否为可重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientIo(_))
    }
}
