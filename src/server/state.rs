use std::sync::Arc;

use crate::cli::ServerCommand;
use crate::config::SearchOptions;
use crate::encoder::ClipEncoder;
use crate::store::EmbeddingStore;

/// 应用状态
pub struct AppState {
    /// 内存向量库，服务启动时加载一次
    pub store: EmbeddingStore,
    /// 视觉编码器
    pub encoder: ClipEncoder,
    /// 搜索配置选项
    pub search: SearchOptions,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(store: EmbeddingStore, encoder: ClipEncoder, opts: &ServerCommand) -> Arc<Self> {
        Arc::new(AppState {
            store,
            encoder,
            search: opts.search.clone(),
            token: opts.token.clone(),
        })
    }
}
