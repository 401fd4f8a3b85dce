use axum::body::Bytes;
use axum_typed_multipart::TryFromMultipart;
use utoipa::ToSchema;

/// 搜索请求参数
#[derive(TryFromMultipart)]
pub struct SearchRequest {
    pub file: Vec<Bytes>,
    pub count: Option<usize>,
}

/// 搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchForm {
    /// 上传的图片文件，可以是多张图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// 返回的结果数量
    pub count: Option<usize>,
}

/// 单条搜索结果（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchResultItem {
    /// 名次，从 1 开始
    pub rank: usize,
    /// 图片的唯一标识
    pub file_id: String,
    /// 图片文件名
    pub filename: String,
    /// 余弦相似度
    pub score: f32,
}

/// 搜索响应
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchResponse {
    /// 搜索耗时，单位为毫秒
    pub time: u32,
    /// 每张图片的搜索结果
    pub result: Vec<Vec<SearchResultItem>>,
}
