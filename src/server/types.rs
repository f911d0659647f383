use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::Serialize;
use utoipa::ToSchema;

/// 查询请求参数
#[derive(TryFromMultipart)]
pub struct SearchRequest {
    pub file: Vec<Bytes>,
    pub count: Option<usize>,
}

/// 查询表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchForm {
    /// 上传的文件，可以一次上传多个
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// 每个文件返回的结果数量
    pub count: Option<usize>,
}

/// 查询响应
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchResponse {
    /// 查询耗时，单位为毫秒
    pub time: u32,
    /// 每个文件的查询结果，格式为 `(相似度, key)`
    pub result: Vec<Vec<(f32, String)>>,
}

/// 添加请求参数
#[derive(TryFromMultipart)]
pub struct AddRequest {
    pub file: Vec<FieldData<Bytes>>,
}

/// 添加表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct AddForm {
    /// 上传的文件，文件名会作为 key 登记
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 指纹库概况响应
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    /// 指纹总数
    pub total: usize,
    /// 已有嵌入的指纹数量
    pub embedded: usize,
    /// 嵌入维度
    pub dim: usize,
    /// 是否有未持久化的内存修改
    pub dirty: bool,
}
