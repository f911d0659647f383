/// 指纹连同可能缺失的嵌入向量，恢复内存库时使用
#[derive(Debug, sqlx::FromRow)]
pub struct FingerprintRow {
    /// 文件标识，通常为路径
    pub key: String,
    /// 文件内容的 blake3 十六进制摘要
    pub hash: String,
    /// 投影并归一化后的嵌入，尚未嵌入时为空
    pub projected: Option<Vec<u8>>,
}

/// 原始嵌入记录
#[derive(Debug, sqlx::FromRow)]
pub struct RawVectorRecord {
    pub id: i64,
    pub key: String,
    pub raw: Vec<u8>,
}
