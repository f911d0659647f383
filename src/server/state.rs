use std::sync::Arc;

use crate::ImprintDB;
use crate::cli::server::ServerCommand;
use crate::config::SearchOptions;

/// 应用状态
pub struct AppState {
    /// 指纹库
    pub db: ImprintDB,
    /// 搜索配置选项
    pub search: SearchOptions,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(db: ImprintDB, opts: ServerCommand) -> Arc<Self> {
        Arc::new(AppState { db, search: opts.search, token: opts.token })
    }
}
