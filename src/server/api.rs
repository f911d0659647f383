use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum_auth::AuthBearer;
use axum_typed_multipart::TypedMultipart;
use log::info;
use rayon::prelude::*;
use serde_json::{Value, json};
use tokio::task::block_in_place;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;

/// 查询上传的文件
#[utoipa::path(
    post,
    path = "/search",
    request_body(content = SearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    data: TypedMultipart<SearchRequest>,
) -> Result<Json<Value>> {
    if token != state.token {
        return Err(AppError::unauthorized());
    }

    let count = data.count.unwrap_or(state.search.count);

    let start = Instant::now();

    info!("正在查询 {} 个上传文件", data.file.len());

    let result = block_in_place(|| {
        data.file
            .par_iter()
            .map(|file| state.db.search(file, count))
            .collect::<anyhow::Result<Vec<_>>>()
    })?;

    Ok(Json(json!({
        "time": start.elapsed().as_millis(),
        "result": result,
    })))
}

/// 添加文件到指纹库
#[utoipa::path(
    post,
    path = "/add",
    request_body(content = AddForm, content_type = "multipart/form-data")
)]
pub async fn add_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    data: TypedMultipart<AddRequest>,
) -> Result<Json<Value>> {
    if token != state.token {
        return Err(AppError::unauthorized());
    }

    let mut added = 0usize;
    for file in &data.file {
        let file_name = match &file.metadata.file_name {
            Some(file_name) => file_name,
            None => {
                return Err(anyhow::anyhow!("文件名不能为空").into());
            }
        };

        let encoded = block_in_place(|| state.db.encode(&file.contents))?;
        state.db.insert(file_name, &encoded).await?;
        added += 1;
    }
    Ok(Json(json!({ "added": added })))
}

/// 获取指纹库概况
#[utoipa::path(
    post,
    path = "/stats",
    responses(
        (status = 200, body = StatsResponse),
    )
)]
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>> {
    let stats = state.db.stats();
    Ok(Json(StatsResponse {
        total: stats.total,
        embedded: stats.embedded,
        dim: stats.dim,
        dirty: stats.dirty,
    }))
}
