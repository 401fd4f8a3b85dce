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
use crate::encoder::VisionEncoder;
use crate::error::Error;
use crate::ranker::{self, RankedHit};
use crate::{preprocess, store};

/// 搜索一张图片
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
        return Err(AppError::unauthorized("无效的 token"));
    }

    let count = data.count.unwrap_or(state.search.count);
    let start = Instant::now();

    info!("正在检索上传图片");

    let result = block_in_place(|| {
        data.file
            .par_iter()
            .map(|file| {
                let tensor = preprocess::normalize(file, state.encoder.input_size())?;
                let vector = state.encoder.encode(&tensor)?;
                let query = store::normalize_query(vector)?;
                let hits = state.store.query(&query, count)?;
                Ok(ranker::rank_hits(hits))
            })
            .collect::<Result<Vec<Vec<RankedHit>>, Error>>()
    })?;

    Ok(Json(json!({
        "time": start.elapsed().as_millis() as u32,
        "result": result,
    })))
}
