use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use tokio::task::block_in_place;

use super::error::Result;
use super::state::AppState;
use super::types::*;

/// 检索与上传图片最相似的图库图片
#[utoipa::path(
    post,
    path = "/predict",
    request_body = PredictRequest,
    responses(
        (status = 200, body = PredictResponse),
        (status = 400, description = "图片无法解码"),
    )
)]
pub async fn predict_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<PredictRequest>,
) -> Result<Json<PredictResponse>> {
    let ids = block_in_place(|| state.retrieval.search(&data.image))?;
    Ok(Json(PredictResponse(ids)))
}
