use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 检索请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct PredictRequest {
    /// base64 编码的图片，可以带有 `data:image/png;base64,` 之类的头部
    pub image: String,
}

/// 检索结果：按距离从近到远排列的图库 ID，最多 100 个
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct PredictResponse(pub Vec<usize>);
