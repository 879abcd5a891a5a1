use std::sync::Arc;

use crate::Retrieval;

/// 应用状态
pub struct AppState {
    /// 检索上下文，启动后只读
    pub retrieval: Arc<Retrieval>,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(retrieval: Retrieval) -> Arc<Self> {
        Arc::new(AppState { retrieval: Arc::new(retrieval) })
    }
}
