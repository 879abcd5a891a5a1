use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// 检索流程中的错误
#[derive(Debug, Error)]
pub enum Error {
    /// 请求中的图片无法解码，属于客户端错误
    #[error("图片解码失败: {0}")]
    Decode(String),
    /// 模型或图库文件缺失、无法读取或维度不匹配，启动时即失败
    #[error("配置错误: {0}")]
    Configuration(String),
    /// 输入合法但计算特征向量失败
    #[error("推理失败: {0}")]
    Inference(String),
}

impl Error {
    /// 用于日志和指标的简短标签
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Configuration(_) => "configuration",
            Self::Inference(_) => "inference",
        }
    }
}
