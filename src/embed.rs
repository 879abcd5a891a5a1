use std::path::Path;
use std::sync::Mutex;

use log::{debug, info};
use ndarray::{Array4, ArrayView4};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;

use crate::config::{INPUT_SIZE, MODEL_INPUT};
use crate::error::{Error, Result};

/// 特征提取模型
pub trait Embedder: Send + Sync {
    /// 输出特征向量的维度
    fn dim(&self) -> usize;

    /// 计算单张图片的特征向量，输入形状为 `(1, 3, 224, 224)`
    fn embed(&self, tensor: ArrayView4<f32>) -> Result<Vec<f32>>;
}

/// 模型输入张量的形状
pub fn input_shape() -> [usize; 4] {
    let size = INPUT_SIZE as usize;
    [1, 3, size, size]
}

/// 基于 ONNX Runtime 的特征提取模型
pub struct OnnxEmbedder {
    // NOTE: ort 的 Session::run 需要可变引用，所以只能加锁
    session: Mutex<Session>,
    dim: usize,
}

impl OnnxEmbedder {
    /// 加载 ONNX 模型，并用全零张量试运行一次以确定输出维度
    ///
    /// # Arguments
    ///
    /// * `path` - 模型文件路径
    /// * `threads` - 单次推理使用的线程数
    pub fn open(path: impl AsRef<Path>, threads: usize) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::Configuration(format!("模型文件不存在: {}", path.display())));
        }

        info!("加载模型: {}", path.display());
        let session = Session::builder()
            .map_err(load_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_error)?
            .with_intra_threads(threads.max(1))
            .map_err(load_error)?
            .commit_from_file(path)
            .map_err(load_error)?;

        let mut embedder = Self { session: Mutex::new(session), dim: 0 };

        let probe = Array4::<f32>::zeros(input_shape());
        let output = embedder
            .run(probe.view())
            .map_err(|e| Error::Configuration(format!("模型试运行失败: {e}")))?;
        embedder.dim = output.len();
        debug!("模型输出维度: {}", embedder.dim);

        Ok(embedder)
    }

    fn run(&self, tensor: ArrayView4<f32>) -> Result<Vec<f32>> {
        if tensor.shape() != input_shape() {
            return Err(Error::Inference(format!(
                "输入形状应为 {:?}，实际为 {:?}",
                input_shape(),
                tensor.shape()
            )));
        }

        let shape = tensor.shape().iter().map(|&d| d as i64).collect::<Vec<_>>();
        let data = tensor.iter().copied().collect::<Vec<f32>>();
        let input = Tensor::from_array((shape, data))
            .map_err(|e| Error::Inference(format!("创建输入张量失败: {e}")))?;

        let mut session =
            self.session.lock().map_err(|_| Error::Inference("模型锁已失效".to_string()))?;
        let outputs = session
            .run(ort::inputs![MODEL_INPUT => input])
            .map_err(|e| Error::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Inference(format!("读取输出失败: {e}")))?;
        let dims = shape.iter().map(|&d| d as usize).collect::<Vec<_>>();
        first_row(&dims, data)
    }
}

impl Embedder for OnnxEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, tensor: ArrayView4<f32>) -> Result<Vec<f32>> {
        let embedding = self.run(tensor)?;
        if embedding.len() != self.dim {
            return Err(Error::Inference(format!(
                "输出维度为 {}，应为 {}",
                embedding.len(),
                self.dim
            )));
        }
        Ok(embedding)
    }
}

fn load_error(e: impl std::fmt::Display) -> Error {
    Error::Configuration(format!("无法加载模型: {e}"))
}

/// 从 `(1, d)` 或 `(d,)` 形状的输出中取出第一行
fn first_row(dims: &[usize], data: &[f32]) -> Result<Vec<f32>> {
    let row_len = match dims {
        [d] => *d,
        [1, rest @ ..] if !rest.is_empty() => rest.iter().product(),
        _ => return Err(Error::Inference(format!("无法识别的输出形状: {dims:?}"))),
    };
    if row_len == 0 || data.len() < row_len {
        return Err(Error::Inference(format!("输出为空或长度不足: {dims:?}")));
    }
    let row = data[..row_len].to_vec();
    if row.iter().any(|v| !v.is_finite()) {
        return Err(Error::Inference("输出中包含 NaN 或无穷大".to_string()));
    }
    Ok(row)
}
