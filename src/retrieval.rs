use std::path::Path;
use std::time::Instant;

use log::{debug, info};
use ndarray::Array4;

use crate::config::TOP_K;
use crate::embed::{Embedder, OnnxEmbedder};
use crate::error::Result;
use crate::gallery::{GalleryIndex, Neighbor};
use crate::metrics::{self, Stage};
use crate::preprocess;

/// 检索上下文，持有模型和图库索引
///
/// 启动时构建一次，之后只读，通过 `Arc` 在所有请求间共享
pub struct Retrieval {
    embedder: Box<dyn Embedder>,
    index: GalleryIndex,
}

impl Retrieval {
    /// 组合模型和图库，两者的维度必须一致
    pub fn new(embedder: Box<dyn Embedder>, index: GalleryIndex) -> Result<Self> {
        index.check_dim(embedder.dim())?;
        Ok(Self { embedder, index })
    }

    /// 从文件加载模型和图库
    ///
    /// # Arguments
    ///
    /// * `model` - ONNX 模型路径
    /// * `gallery` - 图库特征文件路径
    /// * `threads` - 推理线程数
    pub fn open(model: impl AsRef<Path>, gallery: impl AsRef<Path>, threads: usize) -> Result<Self> {
        let index = GalleryIndex::open(gallery)?;
        let embedder = OnnxEmbedder::open(model, threads)?;
        let retrieval = Self::new(Box::new(embedder), index)?;
        info!(
            "检索上下文就绪：{} 条图库特征，维度 {}",
            retrieval.index.len(),
            retrieval.index.dim()
        );
        Ok(retrieval)
    }

    pub fn index(&self) -> &GalleryIndex {
        &self.index
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// 检索 base64 编码（可带 data URI 头部）的图片，返回最相似的 [`TOP_K`] 个图库 ID
    pub fn search(&self, encoded: &str) -> Result<Vec<usize>> {
        let neighbors = self.observe(|| {
            let tensor = timed(Stage::Preprocess, || preprocess::preprocess(encoded))?;
            self.search_tensor(tensor, TOP_K)
        })?;
        Ok(neighbors.into_iter().map(|n| n.id).collect())
    }

    /// 检索原始图片字节，返回最近的 k 个邻居及其距离
    pub fn search_bytes(&self, bytes: &[u8], k: usize) -> Result<Vec<Neighbor>> {
        self.observe(|| {
            let tensor = timed(Stage::Preprocess, || preprocess::preprocess_bytes(bytes))?;
            self.search_tensor(tensor, k)
        })
    }

    fn search_tensor(&self, tensor: Array4<f32>, k: usize) -> Result<Vec<Neighbor>> {
        let embedding = timed(Stage::Embed, || self.embedder.embed(tensor.view()))?;
        timed(Stage::Search, || self.index.search_neighbors(&embedding, k))
    }

    /// 记录一次完整查询的耗时和结果
    fn observe<F>(&self, f: F) -> Result<Vec<Neighbor>>
    where
        F: FnOnce() -> Result<Vec<Neighbor>>,
    {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed().as_secs_f32();
        match &result {
            Ok(neighbors) => {
                metrics::inc_query_count("ok");
                metrics::observe_query_duration(elapsed);
                debug!("检索完成：{} 个结果，耗时 {:.2}ms", neighbors.len(), elapsed * 1000.);
            }
            Err(e) => metrics::inc_query_count(e.kind()),
        }
        result
    }
}

fn timed<T, F>(stage: Stage, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let start = Instant::now();
    let result = f();
    let elapsed = start.elapsed().as_secs_f32();
    metrics::observe_stage_duration(stage, elapsed);
    debug!("{stage:?}: {:.2}ms", elapsed * 1000.);
    result
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use ndarray::{Array3, ArrayView4, Axis, array};

    use super::*;
    use crate::embed::tests::mean_pool_model;
    use crate::error::Error;

    /// 总是返回同一个向量的模型，并记录调用次数
    pub struct FixedEmbedder {
        pub embedding: Vec<f32>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FixedEmbedder {
        pub fn new(embedding: Vec<f32>) -> Self {
            Self { embedding, calls: Arc::new(AtomicUsize::new(0)) }
        }
    }

    impl Embedder for FixedEmbedder {
        fn dim(&self) -> usize {
            self.embedding.len()
        }

        fn embed(&self, tensor: ArrayView4<f32>) -> Result<Vec<f32>> {
            assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.embedding.clone())
        }
    }

    /// 3 条二维图库：[0, 0]、[1, 1]、[10, 10]
    pub fn small_retrieval(query: Vec<f32>) -> (Retrieval, Arc<AtomicUsize>) {
        let embedder = FixedEmbedder::new(query);
        let calls = embedder.calls.clone();
        let index = GalleryIndex::new(array![[0.0, 0.0], [1.0, 1.0], [10.0, 10.0]]);
        (Retrieval::new(Box::new(embedder), index).unwrap(), calls)
    }

    pub fn sample_png() -> Vec<u8> {
        let img = RgbImage::from_fn(60, 40, |x, y| Rgb([x as u8, y as u8, 128]));
        let mut buf = vec![];
        DynamicImage::ImageRgb8(img).write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn test_end_to_end() {
        let (retrieval, calls) = small_retrieval(vec![0.1, 0.1]);
        let result = retrieval.search_bytes(&sample_png(), 2).unwrap();
        assert_eq!(result.iter().map(|n| n.id).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_search_returns_whole_small_gallery() {
        let (retrieval, _) = small_retrieval(vec![9.0, 9.0]);
        let encoded = format!("data:image/png;base64,{}", STANDARD.encode(sample_png()));
        assert_eq!(retrieval.search(&encoded).unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn test_malformed_payload_skips_embedder() {
        let (retrieval, calls) = small_retrieval(vec![0.0, 0.0]);
        let err = retrieval.search("data:image/png;base64,***").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dim_mismatch_at_construction() {
        let embedder = FixedEmbedder::new(vec![0.0; 512]);
        let index = GalleryIndex::new(array![[0.0, 0.0], [1.0, 1.0]]);
        let result = Retrieval::new(Box::new(embedder), index);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_open_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            Retrieval::open(dir.path().join("model.onnx"), dir.path().join("embeddings.npy"), 1);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_open_with_onnx_model() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = dir.path().join("embeddings.npy");
        let mut container = Array3::<f32>::zeros((2, 3, 3));
        let mut slice = container.index_axis_mut(Axis(0), 1);
        slice.row_mut(0).fill(-2.0);
        slice.row_mut(1).fill(2.0);
        ndarray_npy::write_npy(&gallery, &container).unwrap();

        let retrieval = Retrieval::open(mean_pool_model(), &gallery, 1).unwrap();
        assert_eq!(retrieval.embedder().dim(), 3);
        assert_eq!(retrieval.index().len(), 3);

        // 纯白图片标准化后每个通道约为 2，最接近第 1 行
        let img = RgbImage::from_pixel(50, 30, Rgb([255, 255, 255]));
        let mut png = vec![];
        DynamicImage::ImageRgb8(img).write_to(&mut Cursor::new(&mut png), ImageFormat::Png).unwrap();
        let encoded = format!("data:image/png;base64,{}", STANDARD.encode(&png));
        assert_eq!(retrieval.search(&encoded).unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn test_open_with_onnx_model_dim_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = dir.path().join("embeddings.npy");
        ndarray_npy::write_npy(&gallery, &Array3::<f32>::zeros((2, 4, 8))).unwrap();
        let result = Retrieval::open(mean_pool_model(), &gallery, 1);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
