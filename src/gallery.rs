use std::path::Path;

use log::{debug, info};
use ndarray::prelude::*;
use ndarray_npy::{ReadNpyError, read_npy};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::GALLERY_SLICE;
use crate::error::{Error, Result};

/// 低于这个数量的图库直接单线程计算
const PARALLEL_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    /// 图库中的行号
    pub id: usize,
    /// 与查询向量的 L2 距离的平方
    pub distance: f32,
}

impl Neighbor {
    /// 先按距离排序，距离相同时行号小的在前
    fn cmp_rank(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.total_cmp(&other.distance).then(self.id.cmp(&other.id))
    }
}

/// 计算两个向量的 L2 距离的平方
#[inline(always)]
pub fn l2_sqr(va: &[f32], vb: &[f32]) -> f32 {
    va.iter()
        .zip(vb)
        .map(|(a, b)| {
            let d = a - b;
            d * d
        })
        .sum()
}

/// 精确的暴力搜索索引，按行连续保存所有图库特征向量
///
/// 构建后不再修改，可以在多个请求间共享
#[derive(Debug)]
pub struct GalleryIndex {
    data: Vec<f32>,
    len: usize,
    dim: usize,
}

impl GalleryIndex {
    /// 使用 N x d 的特征矩阵构建索引，第 i 行的 ID 即为 i
    pub fn new(embeddings: Array2<f32>) -> Self {
        let (len, dim) = embeddings.dim();
        let data = embeddings.as_standard_layout().iter().copied().collect();
        Self { data, len, dim }
    }

    /// 从 npy 文件加载图库
    ///
    /// 文件中保存的是一个 S x N x d 的数组，只有第 [`GALLERY_SLICE`] 个切片是图库特征
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("读取图库特征: {}", path.display());

        let read_error =
            |e: ReadNpyError| Error::Configuration(format!("无法读取 {}: {e}", path.display()));
        let container: ArrayD<f32> = match read_npy(path) {
            Ok(container) => container,
            // 也接受 float64 保存的图库，加载后转为 float32
            Err(ReadNpyError::WrongDescriptor(_)) => {
                let container: ArrayD<f64> = read_npy(path).map_err(read_error)?;
                container.mapv(|v| v as f32)
            }
            Err(e) => return Err(read_error(e)),
        };
        let shape = container.shape().to_vec();
        let container = container.into_dimensionality::<Ix3>().map_err(|_| {
            Error::Configuration(format!("{} 应为 3 维数组，实际形状为 {shape:?}", path.display()))
        })?;
        if container.len_of(Axis(0)) <= GALLERY_SLICE {
            return Err(Error::Configuration(format!(
                "{} 只有 {} 个切片，缺少第 {} 个切片",
                path.display(),
                container.len_of(Axis(0)),
                GALLERY_SLICE
            )));
        }

        let embeddings = container.index_axis(Axis(0), GALLERY_SLICE).to_owned();
        info!("图库加载完成：{} 条特征，维度 {}", embeddings.nrows(), embeddings.ncols());
        Ok(Self::new(embeddings))
    }

    /// 图库中的向量数量
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 特征向量维度
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// 第 id 行的特征向量，越界时返回 `None`
    pub fn row(&self, id: usize) -> Option<&[f32]> {
        if id >= self.len {
            return None;
        }
        Some(&self.data[id * self.dim..(id + 1) * self.dim])
    }

    /// 检查特征维度是否与模型输出一致
    pub fn check_dim(&self, expected: usize) -> Result<()> {
        if self.dim() != expected {
            return Err(Error::Configuration(format!(
                "图库特征维度为 {}，而模型输出维度为 {}",
                self.dim(),
                expected
            )));
        }
        Ok(())
    }

    /// 返回距离最近的 k 个图库 ID，按距离从小到大排列
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<usize>> {
        Ok(self.search_neighbors(query, k)?.into_iter().map(|n| n.id).collect())
    }

    /// 返回距离最近的 k 个邻居及其距离
    ///
    /// 如果图库数量不足 k，则返回全部图库
    pub fn search_neighbors(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dim() {
            return Err(Error::Inference(format!(
                "查询向量维度为 {}，而图库维度为 {}",
                query.len(),
                self.dim()
            )));
        }
        if k == 0 || self.is_empty() {
            return Ok(vec![]);
        }

        let mut neighbors = self.distances(query);
        let cmp = |a: &Neighbor, b: &Neighbor| a.cmp_rank(b);
        if k < neighbors.len() {
            // 此时前 k 个元素即为最小的 k 个，但顺序未定
            neighbors.select_nth_unstable_by(k, cmp);
            neighbors.truncate(k);
        }
        neighbors.sort_unstable_by(cmp);
        Ok(neighbors)
    }

    /// 计算查询向量到每个图库向量的距离
    fn distances(&self, query: &[f32]) -> Vec<Neighbor> {
        let score = |(id, row): (usize, &[f32])| Neighbor { id, distance: l2_sqr(query, row) };
        if self.dim == 0 {
            return (0..self.len).map(|id| Neighbor { id, distance: 0.0 }).collect();
        }
        if self.len < PARALLEL_THRESHOLD {
            self.data.chunks_exact(self.dim).enumerate().map(score).collect()
        } else {
            self.data.par_chunks_exact(self.dim).enumerate().map(score).collect()
        }
    }
}
