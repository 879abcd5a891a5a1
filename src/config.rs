use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;

/// 模型输入图片的边长
pub const INPUT_SIZE: u32 = 224;

/// 每个通道的均值，与 CLIP 预训练时一致
pub const MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];

/// 每个通道的标准差，与 CLIP 预训练时一致
pub const STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

/// 每次查询返回的结果数量
pub const TOP_K: usize = 100;

/// 模型输入节点的名称
pub const MODEL_INPUT: &str = "input";

/// 图库文件是一个 3 维数组，真正的图库特征位于第 0 维的第二个切片
pub const GALLERY_SLICE: usize = 1;

static CONF_DIR: LazyLock<String> = LazyLock::new(|| {
    ProjectDirs::from("", "sketchscape", "sbir")
        .map(|dirs| dirs.config_dir().display().to_string())
        .unwrap_or_else(|| ".".to_string())
});

fn default_config_dir() -> &'static str {
    CONF_DIR.as_str()
}

#[derive(Parser, Debug, Clone)]
#[command(name = "sbir", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// sbir 配置目录，默认从中读取 model.onnx 和 embeddings.npy
    #[arg(short, long, global = true, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
    /// ONNX 模型路径，覆盖配置目录中的默认值
    #[arg(long, global = true, value_name = "PATH")]
    pub model: Option<PathBuf>,
    /// 图库特征文件路径，覆盖配置目录中的默认值
    #[arg(long, global = true, value_name = "PATH")]
    pub gallery: Option<PathBuf>,
    /// 推理线程数
    #[arg(long, global = true, value_name = "N", default_value_t = num_cpus::get())]
    pub threads: usize,
}

impl Opts {
    /// 实际使用的模型路径
    pub fn model_path(&self) -> PathBuf {
        self.model.clone().unwrap_or_else(|| self.conf_dir.model())
    }

    /// 实际使用的图库路径
    pub fn gallery_path(&self) -> PathBuf {
        self.gallery.clone().unwrap_or_else(|| self.conf_dir.gallery())
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 启动 HTTP 检索服务
    Server(ServerCommand),
    /// 使用本地图片进行检索
    Search(SearchCommand),
    /// 加载模型和图库并检查是否匹配
    Check(CheckCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回模型文件的路径
    pub fn model(&self) -> PathBuf {
        self.path.join("model.onnx")
    }

    /// 返回图库特征文件的路径
    pub fn gallery(&self) -> PathBuf {
        self.path.join("embeddings.npy")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}
