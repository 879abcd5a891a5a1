mod check;
mod search;
pub mod server;

pub use check::*;
pub use search::*;
pub use server::*;

use crate::Retrieval;
use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 按命令行参数加载模型和图库
fn open_retrieval(opts: &Opts) -> anyhow::Result<Retrieval> {
    Ok(Retrieval::open(opts.model_path(), opts.gallery_path(), opts.threads)?)
}
