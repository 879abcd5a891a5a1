use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::task::block_in_place;

use crate::cli::{SubCommandExtend, open_retrieval};
use crate::config::{Opts, TOP_K};
use crate::gallery::Neighbor;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 显示的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = TOP_K)]
    pub count: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let bytes = std::fs::read(&self.image)
            .with_context(|| format!("无法读取图片 {}", self.image.display()))?;
        let result = block_in_place(|| -> Result<_> {
            let retrieval = open_retrieval(opts)?;
            Ok(retrieval.search_bytes(&bytes, self.count)?)
        })?;
        print_result(&result, self)
    }
}

fn print_result(result: &[Neighbor], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for neighbor in result {
                println!("{:.4}\t{}", neighbor.distance, neighbor.id);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    Json,
    Table,
}
