use anyhow::Result;
use clap::Parser;
use tokio::task::block_in_place;

use crate::cli::{SubCommandExtend, open_retrieval};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct CheckCommand {}

impl SubCommandExtend for CheckCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let retrieval = block_in_place(|| open_retrieval(opts))?;
        println!("model   : {}", opts.model_path().display());
        println!("gallery : {}", opts.gallery_path().display());
        println!("entries : {}", retrieval.index().len());
        println!("dim     : {}", retrieval.embedder().dim());
        Ok(())
    }
}
