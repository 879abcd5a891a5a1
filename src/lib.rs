pub mod cli;
pub mod config;
pub mod embed;
mod error;
pub mod gallery;
mod metrics;
pub mod preprocess;
pub mod retrieval;
mod server;

pub use config::Opts;
pub use embed::{Embedder, OnnxEmbedder};
pub use error::{Error, Result};
pub use gallery::{GalleryIndex, Neighbor};
pub use retrieval::Retrieval;
