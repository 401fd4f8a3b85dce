pub mod cli;
pub mod config;
mod db;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod preprocess;
pub mod ranker;
mod server;
pub mod store;
pub mod utils;
pub mod vtable;

pub use config::Opts;
pub use error::Error;
pub use store::EmbeddingStore;
