use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{DbOptions, EncoderOptions, Opts, OutputFormat, SearchOptions};
use crate::encoder::{ClipEncoder, VisionEncoder};
use crate::ranker::{self, RankedHit};
use crate::{preprocess, store};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub encoder: EncoderOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    #[command(flatten)]
    pub db: DbOptions,
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 从本地向量表（文件或目录）加载向量库，代替数据库
    #[arg(long, value_name = "PATH")]
    pub vectors: Option<PathBuf>,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let store = super::load_store(self.vectors.as_deref(), &self.db).await?;
        let encoder = ClipEncoder::load(&self.encoder.model_path(&opts.conf_dir), &self.encoder)?;

        let hits = block_in_place(|| -> anyhow::Result<_> {
            let bytes = fs::read(&self.image)?;
            let tensor = preprocess::normalize(&bytes, encoder.input_size())?;
            let query = store::normalize_query(encoder.encode(&tensor)?)?;
            Ok(store.query(&query, self.search.count)?)
        })?;

        print_result(&ranker::rank_hits(hits), self)
    }
}

fn print_result(result: &[RankedHit], opts: &SearchCommand) -> Result<()> {
    match opts.search.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for hit in result {
                println!("{}\t{:.4}\t{}\t{}", hit.rank, hit.score, hit.file_id, hit.filename);
            }
        }
    }
    Ok(())
}
