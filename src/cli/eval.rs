use std::fs;
use std::path::PathBuf;

use clap::Parser;
use indicatif::ProgressBar;
use log::info;
use regex::Regex;
use tokio::task::block_in_place;
use walkdir::WalkDir;

use crate::cli::SubCommandExtend;
use crate::config::{DbOptions, EncoderOptions, Opts, SearchOptions};
use crate::encoder::{ClipEncoder, VisionEncoder};
use crate::ranker;
use crate::utils::pb_style;
use crate::{preprocess, store};

#[derive(Parser, Debug, Clone)]
pub struct EvalCommand {
    #[command(flatten)]
    pub encoder: EncoderOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    #[command(flatten)]
    pub db: DbOptions,
    /// 查询图片所在目录
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,png")]
    pub suffix: String,
    /// 从本地向量表（文件或目录）加载向量库，代替数据库
    #[arg(long, value_name = "PATH")]
    pub vectors: Option<PathBuf>,
    /// 用正则表达式从文件名主干提取期望标识的 name 分组
    /// 例：`design_crop_(?<name>[0-9a-f]+)`；默认取最后一个下划线分段
    #[arg(short, long, verbatim_doc_comment)]
    pub regex: Option<String>,
    /// 把逐查询结果导出为制表符分隔的审计文件
    #[arg(long, value_name = "FILE")]
    pub audit: Option<PathBuf>,
}

impl SubCommandExtend for EvalCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let store = super::load_store(self.vectors.as_deref(), &self.db).await?;
        let encoder = ClipEncoder::load(&self.encoder.model_path(&opts.conf_dir), &self.encoder)?;
        let re_name = self.regex.as_ref().map(|re| Regex::new(re)).transpose()?;

        let re_suf = format!("(?i)({})", self.suffix.replace(',', "|"));
        let re_suf = Regex::new(&re_suf).expect("failed to build regex");
        let mut files = vec![];
        for entry in WalkDir::new(&self.path).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .is_some_and(|ext| re_suf.is_match(&ext.to_string_lossy()))
            {
                files.push(entry.into_path());
            }
        }
        info!("共 {} 张查询图片", files.len());

        let pb = ProgressBar::new(files.len() as u64).with_style(pb_style());
        let mut results = vec![];
        for file in &files {
            let stem = file.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
            let expected = match &re_name {
                Some(re) => re
                    .captures(&stem)
                    .and_then(|c| c.name("name"))
                    .map(|m| m.as_str().to_string()),
                None => Some(ranker::expected_id_from_stem(&stem).to_string()),
            };
            let Some(expected) = expected else {
                pb.println(format!("提取期望标识失败: {}", file.display()));
                pb.inc(1);
                continue;
            };

            let hits = block_in_place(|| -> anyhow::Result<_> {
                let bytes = fs::read(file)?;
                let tensor = preprocess::normalize(&bytes, encoder.input_size())?;
                let query = store::normalize_query(encoder.encode(&tensor)?)?;
                Ok(store.query(&query, self.search.count)?)
            })?;

            let ranked = ranker::rank_hits(hits);
            let analysis =
                ranker::analyze_ranking(&file.to_string_lossy(), &expected, &ranked);
            results.push((analysis, ranked));
            pb.inc(1);
        }
        pb.finish_and_clear();

        let analyses: Vec<_> = results.iter().map(|(a, _)| a.clone()).collect();
        let summary = ranker::summarize(&analyses);
        println!("查询总数: {}", summary.total);
        println!("top-1 : {} ({:.1}%)", summary.top_1, summary.percent(summary.top_1));
        println!("top-3 : {} ({:.1}%)", summary.top_3, summary.percent(summary.top_3));
        println!("top-5 : {} ({:.1}%)", summary.top_5, summary.percent(summary.top_5));
        println!("top-10: {} ({:.1}%)", summary.top_10, summary.percent(summary.top_10));

        if let Some(path) = &self.audit {
            ranker::write_audit(path, &results)?;
        }
        Ok(())
    }
}
