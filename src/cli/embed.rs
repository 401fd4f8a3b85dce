use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use log::info;
use regex::Regex;
use tokio::task::block_in_place;
use walkdir::WalkDir;

use crate::cli::SubCommandExtend;
use crate::config::{EncoderOptions, Opts, PipelineOptions};
use crate::encoder::ClipEncoder;
use crate::pipeline::{self, BatchState, Pipeline, SourceImage};
use crate::vtable::{self, VectorRow};

#[derive(Parser, Debug, Clone)]
pub struct EmbedCommand {
    #[command(flatten)]
    pub encoder: EncoderOptions,
    #[command(flatten)]
    pub pipeline: PipelineOptions,
    /// 图片所在目录
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,png")]
    pub suffix: String,
    /// 使用采集端导出的元数据表代替目录扫描，embedding 列留空，
    /// filename 列相对于图片目录解析
    #[arg(long, value_name = "FILE", verbatim_doc_comment)]
    pub manifest: Option<PathBuf>,
    /// 向量表输出目录，不指定时使用配置目录
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,
}

impl SubCommandExtend for EmbedCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let images = match &self.manifest {
            Some(manifest) => self.from_manifest(manifest)?,
            None => self.scan_directory()?,
        };
        anyhow::ensure!(!images.is_empty(), "没有找到任何图片");

        let out_dir = self.output.clone().unwrap_or_else(|| opts.conf_dir.vector_dir());
        let encoder = ClipEncoder::load(&self.encoder.model_path(&opts.conf_dir), &self.encoder)?;
        let batches = pipeline::partition(images, self.pipeline.batch_size);

        rayon::ThreadPoolBuilder::new().num_threads(self.pipeline.jobs).build_global().ok();

        let outcomes = block_in_place(|| {
            let pipeline =
                Pipeline::new(&encoder, self.encoder.input_size, self.pipeline.clone(), out_dir);
            pipeline.run_all(&batches)
        });

        pipeline::print_summary(&outcomes);

        let failed = outcomes.iter().filter(|o| o.state == BatchState::Failed).count();
        anyhow::ensure!(failed == 0, "{failed} 个批次失败");
        Ok(())
    }
}

impl EmbedCommand {
    fn scan_directory(&self) -> anyhow::Result<Vec<SourceImage>> {
        let re_suf = format!("(?i)({})", self.suffix.replace(',', "|"));
        let re_suf = Regex::new(&re_suf).expect("failed to build regex");

        info!("开始扫描目录: {}", self.path.display());
        let mut images = vec![];
        // 按文件名顺序遍历，批次划分才是确定的
        for entry in WalkDir::new(&self.path).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            let Some(ext) = path.extension() else {
                continue;
            };
            if !re_suf.is_match(&ext.to_string_lossy()) {
                continue;
            }
            images.push(source_image(&self.path, path));
        }
        info!("扫描完成，共 {} 张图片", images.len());
        Ok(images)
    }

    fn from_manifest(&self, manifest: &Path) -> anyhow::Result<Vec<SourceImage>> {
        let rows = vtable::read(manifest)?;
        info!("元数据表 {} 共 {} 行", manifest.display(), rows.len());
        Ok(rows
            .into_iter()
            .map(|meta| SourceImage { path: self.path.join(&meta.filename), meta })
            .collect())
    }
}

fn source_image(root: &Path, path: PathBuf) -> SourceImage {
    let lossy = |s: Option<&std::ffi::OsStr>| {
        s.map(|s| s.to_string_lossy().to_string()).unwrap_or_default()
    };
    let rel = path.strip_prefix(root).unwrap_or(&path);
    let meta = VectorRow {
        file_id: rel.to_string_lossy().to_string(),
        filename: lossy(path.file_name()),
        file_extension: lossy(path.extension()),
        folder_name: lossy(path.parent().and_then(|p| p.file_name())),
        file_size: fs::metadata(&path).map(|m| m.len().to_string()).unwrap_or_default(),
        ..Default::default()
    };
    SourceImage { path, meta }
}
