use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::ProgressBar;
use log::{info, warn};
use ndarray::Array3;
use rayon::prelude::*;

use crate::config::PipelineOptions;
use crate::encoder::VisionEncoder;
use crate::error::{Error, Result};
use crate::preprocess;
use crate::utils::{pb_style, retry_with_backoff};
use crate::vtable::{self, VectorRow};

/// 待嵌入的源图片，由外部采集方提供
///
/// `meta` 是采集方给出的元数据行，向量列留空，由流水线填充。
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub path: PathBuf,
    pub meta: VectorRow,
}

/// 一个独立处理的迷你批次
#[derive(Debug, Clone)]
pub struct MiniBatch {
    pub name: String,
    pub images: Vec<SourceImage>,
}

/// 迷你批次的处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Normalizing,
    Encoding,
    Persisted,
    Done,
    Failed,
}

/// 单个迷你批次的处理结果
#[derive(Debug)]
pub struct BatchOutcome {
    pub name: String,
    pub state: BatchState,
    /// 批次失败时的起始阶段
    pub failed_from: Option<BatchState>,
    /// 成功持久化的向量数量
    pub succeeded: usize,
    /// 逐图片的失败明细 (file_id, 原因)
    pub failures: Vec<(String, String)>,
    /// 批次级失败的原因
    pub error: Option<String>,
    /// 幂等检查命中，本次没有做任何工作
    pub skipped: bool,
}

/// 批量嵌入流水线
///
/// 编码器由调用方构造一次后按引用传入，所有 worker 共享同一个实例。
/// 迷你批次之间相互独立：一个批次失败不影响其余批次，结果在批次边界
/// 合并进一个由互斥锁保护的共享表。
pub struct Pipeline<'a, E: VisionEncoder> {
    encoder: &'a E,
    input_size: u32,
    options: PipelineOptions,
    out_dir: PathBuf,
}

impl<'a, E: VisionEncoder> Pipeline<'a, E> {
    pub fn new(encoder: &'a E, input_size: u32, options: PipelineOptions, out_dir: PathBuf) -> Self {
        Self { encoder, input_size, options, out_dir }
    }

    /// 批次产物（向量表文件）的路径
    pub fn output_path(&self, name: &str) -> PathBuf {
        self.out_dir.join(format!("{name}.tsv"))
    }

    /// 并行处理所有迷你批次，返回与输入同序的结果列表
    pub fn run_all(&self, batches: &[MiniBatch]) -> Vec<BatchOutcome> {
        let total: u64 = batches.iter().map(|b| b.images.len() as u64).sum();
        let pb = ProgressBar::new(total).with_style(pb_style());

        // 批次名只用于产物命名，结果按输入位置合并，重名批次互不覆盖
        let results: Mutex<HashMap<usize, BatchOutcome>> = Mutex::new(HashMap::new());
        batches.par_iter().enumerate().for_each(|(i, batch)| {
            let outcome = self.run(batch, &pb);
            results
                .lock()
                .expect("failed to acquire results lock")
                .insert(i, outcome);
        });
        pb.finish_and_clear();

        let mut results = results.into_inner().expect("failed to acquire results lock");
        (0..batches.len()).filter_map(|i| results.remove(&i)).collect()
    }

    /// 处理单个迷你批次，任何失败都被吸收进返回值
    pub fn run(&self, batch: &MiniBatch, pb: &ProgressBar) -> BatchOutcome {
        match self.process(batch, pb) {
            Ok(outcome) => outcome,
            Err((stage, e)) => {
                warn!("批次 {} 在 {:?} 阶段失败: {}", batch.name, stage, e);
                BatchOutcome {
                    name: batch.name.clone(),
                    state: BatchState::Failed,
                    failed_from: Some(stage),
                    succeeded: 0,
                    failures: vec![],
                    error: Some(e.to_string()),
                    skipped: false,
                }
            }
        }
    }

    fn process(
        &self,
        batch: &MiniBatch,
        pb: &ProgressBar,
    ) -> Result<BatchOutcome, (BatchState, Error)> {
        let out = self.output_path(&batch.name);

        // 幂等检查：产物存在、内容哈希一致且通过校验时不再重复编码
        if vtable::verify(&out) {
            if let Ok(rows) = vtable::read(&out) {
                if vtable::validate_rows(&rows).is_ok() {
                    info!("批次 {} 的产物已存在且校验通过，跳过", batch.name);
                    pb.inc(batch.images.len() as u64);
                    return Ok(BatchOutcome {
                        name: batch.name.clone(),
                        state: BatchState::Done,
                        failed_from: None,
                        succeeded: rows.len(),
                        failures: vec![],
                        error: None,
                        skipped: true,
                    });
                }
            }
        }

        let mut state = BatchState::Normalizing;
        info!("批次 {}: 开始规范化 {} 张图片", batch.name, batch.images.len());

        // 规范化结果先落在各 worker 的局部缓冲，collect 时按输入顺序
        // 合并，既不阻塞线程池也保证产物内容可复现
        let results: Vec<Result<Array3<f32>>> = batch
            .images
            .par_iter()
            .map(|image| {
                let result = self.load_and_normalize(image);
                pb.inc(1);
                result
            })
            .collect();

        let mut normalized: Vec<(usize, Array3<f32>)> = vec![];
        let mut failures: Vec<(String, String)> = vec![];
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(tensor) => normalized.push((i, tensor)),
                // 瞬时错误重试耗尽后升级为批次失败，坏图片只跳过
                Err(e) if e.is_transient() => return Err((state, e)),
                Err(e) => {
                    let id = &batch.images[i].meta.file_id;
                    warn!("跳过图片 {id}: {e}");
                    failures.push((id.clone(), e.to_string()));
                }
            }
        }

        state = BatchState::Encoding;
        info!("批次 {}: 编码 {} 张图片", batch.name, normalized.len());

        let sub_batch = self.options.encode_batch.max(1);
        let (indices, tensors): (Vec<usize>, Vec<Array3<f32>>) = normalized.into_iter().unzip();

        let mut vectors: Vec<(usize, Vec<f32>)> = Vec::with_capacity(indices.len());
        for (chunk_ids, chunk_tensors) in indices.chunks(sub_batch).zip(tensors.chunks(sub_batch)) {
            let encoded =
                self.encoder.encode_batch(chunk_tensors).map_err(|e| (state, e))?;
            vectors.extend(chunk_ids.iter().copied().zip(encoded));
        }

        let rows: Vec<VectorRow> = vectors
            .iter()
            .map(|(i, vector)| {
                let mut row = batch.images[*i].meta.clone();
                row.embedding = vtable::format_vector(vector);
                row
            })
            .collect();
        vtable::write(&out, &rows).map_err(|e| (state, e))?;

        info!("批次 {}: 已持久化 {} 个向量到 {}", batch.name, rows.len(), out.display());

        Ok(BatchOutcome {
            name: batch.name.clone(),
            state: BatchState::Done,
            failed_from: None,
            succeeded: rows.len(),
            failures,
            error: None,
            skipped: false,
        })
    }

    fn load_and_normalize(&self, image: &SourceImage) -> Result<Array3<f32>> {
        let bytes = retry_with_backoff(
            self.options.retries,
            Duration::from_millis(self.options.retry_delay),
            || Ok(fs::read(&image.path)?),
        )?;
        preprocess::normalize(&bytes, self.input_size)
    }
}

/// 按索引区间把全量记录确定性地划分为迷你批次
pub fn partition(images: Vec<SourceImage>, size: usize) -> Vec<MiniBatch> {
    let size = size.max(1);
    let mut chunks = vec![];
    let mut current = Vec::with_capacity(size);
    for image in images {
        current.push(image);
        if current.len() == size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, images)| MiniBatch { name: format!("minibatch_{:04}", i + 1), images })
        .collect()
}

/// 打印一次批处理的逐单元汇总
pub fn print_summary(outcomes: &[BatchOutcome]) {
    for outcome in outcomes {
        match outcome.state {
            BatchState::Done if outcome.skipped => {
                println!("[SKIP] {}: {} 个已有向量", outcome.name, outcome.succeeded)
            }
            BatchState::Done => println!(
                "[OK] {}: {} 个向量, {} 张图片失败",
                outcome.name,
                outcome.succeeded,
                outcome.failures.len()
            ),
            _ => println!(
                "[ERR] {}: {} (阶段 {:?})",
                outcome.name,
                outcome.error.as_deref().unwrap_or("未知错误"),
                outcome.failed_from.unwrap_or(BatchState::Pending),
            ),
        }
        for (id, reason) in &outcome.failures {
            println!("       跳过 {id}: {reason}");
        }
    }
}
