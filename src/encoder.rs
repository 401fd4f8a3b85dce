use std::path::Path;
use std::sync::Mutex;

use log::{debug, info};
use ndarray::{Array3, Array4, s};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use crate::config::EncoderOptions;
use crate::error::{Error, Result};

/// 视觉编码器契约
///
/// 实现必须是确定性的：同一个规范化张量总是产生同一个向量。
/// 输出维度在编码器的生命周期内固定，向量库加载时会校验维度一致。
pub trait VisionEncoder: Send + Sync {
    /// 输出向量的维度
    fn dim(&self) -> usize;

    /// 批量编码，一次推理调用处理多个张量以摊薄固定开销
    fn encode_batch(&self, tensors: &[Array3<f32>]) -> Result<Vec<Vec<f32>>>;

    /// 编码单个张量
    fn encode(&self, tensor: &Array3<f32>) -> Result<Vec<f32>> {
        self.encode_batch(std::slice::from_ref(tensor))?
            .pop()
            .ok_or_else(|| Error::Inference("编码器未返回任何向量".to_string()))
    }
}

/// 基于 ONNX Runtime 的 CLIP 视觉编码器
///
/// 会话在构造时加载一次，之后在所有查询和批处理 worker 之间共享，
/// 进程退出时随对象一起释放。推理以 eval 模式运行，没有随机层。
pub struct ClipEncoder {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    input_size: u32,
    dim: usize,
}

impl ClipEncoder {
    /// 从 ONNX 模型文件加载编码器
    pub fn load(model: &Path, options: &EncoderOptions) -> Result<Self> {
        if !model.exists() {
            return Err(Error::ModelNotFound(model.to_path_buf()));
        }

        let session = Session::builder()
            .map_err(ort_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_err)?
            .with_intra_threads(options.intra_threads)
            .map_err(ort_err)?
            .commit_from_file(model)
            .map_err(ort_err)?;

        let input_name =
            session.inputs.first().map(|i| i.name.clone()).unwrap_or_else(|| "pixel_values".into());
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "image_embeds".into());

        info!("已加载视觉编码器: {}", model.display());
        debug!("编码器输入: {}, 输出: {}", input_name, output_name);

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            input_size: options.input_size,
            dim: options.dim,
        })
    }

    /// 编码器期望的输入边长
    pub fn input_size(&self) -> u32 {
        self.input_size
    }
}

impl VisionEncoder for ClipEncoder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn encode_batch(&self, tensors: &[Array3<f32>]) -> Result<Vec<Vec<f32>>> {
        if tensors.is_empty() {
            return Ok(vec![]);
        }

        let size = self.input_size as usize;
        let mut batch = Array4::<f32>::zeros((tensors.len(), 3, size, size));
        for (i, tensor) in tensors.iter().enumerate() {
            if tensor.dim() != (3, size, size) {
                return Err(Error::Inference(format!(
                    "输入张量形状 {:?} 与编码器期望的 (3, {size}, {size}) 不一致",
                    tensor.dim()
                )));
            }
            batch.slice_mut(s![i, .., .., ..]).assign(tensor);
        }

        let input = Tensor::from_array(batch).map_err(ort_err)?;
        let input_name = self.input_name.clone();

        let mut session =
            self.session.lock().map_err(|_| Error::Inference("编码器会话锁中毒".to_string()))?;
        let outputs = session.run(ort::inputs![input_name => input]).map_err(ort_err)?;

        let output = outputs
            .get(&self.output_name)
            .ok_or_else(|| Error::Inference(format!("模型没有输出 {}", self.output_name)))?;
        let (_, data) = output.try_extract_tensor::<f32>().map_err(ort_err)?;

        if data.len() != tensors.len() * self.dim {
            return Err(Error::Inference(format!(
                "编码器输出了 {} 个值，与 {} x {} 不符",
                data.len(),
                tensors.len(),
                self.dim
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(Error::Inference("编码器输出包含非有限值".to_string()));
        }

        Ok(data.chunks(self.dim).map(|chunk| chunk.to_vec()).collect())
    }
}

fn ort_err(e: ort::Error) -> Error {
    Error::Inference(e.to_string())
}
