use image::error::UnsupportedErrorKind;
use image::{DynamicImage, ImageError, imageops::FilterType};
use ndarray::Array3;

use crate::error::{Error, Result};

/// CLIP 系列模型的通道均值
pub const CLIP_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
/// CLIP 系列模型的通道标准差
pub const CLIP_STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

/// 带透明通道的图片合成到的背景灰度值
const FLATTEN_BACKGROUND: f32 = 128.;

/// 将任意格式的图片字节解码并规范化为编码器输入张量
///
/// 处理流程与编码器的训练预处理保持一致：
/// 1. 解码并展平透明通道（灰底合成）
/// 2. Lanczos 重采样到 `size x size`
/// 3. 按 CLIP 均值 / 标准差归一化，输出 CHW 布局
///
/// 同样的输入字节总是产生完全相同的张量，嵌入向量的可比性依赖这一点。
pub fn normalize(bytes: &[u8], size: u32) -> Result<Array3<f32>> {
    let img = image::load_from_memory(bytes).map_err(map_image_error)?;
    normalize_image(&img, size)
}

/// [`normalize`] 的 `DynamicImage` 版本，供已解码的调用方使用
pub fn normalize_image(img: &DynamicImage, size: u32) -> Result<Array3<f32>> {
    let resized = img.resize_exact(size, size, FilterType::Lanczos3);
    let rgba = resized.to_rgba8();

    let size = size as usize;
    let mut tensor = Array3::<f32>::zeros((3, size, size));
    for (y, row) in rgba.rows().enumerate() {
        for (x, pixel) in row.enumerate() {
            let alpha = pixel[3] as f32 / 255.;
            for c in 0..3 {
                let value = pixel[c] as f32 * alpha + FLATTEN_BACKGROUND * (1. - alpha);
                tensor[[c, y, x]] = (value / 255. - CLIP_MEAN[c]) / CLIP_STD[c];
            }
        }
    }

    Ok(tensor)
}

fn map_image_error(e: ImageError) -> Error {
    match &e {
        // 只有颜色模式无法转换才算模式错误，格式无法识别按解码失败处理
        ImageError::Unsupported(u) if matches!(u.kind(), UnsupportedErrorKind::Color(_)) => {
            Error::UnsupportedMode(e.to_string())
        }
        _ => Error::Decode(e.to_string()),
    }
}
