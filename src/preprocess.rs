//! 查询图片预处理
//!
//! 将请求中的图片转换为模型需要的输入张量，形状固定为 `(1, 3, 224, 224)`。
//! 处理顺序：解码 -> 双三次插值缩放到 224x224（不保持长宽比）-> 转为 RGB
//! -> 缩放到 [0, 1] -> 按通道标准化。带透明通道的图片在预乘 alpha 的空间中缩放。

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use ndarray::Array4;

use crate::config::{INPUT_SIZE, MEAN, STD};
use crate::error::{Error, Result};

/// 去掉 data URI 头部，即第一个逗号及其之前的内容
pub fn strip_data_uri(encoded: &str) -> &str {
    match encoded.find(',') {
        Some(pos) => &encoded[pos + 1..],
        None => encoded,
    }
}

/// 解码 base64 图片数据，允许带有 data URI 头部
pub fn decode_payload(encoded: &str) -> Result<Vec<u8>> {
    // 忽略换行等空白字符
    let payload = strip_data_uri(encoded)
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect::<Vec<_>>();
    STANDARD.decode(payload).map_err(|e| Error::Decode(format!("base64: {e}")))
}

/// 将 base64 编码的图片转换为模型输入张量
pub fn preprocess(encoded: &str) -> Result<Array4<f32>> {
    let bytes = decode_payload(encoded)?;
    preprocess_bytes(&bytes)
}

/// 将原始图片字节转换为模型输入张量
pub fn preprocess_bytes(bytes: &[u8]) -> Result<Array4<f32>> {
    let image = image::load_from_memory(bytes).map_err(|e| Error::Decode(e.to_string()))?;
    Ok(to_tensor(&image))
}

/// 缩放、转为 RGB 并标准化
///
/// NOTE: 先缩放再转换通道，且直接拉伸到正方形，这样才能与图库特征的提取方式保持一致
pub fn to_tensor(image: &DynamicImage) -> Array4<f32> {
    let size = INPUT_SIZE as usize;
    let rgb = resize(image).to_rgb8();

    Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        let value = rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
        (value - MEAN[c]) / STD[c]
    })
}

/// 双三次插值缩放到 [`INPUT_SIZE`] x [`INPUT_SIZE`]
///
/// 有透明通道时先预乘 alpha 再缩放，缩放后还原，透明像素的颜色不会渗入相邻像素
fn resize(image: &DynamicImage) -> DynamicImage {
    if !image.color().has_alpha() {
        return image.resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);
    }

    let mut rgba = image.to_rgba8();
    premultiply(&mut rgba);
    let mut resized = imageops::resize(&rgba, INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);
    unpremultiply(&mut resized);
    DynamicImage::ImageRgba8(resized)
}

fn premultiply(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        let alpha = pixel[3] as u32;
        for c in &mut pixel.0[..3] {
            // 四舍五入的 c * alpha / 255
            let t = *c as u32 * alpha + 128;
            *c = ((t + (t >> 8)) >> 8) as u8;
        }
    }
}

fn unpremultiply(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        let alpha = pixel[3] as u32;
        if alpha == 0 || alpha == 255 {
            continue;
        }
        for c in &mut pixel.0[..3] {
            *c = (*c as u32 * 255 / alpha).min(255) as u8;
        }
    }
}
