use crate::image::ImageLoader;
use crate::Result;
use image::{imageops::FilterType, DynamicImage};
use ndarray::Array4;
use std::path::Path;

pub const INPUT_WIDTH: u32 = 100;
pub const INPUT_HEIGHT: u32 = 75;

pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// 读取文件并转换为模型输入
    pub fn load_tensor(path: &Path, width: u32, height: u32) -> Result<Array4<f32>> {
        let image = ImageLoader::from_path(path)?;
        Ok(Self::to_input_tensor(&image, width, height))
    }

    /// 缩放到固定尺寸，像素值除以255归一化到 [0,1]，并添加batch维度。
    ///
    /// 输出为NHWC布局 `[1, height, width, 3]`。
    pub fn to_input_tensor(image: &DynamicImage, width: u32, height: u32) -> Array4<f32> {
        // 与训练时的加载方式一致，使用最近邻插值
        let resized = image.resize_exact(width, height, FilterType::Nearest);
        let rgb = resized.to_rgb8();

        Array4::from_shape_fn(
            (1, height as usize, width as usize, 3),
            |(_, y, x, c)| {
                let pixel = rgb.get_pixel(x as u32, y as u32);
                pixel[c] as f32 / 255.0
            },
        )
    }
}
