use image::DynamicImage;
use image::ImageReader;
use image::imageops::FilterType;
use ndarray::Array4;
use std::io::Cursor;

use super::error::InferenceError;

/// Per-channel affine normalization applied after scaling pixels to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    pub const HALF: Normalization = Normalization {
        mean: [0.5, 0.5, 0.5],
        std: [0.5, 0.5, 0.5],
    };
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization::HALF
    }
}

/// Channel-first `(1, 3, size, size)` image tensor ready for a forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTensor(Array4<f32>);

impl NormalizedTensor {
    #[cfg(test)]
    pub fn view(&self) -> ndarray::ArrayView4<'_, f32> {
        self.0.view()
    }

    pub fn shape(&self) -> [usize; 4] {
        let s = self.0.shape();
        [s[0], s[1], s[2], s[3]]
    }

    /// Contiguous row-major data, in `shape()` order.
    pub fn as_slice(&self) -> &[f32] {
        // Only ever built through `Array4::zeros`, which is standard layout.
        self.0.as_slice().unwrap_or(&[])
    }
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
    size: u32,
    normalization: Normalization,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(224, Normalization::default())
    }
}

impl Preprocessor {
    pub fn new(size: u32, normalization: Normalization) -> Self {
        Self {
            size,
            normalization,
        }
    }

    /// Decodes an encoded image (PNG, JPEG, ...), guessing the format from its bytes.
    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, InferenceError> {
        if bytes.is_empty() {
            return Err(InferenceError::Input("Empty image payload".into()));
        }
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| InferenceError::Input(format!("Unable to read image: {}", e)))?
            .decode()
            .map_err(|e| InferenceError::Input(format!("Unable to decode image: {}", e)))
    }

    pub fn preprocess_bytes(&self, bytes: &[u8]) -> Result<NormalizedTensor, InferenceError> {
        let image = self.decode(bytes)?;
        Ok(self.preprocess(&image))
    }

    /// Resizes to `size x size`, converts to RGB and normalizes each channel.
    pub fn preprocess(&self, image: &DynamicImage) -> NormalizedTensor {
        let size = self.size as usize;
        let resized = image
            .resize_exact(self.size, self.size, FilterType::Triangle)
            .to_rgb8();

        let Normalization { mean, std } = self.normalization;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                tensor[[0, c, y as usize, x as usize]] = (value - mean[c]) / std[c];
            }
        }
        NormalizedTensor(tensor)
    }
}
