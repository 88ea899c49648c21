use burn::prelude::*;
use image::{imageops::FilterType, RgbImage};
use std::path::Path;

use crate::{
    data::{RawBatch, IMAGE_CHANNELS},
    error::{Result, TrainError},
};

/// Decode an image as 8-bit RGB, resized to `width` x `height`.
pub fn load_image<P: AsRef<Path>>(path: P, width: usize, height: usize) -> Result<RgbImage> {
    let path = path.as_ref();
    let image = image::open(path).map_err(|source| TrainError::Image {
        path: path.to_path_buf(),
        source,
    })?;

    let image = image.to_rgb8();
    if image.width() as usize == width && image.height() as usize == height {
        return Ok(image);
    }
    Ok(image::imageops::resize(
        &image,
        width as u32,
        height as u32,
        FilterType::Triangle,
    ))
}

/// Stack equally sized RGB images into one `[n, height, width, 3]` batch.
pub fn images_to_batch(images: &[RgbImage]) -> RawBatch {
    let (width, height) = images
        .first()
        .map(|image| (image.width() as usize, image.height() as usize))
        .unwrap_or((0, 0));

    let mut pixels = Vec::with_capacity(images.len() * width * height * IMAGE_CHANNELS);
    for image in images {
        pixels.extend_from_slice(image.as_raw());
    }

    RawBatch::new(pixels, [images.len(), height, width, IMAGE_CHANNELS])
}

/// Write a `[n, height, width, channels]` batch in the 0-255 range as a grid.
pub fn save_image<B: Backend, Q: AsRef<Path>>(
    images: Tensor<B, 4>,
    nrow: usize,
    path: Q,
) -> Result<()> {
    let [count, height, width, channels] = images.dims();
    let nrow = nrow.clamp(1, count.max(1));
    let ncol = count.div_ceil(nrow);

    // Supports both 1 and 3 channels image
    let repeat = match channels {
        1 => 3,
        3 => 1,
        _ => {
            return Err(TrainError::ShapeMismatch {
                expected: 3,
                actual: channels,
            })
        }
    };

    let values = images
        .clamp(0.0, 255.0)
        .into_data()
        .iter::<f32>()
        .collect::<Vec<f32>>();
    let image_len = height * width * channels;

    let mut imgbuf = RgbImage::new((nrow * width) as u32, (ncol * height) as u32);
    for index in 0..count {
        let (row, col) = (index % nrow, index / nrow);
        let image = &values[index * image_len..(index + 1) * image_len];
        let image = image
            .iter()
            .flat_map(|&value| std::iter::repeat_n(value as u8, repeat))
            .collect::<Vec<u8>>();

        let Some(image) = RgbImage::from_vec(width as u32, height as u32, image) else {
            continue;
        };
        for (x, y, pixel) in image.enumerate_pixels() {
            imgbuf.put_pixel(
                (row * width) as u32 + x,
                (col * height) as u32 + y,
                *pixel,
            );
        }
    }

    imgbuf.save(path.as_ref()).map_err(|source| TrainError::Image {
        path: path.as_ref().to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::Rgb;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_load_image_resizes_and_converts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        image::GrayImage::from_pixel(6, 10, image::Luma([200])).save(&path).unwrap();

        let image = load_image(&path, 4, 8).unwrap();
        assert_eq!(image.dimensions(), (4, 8));
        assert_eq!(image.get_pixel(1, 1), &Rgb([200, 200, 200]));
    }

    #[test]
    fn test_load_image_reports_path() {
        let err = load_image("/nonexistent/style.jpg", 4, 4).unwrap_err();
        assert!(err.to_string().contains("style.jpg"));
    }

    #[test]
    fn test_images_to_batch_layout() {
        let first = RgbImage::from_pixel(2, 3, Rgb([1, 2, 3]));
        let second = RgbImage::from_pixel(2, 3, Rgb([4, 5, 6]));

        let batch = images_to_batch(&[first, second]);
        assert_eq!(batch.shape(), [2, 3, 2, 3]);
        assert_eq!(&batch.pixels()[..3], &[1, 2, 3]);
        assert_eq!(&batch.pixels()[18..21], &[4, 5, 6]);
    }

    #[test]
    fn test_save_image_grid() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.png");

        let images = Tensor::<TestBackend, 4>::ones([3, 2, 2, 3], &device) * 300.0;
        save_image(images, 2, &path).unwrap();

        let saved = image::open(&path).unwrap().to_rgb8();
        assert_eq!(saved.dimensions(), (4, 4));
        assert_eq!(saved.get_pixel(0, 0), &Rgb([255, 255, 255]));
        // the fourth grid cell has no image
        assert_eq!(saved.get_pixel(3, 3), &Rgb([0, 0, 0]));
    }
}
