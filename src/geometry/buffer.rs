//! Pixel-level primitives shared by the detectors: clamped sampling, 3×3
//! convolution, blur, median and thresholding over `image::GrayImage`.

use image::{DynamicImage, GrayImage, Luma};

pub type Kernel3 = [[i32; 3]; 3];

pub const SOBEL_X: Kernel3 = [[-1, 0, 1], [-2, 0, 2], [-1, 0, 1]];
pub const SOBEL_Y: Kernel3 = [[-1, -2, -1], [0, 0, 0], [1, 2, 1]];
const GAUSSIAN: Kernel3 = [[1, 2, 1], [2, 4, 2], [1, 2, 1]];

pub fn to_grayscale(image: &DynamicImage) -> GrayImage {
    image.to_luma8()
}

/// Sample with coordinates clamped to the image edge.
#[inline]
pub fn sample_clamped(image: &GrayImage, x: i64, y: i64) -> u8 {
    let cx = x.clamp(0, image.width() as i64 - 1) as u32;
    let cy = y.clamp(0, image.height() as i64 - 1) as u32;
    image.get_pixel(cx, cy).0[0]
}

/// Raw signed response of a 3×3 kernel at every pixel, row-major.
pub fn convolve3(image: &GrayImage, kernel: &Kernel3) -> Vec<i32> {
    let (width, height) = image.dimensions();
    let mut out = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let mut acc = 0i32;
            for (ky, row) in kernel.iter().enumerate() {
                for (kx, weight) in row.iter().enumerate() {
                    if *weight != 0 {
                        let v = sample_clamped(image, x + kx as i64 - 1, y + ky as i64 - 1);
                        acc += weight * v as i32;
                    }
                }
            }
            out.push(acc);
        }
    }
    out
}

/// 3×3 Gaussian blur (`[1 2 1]ᵀ[1 2 1] / 16`) with rounding.
pub fn gaussian_blur(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let response = convolve3(image, &GAUSSIAN);
    GrayImage::from_fn(width, height, |x, y| {
        let v = response[(y * width + x) as usize];
        Luma([((v + 8) / 16).clamp(0, 255) as u8])
    })
}

/// 3×3 mean filter.
pub fn box_blur(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let mut sum = 0u32;
        for dy in -1..=1 {
            for dx in -1..=1 {
                sum += sample_clamped(image, x as i64 + dx, y as i64 + dy) as u32;
            }
        }
        Luma([((sum + 4) / 9) as u8])
    })
}

/// 3×3 median filter.
pub fn median_filter(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let mut window = [0u8; 9];
        let mut i = 0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                window[i] = sample_clamped(image, x as i64 + dx, y as i64 + dy);
                i += 1;
            }
        }
        window.sort_unstable();
        Luma([window[4]])
    })
}

/// Binary image (0/255). With `invert`, pixels *below* `level` become 255.
pub fn threshold(image: &GrayImage, level: u8, invert: bool) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let on = image.get_pixel(x, y).0[0] >= level;
        Luma([if on != invert { 255 } else { 0 }])
    })
}

/// Linearly rescale intensities so the darkest pixel maps to 0 and the
/// brightest to 255. Uniform images are returned unchanged.
pub fn stretch_contrast(image: &GrayImage) -> GrayImage {
    let (min, max) = image
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if max <= min {
        return image.clone();
    }
    let range = (max - min) as f64;
    let mut out = image.clone();
    for p in out.pixels_mut() {
        let v = (p.0[0] - min) as f64 / range * 255.0;
        p.0[0] = v.round() as u8;
    }
    out
}

/// Count of pixels with a non-zero value.
pub fn count_nonzero(image: &GrayImage) -> u64 {
    image.pixels().filter(|p| p.0[0] > 0).count() as u64
}
