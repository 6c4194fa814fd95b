//! Approximate grayscale morphology built from 3×3 neighborhood filters.

use image::GrayImage;

use super::buffer;

pub fn erode(image: &GrayImage, iterations: usize) -> GrayImage {
    repeat(image, iterations, buffer::median_filter)
}

pub fn dilate(image: &GrayImage, iterations: usize) -> GrayImage {
    repeat(image, iterations, buffer::box_blur)
}

/// Erode then dilate.
pub fn open(image: &GrayImage, iterations: usize) -> GrayImage {
    dilate(&erode(image, iterations), iterations)
}

/// Dilate then erode.
pub fn close(image: &GrayImage, iterations: usize) -> GrayImage {
    erode(&dilate(image, iterations), iterations)
}

fn repeat(image: &GrayImage, iterations: usize, step: fn(&GrayImage) -> GrayImage) -> GrayImage {
    let mut out = image.clone();
    for _ in 0..iterations {
        out = step(&out);
    }
    out
}
