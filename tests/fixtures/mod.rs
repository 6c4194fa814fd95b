//! Synthetic floor-plan bitmaps and payload builders

#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{GrayImage, ImageFormat, Luma};
use serde_json::{json, Value};
use std::io::Cursor;

pub const PLAN_WIDTH: u32 = 400;
pub const PLAN_HEIGHT: u32 = 300;

/// Fill the axis-aligned rectangle `[x0, x1) x [y0, y1)` with `value`.
pub fn fill(img: &mut GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, value: u8) {
    for y in y0..y1.min(img.height()) {
        for x in x0..x1.min(img.width()) {
            img.put_pixel(x, y, Luma([value]));
        }
    }
}

/// One closed room: a 4px black outline spanning x 20..380, y 20..280 on white.
pub fn single_room_plan() -> GrayImage {
    let mut img = GrayImage::from_pixel(PLAN_WIDTH, PLAN_HEIGHT, Luma([255]));
    fill(&mut img, 20, 20, 380, 280, 0);
    fill(&mut img, 24, 24, 376, 276, 255);
    img
}

/// Blank white page with nothing to detect.
pub fn blank_page(width: u32, height: u32) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([255]))
}

pub fn png_bytes(img: &GrayImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("PNG encoding of a fixture cannot fail");
    out.into_inner()
}

pub fn image_source(img: &GrayImage) -> Value {
    json!({ "bytes": STANDARD.encode(png_bytes(img)) })
}

pub fn vision_payload(img: &GrayImage, analysis_type: &str) -> Value {
    json!({
        "image": image_source(img),
        "settings": { "analysisType": analysis_type },
    })
}

pub fn ocr_region_payload(img: &GrayImage) -> Value {
    json!({
        "image": image_source(img),
        "settings": {
            "preprocess": false,
            "regions": [{ "x": 0, "y": 0, "w": 100, "h": 50, "label": "title" }],
        },
    })
}
