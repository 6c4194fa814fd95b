//! Connected-component labeling over binary images using an explicit-stack
//! flood fill.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::models::geometry::BoundingBox;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Four,
    #[default]
    Eight,
}

impl Connectivity {
    pub fn offsets(self) -> &'static [(i64, i64)] {
        const FOUR: [(i64, i64); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
        const EIGHT: [(i64, i64); 8] = [
            (1, 0),
            (-1, 0),
            (0, 1),
            (0, -1),
            (1, 1),
            (1, -1),
            (-1, 1),
            (-1, -1),
        ];
        match self {
            Connectivity::Four => &FOUR,
            Connectivity::Eight => &EIGHT,
        }
    }
}

/// A maximal set of adjacent foreground pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// 1-based label; 0 marks background in the label map.
    pub label: u32,
    pub pixels: Vec<(u32, u32)>,
    pub bounding_box: BoundingBox,
    pub area: usize,
}

impl Component {
    pub fn touches_border(&self, width: u32, height: u32) -> bool {
        let b = &self.bounding_box;
        b.x <= 0.0
            || b.y <= 0.0
            || b.x + b.width >= width as f64
            || b.y + b.height >= height as f64
    }
}

/// Per-pixel labels together with the components they describe.
#[derive(Debug, Clone)]
pub struct LabelMap {
    pub width: u32,
    pub height: u32,
    pub labels: Vec<u32>,
    pub components: Vec<Component>,
}

impl LabelMap {
    pub fn label_at(&self, x: i64, y: i64) -> u32 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            0
        } else {
            self.labels[(y as u32 * self.width + x as u32) as usize]
        }
    }

    pub fn component(&self, label: u32) -> Option<&Component> {
        label
            .checked_sub(1)
            .and_then(|i| self.components.get(i as usize))
    }
}

/// Fill every unlabeled foreground pixel reachable from `seed` with `label`.
/// Returns the number of pixels filled.
pub fn flood_fill(
    binary: &GrayImage,
    labels: &mut [u32],
    seed: (u32, u32),
    label: u32,
    connectivity: Connectivity,
) -> usize {
    let (width, height) = binary.dimensions();
    let index = |x: u32, y: u32| (y * width + x) as usize;
    let is_open = |labels: &[u32], x: u32, y: u32| {
        labels[index(x, y)] == 0 && binary.get_pixel(x, y).0[0] > 0
    };

    if !is_open(labels, seed.0, seed.1) {
        return 0;
    }

    let mut filled = 0;
    let mut stack = vec![seed];
    labels[index(seed.0, seed.1)] = label;
    while let Some((x, y)) = stack.pop() {
        filled += 1;
        for (dx, dy) in connectivity.offsets() {
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                continue;
            }
            let (nx, ny) = (nx as u32, ny as u32);
            if is_open(labels, nx, ny) {
                labels[index(nx, ny)] = label;
                stack.push((nx, ny));
            }
        }
    }
    filled
}

/// Label all non-zero pixels. The first pass assigns labels by flood fill in
/// raster order; the second collects pixels and extents per label.
pub fn label_components(binary: &GrayImage, connectivity: Connectivity) -> LabelMap {
    let (width, height) = binary.dimensions();
    let mut labels = vec![0u32; width as usize * height as usize];

    let mut next_label = 0u32;
    for y in 0..height {
        for x in 0..width {
            if labels[(y * width + x) as usize] == 0 && binary.get_pixel(x, y).0[0] > 0 {
                next_label += 1;
                flood_fill(binary, &mut labels, (x, y), next_label, connectivity);
            }
        }
    }

    let mut pixels: Vec<Vec<(u32, u32)>> = vec![Vec::new(); next_label as usize];
    let mut extents = vec![(u32::MAX, u32::MAX, 0u32, 0u32); next_label as usize];
    for y in 0..height {
        for x in 0..width {
            let label = labels[(y * width + x) as usize];
            if label == 0 {
                continue;
            }
            let i = (label - 1) as usize;
            pixels[i].push((x, y));
            let e = &mut extents[i];
            *e = (e.0.min(x), e.1.min(y), e.2.max(x), e.3.max(y));
        }
    }

    let components = pixels
        .into_iter()
        .zip(extents)
        .enumerate()
        .map(|(i, (pixels, (x0, y0, x1, y1)))| Component {
            label: i as u32 + 1,
            area: pixels.len(),
            bounding_box: BoundingBox::new(
                x0 as f64,
                y0 as f64,
                (x1 - x0 + 1) as f64,
                (y1 - y0 + 1) as f64,
            ),
            pixels,
        })
        .collect();

    LabelMap {
        width,
        height,
        labels,
        components,
    }
}
