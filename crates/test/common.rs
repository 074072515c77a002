// shared by the bins; each uses a subset
#![allow(dead_code)]

use std::path::Path;

use anyhow::{Context, Result};
use autopop_core::types::{Capture, Region};

/// Load a PNG as a capture of the region `(0, 0, w, h)`.
pub fn load_capture(path: &Path) -> Result<Capture> {
    let img = image::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .to_rgba8();
    let (w, h) = img.dimensions();
    let mut data = Vec::with_capacity((w * h * 4) as usize);
    for px in img.pixels() {
        let [r, g, b, a] = px.0;
        data.extend_from_slice(&[b, g, r, a]);
    }
    Ok(Capture::from_bgra(Region::from_size(0, 0, w as i32, h as i32), w, h, data))
}

pub fn save_capture(cap: &Capture, path: &Path) -> Result<()> {
    let mut img = image::RgbaImage::new(cap.width, cap.height);
    for y in 0..cap.height {
        for x in 0..cap.width {
            let (b, g, r) = cap.bgr(x, y);
            img.put_pixel(x, y, image::Rgba([r, g, b, 255]));
        }
    }
    img.save(path).with_context(|| format!("writing {}", path.display()))
}

/// Changed pixels in red over a dimmed copy of `after`.
pub fn save_mask(after: &Capture, mask: &[bool], path: &Path) -> Result<()> {
    let mut img = image::RgbaImage::new(after.width, after.height);
    for y in 0..after.height {
        for x in 0..after.width {
            let px = if mask[(y * after.width + x) as usize] {
                image::Rgba([255, 0, 0, 255])
            } else {
                let (b, g, r) = after.bgr(x, y);
                image::Rgba([r / 3, g / 3, b / 3, 255])
            };
            img.put_pixel(x, y, px);
        }
    }
    img.save(path).with_context(|| format!("writing {}", path.display()))
}
