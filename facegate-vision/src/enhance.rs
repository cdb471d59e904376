//! Low-light handling: brightness measurement and contrast-limited adaptive
//! histogram equalisation (CLAHE) applied to luminance only.
//!
//! The frame is split into Y/Cb/Cr (full-range BT.601), Y is equalised per
//! tile with the histogram clipped at `clip_limit` times the uniform bin
//! height, tile mappings are bilinearly blended, and the original chroma is
//! recombined.

use image::{GrayImage, Luma, Rgb, RgbImage};

/// Mean of the Rec.601 luma, in `[0, 255]`. Each pixel is rounded to a
/// byte first, like an 8-bit grayscale conversion would.
pub fn mean_brightness(img: &RgbImage) -> f64 {
    let count = img.pixels().len();
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = img
        .pixels()
        .map(|px| rgb_to_ycbcr(px).0.round().clamp(0.0, 255.0) as u64)
        .sum();
    sum as f64 / count as f64
}

#[derive(Debug, Clone, Copy)]
pub struct ClaheParams {
    pub clip_limit: f32,
    pub grid: u32,
}

impl Default for ClaheParams {
    fn default() -> Self {
        Self {
            clip_limit: 3.0,
            grid: 8,
        }
    }
}

/// Equalise the luminance channel and keep chroma untouched.
pub fn enhance_low_light(img: &RgbImage, params: ClaheParams) -> RgbImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }

    let mut luma = GrayImage::new(w, h);
    let mut chroma = Vec::with_capacity((w * h) as usize);
    for (x, y, px) in img.enumerate_pixels() {
        let (yy, cb, cr) = rgb_to_ycbcr(px);
        luma.put_pixel(x, y, Luma([clamp_u8(yy)]));
        chroma.push((cb, cr));
    }

    let equalised = clahe(&luma, params);

    let mut out = RgbImage::new(w, h);
    for (i, (x, y, px)) in equalised.enumerate_pixels().enumerate() {
        let (cb, cr) = chroma[i];
        out.put_pixel(x, y, ycbcr_to_rgb(px[0] as f32, cb, cr));
    }
    out
}

/// CLAHE over a single channel.
pub fn clahe(src: &GrayImage, params: ClaheParams) -> GrayImage {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }
    let tile_w = w.div_ceil(params.grid.clamp(1, w.max(1)));
    let tile_h = h.div_ceil(params.grid.clamp(1, h.max(1)));
    // Recount so that no tile starts past the edge.
    let grid_x = w.div_ceil(tile_w);
    let grid_y = h.div_ceil(tile_h);

    let mut luts = Vec::with_capacity((grid_x * grid_y) as usize);
    for ty in 0..grid_y {
        for tx in 0..grid_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            luts.push(tile_lut(src, x0, y0, x1, y1, params.clip_limit));
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        // Position relative to tile centres.
        let gy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let ty0 = gy.floor().clamp(0.0, (grid_y - 1) as f32) as u32;
        let ty1 = (ty0 + 1).min(grid_y - 1);
        let fy = (gy - ty0 as f32).clamp(0.0, 1.0);

        for x in 0..w {
            let gx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let tx0 = gx.floor().clamp(0.0, (grid_x - 1) as f32) as u32;
            let tx1 = (tx0 + 1).min(grid_x - 1);
            let fx = (gx - tx0 as f32).clamp(0.0, 1.0);

            let v = src.get_pixel(x, y)[0] as usize;
            let at = |tx: u32, ty: u32| luts[(ty * grid_x + tx) as usize][v] as f32;

            let top = at(tx0, ty0) * (1.0 - fx) + at(tx1, ty0) * fx;
            let bottom = at(tx0, ty1) * (1.0 - fx) + at(tx1, ty1) * fx;
            let value = top * (1.0 - fy) + bottom * fy;
            out.put_pixel(x, y, Luma([clamp_u8(value)]));
        }
    }
    out
}

fn tile_lut(src: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[src.get_pixel(x, y)[0] as usize] += 1;
        }
    }
    let area = (x1 - x0) * (y1 - y0);
    let mut lut = [0u8; 256];
    if area == 0 {
        for (i, slot) in lut.iter_mut().enumerate() {
            *slot = i as u8;
        }
        return lut;
    }

    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }
        let share = excess / 256;
        let remainder = (excess % 256) as usize;
        for bin in hist.iter_mut() {
            *bin += share;
        }
        // Spread the leftover evenly across the range.
        if remainder > 0 {
            let step = (256 / remainder).max(1);
            for i in (0..256).step_by(step).take(remainder) {
                hist[i] += 1;
            }
        }
    }

    let scale = 255.0 / area as f32;
    let mut cdf = 0u32;
    for (i, &count) in hist.iter().enumerate() {
        cdf += count;
        lut[i] = clamp_u8(cdf as f32 * scale);
    }
    lut
}

fn rgb_to_ycbcr(px: &Rgb<u8>) -> (f32, f32, f32) {
    let r = px[0] as f32;
    let g = px[1] as f32;
    let b = px[2] as f32;
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 128.0 - 0.168736 * r - 0.331264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418688 * g - 0.081312 * b;
    (y, cb, cr)
}

fn ycbcr_to_rgb(y: f32, cb: f32, cr: f32) -> Rgb<u8> {
    let r = y + 1.402 * (cr - 128.0);
    let g = y - 0.344136 * (cb - 128.0) - 0.714136 * (cr - 128.0);
    let b = y + 1.772 * (cb - 128.0);
    Rgb([clamp_u8(r), clamp_u8(g), clamp_u8(b)])
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dark_gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let v = ((x + y) % 40) as u8 + 5;
            Rgb([v, v, v])
        })
    }

    #[test]
    fn brightness_of_uniform_image_is_exact() {
        let img = RgbImage::from_pixel(10, 10, Rgb([50, 50, 50]));
        assert_eq!(mean_brightness(&img), 50.0);
    }

    #[test]
    fn brightness_uses_rec601_weights() {
        // 0.299 * 200 = 59.8, above a threshold of 50.
        let red = RgbImage::from_pixel(4, 4, Rgb([200, 0, 0]));
        assert_eq!(mean_brightness(&red), 60.0);
        // 0.587 * 70 = 41.09, below it.
        let green = RgbImage::from_pixel(4, 4, Rgb([0, 70, 0]));
        assert_eq!(mean_brightness(&green), 41.0);
    }

    #[test]
    fn clahe_brightens_dark_frames() {
        let img = dark_gradient(64, 48);
        let before = mean_brightness(&img);
        let after = mean_brightness(&enhance_low_light(&img, ClaheParams::default()));
        assert!(after > before, "expected {} > {}", after, before);
    }

    #[test]
    fn gray_input_stays_gray() {
        let img = dark_gradient(32, 32);
        let out = enhance_low_light(&img, ClaheParams::default());
        for px in out.pixels() {
            assert!(px[0].abs_diff(px[1]) <= 1 && px[1].abs_diff(px[2]) <= 1);
        }
    }

    #[test]
    fn chroma_survives_equalisation() {
        // A dark red frame must still be red-dominant afterwards.
        let img = RgbImage::from_fn(40, 40, |x, _| Rgb([30 + (x % 10) as u8, 5, 5]));
        let out = enhance_low_light(&img, ClaheParams::default());
        for px in out.pixels() {
            assert!(px[0] > px[1] && px[0] > px[2]);
        }
    }

    #[test]
    fn tiny_images_do_not_panic() {
        let img = RgbImage::from_pixel(3, 2, Rgb([1, 2, 3]));
        let out = enhance_low_light(&img, ClaheParams { clip_limit: 3.0, grid: 8 });
        assert_eq!(out.dimensions(), (3, 2));
    }
}
