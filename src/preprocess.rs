//! Turning a hand-drawn RGBA bitmap into an MNIST-style input row.
//!
//! [`preprocess`] runs the whole pipeline; every step is also public so a caller can
//! show intermediate images:
//!
//! 1. [`grayscale`] with luma weights `0.299 R + 0.587 G + 0.114 B`
//! 2. [`invert_if_light`]: white-background drawings become white-on-black
//! 3. [`bounding_box`] of pixels brighter than [`INK_THRESHOLD`]
//! 4. [`crop`]
//! 5. [`bilinear_resize`] to [`fit_size`] (longer side [`FIT_SIDE`])
//! 6. [`paste_centered`] on a [`SIDE`] x [`SIDE`] canvas
//! 7. [`center_by_mass`]
//! 8. scale to `[0, 1]`
//!
//! All rounding in this module is round-half-up (`floor(x + 0.5)`).

use crate::{Error, Matrix, Result};

/// Output canvas side.
pub const SIDE: usize = 28;
/// Longer side of the resized glyph.
pub const FIT_SIDE: usize = 20;
/// Pixels above this intensity count as ink.
pub const INK_THRESHOLD: f32 = 10.0;
/// Mean corner intensity above which the image is inverted.
pub const INVERT_THRESHOLD: f32 = 128.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: usize,
    height: usize,
    rgba: Vec<u8>,
}

impl Bitmap {
    /// `rgba` holds `width * height` pixels, 4 bytes each, row-major.
    pub fn new(width: usize, height: usize, rgba: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidData(format!(
                "bitmap must be non-empty, got {width}x{height}"
            )));
        }
        if rgba.len() != width * height * 4 {
            return Err(Error::InvalidData(format!(
                "{width}x{height} bitmap needs {} rgba bytes, got {}",
                width * height * 4,
                rgba.len()
            )));
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }
}

/// Pixel rectangle given by its top-left corner and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

#[inline]
fn round_half_up(x: f32) -> f32 {
    (x + 0.5).floor()
}

/// Full pipeline: `SIDE * SIDE` values in `[0, 1]`, all zero when nothing was drawn.
pub fn preprocess(bitmap: &Bitmap) -> Vec<f32> {
    let (w, h) = (bitmap.width, bitmap.height);
    let gray = invert_if_light(grayscale(bitmap), w, h);

    let Some(bbox) = bounding_box(&gray, w, h) else {
        return vec![0.0; SIDE * SIDE];
    };
    let cropped = crop(&gray, w, bbox);
    let (fw, fh) = fit_size(bbox.width, bbox.height);
    let scaled = bilinear_resize(&cropped, bbox.width, bbox.height, fw, fh);
    let canvas = paste_centered(&scaled, fw, fh);

    center_by_mass(&canvas)
        .into_iter()
        .map(|v| v / 255.0)
        .collect()
}

/// [`preprocess`] as a `1 x 784` row ready for [`crate::Network::predict`].
pub fn preprocess_row(bitmap: &Bitmap) -> Result<Matrix> {
    Matrix::row_vector(preprocess(bitmap))
}

pub fn grayscale(bitmap: &Bitmap) -> Vec<f32> {
    bitmap
        .rgba
        .chunks_exact(4)
        .map(|p| 0.299 * f32::from(p[0]) + 0.587 * f32::from(p[1]) + 0.114 * f32::from(p[2]))
        .collect()
}

/// Invert (`255 - v`) when the mean of the four corner pixels exceeds [`INVERT_THRESHOLD`].
///
/// # Panics
///
/// Panics if the image is empty or `gray.len() != width * height`.
pub fn invert_if_light(mut gray: Vec<f32>, width: usize, height: usize) -> Vec<f32> {
    assert!(
        width > 0 && height > 0 && gray.len() == width * height,
        "gray image of len {} is not a non-empty {width}x{height} grid",
        gray.len()
    );
    let corners = [
        0,
        width - 1,
        (height - 1) * width,
        height * width - 1,
    ];
    let mean = corners.iter().map(|&i| gray[i]).sum::<f32>() / 4.0;
    if mean > INVERT_THRESHOLD {
        log::debug!("corner mean {mean:.1} looks like a light background; inverting");
        gray.iter_mut().for_each(|v| *v = 255.0 - *v);
    }
    gray
}

/// Smallest rectangle holding every pixel above [`INK_THRESHOLD`], or `None` if blank.
pub fn bounding_box(gray: &[f32], width: usize, height: usize) -> Option<BoundingBox> {
    let mut min = (width, height);
    let mut max = (0, 0);
    let mut found = false;
    for y in 0..height {
        for x in 0..width {
            if gray[y * width + x] > INK_THRESHOLD {
                min = (min.0.min(x), min.1.min(y));
                max = (max.0.max(x), max.1.max(y));
                found = true;
            }
        }
    }
    found.then(|| BoundingBox {
        x: min.0,
        y: min.1,
        width: max.0 - min.0 + 1,
        height: max.1 - min.1 + 1,
    })
}

pub fn crop(gray: &[f32], width: usize, bbox: BoundingBox) -> Vec<f32> {
    (bbox.y..bbox.y + bbox.height)
        .flat_map(|y| {
            let start = y * width + bbox.x;
            gray[start..start + bbox.width].iter().copied()
        })
        .collect()
}

/// Size that keeps the aspect ratio with the longer side at [`FIT_SIDE`].
///
/// The shorter side is rounded and never drops below 1.
pub fn fit_size(width: usize, height: usize) -> (usize, usize) {
    let aspect = width as f32 / height as f32;
    let side = FIT_SIDE as f32;
    if aspect > 1.0 {
        (FIT_SIDE, (round_half_up(side / aspect) as usize).max(1))
    } else {
        ((round_half_up(side * aspect) as usize).max(1), FIT_SIDE)
    }
}

/// Bilinear resampling; neighbours past the far edge clamp to the last row/column.
///
/// # Panics
///
/// Panics if the source is empty or `src.len() != src_w * src_h`.
pub fn bilinear_resize(
    src: &[f32],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<f32> {
    assert!(
        src_w > 0 && src_h > 0 && src.len() == src_w * src_h,
        "source of len {} is not a non-empty {src_w}x{src_h} grid",
        src.len()
    );
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;
    let mut dst = Vec::with_capacity(dst_w * dst_h);
    for y in 0..dst_h {
        let sy = y as f32 * y_ratio;
        let y1 = sy.floor() as usize;
        let y2 = (y1 + 1).min(src_h - 1);
        let fy = sy - y1 as f32;
        for x in 0..dst_w {
            let sx = x as f32 * x_ratio;
            let x1 = sx.floor() as usize;
            let x2 = (x1 + 1).min(src_w - 1);
            let fx = sx - x1 as f32;

            let p11 = src[y1 * src_w + x1];
            let p21 = src[y1 * src_w + x2];
            let p12 = src[y2 * src_w + x1];
            let p22 = src[y2 * src_w + x2];
            dst.push(
                p11 * (1.0 - fx) * (1.0 - fy)
                    + p21 * fx * (1.0 - fy)
                    + p12 * (1.0 - fx) * fy
                    + p22 * fx * fy,
            );
        }
    }
    dst
}

/// Place a `width x height` glyph in the middle of a zeroed `SIDE x SIDE` canvas.
///
/// # Panics
///
/// Panics if the glyph is larger than the canvas or `glyph.len() != width * height`.
pub fn paste_centered(glyph: &[f32], width: usize, height: usize) -> Vec<f32> {
    assert!(
        width <= SIDE && height <= SIDE,
        "{width}x{height} glyph does not fit a {SIDE}x{SIDE} canvas"
    );
    assert_eq!(glyph.len(), width * height, "glyph is not {width}x{height}");
    let offset = |len: usize| round_half_up((SIDE - len) as f32 / 2.0) as usize;
    let (ox, oy) = (offset(width), offset(height));
    let mut canvas = vec![0.0; SIDE * SIDE];
    for y in 0..height {
        let dst = (oy + y) * SIDE + ox;
        canvas[dst..dst + width].copy_from_slice(&glyph[y * width..(y + 1) * width]);
    }
    canvas
}

/// Intensity-weighted centroid `(x, y)` of a `SIDE x SIDE` image; `None` for zero mass.
pub fn center_of_mass(img: &[f32]) -> Option<(f32, f32)> {
    let mut mass = 0.0;
    let (mut cx, mut cy) = (0.0, 0.0);
    for (i, &v) in img.iter().enumerate() {
        mass += v;
        cx += (i % SIDE) as f32 * v;
        cy += (i / SIDE) as f32 * v;
    }
    (mass != 0.0).then(|| (cx / mass, cy / mass))
}

/// Shift the image so its centroid lands on pixel `(14, 14)`.
///
/// Pixels pushed past the border are dropped; a blank image is returned unchanged.
pub fn center_by_mass(img: &[f32]) -> Vec<f32> {
    let Some((cx, cy)) = center_of_mass(img) else {
        return img.to_vec();
    };
    let half = (SIDE / 2) as f32;
    let dx = round_half_up(half - cx) as isize;
    let dy = round_half_up(half - cy) as isize;

    let n = SIDE as isize;
    let mut shifted = vec![0.0; SIDE * SIDE];
    for y in 0..n {
        for x in 0..n {
            let (nx, ny) = (x + dx, y + dy);
            if (0..n).contains(&nx) && (0..n).contains(&ny) {
                shifted[(ny * n + nx) as usize] = img[(y * n + x) as usize];
            }
        }
    }
    shifted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: usize, height: usize, rgb: u8) -> Vec<u8> {
        [rgb, rgb, rgb, 255].repeat(width * height)
    }

    fn paint(rgba: &mut [u8], width: usize, x: usize, y: usize, rgb: u8) {
        let i = (y * width + x) * 4;
        rgba[i..i + 3].fill(rgb);
    }

    #[test]
    fn bitmap_validates_buffer() {
        assert!(Bitmap::new(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(Bitmap::new(2, 2, vec![0; 15]), Err(Error::InvalidData(_))));
        assert!(matches!(Bitmap::new(0, 2, vec![]), Err(Error::InvalidData(_))));
    }

    #[test]
    fn grayscale_uses_luma_weights() {
        let bmp = Bitmap::new(3, 1, vec![255, 0, 0, 255, 0, 255, 0, 255, 0, 0, 255, 255]).unwrap();
        let g = grayscale(&bmp);
        assert!((g[0] - 76.245).abs() < 1e-3);
        assert!((g[1] - 149.685).abs() < 1e-3);
        assert!((g[2] - 29.07).abs() < 1e-3);
    }

    #[test]
    fn blank_canvas_gives_zero_row() {
        for rgb in [0, 255] {
            let bmp = Bitmap::new(10, 10, solid(10, 10, rgb)).unwrap();
            assert_eq!(preprocess(&bmp), vec![0.0; SIDE * SIDE]);
        }
    }

    #[test]
    fn light_background_is_inverted() {
        let mut dark = solid(12, 12, 0);
        let mut light = solid(12, 12, 255);
        for y in 3..9 {
            for x in 4..7 {
                paint(&mut dark, 12, x, y, 255);
                paint(&mut light, 12, x, y, 0);
            }
        }
        let a = preprocess(&Bitmap::new(12, 12, dark).unwrap());
        let b = preprocess(&Bitmap::new(12, 12, light).unwrap());
        assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-3));
        assert!(a.iter().any(|&v| v > 0.5));
    }

    #[test]
    fn single_dot_lands_near_centre() {
        let mut rgba = solid(29, 29, 0);
        paint(&mut rgba, 29, 14, 14, 255);
        let row = preprocess(&Bitmap::new(29, 29, rgba).unwrap());

        assert_eq!(row.len(), SIDE * SIDE);
        assert!(row.iter().all(|v| (0.0..=1.0).contains(v)));
        let (cx, cy) = center_of_mass(&row).unwrap();
        assert!((cx - 14.0).abs() <= 0.5, "cx = {cx}");
        assert!((cy - 14.0).abs() <= 0.5, "cy = {cy}");
    }

    #[test]
    fn fit_size_keeps_aspect() {
        assert_eq!(fit_size(40, 10), (20, 5));
        assert_eq!(fit_size(10, 40), (5, 20));
        assert_eq!(fit_size(7, 7), (20, 20));
        assert_eq!(fit_size(100, 1), (20, 1));
    }

    #[test]
    fn bounding_box_and_crop() {
        let mut gray = vec![0.0; 5 * 4];
        gray[6] = 200.0; // (1, 1)
        gray[13] = 11.0; // (3, 2)
        gray[19] = 10.0; // at threshold, not ink
        let bbox = bounding_box(&gray, 5, 4).unwrap();
        assert_eq!(
            bbox,
            BoundingBox {
                x: 1,
                y: 1,
                width: 3,
                height: 2
            }
        );
        assert_eq!(crop(&gray, 5, bbox), vec![200.0, 0.0, 0.0, 0.0, 0.0, 11.0]);
        assert_eq!(bounding_box(&[0.0; 4], 2, 2), None);
    }

    #[test]
    fn bilinear_clamps_far_edge() {
        assert_eq!(
            bilinear_resize(&[0.0, 100.0], 2, 1, 4, 1),
            vec![0.0, 50.0, 100.0, 100.0]
        );
        let flat = bilinear_resize(&[7.0], 1, 1, 3, 2);
        assert!(flat.iter().all(|v| (v - 7.0).abs() < 1e-5));
    }

    #[test]
    fn paste_uses_rounded_offsets() {
        let canvas = paste_centered(&[1.0; 3], 3, 1);
        // offsets round((28-3)/2) = 13 and round(27/2) = 14
        let idx = 14 * SIDE + 13;
        assert_eq!(&canvas[idx..idx + 3], &[1.0, 1.0, 1.0]);
        assert_eq!(canvas.iter().sum::<f32>(), 3.0);
    }

    #[test]
    #[should_panic(expected = "non-empty 0x3")]
    fn invert_rejects_empty_width() {
        invert_if_light(Vec::new(), 0, 3);
    }

    #[test]
    #[should_panic(expected = "non-empty 0x1")]
    fn bilinear_rejects_empty_source() {
        bilinear_resize(&[], 0, 1, 4, 4);
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn paste_rejects_oversized_glyph() {
        paste_centered(&[0.0; 29], 29, 1);
    }

    #[test]
    fn centering_shifts_and_drops() {
        let mut img = vec![0.0; SIDE * SIDE];
        img[0] = 1.0;
        let out = center_by_mass(&img);
        assert_eq!(out[14 * SIDE + 14], 1.0);

        let blank = vec![0.0; SIDE * SIDE];
        assert_eq!(center_by_mass(&blank), blank);
    }
}
