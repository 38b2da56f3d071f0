//! Labelled image dataset and mini-batch sampling.
//!
//! Images are stored contiguously, row-major, already normalized to `[0, 1]`.
//! Labels are class indices in `[0, num_classes)`.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::{Error, Matrix, Result};

/// One mini-batch: `x` is `batch x image_len`, `y` is `batch x num_classes` one-hot.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub x: Matrix,
    pub y: Matrix,
    pub labels: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    images: Vec<f32>,
    image_len: usize,
    labels: Vec<usize>,
    num_classes: usize,
}

impl Dataset {
    /// Build from raw 8-bit pixels; every value is divided by 255 once, here.
    pub fn from_raw(images: &[Vec<u8>], labels: Vec<usize>, num_classes: usize) -> Result<Self> {
        let normalized: Vec<Vec<f32>> = images
            .iter()
            .map(|img| img.iter().map(|&p| f32::from(p) / 255.0).collect())
            .collect();
        Self::from_normalized(&normalized, labels, num_classes)
    }

    /// Build from images already scaled to `[0, 1]`.
    pub fn from_normalized(
        images: &[Vec<f32>],
        labels: Vec<usize>,
        num_classes: usize,
    ) -> Result<Self> {
        if images.is_empty() {
            return Err(Error::InvalidData("dataset must not be empty".to_owned()));
        }
        if images.len() != labels.len() {
            return Err(Error::InvalidData(format!(
                "images/labels length mismatch: {} vs {}",
                images.len(),
                labels.len()
            )));
        }
        if num_classes == 0 {
            return Err(Error::InvalidData("num_classes must be > 0".to_owned()));
        }

        let image_len = images[0].len();
        if image_len == 0 {
            return Err(Error::InvalidData("images must not be empty".to_owned()));
        }

        let mut flat = Vec::with_capacity(images.len() * image_len);
        for (i, img) in images.iter().enumerate() {
            if img.len() != image_len {
                return Err(Error::InvalidData(format!(
                    "image {i} has len {}, expected {image_len}",
                    img.len()
                )));
            }
            if let Some(v) = img.iter().find(|v| !(0.0..=1.0).contains(*v)) {
                return Err(Error::InvalidData(format!(
                    "image {i} has value {v} outside [0, 1]"
                )));
            }
            flat.extend_from_slice(img);
        }
        if let Some((i, l)) = labels.iter().enumerate().find(|&(_, &l)| l >= num_classes) {
            return Err(Error::InvalidData(format!(
                "label {l} at index {i} is not below num_classes {num_classes}"
            )));
        }

        Ok(Self {
            images: flat,
            image_len,
            labels,
            num_classes,
        })
    }

    /// Returns the number of samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns true if there are no samples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn image_len(&self) -> usize {
        self.image_len
    }

    #[inline]
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Returns the `idx`-th image.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= len`.
    #[inline]
    pub fn image(&self, idx: usize) -> &[f32] {
        let start = idx * self.image_len;
        &self.images[start..start + self.image_len]
    }

    #[inline]
    pub fn label(&self, idx: usize) -> usize {
        self.labels[idx]
    }

    #[inline]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// `batch_size` samples drawn uniformly with replacement.
    pub fn get_batch<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Result<Batch> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
        }
        let indices: Vec<usize> = (0..batch_size)
            .map(|_| rng.gen_range(0..self.len()))
            .collect();
        self.batch_from_indices(&indices)
    }

    /// One epoch of batches: the samples are shuffled, then cut into consecutive batches of
    /// `batch_size` without replacement. The last batch holds the remainder and may be smaller.
    pub fn shuffled_batches<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        rng: &mut R,
    ) -> Result<EpochBatches<'_>> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
        }
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        Ok(EpochBatches {
            data: self,
            order,
            batch_size,
            pos: 0,
        })
    }

    /// Batch made of the given samples, in order.
    pub fn batch_from_indices(&self, indices: &[usize]) -> Result<Batch> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(Error::InvalidData(format!(
                "sample index {bad} out of range for dataset of {}",
                self.len()
            )));
        }
        let mut x = Vec::with_capacity(indices.len() * self.image_len);
        let mut y = vec![0.0; indices.len() * self.num_classes];
        let mut labels = Vec::with_capacity(indices.len());
        for (row, &idx) in indices.iter().enumerate() {
            x.extend_from_slice(self.image(idx));
            let label = self.labels[idx];
            y[row * self.num_classes + label] = 1.0;
            labels.push(label);
        }
        Ok(Batch {
            x: Matrix::from_vec(indices.len(), self.image_len, x)?,
            y: Matrix::from_vec(indices.len(), self.num_classes, y)?,
            labels,
        })
    }

    /// One random image as a `1 x image_len` matrix, with its label.
    pub fn random_sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<(Matrix, usize)> {
        let idx = rng.gen_range(0..self.len());
        let x = Matrix::row_vector(self.image(idx).to_vec())?;
        Ok((x, self.labels[idx]))
    }
}

/// Iterator returned by [`Dataset::shuffled_batches`].
#[derive(Debug, Clone)]
pub struct EpochBatches<'a> {
    data: &'a Dataset,
    order: Vec<usize>,
    batch_size: usize,
    pos: usize,
}

impl EpochBatches<'_> {
    /// Sample order for the whole epoch.
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

impl Iterator for EpochBatches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.order.len() {
            return None;
        }
        let end = (self.pos + self.batch_size).min(self.order.len());
        let batch = self.data.batch_from_indices(&self.order[self.pos..end]);
        self.pos = end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.order.len() - self.pos).div_ceil(self.batch_size);
        (left, Some(left))
    }
}

impl ExactSizeIterator for EpochBatches<'_> {}

/// Add Gaussian noise scaled by `factor`, clipped back to `[0, 1]`.
pub fn add_noise<R: Rng + ?Sized>(image: &[f32], factor: f32, rng: &mut R) -> Vec<f32> {
    image
        .iter()
        .map(|&v| (v + factor * Matrix::randn(rng)).clamp(0.0, 1.0))
        .collect()
}

/// Roll a `side x side` image by up to `max_shift` pixels on each axis, wrapping around.
pub fn random_shift<R: Rng + ?Sized>(
    image: &[f32],
    side: usize,
    max_shift: usize,
    rng: &mut R,
) -> Result<Vec<f32>> {
    if side == 0 || image.len() != side * side {
        return Err(Error::InvalidData(format!(
            "image of len {} is not {side}x{side}",
            image.len()
        )));
    }
    let max = max_shift as isize;
    let dy = rng.gen_range(-max..=max);
    let dx = rng.gen_range(-max..=max);
    Ok(roll(image, side, dx, dy))
}

fn roll(image: &[f32], side: usize, dx: isize, dy: isize) -> Vec<f32> {
    let n = side as isize;
    let mut out = vec![0.0; image.len()];
    for y in 0..n {
        for x in 0..n {
            let ny = (y + dy).rem_euclid(n);
            let nx = (x + dx).rem_euclid(n);
            out[(ny * n + nx) as usize] = image[(y * n + x) as usize];
        }
    }
    out
}
