//! IDX file reader (the MNIST distribution format).
//!
//! Both files start with a big-endian header:
//!
//! - images: magic `2051`, count, rows, cols, then `count * rows * cols` bytes
//! - labels: magic `2049`, count, then `count` bytes
//!
//! Files whose name ends in `.gz` are decompressed on the fly.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::GzDecoder;

use crate::{Dataset, Error, Result};

pub const IMAGES_MAGIC: u32 = 2051;
pub const LABELS_MAGIC: u32 = 2049;

/// Raw 8-bit images, row-major, one after another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdxImages {
    pub count: usize,
    pub rows: usize,
    pub cols: usize,
    pub pixels: Vec<u8>,
}

impl IdxImages {
    #[inline]
    pub fn image_len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn image(&self, idx: usize) -> &[u8] {
        let len = self.image_len();
        &self.pixels[idx * len..(idx + 1) * len]
    }
}

/// End of input inside a header or payload means the file is malformed, not unreadable.
fn read_err(what: &str, e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::InvalidData(format!("truncated idx {what}"))
    } else {
        Error::Io(format!("failed to read idx {what}: {e}"))
    }
}

fn read_header<R: Read>(reader: &mut R, magic: u32, fields: usize) -> Result<Vec<usize>> {
    let found = reader
        .read_u32::<BigEndian>()
        .map_err(|e| read_err("header", e))?;
    if found != magic {
        return Err(Error::InvalidData(format!(
            "bad idx magic number {found}, expected {magic}"
        )));
    }
    (0..fields)
        .map(|_| {
            reader
                .read_u32::<BigEndian>()
                .map(|v| v as usize)
                .map_err(|e| read_err("header", e))
        })
        .collect()
}

/// The header's size claim is not trusted for allocation; the buffer grows with the data.
fn read_payload<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader
        .take(len as u64)
        .read_to_end(&mut buf)
        .map_err(|e| read_err("payload", e))?;
    if buf.len() != len {
        return Err(Error::InvalidData(format!(
            "truncated idx payload: header claims {len} bytes, found {}",
            buf.len()
        )));
    }
    Ok(buf)
}

pub fn read_images<R: Read>(mut reader: R) -> Result<IdxImages> {
    let header = read_header(&mut reader, IMAGES_MAGIC, 3)?;
    let (count, rows, cols) = (header[0], header[1], header[2]);
    let len = count
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .ok_or_else(|| Error::InvalidData("idx image payload size overflows".to_owned()))?;
    let pixels = read_payload(&mut reader, len)?;
    Ok(IdxImages {
        count,
        rows,
        cols,
        pixels,
    })
}

pub fn read_labels<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let header = read_header(&mut reader, LABELS_MAGIC, 1)?;
    read_payload(&mut reader, header[0])
}

fn open(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path)
        .map_err(|e| Error::Io(format!("failed to open {}: {e}", path.display())))?;
    let reader = BufReader::new(file);
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

pub fn load_images<P: AsRef<Path>>(path: P) -> Result<IdxImages> {
    read_images(open(path.as_ref())?)
}

pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    read_labels(open(path.as_ref())?)
}

/// Load an image/label file pair into a normalized [`Dataset`].
pub fn load_dataset<P: AsRef<Path>, Q: AsRef<Path>>(
    images_path: P,
    labels_path: Q,
    num_classes: usize,
) -> Result<Dataset> {
    let images = load_images(images_path)?;
    let labels = load_labels(labels_path)?;
    if images.count != labels.len() {
        return Err(Error::InvalidData(format!(
            "{} images but {} labels",
            images.count,
            labels.len()
        )));
    }
    log::info!(
        "loaded {} idx images of {}x{}",
        images.count,
        images.rows,
        images.cols
    );

    let raw: Vec<Vec<u8>> = (0..images.count).map(|i| images.image(i).to_vec()).collect();
    let labels = labels.into_iter().map(usize::from).collect();
    Dataset::from_raw(&raw, labels, num_classes)
}
