//! MNIST digits, read from the IDX files inside a data directory.
//!
//! Missing files are fetched from the [CVDF mirror](https://github.com/cvdfoundation/mnist)
//! and decompressed in place, so a populated directory never touches the network.

use crate::backend::Element;
use crate::error::{Error, Result};
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::{
    Dataset, InMemDataset,
    transform::{Mapper, MapperDataset},
};
use burn::prelude::*;
use burn_dataset::network::downloader::download_file_as_bytes;
use flate2::read::GzDecoder;
use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

// CVDF mirror of http://yann.lecun.com/exdb/mnist/
const URL: &str = "https://storage.googleapis.com/cvdf-datasets/mnist/";
pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

pub const IMAGES_MAGIC: u32 = 2051;
pub const LABELS_MAGIC: u32 = 2049;

pub const WIDTH: usize = 28;
pub const HEIGHT: usize = 28;
pub const NUM_CLASSES: usize = 10;

/// Which half of MNIST to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    fn files(self) -> (&'static str, &'static str) {
        match self {
            Split::Train => (TRAIN_IMAGES, TRAIN_LABELS),
            Split::Test => (TEST_IMAGES, TEST_LABELS),
        }
    }
}

/// MNIST item.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MnistItem {
    /// Image as a flat array of floats.
    /// Each value is a brightness, in between 0.0 and 255.0.
    ///
    /// # Shape
    /// [WIDTH * HEIGHT]
    pub image: Vec<Element>,

    /// Label of the image, in between 0 and 9.
    pub label: u8,
}

#[derive(Deserialize, Debug, Clone)]
struct MnistItemRaw {
    pub image_bytes: Vec<u8>,
    pub label: u8,
}

struct BytesToImage;

impl Mapper<MnistItemRaw, MnistItem> for BytesToImage {
    fn map(&self, item: &MnistItemRaw) -> MnistItem {
        debug_assert_eq!(item.image_bytes.len(), WIDTH * HEIGHT);

        let image: Vec<Element> = item
            .image_bytes
            .iter()
            .map(|brightness| {
                let element: Element = (*brightness).as_();
                element
            })
            .collect();

        MnistItem {
            image,
            label: item.label,
        }
    }
}

type MappedDataset = MapperDataset<InMemDataset<MnistItemRaw>, BytesToImage, MnistItemRaw>;

/// One split of MNIST, cached in memory.
///
/// There are 60,000 training images and 10,000 test images.
pub struct MnistDataset {
    dataset: MappedDataset,
}

impl Dataset<MnistItem> for MnistDataset {
    fn get(&self, index: usize) -> Option<MnistItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl MnistDataset {
    /// Training split, downloaded into `data_dir` if absent.
    ///
    /// A failed download is returned as [`Error::Download`].
    pub fn train(data_dir: &Path) -> Result<Self> {
        Self::new(data_dir, Split::Train)
    }

    /// Test split, downloaded into `data_dir` if absent.
    pub fn test(data_dir: &Path) -> Result<Self> {
        Self::new(data_dir, Split::Test)
    }

    pub fn new(data_dir: &Path, split: Split) -> Result<Self> {
        let (images_name, labels_name) = split.files();
        let images_path = ensure_file(data_dir, images_name)?;
        let labels_path = ensure_file(data_dir, labels_name)?;
        Self::from_files(&images_path, &labels_path)
    }

    /// Reads an already present pair of IDX files.
    pub fn from_files(images_path: &Path, labels_path: &Path) -> Result<Self> {
        let images_bytes = fs::read(images_path).map_err(|e| Error::io(images_path, e))?;
        let labels_bytes = fs::read(labels_path).map_err(|e| Error::io(labels_path, e))?;
        let images = parse_images(images_path, &images_bytes)?;
        let labels = parse_labels(labels_path, &labels_bytes)?;

        if images.len() != labels.len() {
            return Err(Error::LengthMismatch {
                images: images.len(),
                labels: labels.len(),
            });
        }
        log::debug!("read {} items from {images_path:?}", images.len());

        let items: Vec<_> = images
            .into_iter()
            .zip(labels)
            .map(|(image_bytes, label)| MnistItemRaw { image_bytes, label })
            .collect();

        let dataset = InMemDataset::new(items);
        let dataset = MapperDataset::new(dataset, BytesToImage);

        Ok(Self { dataset })
    }
}

/// Returns the path of `name` inside `data_dir`, downloading it first when missing.
fn ensure_file(data_dir: &Path, name: &str) -> Result<PathBuf> {
    ensure_file_with(data_dir, name, download)
}

/// Fetches `url` with burn's downloader, which panics on network or HTTP failures.
fn download(url: &str, name: &str) -> Result<Vec<u8>> {
    std::panic::catch_unwind(|| download_file_as_bytes(url, name)).map_err(|payload| {
        let reason = payload
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
            .unwrap_or_else(|| "download panicked".into());
        Error::Download {
            url: url.to_string(),
            reason,
        }
    })
}

fn ensure_file_with(
    data_dir: &Path,
    name: &str,
    fetch: impl FnOnce(&str, &str) -> Result<Vec<u8>>,
) -> Result<PathBuf> {
    let file_name = data_dir.join(name);
    if file_name.exists() {
        return Ok(file_name);
    }

    fs::create_dir_all(data_dir).map_err(|e| Error::io(data_dir, e))?;
    log::info!("downloading {name} into {data_dir:?}");
    let bytes = fetch(&format!("{URL}{name}.gz"), name)?;

    // decompress next to the target, then move it into place
    let partial = data_dir.join(format!("{name}.part"));
    let written = File::create(&partial).and_then(|mut output_file| {
        let mut gz_buffer = GzDecoder::new(&bytes[..]);
        std::io::copy(&mut gz_buffer, &mut output_file)
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&partial);
        return Err(Error::io(&partial, e));
    }
    fs::rename(&partial, &file_name).map_err(|e| Error::io(&file_name, e))?;

    Ok(file_name)
}

fn read_u32(path: &Path, bytes: &[u8], offset: usize) -> Result<u32> {
    let slice = bytes
        .get(offset..offset + 4)
        .ok_or_else(|| Error::invalid_idx(path, "truncated header"))?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(slice);
    Ok(u32::from_be_bytes(buf))
}

/// Parses an IDX3 image file into one byte vector per image.
pub fn parse_images(path: &Path, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let magic = read_u32(path, bytes, 0)?;
    if magic != IMAGES_MAGIC {
        return Err(Error::invalid_idx(
            path,
            format!("expected magic {IMAGES_MAGIC}, found {magic}"),
        ));
    }
    let size = read_u32(path, bytes, 4)? as usize;
    let rows = read_u32(path, bytes, 8)? as usize;
    let cols = read_u32(path, bytes, 12)? as usize;
    if rows != HEIGHT || cols != WIDTH {
        return Err(Error::invalid_idx(
            path,
            format!("expected {HEIGHT}x{WIDTH} images, found {rows}x{cols}"),
        ));
    }

    let body = &bytes[16..];
    if body.len() != size * WIDTH * HEIGHT {
        return Err(Error::invalid_idx(
            path,
            format!(
                "header announces {size} images but body holds {} bytes",
                body.len()
            ),
        ));
    }

    Ok(body
        .chunks(WIDTH * HEIGHT)
        .map(|chunk| chunk.to_vec())
        .collect())
}

/// Parses an IDX1 label file.
pub fn parse_labels(path: &Path, bytes: &[u8]) -> Result<Vec<u8>> {
    let magic = read_u32(path, bytes, 0)?;
    if magic != LABELS_MAGIC {
        return Err(Error::invalid_idx(
            path,
            format!("expected magic {LABELS_MAGIC}, found {magic}"),
        ));
    }
    let size = read_u32(path, bytes, 4)? as usize;

    let body = &bytes[8..];
    if body.len() != size {
        return Err(Error::invalid_idx(
            path,
            format!("header announces {size} labels but body holds {}", body.len()),
        ));
    }
    if let Some(label) = body.iter().find(|label| **label as usize >= NUM_CLASSES) {
        return Err(Error::invalid_idx(path, format!("label {label} out of range")));
    }

    Ok(body.to_vec())
}

#[derive(Clone, Default)]
pub struct MnistBatcher {}

#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    /// Brightness scaled into `[0, 1]`.
    ///
    /// # Shape
    /// [batch_size, WIDTH * HEIGHT]
    pub images: Tensor<B, 2>,
    /// # Shape
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, MnistItem, MnistBatch<B>> for MnistBatcher {
    fn batch(&self, items: Vec<MnistItem>, device: &B::Device) -> MnistBatch<B> {
        let batch_size = items.len();
        let (items_image, items_label): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| (item.image, item.label))
            .unzip();

        let pixels: Vec<Element> = items_image.into_iter().flatten().collect();
        let images = TensorData::new(pixels, [batch_size, WIDTH * HEIGHT]).convert::<B::FloatElem>();
        let images = Tensor::<B, 2>::from_data(images, device) / 255;

        let labels: Vec<i64> = items_label.into_iter().map(|label| label as i64).collect();
        let targets = TensorData::new(labels, [batch_size]).convert::<B::IntElem>();
        let targets = Tensor::<B, 1, Int>::from_data(targets, device);

        MnistBatch { images, targets }
    }
}
