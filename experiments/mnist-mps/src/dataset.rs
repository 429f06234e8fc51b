//! MNIST and Fashion-MNIST loading.
//!
//! Standard MNIST goes through burn's dataset cache. Fashion-MNIST, and MNIST
//! when an explicit cache root is given, are read from IDX files under
//! `<root>/<variant>/raw`, downloading the gzip archives only when a file is
//! missing.

use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};

use burn_common::network::downloader::download_file_as_bytes;
use burn_dataset::{vision::MnistDataset, Dataset};
use flate2::read::GzDecoder;
use mpstrain_core::{DatasetVariant, Split, SplitKind, TrainError, TrainResult, INPUT_DIM};

const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;
const SIDE: usize = 28;

const MNIST_URL: &str = "https://storage.googleapis.com/cvdf-datasets/mnist";
const FASHION_MNIST_URL: &str = "http://fashion-mnist.s3-website.eu-central-1.amazonaws.com";

/// Where a variant's splits come from.
#[derive(Clone, Debug)]
pub enum DatasetSource {
    /// burn's built-in MNIST download and cache.
    Burn,
    /// Raw IDX files under `<root>/<variant dir>/raw`.
    Idx { root: PathBuf },
}

impl DatasetSource {
    pub fn for_variant(variant: DatasetVariant, data_dir: Option<&Path>) -> Self {
        match (variant, data_dir) {
            (_, Some(root)) => Self::Idx {
                root: root.to_path_buf(),
            },
            (DatasetVariant::Mnist, None) => Self::Burn,
            (DatasetVariant::FashionMnist, None) => Self::Idx {
                root: default_cache_root(),
            },
        }
    }

    pub fn load(&self, variant: DatasetVariant, kind: SplitKind) -> TrainResult<Split> {
        match self {
            Self::Burn => load_burn_mnist(kind),
            Self::Idx { root } => {
                let dir = root.join(variant.dir_name()).join("raw");
                load_idx_split(&dir, variant, kind)
            }
        }
    }
}

/// burn keeps its datasets under `~/.cache/burn-dataset`.
fn default_cache_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cache")
        .join("burn-dataset")
}

fn load_burn_mnist(kind: SplitKind) -> TrainResult<Split> {
    let dataset = match kind {
        SplitKind::Train => MnistDataset::train(),
        SplitKind::Test => MnistDataset::test(),
    };

    let mut inputs = Vec::with_capacity(dataset.len() * INPUT_DIM);
    let mut labels = Vec::with_capacity(dataset.len());
    for item in dataset.iter() {
        for row in item.image.iter() {
            inputs.extend(row.iter().map(|&pixel| pixel / 255.0));
        }
        labels.push(item.label as usize);
    }

    tracing::info!(split = kind.label(), examples = labels.len(), "loaded MNIST via burn");
    Split::new(inputs, INPUT_DIM, labels)
}

fn file_stem(kind: SplitKind) -> &'static str {
    match kind {
        SplitKind::Train => "train",
        SplitKind::Test => "t10k",
    }
}

fn load_idx_split(dir: &Path, variant: DatasetVariant, kind: SplitKind) -> TrainResult<Split> {
    let stem = file_stem(kind);
    let images = fetch_cached(dir, variant, &format!("{stem}-images-idx3-ubyte"))?;
    let labels = fetch_cached(dir, variant, &format!("{stem}-labels-idx1-ubyte"))?;

    let inputs = parse_idx_images(&images)?;
    let labels = parse_idx_labels(&labels)?;
    if inputs.len() != labels.len() * INPUT_DIM {
        return Err(TrainError::data(format!(
            "{} {} split has {} images but {} labels",
            variant.label(),
            kind.label(),
            inputs.len() / INPUT_DIM,
            labels.len()
        )));
    }

    tracing::info!(
        dataset = variant.label(),
        split = kind.label(),
        examples = labels.len(),
        dir = %dir.display(),
        "loaded IDX split"
    );
    Split::new(inputs, INPUT_DIM, labels)
}

/// Read `dir/name`, downloading and decompressing `name.gz` first if absent.
fn fetch_cached(dir: &Path, variant: DatasetVariant, name: &str) -> TrainResult<Vec<u8>> {
    let path = dir.join(name);
    if !path.exists() {
        fs::create_dir_all(dir).map_err(|err| {
            TrainError::data(format!("failed to create {}: {err}", dir.display()))
        })?;

        let base = match variant {
            DatasetVariant::Mnist => MNIST_URL,
            DatasetVariant::FashionMnist => FASHION_MNIST_URL,
        };
        let url = format!("{base}/{name}.gz");
        tracing::info!(%url, "downloading dataset file");
        let compressed = download_file_as_bytes(&url, name);

        let mut decoded = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|err| TrainError::data(format!("failed to decompress {url}: {err}")))?;
        fs::write(&path, &decoded).map_err(|err| {
            TrainError::data(format!("failed to cache {}: {err}", path.display()))
        })?;
    }

    fs::read(&path).map_err(|err| TrainError::data(format!("failed to read {}: {err}", path.display())))
}

fn read_u32(bytes: &[u8], offset: usize) -> TrainResult<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|word| u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
        .ok_or_else(|| TrainError::data("IDX header is truncated"))
}

/// Images as row-major intensities in [0, 1], `INPUT_DIM` per image.
pub fn parse_idx_images(bytes: &[u8]) -> TrainResult<Vec<f32>> {
    let magic = read_u32(bytes, 0)?;
    if magic != IMAGE_MAGIC {
        return Err(TrainError::data(format!("bad IDX image magic {magic}")));
    }
    let count = read_u32(bytes, 4)? as usize;
    let rows = read_u32(bytes, 8)? as usize;
    let cols = read_u32(bytes, 12)? as usize;
    if rows != SIDE || cols != SIDE {
        return Err(TrainError::data(format!(
            "expected {SIDE}x{SIDE} images, found {rows}x{cols}"
        )));
    }

    let pixels = &bytes[16..];
    if pixels.len() != count * INPUT_DIM {
        return Err(TrainError::data(format!(
            "IDX image payload has {} bytes, expected {}",
            pixels.len(),
            count * INPUT_DIM
        )));
    }
    Ok(pixels.iter().map(|&pixel| pixel as f32 / 255.0).collect())
}

pub fn parse_idx_labels(bytes: &[u8]) -> TrainResult<Vec<usize>> {
    let magic = read_u32(bytes, 0)?;
    if magic != LABEL_MAGIC {
        return Err(TrainError::data(format!("bad IDX label magic {magic}")));
    }
    let count = read_u32(bytes, 4)? as usize;
    let labels = &bytes[8..];
    if labels.len() != count {
        return Err(TrainError::data(format!(
            "IDX label payload has {} bytes, expected {count}",
            labels.len()
        )));
    }
    Ok(labels.iter().map(|&label| label as usize).collect())
}
