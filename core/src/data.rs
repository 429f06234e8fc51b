//! In-memory dataset splits and fixed-size batching.
//!
//! A split holds flattened inputs row-major next to their labels. Batches are
//! contiguous, always exactly `batch_size` long, and a trailing partial batch
//! is never produced.

use rand::Rng;

use crate::{
    config::{LossKind, NUM_CLASSES},
    error::{TrainError, TrainResult},
    rng::permutation,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SplitKind {
    Train,
    Test,
}

impl SplitKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Test => "test",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Labels {
    Classes(Vec<usize>),
    /// Row-major, `NUM_CLASSES` values per example.
    OneHot(Vec<f32>),
}

impl Labels {
    pub fn len(&self) -> usize {
        match self {
            Self::Classes(classes) => classes.len(),
            Self::OneHot(values) => values.len() / NUM_CLASSES,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug)]
pub struct Split {
    inputs: Vec<f32>,
    dim: usize,
    labels: Labels,
}

impl Split {
    pub fn new(inputs: Vec<f32>, dim: usize, classes: Vec<usize>) -> TrainResult<Self> {
        if dim == 0 || inputs.len() != classes.len() * dim {
            return Err(TrainError::data(format!(
                "{} input values do not form {} rows of dimension {}",
                inputs.len(),
                classes.len(),
                dim
            )));
        }
        if let Some(bad) = classes.iter().find(|&&class| class >= NUM_CLASSES) {
            return Err(TrainError::data(format!(
                "label {bad} is outside 0..{NUM_CLASSES}"
            )));
        }

        Ok(Self {
            inputs,
            dim,
            labels: Labels::Classes(classes),
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn input(&self, index: usize) -> &[f32] {
        &self.inputs[index * self.dim..(index + 1) * self.dim]
    }

    /// Class index of one example, recovered by arg-max for one-hot labels.
    pub fn class_label(&self, index: usize) -> usize {
        match &self.labels {
            Labels::Classes(classes) => classes[index],
            Labels::OneHot(values) => {
                argmax(&values[index * NUM_CLASSES..(index + 1) * NUM_CLASSES])
            }
        }
    }

    /// Keep only the first `count` examples.
    pub fn truncate(&mut self, count: usize) {
        let count = count.min(self.len());
        self.inputs.truncate(count * self.dim);
        match &mut self.labels {
            Labels::Classes(classes) => classes.truncate(count),
            Labels::OneHot(values) => values.truncate(count * NUM_CLASSES),
        }
    }

    /// Convert labels to the representation the loss consumes.
    pub fn encode_labels(mut self, loss: LossKind) -> Self {
        if let (LossKind::MeanSquaredError, Labels::Classes(classes)) = (loss, &self.labels) {
            let values = classes.iter().flat_map(|&class| one_hot(class)).collect();
            self.labels = Labels::OneHot(values);
        }
        self
    }

    pub fn num_batches(&self, batch_size: usize) -> usize {
        num_batches(self.len(), batch_size)
    }

    pub fn batch(&self, index: usize, batch_size: usize) -> Batch<'_> {
        let start = index * batch_size;
        let end = start + batch_size;
        let targets = match &self.labels {
            Labels::Classes(classes) => Targets::Classes(&classes[start..end]),
            Labels::OneHot(values) => {
                Targets::OneHot(&values[start * NUM_CLASSES..end * NUM_CLASSES])
            }
        };

        Batch {
            inputs: &self.inputs[start * self.dim..end * self.dim],
            dim: self.dim,
            targets,
        }
    }

    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = Batch<'_>> + '_ {
        (0..self.num_batches(batch_size)).map(move |index| self.batch(index, batch_size))
    }

    /// Permute inputs and labels with one shared random permutation.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let order = permutation(self.len(), rng);
        self.apply_permutation(&order);
    }

    fn apply_permutation(&mut self, order: &[usize]) {
        let dim = self.dim;
        let mut inputs = Vec::with_capacity(self.inputs.len());
        for &source in order {
            inputs.extend_from_slice(&self.inputs[source * dim..(source + 1) * dim]);
        }
        self.inputs = inputs;

        self.labels = match &self.labels {
            Labels::Classes(classes) => {
                Labels::Classes(order.iter().map(|&source| classes[source]).collect())
            }
            Labels::OneHot(values) => Labels::OneHot(
                order
                    .iter()
                    .flat_map(|&source| {
                        values[source * NUM_CLASSES..(source + 1) * NUM_CLASSES]
                            .iter()
                            .copied()
                    })
                    .collect(),
            ),
        };
    }
}

/// A contiguous, full-size slice of a split.
#[derive(Clone, Copy, Debug)]
pub struct Batch<'a> {
    pub inputs: &'a [f32],
    pub dim: usize,
    pub targets: Targets<'a>,
}

impl Batch<'_> {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Targets<'a> {
    Classes(&'a [usize]),
    OneHot(&'a [f32]),
}

impl Targets<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::Classes(classes) => classes.len(),
            Self::OneHot(values) => values.len() / NUM_CLASSES,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn class_labels(&self) -> Vec<usize> {
        match self {
            Self::Classes(classes) => classes.to_vec(),
            Self::OneHot(values) => values.chunks_exact(NUM_CLASSES).map(argmax).collect(),
        }
    }
}

/// Number of full batches; the remainder is dropped.
pub fn num_batches(len: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        len / batch_size
    }
}

pub fn one_hot(label: usize) -> [f32; NUM_CLASSES] {
    let mut encoded = [0.0; NUM_CLASSES];
    encoded[label] = 1.0;
    encoded
}

/// Index of the first maximum.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (index, &value) in values.iter().enumerate() {
        if value > values[best] {
            best = index;
        }
    }
    best
}
