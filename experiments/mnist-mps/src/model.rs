//! Matrix product state classifier.
//!
//! Every pixel site owns a core `A[s]` of shape `[D, 2, D]` that is contracted
//! with the local feature vector `[x, 1 - x]`, giving one `D x D` matrix per
//! site and example. A label core `[D, classes, D]` sits in the middle of the
//! chain. With open boundaries the chain is capped by two learned boundary
//! vectors; with periodic boundaries the chain is closed with a trace.

use burn::{
    module::{Ignored, Module, Param},
    tensor::{backend::Backend, Int, Tensor, TensorData},
};
use mpstrain_core::{TrainError, TrainResult};
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Two features per pixel: `x` and `1 - x`.
pub const FEATURE_DIM: usize = 2;

#[derive(Clone, Debug)]
pub struct MpsConfig {
    pub input_dim: usize,
    pub output_dim: usize,
    pub bond_dim: usize,
    pub periodic_bc: bool,
    pub init_std: f64,
    /// Order in which pixels are laid along the chain.
    pub path: Option<Vec<usize>>,
}

impl MpsConfig {
    pub fn label_site(&self) -> usize {
        self.input_dim / 2
    }

    fn validate(&self) -> TrainResult<()> {
        if self.input_dim < 2 {
            return Err(TrainError::usage("an MPS needs at least two input sites"));
        }
        if self.bond_dim == 0 || self.output_dim == 0 {
            return Err(TrainError::usage("bond and output dimensions must be positive"));
        }
        if !self.init_std.is_finite() || self.init_std < 0.0 {
            return Err(TrainError::usage(format!(
                "init_std must be a non-negative number, got {}",
                self.init_std
            )));
        }
        if let Some(path) = &self.path {
            let mut seen = vec![false; self.input_dim];
            for &site in path {
                if site >= self.input_dim || std::mem::replace(&mut seen[site], true) {
                    return Err(TrainError::usage(format!(
                        "path is not a permutation of 0..{}",
                        self.input_dim
                    )));
                }
            }
            if path.len() != self.input_dim {
                return Err(TrainError::usage("path does not cover every input site"));
            }
        }
        Ok(())
    }

    /// Near-identity initialization: every core slice starts as the identity
    /// plus Gaussian noise of scale `init_std`.
    pub fn init<B: Backend, R: Rng>(&self, device: &B::Device, rng: &mut R) -> TrainResult<Mps<B>> {
        self.validate()?;
        let noise = Normal::new(0.0, self.init_std).map_err(|err| {
            TrainError::usage(format!("invalid init_std {}: {err}", self.init_std))
        })?;
        let bond = self.bond_dim;

        let cores = near_identity(rng, &noise, self.input_dim * FEATURE_DIM, bond);
        let cores = Tensor::<B, 4>::from_floats(
            TensorData::new(cores, [self.input_dim, FEATURE_DIM, bond, bond]),
            device,
        )
        .swap_dims(1, 2);

        let label_core = near_identity(rng, &noise, self.output_dim, bond);
        let label_core = Tensor::<B, 3>::from_floats(
            TensorData::new(label_core, [self.output_dim, bond, bond]),
            device,
        )
        .swap_dims(0, 1);

        let left_boundary = boundary_vector::<B, R>(rng, &noise, bond, device);
        let right_boundary = boundary_vector::<B, R>(rng, &noise, bond, device);

        Ok(Mps {
            cores: Param::from_tensor(cores),
            label_core: Param::from_tensor(label_core),
            left_boundary: Param::from_tensor(left_boundary),
            right_boundary: Param::from_tensor(right_boundary),
            layout: Ignored(MpsLayout {
                bond_dim: bond,
                output_dim: self.output_dim,
                label_site: self.label_site(),
                periodic_bc: self.periodic_bc,
                path: self.path.clone(),
            }),
        })
    }
}

#[derive(Clone, Debug)]
pub struct MpsLayout {
    bond_dim: usize,
    output_dim: usize,
    label_site: usize,
    periodic_bc: bool,
    path: Option<Vec<usize>>,
}

#[derive(Module, Debug)]
pub struct Mps<B: Backend> {
    /// `[sites, D, 2, D]`
    cores: Param<Tensor<B, 4>>,
    /// `[D, classes, D]`
    label_core: Param<Tensor<B, 3>>,
    left_boundary: Param<Tensor<B, 1>>,
    right_boundary: Param<Tensor<B, 1>>,
    layout: Ignored<MpsLayout>,
}

impl<B: Backend> Mps<B> {
    /// Map `[batch, input_dim]` pixel intensities to `[batch, classes]` scores.
    pub fn forward(&self, inputs: Tensor<B, 2>) -> Tensor<B, 2> {
        let layout = &self.layout.0;
        let device = inputs.device();
        let inputs = match &layout.path {
            Some(path) => {
                let order: Vec<i64> = path.iter().map(|&site| site as i64).collect();
                let order =
                    Tensor::<B, 1, Int>::from_data(TensorData::new(order, [path.len()]), &device);
                inputs.select(1, order)
            }
            None => inputs,
        };

        let matrices = self.site_matrices(inputs);
        let [batch, sites, bond, _] = matrices.dims();
        let left = chain_product(matrices.clone().slice([
            0..batch,
            0..layout.label_site,
            0..bond,
            0..bond,
        ]));
        let right = chain_product(matrices.slice([
            0..batch,
            layout.label_site..sites,
            0..bond,
            0..bond,
        ]));

        if layout.periodic_bc {
            self.close_periodic(left, right)
        } else {
            self.close_open(left, right)
        }
    }

    #[cfg(test)]
    pub fn bond_dim(&self) -> usize {
        self.layout.0.bond_dim
    }

    #[cfg(test)]
    pub fn num_sites(&self) -> usize {
        self.cores.val().dims()[0]
    }

    /// `M[b, s] = x[b, s] * A[s, :, 0, :] + (1 - x[b, s]) * A[s, :, 1, :]`
    fn site_matrices(&self, inputs: Tensor<B, 2>) -> Tensor<B, 4> {
        let [batch, sites] = inputs.dims();
        let bond = self.layout.0.bond_dim;

        let complement = inputs.clone().mul_scalar(-1.0).add_scalar(1.0);
        let features: Tensor<B, 3> = Tensor::stack(vec![inputs, complement], 2);

        let cores = self
            .cores
            .val()
            .swap_dims(1, 2)
            .reshape([sites, FEATURE_DIM, bond * bond]);
        features
            .swap_dims(0, 1)
            .matmul(cores)
            .reshape([sites, batch, bond, bond])
            .swap_dims(0, 1)
    }

    /// `scores[b, k] = l^T L[b] C[:, k, :] R[b] r`
    fn close_open(&self, left: Tensor<B, 3>, right: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch, bond, _] = left.dims();
        let classes = self.layout.0.output_dim;

        let left_vec = (left * self.left_boundary.val().reshape([1, bond, 1]))
            .sum_dim(1)
            .reshape([batch, bond]);
        let right_vec = (right * self.right_boundary.val().reshape([1, 1, bond]))
            .sum_dim(2)
            .reshape([batch, 1, bond]);

        let label = self.label_core.val().reshape([bond, classes * bond]);
        let partial = left_vec.matmul(label).reshape([batch, classes, bond]);
        (partial * right_vec).sum_dim(2).reshape([batch, classes])
    }

    /// `scores[b, k] = tr(L[b] C[:, k, :] R[b])`
    fn close_periodic(&self, left: Tensor<B, 3>, right: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch, bond, _] = left.dims();
        let classes = self.layout.0.output_dim;

        let label = self.label_core.val().reshape([bond, classes * bond]);
        let partial = left
            .reshape([batch * bond, bond])
            .matmul(label)
            .reshape([batch, bond, classes, bond]);
        let closing = right.swap_dims(1, 2).reshape([batch, bond, 1, bond]);
        (partial * closing)
            .sum_dim(3)
            .sum_dim(1)
            .reshape([batch, classes])
    }
}

/// Ordered product of `[batch, n, D, D]` matrices along `n`, by pairwise
/// reduction. `n` must be at least one.
fn chain_product<B: Backend>(matrices: Tensor<B, 4>) -> Tensor<B, 3> {
    let mut current = matrices;
    loop {
        let [batch, count, bond, _] = current.dims();
        if count == 1 {
            return current.reshape([batch, bond, bond]);
        }

        let pairs = count / 2;
        let paired: Tensor<B, 5> = current
            .clone()
            .slice([0..batch, 0..pairs * 2, 0..bond, 0..bond])
            .reshape([batch, pairs, 2, bond, bond]);
        let lhs = paired
            .clone()
            .slice([0..batch, 0..pairs, 0..1, 0..bond, 0..bond])
            .reshape([batch, pairs, bond, bond]);
        let rhs = paired
            .slice([0..batch, 0..pairs, 1..2, 0..bond, 0..bond])
            .reshape([batch, pairs, bond, bond]);
        let reduced = lhs.matmul(rhs);

        current = if count % 2 == 1 {
            let last = current.slice([0..batch, count - 1..count, 0..bond, 0..bond]);
            Tensor::cat(vec![reduced, last], 1)
        } else {
            reduced
        };
    }
}

/// `count` row-major `bond x bond` identities with additive noise.
fn near_identity<R: Rng>(rng: &mut R, noise: &Normal<f64>, count: usize, bond: usize) -> Vec<f32> {
    let mut values = Vec::with_capacity(count * bond * bond);
    for _ in 0..count {
        for row in 0..bond {
            for col in 0..bond {
                let base = if row == col { 1.0 } else { 0.0 };
                values.push((base + noise.sample(rng)) as f32);
            }
        }
    }
    values
}

/// First basis vector plus noise.
fn boundary_vector<B: Backend, R: Rng>(
    rng: &mut R,
    noise: &Normal<f64>,
    bond: usize,
    device: &B::Device,
) -> Tensor<B, 1> {
    let values: Vec<f32> = (0..bond)
        .map(|index| {
            let base = if index == 0 { 1.0 } else { 0.0 };
            (base + noise.sample(rng)) as f32
        })
        .collect();
    Tensor::<B, 1>::from_floats(TensorData::new(values, [bond]), device)
}
