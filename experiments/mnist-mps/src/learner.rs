use burn::{
    module::AutodiffModule,
    nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig, MseLoss, Reduction},
    optim::{GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor, TensorData,
    },
};
use mpstrain_core::{
    Batch, BatchOutput, Learner, LossKind, Targets, TrainError, TrainResult, NUM_CLASSES,
};

use crate::model::Mps;

pub enum Objective<B: Backend> {
    CrossEntropy(CrossEntropyLoss<B>),
    MeanSquaredError(MseLoss),
}

impl<B: Backend> Objective<B> {
    pub fn new(kind: LossKind, device: &B::Device) -> Self {
        match kind {
            LossKind::CrossEntropy => Self::CrossEntropy(CrossEntropyLossConfig::new().init(device)),
            LossKind::MeanSquaredError => Self::MeanSquaredError(MseLoss::new()),
        }
    }

    fn forward(
        &self,
        scores: Tensor<B, 2>,
        targets: &Targets<'_>,
        device: &B::Device,
    ) -> TrainResult<Tensor<B, 1>> {
        match (self, targets) {
            (Self::CrossEntropy(loss), Targets::Classes(classes)) => {
                Ok(loss.forward(scores, class_tensor(classes, device)))
            }
            (Self::MeanSquaredError(loss), Targets::OneHot(values)) => Ok(loss.forward(
                scores,
                one_hot_tensor(values, device),
                Reduction::Mean,
            )),
            _ => Err(TrainError::numerical(
                "label encoding does not match the configured loss",
            )),
        }
    }
}

/// MPS classifier, its loss and its optimizer on one device.
pub struct MpsLearner<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<Mps<B>, B>,
{
    model: Mps<B>,
    optimizer: O,
    objective: Objective<B>,
    device: B::Device,
}

impl<B, O> MpsLearner<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<Mps<B>, B>,
{
    pub fn new(model: Mps<B>, optimizer: O, objective: Objective<B>, device: B::Device) -> Self {
        Self {
            model,
            optimizer,
            objective,
            device,
        }
    }

    #[cfg(test)]
    pub fn model(&self) -> &Mps<B> {
        &self.model
    }
}

impl<B, O> Learner for MpsLearner<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<Mps<B>, B>,
{
    fn train_batch(&mut self, batch: &Batch<'_>, lr: f64) -> TrainResult<BatchOutput> {
        let scores = self.model.forward(input_tensor(batch, &self.device));
        let predictions = predicted_classes(scores.clone())?;
        let loss = self.objective.forward(scores, &batch.targets, &self.device)?;
        let loss_value = loss.clone().into_scalar().elem::<f64>();

        // Gradients are rebuilt from this loss alone; nothing carries over
        // from the previous batch.
        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self.optimizer.step(lr, self.model.clone(), grads);

        Ok(BatchOutput {
            loss: loss_value,
            predictions,
        })
    }

    fn predict(&self, batch: &Batch<'_>) -> TrainResult<Vec<usize>> {
        let model = self.model.valid();
        let scores = model.forward(input_tensor::<B::InnerBackend>(batch, &self.device));
        predicted_classes(scores)
    }
}

fn input_tensor<B: Backend>(batch: &Batch<'_>, device: &B::Device) -> Tensor<B, 2> {
    Tensor::<B, 2>::from_floats(
        TensorData::new(batch.inputs.to_vec(), [batch.len(), batch.dim]),
        device,
    )
}

fn class_tensor<B: Backend>(classes: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let values: Vec<i64> = classes.iter().map(|&class| class as i64).collect();
    Tensor::<B, 1, Int>::from_data(TensorData::new(values, [classes.len()]), device)
}

fn one_hot_tensor<B: Backend>(values: &[f32], device: &B::Device) -> Tensor<B, 2> {
    Tensor::<B, 2>::from_floats(
        TensorData::new(values.to_vec(), [values.len() / NUM_CLASSES, NUM_CLASSES]),
        device,
    )
}

fn predicted_classes<B: Backend>(scores: Tensor<B, 2>) -> TrainResult<Vec<usize>> {
    let predictions = scores
        .argmax(1)
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|err| TrainError::numerical(format!("failed to decode predictions: {err:?}")))?;
    Ok(predictions.into_iter().map(|class| class as usize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MpsConfig;
    use burn::optim::AdamConfig;
    use burn_autodiff::Autodiff;
    use burn_candle::{Candle, CandleDevice};
    use mpstrain_core::{seeded_rng, Split};

    type TestBackend = Autodiff<Candle<f32, i64>>;

    const DIM: usize = 8;

    fn tiny_split(loss: LossKind) -> Split {
        let labels: Vec<usize> = (0..6).map(|index| index % 3).collect();
        let inputs = labels
            .iter()
            .flat_map(|&label| (0..DIM).map(move |pixel| ((pixel + label) % 2) as f32))
            .collect();
        Split::new(inputs, DIM, labels).unwrap().encode_labels(loss)
    }

    fn learner(
        loss: LossKind,
    ) -> MpsLearner<TestBackend, impl Optimizer<Mps<TestBackend>, TestBackend>> {
        let device = CandleDevice::Cpu;
        let model = MpsConfig {
            input_dim: DIM,
            output_dim: NUM_CLASSES,
            bond_dim: 3,
            periodic_bc: false,
            init_std: 1e-2,
            path: None,
        }
        .init::<TestBackend, _>(&device, &mut seeded_rng(5))
        .unwrap();
        MpsLearner::new(
            model,
            AdamConfig::new().init(),
            Objective::new(loss, &device),
            device,
        )
    }

    #[test]
    fn training_step_reports_finite_loss_and_full_predictions() {
        for loss in [LossKind::CrossEntropy, LossKind::MeanSquaredError] {
            let mut learner = learner(loss);
            let split = tiny_split(loss);
            let batch = split.batch(0, 6);

            let output = learner.train_batch(&batch, 1e-2).unwrap();
            assert!(output.loss.is_finite());
            assert_eq!(output.predictions.len(), 6);
            assert!(output.predictions.iter().all(|&class| class < NUM_CLASSES));
        }
    }

    #[test]
    fn optimizer_step_changes_the_scores() {
        let mut learner = learner(LossKind::CrossEntropy);
        let split = tiny_split(LossKind::CrossEntropy);
        let batch = split.batch(0, 6);
        let device = CandleDevice::Cpu;

        let before = learner
            .model()
            .valid()
            .forward(input_tensor(&batch, &device))
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        learner.train_batch(&batch, 1e-1).unwrap();
        let after = learner
            .model()
            .valid()
            .forward(input_tensor(&batch, &device))
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn prediction_does_not_update_parameters() {
        let learner = learner(LossKind::CrossEntropy);
        let split = tiny_split(LossKind::CrossEntropy);
        let batch = split.batch(0, 6);

        let first = learner.predict(&batch).unwrap();
        let second = learner.predict(&batch).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn mismatched_targets_are_rejected() {
        let mut learner = learner(LossKind::MeanSquaredError);
        let split = tiny_split(LossKind::CrossEntropy);
        let err = learner.train_batch(&split.batch(0, 6), 1e-2).unwrap_err();
        assert!(matches!(err, TrainError::Numerical(_)));
    }
}
