//! Feed-forward perceptrons trained by mini-batch gradient descent on
//! binary cross-entropy.
//!
//! With no hidden layers the network is a single sigmoid unit (single-layer
//! perceptron). Hidden layers use ReLU. Training holds out the trailing
//! `validation_split` fraction of rows and stops once validation loss has not
//! improved for `patience` epochs, restoring the best weights seen.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    Classifier, ClassifierKind, Hyperparameters, inference_width, sigmoid, training_rows,
};
use crate::constants::classifier::KERNEL_SEED;
use crate::errors::LinkerError;
use crate::features::FeatureMatrix;
use crate::pairs::PairIndex;

const LOSS_EPSILON: f64 = 1e-7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum Activation {
    Relu,
    Sigmoid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Dense {
    /// `outputs x inputs`.
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    activation: Activation,
}

impl Dense {
    fn new(inputs: usize, outputs: usize, activation: Activation, rng: &mut StdRng) -> Self {
        // He-uniform for ReLU, Glorot-uniform for the sigmoid output.
        let limit = match activation {
            Activation::Relu => (6.0 / inputs.max(1) as f64).sqrt(),
            Activation::Sigmoid => (6.0 / (inputs + outputs).max(1) as f64).sqrt(),
        };
        let weights = (0..outputs)
            .map(|_| {
                (0..inputs)
                    .map(|_| rng.random_range(-limit..limit))
                    .collect()
            })
            .collect();
        Self {
            weights,
            bias: vec![0.0; outputs],
            activation,
        }
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, bias)| {
                let z = row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + bias;
                match self.activation {
                    Activation::Relu => z.max(0.0),
                    Activation::Sigmoid => sigmoid(z),
                }
            })
            .collect()
    }
}

/// Gradients accumulated over one mini-batch.
struct Gradients {
    weights: Vec<Vec<Vec<f64>>>,
    bias: Vec<Vec<f64>>,
}

impl Gradients {
    fn zeros(layers: &[Dense]) -> Self {
        Self {
            weights: layers
                .iter()
                .map(|layer| {
                    layer
                        .weights
                        .iter()
                        .map(|row| vec![0.0; row.len()])
                        .collect()
                })
                .collect(),
            bias: layers.iter().map(|layer| vec![0.0; layer.bias.len()]).collect(),
        }
    }
}

/// Sigmoid-output perceptron with optional ReLU hidden layers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NeuralNetwork {
    kind: ClassifierKind,
    hidden: Vec<usize>,
    learning_rate: f64,
    epochs: usize,
    batch_size: usize,
    validation_split: f64,
    patience: usize,
    seed: u64,
    width: Option<usize>,
    layers: Vec<Dense>,
}

impl NeuralNetwork {
    /// One sigmoid unit over the raw features.
    pub fn single_layer(params: &Hyperparameters, seed: u64) -> Self {
        Self::with_kind(ClassifierKind::SingleLayerPerceptron, params, &[], seed)
    }

    /// ReLU layers of the given widths feeding one sigmoid unit.
    pub fn multi_layer(params: &Hyperparameters, hidden: &[usize], seed: u64) -> Self {
        Self::with_kind(ClassifierKind::MultiLayerPerceptron, params, hidden, seed)
    }

    fn with_kind(
        kind: ClassifierKind,
        params: &Hyperparameters,
        hidden: &[usize],
        seed: u64,
    ) -> Self {
        Self {
            kind,
            hidden: hidden.to_vec(),
            learning_rate: params.learning_rate,
            epochs: params.epochs,
            batch_size: params.batch_size,
            validation_split: params.validation_split,
            patience: params.patience,
            seed,
            width: None,
            layers: Vec::new(),
        }
    }

    fn output(layers: &[Dense], row: &[f64]) -> f64 {
        let mut activation = row.to_vec();
        for layer in layers {
            activation = layer.forward(&activation);
        }
        activation.first().copied().unwrap_or(0.5)
    }

    fn loss(layers: &[Dense], rows: &[&Vec<f64>], labels: &[f64]) -> f64 {
        if rows.is_empty() {
            return 0.0;
        }
        let total: f64 = rows
            .iter()
            .zip(labels)
            .map(|(row, label)| {
                let p = Self::output(layers, row).clamp(LOSS_EPSILON, 1.0 - LOSS_EPSILON);
                -(label * p.ln() + (1.0 - label) * (1.0 - p).ln())
            })
            .sum();
        total / rows.len() as f64
    }

    /// Backpropagate one example into `grads`.
    fn accumulate(layers: &[Dense], row: &[f64], label: f64, grads: &mut Gradients) {
        let mut activations: Vec<Vec<f64>> = Vec::with_capacity(layers.len() + 1);
        activations.push(row.to_vec());
        for layer in layers {
            let next = layer.forward(&activations[activations.len() - 1]);
            activations.push(next);
        }
        // Sigmoid output with cross-entropy: dL/dz = p - y.
        let mut delta: Vec<f64> = activations[layers.len()]
            .iter()
            .map(|p| p - label)
            .collect();
        for (idx, layer) in layers.iter().enumerate().rev() {
            let input = &activations[idx];
            for (out, d) in delta.iter().enumerate() {
                grads.bias[idx][out] += d;
                for (grad, x) in grads.weights[idx][out].iter_mut().zip(input) {
                    *grad += d * x;
                }
            }
            if idx == 0 {
                break;
            }
            // Hidden layers are ReLU: derivative is 1 where the unit fired.
            delta = (0..input.len())
                .map(|j| {
                    if input[j] <= 0.0 {
                        return 0.0;
                    }
                    layer
                        .weights
                        .iter()
                        .zip(&delta)
                        .map(|(row, d)| row[j] * d)
                        .sum()
                })
                .collect();
        }
    }

    fn apply(layers: &mut [Dense], grads: &Gradients, scale: f64) {
        for (idx, layer) in layers.iter_mut().enumerate() {
            for (out, row) in layer.weights.iter_mut().enumerate() {
                for (weight, grad) in row.iter_mut().zip(&grads.weights[idx][out]) {
                    *weight -= scale * grad;
                }
                layer.bias[out] -= scale * grads.bias[idx][out];
            }
        }
    }
}

impl Classifier for NeuralNetwork {
    fn kind(&self) -> ClassifierKind {
        self.kind
    }

    fn input_width(&self) -> Option<usize> {
        self.width
    }

    fn fit(&mut self, features: &FeatureMatrix, positives: &PairIndex) -> Result<(), LinkerError> {
        let labels: Vec<f64> = training_rows(features, positives)?
            .into_iter()
            .map(|label| if label { 1.0 } else { 0.0 })
            .collect();
        if self.batch_size == 0 || self.epochs == 0 {
            return Err(LinkerError::Configuration(
                "epochs and batch size must be positive".to_string(),
            ));
        }
        let width = features.width();
        let mut rng = StdRng::seed_from_u64(self.seed ^ KERNEL_SEED);

        let mut layers = Vec::with_capacity(self.hidden.len() + 1);
        let mut inputs = width;
        for units in &self.hidden {
            layers.push(Dense::new(inputs, *units, Activation::Relu, &mut rng));
            inputs = *units;
        }
        layers.push(Dense::new(inputs, 1, Activation::Sigmoid, &mut rng));

        let rows: Vec<&Vec<f64>> = features.rows().iter().collect();
        let held_out = (rows.len() as f64 * self.validation_split).floor() as usize;
        let split = rows.len() - held_out.min(rows.len().saturating_sub(1));
        let (train_rows, val_rows) = rows.split_at(split);
        let (train_labels, val_labels) = labels.split_at(split);
        // Without a validation slice, early stopping monitors training loss.
        let (monitor_rows, monitor_labels) = if val_rows.is_empty() {
            (train_rows, train_labels)
        } else {
            (val_rows, val_labels)
        };

        let mut order: Vec<usize> = (0..train_rows.len()).collect();
        let mut best_loss = f64::INFINITY;
        let mut best_layers = layers.clone();
        let mut stale = 0;
        let mut epochs_run = 0;
        for _ in 0..self.epochs {
            epochs_run += 1;
            order.shuffle(&mut rng);
            for batch in order.chunks(self.batch_size) {
                let mut grads = Gradients::zeros(&layers);
                for &idx in batch {
                    Self::accumulate(&layers, train_rows[idx], train_labels[idx], &mut grads);
                }
                Self::apply(&mut layers, &grads, self.learning_rate / batch.len() as f64);
            }
            let loss = Self::loss(&layers, monitor_rows, monitor_labels);
            if loss < best_loss {
                best_loss = loss;
                best_layers = layers.clone();
                stale = 0;
            } else {
                stale += 1;
                if stale >= self.patience {
                    debug!(epoch = epochs_run, best_loss, "early stopping");
                    break;
                }
            }
        }
        info!(
            kind = %self.kind,
            epochs = epochs_run,
            train_rows = train_rows.len(),
            validation_rows = val_rows.len(),
            best_loss,
            "perceptron fitted"
        );
        self.layers = best_layers;
        self.width = Some(width);
        Ok(())
    }

    fn probability(&self, features: &FeatureMatrix) -> Result<Vec<f64>, LinkerError> {
        inference_width(self.kind(), self.input_width(), features)?;
        Ok(features
            .rows()
            .iter()
            .map(|row| Self::output(&self.layers, row))
            .collect())
    }
}
