// src/model.rs
//
// The Q-network: a plain MLP with ReLU hidden layers and a linear head,
// trained by mean-squared-error gradient descent. Two instances are held
// by the episode driver (the online network and the target network used
// for bootstrap values) and kept in sync via `clone_weights_from`.

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufWriter, Write as _};
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::{aview1, Array1, Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// MLP action-value approximator.
#[derive(Debug, Clone)]
pub struct QNetwork {
    /// Per layer, shape (fan_in, fan_out).
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
    num_layers: usize,
    width_layers: usize,
    batch_size: usize,
    learning_rate: f64,
    input_dim: usize,
    output_dim: usize,
}

/// On-disk weight layout for `save`.
#[derive(Debug, Serialize, Deserialize)]
struct ModelArtifact {
    input_dim: usize,
    output_dim: usize,
    num_layers: usize,
    width_layers: usize,
    layers: Vec<LayerArtifact>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LayerArtifact {
    rows: usize,
    cols: usize,
    /// Row-major weight matrix.
    weights: Vec<f64>,
    biases: Vec<f64>,
}

impl QNetwork {
    /// Build a network with `num_layers` hidden ReLU layers of
    /// `width_layers` units and a linear output head.
    pub fn new(
        num_layers: usize,
        width_layers: usize,
        batch_size: usize,
        learning_rate: f64,
        input_dim: usize,
        output_dim: usize,
    ) -> Self {
        Self::with_seed(
            num_layers,
            width_layers,
            batch_size,
            learning_rate,
            input_dim,
            output_dim,
            0,
        )
    }

    /// Like `new`, with an explicit initialisation seed. Same seed, same
    /// initial weights.
    #[allow(clippy::too_many_arguments)]
    pub fn with_seed(
        num_layers: usize,
        width_layers: usize,
        batch_size: usize,
        learning_rate: f64,
        input_dim: usize,
        output_dim: usize,
        seed: u64,
    ) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut dims = Vec::with_capacity(num_layers + 2);
        dims.push(input_dim);
        dims.extend(std::iter::repeat(width_layers).take(num_layers));
        dims.push(output_dim);

        let mut weights = Vec::with_capacity(dims.len() - 1);
        let mut biases = Vec::with_capacity(dims.len() - 1);
        for pair in dims.windows(2) {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            // Glorot-uniform initialisation.
            let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
            weights.push(Array2::random_using(
                (fan_in, fan_out),
                Uniform::new(-limit, limit),
                &mut rng,
            ));
            biases.push(Array1::zeros(fan_out));
        }

        Self {
            weights,
            biases,
            num_layers,
            width_layers,
            batch_size,
            learning_rate,
            input_dim,
            output_dim,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Action values for a batch of states, one row per state.
    pub fn predict_batch(&self, states: &Array2<f64>) -> Array2<f64> {
        let mut activation = states.clone();
        for i in 0..self.weights.len() {
            let mut z = activation.dot(&self.weights[i]);
            z += &self.biases[i];
            if i + 1 < self.weights.len() {
                z.mapv_inplace(|v| v.max(0.0));
            }
            activation = z;
        }
        activation
    }

    /// Action values for a single state vector.
    pub fn predict_one(&self, state: &[f64]) -> Array1<f64> {
        let x = aview1(state).insert_axis(Axis(0)).to_owned();
        self.predict_batch(&x).index_axis(Axis(0), 0).to_owned()
    }

    /// One mean-squared-error gradient step over the batch.
    pub fn fit_batch(&mut self, states: &Array2<f64>, targets: &Array2<f64>) {
        // Forward pass keeping every post-activation output.
        let mut activations = Vec::with_capacity(self.weights.len() + 1);
        activations.push(states.clone());
        for i in 0..self.weights.len() {
            let mut z = activations[i].dot(&self.weights[i]);
            z += &self.biases[i];
            if i + 1 < self.weights.len() {
                z.mapv_inplace(|v| v.max(0.0));
            }
            activations.push(z);
        }

        let batch = states.nrows().max(1) as f64;
        let mut delta = &activations[self.weights.len()] - targets;
        delta *= 2.0 / batch;

        // Backward pass; the propagated delta must use the pre-update
        // weights, so it is computed before the layer is touched.
        for layer in (0..self.weights.len()).rev() {
            let grad_w = activations[layer].t().dot(&delta);
            let grad_b = delta.sum_axis(Axis(0));

            let propagated = if layer > 0 {
                let mut d = delta.dot(&self.weights[layer].t());
                d.zip_mut_with(&activations[layer], |dv, av| {
                    if *av <= 0.0 {
                        *dv = 0.0;
                    }
                });
                Some(d)
            } else {
                None
            };

            self.weights[layer].scaled_add(-self.learning_rate, &grad_w);
            self.biases[layer].scaled_add(-self.learning_rate, &grad_b);

            if let Some(d) = propagated {
                delta = d;
            }
        }
    }

    /// Overwrite this network's parameters with `source`'s (target refresh).
    pub fn clone_weights_from(&mut self, source: &QNetwork) {
        self.weights = source.weights.clone();
        self.biases = source.biases.clone();
    }

    fn parameter_count(&self) -> usize {
        self.weights.iter().map(|w| w.len()).sum::<usize>()
            + self.biases.iter().map(|b| b.len()).sum::<usize>()
    }

    /// Human-readable architecture description, also written next to the
    /// weights on save.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "QNetwork");
        let _ = writeln!(out, "  input_dim:    {}", self.input_dim);
        let _ = writeln!(
            out,
            "  hidden:       {} x {} (relu)",
            self.num_layers, self.width_layers
        );
        let _ = writeln!(out, "  output_dim:   {} (linear)", self.output_dim);
        let _ = writeln!(out, "  batch_size:   {}", self.batch_size);
        let _ = writeln!(out, "  learning_rate: {}", self.learning_rate);
        let _ = writeln!(out, "  parameters:   {}", self.parameter_count());
        out
    }

    /// Persist learned parameters (`trained_model.json`) and the
    /// architecture summary (`model_summary.txt`) into `dir`.
    ///
    /// Fails loudly if `dir` is not writable; calling once at run end is
    /// idempotent.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let artifact = ModelArtifact {
            input_dim: self.input_dim,
            output_dim: self.output_dim,
            num_layers: self.num_layers,
            width_layers: self.width_layers,
            layers: self
                .weights
                .iter()
                .zip(&self.biases)
                .map(|(w, b)| LayerArtifact {
                    rows: w.nrows(),
                    cols: w.ncols(),
                    weights: w.iter().copied().collect(),
                    biases: b.to_vec(),
                })
                .collect(),
        };

        let weights_path = dir.join("trained_model.json");
        let file = File::create(&weights_path)
            .with_context(|| format!("cannot write model to {}", weights_path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &artifact)
            .with_context(|| format!("failed to serialize model to {}", weights_path.display()))?;
        writer
            .flush()
            .with_context(|| format!("cannot write model to {}", weights_path.display()))?;

        let summary_path = dir.join("model_summary.txt");
        fs::write(&summary_path, self.summary())
            .with_context(|| format!("cannot write {}", summary_path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn small_net(seed: u64) -> QNetwork {
        QNetwork::with_seed(2, 8, 4, 0.05, 3, 2, seed)
    }

    #[test]
    fn output_has_action_space_shape() {
        let net = small_net(0);
        let q = net.predict_one(&[0.5, -1.0, 2.0]);
        assert_eq!(q.len(), 2);

        let batch = array![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]];
        assert_eq!(net.predict_batch(&batch).dim(), (2, 2));
    }

    #[test]
    fn same_seed_same_initialisation() {
        let a = small_net(42);
        let b = small_net(42);
        let state = [0.3, 0.7, -0.2];
        assert_eq!(a.predict_one(&state), b.predict_one(&state));

        let c = small_net(43);
        assert_ne!(a.predict_one(&state), c.predict_one(&state));
    }

    #[test]
    fn fitting_reduces_squared_error() {
        let mut net = small_net(7);
        let states = array![
            [0.0, 0.0, 1.0],
            [0.0, 1.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0]
        ];
        let targets = array![[1.0, 0.0], [0.0, 1.0], [0.5, 0.5], [1.0, 1.0]];

        let loss = |net: &QNetwork| {
            let diff = &net.predict_batch(&states) - &targets;
            diff.mapv(|v| v * v).sum()
        };

        let before = loss(&net);
        for _ in 0..200 {
            net.fit_batch(&states, &targets);
        }
        let after = loss(&net);
        assert!(
            after < before * 0.5,
            "loss should drop substantially: before={before}, after={after}"
        );
    }

    #[test]
    fn clone_weights_from_synchronises_predictions() {
        let mut online = small_net(1);
        let mut target = small_net(2);
        let state = [0.1, 0.2, 0.3];
        assert_ne!(online.predict_one(&state), target.predict_one(&state));

        // Push the online net away from its init, then sync.
        let states = array![[0.1, 0.2, 0.3]];
        let targets = array![[1.0, -1.0]];
        online.fit_batch(&states, &targets);

        target.clone_weights_from(&online);
        assert_eq!(online.predict_one(&state), target.predict_one(&state));
    }

    #[test]
    fn save_writes_weights_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let net = small_net(0);
        net.save(dir.path()).unwrap();

        let weights = dir.path().join("trained_model.json");
        let summary = dir.path().join("model_summary.txt");
        assert!(weights.is_file());
        assert!(summary.is_file());

        let artifact: super::ModelArtifact =
            serde_json::from_str(&fs::read_to_string(&weights).unwrap()).unwrap();
        assert_eq!(artifact.input_dim, 3);
        assert_eq!(artifact.output_dim, 2);
        // 2 hidden layers + output head.
        assert_eq!(artifact.layers.len(), 3);

        let text = fs::read_to_string(&summary).unwrap();
        assert!(text.contains("parameters"));
    }

    #[test]
    fn save_into_missing_directory_fails_loudly() {
        let net = small_net(0);
        assert!(net.save(Path::new("/nonexistent/run_dir")).is_err());
    }
}
