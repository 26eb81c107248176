//! `ChromaNet` — small convolutional-then-dense network over chroma sequences.
//!
//! ## Architecture
//!
//! ```text
//! chroma [T, 12] → conv1d 32 (k=3, same, relu)
//!                → conv1d 64 (k=3, same, relu)
//!                → global average pool over time
//!                → dense 64 (relu)
//!                → dense |vocab| (softmax)
//! ```
//!
//! Same-padding convolutions and the global average pool make the network
//! total over any sequence length ≥ 1, including the 3-frame windows of the
//! live path. An untrained instance still produces a valid probability
//! distribution — predictions are near uniform, which downstream collapses
//! into the "unknown" outcome.

use ndarray::{Array1, Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dsp::chroma::{Chromagram, BIN_COUNT};
use crate::error::{ChordError, Result};

const CONV1_CHANNELS: usize = 32;
const CONV2_CHANNELS: usize = 64;
const KERNEL: usize = 3;
const HIDDEN: usize = 64;

/// Default placeholder weight seed — fixed so a freshly built placeholder is
/// reproducible across processes.
const PLACEHOLDER_SEED: u64 = 0x5eed_c0de;

/// Serialized weight blob. JSON via serde; additive fields default so older
/// blobs keep loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelWeights {
    #[serde(default = "default_version")]
    pub version: u32,
    pub vocabulary: Vec<String>,
    pub conv1: ConvWeights,
    pub conv2: ConvWeights,
    pub dense1: DenseWeights,
    pub dense2: DenseWeights,
    /// Whether these weights have been through at least one training pass.
    #[serde(default)]
    pub trained: bool,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvWeights {
    /// Flattened [out_ch, in_ch, kernel].
    pub kernel: Vec<f32>,
    pub bias: Vec<f32>,
    pub out_channels: usize,
    pub in_channels: usize,
    pub kernel_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenseWeights {
    /// Flattened [out, in].
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
    pub out_features: usize,
    pub in_features: usize,
}

/// One example of the supervised training set: features plus the index of
/// the correct label in the vocabulary.
#[derive(Debug, Clone)]
pub struct TrainingExample {
    pub chromagram: Chromagram,
    pub label_index: usize,
}

/// Summary returned by a training run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingReport {
    pub epochs: usize,
    pub examples: usize,
    pub final_loss: f32,
}

struct ConvLayer {
    // [out_ch, in_ch, k]
    kernel: Array3<f32>,
    bias: Array1<f32>,
}

struct DenseLayer {
    // [out, in]
    weight: Array2<f32>,
    bias: Array1<f32>,
}

/// The trainable chroma classifier network.
pub struct ChromaNet {
    conv1: ConvLayer,
    conv2: ConvLayer,
    dense1: DenseLayer,
    dense2: DenseLayer,
    vocabulary: Vec<String>,
    trained: bool,
}

impl ChromaNet {
    /// Build an untrained placeholder with deterministic He-initialized
    /// weights for the given vocabulary.
    pub fn placeholder(vocabulary: Vec<String>) -> Self {
        let mut rng = StdRng::seed_from_u64(PLACEHOLDER_SEED);
        let vocab_len = vocabulary.len();
        Self {
            conv1: ConvLayer::init(CONV1_CHANNELS, BIN_COUNT, &mut rng),
            conv2: ConvLayer::init(CONV2_CHANNELS, CONV1_CHANNELS, &mut rng),
            dense1: DenseLayer::init(HIDDEN, CONV2_CHANNELS, &mut rng),
            dense2: DenseLayer::init(vocab_len, HIDDEN, &mut rng),
            vocabulary,
            trained: false,
        }
    }

    /// Rehydrate a network from a persisted weight blob.
    pub fn from_weights(weights: ModelWeights) -> Result<Self> {
        Ok(Self {
            conv1: ConvLayer::from_weights(&weights.conv1)?,
            conv2: ConvLayer::from_weights(&weights.conv2)?,
            dense1: DenseLayer::from_weights(&weights.dense1)?,
            dense2: DenseLayer::from_weights(&weights.dense2)?,
            vocabulary: weights.vocabulary,
            trained: weights.trained,
        })
    }

    /// Snapshot the current weights for persistence.
    pub fn to_weights(&self) -> ModelWeights {
        ModelWeights {
            version: default_version(),
            vocabulary: self.vocabulary.clone(),
            conv1: self.conv1.to_weights(),
            conv2: self.conv2.to_weights(),
            dense1: self.dense1.to_weights(),
            dense2: self.dense2.to_weights(),
            trained: self.trained,
        }
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Forward pass: probability vector in vocabulary order, sums to ~1.0.
    pub fn predict(&self, chromagram: &Chromagram) -> Result<Vec<f32>> {
        if chromagram.is_empty() {
            return Err(ChordError::Inference("empty chromagram".into()));
        }
        let input = chroma_matrix(chromagram);
        let (probs, _) = self.forward(&input);
        Ok(probs.to_vec())
    }

    /// Supervised SGD fit with cross-entropy loss. Exclusive access is the
    /// caller's responsibility (the lifecycle manager holds the model lock
    /// for the duration).
    pub fn train(
        &mut self,
        examples: &[TrainingExample],
        epochs: usize,
        learning_rate: f32,
    ) -> Result<TrainingReport> {
        if examples.is_empty() {
            return Err(ChordError::Training("empty training set".into()));
        }
        for ex in examples {
            if ex.label_index >= self.vocabulary.len() {
                return Err(ChordError::Training(format!(
                    "label index {} out of range for vocabulary of {}",
                    ex.label_index,
                    self.vocabulary.len()
                )));
            }
            if ex.chromagram.is_empty() {
                return Err(ChordError::Training("example with empty chromagram".into()));
            }
        }

        let mut last_loss = 0.0f32;
        for epoch in 0..epochs {
            let mut epoch_loss = 0.0f32;
            for ex in examples {
                let input = chroma_matrix(&ex.chromagram);
                epoch_loss += self.step(&input, ex.label_index, learning_rate);
            }
            last_loss = epoch_loss / examples.len() as f32;
            debug!(epoch, loss = last_loss, "training epoch complete");
        }
        self.trained = true;

        Ok(TrainingReport {
            epochs,
            examples: examples.len(),
            final_loss: last_loss,
        })
    }

    /// Forward pass returning the output probabilities and the cached
    /// intermediate activations needed for backprop.
    fn forward(&self, input: &Array2<f32>) -> (Array1<f32>, Activations) {
        let a1 = self.conv1.forward_relu(input);
        let a2 = self.conv2.forward_relu(&a1);
        let pooled = global_average_pool(&a2);
        let h_pre = self.dense1.weight.dot(&pooled) + &self.dense1.bias;
        let h = h_pre.mapv(|v| v.max(0.0));
        let logits = self.dense2.weight.dot(&h) + &self.dense2.bias;
        let probs = softmax(&logits);
        (
            probs,
            Activations {
                a1,
                a2,
                pooled,
                h_pre,
                h,
            },
        )
    }

    /// One SGD step on a single example; returns the cross-entropy loss.
    fn step(&mut self, input: &Array2<f32>, label: usize, lr: f32) -> f32 {
        let (probs, acts) = self.forward(input);
        let loss = -(probs[label].max(1e-9)).ln();

        // dL/dlogits for softmax + cross-entropy
        let mut d_logits = probs;
        d_logits[label] -= 1.0;

        // dense2
        let d_h = self.dense2.weight.t().dot(&d_logits);
        self.dense2.apply_grad(&d_logits, &acts.h, lr);

        // dense1 (through relu); input gradient uses the pre-update weights
        let d_h_pre = &d_h * &acts.h_pre.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        let d_pooled = self.dense1.weight.t().dot(&d_h_pre);
        self.dense1.apply_grad(&d_h_pre, &acts.pooled, lr);

        // global average pool spreads the gradient evenly over time
        let time = acts.a2.ncols();
        let mut d_a2 = Array2::<f32>::zeros(acts.a2.raw_dim());
        for t in 0..time {
            for c in 0..d_pooled.len() {
                d_a2[[c, t]] = d_pooled[c] / time as f32;
            }
        }

        // conv2 (through relu)
        let d_a2 = &d_a2 * &acts.a2.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        let d_a1 = self.conv2.backward(&acts.a1, &d_a2, lr);

        // conv1 (through relu)
        let d_a1 = &d_a1 * &acts.a1.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        let _ = self.conv1.backward(input, &d_a1, lr);

        loss
    }
}

struct Activations {
    a1: Array2<f32>,
    a2: Array2<f32>,
    pooled: Array1<f32>,
    h_pre: Array1<f32>,
    h: Array1<f32>,
}

impl ConvLayer {
    fn init(out_ch: usize, in_ch: usize, rng: &mut StdRng) -> Self {
        let scale = (2.0 / (in_ch * KERNEL) as f32).sqrt();
        let kernel = Array3::from_shape_fn((out_ch, in_ch, KERNEL), |_| {
            rng.gen_range(-1.0f32..1.0) * scale
        });
        Self {
            kernel,
            bias: Array1::zeros(out_ch),
        }
    }

    fn from_weights(w: &ConvWeights) -> Result<Self> {
        let kernel = Array3::from_shape_vec(
            (w.out_channels, w.in_channels, w.kernel_size),
            w.kernel.clone(),
        )
        .map_err(|e| ChordError::ModelLoad(format!("conv kernel shape: {e}")))?;
        if w.bias.len() != w.out_channels {
            return Err(ChordError::ModelLoad("conv bias length mismatch".into()));
        }
        Ok(Self {
            kernel,
            bias: Array1::from_vec(w.bias.clone()),
        })
    }

    fn to_weights(&self) -> ConvWeights {
        let (out_ch, in_ch, k) = self.kernel.dim();
        ConvWeights {
            kernel: self.kernel.iter().copied().collect(),
            bias: self.bias.to_vec(),
            out_channels: out_ch,
            in_channels: in_ch,
            kernel_size: k,
        }
    }

    /// Same-padded conv over the time axis followed by relu.
    /// Input and output are [channels, time].
    fn forward_relu(&self, input: &Array2<f32>) -> Array2<f32> {
        let (out_ch, in_ch, k) = self.kernel.dim();
        let time = input.ncols();
        let pad = k / 2;
        let mut out = Array2::<f32>::zeros((out_ch, time));
        for o in 0..out_ch {
            for t in 0..time {
                let mut acc = self.bias[o];
                for c in 0..in_ch {
                    for ki in 0..k {
                        let src = t as isize + ki as isize - pad as isize;
                        if src >= 0 && (src as usize) < time {
                            acc += self.kernel[[o, c, ki]] * input[[c, src as usize]];
                        }
                    }
                }
                out[[o, t]] = acc.max(0.0);
            }
        }
        out
    }

    /// Backprop one conv layer: updates kernel/bias in place and returns the
    /// gradient with respect to the layer input.
    fn backward(&mut self, input: &Array2<f32>, d_out: &Array2<f32>, lr: f32) -> Array2<f32> {
        let (out_ch, in_ch, k) = self.kernel.dim();
        let time = input.ncols();
        let pad = k / 2;
        let mut d_input = Array2::<f32>::zeros(input.raw_dim());
        let mut d_kernel = Array3::<f32>::zeros(self.kernel.raw_dim());

        for o in 0..out_ch {
            let mut d_bias = 0.0f32;
            for t in 0..time {
                let g = d_out[[o, t]];
                if g == 0.0 {
                    continue;
                }
                d_bias += g;
                for c in 0..in_ch {
                    for ki in 0..k {
                        let src = t as isize + ki as isize - pad as isize;
                        if src >= 0 && (src as usize) < time {
                            let src = src as usize;
                            d_input[[c, src]] += g * self.kernel[[o, c, ki]];
                            d_kernel[[o, c, ki]] += g * input[[c, src]];
                        }
                    }
                }
            }
            self.bias[o] -= lr * d_bias;
        }
        self.kernel.zip_mut_with(&d_kernel, |w, &g| *w -= lr * g);
        d_input
    }
}

impl DenseLayer {
    fn init(out: usize, inp: usize, rng: &mut StdRng) -> Self {
        let scale = (2.0 / inp as f32).sqrt();
        let weight = Array2::from_shape_fn((out, inp), |_| rng.gen_range(-1.0f32..1.0) * scale);
        Self {
            weight,
            bias: Array1::zeros(out),
        }
    }

    fn from_weights(w: &DenseWeights) -> Result<Self> {
        let weight = Array2::from_shape_vec((w.out_features, w.in_features), w.weight.clone())
            .map_err(|e| ChordError::ModelLoad(format!("dense weight shape: {e}")))?;
        if w.bias.len() != w.out_features {
            return Err(ChordError::ModelLoad("dense bias length mismatch".into()));
        }
        Ok(Self {
            weight,
            bias: Array1::from_vec(w.bias.clone()),
        })
    }

    fn to_weights(&self) -> DenseWeights {
        let (out, inp) = self.weight.dim();
        DenseWeights {
            weight: self.weight.iter().copied().collect(),
            bias: self.bias.to_vec(),
            out_features: out,
            in_features: inp,
        }
    }

    fn apply_grad(&mut self, d_out: &Array1<f32>, input: &Array1<f32>, lr: f32) {
        for o in 0..self.weight.nrows() {
            let g = d_out[o];
            if g == 0.0 {
                continue;
            }
            for i in 0..self.weight.ncols() {
                self.weight[[o, i]] -= lr * g * input[i];
            }
            self.bias[o] -= lr * g;
        }
    }
}

/// Chromagram → [12, time] channel-major matrix.
fn chroma_matrix(chromagram: &Chromagram) -> Array2<f32> {
    let time = chromagram.time_steps();
    Array2::from_shape_fn((BIN_COUNT, time), |(bin, t)| chromagram.frames[t][bin])
}

fn global_average_pool(input: &Array2<f32>) -> Array1<f32> {
    let time = input.ncols().max(1) as f32;
    input.sum_axis(ndarray::Axis(1)) / time
}

/// Numerically stable softmax.
fn softmax(logits: &Array1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp = logits.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vec<String> {
        vec!["C".into(), "G".into(), "Am".into(), "no_chord".into()]
    }

    fn single_bin_chroma(bin: usize, steps: usize) -> Chromagram {
        let mut frame = [0.0f32; BIN_COUNT];
        frame[bin] = 1.0;
        Chromagram {
            frames: vec![frame; steps],
            sample_rate: 44_100,
        }
    }

    #[test]
    fn placeholder_predictions_sum_to_one() {
        let net = ChromaNet::placeholder(vocab());
        let probs = net.predict(&single_bin_chroma(0, 3)).unwrap();
        assert_eq!(probs.len(), 4);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4, "sum={sum}");
        assert!(probs.iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn placeholder_is_deterministic() {
        let a = ChromaNet::placeholder(vocab());
        let b = ChromaNet::placeholder(vocab());
        let input = single_bin_chroma(5, 3);
        assert_eq!(a.predict(&input).unwrap(), b.predict(&input).unwrap());
    }

    #[test]
    fn weights_round_trip_preserves_predictions() {
        let net = ChromaNet::placeholder(vocab());
        let input = single_bin_chroma(9, 3);
        let before = net.predict(&input).unwrap();

        let blob = serde_json::to_string(&net.to_weights()).unwrap();
        let restored: ModelWeights = serde_json::from_str(&blob).unwrap();
        let net2 = ChromaNet::from_weights(restored).unwrap();

        assert_eq!(before, net2.predict(&input).unwrap());
    }

    #[test]
    fn training_reduces_loss_and_separates_two_classes() {
        let mut net = ChromaNet::placeholder(vocab());
        let examples = vec![
            TrainingExample {
                chromagram: single_bin_chroma(0, 3),
                label_index: 0,
            },
            TrainingExample {
                chromagram: single_bin_chroma(7, 3),
                label_index: 1,
            },
        ];
        let first = net.train(&examples, 1, 0.05).unwrap();
        let report = net.train(&examples, 200, 0.05).unwrap();
        assert!(report.final_loss < first.final_loss);
        assert!(net.is_trained());

        let p0 = net.predict(&single_bin_chroma(0, 3)).unwrap();
        let p1 = net.predict(&single_bin_chroma(7, 3)).unwrap();
        assert!(p0[0] > p0[1], "class 0 not separated: {p0:?}");
        assert!(p1[1] > p1[0], "class 1 not separated: {p1:?}");
    }

    #[test]
    fn empty_training_set_is_an_error() {
        let mut net = ChromaNet::placeholder(vocab());
        assert!(net.train(&[], 1, 0.01).is_err());
    }

    #[test]
    fn out_of_range_label_is_an_error() {
        let mut net = ChromaNet::placeholder(vocab());
        let examples = vec![TrainingExample {
            chromagram: single_bin_chroma(0, 3),
            label_index: 99,
        }];
        assert!(net.train(&examples, 1, 0.01).is_err());
    }

    #[test]
    fn empty_chromagram_is_an_inference_error() {
        let net = ChromaNet::placeholder(vocab());
        let empty = Chromagram {
            frames: vec![],
            sample_rate: 44_100,
        };
        assert!(net.predict(&empty).is_err());
    }

    #[test]
    fn single_frame_input_is_supported() {
        let net = ChromaNet::placeholder(vocab());
        let probs = net.predict(&single_bin_chroma(3, 1)).unwrap();
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }
}
