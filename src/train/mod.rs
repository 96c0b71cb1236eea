//! Minibatch training loop with periodic reporting and checkpointing.

pub mod checkpoint;

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::data::FlowDataset;
use crate::error::{Error, Result};
use crate::eval::{evaluate, Metrics};
use crate::model::DayTypeNet;
use crate::optim::{Adam, Optimizer};

/// Numerator of the L2 coefficient: `L2_SCALE / test_len`.
const L2_SCALE: f32 = 10.0;

/// Training hyperparameters.
#[derive(Debug, Clone, Serialize)]
pub struct TrainConfig {
    /// Number of minibatch steps.
    pub iterations: usize,
    /// Samples per minibatch, drawn with replacement from the train split.
    pub batch_size: usize,
    /// Adam learning rate.
    pub learning_rate: f32,
    /// Dropout retain probability during training steps.
    pub keep_prob: f32,
    /// Report accuracy and loss every this many steps.
    pub report_every: usize,
    /// Write a checkpoint every this many steps.
    pub checkpoint_every: usize,
    /// Directory for checkpoint files.
    pub checkpoint_dir: PathBuf,
    /// Seed for initialization, batch sampling, and dropout. `None` seeds
    /// from entropy.
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            iterations: 10_000,
            batch_size: 32,
            learning_rate: 1e-4,
            keep_prob: 0.5,
            report_every: 100,
            checkpoint_every: 1000,
            checkpoint_dir: PathBuf::from("checkpoint"),
            seed: None,
        }
    }
}

impl TrainConfig {
    /// Reject configurations the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::Config("iterations must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.keep_prob) || self.keep_prob == 0.0 {
            return Err(Error::Config(format!(
                "keep_prob must be in (0, 1], got {}",
                self.keep_prob
            )));
        }
        if self.report_every == 0 || self.checkpoint_every == 0 {
            return Err(Error::Config(
                "report_every and checkpoint_every must be positive".to_string(),
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(Error::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Phase of the training loop, queryable between operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Initializing,
    Training,
    Checkpointing,
    Evaluating,
    Finished,
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainSummary {
    /// Accuracy on the test split after the last step.
    pub test_accuracy: f32,
    /// Sum-form cross-entropy on the test split after the last step.
    pub test_loss: f32,
    /// Checkpoint files written, in step order.
    pub checkpoints: Vec<PathBuf>,
}

/// Owns the model, the optimizer, and both data splits for one run.
#[derive(Debug)]
pub struct Trainer {
    config: TrainConfig,
    net: DayTypeNet,
    optimizer: Adam,
    train_set: FlowDataset,
    test_set: FlowDataset,
    lambda: f32,
    rng: StdRng,
    state: TrainerState,
}

impl Trainer {
    /// Build a trainer over the given splits.
    ///
    /// The L2 coefficient is `10.0 / test_len`, so an empty test split is an
    /// error rather than a division by zero.
    pub fn new(config: TrainConfig, train_set: FlowDataset, test_set: FlowDataset) -> Result<Self> {
        config.validate()?;
        if train_set.is_empty() {
            return Err(Error::Config("train split is empty".to_string()));
        }
        if test_set.is_empty() {
            return Err(Error::Config(
                "test split is empty; the regularization coefficient is undefined".to_string(),
            ));
        }
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let net = DayTypeNet::new(&mut rng);
        let optimizer = Adam::default_params(config.learning_rate);
        let lambda = L2_SCALE / test_set.len() as f32;
        Ok(Self {
            config,
            net,
            optimizer,
            train_set,
            test_set,
            lambda,
            rng,
            state: TrainerState::Initializing,
        })
    }

    /// Current loop phase.
    pub fn state(&self) -> TrainerState {
        self.state
    }

    /// The trained model.
    pub fn net(&self) -> &DayTypeNet {
        &self.net
    }

    /// Run the configured number of steps to completion.
    ///
    /// Per step: draw a with-replacement minibatch; on report steps print
    /// minibatch and test metrics before updating; on checkpoint boundaries
    /// write a checkpoint tagged with the upcoming step count; then one
    /// forward/backward/Adam update. A non-finite minibatch loss or a failed
    /// checkpoint write aborts the run.
    pub fn run(&mut self) -> Result<TrainSummary> {
        let mut checkpoints = Vec::new();

        for step in 0..self.config.iterations {
            self.state = TrainerState::Training;
            let batch = self.sample_batch();

            if step % self.config.report_every == 0 {
                self.state = TrainerState::Evaluating;
                let (batch_acc, batch_loss) = self.batch_metrics(&batch);
                let test = evaluate(&self.net, &self.test_set);
                println!(
                    "step {step}, accuracy {batch_acc}, test_accuracy {}, loss {batch_loss}",
                    test.accuracy
                );
            }

            if (step + 1) % self.config.checkpoint_every == 0 {
                self.state = TrainerState::Checkpointing;
                let path =
                    checkpoint::save_checkpoint(&self.net, &self.config.checkpoint_dir, step + 1)?;
                checkpoints.push(path);
            }

            self.state = TrainerState::Training;
            let cache = self.net.forward_train(
                batch.flows(),
                batch.aux(),
                self.config.keep_prob,
                &mut self.rng,
            );
            let loss = self.net.backward(&batch, &cache, self.lambda);
            if !loss.is_finite() {
                return Err(Error::NumericDivergence { step, loss });
            }
            self.optimizer.step(&mut self.net.slots_mut());
        }

        self.state = TrainerState::Finished;
        let final_metrics = evaluate(&self.net, &self.test_set);
        println!(
            "accuracy on test data {}, loss on test data {}",
            final_metrics.accuracy, final_metrics.loss
        );
        Ok(TrainSummary {
            test_accuracy: final_metrics.accuracy,
            test_loss: final_metrics.loss,
            checkpoints,
        })
    }

    /// Uniform with-replacement minibatch from the train split.
    fn sample_batch(&mut self) -> FlowDataset {
        let n = self.train_set.len();
        let indices: Vec<usize> =
            (0..self.config.batch_size).map(|_| self.rng.gen_range(0..n)).collect();
        self.train_set.select(&indices)
    }

    /// Minibatch accuracy and cross-entropy at keep = 1.0. The reported loss
    /// is the data term only; the L2 penalty belongs to the training
    /// objective, not the report line.
    fn batch_metrics(&self, batch: &FlowDataset) -> (f32, f32) {
        let Metrics { accuracy, loss } = evaluate(&self.net, batch);
        (accuracy, loss)
    }
}
