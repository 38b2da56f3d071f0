//! Mini-batch training driver and evaluation.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::metrics::accuracy;
use crate::{Dataset, Error, Network, Result};

/// Rows per forward pass when evaluating a whole dataset.
const EVAL_CHUNK: usize = 1000;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitConfig {
    /// Number of mini-batch SGD steps; ignored when `epochs` is set.
    pub steps: usize,
    /// Train for this many shuffled passes over the data instead of `steps` random batches.
    pub epochs: Option<usize>,
    pub batch_size: usize,
    pub lr: f32,
    /// Log progress every `log_every` steps; `0` disables progress logging.
    pub log_every: usize,
    /// Seed for batch sampling.
    pub seed: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            steps: 1000,
            epochs: None,
            batch_size: 64,
            lr: 0.1,
            log_every: 100,
            seed: 0,
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<()> {
        match self.epochs {
            Some(0) => return Err(Error::InvalidConfig("epochs must be > 0".to_owned())),
            None if self.steps == 0 => {
                return Err(Error::InvalidConfig("steps must be > 0".to_owned()))
            }
            _ => {}
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "lr must be finite and > 0, got {}",
                self.lr
            )));
        }
        Ok(())
    }
}

/// Outcome of [`Network::fit`].
///
/// In step mode `final_loss` and `final_accuracy` describe the last training batch; in
/// epoch mode they are the last epoch's averages.
#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    pub final_loss: f32,
    pub final_accuracy: f32,
    /// Accuracy on the evaluation set after training, when one was given.
    pub eval_accuracy: Option<f32>,
    /// One entry per epoch; empty in step mode.
    pub epochs: Vec<EpochReport>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    /// 1-based.
    pub epoch: usize,
    /// Mean per-sample training loss over the epoch.
    pub loss: f32,
    pub accuracy: f32,
    pub eval: Option<EvalReport>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    /// Mean per-sample loss.
    pub loss: f32,
    pub accuracy: f32,
}

impl Network {
    /// Train on mini-batches drawn from `train`.
    ///
    /// Without `cfg.epochs`, runs `cfg.steps` batches sampled with replacement. With it,
    /// every epoch shuffles the data, visits each sample once and, when `eval` is given,
    /// evaluates on it. Sampling uses a `StdRng` seeded with `cfg.seed`, so a run is
    /// reproducible for a given network and config.
    pub fn fit(
        &mut self,
        train: &Dataset,
        eval: Option<&Dataset>,
        cfg: FitConfig,
    ) -> Result<FitReport> {
        cfg.validate()?;
        self.check_dataset("train", train)?;
        if let Some(eval) = eval {
            self.check_dataset("eval", eval)?;
        }

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        match cfg.epochs {
            Some(epochs) => self.fit_epochs(train, eval, &cfg, epochs, &mut rng),
            None => self.fit_steps(train, eval, &cfg, &mut rng),
        }
    }

    fn fit_steps(
        &mut self,
        train: &Dataset,
        eval: Option<&Dataset>,
        cfg: &FitConfig,
        rng: &mut StdRng,
    ) -> Result<FitReport> {
        let mut final_loss = f32::NAN;
        let mut final_accuracy = 0.0;

        for step in 1..=cfg.steps {
            let batch = train.get_batch(cfg.batch_size, rng)?;
            let prediction = self.train(&batch.x, &batch.y, cfg.lr)?;

            let report = cfg.log_every > 0 && step % cfg.log_every == 0;
            if report || step == cfg.steps {
                final_loss = self.config().loss.value(&prediction, &batch.y)?;
                final_accuracy = accuracy(&prediction, &batch.labels)?;
            }
            if report {
                log::info!(
                    "step {step}/{}: loss={final_loss:.4} accuracy={:.2}%",
                    cfg.steps,
                    final_accuracy * 100.0
                );
            }
        }

        let eval_accuracy = eval
            .map(|eval| self.evaluate_logged(eval))
            .transpose()?
            .map(|r| r.accuracy);

        Ok(FitReport {
            final_loss,
            final_accuracy,
            eval_accuracy,
            epochs: Vec::new(),
        })
    }

    fn fit_epochs(
        &mut self,
        train: &Dataset,
        eval: Option<&Dataset>,
        cfg: &FitConfig,
        epochs: usize,
        rng: &mut StdRng,
    ) -> Result<FitReport> {
        let mut history = Vec::with_capacity(epochs);
        let n = train.len() as f32;

        for epoch in 1..=epochs {
            let mut total_loss = 0.0_f32;
            let mut correct = 0.0_f32;
            for (i, batch) in train.shuffled_batches(cfg.batch_size, rng)?.enumerate() {
                let batch = batch?;
                let prediction = self.train(&batch.x, &batch.y, cfg.lr)?;
                let loss = self.config().loss.value(&prediction, &batch.y)?;
                let acc = accuracy(&prediction, &batch.labels)?;
                let size = batch.labels.len() as f32;
                total_loss += loss * size;
                correct += acc * size;

                if cfg.log_every > 0 && (i + 1) % cfg.log_every == 0 {
                    log::info!(
                        "epoch {epoch}, batch {}: loss={loss:.4} accuracy={:.2}%",
                        i + 1,
                        acc * 100.0
                    );
                }
            }

            let report = EpochReport {
                epoch,
                loss: total_loss / n,
                accuracy: correct / n,
                eval: eval.map(|eval| self.evaluate_logged(eval)).transpose()?,
            };
            log::info!(
                "epoch {epoch}/{epochs} complete: avg loss={:.4} avg accuracy={:.2}%",
                report.loss,
                report.accuracy * 100.0
            );
            history.push(report);
        }

        let (final_loss, final_accuracy, eval_accuracy) = match history.last() {
            Some(last) => (last.loss, last.accuracy, last.eval.map(|r| r.accuracy)),
            None => (f32::NAN, 0.0, None),
        };
        Ok(FitReport {
            final_loss,
            final_accuracy,
            eval_accuracy,
            epochs: history,
        })
    }

    fn evaluate_logged(&self, eval: &Dataset) -> Result<EvalReport> {
        let r = self.evaluate(eval)?;
        log::info!(
            "eval: loss={:.4} accuracy={:.2}%",
            r.loss,
            r.accuracy * 100.0
        );
        Ok(r)
    }

    /// Mean loss and accuracy over every sample of `data`, without touching layer caches.
    pub fn evaluate(&self, data: &Dataset) -> Result<EvalReport> {
        self.check_dataset("eval", data)?;

        let indices: Vec<usize> = (0..data.len()).collect();
        let mut total_loss = 0.0_f32;
        let mut correct = 0.0_f32;
        for chunk in indices.chunks(EVAL_CHUNK) {
            let batch = data.batch_from_indices(chunk)?;
            let prediction = self.infer(&batch.x)?;
            let n = chunk.len() as f32;
            total_loss += self.config().loss.value(&prediction, &batch.y)? * n;
            correct += accuracy(&prediction, &batch.labels)? * n;
        }

        let n = data.len() as f32;
        Ok(EvalReport {
            loss: total_loss / n,
            accuracy: correct / n,
        })
    }

    fn check_dataset(&self, name: &str, data: &Dataset) -> Result<()> {
        let (Some(input_size), Some(output_size)) = (self.input_size(), self.output_size())
        else {
            return Err(Error::InvalidConfig("network has no layers".to_owned()));
        };
        if data.image_len() != input_size {
            return Err(Error::InvalidData(format!(
                "{name} image_len {} does not match network input_size {input_size}",
                data.image_len()
            )));
        }
        if data.num_classes() != output_size {
            return Err(Error::InvalidData(format!(
                "{name} num_classes {} does not match network output_size {output_size}",
                data.num_classes()
            )));
        }
        Ok(())
    }
}
