use candle_core::DType;
use candle_nn::{AdamW, Optimizer};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;

use crate::config::TrainConfig;
use crate::error::Result;
use crate::kernels::Kernel;
use crate::likelihood::Likelihood;
use crate::mean_functions::MeanFunction;
use crate::model::StVgp;

/// Maximise the stochastic ELBO over the variational parameters with AdamW.
///
/// Each iteration draws fresh samples, so the returned trace (one ELBO
/// estimate per iteration) is noisy.
pub fn fit<K, L, M>(model: &StVgp<K, L, M>, train_config: &TrainConfig) -> Result<Vec<f64>>
where
    K: Kernel,
    L: Likelihood,
    M: MeanFunction,
{
    let mut adam = AdamW::new_lr(model.trainable_vars(), train_config.learning_rate)?;

    let pb = ProgressBar::new(train_config.num_iters as u64);
    if !train_config.show_progress || train_config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let log_every = train_config.log_every.max(1);
    let mut elbo_trace = Vec::with_capacity(train_config.num_iters);

    for iter in 0..train_config.num_iters {
        let loss = model.elbo_loss()?;
        adam.backward_step(&loss)?;

        let elbo = -loss.to_dtype(DType::F64)?.to_scalar::<f64>()?;
        elbo_trace.push(elbo);
        pb.inc(1);

        if train_config.verbose && (iter % log_every == 0 || iter + 1 == train_config.num_iters) {
            info!("[{}] ELBO = {:.4}", iter + 1, elbo);
        }
    }
    pb.finish_and_clear();
    Ok(elbo_trace)
}
