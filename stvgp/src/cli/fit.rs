use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use clap::{Args, ValueEnum};
use log::info;
use std::path::{Path, PathBuf};

use crate::config::{CovarianceStructure, StvgpConfig, TrainConfig};
use crate::io::{read_tensor, write_tensor};
use crate::kernels::{Kernel, Matern32, Rbf};
use crate::likelihood::{BernoulliLikelihood, GaussianLikelihood, Likelihood, PoissonLikelihood};
use crate::mean_functions::Zero;
use crate::model::StVgp;
use crate::train::fit;

#[derive(Clone, Debug, ValueEnum)]
pub enum KernelType {
    /// Squared exponential
    Rbf,
    /// Matérn 3/2
    Matern32,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LikelihoodType {
    /// y ~ N(f, noise)
    Gaussian,
    /// y ~ Poisson(exp(f))
    Poisson,
    /// y ~ Bernoulli(sigmoid(f))
    Bernoulli,
}

#[derive(Args, Debug)]
pub struct FitArgs {
    #[arg(short, long, help = "Input matrix X (n x D)")]
    pub x: PathBuf,

    #[arg(short, long, help = "Output matrix Y (n x R)")]
    pub y: PathBuf,

    #[arg(long, help = "Prediction inputs (m x D)")]
    pub xnew: Option<PathBuf>,

    #[arg(short, long, default_value = "rbf")]
    pub kernel: KernelType,

    #[arg(long, default_value = "1.0", value_delimiter = ',', help = "One lengthscale or one per input column")]
    pub lengthscale: Vec<f64>,

    #[arg(long, default_value = "1.0", help = "Kernel variance")]
    pub variance: f64,

    #[arg(short, long, default_value = "gaussian")]
    pub likelihood: LikelihoodType,

    #[arg(long, default_value = "0.1", help = "Gaussian noise variance")]
    pub noise: f64,

    #[arg(long, default_value = "fullrank", help = "diagonal, fullrank, or a bandwidth k with 1 < k < n")]
    pub q_shape: CovarianceStructure,

    #[arg(long, help = "Closed-form KL (diagonal and fullrank only)")]
    pub kl_analytic: bool,

    #[arg(long, default_value = "20", help = "Monte Carlo samples per iteration")]
    pub samples: usize,

    #[arg(long, default_value = "1000")]
    pub iters: usize,

    #[arg(long, default_value = "0.01")]
    pub lr: f64,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, help = "Write the full predictive covariance of each latent output")]
    pub full_cov: bool,

    #[arg(short, long, help = "Output prefix (creates {output}.q_mu.tsv, {output}.elbo.tsv, ...)")]
    pub output: PathBuf,

    #[arg(long)]
    pub gpu: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

fn output_path(base: &Path, suffix: &str) -> PathBuf {
    let s = base.to_string_lossy();
    let base_str = s.strip_suffix(".tsv").unwrap_or(&s);
    PathBuf::from(format!("{}.{}.tsv", base_str, suffix))
}

fn save(tensor: &Tensor, base: &Path, suffix: &str) -> Result<()> {
    let path = output_path(base, suffix);
    write_tensor(tensor, &path)?;
    info!("Saved {} to {:?}", suffix, path);
    Ok(())
}

fn run_model<K: Kernel, L: Likelihood>(
    args: &FitArgs,
    x: Tensor,
    y: Tensor,
    xnew: Option<Tensor>,
    kernel: K,
    likelihood: L,
) -> Result<()> {
    let num_latent = y.dim(1)?;
    let mut config = StvgpConfig::new(args.samples)
        .with_covariance(args.q_shape)
        .with_kl_analytic(args.kl_analytic);
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    let varmap = VarMap::new();
    let model = StVgp::new(
        &varmap,
        "stvgp",
        x,
        y,
        kernel,
        likelihood,
        Zero::new(num_latent),
        None,
        config,
    )?;

    let train_config = TrainConfig {
        learning_rate: args.lr,
        num_iters: args.iters,
        verbose: args.verbose,
        ..Default::default()
    };
    let trace = fit(&model, &train_config)?;
    if let Some(last) = trace.last() {
        info!("Final ELBO estimate: {:.4}", last);
    }

    let n_iter = trace.len();
    save(&Tensor::from_vec(trace, (n_iter, 1), &Device::Cpu)?, &args.output, "elbo")?;
    save(&model.q_mu()?.t()?, &args.output, "q_mu")?;

    if let Some(xnew) = xnew {
        if args.full_cov {
            let (mean, cov) = model.predict_f(&xnew, true)?;
            save(&mean, &args.output, "pred_mean")?;
            // one m x m block per latent output
            for r in 0..num_latent {
                let cov_r = cov.narrow(2, r, 1)?.squeeze(2)?;
                save(&cov_r, &args.output, &format!("pred_cov.{}", r))?;
            }
        } else {
            let (mean, var) = model.predict_f(&xnew, false)?;
            save(&mean, &args.output, "pred_mean")?;
            save(&var, &args.output, "pred_var")?;
            let (y_mean, y_var) = model.predict_y(&xnew)?;
            save(&y_mean, &args.output, "pred_y_mean")?;
            save(&y_var, &args.output, "pred_y_var")?;
        }
    }
    Ok(())
}

fn run_with_kernel<K: Kernel>(
    args: &FitArgs,
    x: Tensor,
    y: Tensor,
    xnew: Option<Tensor>,
    kernel: K,
) -> Result<()> {
    info!("Likelihood: {:?}", args.likelihood);
    match args.likelihood {
        LikelihoodType::Gaussian => {
            run_model(args, x, y, xnew, kernel, GaussianLikelihood::new(args.noise)?)
        }
        LikelihoodType::Poisson => run_model(args, x, y, xnew, kernel, PoissonLikelihood::new()),
        LikelihoodType::Bernoulli => {
            run_model(args, x, y, xnew, kernel, BernoulliLikelihood::new())
        }
    }
}

//
// Main entry point
//

pub fn run(args: &FitArgs) -> Result<()> {
    let device = if args.gpu {
        #[cfg(feature = "metal")]
        {
            Device::new_metal(0).unwrap_or(Device::Cpu)
        }
        #[cfg(all(feature = "cuda", not(feature = "metal")))]
        {
            Device::new_cuda(0).unwrap_or(Device::Cpu)
        }
        #[cfg(not(any(feature = "cuda", feature = "metal")))]
        {
            log::warn!("built without GPU support; using CPU");
            Device::Cpu
        }
    } else {
        Device::Cpu
    };
    info!("Using device: {:?}", device);

    // Metal has no f64 kernels
    let dtype = if device.is_metal() { DType::F32 } else { DType::F64 };

    info!("Loading X from {:?}", args.x);
    let x = read_tensor(&args.x, dtype, &device)?;
    info!("  X shape: {:?}", x.dims());

    info!("Loading Y from {:?}", args.y);
    let y = read_tensor(&args.y, dtype, &device)?;
    info!("  Y shape: {:?}", y.dims());

    if y.dim(0)? != x.dim(0)? {
        anyhow::bail!("X and Y must have same number of rows");
    }

    let xnew = match &args.xnew {
        Some(p) => {
            let xnew = read_tensor(p, dtype, &device)?;
            if xnew.dim(1)? != x.dim(1)? {
                anyhow::bail!("Xnew must have the same number of columns as X");
            }
            Some(xnew)
        }
        None => None,
    };

    info!("Kernel: {:?}, variance {}, lengthscale {:?}", args.kernel, args.variance, args.lengthscale);
    match args.kernel {
        KernelType::Rbf => {
            let kernel = Rbf::new(args.variance, args.lengthscale.clone())?;
            run_with_kernel(args, x, y, xnew, kernel)
        }
        KernelType::Matern32 => {
            let kernel = Matern32::new(args.variance, args.lengthscale.clone())?;
            run_with_kernel(args, x, y, xnew, kernel)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    fn write_inputs(dir: &Path) -> Result<(PathBuf, PathBuf)> {
        let x: Vec<f64> = (0..6).map(|i| i as f64 * 0.7).collect();
        let y: Vec<f64> = x.iter().map(|v| v.cos()).collect();
        let (xp, yp) = (dir.join("x.tsv"), dir.join("y.tsv"));
        write_tensor(&Tensor::from_vec(x, (6, 1), &Device::Cpu)?, &xp)?;
        write_tensor(&Tensor::from_vec(y, (6, 1), &Device::Cpu)?, &yp)?;
        Ok((xp, yp))
    }

    fn fit_args(argv: &[&str]) -> Result<FitArgs> {
        match Cli::try_parse_from(argv)?.command {
            Commands::Fit(args) => Ok(args),
        }
    }

    #[test]
    fn test_full_cov_writes_one_block_per_latent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (xp, yp) = write_inputs(dir.path())?;
        let out = dir.path().join("out");
        let xs = xp.to_string_lossy().to_string();
        let ys = yp.to_string_lossy().to_string();
        let os = out.to_string_lossy().to_string();

        let args = fit_args(&[
            "stvgp", "fit", "-x", xs.as_str(), "-y", ys.as_str(), "--xnew", xs.as_str(), "--q-shape", "3",
            "--samples", "4", "--iters", "5", "--seed", "1", "--full-cov", "-o", os.as_str(),
        ])?;
        assert_eq!(args.q_shape, CovarianceStructure::Banded(3));
        run(&args)?;

        let cov = read_tensor(&output_path(&out, "pred_cov.0"), DType::F64, &Device::Cpu)?;
        assert_eq!(cov.dims(), &[6, 6]);
        assert!(output_path(&out, "pred_mean").exists());
        assert!(!output_path(&out, "pred_var").exists());
        let elbo = read_tensor(&output_path(&out, "elbo"), DType::F64, &Device::Cpu)?;
        assert_eq!(elbo.dims(), &[5, 1]);
        Ok(())
    }

    #[test]
    fn test_marginal_prediction_outputs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (xp, yp) = write_inputs(dir.path())?;
        let out = dir.path().join("out");
        let xs = xp.to_string_lossy().to_string();
        let ys = yp.to_string_lossy().to_string();
        let os = out.to_string_lossy().to_string();

        let args = fit_args(&[
            "stvgp", "fit", "-x", xs.as_str(), "-y", ys.as_str(), "--xnew", xs.as_str(), "--q-shape", "diagonal",
            "--kl-analytic", "--iters", "3", "-o", os.as_str(),
        ])?;
        run(&args)?;

        for suffix in ["q_mu", "pred_mean", "pred_var", "pred_y_mean", "pred_y_var"] {
            let t = read_tensor(&output_path(&out, suffix), DType::F64, &Device::Cpu)?;
            assert_eq!(t.dims(), &[6, 1], "{}", suffix);
        }
        assert!(!output_path(&out, "pred_cov.0").exists());
        Ok(())
    }
}
