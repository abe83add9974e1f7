use approx::assert_abs_diff_eq;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Optimizer, VarMap};

use stvgp::kernels::{Kernel, Rbf};
use stvgp::likelihood::{GaussianLikelihood, PoissonLikelihood};
use stvgp::mean_functions::{Constant, Zero};
use stvgp::{fit, CovarianceStructure, Result, StVgp, StvgpConfig, StvgpError, TrainConfig};

fn sine_data(n: usize, spacing: f64) -> Result<(Tensor, Tensor)> {
    let device = Device::Cpu;
    let x: Vec<f64> = (0..n).map(|i| i as f64 * spacing).collect();
    let y: Vec<f64> = x.iter().map(|v| v.sin()).collect();
    Ok((
        Tensor::from_vec(x, (n, 1), &device)?,
        Tensor::from_vec(y, (n, 1), &device)?,
    ))
}

fn gaussian_model(
    varmap: &VarMap,
    n: usize,
    lengthscale: f64,
    config: StvgpConfig,
) -> Result<StVgp<Rbf, GaussianLikelihood, Zero>> {
    let (x, y) = sine_data(n, 1.0)?;
    StVgp::new(
        varmap,
        "gp",
        x,
        y,
        Rbf::new(1.0, vec![lengthscale])?,
        GaussianLikelihood::new(0.1)?,
        Zero::new(1),
        None,
        config,
    )
}

#[test]
fn end_to_end_diagonal_elbo_is_finite() -> Result<()> {
    let varmap = VarMap::new();
    let config = StvgpConfig::new(1000)
        .with_covariance(CovarianceStructure::Diagonal)
        .with_seed(17);
    let model = gaussian_model(&varmap, 5, 1.0, config)?;

    // move away from the prior so the KL is not trivially zero
    let q = model.posterior();
    q.q_mu_param()
        .set(&Tensor::from_vec(vec![0.5f64, -0.2, 0.1, 0.8, -1.0], (1, 5), &Device::Cpu)?)?;
    q.q_sqrt()
        .raw()
        .set(&Tensor::from_vec(vec![0.5f64, 0.7, 1.3, 0.9, 0.4], (1, 5), &Device::Cpu)?)?;

    let elbo = model.build_likelihood()?.to_scalar::<f64>()?;
    assert!(elbo.is_finite());

    let kl: f64 = (0..20)
        .map(|_| model.kl_divergence(1000).and_then(|k| Ok(k.to_scalar::<f64>()?)))
        .sum::<Result<f64>>()?
        / 20.0;
    assert!(kl > 0.0, "average KL {} should be positive", kl);
    Ok(())
}

#[test]
fn predict_at_training_inputs_recovers_mean() -> Result<()> {
    let varmap = VarMap::new();
    let model = gaussian_model(&varmap, 5, 0.5, StvgpConfig::default())?;
    let q_mu = Tensor::from_vec(vec![1.0f64, -0.5, 0.25, 2.0, -1.5], (1, 5), &Device::Cpu)?;
    model.posterior().q_mu_param().set(&q_mu)?;

    let (mean, _) = model.predict_f(model.x(), false)?;
    let ll = model.kernel().cholesky(model.x(), 1)?.squeeze(0)?;
    let expected = ll.matmul(&q_mu.t()?)?.to_vec2::<f64>()?;
    let mean = mean.to_vec2::<f64>()?;
    for (a, b) in mean.iter().zip(expected.iter()) {
        assert!((a[0] - b[0]).abs() < 1e-4, "{} vs {}", a[0], b[0]);
    }
    Ok(())
}

#[test]
fn predict_with_mean_function_and_banded_posterior() -> Result<()> {
    let device = Device::Cpu;
    let n = 5;
    let (x, y) = sine_data(n, 1.0)?;
    let model = StVgp::new(
        &VarMap::new(),
        "gp",
        x,
        y,
        Rbf::new(1.0, vec![0.5])?,
        GaussianLikelihood::new(0.1)?,
        Constant::new(Tensor::from_vec(vec![3.0f64], 1, &device)?)?,
        None,
        StvgpConfig::new(10).with_covariance(CovarianceStructure::Banded(2)),
    )?;

    let q_mu = Tensor::from_vec(vec![0.4f64, -1.2, 0.7, 0.0, 1.5], (1, n), &device)?;
    model.posterior().q_mu_param().set(&q_mu)?;
    let band = vec![
        0.0f64, 0.8, //
        0.3, 1.1, //
        -0.6, 0.5, //
        0.9, -0.7, //
        0.2, 1.4,
    ];
    model
        .posterior()
        .q_sqrt()
        .raw()
        .set(&Tensor::from_vec(band, (1, n, 2), &device)?)?;

    let ll = model.kernel().cholesky(model.x(), 1)?.squeeze(0)?;
    let s = model.q_sqrt()?.squeeze(0)?;

    // mean = L q_mu + c
    let (mean, var) = model.predict_f(model.x(), false)?;
    let expected_mean = (ll.matmul(&q_mu.t()?)? + 3.0)?;
    let err = (&mean - expected_mean)?.abs()?.max_all()?.to_scalar::<f64>()?;
    assert!(err < 1e-4, "mean error {}", err);

    // cov = L S Sᵀ Lᵀ since the prior term vanishes at X
    let (full_mean, cov) = model.predict_f(model.x(), true)?;
    assert_eq!(cov.dims(), &[n, n, 1]);
    let ls = ll.matmul(&s)?;
    let expected_cov = ls.matmul(&ls.t()?)?;
    let cov_r = cov.narrow(2, 0, 1)?.squeeze(2)?;
    let err = (&cov_r - expected_cov)?.abs()?.max_all()?.to_scalar::<f64>()?;
    assert!(err < 1e-4, "covariance error {}", err);

    // the two prediction modes agree
    let full_mean = full_mean.to_vec2::<f64>()?;
    let cov_r = cov_r.to_vec2::<f64>()?;
    let mean = mean.to_vec2::<f64>()?;
    let var = var.to_vec2::<f64>()?;
    for i in 0..n {
        assert_abs_diff_eq!(full_mean[i][0], mean[i][0], epsilon = 1e-10);
        assert_abs_diff_eq!(cov_r[i][i], var[i][0], epsilon = 1e-10);
    }
    Ok(())
}

#[test]
fn rejects_bad_bandwidth_and_banded_analytic_kl() -> Result<()> {
    let n = 5;
    for k in [1, n + 1] {
        let varmap = VarMap::new();
        let config = StvgpConfig::new(10).with_covariance(CovarianceStructure::Banded(k));
        let res = gaussian_model(&varmap, n, 1.0, config);
        assert!(matches!(res, Err(StvgpError::Configuration(_))));
    }

    let varmap = VarMap::new();
    let config = StvgpConfig::new(10)
        .with_covariance(CovarianceStructure::Banded(3))
        .with_kl_analytic(true);
    let res = gaussian_model(&varmap, n, 1.0, config);
    assert!(matches!(res, Err(StvgpError::Configuration(_))));
    Ok(())
}

#[test]
fn seeded_models_are_reproducible() -> Result<()> {
    let config = StvgpConfig::new(8).with_seed(99);
    let a = gaussian_model(&VarMap::new(), 4, 1.0, config.clone())?;
    let b = gaussian_model(&VarMap::new(), 4, 1.0, config)?;
    for _ in 0..3 {
        let ea = a.build_likelihood()?.to_scalar::<f64>()?;
        let eb = b.build_likelihood()?.to_scalar::<f64>()?;
        assert_eq!(ea, eb);
    }
    Ok(())
}

#[test]
fn optimizer_updates_variational_parameters() -> Result<()> {
    let varmap = VarMap::new();
    let model = gaussian_model(&varmap, 5, 1.0, StvgpConfig::new(10).with_seed(4))?;
    let before = model.q_mu()?.to_vec2::<f64>()?;

    let mut sgd = candle_nn::SGD::new(varmap.all_vars(), 0.01)?;
    sgd.backward_step(&model.elbo_loss()?)?;

    let after = model.q_mu()?.to_vec2::<f64>()?;
    assert_ne!(before, after);
    Ok(())
}

#[test]
fn fit_every_structure() -> Result<()> {
    for (structure, analytic) in [
        (CovarianceStructure::Diagonal, false),
        (CovarianceStructure::FullRank, true),
        (CovarianceStructure::Banded(3), false),
    ] {
        let varmap = VarMap::new();
        let config = StvgpConfig::new(10)
            .with_covariance(structure)
            .with_kl_analytic(analytic)
            .with_seed(1);
        let model = gaussian_model(&varmap, 6, 1.0, config)?;
        let train = TrainConfig {
            learning_rate: 0.05,
            num_iters: 200,
            show_progress: false,
            ..Default::default()
        };
        let trace = fit(&model, &train)?;
        assert!(trace.iter().all(|e| e.is_finite()));
        let head = trace[..20].iter().sum::<f64>() / 20.0;
        let tail = trace[180..].iter().sum::<f64>() / 20.0;
        assert!(tail > head, "{}: {} -> {}", structure, head, tail);
    }
    Ok(())
}

#[test]
fn poisson_counts_run_through() -> Result<()> {
    let device = Device::Cpu;
    let n = 6;
    let x = Tensor::from_vec((0..n).map(|i| i as f64).collect::<Vec<_>>(), (n, 1), &device)?;
    let y = Tensor::from_vec(vec![0.0f64, 1.0, 3.0, 2.0, 5.0, 4.0], (n, 1), &device)?;
    let model = StVgp::new(
        &VarMap::new(),
        "gp",
        x,
        y,
        Rbf::new(1.0, vec![2.0])?,
        PoissonLikelihood::new(),
        Zero::new(1),
        None,
        StvgpConfig::new(50).with_covariance(CovarianceStructure::Banded(2)),
    )?;
    assert!(model.build_likelihood()?.to_scalar::<f64>()?.is_finite());

    let xnew = Tensor::from_vec(vec![0.5f64, 2.5], (2, 1), &device)?.to_dtype(DType::F64)?;
    let (mean, var) = model.predict_y(&xnew)?;
    for (m, v) in mean.to_vec2::<f64>()?.iter().zip(var.to_vec2::<f64>()?.iter()) {
        assert!(m[0] > 0.0 && v[0] >= m[0]);
    }
    Ok(())
}
