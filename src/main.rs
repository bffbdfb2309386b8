use std::fs;
use std::io::{self, Write};

use mre_pino_rs::data::phantom::{plane_wave_cohort, PhantomSpec, PlaneWaveField};
use mre_pino_rs::data::pipeline::{LossTerms, PinoConfig, PinoData};
use mre_pino_rs::data::Cohort;
use mre_pino_rs::models::mlp::{SplitFieldNet, TanhMlp};
use mre_pino_rs::models::pino::{EvalReport, PinoModel};
use mre_pino_rs::models::TrainableFieldNet;
use mre_pino_rs::numerics::grad::loss_jacobian;
use mre_pino_rs::numerics::loss::Msae;
use mre_pino_rs::pde::{GradientMode, ResidualForm, WaveEquation};
use mre_pino_rs::processing::csv_writer;
use mre_pino_rs::processing::summary::EvalSummary;

fn main() {
    fs::create_dir_all("output/main").expect("Failed to create output directory");

    let spec = PhantomSpec {
        noise: 1e-3,
        ..PhantomSpec::default()
    };
    print_problem(&spec);

    let cohort = plane_wave_cohort(4, &spec).expect("Failed to build phantom cohort");

    exact_field_check(&spec, cohort.clone());

    // Learned model: scalar displacement net plus a separate modulus net,
    // trained modulus-only against the Helmholtz residual.
    let pde = WaveEquation::new(
        ResidualForm::IncompressibleHomogeneous,
        GradientMode::ModulusOnlyGradient,
    );
    let config = PinoConfig {
        batch_size: 1,
        patch_size: Some(4),
        seed: 42,
        ..PinoConfig::default()
    };
    let data = PinoData::new(cohort, pde, config).expect("Failed to build pipeline");
    let net = SplitFieldNet::new(TanhMlp::new(&[5, 12, 1], 1), TanhMlp::new(&[5, 8, 1], 2));
    let mut model = PinoModel::new(data, net).expect("Failed to build model");

    train_demo(&mut model, 25, 1e-2);

    let report = model.test(&Msae).expect("Evaluation failed");
    save_report(&report);
    let summary = EvalSummary::from_report(&report);
    summary
        .write_to_file("output/main/eval_summary.txt")
        .expect("Failed to write summary");
    summary.print_to_console();
    println!("Summary saved to output/main/eval_summary.txt");

    model.benchmark(10, &Msae).expect("Benchmark failed");
}

fn print_problem(spec: &PhantomSpec) {
    let k = spec.wave_number();
    println!("--- Phantom constants ---");
    println!("Shear modulus: {:.1} Pa", spec.modulus);
    println!("Density: {:.1} kg/m^3", spec.density);
    println!("Frequency: {:.1} Hz", spec.frequency);
    println!("Wave number: {:.2} rad/m", k);
    println!(
        "Wavelength: {:.2} mm",
        2.0 * std::f64::consts::PI / k * 1e3
    );
    println!(
        "Grid: {}x{}x{} at {:.1} mm",
        spec.shape[0], spec.shape[1], spec.shape[2], spec.spacing_mm
    );
    println!("-------------------------\n");
}

/// Evaluates the closed-form plane-wave predictor through the full model
/// path. With the dispersion relation satisfied the residual should vanish
/// up to rounding.
fn exact_field_check(spec: &PhantomSpec, cohort: Cohort) {
    let pde = WaveEquation::new(
        ResidualForm::IncompressibleHomogeneous,
        GradientMode::JointGradient,
    );
    let config = PinoConfig {
        batch_size: 1,
        seed: 7,
        ..PinoConfig::default()
    };
    let data = PinoData::new(cohort, pde, config).expect("Failed to build pipeline");
    let net = PlaneWaveField::for_spec(spec, 1);
    let mut model = PinoModel::new(data, net).expect("Failed to build model");
    let report = model.test(&Msae).expect("Closed-form evaluation failed");

    let omega = 2.0 * std::f64::consts::PI * spec.frequency;
    let scale = model.data.pde.rho * omega * omega * spec.amplitude;
    println!("Closed-form predictor check:");
    println!(
        "  max |residual| / rho*omega^2*A: {:.3e}",
        report.residual_max / scale
    );
    println!(
        "  baseline degenerate points: {} / {}",
        report.baseline_degenerate,
        report.grid_shape.iter().product::<usize>()
    );
    println!();
}

fn train_demo(model: &mut PinoModel<SplitFieldNet>, iters: usize, lr: f64) {
    println!(
        "{} patients, {} parameters\n",
        model.data.cohort.len(),
        model.net.param_count()
    );
    println!("    Iter | u loss    | mu loss   | pde loss");

    let mut history: Vec<(usize, LossTerms)> = Vec::new();
    let mut weights: Option<[f64; 3]> = None;
    for i in 0..iters {
        let batch = model
            .data
            .train_next_batch(None)
            .expect("Batch assembly failed");
        let layout = model.data.layout();
        let (losses, jac) = loss_jacobian(
            &model.net,
            &model.data.pde,
            &layout,
            &batch,
            &Msae,
            model.data.config.mask_level,
        )
        .expect("Gradient evaluation failed");

        // Scale each loss term to O(1) from its first observed value, then
        // take a plain gradient step. The step rule is deliberately dumb;
        // it only has to demonstrate the gradient contract.
        let w = *weights.get_or_insert([
            1.0 / (losses.displacement + 1e-12),
            1.0 / (losses.modulus + 1e-12),
            1.0 / (losses.pde + 1e-12),
        ]);
        let mut theta = model.net.params();
        for (r, wr) in w.iter().enumerate() {
            for c in 0..theta.len() {
                theta[c] -= lr * wr * jac[(r, c)];
            }
        }
        model.net.set_params(&theta);

        log_iteration(i, iters, &losses);
        history.push((i, losses));
    }
    println!();

    csv_writer::write_loss_history("output/main/loss_history.csv", &history)
        .expect("Failed to write loss history");
    println!("Loss history saved to output/main/loss_history.csv\n");
}

fn log_iteration(i: usize, max_iter: usize, losses: &LossTerms) {
    if i == 0 {
        println!(
            "{i:>4} | {:>8.3e} | {:>8.3e} | {:>8.3e}",
            losses.displacement, losses.modulus, losses.pde
        );
    } else {
        print!("\x1B[1F\x1B[2K");
        println!(
            "{i:>4}/{max_iter} | {:>8.3e} | {:>8.3e} | {:>8.3e}",
            losses.displacement, losses.modulus, losses.pde
        );
    }
    io::stdout().flush().ok();
}

fn save_report(report: &EvalReport) {
    for quantity in &report.quantities {
        let stem: String = quantity
            .name
            .chars()
            .map(|c| if c == ' ' { '_' } else { c.to_ascii_lowercase() })
            .collect();
        let path = format!("output/main/eval_{stem}.csv");
        csv_writer::write_triple_volume(&path, quantity).expect("Failed to write volume CSV");
    }
    println!("Evaluation volumes saved to output/main/eval_*.csv");
}
