use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::models::pino::EvalReport;

/// Human-readable digest of one evaluation pass.
pub struct EvalSummary {
    pub patient: usize,
    pub grid_shape: [usize; 3],
    pub window: Option<[usize; 2]>,
    pub num_points: usize,
    pub u_loss: f64,
    pub mu_loss: f64,
    pub pde_loss: f64,
    pub residual_rms: f64,
    pub residual_max: f64,
    pub baseline_degenerate: usize,
    /// RMS of the masked difference column per reported quantity.
    pub quantity_rms: Vec<(String, f64)>,
}

impl EvalSummary {
    pub fn from_report(report: &EvalReport) -> Self {
        let num_points = report.grid_shape.iter().product();
        let quantity_rms = report
            .quantities
            .iter()
            .map(|q| {
                let finite: Vec<f64> = q.diff.iter().copied().filter(|v| v.is_finite()).collect();
                let rms = if finite.is_empty() {
                    f64::NAN
                } else {
                    (finite.iter().map(|v| v * v).sum::<f64>() / finite.len() as f64).sqrt()
                };
                (q.name.to_string(), rms)
            })
            .collect();
        Self {
            patient: report.patient,
            grid_shape: report.grid_shape,
            window: report.window,
            num_points,
            u_loss: report.losses.displacement,
            mu_loss: report.losses.modulus,
            pde_loss: report.losses.pde,
            residual_rms: report.residual_rms,
            residual_max: report.residual_max,
            baseline_degenerate: report.baseline_degenerate,
            quantity_rms,
        }
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;

        writeln!(file, "{}", "=".repeat(60))?;
        writeln!(file, "ELASTOGRAM EVALUATION SUMMARY")?;
        writeln!(file, "{}", "=".repeat(60))?;
        writeln!(file)?;

        writeln!(file, "SAMPLE")?;
        writeln!(file, "{}", "-".repeat(60))?;
        writeln!(file, "Patient index:       {}", self.patient)?;
        writeln!(
            file,
            "Window:              {}x{}x{} voxels",
            self.grid_shape[0], self.grid_shape[1], self.grid_shape[2]
        )?;
        if let Some([x0, y0]) = self.window {
            writeln!(file, "Patch origin:        ({x0}, {y0})")?;
        }
        writeln!(file, "Sample points:       {}", self.num_points)?;
        writeln!(file)?;

        writeln!(file, "LOSSES")?;
        writeln!(file, "{}", "-".repeat(60))?;
        writeln!(file, "Displacement loss:   {:.6e}", self.u_loss)?;
        writeln!(file, "Modulus loss:        {:.6e}", self.mu_loss)?;
        writeln!(file, "PDE residual loss:   {:.6e}", self.pde_loss)?;
        writeln!(file)?;

        writeln!(file, "RESIDUAL")?;
        writeln!(file, "{}", "-".repeat(60))?;
        writeln!(file, "RMS:                 {:.6e}", self.residual_rms)?;
        writeln!(file, "Max abs:             {:.6e}", self.residual_max)?;
        writeln!(file)?;

        writeln!(file, "BASELINE INVERSION")?;
        writeln!(file, "{}", "-".repeat(60))?;
        writeln!(
            file,
            "Degenerate points:   {} / {}",
            self.baseline_degenerate, self.num_points
        )?;
        writeln!(file)?;

        writeln!(file, "MASKED DIFF RMS PER QUANTITY")?;
        writeln!(file, "{}", "-".repeat(60))?;
        for (name, rms) in &self.quantity_rms {
            writeln!(file, "{name:<20} {rms:.6e}")?;
        }
        writeln!(file)?;
        writeln!(file, "{}", "=".repeat(60))?;

        Ok(())
    }

    pub fn print_to_console(&self) {
        println!("\n{}", "=".repeat(60));
        println!("EVALUATION SUMMARY");
        println!("{}", "=".repeat(60));
        println!(
            "Patient {:<3} window {}x{}x{}",
            self.patient, self.grid_shape[0], self.grid_shape[1], self.grid_shape[2]
        );
        println!(
            "Losses:        u={:.3e}  mu={:.3e}  pde={:.3e}",
            self.u_loss, self.mu_loss, self.pde_loss
        );
        println!(
            "Residual:      rms={:.3e}  max={:.3e}",
            self.residual_rms, self.residual_max
        );
        if self.baseline_degenerate > 0 {
            println!(
                "Baseline:      {} degenerate points flagged NaN",
                self.baseline_degenerate
            );
        }
        println!("{}\n", "=".repeat(60));
    }
}
