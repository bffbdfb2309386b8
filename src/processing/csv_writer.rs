use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::data::pipeline::LossTerms;
use crate::models::pino::QuantityTriple;

/// Writes named columns of equal length to a CSV file.
pub fn write_columns<P: AsRef<Path>>(
    path: P,
    headers: &[&str],
    columns: &[Vec<f64>],
) -> io::Result<()> {
    if headers.len() != columns.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{} headers for {} columns",
                headers.len(),
                columns.len()
            ),
        ));
    }
    let n_rows = columns.iter().map(|c| c.len()).max().unwrap_or(0);
    if columns.iter().any(|c| c.len() != n_rows) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "columns have unequal lengths",
        ));
    }

    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "{}", headers.join(","))?;
    for row in 0..n_rows {
        for (c, col) in columns.iter().enumerate() {
            if c > 0 {
                write!(file, ",")?;
            }
            write!(file, "{:.9e}", col[row])?;
        }
        writeln!(file)?;
    }
    file.flush()
}

/// Flattens one prediction/difference/truth triple to voxel rows
/// (i, j, k, pred, diff, truth).
pub fn write_triple_volume<P: AsRef<Path>>(path: P, triple: &QuantityTriple) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "i,j,k,pred,diff,truth")?;
    for ((i, j, k), p) in triple.pred.indexed_iter() {
        writeln!(
            file,
            "{i},{j},{k},{:.9e},{:.9e},{:.9e}",
            p,
            triple.diff[[i, j, k]],
            triple.truth[[i, j, k]]
        )?;
    }
    file.flush()
}

/// Loss-history log for a training run.
pub fn write_loss_history<P: AsRef<Path>>(
    path: P,
    history: &[(usize, LossTerms)],
) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "iter,u_loss,mu_loss,pde_loss")?;
    for (iter, terms) in history {
        writeln!(
            file,
            "{iter},{:.9e},{:.9e},{:.9e}",
            terms.displacement, terms.modulus, terms.pde
        )?;
    }
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn columns_roundtrip_through_disk() {
        let path = "test_columns.csv";
        write_columns(path, &["a", "b"], &[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert!(content.starts_with("a,b\n"));
        assert_eq!(content.lines().count(), 3);
        fs::remove_file(path).ok();
    }

    #[test]
    fn mismatched_headers_are_rejected() {
        let err = write_columns("unused.csv", &["a"], &[vec![], vec![]]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
