//! Plain-text numeric matrices (tab, space or comma separated, optionally
//! gzipped) to and from candle tensors.

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

fn is_gz(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("gz")
}

fn is_csv(path: &Path) -> bool {
    let name = path.to_string_lossy().to_lowercase();
    name.ends_with(".csv") || name.ends_with(".csv.gz")
}

///
/// Open a buffered reader, transparently decompressing `.gz` files
///
pub fn open_buf_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if is_gz(path) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

///
/// Open a buffered writer, compressing when the name ends with `.gz`
///
pub fn open_buf_writer(path: &Path) -> Result<Box<dyn Write>> {
    let file = File::create(path)?;
    if is_gz(path) {
        Ok(Box::new(BufWriter::new(GzEncoder::new(file, Compression::default()))))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

///
/// Read a numeric matrix into an `[nrow, ncol]` tensor.
///
/// * `path` - input file; `.csv` is comma separated, anything else splits
///   on tabs and spaces. Blank lines and lines starting with `#` are skipped.
///
pub fn read_tensor(path: &Path, dtype: DType, device: &Device) -> Result<Tensor> {
    let csv = is_csv(path);
    let mut data: Vec<f64> = vec![];
    let mut ncol: Option<usize> = None;
    let mut nrow = 0;

    for (line_no, line) in open_buf_reader(path)?.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = if csv {
            line.split(',').map(|s| s.trim()).collect()
        } else {
            line.split(['\t', ' ']).filter(|s| !s.is_empty()).collect()
        };
        let row = fields
            .iter()
            .map(|s| s.parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("{:?} line {}: {}", path, line_no + 1, e))?;

        match ncol {
            None => ncol = Some(row.len()),
            Some(nc) if nc != row.len() => {
                anyhow::bail!(
                    "{:?} line {}: expected {} columns, found {}",
                    path,
                    line_no + 1,
                    nc,
                    row.len()
                );
            }
            _ => {}
        }
        data.extend(row);
        nrow += 1;
    }

    let ncol = ncol.ok_or_else(|| anyhow::anyhow!("no data in {:?}", path))?;
    Ok(Tensor::from_vec(data, (nrow, ncol), device)?.to_dtype(dtype)?)
}

///
/// Write a 2D tensor, one row per line
///
pub fn write_tensor(tensor: &Tensor, path: &Path) -> Result<()> {
    let (nrow, ncol) = tensor.dims2()?;
    let delim = if is_csv(path) { "," } else { "\t" };
    let rows = tensor.to_dtype(DType::F64)?.to_vec2::<f64>()?;

    let mut buf = open_buf_writer(path)?;
    for row in rows.iter() {
        let line = row
            .iter()
            .map(|x| format!("{}", x))
            .collect::<Vec<_>>()
            .join(delim);
        writeln!(buf, "{}", line)?;
    }
    buf.flush()?;
    log::debug!("wrote {} x {} matrix to {:?}", nrow, ncol, path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tsv_and_gz_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let t = Tensor::from_vec(vec![1.5f64, -2.0, 0.25, 3.0, 4.0, 5.5], (3, 2), &Device::Cpu)?;

        for name in ["m.tsv", "m.tsv.gz", "m.csv"] {
            let path = dir.path().join(name);
            write_tensor(&t, &path)?;
            let back = read_tensor(&path, DType::F64, &Device::Cpu)?;
            assert_eq!(back.to_vec2::<f64>()?, t.to_vec2::<f64>()?);
        }
        Ok(())
    }

    #[test]
    fn test_ragged_rows_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.tsv");
        std::fs::write(&path, "1\t2\n3\n")?;
        assert!(read_tensor(&path, DType::F64, &Device::Cpu).is_err());
        Ok(())
    }
}
