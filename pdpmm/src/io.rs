//! Reading the observation table and writing the final assignment.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::debug;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Read a headerless, comma separated table of `n_rows` rows by `n_cols`
/// numeric columns.
pub fn read_table<P: AsRef<Path>>(path: P, n_rows: usize, n_cols: usize) -> Result<Vec<Vec<f64>>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::input(path, None, e.to_string()))?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(file));

    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(n_rows);
    for record in reader.records() {
        let record = record.map_err(|e| {
            Error::input(path, e.position().map(csv::Position::line), e.to_string())
        })?;
        let line = record.position().map(csv::Position::line);

        if record.len() != n_cols {
            return Err(Error::input(
                path,
                line,
                format!("expected {n_cols} columns, found {}", record.len()),
            ));
        }

        let row = record
            .iter()
            .map(|field| match field.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(v),
                Ok(_) => Err(Error::input(path, line, format!("non-finite value {field:?}"))),
                Err(_) => Err(Error::input(path, line, format!("non-numeric value {field:?}"))),
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(row);
    }

    if rows.len() != n_rows {
        return Err(Error::input(
            path,
            None,
            format!("expected {n_rows} rows, found {}", rows.len()),
        ));
    }

    debug!("read {n_rows} x {n_cols} table from {}", path.display());
    Ok(rows)
}

/// Write one label per line to `path`, replacing it atomically.
pub fn write_labels<P: AsRef<Path>>(path: P, labels: &[usize]) -> Result<()> {
    let path = path.as_ref();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(&mut tmp);
        for label in labels {
            writeln!(writer, "{label}")?;
        }
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write_input(dir: &Path, contents: &str) -> std::path::PathBuf {
        let path = dir.join("input.csv");
        fs::write(&path, contents).expect("write input");
        path
    }

    #[test]
    fn reads_well_formed_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_input(dir.path(), "0.5,1.0\n-2, 3e-1\n4.25,0\n");

        let rows = read_table(&path, 3, 2).expect("valid table");
        assert_eq!(rows, vec![vec![0.5, 1.0], vec![-2.0, 0.3], vec![4.25, 0.0]]);
    }

    #[test]
    fn missing_file_is_input_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = read_table(dir.path().join("nope.csv"), 1, 1).unwrap_err();
        assert!(matches!(err, Error::Input { .. }));
    }

    #[test]
    fn wrong_width_names_the_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_input(dir.path(), "1,2\n3,4,5\n");

        let err = read_table(&path, 2, 2).unwrap_err();
        assert!(matches!(err, Error::Input { .. }));
        let msg = err.to_string();
        assert!(msg.contains("line 2"), "{msg}");
        assert!(msg.contains("expected 2 columns"), "{msg}");
    }

    #[test]
    fn bad_token_is_input_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_input(dir.path(), "1,2\n3,abc\n");

        let err = read_table(&path, 2, 2).unwrap_err();
        assert!(err.to_string().contains("abc"));

        let path = write_input(dir.path(), "1,NaN\n");
        assert!(matches!(read_table(&path, 1, 2), Err(Error::Input { .. })));
    }

    #[test]
    fn undecodable_record_names_the_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("input.csv");
        fs::write(&path, b"1,2\n3,\xff\n").expect("write input");

        let err = read_table(&path, 2, 2).unwrap_err();
        assert!(matches!(err, Error::Input { .. }));
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn row_count_must_match() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_input(dir.path(), "1,2\n3,4\n");
        let err = read_table(&path, 3, 2).unwrap_err();
        assert!(err.to_string().contains("expected 3 rows, found 2"));
    }

    #[test]
    fn labels_are_written_one_per_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("output.csv");
        fs::write(&path, "stale").expect("write");

        write_labels(&path, &[0, 1, 1, 2]).expect("written");
        assert_eq!(fs::read_to_string(&path).expect("read"), "0\n1\n1\n2\n");
    }
}
