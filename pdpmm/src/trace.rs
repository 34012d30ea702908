//! Per-iteration convergence trace.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;

pub const CLUSTER_COUNT_FILE: &str = "logNum.csv";
pub const LOG_LIKELIHOOD_FILE: &str = "logLogLik.csv";
pub const ASSIGNMENT_FILE: &str = "logZ.csv";

/// Summary of one committed sweep.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceRecord {
    pub iteration: usize,
    pub n_clusters: usize,
    pub ln_likelihood: f64,
}

/// In-memory trace with thinned assignment snapshots.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceLog {
    thinning: usize,
    records: Vec<TraceRecord>,
    snapshots: Vec<(usize, Vec<usize>)>,
}

impl TraceLog {
    /// Keep an assignment snapshot every `thinning` iterations, starting with
    /// the first. A `thinning` of zero is treated as one.
    pub fn new(thinning: usize) -> Self {
        Self {
            thinning: thinning.max(1),
            records: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    /// Append a record, returning the snapshot if this iteration keeps one.
    pub fn record(&mut self, record: TraceRecord, labels: &[usize]) -> Option<&[usize]> {
        let keep = record.iteration % self.thinning == 0;
        let iteration = record.iteration;
        self.records.push(record);
        if keep {
            self.snapshots.push((iteration, labels.to_vec()));
            self.snapshots.last().map(|(_, z)| z.as_slice())
        } else {
            None
        }
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    pub fn cluster_counts(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.n_clusters).collect()
    }

    pub fn ln_likelihoods(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.ln_likelihood).collect()
    }

    /// `(iteration, labels)` for every kept snapshot.
    pub fn snapshots(&self) -> &[(usize, Vec<usize>)] {
        &self.snapshots
    }
}

/// Appends the trace to `logNum.csv`, `logLogLik.csv` and `logZ.csv`.
///
/// Every line is written with a single `write_all` and flushed before the
/// next iteration starts, so a run stopped between iterations leaves
/// complete lines only.
#[derive(Debug)]
pub struct TraceWriter {
    cluster_counts: File,
    ln_likelihoods: File,
    assignments: File,
}

fn append_line(file: &mut File, line: &str) -> std::io::Result<()> {
    file.write_all(line.as_bytes())?;
    file.flush()
}

impl TraceWriter {
    /// Create (or truncate) the three trace files in `dir`.
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            cluster_counts: File::create(dir.join(CLUSTER_COUNT_FILE))?,
            ln_likelihoods: File::create(dir.join(LOG_LIKELIHOOD_FILE))?,
            assignments: File::create(dir.join(ASSIGNMENT_FILE))?,
        })
    }

    pub fn append(&mut self, record: &TraceRecord, snapshot: Option<&[usize]>) -> Result<()> {
        append_line(&mut self.cluster_counts, &format!("{}\n", record.n_clusters))?;
        append_line(&mut self.ln_likelihoods, &format!("{}\n", record.ln_likelihood))?;
        if let Some(labels) = snapshot {
            let mut line = labels
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            line.push('\n');
            append_line(&mut self.assignments, &line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn record(iteration: usize, n_clusters: usize, ln_likelihood: f64) -> TraceRecord {
        TraceRecord {
            iteration,
            n_clusters,
            ln_likelihood,
        }
    }

    #[test]
    fn thinning_keeps_every_nth_snapshot() {
        let mut trace = TraceLog::new(3);
        for i in 0..7 {
            trace.record(record(i, 1, -1.0), &[i]);
        }
        assert_eq!(trace.records().len(), 7);
        let kept: Vec<usize> = trace.snapshots().iter().map(|(i, _)| *i).collect();
        assert_eq!(kept, vec![0, 3, 6]);
        assert_eq!(trace.snapshots()[1].1, vec![3]);
    }

    #[test]
    fn zero_thinning_keeps_everything() {
        let mut trace = TraceLog::new(0);
        assert!(trace.record(record(0, 1, 0.0), &[0]).is_some());
        assert!(trace.record(record(1, 1, 0.0), &[0]).is_some());
    }

    #[test]
    fn writer_appends_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = TraceWriter::create(dir.path()).expect("create");
        let mut trace = TraceLog::new(2);

        for (i, (k, ll)) in [(3, -10.5), (2, -8.25), (2, -8.0)].into_iter().enumerate() {
            let rec = record(i, k, ll);
            let labels = vec![0, 1, k - 1];
            let snapshot = trace.record(rec.clone(), &labels).map(<[usize]>::to_vec);
            writer.append(&rec, snapshot.as_deref()).expect("append");
        }

        let read = |name: &str| fs::read_to_string(dir.path().join(name)).expect("read");
        assert_eq!(read(CLUSTER_COUNT_FILE), "3\n2\n2\n");
        assert_eq!(read(LOG_LIKELIHOOD_FILE), "-10.5\n-8.25\n-8\n");
        assert_eq!(read(ASSIGNMENT_FILE), "0 1 2\n0 1 1\n");
        assert_eq!(trace.cluster_counts(), vec![3, 2, 2]);
        assert_eq!(trace.ln_likelihoods(), vec![-10.5, -8.25, -8.0]);
    }
}
