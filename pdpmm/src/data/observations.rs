use std::ops::Index;

use log::debug;
use nalgebra::DVector;

use crate::config::LikelihoodMode;

/// A single row of the observation table, split into the parts each
/// likelihood consumes.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    /// The NIW-modeled coordinates: the whole row in position mode, the first
    /// half otherwise.
    pub position: DVector<f64>,
    /// Unit direction (second half of the row) in direction-aware mode. A
    /// zero vector stays zero and carries no directional information.
    pub direction: Option<DVector<f64>>,
}

impl Observation {
    pub fn from_row(row: &[f64], mode: LikelihoodMode) -> Self {
        match mode {
            LikelihoodMode::Position => Self {
                position: DVector::from_column_slice(row),
                direction: None,
            },
            LikelihoodMode::PositionDirection => {
                let half = row.len() / 2;
                let mut direction = DVector::from_column_slice(&row[half..]);
                let norm = direction.norm();
                if norm > 0.0 {
                    direction /= norm;
                }
                Self {
                    position: DVector::from_column_slice(&row[..half]),
                    direction: Some(direction),
                }
            }
        }
    }

    /// An observation without a directional part.
    pub fn position_only(position: DVector<f64>) -> Self {
        Self {
            position,
            direction: None,
        }
    }

    /// Whether this observation carries a usable direction.
    pub fn has_direction(&self) -> bool {
        self.direction
            .as_ref()
            .is_some_and(|d| d.iter().any(|v| *v != 0.0))
    }
}

/// The immutable observation table shared by every worker.
#[derive(Clone, Debug, PartialEq)]
pub struct Observations {
    rows: Vec<Observation>,
}

impl Observations {
    pub fn from_rows(rows: &[Vec<f64>], mode: LikelihoodMode) -> Self {
        let rows: Vec<Observation> = rows
            .iter()
            .map(|row| Observation::from_row(row, mode))
            .collect();

        if mode == LikelihoodMode::PositionDirection {
            let undirected = rows.iter().filter(|x| !x.has_direction()).count();
            if undirected > 0 {
                debug!("{undirected} observations have a zero direction");
            }
        }

        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.rows.iter()
    }

    /// Positions of every observation, in index order.
    pub fn positions(&self) -> Vec<DVector<f64>> {
        self.rows.iter().map(|x| x.position.clone()).collect()
    }
}

impl Index<usize> for Observations {
    type Output = Observation;

    fn index(&self, index: usize) -> &Self::Output {
        &self.rows[index]
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::dvector;

    use super::*;

    #[test]
    fn position_mode_keeps_whole_row() {
        let x = Observation::from_row(&[1.0, 2.0, 3.0, 4.0], LikelihoodMode::Position);
        assert_eq!(x.position, dvector![1.0, 2.0, 3.0, 4.0]);
        assert!(x.direction.is_none());
        assert!(!x.has_direction());
    }

    #[test]
    fn direction_mode_splits_and_normalizes() {
        let x = Observation::from_row(
            &[1.0, 2.0, 3.0, 4.0],
            LikelihoodMode::PositionDirection,
        );
        assert_eq!(x.position, dvector![1.0, 2.0]);
        let u = x.direction.expect("direction");
        assert::close(u.as_slice(), &[0.6, 0.8][..], 1e-12);
    }

    #[test]
    fn zero_direction_stays_zero() {
        let x = Observation::from_row(
            &[1.0, 2.0, 0.0, 0.0],
            LikelihoodMode::PositionDirection,
        );
        assert_eq!(x.direction, Some(dvector![0.0, 0.0]));
        assert!(!x.has_direction());
    }

    #[test]
    fn table_indexing() {
        let rows = vec![vec![0.0, 1.0], vec![2.0, 3.0]];
        let data = Observations::from_rows(&rows, LikelihoodMode::Position);
        assert_eq!(data.len(), 2);
        assert_eq!(data[1].position, dvector![2.0, 3.0]);
        assert_eq!(data.positions().len(), 2);
    }
}
