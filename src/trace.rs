//! Append-only record of monitored node values, one row per completed
//! sweep.
//!
//! Scalar components of array-valued monitors get their own columns, named
//! `variable` for scalars, `variable[i]` for vector elements and
//! `variable[i,j]` for matrix elements, indices 1-based. The layout is a
//! dense row-major matrix so diagnostic tooling can consume it directly.

use itertools::Itertools;

use crate::graph::{ModelGraph, NodeId, Shape};
use crate::state::ModelState;

#[derive(Clone)]
pub struct Trace {
    monitors: Vec<NodeId>,
    columns: Vec<String>,
    /// Row-major, `rows * columns.len()` entries.
    data: Vec<f64>,
    rows: usize,
}

impl Trace {
    pub fn new(graph: &ModelGraph, monitors: &[NodeId]) -> Self {
        let mut columns = Vec::new();
        for &id in monitors {
            let node = graph.node(id);
            match node.shape {
                Shape::Scalar => columns.push(node.name.clone()),
                Shape::Vector(n) => {
                    for i in 1..=n {
                        columns.push(format!("{}[{i}]", node.name));
                    }
                }
                Shape::Matrix(r, c) => {
                    columns.extend(
                        (1..=r)
                            .cartesian_product(1..=c)
                            .map(|(i, j)| format!("{}[{i},{j}]", node.name)),
                    );
                }
            }
        }
        Self {
            monitors: monitors.to_vec(),
            columns,
            data: Vec::new(),
            rows: 0,
        }
    }

    /// Append one row holding the monitors' current values. All-or-nothing:
    /// the row is fully materialized before it lands.
    pub fn record(&mut self, state: &ModelState) {
        let mut row = Vec::with_capacity(self.columns.len());
        for &id in &self.monitors {
            row.extend_from_slice(state.value(id).components());
        }
        debug_assert_eq!(row.len(), self.columns.len());
        self.data.extend_from_slice(&row);
        self.rows += 1;
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Row-major matrix view, `len() * n_columns()` entries.
    pub fn as_matrix(&self) -> &[f64] {
        &self.data
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let w = self.columns.len();
        &self.data[i * w..(i + 1) * w]
    }

    /// Values of one column by name, across all recorded rows.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        let w = self.columns.len();
        Some((0..self.rows).map(|r| self.data[r * w + idx]).collect())
    }

    /// Sample mean of a column over rows `burn_in..`.
    pub fn mean(&self, name: &str, burn_in: usize) -> Option<f64> {
        let col = self.column(name)?;
        let kept = &col[burn_in.min(col.len())..];
        if kept.is_empty() {
            return None;
        }
        Some(kept.iter().sum::<f64>() / kept.len() as f64)
    }

    /// Unbiased sample variance of a column over rows `burn_in..`.
    pub fn variance(&self, name: &str, burn_in: usize) -> Option<f64> {
        let col = self.column(name)?;
        let kept = &col[burn_in.min(col.len())..];
        if kept.len() < 2 {
            return None;
        }
        let mean = kept.iter().sum::<f64>() / kept.len() as f64;
        let ss: f64 = kept.iter().map(|x| (x - mean).powi(2)).sum();
        Some(ss / (kept.len() - 1) as f64)
    }
}
