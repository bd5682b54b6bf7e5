//! Mutable value store for a model: one current value per node plus a
//! cached log-density contribution per stochastic node.
//!
//! The invariant the samplers rely on: between sampler steps, every cached
//! log-density equals the density of the node's current value given its
//! current parameter values. `set_value` is the low-level primitive that
//! deliberately breaks this invariant (it touches nothing downstream);
//! `calculate` over a dependency-closed node set is the only way to restore
//! it. `log_prob` detects reads of stale caches instead of returning wrong
//! numbers.

use std::sync::Arc;

use rand::RngCore;

use crate::dist::{Distribution, Value};
use crate::error::StateError;
use crate::graph::{ModelGraph, NodeDef, NodeId, NodeKind};
use crate::registry::DistributionRegistry;

pub struct ModelState {
    graph: Arc<ModelGraph>,
    registry: Arc<DistributionRegistry>,
    values: Vec<Value>,
    /// Cached log-density per node; zero for non-stochastic nodes.
    logp: Vec<f64>,
    dirty: Vec<bool>,
    n_dirty: usize,
}

/// Saved values and caches for a node set, used to restore the state
/// exactly after a rejected proposal.
pub struct StateSnapshot {
    entries: Vec<(NodeId, Value, f64, bool)>,
}

impl ModelState {
    pub fn new(graph: Arc<ModelGraph>, registry: Arc<DistributionRegistry>) -> Self {
        let n = graph.len();
        let mut values = Vec::with_capacity(n);
        for id in 0..n {
            let node = graph.node(NodeId(id));
            let value = match &node.init {
                Some(v) => v.clone(),
                None => match node.shape {
                    crate::graph::Shape::Scalar => Value::Scalar(0.0),
                    crate::graph::Shape::Vector(len) => Value::Vector(vec![0.0; len]),
                    crate::graph::Shape::Matrix(r, c) => Value::Matrix {
                        rows: r,
                        cols: c,
                        data: vec![0.0; r * c],
                    },
                },
            };
            values.push(value);
        }
        // Nothing has been computed yet, so every non-constant cache starts
        // stale; `log_prob` refuses reads until a `calculate` runs.
        let mut dirty = vec![false; n];
        let mut n_dirty = 0;
        for id in 0..n {
            if graph.node(NodeId(id)).kind != NodeKind::Constant {
                dirty[id] = true;
                n_dirty += 1;
            }
        }
        Self {
            graph,
            registry,
            values,
            logp: vec![0.0; n],
            dirty,
            n_dirty,
        }
    }

    pub fn graph(&self) -> &ModelGraph {
        &self.graph
    }

    pub fn value(&self, id: NodeId) -> &Value {
        &self.values[id.0]
    }

    pub fn value_of(&self, name: &str) -> Result<&Value, StateError> {
        let id = self
            .graph
            .id_of(name)
            .ok_or_else(|| StateError::UnknownNode(name.to_string()))?;
        Ok(&self.values[id.0])
    }

    /// Cached log-density of a single stochastic node. No staleness check;
    /// intended for samplers that have just called `calculate`.
    pub fn cached_logp(&self, id: NodeId) -> f64 {
        self.logp[id.0]
    }

    /// Overwrite a node's value without recomputing anything downstream.
    ///
    /// This is the low-level primitive: the state is inconsistent until a
    /// `calculate` over the node's dependency closure runs. Reading
    /// densities in between fails with `StaleState`.
    pub fn set_value(&mut self, id: NodeId, value: Value) -> Result<(), StateError> {
        let node = self.graph.node(id);
        let declared = node.shape.len();
        if value.len() != declared || value.rank() != node.shape.rank() {
            return Err(StateError::ShapeMismatch {
                node: node.name.clone(),
                message: format!(
                    "declared {} but got a rank-{} value of {} component(s)",
                    node.shape.describe(),
                    value.rank(),
                    value.len()
                ),
            });
        }
        self.values[id.0] = value;
        if !self.dirty[id.0] {
            self.dirty[id.0] = true;
            self.n_dirty += 1;
        }
        Ok(())
    }

    fn eval_deterministic(&self, expr: &crate::expr::Expr<NodeId>) -> f64 {
        expr.eval(&|id: &NodeId| {
            self.values[id.0]
                .as_scalar()
                .expect("deterministic expressions reference scalar nodes")
        })
    }

    fn dist_and_params(&self, id: NodeId) -> (Arc<dyn Distribution>, Vec<Value>) {
        let NodeDef::Stochastic { dist, params, .. } = &self.graph.node(id).def else {
            panic!("node {} is not stochastic", self.graph.node(id).name);
        };
        let d = self
            .registry
            .get(dist)
            .expect("distribution resolved at graph build")
            .clone();
        let param_values = params.iter().map(|p| self.values[p.0].clone()).collect();
        (d, param_values)
    }

    /// Current canonical parameter values of a stochastic node.
    pub fn params_of(&self, id: NodeId) -> Vec<Value> {
        self.dist_and_params(id).1
    }

    /// Recompute deterministic values and stochastic log-densities for
    /// `set`, in dependency order, and return the summed log-density of the
    /// stochastic members.
    ///
    /// Correctness requires `set` to be closed under the dependency
    /// relation downstream of whatever was mutated; pass the result of
    /// [`ModelGraph::dependent_closure`]. Dirt is cleared for exactly the
    /// nodes in `set`.
    pub fn calculate(&mut self, set: &[NodeId]) -> f64 {
        let mut ids: Vec<NodeId> = set.to_vec();
        ids.sort_unstable_by_key(|id| self.graph.topo_index(*id));
        let mut total = 0.0;
        for id in ids {
            let node = self.graph.node(id);
            match &node.def {
                NodeDef::Deterministic { expr, .. } => {
                    let v = self.eval_deterministic(expr);
                    self.values[id.0] = Value::Scalar(v);
                }
                NodeDef::Stochastic { .. } => {
                    let (d, params) = self.dist_and_params(id);
                    let lp = d.log_density(&self.values[id.0], &params);
                    self.logp[id.0] = lp;
                    total += lp;
                }
                NodeDef::Constant => {}
            }
            if self.dirty[id.0] {
                self.dirty[id.0] = false;
                self.n_dirty -= 1;
            }
        }
        total
    }

    /// Recompute every node and return the joint log-density.
    pub fn calculate_all(&mut self) -> f64 {
        let all: Vec<NodeId> = self.graph.topo_order().to_vec();
        self.calculate(&all)
    }

    /// Sum of cached log-densities over the stochastic members of `set`.
    ///
    /// Fails with `StaleState` if any requested node was mutated, or sits
    /// downstream of a mutated node, without an intervening `calculate`.
    pub fn log_prob(&self, set: &[NodeId]) -> Result<f64, StateError> {
        if self.n_dirty > 0 {
            let dirty_ids: Vec<NodeId> = (0..self.dirty.len())
                .filter(|&i| self.dirty[i])
                .map(NodeId)
                .collect();
            let tainted = self.graph.dependent_closure(&dirty_ids);
            let mut flag = vec![false; self.dirty.len()];
            for id in tainted {
                flag[id.0] = true;
            }
            if let Some(stale) = set.iter().find(|id| flag[id.0]) {
                return Err(StateError::StaleState(
                    self.graph.node(*stale).name.clone(),
                ));
            }
        }
        Ok(set
            .iter()
            .filter(|id| self.graph.node(**id).is_stochastic())
            .map(|id| self.logp[id.0])
            .sum())
    }

    /// Draw new values from the prior for the stochastic nodes in `set`,
    /// in dependency order, recomputing deterministic members along the
    /// way so downstream draws see fresh parameter values.
    ///
    /// Observed (data) nodes are skipped unless `include_data` is set; the
    /// asymmetry protects bound observations from accidental overwrite
    /// during prior-predictive simulation.
    pub fn simulate(&mut self, rng: &mut dyn RngCore, set: &[NodeId], include_data: bool) {
        let mut ids: Vec<NodeId> = set.to_vec();
        ids.sort_unstable_by_key(|id| self.graph.topo_index(*id));
        for id in ids {
            let node = self.graph.node(id);
            match node.kind {
                NodeKind::Deterministic => {
                    let NodeDef::Deterministic { expr, .. } = &node.def else {
                        unreachable!()
                    };
                    let v = self.eval_deterministic(expr);
                    self.values[id.0] = Value::Scalar(v);
                }
                NodeKind::Stochastic | NodeKind::Data => {
                    if node.kind == NodeKind::Data && !include_data {
                        continue;
                    }
                    let (d, params) = self.dist_and_params(id);
                    let value = d.draw(rng, &params);
                    self.values[id.0] = value;
                    if !self.dirty[id.0] {
                        self.dirty[id.0] = true;
                        self.n_dirty += 1;
                    }
                }
                NodeKind::Constant => {}
            }
        }
    }

    /// Save values and caches for `set` so a rejected proposal can be
    /// rolled back exactly.
    pub fn snapshot(&self, set: &[NodeId]) -> StateSnapshot {
        StateSnapshot {
            entries: set
                .iter()
                .map(|&id| {
                    (
                        id,
                        self.values[id.0].clone(),
                        self.logp[id.0],
                        self.dirty[id.0],
                    )
                })
                .collect(),
        }
    }

    pub fn restore(&mut self, snapshot: &StateSnapshot) {
        for (id, value, logp, dirty) in &snapshot.entries {
            self.values[id.0] = value.clone();
            self.logp[id.0] = *logp;
            if self.dirty[id.0] != *dirty {
                if *dirty {
                    self.n_dirty += 1;
                } else {
                    self.n_dirty -= 1;
                }
                self.dirty[id.0] = *dirty;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::graph::{DependentFilter, GraphBuilder, Shape};
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn precision_model() -> (Arc<ModelGraph>, Arc<DistributionRegistry>) {
        let registry = Arc::new(DistributionRegistry::builtin());
        let mut b = GraphBuilder::new();
        b.stochastic(
            "tau",
            "uniform",
            vec![("lower", Expr::constant(0.0)), ("upper", Expr::constant(100.0))],
            Shape::Scalar,
        );
        b.stochastic(
            "x",
            "normal",
            vec![("mean", Expr::constant(0.0)), ("tau", Expr::var("tau"))],
            Shape::Scalar,
        );
        let graph = Arc::new(b.build(&registry).unwrap());
        (graph, registry)
    }

    #[test]
    fn calculate_after_set_value_round_trips() {
        let (graph, registry) = precision_model();
        let mut state = ModelState::new(graph.clone(), registry);
        let tau = graph.id_of("tau").unwrap();
        let x = graph.id_of("x").unwrap();

        state.set_value(tau, Value::Scalar(4.0)).unwrap();
        state.set_value(x, Value::Scalar(0.5)).unwrap();
        let closure = graph.dependent_closure(&[tau, x]);
        let total = state.calculate(&closure);

        // From-scratch recomputation over the same closure must agree.
        let again = state.calculate(&closure);
        assert_abs_diff_eq!(total, again, epsilon = 1e-14);
        assert_abs_diff_eq!(state.log_prob(&closure).unwrap(), total, epsilon = 1e-14);
    }

    #[test]
    fn fresh_state_rejects_density_reads() {
        let (graph, registry) = precision_model();
        let mut state = ModelState::new(graph.clone(), registry);
        let tau = graph.id_of("tau").unwrap();
        let x = graph.id_of("x").unwrap();

        // No calculate has run, so every cache is stale.
        assert!(matches!(
            state.log_prob(&[tau]),
            Err(StateError::StaleState(_))
        ));
        assert!(matches!(
            state.log_prob(&[x]),
            Err(StateError::StaleState(_))
        ));

        state.set_value(tau, Value::Scalar(4.0)).unwrap();
        state.set_value(x, Value::Scalar(0.5)).unwrap();
        let total = state.calculate_all();
        assert!(total.is_finite());
        assert_abs_diff_eq!(state.log_prob(&[tau, x]).unwrap(), total, epsilon = 1e-14);
    }

    #[test]
    fn stale_read_is_detected() {
        let (graph, registry) = precision_model();
        let mut state = ModelState::new(graph.clone(), registry);
        let tau = graph.id_of("tau").unwrap();
        let x = graph.id_of("x").unwrap();
        state.set_value(tau, Value::Scalar(4.0)).unwrap();
        state.set_value(x, Value::Scalar(0.5)).unwrap();
        state.calculate(&graph.dependent_closure(&[tau, x]));

        // Mutate tau without recomputing: x's cache is now stale too.
        state.set_value(tau, Value::Scalar(9.0)).unwrap();
        assert!(state.log_prob(&[x]).is_err());
        assert!(state.log_prob(&[tau]).is_err());

        state.calculate(&graph.dependent_closure(&[tau]));
        assert!(state.log_prob(&[tau, x]).is_ok());
    }

    #[test]
    fn skipping_the_lifted_node_gives_the_wrong_density() {
        // The classic dependency bug: update tau, recompute only x's
        // density, and the stale lifted sd node silently poisons the result.
        let (graph, registry) = precision_model();
        let mut state = ModelState::new(graph.clone(), registry);
        let tau = graph.id_of("tau").unwrap();
        let x = graph.id_of("x").unwrap();

        state.set_value(tau, Value::Scalar(4.0)).unwrap();
        state.set_value(x, Value::Scalar(0.5)).unwrap();
        state.calculate(&graph.dependent_closure(&[tau, x]));

        state.set_value(tau, Value::Scalar(25.0)).unwrap();
        // Wrong: recompute x alone, without the lifted node.
        let wrong = {
            state.calculate(&[tau, x])
        };
        // Right: recompute the full closure.
        let mut fresh = ModelState::new(graph.clone(), registry_clone(&state));
        fresh.set_value(tau, Value::Scalar(25.0)).unwrap();
        fresh.set_value(x, Value::Scalar(0.5)).unwrap();
        let right = fresh.calculate(&graph.dependent_closure(&[tau, x]));
        assert!(
            (wrong - right).abs() > 1e-6,
            "stale lifted node should change the density: wrong={wrong} right={right}"
        );

        // And calculate over the dependents closure repairs the state.
        state.calculate(&graph.dependent_closure(&[tau]));
        let repaired = state
            .log_prob(&graph.dependent_closure(&[tau, x]))
            .unwrap();
        assert_abs_diff_eq!(repaired, right, epsilon = 1e-12);
    }

    fn registry_clone(state: &ModelState) -> Arc<DistributionRegistry> {
        state.registry.clone()
    }

    #[test]
    fn simulate_skips_data_by_default() {
        let registry = Arc::new(DistributionRegistry::builtin());
        let mut b = GraphBuilder::new();
        b.stochastic(
            "p",
            "beta",
            vec![("alpha", Expr::constant(2.0)), ("beta", Expr::constant(2.0))],
            Shape::Scalar,
        );
        b.data(
            "r",
            "binomial",
            vec![("prob", Expr::var("p")), ("size", Expr::constant(10.0))],
            7.0,
        );
        let graph = Arc::new(b.build(&registry).unwrap());
        let mut state = ModelState::new(graph.clone(), registry);
        let mut rng = SmallRng::seed_from_u64(1);

        let all: Vec<_> = graph.topo_order().to_vec();
        state.simulate(&mut rng, &all, false);
        assert_eq!(
            state.value_of("r").unwrap(),
            &Value::Scalar(7.0),
            "observed node must keep its bound value"
        );

        state.simulate(&mut rng, &all, true);
        // With include_data the observation is free to change; it stays in
        // the binomial support either way.
        let r = state.value_of("r").unwrap().as_scalar().unwrap();
        assert!((0.0..=10.0).contains(&r));
    }

    #[test]
    fn dependents_include_lifted_intermediaries() {
        let (graph, _registry) = precision_model();
        let tau = graph.id_of("tau").unwrap();
        let x = graph.id_of("x").unwrap();
        let deps = graph.dependents(&[tau], DependentFilter::default());
        assert!(deps.contains(&x));
        assert!(deps.iter().any(|&id| graph.node(id).is_lifted()));
    }
}
