//! Directed acyclic graph of model nodes.
//!
//! A model is described against a `GraphBuilder` and frozen into a
//! `ModelGraph` in a single `build` pass. The build pass resolves name
//! references, rewrites alternate parameterizations, hoists compound
//! parameter expressions into lifted deterministic nodes, rejects cycles
//! and shape mismatches, and precomputes the downstream dependency closure
//! of every node. After `build` the graph is immutable and can be shared
//! read-only across chains.

use std::collections::HashMap;

use crate::dist::Value;
use crate::error::GraphError;
use crate::expr::Expr;
use crate::registry::DistributionRegistry;

/// Dense node identifier, valid for the graph that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Latent stochastic node, sampled by MCMC.
    Stochastic,
    /// Observed stochastic node; contributes density but is never sampled
    /// unless explicitly requested.
    Data,
    Deterministic,
    Constant,
}

/// Declared shape of a node value, fixed at graph construction.
///
/// Declaring an array quantity as one vector node or as many scalar nodes
/// is a modeling decision; samplers operate at node granularity, so the
/// choice controls the block structure available to the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Vector(usize),
    Matrix(usize, usize),
}

impl Shape {
    pub fn rank(&self) -> usize {
        match self {
            Shape::Scalar => 0,
            Shape::Vector(_) => 1,
            Shape::Matrix(..) => 2,
        }
    }

    /// Number of scalar components.
    pub fn len(&self) -> usize {
        match self {
            Shape::Scalar => 1,
            Shape::Vector(n) => *n,
            Shape::Matrix(r, c) => r * c,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn describe(&self) -> String {
        match self {
            Shape::Scalar => "scalar".to_string(),
            Shape::Vector(n) => format!("vector[{n}]"),
            Shape::Matrix(r, c) => format!("matrix[{r},{c}]"),
        }
    }
}

/// How a stochastic node's author spelled one of its parameters.
///
/// `direct` is set when the supplied expression was a bare reference to
/// another node; the conjugacy detector keys off this, so a precision
/// supplied as `tau = Expr::var("tau")` is recognized even though the
/// canonical sd parameter ends up wired through a lifted node.
#[derive(Debug, Clone)]
pub struct SuppliedParam {
    pub name: String,
    /// Canonical parameter slot this supplies (after alternate rewriting).
    pub slot: usize,
    pub direct: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub enum NodeDef {
    Stochastic {
        dist: String,
        /// Canonical parameter nodes, in the distribution's declared order.
        params: Vec<NodeId>,
        supplied: Vec<SuppliedParam>,
    },
    Deterministic {
        expr: Expr<NodeId>,
        /// True for nodes synthesized by the builder.
        lifted: bool,
    },
    Constant,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub shape: Shape,
    pub def: NodeDef,
    /// Bound value for constant and data nodes.
    pub init: Option<Value>,
}

impl Node {
    pub fn is_stochastic(&self) -> bool {
        matches!(self.kind, NodeKind::Stochastic | NodeKind::Data)
    }

    pub fn is_lifted(&self) -> bool {
        matches!(self.def, NodeDef::Deterministic { lifted: true, .. })
    }
}

/// Conjunctive node filter for [`ModelGraph::nodes`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeFilter {
    /// Nodes with no stochastic ancestor.
    pub top_only: bool,
    /// Stochastic and not observed.
    pub latent_only: bool,
    /// Stochastic, observed or not.
    pub stoch_only: bool,
    /// Observed stochastic nodes.
    pub data_only: bool,
    pub determ_only: bool,
}

/// Kind filter for dependency-closure queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependentFilter {
    pub stoch_only: bool,
    pub determ_only: bool,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

enum RawDef {
    Stochastic {
        dist: String,
        params: Vec<(String, Expr<String>)>,
        observed: Option<Value>,
    },
    Deterministic {
        expr: Expr<String>,
        lifted: bool,
    },
    Constant {
        value: Value,
    },
}

struct RawNode {
    name: String,
    shape: Shape,
    def: RawDef,
}

/// Two-pass model-graph builder.
///
/// The add methods only record declarations; every structural check runs in
/// [`GraphBuilder::build`], which either returns a complete graph or an
/// error with nothing partially constructed. Declaration order does not
/// matter; forward references are legal.
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<RawNode>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a latent stochastic node.
    pub fn stochastic<S: Into<String>>(
        &mut self,
        name: impl Into<String>,
        dist: impl Into<String>,
        params: impl IntoIterator<Item = (S, Expr<String>)>,
        shape: Shape,
    ) -> &mut Self {
        self.nodes.push(RawNode {
            name: name.into(),
            shape,
            def: RawDef::Stochastic {
                dist: dist.into(),
                params: params.into_iter().map(|(n, e)| (n.into(), e)).collect(),
                observed: None,
            },
        });
        self
    }

    /// Declare an observed stochastic node bound to `value`.
    pub fn data<S: Into<String>>(
        &mut self,
        name: impl Into<String>,
        dist: impl Into<String>,
        params: impl IntoIterator<Item = (S, Expr<String>)>,
        value: impl Into<Value>,
    ) -> &mut Self {
        let value = value.into();
        let shape = shape_of(&value);
        self.nodes.push(RawNode {
            name: name.into(),
            shape,
            def: RawDef::Stochastic {
                dist: dist.into(),
                params: params.into_iter().map(|(n, e)| (n.into(), e)).collect(),
                observed: Some(value),
            },
        });
        self
    }

    /// Declare a deterministic scalar node.
    pub fn deterministic(&mut self, name: impl Into<String>, expr: Expr<String>) -> &mut Self {
        self.nodes.push(RawNode {
            name: name.into(),
            shape: Shape::Scalar,
            def: RawDef::Deterministic { expr, lifted: false },
        });
        self
    }

    /// Declare a constant node.
    pub fn constant(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        let shape = shape_of(&value);
        self.nodes.push(RawNode {
            name: name.into(),
            shape,
            def: RawDef::Constant { value },
        });
        self
    }

    /// Resolve, lift, check and freeze the declared model.
    pub fn build(mut self, registry: &DistributionRegistry) -> Result<ModelGraph, GraphError> {
        // Pass 1: rewrite alternate parameterizations and hoist compound
        // parameter expressions into lifted nodes, recording provenance.
        let mut lifted_counter = 0usize;
        let mut staged: Vec<StagedNode> = Vec::new();
        let mut lifted: Vec<RawNode> = Vec::new();
        let user_names: std::collections::HashSet<String> =
            self.nodes.iter().map(|n| n.name.clone()).collect();

        for raw in &mut self.nodes {
            let staged_def = match &mut raw.def {
                RawDef::Constant { value } => StagedDef::Constant {
                    value: value.clone(),
                },
                RawDef::Deterministic { expr, lifted } => StagedDef::Deterministic {
                    expr: expr.clone(),
                    lifted: *lifted,
                },
                RawDef::Stochastic {
                    dist,
                    params,
                    observed,
                } => {
                    let d = registry.get(dist).map_err(|_| GraphError::UnknownDistribution {
                        node: raw.name.clone(),
                        dist: dist.clone(),
                    })?;
                    let specs = d.params();

                    // Map each supplied name to a canonical slot, applying
                    // alternate-parameter conversions.
                    let mut slot_exprs: Vec<Option<Expr<String>>> = vec![None; specs.len()];
                    let mut supplied = Vec::with_capacity(params.len());
                    for (pname, pexpr) in params.iter() {
                        let (slot, expr) = if let Some(idx) =
                            specs.iter().position(|s| s.name == pname)
                        {
                            (idx, pexpr.clone())
                        } else if let Some(alt) =
                            d.alternates().iter().find(|a| a.name == pname.as_str())
                        {
                            let idx = specs
                                .iter()
                                .position(|s| s.name == alt.replaces)
                                .expect("alternate replaces a declared parameter");
                            (idx, (alt.convert)(pexpr.clone()))
                        } else {
                            return Err(GraphError::UnknownParameter {
                                node: raw.name.clone(),
                                dist: dist.clone(),
                                param: pname.clone(),
                            });
                        };
                        if slot_exprs[slot].is_some() {
                            return Err(GraphError::UnknownParameter {
                                node: raw.name.clone(),
                                dist: dist.clone(),
                                param: format!("{pname} (slot supplied twice)"),
                            });
                        }
                        let direct_name = match pexpr {
                            Expr::Ref(n) => Some(n.clone()),
                            _ => None,
                        };
                        supplied.push(StagedSupplied {
                            name: pname.clone(),
                            slot,
                            direct_name,
                        });
                        slot_exprs[slot] = Some(expr);
                    }

                    // Every canonical slot must be supplied exactly once.
                    let mut param_names = Vec::with_capacity(specs.len());
                    for (idx, entry) in slot_exprs.into_iter().enumerate() {
                        let Some(expr) = entry else {
                            return Err(GraphError::UnknownParameter {
                                node: raw.name.clone(),
                                dist: dist.clone(),
                                param: format!("{} (missing)", specs[idx].name),
                            });
                        };
                        // Bare references wire straight through. Constant
                        // parameters become constant nodes, so a fresh state
                        // holds their bound values from the start. Anything
                        // else becomes a lifted deterministic node.
                        let target = match expr {
                            Expr::Ref(name) => name,
                            Expr::Const(c) => {
                                let name =
                                    next_lifted_name(&mut lifted_counter, &user_names);
                                lifted.push(RawNode {
                                    name: name.clone(),
                                    shape: Shape::Scalar,
                                    def: RawDef::Constant {
                                        value: Value::Scalar(c),
                                    },
                                });
                                name
                            }
                            compound => {
                                let name =
                                    next_lifted_name(&mut lifted_counter, &user_names);
                                lifted.push(RawNode {
                                    name: name.clone(),
                                    shape: Shape::Scalar,
                                    def: RawDef::Deterministic {
                                        expr: compound,
                                        lifted: true,
                                    },
                                });
                                name
                            }
                        };
                        param_names.push(target);
                    }

                    StagedDef::Stochastic {
                        dist: dist.clone(),
                        param_names,
                        supplied,
                        observed: observed.clone(),
                    }
                }
            };
            staged.push(StagedNode {
                name: raw.name.clone(),
                shape: raw.shape,
                def: staged_def,
            });
        }
        for raw in lifted {
            let def = match raw.def {
                RawDef::Deterministic { expr, lifted } => {
                    StagedDef::Deterministic { expr, lifted }
                }
                RawDef::Constant { value } => StagedDef::Constant { value },
                RawDef::Stochastic { .. } => unreachable!(),
            };
            staged.push(StagedNode {
                name: raw.name,
                shape: raw.shape,
                def,
            });
        }

        // Pass 2: resolve names to dense ids.
        let mut by_name: HashMap<String, NodeId> = HashMap::with_capacity(staged.len());
        for (idx, node) in staged.iter().enumerate() {
            if by_name.insert(node.name.clone(), NodeId(idx)).is_some() {
                return Err(GraphError::DuplicateNode(node.name.clone()));
            }
        }
        let resolve = |referrer: &str, name: &str| -> Result<NodeId, GraphError> {
            by_name
                .get(name)
                .copied()
                .ok_or_else(|| GraphError::UndefinedReference {
                    referrer: referrer.to_string(),
                    name: name.to_string(),
                })
        };

        let mut nodes: Vec<Node> = Vec::with_capacity(staged.len());
        let mut parents: Vec<Vec<NodeId>> = Vec::with_capacity(staged.len());
        for node in &staged {
            let (def, init, kind, mut parent_ids) = match &node.def {
                StagedDef::Constant { value } => {
                    (NodeDef::Constant, Some(value.clone()), NodeKind::Constant, Vec::new())
                }
                StagedDef::Deterministic { expr, lifted } => {
                    let resolved =
                        expr.map_refs(&mut |name: &String| resolve(&node.name, name))?;
                    let parent_ids: Vec<NodeId> =
                        resolved.refs().into_iter().copied().collect();
                    (
                        NodeDef::Deterministic {
                            expr: resolved,
                            lifted: *lifted,
                        },
                        None,
                        NodeKind::Deterministic,
                        parent_ids,
                    )
                }
                StagedDef::Stochastic {
                    dist,
                    param_names,
                    supplied,
                    observed,
                } => {
                    let params: Vec<NodeId> = param_names
                        .iter()
                        .map(|n| resolve(&node.name, n))
                        .collect::<Result<_, _>>()?;
                    let supplied: Vec<SuppliedParam> = supplied
                        .iter()
                        .map(|s| {
                            Ok(SuppliedParam {
                                name: s.name.clone(),
                                slot: s.slot,
                                direct: match &s.direct_name {
                                    Some(n) => Some(resolve(&node.name, n)?),
                                    None => None,
                                },
                            })
                        })
                        .collect::<Result<_, GraphError>>()?;
                    let kind = if observed.is_some() {
                        NodeKind::Data
                    } else {
                        NodeKind::Stochastic
                    };
                    (
                        NodeDef::Stochastic {
                            dist: dist.clone(),
                            params: params.clone(),
                            supplied,
                        },
                        observed.clone(),
                        kind,
                        params,
                    )
                }
            };
            parent_ids.sort_unstable();
            parent_ids.dedup();
            nodes.push(Node {
                name: node.name.clone(),
                kind,
                shape: node.shape,
                def,
                init,
            });
            parents.push(parent_ids);
        }

        let mut children: Vec<Vec<NodeId>> = vec![Vec::new(); nodes.len()];
        for (idx, ps) in parents.iter().enumerate() {
            for p in ps {
                children[p.0].push(NodeId(idx));
            }
        }

        let topo_order = topo_sort(&nodes, &parents, &children)?;
        let mut topo_index = vec![0usize; nodes.len()];
        for (pos, id) in topo_order.iter().enumerate() {
            topo_index[id.0] = pos;
        }

        let graph = ModelGraph {
            descendants: compute_descendants(&nodes, &children, &topo_order, &topo_index),
            nodes,
            parents,
            children,
            topo_order,
            topo_index,
            by_name,
        };
        graph.check_shapes(registry)?;
        Ok(graph)
    }
}

fn next_lifted_name(counter: &mut usize, taken: &std::collections::HashSet<String>) -> String {
    loop {
        let candidate = format!("lifted_{counter}");
        *counter += 1;
        if !taken.contains(&candidate) {
            return candidate;
        }
    }
}

fn shape_of(value: &Value) -> Shape {
    match value {
        Value::Scalar(_) => Shape::Scalar,
        Value::Vector(v) => Shape::Vector(v.len()),
        Value::Matrix { rows, cols, .. } => Shape::Matrix(*rows, *cols),
    }
}

struct StagedSupplied {
    name: String,
    slot: usize,
    direct_name: Option<String>,
}

enum StagedDef {
    Stochastic {
        dist: String,
        param_names: Vec<String>,
        supplied: Vec<StagedSupplied>,
        observed: Option<Value>,
    },
    Deterministic {
        expr: Expr<String>,
        lifted: bool,
    },
    Constant {
        value: Value,
    },
}

struct StagedNode {
    name: String,
    shape: Shape,
    def: StagedDef,
}

fn topo_sort(
    nodes: &[Node],
    parents: &[Vec<NodeId>],
    children: &[Vec<NodeId>],
) -> Result<Vec<NodeId>, GraphError> {
    let mut in_degree: Vec<usize> = parents.iter().map(Vec::len).collect();
    // Kahn's algorithm; ties broken by declaration index for determinism.
    let mut ready: std::collections::BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(idx) = ready.pop_first() {
        order.push(NodeId(idx));
        for child in &children[idx] {
            in_degree[child.0] -= 1;
            if in_degree[child.0] == 0 {
                ready.insert(child.0);
            }
        }
    }
    if order.len() != nodes.len() {
        let stuck = in_degree
            .iter()
            .position(|d| *d > 0)
            .expect("some node remains in the cycle");
        return Err(GraphError::CyclicModel(nodes[stuck].name.clone()));
    }
    Ok(order)
}

/// Transitive downstream closure per node, excluding the node itself,
/// sorted by topological position. Computed once; the graph is immutable
/// afterwards, so closure queries never need traversal at sampling time.
fn compute_descendants(
    nodes: &[Node],
    children: &[Vec<NodeId>],
    topo_order: &[NodeId],
    topo_index: &[usize],
) -> Vec<Vec<NodeId>> {
    let n = nodes.len();
    let words = n.div_ceil(64);
    let mut bits: Vec<Vec<u64>> = vec![vec![0u64; words]; n];
    for id in topo_order.iter().rev() {
        let mut acc = vec![0u64; words];
        for child in &children[id.0] {
            acc[child.0 / 64] |= 1u64 << (child.0 % 64);
            for (a, b) in acc.iter_mut().zip(&bits[child.0]) {
                *a |= *b;
            }
        }
        bits[id.0] = acc;
    }
    bits.into_iter()
        .map(|set| {
            let mut ids: Vec<NodeId> = (0..n)
                .filter(|i| set[i / 64] & (1u64 << (i % 64)) != 0)
                .map(NodeId)
                .collect();
            ids.sort_unstable_by_key(|id| topo_index[id.0]);
            ids
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Frozen graph
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ModelGraph {
    nodes: Vec<Node>,
    parents: Vec<Vec<NodeId>>,
    children: Vec<Vec<NodeId>>,
    topo_order: Vec<NodeId>,
    topo_index: Vec<usize>,
    descendants: Vec<Vec<NodeId>>,
    by_name: HashMap<String, NodeId>,
}

impl ModelGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn id_of(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn parents(&self, id: NodeId) -> &[NodeId] {
        &self.parents[id.0]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.children[id.0]
    }

    /// Node ids in topological order.
    pub fn topo_order(&self) -> &[NodeId] {
        &self.topo_order
    }

    pub fn topo_index(&self, id: NodeId) -> usize {
        self.topo_index[id.0]
    }

    /// Nodes satisfying the conjunction of the requested filters, in
    /// topological-then-declaration order.
    pub fn nodes(&self, filter: NodeFilter) -> Vec<NodeId> {
        self.topo_order
            .iter()
            .copied()
            .filter(|&id| {
                let node = &self.nodes[id.0];
                if filter.stoch_only && !node.is_stochastic() {
                    return false;
                }
                if filter.latent_only && node.kind != NodeKind::Stochastic {
                    return false;
                }
                if filter.data_only && node.kind != NodeKind::Data {
                    return false;
                }
                if filter.determ_only && node.kind != NodeKind::Deterministic {
                    return false;
                }
                if filter.top_only && self.has_stochastic_ancestor(id) {
                    return false;
                }
                true
            })
            .collect()
    }

    fn has_stochastic_ancestor(&self, id: NodeId) -> bool {
        let mut stack: Vec<NodeId> = self.parents[id.0].to_vec();
        let mut seen = vec![false; self.nodes.len()];
        while let Some(p) = stack.pop() {
            if seen[p.0] {
                continue;
            }
            seen[p.0] = true;
            if self.nodes[p.0].is_stochastic() {
                return true;
            }
            stack.extend_from_slice(&self.parents[p.0]);
        }
        false
    }

    /// Transitive downstream closure of `seeds`, excluding the seeds, in
    /// topological order. Lifted nodes are ordinary deterministic nodes
    /// and are always included unless filtered by kind.
    pub fn dependents(&self, seeds: &[NodeId], filter: DependentFilter) -> Vec<NodeId> {
        let mut seen = vec![false; self.nodes.len()];
        for seed in seeds {
            for id in &self.descendants[seed.0] {
                seen[id.0] = true;
            }
        }
        for seed in seeds {
            seen[seed.0] = false;
        }
        self.topo_order
            .iter()
            .copied()
            .filter(|id| seen[id.0])
            .filter(|&id| {
                let node = &self.nodes[id.0];
                if filter.stoch_only && !node.is_stochastic() {
                    return false;
                }
                if filter.determ_only && node.kind != NodeKind::Deterministic {
                    return false;
                }
                true
            })
            .collect()
    }

    /// `seeds` plus their downstream closure, in topological order. This is
    /// the node set `ModelState::calculate` expects after mutating `seeds`.
    pub fn dependent_closure(&self, seeds: &[NodeId]) -> Vec<NodeId> {
        let mut seen = vec![false; self.nodes.len()];
        for seed in seeds {
            seen[seed.0] = true;
            for id in &self.descendants[seed.0] {
                seen[id.0] = true;
            }
        }
        self.topo_order
            .iter()
            .copied()
            .filter(|id| seen[id.0])
            .collect()
    }

    /// Direct stochastic dependents: stochastic nodes whose density reads
    /// one of `seeds`, possibly through lifted nodes, with no other
    /// stochastic node in between.
    pub fn stochastic_children(&self, seeds: &[NodeId]) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeId> = seeds.to_vec();
        let mut on_seed = vec![false; self.nodes.len()];
        for s in seeds {
            on_seed[s.0] = true;
        }
        while let Some(id) = stack.pop() {
            for &child in &self.children[id.0] {
                if seen[child.0] {
                    continue;
                }
                seen[child.0] = true;
                let node = &self.nodes[child.0];
                if node.is_stochastic() {
                    out.push(child);
                } else if node.kind == NodeKind::Deterministic {
                    stack.push(child);
                }
            }
        }
        out.sort_unstable_by_key(|id| self.topo_index[id.0]);
        out.retain(|id| !on_seed[id.0]);
        out
    }

    fn check_shapes(&self, registry: &DistributionRegistry) -> Result<(), GraphError> {
        for node in &self.nodes {
            let NodeDef::Stochastic { dist, params, .. } = &node.def else {
                continue;
            };
            let d = registry.get(dist).expect("distribution resolved during build");
            if node.shape.rank() != d.value_rank() {
                return Err(GraphError::ShapeMismatch {
                    node: node.name.clone(),
                    message: format!(
                        "distribution '{dist}' samples rank-{} values but the node is {}",
                        d.value_rank(),
                        node.shape.describe()
                    ),
                });
            }
            for (spec, &pid) in d.params().iter().zip(params) {
                let pshape = self.nodes[pid.0].shape;
                if pshape.rank() != spec.rank {
                    return Err(GraphError::ShapeMismatch {
                        node: node.name.clone(),
                        message: format!(
                            "parameter '{}' of '{dist}' requires rank {} but node '{}' is {}",
                            spec.name,
                            spec.rank,
                            self.nodes[pid.0].name,
                            pshape.describe()
                        ),
                    });
                }
            }
            if let Some(init) = &node.init {
                if shape_of(init) != node.shape {
                    return Err(GraphError::ShapeMismatch {
                        node: node.name.clone(),
                        message: format!(
                            "observed value is {} but the node is {}",
                            shape_of(init).describe(),
                            node.shape.describe()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry() -> DistributionRegistry {
        DistributionRegistry::builtin()
    }

    fn names(graph: &ModelGraph, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|&id| graph.node(id).name.clone()).collect()
    }

    #[test]
    fn bare_references_wire_directly() {
        let mut b = GraphBuilder::new();
        b.stochastic(
            "mu",
            "normal",
            vec![("mean", Expr::constant(0.0)), ("sd", Expr::constant(10.0))],
            Shape::Scalar,
        );
        b.stochastic(
            "x",
            "normal",
            vec![("mean", Expr::var("mu")), ("sd", Expr::constant(1.0))],
            Shape::Scalar,
        );
        let g = b.build(&registry()).unwrap();
        let mu = g.id_of("mu").unwrap();
        let x = g.id_of("x").unwrap();
        assert!(g.parents(x).contains(&mu));
    }

    #[test]
    fn compound_parameter_is_lifted() {
        // tau ~ uniform(0, 100); x ~ normal(0, tau = tau). The precision
        // parameterization rewrites sd to 1/sqrt(tau), which must become a
        // lifted node between tau and x.
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
        let g = b.build(&registry()).unwrap();
        let tau = g.id_of("tau").unwrap();
        let x = g.id_of("x").unwrap();

        let deps = g.dependents(&[tau], DependentFilter::default());
        let dep_names = names(&g, &deps);
        assert!(dep_names.iter().any(|n| n.starts_with("lifted_")), "{dep_names:?}");
        assert!(deps.contains(&x));

        // The lifted node sits between tau and x on the parameter path.
        let NodeDef::Stochastic { params, supplied, .. } = &g.node(x).def else {
            panic!("x is stochastic");
        };
        let sd_node = params[1];
        assert!(g.node(sd_node).is_lifted());
        assert!(g.parents(sd_node).contains(&tau));
        // Provenance: the author supplied tau as a bare reference.
        let tau_supplied = supplied.iter().find(|s| s.name == "tau").unwrap();
        assert_eq!(tau_supplied.direct, Some(tau));
    }

    #[test]
    fn constant_parameters_become_constant_nodes() {
        let mut b = GraphBuilder::new();
        b.stochastic(
            "x",
            "normal",
            vec![("mean", Expr::constant(2.0)), ("sd", Expr::constant(3.0))],
            Shape::Scalar,
        );
        let g = b.build(&registry()).unwrap();
        let x = g.id_of("x").unwrap();
        let NodeDef::Stochastic { params, .. } = &g.node(x).def else {
            panic!("x is stochastic");
        };
        // Constant-valued parameters carry their bound values, so a fresh
        // state reads 2.0 and 3.0 without any recomputation pass.
        for &pid in params.iter() {
            assert_eq!(g.node(pid).kind, NodeKind::Constant);
        }
        assert_eq!(g.node(params[0]).init, Some(Value::Scalar(2.0)));
        assert_eq!(g.node(params[1]).init, Some(Value::Scalar(3.0)));
    }

    #[test]
    fn undefined_reference_is_reported() {
        let mut b = GraphBuilder::new();
        b.stochastic(
            "x",
            "normal",
            vec![("mean", Expr::var("missing")), ("sd", Expr::constant(1.0))],
            Shape::Scalar,
        );
        let err = b.build(&registry()).unwrap_err();
        match err {
            GraphError::UndefinedReference { referrer, name } => {
                assert_eq!(name, "missing");
                assert_eq!(referrer, "x");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn cycles_are_rejected() {
        let mut b = GraphBuilder::new();
        b.deterministic("a", Expr::var("b") + 1.0);
        b.deterministic("b", Expr::var("a") + 1.0);
        let err = b.build(&registry()).unwrap_err();
        assert!(matches!(err, GraphError::CyclicModel(_)));
    }

    #[test]
    fn rank_mismatch_is_rejected() {
        let mut b = GraphBuilder::new();
        b.constant("alpha", 2.0); // scalar where dirichlet wants a vector
        b.stochastic(
            "p",
            "dirichlet",
            vec![("alpha", Expr::var("alpha"))],
            Shape::Vector(3),
        );
        let err = b.build(&registry()).unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch { .. }));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut b = GraphBuilder::new();
        b.constant("c", 1.0);
        b.constant("c", 2.0);
        let err = b.build(&registry()).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode(_)));
    }

    #[test]
    fn filters_are_conjunctive_and_ordered() {
        let mut b = GraphBuilder::new();
        b.stochastic(
            "mu",
            "normal",
            vec![("mean", Expr::constant(0.0)), ("sd", Expr::constant(10.0))],
            Shape::Scalar,
        );
        b.stochastic(
            "x",
            "normal",
            vec![("mean", Expr::var("mu")), ("sd", Expr::constant(1.0))],
            Shape::Scalar,
        );
        b.data(
            "y",
            "normal",
            vec![("mean", Expr::var("x")), ("sd", Expr::constant(1.0))],
            2.5,
        );
        let g = b.build(&registry()).unwrap();

        let latent = names(&g, &g.nodes(NodeFilter { latent_only: true, ..Default::default() }));
        assert_eq!(latent, vec!["mu", "x"]);

        let data = names(&g, &g.nodes(NodeFilter { data_only: true, ..Default::default() }));
        assert_eq!(data, vec!["y"]);

        let top_latent = names(
            &g,
            &g.nodes(NodeFilter { top_only: true, latent_only: true, ..Default::default() }),
        );
        assert_eq!(top_latent, vec!["mu"]);
    }

    #[test]
    fn closure_is_idempotent() {
        let mut b = GraphBuilder::new();
        b.stochastic(
            "a",
            "normal",
            vec![("mean", Expr::constant(0.0)), ("sd", Expr::constant(1.0))],
            Shape::Scalar,
        );
        b.deterministic("twice", Expr::var("a") * 2.0);
        b.stochastic(
            "c",
            "normal",
            vec![("mean", Expr::var("twice")), ("sd", Expr::constant(1.0))],
            Shape::Scalar,
        );
        let g = b.build(&registry()).unwrap();
        let a = g.id_of("a").unwrap();

        let once = g.dependents(&[a], DependentFilter::default());
        let closure = g.dependent_closure(&[a]);
        let again = g.dependent_closure(&closure);
        assert_eq!(closure, again);
        assert_eq!(once.len() + 1, closure.len());
    }

    #[test]
    fn stochastic_children_skip_through_lifted_nodes() {
        let mut b = GraphBuilder::new();
        b.stochastic(
            "tau",
            "gamma",
            vec![("shape", Expr::constant(1.0)), ("rate", Expr::constant(1.0))],
            Shape::Scalar,
        );
        b.stochastic(
            "x",
            "normal",
            vec![("mean", Expr::constant(0.0)), ("tau", Expr::var("tau"))],
            Shape::Scalar,
        );
        b.stochastic(
            "far",
            "normal",
            vec![("mean", Expr::var("x")), ("sd", Expr::constant(1.0))],
            Shape::Scalar,
        );
        let g = b.build(&registry()).unwrap();
        let tau = g.id_of("tau").unwrap();
        let kids = names(&g, &g.stochastic_children(&[tau]));
        // x is reached through the lifted sd node; far is blocked by x.
        assert_eq!(kids, vec!["x"]);
    }
}
