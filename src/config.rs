//! Sampler configuration: an ordered list of (target node set, sampler
//! variant, options) assignments plus the monitored node set.
//!
//! The configuration is the only supported way to alter which sampler
//! touches which node. Every latent stochastic node must be covered by
//! exactly one assignment; overlap and gaps are configuration errors, not
//! run-time surprises. A failing call leaves the configuration unchanged.

use std::sync::Arc;

use crate::block_rw::BlockOptions;
use crate::conjugate::ConjugateUpdater;
use crate::dist::Distribution;
use crate::error::ConfigError;
use crate::graph::{ModelGraph, NodeDef, NodeFilter, NodeId, NodeKind, Shape};
use crate::random_walk::RandomWalkOptions;
use crate::registry::DistributionRegistry;

#[derive(Clone)]
pub enum SamplerKind {
    /// Exact draw from the closed-form posterior conditional.
    Conjugate,
    /// Scalar random-walk Metropolis.
    RandomWalk(RandomWalkOptions),
    /// Joint multivariate-normal proposal over the target set.
    BlockRandomWalk(BlockOptions),
    /// Block proposal on hyperparameters with conjugate redraws of their
    /// latent dependents, accepted jointly.
    CrossLevel(BlockOptions),
}

impl SamplerKind {
    pub fn name(&self) -> &'static str {
        match self {
            SamplerKind::Conjugate => "conjugate",
            SamplerKind::RandomWalk(_) => "random_walk",
            SamplerKind::BlockRandomWalk(_) => "block_random_walk",
            SamplerKind::CrossLevel(_) => "cross_level",
        }
    }
}

#[derive(Clone)]
pub struct SamplerAssignment {
    pub targets: Vec<NodeId>,
    pub kind: SamplerKind,
}

/// Ordered sampler assignments bound to one model graph.
#[derive(Clone)]
pub struct McmcConfig {
    graph: Arc<ModelGraph>,
    registry: Arc<DistributionRegistry>,
    assignments: Vec<SamplerAssignment>,
    monitors: Vec<NodeId>,
}

impl McmcConfig {
    /// Default configuration: one assignment per latent stochastic node,
    /// conjugate where a relation exists, scalar random-walk otherwise
    /// (block random-walk for vector and matrix nodes). Top-level latent
    /// nodes are monitored.
    ///
    /// Fails when some latent node has no applicable default, such as a
    /// simplex-valued node a dense random-walk proposal can never move.
    pub fn configure(
        graph: Arc<ModelGraph>,
        registry: Arc<DistributionRegistry>,
    ) -> Result<Self, ConfigError> {
        let mut assignments = Vec::new();
        for id in graph.nodes(NodeFilter {
            latent_only: true,
            ..Default::default()
        }) {
            let kind = if ConjugateUpdater::detect(&graph, &registry, id).is_some() {
                SamplerKind::Conjugate
            } else if graph.node(id).shape == Shape::Scalar {
                SamplerKind::RandomWalk(RandomWalkOptions::default())
            } else {
                if !dist_of(&graph, &registry, id).proposable() {
                    return Err(ConfigError::DegenerateSupport {
                        sampler: "block_random_walk",
                        node: graph.node(id).name.clone(),
                    });
                }
                SamplerKind::BlockRandomWalk(BlockOptions::default())
            };
            assignments.push(SamplerAssignment {
                targets: vec![id],
                kind,
            });
        }
        let monitors = graph.nodes(NodeFilter {
            top_only: true,
            latent_only: true,
            ..Default::default()
        });
        Ok(Self {
            graph,
            registry,
            assignments,
            monitors,
        })
    }

    /// An empty configuration; callers add every assignment themselves.
    pub fn empty(graph: Arc<ModelGraph>, registry: Arc<DistributionRegistry>) -> Self {
        Self {
            graph,
            registry,
            assignments: Vec::new(),
            monitors: Vec::new(),
        }
    }

    pub fn graph(&self) -> &Arc<ModelGraph> {
        &self.graph
    }

    pub fn registry(&self) -> &Arc<DistributionRegistry> {
        &self.registry
    }

    pub fn assignments(&self) -> &[SamplerAssignment] {
        &self.assignments
    }

    pub fn monitors(&self) -> &[NodeId] {
        &self.monitors
    }

    fn resolve_latent(&self, name: &str) -> Result<NodeId, ConfigError> {
        let id = self
            .graph
            .id_of(name)
            .ok_or_else(|| ConfigError::UnknownNode(name.to_string()))?;
        if self.graph.node(id).kind != NodeKind::Stochastic {
            return Err(ConfigError::NotStochastic(name.to_string()));
        }
        Ok(id)
    }

    /// Nodes an assignment claims: its targets, plus (for cross-level) the
    /// latent dependents it redraws.
    fn covered(&self, assignment: &SamplerAssignment) -> Vec<NodeId> {
        let mut covered = assignment.targets.clone();
        if matches!(assignment.kind, SamplerKind::CrossLevel(_)) {
            covered.extend(
                self.graph
                    .stochastic_children(&assignment.targets)
                    .into_iter()
                    .filter(|&c| self.graph.node(c).kind == NodeKind::Stochastic),
            );
        }
        covered
    }

    fn check_assignment(&self, assignment: &SamplerAssignment) -> Result<(), ConfigError> {
        let scalar_only = |sampler: &'static str| -> Result<(), ConfigError> {
            for &t in &assignment.targets {
                let node = self.graph.node(t);
                if node.shape != Shape::Scalar {
                    return Err(ConfigError::GranularityMismatch {
                        sampler,
                        node: node.name.clone(),
                        shape: node.shape.describe(),
                    });
                }
            }
            Ok(())
        };
        let proposable = |sampler: &'static str| -> Result<(), ConfigError> {
            for &t in &assignment.targets {
                if !dist_of(&self.graph, &self.registry, t).proposable() {
                    return Err(ConfigError::DegenerateSupport {
                        sampler,
                        node: self.graph.node(t).name.clone(),
                    });
                }
            }
            Ok(())
        };
        let cov_shape = |sampler: &'static str, options: &BlockOptions| -> Result<(), ConfigError> {
            let Some(cov) = &options.prop_cov else {
                return Ok(());
            };
            let dim: usize = assignment
                .targets
                .iter()
                .map(|&t| self.graph.node(t).shape.len())
                .sum();
            if cov.len() != dim * dim {
                return Err(ConfigError::ProposalCovarianceShape {
                    sampler,
                    dim,
                    got: cov.len(),
                });
            }
            Ok(())
        };
        match &assignment.kind {
            SamplerKind::RandomWalk(_) => {
                scalar_only("random_walk")?;
                proposable("random_walk")?;
            }
            SamplerKind::Conjugate => {
                scalar_only("conjugate")?;
                for &t in &assignment.targets {
                    if ConjugateUpdater::detect(&self.graph, &self.registry, t).is_none() {
                        return Err(ConfigError::NoConjugateRelation(
                            self.graph.node(t).name.clone(),
                        ));
                    }
                }
            }
            SamplerKind::BlockRandomWalk(options) => {
                proposable("block_random_walk")?;
                cov_shape("block_random_walk", options)?;
            }
            SamplerKind::CrossLevel(options) => {
                proposable("cross_level")?;
                cov_shape("cross_level", options)?;
                for child in self.graph.stochastic_children(&assignment.targets) {
                    if self.graph.node(child).kind != NodeKind::Stochastic {
                        continue;
                    }
                    if ConjugateUpdater::detect(&self.graph, &self.registry, child).is_none() {
                        return Err(ConfigError::NonConjugateDependent(
                            self.graph.node(child).name.clone(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Append an assignment over the named nodes. Fails without mutating
    /// the configuration if a node is unknown, not latent, already covered,
    /// or incompatible with the sampler's granularity.
    pub fn add_sampler<S: AsRef<str>>(
        &mut self,
        names: &[S],
        kind: SamplerKind,
    ) -> Result<(), ConfigError> {
        let targets: Vec<NodeId> = names
            .iter()
            .map(|n| self.resolve_latent(n.as_ref()))
            .collect::<Result<_, _>>()?;
        let assignment = SamplerAssignment { targets, kind };
        self.check_assignment(&assignment)?;

        let mut taken = vec![false; self.graph.len()];
        for existing in &self.assignments {
            for id in self.covered(existing) {
                taken[id.0] = true;
            }
        }
        for id in self.covered(&assignment) {
            if taken[id.0] {
                return Err(ConfigError::OverlappingAssignment(
                    self.graph.node(id).name.clone(),
                ));
            }
        }
        self.assignments.push(assignment);
        Ok(())
    }

    /// Drop the named nodes from every assignment's target set; assignments
    /// left with no targets are removed entirely.
    pub fn remove_samplers<S: AsRef<str>>(&mut self, names: &[S]) -> Result<(), ConfigError> {
        let mut drop = vec![false; self.graph.len()];
        for name in names {
            let id = self
                .graph
                .id_of(name.as_ref())
                .ok_or_else(|| ConfigError::UnknownNode(name.as_ref().to_string()))?;
            drop[id.0] = true;
        }
        for assignment in &mut self.assignments {
            assignment.targets.retain(|id| !drop[id.0]);
        }
        self.assignments.retain(|a| !a.targets.is_empty());
        Ok(())
    }

    /// Extend the monitored node set; duplicates are ignored.
    pub fn add_monitors<S: AsRef<str>>(&mut self, names: &[S]) -> Result<(), ConfigError> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push(
                self.graph
                    .id_of(name.as_ref())
                    .ok_or_else(|| ConfigError::UnknownNode(name.as_ref().to_string()))?,
            );
        }
        for id in ids {
            if !self.monitors.contains(&id) {
                self.monitors.push(id);
            }
        }
        Ok(())
    }

    pub fn clear_monitors(&mut self) {
        self.monitors.clear();
    }

    /// Check the coverage invariant: every latent stochastic node claimed
    /// by exactly one assignment, every assignment internally valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut count = vec![0usize; self.graph.len()];
        for assignment in &self.assignments {
            self.check_assignment(assignment)?;
            for id in self.covered(assignment) {
                count[id.0] += 1;
            }
        }
        for id in self.graph.nodes(NodeFilter {
            latent_only: true,
            ..Default::default()
        }) {
            match count[id.0] {
                0 => {
                    return Err(ConfigError::UncoveredNode(
                        self.graph.node(id).name.clone(),
                    ))
                }
                1 => {}
                _ => {
                    return Err(ConfigError::OverlappingAssignment(
                        self.graph.node(id).name.clone(),
                    ))
                }
            }
        }
        Ok(())
    }
}

fn dist_of<'a>(
    graph: &ModelGraph,
    registry: &'a DistributionRegistry,
    id: NodeId,
) -> &'a Arc<dyn Distribution> {
    let NodeDef::Stochastic { dist, .. } = &graph.node(id).def else {
        panic!("node {} is not stochastic", graph.node(id).name);
    };
    registry
        .get(dist)
        .expect("distribution resolved at graph build")
}
