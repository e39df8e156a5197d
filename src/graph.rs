//! Workflow graph: which stages run, in what order, and where they fan out.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::state::StageName;

/// Edge target: another stage, or the end of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    Stage(StageName),
    End,
}

/// One step of a linearized execution plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Run a single stage.
    Stage(StageName),
    /// Run these stages concurrently and merge their updates at the join.
    Parallel(Vec<StageName>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphBuildError {
    #[error("no entry point set")]
    NoEntryPoint,

    #[error("edge references undeclared node: {0}")]
    UnknownNode(StageName),

    #[error("node {0} has no outgoing edge")]
    DeadEnd(StageName),

    #[error("parallel branches after {0} do not rejoin at a single stage")]
    MissingJoin(StageName),

    #[error("graph contains a cycle")]
    Cycle,
}

/// Directed stage graph with validation at build time.
///
/// Kept deliberately simple: every node has explicit successors, fan-out
/// branches must reconverge on one join stage, and plans are linearized up
/// front so the driver only ever walks a `Vec<Step>`.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    nodes: HashSet<StageName>,
    edges: HashMap<StageName, Vec<NodeRef>>,
}

impl WorkflowGraph {
    pub fn builder() -> WorkflowGraphBuilder {
        WorkflowGraphBuilder::default()
    }

    /// The production graph: optional discovery, research, concurrent
    /// extraction and crawl, then analysis.
    pub fn standard() -> Self {
        Self::builder()
            .add_node(StageName::Discovery)
            .add_node(StageName::Research)
            .add_node(StageName::Extraction)
            .add_node(StageName::Crawl)
            .add_node(StageName::Analysis)
            .add_edge(StageName::Discovery, NodeRef::Stage(StageName::Research))
            .add_edge(StageName::Research, NodeRef::Stage(StageName::Extraction))
            .add_edge(StageName::Research, NodeRef::Stage(StageName::Crawl))
            .add_edge(StageName::Extraction, NodeRef::Stage(StageName::Analysis))
            .add_edge(StageName::Crawl, NodeRef::Stage(StageName::Analysis))
            .add_edge(StageName::Analysis, NodeRef::End)
            .build()
            .expect("standard graph is well-formed")
    }

    /// Entry stage for a run: discovery when it was requested, otherwise
    /// straight to research.
    pub fn entry_for(use_auto_discovery: bool) -> StageName {
        if use_auto_discovery {
            StageName::Discovery
        } else {
            StageName::Research
        }
    }

    fn successors(&self, node: StageName) -> &[NodeRef] {
        self.edges.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Linearize the graph into steps starting from `entry`.
    pub fn plan(&self, entry: StageName) -> Result<Vec<Step>, GraphBuildError> {
        if !self.nodes.contains(&entry) {
            return Err(GraphBuildError::UnknownNode(entry));
        }

        let mut steps = Vec::new();
        let mut visited = HashSet::new();
        let mut current = entry;
        loop {
            if !visited.insert(current) {
                return Err(GraphBuildError::Cycle);
            }
            steps.push(Step::Stage(current));

            let successors = self.successors(current);
            match successors {
                [] => return Err(GraphBuildError::DeadEnd(current)),
                [NodeRef::End] => return Ok(steps),
                [NodeRef::Stage(next)] => current = *next,
                many => {
                    let branches: Vec<StageName> = many
                        .iter()
                        .map(|r| match r {
                            NodeRef::Stage(s) => Ok(*s),
                            NodeRef::End => Err(GraphBuildError::MissingJoin(current)),
                        })
                        .collect::<Result<_, _>>()?;

                    // All branches must agree on a single join stage.
                    let mut join = None;
                    for branch in &branches {
                        if !visited.insert(*branch) {
                            return Err(GraphBuildError::Cycle);
                        }
                        match self.successors(*branch) {
                            [NodeRef::Stage(next)] => match join {
                                None => join = Some(*next),
                                Some(j) if j == *next => {}
                                Some(_) => return Err(GraphBuildError::MissingJoin(current)),
                            },
                            _ => return Err(GraphBuildError::MissingJoin(current)),
                        }
                    }
                    steps.push(Step::Parallel(branches));
                    current = join.ok_or(GraphBuildError::MissingJoin(current))?;
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct WorkflowGraphBuilder {
    nodes: HashSet<StageName>,
    edges: HashMap<StageName, Vec<NodeRef>>,
}

impl WorkflowGraphBuilder {
    pub fn add_node(mut self, node: StageName) -> Self {
        self.nodes.insert(node);
        self
    }

    pub fn add_edge(mut self, from: StageName, to: NodeRef) -> Self {
        self.edges.entry(from).or_default().push(to);
        self
    }

    pub fn build(self) -> Result<WorkflowGraph, GraphBuildError> {
        if self.nodes.is_empty() {
            return Err(GraphBuildError::NoEntryPoint);
        }
        for (from, targets) in &self.edges {
            if !self.nodes.contains(from) {
                return Err(GraphBuildError::UnknownNode(*from));
            }
            for target in targets {
                if let NodeRef::Stage(to) = target {
                    if !self.nodes.contains(to) {
                        return Err(GraphBuildError::UnknownNode(*to));
                    }
                }
            }
        }
        Ok(WorkflowGraph { nodes: self.nodes, edges: self.edges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_plan_with_discovery() {
        let graph = WorkflowGraph::standard();
        let plan = graph.plan(WorkflowGraph::entry_for(true)).unwrap();
        assert_eq!(
            plan,
            vec![
                Step::Stage(StageName::Discovery),
                Step::Stage(StageName::Research),
                Step::Parallel(vec![StageName::Extraction, StageName::Crawl]),
                Step::Stage(StageName::Analysis),
            ]
        );
    }

    #[test]
    fn standard_plan_without_discovery() {
        let graph = WorkflowGraph::standard();
        let plan = graph.plan(WorkflowGraph::entry_for(false)).unwrap();
        assert_eq!(plan[0], Step::Stage(StageName::Research));
        assert!(!plan.contains(&Step::Stage(StageName::Discovery)));
    }

    #[test]
    fn edge_to_undeclared_node_fails_the_build() {
        let result = WorkflowGraph::builder()
            .add_node(StageName::Research)
            .add_edge(StageName::Research, NodeRef::Stage(StageName::Analysis))
            .build();
        assert_eq!(result.unwrap_err(), GraphBuildError::UnknownNode(StageName::Analysis));
    }

    #[test]
    fn node_without_outgoing_edge_fails_the_plan() {
        let graph = WorkflowGraph::builder()
            .add_node(StageName::Research)
            .build()
            .unwrap();
        assert_eq!(
            graph.plan(StageName::Research).unwrap_err(),
            GraphBuildError::DeadEnd(StageName::Research)
        );
    }

    #[test]
    fn branches_without_a_common_join_fail_the_plan() {
        let graph = WorkflowGraph::builder()
            .add_node(StageName::Research)
            .add_node(StageName::Extraction)
            .add_node(StageName::Crawl)
            .add_node(StageName::Analysis)
            .add_edge(StageName::Research, NodeRef::Stage(StageName::Extraction))
            .add_edge(StageName::Research, NodeRef::Stage(StageName::Crawl))
            .add_edge(StageName::Extraction, NodeRef::Stage(StageName::Analysis))
            .add_edge(StageName::Crawl, NodeRef::End)
            .build()
            .unwrap();
        assert_eq!(
            graph.plan(StageName::Research).unwrap_err(),
            GraphBuildError::MissingJoin(StageName::Research)
        );
    }

    #[test]
    fn cycles_are_rejected() {
        let graph = WorkflowGraph::builder()
            .add_node(StageName::Research)
            .add_node(StageName::Analysis)
            .add_edge(StageName::Research, NodeRef::Stage(StageName::Analysis))
            .add_edge(StageName::Analysis, NodeRef::Stage(StageName::Research))
            .build()
            .unwrap();
        assert_eq!(graph.plan(StageName::Research).unwrap_err(), GraphBuildError::Cycle);
    }

    #[test]
    fn planning_from_an_undeclared_entry_fails() {
        let graph = WorkflowGraph::builder()
            .add_node(StageName::Research)
            .add_edge(StageName::Research, NodeRef::End)
            .build()
            .unwrap();
        assert_eq!(
            graph.plan(StageName::Discovery).unwrap_err(),
            GraphBuildError::UnknownNode(StageName::Discovery)
        );
    }
}
