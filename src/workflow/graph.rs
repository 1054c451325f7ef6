//! Workflow graphs: named async nodes joined by fixed or conditional edges.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::WorkflowError;

/// What a node asks the engine to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeResult<S> {
    /// Follow the node's outgoing edge with the new state.
    Continue(S),
    /// Freeze and hand `prompt` to the human. Re-entered with their answer.
    Suspend { prompt: String, state: S },
    /// Terminal.
    Done(S),
}

/// Where an edge leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Node(&'static str),
    End,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(name) => f.write_str(name),
            Self::End => f.write_str("END"),
        }
    }
}

pub type NodeFuture<S> = BoxFuture<'static, anyhow::Result<NodeResult<S>>>;
type NodeFn<S> = Arc<dyn Fn(S, Option<String>) -> NodeFuture<S> + Send + Sync>;
type RouterFn<S> = Arc<dyn Fn(&S) -> Result<Target, String> + Send + Sync>;

enum Edge<S> {
    Fixed(Target),
    Conditional {
        router: RouterFn<S>,
        targets: Vec<Target>,
    },
}

/// Builder for a [`Graph`]. Validation happens in [`GraphBuilder::compile`].
pub struct GraphBuilder<S> {
    entry: Option<&'static str>,
    nodes: HashMap<&'static str, NodeFn<S>>,
    edges: HashMap<&'static str, Edge<S>>,
    problems: Vec<String>,
}

impl<S: Send + 'static> GraphBuilder<S> {
    pub fn new() -> Self {
        Self {
            entry: None,
            nodes: HashMap::new(),
            edges: HashMap::new(),
            problems: Vec::new(),
        }
    }

    pub fn set_entry(mut self, node: &'static str) -> Self {
        self.entry = Some(node);
        self
    }

    /// Add a node. It receives the state by value and, when re-entered after a
    /// suspension, the human's answer.
    pub fn add_node<F, Fut>(mut self, name: &'static str, node: F) -> Self
    where
        F: Fn(S, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<NodeResult<S>>> + Send + 'static,
    {
        let node: NodeFn<S> = Arc::new(move |state, answer| node(state, answer).boxed());
        if self.nodes.insert(name, node).is_some() {
            self.problems.push(format!("node {name} added twice"));
        }
        self
    }

    pub fn add_edge(mut self, from: &'static str, to: Target) -> Self {
        self.insert_edge(from, Edge::Fixed(to));
        self
    }

    /// Route by inspecting the state. `targets` lists every node the router may name.
    pub fn add_conditional_edges<R>(mut self, from: &'static str, router: R, targets: &[Target]) -> Self
    where
        R: Fn(&S) -> Result<Target, String> + Send + Sync + 'static,
    {
        self.insert_edge(
            from,
            Edge::Conditional {
                router: Arc::new(router),
                targets: targets.to_vec(),
            },
        );
        self
    }

    fn insert_edge(&mut self, from: &'static str, edge: Edge<S>) {
        if self.edges.insert(from, edge).is_some() {
            self.problems.push(format!("node {from} has more than one outgoing edge"));
        }
    }

    /// Validate and freeze the graph.
    pub fn compile(self) -> Result<Graph<S>, WorkflowError> {
        let mut problems = self.problems;

        let entry = match self.entry {
            Some(entry) if self.nodes.contains_key(entry) => entry,
            Some(entry) => {
                problems.push(format!("entry node {entry} does not exist"));
                entry
            }
            None => {
                problems.push("no entry node".to_string());
                ""
            }
        };

        let mut names: Vec<&&'static str> = self.nodes.keys().collect();
        names.sort();
        for name in names {
            if !self.edges.contains_key(*name) {
                problems.push(format!("node {name} has no outgoing edge"));
            }
        }

        let mut sources: Vec<(&&'static str, &Edge<S>)> = self.edges.iter().collect();
        sources.sort_by_key(|(from, _)| **from);
        for (from, edge) in sources {
            if !self.nodes.contains_key(*from) {
                problems.push(format!("edge from unknown node {from}"));
            }
            let targets: &[Target] = match edge {
                Edge::Fixed(target) => std::slice::from_ref(target),
                Edge::Conditional { targets, .. } => targets,
            };
            if targets.is_empty() {
                problems.push(format!("router on {from} declares no targets"));
            }
            for target in targets {
                if let Target::Node(to) = target
                    && !self.nodes.contains_key(to)
                {
                    problems.push(format!("edge {from} -> {to} targets an unknown node"));
                }
            }
        }

        if !problems.is_empty() {
            return Err(WorkflowError::InvalidGraph(problems.join("; ")));
        }

        Ok(Graph {
            entry,
            nodes: self.nodes,
            edges: self.edges,
        })
    }
}

impl<S: Send + 'static> Default for GraphBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// A validated workflow graph.
pub struct Graph<S> {
    entry: &'static str,
    nodes: HashMap<&'static str, NodeFn<S>>,
    edges: HashMap<&'static str, Edge<S>>,
}

impl<S> Graph<S> {
    pub fn entry(&self) -> &'static str {
        self.entry
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains_key(node)
    }

    /// Run one node. Node failures are wrapped with the node name.
    pub async fn run_node(
        &self,
        node: &str,
        state: S,
        answer: Option<String>,
    ) -> Result<NodeResult<S>, WorkflowError> {
        let run = self.nodes.get(node).ok_or_else(|| WorkflowError::UnknownNode {
            node: node.to_string(),
        })?;
        run(state, answer).await.map_err(|e| WorkflowError::Node {
            node: node.to_string(),
            source: e.into(),
        })
    }

    /// Next hop after `from` continued with `state`.
    pub fn next(&self, from: &str, state: &S) -> Result<Target, WorkflowError> {
        match self.edges.get(from) {
            Some(Edge::Fixed(target)) => Ok(*target),
            Some(Edge::Conditional { router, targets }) => {
                let target = router(state).map_err(|detail| WorkflowError::Unroutable {
                    from: from.to_string(),
                    detail,
                })?;
                if targets.contains(&target) {
                    Ok(target)
                } else {
                    Err(WorkflowError::Unroutable {
                        from: from.to_string(),
                        detail: format!("router chose undeclared target {target}"),
                    })
                }
            }
            None => Err(WorkflowError::UnknownNode {
                node: from.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(state: u32, _answer: Option<String>) -> impl Future<Output = anyhow::Result<NodeResult<u32>>> {
        async move { Ok(NodeResult::Continue(state + 1)) }
    }

    #[test]
    fn compile_accepts_well_formed_graph() {
        let graph = GraphBuilder::new()
            .set_entry("a")
            .add_node("a", noop)
            .add_node("b", noop)
            .add_edge("a", Target::Node("b"))
            .add_edge("b", Target::End)
            .compile()
            .unwrap();
        assert_eq!(graph.entry(), "a");
        assert!(graph.contains("b"));
    }

    #[test]
    fn compile_rejects_missing_entry_and_dangling_edges() {
        let err = GraphBuilder::<u32>::new()
            .set_entry("missing")
            .add_node("a", noop)
            .add_edge("a", Target::Node("nowhere"))
            .compile()
            .err()
            .unwrap();
        let msg = err.to_string();
        assert!(msg.contains("entry node missing"));
        assert!(msg.contains("a -> nowhere"));
    }

    #[test]
    fn compile_rejects_node_without_edge() {
        let err = GraphBuilder::new()
            .set_entry("a")
            .add_node("a", noop)
            .compile()
            .err()
            .unwrap();
        assert!(err.to_string().contains("no outgoing edge"));
    }

    #[test]
    fn router_must_pick_a_declared_target() {
        let graph = GraphBuilder::new()
            .set_entry("a")
            .add_node("a", noop)
            .add_node("b", noop)
            .add_conditional_edges(
                "a",
                |n: &u32| match n {
                    0 => Ok(Target::Node("b")),
                    1 => Ok(Target::End),
                    other => Err(format!("no route for {other}")),
                },
                &[Target::Node("b")],
            )
            .add_edge("b", Target::End)
            .compile()
            .unwrap();

        assert_eq!(graph.next("a", &0).unwrap(), Target::Node("b"));
        assert!(matches!(graph.next("a", &1), Err(WorkflowError::Unroutable { .. })));
        assert!(matches!(graph.next("a", &7), Err(WorkflowError::Unroutable { .. })));
    }

    #[tokio::test]
    async fn node_errors_carry_the_node_name() {
        let graph = GraphBuilder::new()
            .set_entry("boom")
            .add_node("boom", |_s: u32, _a| async { Err::<NodeResult<u32>, _>(anyhow::anyhow!("kaput")) })
            .add_edge("boom", Target::End)
            .compile()
            .unwrap();

        let err = graph.run_node("boom", 0, None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Node { ref node, .. } if node == "boom"));
        assert!(err.to_string().contains("kaput"));
    }
}
