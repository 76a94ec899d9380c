//! The dependency graph behind every [`Workflow`](crate::Workflow).
//!
//! A [`Dag`] is built once from a list of [`Dependency`] nodes and never
//! changes afterwards. Building it resolves every declared input task to the
//! node that produces it, rejects inconsistent graphs and computes the
//! execution order that every run reuses.
//!
//! ## Ordering
//!
//! The order comes from Kahn's algorithm with a FIFO ready queue. The queue is
//! seeded with the source nodes in the order they were supplied, and a node
//! becomes ready when its last input has been placed. Successors are visited
//! in edge insertion order, so the same dependency list always linearizes the
//! same way.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write;

use petgraph::dot::{Config, Dot};
use petgraph::graph::NodeIndex;
use serde::Serialize;

use crate::dependency::Dependency;
use crate::error::GraphError;
use crate::task::Handle;

/// Validated, immutable dependency graph with a precomputed execution order.
pub struct Dag {
    /// Nodes are added in supplied order, edge weights hold the input slot.
    graph: petgraph::Graph<Dependency, usize>,
    by_dependency: HashMap<Dependency, NodeIndex>,
    /// Resolved input nodes of every node, in declaration order.
    inputs: Vec<Vec<NodeIndex>>,
    /// Nodes consuming the output of every node, in edge insertion order.
    successors: Vec<Vec<NodeIndex>>,
    order: Vec<NodeIndex>,
    ordered: Vec<Dependency>,
    position: Vec<usize>,
    labels: Vec<String>,
}

impl Dag {
    /// Validates `dependencies` and computes their execution order.
    ///
    /// `labels` optionally overrides the display label of a task, it only
    /// affects error messages and exports.
    pub fn build(
        dependencies: impl IntoIterator<Item = Dependency>,
        labels: &HashMap<Handle, String>,
    ) -> Result<Self, GraphError> {
        let mut graph = petgraph::Graph::new();
        let mut by_task: HashMap<Handle, NodeIndex> = HashMap::new();
        let mut by_dependency = HashMap::new();
        let mut node_labels: Vec<String> = Vec::new();

        for dependency in dependencies {
            let label = match labels.get(dependency.task()) {
                Some(label) => label.clone(),
                None => dependency.label().into_owned(),
            };

            if let Some(&first) = by_task.get(dependency.task()) {
                return Err(GraphError::Duplicate {
                    task: task_label(dependency.task(), labels),
                    first: node_labels[first.index()].clone(),
                    second: label,
                });
            }

            let index = graph.add_node(dependency.clone());
            by_task.insert(dependency.task().clone(), index);
            by_dependency.insert(dependency, index);
            node_labels.push(label);
        }

        let mut inputs = Vec::with_capacity(graph.node_count());

        for index in graph.node_indices() {
            let dependency = graph[index].clone();
            let mut resolved = Vec::with_capacity(dependency.inputs().len());

            for (slot, input) in dependency.inputs().iter().enumerate() {
                let source = by_task
                    .get(input)
                    .copied()
                    .ok_or_else(|| GraphError::Dangling {
                        dependency: node_labels[index.index()].clone(),
                        input: task_label(input, labels),
                    })?;

                graph.add_edge(source, index, slot);
                resolved.push(source);
            }

            inputs.push(resolved);
        }

        // Build a map from a dependency to the nodes that depend on it.
        let mut successors = vec![Vec::new(); graph.node_count()];
        for edge in graph.raw_edges() {
            successors[edge.source().index()].push(edge.target());
        }

        let order = stable_toposort(&inputs, &successors).map_err(|remaining| {
            GraphError::Cycle {
                remaining: remaining
                    .into_iter()
                    .map(|index| node_labels[index.index()].clone())
                    .collect(),
            }
        })?;

        let mut position = vec![0; order.len()];
        for (i, index) in order.iter().enumerate() {
            position[index.index()] = i;
        }

        let ordered = order.iter().map(|&index| graph[index].clone()).collect();

        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "dependency graph validated"
        );

        Ok(Self {
            graph,
            by_dependency,
            inputs,
            successors,
            order,
            ordered,
            position,
            labels: node_labels,
        })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Dependencies in execution order.
    pub fn ordered(&self) -> &[Dependency] {
        &self.ordered
    }

    /// The number of declared inputs of every node, in supplied order.
    pub fn indegrees(&self) -> impl Iterator<Item = (&Dependency, usize)> {
        self.graph
            .node_indices()
            .map(|index| (&self.graph[index], self.inputs[index.index()].len()))
    }

    pub fn indegree(&self, dependency: &Dependency) -> Option<usize> {
        self.index_of(dependency)
            .map(|index| self.inputs[index.index()].len())
    }

    /// Position of `dependency` in the execution order.
    pub fn position(&self, dependency: &Dependency) -> Option<usize> {
        self.index_of(dependency)
            .map(|index| self.position[index.index()])
    }

    /// Nodes that consume the output of `dependency`.
    pub fn successors(&self, dependency: &Dependency) -> Option<Vec<&Dependency>> {
        self.index_of(dependency).map(|index| {
            self.successors[index.index()]
                .iter()
                .map(|&next| &self.graph[next])
                .collect()
        })
    }

    /// Nodes without inputs, in execution order.
    pub fn sources(&self) -> impl Iterator<Item = &Dependency> {
        self.order
            .iter()
            .filter(|index| self.inputs[index.index()].is_empty())
            .map(|&index| &self.graph[index])
    }

    /// Nodes whose output no other node consumes, in execution order.
    pub fn sinks(&self) -> impl Iterator<Item = &Dependency> {
        self.order
            .iter()
            .filter(|&&index| self.is_sink(index))
            .map(|&index| &self.graph[index])
    }

    /// Display label of `dependency`.
    pub fn label(&self, dependency: &Dependency) -> Option<&str> {
        self.index_of(dependency)
            .map(|index| self.labels[index.index()].as_str())
    }

    fn index_of(&self, dependency: &Dependency) -> Option<NodeIndex> {
        self.by_dependency.get(dependency).copied()
    }

    pub(crate) fn order_indices(&self) -> &[NodeIndex] {
        &self.order
    }

    pub(crate) fn node(&self, index: NodeIndex) -> &Dependency {
        &self.graph[index]
    }

    pub(crate) fn inputs_of(&self, index: NodeIndex) -> &[NodeIndex] {
        &self.inputs[index.index()]
    }

    pub(crate) fn successors_of(&self, index: NodeIndex) -> &[NodeIndex] {
        &self.successors[index.index()]
    }

    pub(crate) fn position_of(&self, index: NodeIndex) -> usize {
        self.position[index.index()]
    }

    pub(crate) fn label_of(&self, index: NodeIndex) -> &str {
        &self.labels[index.index()]
    }

    pub(crate) fn is_sink(&self, index: NodeIndex) -> bool {
        self.successors[index.index()].is_empty()
    }

    /// Describes the graph as plain nodes and edges for external tools.
    pub fn export(&self) -> GraphExport {
        let nodes = self
            .graph
            .node_indices()
            .map(|index| {
                let dependency = &self.graph[index];
                ExportNode {
                    id: index.index(),
                    label: self.labels[index.index()].clone(),
                    task: dependency.task().name().into_owned(),
                    output_type: dependency.task().task().output_type_name(),
                    indegree: self.inputs[index.index()].len(),
                    position: self.position[index.index()],
                    sink: self.is_sink(index),
                }
            })
            .collect();

        let edges = self
            .graph
            .raw_edges()
            .iter()
            .map(|edge| ExportEdge {
                source: edge.source().index(),
                target: edge.target().index(),
                slot: edge.weight,
            })
            .collect();

        GraphExport { nodes, edges }
    }

    /// Renders the graph in the Graphviz DOT language.
    pub fn to_dot(&self) -> String {
        let graph = self
            .graph
            .map(|index, _| self.labels[index.index()].as_str(), |_, _| "");

        format!("{}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
    }

    /// Renders the graph as a Mermaid flowchart, sinks are linked to a shared
    /// `Output` node.
    pub fn to_mermaid(&self) -> String {
        let mut f = String::new();
        self.write_mermaid(&mut f, |_| None)
            .map(|_| f)
            .unwrap_or_default()
    }

    /// Shared Mermaid writer, `extra` may append a second line and a fill
    /// colour to every node.
    pub(crate) fn write_mermaid(
        &self,
        f: &mut String,
        extra: impl Fn(NodeIndex) -> Option<(String, String)>,
    ) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for &index in &self.order {
            let name = self.labels[index.index()].replace('"', "\\\"");

            match extra(index) {
                Some((label, color)) => {
                    writeln!(f, "    {}[\"{}\\n{}\"]", index.index(), name, label)?;
                    writeln!(f, "    style {} fill:{}", index.index(), color)?;
                }
                None => writeln!(f, "    {}[\"{}\"]", index.index(), name)?,
            }

            if self.is_sink(index) {
                writeln!(f, "    {} --> Output", index.index())?;
            }
        }

        writeln!(f, "    Output[Output]")?;

        for edge in self.graph.raw_edges() {
            let type_name = self.graph[edge.source()]
                .task()
                .task()
                .output_type_name()
                .replace('<', "&lt;")
                .replace('>', "&gt;");

            writeln!(
                f,
                "    {} -- \"{}\" --> {}",
                edge.source().index(),
                type_name,
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for Dag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dag")
            .field("order", &self.order.iter().map(|i| self.label_of(*i)).collect::<Vec<_>>())
            .finish()
    }
}

/// Kahn's algorithm with a FIFO queue. On failure returns the nodes that were
/// never placed, in supplied order.
fn stable_toposort(
    inputs: &[Vec<NodeIndex>],
    successors: &[Vec<NodeIndex>],
) -> Result<Vec<NodeIndex>, Vec<NodeIndex>> {
    let mut remaining: Vec<usize> = inputs.iter().map(Vec::len).collect();
    let mut order = Vec::with_capacity(inputs.len());

    let mut queue: VecDeque<NodeIndex> = remaining
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(i, _)| NodeIndex::new(i))
        .collect();

    while let Some(index) = queue.pop_front() {
        order.push(index);

        for &next in &successors[index.index()] {
            remaining[next.index()] -= 1;
            if remaining[next.index()] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() == inputs.len() {
        Ok(order)
    } else {
        Err(remaining
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(i, _)| NodeIndex::new(i))
            .collect())
    }
}

fn task_label(task: &Handle, labels: &HashMap<Handle, String>) -> String {
    match labels.get(task) {
        Some(label) => label.clone(),
        None => task.name().into_owned(),
    }
}

/// Generic description of a workflow graph, serializable with `serde`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphExport {
    pub nodes: Vec<ExportNode>,
    pub edges: Vec<ExportEdge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportNode {
    /// Index of the node in supplied order.
    pub id: usize,
    pub label: String,
    pub task: String,
    pub output_type: &'static str,
    pub indegree: usize,
    /// Index of the node in execution order.
    pub position: usize,
    pub sink: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportEdge {
    pub source: usize,
    pub target: usize,
    /// Positional slot of the input on the target node.
    pub slot: usize,
}

#[cfg(test)]
mod tests {
    use proptest::collection::vec;
    use proptest::prelude::*;
    use proptest::sample::Index;

    use super::*;
    use crate::task::{self, Handle};

    fn unit(name: &'static str) -> Handle {
        task::from_fn(name, |_, _| Ok(()))
    }

    fn build(dependencies: &[Dependency]) -> Result<Dag, GraphError> {
        Dag::build(dependencies.iter().cloned(), &HashMap::new())
    }

    fn labels(dag: &Dag) -> Vec<String> {
        dag.ordered()
            .iter()
            .map(|dep| dag.label(dep).unwrap().to_string())
            .collect()
    }

    #[test]
    fn order_follows_supplied_order_for_ties() {
        let (a, b, c, d) = (unit("a"), unit("b"), unit("c"), unit("d"));

        let deps = [
            Dependency::new(&d, [&b, &c]),
            Dependency::source(&c),
            Dependency::new(&b, [&a]),
            Dependency::source(&a),
        ];

        let dag = build(&deps).unwrap();
        assert_eq!(labels(&dag), vec!["c", "a", "b", "d"]);
        assert_eq!(dag.sources().collect::<Vec<_>>(), vec![&deps[1], &deps[3]]);
    }

    #[test]
    fn order_is_deterministic() {
        let tasks: Vec<_> = (0..6).map(|_| unit("n")).collect();
        let deps = [
            Dependency::source(&tasks[0]),
            Dependency::source(&tasks[1]),
            Dependency::new(&tasks[2], [&tasks[0]]),
            Dependency::new(&tasks[3], [&tasks[1], &tasks[0]]),
            Dependency::new(&tasks[4], [&tasks[2], &tasks[3]]),
            Dependency::new(&tasks[5], [&tasks[2]]),
        ];

        let first = build(&deps).unwrap();
        let second = build(&deps).unwrap();
        assert_eq!(first.ordered(), second.ordered());
    }

    #[test]
    fn successors_become_ready_in_first_seen_order() {
        let (root, x, y, z) = (unit("root"), unit("x"), unit("y"), unit("z"));

        let deps = [
            Dependency::new(&z, [&root]),
            Dependency::new(&x, [&root]),
            Dependency::source(&root),
            Dependency::new(&y, [&root]),
        ];

        let dag = build(&deps).unwrap();
        assert_eq!(labels(&dag), vec!["root", "z", "x", "y"]);
    }

    #[test]
    fn indegree_counts_declared_inputs() {
        let (a, b) = (unit("a"), unit("b"));
        let deps = [
            Dependency::source(&a),
            Dependency::new(&b, [&a, &a]),
        ];

        let dag = build(&deps).unwrap();
        assert_eq!(dag.indegree(&deps[0]), Some(0));
        assert_eq!(dag.indegree(&deps[1]), Some(2));
        assert_eq!(dag.successors(&deps[0]).unwrap().len(), 2);
        assert_eq!(dag.sinks().collect::<Vec<_>>(), vec![&deps[1]]);
        assert_eq!(dag.sources().collect::<Vec<_>>(), vec![&deps[0]]);
    }

    #[test]
    fn rejects_two_node_cycle() {
        let (x, y) = (unit("x"), unit("y"));
        let deps = [Dependency::new(&x, [&y]), Dependency::new(&y, [&x])];

        assert_eq!(
            build(&deps).unwrap_err(),
            GraphError::Cycle {
                remaining: vec!["x".into(), "y".into()]
            }
        );
    }

    #[test]
    fn rejects_self_loop_and_reports_blocked_descendants() {
        let (a, b, c) = (unit("a"), unit("b"), unit("c"));
        let deps = [
            Dependency::source(&a),
            Dependency::new(&b, [&a, &b]),
            Dependency::new(&c, [&b]),
        ];

        assert_eq!(
            build(&deps).unwrap_err(),
            GraphError::Cycle {
                remaining: vec!["b".into(), "c".into()]
            }
        );
    }

    #[test]
    fn rejects_dangling_input() {
        let (a, ghost) = (unit("a"), unit("ghost"));
        let deps = [Dependency::new(&a, [&ghost]).named("consumer")];

        assert_eq!(
            build(&deps).unwrap_err(),
            GraphError::Dangling {
                dependency: "consumer".into(),
                input: "ghost".into(),
            }
        );
    }

    #[test]
    fn rejects_duplicate_transform() {
        let a = unit("a");
        let deps = [
            Dependency::source(&a).named("first"),
            Dependency::source(&a).named("second"),
        ];

        assert_eq!(
            build(&deps).unwrap_err(),
            GraphError::Duplicate {
                task: "a".into(),
                first: "first".into(),
                second: "second".into(),
            }
        );
    }

    #[test]
    fn explicit_labels_override_names() {
        let (a, ghost) = (unit("a"), unit("ghost"));
        let mut names = HashMap::new();
        names.insert(ghost.clone(), "missing input".to_string());
        names.insert(a.clone(), "reader".to_string());

        let err = Dag::build([Dependency::new(&a, [&ghost])], &names).unwrap_err();
        assert_eq!(
            err,
            GraphError::Dangling {
                dependency: "reader".into(),
                input: "missing input".into(),
            }
        );
    }

    #[test]
    fn export_lists_nodes_and_slots() {
        let (a, b, c) = (unit("a"), unit("b"), unit("c"));
        let deps = [
            Dependency::new(&c, [&b, &a]),
            Dependency::source(&a),
            Dependency::source(&b),
        ];

        let export = build(&deps).unwrap().export();

        assert_eq!(export.nodes.len(), 3);
        assert_eq!(export.nodes[0].label, "c");
        assert_eq!(export.nodes[0].position, 2);
        assert!(export.nodes[0].sink);
        assert_eq!(export.nodes[0].output_type, "()");
        assert_eq!(
            export.edges,
            vec![
                ExportEdge { source: 2, target: 0, slot: 0 },
                ExportEdge { source: 1, target: 0, slot: 1 },
            ]
        );

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["nodes"][1]["label"], "a");
    }

    #[test]
    fn renders_text_formats() {
        let (a, b) = (unit("a"), unit("b"));
        let dag = build(&[Dependency::source(&a), Dependency::new(&b, [&a])]).unwrap();

        let mermaid = dag.to_mermaid();
        assert!(mermaid.starts_with("graph LR\n"));
        assert!(mermaid.contains("    1[\"b\"]"));
        assert!(mermaid.contains("    1 --> Output"));
        assert!(mermaid.contains("    0 -- \"()\" --> 1"));

        let dot = dag.to_dot();
        assert!(dot.contains("digraph"));
        assert!(dot.contains("\"a\""));
    }

    proptest::proptest! {
        #[test]
        fn prop_order_is_sound_and_stable(
            (picks, supply) in (1usize..16).prop_flat_map(|n| (
                vec(vec(any::<Index>(), 0..4), n),
                Just((0..n).collect::<Vec<usize>>()).prop_shuffle(),
            ))
        ) {
            let tasks: Vec<Handle> = (0..picks.len()).map(|_| unit("n")).collect();

            // Node `i` only takes inputs from nodes created before it.
            let deps: Vec<Dependency> = picks
                .iter()
                .enumerate()
                .map(|(i, picks)| {
                    let inputs: Vec<&Handle> = match i {
                        0 => Vec::new(),
                        _ => picks.iter().map(|pick| &tasks[pick.index(i)]).collect(),
                    };
                    Dependency::new(&tasks[i], inputs)
                })
                .collect();

            let supplied: Vec<Dependency> = supply.iter().map(|&i| deps[i].clone()).collect();
            let dag = build(&supplied).unwrap();

            prop_assert_eq!(dag.ordered().len(), deps.len());
            for (i, picks) in picks.iter().enumerate().skip(1) {
                for pick in picks {
                    let input = &deps[pick.index(i)];
                    prop_assert!(dag.position(input) < dag.position(&deps[i]));
                }
            }

            let again = build(&supplied).unwrap();
            prop_assert_eq!(dag.ordered(), again.ordered());
        }
    }

    #[test]
    fn empty_graph_is_valid() {
        let dag = build(&[]).unwrap();
        assert!(dag.is_empty());
        assert!(dag.ordered().is_empty());
    }
}
