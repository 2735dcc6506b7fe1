//! A labeled directed graph keyed by node identity strings, with
//! subgraph-pattern matching and iterative rewriting.
//!
//! Node payloads are cheap to clone; the graph owns one payload per identity
//! and two adjacency maps.  Rewrite passes repeatedly match a small pattern
//! graph against the host graph and replace the matched region, collapsing
//! chains of toolchain processes into semantic step nodes.

use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

/// Implemented by graph node payloads.
pub trait GraphNode {
    /// Stable identity; the graph stores at most one node per identity.
    fn id(&self) -> String;

    /// Attributes for dot output, e.g. `shape=box,label="foo.c"`.
    fn dot_attributes(&self) -> String {
        format!("label=\"{}\"", self.id())
    }
}

/// Implemented by the nodes of a pattern graph matched against a host graph
/// holding `N` payloads.
pub trait PatternNode<N>: GraphNode {
    fn matches(&self, candidate: &N) -> bool;

    /// When set, a candidate only matches if its incoming neighbour count in
    /// the host graph equals this node's incoming count in the pattern.
    fn exact_incoming_count(&self) -> bool;
    fn exact_outgoing_count(&self) -> bool;
}

/// A binding from pattern node ids to host nodes.
pub type SubgraphMatch<N> = BTreeMap<String, N>;

#[derive(Debug, Clone)]
pub struct Graph<N> {
    nodes: BTreeMap<String, N>,
    edges: BTreeSet<(String, String)>,
    incoming_edges: BTreeMap<String, BTreeSet<String>>,
    outgoing_edges: BTreeMap<String, BTreeSet<String>>,
}

impl<N> Default for Graph<N> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: BTreeSet::new(),
            incoming_edges: BTreeMap::new(),
            outgoing_edges: BTreeMap::new(),
        }
    }
}

impl<N: GraphNode + Clone> Graph<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the node, replacing any existing payload with the same id.
    pub fn add_node(&mut self, node: N) {
        self.nodes.insert(node.id(), node);
    }

    /// Adds an edge, inserting endpoints that aren't in the graph yet.
    /// Existing endpoint payloads are kept.
    pub fn add_edge(&mut self, from: &N, to: &N) {
        if !self.has_node(from) {
            self.add_node(from.clone());
        }
        if !self.has_node(to) {
            self.add_node(to.clone());
        }
        self.add_edge_by_id(&from.id(), &to.id());
    }

    /// Adds an edge between two existing nodes.
    pub fn add_edge_by_id(&mut self, from: &str, to: &str) {
        assert!(self.has_node_id(from), "no such node: {}", from);
        assert!(self.has_node_id(to), "no such node: {}", to);

        self.edges.insert((from.to_string(), to.to_string()));
        self.outgoing_edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.incoming_edges
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());
    }

    pub fn remove_edge(&mut self, from: &N, to: &N) {
        self.remove_edge_by_id(&from.id(), &to.id());
    }

    pub fn remove_edge_by_id(&mut self, from: &str, to: &str) {
        self.edges.remove(&(from.to_string(), to.to_string()));
        if let Some(set) = self.outgoing_edges.get_mut(from) {
            set.remove(to);
        }
        if let Some(set) = self.incoming_edges.get_mut(to) {
            set.remove(from);
        }
    }

    /// Removes the node and detaches all its edges.
    pub fn remove_node(&mut self, node: &N) {
        let id = node.id();
        self.nodes.remove(&id);
        for neighbour in self.incoming_edges.remove(&id).unwrap_or_default() {
            self.edges.remove(&(neighbour.clone(), id.clone()));
            if let Some(set) = self.outgoing_edges.get_mut(&neighbour) {
                set.remove(&id);
            }
        }
        for neighbour in self.outgoing_edges.remove(&id).unwrap_or_default() {
            self.edges.remove(&(id.clone(), neighbour.clone()));
            if let Some(set) = self.incoming_edges.get_mut(&neighbour) {
                set.remove(&id);
            }
        }
    }

    /// Adds all the nodes and an edge from each node to the next.
    pub fn add_chain(&mut self, nodes: &[N]) {
        let mut last_id: Option<String> = None;
        for node in nodes {
            if !self.has_node(node) {
                self.add_node(node.clone());
            }
            if let Some(last) = &last_id {
                self.add_edge_by_id(last, &node.id());
            }
            last_id = Some(node.id());
        }
    }

    pub fn has_node(&self, node: &N) -> bool {
        self.has_node_id(&node.id())
    }

    pub fn has_node_id(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_by_id(&self, id: &str) -> Option<&N> {
        self.nodes.get(id)
    }

    pub fn all_nodes(&self) -> Vec<N> {
        self.nodes.values().cloned().collect()
    }

    pub fn all_edges(&self) -> Vec<(String, String)> {
        self.edges.iter().cloned().collect()
    }

    fn neighbours(&self, id: &str, direction: &BTreeMap<String, BTreeSet<String>>) -> Vec<N> {
        match direction.get(id) {
            Some(ids) => ids.iter().map(|id| self.nodes[id].clone()).collect(),
            None => Vec::new(),
        }
    }

    pub fn incoming(&self, node: &N) -> Vec<N> {
        self.neighbours(&node.id(), &self.incoming_edges)
    }

    pub fn outgoing(&self, node: &N) -> Vec<N> {
        self.neighbours(&node.id(), &self.outgoing_edges)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Removes all the given nodes and replaces them with one node.  Edges
    /// crossing the boundary are reconnected to the replacement; edges
    /// between removed nodes disappear.
    pub fn replace_subgraph(&mut self, nodes: &[N], replacement: &N) {
        let mut removing = BTreeSet::new();
        let mut incoming = BTreeSet::new();
        let mut outgoing = BTreeSet::new();

        for node in nodes {
            let id = node.id();
            removing.insert(id.clone());
            self.nodes.remove(&id);

            for neighbour in self.incoming_edges.remove(&id).unwrap_or_default() {
                self.edges.remove(&(neighbour.clone(), id.clone()));
                if let Some(set) = self.outgoing_edges.get_mut(&neighbour) {
                    set.remove(&id);
                }
                incoming.insert(neighbour);
            }
            for neighbour in self.outgoing_edges.remove(&id).unwrap_or_default() {
                self.edges.remove(&(id.clone(), neighbour.clone()));
                if let Some(set) = self.incoming_edges.get_mut(&neighbour) {
                    set.remove(&id);
                }
                outgoing.insert(neighbour);
            }
        }

        self.add_node(replacement.clone());
        let replacement_id = replacement.id();
        for neighbour in incoming {
            if !removing.contains(&neighbour) {
                self.add_edge_by_id(&neighbour, &replacement_id);
            }
        }
        for neighbour in outgoing {
            if !removing.contains(&neighbour) {
                self.add_edge_by_id(&replacement_id, &neighbour);
            }
        }
    }

    fn match_neighbours<P: PatternNode<N> + Clone>(
        &self,
        neighbours: &[N],
        pattern: &Graph<P>,
        pattern_neighbours: &[P],
        expects_exact_count: bool,
        binding: &mut SubgraphMatch<N>,
    ) -> bool {
        if expects_exact_count && neighbours.len() != pattern_neighbours.len() {
            return false;
        }

        for pattern_neighbour in pattern_neighbours {
            if binding.contains_key(&pattern_neighbour.id()) {
                continue;
            }

            let mut found = false;
            for neighbour in neighbours {
                if self.match_recursive(neighbour, pattern, pattern_neighbour, binding) {
                    found = true;
                    break;
                }
            }
            if !found {
                return false;
            }
        }
        true
    }

    fn match_recursive<P: PatternNode<N> + Clone>(
        &self,
        node: &N,
        pattern: &Graph<P>,
        pattern_node: &P,
        binding: &mut SubgraphMatch<N>,
    ) -> bool {
        if !pattern_node.matches(node) {
            return false;
        }

        let mut child_binding = binding.clone();
        child_binding.insert(pattern_node.id(), node.clone());

        if !self.match_neighbours(
            &self.incoming(node),
            pattern,
            &pattern.incoming(pattern_node),
            pattern_node.exact_incoming_count(),
            &mut child_binding,
        ) {
            return false;
        }
        if !self.match_neighbours(
            &self.outgoing(node),
            pattern,
            &pattern.outgoing(pattern_node),
            pattern_node.exact_outgoing_count(),
            &mut child_binding,
        ) {
            return false;
        }

        *binding = child_binding;
        true
    }

    /// Tries to place the connected pattern graph over every position in this
    /// graph.  Returns one binding per anchor position where every pattern
    /// node matched a distinct host node.
    pub fn find_subgraph_matches<P: PatternNode<N> + Clone>(
        &self,
        pattern: &Graph<P>,
    ) -> Vec<SubgraphMatch<N>> {
        let mut ret = Vec::new();
        let anchor = match pattern.nodes.values().next() {
            Some(node) => node,
            None => {
                tracing::warn!("empty pattern graph");
                return ret;
            }
        };

        for node in self.nodes.values() {
            let mut binding = SubgraphMatch::new();
            if self.match_recursive(node, pattern, anchor, &mut binding) {
                ret.push(binding);
            }
        }
        ret
    }

    /// Repeatedly finds matches and hands each to `replace_fn`, which must
    /// change the graph so the match no longer applies.  Stops when a sweep
    /// finds nothing; errors out if 100 sweeps fail to converge.
    pub fn find_and_replace_subgraph<P, F>(&mut self, pattern: &Graph<P>, mut replace_fn: F) -> Result<()>
    where
        P: PatternNode<N> + Clone,
        F: FnMut(&mut Self, &SubgraphMatch<N>),
    {
        for _ in 0..100 {
            let matches = self.find_subgraph_matches(pattern);
            if matches.is_empty() {
                return Ok(());
            }

            for binding in &matches {
                // An earlier replacement in this sweep may have consumed some
                // of this match's nodes; skip stale bindings.
                if binding.values().all(|node| self.has_node(node)) {
                    replace_fn(self, binding);
                }
            }
        }
        bail!("subgraph replacement failed to converge after 100 sweeps - the replace_fn isn't removing its matches");
    }

    /// Writes a dot representation of the graph.
    pub fn write_dot(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "digraph {{")?;
        for node in self.nodes.values() {
            writeln!(out, "  \"{}\" [{}];", node.id(), node.dot_attributes())?;
        }
        for (from, to) in &self.edges {
            writeln!(out, "  \"{}\" -> \"{}\";", from, to)?;
        }
        writeln!(out, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct TestNode(String);

    impl GraphNode for TestNode {
        fn id(&self) -> String {
            self.0.clone()
        }
    }

    #[derive(Debug, Clone)]
    struct TestPattern {
        id: String,
        /// Matches host nodes whose id starts with this prefix.
        prefix: String,
        exact_incoming: bool,
        exact_outgoing: bool,
    }

    impl GraphNode for TestPattern {
        fn id(&self) -> String {
            self.id.clone()
        }
    }

    impl PatternNode<TestNode> for TestPattern {
        fn matches(&self, candidate: &TestNode) -> bool {
            candidate.0.starts_with(&self.prefix)
        }
        fn exact_incoming_count(&self) -> bool {
            self.exact_incoming
        }
        fn exact_outgoing_count(&self) -> bool {
            self.exact_outgoing
        }
    }

    fn node(id: &str) -> TestNode {
        TestNode(id.to_string())
    }

    fn pattern(id: &str, prefix: &str, exact_in: bool, exact_out: bool) -> TestPattern {
        TestPattern {
            id: id.to_string(),
            prefix: prefix.to_string(),
            exact_incoming: exact_in,
            exact_outgoing: exact_out,
        }
    }

    #[test]
    fn test_add_and_remove() {
        let mut g = Graph::new();
        g.add_edge(&node("a"), &node("b"));
        g.add_edge(&node("b"), &node("c"));
        assert_eq!(g.len(), 3);
        assert_eq!(g.outgoing(&node("b")), vec![node("c")]);
        assert_eq!(g.incoming(&node("b")), vec![node("a")]);

        g.remove_node(&node("b"));
        assert_eq!(g.len(), 2);
        assert!(g.outgoing(&node("a")).is_empty());
        assert!(g.incoming(&node("c")).is_empty());
        assert!(g.all_edges().is_empty());
    }

    #[test]
    fn test_add_chain() {
        let mut g = Graph::new();
        g.add_chain(&[node("a"), node("b"), node("c")]);
        assert_eq!(
            g.all_edges(),
            vec![
                ("a".to_string(), "b".to_string()),
                ("b".to_string(), "c".to_string())
            ]
        );
    }

    #[test]
    fn test_add_edge_keeps_existing_payload() {
        #[derive(Debug, Clone)]
        struct Payload(String, u32);
        impl GraphNode for Payload {
            fn id(&self) -> String {
                self.0.clone()
            }
        }

        let mut g = Graph::new();
        g.add_node(Payload("a".into(), 1));
        g.add_edge(&Payload("a".into(), 2), &Payload("b".into(), 3));
        assert_eq!(g.node_by_id("a").unwrap().1, 1);
    }

    #[test]
    fn test_replace_subgraph_preserves_external_edges() {
        let mut g = Graph::new();
        g.add_chain(&[node("in"), node("x"), node("y"), node("out")]);

        g.replace_subgraph(&[node("x"), node("y")], &node("step"));

        assert_eq!(g.len(), 3);
        assert_eq!(g.outgoing(&node("in")), vec![node("step")]);
        assert_eq!(g.outgoing(&node("step")), vec![node("out")]);
        assert!(!g.has_node(&node("x")));
        assert!(!g.has_node(&node("y")));
    }

    #[test]
    fn test_find_subgraph_matches_simple_chain() {
        let mut g = Graph::new();
        g.add_chain(&[node("src1"), node("proc1"), node("obj1")]);
        g.add_chain(&[node("src2"), node("proc2"), node("obj2")]);

        let mut p = Graph::new();
        p.add_chain(&[
            pattern("s", "src", false, false),
            pattern("p", "proc", true, true),
            pattern("o", "obj", false, false),
        ]);

        let matches = g.find_subgraph_matches(&p);
        assert_eq!(matches.len(), 2);
        for binding in &matches {
            let src = &binding["s"].0;
            let proc = &binding["p"].0;
            let obj = &binding["o"].0;
            assert_eq!(src.trim_start_matches("src"), proc.trim_start_matches("proc"));
            assert_eq!(src.trim_start_matches("src"), obj.trim_start_matches("obj"));
        }
    }

    #[test]
    fn test_exact_count_rejects_extra_neighbours() {
        let mut g = Graph::new();
        g.add_chain(&[node("src1"), node("proc1"), node("obj1")]);
        // A second input breaks the exact incoming count on proc1.
        g.add_edge(&node("src9"), &node("proc1"));

        let mut p = Graph::new();
        p.add_chain(&[
            pattern("s", "src", false, false),
            pattern("p", "proc", true, true),
            pattern("o", "obj", false, false),
        ]);

        assert!(g.find_subgraph_matches(&p).is_empty());
    }

    #[test]
    fn test_find_and_replace_converges() {
        let mut g = Graph::new();
        g.add_chain(&[node("src1"), node("proc1"), node("obj1")]);
        g.add_chain(&[node("src2"), node("proc2"), node("obj2")]);

        let mut p = Graph::new();
        p.add_node(pattern("p", "proc", false, false));

        g.find_and_replace_subgraph(&p, |g, binding| {
            let matched = binding["p"].clone();
            let replacement = node(&format!("step{}", matched.0.trim_start_matches("proc")));
            g.replace_subgraph(std::slice::from_ref(&matched), &replacement);
        })
        .unwrap();

        assert!(g.has_node(&node("step1")));
        assert!(g.has_node(&node("step2")));
        assert_eq!(g.outgoing(&node("src1")), vec![node("step1")]);
    }

    #[test]
    fn test_find_and_replace_aborts_without_progress() {
        let mut g = Graph::new();
        g.add_node(node("proc1"));

        let mut p = Graph::new();
        p.add_node(pattern("p", "proc", false, false));

        let result = g.find_and_replace_subgraph(&p, |_, _| {
            // Deliberately leaves the graph unchanged.
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_write_dot() {
        let mut g = Graph::new();
        g.add_edge(&node("a"), &node("b"));
        let mut out = Vec::new();
        g.write_dot(&mut out).unwrap();
        let dot = String::from_utf8(out).unwrap();
        assert!(dot.contains("digraph {"));
        assert!(dot.contains("\"a\" -> \"b\";"));
    }
}
