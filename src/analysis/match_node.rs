//! Pattern nodes for matching toolchain shapes in the trace graph.

use super::trace_node::{NodeKind, TraceNode};
use crate::graph::{GraphNode, PatternNode};

/// Matches a [`TraceNode`] by kind and, for process nodes, by program name.
#[derive(Debug, Clone)]
pub struct MatchNode {
    id: String,
    kinds: Vec<NodeKind>,
    /// Accepted program basenames; empty accepts any.
    programs: Vec<String>,
    exact_incoming: bool,
    exact_outgoing: bool,
}

impl MatchNode {
    pub fn new(
        id: &str,
        kinds: &[NodeKind],
        programs: &[&str],
        exact_incoming: bool,
        exact_outgoing: bool,
    ) -> Self {
        Self {
            id: id.to_string(),
            kinds: kinds.to_vec(),
            programs: programs.iter().map(|p| p.to_string()).collect(),
            exact_incoming,
            exact_outgoing,
        }
    }
}

impl GraphNode for MatchNode {
    fn id(&self) -> String {
        self.id.clone()
    }
}

impl PatternNode<TraceNode> for MatchNode {
    fn matches(&self, candidate: &TraceNode) -> bool {
        if !self.kinds.contains(&candidate.kind()) {
            return false;
        }
        if let TraceNode::Process { program, .. } = candidate {
            if !self.programs.is_empty() && !self.programs.contains(program) {
                return false;
            }
        }
        true
    }

    fn exact_incoming_count(&self) -> bool {
        self.exact_incoming
    }

    fn exact_outgoing_count(&self) -> bool {
        self.exact_outgoing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_by_kind() {
        let pattern = MatchNode::new("n", &[NodeKind::SourceFile], &[], false, false);
        assert!(pattern.matches(&TraceNode::SourceFile {
            filename: "a.c".into()
        }));
        assert!(!pattern.matches(&TraceNode::Process {
            process_id: 1,
            program: "gcc".into()
        }));
    }

    #[test]
    fn test_matches_process_by_program() {
        let pattern = MatchNode::new(
            "n",
            &[NodeKind::Process],
            &["cc1", "cc1plus"],
            false,
            false,
        );
        assert!(pattern.matches(&TraceNode::Process {
            process_id: 1,
            program: "cc1plus".into()
        }));
        assert!(!pattern.matches(&TraceNode::Process {
            process_id: 1,
            program: "ld".into()
        }));
    }

    #[test]
    fn test_program_filter_ignored_for_files() {
        // The program list only constrains process nodes.
        let pattern = MatchNode::new(
            "n",
            &[NodeKind::GeneratedFile],
            &["unused"],
            false,
            false,
        );
        assert!(pattern.matches(&TraceNode::GeneratedFile {
            process_id: 1,
            file_index: 0,
            sha1: vec![],
            filename: "a.o".into()
        }));
    }
}
