//! Shared machinery for turning step nodes into build targets.

use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

use super::trace_node::{NodeKind, TraceNode};
use crate::graph::{Graph, GraphNode};
use crate::path_util;
use crate::record::{BuildTarget, RefKind, Reference};
use crate::reference::create_reference;
use crate::tool_search_path::ToolSearchPath;
use crate::trace_reader::TraceReader;

/// Everything a generator needs from the surrounding analysis.
pub struct GenContext<'a> {
    pub trace: &'a TraceReader,
    pub graph: &'a Graph<TraceNode>,
    pub tool_search_path: &'a mut ToolSearchPath,
    /// Qualified names already handed out in this generation pass.
    pub taken_names: &'a mut BTreeSet<String>,
}

impl GenContext<'_> {
    pub fn create_reference(&self, name: &str) -> Reference {
        create_reference(self.trace.metadata(), name)
    }

    /// Derives a fresh qualified name from a project-relative filename:
    /// strip the extension, map everything outside `[A-Za-z0-9_/]` to `_`,
    /// turn the last `/` into `:`, prepend `//`.  Collisions get a numeric
    /// suffix.
    pub fn new_target_name(&mut self, filename: &str) -> Result<String> {
        let reference = self.create_reference(filename);
        if reference.kind != RefKind::RelativeToProjectRoot
            && reference.kind != RefKind::RelativeToBuildDir
        {
            bail!(
                "expected {} to be relative to the project root, got {:?}",
                filename,
                reference
            );
        }

        let mut name: String = path_util::path_without_extension(Path::new(&reference.name))
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '/' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        match name.rfind('/') {
            Some(position) => name.replace_range(position..position + 1, ":"),
            None => name.insert(0, ':'),
        }
        name.insert_str(0, "//");

        let base = name.clone();
        let mut suffix = 1;
        while self.taken_names.contains(&name) {
            name = format!("{}_{}", base, suffix);
            suffix += 1;
        }

        info!(name = %name, filename = %filename, "target name");
        self.taken_names.insert(name.clone());
        Ok(name)
    }
}

/// A parser that may recognize a step node and produce a target for it.
pub trait BuildTargetGen {
    fn generate(&self, ctx: &mut GenContext, node: &TraceNode) -> Result<Option<BuildTarget>>;
}

fn extension_ok(filename: &Path, valid_extensions: &[&str]) -> bool {
    valid_extensions.is_empty()
        || valid_extensions.contains(&path_util::extension(filename).as_str())
}

/// Adds the node's file inputs as `srcs`, filtered by extension.  A `limit`
/// of 0 accepts any number.  Returns how many were added.
pub fn add_inputs(
    ctx: &GenContext,
    node: &TraceNode,
    target: &mut BuildTarget,
    valid_extensions: &[&str],
    limit: usize,
) -> usize {
    let mut ret = 0;
    for input in ctx.graph.incoming(node) {
        let valid_kind = matches!(
            input.kind(),
            NodeKind::SourceFile | NodeKind::GeneratedFile
        );
        let filename = input.filename();
        if !valid_kind || !filename.is_some_and(|f| extension_ok(f, valid_extensions)) {
            warn!(input = %input.id(), step = %node.id(), "unexpected input node to step");
            continue;
        }

        let filename = filename.unwrap().to_string_lossy();
        target.srcs.push(ctx.create_reference(&filename));
        ret += 1;
        if limit > 0 && ret == limit {
            break;
        }
    }
    ret
}

/// Adds the node's generated outputs, filtered by extension.
pub fn add_outputs(
    ctx: &GenContext,
    node: &TraceNode,
    target: &mut BuildTarget,
    valid_extensions: &[&str],
    limit: usize,
) -> usize {
    let mut ret = 0;
    for output in ctx.graph.outgoing(node) {
        let filename = output.filename();
        if output.kind() != NodeKind::GeneratedFile
            || !filename.is_some_and(|f| extension_ok(f, valid_extensions))
        {
            warn!(output = %output.id(), step = %node.id(), "unexpected output node from step");
            continue;
        }

        let filename = filename.unwrap().to_string_lossy();
        target.outputs.push(ctx.create_reference(&filename));
        ret += 1;
        if limit > 0 && ret == limit {
            break;
        }
    }
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(
        trace: &'a TraceReader,
        graph: &'a Graph<TraceNode>,
        tool_search_path: &'a mut ToolSearchPath,
        taken_names: &'a mut BTreeSet<String>,
    ) -> GenContext<'a> {
        GenContext {
            trace,
            graph,
            tool_search_path,
            taken_names,
        }
    }

    #[test]
    fn test_new_target_name_shapes() {
        let trace = TraceReader::new();
        let graph = Graph::new();
        let mut tools = ToolSearchPath::new();
        let mut names = BTreeSet::new();
        let mut ctx = context(&trace, &graph, &mut tools, &mut names);

        assert_eq!(ctx.new_target_name("src/foo.c").unwrap(), "//src:foo");
        assert_eq!(ctx.new_target_name("bar.c").unwrap(), "//:bar");
        assert_eq!(
            ctx.new_target_name("lib/libfoo-2.so.1").unwrap(),
            "//lib:libfoo_2"
        );
    }

    #[test]
    fn test_new_target_name_collisions_get_suffixes() {
        let trace = TraceReader::new();
        let graph = Graph::new();
        let mut tools = ToolSearchPath::new();
        let mut names = BTreeSet::new();
        let mut ctx = context(&trace, &graph, &mut tools, &mut names);

        assert_eq!(ctx.new_target_name("foo.c").unwrap(), "//:foo");
        assert_eq!(ctx.new_target_name("foo.cpp").unwrap(), "//:foo_1");
        assert_eq!(ctx.new_target_name("foo.S").unwrap(), "//:foo_2");
    }

    #[test]
    fn test_new_target_name_rejects_absolute_paths() {
        let trace = TraceReader::new();
        let graph = Graph::new();
        let mut tools = ToolSearchPath::new();
        let mut names = BTreeSet::new();
        let mut ctx = context(&trace, &graph, &mut tools, &mut names);

        assert!(ctx.new_target_name("/usr/lib/libc.so").is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_names_are_well_formed(filename in "[a-z._/-]{1,24}") {
                prop_assume!(!filename.starts_with('/'));
                prop_assume!(!filename.starts_with("//"));

                let trace = TraceReader::new();
                let graph = Graph::new();
                let mut tools = ToolSearchPath::new();
                let mut names = BTreeSet::new();
                let mut ctx = context(&trace, &graph, &mut tools, &mut names);

                if let Ok(name) = ctx.new_target_name(&filename) {
                    prop_assert!(name.starts_with("//"));
                    prop_assert!(name.contains(':'));
                    prop_assert!(name[2..]
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '/' || c == ':'));
                }
            }

            #[test]
            fn prop_names_are_unique(count in 2usize..6) {
                let trace = TraceReader::new();
                let graph = Graph::new();
                let mut tools = ToolSearchPath::new();
                let mut names = BTreeSet::new();
                let mut ctx = context(&trace, &graph, &mut tools, &mut names);

                let generated: Vec<String> = (0..count)
                    .map(|_| ctx.new_target_name("dir/same.c").unwrap())
                    .collect();
                let unique: BTreeSet<&String> = generated.iter().collect();
                prop_assert_eq!(unique.len(), generated.len());
            }
        }
    }
}
