//! Analysis of a `make` trace: builds the file/process graph, collapses
//! toolchain chains into steps, generates build targets, merges duplicates
//! and rewrites generated-source references to target references.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::gcc::GccBuildTargetGen;
use super::match_node::MatchNode;
use super::static_link::StaticLinkBuildTargetGen;
use super::target_gen::{BuildTargetGen, GenContext};
use super::trace_node::{NodeKind, TraceNode};
use crate::graph::{Graph, GraphNode};
use crate::installed_files::InstalledFilesReader;
use crate::record::{
    Access, BuildTarget, FileRecord, InstalledFileKind, Record, RefKind, Rule,
};
use crate::record_file::{RecordFileReader, RecordFileWriter, RecordWriter};
use crate::tool_search_path::ToolSearchPath;
use crate::trace_reader::{FileEvent, TraceReader};

/// Definitions dropped from the canonical form: PIC/shared/static variants
/// of the same compile differ only in these.
const CANON_DEF_DISCARD: &[&str] = &["PIC", "SHARED", "STATIC"];

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub trace_filename: PathBuf,
    /// Output of an install analysis; targets whose outputs were installed
    /// get flagged.
    pub install_filename: Option<PathBuf>,
    pub output_filename: PathBuf,

    /// When set, graphs are written to these files in dot format.
    pub graph_output_filename: Option<PathBuf>,
    pub intermediate_graph_output_filename: Option<PathBuf>,
}

pub struct Make {
    opts: Options,

    tool_search_path: ToolSearchPath,
    trace: TraceReader,
    installed_files: InstalledFilesReader,

    graph: Graph<TraceNode>,

    build_targets: Vec<BuildTarget>,
    targets_by_name: BTreeMap<String, usize>,
    targets_by_node_id: BTreeMap<String, usize>,
}

impl Make {
    pub fn new(opts: Options) -> Self {
        let mut trace = TraceReader::new();
        trace.ignore_file_extensions(["h", "hpp", "Plo", "Po", "Tpo", "la", "lai", "loT"]);
        trace.ignore_process_filenames(["bash", "cat", "cmake", "grep", "make", "sed", "sh"]);

        Self {
            opts,
            tool_search_path: ToolSearchPath::new(),
            trace,
            installed_files: InstalledFilesReader::new(),
            graph: Graph::new(),
            build_targets: Vec::new(),
            targets_by_name: BTreeMap::new(),
            targets_by_node_id: BTreeMap::new(),
        }
    }

    pub fn run(opts: Options) -> Result<()> {
        let mut make = Make::new(opts);
        make.read_inputs()?;
        make.analyze()?;
        make.write_output()
    }

    fn read_inputs(&mut self) -> Result<()> {
        let mut trace_file = RecordFileReader::open(&self.opts.trace_filename)
            .with_context(|| format!("failed to open {:?} for reading", self.opts.trace_filename))?;
        self.trace.read(&mut trace_file)?;

        if let Some(install_filename) = &self.opts.install_filename {
            let mut install_file = RecordFileReader::open(install_filename)
                .with_context(|| format!("failed to open {:?} for reading", install_filename))?;
            self.installed_files.read(&mut install_file)?;
        }
        Ok(())
    }

    fn analyze(&mut self) -> Result<()> {
        self.build_graph();
        if let Some(path) = self.opts.intermediate_graph_output_filename.clone() {
            self.write_graph(&path)?;
        }

        self.find_compile_targets()?;
        self.find_link_targets()?;

        loop {
            self.generate_build_targets()?;
            if !self.remove_duplicates()? {
                break;
            }
        }

        self.replace_dependency_target_names();

        if let Some(path) = self.opts.graph_output_filename.clone() {
            self.write_graph(&path)?;
        }
        Ok(())
    }

    fn write_graph(&self, path: &std::path::Path) -> Result<()> {
        let mut out = std::fs::File::create(path)
            .with_context(|| format!("failed to open {:?} for writing", path))?;
        self.graph.write_dot(&mut out)?;
        info!(nodes = self.graph.len(), path = ?path, "wrote graph");
        Ok(())
    }

    fn write_output(&self) -> Result<()> {
        let mut output = RecordFileWriter::create(&self.opts.output_filename)
            .with_context(|| format!("failed to open {:?} for writing", self.opts.output_filename))?;

        output.write_record(&Record::MetaData(self.trace.metadata().clone()))?;
        for target in &self.build_targets {
            output.write_record(&Record::BuildTarget(target.clone()))?;
        }

        info!(
            targets = self.build_targets.len(),
            output = ?self.opts.output_filename,
            "wrote targets"
        );
        Ok(())
    }

    fn process_node(&self, process_id: u32) -> TraceNode {
        TraceNode::Process {
            process_id,
            program: self.trace.program_name(process_id),
        }
    }

    /// An input edge: from the generated file a previous process wrote, or
    /// from a fresh source-file node if nothing generated it.  Absolute
    /// paths with no generator are system files and stay out of the graph.
    fn add_input_edge(&mut self, event: &FileEvent, file: &FileRecord, proc_node: &TraceNode) {
        let gen_node = TraceNode::GeneratedFile {
            process_id: event.process_id,
            file_index: event.file_index,
            sha1: file.sha1_before.clone().unwrap_or_default(),
            filename: file.filename.clone(),
        };
        if self.graph.has_node(&gen_node) {
            self.graph.add_edge(&gen_node, proc_node);
        } else if !file.filename.is_absolute() {
            let source = TraceNode::SourceFile {
                filename: file.filename.clone(),
            };
            self.graph.add_edge(&source, proc_node);
        }
    }

    fn add_output_edge(&mut self, event: &FileEvent, file: &FileRecord, proc_node: &TraceNode) {
        let gen_node = TraceNode::GeneratedFile {
            process_id: event.process_id,
            file_index: event.file_index,
            sha1: file.sha1_after.clone().unwrap_or_default(),
            filename: file.filename.clone(),
        };
        self.graph.add_edge(proc_node, &gen_node);
    }

    /// A rename updates the identity of whichever file node carries the old
    /// path, keeping its edges.
    fn apply_rename(&mut self, event: &FileEvent, file: &FileRecord, renamed_from: &PathBuf) {
        for node in self.graph.all_nodes() {
            let is_file = matches!(node.kind(), NodeKind::SourceFile | NodeKind::GeneratedFile);
            if !is_file || node.filename() != Some(renamed_from.as_path()) {
                continue;
            }

            let replacement = match &node {
                TraceNode::SourceFile { .. } => TraceNode::SourceFile {
                    filename: file.filename.clone(),
                },
                TraceNode::GeneratedFile { sha1, .. } => TraceNode::GeneratedFile {
                    process_id: event.process_id,
                    file_index: event.file_index,
                    sha1: sha1.clone(),
                    filename: file.filename.clone(),
                },
                _ => continue,
            };
            info!(from = ?renamed_from, to = ?file.filename, "renaming node");
            self.graph
                .replace_subgraph(std::slice::from_ref(&node), &replacement);
            break;
        }
    }

    fn build_graph(&mut self) {
        let events: Vec<FileEvent> = self.trace.events().to_vec();
        for event in events {
            let file = self.trace.process(event.process_id).files[event.file_index].clone();
            let proc_node = self.process_node(event.process_id);
            self.graph.add_node(proc_node.clone());

            if let Some(renamed_from) = file.renamed_from.clone() {
                self.apply_rename(&event, &file, &renamed_from);
                continue;
            }

            match file.access {
                Access::Read => self.add_input_edge(&event, &file, &proc_node),
                Access::Modified | Access::WrittenButUnchanged => {
                    self.add_input_edge(&event, &file, &proc_node);
                    self.add_output_edge(&event, &file, &proc_node);
                }
                Access::Created => self.add_output_edge(&event, &file, &proc_node),
                Access::Deleted => {}
            }
        }

        // Nodes with no edges carry no information.
        for node in self.graph.all_nodes() {
            if self.graph.incoming(&node).is_empty() && self.graph.outgoing(&node).is_empty() {
                self.graph.remove_node(&node);
            }
        }
    }

    /// Collapses `input -> cc1 -> asm -> as -> object` chains into a single
    /// compile step owned by the cc1's parent (the gcc/g++ driver).
    fn find_compile_targets(&mut self) -> Result<()> {
        let mut pattern = Graph::new();
        pattern.add_chain(&[
            MatchNode::new(
                "input",
                &[NodeKind::SourceFile, NodeKind::GeneratedFile],
                &[],
                false,
                false,
            ),
            MatchNode::new(
                "cc1",
                &[NodeKind::Process],
                &["cc1", "cc1plus"],
                false,
                true,
            ),
            MatchNode::new("asm", &[NodeKind::GeneratedFile], &[], true, true),
            MatchNode::new("as", &[NodeKind::Process], &["as"], true, true),
            MatchNode::new("object", &[NodeKind::GeneratedFile], &[], true, false),
        ]);

        let trace = &self.trace;
        self.graph.find_and_replace_subgraph(&pattern, |graph, binding| {
            let frontend_process_id = binding["cc1"].process_id().unwrap();
            let process_id = trace
                .process(frontend_process_id)
                .parent_id
                .unwrap_or(frontend_process_id);
            let node = TraceNode::CompileStep {
                process_id,
                frontend_process_id,
            };
            graph.replace_subgraph(
                &[
                    binding["cc1"].clone(),
                    binding["asm"].clone(),
                    binding["as"].clone(),
                ],
                &node,
            );
        })
    }

    /// Collapses archiver and linker invocations into link steps.
    fn find_link_targets(&mut self) -> Result<()> {
        // ar followed by ranlib regenerating the archive index.
        let mut static_pattern_ranlib = Graph::new();
        static_pattern_ranlib.add_chain(&[
            MatchNode::new("input", &[NodeKind::GeneratedFile], &[], false, false),
            MatchNode::new("ar", &[NodeKind::Process], &["ar"], false, true),
            MatchNode::new("output", &[NodeKind::GeneratedFile], &[], true, false),
            MatchNode::new("ranlib", &[NodeKind::Process], &["ranlib"], true, false),
        ]);
        self.graph
            .find_and_replace_subgraph(&static_pattern_ranlib, |graph, binding| {
                let replacement = TraceNode::StaticLinkStep {
                    process_id: binding["ar"].process_id().unwrap(),
                };
                graph.replace_subgraph(
                    &[binding["ar"].clone(), binding["ranlib"].clone()],
                    &replacement,
                );
                graph.remove_edge(&binding["output"], &replacement);
            })?;

        let mut static_pattern = Graph::new();
        static_pattern.add_chain(&[
            MatchNode::new("input", &[NodeKind::GeneratedFile], &[], false, false),
            MatchNode::new("ar", &[NodeKind::Process], &["ar"], false, true),
            MatchNode::new("output", &[NodeKind::GeneratedFile], &[], true, false),
        ]);
        self.graph
            .find_and_replace_subgraph(&static_pattern, |graph, binding| {
                let replacement = TraceNode::StaticLinkStep {
                    process_id: binding["ar"].process_id().unwrap(),
                };
                graph.replace_subgraph(std::slice::from_ref(&binding["ar"]), &replacement);
                graph.remove_edge(&binding["output"], &replacement);
            })?;

        let mut dynamic_pattern = Graph::new();
        dynamic_pattern.add_chain(&[
            MatchNode::new("input", &[NodeKind::GeneratedFile], &[], false, false),
            MatchNode::new("ld", &[NodeKind::Process], &["ld"], false, true),
            MatchNode::new("output", &[NodeKind::GeneratedFile], &[], true, false),
        ]);
        let trace = &self.trace;
        self.graph
            .find_and_replace_subgraph(&dynamic_pattern, |graph, binding| {
                // Dynamic links usually run as gcc -> collect2 -> ld; hang
                // the step off the topmost driver.
                let mut process_id = binding["ld"].process_id().unwrap();
                loop {
                    let Some(parent_id) = trace.process(process_id).parent_id else {
                        break;
                    };
                    let program = trace.program_name(parent_id);
                    if program == "gcc" || program == "g++" || program == "collect2" {
                        process_id = parent_id;
                    } else {
                        break;
                    }
                }

                graph.replace_subgraph(
                    std::slice::from_ref(&binding["ld"]),
                    &TraceNode::DynamicLinkStep { process_id },
                );
            })
    }

    /// Runs every generator over every step node, producing one target per
    /// recognized step.  Regenerated from scratch each deduplication round.
    fn generate_build_targets(&mut self) -> Result<()> {
        self.build_targets.clear();
        self.targets_by_name.clear();
        self.targets_by_node_id.clear();

        let generators: Vec<Box<dyn BuildTargetGen>> = vec![
            Box::new(GccBuildTargetGen),
            Box::new(StaticLinkBuildTargetGen),
        ];

        let mut taken_names = std::collections::BTreeSet::new();
        for node in self.graph.all_nodes() {
            for generator in &generators {
                let mut ctx = GenContext {
                    trace: &self.trace,
                    graph: &self.graph,
                    tool_search_path: &mut self.tool_search_path,
                    taken_names: &mut taken_names,
                };
                let Some(mut target) = generator.generate(&mut ctx, &node)? else {
                    continue;
                };

                // Does this build target install a file?
                for output in &target.outputs {
                    if self
                        .installed_files
                        .find(
                            &output.name,
                            &[InstalledFileKind::Binary, InstalledFileKind::Library],
                        )
                        .is_some()
                    {
                        target.install = true;
                        break;
                    }
                }

                let index = self.build_targets.len();
                self.targets_by_name
                    .insert(target.qualified_name.clone(), index);
                self.targets_by_node_id.insert(node.id(), index);
                self.build_targets.push(target);
                break;
            }
        }
        Ok(())
    }

    /// Merges step nodes whose canonical targets are byte-identical, keeping
    /// the one with the shortest-named output.  Returns whether anything was
    /// merged; the caller must regenerate targets afterwards.
    fn remove_duplicates(&mut self) -> Result<bool> {
        let mut nodes_by_canonical: BTreeMap<String, Vec<TraceNode>> = BTreeMap::new();
        for node in self.graph.all_nodes() {
            if !matches!(
                node.kind(),
                NodeKind::CompileStep | NodeKind::StaticLinkStep | NodeKind::DynamicLinkStep
            ) {
                continue;
            }
            let Some(&index) = self.targets_by_node_id.get(&node.id()) else {
                // The generators couldn't parse this step; nothing to merge.
                debug!(step = %node.id(), "step has no target");
                continue;
            };
            nodes_by_canonical
                .entry(canonical_form(&self.build_targets[index]))
                .or_default()
                .push(node);
        }

        let mut replaced_any = false;
        for nodes in nodes_by_canonical.into_values() {
            if nodes.len() <= 1 {
                continue;
            }
            replaced_any = true;

            // Keep the node whose output has the shortest name (libfoo.a
            // rather than .libs/libfoo.a) and drop the rest.
            let mut replacement: Option<TraceNode> = None;
            let mut replacement_inputs: Vec<TraceNode> = Vec::new();
            let mut replacement_output: Option<TraceNode> = None;
            let mut all_outputs: Vec<TraceNode> = Vec::new();
            let mut output_connections: Vec<String> = Vec::new();

            for node in &nodes {
                let outputs = self.graph.outgoing(node);
                if outputs.len() != 1 {
                    bail!(
                        "duplicate step node {} has {} outputs",
                        node.id(),
                        outputs.len()
                    );
                }
                let output = outputs.into_iter().next().unwrap();

                for connection in self.graph.outgoing(&output) {
                    output_connections.push(connection.id());
                }

                let length = |node: &TraceNode| {
                    node.filename()
                        .map(|f| f.as_os_str().len())
                        .unwrap_or(usize::MAX)
                };
                if replacement_output
                    .as_ref()
                    .is_none_or(|current| length(&output) < length(current))
                {
                    replacement = Some(node.clone());
                    replacement_inputs = self.graph.incoming(node);
                    replacement_output = Some(output.clone());
                }
                all_outputs.push(output);
            }

            let replacement = replacement.unwrap();
            let replacement_output = replacement_output.unwrap();
            info!(
                duplicates = nodes.len(),
                keep = ?replacement_output.filename(),
                "merging duplicate steps"
            );

            for node in &nodes {
                self.graph.remove_node(node);
            }
            for output in &all_outputs {
                self.graph.remove_node(output);
            }

            self.graph
                .add_chain(&[replacement.clone(), replacement_output.clone()]);
            for input in &replacement_inputs {
                self.graph.add_edge(input, &replacement);
            }
            for connection in &output_connections {
                if self.graph.has_node_id(connection) {
                    self.graph
                        .add_edge_by_id(&replacement_output.id(), connection);
                }
            }
        }

        Ok(replaced_any)
    }

    /// Rewrites srcs that some other target generates into references to
    /// that target.
    fn replace_dependency_target_names(&mut self) {
        let mut targets_by_output: BTreeMap<crate::record::Reference, usize> = BTreeMap::new();
        for (index, target) in self.build_targets.iter().enumerate() {
            for output in &target.outputs {
                if let Some(&existing) = targets_by_output.get(output) {
                    warn!(
                        output = %output,
                        first = %self.build_targets[existing].qualified_name,
                        second = %target.qualified_name,
                        "output generated by multiple targets"
                    );
                    continue;
                }
                targets_by_output.insert(output.clone(), index);
            }
        }

        for target_index in 0..self.build_targets.len() {
            for src_index in 0..self.build_targets[target_index].srcs.len() {
                let src = &self.build_targets[target_index].srcs[src_index];
                if src.kind != RefKind::RelativeToProjectRoot
                    && src.kind != RefKind::RelativeToBuildDir
                {
                    continue;
                }
                let Some(&dependency_index) = targets_by_output.get(src) else {
                    continue;
                };

                if dependency_index == target_index {
                    warn!(
                        target = %self.build_targets[target_index].qualified_name,
                        src = %src,
                        "target generates its own source file"
                    );
                    continue;
                }

                let reference =
                    crate::reference::target_reference(&self.build_targets[dependency_index]);
                self.build_targets[target_index].srcs[src_index] = reference;
            }
        }
    }

    pub fn build_targets(&self) -> &[BuildTarget] {
        &self.build_targets
    }
}

/// The equivalence key for deduplication: srcs plus the flag-like settings,
/// minus outputs, header search paths and PIC/SHARED/STATIC definitions.
fn canonical_form(target: &BuildTarget) -> String {
    let mut canon = serde_json::json!({ "srcs": target.srcs });
    match &target.rule {
        Rule::CCompile(compile) => {
            let defs: BTreeMap<&String, &Option<String>> = compile
                .defs
                .iter()
                .filter(|(name, _)| !CANON_DEF_DISCARD.iter().any(|d| name.contains(d)))
                .collect();
            canon["c_compile"] = serde_json::json!({
                "is_cc": compile.is_cc,
                "flags": compile.flags,
                "headers": compile.headers,
                "defs": defs,
            });
        }
        Rule::CLink(link) => {
            canon["c_link"] = serde_json::json!({
                "is_cc": link.is_cc,
                "is_library": link.is_library,
                "flags": link.flags,
                "library_search_path": link.library_search_path,
            });
        }
    }
    canon.to_string()
}
