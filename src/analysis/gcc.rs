//! Turns GCC-family driver invocations into compile and link targets.

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::target_gen::{add_inputs, add_outputs, BuildTargetGen, GenContext};
use super::trace_node::{NodeKind, TraceNode};
use crate::graph::GraphNode;
use crate::path_util;
use crate::record::{Access, BuildTarget, CCompile, CLink, Rule};

const COMPILE_INPUT_EXTENSIONS: &[&str] = &[
    "c", "C", "cc", "cpp", "cxx", "h", "hh", "hpp", "hxx", "inc", "S",
];
const COMPILE_OUTPUT_EXTENSIONS: &[&str] = &["o", "lo"];
const LINK_INPUT_EXTENSIONS: &[&str] = &["a", "lo", "o", "so"];

/// Libraries every link gets implicitly; `-l` arguments naming them carry no
/// information.
const STANDARD_LIBS: &[&str] = &["c", "gcc", "gcc_s", "stdc++"];

#[derive(Default)]
pub struct GccBuildTargetGen;

/// Everything the argv lexer extracts from a driver invocation.
#[derive(Default)]
struct ParsedArgs {
    flags: Vec<String>,
    defs: BTreeMap<String, Option<String>>,
    header_search_path: BTreeSet<String>,
    library_search_path: BTreeSet<String>,
    deps: BTreeSet<String>,
    is_compile: bool,
    is_library: bool,
}

impl BuildTargetGen for GccBuildTargetGen {
    fn generate(&self, ctx: &mut GenContext, node: &TraceNode) -> Result<Option<BuildTarget>> {
        if node.kind() != NodeKind::CompileStep && node.kind() != NodeKind::DynamicLinkStep {
            return Ok(None);
        }

        let process = ctx.trace.process(node.process_id().unwrap());
        let working_directory = process.working_directory.clone();
        let project_root = ctx.trace.metadata().project_root.clone();
        let standard_search_path = ctx.tool_search_path.get(&process.filename);
        let is_cc = process
            .filename
            .to_string_lossy()
            .ends_with("++");

        let canonicalize = |path: &str| -> String {
            let absolute = path_util::make_absolute(Path::new(path), &working_directory);
            path_util::make_relative_to(&absolute, &project_root)
                .to_string_lossy()
                .into_owned()
        };
        let is_standard_dir = |path: &str| -> bool {
            let absolute = path_util::make_absolute(Path::new(path), &working_directory);
            let resolved = std::fs::canonicalize(&absolute).unwrap_or(absolute);
            standard_search_path.contains(&resolved)
        };

        let Some(parsed) = parse_argv(&process.argv, canonicalize, is_standard_dir) else {
            return Ok(None);
        };

        let expects_compile = node.kind() == NodeKind::CompileStep;
        if parsed.is_compile != expects_compile {
            warn!(
                step = %node.id(),
                argv = ?process.argv,
                "argument parse disagrees with the step kind"
            );
            return Ok(None);
        }

        let rule = if parsed.is_compile {
            let mut compile = CCompile {
                is_cc,
                flags: parsed.flags,
                defs: parsed.defs,
                header_search_path: parsed
                    .header_search_path
                    .iter()
                    .map(|path| ctx.create_reference(path))
                    .collect(),
                headers: Vec::new(),
            };

            // The frontend's reads tell us which headers this compile
            // actually pulled in.
            if let TraceNode::CompileStep {
                frontend_process_id,
                ..
            } = node
            {
                let frontend = ctx.trace.process(*frontend_process_id);
                let mut headers: BTreeSet<PathBuf> = BTreeSet::new();
                for file in &frontend.files {
                    if file.access == Access::Read
                        && file.filename.to_string_lossy().ends_with(".h")
                    {
                        headers.insert(file.filename.clone());
                    }
                }
                compile.headers = headers
                    .iter()
                    .map(|path| ctx.create_reference(&path.to_string_lossy()))
                    .collect();
                compile.headers.sort();
            }
            Rule::CCompile(compile)
        } else {
            Rule::CLink(CLink {
                is_cc,
                is_library: parsed.is_library,
                flags: parsed.flags,
                library_search_path: parsed
                    .library_search_path
                    .iter()
                    .map(|path| ctx.create_reference(path))
                    .collect(),
            })
        };

        let mut target = BuildTarget {
            qualified_name: String::new(),
            srcs: Vec::new(),
            outputs: Vec::new(),
            rule,
            install: false,
        };

        let (input_extensions, input_limit) = if parsed.is_compile {
            (COMPILE_INPUT_EXTENSIONS, 1)
        } else {
            (LINK_INPUT_EXTENSIONS, 0)
        };
        if add_inputs(ctx, node, &mut target, input_extensions, input_limit) < 1 {
            info!(step = %node.id(), "not enough inputs");
            return Ok(None);
        }

        let output_extensions: &[&str] = if parsed.is_compile {
            COMPILE_OUTPUT_EXTENSIONS
        } else {
            &[]
        };
        if add_outputs(ctx, node, &mut target, output_extensions, 1) < 1 {
            info!(step = %node.id(), "not enough outputs");
            return Ok(None);
        }

        for dep in &parsed.deps {
            target.srcs.push(ctx.create_reference(dep));
        }

        let name_source = if parsed.is_compile {
            target.srcs[0].name.clone()
        } else {
            target.outputs[0].name.clone()
        };
        target.qualified_name = ctx.new_target_name(&name_source)?;
        Ok(Some(target))
    }
}

/// Lexes a driver argv.  Returns `None` (after logging) on any argument we
/// don't understand, so a misparsed step is skipped rather than half-read.
fn parse_argv(
    argv: &[String],
    canonicalize: impl Fn(&str) -> String,
    is_standard_dir: impl Fn(&str) -> bool,
) -> Option<ParsedArgs> {
    let mut parsed = ParsedArgs::default();

    let mut args = argv.iter().skip(1);
    while let Some(arg) = args.next() {
        if arg.starts_with("-Wl,")
            || arg.starts_with("-M")
            || arg.starts_with("-O")
            || arg.starts_with("--sysroot=")
            || arg.starts_with("--hash-style=")
            || arg.starts_with("-soname=")
            || arg == "-g"
            || arg == "-m"
            || arg == "-pg"
            || arg == "-fPIC"
            || arg == "-nostdlib"
            || arg == "--eh-frame-hdr"
            || arg == "--build-id"
            || arg == "--as-needed"
            || arg == "--no-as-needed"
            || arg == "-dynamic-linker"
        {
            // Carries nothing a build file needs to reproduce.
        } else if arg.starts_with("-W") || arg.starts_with("-f") || arg.starts_with("-std") {
            parsed.flags.push(arg.clone());
        } else if let Some(name_value) = arg.strip_prefix("-D") {
            match name_value.split_once('=') {
                Some((name, value)) => {
                    parsed.defs.insert(name.to_string(), Some(value.to_string()));
                }
                None => {
                    parsed.defs.insert(name_value.to_string(), None);
                }
            }
        } else if let Some(name) = arg.strip_prefix("-U") {
            parsed.defs.remove(name);
        } else if let Some(path) = arg.strip_prefix("-L") {
            if !is_standard_dir(path) {
                parsed.library_search_path.insert(canonicalize(path));
            }
        } else if let Some(path) = arg.strip_prefix("-I") {
            parsed.header_search_path.insert(canonicalize(path));
        } else if arg == "-pthread" {
            parsed.deps.insert("-lpthread".to_string());
        } else if let Some(lib) = arg.strip_prefix("-l") {
            if !STANDARD_LIBS.contains(&lib) {
                parsed.deps.insert(arg.clone());
            }
        } else if !arg.starts_with('-') {
            // Input and output paths come from the graph, not the argv.
        } else if arg == "-c" {
            parsed.is_compile = true;
        } else if arg == "-shared" {
            parsed.is_library = true;
        } else if arg == "-o" || arg == "-MF" || arg == "-MT" || arg == "-MQ" || arg == "-z"
            || arg == "-soname"
        {
            args.next();
        } else {
            warn!(argument = %arg, "unknown GCC argument");
            return None;
        }
    }
    Some(parsed)
}
