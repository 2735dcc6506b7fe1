//! Writes a `build.ninja` from a stream of build targets.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

use crate::record::{BuildTarget, CCompile, CLink, RefKind, Record, Rule};
use crate::record_file::RecordReader;

#[derive(Debug, Clone)]
pub struct Options {
    pub target_filename: PathBuf,
    pub output_filename: PathBuf,
    pub build_directory: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            target_filename: PathBuf::new(),
            output_filename: "build.ninja".into(),
            build_directory: "build".to_string(),
        }
    }
}

pub struct NinjaGenerator {
    opts: Options,
    targets: BTreeMap<String, BuildTarget>,
    order: Vec<String>,
}

impl NinjaGenerator {
    pub fn new(opts: Options) -> Self {
        Self {
            opts,
            targets: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    pub fn run(opts: Options) -> Result<()> {
        let mut reader = crate::record_file::RecordFileReader::open(&opts.target_filename)
            .with_context(|| format!("failed to open {:?} for reading", opts.target_filename))?;
        let output_filename = opts.output_filename.clone();

        let mut generator = NinjaGenerator::new(opts);
        generator.read_targets(&mut reader)?;

        let mut out = std::fs::File::create(&output_filename)
            .with_context(|| format!("failed to open {:?} for writing", output_filename))?;
        generator.generate(&mut out)?;
        info!(targets = generator.order.len(), output = ?output_filename, "wrote ninja file");
        Ok(())
    }

    pub fn read_targets(&mut self, reader: &mut dyn RecordReader) -> Result<()> {
        while let Some(record) = reader.read_record()? {
            if let Record::BuildTarget(target) = record {
                self.order.push(target.qualified_name.clone());
                self.targets.insert(target.qualified_name.clone(), target);
            }
        }
        Ok(())
    }

    pub fn generate(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "builddir = {}", self.opts.build_directory)?;
        writeln!(out, "c_compiler = gcc")?;
        writeln!(out, "cc_compiler = g++")?;
        writeln!(out, "c_compiler_flags = -fPIC")?;
        writeln!(out, "c_link_library_flags = ")?;
        writeln!(out, "c_link_binary_flags = ")?;
        writeln!(out)?;
        for (rule_compiler, compiler_var) in [("c", "$c_compiler"), ("cc", "$cc_compiler")] {
            writeln!(out, "rule {}_compile", rule_compiler)?;
            writeln!(
                out,
                "  command = {} $c_compiler_flags $flags $definitions $header_search_path -c $in -o $out",
                compiler_var
            )?;
            writeln!(out)?;
            writeln!(out, "rule {}_link_library", rule_compiler)?;
            writeln!(
                out,
                "  command = {} $c_link_library_flags $flags -shared $library_search_path $in $libs -o $out",
                compiler_var
            )?;
            writeln!(out)?;
            writeln!(out, "rule {}_link_binary", rule_compiler)?;
            writeln!(
                out,
                "  command = {} $c_link_binary_flags $flags $library_search_path $in $libs -o $out",
                compiler_var
            )?;
            writeln!(out)?;
        }

        for name in &self.order {
            let target = &self.targets[name];
            match &target.rule {
                Rule::CCompile(compile) => self.write_compile_target(target, compile, out)?,
                Rule::CLink(link) => self.write_link_target(target, link, out)?,
            }
            writeln!(out)?;
        }
        Ok(())
    }

    fn output_filenames(&self, target: &BuildTarget) -> Vec<String> {
        target
            .outputs
            .iter()
            .map(|output| format!("$builddir/{}", output.name))
            .collect()
    }

    /// Files first, then outputs of dependency link targets, so the link
    /// order stays correct.
    fn input_filenames(&self, target: &BuildTarget) -> Vec<String> {
        let mut files = Vec::new();
        let mut dependencies = Vec::new();
        for input in &target.srcs {
            match input.kind {
                RefKind::Library => {}
                RefKind::BuildTarget => {
                    if let Some(dependency) = self.targets.get(&input.name) {
                        let out = if dependency.c_link().is_some() {
                            &mut dependencies
                        } else {
                            &mut files
                        };
                        out.extend(self.output_filenames(dependency));
                    }
                }
                _ => files.push(input.name.clone()),
            }
        }
        files.extend(dependencies);
        files
    }

    fn write_compile_target(
        &self,
        target: &BuildTarget,
        compile: &CCompile,
        out: &mut dyn Write,
    ) -> Result<()> {
        let rule = if compile.is_cc { "cc_compile" } else { "c_compile" };
        writeln!(
            out,
            "build {}: {} {}",
            self.output_filenames(target).join(" "),
            rule,
            self.input_filenames(target).join(" ")
        )?;

        write!(out, "  flags =")?;
        for flag in &compile.flags {
            write!(out, " {}", flag)?;
        }
        writeln!(out)?;

        write!(out, "  definitions =")?;
        for (name, value) in &compile.defs {
            match value {
                Some(value) => write!(out, " -D{}={}", name, value)?,
                None => write!(out, " -D{}", name)?,
            }
        }
        writeln!(out)?;

        write!(out, "  header_search_path =")?;
        for path in &compile.header_search_path {
            if path.name.is_empty() {
                write!(out, " -I.")?;
            } else {
                write!(out, " -I{}", path.name)?;
            }
        }
        writeln!(out)?;
        Ok(())
    }

    fn write_link_target(
        &self,
        target: &BuildTarget,
        link: &CLink,
        out: &mut dyn Write,
    ) -> Result<()> {
        let compiler = if link.is_cc { "cc" } else { "c" };
        let kind = if link.is_library {
            "link_library"
        } else {
            "link_binary"
        };
        writeln!(
            out,
            "build {}: {}_{} {}",
            self.output_filenames(target).join(" "),
            compiler,
            kind,
            self.input_filenames(target).join(" ")
        )?;

        write!(out, "  flags =")?;
        for flag in &link.flags {
            write!(out, " {}", flag)?;
        }
        writeln!(out)?;

        write!(out, "  library_search_path =")?;
        for path in &link.library_search_path {
            if path.name.is_empty() {
                write!(out, " -L.")?;
            } else {
                write!(out, " -L{}", path.name)?;
            }
        }
        writeln!(out)?;

        write!(out, "  libs =")?;
        for src in &target.srcs {
            if src.kind == RefKind::Library {
                if src.name == "pthread" {
                    write!(out, " -pthread")?;
                } else {
                    write!(out, " -l{}", src.name)?;
                }
            }
        }
        writeln!(out)?;
        Ok(())
    }
}
