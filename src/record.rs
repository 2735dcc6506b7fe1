//! Record types written to and read from trace files.
//!
//! A trace file is a stream of [`Record`]s: one `MetaData` record followed by
//! one `Process` record per traced process (in exit order).  Analysis passes
//! write streams of `BuildTarget`, `InstalledFile` or `ConfigureOutput`
//! records, again led by the `MetaData`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Trace-wide metadata, written once at the start of every record file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaData {
    /// Directory containing the project's source code.
    pub project_root: PathBuf,
    pub project_name: String,
    /// Build directory, relative to `project_root`, when the build ran
    /// outside the source tree.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub build_dir: Option<PathBuf>,
}

/// How a process left a file when it exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    Created,
    Read,
    Modified,
    WrittenButUnchanged,
    Deleted,
}

/// The final state of one filename as seen by one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub renamed_from: Option<PathBuf>,
    pub access: Access,
    pub open_ordering: u64,
    pub close_ordering: u64,
    /// Contents hash when the file was first opened.  Absent for created
    /// files and for anything the hasher refuses (devices, empty files).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sha1_before: Option<Vec<u8>>,
    /// Contents hash after the process exited.  Absent for deleted files.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sha1_after: Option<Vec<u8>>,
}

/// One traced process and every filesystem access it made.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Process {
    /// Dense id assigned in fork order; 0 is the root.
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub child_ids: Vec<u32>,
    /// Executable path from the last successful `execve`.
    pub filename: PathBuf,
    pub argv: Vec<String>,
    pub working_directory: PathBuf,
    pub exit_code: i32,
    pub begin_ordering: u64,
    pub end_ordering: u64,
    pub files: Vec<FileRecord>,
}

/// Discriminator for a [`Reference`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum RefKind {
    Absolute,
    RelativeToProjectRoot,
    RelativeToBuildDir,
    /// A library base name, e.g. `pthread` for `-lpthread`.
    Library,
    /// A qualified target name starting with `//`.
    BuildTarget,
}

/// A tagged name used wherever a bare path would be ambiguous.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Reference {
    pub kind: RefKind,
    pub name: String,
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            RefKind::Library => write!(f, "-l{}", self.name),
            _ => write!(f, "{}", self.name),
        }
    }
}

/// Settings of a compile target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CCompile {
    /// True when driven by a C++ compiler.
    pub is_cc: bool,
    pub flags: Vec<String>,
    /// Preprocessor definitions; `None` for valueless `-DNAME`.
    pub defs: BTreeMap<String, Option<String>>,
    pub header_search_path: BTreeSet<Reference>,
    /// Headers the compiler frontend actually read, sorted.
    pub headers: Vec<Reference>,
}

/// Settings of a link target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CLink {
    pub is_cc: bool,
    pub is_library: bool,
    pub flags: Vec<String>,
    pub library_search_path: BTreeSet<Reference>,
}

/// The kind-specific half of a [`BuildTarget`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rule {
    CCompile(CCompile),
    CLink(CLink),
}

/// One reconstructed build step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildTarget {
    /// `//package:target`, unique within a run.
    pub qualified_name: String,
    pub srcs: Vec<Reference>,
    pub outputs: Vec<Reference>,
    pub rule: Rule,
    /// Set when `make install` copied one of the outputs somewhere.
    pub install: bool,
}

impl BuildTarget {
    pub fn c_compile(&self) -> Option<&CCompile> {
        match &self.rule {
            Rule::CCompile(c) => Some(c),
            Rule::CLink(_) => None,
        }
    }

    pub fn c_link(&self) -> Option<&CLink> {
        match &self.rule {
            Rule::CLink(l) => Some(l),
            Rule::CCompile(_) => None,
        }
    }
}

/// Classification of an installed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstalledFileKind {
    Header,
    Library,
    Binary,
}

/// A file that `make install` copied out of the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledFile {
    /// Where the file came from inside the project.
    pub original: Reference,
    /// Where it was installed to.
    pub target: Reference,
    pub kind: InstalledFileKind,
}

/// Files a `./configure` run generated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigureOutput {
    pub generated_files: Vec<Reference>,
}

/// Envelope for everything stored in a record file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    MetaData(MetaData),
    Process(Process),
    BuildTarget(BuildTarget),
    InstalledFile(InstalledFile),
    ConfigureOutput(ConfigureOutput),
}
