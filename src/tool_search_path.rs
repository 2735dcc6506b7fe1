//! Discovers the standard library search directories of the toolchain, so
//! that `-L` arguments pointing into them can be dropped from targets.

use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::path_util;

const TOOL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Default)]
pub struct ToolSearchPath {
    cache: HashMap<PathBuf, BTreeSet<PathBuf>>,
}

impl ToolSearchPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard search directories of `program`, determined by running
    /// it.  Unknown tools (and tools that fail or time out) yield an empty
    /// set.  Results are cached per program path.
    pub fn get(&mut self, program: &Path) -> BTreeSet<PathBuf> {
        if let Some(cached) = self.cache.get(program) {
            return cached.clone();
        }

        let mut ret = BTreeSet::new();
        match path_util::file_name(program).as_str() {
            "gcc" | "g++" => get_gcc(program, &mut ret),
            "ld" => get_ld(program, &mut ret),
            _ => {}
        }

        info!(program = ?program, paths = ?ret, "library search path");
        self.cache.insert(program.to_path_buf(), ret.clone());
        ret
    }
}

/// Runs the program and returns its stdout, or `None` if it failed to start
/// or didn't finish within the timeout.
fn run_tool(program: &Path, arg: &str) -> Option<String> {
    let mut child = Command::new(program)
        .arg(arg)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;

    let deadline = Instant::now() + TOOL_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => {
                if Instant::now() >= deadline {
                    warn!(program = ?program, "timed out finding library search path");
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(_) => return None,
        }
    }

    let mut stdout = String::new();
    child.stdout.take()?.read_to_string(&mut stdout).ok()?;
    Some(stdout)
}

/// Parses the `libraries: =/a:/b:...` line of `gcc -print-search-dirs`.
fn get_gcc(program: &Path, ret: &mut BTreeSet<PathBuf>) {
    let Some(output) = run_tool(program, "-print-search-dirs") else {
        return;
    };
    parse_gcc_search_dirs(&output, ret, |p| std::fs::canonicalize(p).ok());
}

fn parse_gcc_search_dirs(
    output: &str,
    ret: &mut BTreeSet<PathBuf>,
    canonicalize: impl Fn(&Path) -> Option<PathBuf>,
) {
    const PREFIX: &str = "libraries: ";
    for line in output.lines() {
        let Some(paths) = line.strip_prefix(PREFIX) else {
            continue;
        };
        for path in paths.split(':') {
            let path = path.strip_prefix('=').unwrap_or(path);
            if let Some(canonical) = canonicalize(Path::new(path)) {
                ret.insert(canonical);
            }
        }
        break;
    }
}

/// Extracts every `SEARCH_DIR("=?<path>");` from `ld --verbose`.
fn get_ld(program: &Path, ret: &mut BTreeSet<PathBuf>) {
    let Some(output) = run_tool(program, "--verbose") else {
        return;
    };
    parse_ld_search_dirs(&output, ret, |p| std::fs::canonicalize(p).ok());
}

fn parse_ld_search_dirs(
    output: &str,
    ret: &mut BTreeSet<PathBuf>,
    canonicalize: impl Fn(&Path) -> Option<PathBuf>,
) {
    let re = Regex::new(r#"SEARCH_DIR\("=*([^"]+)"\);"#).unwrap();
    for capture in re.captures_iter(output) {
        if let Some(canonical) = canonicalize(Path::new(&capture[1])) {
            ret.insert(canonical);
        }
    }
}
