//! The ptrace supervisor.
//!
//! Runs a command, follows the entire descendant process tree across
//! `fork`/`clone`/`execve`, and emits one [`Process`] record per descendant
//! containing every filesystem access it made.  Single-threaded: the kernel
//! stops tracees, `waitpid` hands them to us one at a time, and all state
//! mutation happens between a tracee's stop and its resumption.

use anyhow::{bail, Context, Result};
use nix::libc;
use nix::sys::ptrace;
use nix::sys::signal::{raise, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{chdir, execvp, fork, ForkResult, Pid};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::hasher;
use crate::path_util;
use crate::record::{Access, FileRecord, MetaData, Process, Record};
use crate::record_file::RecordWriter;
use crate::registers::Registers;
use crate::tracee_memory::TraceeMemory;

/// Runs in the forked child between `PTRACE_TRACEME` and process exit.
pub type Tracee = Box<dyn FnOnce()>;

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Command to run.  May be empty when a closure tracee is supplied to
    /// [`Tracer::start`] directly.
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    /// Defaults to the working directory.
    pub project_root: PathBuf,
    /// Defaults to the project root's basename, truncated at the first `-`.
    pub project_name: String,
}

/// State of one file description shared by one or more FDs.
#[derive(Debug, Default)]
struct FileState {
    filename: PathBuf,
    sha1_before: Option<Vec<u8>>,
    renamed_from: Option<PathBuf>,
    unlinked: bool,
    open_ordering: u64,
    close_ordering: u64,
    bytes_written: u64,
}

/// State of one traced process.
struct PidState {
    parent_pid: Option<Pid>,

    /// The record being accumulated for this process.
    record: Process,

    /// Open files keyed by FD.  `dup`'d descriptors share one state; the
    /// state folds into `closed_files` when the last FD drops.
    open_files: BTreeMap<i32, Rc<RefCell<FileState>>>,
    closed_files: Vec<FileState>,

    /// Set by syscall-enter-stop, cleared by syscall-exit-stop.
    in_syscall: bool,

    /// execve resets the address space, making its arguments unreadable by
    /// the time the syscall returns.  They're captured at syscall entry.
    exec_filename: PathBuf,
    exec_argv: Vec<String>,
    /// Set by PTRACE_EVENT_EXEC, cleared by the following syscall-exit.
    exec_completed: bool,

    /// Hash staged at syscall entry for syscalls that destroy the pre-image
    /// (truncating opens, unlink, rename over an existing file).
    staged_sha1: Option<Vec<u8>>,
}

impl PidState {
    fn new(parent_pid: Option<Pid>, next_id: &mut u32, next_ordering: &mut u64) -> Self {
        let record = Process {
            id: *next_id,
            begin_ordering: *next_ordering,
            exit_code: -1,
            ..Process::default()
        };
        *next_id += 1;
        *next_ordering += 1;
        Self {
            parent_pid,
            record,
            open_files: BTreeMap::new(),
            closed_files: Vec::new(),
            in_syscall: false,
            exec_filename: PathBuf::new(),
            exec_argv: Vec::new(),
            exec_completed: false,
            staged_sha1: None,
        }
    }
}

pub struct Tracer {
    opts: Options,
    writer: Box<dyn RecordWriter>,

    pids: BTreeMap<Pid, PidState>,
    /// New processes whose SIGSTOP arrived before the parent's fork event.
    stopped_children: HashSet<Pid>,

    next_id: u32,
    next_ordering: u64,
}

impl Tracer {
    pub fn new(mut opts: Options, writer: Box<dyn RecordWriter>) -> Self {
        if opts.project_root.as_os_str().is_empty() {
            opts.project_root = opts.working_directory.clone();
        }
        if opts.project_name.is_empty() {
            let basename = path_util::file_name(&opts.project_root);
            opts.project_name = match basename.split_once('-') {
                Some((name, _)) => name.to_string(),
                None => basename,
            };
        }

        Self {
            opts,
            writer,
            pids: BTreeMap::new(),
            stopped_children: HashSet::new(),
            next_id: 0,
            next_ordering: 0,
        }
    }

    /// Traces `opts.args` to completion, writing records through `writer`.
    pub fn run(opts: Options, writer: Box<dyn RecordWriter>) -> Result<()> {
        if opts.args.is_empty() {
            bail!("no command to trace");
        }
        info!(command = ?opts.args, cwd = ?opts.working_directory, "tracing");

        let tracee = Self::subprocess(opts.args.clone(), opts.working_directory.clone());
        let mut tracer = Tracer::new(opts, writer);
        tracer.start(tracee)?;
        tracer.trace_until_exit()
    }

    /// A tracee that changes directory and execs the given command.
    pub fn subprocess(args: Vec<String>, working_directory: PathBuf) -> Tracee {
        Box::new(move || {
            if !working_directory.as_os_str().is_empty() && chdir(&working_directory).is_err() {
                eprintln!("failed to change directory to {:?}", working_directory);
                unsafe { libc::_exit(1) };
            }

            let program = CString::new(args[0].as_str()).unwrap_or_default();
            let c_args: Vec<CString> = args
                .iter()
                .map(|a| CString::new(a.as_str()).unwrap_or_default())
                .collect();
            let err = execvp(&program, &c_args);
            eprintln!("exec of {:?} failed: {:?}", args[0], err);
            unsafe { libc::_exit(1) };
        })
    }

    /// Forks; the child enables tracing, raises SIGSTOP and runs `tracee`.
    /// The parent consumes the initial stop and sets ptrace options.
    pub fn start(&mut self, tracee: Tracee) -> Result<()> {
        match unsafe { fork() }.context("fork failed")? {
            ForkResult::Child => {
                if let Err(e) = ptrace::traceme() {
                    eprintln!("PTRACE_TRACEME failed: {}", e);
                    unsafe { libc::_exit(1) };
                }
                let _ = raise(Signal::SIGSTOP);
                tracee();
                unsafe { libc::_exit(0) }
            }
            ForkResult::Parent { child } => {
                let state = PidState::new(None, &mut self.next_id, &mut self.next_ordering);
                self.pids.insert(child, state);

                let status =
                    waitpid(child, Some(WaitPidFlag::__WALL)).context("wait for initial stop")?;
                match status {
                    WaitStatus::Stopped(_, Signal::SIGSTOP) => {}
                    other => bail!("expected initial SIGSTOP, got {:?}", other),
                }

                ptrace::setoptions(
                    child,
                    ptrace::Options::PTRACE_O_TRACECLONE
                        | ptrace::Options::PTRACE_O_TRACEFORK
                        | ptrace::Options::PTRACE_O_TRACEVFORK
                        | ptrace::Options::PTRACE_O_TRACEEXEC
                        | ptrace::Options::PTRACE_O_TRACESYSGOOD,
                )
                .context("PTRACE_SETOPTIONS failed")?;
                Ok(())
            }
        }
    }

    fn metadata(&self) -> MetaData {
        let mut metadata = MetaData {
            project_root: self.opts.project_root.clone(),
            project_name: self.opts.project_name.clone(),
            build_dir: None,
        };
        if self.opts.working_directory != self.opts.project_root
            && !self.opts.working_directory.as_os_str().is_empty()
        {
            metadata.build_dir = Some(path_util::make_relative_to(
                &self.opts.working_directory,
                &self.opts.project_root,
            ));
        }
        metadata
    }

    fn resume(&self, pid: Pid, signal: Option<Signal>) -> Result<()> {
        ptrace::syscall(pid, signal).with_context(|| format!("failed to resume {}", pid))
    }

    /// Drives the event loop until every traced process has exited.
    pub fn trace_until_exit(&mut self) -> Result<()> {
        self.writer
            .write_record(&Record::MetaData(self.metadata()))
            .context("failed to write metadata record")?;

        let first = *self.pids.keys().next().context("no process started")?;
        self.resume(first, None)?;

        loop {
            if self.pids.is_empty() {
                return Ok(());
            }

            let status =
                waitpid(Pid::from_raw(-1), Some(WaitPidFlag::__WALL)).context("waitpid failed")?;
            match status {
                WaitStatus::PtraceSyscall(pid) => self.handle_syscall_stop(pid)?,
                WaitStatus::PtraceEvent(pid, _, event)
                    if event == libc::PTRACE_EVENT_FORK
                        || event == libc::PTRACE_EVENT_VFORK
                        || event == libc::PTRACE_EVENT_CLONE =>
                {
                    self.handle_fork_event(pid)?;
                }
                WaitStatus::PtraceEvent(pid, _, event) if event == libc::PTRACE_EVENT_EXEC => {
                    self.handle_exec_event(pid)?;
                }
                WaitStatus::PtraceEvent(pid, _, event) => {
                    debug!(%pid, event, "ignoring ptrace event");
                    self.resume(pid, None)?;
                }
                WaitStatus::Stopped(pid, signal) => self.handle_signal_stop(pid, signal)?,
                WaitStatus::Exited(pid, code) => self.handle_process_exited(pid, code)?,
                WaitStatus::Signaled(pid, signal, _) => {
                    self.handle_process_exited(pid, -(signal as i32))?;
                }
                other => {
                    debug!(status = ?other, "unhandled wait status");
                }
            }
        }
    }

    fn handle_syscall_stop(&mut self, pid: Pid) -> Result<()> {
        if !self.pids.contains_key(&pid) {
            // Not yet registered; resume and let the fork event catch up.
            let _ = ptrace::syscall(pid, None);
            return Ok(());
        }

        let entering = {
            let state = self.pids.get_mut(&pid).unwrap();
            state.in_syscall = !state.in_syscall;
            state.in_syscall
        };
        if entering {
            self.handle_syscall_enter(pid)?;
        } else {
            self.handle_syscall_exit(pid)?;
        }

        if self.resume(pid, None).is_err() {
            // Usually the process died in an exit_group between the stop and
            // the resume.
            self.handle_process_exited(pid, -1)?;
        }
        Ok(())
    }

    fn handle_fork_event(&mut self, pid: Pid) -> Result<()> {
        let new_pid_raw = ptrace::getevent(pid).context("PTRACE_GETEVENTMSG failed")?;
        let new_pid = Pid::from_raw(new_pid_raw as i32);

        let mut child_state = PidState::new(Some(pid), &mut self.next_id, &mut self.next_ordering);
        let child_id = child_state.record.id;
        if let Some(parent_state) = self.pids.get_mut(&pid) {
            child_state.record.parent_id = Some(parent_state.record.id);
            parent_state.record.child_ids.push(child_id);
        }
        self.pids.insert(new_pid, child_state);
        debug!(parent = %pid, child = %new_pid, "process forked");

        self.resume(pid, None)?;

        // The child's SIGSTOP may have arrived before this fork event; if so
        // it's waiting for us to release it.
        if self.stopped_children.remove(&new_pid) {
            self.resume(new_pid, None)?;
        }
        Ok(())
    }

    fn handle_exec_event(&mut self, pid: Pid) -> Result<()> {
        if let Some(state) = self.pids.get_mut(&pid) {
            state.exec_completed = true;
            if let Some(parent) = state.parent_pid {
                info!(%parent, %pid, filename = ?state.exec_filename, "forked and exec'd");
            }
        }
        self.resume(pid, None)
    }

    fn handle_signal_stop(&mut self, pid: Pid, signal: Signal) -> Result<()> {
        if signal == Signal::SIGSTOP && !self.pids.contains_key(&pid) {
            // A newly created process stopped before its parent's fork event
            // created our state for it.  Hold it until then.
            self.stopped_children.insert(pid);
            return Ok(());
        }

        // SIGSTOP is ours, never the tracee's.
        let forward = if signal == Signal::SIGSTOP {
            None
        } else {
            Some(signal)
        };
        self.resume(pid, forward)
    }

    fn handle_syscall_enter(&mut self, pid: Pid) -> Result<()> {
        let regs = Registers::from_pid(pid)?;
        let syscall = regs.syscall();

        if syscall == libc::SYS_execve {
            let mem = TraceeMemory::new(pid);
            let state = self.pids.get_mut(&pid).unwrap();
            state.exec_filename = PathBuf::from(mem.read_string(regs.arg(0)));
            state.exec_argv = mem.read_string_array(regs.arg(1));
        }

        // Hash the pre-image of files about to be truncated, removed or
        // overwritten; by syscall exit it's gone.  Plain opens stage their
        // "before" hash the same way.
        let path = match syscall {
            libc::SYS_open | libc::SYS_unlink => Some(read_absolute_path(pid, regs.arg(0))),
            libc::SYS_openat | libc::SYS_unlinkat => {
                let state = &self.pids[&pid];
                Some(read_path_at(state, pid, regs.arg(0) as i32, regs.arg(1)))
            }
            libc::SYS_rename => Some(read_absolute_path(pid, regs.arg(1))),
            libc::SYS_renameat | libc::SYS_renameat2 => {
                let state = &self.pids[&pid];
                Some(read_path_at(state, pid, regs.arg(2) as i32, regs.arg(3)))
            }
            _ => None,
        };

        if let Some(path) = path {
            let state = self.pids.get_mut(&pid).unwrap();
            state.staged_sha1 = if path.as_os_str().is_empty() {
                None
            } else {
                hasher::sha1_file(&path)
            };
        }
        Ok(())
    }

    fn handle_syscall_exit(&mut self, pid: Pid) -> Result<()> {
        let regs = Registers::from_pid(pid)?;
        let ret = regs.return_value();

        match regs.syscall() {
            libc::SYS_open | libc::SYS_openat => {
                let fd = ret as i32;
                if fd >= 0 {
                    let filename = if regs.syscall() == libc::SYS_open {
                        read_absolute_path(pid, regs.arg(0))
                    } else {
                        let state = &self.pids[&pid];
                        read_path_at(state, pid, regs.arg(0) as i32, regs.arg(1))
                    };

                    let open_ordering = self.bump_ordering();
                    let state = self.pids.get_mut(&pid).unwrap();
                    if state.open_files.contains_key(&fd) {
                        // We missed the close (e.g. O_CLOEXEC across exec).
                        warn!(%pid, fd, "open on an FD we thought was open");
                        close_fd(state, fd, &mut self.next_ordering);
                    }
                    let file = FileState {
                        filename,
                        sha1_before: state.staged_sha1.take(),
                        open_ordering,
                        ..FileState::default()
                    };
                    state.open_files.insert(fd, Rc::new(RefCell::new(file)));
                }
            }
            libc::SYS_close => {
                if ret == 0 {
                    let state = self.pids.get_mut(&pid).unwrap();
                    close_fd(state, regs.arg(0) as i32, &mut self.next_ordering);
                }
            }
            libc::SYS_execve => {
                let state = self.pids.get_mut(&pid).unwrap();
                if state.exec_completed && ret == 0 {
                    state.record.filename = std::mem::take(&mut state.exec_filename);
                    state.record.argv = std::mem::take(&mut state.exec_argv);
                    state.record.working_directory = read_cwd(pid);
                    state.exec_completed = false;
                }
            }
            libc::SYS_unlink | libc::SYS_unlinkat => {
                if ret == 0 {
                    let filename = if regs.syscall() == libc::SYS_unlink {
                        read_absolute_path(pid, regs.arg(0))
                    } else {
                        let state = &self.pids[&pid];
                        read_path_at(state, pid, regs.arg(0) as i32, regs.arg(1))
                    };
                    let ordering = self.bump_ordering();
                    let state = self.pids.get_mut(&pid).unwrap();
                    state.closed_files.push(FileState {
                        filename,
                        sha1_before: state.staged_sha1.take(),
                        unlinked: true,
                        open_ordering: ordering,
                        close_ordering: ordering,
                        ..FileState::default()
                    });
                }
            }
            libc::SYS_rename | libc::SYS_renameat | libc::SYS_renameat2 => {
                if ret == 0 {
                    let (renamed_from, filename) = if regs.syscall() == libc::SYS_rename {
                        (
                            read_absolute_path(pid, regs.arg(0)),
                            read_absolute_path(pid, regs.arg(1)),
                        )
                    } else {
                        let state = &self.pids[&pid];
                        (
                            read_path_at(state, pid, regs.arg(0) as i32, regs.arg(1)),
                            read_path_at(state, pid, regs.arg(2) as i32, regs.arg(3)),
                        )
                    };
                    let ordering = self.bump_ordering();
                    let state = self.pids.get_mut(&pid).unwrap();
                    state.closed_files.push(FileState {
                        filename,
                        renamed_from: Some(renamed_from),
                        sha1_before: state.staged_sha1.take(),
                        open_ordering: ordering,
                        close_ordering: ordering,
                        ..FileState::default()
                    });
                }
            }
            libc::SYS_fcntl => {
                if regs.arg(1) as i32 == libc::F_DUPFD && ret != -1 {
                    let state = self.pids.get_mut(&pid).unwrap();
                    dup_fd(state, regs.arg(0) as i32, ret as i32);
                }
            }
            libc::SYS_dup => {
                if ret != -1 {
                    let state = self.pids.get_mut(&pid).unwrap();
                    dup_fd(state, regs.arg(0) as i32, ret as i32);
                }
            }
            libc::SYS_dup2 | libc::SYS_dup3 => {
                if ret != -1 && regs.arg(0) != regs.arg(1) {
                    let state = self.pids.get_mut(&pid).unwrap();
                    close_fd(state, regs.arg(1) as i32, &mut self.next_ordering);
                    dup_fd(state, regs.arg(0) as i32, regs.arg(1) as i32);
                }
            }
            libc::SYS_write => {
                if ret > 0 {
                    let state = self.pids.get_mut(&pid).unwrap();
                    if let Some(file) = state.open_files.get(&(regs.arg(0) as i32)) {
                        file.borrow_mut().bytes_written += ret as u64;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_process_exited(&mut self, pid: Pid, exit_code: i32) -> Result<()> {
        let Some(mut state) = self.pids.remove(&pid) else {
            return Ok(());
        };
        debug!(%pid, exit_code, "process exited");

        self.finalize_files(&mut state);
        state.record.exit_code = exit_code;
        state.record.end_ordering = self.bump_ordering();
        self.writer
            .write_record(&Record::Process(state.record))
            .context("failed to write process record")?;
        Ok(())
    }

    fn bump_ordering(&mut self) -> u64 {
        let ret = self.next_ordering;
        self.next_ordering += 1;
        ret
    }

    /// Folds this process' file accesses into one record per filename and
    /// hashes the final contents.
    fn finalize_files(&mut self, state: &mut PidState) {
        // Treat everything still open as closed now.
        let fds: Vec<i32> = state.open_files.keys().cloned().collect();
        for fd in fds {
            close_fd(state, fd, &mut self.next_ordering);
        }

        // Combine all entries for a filename into one record holding its
        // final state: a file opened for reading and later deleted ends up
        // DELETED.
        let mut file_records: BTreeMap<PathBuf, FileRecord> = BTreeMap::new();
        for file in state.closed_files.drain(..) {
            let record = file_records.entry(file.filename.clone()).or_insert_with(|| {
                let (access, sha1_before) = match &file.sha1_before {
                    None => (Access::Created, None),
                    Some(hash) => (Access::Read, Some(hash.clone())),
                };
                FileRecord {
                    filename: file.filename.clone(),
                    renamed_from: None,
                    access,
                    open_ordering: file.open_ordering,
                    close_ordering: file.close_ordering,
                    sha1_before,
                    sha1_after: None,
                }
            });

            record.close_ordering = file.close_ordering;
            if file.unlinked {
                record.access = Access::Deleted;
            } else if let Some(from) = &file.renamed_from {
                record.open_ordering = file.open_ordering;
                record.renamed_from = Some(from.clone());
            } else if file.bytes_written != 0 && record.access != Access::Created {
                record.access = Access::Modified;
            }
        }

        // A file created and then renamed is just a creation under the new
        // name.
        let renamed: Vec<PathBuf> = file_records
            .iter()
            .filter(|(_, record)| record.renamed_from.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        for filename in renamed {
            let from = file_records[&filename].renamed_from.clone().unwrap();
            if file_records
                .get(&from)
                .is_some_and(|record| record.access == Access::Created)
            {
                file_records.remove(&from);
                file_records.get_mut(&filename).unwrap().renamed_from = None;
            }
        }

        // Hash all the files in their final state.  The sha1 is the
        // expensive part, so fan it out over a small worker pool.
        let project_root = self.opts.project_root.clone();
        let jobs: Mutex<Vec<FileRecord>> = Mutex::new(file_records.into_values().collect());
        let results: Mutex<Vec<FileRecord>> = Mutex::new(Vec::new());

        let job_count = jobs.lock().unwrap().len();
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(job_count.max(1));

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let Some(record) = jobs.lock().unwrap().pop() else {
                        break;
                    };
                    let finished = finish_file_record(record, &project_root);
                    results.lock().unwrap().push(finished);
                });
            }
        });

        let mut files = results.into_inner().unwrap();
        files.sort_by_key(|file| file.open_ordering);
        state.record.files = files;
    }
}

/// Resolves symlinks, relativizes paths and reconciles the access kind
/// against the final contents hash.
fn finish_file_record(mut record: FileRecord, project_root: &Path) -> FileRecord {
    let absolute = path_util::resolve_symlinks(&record.filename);
    record.filename = path_util::make_relative_to(&absolute, project_root);
    if let Some(from) = record.renamed_from.take() {
        record.renamed_from = Some(path_util::make_relative_to(
            &path_util::resolve_symlinks(&from),
            project_root,
        ));
    }

    record.sha1_after = hasher::sha1_file(&absolute);

    match record.access {
        // A file we didn't see created was still modified if its hash
        // changed under us.
        Access::Read if record.sha1_before != record.sha1_after => {
            record.access = Access::Modified;
        }
        // Bytes were written but the contents came out the same.
        Access::Modified if record.sha1_before == record.sha1_after => {
            record.access = Access::WrittenButUnchanged;
        }
        // Non-regular files are never hashed; a "creation" with no contents
        // on either side is just an access.
        Access::Created if record.sha1_before.is_none() && record.sha1_after.is_none() => {
            record.access = Access::Read;
        }
        _ => {}
    }
    record
}

fn read_cwd(pid: Pid) -> PathBuf {
    std::fs::read_link(format!("/proc/{}/cwd", pid)).unwrap_or_default()
}

/// Reads a path string from the tracee and absolutizes it against the
/// tracee's working directory.
fn read_absolute_path(pid: Pid, addr: u64) -> PathBuf {
    let filename = TraceeMemory::new(pid).read_string(addr);
    if filename.is_empty() {
        return PathBuf::new();
    }
    path_util::make_absolute(Path::new(&filename), &read_cwd(pid))
}

/// Reads a path relative to a directory FD, handling `AT_FDCWD`.
fn read_path_at(state: &PidState, pid: Pid, dirfd: i32, addr: u64) -> PathBuf {
    if dirfd == libc::AT_FDCWD {
        return read_absolute_path(pid, addr);
    }

    let filename = TraceeMemory::new(pid).read_string(addr);
    if filename.is_empty() {
        return PathBuf::new();
    }
    match state.open_files.get(&dirfd) {
        Some(dir) => path_util::make_absolute(Path::new(&filename), &dir.borrow().filename),
        None => {
            warn!(%pid, dirfd, "path lookup through an untracked directory FD");
            path_util::make_absolute(Path::new(&filename), &read_cwd(pid))
        }
    }
}

fn close_fd(state: &mut PidState, fd: i32, next_ordering: &mut u64) {
    let Some(rc) = state.open_files.remove(&fd) else {
        return;
    };
    // Other FDs may still share this description; only the last one folds it
    // into the closed list.
    if let Ok(cell) = Rc::try_unwrap(rc) {
        let mut file = cell.into_inner();
        file.close_ordering = *next_ordering;
        *next_ordering += 1;
        state.closed_files.push(file);
    }
}

fn dup_fd(state: &mut PidState, old_fd: i32, new_fd: i32) {
    // FDs we aren't tracking (pipes, sockets) are ignored.
    if let Some(rc) = state.open_files.get(&old_fd).cloned() {
        state.open_files.insert(new_fd, rc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_file::MemoryRecordWriter;

    #[test]
    fn test_run_requires_a_command() {
        let writer = MemoryRecordWriter::new();
        let result = Tracer::run(Options::default(), Box::new(writer));
        assert!(result.is_err());
    }

    #[test]
    fn test_project_name_guessed_from_root() {
        let opts = Options {
            working_directory: "/src/grep-3.11".into(),
            ..Options::default()
        };
        let tracer = Tracer::new(opts, Box::new(MemoryRecordWriter::new()));
        assert_eq!(tracer.opts.project_name, "grep");
        assert_eq!(tracer.opts.project_root, PathBuf::from("/src/grep-3.11"));
    }

    #[test]
    fn test_metadata_records_build_dir() {
        let opts = Options {
            working_directory: "/src/proj/build".into(),
            project_root: "/src/proj".into(),
            project_name: "proj".into(),
            ..Options::default()
        };
        let tracer = Tracer::new(opts, Box::new(MemoryRecordWriter::new()));
        let metadata = tracer.metadata();
        assert_eq!(metadata.build_dir, Some(PathBuf::from("build")));
    }

    #[test]
    fn test_finish_record_promotes_changed_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"new contents").unwrap();

        let record = FileRecord {
            filename: path,
            renamed_from: None,
            access: Access::Read,
            open_ordering: 1,
            close_ordering: 2,
            sha1_before: Some(vec![0; 20]),
            sha1_after: None,
        };
        let finished = finish_file_record(record, dir.path());
        assert_eq!(finished.access, Access::Modified);
        assert_eq!(finished.filename, PathBuf::from("f"));
    }

    #[test]
    fn test_finish_record_detects_unchanged_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"same").unwrap();
        let hash = hasher::sha1_file(&path);

        let record = FileRecord {
            filename: path,
            renamed_from: None,
            access: Access::Modified,
            open_ordering: 1,
            close_ordering: 2,
            sha1_before: hash,
            sha1_after: None,
        };
        let finished = finish_file_record(record, dir.path());
        assert_eq!(finished.access, Access::WrittenButUnchanged);
    }

    #[test]
    fn test_finish_record_demotes_contentless_creation() {
        let dir = tempfile::tempdir().unwrap();
        let record = FileRecord {
            filename: dir.path().join("never-existed"),
            renamed_from: None,
            access: Access::Created,
            open_ordering: 1,
            close_ordering: 2,
            sha1_before: None,
            sha1_after: None,
        };
        let finished = finish_file_record(record, dir.path());
        assert_eq!(finished.access, Access::Read);
    }
}
