//! Snapshot of the syscall register file of a stopped tracee.
//!
//! x86-64 syscall convention: number in `orig_rax`, arguments in
//! `rdi`/`rsi`/`rdx`/`r10`/`r8`/`r9`, result in `rax`.

use anyhow::{Context, Result};
use nix::libc::user_regs_struct;
use nix::sys::ptrace;
use nix::unistd::Pid;

pub struct Registers {
    regs: user_regs_struct,
}

impl Registers {
    /// Reads the registers from a process in ptrace-stop.
    pub fn from_pid(pid: Pid) -> Result<Self> {
        let regs = ptrace::getregs(pid).context("PTRACE_GETREGS failed")?;
        Ok(Self { regs })
    }

    pub fn syscall(&self) -> i64 {
        self.regs.orig_rax as i64
    }

    /// The n'th syscall argument, 0-based.
    pub fn arg(&self, index: usize) -> u64 {
        match index {
            0 => self.regs.rdi,
            1 => self.regs.rsi,
            2 => self.regs.rdx,
            3 => self.regs.r10,
            4 => self.regs.r8,
            5 => self.regs.r9,
            _ => panic!("syscall argument index out of range: {}", index),
        }
    }

    pub fn return_value(&self) -> i64 {
        self.regs.rax as i64
    }

    pub fn instruction_pointer(&self) -> u64 {
        self.regs.rip
    }
}
