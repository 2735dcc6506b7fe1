//! Reading from a stopped tracee's address space.
//!
//! Everything goes through `PTRACE_PEEKDATA`, one word at a time.  The
//! tracee must be in a ptrace-stop; reads of unmapped addresses end the read
//! rather than failing the trace.

use nix::libc;
use nix::sys::ptrace;
use nix::unistd::Pid;

const WORD: usize = std::mem::size_of::<libc::c_long>();

pub struct TraceeMemory {
    pid: Pid,
}

impl TraceeMemory {
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }

    /// Reads a NUL-terminated byte string starting at `addr`.
    pub fn read_null_terminated(&self, addr: u64) -> Vec<u8> {
        let mut ret = Vec::new();
        if addr == 0 {
            return ret;
        }

        let mut p = addr;
        loop {
            let word = match ptrace::read(self.pid, p as ptrace::AddressType) {
                Ok(word) => word,
                Err(_) => return ret,
            };
            for byte in word.to_ne_bytes() {
                if byte == 0 {
                    return ret;
                }
                ret.push(byte);
            }
            p += WORD as u64;
        }
    }

    /// Reads a NUL-terminated string, replacing invalid UTF-8.
    pub fn read_string(&self, addr: u64) -> String {
        String::from_utf8_lossy(&self.read_null_terminated(addr)).into_owned()
    }

    /// Reads a NULL-terminated array of string pointers (e.g. an `argv`).
    pub fn read_string_array(&self, addr: u64) -> Vec<String> {
        let mut ret = Vec::new();
        if addr == 0 {
            return ret;
        }

        let mut p = addr;
        loop {
            let word = match ptrace::read(self.pid, p as ptrace::AddressType) {
                Ok(word) => word,
                Err(_) => return ret,
            };
            let pointer = word as u64;
            if pointer == 0 {
                return ret;
            }
            ret.push(self.read_string(pointer));
            p += WORD as u64;
        }
    }
}
