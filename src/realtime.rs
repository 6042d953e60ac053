//! Best-effort real-time preparation of the measurement thread, gated
//! behind the `realtime` feature flag (`mlockall`, CPU affinity,
//! `SCHED_FIFO`).
//!
//! Uses `nix`/`libc` calls (`mlockall`, `sched_setaffinity`,
//! `sched_setscheduler`, stack prefaulting) bracketed by a scoped guard
//! around one benchmark's sampling pass. Off by default: it requires
//! elevated privileges (`CAP_SYS_NICE` at least) on most hosts, and it is
//! never required for correctness — lower scheduling jitter only tightens
//! the observed RCIW faster.

#![cfg(feature = "realtime")]

use nix::sched::{sched_setaffinity, CpuSet};
use nix::sys::mman::{mlockall, MlockAllFlags};
use nix::unistd::Pid;

use crate::error::BenchError;

/// `SCHED_FIFO` priority applied to the measurement thread: high, but
/// within the FIFO range (1-99) with headroom for host tasks that
/// legitimately need to preempt it.
const SCHED_FIFO_PRIORITY: i32 = 80;

/// Marker that real-time settings were applied to the calling thread.
/// Nothing is restored on drop: the settings are thread-local (affinity,
/// scheduling class) or process-wide-but-harmless (`mlockall`), and the
/// process exits shortly after the benchmark run completes. Only
/// collector tuning has a documented restore-on-exit contract.
pub struct RealtimeGuard {
    core: usize,
}

impl RealtimeGuard {
    /// Lock the process's memory, prefault the stack, pin the calling
    /// thread to `core`, and raise it to `SCHED_FIFO` priority. Must be
    /// called on the thread that will run the sampling loop, since the
    /// measured function always runs on the measurement thread.
    pub fn prepare(core: usize) -> Result<Self, BenchError> {
        mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)
            .map_err(|e| BenchError::Config(format!("mlockall failed: {e}")))?;
        prefault_stack();
        set_cpu_affinity(core)?;
        set_sched_fifo()?;
        Ok(RealtimeGuard { core })
    }

    /// The core the measurement thread was pinned to.
    pub fn core(&self) -> usize {
        self.core
    }
}

/// Touch every page of an 8 KiB stack buffer so the first real sample
/// doesn't pay for a page fault the benchmark body didn't cause.
fn prefault_stack() {
    let mut buffer = [0u8; 8192];
    for i in (0..buffer.len()).step_by(4096) {
        unsafe {
            std::ptr::write_volatile(&mut buffer[i], 1);
        }
    }
}

fn set_cpu_affinity(core: usize) -> Result<(), BenchError> {
    let mut set = CpuSet::new();
    set.set(core)
        .map_err(|e| BenchError::Config(format!("invalid core {core}: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &set)
        .map_err(|e| BenchError::Config(format!("sched_setaffinity failed: {e}")))
}

fn set_sched_fifo() -> Result<(), BenchError> {
    // SAFETY: `param` is a plain-old-data struct fully zero-initialized
    // before its one field is set; `sched_setscheduler` is a pure syscall
    // wrapper with no side effects beyond what it documents.
    unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = SCHED_FIFO_PRIORITY;
        let rc = libc::sched_setscheduler(0, libc::SCHED_FIFO, &param);
        if rc != 0 {
            return Err(BenchError::Config(format!(
                "sched_setscheduler failed: {}",
                std::io::Error::last_os_error()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefault_stack_does_not_panic() {
        prefault_stack();
    }
}
