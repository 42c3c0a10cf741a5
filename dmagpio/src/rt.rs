//! Real-time scheduling helpers for the sampler thread.

use tracing::{info, warn};

/// Move the calling thread to `SCHED_FIFO` at `priority`.
///
/// Best effort: without `CAP_SYS_NICE` the request fails and the thread
/// keeps its normal policy.
pub fn promote_current_thread(priority: i32) -> bool {
    #[cfg(target_os = "linux")]
    {
        let param = libc::sched_param {
            sched_priority: priority,
        };
        // SAFETY: pid 0 targets the calling thread and `param` outlives the call.
        let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
        if rc == 0 {
            info!("Sampler running with SCHED_FIFO priority {}", priority);
            true
        } else {
            warn!(
                "SCHED_FIFO priority {} refused: {}",
                priority,
                std::io::Error::last_os_error()
            );
            false
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        warn!("Real-time priority {} unsupported on this platform", priority);
        false
    }
}

/// True if the calling thread runs under a real-time policy.
pub fn is_realtime() -> bool {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: querying the calling thread's policy has no preconditions.
        let policy = unsafe { libc::sched_getscheduler(0) };
        policy == libc::SCHED_FIFO || policy == libc::SCHED_RR
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprivileged_promotion_is_reported_not_fatal() {
        let promoted = promote_current_thread(10);
        assert_eq!(promoted, is_realtime());
    }
}
