//! Readiness wait and frame dispatch for a set of capturing subdevices.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{Tolerance, UvcError};
use crate::subdevice::Subdevice;

/// A subdevice shared between its [`Device`](crate::Device) and the
/// streaming thread.
pub type SharedSubdevice = Arc<Mutex<Subdevice>>;

/// Wait up to `timeout` for any subdevice to become readable, then dequeue,
/// deliver and re-queue one frame on each ready subdevice.
///
/// Returns the number of frames delivered. An interrupted wait, a timeout
/// and a readiness signal with no completed buffer all deliver nothing and
/// are not errors. An empty set just waits out the timeout.
///
/// Each ready subdevice is locked only while its frame is dispatched, so the
/// sink runs with that subdevice's lock held.
pub fn poll(subdevices: &[SharedSubdevice], timeout: Duration) -> Result<usize, UvcError> {
    let mut fds: Vec<libc::pollfd> = subdevices
        .iter()
        .map(|sub| libc::pollfd {
            fd: sub.lock().raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    // Round up so a sub-millisecond timeout does not degrade into a busy loop.
    let timeout_ms = timeout.as_micros().div_ceil(1000).min(libc::c_int::MAX as u128) as libc::c_int;
    // SAFETY: `fds` is a live, exclusively borrowed array of `fds.len()` entries.
    let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if ready < 0 {
        let err = io::Error::last_os_error();
        if Tolerance::Wait.tolerates(&err) {
            trace!("readiness wait interrupted");
            return Ok(0);
        }
        return Err(UvcError::Poll {
            operation: "poll",
            source: err,
        });
    }
    if ready == 0 {
        return Ok(0);
    }

    let mut delivered = 0;
    for (pfd, sub) in fds.iter().zip(subdevices) {
        if pfd.revents & libc::POLLNVAL != 0 {
            return Err(UvcError::Poll {
                operation: "poll",
                source: io::Error::from_raw_os_error(libc::EBADF),
            });
        }
        if pfd.revents & (libc::POLLIN | libc::POLLERR) == 0 {
            continue;
        }
        if sub.lock().dispatch_ready()? {
            delivered += 1;
        }
    }
    Ok(delivered)
}
