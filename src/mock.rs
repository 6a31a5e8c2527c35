//! In-memory capture node for tests.
//!
//! Readiness is a non-blocking socket pair: the test side writes one byte per
//! event and [`MockNode::raw_fd`] becomes readable, so the real `poll`
//! dispatcher can be driven without hardware.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::buffer::Buffer;
use crate::format::StreamMode;
use crate::node::{BufferInfo, Capabilities, CaptureNode, Dequeued};
use crate::protocol::*;
use crate::registry::NodeIdentity;

/// Kernel-side queue transitions, in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    Queue(u32),
    Dequeue(u32),
}

#[derive(Debug)]
pub(crate) struct MockState {
    pub capabilities: Capabilities,
    pub crop_error: Option<i32>,
    pub adjust_to: Option<(u32, u32)>,
    pub frame_rate: Option<u32>,
    pub granted_buffers: u32,
    pub buffer_len: u32,
    pub fail_stream_on: bool,
    pub fail_map_at: Option<u32>,
    pub dequeue_error: Option<i32>,
    /// Every `request_buffers` count, including releases.
    pub requested: Vec<u32>,
    pub live_mappings: usize,
    pub total_mappings: usize,
    pub queued: Vec<bool>,
    pub events: Vec<Event>,
    pub pending: VecDeque<Dequeued>,
    pub stream_on: bool,
    pub stream_off_calls: usize,
    pub xu_controls: HashMap<u8, Vec<u8>>,
    pub last_unit: Option<u8>,
    pub pu_controls: HashMap<u32, i32>,
    pub closed: bool,
    /// Descriptor reported by `raw_fd` in place of the readiness socket.
    pub raw_fd: Option<RawFd>,
    next_sequence: u32,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            capabilities: Capabilities {
                driver: "uvcvideo".into(),
                card: "Mock Camera".into(),
                bus_info: "usb-0000:00:14.0-1".into(),
                can_capture: true,
                can_stream: true,
            },
            crop_error: None,
            adjust_to: None,
            frame_rate: None,
            granted_buffers: 4,
            buffer_len: 64,
            fail_stream_on: false,
            fail_map_at: None,
            dequeue_error: None,
            requested: Vec::new(),
            live_mappings: 0,
            total_mappings: 0,
            queued: Vec::new(),
            events: Vec::new(),
            pending: VecDeque::new(),
            stream_on: false,
            stream_off_calls: 0,
            xu_controls: HashMap::new(),
            last_unit: None,
            pu_controls: HashMap::new(),
            closed: false,
            raw_fd: None,
            next_sequence: 0,
        }
    }
}

pub(crate) struct MockNode {
    state: Arc<Mutex<MockState>>,
    ready: UnixStream,
}

/// Test-side view of a [`MockNode`].
pub(crate) struct MockHandle {
    state: Arc<Mutex<MockState>>,
    signal: UnixStream,
}

pub(crate) fn mock_node() -> (MockNode, MockHandle) {
    let (ready, signal) = UnixStream::pair().unwrap();
    ready.set_nonblocking(true).unwrap();
    let state = Arc::new(Mutex::new(MockState::default()));
    (
        MockNode { state: Arc::clone(&state), ready },
        MockHandle { state, signal },
    )
}

pub(crate) fn test_identity(vendor_id: u16, product_id: u16, interface: u8) -> NodeIdentity {
    NodeIdentity {
        name: format!("video{interface}"),
        path: PathBuf::from(format!("/dev/video{interface}")),
        vendor_id,
        product_id,
        interface,
        location: None,
    }
}

impl MockHandle {
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock()
    }

    /// Complete a frame into `slot` and make the node readable.
    pub fn push_frame(&self, slot: u32, bytes_used: u32) {
        {
            let mut state = self.state.lock();
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.pending.push_back(Dequeued {
                index: slot,
                bytes_used,
                sequence,
                timestamp: Duration::from_millis(u64::from(sequence) * 33),
            });
        }
        (&self.signal).write_all(&[1]).unwrap();
    }

    /// Make the node readable without completing a frame.
    pub fn signal_spurious(&self) {
        (&self.signal).write_all(&[0]).unwrap();
    }
}

fn os_error(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

impl CaptureNode for MockNode {
    fn raw_fd(&self) -> RawFd {
        self.state.lock().raw_fd.unwrap_or_else(|| self.ready.as_raw_fd())
    }

    fn query_capabilities(&self) -> io::Result<Capabilities> {
        Ok(self.state.lock().capabilities.clone())
    }

    fn reset_crop(&self) -> io::Result<()> {
        match self.state.lock().crop_error {
            Some(code) => Err(os_error(code)),
            None => Ok(()),
        }
    }

    fn set_format(&self, mode: &StreamMode) -> io::Result<StreamMode> {
        let mut granted = *mode;
        if let Some((width, height)) = self.state.lock().adjust_to {
            granted.width = width;
            granted.height = height;
        }
        Ok(granted)
    }

    fn set_frame_rate(&self, fps: u32) -> io::Result<()> {
        self.state.lock().frame_rate = Some(fps);
        Ok(())
    }

    fn request_buffers(&self, count: u32) -> io::Result<u32> {
        let mut state = self.state.lock();
        state.requested.push(count);
        let granted = count.min(state.granted_buffers);
        state.queued = vec![false; granted as usize];
        Ok(granted)
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo> {
        let state = self.state.lock();
        if index as usize >= state.queued.len() {
            return Err(os_error(libc::EINVAL));
        }
        Ok(BufferInfo {
            index,
            length: state.buffer_len,
            offset: index * state.buffer_len,
        })
    }

    fn map_buffer(&self, info: &BufferInfo) -> io::Result<Buffer> {
        let mut state = self.state.lock();
        if state.fail_map_at == Some(info.index) {
            return Err(os_error(libc::ENOMEM));
        }
        let len = info.length as usize;
        let raw = Box::into_raw(vec![info.index as u8; len].into_boxed_slice()) as *mut u8;
        let ptr = NonNull::new(raw).ok_or_else(|| os_error(libc::ENOMEM))?;
        state.live_mappings += 1;
        state.total_mappings += 1;
        // SAFETY: `ptr` comes from a leaked boxed slice of `len` bytes that
        // `unmap_buffer` reclaims.
        Ok(unsafe { Buffer::from_raw_parts(ptr, len) })
    }

    fn unmap_buffer(&self, buffer: Buffer) -> io::Result<()> {
        let slice = std::ptr::slice_from_raw_parts_mut(buffer.as_ptr(), buffer.len());
        // SAFETY: the buffer was leaked from a boxed slice by `map_buffer`.
        drop(unsafe { Box::from_raw(slice) });
        self.state.lock().live_mappings -= 1;
        Ok(())
    }

    fn queue_buffer(&self, index: u32) -> io::Result<()> {
        let mut state = self.state.lock();
        match state.queued.get_mut(index as usize) {
            Some(queued) if !*queued => *queued = true,
            _ => return Err(os_error(libc::EINVAL)),
        }
        state.events.push(Event::Queue(index));
        Ok(())
    }

    fn dequeue_buffer(&self) -> io::Result<Dequeued> {
        let mut byte = [0u8; 1];
        let _ = (&self.ready).read(&mut byte);

        let mut state = self.state.lock();
        if let Some(code) = state.dequeue_error {
            return Err(os_error(code));
        }
        let dequeued = state
            .pending
            .pop_front()
            .ok_or_else(|| os_error(libc::EAGAIN))?;
        if let Some(queued) = state.queued.get_mut(dequeued.index as usize) {
            *queued = false;
        }
        state.events.push(Event::Dequeue(dequeued.index));
        Ok(dequeued)
    }

    fn stream_on(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.fail_stream_on {
            return Err(os_error(libc::EIO));
        }
        state.stream_on = true;
        Ok(())
    }

    fn stream_off(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.stream_off_calls += 1;
        if !state.stream_on {
            return Err(os_error(libc::EINVAL));
        }
        state.stream_on = false;
        state.queued.iter_mut().for_each(|queued| *queued = false);
        Ok(())
    }

    fn xu_query(&self, unit: u8, selector: u8, query: u8, data: &mut [u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        state.last_unit = Some(unit);
        match query {
            UVC_SET_CUR => {
                if let Some(stored) = state.xu_controls.get(&selector) {
                    if stored.len() != data.len() {
                        return Err(os_error(libc::EINVAL));
                    }
                }
                state.xu_controls.insert(selector, data.to_vec());
                Ok(())
            }
            UVC_GET_CUR => {
                let stored = state
                    .xu_controls
                    .get(&selector)
                    .ok_or_else(|| os_error(libc::ENOENT))?;
                if stored.len() != data.len() {
                    return Err(os_error(libc::EINVAL));
                }
                data.copy_from_slice(stored);
                Ok(())
            }
            _ => Err(os_error(libc::EINVAL)),
        }
    }

    fn get_control(&self, id: u32) -> io::Result<i32> {
        self.state
            .lock()
            .pu_controls
            .get(&id)
            .copied()
            .ok_or_else(|| os_error(libc::EINVAL))
    }

    fn set_control(&self, id: u32, value: i32) -> io::Result<()> {
        let mut state = self.state.lock();
        match state.pu_controls.get_mut(&id) {
            Some(current) => {
                *current = value;
                Ok(())
            }
            None => Err(os_error(libc::EINVAL)),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}
