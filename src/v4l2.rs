//! Linux implementation of [`CaptureNode`] on top of the `v4l` crate.
//!
//! Capabilities, format and frame interval go through `v4l::Device` and its
//! [`Capture`] trait. The per-slot buffer protocol (REQBUFS, QUERYBUF,
//! QBUF/DQBUF, STREAMON/OFF) is issued with `v4l::v4l2::ioctl` on the
//! `v4l_sys` structures, because the stream types of `v4l` hide the granted
//! count and the slot indices. Only the uvcvideo extension-unit query is
//! declared here.

use std::io;
use std::mem::size_of;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::time::Duration;

use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::v4l2::{self, vidioc};
use v4l::v4l_sys::{v4l2_buffer, v4l2_control, v4l2_crop, v4l2_cropcap, v4l2_requestbuffers};
use v4l::video::Capture;
use v4l::video::capture::Parameters;
use v4l::{Device, Format, FourCC, Memory};

use crate::buffer::Buffer;
use crate::format::{FourCc, StreamMode};
use crate::node::{BufferInfo, CaptureNode, Capabilities, Dequeued};

const CAPTURE: u32 = Type::VideoCapture as u32;
const MMAP: u32 = Memory::Mmap as u32;

// ---------------------------------------------------------------------------
// uvcvideo extension-unit query (linux/uvcvideo.h)
// ---------------------------------------------------------------------------

#[repr(C)]
struct UvcXuControlQuery {
    unit: u8,
    selector: u8,
    query: u8,
    size: u16,
    data: *mut u8,
}

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = 30;
const IOC_READ_WRITE: u32 = 3;

/// `_IOWR(type, nr, size)`.
const fn iowr(ty: u8, nr: u8, size: usize) -> u32 {
    (IOC_READ_WRITE << IOC_DIRSHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)
}

const UVCIOC_CTRL_QUERY: u32 = iowr(b'u', 0x21, size_of::<UvcXuControlQuery>());

/// `ioctl` that retries on `EINTR`.
fn xioctl<T>(fd: RawFd, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
    loop {
        // SAFETY: `arg` is an exclusive borrow of the structure `request`
        // reads and writes, so the pointer is valid for the whole call.
        match unsafe { v4l2::ioctl(fd, request, (arg as *mut T).cast()) } {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// All-zero kernel structure.
fn zeroed<T: KernelStruct>() -> T {
    // SAFETY: `KernelStruct` is only implemented for bindgen plain-data
    // structures, for which all-zero bytes are a valid value.
    unsafe { std::mem::zeroed() }
}

trait KernelStruct {}
impl KernelStruct for v4l2_buffer {}
impl KernelStruct for v4l2_crop {}
impl KernelStruct for v4l2_cropcap {}
impl KernelStruct for v4l2_requestbuffers {}

fn capture_buffer(index: u32) -> v4l2_buffer {
    let mut buf: v4l2_buffer = zeroed();
    buf.type_ = CAPTURE;
    buf.memory = MMAP;
    buf.index = index;
    buf
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// An open `/dev/videoN` capture node.
pub struct V4l2Node {
    path: PathBuf,
    device: Option<Device>,
}

impl V4l2Node {
    /// Open the node read/write and non-blocking.
    pub fn open(path: &Path) -> io::Result<Self> {
        let device = Device::with_path(path)?;
        Ok(Self {
            path: path.to_owned(),
            device: Some(device),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn device(&self) -> io::Result<&Device> {
        self.device
            .as_ref()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    fn fd(&self) -> io::Result<RawFd> {
        Ok(self.device()?.handle().fd())
    }
}

impl std::fmt::Debug for V4l2Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4l2Node")
            .field("path", &self.path)
            .field("fd", &self.raw_fd())
            .finish()
    }
}

impl CaptureNode for V4l2Node {
    fn raw_fd(&self) -> RawFd {
        self.device.as_ref().map_or(-1, |device| device.handle().fd())
    }

    fn query_capabilities(&self) -> io::Result<Capabilities> {
        let caps = self.device()?.query_caps()?;
        Ok(Capabilities {
            can_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(Flags::STREAMING),
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
        })
    }

    fn reset_crop(&self) -> io::Result<()> {
        let fd = self.fd()?;
        let mut cropcap: v4l2_cropcap = zeroed();
        cropcap.type_ = CAPTURE;
        xioctl(fd, vidioc::VIDIOC_CROPCAP, &mut cropcap)?;

        let mut crop: v4l2_crop = zeroed();
        crop.type_ = CAPTURE;
        crop.c = cropcap.defrect;
        xioctl(fd, vidioc::VIDIOC_S_CROP, &mut crop)
    }

    fn set_format(&self, mode: &StreamMode) -> io::Result<StreamMode> {
        let requested = Format::new(mode.width, mode.height, FourCC::new(&mode.fourcc.0));
        let granted = Capture::set_format(self.device()?, &requested)?;
        Ok(StreamMode {
            width: granted.width,
            height: granted.height,
            fourcc: FourCc(granted.fourcc.repr),
            fps: mode.fps,
        })
    }

    fn set_frame_rate(&self, fps: u32) -> io::Result<()> {
        Capture::set_params(self.device()?, &Parameters::with_fps(fps))?;
        Ok(())
    }

    fn request_buffers(&self, count: u32) -> io::Result<u32> {
        let mut req: v4l2_requestbuffers = zeroed();
        req.count = count;
        req.type_ = CAPTURE;
        req.memory = MMAP;
        xioctl(self.fd()?, vidioc::VIDIOC_REQBUFS, &mut req)?;
        Ok(req.count)
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo> {
        let mut buf = capture_buffer(index);
        xioctl(self.fd()?, vidioc::VIDIOC_QUERYBUF, &mut buf)?;
        Ok(BufferInfo {
            index: buf.index,
            length: buf.length,
            // SAFETY: for MMAP buffers the driver fills the `offset` member.
            offset: unsafe { buf.m.offset },
        })
    }

    fn map_buffer(&self, info: &BufferInfo) -> io::Result<Buffer> {
        let len = info.length as usize;
        // SAFETY: a fresh shared mapping at an address chosen by the kernel;
        // `offset` and `len` come from VIDIOC_QUERYBUF on this descriptor.
        let ptr = unsafe {
            v4l2::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd()?,
                info.offset as libc::off_t,
            )?
        };
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned null"))?;
        // SAFETY: the mapping is `len` bytes long and stays valid until
        // `unmap_buffer` receives the buffer back.
        Ok(unsafe { Buffer::from_raw_parts(ptr, len) })
    }

    fn unmap_buffer(&self, buffer: Buffer) -> io::Result<()> {
        // SAFETY: `buffer` was produced by `map_buffer` and is consumed here,
        // so no slice into the region outlives the unmap.
        unsafe { v4l2::munmap(buffer.as_ptr().cast(), buffer.len()) }
    }

    fn queue_buffer(&self, index: u32) -> io::Result<()> {
        let mut buf = capture_buffer(index);
        xioctl(self.fd()?, vidioc::VIDIOC_QBUF, &mut buf)
    }

    fn dequeue_buffer(&self) -> io::Result<Dequeued> {
        let mut buf = capture_buffer(0);
        xioctl(self.fd()?, vidioc::VIDIOC_DQBUF, &mut buf)?;

        // V4L2 timestamps are monotonic and non-negative in practice.
        let secs = buf.timestamp.tv_sec.max(0) as u64;
        let nanos = (buf.timestamp.tv_usec.max(0) as u32).saturating_mul(1000);
        Ok(Dequeued {
            index: buf.index,
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
            timestamp: Duration::new(secs, nanos),
        })
    }

    fn stream_on(&self) -> io::Result<()> {
        let mut ty = CAPTURE as libc::c_int;
        xioctl(self.fd()?, vidioc::VIDIOC_STREAMON, &mut ty)
    }

    fn stream_off(&self) -> io::Result<()> {
        let mut ty = CAPTURE as libc::c_int;
        xioctl(self.fd()?, vidioc::VIDIOC_STREAMOFF, &mut ty)
    }

    fn xu_query(&self, unit: u8, selector: u8, query: u8, data: &mut [u8]) -> io::Result<()> {
        let size = u16::try_from(data.len())
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        let mut q = UvcXuControlQuery {
            unit,
            selector,
            query,
            size,
            data: data.as_mut_ptr(),
        };
        xioctl(self.fd()?, UVCIOC_CTRL_QUERY as vidioc::_IOC_TYPE, &mut q)
    }

    fn get_control(&self, id: u32) -> io::Result<i32> {
        let mut ctrl = v4l2_control { id, value: 0 };
        xioctl(self.fd()?, vidioc::VIDIOC_G_CTRL, &mut ctrl)?;
        Ok(ctrl.value)
    }

    fn set_control(&self, id: u32, value: i32) -> io::Result<()> {
        let mut ctrl = v4l2_control { id, value };
        xioctl(self.fd()?, vidioc::VIDIOC_S_CTRL, &mut ctrl)
    }

    /// Dropping the `v4l` device closes its descriptor.
    fn close(&mut self) -> io::Result<()> {
        self.device.take();
        Ok(())
    }
}
