//! Pixel codes and stream modes.

use std::fmt;
use std::str::FromStr;

/// Four-character pixel code (e.g. `YUYV`, `Z16 `).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// Packed 4:2:2 luma/chroma.
    pub const YUYV: Self = Self::new(b"YUYV");
    /// Packed 4:2:2 chroma/luma.
    pub const UYVY: Self = Self::new(b"UYVY");
    /// Motion JPEG.
    pub const MJPG: Self = Self::new(b"MJPG");
    /// 8-bit greyscale.
    pub const GREY: Self = Self::new(b"GREY");
    /// 16-bit depth.
    pub const Z16: Self = Self::new(b"Z16 ");
    /// 16-bit infrared.
    pub const INVR: Self = Self::new(b"INVR");

    /// The code as V4L2 packs it into `pixelformat` (first character in the
    /// least significant byte).
    pub const fn to_v4l2(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub const fn from_v4l2(code: u32) -> Self {
        Self(code.to_le_bytes())
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

/// Error returned when a string is not a valid four-character code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("pixel code must be 1-4 ASCII characters, got {0:?}")]
pub struct ParseFourCcError(pub String);

impl FromStr for FourCc {
    type Err = ParseFourCcError;

    /// Codes shorter than four characters are padded with spaces (`Z16` → `Z16 `).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 4 || !s.is_ascii() {
            return Err(ParseFourCcError(s.to_owned()));
        }
        let mut code = [b' '; 4];
        code[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self(code))
    }
}

/// Capture configuration for one subdevice.
///
/// The driver may adjust width and height during negotiation; see
/// [`Subdevice::negotiated_mode`](crate::Subdevice::negotiated_mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMode {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCc,
    /// Frames per second; 0 leaves the frame interval at the driver default.
    pub fps: u32,
}

impl StreamMode {
    pub const fn new(width: u32, height: u32, fourcc: FourCc, fps: u32) -> Self {
        Self { width, height, fourcc, fps }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {} @ {} fps", self.width, self.height, self.fourcc, self.fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4l2_packing_is_little_endian() {
        // v4l2_fourcc('Y','U','Y','V')
        assert_eq!(FourCc::YUYV.to_v4l2(), 0x5659_5559);
        assert_eq!(FourCc::from_v4l2(0x5659_5559), FourCc::YUYV);
    }

    #[test]
    fn parse_pads_short_codes() {
        assert_eq!("Z16".parse::<FourCc>().unwrap(), FourCc::Z16);
        assert_eq!("YUYV".parse::<FourCc>().unwrap(), FourCc::YUYV);
        assert!("".parse::<FourCc>().is_err());
        assert!("TOOLONG".parse::<FourCc>().is_err());
    }

    #[test]
    fn display_escapes_non_printable() {
        assert_eq!(FourCc::INVR.to_string(), "INVR");
        assert_eq!(FourCc([b'A', 0, b'B', b' ']).to_string(), "A\\x00B ");
        let mode = StreamMode::new(640, 480, FourCc::YUYV, 30);
        assert_eq!(mode.to_string(), "640x480 YUYV @ 30 fps");
    }
}
