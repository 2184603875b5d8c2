//! Frame callback contract between the host and a running core
//!
//! During `run_frame` the core synchronously delivers video and audio and
//! polls input through these callbacks. One callbacks object is supplied per
//! open session and is invoked only from within the frame call, on the
//! caller's thread.

/// Pixel format negotiated by the core for video frame data.
///
/// Raw values follow the classic frontend convention: 0 = XRGB1555,
/// 1 = XRGB8888, 2 = RGB565. Cores that never negotiate get the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 15-bit color, 2 bytes per pixel (the historical default).
    #[default]
    Xrgb1555,
    /// 32-bit color, 4 bytes per pixel.
    Xrgb8888,
    /// 16-bit color, 2 bytes per pixel.
    Rgb565,
}

impl PixelFormat {
    /// Decode a raw format id from the core. Unknown ids are rejected.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Xrgb1555),
            1 => Some(Self::Xrgb8888),
            2 => Some(Self::Rgb565),
            _ => None,
        }
    }

    /// Bytes per pixel for this format.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Xrgb1555 | Self::Rgb565 => 2,
            Self::Xrgb8888 => 4,
        }
    }
}

/// Callbacks supplied by the host to an open session.
///
/// All calls are synchronous: they happen while the core's `run_frame` (or
/// `load_content`) call is on the stack, and the core sees each answer
/// immediately. Input queries are never buffered; the value returned is the
/// instantaneous state at the moment of the call.
pub trait FrameCallbacks: Send {
    /// A completed video frame. `data` holds `height` rows of `pitch` bytes;
    /// only the leading `width * bytes_per_pixel` bytes of each row are
    /// pixel data.
    fn video_frame(&mut self, data: &[u8], width: u32, height: u32, pitch: usize);

    /// A single stereo sample pair.
    fn audio_sample(&mut self, left: i16, right: i16);

    /// A batch of interleaved stereo samples (left, right, left, right, ...).
    /// Returns the number of frames (sample pairs) consumed.
    fn audio_sample_batch(&mut self, samples: &[i16]) -> usize;

    /// Input-state query for (port, device, index, id). Nonzero means
    /// "active"; digital buttons conventionally report 0 or 1.
    fn input_state(&mut self, port: u32, device: u32, index: u32, id: u32) -> i16;

    /// The core negotiated its video pixel format (optional setup callback,
    /// typically delivered during content load).
    fn set_pixel_format(&mut self, _format: PixelFormat) {}
}

/// Callbacks that discard all output and report all inputs inactive.
pub struct NullCallbacks;

impl FrameCallbacks for NullCallbacks {
    fn video_frame(&mut self, _data: &[u8], _width: u32, _height: u32, _pitch: usize) {}

    fn audio_sample(&mut self, _left: i16, _right: i16) {}

    fn audio_sample_batch(&mut self, samples: &[i16]) -> usize {
        samples.len() / 2
    }

    fn input_state(&mut self, _port: u32, _device: u32, _index: u32, _id: u32) -> i16 {
        0
    }
}
