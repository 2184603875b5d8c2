//! Host callback imports
//!
//! Cores import these under the `"env"` module. Each function reads from
//! the caller's linear memory where needed and forwards to the session's
//! [`FrameCallbacks`](crate::FrameCallbacks) object held in the store data.
//! Out-of-bounds pointers from the core are dropped with a warning rather
//! than trapping the frame.

use anyhow::Result;
use wasmtime::{Caller, Linker};

use crate::binding::HostContext;
use crate::callbacks::PixelFormat;

/// Register the callback imports with the linker.
pub(crate) fn register_callback_imports(linker: &mut Linker<HostContext>) -> Result<()> {
    linker.func_wrap("env", "video_frame", video_frame)?;
    linker.func_wrap("env", "audio_sample", audio_sample)?;
    linker.func_wrap("env", "audio_sample_batch", audio_sample_batch)?;
    linker.func_wrap("env", "input_state", input_state)?;
    linker.func_wrap("env", "set_pixel_format", set_pixel_format)?;
    linker.func_wrap("env", "log", log_message)?;
    Ok(())
}

/// Deliver a completed video frame: `height` rows of `pitch` bytes at `ptr`.
fn video_frame(mut caller: Caller<'_, HostContext>, ptr: u32, width: u32, height: u32, pitch: u32) {
    let Some(memory) = caller.data().memory else {
        return;
    };
    let (data, ctx) = memory.data_and_store_mut(&mut caller);
    let start = ptr as usize;
    let len = (pitch as usize).saturating_mul(height as usize);
    let Some(end) = start.checked_add(len) else {
        return;
    };
    if end > data.len() {
        log::warn!("core sent video frame outside linear memory, dropping");
        return;
    }
    if let Some(cb) = ctx.callbacks.as_mut() {
        cb.video_frame(&data[start..end], width, height, pitch as usize);
    }
}

/// Deliver one stereo sample pair.
fn audio_sample(mut caller: Caller<'_, HostContext>, left: i32, right: i32) {
    if let Some(cb) = caller.data_mut().callbacks.as_mut() {
        cb.audio_sample(left as i16, right as i16);
    }
}

/// Deliver `frames` interleaved stereo sample pairs starting at `ptr`.
/// Returns the number of frames consumed.
fn audio_sample_batch(mut caller: Caller<'_, HostContext>, ptr: u32, frames: u32) -> u32 {
    let Some(memory) = caller.data().memory else {
        return 0;
    };
    let (data, ctx) = memory.data_and_store_mut(&mut caller);
    let start = ptr as usize;
    let sample_count = frames as usize * 2;
    let Some(end) = start.checked_add(sample_count * 2) else {
        return 0;
    };
    if end > data.len() {
        log::warn!("core sent audio batch outside linear memory, dropping");
        return 0;
    }
    let Some(cb) = ctx.callbacks.as_mut() else {
        return frames;
    };

    let bytes = &data[start..end];
    let consumed = match bytemuck::try_cast_slice::<u8, i16>(bytes) {
        Ok(samples) => cb.audio_sample_batch(samples),
        Err(_) => {
            // Misaligned source pointer: stage a copy.
            let mut staged = vec![0i16; sample_count];
            for (dst, src) in staged.iter_mut().zip(bytes.chunks_exact(2)) {
                *dst = i16::from_le_bytes([src[0], src[1]]);
            }
            cb.audio_sample_batch(&staged)
        }
    };
    consumed as u32
}

/// Poll input state for (port, device, index, id). Cores see the
/// instantaneous answer; nothing is buffered.
fn input_state(mut caller: Caller<'_, HostContext>, port: u32, device: u32, index: u32, id: u32) -> i32 {
    match caller.data_mut().callbacks.as_mut() {
        Some(cb) => i32::from(cb.input_state(port, device, index, id)),
        None => 0,
    }
}

/// Pixel format negotiation (optional setup callback).
fn set_pixel_format(mut caller: Caller<'_, HostContext>, format: u32) {
    let Some(format) = PixelFormat::from_raw(format) else {
        log::warn!("core requested unknown pixel format {format}, keeping current");
        return;
    };
    let ctx = caller.data_mut();
    ctx.pixel_format = format;
    if let Some(cb) = ctx.callbacks.as_mut() {
        cb.set_pixel_format(format);
    }
}

/// Forward a core-side log line.
fn log_message(caller: Caller<'_, HostContext>, ptr: u32, len: u32) {
    let Some(memory) = caller.data().memory else {
        return;
    };
    let data = memory.data(&caller);
    let ptr = ptr as usize;
    let len = len as usize;
    if ptr + len <= data.len() {
        if let Ok(msg) = std::str::from_utf8(&data[ptr..ptr + len]) {
            log::info!("[CORE] {}", msg);
        }
    }
}
