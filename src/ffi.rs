//! Raw `extern "C"` entry points (feature `c_api`)
//!
//! Every buffer returned to the host is allocated with a hidden size prefix,
//! so [`deallocate`] takes only the pointer. Outputs of [`decode`] and
//! [`encode`] are released with [`deallocate`] as well.

use crate::config::{DecoderConfig, EncoderConfig};
use crate::decoder::{DecodeRequest, decode_request};
use crate::encoder::{EncodeRequest, encode_request};
use crate::error::{Error, Result};
use crate::image::{ChannelLayout, DecodedImage};
use std::alloc::{self, Layout};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use whereat::at;

/// Size prefix; also the alignment of every returned pointer
const HEADER: usize = 16;

fn prefixed_layout(size: usize) -> Option<Layout> {
    let total = size.checked_add(HEADER)?;
    Layout::from_size_align(total, HEADER).ok()
}

/// Allocate `size` zeroed bytes behind a size prefix; null on exhaustion
fn try_alloc_prefixed(size: usize) -> *mut u8 {
    let Some(layout) = prefixed_layout(size) else {
        return ptr::null_mut();
    };
    // SAFETY: the layout has non-zero size (at least HEADER bytes).
    let base = unsafe { alloc::alloc_zeroed(layout) };
    if base.is_null() {
        return base;
    }
    // SAFETY: base is HEADER-aligned and at least HEADER bytes long.
    unsafe {
        base.cast::<usize>().write(size);
        base.add(HEADER)
    }
}

/// Copy `bytes` into a new prefixed allocation
fn export_bytes(bytes: &[u8]) -> Result<*mut u8> {
    let out = try_alloc_prefixed(bytes.len());
    if out.is_null() {
        return Err(at(Error::OutOfMemory));
    }
    // SAFETY: out points to bytes.len() writable bytes that do not overlap bytes.
    unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), out, bytes.len()) };
    Ok(out)
}

/// Allocate `size` bytes for the host. Aborts the process when memory is exhausted.
#[unsafe(no_mangle)]
pub extern "C" fn allocate(size: usize) -> *mut u8 {
    let out = try_alloc_prefixed(size);
    if out.is_null() {
        match prefixed_layout(size) {
            Some(layout) => alloc::handle_alloc_error(layout),
            None => std::process::abort(),
        }
    }
    out
}

/// Free a buffer returned by [`allocate`], [`decode`] or [`encode`]. Null is ignored.
///
/// # Safety
///
/// `ptr` must be null or a pointer returned by this module that has not been
/// freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn deallocate(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: per the contract, ptr sits HEADER bytes into an allocation whose
    // first word holds the requested size.
    unsafe {
        let base = ptr.sub(HEADER);
        let size = base.cast::<usize>().read();
        let layout = Layout::from_size_align_unchecked(size + HEADER, HEADER);
        alloc::dealloc(base, layout);
    }
}

struct HostImage {
    image: DecodedImage,
    durations: *mut u8,
    pixels: *mut u8,
}

fn decode_for_host(data: &[u8], config_only: bool, decode_all: bool) -> Result<HostImage> {
    let request = DecodeRequest::new(data)
        .config_only(config_only)
        .decode_all(decode_all);
    let image = decode_request(&request, &DecoderConfig::default())?;
    if image.frames.is_empty() {
        return Ok(HostImage {
            image,
            durations: ptr::null_mut(),
            pixels: ptr::null_mut(),
        });
    }

    let secs: Vec<u8> = image
        .frames
        .iter()
        .flat_map(|f| f.duration_secs().to_ne_bytes())
        .collect();
    let durations = export_bytes(&secs)?;

    let total: usize = image.frames.iter().map(|f| f.pixels.byte_len()).sum();
    let pixels = try_alloc_prefixed(total);
    if pixels.is_null() {
        // SAFETY: durations came from try_alloc_prefixed above.
        unsafe { deallocate(durations) };
        return Err(at(Error::OutOfMemory));
    }
    // SAFETY: pixels points to `total` zeroed bytes owned by us.
    let dst = unsafe { std::slice::from_raw_parts_mut(pixels, total) };
    let mut offset = 0;
    for frame in &image.frames {
        let len = frame.pixels.byte_len();
        if let Err(e) = frame.pixels.write_bytes(&mut dst[offset..offset + len]) {
            // SAFETY: both pointers came from try_alloc_prefixed above.
            unsafe {
                deallocate(durations);
                deallocate(pixels);
            }
            return Err(e);
        }
        offset += len;
    }
    Ok(HostImage {
        image,
        durations,
        pixels,
    })
}

/// Decode a container.
///
/// Returns 1 on success and 0 on failure, in which case no output is written.
/// `*durations` receives one `f64` (seconds) per decoded frame and `*pixels`
/// the RGBA frames back to back (8 or 16 bits per channel, see `*bit_depth`);
/// both are null when no frames were decoded.
///
/// # Safety
///
/// `input` must point to `size` readable bytes. Every output pointer must be
/// valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn decode(
    input: *const u8,
    size: usize,
    config_only: bool,
    decode_all: bool,
    width: *mut u32,
    height: *mut u32,
    bit_depth: *mut u8,
    frame_count: *mut u32,
    durations: *mut *mut f64,
    pixels: *mut *mut u8,
) -> i32 {
    if input.is_null()
        || width.is_null()
        || height.is_null()
        || bit_depth.is_null()
        || frame_count.is_null()
        || durations.is_null()
        || pixels.is_null()
    {
        return 0;
    }
    // SAFETY: caller guarantees input points to size readable bytes.
    let data = unsafe { std::slice::from_raw_parts(input, size) };
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        decode_for_host(data, config_only, decode_all)
    }));
    let host = match result {
        Ok(Ok(host)) => host,
        Ok(Err(e)) => {
            log::debug!("decode failed: {e}");
            return 0;
        }
        Err(_) => return 0,
    };
    let info = &host.image.info;
    // SAFETY: caller guarantees the output pointers are writable.
    unsafe {
        *width = info.width;
        *height = info.height;
        *bit_depth = info.bit_depth;
        *frame_count = info.frame_count;
        *durations = host.durations.cast::<f64>();
        *pixels = host.pixels;
    }
    1
}

fn encode_for_host(
    input: &[u8],
    width: u32,
    height: u32,
    config: EncoderConfig,
) -> Result<Vec<u8>> {
    let request = EncodeRequest::new(input, width, height).config(config);
    Ok(encode_request(&request)?.avif_file)
}

/// Encode `width * height` packed RGBA8 pixels.
///
/// `chroma` is 1 for 4:4:4, 2 for 4:2:2 and 3 for 4:2:0. Returns the
/// container and stores its length in `*size`, or returns null on failure.
///
/// # Safety
///
/// `pixels` must point to `width * height * 4` readable bytes and `size`
/// must be valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn encode(
    pixels: *const u8,
    width: u32,
    height: u32,
    size: *mut usize,
    quality: i32,
    quality_alpha: i32,
    speed: i32,
    chroma: i32,
) -> *mut u8 {
    if pixels.is_null() || size.is_null() {
        return ptr::null_mut();
    }
    let Some(layout) = ChannelLayout::from_chroma_code(chroma) else {
        return ptr::null_mut();
    };
    let Some(len) = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
    else {
        return ptr::null_mut();
    };
    // out-of-range values reach the codec as 255 and are rejected there
    let param = |v: i32| u8::try_from(v).unwrap_or(u8::MAX);
    let config = EncoderConfig::new()
        .quality(param(quality))
        .alpha_quality(param(quality_alpha))
        .speed(param(speed))
        .layout(layout);

    // SAFETY: caller guarantees pixels points to width * height * 4 bytes.
    let input = unsafe { std::slice::from_raw_parts(pixels, len) };
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        encode_for_host(input, width, height, config).and_then(|bytes| {
            let out = export_bytes(&bytes)?;
            Ok((out, bytes.len()))
        })
    }));
    match result {
        Ok(Ok((out, len))) => {
            // SAFETY: caller guarantees size is writable.
            unsafe { *size = len };
            out
        }
        Ok(Err(e)) => {
            log::debug!("encode failed: {e}");
            ptr::null_mut()
        }
        Err(_) => ptr::null_mut(),
    }
}
