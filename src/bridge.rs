//! Buffers that cross a host boundary
//!
//! A [`MemoryBridge`] owns every byte buffer handed to a host and identifies
//! them by [`BufferHandle`]. A handle is a move-only token: [`MemoryBridge::release`]
//! consumes it, so a buffer can be released once at most. Allocation goes
//! through a [`HostAllocator`], which lets hosts cap how much memory the
//! bridge may hold.

use crate::config::{DecoderConfig, EncoderConfig};
use crate::decoder::{DecodeRequest, decode_request};
use crate::encoder::{EncodeRequest, encode_request};
use crate::error::{Error, Result};
use crate::image::{DecodedFrame, DecodedImage, ImageInfo};
use log::{trace, warn};
use whereat::at;

/// Source of zeroed byte buffers for a [`MemoryBridge`]
pub trait HostAllocator {
    /// Allocate `size` zeroed bytes
    fn allocate(&mut self, size: usize) -> Result<Vec<u8>>;

    /// Account for a `len`-byte buffer produced elsewhere and moved in without copying
    fn adopt(&mut self, _len: usize) -> Result<()> {
        Ok(())
    }

    /// A `len`-byte buffer left the bridge
    fn reclaim(&mut self, _len: usize) {}
}

/// Allocates from the global heap, reporting exhaustion instead of aborting
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

impl HostAllocator for SystemAllocator {
    fn allocate(&mut self, size: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).map_err(|e| at(Error::from(e)))?;
        buf.resize(size, 0);
        Ok(buf)
    }
}

/// Allocator with a fixed byte budget, for hosts with a memory cap
#[derive(Debug, Clone)]
pub struct BudgetAllocator {
    remaining: usize,
    inner: SystemAllocator,
}

impl BudgetAllocator {
    pub fn new(budget: usize) -> Self {
        Self {
            remaining: budget,
            inner: SystemAllocator,
        }
    }

    /// Bytes that can still be handed out
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    fn charge(&mut self, size: usize) -> Result<()> {
        self.remaining = self
            .remaining
            .checked_sub(size)
            .ok_or_else(|| at(Error::OutOfMemory))?;
        Ok(())
    }
}

impl HostAllocator for BudgetAllocator {
    fn allocate(&mut self, size: usize) -> Result<Vec<u8>> {
        self.charge(size)?;
        self.inner.allocate(size).inspect_err(|_| self.remaining += size)
    }

    fn adopt(&mut self, len: usize) -> Result<()> {
        self.charge(len)
    }

    fn reclaim(&mut self, len: usize) {
        self.remaining += len;
    }
}

/// Move-only token for a buffer owned by a [`MemoryBridge`]
#[derive(Debug, PartialEq, Eq)]
pub struct BufferHandle {
    slot: usize,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    buf: Option<Vec<u8>>,
}

/// Result of [`MemoryBridge::decode`]
#[derive(Debug)]
pub struct BridgeDecodeOutput {
    /// Container metadata
    pub info: ImageInfo,
    /// Per-frame durations in microseconds, one per decoded frame
    pub durations_micros: Vec<u64>,
    /// All decoded frames, packed back to back; `None` when no frames were decoded
    pub pixels: Option<BufferHandle>,
}

/// Owner of every buffer exchanged with a host
#[derive(Debug)]
pub struct MemoryBridge<A: HostAllocator = SystemAllocator> {
    allocator: A,
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl MemoryBridge<SystemAllocator> {
    pub fn new() -> Self {
        Self::with_allocator(SystemAllocator)
    }
}

impl Default for MemoryBridge<SystemAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: HostAllocator> MemoryBridge<A> {
    pub fn with_allocator(allocator: A) -> Self {
        Self {
            allocator,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Number of buffers acquired and not yet released
    pub fn live_buffers(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Allocate a zeroed buffer of `size` bytes
    pub fn acquire(&mut self, size: usize) -> Result<BufferHandle> {
        let buf = self.allocator.allocate(size)?;
        Ok(self.insert(buf))
    }

    /// Hand an existing vector to the bridge without copying it
    pub fn adopt(&mut self, buf: Vec<u8>) -> Result<BufferHandle> {
        self.allocator.adopt(buf.len())?;
        Ok(self.insert(buf))
    }

    /// Copy `bytes` into a new buffer
    pub fn acquire_from(&mut self, bytes: &[u8]) -> Result<BufferHandle> {
        let handle = self.acquire(bytes.len())?;
        if let Some(dst) = self.get_mut(&handle) {
            dst.copy_from_slice(bytes);
        }
        Ok(handle)
    }

    fn insert(&mut self, buf: Vec<u8>) -> BufferHandle {
        trace!("bridge buffer of {} bytes", buf.len());
        match self.free.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot];
                entry.buf = Some(buf);
                BufferHandle {
                    slot,
                    generation: entry.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    buf: Some(buf),
                });
                BufferHandle {
                    slot: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    fn slot(&self, handle: &BufferHandle) -> Option<&Vec<u8>> {
        self.slots
            .get(handle.slot)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.buf.as_ref())
    }

    pub fn get(&self, handle: &BufferHandle) -> Option<&[u8]> {
        self.slot(handle).map(Vec::as_slice)
    }

    pub fn get_mut(&mut self, handle: &BufferHandle) -> Option<&mut [u8]> {
        self.slots
            .get_mut(handle.slot)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.buf.as_deref_mut())
    }

    /// Free a buffer. Handles from another bridge are ignored with a warning.
    pub fn release(&mut self, handle: BufferHandle) {
        if self.take(handle).is_none() {
            warn!("release of unknown buffer handle");
        }
    }

    /// Remove a buffer from the bridge, returning its contents
    pub fn take(&mut self, handle: BufferHandle) -> Option<Vec<u8>> {
        let entry = self
            .slots
            .get_mut(handle.slot)
            .filter(|s| s.generation == handle.generation)?;
        let buf = entry.buf.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.slot);
        self.allocator.reclaim(buf.len());
        Some(buf)
    }

    fn fill_frames(&mut self, handle: &BufferHandle, frames: &[DecodedFrame]) -> Result<()> {
        let dst = self
            .get_mut(handle)
            .ok_or_else(|| at(Error::UnsupportedConversion("unknown output buffer handle")))?;
        let mut offset = 0;
        for frame in frames {
            let len = frame.pixels.byte_len();
            frame.pixels.write_bytes(&mut dst[offset..offset + len])?;
            offset += len;
        }
        Ok(())
    }

    /// Decode the container held in `input` into a new pixel buffer.
    ///
    /// The input buffer stays owned by the caller. On error no new buffer is
    /// left behind.
    pub fn decode(
        &mut self,
        input: &BufferHandle,
        request: DecodeFlags,
        config: &DecoderConfig,
    ) -> Result<BridgeDecodeOutput> {
        let image = {
            let data = self
                .get(input)
                .ok_or_else(|| at(Error::UnsupportedConversion("unknown input buffer handle")))?;
            decode_request(
                &DecodeRequest::new(data)
                    .config_only(request.config_only)
                    .decode_all(request.decode_all),
                config,
            )?
        };
        let durations_micros = image.durations_micros();
        let DecodedImage { info, frames } = image;

        let pixels = match <[DecodedFrame; 1]>::try_from(frames) {
            Ok([frame]) => Some(self.adopt(frame.pixels.into_bytes()?)?),
            Err(frames) if frames.is_empty() => None,
            Err(frames) => {
                let total = frames.iter().map(|f| f.pixels.byte_len()).sum();
                let handle = self.acquire(total)?;
                if let Err(e) = self.fill_frames(&handle, &frames) {
                    self.release(handle);
                    return Err(e);
                }
                Some(handle)
            }
        };

        Ok(BridgeDecodeOutput {
            info,
            durations_micros,
            pixels,
        })
    }

    /// Encode packed 8-bit RGBA from `input` into a new container buffer
    pub fn encode(
        &mut self,
        input: &BufferHandle,
        width: u32,
        height: u32,
        config: &EncoderConfig,
    ) -> Result<BufferHandle> {
        let encoded = {
            let pixels = self
                .get(input)
                .ok_or_else(|| at(Error::UnsupportedConversion("unknown input buffer handle")))?;
            encode_request(&EncodeRequest::new(pixels, width, height).config(config.clone()))?
        };
        self.adopt(encoded.avif_file)
    }
}

/// Flags of a bridge decode call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeFlags {
    pub config_only: bool,
    pub decode_all: bool,
}

impl Default for DecodeFlags {
    fn default() -> Self {
        Self {
            config_only: false,
            decode_all: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_track_live_buffers() {
        let mut bridge = MemoryBridge::new();
        let a = bridge.acquire(16).unwrap();
        let b = bridge.acquire(0).unwrap();
        assert_eq!(bridge.live_buffers(), 2);
        assert_eq!(bridge.get(&a).unwrap(), &[0u8; 16]);
        bridge.release(a);
        assert_eq!(bridge.live_buffers(), 1);
        bridge.release(b);
        assert_eq!(bridge.live_buffers(), 0);
    }

    #[test]
    fn reused_slot_does_not_honor_old_handle() {
        let mut bridge = MemoryBridge::new();
        let a = bridge.acquire(4).unwrap();
        let stale = BufferHandle {
            slot: a.slot,
            generation: a.generation,
        };
        bridge.release(a);
        let b = bridge.acquire(8).unwrap();
        assert_eq!(b.slot, stale.slot);
        assert!(bridge.get(&stale).is_none());
        bridge.release(stale);
        assert_eq!(bridge.live_buffers(), 1);
        assert_eq!(bridge.get(&b).map(<[u8]>::len), Some(8));
    }

    #[test]
    fn budget_exhaustion_is_out_of_memory() {
        let mut bridge = MemoryBridge::with_allocator(BudgetAllocator::new(100));
        let a = bridge.acquire(60).unwrap();
        let err = bridge.acquire(60).unwrap_err();
        assert!(matches!(err.error(), Error::OutOfMemory));
        assert_eq!(bridge.live_buffers(), 1);
        bridge.release(a);
        assert_eq!(bridge.allocator().remaining(), 100);
        assert!(bridge.acquire(100).is_ok());
    }

    #[test]
    fn take_returns_contents() {
        let mut bridge = MemoryBridge::new();
        let h = bridge.acquire_from(b"abc").unwrap();
        assert_eq!(bridge.take(h).unwrap(), b"abc");
        assert_eq!(bridge.live_buffers(), 0);
    }
}
