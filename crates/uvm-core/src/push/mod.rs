//! Pushbuffer builder.
//!
//! A [`Push`] accumulates methods for one channel. HAL entry points take `&mut Push` and append
//! the encoding for their architecture; [`Push::end`] validates the finished segment against the
//! channel's restrictions and, for channels whose methods are authenticated, signs it.

mod auth;
mod decode;
mod gpfifo;

use std::sync::Arc;

use bitflags::bitflags;
use uvm_hwref::class::{HOST_METHOD_LIMIT, SUBCHANNEL_CE, SUBCHANNEL_HOST, SUBCHANNEL_SEC2, SUBCHANNEL_SW};
use uvm_hwref::host::method as hdr;
use uvm_hwref::sec2;

use crate::address::GpuAddress;
use crate::error::{Result, UvmError};
use crate::hal::{GpuHal, MethodContext};

pub use decode::{decode, Method, MethodOpcode};
pub use gpfifo::GpfifoEntry;

bitflags! {
    /// One-shot hints consumed by the next HAL call that understands them.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PushFlags: u32 {
        /// The next copy-engine operation needs no trailing flush.
        const NEXT_MEMBAR_NONE = 1 << 0;
        /// The next copy-engine operation only needs a GPU-scope flush.
        const NEXT_MEMBAR_GPU = 1 << 1;
        /// The next copy-engine operation may overlap the previous one.
        const CE_NEXT_PIPELINED = 1 << 2;
    }
}

/// Authenticates the methods a channel sends to one subchannel.
#[derive(Clone, PartialEq, Eq)]
pub struct MethodAuth {
    pub key: [u8; 32],
    /// Where the consumer expects the tag. Must be 16-byte aligned.
    pub tag_va: u64,
    pub subchannel: u8,
}

impl std::fmt::Debug for MethodAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodAuth")
            .field("tag_va", &format_args!("{:#x}", self.tag_va))
            .field("subchannel", &self.subchannel)
            .finish_non_exhaustive()
    }
}

/// The channel-side properties a push needs to encode and validate methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub name: String,
    pub privileged: bool,
    /// GPU VA the segment will be copied to; inline data addresses are relative to it.
    pub pushbuffer_va: u64,
    pub auth: Option<MethodAuth>,
}

impl ChannelConfig {
    pub fn kernel(name: impl Into<String>, pushbuffer_va: u64) -> Self {
        Self {
            name: name.into(),
            privileged: true,
            pushbuffer_va,
            auth: None,
        }
    }

    pub fn user(name: impl Into<String>, pushbuffer_va: u64) -> Self {
        Self {
            privileged: false,
            ..Self::kernel(name, pushbuffer_va)
        }
    }

    #[must_use]
    pub fn with_auth(mut self, auth: MethodAuth) -> Self {
        self.auth = Some(auth);
        self
    }
}

/// Finished, validated pushbuffer segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSegment {
    pub channel: String,
    pub va: u64,
    pub words: Vec<u32>,
    pub auth_tag: Option<[u8; 32]>,
    pub privileged: bool,
}

impl PushSegment {
    pub fn methods(&self) -> Result<Vec<Method>> {
        decode(&self.words)
    }

    pub fn gpfifo_entry(&self, hal: &GpuHal, sync: crate::hal::GpfifoSync) -> GpfifoEntry {
        (hal.host.set_gpfifo_entry)(self.va, self.words.len() as u32, sync)
    }
}

/// Consumer of finished segments: the channel manager in the driver, a recorder in tests.
pub trait PushSink {
    fn submit(&mut self, segment: PushSegment) -> Result<()>;
}

/// Keeps every submitted segment.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub segments: Vec<PushSegment>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All methods of all segments, in submission order.
    pub fn methods(&self) -> Result<Vec<Method>> {
        let mut out = Vec::new();
        for segment in &self.segments {
            out.extend(segment.methods()?);
        }
        Ok(out)
    }
}

impl PushSink for RecordingSink {
    fn submit(&mut self, segment: PushSegment) -> Result<()> {
        self.segments.push(segment);
        Ok(())
    }
}

// INC header plus `ADDR_HI`/`ADDR_LO`.
const AUTH_PREFIX_WORDS: usize = 3;

pub struct Push {
    gpu: Arc<GpuHal>,
    channel: ChannelConfig,
    words: Vec<u32>,
    flags: PushFlags,
    error: Option<UvmError>,
}

impl std::fmt::Debug for Push {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Push")
            .field("gpu", &self.gpu.name())
            .field("channel", &self.channel.name)
            .field("words", &self.words.len())
            .field("flags", &self.flags)
            .finish()
    }
}

impl Push {
    pub fn begin(gpu: Arc<GpuHal>, channel: &ChannelConfig) -> Self {
        let mut words = Vec::new();
        if channel.auth.is_some() {
            words.resize(AUTH_PREFIX_WORDS, 0);
        }
        Self {
            gpu,
            channel: channel.clone(),
            words,
            flags: PushFlags::empty(),
            error: None,
        }
    }

    /// Begins a push and runs the host and copy-engine init sequences.
    pub fn begin_with_init(gpu: Arc<GpuHal>, channel: &ChannelConfig) -> Self {
        let mut push = Self::begin(Arc::clone(&gpu), channel);
        (gpu.host.init)(&mut push);
        (gpu.ce.init)(&mut push);
        push
    }

    #[inline]
    pub fn gpu(&self) -> &Arc<GpuHal> {
        &self.gpu
    }

    pub fn channel(&self) -> &ChannelConfig {
        &self.channel
    }

    pub fn method_context(&self) -> MethodContext {
        MethodContext {
            privileged: self.channel.privileged,
            sriov_heavy: self.gpu.info.sriov_heavy,
            confidential_computing: self.gpu.info.confidential_computing,
        }
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn set_flag(&mut self, flag: PushFlags) {
        self.flags |= flag;
    }

    pub fn get_flag(&self, flag: PushFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Reports whether `flag` was set and clears it.
    pub fn get_and_reset_flag(&mut self, flag: PushFlags) -> bool {
        let set = self.flags.contains(flag);
        self.flags.remove(flag);
        set
    }

    /// Records an error surfaced by [`Push::end`]. Only the first error is kept.
    pub fn fail(&mut self, err: UvmError) {
        if self.error.is_none() {
            tracing::debug!(channel = %self.channel.name, "push failed: {err}");
            self.error = Some(err);
        }
    }

    fn header(&mut self, opcode: u32, subchannel: u8, address: u32, count: usize) -> bool {
        if count > hdr::COUNT_MAX as usize {
            self.fail(UvmError::invalid_state(format!(
                "method {address:#x} carries {count} words, max {}",
                hdr::COUNT_MAX
            )));
            return false;
        }
        debug_assert_eq!(address & 0x3, 0);
        self.words.push(
            hdr::OPCODE.value32(opcode)
                | hdr::COUNT.value32(count as u32)
                | hdr::SUBCHANNEL.value32(u32::from(subchannel))
                | hdr::ADDRESS.value32(address >> 2),
        );
        true
    }

    /// Incrementing method: `data[i]` is written to `address + 4 * i`.
    pub fn method(&mut self, subchannel: u8, address: u32, data: &[u32]) {
        if self.header(hdr::OPCODE_INC, subchannel, address, data.len()) {
            self.words.extend_from_slice(data);
        }
    }

    /// Every data word is written to `address`.
    pub fn method_non_incr(&mut self, subchannel: u8, address: u32, data: &[u32]) {
        if self.header(hdr::OPCODE_NON_INC, subchannel, address, data.len()) {
            self.words.extend_from_slice(data);
        }
    }

    /// The first word goes to `address`, the rest to `address + 4`.
    pub fn method_one_incr(&mut self, subchannel: u8, address: u32, data: &[u32]) {
        if self.header(hdr::OPCODE_ONE_INC, subchannel, address, data.len()) {
            self.words.extend_from_slice(data);
        }
    }

    /// Single-word method with the value packed in the header. Values that do not fit fall back
    /// to an incrementing method.
    pub fn immediate(&mut self, subchannel: u8, address: u32, value: u32) {
        if !hdr::IMMEDIATE.fits(u64::from(value)) {
            self.method(subchannel, address, &[value]);
            return;
        }
        self.words.push(
            hdr::OPCODE.value32(hdr::OPCODE_IMMEDIATE)
                | hdr::IMMEDIATE.value32(value)
                | hdr::SUBCHANNEL.value32(u32::from(subchannel))
                | hdr::ADDRESS.value32(address >> 2),
        );
    }

    pub fn host(&mut self, address: u32, data: &[u32]) {
        self.method(SUBCHANNEL_HOST, address, data);
    }

    pub fn ce(&mut self, address: u32, data: &[u32]) {
        self.method(SUBCHANNEL_CE, address, data);
    }

    pub fn sec2(&mut self, address: u32, data: &[u32]) {
        self.method(SUBCHANNEL_SEC2, address, data);
    }

    pub fn sw(&mut self, address: u32, data: &[u32]) {
        self.method(SUBCHANNEL_SW, address, data);
    }

    /// Appends `count` all-zero headers.
    pub fn nop_words(&mut self, count: usize) {
        self.words.resize(self.words.len() + count, 0);
    }

    /// Embeds `bytes` in the pushbuffer behind a host `NOP` and returns the GPU VA they will be
    /// readable at once the segment is submitted.
    pub fn inline_data(&mut self, bytes: &[u8]) -> GpuAddress {
        let count = bytes.len().div_ceil(4);
        let nop = self.gpu.host.nop_method;
        if !self.header(hdr::OPCODE_NON_INC, SUBCHANNEL_HOST, nop, count) {
            return GpuAddress::virt(self.channel.pushbuffer_va);
        }
        let va = self.channel.pushbuffer_va + 4 * self.words.len() as u64;
        for chunk in bytes.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.words.push(u32::from_le_bytes(word));
        }
        GpuAddress::virt(va)
    }

    pub fn inline_u64s(&mut self, values: &[u64]) -> GpuAddress {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.inline_data(&bytes)
    }

    /// Validates and, when the channel authenticates methods, signs the segment.
    pub fn end(self) -> Result<PushSegment> {
        let Push {
            gpu,
            channel,
            mut words,
            error,
            ..
        } = self;
        if let Some(err) = error {
            return Err(err);
        }

        let body_start = if channel.auth.is_some() { AUTH_PREFIX_WORDS } else { 0 };
        let methods = decode(&words[body_start..])?;
        let ctx = MethodContext {
            privileged: channel.privileged,
            sriov_heavy: gpu.info.sriov_heavy,
            confidential_computing: gpu.info.confidential_computing,
        };
        for method in &methods {
            validate_method(&gpu, &ctx, method)?;
        }

        let auth_tag = match &channel.auth {
            None => None,
            Some(auth) => {
                if auth.tag_va % sec2::METHOD_STREAM_AUTH_TAG_ALIGNMENT != 0 {
                    return Err(UvmError::assertion(format!(
                        "auth tag VA {:#x} is not {}-byte aligned",
                        auth.tag_va,
                        sec2::METHOD_STREAM_AUTH_TAG_ALIGNMENT
                    )));
                }
                let mut signed = Vec::new();
                let mut offset = body_start;
                for method in &methods {
                    let len = method.word_len();
                    if method.subchannel == auth.subchannel && method.opcode != MethodOpcode::Nop {
                        signed.push(&words[offset..offset + len]);
                    }
                    offset += len;
                }
                let tag = auth::method_stream_tag(&auth.key, signed)?;
                words[0] = hdr::OPCODE.value32(hdr::OPCODE_INC)
                    | hdr::COUNT.value32(2)
                    | hdr::SUBCHANNEL.value32(u32::from(auth.subchannel))
                    | hdr::ADDRESS.value32(sec2::METHOD_STREAM_AUTH_TAG_ADDR_HI >> 2);
                words[1] = (auth.tag_va >> 32) as u32;
                words[2] = auth.tag_va as u32;
                Some(tag)
            }
        };

        Ok(PushSegment {
            channel: channel.name,
            va: channel.pushbuffer_va,
            words,
            auth_tag,
            privileged: channel.privileged,
        })
    }
}

fn validate_method(gpu: &GpuHal, ctx: &MethodContext, method: &Method) -> Result<()> {
    for (address, value) in method.writes() {
        let host_routed = method.subchannel == SUBCHANNEL_HOST || address < HOST_METHOD_LIMIT;
        let valid = if host_routed {
            if !ctx.privileged && (gpu.host.is_privileged_method)(address, value) {
                return Err(UvmError::assertion(format!(
                    "host method {address:#x} = {value:#x} requires a privileged channel"
                )));
            }
            (gpu.host.method_is_valid)(ctx, address, value)
        } else {
            match method.subchannel {
                SUBCHANNEL_CE => (gpu.ce.method_is_valid)(ctx, address, value),
                SUBCHANNEL_SEC2 => (gpu.sec2.method_is_valid)(ctx, address, value),
                SUBCHANNEL_SW => (gpu.host.sw_method_is_valid)(ctx, address, value),
                _ => true,
            }
        };
        if !valid {
            return Err(UvmError::assertion(format!(
                "method {address:#x} = {value:#x} on subchannel {} rejected by {}",
                method.subchannel,
                gpu.name()
            )));
        }
    }
    Ok(())
}
