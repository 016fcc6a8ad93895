//! Single-slot message codec.
//!
//! The region holds at most one message at a time. Writers serialize the
//! whole frame into a scratch buffer, copy it into the body area, store
//! the size word, and store the tick word last; the tick store is what
//! publishes the message, so a reader polling under the lock either sees
//! the previous message or the complete new one, never a half-written
//! frame. Readers that consumed a message clear the slot.
//!
//! Body frame, in order:
//!
//! 1. connection name, NUL terminated
//! 2. connection host, NUL terminated
//! 3. protocol version, one ASCII digit `'1'..'4'`
//! 4. version ≥ 2: one flags byte (bit 0 sandboxed, bit 1 https)
//! 5. version ≥ 3: sandbox then SWF version, each an AMF0 number
//!    (`0x00` marker + big-endian f64)
//! 6. version ≥ 3, local-with-file sandbox only: filepath, NUL terminated
//! 7. version ≥ 4: payload AMF version as an AMF0 number (0 or 3)
//! 8. method name, NUL terminated
//! 9. payload bytes, written verbatim and never interpreted
//!
//! The size word at offset 12 covers the whole serialized body, framing
//! plus payload; the payload length is whatever remains after the framing
//! fields.

use std::str;
use std::sync::atomic::{fence, Ordering};

use byteorder::{BigEndian, ByteOrder};
use tracing::debug;

use crate::connection::{AmfVersion, Sandbox, Version};
use crate::errors::{LcshmError, Result};
use crate::layout;

/// AMF0 type marker for a number (an IEEE 754 double).
const AMF0_NUMBER_MARKER: u8 = 0x00;

/// Sandboxed/HTTPS sender flags, present from protocol version 2 on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub sandboxed: bool,
    pub https: bool,
}

impl Flags {
    const SANDBOXED: u8 = 0x01;
    const HTTPS: u8 = 0x02;

    fn bits(self) -> u8 {
        let mut bits = 0;
        if self.sandboxed {
            bits |= Self::SANDBOXED;
        }
        if self.https {
            bits |= Self::HTTPS;
        }
        bits
    }

    fn from_bits(bits: u8) -> Option<Self> {
        if bits & !(Self::SANDBOXED | Self::HTTPS) != 0 {
            return None;
        }
        Some(Self {
            sandboxed: bits & Self::SANDBOXED != 0,
            https: bits & Self::HTTPS != 0,
        })
    }
}

/// Version-gated message fields.
///
/// Each variant carries exactly the fields its protocol revision puts on
/// the wire, so a field that would be absent for the version cannot be
/// populated at all.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    V1,
    V2(Flags),
    V3 {
        flags: Flags,
        sandbox: Sandbox,
        swfv: u32,
        /// Serialized only under the local-with-file sandbox. Required
        /// there; silently omitted everywhere else.
        filepath: Option<String>,
    },
    V4 {
        flags: Flags,
        sandbox: Sandbox,
        swfv: u32,
        filepath: Option<String>,
        amfv: AmfVersion,
    },
}

impl Envelope {
    pub fn version(&self) -> Version {
        match self {
            Envelope::V1 => Version::V1,
            Envelope::V2(_) => Version::V2,
            Envelope::V3 { .. } => Version::V3,
            Envelope::V4 { .. } => Version::V4,
        }
    }

    pub fn flags(&self) -> Option<Flags> {
        match self {
            Envelope::V1 => None,
            Envelope::V2(flags) => Some(*flags),
            Envelope::V3 { flags, .. } | Envelope::V4 { flags, .. } => Some(*flags),
        }
    }

    pub fn sandbox(&self) -> Option<Sandbox> {
        match self {
            Envelope::V3 { sandbox, .. } | Envelope::V4 { sandbox, .. } => Some(*sandbox),
            _ => None,
        }
    }

    pub fn swfv(&self) -> Option<u32> {
        match self {
            Envelope::V3 { swfv, .. } | Envelope::V4 { swfv, .. } => Some(*swfv),
            _ => None,
        }
    }

    pub fn filepath(&self) -> Option<&str> {
        match self {
            Envelope::V3 { filepath, .. } | Envelope::V4 { filepath, .. } => filepath.as_deref(),
            _ => None,
        }
    }

    pub fn amfv(&self) -> Option<AmfVersion> {
        match self {
            Envelope::V4 { amfv, .. } => Some(*amfv),
            _ => None,
        }
    }
}

/// One framed message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Publication stamp; never 0 for a written message.
    pub tick: u32,
    /// Sending connection name.
    pub name: String,
    /// Sending connection host.
    pub host: String,
    /// Version-gated sender attributes.
    pub envelope: Envelope,
    /// Method name for the receiver to invoke.
    pub method: String,
    /// Opaque payload, encoded per the envelope's AMF version.
    pub data: Vec<u8>,
}

/// Current slot tick without parsing the frame. 0 means the slot is empty.
///
/// Caller must hold the channel lock.
pub fn tick_of(region: &[u8]) -> u32 {
    layout::read_u32(region, layout::MESSAGE_TICK_OFFSET)
}

/// Write `message` into the slot, overwriting any previous message.
///
/// Caller must hold the channel lock. The frame is serialized off-region
/// first; a message that fails validation or exceeds the size cap leaves
/// the region untouched. The tick word is stored last, after a fence, so
/// the message only becomes visible once complete.
pub fn write(region: &mut [u8], message: &Message) -> Result<()> {
    debug_assert_eq!(region.len(), layout::SIZE);

    if message.tick == 0 {
        return Err(LcshmError::InvalidArgument("tick must be non-zero"));
    }

    let body = encode_body(message)?;
    if body.len() > layout::MESSAGE_MAX_SIZE {
        return Err(LcshmError::TooLarge {
            size: body.len(),
            max: layout::MESSAGE_MAX_SIZE,
        });
    }

    let start = layout::MESSAGE_BODY_OFFSET;
    region[start..start + body.len()].copy_from_slice(&body);
    layout::write_u32(region, layout::MESSAGE_SIZE_OFFSET, body.len() as u32);

    // The semaphore is the ordering primitive between processes, but
    // semaphore implementations differ in the ordering they guarantee;
    // fence so the tick store cannot be observed before the body.
    fence(Ordering::SeqCst);
    layout::write_u32(region, layout::MESSAGE_TICK_OFFSET, message.tick);
    Ok(())
}

/// Read the current message, or `None` when the slot is empty.
///
/// Caller must hold the channel lock. A slot whose size word or frame
/// fields do not parse is reported as [`LcshmError::Corrupt`]; the caller
/// may [`clear`] it.
pub fn read(region: &[u8]) -> Result<Option<Message>> {
    debug_assert_eq!(region.len(), layout::SIZE);

    let tick = tick_of(region);
    if tick == 0 {
        return Ok(None);
    }

    let size = layout::read_u32(region, layout::MESSAGE_SIZE_OFFSET) as usize;
    if size == 0 || size > layout::MESSAGE_MAX_SIZE {
        debug!(size, "message slot has out-of-range size");
        return Err(LcshmError::Corrupt("message size out of range"));
    }

    let start = layout::MESSAGE_BODY_OFFSET;
    let mut parser = BodyParser::new(&region[start..start + size]);

    let name = parser.take_text()?.to_owned();
    let host = parser.take_text()?.to_owned();

    let version = Version::from_digit(parser.take_byte()?)
        .ok_or(LcshmError::Corrupt("unknown protocol version"))?;

    let envelope = match version {
        Version::V1 => Envelope::V1,
        Version::V2 => Envelope::V2(parser.take_flags()?),
        Version::V3 => {
            let (flags, sandbox, swfv, filepath) = parser.take_sender_identity()?;
            Envelope::V3 {
                flags,
                sandbox,
                swfv,
                filepath,
            }
        }
        Version::V4 => {
            let (flags, sandbox, swfv, filepath) = parser.take_sender_identity()?;
            let amfv = parser.take_amf_version()?;
            Envelope::V4 {
                flags,
                sandbox,
                swfv,
                filepath,
                amfv,
            }
        }
    };

    let method = parser.take_text()?.to_owned();
    let data = parser.remainder().to_vec();

    Ok(Some(Message {
        tick,
        name,
        host,
        envelope,
        method,
        data,
    }))
}

/// Empty the slot: zero the tick and size words and the leading body
/// bytes. Idempotent; the rest of the body is left as garbage.
///
/// Caller must hold the channel lock.
pub fn clear(region: &mut [u8]) {
    debug_assert_eq!(region.len(), layout::SIZE);

    layout::write_u32(region, layout::MESSAGE_TICK_OFFSET, 0);
    layout::write_u32(region, layout::MESSAGE_SIZE_OFFSET, 0);
    let start = layout::MESSAGE_BODY_OFFSET;
    region[start..start + 8].fill(0);
}

fn encode_body(message: &Message) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(
        message.name.len() + message.host.len() + message.method.len() + message.data.len() + 32,
    );

    push_text(&mut body, &message.name)?;
    push_text(&mut body, &message.host)?;
    body.push(message.envelope.version().digit());

    match &message.envelope {
        Envelope::V1 => {}
        Envelope::V2(flags) => body.push(flags.bits()),
        Envelope::V3 {
            flags,
            sandbox,
            swfv,
            filepath,
        } => {
            push_sender_identity(&mut body, *flags, *sandbox, *swfv, filepath.as_deref())?;
        }
        Envelope::V4 {
            flags,
            sandbox,
            swfv,
            filepath,
            amfv,
        } => {
            push_sender_identity(&mut body, *flags, *sandbox, *swfv, filepath.as_deref())?;
            push_amf0_number(&mut body, f64::from(amfv.as_u32()));
        }
    }

    push_text(&mut body, &message.method)?;
    body.extend_from_slice(&message.data);
    Ok(body)
}

fn push_sender_identity(
    body: &mut Vec<u8>,
    flags: Flags,
    sandbox: Sandbox,
    swfv: u32,
    filepath: Option<&str>,
) -> Result<()> {
    body.push(flags.bits());
    push_amf0_number(body, sandbox.as_f64());
    push_amf0_number(body, f64::from(swfv));
    if sandbox == Sandbox::LocalWithFile {
        match filepath {
            Some(path) => push_text(body, path)?,
            None => {
                return Err(LcshmError::InvalidArgument(
                    "local-with-file messages carry a filepath",
                ))
            }
        }
    }
    Ok(())
}

fn push_text(body: &mut Vec<u8>, text: &str) -> Result<()> {
    if text.as_bytes().contains(&0) {
        return Err(LcshmError::InvalidArgument("text fields must not contain NUL"));
    }
    body.extend_from_slice(text.as_bytes());
    body.push(0);
    Ok(())
}

fn push_amf0_number(body: &mut Vec<u8>, value: f64) {
    body.push(AMF0_NUMBER_MARKER);
    let mut buf = [0u8; 8];
    BigEndian::write_f64(&mut buf, value);
    body.extend_from_slice(&buf);
}

/// Bounds-checked cursor over the declared body bytes. Every field must
/// end inside the declared size or the frame is corrupt.
struct BodyParser<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> BodyParser<'a> {
    fn new(body: &'a [u8]) -> Self {
        Self { body, pos: 0 }
    }

    fn take_text(&mut self) -> Result<&'a str> {
        let rest = &self.body[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(LcshmError::Corrupt("unterminated text field"))?;
        let text = str::from_utf8(&rest[..nul])
            .map_err(|_| LcshmError::Corrupt("text field is not UTF-8"))?;
        self.pos += nul + 1;
        Ok(text)
    }

    fn take_byte(&mut self) -> Result<u8> {
        let byte = *self
            .body
            .get(self.pos)
            .ok_or(LcshmError::Corrupt("truncated frame"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn take_flags(&mut self) -> Result<Flags> {
        Flags::from_bits(self.take_byte()?).ok_or(LcshmError::Corrupt("unknown flag bits"))
    }

    fn take_amf0_number(&mut self) -> Result<f64> {
        if self.take_byte()? != AMF0_NUMBER_MARKER {
            return Err(LcshmError::Corrupt("expected an AMF0 number"));
        }
        let end = self.pos + 8;
        let bytes = self
            .body
            .get(self.pos..end)
            .ok_or(LcshmError::Corrupt("truncated AMF0 number"))?;
        self.pos = end;
        Ok(BigEndian::read_f64(bytes))
    }

    fn take_integer(&mut self, reason: &'static str) -> Result<i64> {
        let value = self.take_amf0_number()?;
        if !value.is_finite() || value.fract() != 0.0 {
            return Err(LcshmError::Corrupt(reason));
        }
        Ok(value as i64)
    }

    fn take_sender_identity(&mut self) -> Result<(Flags, Sandbox, u32, Option<String>)> {
        let flags = self.take_flags()?;
        let sandbox = self.take_integer("sandbox is not an integer")?;
        let sandbox = i32::try_from(sandbox)
            .ok()
            .and_then(|v| Sandbox::try_from(v).ok())
            .ok_or(LcshmError::Corrupt("sandbox value out of range"))?;
        let swfv = self.take_integer("swf version is not an integer")?;
        let swfv =
            u32::try_from(swfv).map_err(|_| LcshmError::Corrupt("swf version out of range"))?;
        let filepath = if sandbox == Sandbox::LocalWithFile {
            Some(self.take_text()?.to_owned())
        } else {
            None
        };
        Ok((flags, sandbox, swfv, filepath))
    }

    fn take_amf_version(&mut self) -> Result<AmfVersion> {
        let value = self.take_integer("amf version is not an integer")?;
        u32::try_from(value)
            .ok()
            .and_then(|v| AmfVersion::try_from(v).ok())
            .ok_or(LcshmError::Corrupt("amf version out of range"))
    }

    fn remainder(self) -> &'a [u8] {
        &self.body[self.pos..]
    }
}
