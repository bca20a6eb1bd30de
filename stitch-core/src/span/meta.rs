//! Durable span metadata and its binary codec.

use super::fields;
use super::point::Point;
use crate::types::{Id64, Id128};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Codec version tag for encoded records.
const META_VERSION: u8 = 1;

/// Serialized size of one record: version byte, ten u64 fields, four tag
/// bytes.
pub(crate) const META_ENCODED_SIZE: usize = 1 + 8 * 10 + 4;

/// Transfer direction of the observed network event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    /// Request entering this process.
    Incoming = 0,
    /// Request leaving this process.
    Outgoing = 1,
}

impl Direction {
    /// Parse the wire representation.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            fields::DIRECTION_INCOMING => Some(Self::Incoming),
            fields::DIRECTION_OUTGOING => Some(Self::Outgoing),
            _ => None,
        }
    }

    /// The wire representation.
    #[must_use]
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Incoming => fields::DIRECTION_INCOMING,
            Self::Outgoing => fields::DIRECTION_OUTGOING,
        }
    }
}

/// Span kind as observed by the kernel probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SpanKind {
    /// Where a thread begins handling an incoming request.
    Entry = 0,
    /// An outbound call made while handling a request.
    Exit = 1,
}

impl SpanKind {
    /// Parse the wire representation.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            fields::SPAN_TYPE_ENTRY => Some(Self::Entry),
            fields::SPAN_TYPE_EXIT => Some(Self::Exit),
            _ => None,
        }
    }

    /// The wire representation.
    #[must_use]
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Entry => fields::SPAN_TYPE_ENTRY,
            Self::Exit => fields::SPAN_TYPE_EXIT,
        }
    }
}

/// Encoding convention for the final exported identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Encode {
    /// Big-endian hex, the kernel/network convention.
    #[default]
    Hex = 0,
    /// Decimal, used by 64-bit application tracers.
    Dec = 1,
}

/// Sampling decision attached to a span.
///
/// Decisions aggregate across a trace with precedence
/// explicit-reject > explicit-keep > unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i8)]
pub enum SampleDecision {
    /// Explicitly rejected by app instrumentation or the sampler.
    Reject = -1,
    /// No decision yet; subject to probabilistic sampling.
    #[default]
    Unset = 0,
    /// Explicitly kept.
    Keep = 1,
}

impl SampleDecision {
    /// Combine two decisions, strongest wins.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Reject, _) | (_, Self::Reject) => Self::Reject,
            (Self::Keep, _) | (_, Self::Keep) => Self::Keep,
            _ => Self::Unset,
        }
    }

    fn from_wire(v: i64) -> Self {
        match v {
            1 => Self::Keep,
            -1 => Self::Reject,
            _ => Self::Unset,
        }
    }
}

/// The durable record attached to each captured point.
///
/// Everything up to `etrace_id` is filled at capture time from the point's
/// well-known fields; the assigned identifiers are written during
/// correlation.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanMeta {
    /// 64-bit span identifier.
    pub span_id: Id64,
    /// Same-thread correlation key; zero when the probe saw none.
    pub thread_trace_id: Id64,
    /// Network-flow correlation key built from request/response sequence
    /// numbers; zero when the span was not tied to a flow.
    pub net_trace_id: Id128,
    /// Transfer direction.
    pub direction: Direction,
    /// Entry (server) or exit (client) leg.
    pub kind: SpanKind,
    /// Kernel-synthesized trace id, assigned during correlation.
    pub etrace_id: Id128,
    /// Kernel-synthesized parent id, assigned during correlation.
    pub eparent_id: Id64,
    /// Application-instrumented trace id, if app tracing coexisted.
    pub app_trace_id: Id128,
    /// Application-instrumented parent id.
    pub app_parent_id: Id64,
    /// Application sampling decision.
    pub app_sampled: SampleDecision,
    /// Encoding convention for the exported identifiers.
    pub encode: Encode,
}

impl SpanMeta {
    /// Decode span metadata from a point's well-known fields.
    ///
    /// Returns `None` when the point does not carry a decodable span:
    /// missing span id, or an absent/unknown direction or span type.
    /// Points without sequence numbers still decode; they simply never
    /// join a network flow.
    #[must_use]
    pub fn from_point(pt: &Point) -> Option<Self> {
        let span_id = Id64::new(pt.get_u64(fields::SPAN_ID)?);
        let direction = Direction::from_wire(pt.get_str(fields::DIRECTION)?)?;
        let kind = SpanKind::from_wire(pt.get_str(fields::EBPF_SPAN_TYPE)?)?;

        let thread_trace_id = Id64::new(pt.get_u64(fields::THREAD_TRACE_ID).unwrap_or(0));
        let req_seq = pt.get_u64(fields::REQ_SEQ).unwrap_or(0);
        let resp_seq = pt.get_u64(fields::RESP_SEQ).unwrap_or(0);
        let net_trace_id = Id128::new(req_seq, resp_seq);

        let app_trace_id = Id128::new(
            pt.get_u64(fields::APP_TRACE_ID_L).unwrap_or(0),
            pt.get_u64(fields::APP_TRACE_ID_H).unwrap_or(0),
        );
        let app_parent_id = Id64::new(pt.get_u64(fields::APP_PARENT_ID_L).unwrap_or(0));
        let app_sampled = pt
            .get_i64(fields::APP_SPAN_SAMPLED)
            .map_or(SampleDecision::Unset, SampleDecision::from_wire);
        let encode = match pt.get_i64(fields::APP_TRACE_ENCODE) {
            Some(0) => Encode::Dec,
            _ => Encode::Hex,
        };

        Some(Self {
            span_id,
            thread_trace_id,
            net_trace_id,
            direction,
            kind,
            etrace_id: Id128::zero(),
            eparent_id: Id64::zero(),
            app_trace_id,
            app_parent_id,
            app_sampled,
            encode,
        })
    }

    /// Whether this span carries application-instrumented identifiers.
    #[must_use]
    pub fn has_app_trace(&self) -> bool {
        !self.app_trace_id.is_zero() && !self.app_parent_id.is_zero()
    }

    /// Serialize one record.
    pub fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(META_VERSION)?;
        w.write_u64::<LittleEndian>(self.span_id.as_u64())?;
        w.write_u64::<LittleEndian>(self.thread_trace_id.as_u64())?;
        w.write_u64::<LittleEndian>(self.net_trace_id.low)?;
        w.write_u64::<LittleEndian>(self.net_trace_id.high)?;
        w.write_u8(self.direction as u8)?;
        w.write_u8(self.kind as u8)?;
        w.write_u64::<LittleEndian>(self.etrace_id.low)?;
        w.write_u64::<LittleEndian>(self.etrace_id.high)?;
        w.write_u64::<LittleEndian>(self.eparent_id.as_u64())?;
        w.write_u64::<LittleEndian>(self.app_trace_id.low)?;
        w.write_u64::<LittleEndian>(self.app_trace_id.high)?;
        w.write_u64::<LittleEndian>(self.app_parent_id.as_u64())?;
        w.write_i8(self.app_sampled as i8)?;
        w.write_u8(self.encode as u8)?;
        Ok(())
    }

    /// Deserialize one record.
    pub fn decode_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let version = r.read_u8()?;
        if version != META_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown span meta version {version}"),
            ));
        }

        let span_id = Id64::new(r.read_u64::<LittleEndian>()?);
        let thread_trace_id = Id64::new(r.read_u64::<LittleEndian>()?);
        let net_low = r.read_u64::<LittleEndian>()?;
        let net_high = r.read_u64::<LittleEndian>()?;

        let direction = match r.read_u8()? {
            0 => Direction::Incoming,
            1 => Direction::Outgoing,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid direction tag {other}"),
                ));
            }
        };
        let kind = match r.read_u8()? {
            0 => SpanKind::Entry,
            1 => SpanKind::Exit,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid span kind tag {other}"),
                ));
            }
        };

        let etrace_low = r.read_u64::<LittleEndian>()?;
        let etrace_high = r.read_u64::<LittleEndian>()?;
        let eparent_id = Id64::new(r.read_u64::<LittleEndian>()?);
        let app_low = r.read_u64::<LittleEndian>()?;
        let app_high = r.read_u64::<LittleEndian>()?;
        let app_parent_id = Id64::new(r.read_u64::<LittleEndian>()?);

        let app_sampled = match r.read_i8()? {
            1 => SampleDecision::Keep,
            -1 => SampleDecision::Reject,
            _ => SampleDecision::Unset,
        };
        let encode = match r.read_u8()? {
            1 => Encode::Dec,
            _ => Encode::Hex,
        };

        Ok(Self {
            span_id,
            thread_trace_id,
            net_trace_id: Id128::new(net_low, net_high),
            direction,
            kind,
            etrace_id: Id128::new(etrace_low, etrace_high),
            eparent_id,
            app_trace_id: Id128::new(app_low, app_high),
            app_parent_id,
            app_sampled,
            encode,
        })
    }
}
