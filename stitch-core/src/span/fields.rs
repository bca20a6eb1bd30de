//! Well-known field keys on ingested and exported points.
//!
//! Input keys are written by the kernel-side collector when it decodes
//! wire payloads into point records; output keys are attached by the
//! correlator just before export.

/// 64-bit span identifier.
pub const SPAN_ID: &str = "span_id";

/// Same-thread correlation key.
pub const THREAD_TRACE_ID: &str = "thread_trace_id";

/// Request-side TCP sequence number (low half of the network-flow key).
pub const REQ_SEQ: &str = "req_seq";

/// Response-side TCP sequence number (high half of the network-flow key).
pub const RESP_SEQ: &str = "resp_seq";

/// Transfer direction: `incoming` or `outgoing`.
pub const DIRECTION: &str = "direction";

/// Span kind as observed by the kernel probe: `entry` or `exit`.
pub const EBPF_SPAN_TYPE: &str = "ebpf_span_type";

/// Low half of an application-instrumented trace id.
pub const APP_TRACE_ID_L: &str = "app_trace_id_l";

/// High half of an application-instrumented trace id.
pub const APP_TRACE_ID_H: &str = "app_trace_id_h";

/// Application-instrumented parent span id.
pub const APP_PARENT_ID_L: &str = "app_parent_id_l";

/// Application sampling decision: `1` keep, `-1` reject, absent auto.
pub const APP_SPAN_SAMPLED: &str = "app_span_sampled";

/// Encoding convention for exported app ids: `1` hex, `0` decimal.
pub const APP_TRACE_ENCODE: &str = "app_trace_encode";

/// Output: the kernel-synthesized trace id (hex).
pub const EBPF_TRACE_ID: &str = "ebpf_trace_id";

/// Output: the kernel-synthesized parent span id (hex).
pub const EBPF_PARENT_ID: &str = "ebpf_parent_id";

/// Output: the final trace id rendered in the span's app encoding.
pub const APP_TRACE_ID: &str = "app_trace_id";

/// Output: the final parent id rendered in the span's app encoding.
pub const APP_PARENT_ID: &str = "app_parent_id";

/// Direction value for requests entering this process.
pub const DIRECTION_INCOMING: &str = "incoming";

/// Direction value for requests leaving this process.
pub const DIRECTION_OUTGOING: &str = "outgoing";

/// Span-type value for a thread's entry (server) span.
pub const SPAN_TYPE_ENTRY: &str = "entry";

/// Span-type value for an outbound (client) span.
pub const SPAN_TYPE_EXIT: &str = "exit";
