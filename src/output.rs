//! JSON output types and serialization for CLI responses.
//!
//! Every response is a JSON object whose first field is `status` followed
//! by `schema_version`. Output is deterministic: the same session state
//! produces the same bytes (highlights and navigators are sorted).

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use birdseye_core::anchor::Document;
use birdseye_core::call::{Call, HoverInfo};
use birdseye_core::config::{ConfigSource, Settings};
use birdseye_core::error::{BirdseyeError, OutputErrorCode};
use birdseye_core::hash::ContentHash;
use birdseye_core::host::{HighlightStyle, Notification, RecordingHost};
use birdseye_core::inspector::{InspectorNode, NodeIndex};
use birdseye_core::navigator::LoopNavigator;
use birdseye_core::range::Range;
use birdseye_core::text::offset_to_position;
use birdseye_core::trace::{LoopId, NodeId};

/// Current schema version for all responses.
pub const SCHEMA_VERSION: &str = "1";

// ============================================================================
// Errors
// ============================================================================

/// Error information for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Numeric error code, also the exit code.
    pub code: u8,
    /// Human-readable message.
    pub message: String,
    /// Error-specific structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorInfo {
    /// Create from a BirdseyeError.
    pub fn from_error(err: &BirdseyeError) -> Self {
        let details = match err {
            BirdseyeError::Server { status, .. } => Some(serde_json::json!({ "status": status })),
            BirdseyeError::MalformedValue { node, .. } => {
                Some(serde_json::json!({ "node": node }))
            }
            BirdseyeError::UnknownCall { call_id } => {
                Some(serde_json::json!({ "call_id": call_id }))
            }
            BirdseyeError::EditOutOfBounds { start, end, len } => {
                Some(serde_json::json!({ "start": start, "end": end, "len": len }))
            }
            _ => None,
        };
        ErrorInfo {
            code: OutputErrorCode::from(err).code(),
            message: err.to_string(),
            details,
        }
    }
}

/// Error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Status: "error".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    /// Error information.
    pub error: ErrorInfo,
}

impl ErrorResponse {
    /// Create an error response from a BirdseyeError.
    pub fn from_error(err: &BirdseyeError) -> Self {
        ErrorResponse {
            status: "error".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            error: ErrorInfo::from_error(err),
        }
    }
}

// ============================================================================
// Inspect Response
// ============================================================================

/// The inspected call.
#[derive(Debug, Clone, Serialize)]
pub struct CallInfo {
    /// Call id.
    pub id: String,
    /// Name of the called function.
    pub function: String,
    /// Body hash the call was recorded under.
    pub body_hash: ContentHash,
    /// Start time, `YYYY-MM-DD HH:MM:SS`.
    pub start_time: String,
    /// `name = value` lines, or `-`.
    pub arguments: String,
    /// Traceback or return value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl CallInfo {
    /// Summarize a call.
    pub fn from_call(call: &Call) -> Self {
        let meta = call.meta();
        CallInfo {
            id: meta.id.clone(),
            function: call.snapshot().name().to_string(),
            body_hash: call.snapshot().body_hash().clone(),
            start_time: meta.start_time_display(),
            arguments: meta.arguments_list(),
            result: meta.long_result().map(str::to_string),
        }
    }
}

/// State of one loop navigator.
#[derive(Debug, Clone, Serialize)]
pub struct NavigatorInfo {
    /// Loop node id.
    pub loop_id: LoopId,
    /// Displayed iteration index; absent when the loop did not run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<String>,
    /// Number of iterations available.
    pub available: usize,
    /// Whether stepping back is possible.
    pub can_prev: bool,
    /// Whether stepping forward is possible.
    pub can_next: bool,
}

impl NavigatorInfo {
    /// Describe a navigator.
    pub fn from_navigator(navigator: &LoopNavigator) -> Self {
        NavigatorInfo {
            loop_id: navigator.loop_id(),
            iteration: navigator.current_iteration_display(),
            available: navigator.indices().len(),
            can_prev: navigator.can_navigate(-1),
            can_next: navigator.can_navigate(1),
        }
    }
}

/// One range the host was asked to mark.
#[derive(Debug, Clone, Serialize)]
pub struct HighlightInfo {
    /// Requested style.
    pub style: HighlightStyle,
    /// Marked range (absolute offsets).
    pub range: Range,
    /// 1-indexed line of the range start.
    pub line: u32,
    /// 1-indexed column of the range start.
    pub col: u32,
    /// Current text of the range.
    pub text: String,
}

impl HighlightInfo {
    /// Every mark placed on `host`, in document order.
    pub fn collect(host: &RecordingHost, document: &Document) -> Vec<Self> {
        let mut highlights: Vec<HighlightInfo> = host
            .marks()
            .map(|(_, range, style)| {
                let (line, col) = offset_to_position(document.text(), range.start);
                HighlightInfo {
                    style,
                    range,
                    line,
                    col,
                    text: document.slice(range).unwrap_or_default().to_string(),
                }
            })
            .collect();
        highlights.sort_by_key(|h| (h.range, style_rank(h.style)));
        highlights
    }
}

fn style_rank(style: HighlightStyle) -> u8 {
    match style {
        HighlightStyle::Uncovered => 0,
        HighlightStyle::Errored => 1,
        HighlightStyle::Selected => 2,
        HighlightStyle::Hover => 3,
    }
}

/// One inspected node with its rendered value.
#[derive(Debug, Clone, Serialize)]
pub struct InspectedNode {
    /// Tree index of the node.
    pub node: NodeId,
    /// Position of the node within the call.
    pub index: NodeIndex,
    /// Rendered value.
    pub entry: InspectorNode,
}

/// Response for the inspect command.
#[derive(Debug, Clone, Serialize)]
pub struct InspectResponse {
    /// Status: "ok".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    /// The inspected call.
    pub call: CallInfo,
    /// Loop navigators, by loop id.
    pub navigators: Vec<NavigatorInfo>,
    /// Marks placed on the document.
    pub highlights: Vec<HighlightInfo>,
    /// Selected nodes, most recently selected first.
    pub inspector: Vec<InspectedNode>,
    /// Result of the last hover, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hover: Option<HoverInfo>,
    /// Notifications shown during the run.
    pub notifications: Vec<Notification>,
}

impl InspectResponse {
    /// Report the state of `call` as placed on `host`.
    pub fn new(
        call: &Call,
        document: &Document,
        host: &RecordingHost,
        hover: Option<HoverInfo>,
    ) -> Self {
        let inspector = call
            .forest()
            .iter()
            .filter_map(|root| {
                call.node(root.node).ok().map(|node| InspectedNode {
                    node: node.id(),
                    index: root.node,
                    entry: root.entry.clone(),
                })
            })
            .collect();
        InspectResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            call: CallInfo::from_call(call),
            navigators: call
                .navigators()
                .iter()
                .map(NavigatorInfo::from_navigator)
                .collect(),
            highlights: HighlightInfo::collect(host, document),
            inspector,
            hover,
            notifications: host.notifications().to_vec(),
        }
    }
}

// ============================================================================
// Hash and URL Responses
// ============================================================================

/// Response for the hash command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashResponse {
    /// Status: "ok".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    /// Function name.
    pub function: String,
    /// Body hash of its current text.
    pub body_hash: ContentHash,
}

impl HashResponse {
    /// Create a hash response.
    pub fn new(function: impl Into<String>, body_hash: ContentHash) -> Self {
        HashResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            function: function.into(),
            body_hash,
        }
    }
}

/// Response for the url command.
#[derive(Debug, Clone, Serialize)]
pub struct UrlResponse {
    /// Status: "ok".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    /// Resolved API URL.
    pub url: String,
    /// Where the server location came from.
    pub source: ConfigSource,
    /// The effective settings.
    pub settings: Settings,
}

impl UrlResponse {
    /// Create a url response.
    pub fn new(url: String, source: ConfigSource, settings: Settings) -> Self {
        UrlResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            url,
            source,
            settings,
        }
    }
}

// ============================================================================
// Response Emission
// ============================================================================

/// Emit a response as pretty-printed JSON to a writer.
///
/// This is the single output path for the CLI.
pub fn emit_response<T: Serialize>(response: &T, writer: &mut impl Write) -> io::Result<()> {
    let json = serde_json::to_string_pretty(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)
}

/// Emit a response as compact JSON (single line) to a writer.
pub fn emit_response_compact<T: Serialize>(
    response: &T,
    writer: &mut impl Write,
) -> io::Result<()> {
    let json = serde_json::to_string(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod error_tests {
        use super::*;

        #[test]
        fn error_response_carries_code_and_details() {
            let err = BirdseyeError::UnknownCall {
                call_id: "c9".to_string(),
            };
            let json = serde_json::to_value(ErrorResponse::from_error(&err)).unwrap();
            assert_eq!(json["status"], "error");
            assert_eq!(json["schema_version"], SCHEMA_VERSION);
            assert_eq!(json["error"]["code"], 3);
            assert_eq!(json["error"]["details"]["call_id"], "c9");
        }

        #[test]
        fn details_are_omitted_when_absent() {
            let err = BirdseyeError::invalid_args("bad step");
            let json = serde_json::to_string(&ErrorResponse::from_error(&err)).unwrap();
            assert!(!json.contains("details"));
            assert!(json.contains("\"code\":2"));
        }
    }

    mod highlight_tests {
        use super::*;
        use birdseye_core::host::Highlighter;

        #[test]
        fn highlights_are_sorted_and_positioned() {
            let document = Document::new("def f():\n    return 1\n");
            let mut host = RecordingHost::new();
            host.mark(Range::new(20, 21), HighlightStyle::Selected);
            host.mark(Range::new(13, 21), HighlightStyle::Errored);
            host.mark(Range::new(20, 21), HighlightStyle::Errored);
            let highlights = HighlightInfo::collect(&host, &document);
            let summary: Vec<_> = highlights
                .iter()
                .map(|h| (h.range.start, h.style, h.text.as_str()))
                .collect();
            assert_eq!(
                summary,
                vec![
                    (13, HighlightStyle::Errored, "return 1"),
                    (20, HighlightStyle::Errored, "1"),
                    (20, HighlightStyle::Selected, "1"),
                ]
            );
            assert_eq!((highlights[0].line, highlights[0].col), (2, 5));
        }
    }

    mod emit_tests {
        use super::*;

        #[test]
        fn emit_response_is_deterministic_json() {
            let response =
                HashResponse::new("f", ContentHash::from_hex_unchecked("abc123"));
            let mut first = Vec::new();
            let mut second = Vec::new();
            emit_response(&response, &mut first).unwrap();
            emit_response(&response, &mut second).unwrap();
            assert_eq!(first, second);
            let parsed: serde_json::Value = serde_json::from_slice(&first).unwrap();
            assert_eq!(parsed["body_hash"], "abc123");

            let mut compact = Vec::new();
            emit_response_compact(&response, &mut compact).unwrap();
            let line = String::from_utf8(compact).unwrap();
            assert!(line.starts_with("{\"status\":\"ok\""));
            assert_eq!(line.lines().count(), 1);
        }
    }
}
