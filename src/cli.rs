//! Command implementations shared by the binary and the integration tests.
//!
//! `inspect` replays one recorded call against a source file: it anchors
//! the call's ranges, opens the call in a [`Session`], applies the
//! requested actions in order and reports what an editor would show.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use birdseye_core::anchor::{Document, TextEdit};
use birdseye_core::client::StaticCallSource;
use birdseye_core::config::{ResolvedSettings, SettingsOverrides};
use birdseye_core::error::{BirdseyeError, BirdseyeResult};
use birdseye_core::host::{LoopKeywordResolver, RecordingHost};
use birdseye_core::range::Range;
use birdseye_core::session::Session;
use birdseye_core::snapshot::FunctionOccurrence;
use birdseye_core::trace::{CallDetail, CallsByHash, LoopId, NodeId};

use crate::output::{HashResponse, InspectResponse, UrlResponse};

// ============================================================================
// Actions
// ============================================================================

/// One user action replayed against the opened call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Step a loop navigator.
    Step { loop_id: LoopId, direction: isize },
    /// Select or deselect a node for inspection.
    Toggle { node: NodeId },
    /// Expand a path in a selected node's value.
    Expand { node: NodeId, path: Vec<String> },
    /// Collapse a path in a selected node's value.
    Collapse { node: NodeId, path: Vec<String> },
    /// Move the mouse to a byte offset.
    Hover { offset: usize },
    /// Edit the document.
    Edit(TextEdit),
}

/// Parse `LOOP:+N`, `LOOP:-N` or `LOOP:N`.
pub fn parse_step(s: &str) -> BirdseyeResult<Action> {
    let (loop_id, direction) = s
        .split_once(':')
        .ok_or_else(|| BirdseyeError::invalid_args(format!("expected LOOP:+N, got '{}'", s)))?;
    let loop_id = parse_number(loop_id, "loop id")?;
    let direction = direction.strip_prefix('+').unwrap_or(direction);
    let direction = direction.parse().map_err(|_| {
        BirdseyeError::invalid_args(format!("invalid step '{}' in '{}'", direction, s))
    })?;
    Ok(Action::Step { loop_id, direction })
}

/// Parse `NODE:a/b/c`; `NODE` or `NODE:` opens the top level.
pub fn parse_path_action(s: &str, collapse: bool) -> BirdseyeResult<Action> {
    let (node, path) = s.split_once(':').unwrap_or((s, ""));
    let node = parse_number(node, "node id")?;
    let path = path
        .split('/')
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .collect();
    Ok(if collapse {
        Action::Collapse { node, path }
    } else {
        Action::Expand { node, path }
    })
}

/// Parse `NODE:a/b/c` as expansions of every prefix of the path.
///
/// A path is only shown open when all of its ancestors are, so `4:a/b`
/// opens the top level, then `a`, then `a/b`.
pub fn parse_expand(s: &str) -> BirdseyeResult<Vec<Action>> {
    let Action::Expand { node, path } = parse_path_action(s, false)? else {
        return Err(BirdseyeError::invalid_args(format!("invalid expansion '{}'", s)));
    };
    Ok((0..=path.len())
        .map(|len| Action::Expand {
            node,
            path: path[..len].to_vec(),
        })
        .collect())
}

/// Parse `START:END:TEXT` (absolute byte offsets; TEXT may be empty).
pub fn parse_edit(s: &str) -> BirdseyeResult<Action> {
    let mut parts = s.splitn(3, ':');
    let (Some(start), Some(end), Some(text)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(BirdseyeError::invalid_args(format!(
            "expected START:END:TEXT, got '{}'",
            s
        )));
    };
    let start = parse_number(start, "edit start")?;
    let end = parse_number(end, "edit end")?;
    if end < start {
        return Err(BirdseyeError::invalid_args(format!(
            "edit end {} is before start {}",
            end, start
        )));
    }
    Ok(Action::Edit(TextEdit::replace(
        Range::new(start, end),
        text.replace("\\n", "\n"),
    )))
}

fn parse_number<T: std::str::FromStr>(s: &str, what: &str) -> BirdseyeResult<T> {
    s.trim()
        .parse()
        .map_err(|_| BirdseyeError::invalid_args(format!("invalid {} '{}'", what, s)))
}

// ============================================================================
// Commands
// ============================================================================

/// Read and deserialize a JSON file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> BirdseyeResult<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Everything `inspect` needs.
#[derive(Debug, Clone)]
pub struct InspectRequest {
    /// Source text containing the function.
    pub source: String,
    /// Name of the traced function.
    pub function: String,
    /// Calls recorded for the function.
    pub listing: CallsByHash,
    /// Detail of the call to open.
    pub detail: CallDetail,
    /// Which listed call the detail belongs to; the first one if `None`.
    pub call_id: Option<String>,
    /// Actions to replay, in order.
    pub actions: Vec<Action>,
}

/// Open the call and replay the actions.
pub fn run_inspect(request: InspectRequest) -> BirdseyeResult<InspectResponse> {
    let InspectRequest {
        source,
        function,
        listing,
        detail,
        call_id,
        actions,
    } = request;

    let occurrence = FunctionOccurrence::locate(&source, &function).ok_or_else(|| {
        BirdseyeError::invalid_args(format!("function '{}' not found in source", function))
    })?;
    let document = Document::new(source);
    let hash = occurrence.body_hash(&document)?;
    let call_id = match call_id {
        Some(id) => id,
        None => listing
            .calls
            .first()
            .map(|call| call.id.clone())
            .ok_or_else(|| {
                BirdseyeError::invalid_args(format!("no recorded calls for '{}'", function))
            })?,
    };
    debug!(function = %function, %hash, call_id = %call_id, "inspecting");

    let calls_source = StaticCallSource::new()
        .with_listing(hash, listing)
        .with_detail(call_id.clone(), detail);
    let mut session = Session::new(document, calls_source);
    let mut host = RecordingHost::new();

    let listed = session
        .list_calls(&occurrence, &mut host)?
        .ok_or_else(|| BirdseyeError::invalid_args(format!("no recorded calls for '{}'", function)))?;
    let meta = listed
        .calls
        .iter()
        .find(|call| call.id == call_id)
        .ok_or_else(|| BirdseyeError::UnknownCall {
            call_id: call_id.clone(),
        })?;
    session
        .open_call(meta, &listed.snapshot, &LoopKeywordResolver, &mut host)?
        .ok_or_else(|| BirdseyeError::UnknownCall {
            call_id: call_id.clone(),
        })?;

    let mut hover = None;
    for action in &actions {
        match action {
            Action::Step { loop_id, direction } => {
                if !session.navigate(*loop_id, *direction, &mut host)? {
                    debug!(loop_id, direction, "step not possible");
                }
            }
            Action::Toggle { node } => {
                session.toggle_node(*node, &mut host)?;
            }
            Action::Expand { node, path } => session.expand_node(*node, path.clone())?,
            Action::Collapse { node, path } => session.collapse_node(*node, path)?,
            Action::Hover { offset } => hover = session.hover(*offset, &mut host)?,
            Action::Edit(edit) => session.edit(edit, &mut host)?,
        }
    }
    info!(call_id = %call_id, actions = actions.len(), "inspection done");

    let call = session.call(&call_id)?;
    Ok(InspectResponse::new(call, session.document(), &host, hover))
}

/// Body hash of a function in a source text.
pub fn run_hash(source: &str, function: &str) -> BirdseyeResult<HashResponse> {
    let occurrence = FunctionOccurrence::locate(source, function).ok_or_else(|| {
        BirdseyeError::invalid_args(format!("function '{}' not found in source", function))
    })?;
    let document = Document::new(source);
    Ok(HashResponse::new(function, occurrence.body_hash(&document)?))
}

/// API URL of `path` under the resolved settings.
pub fn run_url(
    config: Option<&Path>,
    overrides: &SettingsOverrides,
    path: &str,
) -> BirdseyeResult<UrlResponse> {
    let resolved = ResolvedSettings::resolve(config, overrides)?;
    Ok(UrlResponse::new(
        resolved.settings.api_url(path),
        resolved.server_source,
        resolved.settings,
    ))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod parse_tests {
        use super::*;

        #[test]
        fn steps_accept_signs() {
            assert_eq!(
                parse_step("2:+3").unwrap(),
                Action::Step { loop_id: 2, direction: 3 }
            );
            assert_eq!(
                parse_step("2:-1").unwrap(),
                Action::Step { loop_id: 2, direction: -1 }
            );
            assert_eq!(
                parse_step("7:1").unwrap(),
                Action::Step { loop_id: 7, direction: 1 }
            );
            assert!(parse_step("2").is_err());
            assert!(parse_step("x:+1").is_err());
        }

        #[test]
        fn paths_split_on_slashes() {
            assert_eq!(
                parse_path_action("4:a/b", false).unwrap(),
                Action::Expand {
                    node: 4,
                    path: vec!["a".to_string(), "b".to_string()]
                }
            );
            assert_eq!(
                parse_path_action("4", true).unwrap(),
                Action::Collapse { node: 4, path: Vec::new() }
            );
        }

        #[test]
        fn expansions_open_every_prefix() {
            let paths: Vec<_> = parse_expand("4:a/b")
                .unwrap()
                .into_iter()
                .map(|action| match action {
                    Action::Expand { node: 4, path } => path,
                    other => panic!("unexpected action {:?}", other),
                })
                .collect();
            assert_eq!(
                paths,
                vec![
                    Vec::new(),
                    vec!["a".to_string()],
                    vec!["a".to_string(), "b".to_string()]
                ]
            );
            assert_eq!(parse_expand("4").unwrap().len(), 1);
            assert!(parse_expand("x:a").is_err());
        }

        #[test]
        fn edits_keep_colons_in_text() {
            assert_eq!(
                parse_edit("3:5:a:b\\n").unwrap(),
                Action::Edit(TextEdit::replace(Range::new(3, 5), "a:b\n"))
            );
            assert_eq!(
                parse_edit("3:3:").unwrap(),
                Action::Edit(TextEdit::insert(3, ""))
            );
            assert!(parse_edit("5:3:x").is_err());
            assert!(parse_edit("5:x").is_err());
        }
    }

    mod command_tests {
        use super::*;

        #[test]
        fn hash_of_missing_function_is_invalid() {
            let err = run_hash("def f():\n    pass\n", "g").unwrap_err();
            assert!(matches!(err, BirdseyeError::InvalidArguments { .. }));
        }

        #[test]
        fn hash_ignores_trailing_blank_lines() {
            let a = run_hash("def f():\n    pass\n", "f").unwrap();
            let b = run_hash("def f():\n    pass\n\n\n", "f").unwrap();
            assert_eq!(a.body_hash, b.body_hash);
        }
    }
}
