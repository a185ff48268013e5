//! Scenario tests replaying recorded calls from fixture JSON.
//!
//! Each fixture directory under `tests/fixtures/` holds a source file, the
//! calls-by-hash listing and one call detail, in the shapes the trace
//! server returns.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use serde_json::{json, Value};
use tempfile::NamedTempFile;

use birdseye::cli::{
    load_json, parse_expand, parse_path_action, run_hash, run_inspect, run_url, Action,
    InspectRequest,
};
use birdseye::config::{ConfigSource, SettingsOverrides};
use birdseye::error::{BirdseyeError, OutputErrorCode};
use birdseye::host::HighlightStyle;
use birdseye::output::{InspectResponse, SCHEMA_VERSION};
use birdseye::trace::CallDetail;

// ============================================================================
// Test Infrastructure
// ============================================================================

fn fixture_dir(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn request(name: &str, function: &str, actions: Vec<Action>) -> InspectRequest {
    let dir = fixture_dir(name);
    InspectRequest {
        source: fs::read_to_string(dir.join("source.py")).unwrap(),
        function: function.to_string(),
        listing: load_json(&dir.join("calls.json")).unwrap(),
        detail: load_json(&dir.join("detail.json")).unwrap(),
        call_id: None,
        actions,
    }
}

fn division(actions: Vec<Action>) -> InspectResponse {
    run_inspect(request("division", "f", actions)).unwrap()
}

fn grid(actions: Vec<Action>) -> InspectResponse {
    run_inspect(request("grid", "grid", actions)).unwrap()
}

fn step(loop_id: u32, direction: isize) -> Action {
    Action::Step { loop_id, direction }
}

fn highlights(response: &InspectResponse, style: HighlightStyle) -> Vec<(usize, usize, String)> {
    response
        .highlights
        .iter()
        .filter(|h| h.style == style)
        .map(|h| (h.range.start, h.range.end, h.text.clone()))
        .collect()
}

fn to_json(response: &InspectResponse) -> Value {
    serde_json::to_value(response).unwrap()
}

// Absolute offsets in tests/fixtures/division/source.py (def at 13).
const DIV_AUG: (usize, usize) = (63, 77);
const DIV_EXPR: (usize, usize) = (72, 77);
const DIV_X: usize = 76;
const DIV_RETURN: (usize, usize) = (82, 94);

// ============================================================================
// Division Fixture
// ============================================================================

mod division_tests {
    use super::*;

    #[test]
    fn opening_reports_call_and_first_iteration() {
        let response = division(Vec::new());
        assert_eq!(response.status, "ok");
        assert_eq!(response.schema_version, SCHEMA_VERSION);
        assert_eq!(response.call.id, "div-1");
        assert_eq!(response.call.function, "f");
        assert_eq!(response.call.start_time, "2018-03-04 12:30:45");
        assert_eq!(response.call.arguments, "xs = [2, 0]");
        assert!(response.call.result.as_deref().unwrap().starts_with("Traceback"));

        assert_eq!(response.navigators.len(), 1);
        let nav = &response.navigators[0];
        assert_eq!(nav.loop_id, 2);
        assert_eq!(nav.iteration.as_deref(), Some("0"));
        assert_eq!(nav.available, 2);
        assert!(!nav.can_prev);
        assert!(nav.can_next);

        assert_eq!(
            highlights(&response, HighlightStyle::Uncovered),
            vec![(DIV_RETURN.0, DIV_RETURN.1, "return total".to_string())]
        );
        assert!(highlights(&response, HighlightStyle::Errored).is_empty());
        assert!(response.inspector.is_empty());
    }

    #[test]
    fn stepping_shows_exceptions_of_the_second_iteration() {
        let response = division(vec![step(2, 1)]);
        assert_eq!(response.navigators[0].iteration.as_deref(), Some("1"));
        assert!(!response.navigators[0].can_next);
        assert_eq!(
            highlights(&response, HighlightStyle::Errored),
            vec![
                (DIV_AUG.0, DIV_AUG.1, "total += 1 / x".to_string()),
                (DIV_EXPR.0, DIV_EXPR.1, "1 / x".to_string()),
            ]
        );

        let past_end = division(vec![step(2, 1), step(2, 1)]);
        assert_eq!(past_end.navigators[0].iteration.as_deref(), Some("1"));
    }

    #[test]
    fn selected_value_follows_navigation() {
        let response = division(vec![Action::Toggle { node: 4 }]);
        assert_eq!(response.inspector.len(), 1);
        assert_eq!(response.inspector[0].node, 4);
        assert_eq!(response.inspector[0].entry.label, "1 / x");
        assert_eq!(response.inspector[0].entry.description, "{float} 0.5");
        assert_eq!(
            highlights(&response, HighlightStyle::Selected),
            vec![(DIV_EXPR.0, DIV_EXPR.1, "1 / x".to_string())]
        );

        let response = division(vec![Action::Toggle { node: 4 }, step(2, 1)]);
        let entry = &to_json(&response)["inspector"][0]["entry"];
        assert_eq!(entry["description"], "ZeroDivisionError: division by zero");
        assert_eq!(entry["value"]["kind"], "exception");
        assert_eq!(highlights(&response, HighlightStyle::Selected).len(), 1);
    }

    #[test]
    fn uninteresting_nodes_cannot_be_selected() {
        // Statement that ran, and a statement that never ran.
        let response = division(vec![Action::Toggle { node: 1 }, Action::Toggle { node: 6 }]);
        assert!(response.inspector.is_empty());
        assert!(highlights(&response, HighlightStyle::Selected).is_empty());
    }

    #[test]
    fn hover_picks_the_deepest_node() {
        let response = division(vec![Action::Hover { offset: DIV_X }]);
        let hover = response.hover.as_ref().unwrap();
        assert_eq!(hover.repr, "2");
        assert_eq!(hover.line, 7);
        assert_eq!(
            highlights(&response, HighlightStyle::Hover),
            vec![(DIV_X, DIV_X + 1, "x".to_string())]
        );

        let response = division(vec![Action::Hover { offset: 0 }]);
        assert!(response.hover.is_none());
    }

    #[test]
    fn edits_hide_and_restore_error_highlights() {
        let change = |text: &str| {
            Action::Edit(birdseye::anchor::TextEdit::replace(
                birdseye::range::Range::new(DIV_EXPR.0, DIV_EXPR.0 + 1),
                text,
            ))
        };
        let response = division(vec![step(2, 1), change("2")]);
        assert!(highlights(&response, HighlightStyle::Errored).is_empty());

        let response = division(vec![step(2, 1), change("2"), change("1")]);
        assert_eq!(highlights(&response, HighlightStyle::Errored).len(), 2);
    }

    #[test]
    fn malformed_values_fail_the_inspection() {
        let mut req = request("division", "f", Vec::new());
        req.detail
            .call_data
            .node_values
            .insert(5, json!("not a per-iteration object"));
        let err = run_inspect(req).unwrap_err();
        assert!(matches!(err, BirdseyeError::MalformedValue { node: 5, .. }));
        assert_eq!(OutputErrorCode::from(&err).code(), 5);
    }

    #[test]
    fn unknown_call_is_a_resolution_error() {
        let mut req = request("division", "f", Vec::new());
        req.call_id = Some("nope".to_string());
        let err = run_inspect(req).unwrap_err();
        assert!(matches!(err, BirdseyeError::UnknownCall { .. }));
        assert_eq!(OutputErrorCode::from(&err).code(), 3);
    }

    #[test]
    fn hash_matches_the_snapshot() {
        let source = fs::read_to_string(fixture_dir("division").join("source.py")).unwrap();
        let hash = run_hash(&source, "f").unwrap();
        let response = division(Vec::new());
        assert_eq!(hash.body_hash, response.call.body_hash);
    }
}

// ============================================================================
// Grid Fixture (nested loops)
// ============================================================================

mod grid_tests {
    use super::*;

    fn iterations(response: &InspectResponse) -> Vec<Option<String>> {
        response
            .navigators
            .iter()
            .map(|nav| nav.iteration.clone())
            .collect()
    }

    #[test]
    fn inner_loop_follows_outer_iteration() {
        let response = grid(Vec::new());
        assert_eq!(
            iterations(&response),
            vec![Some("0".to_string()), Some("0".to_string())]
        );
        assert_eq!(response.navigators[1].available, 2);

        let response = grid(vec![step(3, 1), step(2, 1)]);
        assert_eq!(
            iterations(&response),
            vec![Some("1".to_string()), Some("0".to_string())]
        );
        assert!(!response.navigators[1].can_next);
    }

    #[test]
    fn empty_inner_loop_leaves_body_uncovered() {
        let response = grid(vec![step(2, 1), step(2, 1)]);
        assert_eq!(iterations(&response), vec![Some("5".to_string()), None]);
        assert_eq!(
            highlights(&response, HighlightStyle::Uncovered),
            vec![(87, 103, "out.append(cell)".to_string())]
        );
        assert!(!response.navigators[1].can_prev);
        assert!(!response.navigators[1].can_next);
    }

    #[test]
    fn inner_cursor_survives_outer_round_trip() {
        let response = grid(vec![
            step(3, 1),
            step(2, 1),
            step(2, 1),
            step(2, -1),
            step(2, -1),
        ]);
        assert_eq!(
            iterations(&response),
            vec![Some("0".to_string()), Some("1".to_string())]
        );
    }

    #[test]
    fn vanished_value_is_not_evaluated() {
        let response = grid(vec![Action::Toggle { node: 5 }, step(2, 1), step(2, 1)]);
        assert_eq!(response.inspector.len(), 1);
        let entry = &response.inspector[0].entry;
        assert_eq!(entry.label, "cell");
        assert_eq!(entry.description, "not evaluated");
        assert!(entry.value.is_none());
    }

    #[test]
    fn expanding_shows_items_and_length() {
        let response = grid(vec![
            Action::Toggle { node: 7 },
            Action::Expand {
                node: 7,
                path: Vec::new(),
            },
        ]);
        let entry = &response.inspector[0].entry;
        assert_eq!(entry.description, "{list} [1, 2, 3]");
        assert!(entry.expanded);
        let labels: Vec<_> = entry.children.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["0", "1", "2", "len()"]);
        assert_eq!(entry.children[3].description, "3");

        let json = to_json(&response);
        assert_eq!(json["inspector"][0]["entry"]["value"]["icon"], "sequence");
    }

    #[test]
    fn nested_expansion_opens_ancestors() {
        let mut actions = vec![Action::Toggle { node: 7 }];
        actions.extend(parse_expand("7:0").unwrap());
        let response = grid(actions);
        let entry = &response.inspector[0].entry;
        assert!(entry.expanded);
        assert_eq!(entry.children[0].label, "0");
        assert_eq!(entry.children[0].description, "{int} 1");

        let mut actions = vec![Action::Toggle { node: 7 }];
        actions.extend(parse_expand("7:0").unwrap());
        actions.push(parse_path_action("7", true).unwrap());
        let response = grid(actions);
        assert!(!response.inspector[0].entry.expanded);
        assert!(response.inspector[0].entry.children.is_empty());
    }

    #[test]
    fn collapsed_values_are_not_decoded() {
        let response = grid(vec![Action::Toggle { node: 7 }]);
        let entry = &response.inspector[0].entry;
        assert!(entry.has_children);
        assert!(!entry.expanded);
        assert!(entry.children.is_empty());
    }

    #[test]
    fn unparsable_start_time_is_shown_raw() {
        let mut req = request("grid", "grid", Vec::new());
        req.call_id = Some("grid-2".to_string());
        let response = run_inspect(req).unwrap();
        assert_eq!(response.call.start_time, "not a time");
        assert_eq!(response.call.arguments, "-");
        assert_eq!(response.call.result.as_deref(), Some("[]"));
    }

    #[test]
    fn detail_fixture_parses_structure() {
        let detail: CallDetail = load_json(&fixture_dir("grid").join("detail.json")).unwrap();
        assert_eq!(detail.function_structure.node_ranges.len(), 7);
        assert_eq!(detail.function_structure.loop_ranges.len(), 2);
        assert_eq!(detail.function_structure.enclosing_loops(5), &[2, 3]);
    }
}

// ============================================================================
// Settings
// ============================================================================

mod url_tests {
    use super::*;

    #[test]
    fn cli_server_url_wins_over_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"run_server": true, "port": 9000}"#).unwrap();
        let overrides = SettingsOverrides {
            server_url: Some("http://traces.example:8080/".to_string()),
            port: None,
        };
        let response = run_url(Some(file.path()), &overrides, "call/abc").unwrap();
        assert_eq!(response.url, "http://traces.example:8080/api/call/abc");
        assert_eq!(response.source, ConfigSource::CliFlag);
        assert_eq!(response.settings.port, 9000);
    }

    #[test]
    fn missing_config_file_is_an_internal_error() {
        let err = run_url(
            Some(&fixture_dir("missing").join("birdseye.json")),
            &SettingsOverrides::default(),
            "",
        )
        .unwrap_err();
        assert_eq!(OutputErrorCode::from(&err).code(), 10);
    }
}
