//! Trace data reported by the birdseye server.
//!
//! These types mirror the JSON the server returns. Field names follow the
//! server's wire names; the structural types are flattened on the way in
//! (`node_ranges` groups become one `NodeRangeInfo` per node carrying the
//! group's depth).
//!
//! Captured values (`CallData::node_values`) are kept as raw JSON. They are
//! decoded lazily by [`crate::value::ValueTree`] once a node is inspected.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hash::ContentHash;
use crate::range::Range;

/// Index of a traced AST node within its function (the server's tree index).
pub type NodeId = u32;

/// Node id of a loop statement.
pub type LoopId = u32;

/// Tag marking statement-level nodes.
pub const STATEMENT_TAG: &str = "stmt";

// ============================================================================
// Function Structure
// ============================================================================

/// One traced node position in a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRangeInfo {
    /// Tree index of the node.
    pub id: NodeId,
    /// Range relative to the function's `def` keyword.
    pub range: Range,
    /// Nesting depth; deeper nodes win when several cover one offset.
    pub depth: u32,
    /// Structural tags such as [`STATEMENT_TAG`].
    pub tags: BTreeSet<String>,
}

impl NodeRangeInfo {
    /// Whether the node is a statement.
    pub fn is_statement(&self) -> bool {
        self.tags.contains(STATEMENT_TAG)
    }

    /// Whether the node carries any structural tag.
    pub fn is_tagged(&self) -> bool {
        !self.tags.is_empty()
    }
}

/// One loop statement in a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopRangeInfo {
    /// Tree index of the loop node.
    pub id: LoopId,
    /// Range relative to the function's `def` keyword.
    pub range: Range,
}

/// Static trace structure of one function body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FunctionDataWire")]
pub struct FunctionStructure {
    /// Traced nodes, in server order.
    pub node_ranges: Vec<NodeRangeInfo>,
    /// Loop statements, in server order.
    pub loop_ranges: Vec<LoopRangeInfo>,
    /// For each node, the ids of its enclosing loops, outermost first.
    pub node_loops: HashMap<NodeId, Vec<LoopId>>,
}

impl FunctionStructure {
    /// Enclosing loops of a node, outermost first.
    pub fn enclosing_loops(&self, node: NodeId) -> &[LoopId] {
        self.node_loops.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Deserialize)]
struct FunctionDataWire {
    #[serde(default)]
    node_ranges: Vec<NodeRangeGroupWire>,
    #[serde(default)]
    loop_nodes: Vec<NodeRangeWire>,
    #[serde(default)]
    node_loops: HashMap<NodeId, Vec<LoopId>>,
}

#[derive(Deserialize)]
struct NodeRangeGroupWire {
    depth: u32,
    nodes: Vec<NodeRangeWire>,
}

#[derive(Deserialize)]
struct NodeRangeWire {
    node: NodeId,
    start: usize,
    end: usize,
    #[serde(default)]
    classes: Vec<String>,
}

impl From<FunctionDataWire> for FunctionStructure {
    fn from(wire: FunctionDataWire) -> Self {
        let node_ranges = wire
            .node_ranges
            .into_iter()
            .flat_map(|group| {
                let depth = group.depth;
                group.nodes.into_iter().map(move |n| NodeRangeInfo {
                    id: n.node,
                    range: Range {
                        start: n.start,
                        end: n.end,
                    },
                    depth,
                    tags: n.classes.into_iter().collect(),
                })
            })
            .collect();
        let loop_ranges = wire
            .loop_nodes
            .into_iter()
            .map(|n| LoopRangeInfo {
                id: n.node,
                range: Range {
                    start: n.start,
                    end: n.end,
                },
            })
            .collect();
        FunctionStructure {
            node_ranges,
            loop_ranges,
            node_loops: wire.node_loops,
        }
    }
}

// ============================================================================
// Call Data
// ============================================================================

/// Sampled iterations of every loop at one nesting level.
pub type Loops = BTreeMap<LoopId, Vec<Iteration>>;

/// One sampled iteration of a loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iteration {
    /// The iteration's real index at runtime (its display value).
    #[serde(rename = "index")]
    pub sampled_index: i64,
    /// Loops nested inside this particular iteration.
    #[serde(rename = "loops", default, skip_serializing_if = "Option::is_none")]
    pub child_loops: Option<Loops>,
}

impl Iteration {
    /// Nested loops of this iteration (empty when none ran).
    pub fn child_loops(&self) -> Option<&Loops> {
        self.child_loops.as_ref()
    }
}

/// Captured data of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallData {
    /// Values per node; nested one object level per enclosing loop.
    #[serde(default)]
    pub node_values: HashMap<NodeId, Value>,
    /// Type names indexed by a value's type index.
    #[serde(default)]
    pub type_names: Vec<String>,
    /// Root level of sampled loop iterations.
    #[serde(default)]
    pub loop_iterations: Loops,
    /// Type indices below this count are well-known builtin types.
    #[serde(default)]
    pub num_special_types: usize,
}

/// Result of the call detail fetch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "CallDetailWire")]
pub struct CallDetail {
    /// Captured data of the invocation.
    pub call_data: CallData,
    /// Static structure of the called function.
    pub function_structure: FunctionStructure,
}

#[derive(Deserialize)]
struct CallDetailWire {
    call: DataWire<CallData>,
    function: DataWire<FunctionStructure>,
}

#[derive(Deserialize)]
struct DataWire<T> {
    data: T,
}

impl From<CallDetailWire> for CallDetail {
    fn from(wire: CallDetailWire) -> Self {
        CallDetail {
            call_data: wire.call.data,
            function_structure: wire.function.data,
        }
    }
}

// ============================================================================
// Call Listings
// ============================================================================

/// Summary of one recorded invocation, as listed per function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSummary {
    /// Call id used for the detail fetch.
    pub id: String,
    /// Start time as reported (`YYYY-MM-DDTHH:MM:SS...`).
    pub start_time: String,
    /// `(name, repr)` pairs of the arguments.
    #[serde(default)]
    pub arguments: Vec<(String, String)>,
    /// Repr of the return value.
    #[serde(default)]
    pub return_value: Option<String>,
    /// Exception message, if the call raised.
    #[serde(default)]
    pub exception: Option<String>,
    /// Formatted traceback, if the call raised.
    #[serde(default)]
    pub traceback: Option<String>,
}

impl CallSummary {
    /// `name = value` lines, or `-` without arguments.
    pub fn arguments_list(&self) -> String {
        if self.arguments.is_empty() {
            return "-".to_string();
        }
        self.arguments
            .iter()
            .map(|(name, value)| format!("{} = {}", name, value))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Start time as `YYYY-MM-DD HH:MM:SS`; the raw text when unparsable.
    pub fn start_time_display(&self) -> String {
        let head = self.start_time.get(..19).unwrap_or(&self.start_time);
        match NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S") {
            Ok(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
            Err(_) => self.start_time.clone(),
        }
    }

    /// The traceback when the call raised, otherwise the return value.
    pub fn long_result(&self) -> Option<&str> {
        self.traceback
            .as_deref()
            .or(self.return_value.as_deref())
    }
}

/// Result of the calls-by-function fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallsByHash {
    /// Recorded invocations.
    #[serde(default)]
    pub calls: Vec<CallSummary>,
    /// Distinct traced-node ranges of the function.
    #[serde(default, alias = "node_ranges")]
    pub ranges: Vec<Range>,
    /// Loop statement ranges of the function.
    #[serde(default)]
    pub loop_ranges: Vec<Range>,
}

/// One entry of the body-hash presence fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashPresence {
    /// Body hash.
    pub hash: ContentHash,
    /// Number of recorded calls.
    pub count: u32,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn function_structure_flattens_groups() {
        let structure: FunctionStructure = serde_json::from_value(json!({
            "node_ranges": [
                {"depth": 1, "nodes": [{"node": 2, "start": 10, "end": 30, "classes": ["stmt"]}]},
                {"depth": 3, "nodes": [
                    {"node": 5, "start": 14, "end": 15, "classes": []},
                    {"node": 6, "start": 14, "end": 15}
                ]}
            ],
            "loop_nodes": [{"node": 2, "start": 10, "end": 30, "classes": ["stmt"]}],
            "node_loops": {"5": [2], "6": [2]}
        }))
        .unwrap();

        assert_eq!(structure.node_ranges.len(), 3);
        assert!(structure.node_ranges[0].is_statement());
        assert_eq!(structure.node_ranges[1].depth, 3);
        assert!(!structure.node_ranges[2].is_tagged());
        assert_eq!(structure.loop_ranges[0].id, 2);
        assert_eq!(structure.enclosing_loops(5), &[2]);
        assert!(structure.enclosing_loops(2).is_empty());
    }

    #[test]
    fn call_detail_unwraps_data_envelopes() {
        let detail: CallDetail = serde_json::from_value(json!({
            "call": {"data": {
                "node_values": {"5": ["3", 0, {}]},
                "type_names": ["int"],
                "loop_iterations": {"2": [{"index": 0, "loops": {}}, {"index": 7}]},
                "num_special_types": 1
            }},
            "function": {"data": {"node_ranges": [], "loop_nodes": [], "node_loops": {}}}
        }))
        .unwrap();

        let data = &detail.call_data;
        assert_eq!(data.type_names, vec!["int".to_string()]);
        assert_eq!(data.num_special_types, 1);
        let iterations = &data.loop_iterations[&2];
        assert_eq!(iterations[1].sampled_index, 7);
        assert!(iterations[1].child_loops().is_none());
        assert!(iterations[0].child_loops().unwrap().is_empty());
    }

    mod call_summary_tests {
        use super::*;

        fn summary() -> CallSummary {
            serde_json::from_value(json!({
                "id": "abc",
                "start_time": "2018-03-04T12:30:45.123456",
                "arguments": [["x", "1"], ["y", "'a'"]],
                "return_value": "2",
                "exception": null,
                "traceback": null
            }))
            .unwrap()
        }

        #[test]
        fn arguments_are_listed() {
            assert_eq!(summary().arguments_list(), "x = 1\ny = 'a'");
            let mut empty = summary();
            empty.arguments.clear();
            assert_eq!(empty.arguments_list(), "-");
        }

        #[test]
        fn start_time_is_reformatted() {
            assert_eq!(summary().start_time_display(), "2018-03-04 12:30:45");
            let mut odd = summary();
            odd.start_time = "yesterday".to_string();
            assert_eq!(odd.start_time_display(), "yesterday");
        }

        #[test]
        fn traceback_wins_over_return_value() {
            assert_eq!(summary().long_result(), Some("2"));
            let mut failed = summary();
            failed.traceback = Some("Traceback ...".to_string());
            assert_eq!(failed.long_result(), Some("Traceback ..."));
        }
    }
}
