use proptest::prelude::*;
use proptest::sample::select;

/// Operations applied to a single machine timeline.
#[derive(Debug, Clone)]
pub enum TimelineOp {
    Insert {
        start_ms: i64,
        len_ms: i64,
        parallel: bool,
    },
    /// Removes the n-th live interval (modulo the live count).
    Remove(usize),
}

pub fn timeline_op_strategy() -> impl Strategy<Value = TimelineOp> {
    prop_oneof![
        3 => (0i64..2_000, 1i64..300, any::<bool>()).prop_map(|(start_ms, len_ms, parallel)| {
            TimelineOp::Insert {
                start_ms,
                len_ms,
                parallel,
            }
        }),
        1 => any::<usize>().prop_map(TimelineOp::Remove),
    ]
}

pub fn timeline_ops_strategy() -> impl Strategy<Value = Vec<TimelineOp>> {
    prop::collection::vec(timeline_op_strategy(), 1..60)
}

pub const MATERIALS: &[&str] = &[
    "Ti-6Al-4V",
    "Ti-6Al-2Sn-4Zr-6Mo",
    "Inconel 718",
    "Inconel 625",
    "AlSi10Mg",
    "316L",
    "CoCr",
];

pub fn material_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => select(MATERIALS).prop_map(String::from),
        1 => "[A-Z][a-z]{2,6}-[0-9]{2,3}",
    ]
}

/// (family name, member indexes into [`MATERIALS`]) assignments.
pub fn family_assignment_strategy() -> impl Strategy<Value = Vec<(String, Vec<usize>)>> {
    prop::collection::vec(
        (
            "[a-z]{3,8}",
            prop::collection::vec(0..MATERIALS.len(), 1..4),
        ),
        0..4,
    )
}

/// Pair overrides over [`MATERIALS`].
pub fn pair_override_strategy() -> impl Strategy<Value = Vec<(usize, usize, i64)>> {
    prop::collection::vec((0..MATERIALS.len(), 0..MATERIALS.len(), 0i64..240), 0..4)
}

/// A random DAG: `n` nodes and forward edges `(prerequisite, dependent)`
/// with `prerequisite < dependent`, plus an execution order per node.
#[derive(Debug, Clone)]
pub struct DagPattern {
    pub orders: Vec<i32>,
    pub edges: Vec<(usize, usize)>,
}

pub fn dag_strategy() -> impl Strategy<Value = DagPattern> {
    (2usize..12).prop_flat_map(|n| {
        (
            prop::collection::vec(-5i32..20, n),
            prop::collection::vec((0..n, 0..n), 0..(n * 2)),
        )
            .prop_map(|(orders, raw)| {
                let mut edges: Vec<(usize, usize)> = raw
                    .into_iter()
                    .filter(|(a, b)| a != b)
                    .map(|(a, b)| (a.min(b), a.max(b)))
                    .collect();
                edges.sort_unstable();
                edges.dedup();
                DagPattern { orders, edges }
            })
    })
}

/// Chain `0 -> 1 -> ... -> len-1` closed by an edge back to `back_to`.
pub fn cycle_strategy() -> impl Strategy<Value = (usize, usize)> {
    (2usize..10).prop_flat_map(|len| (Just(len), 0..len - 1))
}
