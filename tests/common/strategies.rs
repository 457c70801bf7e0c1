use proptest::prelude::*;

/// Client operations against a single standalone unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    PrepareCounted,
    PrepareUncounted,
    Activate,
    Release,
    ReleaseOwner,
}

pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => Just(Operation::PrepareCounted),
        1 => Just(Operation::PrepareUncounted),
        2 => Just(Operation::Activate),
        3 => Just(Operation::Release),
        1 => Just(Operation::ReleaseOwner),
    ]
}

pub fn operation_sequence_strategy() -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(operation_strategy(), 1..40)
}

/// Strategy for generating valid unit names
pub fn unit_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}"
}

/// Distinct member names in arbitrary declaration order
pub fn member_names_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(unit_name_strategy(), 1..6)
        .prop_map(|names| names.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}
