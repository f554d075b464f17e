use proptest::prelude::*;

/// Scope segments accepted by the key builder
pub fn scope_strategy() -> impl Strategy<Value = String> {
    "[1-9][0-9]{0,8}"
}

/// Hash field names
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}"
}

/// Distinct field names with an integer value each
pub fn field_values_strategy() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::btree_map(field_name_strategy(), any::<i64>(), 1..12)
        .prop_map(|fields| fields.into_iter().collect())
}

/// Task members with a due offset in seconds from the reference time
pub fn scheduled_tasks_strategy() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::btree_map("[a-z0-9]{1,8}", 1i64..3_600, 1..40)
        .prop_map(|tasks| tasks.into_iter().collect())
}
