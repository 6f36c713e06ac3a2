use proptest::prelude::*;

/// Cache operations for model-based L1 testing
#[derive(Debug, Clone)]
pub enum CacheOp {
    Set(String),
    Get(String),
    Delete(String),
}

/// Short keys from a small alphabet so operations collide often
pub fn key_strategy() -> impl Strategy<Value = String> {
    "[a-h]{1,2}"
}

pub fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        4 => key_strategy().prop_map(CacheOp::Set),
        3 => key_strategy().prop_map(CacheOp::Get),
        1 => key_strategy().prop_map(CacheOp::Delete),
    ]
}

pub fn cache_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<CacheOp>> {
    prop::collection::vec(cache_op_strategy(), 1..max_len)
}

/// L1 capacities worth exercising, including the degenerate single-entry cache
pub fn capacity_strategy() -> impl Strategy<Value = usize> {
    1usize..16
}
