//! Cache key layout

use crate::domain::{CorrelationId, ListParams};

/// Holds the current list generation token.
pub const LIST_GENERATION_KEY: &str = "users:list:generation";

pub fn user_key(name: &str) -> String {
    format!("user:{}", name)
}

pub fn list_key(generation: &str, params: &ListParams) -> String {
    format!(
        "users:list:{}:{}_{}_{}",
        generation, params.order, params.limit, params.offset
    )
}

pub fn result_key(correlation_id: &CorrelationId) -> String {
    format!("result:{}", correlation_id)
}
