//! Property-based test generators using proptest.
//!
//! Provides strategies for generating operations and delivery outcomes.

use proptest::prelude::*;
use stride_engine::DeliveryError;

/// An operation to enqueue: kind, entity and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpTemplate {
    /// Endpoint tag.
    pub kind: String,
    /// Entity key.
    pub entity: Option<String>,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

/// Strategy for operation kinds drawn from a small fixed set, so lanes
/// collide often.
pub fn kind_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "task.complete",
        "task.create",
        "reflection.create",
        "battlepass.claim",
        "avatar.update",
    ])
    .prop_map(String::from)
}

/// Strategy for entity keys, with a few distinct values and no entity.
pub fn entity_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of((0u8..4).prop_map(|n| format!("entity-{n}")))
}

/// Strategy for opaque payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for a single operation.
pub fn op_template_strategy() -> impl Strategy<Value = OpTemplate> {
    (kind_strategy(), entity_strategy(), payload_strategy()).prop_map(|(kind, entity, payload)| {
        OpTemplate {
            kind,
            entity,
            payload,
        }
    })
}

/// Strategy for a sequence of operations.
pub fn op_templates_strategy(max: usize) -> impl Strategy<Value = Vec<OpTemplate>> {
    prop::collection::vec(op_template_strategy(), 0..=max)
}

/// Strategy for retryable delivery failures.
pub fn retryable_error_strategy() -> impl Strategy<Value = DeliveryError> {
    prop_oneof![
        Just(DeliveryError::Timeout),
        Just(DeliveryError::Network("connection reset".into())),
        prop_oneof![Just(408u16), Just(429u16), 500u16..600]
            .prop_map(|status| DeliveryError::server(status, "unavailable")),
    ]
}

/// Strategy for delivery outcomes, weighted towards success.
pub fn delivery_outcome_strategy() -> impl Strategy<Value = Result<(), DeliveryError>> {
    prop_oneof![
        6 => Just(Ok(())),
        3 => retryable_error_strategy().prop_map(Err),
        1 => Just(Err(DeliveryError::Validation("rejected".into()))),
    ]
}
