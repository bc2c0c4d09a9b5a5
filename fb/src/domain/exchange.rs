//! Exchange - the opaque types carried by one bridge

/// Fixes the value types a bridge moves around
///
/// The bridge never inspects these values. `Item` is what producers place in
/// their request payloads, `Answer` is what each suspended producer receives
/// back, and `Output` is what producer tasks return into the aggregation
/// results.
pub trait Exchange: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;
    type Answer: Send + 'static;
    type Output: Send + 'static;
}

/// Exchange carrying `serde_json::Value` everywhere
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExchange;

impl Exchange for JsonExchange {
    type Item = serde_json::Value;
    type Answer = serde_json::Value;
    type Output = serde_json::Value;
}
