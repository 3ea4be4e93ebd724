//! Payload handlers: turn a stored snapshot into a wire message.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::record::AggregateType;

/// Failure while turning a stored payload into a wire message.
///
/// Both variants are permanent for the record concerned: retrying the same
/// bytes with the same handler gives the same result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("payload does not match the {aggregate_type} shape: {message}")]
    Serialization {
        aggregate_type: AggregateType,
        message: String,
    },

    #[error("wire transform failed for {aggregate_type}: {message}")]
    Transform {
        aggregate_type: AggregateType,
        message: String,
    },
}

/// Wire-ready output of a handler: routing/partition key plus wire DTO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage<W> {
    pub partition_key: String,
    pub payload: W,
}

impl<W> WireMessage<W> {
    pub fn new(partition_key: impl Into<String>, payload: W) -> Self {
        Self {
            partition_key: partition_key.into(),
            payload,
        }
    }
}

/// Typed handler for one aggregate type.
///
/// Each domain module implements this once and registers it at bootstrap.
pub trait PayloadHandler: Send + Sync + 'static {
    /// Snapshot type stored in `EventRecord::payload`.
    type Dto: DeserializeOwned;
    /// Message type consumers see on the bus.
    type Wire: Serialize;

    fn aggregate_type(&self) -> AggregateType;

    /// Schema version of `Self::Wire`, sent as `dtoVersion` metadata.
    fn dto_version(&self) -> u32 {
        1
    }

    fn deserialize(&self, raw: &JsonValue) -> Result<Self::Dto, HandlerError> {
        Self::Dto::deserialize(raw).map_err(|e| HandlerError::Serialization {
            aggregate_type: self.aggregate_type(),
            message: e.to_string(),
        })
    }

    fn to_wire_message(&self, dto: Self::Dto) -> Result<WireMessage<Self::Wire>, HandlerError>;
}

/// Handler output with the wire DTO already serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedMessage {
    pub partition_key: String,
    pub payload: JsonValue,
    pub dto_version: u32,
}

/// Object-safe view of a [`PayloadHandler`], as stored in the registry.
pub trait ErasedHandler: Send + Sync {
    fn tag(&self) -> AggregateType;

    /// Deserialize + transform + serialize in one step.
    fn prepare(&self, raw: &JsonValue) -> Result<PreparedMessage, HandlerError>;
}

impl<H> ErasedHandler for H
where
    H: PayloadHandler,
{
    fn tag(&self) -> AggregateType {
        self.aggregate_type()
    }

    fn prepare(&self, raw: &JsonValue) -> Result<PreparedMessage, HandlerError> {
        let dto = self.deserialize(raw)?;
        let message = self.to_wire_message(dto)?;
        let payload = serde_json::to_value(&message.payload).map_err(|e| HandlerError::Transform {
            aggregate_type: self.aggregate_type(),
            message: format!("wire serialization failed: {e}"),
        })?;

        Ok(PreparedMessage {
            partition_key: message.partition_key,
            payload,
            dto_version: self.dto_version(),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct Widget {
        pub code: String,
        pub qty: u32,
    }

    #[derive(Debug, Serialize)]
    pub struct WidgetWire {
        pub code: String,
        pub quantity: u32,
    }

    /// Minimal handler used by the registry and handler tests.
    pub struct WidgetHandler(pub AggregateType);

    impl PayloadHandler for WidgetHandler {
        type Dto = Widget;
        type Wire = WidgetWire;

        fn aggregate_type(&self) -> AggregateType {
            self.0
        }

        fn dto_version(&self) -> u32 {
            3
        }

        fn to_wire_message(&self, dto: Widget) -> Result<WireMessage<WidgetWire>, HandlerError> {
            if dto.qty == 0 {
                return Err(HandlerError::Transform {
                    aggregate_type: self.0,
                    message: "zero quantity".into(),
                });
            }
            Ok(WireMessage::new(
                dto.code.clone(),
                WidgetWire {
                    code: dto.code,
                    quantity: dto.qty,
                },
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::WidgetHandler;
    use super::*;
    use serde_json::json;

    #[test]
    fn prepare_produces_key_payload_and_version() {
        let h = WidgetHandler(AggregateType::Product);
        let prepared = h.prepare(&json!({ "code": "W-1", "qty": 4 })).unwrap();

        assert_eq!(prepared.partition_key, "W-1");
        assert_eq!(prepared.payload, json!({ "code": "W-1", "quantity": 4 }));
        assert_eq!(prepared.dto_version, 3);
    }

    #[test]
    fn shape_mismatch_is_a_serialization_error() {
        let h = WidgetHandler(AggregateType::Product);
        let err = h.prepare(&json!({ "code": 7 })).unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Serialization {
                aggregate_type: AggregateType::Product,
                ..
            }
        ));
    }

    #[test]
    fn transform_failures_surface_unchanged() {
        let h = WidgetHandler(AggregateType::Agreement);
        let err = h.prepare(&json!({ "code": "W-2", "qty": 0 })).unwrap_err();
        assert!(matches!(err, HandlerError::Transform { .. }));
    }
}
