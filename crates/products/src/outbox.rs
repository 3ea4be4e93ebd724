//! Outbox integration for products: event names, wire DTO, payload handler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use supplyreg_events::{
    AggregateType, HandlerError, PayloadHandler, PayloadRegistryBuilder, RegistryError, WireMessage,
};

use crate::product::{ProductDto, ProductStatus};

/// Event names used for product records (routing suffix on the bus).
pub mod event_names {
    pub const REGISTERED: &str = "registered";
    pub const UPDATED: &str = "updated";
    pub const APPROVED: &str = "approved";
    pub const REJECTED: &str = "rejected";
}

/// Resolves category codes to display names for downstream consumers.
pub trait CategoryNames: Send + Sync {
    fn category_name(&self, code: &str) -> Option<String>;
}

/// Product as published on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductWire {
    pub product_id: String,
    pub supplier_id: String,
    pub gtin: String,
    pub name: String,
    pub category: String,
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Payload handler for `PRODUCT` records.
///
/// Partitioned by GTIN so every event about the same trade item lands on the
/// same partition.
pub struct ProductHandler {
    categories: Arc<dyn CategoryNames>,
}

impl ProductHandler {
    pub fn new(categories: Arc<dyn CategoryNames>) -> Self {
        Self { categories }
    }
}

impl PayloadHandler for ProductHandler {
    type Dto = ProductDto;
    type Wire = ProductWire;

    fn aggregate_type(&self) -> AggregateType {
        AggregateType::Product
    }

    fn dto_version(&self) -> u32 {
        2
    }

    fn to_wire_message(&self, dto: ProductDto) -> Result<WireMessage<ProductWire>, HandlerError> {
        let category = self
            .categories
            .category_name(&dto.category_code)
            .unwrap_or_else(|| dto.category_code.clone());

        let wire = ProductWire {
            product_id: dto.id.to_string(),
            supplier_id: dto.supplier_id.to_string(),
            gtin: dto.gtin.clone(),
            name: dto.name,
            category,
            approved: dto.status == ProductStatus::Approved,
            rejection_reason: dto.rejection_reason,
            updated_at: dto.updated_at,
        };

        Ok(WireMessage::new(dto.gtin, wire))
    }
}

/// Register the product handler with the bootstrap registry.
pub fn register(
    builder: &mut PayloadRegistryBuilder,
    categories: Arc<dyn CategoryNames>,
) -> Result<(), RegistryError> {
    builder.register(ProductHandler::new(categories))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::product::{Product, ProductId};
    use supplyreg_core::{AggregateId, UserId};
    use supplyreg_events::{ErasedHandler, PayloadRegistry};

    struct FixedCategories(HashMap<String, String>);

    impl CategoryNames for FixedCategories {
        fn category_name(&self, code: &str) -> Option<String> {
            self.0.get(code).cloned()
        }
    }

    fn handler() -> ProductHandler {
        let mut names = HashMap::new();
        names.insert("OFFICE".to_string(), "Office supplies".to_string());
        ProductHandler::new(Arc::new(FixedCategories(names)))
    }

    fn product(category: &str) -> Product {
        Product::submit(
            ProductId::new(AggregateId::new()),
            AggregateId::new(),
            "4006381333931",
            "Stabilo Point 88",
            category,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn wire_message_is_keyed_by_gtin_and_resolves_category() {
        let mut p = product("OFFICE");
        p.approve(UserId::new(), Utc::now()).unwrap();

        let msg = handler().to_wire_message(p.snapshot()).unwrap();
        assert_eq!(msg.partition_key, "4006381333931");
        assert_eq!(msg.payload.category, "Office supplies");
        assert!(msg.payload.approved);
    }

    #[test]
    fn unknown_category_falls_back_to_code() {
        let msg = handler().to_wire_message(product("GARDEN").snapshot()).unwrap();
        assert_eq!(msg.payload.category, "GARDEN");
        assert!(!msg.payload.approved);
    }

    #[test]
    fn stored_snapshot_round_trips_through_the_erased_handler() {
        let raw = serde_json::to_value(product("OFFICE").snapshot()).unwrap();
        let prepared = handler().prepare(&raw).unwrap();
        assert_eq!(prepared.dto_version, 2);
        assert_eq!(prepared.payload["gtin"], "4006381333931");
        assert_eq!(prepared.payload["category"], "Office supplies");
    }

    #[test]
    fn foreign_payload_is_rejected() {
        let err = handler()
            .prepare(&serde_json::json!({ "legalName": "ACME" }))
            .unwrap_err();
        assert!(matches!(err, HandlerError::Serialization { .. }));
    }

    #[test]
    fn registers_under_product_tag() {
        let mut builder = PayloadRegistry::builder();
        register(&mut builder, Arc::new(FixedCategories(HashMap::new()))).unwrap();
        assert!(builder.build().contains(AggregateType::Product));
    }
}
