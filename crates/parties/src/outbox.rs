//! Outbox integration for suppliers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use supplyreg_events::{
    AggregateType, HandlerError, PayloadHandler, PayloadRegistryBuilder, RegistryError, WireMessage,
};

use crate::supplier::{SupplierDto, SupplierStatus};

pub mod event_names {
    pub const REGISTERED: &str = "registered";
    pub const UPDATED: &str = "updated";
    pub const SUSPENDED: &str = "suspended";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplierWire {
    pub supplier_id: String,
    pub legal_name: String,
    pub registration_number: String,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

/// Payload handler for `SUPPLIER` records, keyed by supplier id.
///
/// The contact email is deliberately not part of the wire DTO.
#[derive(Debug, Default)]
pub struct SupplierHandler;

impl PayloadHandler for SupplierHandler {
    type Dto = SupplierDto;
    type Wire = SupplierWire;

    fn aggregate_type(&self) -> AggregateType {
        AggregateType::Supplier
    }

    fn to_wire_message(&self, dto: SupplierDto) -> Result<WireMessage<SupplierWire>, HandlerError> {
        let key = dto.id.to_string();
        let wire = SupplierWire {
            supplier_id: key.clone(),
            legal_name: dto.legal_name,
            registration_number: dto.registration_number,
            active: dto.status == SupplierStatus::Active,
            updated_at: dto.updated_at,
        };
        Ok(WireMessage::new(key, wire))
    }
}

pub fn register(builder: &mut PayloadRegistryBuilder) -> Result<(), RegistryError> {
    builder.register(SupplierHandler)?;
    Ok(())
}
