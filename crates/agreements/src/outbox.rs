//! Outbox integration for supplier agreements.

use chrono::NaiveDate;
use serde::Serialize;

use supplyreg_events::{
    AggregateType, HandlerError, PayloadHandler, PayloadRegistryBuilder, RegistryError, WireMessage,
};

use crate::agreement::{AgreementDto, AgreementStatus};

pub mod event_names {
    pub const DRAFTED: &str = "drafted";
    pub const SIGNED: &str = "signed";
    pub const TERMINATED: &str = "terminated";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementWire {
    pub agreement_id: String,
    pub supplier_id: String,
    pub product_ids: Vec<String>,
    pub valid_from: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<NaiveDate>,
    pub status: AgreementStatus,
}

/// Payload handler for `AGREEMENT` records.
///
/// Keyed by supplier so a supplier's agreements share a partition.
#[derive(Debug, Default)]
pub struct AgreementHandler;

impl PayloadHandler for AgreementHandler {
    type Dto = AgreementDto;
    type Wire = AgreementWire;

    fn aggregate_type(&self) -> AggregateType {
        AggregateType::Agreement
    }

    fn to_wire_message(&self, dto: AgreementDto) -> Result<WireMessage<AgreementWire>, HandlerError> {
        if dto.status != AgreementStatus::Draft && dto.product_ids.is_empty() {
            return Err(HandlerError::Transform {
                aggregate_type: AggregateType::Agreement,
                message: format!("agreement {} has no products", dto.id),
            });
        }

        let key = dto.supplier_id.to_string();
        let wire = AgreementWire {
            agreement_id: dto.id.to_string(),
            supplier_id: key.clone(),
            product_ids: dto.product_ids.iter().map(ToString::to_string).collect(),
            valid_from: dto.valid_from,
            valid_until: dto.valid_until,
            status: dto.status,
        };
        Ok(WireMessage::new(key, wire))
    }
}

pub fn register(builder: &mut PayloadRegistryBuilder) -> Result<(), RegistryError> {
    builder.register(AgreementHandler)?;
    Ok(())
}
