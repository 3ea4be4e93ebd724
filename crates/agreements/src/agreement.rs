use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use supplyreg_core::{AggregateId, DomainError, DomainResult, UserId};

/// Agreement identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgreementId(pub AggregateId);

impl AgreementId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for AgreementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgreementStatus {
    Draft,
    Signed,
    Terminated,
}

/// Supply agreement between the registry operator and one supplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agreement {
    id: AgreementId,
    supplier_id: AggregateId,
    product_ids: Vec<AggregateId>,
    valid_from: NaiveDate,
    valid_until: Option<NaiveDate>,
    status: AgreementStatus,
    signed_by: Option<UserId>,
    updated_at: DateTime<Utc>,
}

impl Agreement {
    pub fn draft(
        id: AgreementId,
        supplier_id: AggregateId,
        valid_from: NaiveDate,
        valid_until: Option<NaiveDate>,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if let Some(until) = valid_until {
            if until < valid_from {
                return Err(DomainError::validation(format!(
                    "agreement ends ({until}) before it starts ({valid_from})"
                )));
            }
        }

        Ok(Self {
            id,
            supplier_id,
            product_ids: Vec::new(),
            valid_from,
            valid_until,
            status: AgreementStatus::Draft,
            signed_by: None,
            updated_at: at,
        })
    }

    pub fn id(&self) -> AgreementId {
        self.id
    }

    pub fn status(&self) -> AgreementStatus {
        self.status
    }

    pub fn add_product(&mut self, product_id: AggregateId, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != AgreementStatus::Draft {
            return Err(DomainError::conflict("products can only be added to a draft agreement"));
        }
        if !self.product_ids.contains(&product_id) {
            self.product_ids.push(product_id);
            self.updated_at = at;
        }
        Ok(())
    }

    pub fn sign(&mut self, admin: UserId, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != AgreementStatus::Draft {
            return Err(DomainError::conflict("only draft agreements can be signed"));
        }
        if self.product_ids.is_empty() {
            return Err(DomainError::conflict("an agreement must cover at least one product"));
        }
        self.status = AgreementStatus::Signed;
        self.signed_by = Some(admin);
        self.updated_at = at;
        Ok(())
    }

    pub fn terminate(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status == AgreementStatus::Terminated {
            return Err(DomainError::conflict("agreement already terminated"));
        }
        self.status = AgreementStatus::Terminated;
        self.updated_at = at;
        Ok(())
    }

    pub fn snapshot(&self) -> AgreementDto {
        AgreementDto {
            id: self.id,
            supplier_id: self.supplier_id,
            product_ids: self.product_ids.clone(),
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            status: self.status,
            signed_by: self.signed_by,
            updated_at: self.updated_at,
        }
    }
}

/// Serialized snapshot of an agreement, as stored in the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementDto {
    pub id: AgreementId,
    pub supplier_id: AggregateId,
    pub product_ids: Vec<AggregateId>,
    pub valid_from: NaiveDate,
    #[serde(default)]
    pub valid_until: Option<NaiveDate>,
    pub status: AgreementStatus,
    #[serde(default)]
    pub signed_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}
