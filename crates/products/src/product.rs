use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use supplyreg_core::{AggregateId, DomainError, DomainResult, UserId};

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Product review lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Submitted,
    Approved,
    Rejected,
}

/// A product as submitted by a supplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    supplier_id: AggregateId,
    gtin: String,
    name: String,
    category_code: String,
    status: ProductStatus,
    rejection_reason: Option<String>,
    reviewed_by: Option<UserId>,
    updated_at: DateTime<Utc>,
}

impl Product {
    /// Supplier submission: the product starts in `Submitted`.
    pub fn submit(
        id: ProductId,
        supplier_id: AggregateId,
        gtin: impl Into<String>,
        name: impl Into<String>,
        category_code: impl Into<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let gtin = gtin.into();
        let name = name.into();

        if name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        validate_gtin(&gtin)?;

        Ok(Self {
            id,
            supplier_id,
            gtin,
            name,
            category_code: category_code.into(),
            status: ProductStatus::Submitted,
            rejection_reason: None,
            reviewed_by: None,
            updated_at: at,
        })
    }

    pub fn id(&self) -> ProductId {
        self.id
    }

    pub fn supplier_id(&self) -> AggregateId {
        self.supplier_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    /// Supplier edit. Sends an approved product back to review.
    pub fn rename(&mut self, name: impl Into<String>, at: DateTime<Utc>) -> DomainResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        self.name = name;
        self.status = ProductStatus::Submitted;
        self.reviewed_by = None;
        self.updated_at = at;
        Ok(())
    }

    pub fn approve(&mut self, admin: UserId, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != ProductStatus::Submitted {
            return Err(DomainError::conflict(format!(
                "only submitted products can be approved (status: {:?})",
                self.status
            )));
        }
        self.status = ProductStatus::Approved;
        self.rejection_reason = None;
        self.reviewed_by = Some(admin);
        self.updated_at = at;
        Ok(())
    }

    pub fn reject(&mut self, admin: UserId, reason: impl Into<String>, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != ProductStatus::Submitted {
            return Err(DomainError::conflict(format!(
                "only submitted products can be rejected (status: {:?})",
                self.status
            )));
        }
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainError::validation("rejection reason cannot be empty"));
        }
        self.status = ProductStatus::Rejected;
        self.rejection_reason = Some(reason);
        self.reviewed_by = Some(admin);
        self.updated_at = at;
        Ok(())
    }

    /// Detached copy of the current state, suitable for the outbox payload.
    pub fn snapshot(&self) -> ProductDto {
        ProductDto {
            id: self.id,
            supplier_id: self.supplier_id,
            gtin: self.gtin.clone(),
            name: self.name.clone(),
            category_code: self.category_code.clone(),
            status: self.status,
            rejection_reason: self.rejection_reason.clone(),
            reviewed_by: self.reviewed_by,
            updated_at: self.updated_at,
        }
    }
}

/// Serialized snapshot of a product, as stored in the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDto {
    pub id: ProductId,
    pub supplier_id: AggregateId,
    pub gtin: String,
    pub name: String,
    pub category_code: String,
    pub status: ProductStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}

/// GTIN-8/12/13/14 with a valid mod-10 check digit.
fn validate_gtin(gtin: &str) -> DomainResult<()> {
    if !matches!(gtin.len(), 8 | 12 | 13 | 14) || !gtin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DomainError::validation(format!("malformed GTIN: {gtin}")));
    }

    let digits: Vec<u32> = gtin.bytes().map(|b| u32::from(b - b'0')).collect();
    let (body, check) = digits.split_at(digits.len() - 1);
    let sum: u32 = body
        .iter()
        .rev()
        .enumerate()
        .map(|(i, d)| if i % 2 == 0 { d * 3 } else { *d })
        .sum();
    let expected = (10 - sum % 10) % 10;

    if expected != check[0] {
        return Err(DomainError::validation(format!("GTIN check digit mismatch: {gtin}")));
    }
    Ok(())
}
