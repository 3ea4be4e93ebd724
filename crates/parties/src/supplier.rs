use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use supplyreg_core::{AggregateId, DomainError, DomainResult};

/// Supplier identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierId(pub AggregateId);

impl SupplierId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SupplierId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupplierStatus {
    Active,
    Suspended,
}

/// A registered supplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supplier {
    id: SupplierId,
    legal_name: String,
    registration_number: String,
    contact_email: Option<String>,
    status: SupplierStatus,
    updated_at: DateTime<Utc>,
}

impl Supplier {
    pub fn register(
        id: SupplierId,
        legal_name: impl Into<String>,
        registration_number: impl Into<String>,
        contact_email: Option<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let legal_name = legal_name.into();
        let registration_number = registration_number.into();

        if legal_name.trim().is_empty() {
            return Err(DomainError::validation("supplier legal name cannot be empty"));
        }
        if registration_number.trim().is_empty() {
            return Err(DomainError::validation("registration number cannot be empty"));
        }
        if let Some(email) = &contact_email {
            validate_email(email)?;
        }

        Ok(Self {
            id,
            legal_name,
            registration_number,
            contact_email,
            status: SupplierStatus::Active,
            updated_at: at,
        })
    }

    pub fn id(&self) -> SupplierId {
        self.id
    }

    pub fn status(&self) -> SupplierStatus {
        self.status
    }

    pub fn legal_name(&self) -> &str {
        &self.legal_name
    }

    pub fn update_contact(&mut self, contact_email: Option<String>, at: DateTime<Utc>) -> DomainResult<()> {
        if let Some(email) = &contact_email {
            validate_email(email)?;
        }
        self.contact_email = contact_email;
        self.updated_at = at;
        Ok(())
    }

    pub fn suspend(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status == SupplierStatus::Suspended {
            return Err(DomainError::conflict("supplier already suspended"));
        }
        self.status = SupplierStatus::Suspended;
        self.updated_at = at;
        Ok(())
    }

    pub fn snapshot(&self) -> SupplierDto {
        SupplierDto {
            id: self.id,
            legal_name: self.legal_name.clone(),
            registration_number: self.registration_number.clone(),
            contact_email: self.contact_email.clone(),
            status: self.status,
            updated_at: self.updated_at,
        }
    }
}

/// Serialized snapshot of a supplier, as stored in the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierDto {
    pub id: SupplierId,
    pub legal_name: String,
    pub registration_number: String,
    #[serde(default)]
    pub contact_email: Option<String>,
    pub status: SupplierStatus,
    pub updated_at: DateTime<Utc>,
}

fn validate_email(email: &str) -> DomainResult<()> {
    let valid = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
        .unwrap_or(false);
    if !valid {
        return Err(DomainError::validation(format!("invalid contact email: {email}")));
    }
    Ok(())
}
