//! Handler registration for every aggregate type the registry publishes.

use std::sync::Arc;

use tracing::info;

use supplyreg_events::{AggregateType, PayloadRegistry, RegistryError};
use supplyreg_products::CategoryNames;

/// Register all domain handlers and fail unless every [`AggregateType`] is
/// covered. A missing handler is a deployment defect, so it stops startup.
pub fn build_registry(categories: Arc<dyn CategoryNames>) -> Result<PayloadRegistry, RegistryError> {
    let mut builder = PayloadRegistry::builder();
    supplyreg_products::register(&mut builder, categories)?;
    supplyreg_parties::register(&mut builder)?;
    supplyreg_agreements::register(&mut builder)?;

    let registry = builder.build();
    registry.ensure_complete(&AggregateType::ALL)?;
    info!(handlers = registry.len(), "payload registry built");
    Ok(registry)
}
