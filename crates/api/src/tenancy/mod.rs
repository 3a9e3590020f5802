//! Tenant resolution for widget connections
//!
//! Embedded widgets identify themselves with an API key; this module maps
//! the key to the owning tenant and refuses inactive tenants.

mod cache;
mod origin;
mod resolver;

pub use cache::TenantCache;
pub use origin::host_allowed;
pub use resolver::TenantResolver;
