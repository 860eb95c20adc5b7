pub use self::registry::{TenantDescriptor, TenantRegistry};
pub use self::router::{ResolvedChannel, RouteError, TenantRouter};

pub mod registry;
pub mod router;
