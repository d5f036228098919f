//! CrudService: generic CRUD using safe SQL builder, with validation, role guards and delete previews.

pub mod credentials;
mod crud;
pub mod dependents;
mod roles;
mod validation;
pub use crud::{CrudService, ListParams};
pub use dependents::{cascade_reach, preview_delete, DeletePreview, ReferenceSource};
pub use roles::RoleGuard;
pub use validation::RequestValidator;
