pub mod database;
pub mod pagofacil;
pub mod reconciliation;

pub use database::Database;
pub use pagofacil::{PagoFacilClient, TokenCache};
pub use reconciliation::ReconciliationService;
