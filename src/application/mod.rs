pub mod accounts;
pub mod driver;
pub mod error;
pub mod listings;
pub mod sessions;
pub mod token;

pub use accounts::AccountService;
pub use error::{AppError, ErrorReport};
pub use listings::ListingService;
pub use sessions::{AuthError, SessionManager};
