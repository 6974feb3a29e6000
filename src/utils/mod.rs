pub mod error;
pub mod identifier;
pub mod scheduled_executor;
pub mod text;

pub use error::{ApiError, ApiResult};
pub use identifier::{
    ensure_safe_identifier, ensure_safe_identifiers, is_safe_identifier, sanitize_filename,
};
pub use scheduled_executor::{ScheduledExecutor, ScheduledTask, ShutdownHandle};
pub use text::{humanize, title_case};
