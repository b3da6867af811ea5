pub mod error;
pub mod validator;

pub use error::{FieldError, ValidationErrors};
pub use validator::SettingsValidator;
