pub mod collaborator;
pub use collaborator::{CollaboratorError, JsonEndpoint};
pub mod url_validation;
pub use url_validation::{UrlValidationError, validate_endpoint_url, validate_websocket_url};
