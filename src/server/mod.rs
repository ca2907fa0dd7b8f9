pub mod authority;

pub use authority::{AuthorityServer, ClientId, ServerError, ServerStats};
