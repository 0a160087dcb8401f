// Authentication module
// Manages the OAuth credential lifecycle: persistence, authorization and refresh

mod authorize;
mod clock;
mod manager;
mod refresh;
mod scheduler;
mod store;
mod types;

pub use authorize::{
    Authorizer, InteractiveAuthorizer, RefreshTokenAuthorizer, DEFAULT_REDIRECT_URI,
    GOOGLE_AUTH_URL, SCOPES,
};
pub use clock::{Clock, SystemClock, TokioClock};
pub use manager::{AuthManager, RefreshSettings};
pub use refresh::{GoogleTokenEndpoint, GrantError, TokenEndpoint, GOOGLE_TOKEN_URL};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use types::{AuthState, Credential, CredentialBundle, PersistedCredentialRecord, TokenGrant};
