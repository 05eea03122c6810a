//! Authorization header values for task credentials

use base64::{engine::general_purpose, Engine as _};
use dlpool_types::Credential;

/// Format a credential as the value of an `Authorization` header
pub fn authorization_header(credential: &Credential) -> String {
    match credential {
        Credential::Basic { username, password } => {
            let encoded = general_purpose::STANDARD.encode(format!("{}:{}", username, password));
            format!("Basic {}", encoded)
        }
        Credential::Bearer { token } => format!("Bearer {}", token),
    }
}
