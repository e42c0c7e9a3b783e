use sha2::{Digest, Sha256};

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "ESPSESSIONID";

/// Value written into the session cookie on logout.
pub const CLEARED_SESSION: &str = "0";

/// Session token derived from the web login credentials
///
/// The token is not stored anywhere. It is recomputed from the current
/// credentials on every check, so changing either the account or the password
/// invalidates every cookie issued before.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn derive(account: &str, password: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(account.as_bytes());
        hasher.update(password.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// `ESPSESSIONID=<token>`
    pub fn cookie_pair(&self) -> String {
        format!("{SESSION_COOKIE}={}", self.0)
    }

    /// Check whether any of the given `Cookie` header values carries this token
    pub fn is_presented_in<'a>(&self, cookie_headers: impl IntoIterator<Item = &'a str>) -> bool {
        let pair = self.cookie_pair();
        cookie_headers
            .into_iter()
            .any(|header| header.contains(&pair))
    }
}
