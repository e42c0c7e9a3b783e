//! Cookie based session authentication
//!
//! A session is nothing more than a cookie holding the digest of the current
//! web credentials. There is no expiry and no server side session state.

pub mod token;

pub use token::{CLEARED_SESSION, SESSION_COOKIE, SessionToken};

use crate::services::parameters::Parameters;
use log::debug;

const LOGIN_FAILED_MESSAGE: &str = "Wrong username/password! try again.";

/// Result of a login attempt
#[derive(Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    Granted(SessionToken),
    /// Message to show on the re-rendered login form
    Denied(String),
}

pub struct AuthenticationService;

impl AuthenticationService {
    /// Token matching the credentials currently stored in `parameters`
    pub fn session_token(parameters: &Parameters) -> SessionToken {
        SessionToken::derive(&parameters.web_account, &parameters.web_password)
    }

    /// Validate the `Cookie` header values of a request against the live token
    pub fn is_authenticated<'a>(
        parameters: &Parameters,
        cookie_headers: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        Self::session_token(parameters).is_presented_in(cookie_headers)
    }

    /// Compare the submitted credentials with the stored ones
    ///
    /// On mismatch the configured credentials are appended to the failure
    /// message when the device runs with debug output enabled.
    pub fn login(parameters: &Parameters, account: &str, password: &str) -> LoginOutcome {
        debug!("checking credentials of {account:?}");

        if account == parameters.web_account && password == parameters.web_password {
            return LoginOutcome::Granted(Self::session_token(parameters));
        }

        let mut message = LOGIN_FAILED_MESSAGE.to_string();

        if parameters.debug_enabled {
            message.push_str(&parameters.web_account);
            message.push(',');
            message.push_str(&parameters.web_password);
        }

        LoginOutcome::Denied(message)
    }
}
