//! Mapping backend status codes to what the gateway does next.
//!
//! Every backend reply goes through the same rule: `0` proceeds,
//! [`CODE_AUTH_REQUIRED`] sends the browser to the login page carrying the
//! page it wanted, and anything else is shown as a failure.

use protocol::{Response, CODE_AUTH_REQUIRED, CODE_OK};
use url::form_urlencoded;

/// Path of the login page.
pub const LOGIN_PATH: &str = "/login";

/// Class of a backend status code, without any redirect target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Proceed,
    Reauthenticate,
    Fail,
}

/// What the gateway should do with a backend reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Proceed,
    /// Send the browser to `redirect` to log in again.
    Reauthenticate { redirect: String },
    Fail { code: i32, message: String },
}

pub fn classify(response: &Response) -> Outcome {
    match response.code {
        CODE_OK => Outcome::Proceed,
        CODE_AUTH_REQUIRED => Outcome::Reauthenticate,
        _ => Outcome::Fail,
    }
}

/// Interpret a reply to a request made on behalf of `current_path`.
pub fn interpret(response: &Response, current_path: &str) -> Verdict {
    match classify(response) {
        Outcome::Proceed => Verdict::Proceed,
        Outcome::Reauthenticate => Verdict::Reauthenticate {
            redirect: login_redirect(current_path, None),
        },
        Outcome::Fail => failure(response),
    }
}

/// Interpret a reply to a `login` request.
///
/// Rejected credentials land back on the login page with the backend's
/// message and the original redirect target preserved.
pub fn interpret_login(response: &Response, redirect_target: &str) -> Verdict {
    match classify(response) {
        Outcome::Proceed => Verdict::Proceed,
        Outcome::Reauthenticate => Verdict::Reauthenticate {
            redirect: login_redirect(redirect_target, Some(&response.message)),
        },
        Outcome::Fail => failure(response),
    }
}

fn failure(response: &Response) -> Verdict {
    Verdict::Fail {
        code: response.code,
        message: response.message.clone(),
    }
}

/// `/login?redirect=<target>`, optionally with an `error` message.
pub fn login_redirect(target: &str, error: Option<&str>) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair("redirect", target);
    if let Some(error) = error {
        query.append_pair("error", error);
    }
    format!("{}?{}", LOGIN_PATH, query.finish())
}

/// `/login?error=<message>` with no redirect target.
pub fn login_notice(message: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("error", message)
        .finish();
    format!("{}?{}", LOGIN_PATH, query)
}
