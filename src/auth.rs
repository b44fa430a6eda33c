//! Optional client authentication applied at the connection-accept path.

use base64::prelude::{BASE64_STANDARD, Engine as _};

/// Username/password pair checked before a connection may attach clients.
///
/// Verification is a plain string compare; the Basic-token form decodes the
/// standard-alphabet Base64 `user:pass` blob carried by `Authorization:
/// Basic` style headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Check a plain username/password pair.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.username == username && self.password == password
    }

    /// Check a Base64 `user:pass` token. Malformed tokens fail closed.
    pub fn verify_basic_token(&self, token: &str) -> bool {
        let Ok(decoded) = BASE64_STANDARD.decode(token.trim()) else {
            return false;
        };
        let Ok(text) = String::from_utf8(decoded) else {
            return false;
        };
        match text.split_once(':') {
            Some((user, pass)) => self.verify(user, pass),
            None => false,
        }
    }

    /// The Base64 token this credential pair would present.
    pub fn basic_token(&self) -> String {
        BASE64_STANDARD.encode(format!("{}:{}", self.username, self.password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_plain_pair() {
        let creds = Credentials::new("cam", "secret");
        assert!(creds.verify("cam", "secret"));
        assert!(!creds.verify("cam", "wrong"));
        assert!(!creds.verify("other", "secret"));
    }

    #[test]
    fn basic_token_round_trip() {
        let creds = Credentials::new("cam", "secret");
        assert!(creds.verify_basic_token(&creds.basic_token()));
    }

    #[test]
    fn malformed_tokens_fail_closed() {
        let creds = Credentials::new("cam", "secret");
        assert!(!creds.verify_basic_token("not base64!!"));
        assert!(!creds.verify_basic_token(&BASE64_STANDARD.encode("no-colon")));
        assert!(!creds.verify_basic_token(&BASE64_STANDARD.encode("cam:wrong")));
    }
}
