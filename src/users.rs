//! User directory.
//!
//! Authentication only asks a [`UserDirectory`] whether a user exists and,
//! optionally, whether the client's scrambled password matches. How deep that
//! verification goes is up to the directory.
use std::collections::HashMap;

use sha1::{Digest, Sha1};

pub trait UserDirectory: Send + Sync {
    fn exists(&self, username: &str) -> bool;

    /// Checks the client's auth response against the seed it was sent.
    fn verify(&self, _username: &str, _seed: &[u8], _auth_response: &[u8]) -> bool {
        true
    }
}

/// In-memory directory. Users without a password are admitted on existence
/// alone; users with one must present a matching `mysql_native_password`
/// scramble.
#[derive(Debug, Clone, Default)]
pub struct StaticUsers {
    users: HashMap<String, Option<String>>,
}

impl StaticUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, username: impl Into<String>, password: Option<&str>) -> Self {
        self.insert(username, password);
        self
    }

    pub fn insert(&mut self, username: impl Into<String>, password: Option<&str>) {
        self.users
            .insert(username.into(), password.map(str::to_string));
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserDirectory for StaticUsers {
    fn exists(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    fn verify(&self, username: &str, seed: &[u8], auth_response: &[u8]) -> bool {
        match self.users.get(username) {
            None => false,
            Some(None) => true,
            Some(Some(password)) if password.is_empty() => auth_response.is_empty(),
            Some(Some(password)) => native_password_scramble(password, seed) == auth_response,
        }
    }
}

/// `SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))`
pub fn native_password_scramble(password: &str, seed: &[u8]) -> Vec<u8> {
    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &[u8; 20] = b"abcdefghijklmnopqrst";

    #[test]
    fn passwordless_user_is_admitted() {
        let users = StaticUsers::new().with_user("root", None);
        assert!(users.exists("root"));
        assert!(users.verify("root", SEED, b"anything"));
        assert!(!users.exists("guest"));
    }

    #[test]
    fn password_user_requires_scramble() {
        let users = StaticUsers::new().with_user("app", Some("secret"));
        let scramble = native_password_scramble("secret", SEED);

        assert_eq!(scramble.len(), 20);
        assert!(users.verify("app", SEED, &scramble));
        assert!(!users.verify("app", SEED, &native_password_scramble("wrong", SEED)));
        assert!(!users.verify("app", b"another-seed-of-20b!", &scramble));
    }

    #[test]
    fn empty_password_requires_empty_response() {
        let users = StaticUsers::new().with_user("app", Some(""));
        assert!(users.verify("app", SEED, b""));
        assert!(!users.verify("app", SEED, b"x"));
    }
}
