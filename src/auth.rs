use crate::config::ApiUser;
use crate::errors::{DaemonError, Result};
use crate::job::Requester;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Username and password from an HTTP Basic `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl BasicCredentials {
    /// Parse `Basic <base64(user:password)>`.
    pub fn parse(auth_header: &str) -> Result<Self> {
        let encoded = auth_header
            .strip_prefix("Basic ")
            .ok_or_else(|| DaemonError::Auth("Invalid Authorization header format".into()))?;

        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| DaemonError::Auth("Invalid Basic credentials encoding".into()))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| DaemonError::Auth("Basic credentials are not UTF-8".into()))?;

        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| DaemonError::Auth("Basic credentials missing ':'".into()))?;

        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Hex SHA-256 of a password, the form stored in the server config.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn parse_digest(hex_digest: &str) -> Option<Vec<u8>> {
    hex::decode(hex_digest).ok().filter(|bytes| bytes.len() == 32)
}

/// Compare two digests without an early exit on the first differing byte.
fn digests_match(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// A user that passed authentication.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub username: String,
    pub admin: bool,
    /// May claim and manage jobs; always set for admins
    pub operator: bool,
    /// Who prints are attributed to
    pub requester: Requester,
}

impl AuthenticatedUser {
    pub fn require_admin(&self) -> Result<()> {
        if self.admin {
            Ok(())
        } else {
            warn!("User '{}' attempted an admin operation", self.username);
            Err(DaemonError::Forbidden(format!(
                "user '{}' is not an administrator",
                self.username
            )))
        }
    }

    /// Team accounts may only submit; everything that touches other
    /// people's jobs needs an operator.
    pub fn require_operator(&self) -> Result<()> {
        if self.operator {
            Ok(())
        } else {
            warn!("User '{}' attempted an operator operation", self.username);
            Err(DaemonError::Forbidden(format!(
                "user '{}' is not a print operator",
                self.username
            )))
        }
    }
}

struct UserEntry {
    /// `None` for a malformed config hash, which never matches
    password_digest: Option<Vec<u8>>,
    admin: bool,
    operator: bool,
    requester: Requester,
}

/// The server's account list.
pub struct UserDirectory {
    users: HashMap<String, UserEntry>,
}

impl UserDirectory {
    /// Users without a team print as themselves, numbered in config order.
    pub fn new(users: &[ApiUser]) -> Self {
        let users = users
            .iter()
            .enumerate()
            .map(|(index, user)| {
                let requester = match &user.team {
                    Some(team) => Requester::Team {
                        id: team.id,
                        name: team.name.clone(),
                        room: team.room.clone(),
                    },
                    None => Requester::User {
                        id: index as i64 + 1,
                        name: user.username.clone(),
                    },
                };
                (
                    user.username.clone(),
                    UserEntry {
                        password_digest: parse_digest(&user.password_sha256),
                        admin: user.admin,
                        operator: user.admin || user.operator,
                        requester,
                    },
                )
            })
            .collect();

        Self { users }
    }

    /// Check the `Authorization` header value of a request.
    pub fn authenticate(&self, auth_header: Option<&str>) -> Result<AuthenticatedUser> {
        let header =
            auth_header.ok_or_else(|| DaemonError::Auth("Missing Authorization header".into()))?;
        let credentials = BasicCredentials::parse(header)?;

        let entry = self.users.get(&credentials.username).ok_or_else(|| {
            warn!("Unknown user '{}'", credentials.username);
            DaemonError::Auth("Invalid username or password".into())
        })?;

        let digest = Sha256::digest(credentials.password.as_bytes());
        let matches = entry
            .password_digest
            .as_deref()
            .map_or(false, |expected| digests_match(expected, &digest));
        if !matches {
            warn!("Wrong password for user '{}'", credentials.username);
            return Err(DaemonError::Auth("Invalid username or password".into()));
        }

        debug!("Authenticated user '{}'", credentials.username);
        Ok(AuthenticatedUser {
            username: credentials.username,
            admin: entry.admin,
            operator: entry.operator,
            requester: entry.requester.clone(),
        })
    }
}
