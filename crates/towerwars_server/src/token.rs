//! Connection-token redemption.
//!
//! The gateway stores `connection_token:<opaque>` -> `"<user_id>:<character_id>"`
//! with a short TTL after an authorized session request. The zone server
//! only ever reads that key; the token stays valid until TTL expiry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use redis::AsyncCommands;
use uuid::Uuid;

/// Identity a token redeems to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Credentials {
    pub user_id: Uuid,
    pub character_id: Uuid,
}

/// Wall-clock budget for one validation, timer included by the caller.
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(2);

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read-only lookup of a connection token. `Ok(None)` means the token is
/// unknown or expired; `Err` means the store itself failed.
pub trait TokenValidator: Send + Sync + 'static {
    fn validate(&self, token: &str) -> BoxFuture<'_, anyhow::Result<Option<Credentials>>>;
}

fn parse_credentials(raw: &str) -> anyhow::Result<Credentials> {
    let (user, character) = raw
        .split_once(':')
        .context("token value is not of the form user:character")?;

    Ok(Credentials {
        user_id: user.parse().context("invalid user id in token value")?,
        character_id: character
            .parse()
            .context("invalid character id in token value")?,
    })
}

fn store_key(token: &str) -> String {
    format!("connection_token:{token}")
}

/// Production validator backed by the shared Redis store.
#[derive(Clone)]
pub struct RedisTokenValidator {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisTokenValidator {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("failed to connect to redis")?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: redis::aio::MultiplexedConnection) -> Self {
        Self { conn }
    }
}

impl TokenValidator for RedisTokenValidator {
    fn validate(&self, token: &str) -> BoxFuture<'_, anyhow::Result<Option<Credentials>>> {
        let mut conn = self.conn.clone();
        let key = store_key(token);

        Box::pin(async move {
            let raw: Option<String> = conn.get(&key).await.context("token store GET failed")?;
            match raw {
                Some(raw) => Ok(Some(parse_credentials(&raw)?)),
                None => Ok(None),
            }
        })
    }
}

/// In-process token table for tests and local runs.
#[derive(Clone, Default)]
pub struct MemoryTokenValidator {
    tokens: Arc<Mutex<HashMap<String, Credentials>>>,
}

impl MemoryTokenValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, credentials: Credentials) {
        self.tokens.lock().insert(token.into(), credentials);
    }
}

impl TokenValidator for MemoryTokenValidator {
    fn validate(&self, token: &str) -> BoxFuture<'_, anyhow::Result<Option<Credentials>>> {
        let result = self.tokens.lock().get(token).copied();
        Box::pin(async move { Ok(result) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_user_and_character() {
        let user = Uuid::new_v4();
        let character = Uuid::new_v4();
        let creds = parse_credentials(&format!("{user}:{character}")).unwrap();
        assert_eq!(creds.user_id, user);
        assert_eq!(creds.character_id, character);
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(parse_credentials("no-separator").is_err());
        assert!(parse_credentials("abc:def").is_err());
    }

    #[test]
    fn store_key_shape() {
        assert_eq!(store_key("abc"), "connection_token:abc");
    }

    #[tokio::test]
    async fn memory_validator_round_trip() {
        let validator = MemoryTokenValidator::new();
        let creds = Credentials {
            user_id: Uuid::new_v4(),
            character_id: Uuid::new_v4(),
        };
        validator.insert("tok", creds);

        assert_eq!(validator.validate("tok").await.unwrap(), Some(creds));
        assert_eq!(validator.validate("nope").await.unwrap(), None);
    }
}
