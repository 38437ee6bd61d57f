//! Identity resolver: directory lookups backed by a last-known-good cache.
//!
//! Every successful directory lookup refreshes the fallback cache. Entries are
//! stored per user id with an email index beside them, so a user whose email
//! changed keeps exactly one entry. When the directory fails for any reason,
//! including "not found", the cache answers instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use relay_core::error::{RelayError, Result};
use relay_core::traits::IdentityDirectory;
use relay_core::types::{Channel, Identity, IdentityKey};

struct CachedIdentity {
    identity: Identity,
    stored_at: Instant,
}

/// Last-known-good identities: one entry per user id, reachable by email.
#[derive(Default)]
struct IdentityCache {
    by_id: HashMap<String, CachedIdentity>,
    id_by_email: HashMap<String, String>,
}

impl IdentityCache {
    /// Store `identity`, replacing any older entry for the same user and
    /// unlinking an email the user no longer owns.
    fn insert(&mut self, identity: &Identity) {
        let stale_email = self
            .by_id
            .get(&identity.id)
            .map(|previous| previous.identity.email.clone())
            .filter(|email| email != &identity.email);
        if let Some(email) = stale_email {
            if self.id_by_email.get(&email) == Some(&identity.id) {
                self.id_by_email.remove(&email);
            }
        }
        // The email may have moved here from another user.
        let previous_owner = self
            .id_by_email
            .get(&identity.email)
            .filter(|owner| *owner != &identity.id)
            .cloned();
        if let Some(owner) = previous_owner {
            self.by_id.remove(&owner);
        }
        self.id_by_email.insert(identity.email.clone(), identity.id.clone());
        self.by_id.insert(
            identity.id.clone(),
            CachedIdentity {
                identity: identity.clone(),
                stored_at: Instant::now(),
            },
        );
    }

    fn get(&self, key: &IdentityKey) -> Option<&CachedIdentity> {
        match key {
            IdentityKey::UserId(id) => self.by_id.get(id),
            IdentityKey::Email(email) => self.id_by_email.get(email).and_then(|id| self.by_id.get(id)),
        }
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }
}

pub struct IdentityResolver {
    directory: Arc<dyn IdentityDirectory>,
    cache: RwLock<IdentityCache>,
    /// Entries older than this are ignored; `None` keeps them forever.
    max_age: Option<Duration>,
    lookup_timeout: Duration,
    fallback_hits: AtomicU64,
}

impl IdentityResolver {
    pub fn new(directory: Arc<dyn IdentityDirectory>) -> Self {
        Self {
            directory,
            cache: RwLock::new(IdentityCache::default()),
            max_age: None,
            lookup_timeout: Duration::from_secs(5),
            fallback_hits: AtomicU64::new(0),
        }
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Resolve `key` to an identity.
    pub async fn resolve(&self, key: &IdentityKey) -> Result<Identity> {
        let lookup = tokio::time::timeout(self.lookup_timeout, self.directory.lookup(key)).await;
        let err = match lookup {
            Ok(Ok(identity)) => {
                self.remember(&identity);
                return Ok(identity);
            }
            Ok(Err(e)) => e,
            Err(_) => RelayError::Timeout(format!("directory lookup for {key}")),
        };

        if let Some(identity) = self.cached(key) {
            self.fallback_hits.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("🗂️ Directory lookup for {key} failed ({err}), using cached identity");
            return Ok(identity);
        }

        tracing::debug!("Directory lookup for {key} failed and no cached identity: {err}");
        Err(RelayError::IdentityNotFound(key.as_str().to_string()))
    }

    /// Resolve `key` and check the identity can receive on `channel`.
    pub async fn resolve_for(&self, key: &IdentityKey, channel: Channel) -> Result<Identity> {
        let identity = self.resolve(key).await?;
        ensure_reachable(&identity, channel)?;
        Ok(identity)
    }

    /// Number of identities in the fallback cache.
    pub fn cache_len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    /// How many resolutions were answered from the cache.
    pub fn fallback_hits(&self) -> u64 {
        self.fallback_hits.load(Ordering::Relaxed)
    }

    fn remember(&self, identity: &Identity) {
        if identity.id.is_empty() || identity.email.is_empty() {
            return;
        }
        let mut cache = self.cache.write().unwrap_or_else(|p| p.into_inner());
        cache.insert(identity);
    }

    fn cached(&self, key: &IdentityKey) -> Option<Identity> {
        let cache = self.cache.read().unwrap_or_else(|p| p.into_inner());
        let entry = cache.get(key)?;
        if self.max_age.is_some_and(|max| entry.stored_at.elapsed() > max) {
            return None;
        }
        Some(entry.identity.clone())
    }
}

/// Phone and SMS need a verified number; chat needs nothing beyond the identity.
pub fn ensure_reachable(identity: &Identity, channel: Channel) -> Result<()> {
    if channel.needs_phone() && identity.verified_phone().is_none() {
        return Err(RelayError::PhoneNotVerified(identity.email.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;

    /// Directory that can be switched offline mid-test.
    struct FlakyDirectory {
        users: Mutex<Vec<Identity>>,
        offline: AtomicBool,
    }

    #[async_trait]
    impl IdentityDirectory for FlakyDirectory {
        async fn lookup(&self, key: &IdentityKey) -> Result<Identity> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(RelayError::directory("connection refused"));
            }
            self.users
                .lock()
                .unwrap()
                .iter()
                .find(|u| match key {
                    IdentityKey::Email(e) => &u.email == e,
                    IdentityKey::UserId(id) => &u.id == id,
                })
                .cloned()
                .ok_or_else(|| RelayError::IdentityNotFound(key.as_str().into()))
        }
    }

    fn directory() -> Arc<FlakyDirectory> {
        Arc::new(FlakyDirectory {
            users: Mutex::new(vec![Identity::new("U1", "a@x.com").with_phone("+100", true)]),
            offline: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn test_fallback_cache_after_directory_failure() {
        let dir = directory();
        let resolver = IdentityResolver::new(dir.clone());
        let key = IdentityKey::Email("a@x.com".into());

        let first = resolver.resolve(&key).await.unwrap();
        assert_eq!(resolver.cache_len(), 1);

        dir.offline.store(true, Ordering::SeqCst);
        let second = resolver.resolve(&key).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.fallback_hits(), 1);

        // Cache is keyed by email, but user-id lookups can still fall back.
        let by_id = resolver.resolve(&IdentityKey::UserId("U1".into())).await.unwrap();
        assert_eq!(by_id.email, "a@x.com");
    }

    #[tokio::test]
    async fn test_email_change_keeps_latest_identity() {
        let dir = directory();
        let resolver = IdentityResolver::new(dir.clone());
        resolver.resolve(&IdentityKey::UserId("U1".into())).await.unwrap();

        *dir.users.lock().unwrap() = vec![Identity::new("U1", "new@x.com").with_phone("+200", true)];
        resolver.resolve(&IdentityKey::UserId("U1".into())).await.unwrap();
        assert_eq!(resolver.cache_len(), 1);

        dir.offline.store(true, Ordering::SeqCst);
        let by_id = resolver.resolve(&IdentityKey::UserId("U1".into())).await.unwrap();
        assert_eq!(by_id.email, "new@x.com");
        assert_eq!(by_id.phone_number.as_deref(), Some("+200"));
        let by_email = resolver.resolve(&IdentityKey::Email("new@x.com".into())).await.unwrap();
        assert_eq!(by_email, by_id);
        // The old address no longer belongs to anyone.
        assert!(matches!(
            resolver.resolve(&IdentityKey::Email("a@x.com".into())).await,
            Err(RelayError::IdentityNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_refreshed_entry_survives_max_age_after_email_change() {
        let dir = directory();
        let resolver = IdentityResolver::new(dir.clone()).with_max_age(Some(Duration::from_millis(200)));
        resolver.resolve(&IdentityKey::Email("a@x.com".into())).await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        *dir.users.lock().unwrap() = vec![Identity::new("U1", "new@x.com").with_phone("+200", true)];
        resolver.resolve(&IdentityKey::Email("new@x.com".into())).await.unwrap();

        dir.offline.store(true, Ordering::SeqCst);
        let by_id = resolver.resolve(&IdentityKey::UserId("U1".into())).await.unwrap();
        assert_eq!(by_id.phone_number.as_deref(), Some("+200"));
        assert_eq!(resolver.fallback_hits(), 1);
    }

    #[tokio::test]
    async fn test_email_reassigned_to_another_user() {
        let dir = directory();
        let resolver = IdentityResolver::new(dir.clone());
        resolver.resolve(&IdentityKey::Email("a@x.com".into())).await.unwrap();

        *dir.users.lock().unwrap() = vec![Identity::new("U9", "a@x.com").with_phone("+900", true)];
        resolver.resolve(&IdentityKey::Email("a@x.com".into())).await.unwrap();

        dir.offline.store(true, Ordering::SeqCst);
        let by_email = resolver.resolve(&IdentityKey::Email("a@x.com".into())).await.unwrap();
        assert_eq!(by_email.id, "U9");
        assert!(resolver.resolve(&IdentityKey::UserId("U1".into())).await.is_err());
        assert_eq!(resolver.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_without_cache() {
        let resolver = IdentityResolver::new(directory());
        let err = resolver
            .resolve(&IdentityKey::Email("nobody@x.com".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::IdentityNotFound(k) if k == "nobody@x.com"));
        assert_eq!(resolver.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_expired_cache_entry_is_ignored() {
        let dir = directory();
        let resolver = IdentityResolver::new(dir.clone()).with_max_age(Some(Duration::ZERO));
        let key = IdentityKey::Email("a@x.com".into());
        resolver.resolve(&key).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        dir.offline.store(true, Ordering::SeqCst);
        assert!(matches!(
            resolver.resolve(&key).await,
            Err(RelayError::IdentityNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unverified_phone_rejected_for_sms_only() {
        let dir = Arc::new(FlakyDirectory {
            users: Mutex::new(vec![Identity::new("U2", "b@x.com").with_phone("+200", false)]),
            offline: AtomicBool::new(false),
        });
        let resolver = IdentityResolver::new(dir);
        let key = IdentityKey::Email("b@x.com".into());

        let err = resolver.resolve_for(&key, Channel::Sms).await.unwrap_err();
        assert!(matches!(err, RelayError::PhoneNotVerified(_)));
        let err = resolver.resolve_for(&key, Channel::Phone).await.unwrap_err();
        assert!(matches!(err, RelayError::PhoneNotVerified(_)));
        assert!(resolver.resolve_for(&key, Channel::Slack).await.is_ok());
    }

    #[tokio::test]
    async fn test_slow_directory_times_out_to_cache() {
        struct SlowDirectory;

        #[async_trait]
        impl IdentityDirectory for SlowDirectory {
            async fn lookup(&self, _key: &IdentityKey) -> Result<Identity> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(RelayError::directory("unreachable"))
            }
        }

        let resolver = IdentityResolver::new(Arc::new(SlowDirectory))
            .with_lookup_timeout(Duration::from_millis(20));
        let err = resolver
            .resolve(&IdentityKey::UserId("U1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::IdentityNotFound(_)));
    }
}
