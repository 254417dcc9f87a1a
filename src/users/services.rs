use anyhow::anyhow;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::store::{ReferralStore, StoreError};
use crate::users::code::{self, CodeGenError};
use crate::users::repo_types::User;

/// Points credited to both parties when a referral is applied.
pub const REFERRAL_REWARD_POINTS: i64 = 5000;

/// A code collision at insert time means a concurrent transaction committed
/// the same code after our in-transaction check; the whole registration is
/// retried on a fresh transaction, at most this many times.
const MAX_TX_ATTEMPTS: usize = 4;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("email and name are required")]
    MissingFields,
    #[error("invalid email address")]
    InvalidEmail,
    #[error("email already registered")]
    EmailAlreadyExists,
    #[error("invalid referral code")]
    InvalidReferralCode,
    #[error("cannot use your own referral code")]
    SelfReferral,
    #[error("could not assign a unique referral code")]
    CodeGenerationExhausted,
    #[error("storage failure")]
    Storage(#[source] anyhow::Error),
}

/// Details of a successfully applied referral.
#[derive(Debug, Clone)]
pub struct AppliedReferral {
    pub inviter_id: Uuid,
    pub inviter_name: String,
    pub points_given: i64,
}

#[derive(Debug)]
pub struct RegistrationOutcome {
    pub user: User,
    pub referral: Option<AppliedReferral>,
}

enum RunError {
    CodeTaken,
    Fail(RegisterError),
}

impl From<StoreError> for RunError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail => RunError::Fail(RegisterError::EmailAlreadyExists),
            StoreError::DuplicateCode => RunError::CodeTaken,
            StoreError::Backend(err) => RunError::Fail(RegisterError::Storage(err)),
            other @ StoreError::DuplicateInvitee => {
                RunError::Fail(RegisterError::Storage(anyhow!(other)))
            }
        }
    }
}

/// Execute one registration end-to-end: validate, create the user with a
/// freshly minted code and, if a referral code was presented, credit both
/// parties and record the referral edge. Everything past validation runs in
/// one store session; any failure drops the session and nothing persists.
pub async fn register_with_referral(
    store: &dyn ReferralStore,
    email: &str,
    name: &str,
    referral_code: Option<&str>,
) -> Result<RegistrationOutcome, RegisterError> {
    let email = email.trim();
    let name = name.trim();
    if email.is_empty() || name.is_empty() {
        return Err(RegisterError::MissingFields);
    }
    if !is_valid_email(email) {
        return Err(RegisterError::InvalidEmail);
    }
    let presented = referral_code.map(str::trim).filter(|c| !c.is_empty());

    for _ in 0..MAX_TX_ATTEMPTS {
        match run_registration(store, email, name, presented).await {
            Ok(outcome) => return Ok(outcome),
            Err(RunError::CodeTaken) => {
                debug!(%email, "referral code lost an insert race; retrying registration");
                continue;
            }
            Err(RunError::Fail(e)) => return Err(e),
        }
    }
    Err(RegisterError::CodeGenerationExhausted)
}

async fn run_registration(
    store: &dyn ReferralStore,
    email: &str,
    name: &str,
    presented: Option<&str>,
) -> Result<RegistrationOutcome, RunError> {
    let mut session = store.begin().await?;

    // Re-check inside the transaction; the unique constraint is the backstop
    // for inserts racing past this read.
    if session.find_user_by_email(email).await?.is_some() {
        session.rollback().await?;
        return Err(RunError::Fail(RegisterError::EmailAlreadyExists));
    }

    let code = match code::mint_unique(session.as_mut()).await {
        Ok(code) => code,
        Err(CodeGenError::Exhausted { .. }) => {
            return Err(RunError::Fail(RegisterError::CodeGenerationExhausted))
        }
        Err(CodeGenError::Store(e)) => return Err(e.into()),
    };

    let user = session.insert_user(email, name, &code).await?;

    let Some(presented) = presented else {
        session.commit().await?;
        return Ok(RegistrationOutcome {
            user,
            referral: None,
        });
    };

    let Some(inviter) = session.find_user_by_code(presented).await? else {
        session.rollback().await?;
        return Err(RunError::Fail(RegisterError::InvalidReferralCode));
    };
    // Unreachable through this flow (the new user's code is freshly minted),
    // kept as an invariant check.
    if inviter.id == user.id {
        session.rollback().await?;
        return Err(RunError::Fail(RegisterError::SelfReferral));
    }

    session
        .add_points(inviter.id, REFERRAL_REWARD_POINTS)
        .await?;
    session.add_points(user.id, REFERRAL_REWARD_POINTS).await?;
    session
        .insert_referral(inviter.id, user.id, presented, REFERRAL_REWARD_POINTS)
        .await?;

    // Re-read so the returned row carries the awarded balance.
    let user = session.find_user_by_id(user.id).await?.ok_or_else(|| {
        RunError::Fail(RegisterError::Storage(anyhow!(
            "registered user disappeared mid-transaction"
        )))
    })?;
    session.commit().await?;

    Ok(RegistrationOutcome {
        user,
        referral: Some(AppliedReferral {
            inviter_id: inviter.id,
            inviter_name: inviter.name,
            points_given: REFERRAL_REWARD_POINTS,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreSession;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use time::OffsetDateTime;

    #[derive(Debug, Clone, PartialEq)]
    struct ReferralRow {
        inviter_id: Uuid,
        invitee_id: Uuid,
        invitee_referral_code: String,
        points_given: i64,
    }

    #[derive(Default)]
    struct MemState {
        users: Vec<User>,
        referrals: Vec<ReferralRow>,
    }

    #[derive(Default)]
    struct Inner {
        state: Mutex<MemState>,
        begun: AtomicUsize,
        // next N user inserts fail as if a concurrent tx committed the code
        collide_inserts: AtomicUsize,
        // next N point awards fail with a backend error
        fail_point_awards: AtomicUsize,
    }

    /// In-memory store with real commit/discard semantics: a session stages
    /// its writes locally and publishes them only on commit.
    #[derive(Default, Clone)]
    struct MemStore {
        inner: Arc<Inner>,
    }

    impl MemStore {
        fn users(&self) -> Vec<User> {
            self.inner.state.lock().unwrap().users.clone()
        }

        fn referrals(&self) -> Vec<ReferralRow> {
            self.inner.state.lock().unwrap().referrals.clone()
        }

        fn user_by_email(&self, email: &str) -> Option<User> {
            self.users().into_iter().find(|u| u.email == email)
        }
    }

    #[async_trait]
    impl ReferralStore for MemStore {
        async fn begin(&self) -> Result<Box<dyn StoreSession>, StoreError> {
            self.inner.begun.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemSession {
                inner: self.inner.clone(),
                new_users: Vec::new(),
                new_referrals: Vec::new(),
                point_deltas: Vec::new(),
            }))
        }
    }

    struct MemSession {
        inner: Arc<Inner>,
        new_users: Vec<User>,
        new_referrals: Vec<ReferralRow>,
        point_deltas: Vec<(Uuid, i64)>,
    }

    impl MemSession {
        fn visible_users(&self) -> Vec<User> {
            let committed = self.inner.state.lock().unwrap().users.clone();
            let mut all: Vec<User> = committed
                .into_iter()
                .chain(self.new_users.iter().cloned())
                .collect();
            for (id, delta) in &self.point_deltas {
                if let Some(user) = all.iter_mut().find(|u| u.id == *id) {
                    user.points += delta;
                }
            }
            all
        }
    }

    #[async_trait]
    impl StoreSession for MemSession {
        async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError> {
            Ok(self.visible_users().into_iter().find(|u| u.email == email))
        }

        async fn find_user_by_id(&mut self, id: Uuid) -> Result<Option<User>, StoreError> {
            Ok(self.visible_users().into_iter().find(|u| u.id == id))
        }

        async fn find_user_by_code(&mut self, code: &str) -> Result<Option<User>, StoreError> {
            Ok(self
                .visible_users()
                .into_iter()
                .find(|u| u.referral_code == code))
        }

        async fn referral_code_exists(&mut self, code: &str) -> Result<bool, StoreError> {
            Ok(self.visible_users().iter().any(|u| u.referral_code == code))
        }

        async fn insert_user(
            &mut self,
            email: &str,
            name: &str,
            referral_code: &str,
        ) -> Result<User, StoreError> {
            if self.inner.collide_inserts.load(Ordering::SeqCst) > 0 {
                self.inner.collide_inserts.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::DuplicateCode);
            }
            let all = self.visible_users();
            if all.iter().any(|u| u.email == email) {
                return Err(StoreError::DuplicateEmail);
            }
            if all.iter().any(|u| u.referral_code == referral_code) {
                return Err(StoreError::DuplicateCode);
            }
            let now = OffsetDateTime::now_utc();
            let user = User {
                id: Uuid::new_v4(),
                email: email.to_string(),
                name: name.to_string(),
                referral_code: referral_code.to_string(),
                points: 0,
                created_at: now,
                updated_at: now,
            };
            self.new_users.push(user.clone());
            Ok(user)
        }

        async fn add_points(&mut self, user_id: Uuid, amount: i64) -> Result<(), StoreError> {
            if self.inner.fail_point_awards.load(Ordering::SeqCst) > 0 {
                self.inner.fail_point_awards.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Backend(anyhow!("injected add_points failure")));
            }
            if !self.visible_users().iter().any(|u| u.id == user_id) {
                return Err(StoreError::Backend(anyhow!(
                    "add_points: user {user_id} not found"
                )));
            }
            self.point_deltas.push((user_id, amount));
            Ok(())
        }

        async fn insert_referral(
            &mut self,
            inviter_id: Uuid,
            invitee_id: Uuid,
            presented_code: &str,
            points_given: i64,
        ) -> Result<(), StoreError> {
            let committed_dup = self
                .inner
                .state
                .lock()
                .unwrap()
                .referrals
                .iter()
                .any(|r| r.invitee_id == invitee_id);
            if committed_dup || self.new_referrals.iter().any(|r| r.invitee_id == invitee_id) {
                return Err(StoreError::DuplicateInvitee);
            }
            self.new_referrals.push(ReferralRow {
                inviter_id,
                invitee_id,
                invitee_referral_code: presented_code.to_string(),
                points_given,
            });
            Ok(())
        }

        async fn commit(self: Box<Self>) -> Result<(), StoreError> {
            let MemSession {
                inner,
                new_users,
                new_referrals,
                point_deltas,
            } = *self;
            let mut state = inner.state.lock().unwrap();
            state.users.extend(new_users);
            for (id, delta) in point_deltas {
                if let Some(user) = state.users.iter_mut().find(|u| u.id == id) {
                    user.points += delta;
                    user.updated_at = OffsetDateTime::now_utc();
                }
            }
            state.referrals.extend(new_referrals);
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
            Ok(())
        }
    }

    async fn register(
        store: &MemStore,
        email: &str,
        name: &str,
        code: Option<&str>,
    ) -> Result<RegistrationOutcome, RegisterError> {
        register_with_referral(store, email, name, code).await
    }

    #[tokio::test]
    async fn registers_without_referral_code() {
        let store = MemStore::default();

        let outcome = register(&store, "alice@example.com", "Alice", None)
            .await
            .expect("registration should succeed");

        assert!(outcome.referral.is_none());
        assert_eq!(outcome.user.points, 0);
        assert_eq!(outcome.user.referral_code.len(), 8);
        assert!(outcome
            .user
            .referral_code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        assert_eq!(store.users().len(), 1);
        assert!(store.referrals().is_empty());
    }

    #[tokio::test]
    async fn blank_referral_code_is_treated_as_absent() {
        let store = MemStore::default();

        let outcome = register(&store, "alice@example.com", "Alice", Some("   "))
            .await
            .expect("registration should succeed");

        assert!(outcome.referral.is_none());
        assert_eq!(outcome.user.points, 0);
        assert!(store.referrals().is_empty());
    }

    #[tokio::test]
    async fn referral_awards_points_to_both_parties() {
        let store = MemStore::default();
        let alice = register(&store, "alice@example.com", "Alice", None)
            .await
            .unwrap()
            .user;

        let outcome = register(
            &store,
            "bob@example.com",
            "Bob",
            Some(alice.referral_code.as_str()),
        )
        .await
        .expect("registration with referral should succeed");

        let applied = outcome.referral.expect("referral should apply");
        assert_eq!(applied.points_given, REFERRAL_REWARD_POINTS);
        assert_eq!(applied.inviter_id, alice.id);
        assert_eq!(applied.inviter_name, "Alice");
        assert_eq!(outcome.user.points, REFERRAL_REWARD_POINTS);

        let alice_now = store.user_by_email("alice@example.com").unwrap();
        assert_eq!(alice_now.points, REFERRAL_REWARD_POINTS);

        let referrals = store.referrals();
        assert_eq!(referrals.len(), 1);
        assert_eq!(referrals[0].inviter_id, alice.id);
        assert_eq!(referrals[0].invitee_id, outcome.user.id);
        // Stored verbatim as presented, not normalized to the inviter's row.
        assert_eq!(referrals[0].invitee_referral_code, alice.referral_code);
        assert_eq!(referrals[0].points_given, REFERRAL_REWARD_POINTS);
    }

    #[tokio::test]
    async fn invalid_code_rolls_back_the_whole_registration() {
        let store = MemStore::default();
        register(&store, "alice@example.com", "Alice", None)
            .await
            .unwrap();

        let err = register(&store, "charlie@example.com", "Charlie", Some("INVALID123"))
            .await
            .unwrap_err();

        assert!(matches!(err, RegisterError::InvalidReferralCode));
        assert!(store.user_by_email("charlie@example.com").is_none());
        assert_eq!(store.user_by_email("alice@example.com").unwrap().points, 0);
        assert!(store.referrals().is_empty());
    }

    #[tokio::test]
    async fn duplicate_email_leaves_existing_rows_untouched() {
        let store = MemStore::default();
        let alice = register(&store, "alice@example.com", "Alice", None)
            .await
            .unwrap()
            .user;
        let bob = register(
            &store,
            "bob@example.com",
            "Bob",
            Some(alice.referral_code.as_str()),
        )
        .await
        .unwrap()
        .user;

        // Second registration for Bob's email, with a valid code, must fail
        // with the email conflict and must not create a second referral edge.
        let err = register(
            &store,
            "bob@example.com",
            "Bob Again",
            Some(alice.referral_code.as_str()),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RegisterError::EmailAlreadyExists));
        assert_eq!(store.users().len(), 2);
        assert_eq!(store.referrals().len(), 1);

        let bob_now = store.user_by_email("bob@example.com").unwrap();
        assert_eq!(bob_now.id, bob.id);
        assert_eq!(bob_now.points, REFERRAL_REWARD_POINTS);
        assert_eq!(bob_now.referral_code, bob.referral_code);
        assert_eq!(
            store.user_by_email("alice@example.com").unwrap().points,
            REFERRAL_REWARD_POINTS
        );
    }

    #[tokio::test]
    async fn validation_failures_never_touch_storage() {
        let store = MemStore::default();

        for (email, name) in [("", "Alice"), ("alice@example.com", ""), ("   ", "Alice")] {
            let err = register(&store, email, name, None).await.unwrap_err();
            assert!(matches!(err, RegisterError::MissingFields));
        }
        let err = register(&store, "not-an-email", "Alice", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegisterError::InvalidEmail));

        assert_eq!(store.inner.begun.load(Ordering::SeqCst), 0);
        assert!(store.users().is_empty());
    }

    #[tokio::test]
    async fn storage_failure_mid_award_persists_nothing() {
        let store = MemStore::default();
        let alice = register(&store, "alice@example.com", "Alice", None)
            .await
            .unwrap()
            .user;

        store.inner.fail_point_awards.store(1, Ordering::SeqCst);
        let err = register(
            &store,
            "bob@example.com",
            "Bob",
            Some(alice.referral_code.as_str()),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RegisterError::Storage(_)));
        assert!(store.user_by_email("bob@example.com").is_none());
        assert_eq!(store.user_by_email("alice@example.com").unwrap().points, 0);
        assert!(store.referrals().is_empty());
    }

    #[tokio::test]
    async fn code_collision_at_insert_retries_on_a_fresh_transaction() {
        let store = MemStore::default();
        store.inner.collide_inserts.store(1, Ordering::SeqCst);

        let outcome = register(&store, "alice@example.com", "Alice", None)
            .await
            .expect("registration should succeed after a retry");

        assert_eq!(outcome.user.email, "alice@example.com");
        assert_eq!(store.users().len(), 1);
        assert_eq!(store.inner.begun.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_code_collisions_fail_closed() {
        let store = MemStore::default();
        store.inner.collide_inserts.store(64, Ordering::SeqCst);

        let err = register(&store, "alice@example.com", "Alice", None)
            .await
            .unwrap_err();

        assert!(matches!(err, RegisterError::CodeGenerationExhausted));
        assert!(store.users().is_empty());
    }

    #[tokio::test]
    async fn concurrent_referrals_both_reward_the_inviter() {
        let store = MemStore::default();
        let alice = register(&store, "alice@example.com", "Alice", None)
            .await
            .unwrap()
            .user;

        let s1 = store.clone();
        let c1 = alice.referral_code.clone();
        let t1 = tokio::spawn(async move {
            register_with_referral(&s1, "bob@example.com", "Bob", Some(c1.as_str())).await
        });
        let s2 = store.clone();
        let c2 = alice.referral_code.clone();
        let t2 = tokio::spawn(async move {
            register_with_referral(&s2, "carol@example.com", "Carol", Some(c2.as_str())).await
        });

        let bob = t1.await.unwrap().expect("bob should register").user;
        let carol = t2.await.unwrap().expect("carol should register").user;

        assert_eq!(bob.points, REFERRAL_REWARD_POINTS);
        assert_eq!(carol.points, REFERRAL_REWARD_POINTS);
        assert_eq!(
            store.user_by_email("alice@example.com").unwrap().points,
            2 * REFERRAL_REWARD_POINTS
        );

        let referrals = store.referrals();
        assert_eq!(referrals.len(), 2);
        assert!(referrals.iter().all(|r| r.inviter_id == alice.id));
        assert_ne!(referrals[0].invitee_id, referrals[1].invitee_id);
    }
}
