//! User registration and credential checks.

use std::num::NonZeroU32;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::rand::{SecureRandom, SystemRandom};
use ring::{digest, pbkdf2};
use serde::Deserialize;
use tracing::info;

use crate::storage::models::{EntityKind, Role, User, UserProfile};
use crate::storage::{Repository, StorageError, StoreError};

const HASH_SCHEME: &str = "pbkdf2-sha256";
const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const MIN_PASSWORD_LEN: usize = 8;

/// Registration form. Role-specific fields are ignored for other roles.
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
}

impl User {
    /// Build a user from a registration, with an already hashed password.
    pub fn from_registration(registration: Registration, password_hash: String) -> Self {
        let profile = match registration.role {
            Role::Citizen => UserProfile::Citizen {
                address: registration.address,
                phone: registration.phone,
            },
            Role::Technician => UserProfile::Technician {
                skills: Vec::new(),
                available: true,
            },
            Role::ServiceChief => UserProfile::ServiceChief {
                department: registration.department,
            },
            Role::Administrator => UserProfile::Administrator,
        };
        User {
            id: None,
            name: registration.name.trim().to_string(),
            email: normalize_email(&registration.email),
            password_hash,
            profile,
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct Accounts {
    users: Arc<dyn Repository<User>>,
    rng: SystemRandom,
}

impl Accounts {
    pub fn new(users: Arc<dyn Repository<User>>) -> Self {
        Self {
            users,
            rng: SystemRandom::new(),
        }
    }

    /// Create a user. Fails with a validation error if the email is taken.
    pub fn register(&self, registration: Registration) -> Result<User, StoreError> {
        check_password_strength(&registration.password)?;
        let email = normalize_email(&registration.email);
        if self.users.exists_by_field("email", &email)? {
            return Err(StoreError::validation("email is already registered"));
        }

        let hash = hash_password(&self.rng, &registration.password)?;
        let user = self.users.save(User::from_registration(registration, hash))?;
        info!(user_id = ?user.id, role = ?user.role(), "user registered");
        Ok(user)
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .find_by_field("email", &normalize_email(email))?
            .into_iter()
            .next())
    }

    /// The user with these credentials, if they match.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .find_by_email(email)?
            .filter(|user| verify_password(password, &user.password_hash)))
    }

    pub fn change_password(&self, user_id: u64, new_password: &str) -> Result<User, StoreError> {
        check_password_strength(new_password)?;
        let mut user = self
            .users
            .find_by_id(user_id)?
            .ok_or_else(|| StoreError::not_found(EntityKind::User, user_id))?;
        user.password_hash = hash_password(&self.rng, new_password)?;
        self.users.update(user)
    }
}

fn check_password_strength(password: &str) -> Result<(), StoreError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(StoreError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Encoded as `pbkdf2-sha256$<iterations>$<salt>$<hash>`, base64 parts.
fn hash_password(rng: &SystemRandom, password: &str) -> Result<String, StoreError> {
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt).map_err(|_| StorageError::Random)?;

    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS).unwrap_or(NonZeroU32::MIN);
    let mut hash = [0u8; digest::SHA256_OUTPUT_LEN];
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, iterations, &salt, password.as_bytes(), &mut hash);

    Ok(format!(
        "{HASH_SCHEME}${}${}${}",
        iterations,
        STANDARD.encode(salt),
        STANDARD.encode(hash)
    ))
}

fn verify_password(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.split('$');
    let (Some(HASH_SCHEME), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    let Some(iterations) = iterations.parse().ok().and_then(NonZeroU32::new) else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (STANDARD.decode(salt), STANDARD.decode(hash)) else {
        return false;
    };
    pbkdf2::verify(pbkdf2::PBKDF2_HMAC_SHA256, iterations, &salt, password.as_bytes(), &hash).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_state;

    fn registration(email: &str, role: Role) -> Registration {
        Registration {
            name: "Amira Ben Salah".to_string(),
            email: email.to_string(),
            password: "correct horse".to_string(),
            role,
            address: Some("12 Rue de Marseille".to_string()),
            phone: Some("+216 70 000 000".to_string()),
            department: Some("Voirie".to_string()),
        }
    }

    #[test]
    fn password_hash_round_trip() {
        let rng = SystemRandom::new();
        let encoded = hash_password(&rng, "s3cret-pass").unwrap();
        assert!(encoded.starts_with("pbkdf2-sha256$100000$"));
        assert!(verify_password("s3cret-pass", &encoded));
        assert!(!verify_password("wrong-pass", &encoded));
        assert!(!verify_password("s3cret-pass", "garbage"));
    }

    #[test]
    fn role_selects_profile_shape() {
        let citizen = User::from_registration(registration("a@x.tn", Role::Citizen), "h".into());
        assert_eq!(
            citizen.profile,
            UserProfile::Citizen {
                address: Some("12 Rue de Marseille".to_string()),
                phone: Some("+216 70 000 000".to_string()),
            }
        );

        let technician =
            User::from_registration(registration("b@x.tn", Role::Technician), "h".into());
        assert_eq!(
            technician.profile,
            UserProfile::Technician {
                skills: vec![],
                available: true
            }
        );

        let chief = User::from_registration(registration("c@x.tn", Role::ServiceChief), "h".into());
        assert_eq!(chief.role(), Role::ServiceChief);

        let admin =
            User::from_registration(registration(" D@X.tn ", Role::Administrator), "h".into());
        assert_eq!(admin.profile, UserProfile::Administrator);
        assert_eq!(admin.email, "d@x.tn");
    }

    #[test]
    fn register_and_authenticate() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let user = state
            .accounts
            .register(registration("Citoyen@Ville.tn", Role::Citizen))
            .unwrap();
        assert_eq!(user.id, Some(1));
        assert_eq!(user.email, "citoyen@ville.tn");
        assert_ne!(user.password_hash, "correct horse");

        let found = state
            .accounts
            .authenticate("citoyen@ville.tn", "correct horse")
            .unwrap()
            .expect("credentials should match");
        assert_eq!(found.id, user.id);
        assert!(state
            .accounts
            .authenticate("citoyen@ville.tn", "wrong password")
            .unwrap()
            .is_none());
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        state
            .accounts
            .register(registration("chef@ville.tn", Role::ServiceChief))
            .unwrap();
        let err = state
            .accounts
            .register(registration("CHEF@ville.tn", Role::Technician))
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(state.users.find_all().unwrap().len(), 1);
    }

    #[test]
    fn concurrent_registrations_keep_emails_unique() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    state
                        .accounts
                        .register(registration("race@ville.tn", Role::Citizen))
                        .is_ok()
                })
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        assert_eq!(state.users.find_all().unwrap().len(), 1);
    }

    #[test]
    fn change_password_replaces_hash() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let user = state
            .accounts
            .register(registration("tech@ville.tn", Role::Technician))
            .unwrap();

        state
            .accounts
            .change_password(user.id.unwrap(), "a brand new password")
            .unwrap();

        assert!(state
            .accounts
            .authenticate("tech@ville.tn", "correct horse")
            .unwrap()
            .is_none());
        assert!(state
            .accounts
            .authenticate("tech@ville.tn", "a brand new password")
            .unwrap()
            .is_some());
        assert!(matches!(
            state.accounts.change_password(99, "another password"),
            Err(StoreError::NotFound { .. })
        ));
    }
}
