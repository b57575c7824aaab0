use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::rngs::OsRng;
use secrecy::SecretString;
use zeroize::Zeroizing;

use crate::chain::Address;
use crate::errors::{WalletError, WalletResult};
use crate::keys::{self, AccountKey};
use crate::storage::WalletStore;
use crate::vault;

/// Number of word positions challenged during backup verification.
const BACKUP_CHALLENGE_WORDS: usize = 3;

/// Observable wallet lifecycle state.
///
/// Invariants: `is_unlocked` implies `is_created`; `has_backed_up` implies
/// `!needs_backup`; the address is derived from the phrase once and never
/// changes for the record's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletRecord {
    pub address: Option<Address>,
    pub is_created: bool,
    pub is_unlocked: bool,
    pub needs_backup: bool,
    pub has_backed_up: bool,
}

#[derive(Default)]
struct SessionState {
    /// Present while unlocked, and between `create` and backup verification
    /// so the challenge can be answered without a decrypt round-trip.
    phrase: Option<Zeroizing<String>>,
    record: WalletRecord,
    challenge: Option<Vec<usize>>,
    failed_attempts: u32,
    next_allowed_attempt: Option<Instant>,
    backoff_exponent: u32,
}

/// The wallet lifecycle state machine.
///
/// Owns the in-memory secret phrase exclusively; the signer and broker
/// receive it only transiently through [`WalletSession::with_phrase`].
pub struct WalletSession {
    state: RwLock<SessionState>,
    store: WalletStore,
    max_failed_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    max_backoff_exponent: u32,
}

impl WalletSession {
    /// Build a session over the persisted store, restoring the record the
    /// previous run left behind (flags and address, never the phrase).
    pub fn new(store: WalletStore, max_failed_attempts: u32) -> WalletResult<Self> {
        Self::with_backoff(
            store,
            max_failed_attempts,
            Duration::from_secs(1),
            Duration::from_secs(32),
        )
    }

    pub fn with_backoff(
        store: WalletStore,
        max_failed_attempts: u32,
        backoff_base: Duration,
        backoff_cap: Duration,
    ) -> WalletResult<Self> {
        let probe = store.probe()?;
        let record = WalletRecord {
            address: match store.address()? {
                Some(hex) => Some(Address::from_string(&hex)?),
                None => None,
            },
            is_created: probe.has_wallet,
            is_unlocked: false,
            needs_backup: store.needs_backup()?,
            has_backed_up: store.has_backed_up()?,
        };

        Ok(Self {
            state: RwLock::new(SessionState {
                record,
                ..SessionState::default()
            }),
            store,
            max_failed_attempts: max_failed_attempts.max(1),
            backoff_base,
            backoff_cap,
            max_backoff_exponent: 8,
        })
    }

    pub fn record(&self) -> WalletRecord {
        self.state.read().record.clone()
    }

    pub fn is_unlocked(&self) -> bool {
        self.state.read().record.is_unlocked
    }

    pub fn address(&self) -> Option<Address> {
        self.state.read().record.address
    }

    /// Generate a fresh wallet and persist it encrypted under `password`.
    ///
    /// The new wallet starts backup-pending and locked; the phrase stays in
    /// memory so the backup challenge can run against it.
    pub fn create(&self, word_count: u32, password: &SecretString) -> WalletResult<Address> {
        {
            let state = self.state.read();
            if state.record.is_created {
                return Err(WalletError::AlreadyExists(
                    "A wallet already exists; wipe it before creating another".to_string(),
                ));
            }
        }

        let phrase = Zeroizing::new(keys::generate_phrase(word_count)?);
        let address = AccountKey::from_phrase(&phrase)?.address();
        let payload = vault::encrypt(&phrase, password)?;

        self.store.store_payload(&payload)?;
        self.store.set_address(&address.to_hex())?;
        self.store.set_needs_backup(true)?;
        self.store.set_has_backed_up(false)?;

        let mut state = self.state.write();
        state.phrase = Some(phrase);
        state.challenge = None;
        state.record = WalletRecord {
            address: Some(address),
            is_created: true,
            is_unlocked: false,
            needs_backup: true,
            has_backed_up: false,
        };

        log::info!("Wallet created for {}", address);
        Ok(address)
    }

    /// Import an existing phrase. Possession of the phrase is the backup,
    /// so the record jumps straight to backed-up and unlocked.
    pub fn import(&self, phrase: &str, password: &SecretString) -> WalletResult<Address> {
        {
            let state = self.state.read();
            if state.record.has_backed_up {
                return Err(WalletError::AlreadyExists(
                    "A wallet already exists; wipe it before importing another".to_string(),
                ));
            }
        }

        keys::validate_phrase(phrase)?;
        let normalized = Zeroizing::new(phrase.trim().to_lowercase());
        let address = AccountKey::from_phrase(&normalized)?.address();
        let payload = vault::encrypt(&normalized, password)?;

        self.store.store_payload(&payload)?;
        self.store.set_address(&address.to_hex())?;
        self.store.set_needs_backup(false)?;
        self.store.set_has_backed_up(true)?;

        let mut state = self.state.write();
        state.phrase = Some(normalized);
        state.challenge = None;
        state.record = WalletRecord {
            address: Some(address),
            is_created: true,
            is_unlocked: true,
            needs_backup: false,
            has_backed_up: true,
        };

        log::info!("Wallet imported for {}", address);
        Ok(address)
    }

    /// Issue a backup challenge: three distinct word positions chosen
    /// uniformly at random, returned sorted ascending (zero-based).
    pub fn backup_challenge(&self) -> WalletResult<Vec<usize>> {
        let mut state = self.state.write();
        if !state.record.needs_backup {
            return Err(WalletError::ValidationError(
                "Wallet does not need backup verification".to_string(),
            ));
        }
        let word_count = state
            .phrase
            .as_ref()
            .ok_or_else(|| {
                WalletError::ValidationError("No phrase available for backup".to_string())
            })?
            .split_whitespace()
            .count();

        let mut positions: Vec<usize> =
            rand::seq::index::sample(&mut OsRng, word_count, BACKUP_CHALLENGE_WORDS).into_vec();
        positions.sort_unstable();

        state.challenge = Some(positions.clone());
        Ok(positions)
    }

    /// Confirm the backup by presenting the challenged words.
    ///
    /// Every challenged position must be answered exactly once and match
    /// (case-insensitive) or the record is left untouched. Duplicate or
    /// extra answers are rejected.
    pub fn verify_backup(&self, confirmed: &[(usize, String)]) -> WalletResult<()> {
        let challenge_ok = {
            let state = self.state.read();
            if !state.record.needs_backup {
                return Err(WalletError::ValidationError(
                    "Wallet does not need backup verification".to_string(),
                ));
            }
            let challenge = state.challenge.as_ref().ok_or_else(|| {
                WalletError::ValidationError("No backup challenge issued".to_string())
            })?;
            let phrase = state.phrase.as_ref().ok_or_else(|| {
                WalletError::ValidationError("No phrase available for backup".to_string())
            })?;
            let words: Vec<&str> = phrase.split_whitespace().collect();

            let mut answers: Vec<(usize, &str)> = confirmed
                .iter()
                .map(|(position, word)| (*position, word.trim()))
                .collect();
            answers.sort_unstable_by_key(|(position, _)| *position);

            // One answer per challenged position, matched in order
            answers.len() == challenge.len()
                && answers.iter().zip(challenge.iter()).all(
                    |((answered_position, word), &position)| {
                        *answered_position == position
                            && words
                                .get(position)
                                .is_some_and(|expected| expected.eq_ignore_ascii_case(word))
                    },
                )
        };

        if !challenge_ok {
            return Err(WalletError::ValidationError(
                "Backup verification failed: words do not match".to_string(),
            ));
        }

        self.store.set_needs_backup(false)?;
        self.store.set_has_backed_up(true)?;

        let mut state = self.state.write();
        state.challenge = None;
        state.record.needs_backup = false;
        state.record.has_backed_up = true;
        state.record.is_unlocked = true;

        log::info!("Backup verified; wallet unlocked");
        Ok(())
    }

    /// Expose the phrase for the backup display or an explicit user export.
    pub fn export_phrase(&self) -> WalletResult<Zeroizing<String>> {
        let state = self.state.read();
        if !state.record.is_unlocked && !state.record.needs_backup {
            return Err(WalletError::AuthFailure);
        }
        state
            .phrase
            .clone()
            .ok_or(WalletError::AuthFailure)
    }

    /// Decrypt the persisted payload and unlock the session.
    ///
    /// Verifies the decrypted phrase still derives the persisted address,
    /// and transparently migrates a V1 payload forward on success. Any
    /// failure leaves the session locked with no phrase in memory.
    pub fn unlock(&self, password: &SecretString) -> WalletResult<()> {
        {
            let state = self.state.read();
            if state.record.is_unlocked {
                return Ok(());
            }
            if !state.record.is_created {
                return Err(WalletError::NotFound("No wallet exists".to_string()));
            }
            if !state.record.has_backed_up {
                return Err(WalletError::ValidationError(
                    "Backup must be verified before unlocking".to_string(),
                ));
            }
        }
        self.check_attempt_gate()?;

        let payload = self
            .store
            .load_payload()?
            .ok_or_else(|| WalletError::NotFound("No wallet exists".to_string()))?;

        let phrase = match vault::decrypt(&payload, password) {
            Ok(phrase) => phrase,
            Err(err @ WalletError::AuthFailure) => {
                self.register_failed_attempt();
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let address = AccountKey::from_phrase(&phrase)?.address();
        let persisted = self.store.address()?;
        if persisted.as_deref() != Some(address.to_hex().as_str()) {
            return Err(WalletError::IntegrityError(
                "Decrypted phrase does not match the stored address".to_string(),
            ));
        }

        if vault::needs_migration(&payload) {
            let migrated = vault::migrate(&payload, password)?;
            self.store.store_payload(&migrated)?;
        }

        let mut state = self.state.write();
        state.phrase = Some(phrase);
        state.record.is_unlocked = true;
        state.failed_attempts = 0;
        state.next_allowed_attempt = None;
        state.backoff_exponent = 0;

        log::info!("Wallet unlocked for {}", address);
        Ok(())
    }

    /// Lock the session, zeroizing the in-memory phrase.
    pub fn lock(&self) {
        let mut state = self.state.write();
        if !state.record.is_unlocked {
            return;
        }
        state.phrase = None;
        state.record.is_unlocked = false;
        log::info!("Wallet locked");
    }

    /// Erase the persisted payload, flags, and all in-memory state.
    pub fn wipe(&self) -> WalletResult<()> {
        self.store.wipe()?;
        let mut state = self.state.write();
        *state = SessionState::default();
        Ok(())
    }

    /// Run an operation against the unlocked phrase.
    ///
    /// The closure borrows the phrase for the duration of the call only;
    /// callers must not retain a copy.
    pub fn with_phrase<F, T>(&self, operation: F) -> WalletResult<T>
    where
        F: FnOnce(&str) -> WalletResult<T>,
    {
        let state = self.state.read();
        if !state.record.is_unlocked {
            return Err(WalletError::AuthFailure);
        }
        let phrase = state.phrase.as_ref().ok_or(WalletError::AuthFailure)?;
        operation(phrase)
    }

    pub fn remaining_attempts(&self) -> u32 {
        let state = self.state.read();
        self.max_failed_attempts
            .saturating_sub(state.failed_attempts)
    }

    fn check_attempt_gate(&self) -> WalletResult<()> {
        let state = self.state.read();
        if state.failed_attempts >= self.max_failed_attempts {
            return Err(WalletError::PermissionDenied(
                "Maximum unlock attempts exceeded".to_string(),
            ));
        }
        if let Some(until) = state.next_allowed_attempt {
            let now = Instant::now();
            if now < until {
                let remaining = until.saturating_duration_since(now);
                return Err(WalletError::PermissionDenied(format!(
                    "Unlock temporarily disabled. Retry in {}.{:03} seconds",
                    remaining.as_secs(),
                    remaining.subsec_millis()
                )));
            }
        }
        Ok(())
    }

    fn register_failed_attempt(&self) {
        let mut state = self.state.write();
        state.failed_attempts += 1;
        state.backoff_exponent = (state.backoff_exponent + 1).min(self.max_backoff_exponent);
        let multiplier = 1_u32 << state.backoff_exponent.saturating_sub(1);
        let mut delay = if multiplier <= 1 {
            self.backoff_base
        } else {
            self.backoff_base
                .checked_mul(multiplier)
                .unwrap_or(self.backoff_cap)
        };
        if delay > self.backoff_cap {
            delay = self.backoff_cap;
        }
        state.next_allowed_attempt = Some(Instant::now() + delay);
        log::warn!(
            "Unlock failed ({}/{} attempts)",
            state.failed_attempts,
            self.max_failed_attempts
        );
    }
}
