//! Passphrase key derivation
//!
//! `Argon2id`: memory-hard default, compiled in with the `argon2` feature.
//! `Pbkdf2Sha256`: PBKDF2-HMAC-SHA256 for builds without Argon2.
//!
//! Which one a build uses is decided at compile time, never per call:
//! `BUILD_KDF_ID` and `KdfParams::build_default()` report it. The cost
//! parameters are recorded next to the data they protect (`KdfParams` is
//! serde-serializable) so a stored mailbox can always be re-derived.
//!
//! Costs read back from a file are untrusted: [`KdfParams::check_costs`]
//! bounds them on both sides before any derivation runs. The lower bound
//! drops to cheap values only under `cfg(test)` or the `insecure-test-costs`
//! feature.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

pub const ARGON2_TIME_COST: u32 = 3;
pub const ARGON2_MEMORY_COST: u32 = 65536; // KiB, 64 MiB
pub const ARGON2_PARALLELISM: u32 = 4;
pub const PBKDF2_MIN_ITERATIONS: u32 = 600_000;

pub const ARGON2_MAX_TIME_COST: u32 = 64;
pub const ARGON2_MAX_MEMORY_COST: u32 = 1024 * 1024; // KiB, 1 GiB
pub const ARGON2_MAX_PARALLELISM: u32 = 64;
pub const PBKDF2_MAX_ITERATIONS: u32 = 100_000_000;

/// `(t_cost, m_cost, p_cost)` floor for release builds.
pub const ARGON2_RELEASE_FLOOR: (u32, u32, u32) =
    (ARGON2_TIME_COST, ARGON2_MEMORY_COST, ARGON2_PARALLELISM);

/// Floor enforced by this build.
#[cfg(not(any(test, feature = "insecure-test-costs")))]
pub const ARGON2_FLOOR: (u32, u32, u32) = ARGON2_RELEASE_FLOOR;
#[cfg(any(test, feature = "insecure-test-costs"))]
pub const ARGON2_FLOOR: (u32, u32, u32) = (1, 64, 1);

pub const ARGON2ID_ID: &str = "argon2id";
pub const PBKDF2_SHA256_ID: &str = "pbkdf2-sha256";

#[cfg(feature = "argon2")]
pub const BUILD_KDF_ID: &str = ARGON2ID_ID;
#[cfg(not(feature = "argon2"))]
pub const BUILD_KDF_ID: &str = PBKDF2_SHA256_ID;

// ── Derived key ───────────────────────────────────────────────────────────────

/// 32-byte key derived from a passphrase. Zeroized on drop.
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

// ── Providers ─────────────────────────────────────────────────────────────────

pub trait KdfProvider {
    /// Identifier written to the envelope's `kdf` field.
    fn id(&self) -> &'static str;

    fn params(&self) -> KdfParams;

    /// Fill `out` from already validated inputs.
    fn derive_into(
        &self,
        passphrase: &[u8],
        salt: &[u8; SALT_LEN],
        out: &mut [u8; KEY_LEN],
    ) -> Result<(), CryptoError>;

    /// Derive a key from `passphrase` and a 16-byte `salt`.
    fn derive(&self, passphrase: &str, salt: &[u8]) -> Result<DerivedKey, CryptoError> {
        if passphrase.is_empty() {
            return Err(CryptoError::InvalidInput("passphrase cannot be empty".into()));
        }
        let salt: &[u8; SALT_LEN] = salt.try_into().map_err(|_| {
            CryptoError::InvalidInput(format!("salt must be {SALT_LEN} bytes, got {}", salt.len()))
        })?;
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        self.derive_into(passphrase.as_bytes(), salt, &mut key)?;
        Ok(DerivedKey(key))
    }
}

#[cfg(feature = "argon2")]
#[derive(Debug, Clone)]
pub struct Argon2id {
    params: argon2::Params,
}

#[cfg(feature = "argon2")]
impl Argon2id {
    /// `m_cost` is in KiB.
    pub fn new(t_cost: u32, m_cost: u32, p_cost: u32) -> Result<Self, CryptoError> {
        check_argon2_costs(t_cost, m_cost, p_cost, ARGON2_FLOOR)?;
        let params = argon2::Params::new(m_cost, t_cost, p_cost, Some(KEY_LEN))
            .map_err(|e| CryptoError::InvalidInput(format!("argon2 params: {e}")))?;
        Ok(Self { params })
    }
}

#[cfg(feature = "argon2")]
impl KdfProvider for Argon2id {
    fn id(&self) -> &'static str {
        ARGON2ID_ID
    }

    fn params(&self) -> KdfParams {
        KdfParams::Argon2id {
            t_cost: self.params.t_cost(),
            m_cost: self.params.m_cost(),
            p_cost: self.params.p_cost(),
        }
    }

    fn derive_into(
        &self,
        passphrase: &[u8],
        salt: &[u8; SALT_LEN],
        out: &mut [u8; KEY_LEN],
    ) -> Result<(), CryptoError> {
        let argon = argon2::Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            self.params.clone(),
        );
        argon
            .hash_password_into(passphrase, salt, out)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct Pbkdf2Sha256 {
    iterations: u32,
}

impl Pbkdf2Sha256 {
    pub fn new(iterations: u32) -> Result<Self, CryptoError> {
        check_pbkdf2_iterations(iterations)?;
        Ok(Self { iterations })
    }
}

impl KdfProvider for Pbkdf2Sha256 {
    fn id(&self) -> &'static str {
        PBKDF2_SHA256_ID
    }

    fn params(&self) -> KdfParams {
        KdfParams::Pbkdf2Sha256 {
            iterations: self.iterations,
        }
    }

    fn derive_into(
        &self,
        passphrase: &[u8],
        salt: &[u8; SALT_LEN],
        out: &mut [u8; KEY_LEN],
    ) -> Result<(), CryptoError> {
        pbkdf2_hmac::<Sha256>(passphrase, salt, self.iterations, out);
        Ok(())
    }
}

// ── Parameters ────────────────────────────────────────────────────────────────

/// Serializable KDF cost parameters. The variant is recognised by its fields:
/// `{"t_cost", "m_cost", "p_cost"}` for Argon2id, `{"iterations"}` for PBKDF2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KdfParams {
    Argon2id { t_cost: u32, m_cost: u32, p_cost: u32 },
    Pbkdf2Sha256 { iterations: u32 },
}

impl KdfParams {
    pub fn argon2id_default() -> Self {
        KdfParams::Argon2id {
            t_cost: ARGON2_TIME_COST,
            m_cost: ARGON2_MEMORY_COST,
            p_cost: ARGON2_PARALLELISM,
        }
    }

    pub fn pbkdf2_default() -> Self {
        KdfParams::Pbkdf2Sha256 {
            iterations: PBKDF2_MIN_ITERATIONS,
        }
    }

    /// Default parameters for the KDF this build was compiled with.
    pub fn build_default() -> Self {
        if cfg!(feature = "argon2") {
            Self::argon2id_default()
        } else {
            Self::pbkdf2_default()
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            KdfParams::Argon2id { .. } => ARGON2ID_ID,
            KdfParams::Pbkdf2Sha256 { .. } => PBKDF2_SHA256_ID,
        }
    }

    /// Reject costs below this build's floor or above the fixed ceilings.
    pub fn check_costs(&self) -> Result<(), CryptoError> {
        match *self {
            KdfParams::Argon2id {
                t_cost,
                m_cost,
                p_cost,
            } => check_argon2_costs(t_cost, m_cost, p_cost, ARGON2_FLOOR),
            KdfParams::Pbkdf2Sha256 { iterations } => check_pbkdf2_iterations(iterations),
        }
    }

    /// True when every cost is at least the one in `required`. Parameters for
    /// different KDFs are not comparable; each is then held only to its floor.
    pub fn at_least(&self, required: &KdfParams) -> bool {
        match (*self, *required) {
            (
                KdfParams::Argon2id {
                    t_cost,
                    m_cost,
                    p_cost,
                },
                KdfParams::Argon2id {
                    t_cost: t_min,
                    m_cost: m_min,
                    p_cost: p_min,
                },
            ) => t_cost >= t_min && m_cost >= m_min && p_cost >= p_min,
            (
                KdfParams::Pbkdf2Sha256 { iterations },
                KdfParams::Pbkdf2Sha256 {
                    iterations: required,
                },
            ) => iterations >= required,
            _ => true,
        }
    }

    /// Build the provider these parameters describe, after [`Self::check_costs`].
    ///
    /// Argon2id parameters are rejected in builds without the `argon2` feature.
    pub fn provider(&self) -> Result<Box<dyn KdfProvider>, CryptoError> {
        self.check_costs()?;
        match *self {
            #[cfg(feature = "argon2")]
            KdfParams::Argon2id {
                t_cost,
                m_cost,
                p_cost,
            } => Ok(Box::new(Argon2id::new(t_cost, m_cost, p_cost)?)),
            #[cfg(not(feature = "argon2"))]
            KdfParams::Argon2id { .. } => Err(CryptoError::InvalidInput(
                "argon2id is not available in this build".into(),
            )),
            KdfParams::Pbkdf2Sha256 { iterations } => Ok(Box::new(Pbkdf2Sha256::new(iterations)?)),
        }
    }
}

fn check_argon2_costs(
    t_cost: u32,
    m_cost: u32,
    p_cost: u32,
    (t_min, m_min, p_min): (u32, u32, u32),
) -> Result<(), CryptoError> {
    if t_cost < t_min || m_cost < m_min || p_cost < p_min {
        return Err(CryptoError::InvalidInput(format!(
            "argon2id costs t={t_cost} m={m_cost} p={p_cost} are below the minimum t={t_min} m={m_min} p={p_min}"
        )));
    }
    if t_cost > ARGON2_MAX_TIME_COST
        || m_cost > ARGON2_MAX_MEMORY_COST
        || p_cost > ARGON2_MAX_PARALLELISM
    {
        return Err(CryptoError::InvalidInput(format!(
            "argon2id costs t={t_cost} m={m_cost} p={p_cost} exceed the maximum t={ARGON2_MAX_TIME_COST} m={ARGON2_MAX_MEMORY_COST} p={ARGON2_MAX_PARALLELISM}"
        )));
    }
    Ok(())
}

fn check_pbkdf2_iterations(iterations: u32) -> Result<(), CryptoError> {
    if iterations < PBKDF2_MIN_ITERATIONS {
        return Err(CryptoError::InvalidInput(format!(
            "pbkdf2 needs at least {PBKDF2_MIN_ITERATIONS} iterations, got {iterations}"
        )));
    }
    if iterations > PBKDF2_MAX_ITERATIONS {
        return Err(CryptoError::InvalidInput(format!(
            "pbkdf2 iterations {iterations} exceed the maximum {PBKDF2_MAX_ITERATIONS}"
        )));
    }
    Ok(())
}

/// Generate a fresh random 16-byte salt from the OS CSPRNG.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}
