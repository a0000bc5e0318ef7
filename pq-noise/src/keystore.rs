//! On-disk storage for the server's long-term KEM and identity keys.
//!
//! Layout under the store directory:
//!
//! ```text
//! kem.sk  kem.pk            current ML-KEM-1024 key pair
//! kem.sk.prev  kem.pk.prev  key pair replaced by the last rotation
//! id_mldsa.sk  id_mldsa.pk  ML-DSA-65 identity
//! ```
//!
//! Files hold raw key bytes. Secret files are written to a temporary name with
//! mode 0600 and renamed into place.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crypto::hashes::fingerprint;
use crypto::ml_dsa::{MlDsaKeyPair, MlDsaPublicKey, MlDsaSecretKey};
use crypto::ml_kem::{MlKemKeyPair, MlKemPublicKey, MlKemSecretKey};
use crypto::traits::{KemKeyPair, KemPublicKey, KemSecretKey, SigningKey, VerifyKey};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::{ConfigError, Result};
use crate::metrics::PqMetrics;

pub const KEM_SECRET_FILE: &str = "kem.sk";
pub const KEM_PUBLIC_FILE: &str = "kem.pk";
pub const KEM_SECRET_PREV_FILE: &str = "kem.sk.prev";
pub const KEM_PUBLIC_PREV_FILE: &str = "kem.pk.prev";
pub const IDENTITY_SECRET_FILE: &str = "id_mldsa.sk";
pub const IDENTITY_PUBLIC_FILE: &str = "id_mldsa.pk";

pub const DEFAULT_KEM_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_IDENTITY_MAX_AGE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// How long long-term keys may live before they are due for replacement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyRotationPolicy {
    pub kem_max_age: Duration,
    pub identity_max_age: Duration,
}

impl Default for KeyRotationPolicy {
    fn default() -> Self {
        Self {
            kem_max_age: DEFAULT_KEM_MAX_AGE,
            identity_max_age: DEFAULT_IDENTITY_MAX_AGE,
        }
    }
}

impl KeyRotationPolicy {
    pub fn kem_due(&self, age: Duration) -> bool {
        age >= self.kem_max_age
    }

    pub fn identity_due(&self, age: Duration) -> bool {
        age >= self.identity_max_age
    }
}

/// What `rotate_if_due` did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub kem_rotated: bool,
    /// Identity keys are pinned by peers and are never replaced automatically;
    /// this only reports that the operator should do so.
    pub identity_due: bool,
}

#[derive(Clone, Debug)]
pub struct KeyStore {
    dir: PathBuf,
    metrics: Arc<PqMetrics>,
}

impl KeyStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            metrics: PqMetrics::global(),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<PqMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<PqMetrics> {
        self.metrics.clone()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn load_or_generate_kem(&self) -> Result<MlKemKeyPair> {
        if let Some(keypair) = self.read_kem(KEM_SECRET_FILE, KEM_PUBLIC_FILE)? {
            tracing::info!(
                path = %self.path(KEM_SECRET_FILE).display(),
                fingerprint = %hex::encode(fingerprint(keypair.public_key().as_bytes())),
                "Loaded PQ KEM key"
            );
            return Ok(keypair);
        }
        self.generate_kem()
    }

    /// The key pair retired by the last rotation, if any.
    pub fn load_previous_kem(&self) -> Result<Option<MlKemKeyPair>> {
        self.read_kem(KEM_SECRET_PREV_FILE, KEM_PUBLIC_PREV_FILE)
    }

    /// Move the current KEM key pair to the `.prev` slot and install a fresh
    /// one. A previous `.prev` pair is overwritten.
    pub fn rotate_kem(&self) -> Result<MlKemKeyPair> {
        let current_sk = self.path(KEM_SECRET_FILE);
        if current_sk.exists() {
            fs::rename(&current_sk, self.path(KEM_SECRET_PREV_FILE))?;
            let current_pk = self.path(KEM_PUBLIC_FILE);
            if current_pk.exists() {
                fs::rename(current_pk, self.path(KEM_PUBLIC_PREV_FILE))?;
            }
        }
        let keypair = self.generate_kem()?;
        self.metrics.record_rekey();
        Ok(keypair)
    }

    /// Time since the current KEM secret key was written.
    pub fn kem_key_age(&self) -> Result<Option<Duration>> {
        file_age(&self.path(KEM_SECRET_FILE))
    }

    pub fn identity_key_age(&self) -> Result<Option<Duration>> {
        file_age(&self.path(IDENTITY_SECRET_FILE))
    }

    pub fn rotate_if_due(&self, policy: &KeyRotationPolicy) -> Result<RotationReport> {
        let mut report = RotationReport::default();
        if let Some(age) = self.kem_key_age()? {
            if policy.kem_due(age) {
                self.rotate_kem()?;
                report.kem_rotated = true;
            }
        }
        if let Some(age) = self.identity_key_age()? {
            if policy.identity_due(age) {
                tracing::warn!(
                    age_days = age.as_secs() / 86_400,
                    "PQ identity key is due for rotation"
                );
                report.identity_due = true;
            }
        }
        Ok(report)
    }

    pub fn load_or_generate_identity(&self) -> Result<MlDsaKeyPair> {
        let sk_path = self.path(IDENTITY_SECRET_FILE);
        match fs::read(&sk_path) {
            Ok(mut bytes) => {
                let parsed = MlDsaSecretKey::from_bytes(&bytes);
                bytes.zeroize();
                let secret = parsed.map_err(|_| invalid(&sk_path))?;
                let keypair = MlDsaKeyPair::from_secret(secret);
                let pk_path = self.path(IDENTITY_PUBLIC_FILE);
                if !pk_path.exists() {
                    write_atomic(&pk_path, &keypair.public.to_bytes(), false)?;
                }
                tracing::info!(
                    path = %sk_path.display(),
                    fingerprint = %hex::encode(fingerprint(keypair.public.as_bytes())),
                    "Loaded PQ identity key"
                );
                Ok(keypair)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let keypair = MlDsaKeyPair::generate(&mut OsRng);
                let mut secret = keypair.secret.to_bytes();
                let written = write_atomic(&sk_path, &secret, true);
                secret.zeroize();
                written?;
                write_atomic(
                    &self.path(IDENTITY_PUBLIC_FILE),
                    &keypair.public.to_bytes(),
                    false,
                )?;
                tracing::info!(
                    path = %sk_path.display(),
                    fingerprint = %hex::encode(fingerprint(keypair.public.as_bytes())),
                    "Generated PQ identity key"
                );
                Ok(keypair)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Published KEM key, as distributed to initiators.
    pub fn load_kem_public_key(&self) -> Result<MlKemPublicKey> {
        let path = self.path(KEM_PUBLIC_FILE);
        let bytes = fs::read(&path)?;
        MlKemPublicKey::from_bytes(&bytes).map_err(|_| invalid(&path).into())
    }

    pub fn load_identity_public_key(&self) -> Result<MlDsaPublicKey> {
        let path = self.path(IDENTITY_PUBLIC_FILE);
        let bytes = fs::read(&path)?;
        MlDsaPublicKey::from_bytes(&bytes).map_err(|_| invalid(&path).into())
    }

    fn read_kem(&self, sk_name: &str, pk_name: &str) -> Result<Option<MlKemKeyPair>> {
        let sk_path = self.path(sk_name);
        let mut bytes = match fs::read(&sk_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let parsed = MlKemSecretKey::from_bytes(&bytes);
        bytes.zeroize();
        let keypair = MlKemKeyPair::from_secret_key(parsed.map_err(|_| invalid(&sk_path))?);

        match fs::read(self.path(pk_name)) {
            Ok(pk) if pk.as_slice() != keypair.public_key().as_bytes() => {
                Err(ConfigError::KemKeyMismatch.into())
            }
            Ok(_) => Ok(Some(keypair)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Some(keypair)),
            Err(err) => Err(err.into()),
        }
    }

    fn generate_kem(&self) -> Result<MlKemKeyPair> {
        let keypair = MlKemKeyPair::generate(&mut OsRng);
        let mut secret = keypair.secret_key().to_bytes();
        let written = write_atomic(&self.path(KEM_SECRET_FILE), &secret, true);
        secret.zeroize();
        written?;
        write_atomic(
            &self.path(KEM_PUBLIC_FILE),
            &keypair.public_key().to_bytes(),
            false,
        )?;
        tracing::info!(
            path = %self.path(KEM_SECRET_FILE).display(),
            fingerprint = %hex::encode(fingerprint(keypair.public_key().as_bytes())),
            "Generated PQ KEM key"
        );
        Ok(keypair)
    }
}

fn invalid(path: &Path) -> ConfigError {
    ConfigError::InvalidKeyMaterial(path.display().to_string())
}

fn file_age(path: &Path) -> Result<Option<Duration>> {
    match fs::metadata(path) {
        Ok(meta) => {
            let modified = meta.modified()?;
            // A clock set backwards reads as a brand new key.
            Ok(Some(
                SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or(Duration::ZERO),
            ))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn write_atomic(path: &Path, bytes: &[u8], secret: bool) -> io::Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp-{:x}", OsRng.next_u64()));

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if secret {
            options.mode(0o600);
        }
    }
    #[cfg(not(unix))]
    let _ = secret;

    let result = options.open(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(err) = result {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    fs::rename(&tmp, path)
}
