//! Credential providers.
//!
//! A provider returns a [`CredentialSet`] or reports itself unavailable so the
//! [`CredentialChain`] can fall through to the next source. Passwords and
//! tokens live in [`SecretString`] and never reach logs or error messages.

use rand::Rng;
use rand::seq::SliceRandom;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Minimum admin password length.
pub const MIN_PASSWORD_LEN: usize = 12;

/// Length of generated admin passwords.
const GENERATED_PASSWORD_LEN: usize = 20;

/// Symbols used in generated passwords; all of them are safe in env files.
const PASSWORD_SYMBOLS: &[u8] = b"!%*+,-./:=?@^_~";

/// Store file holding the admin password.
pub const PASSWORD_FILE: &str = "splunk_password";

const TOKEN_FILES: [&str; 3] = ["splunk_hec_token", "splunk_idxc_secret", "splunk_shc_secret"];

/// Credential provisioning errors. Never carries secret material.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Password rejected by policy
    #[error("password does not meet policy: {}", violations.join("; "))]
    Policy {
        /// Every rule the password breaks
        violations: Vec<String>,
    },

    /// This source cannot supply credentials; try the next one
    #[error("{source_name} credentials unavailable: {reason}")]
    Unavailable {
        source_name: &'static str,
        reason: String,
    },

    /// Every source in the chain was unavailable
    #[error("no credential source could supply a password:\n{}", reasons.iter().map(|r| format!("  • {r}")).collect::<Vec<_>>().join("\n"))]
    Exhausted { reasons: Vec<String> },

    /// Store file exists but cannot be read
    #[error("failed to read credential store file {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Store file readable by other users
    #[error("credential store file {} has mode {mode:o}; expected 600", path.display())]
    InsecureStore { path: PathBuf, mode: u32 },

    /// Interactive prompt failed
    #[error("password prompt failed: {0}")]
    Prompt(#[source] std::io::Error),

    /// Confirmation did not match
    #[error("the two passwords entered do not match")]
    Mismatch,
}

/// Cluster tokens shared by every node.
pub struct SecretTokens {
    pub hec_token: SecretString,
    pub cluster_secret: SecretString,
    pub shc_secret: SecretString,
}

impl SecretTokens {
    /// Fresh random tokens.
    pub fn generate() -> Self {
        Self {
            hec_token: SecretString::from(random_hex(16)),
            cluster_secret: SecretString::from(random_hex(32)),
            shc_secret: SecretString::from(random_hex(32)),
        }
    }

    /// Tokens from `store`, generating any that are missing.
    pub fn load_or_generate(store: Option<&Path>) -> Result<Self, CredentialError> {
        let mut tokens = Self::generate();
        let Some(dir) = store else {
            return Ok(tokens);
        };
        let slots = [
            &mut tokens.hec_token,
            &mut tokens.cluster_secret,
            &mut tokens.shc_secret,
        ];
        for (file, slot) in TOKEN_FILES.iter().zip(slots) {
            if let Some(value) = read_store_file(&dir.join(file))? {
                *slot = value;
            }
        }
        Ok(tokens)
    }
}

/// Username, password and cluster tokens for one run.
pub struct CredentialSet {
    username: String,
    password: SecretString,
    tokens: SecretTokens,
}

impl CredentialSet {
    pub fn new(username: impl Into<String>, password: SecretString, tokens: SecretTokens) -> Self {
        Self {
            username: username.into(),
            password,
            tokens,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &SecretString {
        &self.password
    }

    pub fn tokens(&self) -> &SecretTokens {
        &self.tokens
    }

    /// Drops every secret. The replaced values are zeroized on drop.
    pub fn clear(&mut self) {
        self.password = SecretString::from(String::new());
        self.tokens = SecretTokens {
            hec_token: SecretString::from(String::new()),
            cluster_secret: SecretString::from(String::new()),
            shc_secret: SecretString::from(String::new()),
        };
    }

    pub fn is_cleared(&self) -> bool {
        self.password.expose_secret().is_empty()
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("tokens", &"[REDACTED]")
            .finish()
    }
}

/// Checks the admin password policy. Violations are described without echoing the password.
pub fn check_password_policy(username: &str, password: &str) -> Result<(), CredentialError> {
    let mut violations = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LEN {
        violations.push(format!("must be at least {MIN_PASSWORD_LEN} characters"));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        violations.push("must contain an upper-case letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        violations.push("must contain a lower-case letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push("must contain a digit".to_string());
    }
    if !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        violations.push("must contain a symbol".to_string());
    }
    if !username.is_empty()
        && password
            .to_lowercase()
            .contains(&username.to_lowercase())
    {
        violations.push("must not contain the username".to_string());
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(CredentialError::Policy { violations })
    }
}

/// Source of credentials.
pub trait CredentialProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Returns credentials for `username`, or [`CredentialError::Unavailable`].
    fn obtain(&self, username: &str, non_interactive: bool) -> Result<CredentialSet, CredentialError>;
}

/// Password passed explicitly (flag or environment).
pub struct StaticCredentials {
    password: SecretString,
    token_store: Option<PathBuf>,
}

impl StaticCredentials {
    pub fn new(password: SecretString) -> Self {
        Self {
            password,
            token_store: None,
        }
    }

    /// Reuses cluster tokens found in `dir`.
    pub fn with_token_store(mut self, dir: impl Into<PathBuf>) -> Self {
        self.token_store = Some(dir.into());
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn name(&self) -> &'static str {
        "flag"
    }

    fn obtain(&self, username: &str, _non_interactive: bool) -> Result<CredentialSet, CredentialError> {
        let tokens = SecretTokens::load_or_generate(self.token_store.as_deref())?;
        let password = SecretString::from(self.password.expose_secret().to_string());
        Ok(CredentialSet::new(username, password, tokens))
    }
}

/// Project credential store (`credentials/`).
pub struct StoredCredentials {
    dir: PathBuf,
}

impl StoredCredentials {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CredentialProvider for StoredCredentials {
    fn name(&self) -> &'static str {
        "store"
    }

    fn obtain(&self, username: &str, _non_interactive: bool) -> Result<CredentialSet, CredentialError> {
        let path = self.dir.join(PASSWORD_FILE);
        let password = read_store_file(&path)?.ok_or_else(|| CredentialError::Unavailable {
            source_name: self.name(),
            reason: format!("{} does not exist", path.display()),
        })?;
        let tokens = SecretTokens::load_or_generate(Some(&self.dir))?;
        log::debug!("Using stored credentials from {}", self.dir.display());
        Ok(CredentialSet::new(username, password, tokens))
    }
}

/// Masked interactive prompt. Unavailable when non-interactive or without a terminal.
pub struct PromptCredentials {
    token_store: Option<PathBuf>,
}

impl PromptCredentials {
    pub fn new(token_store: Option<PathBuf>) -> Self {
        Self { token_store }
    }
}

impl CredentialProvider for PromptCredentials {
    fn name(&self) -> &'static str {
        "prompt"
    }

    fn obtain(&self, username: &str, non_interactive: bool) -> Result<CredentialSet, CredentialError> {
        if non_interactive {
            return Err(CredentialError::Unavailable {
                source_name: self.name(),
                reason: "running non-interactively".to_string(),
            });
        }
        if !std::io::stdin().is_terminal() {
            return Err(CredentialError::Unavailable {
                source_name: self.name(),
                reason: "stdin is not a terminal".to_string(),
            });
        }

        let first = rpassword::prompt_password(format!("Admin password for '{username}': "))
            .map_err(CredentialError::Prompt)?;
        check_password_policy(username, &first)?;
        let second =
            rpassword::prompt_password("Confirm password: ").map_err(CredentialError::Prompt)?;
        if first != second {
            return Err(CredentialError::Mismatch);
        }

        let tokens = SecretTokens::load_or_generate(self.token_store.as_deref())?;
        Ok(CredentialSet::new(username, SecretString::from(first), tokens))
    }
}

/// Random password and tokens.
pub struct GeneratedCredentials;

impl GeneratedCredentials {
    /// Random password satisfying the policy for any username.
    pub fn generate_password() -> SecretString {
        let mut rng = rand::rng();
        let classes: [&[u8]; 4] = [
            b"ABCDEFGHJKLMNPQRSTUVWXYZ",
            b"abcdefghijkmnopqrstuvwxyz",
            b"23456789",
            PASSWORD_SYMBOLS,
        ];

        let mut chars: Vec<u8> = classes
            .iter()
            .map(|class| class[rng.random_range(0..class.len())])
            .collect();
        let all: Vec<u8> = classes.concat();
        while chars.len() < GENERATED_PASSWORD_LEN {
            chars.push(all[rng.random_range(0..all.len())]);
        }
        chars.shuffle(&mut rng);
        SecretString::from(String::from_utf8_lossy(&chars).into_owned())
    }
}

impl CredentialProvider for GeneratedCredentials {
    fn name(&self) -> &'static str {
        "generated"
    }

    fn obtain(&self, username: &str, _non_interactive: bool) -> Result<CredentialSet, CredentialError> {
        // Redraw the rare candidate that contains the username
        let password = loop {
            let candidate = Self::generate_password();
            if check_password_policy(username, candidate.expose_secret()).is_ok() {
                break candidate;
            }
        };
        log::info!("Generated a new admin password; it will be saved to the project credential store");
        Ok(CredentialSet::new(username, password, SecretTokens::generate()))
    }
}

/// Ordered providers; the first available one wins and its password must pass policy.
pub struct CredentialChain {
    providers: Vec<Box<dyn CredentialProvider>>,
}

impl CredentialChain {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    pub fn with(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Standard order: explicit password, project store, prompt, then generation.
    pub fn standard(password: Option<SecretString>, store_dir: &Path, allow_generate: bool) -> Self {
        let mut chain = Self::new();
        if let Some(password) = password {
            chain = chain.with(StaticCredentials::new(password).with_token_store(store_dir));
        }
        chain = chain
            .with(StoredCredentials::new(store_dir))
            .with(PromptCredentials::new(Some(store_dir.to_path_buf())));
        if allow_generate {
            chain = chain.with(GeneratedCredentials);
        }
        chain
    }
}

impl Default for CredentialChain {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialProvider for CredentialChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn obtain(&self, username: &str, non_interactive: bool) -> Result<CredentialSet, CredentialError> {
        let mut reasons = Vec::new();
        for provider in &self.providers {
            match provider.obtain(username, non_interactive) {
                Ok(credentials) => {
                    check_password_policy(username, credentials.password().expose_secret())?;
                    log::info!("✓ Credentials obtained from {} source", provider.name());
                    return Ok(credentials);
                }
                Err(CredentialError::Unavailable { source_name, reason }) => {
                    log::debug!("{} credentials unavailable: {}", source_name, reason);
                    reasons.push(format!("{source_name}: {reason}"));
                }
                Err(e) => return Err(e),
            }
        }
        Err(CredentialError::Exhausted { reasons })
    }
}

/// Reads one store file. `Ok(None)` when it does not exist.
fn read_store_file(path: &Path) -> Result<Option<SecretString>, CredentialError> {
    if !path.exists() {
        return Ok(None);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)
            .map_err(|source| CredentialError::Store {
                path: path.to_path_buf(),
                source,
            })?
            .permissions()
            .mode()
            & 0o777;
        if mode & 0o077 != 0 {
            return Err(CredentialError::InsecureStore {
                path: path.to_path_buf(),
                mode,
            });
        }
    }

    let content = std::fs::read_to_string(path).map_err(|source| CredentialError::Store {
        path: path.to_path_buf(),
        source,
    })?;
    let value = content.trim_end_matches(['\r', '\n']).to_string();
    if value.is_empty() {
        return Ok(None);
    }
    Ok(Some(SecretString::from(value)))
}

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::rng();
    let buf: Vec<u8> = (0..bytes).map(|_| rng.random::<u8>()).collect();
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn policy_lists_every_violation() {
        let err = check_password_policy("admin", "short").unwrap_err();
        let CredentialError::Policy { violations } = err else {
            panic!("expected policy error");
        };
        assert!(violations.len() >= 3);
        assert!(!violations.iter().any(|v| v.contains("short")));
    }

    #[test]
    fn policy_rejects_username_inside_password() {
        assert!(check_password_policy("admin", "MyAdmin-Pass123").is_err());
        assert!(check_password_policy("admin", "Corr3ct-Horse-Battery").is_ok());
    }

    #[test]
    fn generated_passwords_pass_policy() {
        for _ in 0..50 {
            let password = GeneratedCredentials::generate_password();
            check_password_policy("admin", password.expose_secret()).unwrap();
        }
    }

    #[test]
    fn debug_output_is_redacted() {
        let creds = CredentialSet::new(
            "admin",
            SecretString::from("Sup3r-Secret-Value".to_string()),
            SecretTokens::generate(),
        );
        let debug = format!("{creds:?}");
        assert!(debug.contains("admin"));
        assert!(!debug.contains("Sup3r"));
    }

    #[test]
    fn clear_empties_the_password() {
        let mut creds = GeneratedCredentials.obtain("admin", true).unwrap();
        assert!(!creds.is_cleared());
        creds.clear();
        assert!(creds.is_cleared());
    }

    struct Counting(Arc<AtomicUsize>);

    impl CredentialProvider for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn obtain(&self, _username: &str, _non_interactive: bool) -> Result<CredentialSet, CredentialError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(CredentialError::Unavailable {
                source_name: "counting",
                reason: "never available".to_string(),
            })
        }
    }

    #[test]
    fn chain_falls_through_unavailable_sources() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = CredentialChain::new()
            .with(Counting(calls.clone()))
            .with(GeneratedCredentials);
        let creds = chain.obtain("admin", true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(creds.username(), "admin");
    }

    #[test]
    fn chain_enforces_policy_on_explicit_password() {
        let chain = CredentialChain::new().with(StaticCredentials::new(SecretString::from(
            "weak".to_string(),
        )));
        assert!(matches!(
            chain.obtain("admin", true),
            Err(CredentialError::Policy { .. })
        ));
    }

    #[test]
    fn non_interactive_prompt_is_unavailable() {
        let prompt = PromptCredentials::new(None);
        assert!(matches!(
            prompt.obtain("admin", true),
            Err(CredentialError::Unavailable { .. })
        ));
    }

    #[test]
    fn empty_chain_is_exhausted() {
        let chain = CredentialChain::new().with(StoredCredentials::new("/nonexistent/credentials"));
        assert!(matches!(
            chain.obtain("admin", true),
            Err(CredentialError::Exhausted { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn store_rejects_world_readable_files() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PASSWORD_FILE);
        std::fs::write(&path, "Stored-Passw0rd!\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(matches!(
            StoredCredentials::new(dir.path()).obtain("admin", true),
            Err(CredentialError::InsecureStore { .. })
        ));

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        let creds = StoredCredentials::new(dir.path()).obtain("admin", true).unwrap();
        assert_eq!(creds.password().expose_secret(), "Stored-Passw0rd!");
    }
}
