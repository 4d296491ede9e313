//! Generated compose artifact and its credential-bound rendering.

use super::compose::{ComposeDocument, declared_services};
use super::spec::SizeClass;
use super::TopologyError;
use crate::deploy::credentials::CredentialSet;
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeSet;

/// Compose secret names, in the order they are declared.
pub const SECRET_NAMES: [&str; 4] = [
    "splunk_password",
    "splunk_hec_token",
    "splunk_idxc_secret",
    "splunk_shc_secret",
];

/// Environment variable carrying each secret when compose secrets are unavailable.
const INLINE_KEYS: [&str; 4] = [
    "SPLUNK_PASSWORD",
    "SPLUNK_HEC_TOKEN",
    "SPLUNK_IDXC_SECRET",
    "SPLUNK_SHC_SECRET",
];

const ENV_HEADER: &str = "# Generated by kodegen_cluster_deploy. Changes are overwritten on the next deploy.";

/// Ordered `KEY=value` lines with no credentials in them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: Vec<(String, String)>,
}

impl EnvFile {
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    fn render_into(&self, out: &mut String) {
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
    }
}

/// Output of the generator: everything needed to write the project, minus credentials.
#[derive(Debug, Clone)]
pub struct ComposeArtifact {
    pub size_class: SizeClass,
    pub document: ComposeDocument,
    /// Compose text taken verbatim from a verified bundle
    pub bundled_yaml: Option<String>,
    pub env: EnvFile,
    /// Credentials are compose secrets (files) rather than env entries
    pub uses_compose_secrets: bool,
    pub active_profile: Option<String>,
    /// Services the requested class runs
    pub services: Vec<String>,
    /// Services whose readiness is judged by running state alone
    pub health_exempt: BTreeSet<String>,
    pub admin_service: String,
    pub admin_port: u16,
    pub index_target: String,
}

/// Artifact with credentials bound, ready to be written.
pub struct MaterializedArtifact {
    pub compose_yaml: String,
    pub env_file: SecretString,
    /// `(secret name, content)` for the credential store
    pub secret_files: Vec<(String, SecretString)>,
}

impl ComposeArtifact {
    /// Replaces the generated document with one shipped in a bundle.
    ///
    /// The bundled document must still declare every service of the requested class.
    pub fn with_bundled_document(mut self, yaml: String) -> Result<Self, TopologyError> {
        let declared = declared_services(&yaml)?;
        let missing: Vec<String> = self
            .services
            .iter()
            .filter(|s| !declared.contains(*s))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(TopologyError::MissingService {
                class: self.size_class,
                services: missing,
            });
        }

        let value: serde_yaml::Value = serde_yaml::from_str(&yaml)?;
        let uses_profiles = value
            .get("services")
            .and_then(serde_yaml::Value::as_mapping)
            .map(|services| services.values().any(|s| s.get("profiles").is_some()))
            .unwrap_or(false);
        self.active_profile = uses_profiles.then(|| self.size_class.as_str().to_string());
        self.bundled_yaml = Some(yaml);
        Ok(self)
    }

    pub fn compose_yaml(&self) -> Result<String, TopologyError> {
        match &self.bundled_yaml {
            Some(yaml) => Ok(yaml.clone()),
            None => self.document.to_yaml(),
        }
    }

    /// Binds credentials: inline env entries or compose secret files.
    pub fn materialize(&self, credentials: &CredentialSet) -> Result<MaterializedArtifact, TopologyError> {
        check_env_safe("username", credentials.username())?;
        let secrets = [
            ("password", credentials.password()),
            ("HEC token", &credentials.tokens().hec_token),
            ("indexer cluster secret", &credentials.tokens().cluster_secret),
            ("search head cluster secret", &credentials.tokens().shc_secret),
        ];
        for (field, value) in secrets {
            check_env_safe(field, value.expose_secret())?;
        }

        let mut text = String::new();
        text.push_str(ENV_HEADER);
        text.push('\n');
        self.env.render_into(&mut text);
        text.push_str("SPLUNK_ADMIN_USER=");
        text.push_str(credentials.username());
        text.push('\n');

        if self.uses_compose_secrets {
            for name in SECRET_NAMES {
                text.push_str(&format!(
                    "{}_FILE=/run/secrets/{}\n",
                    name.to_ascii_uppercase(),
                    name
                ));
            }
        } else {
            for (key, (_, value)) in INLINE_KEYS.iter().zip(secrets.iter()) {
                text.push_str(key);
                text.push('=');
                text.push_str(value.expose_secret());
                text.push('\n');
            }
        }

        // Credential store contents, written in both modes
        let secret_files = SECRET_NAMES
            .iter()
            .zip(secrets.iter())
            .map(|(name, (_, value))| {
                (
                    name.to_string(),
                    SecretString::from(value.expose_secret().to_string()),
                )
            })
            .collect();

        Ok(MaterializedArtifact {
            compose_yaml: self.compose_yaml()?,
            env_file: SecretString::from(text),
            secret_files,
        })
    }
}

fn check_env_safe(field: &'static str, value: &str) -> Result<(), TopologyError> {
    let unsafe_char = |c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '$' | '#' | '\\' | '`');
    if value.is_empty() || value.chars().any(unsafe_char) {
        return Err(TopologyError::UnsafeCredential { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::credentials::SecretTokens;
    use crate::runtime::{CapabilityMatrix, ComposeImplKind, RuntimeKind};
    use crate::topology::{TopologySpec, generate};

    fn artifact(secrets: bool) -> ComposeArtifact {
        let mut caps = CapabilityMatrix::baseline(
            RuntimeKind::Docker,
            ComposeImplKind::Plugin,
            "/usr/bin/docker",
            "/usr/bin/docker",
        );
        caps.supports_secrets = secrets;
        caps.supports_healthcheck = true;
        generate(&TopologySpec::for_class(SizeClass::Small), &caps).unwrap()
    }

    fn credentials(password: &str) -> CredentialSet {
        CredentialSet::new(
            "admin",
            SecretString::from(password.to_string()),
            SecretTokens::generate(),
        )
    }

    #[test]
    fn secrets_mode_keeps_the_password_out_of_the_env_file() {
        let bound = artifact(true).materialize(&credentials("Corr3ct-Horse-Battery")).unwrap();
        let env = bound.env_file.expose_secret();

        assert!(!env.contains("Corr3ct-Horse-Battery"));
        assert!(env.contains("SPLUNK_PASSWORD_FILE=/run/secrets/splunk_password"));
        assert!(env.contains("SPLUNK_ADMIN_USER=admin"));
        assert_eq!(bound.secret_files.len(), SECRET_NAMES.len());
        assert_eq!(bound.secret_files[0].0, "splunk_password");
        assert_eq!(bound.secret_files[0].1.expose_secret(), "Corr3ct-Horse-Battery");
    }

    #[test]
    fn inline_mode_writes_credentials_into_the_env_file() {
        let bound = artifact(false).materialize(&credentials("Corr3ct-Horse-Battery")).unwrap();
        let env = bound.env_file.expose_secret();

        assert!(env.starts_with(ENV_HEADER));
        assert!(env.contains("SPLUNK_PASSWORD=Corr3ct-Horse-Battery\n"));
        assert!(!env.contains("_FILE=/run/secrets/"));
        // The store is written either way
        assert_eq!(bound.secret_files.len(), SECRET_NAMES.len());
    }

    #[test]
    fn credentials_the_env_file_cannot_hold_are_rejected() {
        for password in ["has space-Aa1", "dollar$Aa1bcdef", "quote\"Aa1bcdef", ""] {
            let err = artifact(false)
                .materialize(&credentials(password))
                .err()
                .unwrap();
            assert!(matches!(
                err,
                TopologyError::UnsafeCredential { field: "password" }
            ));
        }
    }

    #[test]
    fn bundled_document_must_declare_every_service() {
        let generated = artifact(true);
        let kept = generated.services[0].clone();
        let yaml = format!("services:\n  {kept}:\n    image: splunk\n");

        let err = generated.clone().with_bundled_document(yaml).unwrap_err();
        let TopologyError::MissingService { services, .. } = err else {
            panic!("expected a missing service error");
        };
        assert_eq!(services.len(), generated.services.len() - 1);
        assert!(!services.contains(&kept));
    }

    #[test]
    fn bundled_document_is_used_verbatim() {
        let generated = artifact(true);
        let yaml = generated.compose_yaml().unwrap();
        let bundled = format!("# shipped in a bundle\n{yaml}");

        let artifact = generated.with_bundled_document(bundled.clone()).unwrap();
        assert_eq!(artifact.compose_yaml().unwrap(), bundled);
        assert_eq!(artifact.active_profile, None);
    }
}
