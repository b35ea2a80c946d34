//! Security material for a secured installation.
//!
//! Certificate issuance is an opaque external command; this module only
//! checks whether material is present, shells out when it is not, and
//! writes the credentials realm file the engine reads at startup.

use anyhow::{bail, Context, Result};
use colored::*;
use deckhand_core::acquire::Installation;
use deckhand_core::spec::Credentials;
use std::fs;
use std::process::Command;

/// Ensure `config/certs` holds a certificate/key pair and the realm file
/// carries the requested credentials.
pub fn ensure_material(
    installation: &Installation,
    credentials: Option<&Credentials>,
) -> Result<()> {
    let certs_dir = installation.root_dir.join("config").join("certs");
    let cert = certs_dir.join("node.pem");
    let key = certs_dir.join("node-key.pem");

    if !cert.exists() || !key.exists() {
        fs::create_dir_all(&certs_dir)
            .with_context(|| format!("failed to create {}", certs_dir.display()))?;
        println!("  {} Generating self-signed certificate...", "→".cyan());
        let status = Command::new("openssl")
            .args([
                "req", "-x509", "-newkey", "rsa:2048", "-nodes", "-days", "365", "-subj",
                "/CN=localhost",
            ])
            .arg("-keyout")
            .arg(&key)
            .arg("-out")
            .arg(&cert)
            .status()
            .context("failed to run openssl")?;
        if !status.success() {
            bail!(
                "openssl exited with {}",
                status.code().map_or("signal".to_string(), |c| c.to_string())
            );
        }
    }

    if let Some(creds) = credentials {
        let realm = installation.root_dir.join("config").join("users");
        fs::write(&realm, format!("{}:{}\n", creds.username, creds.password))
            .with_context(|| format!("failed to write {}", realm.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_core::acquire::Origin;
    use deckhand_core::spec::ServiceKind;
    use std::collections::BTreeSet;

    #[test]
    fn existing_material_skips_generation_and_writes_realm() {
        let dir = tempfile::tempdir().unwrap();
        let certs = dir.path().join("config").join("certs");
        fs::create_dir_all(&certs).unwrap();
        fs::write(certs.join("node.pem"), "cert").unwrap();
        fs::write(certs.join("node-key.pem"), "key").unwrap();

        let installation = Installation {
            root_dir: dir.path().to_path_buf(),
            kind: ServiceKind::Engine,
            origin: Origin::Release("2.13.0".into()),
            plugins_present: BTreeSet::new(),
        };
        let creds = Credentials {
            username: "admin".into(),
            password: "changeme".into(),
        };

        ensure_material(&installation, Some(&creds)).unwrap();

        let realm = fs::read_to_string(dir.path().join("config").join("users")).unwrap();
        assert_eq!(realm, "admin:changeme\n");
    }
}
