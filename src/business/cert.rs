//! ACME certificate renewal through the `lego` CLI

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

use crate::config::{CertConfig, CertMode};
use crate::core::CertRenewal;
use crate::logger::log;

/// Days before expiry at which `lego renew` replaces a certificate
const RENEW_DAYS: u32 = 30;

/// Renews certificates by running `lego`. Issues a new certificate when none
/// exists yet, otherwise renews it once it is within the renewal window.
#[derive(Debug, Clone)]
pub struct LegoRenewer {
    binary: PathBuf,
}

impl Default for LegoRenewer {
    fn default() -> Self {
        Self::new("lego")
    }
}

impl LegoRenewer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Command-line arguments for one `lego` invocation
    fn args(config: &CertConfig, issue: bool) -> Result<Vec<String>> {
        let mut args = vec![
            "--path".to_string(),
            config.cert_dir.display().to_string(),
            "--email".to_string(),
            config.email.clone(),
            "--domains".to_string(),
            config.cert_domain.clone(),
            "--accept-tos".to_string(),
        ];

        match config.cert_mode {
            CertMode::Dns => {
                args.push("--dns".to_string());
                args.push(config.provider.clone());
            }
            CertMode::Http => args.push("--http".to_string()),
            CertMode::None | CertMode::File => {
                bail!("cert mode {} is not renewable", config.cert_mode.as_str())
            }
        }

        if issue {
            args.push("run".to_string());
        } else {
            args.push("renew".to_string());
            args.push("--days".to_string());
            args.push(RENEW_DAYS.to_string());
        }
        Ok(args)
    }
}

#[async_trait]
impl CertRenewal for LegoRenewer {
    async fn renew_cert(&self, config: &CertConfig) -> Result<(PathBuf, PathBuf)> {
        if !config.cert_mode.is_acme() {
            bail!("cert mode {} is not renewable", config.cert_mode.as_str());
        }
        let (cert_file, key_file) = config
            .cert_paths()
            .ok_or_else(|| anyhow!("no certificate paths for domain {}", config.cert_domain))?;

        let issue = !cert_file.exists();
        let args = Self::args(config, issue)?;

        let output = Command::new(&self.binary)
            .args(&args)
            .envs(&config.dns_env)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "lego exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        log::info!(
            domain = %config.cert_domain,
            mode = config.cert_mode.as_str(),
            issued = issue,
            "Certificate up to date"
        );
        Ok((cert_file, key_file))
    }
}
