use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

const MIN_SMTP_MAX_RECIPIENTS: usize = 1;
const MAX_SMTP_MAX_RECIPIENTS: usize = 100;

const MIN_SMTP_MAX_MESSAGE_BYTES: usize = 128;
const MAX_SMTP_MAX_MESSAGE_BYTES: usize = 1024 * 1024 * 1024;

const MIN_MAIL_RETAIN_HOURS: u64 = 2;

/// Application configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "mailpond", about = "Receive mail over SMTP and serve it back over HTTP")]
pub struct Config {
    /// Mail domain announced by the SMTP service
    #[arg(long, env = "MAILPOND_DOMAIN", default_value = "example.net")]
    pub mail_domain: String,

    /// Listen address of the SMTP service
    #[arg(long, env = "MAILPOND_SMTP_LISTEN", default_value = "0.0.0.0:1025")]
    pub smtp_listen: String,

    /// TLS certificate (PEM) offered through STARTTLS
    #[arg(long, env = "MAILPOND_SMTP_TLS_CERT")]
    pub smtp_tls_cert: Option<PathBuf>,

    /// TLS private key (PEM) matching --smtp-tls-cert
    #[arg(long, env = "MAILPOND_SMTP_TLS_KEY")]
    pub smtp_tls_key: Option<PathBuf>,

    /// Max number of recipients per mail
    #[arg(long, env = "MAILPOND_SMTP_MAX_RECIPIENTS", default_value_t = 16)]
    pub smtp_max_recipients: usize,

    /// Max mail size in bytes
    #[arg(long, env = "MAILPOND_SMTP_MAX_MESSAGE_BYTES", default_value_t = 20 * 1024 * 1024)]
    pub smtp_max_message_bytes: usize,

    /// Listen address of the HTTP service
    #[arg(long, env = "MAILPOND_HTTP_LISTEN", default_value = "0.0.0.0:8080")]
    pub http_listen: String,

    /// Folder of static content served by the HTTP service
    #[arg(long, env = "MAILPOND_HTTP_STATIC")]
    pub http_static_content: Option<PathBuf>,

    /// Folder holding stored mail
    #[arg(long, env = "MAILPOND_STORAGE")]
    pub storage_path: PathBuf,

    /// Hours to keep received mail
    #[arg(long, env = "MAILPOND_RETAIN_HOURS", default_value_t = 24 * 7)]
    pub mail_retain_hours: u64,

    /// Minutes between two purges of expired mail
    #[arg(long, env = "MAILPOND_PURGE_INTERVAL_MINUTES", default_value_t = 120)]
    pub purge_interval_minutes: u64,
}

/// SMTP TLS configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpTlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Config {
    /// Load configuration from command line, environment and .env file
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (don't fail if it doesn't)
        let _ = dotenvy::dotenv();

        let mut config = Config::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check option ranges and resolve paths
    pub fn validate(&mut self) -> Result<()> {
        if !(MIN_SMTP_MAX_RECIPIENTS..=MAX_SMTP_MAX_RECIPIENTS).contains(&self.smtp_max_recipients) {
            bail!(
                "option smtp-max-recipients out of acceptable range: {}",
                self.smtp_max_recipients
            );
        }
        if !(MIN_SMTP_MAX_MESSAGE_BYTES..=MAX_SMTP_MAX_MESSAGE_BYTES)
            .contains(&self.smtp_max_message_bytes)
        {
            bail!(
                "option smtp-max-message-bytes out of acceptable range: {}",
                self.smtp_max_message_bytes
            );
        }
        if self.mail_retain_hours < MIN_MAIL_RETAIN_HOURS {
            bail!(
                "option mail-retain-hours out of acceptable range: {}",
                self.mail_retain_hours
            );
        }
        if self.purge_interval_minutes == 0 {
            bail!("option purge-interval-minutes must be positive");
        }
        if self.smtp_tls_cert.is_some() != self.smtp_tls_key.is_some() {
            bail!("options smtp-tls-cert and smtp-tls-key must be set together");
        }
        if self.mail_domain.trim().is_empty() {
            bail!("option mail-domain must not be empty");
        }

        self.storage_path = std::path::absolute(&self.storage_path).with_context(|| {
            format!("cannot resolve storage path {}", self.storage_path.display())
        })?;
        if let Some(folder) = self.http_static_content.take() {
            self.http_static_content = Some(std::path::absolute(&folder).with_context(|| {
                format!("cannot resolve static content path {}", folder.display())
            })?);
        }

        Ok(())
    }

    pub fn mail_retain_duration(&self) -> Duration {
        Duration::from_secs(self.mail_retain_hours * 3600)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_minutes * 60)
    }

    pub fn smtp_tls(&self) -> Option<SmtpTlsConfig> {
        match (&self.smtp_tls_cert, &self.smtp_tls_key) {
            (Some(cert_path), Some(key_path)) => Some(SmtpTlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            }),
            _ => None,
        }
    }
}

impl SmtpTlsConfig {
    /// Check that the certificate chain and private key files parse as PEM
    pub fn verify(&self) -> Result<()> {
        let cert_file = std::fs::read(&self.cert_path)
            .with_context(|| format!("cannot read certificate {}", self.cert_path.display()))?;
        let certs = rustls_pemfile::certs(&mut &cert_file[..])
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("invalid certificate {}", self.cert_path.display()))?;
        if certs.is_empty() {
            bail!("No certificate found in {}", self.cert_path.display());
        }

        let key_file = std::fs::read(&self.key_path)
            .with_context(|| format!("cannot read private key {}", self.key_path.display()))?;
        rustls_pemfile::private_key(&mut &key_file[..])
            .with_context(|| format!("invalid private key {}", self.key_path.display()))?
            .ok_or_else(|| anyhow::anyhow!("No private key found in key file"))?;

        Ok(())
    }
}
