pub mod parser;

use anyhow::{anyhow, Context, Result};
use mailin_embedded::{response, Handler, Response, Server, SslConfig};
use std::net::{IpAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::address::normalize;
use crate::config::SmtpTlsConfig;
use crate::storage::{
    cancel::Cancellation,
    models::{Mail, RecipientAddress},
    StorageBackend,
};
use parser::summarize;

/// Time budget for storing one accepted mail
const MAX_DATA_PROCESS_DURATION: Duration = Duration::from_secs(10);

/// Per-transaction limits enforced by the SMTP handler
#[derive(Debug, Clone, Copy)]
pub struct SmtpLimits {
    pub max_recipients: usize,
    pub max_message_bytes: usize,
}

/// SMTP server that stores mail for every valid recipient
pub struct SmtpServer {
    storage: Arc<dyn StorageBackend>,
    domain_name: String,
    listen_addr: String,
    tls: Option<SmtpTlsConfig>,
    limits: SmtpLimits,
}

impl SmtpServer {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        domain_name: String,
        listen_addr: String,
        tls: Option<SmtpTlsConfig>,
        limits: SmtpLimits,
    ) -> Self {
        Self {
            storage,
            domain_name,
            listen_addr,
            tls,
            limits,
        }
    }

    /// Bind the listener, then serve SMTP on a dedicated thread.
    ///
    /// Bind and TLS errors are returned to the caller. The serving thread is
    /// not owned by the tokio runtime, so it never holds up runtime shutdown.
    pub fn start(&self) -> Result<()> {
        let ssl_config = match &self.tls {
            Some(tls) => {
                tls.verify()?;
                SslConfig::SelfSigned {
                    cert_path: tls.cert_path.to_string_lossy().into_owned(),
                    key_path: tls.key_path.to_string_lossy().into_owned(),
                }
            }
            None => SslConfig::None,
        };
        let server_type = if self.tls.is_some() { "STARTTLS" } else { "non-TLS" };

        debug!("Starting {} SMTP server on {}...", server_type, self.listen_addr);

        let listener = TcpListener::bind(&self.listen_addr)
            .with_context(|| format!("cannot listen for SMTP on {}", self.listen_addr))?;

        let runtime_handle = tokio::runtime::Handle::current();
        let handler = SmtpHandler::new(self.storage.clone(), runtime_handle, self.limits);

        let mut server = Server::new(handler);
        server
            .with_name(self.domain_name.as_str())
            .with_ssl(ssl_config)
            .map_err(|e| anyhow!("cannot configure {} SMTP server: {}", server_type, e))?
            .with_tcp_listener(listener);

        let addr = self.listen_addr.clone();
        info!("📬 {} SMTP server listening on {}", server_type, addr);

        // mailin-embedded has no graceful shutdown; serve() runs until the process exits
        std::thread::Builder::new()
            .name("smtp-server".to_string())
            .spawn(move || {
                if let Err(e) = server.serve() {
                    error!("{} SMTP server error on {}: {}", server_type, addr, e);
                }
                info!("Stopped {} SMTP server on {}", server_type, addr);
            })
            .context("cannot spawn SMTP server thread")?;

        Ok(())
    }
}

/// Reply to one step of an SMTP transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Ok,
    NoMailbox,
    TooManyRecipients,
    MessageTooLarge,
    Failed,
}

impl From<Reply> for Response {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Ok => response::OK,
            Reply::NoMailbox => response::NO_MAILBOX,
            Reply::TooManyRecipients => Response::custom(452, "Too many recipients".to_string()),
            Reply::MessageTooLarge => Response::custom(
                552,
                "Message exceeds fixed maximum message size".to_string(),
            ),
            Reply::Failed => response::INTERNAL_ERROR,
        }
    }
}

/// Handler for SMTP events; mailin-embedded clones it for every connection
#[derive(Clone)]
struct SmtpHandler {
    storage: Arc<dyn StorageBackend>,
    runtime_handle: tokio::runtime::Handle,
    limits: SmtpLimits,
    // Current transaction
    sender: String,
    recipients: Vec<RecipientAddress>,
    data: Vec<u8>,
    oversized: bool,
}

impl SmtpHandler {
    fn new(
        storage: Arc<dyn StorageBackend>,
        runtime_handle: tokio::runtime::Handle,
        limits: SmtpLimits,
    ) -> Self {
        Self {
            storage,
            runtime_handle,
            limits,
            sender: String::new(),
            recipients: Vec::new(),
            data: Vec::new(),
            oversized: false,
        }
    }

    fn reset(&mut self) {
        self.sender.clear();
        self.recipients.clear();
        self.data.clear();
        self.oversized = false;
    }

    fn start_mail(&mut self, from: &str) -> Reply {
        self.reset();

        // Null reverse-path
        if from.trim().trim_start_matches('<').trim_end_matches('>').is_empty() {
            return Reply::Ok;
        }
        match normalize(from) {
            Ok(addr) => {
                self.sender = addr.checked;
                Reply::Ok
            }
            Err(e) => {
                warn!("Cannot normalize sender address [{}]: {}", from, e);
                Reply::NoMailbox
            }
        }
    }

    fn add_recipient(&mut self, to: &str) -> Reply {
        if self.recipients.len() >= self.limits.max_recipients {
            info!("Rejecting recipient {} - too many recipients", to);
            return Reply::TooManyRecipients;
        }
        match normalize(to) {
            Ok(addr) => {
                self.recipients.push(addr.into());
                Reply::Ok
            }
            Err(e) => {
                warn!("Cannot normalize recipient address [{}]: {}", to, e);
                Reply::NoMailbox
            }
        }
    }

    fn start_data(&mut self) -> Reply {
        if self.recipients.is_empty() {
            return Reply::NoMailbox;
        }
        self.data.clear();
        self.oversized = false;
        Reply::Ok
    }

    fn append_data(&mut self, buf: &[u8]) {
        if self.oversized {
            return;
        }
        if self.data.len() + buf.len() > self.limits.max_message_bytes {
            self.oversized = true;
            self.data = Vec::new();
            return;
        }
        self.data.extend_from_slice(buf);
    }

    fn finish_data(&mut self) -> Reply {
        if self.oversized {
            info!(
                "Rejecting mail from [{}] - larger than {} bytes",
                self.sender, self.limits.max_message_bytes
            );
            self.reset();
            return Reply::MessageTooLarge;
        }

        let data = std::mem::take(&mut self.data);
        if let Some(summary) = summarize(&data) {
            info!(
                "Email received from [{}] ({} bytes): subject={}, message_id={}",
                self.sender,
                data.len(),
                summary.subject,
                summary.message_id.as_deref().unwrap_or("-")
            );
        }

        let mail = Mail::new(
            std::mem::take(&mut self.sender),
            std::mem::take(&mut self.recipients),
            String::from_utf8_lossy(&data).into_owned(),
        );
        self.reset();

        let cancel = Cancellation::with_timeout(MAX_DATA_PROCESS_DURATION);
        match self.runtime_handle.block_on(self.storage.add_mail(mail, cancel)) {
            Ok(report) => {
                if !report.is_complete() {
                    warn!(
                        "Mail only partially stored: {} stored, {} failed, interrupted: {}",
                        report.stored.len(),
                        report.failed.len(),
                        report.interrupted.as_ref().map(|e| e.to_string()).unwrap_or_default()
                    );
                }
                if report.any_stored() {
                    debug!("Stored mail for {} recipient(s)", report.stored.len());
                    Reply::Ok
                } else {
                    error!("Failed to store mail for any recipient");
                    Reply::Failed
                }
            }
            Err(e) => {
                error!("Failed to store mail: {}", e);
                Reply::Failed
            }
        }
    }
}

impl Handler for SmtpHandler {
    fn mail(&mut self, _ip: IpAddr, _domain: &str, from: &str) -> Response {
        self.start_mail(from).into()
    }

    fn rcpt(&mut self, to: &str) -> Response {
        self.add_recipient(to).into()
    }

    fn data_start(
        &mut self,
        _domain: &str,
        from: &str,
        _is8bit: bool,
        to: &[String],
    ) -> Response {
        debug!("Receiving email from {} to {:?}", from, to);
        self.start_data().into()
    }

    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.append_data(buf);
        Ok(())
    }

    fn data_end(&mut self) -> Response {
        self.finish_data().into()
    }
}
