use thiserror::Error;

/// Reasons an address can not be normalized
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is too short: [{0}]")]
    TooShort(String),

    #[error("address must contain exactly one '@': [{0}]")]
    MissingAt(String),

    #[error("address has an empty local part: [{0}]")]
    EmptyLocalPart(String),

    #[error("address has an invalid domain: [{0}]")]
    InvalidDomain(String),

    #[error("address contains whitespace or control characters: [{0}]")]
    InvalidCharacter(String),
}

/// Domains whose mailboxes ignore dots in the local part
const DOTLESS_DOMAINS: &[&str] = &["gmail.com", "googlemail.com"];

/// Syntax-checked and canonical forms of one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedAddress {
    /// Address as given, after syntax checking
    pub checked: String,
    /// Canonical lookup key
    pub normalized: String,
}

/// Normalize a raw address into its checked and canonical forms.
///
/// The canonical form is case-folded, drops any `+tag` sub-address and
/// resolves Gmail aliases. Both the SMTP and HTTP adapters go through this
/// function, so its output for a given input must stay stable: a change
/// silently splits a recipient's stored mail across two partitions.
pub fn normalize(raw: &str) -> Result<NormalizedAddress, AddressError> {
    let mut addr = raw.trim();
    if let Some(inner) = addr.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
        addr = inner.trim();
    }

    if addr.len() < 3 {
        return Err(AddressError::TooShort(raw.to_string()));
    }
    if addr.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AddressError::InvalidCharacter(raw.to_string()));
    }

    let (local, domain) = match addr.split_once('@') {
        Some((local, domain)) if !domain.contains('@') => (local, domain),
        _ => return Err(AddressError::MissingAt(raw.to_string())),
    };
    if local.is_empty() {
        return Err(AddressError::EmptyLocalPart(raw.to_string()));
    }
    if !is_valid_domain(domain) {
        return Err(AddressError::InvalidDomain(raw.to_string()));
    }

    let checked = format!("{}@{}", local, domain);

    let mut domain = domain.to_ascii_lowercase();
    let mut local = local.to_lowercase();
    if let Some(pos) = local.find('+') {
        local.truncate(pos);
    }
    if DOTLESS_DOMAINS.contains(&domain.as_str()) {
        local.retain(|c| c != '.');
        domain = "gmail.com".to_string();
    }
    if local.is_empty() {
        return Err(AddressError::EmptyLocalPart(raw.to_string()));
    }

    Ok(NormalizedAddress {
        checked,
        normalized: format!("{}@{}", local, domain),
    })
}

fn is_valid_domain(domain: &str) -> bool {
    !domain.is_empty()
        && domain.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
