//! Sender address handling for archive file names.

/// A parsed `From:`-style address.
///
/// # Examples
/// - `"Ana Pérez <ana@example.com>"` → `display_name = "Ana Pérez"`, `address = "ana@example.com"`
/// - `"ana@example.com"` → `display_name = ""`, `address = "ana@example.com"`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare address, or the raw input when no address could be found.
    pub address: String,
}

impl EmailAddress {
    /// Build an address from already-separated parts.
    pub fn new(display_name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            display_name: strip_quotes(&display_name.into()),
            address: address.into().trim().to_string(),
        }
    }

    /// Parse a single address from a header value.
    ///
    /// Supported formats: `addr`, `<addr>`, `Name <addr>` and `"Quoted, Name" <addr>`.
    /// Anything else is kept verbatim in `address`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let (Some(open), Some(close)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if close > open {
                return Self {
                    display_name: strip_quotes(&trimmed[..open]),
                    address: trimmed[open + 1..close].trim().to_string(),
                };
            }
        }

        Self {
            display_name: String::new(),
            address: trimmed.to_string(),
        }
    }

    /// The part of the address before `@`, if the address has one.
    pub fn local_part(&self) -> Option<&str> {
        let (local, _) = self.address.split_once('@')?;
        let local = local.trim();
        (!local.is_empty()).then_some(local)
    }

    /// Shortest human-meaningful name for the sender.
    ///
    /// Prefers the display name, then the local part, then the raw address.
    pub fn short_name(&self) -> &str {
        if !self.display_name.trim().is_empty() {
            return self.display_name.trim();
        }
        self.local_part().unwrap_or(self.address.as_str())
    }

    /// Format as `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        match (self.display_name.is_empty(), self.address.is_empty()) {
            (true, _) => self.address.clone(),
            (false, true) => self.display_name.clone(),
            (false, false) => format!("{} <{}>", self.display_name, self.address),
        }
    }
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display())
    }
}
