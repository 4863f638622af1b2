//! EIP-4361 ("Sign-In with Ethereum") message building and parsing.
//!
//! Wallets show this text to the user verbatim, so the layout is fixed:
//!
//! ```text
//! ${domain} wants you to sign in with your Ethereum account:
//! ${address}
//!
//! ${statement}
//!
//! URI: ${uri}
//! Version: 1
//! Chain ID: ${chain-id}
//! Nonce: ${nonce}
//! Issued At: ${issued-at}
//! Expiration Time: ${expiration-time}
//! Not Before: ${not-before}
//! Request ID: ${request-id}
//! Resources:
//! - ${resources[0]}
//! - ${resources[1]}
//! ```
//!
//! The statement and its trailing blank line are omitted when there is no
//! statement. `Expiration Time`, `Not Before`, `Request ID` and `Resources`
//! are optional, but every field that is present must appear in the order
//! above. Timestamps are RFC 3339. The nonce is at least 8 ASCII
//! alphanumeric characters.
//!
//! [`SiweMessage::parse`] is strict: it walks the lines in order and rejects
//! unknown, duplicated or reordered fields instead of searching the text.

use std::fmt;

use alloy_primitives::Address;
use chrono::{DateTime, SecondsFormat, Utc};

use super::error::ParseError;

const HEADER_SUFFIX: &str = " wants you to sign in with your Ethereum account:";
const RESOURCES_HEADER: &str = "Resources:";
const MIN_NONCE_LEN: usize = 8;

/// A parsed EIP-4361 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiweMessage {
    pub domain: String,
    pub address: Address,
    pub statement: Option<String>,
    pub uri: String,
    pub version: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub not_before: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
    pub resources: Vec<String>,
}

/// Inputs for building a message on the server side.
///
/// `uri` defaults to `https://{domain}` and `issued_at` to the current time.
#[derive(Debug, Clone, Default)]
pub struct MessageParams {
    pub domain: String,
    pub address: Address,
    pub statement: Option<String>,
    pub uri: Option<String>,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub not_before: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
    pub resources: Vec<String>,
}

impl SiweMessage {
    /// Renders the message text for `params`.
    pub fn build(params: &MessageParams) -> String {
        Self::from_params(params).to_string()
    }

    pub fn from_params(params: &MessageParams) -> Self {
        Self {
            domain: params.domain.clone(),
            address: params.address,
            statement: params.statement.clone().filter(|s| !s.is_empty()),
            uri: params
                .uri
                .clone()
                .unwrap_or_else(|| format!("https://{}", params.domain)),
            version: "1".to_string(),
            chain_id: params.chain_id,
            nonce: params.nonce.clone(),
            issued_at: params.issued_at.unwrap_or_else(Utc::now),
            expiration_time: params.expiration_time,
            not_before: params.not_before,
            request_id: params.request_id.clone(),
            resources: params.resources.clone(),
        }
    }

    /// Parses the plain-text EIP-4361 representation.
    pub fn parse(message: &str) -> Result<Self, ParseError> {
        let mut lines: Vec<&str> = message.lines().collect();
        while lines.last().is_some_and(|line| line.trim().is_empty()) {
            lines.pop();
        }
        if lines.is_empty() {
            return Err(ParseError::EmptyMessage);
        }

        let mut cursor = Cursor { lines, pos: 0 };

        let domain = cursor
            .advance()
            .and_then(|header| header.strip_suffix(HEADER_SUFFIX))
            .filter(|domain| !domain.is_empty() && !domain.contains(char::is_whitespace))
            .ok_or(ParseError::InvalidHeader)?
            .to_string();

        let address_line = cursor
            .advance()
            .ok_or(ParseError::MissingField("address"))?;
        let address = parse_address_value(address_line)?;

        cursor.blank_line()?;
        let statement = match cursor.peek() {
            // Some wallets emit an empty statement line instead of omitting it
            Some("") => {
                cursor.pos += 1;
                None
            }
            Some(line) if !line.starts_with("URI: ") => {
                cursor.pos += 1;
                cursor.blank_line()?;
                Some(line.to_string())
            }
            _ => None,
        };

        let uri = cursor.required("URI")?.to_string();

        let version = cursor.required("Version")?;
        if version != "1" {
            return Err(ParseError::UnsupportedVersion(version.to_string()));
        }

        let chain_id = parse_chain_id_value(cursor.required("Chain ID")?)?;
        let nonce = parse_nonce_value(cursor.required("Nonce")?)?;
        let issued_at = parse_datetime("Issued At", cursor.required("Issued At")?)?;
        let expiration_time = cursor
            .optional("Expiration Time")
            .map(|value| parse_datetime("Expiration Time", value))
            .transpose()?;
        let not_before = cursor
            .optional("Not Before")
            .map(|value| parse_datetime("Not Before", value))
            .transpose()?;
        let request_id = cursor.optional("Request ID").map(str::to_string);

        let mut resources = Vec::new();
        if cursor.peek() == Some(RESOURCES_HEADER) {
            cursor.pos += 1;
            while let Some(resource) = cursor.peek().and_then(|line| line.strip_prefix("- ")) {
                resources.push(resource.to_string());
                cursor.pos += 1;
            }
        }

        if let Some(content) = cursor.peek() {
            return Err(ParseError::UnexpectedLine {
                line: cursor.pos + 1,
                content: content.to_string(),
            });
        }

        Ok(Self {
            domain,
            address,
            statement,
            uri,
            version: version.to_string(),
            chain_id,
            nonce,
            issued_at,
            expiration_time,
            not_before,
            request_id,
            resources,
        })
    }

    /// Returns `true` once `now` has reached the expiration time, if any.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time.is_some_and(|exp| exp <= now)
    }

    /// Returns `true` while `now` is before the not-before time, if any.
    pub fn is_not_yet_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_some_and(|nbf| nbf > now)
    }
}

impl fmt::Display for SiweMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}{}", self.domain, HEADER_SUFFIX)?;
        writeln!(f, "{}", self.address.to_checksum(None))?;
        writeln!(f)?;
        if let Some(statement) = &self.statement {
            writeln!(f, "{statement}")?;
            writeln!(f)?;
        }
        writeln!(f, "URI: {}", self.uri)?;
        writeln!(f, "Version: {}", self.version)?;
        writeln!(f, "Chain ID: {}", self.chain_id)?;
        writeln!(f, "Nonce: {}", self.nonce)?;
        write!(f, "Issued At: {}", format_datetime(&self.issued_at))?;
        if let Some(exp) = &self.expiration_time {
            write!(f, "\nExpiration Time: {}", format_datetime(exp))?;
        }
        if let Some(nbf) = &self.not_before {
            write!(f, "\nNot Before: {}", format_datetime(nbf))?;
        }
        if let Some(request_id) = &self.request_id {
            write!(f, "\nRequest ID: {request_id}")?;
        }
        if !self.resources.is_empty() {
            write!(f, "\n{RESOURCES_HEADER}")?;
            for resource in &self.resources {
                write!(f, "\n- {resource}")?;
            }
        }
        Ok(())
    }
}

/// Extracts and validates the nonce of a message.
pub fn parse_nonce(message: &str) -> Result<String, ParseError> {
    SiweMessage::parse(message).map(|m| m.nonce)
}

/// Extracts the signing address of a message.
pub fn parse_address(message: &str) -> Result<Address, ParseError> {
    SiweMessage::parse(message).map(|m| m.address)
}

/// Extracts the chain id of a message.
pub fn parse_chain_id(message: &str) -> Result<u64, ParseError> {
    SiweMessage::parse(message).map(|m| m.chain_id)
}

struct Cursor<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<&'a str> {
        let line = self.peek()?;
        self.pos += 1;
        Some(line)
    }

    fn blank_line(&mut self) -> Result<(), ParseError> {
        match self.peek() {
            Some("") => {
                self.pos += 1;
                Ok(())
            }
            Some(content) => Err(ParseError::UnexpectedLine {
                line: self.pos + 1,
                content: content.to_string(),
            }),
            None => Err(ParseError::MissingField("URI")),
        }
    }

    fn optional(&mut self, label: &str) -> Option<&'a str> {
        let value = self
            .peek()?
            .strip_prefix(label)
            .and_then(|rest| rest.strip_prefix(": "))?;
        self.pos += 1;
        Some(value)
    }

    fn required(&mut self, label: &'static str) -> Result<&'a str, ParseError> {
        self.optional(label).ok_or(ParseError::MissingField(label))
    }
}

fn parse_address_value(raw: &str) -> Result<Address, ParseError> {
    let hex = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| ParseError::InvalidAddress(raw.to_string()))?;
    let address = format!("0x{hex}")
        .parse::<Address>()
        .map_err(|e| ParseError::InvalidAddress(format!("{raw}: {e}")))?;

    // Single-case hex carries no checksum; mixed case must be EIP-55
    let mixed_case = hex.chars().any(|c| c.is_ascii_lowercase())
        && hex.chars().any(|c| c.is_ascii_uppercase());
    if mixed_case && address.to_checksum(None)[2..] != *hex {
        return Err(ParseError::InvalidAddress(format!("{raw}: bad EIP-55 checksum")));
    }
    Ok(address)
}

fn parse_chain_id_value(raw: &str) -> Result<u64, ParseError> {
    raw.parse::<u64>().map_err(|_| ParseError::InvalidField {
        field: "Chain ID",
        reason: format!("{raw:?} is not a valid u64"),
    })
}

fn parse_nonce_value(raw: &str) -> Result<String, ParseError> {
    if raw.len() < MIN_NONCE_LEN || !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ParseError::InvalidNonce(raw.to_string()));
    }
    Ok(raw.to_string())
}

fn parse_datetime(field: &'static str, raw: &str) -> Result<DateTime<Utc>, ParseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ParseError::InvalidField {
            field,
            reason: e.to_string(),
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
