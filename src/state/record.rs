//! `KEY=value` record format.
//!
//! One field per line. Blank lines and `#` comments are ignored; unknown keys
//! are tolerated so newer records stay readable. Everything after the first
//! `=` is the value, whitespace included, so values may not contain line
//! breaks.

use super::{InstanceIdentity, InstanceKey, SharedInfraState};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write;

const HEADER: &str = "# Managed by fleet. Contains secrets; keep private.";

pub(crate) fn encode_identity(key: &InstanceKey, identity: &InstanceIdentity) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", HEADER);
    let _ = writeln!(out, "SERVER_NAME={}", key.server());
    let _ = writeln!(out, "INSTANCE_NAME={}", key.instance());
    let _ = writeln!(out, "DB_NAME={}", identity.database_name);
    let _ = writeln!(out, "DB_USER={}", identity.database_user);
    let _ = writeln!(out, "DB_PASSWORD={}", identity.database_password);
    let _ = writeln!(out, "REDIS_DB={}", identity.cache_namespace_index);
    let _ = writeln!(out, "PORT={}", identity.service_port);
    let _ = writeln!(out, "ENCRYPTION_KEY={}", identity.encryption_key);
    let _ = writeln!(out, "CREATED_AT={}", identity.created_at.to_rfc3339());
    out
}

pub(crate) fn decode_identity(text: &str) -> Result<(InstanceKey, InstanceIdentity)> {
    let fields = parse_lines(text)?;
    let key = InstanceKey::new(
        required(&fields, "SERVER_NAME")?.trim(),
        required(&fields, "INSTANCE_NAME")?.trim(),
    )?;
    let identity = InstanceIdentity {
        database_name: required(&fields, "DB_NAME")?.trim().to_string(),
        database_user: required(&fields, "DB_USER")?.trim().to_string(),
        database_password: required(&fields, "DB_PASSWORD")?.to_string(),
        cache_namespace_index: parse_field(&fields, "REDIS_DB")?,
        service_port: parse_field(&fields, "PORT")?,
        encryption_key: required(&fields, "ENCRYPTION_KEY")?.to_string(),
        created_at: parse_timestamp(&fields)?,
    };
    Ok((key, identity))
}

/// Reject values the line format cannot hold.
pub(crate) fn check_value(name: &str, value: &str) -> Result<()> {
    if value.contains(['\n', '\r']) {
        return Err(Error::State(format!("{} cannot contain line breaks", name)));
    }
    Ok(())
}

pub(crate) fn encode_infra(state: &SharedInfraState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", HEADER);
    let _ = writeln!(out, "POSTGRES_PASSWORD={}", state.admin_password);
    let _ = writeln!(out, "CREATED_AT={}", state.created_at.to_rfc3339());
    out
}

pub(crate) fn decode_infra(text: &str) -> Result<SharedInfraState> {
    let fields = parse_lines(text)?;
    Ok(SharedInfraState {
        admin_password: required(&fields, "POSTGRES_PASSWORD")?.to_string(),
        created_at: parse_timestamp(&fields)?,
    })
}

fn parse_lines(text: &str) -> Result<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    for (lineno, line) in text.lines().enumerate() {
        let content = line.trim_start();
        if content.trim_end().is_empty() || content.starts_with('#') {
            continue;
        }
        let (name, value) = content.split_once('=').ok_or_else(|| {
            Error::State(format!("line {}: expected KEY=value", lineno + 1))
        })?;
        // Secrets are kept byte for byte; callers trim the fields that allow it
        fields.insert(name.trim().to_string(), value.to_string());
    }
    Ok(fields)
}

fn required<'a>(fields: &'a BTreeMap<String, String>, name: &str) -> Result<&'a str> {
    match fields.get(name) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::State(format!("missing field {}", name))),
    }
}

fn parse_field<T: std::str::FromStr>(fields: &BTreeMap<String, String>, name: &str) -> Result<T> {
    required(fields, name)?
        .trim()
        .parse()
        .map_err(|_| Error::State(format!("field {} is not a valid number", name)))
}

fn parse_timestamp(fields: &BTreeMap<String, String>) -> Result<DateTime<Utc>> {
    // Records written by hand may omit the timestamp
    match fields.get("CREATED_AT") {
        Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| Error::State(format!("field CREATED_AT: {}", e))),
        None => Ok(Utc::now()),
    }
}
