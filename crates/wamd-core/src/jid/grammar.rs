//! Per-server user-part grammars

use crate::errors::AddressError;

const MAX_PHONE_DIGITS: usize = 20;
const MAX_LID_DIGITS: usize = 15;
const CALL_ID_MIN: usize = 18;
const CALL_ID_MAX: usize = 32;

fn all_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

fn reject(input: &str, reason: &str) -> AddressError {
    AddressError::malformed(input, reason)
}

/// Phone numbers: 1 to 20 digits
pub(crate) fn phone(user: &str) -> Result<(), AddressError> {
    if !all_digits(user) || user.len() > MAX_PHONE_DIGITS {
        return Err(reject(user, "phone user must be 1-20 digits"));
    }
    Ok(())
}

/// Hidden user ids: 1 to 15 digits
pub(crate) fn lid(user: &str) -> Result<(), AddressError> {
    if !all_digits(user) || user.len() > MAX_LID_DIGITS {
        return Err(reject(user, "lid user must be 1-15 digits"));
    }
    Ok(())
}

/// Numeric ids (messenger, newsletter, bot, hosted)
pub(crate) fn numeric(user: &str) -> Result<(), AddressError> {
    if !all_digits(user) {
        return Err(reject(user, "user must be numeric"));
    }
    Ok(())
}

/// Interop users: `<country code>-<id>`
pub(crate) fn interop(user: &str) -> Result<(), AddressError> {
    match user.split_once('-') {
        Some((cc, id)) if all_digits(cc) && all_digits(id) => Ok(()),
        _ => Err(reject(user, "interop user must be <cc>-<id>")),
    }
}

/// Groups: `<id>` or the legacy `<creator>-<timestamp>`
pub(crate) fn group(user: &str) -> Result<(), AddressError> {
    let valid = match user.split_once('-') {
        Some((creator, timestamp)) => all_digits(creator) && all_digits(timestamp),
        None => all_digits(user),
    };
    if !valid {
        return Err(reject(user, "group id must be <id> or <id>-<timestamp>"));
    }
    Ok(())
}

/// Broadcast lists: `location` or numeric ids
pub(crate) fn broadcast(user: &str) -> Result<(), AddressError> {
    if user == "location" || all_digits(user) {
        return Ok(());
    }
    Err(reject(user, "broadcast id must be numeric"))
}

/// Call ids: 18 to 32 hex characters
pub(crate) fn call(user: &str) -> Result<(), AddressError> {
    let len_ok = (CALL_ID_MIN..=CALL_ID_MAX).contains(&user.len());
    if !len_ok || !user.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(reject(user, "call id must be 18-32 hex characters"));
    }
    Ok(())
}

/// Users on unregistered servers: anything that prints back unambiguously
pub(crate) fn opaque(user: &str) -> Result<(), AddressError> {
    let ambiguous = user
        .chars()
        .any(|c| matches!(c, ':' | '_') || c.is_whitespace() || c.is_control());
    if ambiguous {
        return Err(reject(user, "user must not contain separators, whitespace or control characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_grammar() {
        assert!(phone("15551234567").is_ok());
        assert!(phone("").is_err());
        assert!(phone("1555abc").is_err());
        assert!(phone(&"1".repeat(21)).is_err());
    }

    #[test]
    fn test_group_grammar() {
        assert!(group("120363025246125486").is_ok());
        assert!(group("15551234567-1612345678").is_ok());
        assert!(group("1555-").is_err());
        assert!(group("abc").is_err());
    }

    #[test]
    fn test_call_grammar() {
        assert!(call("A1B2C3D4E5F6A7B8C9").is_ok());
        assert!(call("A1B2C3").is_err());
        assert!(call("Z1B2C3D4E5F6A7B8C9").is_err());
    }

    #[test]
    fn test_interop_and_lid() {
        assert!(interop("44-123456").is_ok());
        assert!(interop("44123456").is_err());
        assert!(lid("123456789012345").is_ok());
        assert!(lid("1234567890123456").is_err());
    }
}
