//! Token dictionaries and wire tags
//!
//! Frequent strings are sent as one byte (single-byte dictionary) or as a
//! dictionary selector followed by one byte (double-byte dictionaries). The
//! tag constants below occupy the top of the single-byte range.

use std::collections::HashMap;
use std::sync::OnceLock;

// ----------------------------------------------------------------------------
// Tags
// ----------------------------------------------------------------------------

pub const LIST_EMPTY: u8 = 0;
pub const STREAM_END: u8 = 2;
pub const DICTIONARY_0: u8 = 236;
pub const DICTIONARY_1: u8 = 237;
pub const DICTIONARY_2: u8 = 238;
pub const DICTIONARY_3: u8 = 239;
pub const COMPANION_JID: u8 = 247;
pub const LIST_8: u8 = 248;
pub const LIST_16: u8 = 249;
pub const JID_PAIR: u8 = 250;
pub const HEX_8: u8 = 251;
pub const BINARY_8: u8 = 252;
pub const BINARY_20: u8 = 253;
pub const BINARY_32: u8 = 254;
pub const NIBBLE_8: u8 = 255;

/// Longest string (in characters) sent nibble- or hex-packed
pub const PACKED_MAX: usize = 127;

/// Companion JID domain bytes
pub const DOMAIN_USER: u8 = 0;
pub const DOMAIN_LID: u8 = 1;
pub const DOMAIN_HOSTED: u8 = 128;
pub const DOMAIN_HOSTED_LID: u8 = 129;

pub const NIBBLE_ALPHABET: &[u8; 12] = b"0123456789-.";
pub const HEX_ALPHABET: &[u8; 16] = b"0123456789ABCDEF";

// ----------------------------------------------------------------------------
// Dictionaries
// ----------------------------------------------------------------------------

pub static SINGLE_BYTE_TOKENS: [&str; 236] = [
    "", "xmlstreamstart", "xmlstreamend", "s.whatsapp.net", "type", "participant", "from",
    "receipt", "id", "notification", "disappearing_mode", "status", "jid", "broadcast", "user",
    "devices", "device_hash", "to", "offline", "message", "result", "class", "xmlns", "duration",
    "notify", "iq", "t", "ack", "g.us", "enc", "urn:xmpp:whatsapp:push", "presence",
    "config_value", "picture", "verified_name", "config_code", "key-index-list", "contact",
    "mediatype", "routing_info", "edge_routing", "get", "read", "urn:xmpp:ping",
    "fallback_hostname", "0", "chatstate", "business_hours_config", "unavailable",
    "download_buckets", "skmsg", "verified_level", "composing", "handshake", "device-list",
    "media", "text", "fallback_ip4", "media_conn", "device", "creation", "location", "config",
    "item", "fallback_ip6", "count", "w:profile:picture", "image", "business", "2", "hostname",
    "call-creator", "display_name", "relaylatency", "platform", "abprops", "success", "msg",
    "offline_preview", "prop", "key-index", "v", "day_of_week", "pkmsg", "version", "1", "ping",
    "w:p", "download", "video", "set", "specific_hours", "props", "primary", "unknown", "hash",
    "commerce_experience", "last", "subscribe", "max_buckets", "call", "profile",
    "member_since_text", "close_time", "call-id", "sticker", "mode", "participants", "value",
    "query", "profile_options", "open_time", "code", "list", "host", "ts", "contacts", "upload",
    "lid", "preview", "update", "usync", "w:stats", "delivery", "auth_ttl", "context", "fail",
    "cart_enabled", "appdata", "category", "atn", "direct_connection", "decrypt-fail", "relay_id",
    "mmg-fallback.whatsapp.net", "target", "available", "name", "last_id", "mmg.whatsapp.net",
    "categories", "401", "is_new", "index", "tctoken", "ip4", "token_id", "latency", "recipient",
    "edit", "ip6", "add", "thumbnail-document", "26", "paused", "true", "identity", "stream:error",
    "key", "sidelist", "background", "audio", "3", "thumbnail-image", "biz-cover-photo", "cat",
    "gcm", "thumbnail-video", "error", "auth", "deny", "serial", "in", "registration",
    "thumbnail-link", "remove", "00", "gif", "thumbnail-gif", "tag", "capability", "multicast",
    "item-not-found", "description", "business_hours", "config_expo_key", "md-app-state",
    "expiration", "fallback", "ttl", "300", "md-msg-hist", "device_orientation", "out", "w:m",
    "open_24h", "side_list", "token", "inactive", "01", "document", "te2", "played", "encrypt",
    "msgr", "hide", "direct_path", "12", "state", "not-authorized", "url", "terminate",
    "signature", "status-revoke-delay", "02", "te", "linked_accounts", "trusted_contact",
    "timezone", "ptt", "kyc-id", "privacy_token", "readreceipts", "appointment_only", "address",
    "expected_ts", "privacy", "7", "android", "interactive", "device-identity", "enabled",
    "attribute_padding", "1080", "03", "screen_height",
];

static DOUBLE_BYTE_TOKENS_0: [&str; 102] = [
    "read-self", "active", "fbns", "protocol", "reaction", "screen_width", "heartbeat", "deviceid",
    "2:47DEQpj8", "uploadfieldstat", "voip_settings", "retry", "priority", "longitude", "conflict",
    "false", "ig_professional", "replaced", "preaccept", "cover_photo", "uncompressed", "encopt",
    "ppic", "04", "passive", "status-revoke-drop", "keygen", "540", "offer", "rate", "opus",
    "latitude", "w:gp2", "ver", "4", "business_profile", "medium", "sender", "prev_v_id", "email",
    "website", "invited", "sign_credential", "05", "transport", "skey", "reason",
    "peer_abtest_bucket", "America/Sao_Paulo", "appid", "refresh", "100", "06", "404", "101",
    "104", "107", "102", "109", "103", "member_add_mode", "105", "transaction-id", "110", "106",
    "outgoing", "108", "111", "tokens", "followers", "cell_down", "invite", "vname", "dirty",
    "pushname", "w:sync:app:state", "collection", "patch", "snapshot", "return_snapshot",
    "server_sync", "critical_block", "critical_unblock_low", "regular_high", "regular_low",
    "regular", "encrypt_v2", "plaintext", "w:g2", "newsletter", "server_id", "reactions",
    "edit_attr", "meta", "target_chat_jid", "target_sender_jid", "peer", "hist_sync",
    "inactive_participant", "retry_count", "placeholder", "message_secret",
];

/// Dictionaries selected by tags 236..=239. Only the first is populated; the
/// remaining selectors decode to an error.
pub static DOUBLE_BYTE_TOKENS: [&[&str]; 4] = [&DOUBLE_BYTE_TOKENS_0, &[], &[], &[]];

/// Position of a string in the dictionaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenIndex {
    Single(u8),
    Double { dictionary: u8, index: u8 },
}

fn index() -> &'static HashMap<&'static str, TokenIndex> {
    static INDEX: OnceLock<HashMap<&'static str, TokenIndex>> = OnceLock::new();
    INDEX.get_or_init(|| {
        let mut map = HashMap::new();
        for (dictionary, tokens) in DOUBLE_BYTE_TOKENS.iter().enumerate() {
            for (index, token) in tokens.iter().enumerate() {
                map.insert(
                    *token,
                    TokenIndex::Double {
                        dictionary: dictionary as u8,
                        index: index as u8,
                    },
                );
            }
        }
        // Single-byte entries win over double-byte ones. Index 0 is the empty
        // string, which shares its byte with LIST_EMPTY.
        for (index, token) in SINGLE_BYTE_TOKENS.iter().enumerate() {
            map.insert(*token, TokenIndex::Single(index as u8));
        }
        map
    })
}

/// Find the dictionary slot of a string
pub fn index_of(token: &str) -> Option<TokenIndex> {
    index().get(token).copied()
}

pub fn single_byte(index: u8) -> Option<&'static str> {
    SINGLE_BYTE_TOKENS.get(usize::from(index)).copied()
}

pub fn double_byte(dictionary: u8, index: u8) -> Option<&'static str> {
    DOUBLE_BYTE_TOKENS
        .get(usize::from(dictionary))?
        .get(usize::from(index))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_byte_range_stays_below_tags() {
        assert!(SINGLE_BYTE_TOKENS.len() <= usize::from(DICTIONARY_0));
    }

    #[test]
    fn test_lookup_is_consistent() {
        for (i, token) in SINGLE_BYTE_TOKENS.iter().enumerate() {
            assert_eq!(index_of(token), Some(TokenIndex::Single(i as u8)));
        }
        assert_eq!(
            index_of("read-self"),
            Some(TokenIndex::Double {
                dictionary: 0,
                index: 0
            })
        );
        assert_eq!(double_byte(0, 0), Some("read-self"));
        assert_eq!(double_byte(1, 0), None);
        assert_eq!(index_of("definitely-not-a-token"), None);
    }

    #[test]
    fn test_well_known_tokens() {
        assert_eq!(single_byte(3), Some("s.whatsapp.net"));
        assert_eq!(index_of("message"), Some(TokenIndex::Single(19)));
    }
}
