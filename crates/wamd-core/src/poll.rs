//! Poll vote encryption
//!
//! Votes are encrypted under a per-voter key derived from the poll's secret
//! with HKDF, using the poll id and both user JIDs as context. The AES-GCM
//! additional data binds the ciphertext to the poll id and the voter, so a
//! vote copied into another poll or attributed to another voter fails to
//! open.

use prost::Message as _;
use rand_core::{OsRng, RngCore};

use crate::crypto::{aes_gcm_decrypt, aes_gcm_encrypt, hkdf_sha256, sha256};
use crate::errors::CryptographicError;
use crate::jid::Jid;
use crate::proto::{PollCreationMessage, PollEncValue, PollVoteMessage};

const VOTE_INFO_SUFFIX: &[u8] = b"Poll Vote";

pub const VOTE_IV_LENGTH: usize = 12;

/// Identifies a vote's context: which poll, who created it, who voted
#[derive(Debug, Clone)]
pub struct VoteContext<'a> {
    pub poll_id: &'a str,
    pub poll_creator: &'a Jid,
    pub voter: &'a Jid,
}

impl VoteContext<'_> {
    fn info(&self) -> Vec<u8> {
        let mut info = Vec::new();
        info.extend_from_slice(self.poll_id.as_bytes());
        info.extend_from_slice(self.poll_creator.to_user_jid().to_string().as_bytes());
        info.extend_from_slice(self.voter.to_user_jid().to_string().as_bytes());
        info.extend_from_slice(VOTE_INFO_SUFFIX);
        info
    }

    fn additional_data(&self) -> Vec<u8> {
        format!("{}\0{}", self.poll_id, self.voter.to_user_jid()).into_bytes()
    }
}

/// Single-use vote key
pub fn derive_vote_key(enc_key: &[u8], context: &VoteContext<'_>) -> Result<Vec<u8>, CryptographicError> {
    hkdf_sha256(None, enc_key, &context.info(), 32)
}

/// Hash a poll option name the way votes reference it
pub fn option_hash(name: &str) -> [u8; 32] {
    sha256(name.as_bytes())
}

pub fn encrypt_vote(
    selected_options: &[Vec<u8>],
    enc_key: &[u8],
    context: &VoteContext<'_>,
) -> Result<PollEncValue, CryptographicError> {
    let mut iv = [0u8; VOTE_IV_LENGTH];
    OsRng.fill_bytes(&mut iv);
    encrypt_vote_with_iv(selected_options, enc_key, context, iv)
}

pub fn encrypt_vote_with_iv(
    selected_options: &[Vec<u8>],
    enc_key: &[u8],
    context: &VoteContext<'_>,
    iv: [u8; VOTE_IV_LENGTH],
) -> Result<PollEncValue, CryptographicError> {
    let key = derive_vote_key(enc_key, context)?;
    let plaintext = PollVoteMessage {
        selected_options: selected_options.to_vec(),
    }
    .encode_to_vec();
    let payload = aes_gcm_encrypt(&key, &iv, &plaintext, &context.additional_data())?;
    Ok(PollEncValue {
        enc_payload: Some(payload),
        enc_iv: Some(iv.to_vec()),
    })
}

/// Open a vote; any mismatch in key, poll id or voter fails
pub fn decrypt_vote(
    value: &PollEncValue,
    enc_key: &[u8],
    context: &VoteContext<'_>,
) -> Result<PollVoteMessage, CryptographicError> {
    let payload = value
        .enc_payload
        .as_deref()
        .ok_or_else(|| CryptographicError::invalid_message("vote has no payload"))?;
    let iv = value
        .enc_iv
        .as_deref()
        .ok_or_else(|| CryptographicError::invalid_message("vote has no iv"))?;
    let key = derive_vote_key(enc_key, context)?;
    let plaintext = aes_gcm_decrypt(&key, iv, payload, &context.additional_data())?;
    PollVoteMessage::decode(plaintext.as_slice())
        .map_err(|err| CryptographicError::invalid_message(err.to_string()))
}

/// Option names whose hashes appear in the vote, in poll order
pub fn selected_option_names(creation: &PollCreationMessage, vote: &PollVoteMessage) -> Vec<String> {
    creation
        .options
        .iter()
        .filter_map(|option| option.option_name.as_deref())
        .filter(|name| {
            let hash = option_hash(name);
            vote.selected_options
                .iter()
                .any(|selected| selected.as_slice() == hash.as_slice())
        })
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::PollOption;

    fn jids() -> (Jid, Jid) {
        (
            Jid::parse("15550001111@s.whatsapp.net").unwrap(),
            Jid::parse("15550002222:3@s.whatsapp.net").unwrap(),
        )
    }

    #[test]
    fn test_vote_round_trip() {
        let (creator, voter) = jids();
        let context = VoteContext {
            poll_id: "3EB0AABBCCDD",
            poll_creator: &creator,
            voter: &voter,
        };
        let selected = vec![option_hash("Pizza").to_vec(), option_hash("Tacos").to_vec()];
        let enc_key = [42u8; 32];

        let value = encrypt_vote(&selected, &enc_key, &context).unwrap();
        let vote = decrypt_vote(&value, &enc_key, &context).unwrap();
        assert_eq!(vote.selected_options, selected);

        let creation = PollCreationMessage {
            enc_key: Some(enc_key.to_vec()),
            name: Some("Lunch".into()),
            options: ["Pizza", "Sushi", "Tacos"]
                .iter()
                .map(|name| PollOption {
                    option_name: Some((*name).into()),
                })
                .collect(),
            selectable_options_count: Some(0),
        };
        assert_eq!(selected_option_names(&creation, &vote), vec!["Pizza", "Tacos"]);
    }

    #[test]
    fn test_vote_bound_to_voter_and_poll() {
        let (creator, voter) = jids();
        let context = VoteContext {
            poll_id: "3EB0AABBCCDD",
            poll_creator: &creator,
            voter: &voter,
        };
        let value = encrypt_vote(&[option_hash("A").to_vec()], &[1u8; 32], &context).unwrap();

        let other_poll = VoteContext {
            poll_id: "3EB0FFFFFFFF",
            ..context.clone()
        };
        assert_eq!(
            decrypt_vote(&value, &[1u8; 32], &other_poll).unwrap_err(),
            CryptographicError::DecryptionFailed
        );

        let impostor = Jid::parse("15559999999@s.whatsapp.net").unwrap();
        let other_voter = VoteContext {
            voter: &impostor,
            ..context.clone()
        };
        assert!(decrypt_vote(&value, &[1u8; 32], &other_voter).is_err());
        assert!(decrypt_vote(&value, &[2u8; 32], &context).is_err());
    }

    #[test]
    fn test_voter_device_does_not_matter() {
        let (creator, voter) = jids();
        let primary = voter.to_user_jid();
        let sealed = encrypt_vote(
            &[option_hash("A").to_vec()],
            &[7u8; 32],
            &VoteContext {
                poll_id: "id",
                poll_creator: &creator,
                voter: &voter,
            },
        )
        .unwrap();
        let opened = decrypt_vote(
            &sealed,
            &[7u8; 32],
            &VoteContext {
                poll_id: "id",
                poll_creator: &creator,
                voter: &primary,
            },
        );
        assert!(opened.is_ok());
    }
}
