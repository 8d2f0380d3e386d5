//! App-state patch scenarios through the store seam

use wamd_core::appstate::{
    required_key_ids, AppStateStore, InMemoryAppStateStore, LtHashState, PatchDecoder,
    PatchEncoder, PatchName, SyncAction, SyncKey,
};
use wamd_core::proto::SyncdOperation;
use wamd_core::{Jid, Timestamp};

const KEY_ID: &[u8] = &[0, 0, 0, 0, 0x2A, 0x01];

async fn store_with_key() -> InMemoryAppStateStore {
    let store = InMemoryAppStateStore::new();
    store
        .put_sync_key(SyncKey {
            key_id: KEY_ID.to_vec(),
            key_data: vec![0x11; 32],
            timestamp: Timestamp::new(1_700_000_000_000),
        })
        .await
        .unwrap();
    store
}

fn archive(user: &str, archived: bool) -> (SyncdOperation, SyncAction) {
    (
        SyncdOperation::Set,
        SyncAction::Archive {
            chat: Jid::parse(&format!("{user}@s.whatsapp.net")).unwrap(),
            archived,
        },
    )
}

#[tokio::test]
async fn test_sequential_patches_skip_replayed_version() {
    let store = store_with_key().await;
    let ring = store.key_ring(&[KEY_ID.to_vec()]).await.unwrap();
    let encoder = PatchEncoder::new(&ring);

    let base = LtHashState::new();
    let (patch_one, state_one) = encoder
        .encode_patch(&base, KEY_ID, PatchName::RegularLow, &[archive("1555", true)], Timestamp::new(10))
        .unwrap();
    let (patch_two, _) = encoder
        .encode_patch(&base, KEY_ID, PatchName::RegularLow, &[archive("1777", true)], Timestamp::new(11))
        .unwrap();
    assert_eq!(patch_two.version, patch_one.version);

    let patches = vec![patch_one, patch_two];
    let ring = store.key_ring(&required_key_ids(None, &patches)).await.unwrap();
    let (state, mutations) = PatchDecoder::new(&ring, true)
        .decode_patches(PatchName::RegularLow, &base, &patches)
        .unwrap();
    store.save_hash_state(PatchName::RegularLow, &state).await.unwrap();

    assert_eq!(state, state_one);
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].action, archive("1555", true).1);
    assert_eq!(
        store.hash_state(PatchName::RegularLow).await.unwrap().map(|state| state.version),
        Some(1)
    );
}

#[tokio::test]
async fn test_rejected_patch_keeps_stored_hash() {
    let store = store_with_key().await;
    let ring = store.key_ring(&[KEY_ID.to_vec()]).await.unwrap();
    let encoder = PatchEncoder::new(&ring);
    let decoder = PatchDecoder::new(&ring, true);

    let (first, _) = encoder
        .encode_patch(
            &LtHashState::new(),
            KEY_ID,
            PatchName::Regular,
            &[archive("1555", true)],
            Timestamp::new(1),
        )
        .unwrap();
    let (state, _) = decoder
        .decode_patch(PatchName::Regular, &LtHashState::new(), &first)
        .unwrap();
    store.save_hash_state(PatchName::Regular, &state).await.unwrap();

    let (mut second, _) = encoder
        .encode_patch(&state, KEY_ID, PatchName::Regular, &[archive("1555", false)], Timestamp::new(2))
        .unwrap();
    second.patch_mac = Some(vec![0u8; 32]);

    let stored = store.hash_state(PatchName::Regular).await.unwrap().unwrap();
    let err = decoder
        .decode_patches(PatchName::Regular, &stored, &[second])
        .unwrap_err();
    assert!(err.is_sync_integrity_failure());
    assert_eq!(store.hash_state(PatchName::Regular).await.unwrap(), Some(stored.clone()));
    assert_eq!(stored, state);
}

#[tokio::test]
async fn test_hash_state_survives_serialization() {
    let store = store_with_key().await;
    let ring = store.key_ring(&[KEY_ID.to_vec()]).await.unwrap();
    let (_, state) = PatchEncoder::new(&ring)
        .encode_patch(
            &LtHashState::new(),
            KEY_ID,
            PatchName::CriticalBlock,
            &[(
                SyncdOperation::Set,
                SyncAction::PushName {
                    name: "Alice".into(),
                },
            )],
            Timestamp::new(5),
        )
        .unwrap();
    let restored = LtHashState::deserialize(&state.serialize().unwrap()).unwrap();
    assert_eq!(restored, state);
}
