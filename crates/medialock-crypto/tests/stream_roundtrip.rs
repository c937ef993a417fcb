//! Integration tests for the encrypting/decrypting streams and the sidecar.
//!
//! Covers round-trips at arbitrary read granularities, chunking
//! independence, tamper detection, and the sidecar layout for a known
//! payload.

use medialock_crypto::{
    decrypting_stream, encrypting_stream, read_to_end, ByteSource, DecryptingEngine,
    EncryptingEngine, KeyBundle, MediaError, MediaType, MemorySource, RootKey, Sidecar,
    CHUNK_SIZE, MAC_SIZE,
};
use proptest::prelude::*;

const ZERO_KEY: [u8; 32] = [0u8; 32];

fn encrypt_with(
    data: &[u8],
    key: &[u8],
    media_type: MediaType,
    sidecar: bool,
    source_read: usize,
    read_size: usize,
) -> (Vec<u8>, Option<Sidecar>) {
    let source = MemorySource::new(data.to_vec()).with_max_read(source_read);
    let mut engine = encrypting_stream(source, key, media_type, sidecar).unwrap();
    let ciphertext = read_to_end(&mut engine, read_size).unwrap();
    (ciphertext, engine.into_sidecar().unwrap())
}

fn decrypt_with(
    ciphertext: &[u8],
    key: &[u8],
    media_type: MediaType,
    read_size: usize,
) -> Result<Vec<u8>, MediaError> {
    let mut engine = decrypting_stream(MemorySource::new(ciphertext.to_vec()), key, media_type)?;
    read_to_end(&mut engine, read_size)
}

#[test]
fn video_scenario_lengths() {
    let plaintext = vec![0x41u8; 100_000];
    let (ciphertext, sidecar) = encrypt_with(
        &plaintext,
        &ZERO_KEY,
        MediaType::Video,
        true,
        usize::MAX,
        8192,
    );

    let padded = (100_000 + 16) / 16 * 16;
    assert_eq!(ciphertext.len(), padded + MAC_SIZE);

    let body_len = ciphertext.len() - MAC_SIZE;
    let sidecar = sidecar.expect("sidecar requested");
    assert_eq!(sidecar.len(), 16 + 10 * body_len.div_ceil(CHUNK_SIZE));
    assert_eq!(sidecar.entry_count(), 2);

    let keys = KeyBundle::derive(&RootKey::from_bytes(ZERO_KEY), MediaType::Video).unwrap();
    assert_eq!(sidecar.iv(), keys.iv());

    assert_eq!(
        decrypt_with(&ciphertext, &ZERO_KEY, MediaType::Video, 8192).unwrap(),
        plaintext
    );
}

#[test]
fn sidecar_windows_verify_against_ciphertext() {
    let plaintext: Vec<u8> = (0..300_000u32).map(|i| (i % 256) as u8).collect();
    let (ciphertext, sidecar) =
        encrypt_with(&plaintext, &ZERO_KEY, MediaType::Audio, true, 5000, 4096);
    let sidecar = sidecar.unwrap();
    let keys = KeyBundle::derive(&RootKey::from_bytes(ZERO_KEY), MediaType::Audio).unwrap();

    let body = &ciphertext[..ciphertext.len() - MAC_SIZE];
    for i in 0..sidecar.entry_count() {
        let range = sidecar.window_range(i, body.len() as u64).unwrap();
        let window = &body[range.start as usize..range.end as usize];
        sidecar.verify_window(keys.mac_key(), i, window).unwrap();
    }
}

#[test]
fn sidecar_rebuilt_from_ciphertext_matches() {
    let plaintext = vec![0x7Fu8; 200_000];
    let (ciphertext, sidecar) =
        encrypt_with(&plaintext, &ZERO_KEY, MediaType::Video, true, usize::MAX, 65536);
    let keys = KeyBundle::derive(&RootKey::from_bytes(ZERO_KEY), MediaType::Video).unwrap();

    let rebuilt = Sidecar::from_ciphertext(&keys, &ciphertext).unwrap();
    assert_eq!(Some(rebuilt), sidecar);

    let mut tampered = ciphertext.clone();
    tampered[1234] ^= 0x10;
    assert!(matches!(
        Sidecar::from_ciphertext(&keys, &tampered),
        Err(MediaError::Integrity)
    ));
}

#[test]
fn sidecar_rejected_for_image_and_document() {
    for media_type in [MediaType::Image, MediaType::Document] {
        let mut source = MemorySource::new(b"test data".to_vec());
        let err = encrypting_stream(&mut source, &ZERO_KEY, media_type, true).unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedSidecarRequest(_)));
        assert!(!source.at_end(), "source must be untouched");
    }
}

#[test]
fn all_media_types_roundtrip() {
    let plaintext: Vec<u8> = (0..70_001u32).map(|i| (i * 31 % 256) as u8).collect();
    let key = RootKey::generate();
    for media_type in MediaType::ALL {
        let (ct, _) = encrypt_with(&plaintext, key.as_bytes(), media_type, false, 4096, 8192);
        assert!(!ct.is_empty());
        assert_eq!(
            decrypt_with(&ct, key.as_bytes(), media_type, 8192).unwrap(),
            plaintext,
            "{media_type}"
        );
    }
}

#[test]
fn engines_compose_without_intermediate_buffer() {
    let plaintext: Vec<u8> = (0..150_000u32).map(|i| (i ^ (i >> 5)) as u8).collect();
    let keys = || KeyBundle::derive(&RootKey::from_bytes([3u8; 32]), MediaType::Video).unwrap();

    let encrypting =
        EncryptingEngine::new(MemorySource::new(plaintext.clone()), keys(), true).unwrap();
    let mut decrypting = DecryptingEngine::new(encrypting, keys()).unwrap();

    assert_eq!(read_to_end(&mut decrypting, 10_000).unwrap(), plaintext);
    assert!(decrypting.at_end());
}

#[test]
fn empty_plaintext_is_authenticated() {
    let (ct, sidecar) = encrypt_with(b"", &ZERO_KEY, MediaType::Video, true, 1, 1);
    assert_eq!(ct.len(), 16 + MAC_SIZE);
    assert_eq!(sidecar.unwrap().entry_count(), 1);
    assert!(decrypt_with(&ct, &ZERO_KEY, MediaType::Video, 1).unwrap().is_empty());

    let mut forged = ct.clone();
    forged[0] ^= 1;
    assert!(matches!(
        decrypt_with(&forged, &ZERO_KEY, MediaType::Video, 1),
        Err(MediaError::Integrity)
    ));
}

#[test]
fn truncated_ciphertext_fails() {
    let (ct, _) = encrypt_with(&[9u8; 100_000], &ZERO_KEY, MediaType::Image, false, 65536, 8192);
    for cut in [1usize, MAC_SIZE, 16, CHUNK_SIZE] {
        let truncated = &ct[..ct.len() - cut];
        assert!(
            decrypt_with(truncated, &ZERO_KEY, MediaType::Image, 8192).is_err(),
            "truncating {cut} bytes must fail"
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn roundtrip_any_granularity(
        data in proptest::collection::vec(any::<u8>(), 0..=200_000),
        source_read in 1usize..=70_000,
        enc_read in 1usize..=70_000,
        dec_read in 1usize..=70_000,
    ) {
        let (ct, _) = encrypt_with(&data, &ZERO_KEY, MediaType::Document, false, source_read, enc_read);
        let pt = decrypt_with(&ct, &ZERO_KEY, MediaType::Document, dec_read).unwrap();
        prop_assert_eq!(pt, data);
    }

    #[test]
    fn chunking_independence(
        data in proptest::collection::vec(any::<u8>(), 0..=150_000),
        source_read in 1usize..=20_000,
        enc_read in 1usize..=20_000,
    ) {
        let (reference, ref_sidecar) =
            encrypt_with(&data, &ZERO_KEY, MediaType::Audio, true, usize::MAX, usize::MAX);
        let (chunked, sidecar) =
            encrypt_with(&data, &ZERO_KEY, MediaType::Audio, true, source_read, enc_read);
        prop_assert_eq!(chunked, reference);
        prop_assert_eq!(sidecar, ref_sidecar);
    }

    #[test]
    fn sidecar_shape(data in proptest::collection::vec(any::<u8>(), 0..=200_000)) {
        let (ct, sidecar) = encrypt_with(&data, &ZERO_KEY, MediaType::Video, true, 8192, 8192);
        let sidecar = sidecar.unwrap();
        let body_len = ct.len() - MAC_SIZE;

        prop_assert!(sidecar.entry_count() >= 1);
        prop_assert_eq!(sidecar.len(), 16 + 10 * sidecar.entry_count());
        prop_assert_eq!(sidecar.entry_count(), body_len.div_ceil(CHUNK_SIZE));
    }

    #[test]
    fn single_bit_flip_is_detected(
        data in proptest::collection::vec(any::<u8>(), 0..=80_000),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let (mut ct, _) = encrypt_with(&data, &ZERO_KEY, MediaType::Image, false, 65536, 65536);
        let idx = position.index(ct.len());
        ct[idx] ^= 1 << bit;

        let result = decrypt_with(&ct, &ZERO_KEY, MediaType::Image, 4096);
        prop_assert!(matches!(result, Err(MediaError::Integrity)));
    }
}
