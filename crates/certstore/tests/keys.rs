mod common;

use std::cell::RefCell;

use certstore::acl::AclUtility;
use certstore::env::software_key_path;
use certstore::ncrypt::{self, Phase};
use certstore::provider::flags;
use certstore::{
    Decrypter, DecrypterOptions, Error, HashAlgorithm, Key, PublicKey, Signer, Status,
};
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::SeedableRng;
use rsa::{Oaep, Pkcs1v15Sign};
use sha2::{Digest, Sha256};

use common::{
    CONTAINER, Failure, ScriptedProvider, platform_store, scripted_store, software_store,
};

const TEST_KEY_BITS: u32 = 1024;

#[test]
fn generated_rsa_key_signs_and_decrypts() {
    let (store, _) = platform_store(&[]);
    let key = store.generate(TEST_KEY_BITS).unwrap();
    assert_eq!(key.public().bits(), TEST_KEY_BITS as usize);
    assert_eq!(key.algorithm(), "RSA");

    let digest = Sha256::digest(b"attestation payload");
    let signature = key.sign(&digest, HashAlgorithm::Sha256).unwrap();
    let public = key.public().to_rsa().unwrap();
    public
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
        .unwrap();

    let mut rng = ChaCha20Rng::from_seed([3u8; 32]);
    let ciphertext = public
        .encrypt(&mut rng, Oaep::new::<Sha256>(), b"session secret")
        .unwrap();
    let plaintext = key
        .decrypt(&ciphertext, &DecrypterOptions::oaep(HashAlgorithm::Sha256))
        .unwrap();
    assert_eq!(plaintext, b"session secret");
}

#[test]
fn opening_returns_the_generated_key() {
    let (store, _) = platform_store(&[]);
    let generated = store.generate(TEST_KEY_BITS).unwrap();

    let opened = store.key().unwrap();
    assert!(matches!(opened, Key::Rsa(_)));
    assert_eq!(opened.public_key(), generated.public_key());
    assert!(opened.as_decrypter().is_some());
}

#[test]
fn missing_container_is_not_found() {
    let (store, _) = platform_store(&[]);
    let error = store.key().unwrap_err();
    assert!(error.is_not_found(), "unexpected error: {error:?}");
}

#[test]
fn ecdsa_key_signs_but_cannot_decrypt() {
    let (store, keys) = platform_store(&[]);
    let signing_key = p256::ecdsa::SigningKey::from_slice(&[9u8; 32]).unwrap();
    keys.import_ecdsa_p256(CONTAINER, signing_key.clone());

    let key = store.key().unwrap();
    assert!(key.as_decrypter().is_none());
    assert_eq!(key.algorithm(), "ECDSA");
    let PublicKey::Ecdsa(public) = key.public_key() else {
        panic!("expected an ECDSA public key");
    };
    let verifying_key = p256::ecdsa::VerifyingKey::from(public.to_p256().unwrap());
    assert_eq!(&verifying_key, signing_key.verifying_key());

    let digest = Sha256::digest(b"boot measurement");
    let signature = key.sign(&digest, HashAlgorithm::Sha256).unwrap();
    assert_eq!(signature.len(), 64);
    let signature = p256::ecdsa::Signature::from_slice(&signature).unwrap();
    verifying_key.verify_prehash(&digest, &signature).unwrap();
}

#[test]
fn software_keys_report_their_path_under_the_data_root() {
    let (store, keys) = software_store(Some(r"C:\ProgramData"));
    let key = store.generate(TEST_KEY_BITS).unwrap();
    let unique_name = keys.unique_name(CONTAINER).unwrap();
    assert_eq!(
        key.container(),
        software_key_path(r"C:\ProgramData", &unique_name)
    );
    assert_eq!(
        key.container(),
        format!(r"C:\ProgramData\Microsoft\Crypto\Keys\{unique_name}")
    );
}

#[test]
fn other_keys_keep_the_unique_name() {
    let (store, keys) = platform_store(&[]);
    let key = store.generate(TEST_KEY_BITS).unwrap();
    assert_eq!(key.container(), keys.unique_name(CONTAINER).unwrap());

    let (store, keys) = software_store(None);
    let key = store.generate(TEST_KEY_BITS).unwrap();
    assert_eq!(key.container(), keys.unique_name(CONTAINER).unwrap());
}

#[test]
fn key_handles_are_freed_on_drop() {
    let (store, keys) = platform_store(&[]);
    let generated = store.generate(TEST_KEY_BITS).unwrap();
    let opened = store.key().unwrap();
    assert_eq!(keys.open_handles(), 2);

    drop(generated);
    assert_eq!(keys.open_handles(), 1);
    drop(opened);
    assert_eq!(keys.open_handles(), 0);
}

#[test]
fn key_size_limit_is_inclusive() {
    let provider = ScriptedProvider::new();
    let store = scripted_store(&provider);

    assert!(matches!(
        store.generate(16385),
        Err(Error::UnsupportedKeySize(16385))
    ));
    assert!(provider.calls().is_empty());

    let key = store.generate(16384).unwrap();
    assert_eq!(key.public(), &ScriptedProvider::public_key());
    assert_eq!(key.container(), "scripted-unique-name");
    assert_eq!(
        provider.calls()[..4],
        [
            "create_persisted_key RSA fleet-machine-key 0xa0",
            "set_property Length 00400000 0x80000000",
            "set_property Key Usage 03000000 0x80000000",
            "finalize_key",
        ]
    );
}

#[test]
fn generate_rejects_a_non_rsa_result_and_frees_it() {
    let provider = ScriptedProvider::new().with_group("ECDSA");
    let store = scripted_store(&provider);

    match store.generate(2048) {
        Err(Error::UnsupportedKeyAlgorithm(group)) => assert_eq!(group, "ECDSA"),
        other => panic!("expected UnsupportedKeyAlgorithm, got {other:?}"),
    }
    assert_eq!(provider.freed(), 1);
}

#[test]
fn unknown_algorithm_group_is_rejected() {
    let provider = ScriptedProvider::new().with_group("DSA");
    let store = scripted_store(&provider);

    assert!(matches!(
        store.key(),
        Err(Error::UnsupportedKeyAlgorithm(group)) if group == "DSA"
    ));
    assert_eq!(provider.freed(), 1);
}

#[test]
fn unsupported_hash_never_reaches_the_provider() {
    let provider = ScriptedProvider::new();
    let store = scripted_store(&provider);
    let key = store.key().unwrap();
    provider.clear_calls();

    for hash in [HashAlgorithm::Md5, HashAlgorithm::Sha224] {
        assert!(matches!(
            key.sign(&[0u8; 16], hash),
            Err(Error::UnsupportedHashAlgorithm(_))
        ));
    }
    let Key::Rsa(rsa_key) = &key else {
        panic!("scripted key is RSA");
    };
    assert!(matches!(
        rsa_key.decrypt(b"cipher", &DecrypterOptions::oaep(HashAlgorithm::Md5)),
        Err(Error::UnsupportedHashAlgorithm(_))
    ));
    assert!(matches!(
        ncrypt::sign_ecdsa(&provider, &1, &[0u8; 28], HashAlgorithm::Sha224),
        Err(Error::UnsupportedHashAlgorithm(_))
    ));
    assert!(provider.calls().is_empty());
}

#[test]
fn rsa_sign_and_decrypt_pass_padding_descriptors() {
    let provider = ScriptedProvider::new();
    let store = scripted_store(&provider);
    let Key::Rsa(key) = store.key().unwrap() else {
        panic!("scripted key is RSA");
    };
    provider.clear_calls();

    let signature = key.sign(&[1u8; 32], HashAlgorithm::Sha256).unwrap();
    assert_eq!(signature, b"scripted-signature");
    let plaintext = key
        .decrypt(b"cipher", &DecrypterOptions::new(HashAlgorithm::Sha384, flags::PAD_OAEP))
        .unwrap();
    assert_eq!(plaintext, b"plaintext");

    assert_eq!(
        provider.calls(),
        [
            r#"sign_hash Some(Pkcs1 { algorithm: "SHA256" }) 32 0x2"#,
            r#"sign_hash Some(Pkcs1 { algorithm: "SHA256" }) 32 0x2"#,
            r#"decrypt Some(Oaep { algorithm: "SHA384", label: [] }) 6 0x4"#,
            r#"decrypt Some(Oaep { algorithm: "SHA384", label: [] }) 6 0x4"#,
        ]
    );
}

#[test]
fn failures_report_the_phase() {
    let provider =
        ScriptedProvider::new().failing_sign(Failure::Fill(Status::NTE_BUFFER_TOO_SMALL));
    let store = scripted_store(&provider);
    let key = store.key().unwrap();
    match key.sign(&[0u8; 20], HashAlgorithm::Sha1) {
        Err(Error::SigningFailed { code, phase }) => {
            assert_eq!(code, Status::NTE_BUFFER_TOO_SMALL);
            assert_eq!(phase, Phase::Fill);
        }
        other => panic!("expected SigningFailed, got {other:?}"),
    }

    let provider =
        ScriptedProvider::new().failing_export(Failure::Probe(Status::NTE_NOT_SUPPORTED));
    let store = scripted_store(&provider);
    match store.key() {
        Err(Error::ProviderCallFailed { call, code, phase }) => {
            assert_eq!(call, "NCryptExportKey");
            assert_eq!(code, Status::NTE_NOT_SUPPORTED);
            assert_eq!(phase, Phase::SizeProbe);
        }
        other => panic!("expected ProviderCallFailed, got {other:?}"),
    }
    assert_eq!(provider.freed(), 1);
}

#[test]
fn wide_string_properties_are_flattened() {
    let provider = ScriptedProvider::new();
    let name = ncrypt::string_property(&provider, &1, flags::PROPERTY_UNIQUE_NAME).unwrap();
    assert_eq!(name, "scripted-unique-name");
    let group = ncrypt::string_property(&provider, &1, flags::PROPERTY_ALGORITHM_GROUP).unwrap();
    assert_eq!(group, "RSA");
}

struct RecordingAcl(RefCell<Vec<String>>);

impl AclUtility for RecordingAcl {
    fn run(
        &self,
        path: &str,
        access: &str,
        principal: &str,
        permission: &str,
    ) -> std::io::Result<i32> {
        self.0
            .borrow_mut()
            .push(format!("{path} /{access} {principal}:{permission}"));
        Ok(0)
    }
}

#[test]
fn acl_is_applied_to_the_container_path() {
    let (store, keys) = software_store(Some(r"C:\ProgramData"));
    store.generate(TEST_KEY_BITS).unwrap();
    let key = store.key().unwrap();
    let acl = RecordingAcl(RefCell::new(Vec::new()));

    key.set_acl(&acl, "grant", "NT AUTHORITY\\NETWORK SERVICE", "R")
        .unwrap();

    let path = software_key_path(r"C:\ProgramData", &keys.unique_name(CONTAINER).unwrap());
    assert_eq!(
        acl.0.borrow().as_slice(),
        [format!(r"{path} /grant NT AUTHORITY\NETWORK SERVICE:R")]
    );
}
