//! End-to-end loads through `SecureLoader` on real model trees.

mod common;

use std::fs;
use std::sync::Arc;
use std::thread;

use common::{
    empty_dict_stream, layer_stream, model_tree, os_system_stream, write_manifest,
};
use modelgate_core::admission::{ActivationKind, LayerKind};
use modelgate_core::{
    sha256_hex_bytes, verify, Advisory, DecodeError, IntegrityError, IntegrityVerdict, KnownType,
    LoadError, LoaderConfig, RecordingSink, RejectRule, SecureLoader, TrustManifest, TypeRef,
    Value, MANIFEST_FILE_NAME,
};

const ABC_DIGEST: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

fn loader_for(root: &std::path::Path) -> (SecureLoader, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let loader = SecureLoader::from_config_with_sink(&LoaderConfig::new(root), sink.clone())
        .expect("manifest loads");
    (loader, sink)
}

#[test]
fn test_tracked_file_loads_and_tamper_is_detected() {
    let stream = empty_dict_stream();
    let dir = model_tree(&[("m.bin", stream.as_slice())]);
    write_manifest(dir.path(), &[("m.bin", stream.as_slice())]);
    let (loader, sink) = loader_for(dir.path());

    assert_eq!(
        loader.verify_integrity("m.bin").unwrap(),
        IntegrityVerdict::Verified {
            path: "m.bin".to_string(),
            digest: sha256_hex_bytes(&stream),
        }
    );
    assert_eq!(loader.secure_load("m.bin", true).unwrap(), Value::Dict(vec![]));

    // Flip one byte
    let mut tampered = stream.clone();
    tampered[2] ^= 0x01;
    fs::write(dir.path().join("m.bin"), &tampered).unwrap();

    let err = loader.secure_load("m.bin", true).unwrap_err();
    match &err {
        LoadError::Integrity(IntegrityError::DigestMismatch {
            expected, actual, ..
        }) => {
            assert_eq!(expected, &sha256_hex_bytes(&stream));
            assert_eq!(actual, &sha256_hex_bytes(&tampered));
        }
        other => panic!("expected digest mismatch, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 4);
    assert!(sink.advisories().is_empty());
}

#[test]
fn test_tampered_malicious_file_fails_integrity_before_decoding() {
    let original = empty_dict_stream();
    let dir = model_tree(&[("beats/m.pkl", os_system_stream().as_slice())]);
    write_manifest(dir.path(), &[("beats/m.pkl", original.as_slice())]);
    let (loader, _) = loader_for(dir.path());

    let err = loader.load_model("beats/m.pkl").unwrap_err();
    assert!(matches!(err, LoadError::Integrity(_)), "{err:?}");
    assert!(err.blocked_reference().is_none());
}

#[test]
fn test_golden_bytes_verify_but_do_not_decode() {
    let dir = model_tree(&[("a/b.bin", &b"abc"[..])]);
    let mut manifest = TrustManifest::empty();
    manifest.insert("a/b.bin", ABC_DIGEST).unwrap();
    let sink = Arc::new(RecordingSink::new());
    let loader = SecureLoader::new(dir.path(), manifest).with_sink(sink.clone());

    let verdict = loader.verify_integrity("a/b.bin").unwrap();
    assert!(verdict.is_verified());

    match loader.secure_load("a/b.bin", true).unwrap_err() {
        LoadError::Unsafe { source, .. } => assert!(!source.is_unsafe(), "{source:?}"),
        other => panic!("expected decode failure, got {other:?}"),
    }
}

#[test]
fn test_free_verify_reports_mismatch_digests() {
    let dir = model_tree(&[("a/b.bin", &b"not abc"[..])]);
    let mut manifest = TrustManifest::empty();
    manifest.insert("a/b.bin", ABC_DIGEST).unwrap();

    let err = verify("a/b.bin", dir.path(), &manifest, &RecordingSink::new()).unwrap_err();

    match err {
        IntegrityError::DigestMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, ABC_DIGEST);
            assert_eq!(actual, sha256_hex_bytes(b"not abc"));
        }
        other => panic!("expected mismatch, got {other:?}"),
    }
}

#[test]
fn test_missing_manifest_is_tolerated() {
    let dir = model_tree(&[("m.pkl", layer_stream().as_slice())]);
    let (loader, sink) = loader_for(dir.path());

    assert_eq!(
        sink.take(),
        vec![Advisory::ManifestMissing {
            path: dir.path().join(MANIFEST_FILE_NAME)
        }]
    );
    assert_eq!(
        loader.verify_integrity("m.pkl").unwrap(),
        IntegrityVerdict::SkippedNoManifest
    );

    let value = loader.secure_load("m.pkl", true).unwrap();
    let layer = value.as_object().expect("layer object");
    assert_eq!(layer.kind(), Some(KnownType::Layer(LayerKind::FeedForward)));
    assert_eq!(
        layer.attribute("weights"),
        Some(&Value::List(vec![Value::Float(0.25), Value::Float(-0.5)]))
    );
    match layer.attribute("activation_fn") {
        Some(Value::Type(activation)) => assert_eq!(
            activation.kind(),
            Some(KnownType::Activation(ActivationKind::Softmax))
        ),
        other => panic!("expected activation type, got {other:?}"),
    }
    assert!(sink.advisories().is_empty());
}

#[test]
fn test_untracked_and_outside_files_load_with_advisories() {
    let stream = empty_dict_stream();
    let dir = model_tree(&[("tracked.pkl", stream.as_slice()), ("untracked.pkl", stream.as_slice())]);
    write_manifest(dir.path(), &[("tracked.pkl", stream.as_slice())]);
    let outside = model_tree(&[("elsewhere.pkl", stream.as_slice())]);
    let (loader, sink) = loader_for(dir.path());

    loader.secure_load("untracked.pkl", true).unwrap();
    loader
        .secure_load(outside.path().join("elsewhere.pkl"), true)
        .unwrap();

    let kinds: Vec<_> = sink.advisories().iter().map(Advisory::kind).collect();
    assert_eq!(kinds, vec!["not_tracked", "outside_tree"]);
}

#[test]
fn test_blocked_type_surfaces_as_unsafe() {
    let dir = model_tree(&[("evil.pkl", os_system_stream().as_slice())]);
    let (loader, _) = loader_for(dir.path());

    let err = loader.secure_load("evil.pkl", false).unwrap_err();

    assert_eq!(err.exit_code(), 3);
    assert_eq!(err.blocked_reference(), Some(&TypeRef::new("os", "system")));
    match err {
        LoadError::Unsafe {
            source: DecodeError::Unsafe(rejected),
            ..
        } => assert_eq!(rejected.rule, RejectRule::NotAllowed),
        other => panic!("expected blocked type, got {other:?}"),
    }
}

#[test]
fn test_unsafe_load_emits_exactly_one_advisory_per_call() {
    let dir = model_tree(&[("evil.pkl", os_system_stream().as_slice())]);
    let (loader, sink) = loader_for(dir.path());
    sink.take();

    assert!(loader.unsafe_load("evil.pkl").is_ok());
    assert_eq!(sink.take().len(), 1);

    assert!(matches!(
        loader.unsafe_load("missing.pkl"),
        Err(LoadError::NotFound { .. })
    ));
    let advisories = sink.take();
    assert_eq!(advisories.len(), 1);
    assert_eq!(advisories[0].kind(), "unsafe_load");

    fs::write(dir.path().join("broken.pkl"), b"\x80\x02}").unwrap();
    assert!(loader.unsafe_load("broken.pkl").is_err());
    assert_eq!(sink.take().len(), 1);
}

#[test]
fn test_strict_config_refuses_unverifiable_files() {
    let dir = model_tree(&[("m.pkl", empty_dict_stream().as_slice())]);
    let config_path = dir.path().join("modelgate.yaml");
    fs::write(&config_path, "root: .\nstrict_integrity: true\n").unwrap();

    let config = LoaderConfig::from_yaml_file(&config_path).unwrap();
    let loader =
        SecureLoader::from_config_with_sink(&config, Arc::new(RecordingSink::new())).unwrap();

    match loader.secure_load("m.pkl", true).unwrap_err() {
        LoadError::Unverifiable { verdict, .. } => {
            assert_eq!(verdict, IntegrityVerdict::SkippedNoManifest);
        }
        other => panic!("expected unverifiable, got {other:?}"),
    }
}

#[test]
fn test_malformed_manifest_is_fatal() {
    let dir = model_tree(&[("m.pkl", empty_dict_stream().as_slice())]);
    fs::write(dir.path().join(MANIFEST_FILE_NAME), "{\"models\": {\"m.pkl\": \"nope\"}}").unwrap();

    let err = SecureLoader::from_config(&LoaderConfig::new(dir.path())).unwrap_err();
    assert!(err.to_string().contains("invalid sha256 digest"));
    assert_eq!(LoadError::from(err).exit_code(), 2);
}

#[test]
fn test_concurrent_loads_share_one_loader() {
    let layer = layer_stream();
    let dict = empty_dict_stream();
    let dir = model_tree(&[("a/layer.pkl", layer.as_slice()), ("b/dict.pkl", dict.as_slice())]);
    write_manifest(dir.path(), &[("a/layer.pkl", layer.as_slice()), ("b/dict.pkl", dict.as_slice())]);
    let (loader, sink) = loader_for(dir.path());
    let loader = Arc::new(loader);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let loader = Arc::clone(&loader);
            thread::spawn(move || {
                for _ in 0..16 {
                    let relative = if i % 2 == 0 { "a/layer.pkl" } else { "b/dict.pkl" };
                    loader.load_model(relative).expect("load");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread");
    }

    // Cloned loaders share the manifest.
    let clone = (*loader).clone();
    assert_eq!(clone.manifest().len(), 2);
    assert!(sink.advisories().is_empty());
}

#[test]
fn test_limits_from_config_apply() {
    let dir = model_tree(&[("m.pkl", layer_stream().as_slice())]);
    let config = LoaderConfig::from_yaml("limits:\n  max_input_bytes: 8\n")
        .unwrap()
        .with_root(dir.path());
    let loader =
        SecureLoader::from_config_with_sink(&config, Arc::new(RecordingSink::new())).unwrap();

    match loader.secure_load("m.pkl", true).unwrap_err() {
        LoadError::Unsafe {
            source: DecodeError::LimitExceeded { limit, .. },
            ..
        } => assert_eq!(limit, "input bytes"),
        other => panic!("expected limit error, got {other:?}"),
    }
}
