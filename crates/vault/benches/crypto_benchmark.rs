use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use keyward_vault::crypto::{CryptoEngine, KdfParams, SymmetricKey, decrypt, derive_key, encrypt};
use keyward_vault::mnemonic::{derive_from_mnemonic, sign_message};
use std::hint::black_box;
use std::time::Duration;

const PHRASE: &str = "test test test test test test test test test test test junk";

fn bench_key_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_derivation");
    group.measurement_time(Duration::from_secs(30)); // KDF is slow
    group.sample_size(10);

    let salt = [7u8; 16];
    let kdf_configs = [
        ("pbkdf2_100k", KdfParams::default()),
        (
            "pbkdf2_600k",
            KdfParams::Pbkdf2Sha256 { iterations: 600_000 },
        ),
        ("argon2id_default", KdfParams::argon2id_default()),
    ];

    for (name, params) in &kdf_configs {
        group.bench_with_input(BenchmarkId::new("derive", name), params, |b, params| {
            b.iter(|| black_box(derive_key("correct horse battery staple", &salt, params).unwrap()));
        });
    }

    group.finish();
}

fn bench_aead_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("aead_operations");
    group.measurement_time(Duration::from_secs(10));

    let key = SymmetricKey::random().unwrap();
    let associated_data = b"record-id\x1fprivate-key";

    // 32B private key and 12-word phrase sizes, plus a larger blob.
    for &size in &[32usize, 128, 4096] {
        let plaintext = vec![0u8; size];

        group.bench_with_input(BenchmarkId::new("encrypt", size), &plaintext, |b, plaintext| {
            b.iter(|| black_box(encrypt(&key, plaintext, associated_data).unwrap()));
        });

        let (ciphertext, iv) = encrypt(&key, &plaintext, associated_data).unwrap();

        group.bench_with_input(
            BenchmarkId::new("decrypt", size),
            &(&iv, &ciphertext),
            |b, (iv, ciphertext)| {
                b.iter(|| black_box(decrypt(&key, iv, ciphertext, associated_data).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_seal(c: &mut Criterion) {
    let mut group = c.benchmark_group("seal");
    group.measurement_time(Duration::from_secs(20));
    group.sample_size(10);

    let engine = CryptoEngine::new(KdfParams::default()).unwrap();
    let sealed = engine.seal("pw", &[1u8; 32], b"ad").unwrap();

    group.bench_function("seal_private_key", |b| {
        b.iter(|| black_box(engine.seal("pw", &[1u8; 32], b"ad").unwrap()));
    });
    group.bench_function("open_private_key", |b| {
        b.iter(|| black_box(engine.open("pw", &sealed, &KdfParams::default(), b"ad").unwrap()));
    });

    group.finish();
}

fn bench_mnemonic(c: &mut Criterion) {
    let mut group = c.benchmark_group("mnemonic");

    group.bench_function("derive_from_mnemonic", |b| {
        b.iter(|| black_box(derive_from_mnemonic(PHRASE).unwrap()));
    });

    let account = derive_from_mnemonic(PHRASE).unwrap();
    group.bench_function("sign_message", |b| {
        b.iter(|| black_box(sign_message(&account.private_key, b"hello").unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_key_derivation,
    bench_aead_operations,
    bench_seal,
    bench_mnemonic
);
criterion_main!(benches);
