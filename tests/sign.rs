pub mod common;

use dkim_testmsg::{
    signature::DkimSignature, DomainName, Engine, Selector, SessionError, SignRequest,
    SignatureAlgorithm, VerificationStatus,
};

#[tokio::test]
async fn sign_rsa_sha256() {
    let _ = tracing_subscriber::fmt::try_init();

    let message = common::make_message();

    let header =
        common::sign_message(SignatureAlgorithm::RsaSha256, "tests/keys/rsa2048.pem", &message)
            .await;

    let value = header.strip_prefix("DKIM-Signature: ").unwrap();
    let sig = DkimSignature::parse(value).unwrap();

    assert_eq!(sig.algorithm, SignatureAlgorithm::RsaSha256);
    assert_eq!(sig.canonicalization.to_string(), "relaxed/simple");
    assert_eq!(sig.domain.as_ref(), "example.com");
    assert_eq!(sig.timestamp, Some(1700000000));
    assert_eq!(sig.signature_data.len(), 256);

    let signed: Vec<_> = sig.signed_headers.iter().map(|h| h.as_ref()).collect();
    assert_eq!(signed, ["From", "To", "Subject", "Date"]);

    for line in header.split("\r\n") {
        assert!(line.len() <= 78, "line too long: {line:?}");
    }
    assert!(header.split("\r\n").skip(1).all(|line| line.starts_with('\t')));
}

#[tokio::test]
async fn sign_is_deterministic() {
    let _ = tracing_subscriber::fmt::try_init();

    let message = common::make_message();

    for (alg, key) in [
        (SignatureAlgorithm::RsaSha256, "tests/keys/rsa2048.pem"),
        (SignatureAlgorithm::RsaSha1, "tests/keys/rsa2048-pkcs1.pem"),
        (SignatureAlgorithm::Ed25519Sha256, "tests/keys/ed25519.pem"),
    ] {
        let header1 = common::sign_message(alg, key, &message).await;
        let header2 = common::sign_message(alg, key, &message).await;

        assert_eq!(header1, header2);
    }
}

#[tokio::test]
async fn sign_then_verify() {
    let _ = tracing_subscriber::fmt::try_init();

    let message = common::make_message();

    for (alg, key_type, key, public_key) in [
        (
            SignatureAlgorithm::RsaSha256,
            "rsa",
            "tests/keys/rsa2048.pem",
            "tests/keys/rsa2048pub.pem",
        ),
        (
            SignatureAlgorithm::Ed25519Sha256,
            "ed25519",
            "tests/keys/ed25519.pem",
            "tests/keys/ed25519pub.pem",
        ),
    ] {
        let header = common::sign_message(alg, key, &message).await;

        let mut signed_message = format!("{header}\r\n").into_bytes();
        signed_message.extend(&message);

        let resolver = common::make_resolver(key_type, public_key).await;

        let engine = Engine::new(Default::default()).unwrap();
        let mut session = engine.verify();

        for chunk in signed_message.chunks(1024) {
            session.chunk(chunk).unwrap();
        }
        session.chunk(&[]).unwrap();

        session.eom(&resolver).await.unwrap();

        let results = session.verification_results().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, VerificationStatus::Success);
        assert_eq!(results[0].index, 0);
    }
}

#[tokio::test]
async fn sign_bare_lf_message() {
    let _ = tracing_subscriber::fmt::try_init();

    let crlf_message = common::make_message();
    let lf_message: Vec<u8> = String::from_utf8(crlf_message.clone())
        .unwrap()
        .replace("\r\n", "\n")
        .into_bytes();

    let key = "tests/keys/ed25519.pem";
    let alg = SignatureAlgorithm::Ed25519Sha256;
    let header1 = common::sign_message(alg, key, &crlf_message).await;
    let header2 = common::sign_message(alg, key, &lf_message).await;

    assert_eq!(header1, header2);
}

#[tokio::test]
async fn sign_key_type_mismatch() {
    let _ = tracing_subscriber::fmt::try_init();

    let signing_key = common::read_signing_key("tests/keys/ed25519.pem").await.unwrap();
    let request = SignRequest::new(
        DomainName::new("example.com").unwrap(),
        Selector::new("sel").unwrap(),
        SignatureAlgorithm::RsaSha256,
        signing_key,
    );

    let engine = Engine::new(Default::default()).unwrap();

    assert!(matches!(engine.sign(request), Err(SessionError::Signing(_))));
}
