pub mod common;

use dkim_testmsg::{
    driver::{self, DriverError, ExitStatus, Mode, Options},
    signature::DkimSignature,
};
use std::io::{Cursor, ErrorKind};

fn parse_options(args: &[&str]) -> Options {
    Options::parse(args.iter().copied()).unwrap()
}

async fn run(
    args: &[&str],
    input: &[u8],
    resolver: &common::MockLookup,
) -> (Result<(), DriverError>, Vec<u8>) {
    let options = parse_options(args);
    let mut output = vec![];
    let result = driver::run(&options, Cursor::new(input), &mut output, resolver).await;
    (result, output)
}

fn no_dns() -> common::MockLookup {
    common::MockLookup::new(|_| Box::pin(async { Err(ErrorKind::NotFound.into()) }))
}

const SIGN_ARGS: &[&str] = &[
    "dkim-testmsg",
    "-d",
    "example.com",
    "-s",
    "sel",
    "-k",
    "tests/keys/rsa2048.pem",
    "-t",
    "1700000000",
];

#[tokio::test]
async fn sign_output_is_header_and_message() {
    let _ = tracing_subscriber::fmt::try_init();

    // bigger than one chunk, with bare LF line endings
    let mut message = b"From: me@example.com\nTo: you@example.org\nSubject: hi\n\n".to_vec();
    for i in 0..200 {
        message.extend(format!("line {i}\n").into_bytes());
    }

    let (result, output) = run(SIGN_ARGS, &message, &no_dns()).await;
    result.unwrap();

    assert!(output.starts_with(b"DKIM-Signature: v=1; a=rsa-sha256;"));
    assert!(output.ends_with(&message));

    let header_len = output.len() - message.len();
    let header = std::str::from_utf8(&output[..header_len]).unwrap();
    let value = header
        .strip_prefix("DKIM-Signature:")
        .and_then(|s| s.strip_suffix("\r\n"))
        .unwrap();
    assert!(!value.contains("\r\n\r\n"));

    let sig = DkimSignature::parse(value).unwrap();
    assert_eq!(sig.selector.as_ref(), "sel");
    assert_eq!(sig.timestamp, Some(1700000000));
}

#[tokio::test]
async fn sign_then_verify_output() {
    let _ = tracing_subscriber::fmt::try_init();

    let message = common::make_message();

    let (result, signed) = run(SIGN_ARGS, &message, &no_dns()).await;
    result.unwrap();

    let resolver = common::make_resolver("rsa", "tests/keys/rsa2048pub.pem").await;

    let (result, output) = run(&["dkim-testmsg"], &signed, &resolver).await;
    result.unwrap();
    assert!(output.is_empty());
}

#[tokio::test]
async fn sign_is_reproducible() {
    let _ = tracing_subscriber::fmt::try_init();

    let message = common::make_message();

    let (result1, output1) = run(SIGN_ARGS, &message, &no_dns()).await;
    let (result2, output2) = run(SIGN_ARGS, &message, &no_dns()).await;

    result1.unwrap();
    result2.unwrap();
    assert_eq!(output1, output2);
}

#[tokio::test]
async fn sign_with_ed25519() {
    let _ = tracing_subscriber::fmt::try_init();

    let message = common::make_message();

    let args = [
        "dkim-testmsg",
        "-dexample.com",
        "-ssel",
        "-ktests/keys/ed25519.pem",
        "-a",
        "ed25519-sha256",
    ];
    let (result, signed) = run(&args, &message, &no_dns()).await;
    result.unwrap();

    let resolver = common::make_resolver("ed25519", "tests/keys/ed25519pub.pem").await;

    let (result, _) = run(&["dkim-testmsg"], &signed, &resolver).await;
    result.unwrap();
}

#[tokio::test]
async fn unreadable_key_file() {
    let _ = tracing_subscriber::fmt::try_init();

    let args = ["prog", "-d", "example.com", "-s", "sel", "-k", "tests/keys/missing.pem"];
    let (result, output) = run(&args, &common::make_message(), &no_dns()).await;

    let error = result.unwrap_err();
    assert!(matches!(error, DriverError::Io { .. }));
    assert_eq!(error.exit_status(), ExitStatus::OsErr);
    assert!(error.to_string().starts_with("tests/keys/missing.pem: open(): "));
    assert!(output.is_empty());
}

#[tokio::test]
async fn invalid_key_material() {
    let _ = tracing_subscriber::fmt::try_init();

    let args = ["prog", "-d", "example.com", "-s", "sel", "-k", "tests/keys/ed25519pub.pem"];
    let (result, output) = run(&args, &common::make_message(), &no_dns()).await;

    let error = result.unwrap_err();
    assert_eq!(error.exit_status(), ExitStatus::Software);
    assert!(output.is_empty());
}

#[tokio::test]
async fn verify_unsigned_message() {
    let _ = tracing_subscriber::fmt::try_init();

    let options = parse_options(&["prog"]);
    assert_eq!(options.mode, Mode::Verify);

    let (result, output) = run(&["prog"], &common::make_message(), &no_dns()).await;

    let error = result.unwrap_err();
    assert_eq!(error.exit_status(), ExitStatus::Software);
    assert!(error.to_string().starts_with("eom: "));
    assert!(output.is_empty());
}

#[test]
fn partial_signing_options() {
    for args in [
        &["prog", "-d", "example.com"][..],
        &["prog", "-s", "sel", "-k", "key.pem"],
        &["prog", "-dexample.com", "-ssel"],
    ] {
        let error = Options::parse(args.iter().copied()).unwrap_err();
        assert_eq!(error.exit_status(), ExitStatus::Config);
    }
}
