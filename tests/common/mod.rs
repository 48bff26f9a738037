use dkim_testmsg::{
    crypto::SigningKey,
    signature::{Canonicalization, CanonicalizationAlgorithm, DomainName, Selector},
    signer::{SignRequest, Timestamp},
    verifier::LookupTxt,
    Engine, SignatureAlgorithm,
};
use std::{
    future::Future,
    io::{self, ErrorKind},
    pin::Pin,
    sync::Arc,
};
use tokio::fs;

pub type LookupOutput = Vec<io::Result<Vec<u8>>>;
pub type LookupFuture<'a> = Pin<Box<dyn Future<Output = io::Result<LookupOutput>> + Send + 'a>>;

#[derive(Clone)]
pub struct MockLookup(Arc<dyn Fn(&str) -> LookupFuture<'_> + Send + Sync>);

impl MockLookup {
    pub fn new(f: impl Fn(&str) -> LookupFuture<'_> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// A resolver that answers with one record at one name, and NXDOMAIN
    /// everywhere else.
    pub fn with_record(name: &'static str, record: String) -> Self {
        Self::new(move |n| {
            let result = if n == name {
                Ok(vec![Ok(record.clone().into_bytes())])
            } else {
                Err(ErrorKind::NotFound.into())
            };
            Box::pin(async move { result })
        })
    }
}

impl LookupTxt for MockLookup {
    type Answer = LookupOutput;
    type Query<'a> = Pin<Box<dyn Future<Output = io::Result<Self::Answer>> + Send + 'a>>;

    fn lookup_txt(&self, domain: &str) -> Self::Query<'_> {
        let domain = domain.to_owned();

        Box::pin(async move { self.0(&domain).await })
    }
}

/// Reads the Base64 content of a PEM public key file, for use in p=.
pub async fn read_public_key_file_base64(file_name: &str) -> io::Result<String> {
    let s = fs::read_to_string(file_name).await?;
    let mut key_base64: Vec<_> = s.lines().skip(1).collect();
    key_base64.pop();
    Ok(key_base64.join(""))
}

pub async fn read_signing_key(file_name: &str) -> io::Result<SigningKey> {
    let s = fs::read(file_name).await?;
    Ok(SigningKey::from_key_data(&s).unwrap())
}

/// Makes a resolver that publishes the given public key at
/// `sel._domainkey.example.com`.
pub async fn make_resolver(key_type: &str, public_key_file: &str) -> MockLookup {
    let base64 = read_public_key_file_base64(public_key_file).await.unwrap();
    MockLookup::with_record(
        "sel._domainkey.example.com.",
        format!("v=DKIM1; k={key_type}; p={base64}"),
    )
}

/// Signs a message with domain `example.com` and selector `sel`, as the
/// command-line tool does, and returns the signature header.
pub async fn sign_message(
    algorithm: SignatureAlgorithm,
    key_file: &str,
    message: &[u8],
) -> String {
    let signing_key = read_signing_key(key_file).await.unwrap();

    let mut request = SignRequest::new(
        DomainName::new("example.com").unwrap(),
        Selector::new("sel").unwrap(),
        algorithm,
        signing_key,
    );
    request.canonicalization = Canonicalization {
        header: CanonicalizationAlgorithm::Relaxed,
        body: CanonicalizationAlgorithm::Simple,
    };
    request.timestamp = Some(Timestamp::Exact(1700000000));

    let engine = Engine::new(Default::default()).unwrap();
    let mut session = engine.sign(request).unwrap();

    for chunk in message.chunks(7) {
        session.chunk(chunk).unwrap();
    }
    session.chunk(&[]).unwrap();

    let resolver = MockLookup::new(|_| Box::pin(async { Err(ErrorKind::NotFound.into()) }));
    session.eom(&resolver).await.unwrap();

    session.signature_header().unwrap()
}

pub fn make_message() -> Vec<u8> {
    b"\
Received: from mail.example.com by mx.example.org; Mon, 6 Nov 2023 10:00:00 +0000\r
From: Joe <joe@example.com>\r
To: Suzie <suzie@example.org>\r
Subject: Is dinner\r
\tready?\r
Date: Mon, 6 Nov 2023 09:59:58 +0000\r
\r
Hi.\r
\r
We lost the game.   Are you hungry yet?\r
\r
Joe.\r
\r
\r
"
    .to_vec()
}
