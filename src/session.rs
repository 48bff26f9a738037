// dkim-testmsg – sign or verify an email message with DKIM
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

//! Message sessions: chunked intake of one message for signing or
//! verification.

use crate::{
    crypto::SigningKey,
    header::HeaderFields,
    message_hash::BodyHasherStance,
    signer::{SignRequest, Signer, SignerError, SigningOutput},
    util::CrlfFixer,
    verifier::{Config, LookupTxt, VerificationResult, VerificationStatus, Verifier, VerifierError},
};
use bstr::ByteSlice;
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    mem,
};
use tracing::{debug, trace};

/// An error that occurs when creating an engine.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EngineError {
    ZeroLookupTimeout,
    ZeroMaxSignatures,
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroLookupTimeout => write!(f, "zero key lookup timeout"),
            Self::ZeroMaxSignatures => write!(f, "zero maximum number of signatures"),
        }
    }
}

impl Error for EngineError {}

/// An error that occurs while processing a message.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionError {
    /// The message header is malformed.
    Syntax,
    /// The operation is not allowed in the current state of the session.
    InvalidState,
    NoFromHeader,
    /// The message carries no `DKIM-Signature` header.
    NoSignature,
    Signing(SignerError),
    /// No signature verified; the error of the first one is given.
    Verification(VerifierError),
    /// No signature has been produced.
    NotSigned,
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax => write!(f, "syntax error in message header"),
            Self::InvalidState => write!(f, "invalid session state"),
            Self::NoFromHeader => write!(f, "no From header in message"),
            Self::NoSignature => write!(f, "no signature in message"),
            Self::Signing(e) => write!(f, "signing failed: {e}"),
            Self::Verification(e) => write!(f, "verification failed: {e}"),
            Self::NotSigned => write!(f, "message not signed"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Signing(e) => Some(e),
            Self::Verification(e) => Some(e),
            _ => None,
        }
    }
}

/// A DKIM engine, from which sessions are opened.
#[derive(Clone, Debug)]
pub struct Engine {
    config: Config,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self, EngineError> {
        if config.lookup_timeout.is_zero() {
            return Err(EngineError::ZeroLookupTimeout);
        }
        if config.max_signatures == 0 {
            return Err(EngineError::ZeroMaxSignatures);
        }

        Ok(Self { config })
    }

    /// Opens a session that signs one message.
    pub fn sign(&self, request: SignRequest<SigningKey>) -> Result<Session, SessionError> {
        let signer = Signer::prepare_signing(request).map_err(SessionError::Signing)?;

        Ok(Session::new(
            self.config.clone(),
            Task::Sign {
                signer: Some(signer),
                headers: None,
                output: None,
            },
        ))
    }

    /// Opens a session that verifies the signatures of one message.
    pub fn verify(&self) -> Session {
        Session::new(
            self.config.clone(),
            Task::Verify {
                verifier: None,
                results: None,
            },
        )
    }
}

enum Task {
    Sign {
        signer: Option<Signer<SigningKey>>,
        headers: Option<HeaderFields>,
        output: Option<SigningOutput>,
    },
    Verify {
        verifier: Option<Verifier>,
        results: Option<Vec<VerificationResult>>,
    },
}

enum Stage {
    Header(Vec<u8>),
    Body,
    EndOfMessage,
    Finished,
}

/// The processing of one message.
///
/// The message is given in chunks of arbitrary size with
/// [`chunk`][Session::chunk]. An empty chunk marks the end of the message,
/// after which [`eom`][Session::eom] completes signing or verification.
pub struct Session {
    config: Config,
    task: Task,
    stage: Stage,
    crlf_fixer: CrlfFixer,
    body_done: bool,
}

impl Session {
    fn new(config: Config, task: Task) -> Self {
        Self {
            config,
            task,
            stage: Stage::Header(vec![]),
            crlf_fixer: CrlfFixer::new(),
            body_done: false,
        }
    }

    /// Processes a chunk of the message. Line endings are normalized to CRLF.
    pub fn chunk(&mut self, chunk: &[u8]) -> Result<(), SessionError> {
        if chunk.is_empty() {
            return self.end_of_message();
        }

        let chunk = self.crlf_fixer.fix_chunk(chunk);

        match &mut self.stage {
            Stage::Header(buf) => {
                let from = buf.len().saturating_sub(3);
                buf.extend_from_slice(&chunk);

                if let Some((header_end, body_start)) = find_header_end(buf, from) {
                    let mut buf = mem::take(buf);
                    let body = buf.split_off(body_start);
                    buf.truncate(header_end);

                    self.begin_body(&buf)?;
                    self.body_chunk(&body);
                }
            }
            Stage::Body => self.body_chunk(&chunk),
            Stage::EndOfMessage | Stage::Finished => return Err(SessionError::InvalidState),
        }

        Ok(())
    }

    fn end_of_message(&mut self) -> Result<(), SessionError> {
        match mem::replace(&mut self.stage, Stage::EndOfMessage) {
            // a message without body: everything is header
            Stage::Header(buf) => self.begin_body(&buf)?,
            Stage::Body => {}
            stage => {
                self.stage = stage;
                return Err(SessionError::InvalidState);
            }
        }

        self.stage = Stage::EndOfMessage;

        Ok(())
    }

    fn begin_body(&mut self, header: &[u8]) -> Result<(), SessionError> {
        let headers = HeaderFields::parse_raw(header).map_err(|e| {
            debug!("cannot parse message header: {e}");
            SessionError::Syntax
        })?;

        trace!(fields = headers.len(), "message header complete");

        match &mut self.task {
            Task::Sign { headers: h, .. } => *h = Some(headers),
            Task::Verify { verifier, .. } => *verifier = Some(Verifier::new(headers, &self.config)),
        }

        self.stage = Stage::Body;

        Ok(())
    }

    fn body_chunk(&mut self, chunk: &[u8]) {
        if self.body_done || chunk.is_empty() {
            return;
        }

        let stance = match &mut self.task {
            Task::Sign {
                signer: Some(signer),
                ..
            } => signer.body_chunk(chunk),
            Task::Verify {
                verifier: Some(verifier),
                ..
            } => verifier.body_chunk(chunk),
            _ => return,
        };

        if stance == BodyHasherStance::Done {
            trace!("rest of body not needed");
            self.body_done = true;
        }
    }

    /// Completes processing of the message.
    ///
    /// In a signing session the signature is computed. In a verifying session
    /// the signatures are evaluated; the result is success if at least one of
    /// them verifies.
    pub async fn eom<T>(&mut self, resolver: &T) -> Result<(), SessionError>
    where
        T: LookupTxt + ?Sized,
    {
        if matches!(self.stage, Stage::Header(_) | Stage::Body) {
            self.end_of_message()?;
        }
        if !matches!(self.stage, Stage::EndOfMessage) {
            return Err(SessionError::InvalidState);
        }
        self.stage = Stage::Finished;

        match &mut self.task {
            Task::Sign {
                signer,
                headers,
                output,
            } => {
                let (signer, headers) = match (signer.take(), headers.take()) {
                    (Some(signer), Some(headers)) => (signer, headers),
                    _ => return Err(SessionError::InvalidState),
                };

                let signed = signer.finish(&headers).map_err(|e| match e {
                    SignerError::MissingFromHeader => SessionError::NoFromHeader,
                    e => SessionError::Signing(e),
                })?;

                debug!(
                    domain = %signed.signature.domain,
                    selector = %signed.signature.selector,
                    "message signed"
                );

                *output = Some(signed);

                Ok(())
            }
            Task::Verify { verifier, results } => {
                let verifier = verifier.take().ok_or(SessionError::InvalidState)?;

                if !verifier.has_signatures() {
                    *results = Some(vec![]);
                    return Err(SessionError::NoSignature);
                }

                let r = verifier.finish(resolver).await;
                let status = overall_status(&r);
                *results = Some(r);

                status
            }
        }
    }

    /// Returns the signature header field, without the final CRLF.
    pub fn signature_header(&self) -> Result<String, SessionError> {
        match &self.task {
            Task::Sign {
                output: Some(output),
                ..
            } => Ok(output.format_header()),
            Task::Sign { .. } => Err(SessionError::NotSigned),
            Task::Verify { .. } => Err(SessionError::InvalidState),
        }
    }

    /// Returns the signing result of a completed signing session.
    pub fn signing_output(&self) -> Option<&SigningOutput> {
        match &self.task {
            Task::Sign { output, .. } => output.as_ref(),
            Task::Verify { .. } => None,
        }
    }

    /// Returns the per-signature results of a completed verifying session.
    pub fn verification_results(&self) -> Option<&[VerificationResult]> {
        match &self.task {
            Task::Verify { results, .. } => results.as_deref(),
            Task::Sign { .. } => None,
        }
    }
}

fn find_header_end(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    // a message may begin with the empty line, ie with an empty header
    if buf.starts_with(b"\r\n") {
        return Some((0, 2));
    }

    buf[from..]
        .find(b"\r\n\r\n")
        .map(|i| (from + i + 2, from + i + 4))
}

fn overall_status(results: &[VerificationResult]) -> Result<(), SessionError> {
    if results.iter().any(|r| r.status == VerificationStatus::Success) {
        return Ok(());
    }

    match results.first() {
        Some(VerificationResult {
            status: VerificationStatus::Failure(e),
            ..
        }) => Err(SessionError::Verification(e.clone())),
        _ => Err(SessionError::NoSignature),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{DomainName, Selector, SignatureAlgorithm};

    fn make_engine() -> Engine {
        Engine::new(Config::default()).unwrap()
    }

    fn make_sign_session(engine: &Engine) -> Session {
        let key = SigningKey::from_key_data(include_bytes!("../tests/keys/ed25519.pem")).unwrap();
        let request = SignRequest::new(
            DomainName::new("example.com").unwrap(),
            Selector::new("sel").unwrap(),
            SignatureAlgorithm::Ed25519Sha256,
            key,
        );
        engine.sign(request).unwrap()
    }

    #[test]
    fn engine_config_checks() {
        let config = Config {
            max_signatures: 0,
            ..Default::default()
        };
        assert_eq!(Engine::new(config).unwrap_err(), EngineError::ZeroMaxSignatures);
    }

    #[test]
    fn find_header_end_ok() {
        assert_eq!(find_header_end(b"\r\nbody", 0), Some((0, 2)));
        assert_eq!(find_header_end(b"A: b\r\n\r\nbody", 0), Some((6, 8)));
        assert_eq!(find_header_end(b"A: b\r\n\r", 0), None);
    }

    #[tokio::test]
    async fn chunked_header_and_states() {
        let engine = make_engine();
        let mut session = make_sign_session(&engine);

        session.chunk(b"From: me\n").unwrap();
        session.chunk(b"To: you\r").unwrap();
        session.chunk(b"\n\r").unwrap();
        assert!(matches!(session.stage, Stage::Header(_)));
        session.chunk(b"\nhello\n").unwrap();
        assert!(matches!(session.stage, Stage::Body));

        session.chunk(b"").unwrap();
        assert_eq!(session.chunk(b"more"), Err(SessionError::InvalidState));
        assert_eq!(session.signature_header(), Err(SessionError::NotSigned));

        let resolver = NoLookup;
        session.eom(&resolver).await.unwrap();

        let header = session.signature_header().unwrap();
        assert!(header.starts_with("DKIM-Signature: v=1; a=ed25519-sha256;"));

        let output = session.signing_output().unwrap();
        assert_eq!(output.signature.signed_headers.len(), 2);

        assert_eq!(session.eom(&resolver).await, Err(SessionError::InvalidState));
    }

    #[tokio::test]
    async fn sign_errors() {
        let engine = make_engine();
        let resolver = NoLookup;

        let mut session = make_sign_session(&engine);
        session.chunk(b"From me\r\n\r\nbody\r\n").unwrap_err();

        let mut session = make_sign_session(&engine);
        session.chunk(b"To: you\r\n\r\nbody\r\n").unwrap();
        assert_eq!(session.eom(&resolver).await, Err(SessionError::NoFromHeader));
    }

    #[tokio::test]
    async fn verify_unsigned_message() {
        let engine = make_engine();
        let resolver = NoLookup;

        let mut session = engine.verify();
        session.chunk(b"From: me\r\n\r\nbody\r\n").unwrap();
        session.chunk(b"").unwrap();

        assert_eq!(session.eom(&resolver).await, Err(SessionError::NoSignature));
        assert_eq!(session.verification_results(), Some(&[][..]));
        assert_eq!(session.signature_header(), Err(SessionError::InvalidState));
    }

    struct NoLookup;

    impl LookupTxt for NoLookup {
        type Answer = Vec<std::io::Result<Vec<u8>>>;
        type Query<'a> = std::future::Ready<std::io::Result<Self::Answer>>;

        fn lookup_txt(&self, _: &str) -> Self::Query<'_> {
            std::future::ready(Err(std::io::ErrorKind::NotFound.into()))
        }
    }
}
