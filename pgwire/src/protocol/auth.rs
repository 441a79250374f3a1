//! Client-side authentication for the PostgreSQL wire protocol
//!
//! [`AuthHandler`] is a state machine that consumes backend messages and
//! tells the caller what to send next. It performs no I/O itself; the
//! session drives it with messages read off the framer.
//!
//! Supported methods are trust (immediate AuthenticationOk), cleartext
//! password, MD5 and SCRAM-SHA-256 without channel binding.

use crate::error::{PgWireError, Result, ServerError};
use crate::protocol::message::{
    AuthenticationRequest, BackendKey, BackendMessage, FrontendMessage, ServerParameters,
    TransactionStatus, SCRAM_SHA_256,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use log::{debug, info, warn};
use rand::{thread_rng, Rng};
use serde::Serialize;
use std::fmt;
use wireprobe_core::crypto;

/// Bytes of entropy in a SCRAM client nonce
const CLIENT_NONCE_LEN: usize = 24;

/// Channel-binding header for "client does not support channel binding", base64-encoded
const GS2_HEADER_B64: &str = "biws";

/// Authentication state
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AuthState {
    /// Startup sent, waiting for the server's first authentication request
    AwaitingChallenge,

    /// Cleartext password sent, waiting for AuthenticationOk
    SentCleartext,

    /// MD5 response sent, waiting for AuthenticationOk
    SentMd5,

    /// SCRAM client-first sent, waiting for SASLContinue
    SaslInitial,

    /// SCRAM client-final sent, waiting for SASLFinal
    SaslContinue,

    /// Server signature checked, waiting for AuthenticationOk
    SaslFinal,

    /// Authenticated; collecting ParameterStatus and BackendKeyData
    DrainingBackendParams,

    /// ReadyForQuery received
    Ready,

    /// The exchange failed and cannot continue
    Aborted,
}

impl AuthState {
    /// Whether a credential has been sent and the server's verdict is pending
    fn awaiting_verdict(self) -> bool {
        matches!(
            self,
            AuthState::SentCleartext
                | AuthState::SentMd5
                | AuthState::SaslInitial
                | AuthState::SaslContinue
                | AuthState::SaslFinal
        )
    }
}

/// Authentication method
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize)]
pub enum AuthMethod {
    /// No authentication required (trust)
    #[serde(rename = "trust")]
    Trust,

    /// MD5 password authentication
    #[serde(rename = "md5")]
    Md5Password,

    /// SCRAM-SHA-256 authentication
    #[serde(rename = "scram-sha-256")]
    ScramSha256,

    /// Cleartext password authentication
    #[serde(rename = "password")]
    CleartextPassword,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Trust => write!(f, "trust"),
            AuthMethod::Md5Password => write!(f, "md5"),
            AuthMethod::ScramSha256 => write!(f, "scram-sha-256"),
            AuthMethod::CleartextPassword => write!(f, "password"),
        }
    }
}

/// What the caller must do after feeding a message to the handler
#[derive(Debug, PartialEq)]
pub enum AuthStep {
    /// Send this message, then read the next one
    Send(FrontendMessage),

    /// Nothing to send; read the next message
    Wait,

    /// The session is ready for queries
    Ready,
}

/// Everything learned while authenticating
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    /// Method the server asked for
    pub method: AuthMethod,

    /// ParameterStatus values, last one wins
    pub parameters: ServerParameters,

    /// BackendKeyData, when the server sent one
    pub backend_key: Option<BackendKey>,

    /// Transaction status from the first ReadyForQuery
    pub transaction_status: TransactionStatus,

    /// Result of the SCRAM server-signature check, `None` for other methods
    pub server_signature_verified: Option<bool>,
}

/// Client-side authentication state machine
#[derive(Debug)]
pub struct AuthHandler {
    user: String,
    password: Option<String>,
    verify_server_signature: bool,
    state: AuthState,
    method: Option<AuthMethod>,
    scram: Option<ScramExchange>,
    server_signature_verified: Option<bool>,
    parameters: ServerParameters,
    backend_key: Option<BackendKey>,
    transaction_status: Option<TransactionStatus>,
}

impl AuthHandler {
    /// Create a handler for one connection attempt
    pub fn new(user: impl Into<String>, password: Option<String>, verify_server_signature: bool) -> Self {
        Self {
            user: user.into(),
            password,
            verify_server_signature,
            state: AuthState::AwaitingChallenge,
            method: None,
            scram: None,
            server_signature_verified: None,
            parameters: ServerParameters::new(),
            backend_key: None,
            transaction_status: None,
        }
    }

    /// Current state
    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Method negotiated so far
    pub fn method(&self) -> Option<AuthMethod> {
        self.method
    }

    /// Feed the next backend message
    ///
    /// Any error leaves the handler in [`AuthState::Aborted`].
    pub fn handle(&mut self, message: BackendMessage) -> Result<AuthStep> {
        let result = self.step(message);
        if result.is_err() {
            self.state = AuthState::Aborted;
            self.scram = None;
        }
        result
    }

    /// Consume the handler once it is ready
    pub fn into_outcome(self) -> Result<AuthOutcome> {
        match (self.state, self.method, self.transaction_status) {
            (AuthState::Ready, Some(method), Some(transaction_status)) => Ok(AuthOutcome {
                method,
                parameters: self.parameters,
                backend_key: self.backend_key,
                transaction_status,
                server_signature_verified: self.server_signature_verified,
            }),
            (state, _, _) => Err(PgWireError::Auth(format!(
                "Authentication did not complete (state {:?})",
                state
            ))),
        }
    }

    fn step(&mut self, message: BackendMessage) -> Result<AuthStep> {
        match message {
            BackendMessage::NoticeResponse(fields) => {
                warn!("Server notice during startup: {}", fields.summary());
                return Ok(AuthStep::Wait);
            }
            BackendMessage::ErrorResponse(fields) => {
                let error = ServerError::from(&fields);
                return Err(if self.state.awaiting_verdict() {
                    PgWireError::AuthRejected(error)
                } else {
                    PgWireError::Server(error)
                });
            }
            _ => {}
        }

        match self.state {
            AuthState::AwaitingChallenge => self.on_challenge(message),
            AuthState::SentCleartext | AuthState::SentMd5 | AuthState::SaslFinal => match message {
                BackendMessage::Authentication(AuthenticationRequest::Ok) => Ok(self.authenticated()),
                other => Err(self.unexpected(&other)),
            },
            AuthState::SaslInitial => match message {
                BackendMessage::Authentication(AuthenticationRequest::SASLContinue { data }) => {
                    let scram = self.scram_mut()?;
                    let client_final = scram.handle_server_first(&data)?;
                    self.state = AuthState::SaslContinue;
                    Ok(AuthStep::Send(FrontendMessage::SaslResponse(Bytes::from(client_final))))
                }
                other => Err(self.unexpected(&other)),
            },
            AuthState::SaslContinue => match message {
                BackendMessage::Authentication(AuthenticationRequest::SASLFinal { data }) => {
                    let verify = self.verify_server_signature;
                    let verified = match self.scram_mut()?.verify_server_final(&data) {
                        Ok(()) => true,
                        Err(PgWireError::Integrity(reason)) if !verify => {
                            warn!("SCRAM server signature not verified: {}", reason);
                            false
                        }
                        Err(e) => return Err(e),
                    };
                    self.server_signature_verified = Some(verified);
                    self.scram = None;
                    self.state = AuthState::SaslFinal;
                    Ok(AuthStep::Wait)
                }
                other => Err(self.unexpected(&other)),
            },
            AuthState::DrainingBackendParams => match message {
                BackendMessage::ParameterStatus { name, value } => {
                    debug!("Server parameter {} = {}", name, value);
                    self.parameters.insert(name, value);
                    Ok(AuthStep::Wait)
                }
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.backend_key = Some(BackendKey {
                        process_id,
                        secret_key,
                    });
                    Ok(AuthStep::Wait)
                }
                BackendMessage::ReadyForQuery(status) => {
                    self.transaction_status = Some(status);
                    self.state = AuthState::Ready;
                    Ok(AuthStep::Ready)
                }
                other => Err(PgWireError::Protocol(format!(
                    "Unexpected {} while reading startup parameters",
                    other.name()
                ))),
            },
            AuthState::Ready | AuthState::Aborted => Err(PgWireError::Protocol(format!(
                "Unexpected {} after authentication finished",
                message.name()
            ))),
        }
    }

    fn on_challenge(&mut self, message: BackendMessage) -> Result<AuthStep> {
        let request = match message {
            BackendMessage::Authentication(request) => request,
            BackendMessage::NegotiateProtocolVersion {
                version_minor,
                options,
            } => {
                debug!(
                    "Server supports protocol 3.{}, unrecognized options {:?}",
                    version_minor, options
                );
                return Ok(AuthStep::Wait);
            }
            other => return Err(self.unexpected(&other)),
        };

        match request {
            AuthenticationRequest::Ok => {
                self.method = Some(AuthMethod::Trust);
                Ok(self.authenticated())
            }
            AuthenticationRequest::CleartextPassword => {
                self.method = Some(AuthMethod::CleartextPassword);
                let password = self.require_password()?.to_string();
                self.state = AuthState::SentCleartext;
                Ok(AuthStep::Send(FrontendMessage::Password(password)))
            }
            AuthenticationRequest::Md5Password { salt } => {
                self.method = Some(AuthMethod::Md5Password);
                let response = md5_password_response(&self.user, self.require_password()?, &salt);
                self.state = AuthState::SentMd5;
                Ok(AuthStep::Send(FrontendMessage::Password(response)))
            }
            AuthenticationRequest::SASL { mechanisms } => {
                if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
                    return Err(PgWireError::Auth(format!(
                        "No supported SASL mechanism among {:?}",
                        mechanisms
                    )));
                }
                self.method = Some(AuthMethod::ScramSha256);
                let scram = ScramExchange::new(self.require_password()?);
                let client_first = scram.client_first_message();
                self.scram = Some(scram);
                self.state = AuthState::SaslInitial;
                Ok(AuthStep::Send(FrontendMessage::SaslInitialResponse {
                    mechanism: SCRAM_SHA_256.to_string(),
                    data: Bytes::from(client_first),
                }))
            }
            other => Err(PgWireError::Auth(format!(
                "Unsupported authentication method: {}",
                other.name()
            ))),
        }
    }

    fn authenticated(&mut self) -> AuthStep {
        if let Some(method) = self.method {
            info!("Authenticated as {} with {}", self.user, method);
        }
        self.state = AuthState::DrainingBackendParams;
        AuthStep::Wait
    }

    fn require_password(&self) -> Result<&str> {
        self.password.as_deref().ok_or_else(|| {
            PgWireError::Auth(format!(
                "Server requested a password for {} but none is configured",
                self.user
            ))
        })
    }

    fn scram_mut(&mut self) -> Result<&mut ScramExchange> {
        self.scram
            .as_mut()
            .ok_or_else(|| PgWireError::Auth("SCRAM exchange is not in progress".to_string()))
    }

    fn unexpected(&self, message: &BackendMessage) -> PgWireError {
        let name = match message {
            BackendMessage::Authentication(request) => request.name(),
            other => other.name(),
        };
        PgWireError::Auth(format!("Unexpected {} in state {:?}", name, self.state))
    }
}

/// The legacy MD5 challenge response
///
/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub fn md5_password_response(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let inner = crypto::hash128_hex(format!("{}{}", password, user).as_bytes());

    let mut outer = Vec::with_capacity(inner.len() + salt.len());
    outer.extend_from_slice(inner.as_bytes());
    outer.extend_from_slice(salt);

    format!("md5{}", crypto::hash128_hex(&outer))
}

/// Client half of one SCRAM-SHA-256 exchange
///
/// Lives from the initial response until the server's final message and is
/// never reused for another connection.
pub struct ScramExchange {
    password: String,
    client_nonce: String,
    client_first_bare: String,
    server_key: Option<[u8; crypto::SHA256_LEN]>,
    auth_message: Option<String>,
}

impl fmt::Debug for ScramExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScramExchange")
            .field("client_nonce", &self.client_nonce)
            .field("finished_first_round", &self.auth_message.is_some())
            .finish()
    }
}

impl ScramExchange {
    /// Start an exchange with a fresh random nonce
    ///
    /// The user name is left empty in the client-first message; the server
    /// takes it from the startup packet.
    pub fn new(password: &str) -> Self {
        let mut nonce = [0u8; CLIENT_NONCE_LEN];
        thread_rng().fill(&mut nonce);
        Self::with_nonce("", password, &STANDARD.encode(nonce))
    }

    /// Start an exchange with a caller-chosen user name and nonce
    pub fn with_nonce(user: &str, password: &str, nonce: &str) -> Self {
        Self {
            password: password.to_string(),
            client_nonce: nonce.to_string(),
            client_first_bare: format!("n={},r={}", escape_saslname(user), nonce),
            server_key: None,
            auth_message: None,
        }
    }

    /// The client nonce
    pub fn client_nonce(&self) -> &str {
        &self.client_nonce
    }

    /// `client-first-message`, with the no-channel-binding GS2 header
    pub fn client_first_message(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// Process `server-first-message` and return `client-final-message`
    pub fn handle_server_first(&mut self, data: &[u8]) -> Result<String> {
        let server_first = std::str::from_utf8(data)
            .map_err(|_| PgWireError::Auth("SCRAM server-first-message is not UTF-8".to_string()))?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attribute in server_first.split(',') {
            match attribute.split_once('=') {
                Some(("r", value)) => nonce = Some(value),
                Some(("s", value)) => salt = Some(value),
                Some(("i", value)) => iterations = Some(value),
                Some(("m", _)) => {
                    return Err(PgWireError::Auth(
                        "SCRAM server requires an unsupported extension".to_string(),
                    ))
                }
                _ => {}
            }
        }

        let nonce = nonce.ok_or_else(|| missing_attribute("r"))?;
        let salt = salt.ok_or_else(|| missing_attribute("s"))?;
        let iterations = iterations.ok_or_else(|| missing_attribute("i"))?;

        if !nonce.starts_with(&self.client_nonce) || nonce.len() == self.client_nonce.len() {
            return Err(PgWireError::Auth(
                "SCRAM server nonce does not extend the client nonce".to_string(),
            ));
        }
        let salt = STANDARD
            .decode(salt)
            .map_err(|e| PgWireError::Auth(format!("Invalid SCRAM salt: {}", e)))?;
        let iterations: u32 = iterations
            .parse()
            .map_err(|_| PgWireError::Auth(format!("Invalid SCRAM iteration count: {}", iterations)))?;
        if iterations == 0 {
            return Err(PgWireError::Auth("SCRAM iteration count is zero".to_string()));
        }

        let salted_password =
            crypto::pbkdf2_sha256(self.password.as_bytes(), &salt, iterations, crypto::SHA256_LEN);
        let client_key = crypto::hmac_sha256(&salted_password, b"Client Key");
        let stored_key = crypto::sha256(&client_key);
        let server_key = crypto::hmac_sha256(&salted_password, b"Server Key");

        let client_final_without_proof = format!("c={},r={}", GS2_HEADER_B64, nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_without_proof
        );

        let client_signature = crypto::hmac_sha256(&stored_key, auth_message.as_bytes());
        let client_proof = crypto::xor_bytes(&client_key, &client_signature);

        self.server_key = Some(server_key);
        self.auth_message = Some(auth_message);

        Ok(format!(
            "{},p={}",
            client_final_without_proof,
            STANDARD.encode(client_proof)
        ))
    }

    /// Check `server-final-message` against the expected server signature
    pub fn verify_server_final(&self, data: &[u8]) -> Result<()> {
        let (server_key, auth_message) = match (&self.server_key, &self.auth_message) {
            (Some(key), Some(message)) => (key, message),
            _ => {
                return Err(PgWireError::Auth(
                    "SCRAM server-final-message arrived before server-first".to_string(),
                ))
            }
        };

        let server_final = std::str::from_utf8(data)
            .map_err(|_| PgWireError::Auth("SCRAM server-final-message is not UTF-8".to_string()))?;

        if let Some(error) = server_final.strip_prefix("e=") {
            return Err(PgWireError::Auth(format!("SCRAM exchange failed: {}", error)));
        }

        let verifier = server_final
            .split(',')
            .find_map(|attribute| attribute.strip_prefix("v="))
            .ok_or_else(|| {
                PgWireError::Integrity("SCRAM server-final-message has no verifier".to_string())
            })?;
        let received = STANDARD.decode(verifier).map_err(|e| {
            PgWireError::Integrity(format!("SCRAM server verifier is not base64: {}", e))
        })?;

        let expected = crypto::hmac_sha256(server_key, auth_message.as_bytes());
        if !crypto::verify_digest(&expected, &received) {
            return Err(PgWireError::Integrity(
                "SCRAM server signature does not match".to_string(),
            ));
        }
        Ok(())
    }
}

fn missing_attribute(name: &str) -> PgWireError {
    PgWireError::Auth(format!("SCRAM server-first-message lacks '{}='", name))
}

/// Escape `=` and `,` in a SCRAM user name
fn escape_saslname(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::ErrorOrNoticeFields;

    const RFC_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const RFC_SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";

    const PG_NONCE: &str = "fyko+d2lbbFgONRv9qkxdawL";
    const PG_SERVER_FIRST: &str =
        "r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096";
    const PG_SERVER_FINAL: &str = "v=xaSHVmJIoEtZlb962kZCsSuLU6o0x8stcBCTIjU+V8s=";

    fn auth(request: AuthenticationRequest) -> BackendMessage {
        BackendMessage::Authentication(request)
    }

    fn drain_to_ready(handler: &mut AuthHandler) {
        assert_eq!(
            handler
                .handle(BackendMessage::ParameterStatus {
                    name: "server_version".to_string(),
                    value: "16.2".to_string(),
                })
                .unwrap(),
            AuthStep::Wait
        );
        assert_eq!(
            handler
                .handle(BackendMessage::BackendKeyData {
                    process_id: 77,
                    secret_key: 1234,
                })
                .unwrap(),
            AuthStep::Wait
        );
        assert_eq!(
            handler
                .handle(BackendMessage::ReadyForQuery(TransactionStatus::Idle))
                .unwrap(),
            AuthStep::Ready
        );
    }

    #[test]
    fn test_md5_password_response() {
        assert_eq!(
            md5_password_response("myuser", "mypass", &[1, 2, 3, 4]),
            "md5445b563be9783591636c9662e37c8bc5"
        );
    }

    #[test]
    fn test_scram_rfc7677_vector() {
        let mut scram = ScramExchange::with_nonce("user", "pencil", RFC_NONCE);
        assert_eq!(scram.client_first_message(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

        let client_final = scram.handle_server_first(RFC_SERVER_FIRST.as_bytes()).unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
             p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );

        scram
            .verify_server_final(b"v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap();
    }

    #[test]
    fn test_scram_proof_is_deterministic() {
        let run = || {
            let mut scram = ScramExchange::with_nonce("", "secret", PG_NONCE);
            scram.handle_server_first(PG_SERVER_FIRST.as_bytes()).unwrap()
        };
        let first = run();
        assert_eq!(first, run());
        assert!(first.ends_with(",p=IcFmlTZxv8Xp3emH4ZkzssKSS3EiCuFC5Ow8p7f2RAU="));
    }

    #[test]
    fn test_scram_rejects_foreign_nonce() {
        let mut scram = ScramExchange::with_nonce("", "secret", PG_NONCE);
        let err = scram
            .handle_server_first(b"r=somebodyelse123,s=QSXCR+Q6sek8bf92,i=4096")
            .unwrap_err();
        assert!(err.is_auth(), "got {:?}", err);
    }

    #[test]
    fn test_scram_rejects_bad_server_first() {
        for server_first in [
            "r=fyko+d2lbbFgONRv9qkxdawLxyz,s=QSXCR+Q6sek8bf92,i=0",
            "r=fyko+d2lbbFgONRv9qkxdawLxyz,s=QSXCR+Q6sek8bf92",
            "r=fyko+d2lbbFgONRv9qkxdawLxyz,s=!!!,i=4096",
            "m=ext,r=fyko+d2lbbFgONRv9qkxdawLxyz,s=QSXCR+Q6sek8bf92,i=4096",
        ] {
            let mut scram = ScramExchange::with_nonce("", "secret", PG_NONCE);
            assert!(
                scram.handle_server_first(server_first.as_bytes()).unwrap_err().is_auth(),
                "accepted {}",
                server_first
            );
        }
    }

    #[test]
    fn test_scram_server_final_checks() {
        let mut scram = ScramExchange::with_nonce("", "secret", PG_NONCE);
        scram.handle_server_first(PG_SERVER_FIRST.as_bytes()).unwrap();

        scram.verify_server_final(PG_SERVER_FINAL.as_bytes()).unwrap();
        assert!(matches!(
            scram.verify_server_final(b"v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="),
            Err(PgWireError::Integrity(_))
        ));
        assert!(matches!(
            scram.verify_server_final(b"x=1"),
            Err(PgWireError::Integrity(_))
        ));
        assert!(matches!(
            scram.verify_server_final(b"e=invalid-proof"),
            Err(PgWireError::Auth(_))
        ));
    }

    #[test]
    fn test_random_nonce_is_fresh() {
        let a = ScramExchange::new("pw");
        let b = ScramExchange::new("pw");
        assert_ne!(a.client_nonce(), b.client_nonce());
        assert_eq!(STANDARD.decode(a.client_nonce()).unwrap().len(), CLIENT_NONCE_LEN);
        assert!(a.client_first_message().starts_with("n,,n=,r="));
    }

    #[test]
    fn test_trust_sends_nothing() {
        let mut handler = AuthHandler::new("alice", None, true);
        assert_eq!(handler.handle(auth(AuthenticationRequest::Ok)).unwrap(), AuthStep::Wait);
        assert_eq!(handler.state(), AuthState::DrainingBackendParams);
        drain_to_ready(&mut handler);

        let outcome = handler.into_outcome().unwrap();
        assert_eq!(outcome.method, AuthMethod::Trust);
        assert_eq!(outcome.parameters.get("server_version").map(String::as_str), Some("16.2"));
        assert_eq!(outcome.backend_key.map(|k| k.process_id), Some(77));
        assert_eq!(outcome.server_signature_verified, None);
    }

    #[test]
    fn test_cleartext_flow() {
        let mut handler = AuthHandler::new("alice", Some("hunter2".to_string()), true);
        assert_eq!(
            handler.handle(auth(AuthenticationRequest::CleartextPassword)).unwrap(),
            AuthStep::Send(FrontendMessage::Password("hunter2".to_string()))
        );
        assert_eq!(handler.state(), AuthState::SentCleartext);
        handler.handle(auth(AuthenticationRequest::Ok)).unwrap();
        drain_to_ready(&mut handler);
        assert_eq!(handler.into_outcome().unwrap().method, AuthMethod::CleartextPassword);
    }

    #[test]
    fn test_md5_flow() {
        let mut handler = AuthHandler::new("myuser", Some("mypass".to_string()), true);
        assert_eq!(
            handler
                .handle(auth(AuthenticationRequest::Md5Password { salt: [1, 2, 3, 4] }))
                .unwrap(),
            AuthStep::Send(FrontendMessage::Password(
                "md5445b563be9783591636c9662e37c8bc5".to_string()
            ))
        );
        assert_eq!(handler.state(), AuthState::SentMd5);
    }

    #[test]
    fn test_password_required() {
        let mut handler = AuthHandler::new("alice", None, true);
        let err = handler.handle(auth(AuthenticationRequest::CleartextPassword)).unwrap_err();
        assert!(err.is_auth());
        assert_eq!(handler.state(), AuthState::Aborted);
    }

    #[test]
    fn test_rejected_credential_is_auth_rejected() {
        let mut handler = AuthHandler::new("alice", Some("wrong".to_string()), true);
        handler.handle(auth(AuthenticationRequest::CleartextPassword)).unwrap();

        let err = handler
            .handle(BackendMessage::ErrorResponse(ErrorOrNoticeFields::new(
                "FATAL",
                "28P01",
                "password authentication failed for user \"alice\"",
            )))
            .unwrap_err();
        match err {
            PgWireError::AuthRejected(e) => {
                assert_eq!(e.message, "password authentication failed for user \"alice\"")
            }
            other => panic!("Expected AuthRejected, got {:?}", other),
        }
    }

    #[test]
    fn test_error_before_challenge_is_server_error() {
        let mut handler = AuthHandler::new("alice", None, true);
        let err = handler
            .handle(BackendMessage::ErrorResponse(ErrorOrNoticeFields::new(
                "FATAL",
                "3D000",
                "database \"nope\" does not exist",
            )))
            .unwrap_err();
        assert!(matches!(err, PgWireError::Server(_)));
    }

    #[test]
    fn test_unsupported_methods() {
        let mut handler = AuthHandler::new("alice", Some("pw".to_string()), true);
        assert!(handler.handle(auth(AuthenticationRequest::GSS)).unwrap_err().is_auth());

        let mut handler = AuthHandler::new("alice", Some("pw".to_string()), true);
        let err = handler
            .handle(auth(AuthenticationRequest::SASL {
                mechanisms: vec!["SCRAM-SHA-256-PLUS".to_string()],
            }))
            .unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn test_unexpected_message_aborts() {
        let mut handler = AuthHandler::new("alice", Some("pw".to_string()), true);
        handler.handle(auth(AuthenticationRequest::CleartextPassword)).unwrap();
        let err = handler
            .handle(auth(AuthenticationRequest::Md5Password { salt: [0; 4] }))
            .unwrap_err();
        assert!(err.is_auth());
        assert_eq!(handler.state(), AuthState::Aborted);
    }

    #[test]
    fn test_unexpected_message_while_draining_is_protocol_error() {
        let mut handler = AuthHandler::new("alice", None, true);
        handler.handle(auth(AuthenticationRequest::Ok)).unwrap();
        let err = handler
            .handle(BackendMessage::CommandComplete("SELECT 1".to_string()))
            .unwrap_err();
        assert!(matches!(err, PgWireError::Protocol(_)));
    }

    fn scram_handler(verify: bool) -> AuthHandler {
        let mut handler = AuthHandler::new("alice", Some("secret".to_string()), verify);
        handler
            .handle(auth(AuthenticationRequest::SASL {
                mechanisms: vec![SCRAM_SHA_256.to_string()],
            }))
            .unwrap();
        // Swap in a fixed nonce so the server messages below line up
        handler.scram = Some(ScramExchange::with_nonce("", "secret", PG_NONCE));
        handler
    }

    #[test]
    fn test_scram_flow() {
        let mut handler = scram_handler(true);
        match handler
            .handle(auth(AuthenticationRequest::SASLContinue {
                data: Bytes::from_static(PG_SERVER_FIRST.as_bytes()),
            }))
            .unwrap()
        {
            AuthStep::Send(FrontendMessage::SaslResponse(data)) => {
                assert!(data.starts_with(b"c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfc"));
            }
            other => panic!("Expected SASLResponse, got {:?}", other),
        }

        handler
            .handle(auth(AuthenticationRequest::SASLFinal {
                data: Bytes::from_static(PG_SERVER_FINAL.as_bytes()),
            }))
            .unwrap();
        assert_eq!(handler.state(), AuthState::SaslFinal);
        handler.handle(auth(AuthenticationRequest::Ok)).unwrap();
        drain_to_ready(&mut handler);

        let outcome = handler.into_outcome().unwrap();
        assert_eq!(outcome.method, AuthMethod::ScramSha256);
        assert_eq!(outcome.server_signature_verified, Some(true));
    }

    #[test]
    fn test_scram_bad_signature() {
        let bad_final = Bytes::from_static(b"v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=");

        let mut strict = scram_handler(true);
        strict
            .handle(auth(AuthenticationRequest::SASLContinue {
                data: Bytes::from_static(PG_SERVER_FIRST.as_bytes()),
            }))
            .unwrap();
        let err = strict
            .handle(auth(AuthenticationRequest::SASLFinal { data: bad_final.clone() }))
            .unwrap_err();
        assert!(matches!(err, PgWireError::Integrity(_)));

        let mut lenient = scram_handler(false);
        lenient
            .handle(auth(AuthenticationRequest::SASLContinue {
                data: Bytes::from_static(PG_SERVER_FIRST.as_bytes()),
            }))
            .unwrap();
        lenient
            .handle(auth(AuthenticationRequest::SASLFinal { data: bad_final }))
            .unwrap();
        lenient.handle(auth(AuthenticationRequest::Ok)).unwrap();
        drain_to_ready(&mut lenient);
        assert_eq!(lenient.into_outcome().unwrap().server_signature_verified, Some(false));
    }
}
