//! Challenge-response handshake.
//!
//! ```text
//! Idle ──auth_request──→ RequestSent ──challenge──→ ChallengeReceived
//!                                                         │ wallet signs policy
//!                          Authenticated ←──ok── VerifySent
//!                                 any failure ──→ Failed
//! ```
//!
//! A stored credential is reused while its fingerprint matches and it has
//! not expired. A stored token lets `auth_verify` skip the wallet
//! signature; if the node refuses the token the credential is discarded
//! and the handshake restarts once with a fresh key.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};

use shared_bus::{EventPublisher, InMemoryEventBus, OrchestratorEvent};

use super::credential::{fingerprint, SessionCredential};
use crate::config::OrchestratorConfig;
use crate::domain::{Address, AuthState, OrchestratorError};
use crate::ports::{CredentialStore, SignerError, TypedData, WalletSigner};
use crate::protocol::{
    AuthChallenge, AuthRequestParams, AuthVerifyParams, AuthVerifyResult, Method,
};
use crate::rpc::RpcCorrelator;

/// Session authenticator.
pub struct Authenticator {
    config: Arc<OrchestratorConfig>,
    store: Arc<dyn CredentialStore>,
    rpc: Arc<RpcCorrelator>,
    bus: Arc<InMemoryEventBus>,
    state: Mutex<AuthState>,
    current: RwLock<Option<SessionCredential>>,
}

impl Authenticator {
    /// Create an authenticator.
    pub fn new(
        config: Arc<OrchestratorConfig>,
        store: Arc<dyn CredentialStore>,
        rpc: Arc<RpcCorrelator>,
        bus: Arc<InMemoryEventBus>,
    ) -> Self {
        Self {
            config,
            store,
            rpc,
            bus,
            state: Mutex::new(AuthState::Idle),
            current: RwLock::new(None),
        }
    }

    /// Handshake state.
    pub fn state(&self) -> AuthState {
        *self.state.lock()
    }

    /// Active credential.
    pub fn credential(&self) -> Option<SessionCredential> {
        self.current.read().clone()
    }

    /// Run the handshake for `wallet` within the auth deadline.
    ///
    /// Dropping the handshake on timeout drops its pending requests too.
    pub async fn authenticate(
        &self,
        wallet: Address,
        signer: &dyn WalletSigner,
    ) -> Result<SessionCredential, OrchestratorError> {
        let deadline = self.config.timeouts.auth();
        let outcome = match tokio::time::timeout(deadline, self.handshake(wallet, signer)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(OrchestratorError::AuthTimeout(deadline)),
        };

        match outcome {
            Ok(credential) => Ok(credential),
            Err(e) => {
                self.transition(AuthState::Failed);
                warn!(wallet = %wallet.short(), error = %e, "[cw-auth] Authentication failed");
                Err(e)
            }
        }
    }

    async fn handshake(
        &self,
        wallet: Address,
        signer: &dyn WalletSigner,
    ) -> Result<SessionCredential, OrchestratorError> {
        let credential = self.load_or_create(wallet)?;

        if credential.jwt.is_some() {
            match self.exchange(credential.clone(), signer, true).await {
                Ok(done) => return Ok(done),
                Err(OrchestratorError::AuthRejected(reason)) => {
                    info!(reason = %reason, "[cw-auth] Stored token refused, starting fresh");
                    self.store.invalidate(&wallet)?;
                    self.transition(AuthState::Failed);
                    let fresh = SessionCredential::generate(wallet, &self.config);
                    return self.exchange(fresh, signer, false).await;
                }
                Err(e) => return Err(e),
            }
        }

        self.exchange(credential, signer, false).await
    }

    fn load_or_create(&self, wallet: Address) -> Result<SessionCredential, OrchestratorError> {
        let expected = fingerprint(
            &self.config.asset,
            &self.config.scope,
            &self.config.application,
        );

        if let Some(stored) = self.store.get(&wallet)? {
            match SessionCredential::restore(&stored) {
                Ok(credential) if credential.is_usable(wallet, &expected) => {
                    debug!(session_key = %credential.key.address().short(), "[cw-auth] Reusing stored credential");
                    return Ok(credential);
                }
                Ok(_) => {
                    info!("[cw-auth] Stored credential stale or fingerprint changed");
                }
                Err(e) => {
                    warn!(error = %e, "[cw-auth] Stored credential unreadable");
                }
            }
            self.store.invalidate(&wallet)?;
        }

        Ok(SessionCredential::generate(wallet, &self.config))
    }

    async fn exchange(
        &self,
        mut credential: SessionCredential,
        signer: &dyn WalletSigner,
        with_token: bool,
    ) -> Result<SessionCredential, OrchestratorError> {
        let wallet = credential.wallet;
        let session_key = credential.key.address();

        self.transition(AuthState::RequestSent);
        let request = AuthRequestParams {
            address: wallet,
            session_key,
            application: self.config.application.clone(),
            allowances: credential.allowances.clone(),
            expires_at: credential.expires_at,
            scope: self.config.scope.clone(),
        };
        let challenge: AuthChallenge = self.rpc.call(Method::AuthRequest, &request).await?;
        self.transition(AuthState::ChallengeReceived);

        let verify = if with_token {
            AuthVerifyParams {
                challenge: challenge.challenge_message,
                signature: None,
                jwt: credential.jwt.clone(),
            }
        } else {
            let policy = TypedData::session_policy(
                &self.config.application,
                &challenge.challenge_message,
                &self.config.scope,
                wallet,
                session_key,
                credential.expires_at,
                &credential.allowances,
            );
            let signature = signer.sign_typed_data(&policy).await.map_err(|e| match e {
                SignerError::Rejected(reason) => OrchestratorError::AuthRejected(reason),
                SignerError::Failed(reason) => {
                    OrchestratorError::AuthRejected(format!("signer failed: {reason}"))
                }
            })?;
            AuthVerifyParams {
                challenge: challenge.challenge_message,
                signature: Some(signature),
                jwt: None,
            }
        };

        self.transition(AuthState::VerifySent);
        let result: AuthVerifyResult = self
            .rpc
            .call(Method::AuthVerify, &verify)
            .await
            .map_err(|e| match e {
                OrchestratorError::Remote(reason) => OrchestratorError::AuthRejected(reason),
                other => other,
            })?;

        if !result.success {
            return Err(OrchestratorError::AuthRejected(
                "node refused the session key".into(),
            ));
        }
        if result.session_key != session_key {
            return Err(OrchestratorError::AuthRejected(format!(
                "node activated {} instead of {}",
                result.session_key.short(),
                session_key.short()
            )));
        }

        if result.jwt_token.is_some() {
            credential.jwt = result.jwt_token;
        }
        self.store.put(&credential.to_stored())?;
        self.rpc.set_session_key(Some(credential.key.clone()));
        *self.current.write() = Some(credential.clone());
        self.transition(AuthState::Authenticated);

        self.bus.publish(OrchestratorEvent::Authenticated {
            wallet: wallet.to_string(),
            session_key: session_key.to_string(),
            expires_at: credential.expires_at,
        });
        info!(
            wallet = %wallet.short(),
            session_key = %session_key.short(),
            reused_token = with_token,
            "[cw-auth] Authenticated"
        );
        Ok(credential)
    }

    fn transition(&self, target: AuthState) {
        let mut state = self.state.lock();
        if state.can_transition_to(target) {
            debug!(from = ?*state, to = ?target, "[cw-auth] State change");
            *state = target;
        }
    }
}
