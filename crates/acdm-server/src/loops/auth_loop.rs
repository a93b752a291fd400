//! Backend token lifecycle.
//!
//! Restores the saved token, validates it periodically and runs the browser
//! login when there is no usable token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use acdm_backend::{AuthStart, TokenState};
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::backoff::Backoff;
use crate::persistence::auth_tokens;
use crate::state::AppState;

const VALIDATE_INTERVAL_SECS: u64 = 300;
const LOGIN_TIMEOUT_SECS: u64 = 300;
const AUTH_BACKOFF_BASE_SECS: u64 = 5;
const AUTH_BACKOFF_MAX_SECS: u64 = 300;

struct PendingLogin {
    start: AuthStart,
    started: Instant,
}

#[derive(Debug, PartialEq, Eq)]
enum LoginStep {
    Poll,
    /// Login window closed; the next login waits until `retry_at`.
    GiveUp { retry_at: Instant },
}

fn login_step(started: Instant, now: Instant) -> LoginStep {
    if now.saturating_duration_since(started) < Duration::from_secs(LOGIN_TIMEOUT_SECS) {
        return LoginStep::Poll;
    }
    LoginStep::GiveUp {
        retry_at: now + Duration::from_secs(VALIDATE_INTERVAL_SECS),
    }
}

pub async fn run_auth_loop(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    restore_token(&state).await;

    let mut ticker = interval(Duration::from_secs(1));
    let mut backoff = Backoff::new(
        Duration::from_secs(AUTH_BACKOFF_BASE_SECS),
        Duration::from_secs(AUTH_BACKOFF_MAX_SECS),
    );
    let mut next_validation = Instant::now();
    let mut login: Option<PendingLogin> = None;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Auth loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                state.mark_loop_heartbeat("auth");

                if let Some(pending) = login.take() {
                    let step = login_step(pending.started, Instant::now());
                    if let LoginStep::GiveUp { retry_at } = step {
                        tracing::warn!(
                            "Authorization was not completed in time (retrying in {}s)",
                            VALIDATE_INTERVAL_SECS
                        );
                        state.set_login_url(None);
                        next_validation = retry_at;
                        continue;
                    }
                    match state.backend().poll_auth(&pending.start).await {
                        Ok(Some(token)) => {
                            store_token(&state, token).await;
                            state.set_login_url(None);
                            state.set_token_state(TokenState::Valid);
                            tracing::info!("Authorization completed");
                            next_validation =
                                Instant::now() + Duration::from_secs(VALIDATE_INTERVAL_SECS);
                        }
                        Ok(None) => login = Some(pending),
                        Err(err) => {
                            tracing::debug!("Authorization poll failed: {:#}", err);
                            login = Some(pending);
                        }
                    }
                    continue;
                }

                if Instant::now() < next_validation || !backoff.ready() {
                    continue;
                }

                let token_state = state.backend().validate_token().await;
                state.set_token_state(token_state);
                match token_state {
                    TokenState::Valid => {
                        backoff.reset();
                        next_validation =
                            Instant::now() + Duration::from_secs(VALIDATE_INTERVAL_SECS);
                    }
                    TokenState::Inaccessible => {
                        let delay = backoff.fail();
                        tracing::warn!("Backend not reachable for token check (retrying in {:?})", delay);
                    }
                    TokenState::Expired | TokenState::NotFound => {
                        if token_state == TokenState::Expired {
                            tracing::warn!("Stored token expired");
                            forget_token(&state).await;
                        }
                        match state.backend().start_auth().await {
                            Ok(start) => {
                                tracing::info!("Open {} to authorize this client", start.redirect_url);
                                state.set_login_url(Some(start.redirect_url.clone()));
                                login = Some(PendingLogin {
                                    start,
                                    started: Instant::now(),
                                });
                                backoff.reset();
                            }
                            Err(err) => {
                                let delay = backoff.fail();
                                tracing::warn!(
                                    "Failed to start authorization: {:#} (retrying in {:?})",
                                    err,
                                    delay
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn restore_token(state: &AppState) {
    let Some(db) = state.database() else {
        return;
    };
    match auth_tokens::load_token(db.pool()).await {
        Ok(Some(token)) => {
            state.backend().set_auth_token(Some(token));
            tracing::info!("Restored backend token");
        }
        Ok(None) => {}
        Err(err) => tracing::warn!("Failed to load backend token: {}", err),
    }
}

async fn store_token(state: &AppState, token: String) {
    if let Some(db) = state.database() {
        if let Err(err) = auth_tokens::save_token(db.pool(), &token).await {
            tracing::warn!("Failed to save backend token: {}", err);
        }
    }
    state.backend().set_auth_token(Some(token));
}

async fn forget_token(state: &AppState) {
    state.backend().set_auth_token(None);
    if let Some(db) = state.database() {
        if let Err(err) = auth_tokens::clear_token(db.pool()).await {
            tracing::warn!("Failed to clear backend token: {}", err);
        }
    }
}
