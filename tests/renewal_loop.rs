//! Renewal loop state machine: renew, re-authenticate, terminate, escalate.

mod common;

use common::{session, token_of, wait_until, watcher_options, FakeVault, Renewal};
use leasewarden::secrets::{AppRoleCredentials, LoopState, RenewalLoop, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const LIMIT: Duration = Duration::from_secs(24 * 3600);

fn credentials() -> AppRoleCredentials {
    AppRoleCredentials::new("role-1", SecretString::new("secret-1"))
}

#[tokio::test(start_paused = true)]
async fn test_authenticate_yields_active_with_login_secret() {
    let vault = FakeVault::new();
    let renewal = RenewalLoop::authenticate(vault.api(), credentials(), watcher_options()).await.unwrap();

    assert_eq!(renewal.state(), LoopState::Active);
    assert_eq!(token_of(&renewal.current_secret()), "token-1");
    assert_eq!(vault.current_token().as_deref(), Some("token-1"));
    assert_eq!(vault.login_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_renewed_does_not_replace_current_secret() {
    let vault = FakeVault::new();
    let renewal = RenewalLoop::authenticate(vault.api(), credentials(), watcher_options()).await.unwrap();
    let before = renewal.current_secret();
    let mut secrets = renewal.subscribe();
    let cancel = CancellationToken::new();

    let task = tokio::spawn(renewal.run(cancel.clone()));
    tokio::time::sleep(Duration::from_secs(4 * 3600)).await;

    assert!(vault.renew_count() >= 3);
    assert_eq!(vault.login_count(), 1);
    assert!(!secrets.has_changed().unwrap());
    assert!(Arc::ptr_eq(&before, &*secrets.borrow_and_update()));

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_expiring_triggers_exactly_one_login() {
    let vault = FakeVault::new();
    vault.script_renewals([Renewal::Exhausted]);
    let renewal = RenewalLoop::authenticate(vault.api(), credentials(), watcher_options()).await.unwrap();
    let mut secrets = renewal.subscribe();
    let mut states = renewal.watch_state();
    let cancel = CancellationToken::new();

    let task = tokio::spawn(renewal.run(cancel.clone()));

    let replaced = wait_until(&mut secrets, LIMIT, |s| token_of(s) == "token-2").await;
    assert_eq!(token_of(&replaced), "token-2");
    assert_eq!(vault.current_token().as_deref(), Some("token-2"));

    // Watching resumes on the replacement session.
    wait_until(&mut states, LIMIT, |s| *s == LoopState::Renewing).await;
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(vault.login_count(), 2);
    assert_eq!(vault.renewed_tokens().last().map(String::as_str), Some("token-2"));

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_renewing_terminates_without_login() {
    let vault = FakeVault::new();
    let renewal = RenewalLoop::authenticate(vault.api(), credentials(), watcher_options()).await.unwrap();
    let mut states = renewal.watch_state();
    let cancel = CancellationToken::new();

    let task = tokio::spawn(renewal.run(cancel.clone()));
    wait_until(&mut states, LIMIT, |s| *s == LoopState::Renewing).await;

    cancel.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(*states.borrow(), LoopState::Terminated);
    assert_eq!(vault.login_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_run_terminates_immediately() {
    let vault = FakeVault::new();
    let renewal = RenewalLoop::authenticate(vault.api(), credentials(), watcher_options()).await.unwrap();
    let states = renewal.watch_state();
    let cancel = CancellationToken::new();
    cancel.cancel();

    renewal.run(cancel).await.unwrap();
    assert_eq!(*states.borrow(), LoopState::Terminated);
    assert_eq!(vault.renew_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_relogin_is_fatal() {
    let vault = FakeVault::new();
    vault.script_renewals([Renewal::Exhausted]);
    vault.fail_logins_after(1);
    let renewal = RenewalLoop::authenticate(vault.api(), credentials(), watcher_options()).await.unwrap();
    let states = renewal.watch_state();

    let err = renewal.run(CancellationToken::new()).await.unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(*states.borrow(), LoopState::FatalStop);
    assert_eq!(vault.login_paths().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_relogin_is_not_fatal() {
    let vault = FakeVault::new();
    vault.script_renewals([Renewal::Exhausted]);
    vault.delay_relogin(Duration::from_secs(600));
    vault.fail_logins_after(1);
    let renewal = RenewalLoop::authenticate(vault.api(), credentials(), watcher_options()).await.unwrap();
    let mut states = renewal.watch_state();
    let cancel = CancellationToken::new();

    let task = tokio::spawn(renewal.run(cancel.clone()));
    wait_until(&mut states, LIMIT, |s| *s == LoopState::Authenticating).await;

    cancel.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(*states.borrow(), LoopState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn test_unwatchable_session_triggers_login() {
    let vault = FakeVault::new();
    let cancel = CancellationToken::new();
    // A session without a token cannot be watched, so the loop logs in again.
    let renewal = RenewalLoop::new(vault.api(), credentials(), watcher_options(), Default::default());
    let mut secrets = renewal.subscribe();

    let task = tokio::spawn(renewal.run(cancel.clone()));
    let replaced = wait_until(&mut secrets, LIMIT, |s| s.token().is_some()).await;

    assert_eq!(token_of(&replaced), "token-1");
    assert_eq!(vault.login_count(), 1);

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_non_renewable_sessions_are_replaced_before_expiry() {
    let vault = FakeVault::new();
    vault.set_login_ttl(600, false);
    let renewal = RenewalLoop::new(vault.api(), credentials(), watcher_options(), session("token-0", 600, false));
    let mut secrets = renewal.subscribe();
    let cancel = CancellationToken::new();

    let task = tokio::spawn(renewal.run(cancel.clone()));
    let started = tokio::time::Instant::now();
    wait_until(&mut secrets, LIMIT, |s| token_of(s) == "token-2").await;

    // Two expiries of a 600s token, each handled inside the grace period.
    assert!(started.elapsed() < Duration::from_secs(1200));
    assert_eq!(vault.renew_count(), 0);

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_non_expiring_session_is_not_replaced() {
    let vault = FakeVault::new();
    vault.set_login_ttl(0, false);
    let renewal = RenewalLoop::authenticate(vault.api(), credentials(), watcher_options()).await.unwrap();
    let mut states = renewal.watch_state();
    let cancel = CancellationToken::new();

    let task = tokio::spawn(renewal.run(cancel.clone()));
    wait_until(&mut states, LIMIT, |s| *s == LoopState::Renewing).await;
    tokio::time::sleep(Duration::from_secs(48 * 3600)).await;

    assert_eq!(vault.login_count(), 1);
    assert_eq!(vault.renew_count(), 0);
    assert_eq!(*states.borrow(), LoopState::Renewing);

    cancel.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(*states.borrow(), LoopState::Terminated);
}
