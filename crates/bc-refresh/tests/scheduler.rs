use std::sync::Arc;
use std::time::Duration;

use bc_auth::{
    ACCESS_TOKEN_KEY, MemoryTokenStore, NEXT_REFRESH_DELAY_KEY, OAuth2Client, OAuth2Config,
    TokenStore,
};
use bc_refresh::{Error, RefreshState, RetryPolicy, TokenRefreshScheduler};
use common::Secret;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, store: Arc<dyn TokenStore>) -> Arc<OAuth2Client> {
    Arc::new(
        OAuth2Client::new(
            OAuth2Config {
                client_id: "bc-client".into(),
                client_secret: Some(Secret::new("s3cret".into())),
                scope: "https://api.businesscentral.dynamics.com/.default".into(),
                grant_type: "client_credentials".into(),
                token_url: format!("{}/token", server.uri()),
            },
            reqwest::Client::new(),
            store,
        )
        .unwrap(),
    )
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn firing_persists_token_and_next_delay() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "expires_in": 3600,
            "access_token": "at_scheduled"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
    let handle = TokenRefreshScheduler::new(client(&server, store.clone()))
        .start()
        .await
        .unwrap();

    let mut states = handle.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| {
            *s == RefreshState::Scheduled {
                delay: Duration::from_secs(3590),
            }
        }),
    )
    .await
    .expect("scheduler did not re-arm in time")
    .unwrap();

    let token = store.get(ACCESS_TOKEN_KEY).await.unwrap().unwrap();
    assert_eq!(token.value, "at_scheduled");
    let delay = store.get(NEXT_REFRESH_DELAY_KEY).await.unwrap().unwrap();
    assert_eq!(delay.value, "3590");

    handle.stop();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn persisted_delay_postpones_first_firing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
    store
        .set(NEXT_REFRESH_DELAY_KEY, "600".into(), Duration::from_secs(600))
        .await
        .unwrap();

    let handle = TokenRefreshScheduler::new(client(&server, store))
        .start()
        .await
        .unwrap();
    assert_eq!(
        handle.state(),
        RefreshState::Scheduled {
            delay: Duration::from_secs(600)
        }
    );

    handle.stop();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn exhausted_retries_end_the_scheduler() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(3)
        .mount(&server)
        .await;

    let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
    let handle = TokenRefreshScheduler::new(client(&server, store.clone()))
        .with_policy(fast_policy(3))
        .start()
        .await
        .unwrap();

    let mut states = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(RefreshState::is_failed))
        .await
        .expect("scheduler did not give up in time")
        .unwrap();
    assert_eq!(handle.state().label(), "failed");

    let err = handle.join().await.unwrap_err();
    assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
    assert!(store.get(ACCESS_TOKEN_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn recovers_after_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "expires_in": 120,
            "access_token": "at_second_try"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
    let handle = TokenRefreshScheduler::new(client(&server, store.clone()))
        .with_policy(fast_policy(3))
        .start()
        .await
        .unwrap();

    let mut states = handle.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| {
            *s == RefreshState::Scheduled {
                delay: Duration::from_secs(110),
            }
        }),
    )
    .await
    .expect("scheduler did not recover in time")
    .unwrap();

    let token = store.get(ACCESS_TOKEN_KEY).await.unwrap().unwrap();
    assert_eq!(token.value, "at_second_try");

    handle.stop();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn restart_mid_token_resumes_before_expiry() {
    let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
    store
        .set(ACCESS_TOKEN_KEY, "at_live".into(), Duration::from_secs(3600))
        .await
        .unwrap();
    store
        .set(NEXT_REFRESH_DELAY_KEY, "3590".into(), Duration::from_secs(3590))
        .await
        .unwrap();

    // Previous worker ran for 3000s, leaving 600s on the token.
    tokio::time::advance(Duration::from_secs(3000)).await;

    let client = Arc::new(
        OAuth2Client::new(
            OAuth2Config {
                client_id: "bc-client".into(),
                client_secret: Some(Secret::new("s3cret".into())),
                scope: "https://api.businesscentral.dynamics.com/.default".into(),
                grant_type: "client_credentials".into(),
                token_url: "http://127.0.0.1:9/token".into(),
            },
            reqwest::Client::new(),
            store.clone(),
        )
        .unwrap(),
    );
    let handle = TokenRefreshScheduler::new(client).start().await.unwrap();

    assert_eq!(
        handle.state(),
        RefreshState::Scheduled {
            delay: Duration::from_secs(590)
        }
    );
    let token = store.get(ACCESS_TOKEN_KEY).await.unwrap().unwrap();
    assert!(token.expires_in.unwrap() > Duration::from_secs(590));

    handle.stop();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn stop_lets_in_flight_refresh_finish() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "expires_in": 3600,
                    "access_token": "at_completed"
                }))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
    store
        .set(ACCESS_TOKEN_KEY, "at_old".into(), Duration::from_secs(3600))
        .await
        .unwrap();
    let handle = TokenRefreshScheduler::new(client(&server, store.clone()))
        .start()
        .await
        .unwrap();

    let mut states = handle.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| matches!(s, RefreshState::Firing { .. })),
    )
    .await
    .expect("scheduler did not fire in time")
    .unwrap();

    handle.stop();
    handle.join().await.unwrap();

    let token = store.get(ACCESS_TOKEN_KEY).await.unwrap().unwrap();
    assert_eq!(token.value, "at_completed");
    let delay = store.get(NEXT_REFRESH_DELAY_KEY).await.unwrap().unwrap();
    assert_eq!(delay.value, "3590");
}
