//! Concurrent redemption of a single code must succeed exactly once.

use std::sync::Arc;
use std::time::Duration;

use oidc_provider::keys::SymmetricKey;
use oidc_provider::storage::InMemoryCodeStorage;
use oidc_provider::{
    AuthorizationRequest, CodeEngine, CodeRequest, KeyManager, ManualClock, Provider,
    ProviderConfig, ProviderError, RegisterClient, Scopes, SigningAlgorithm, SystemClock,
    TokenRequest,
};
use time::OffsetDateTime;

const RACERS: usize = 64;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn code_engine_redeems_once_under_contention() {
    let engine = Arc::new(CodeEngine::new(
        Arc::new(InMemoryCodeStorage::new()),
        Arc::new(SystemClock),
    ));
    let client = oidc_provider::ClientRecord {
        id: "c1".to_string(),
        secret: None,
        name: None,
        redirect_uris: vec!["https://app/cb".to_string()],
        signature_algorithm: SigningAlgorithm::RS256,
        scopes_allowed: Scopes::parse("openid"),
        created_at: OffsetDateTime::UNIX_EPOCH,
    };

    for _ in 0..10 {
        let code = engine
            .issue(&client, CodeRequest::new("alice", Scopes::parse("openid"), 600))
            .await
            .expect("issue");

        let handles: Vec<_> = (0..RACERS)
            .map(|_| {
                let engine = engine.clone();
                let id = code.id.clone();
                tokio::spawn(async move { engine.redeem(&id, None).await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.expect("join") {
                Ok(_) => successes += 1,
                Err(ProviderError::AlreadyUsed) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn token_endpoint_issues_tokens_once_under_contention() {
    let clock = Arc::new(ManualClock::starting_now());
    let keys = Arc::new(KeyManager::new(clock.clone(), Duration::from_secs(86400)));
    keys.insert(SymmetricKey::new("hs256", b"an-hs256-secret-of-sufficient-size")).unwrap();

    let mut config = ProviderConfig::default();
    config.keys.default_algorithm = SigningAlgorithm::HS256;
    let provider = Arc::new(
        Provider::builder(config, keys)
            .with_clock(clock)
            .build()
            .expect("build provider"),
    );

    let client = provider
        .register_client(
            RegisterClient::new(vec!["https://app/cb".to_string()], Scopes::parse("openid"))
                .with_signature_algorithm(SigningAlgorithm::HS256),
            None,
        )
        .await
        .expect("register");

    let authorized = provider
        .authorize(
            AuthorizationRequest {
                client_id: client.id.clone(),
                redirect_uri: "https://app/cb".to_string(),
                scope: "openid".to_string(),
                response_type: "code".to_string(),
                ..Default::default()
            }
            .with_subject("alice"),
        )
        .await
        .expect("authorize");

    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let provider = provider.clone();
            let request = TokenRequest::authorization_code(authorized.code.clone())
                .with_client(client.id.clone(), client.secret.as_deref());
            tokio::spawn(async move { provider.token(request).await })
        })
        .collect();

    let mut issued = 0;
    for handle in handles {
        if handle.await.expect("join").is_ok() {
            issued += 1;
        }
    }
    assert_eq!(issued, 1);
}
