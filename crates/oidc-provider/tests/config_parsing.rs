use std::time::Duration;
use std::{env, fs};

use oidc_provider::config::StorageBackendKind;
use oidc_provider::config::loader::load_config;
use oidc_provider::{ConfigError, SigningAlgorithm};

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("oidc-provider.toml");

    let toml_content = r#"
issuer = "https://id.example.com"
code_lifetime = "10m"
token_lifetime = "1h"

[registration]
open = false
registration_key = "let-me-in"

[keys]
default_algorithm = "ES256"
retention = "2d"

[storage]
backend = "redis"

[storage.redis]
url = "redis://cache.internal:6379"
pool_size = 4
key_prefix = "idp"

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(Some(path.as_path())).expect("should parse config");
    assert_eq!(cfg.issuer, "https://id.example.com");
    assert_eq!(cfg.code_lifetime, Duration::from_secs(600));
    assert_eq!(cfg.token_lifetime, Duration::from_secs(3600));
    assert!(!cfg.registration.open);
    assert!(cfg.registration.permits(Some("let-me-in")));
    assert_eq!(cfg.keys.default_algorithm, SigningAlgorithm::ES256);
    assert_eq!(cfg.keys.retention, Duration::from_secs(2 * 86400));
    assert_eq!(cfg.storage.backend, StorageBackendKind::Redis);
    assert_eq!(cfg.storage.redis.pool_size, 4);
    assert_eq!(cfg.storage.redis.key_prefix, "idp");
    assert_eq!(cfg.logging.level, "debug");

    // 2) Env override should win over file
    unsafe {
        env::set_var("OIDC__GRANT_TYPE_PASSWORD", "true");
    }
    let cfg_env = load_config(Some(path.as_path())).expect("should parse config with env overrides");
    assert!(cfg_env.grant_type_password);
    unsafe {
        env::remove_var("OIDC__GRANT_TYPE_PASSWORD");
    }

    // 3) Validation failure surfaces
    let bad_path = dir.path().join("bad.toml");
    fs::write(
        &bad_path,
        r#"
[keys]
default_algorithm = "HS256"
"#,
    )
    .expect("write bad toml");
    let err = load_config(Some(bad_path.as_path())).unwrap_err();
    assert!(matches!(err, ConfigError::Missing(_)));

    // 4) Unknown algorithms are rejected at parse time
    let alg_path = dir.path().join("alg.toml");
    fs::write(
        &alg_path,
        r#"
[keys]
default_algorithm = "none"
"#,
    )
    .expect("write alg toml");
    assert!(matches!(
        load_config(Some(alg_path.as_path())).unwrap_err(),
        ConfigError::Load(_)
    ));

    // 5) Missing explicit file is an error
    assert!(load_config(Some(dir.path().join("missing.toml").as_path())).is_err());
}
