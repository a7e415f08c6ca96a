use netfence::config::{ConfigError, ConfigLoader, validate};
use netfence::isolation::IsolationMode;
use netfence::proxy::TlsPolicy;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn loader(dir: &Path) -> ConfigLoader {
    ConfigLoader::with_paths(dir.join("system.toml"), dir.join("user.toml"))
}

#[test]
fn test_layered_files_with_hosts_allowlist() {
    let dir = tempdir().expect("Failed to create temp dir");
    fs::write(
        dir.path().join("system.toml"),
        r#"
        [resolver]
        listen = "10.100.1.2:53"
        health_listen = "10.100.1.2:8080"

        [isolation]
        subnet = "10.100.1.0/24"

        [[allow]]
        domain = "api.anthropic.com"
        proxy_address = "10.100.1.14"
        tls_policy = "terminate_check_sni"

        [[services]]
        name = "anthropic"
        listen = "10.100.1.14:443"
        upstream = "127.0.0.1:443"
        tls_policy = "terminate_check_sni"
        "#,
    )
    .unwrap();

    let extra_dir = dir.path().join("deploy");
    fs::create_dir(&extra_dir).unwrap();
    fs::write(
        extra_dir.join("hosts.allowlist"),
        "# proxy address   names\n10.100.1.10 github.com www.github.com\n10.100.1.11 raw.githubusercontent.com\n",
    )
    .unwrap();
    let extra = extra_dir.join("netfence.toml");
    fs::write(
        &extra,
        "allowlist_file = \"hosts.allowlist\"\n\n[resolver]\nttl = 10\n",
    )
    .unwrap();

    let config = loader(dir.path()).load(Some(&extra)).unwrap();
    let resolved = validate(&config).expect("Config should validate");

    assert_eq!(resolved.allowlist.len(), 4);
    assert_eq!(resolved.resolver.ttl, 10);
    assert_eq!(resolved.isolation.mode(), IsolationMode::Filtered);
    assert_eq!(
        resolved.allowlist.lookup("WWW.GitHub.com.").map(|e| e.proxy_address),
        Some("10.100.1.10".parse().unwrap())
    );

    let anthropic = resolved.routes.by_name("anthropic").unwrap();
    assert_eq!(anthropic.tls.policy(), TlsPolicy::TerminateCheckSni);
    assert!(anthropic.tls.accepts_sni("api.anthropic.com"));
    assert!(!anthropic.tls.accepts_sni("github.com"));

    let conf = resolved.isolation.resolv_conf();
    assert!(conf.contains("nameserver 10.100.1.2"));
}

#[test]
fn test_malformed_entries_refuse_startup() {
    let cases = [
        (
            "bad address",
            "[[allow]]\ndomain = \"github.com\"\nproxy_address = \"10.100.1\"\n",
        ),
        (
            "wildcard",
            "[[allow]]\ndomain = \"*.github.com\"\nproxy_address = \"10.100.1.10\"\n",
        ),
        (
            "duplicate",
            "[[allow]]\ndomain = \"github.com\"\nproxy_address = \"10.100.1.10\"\n\n[[allow]]\ndomain = \"GITHUB.com.\"\nproxy_address = \"10.100.1.10\"\n",
        ),
        (
            "route without allowlist address",
            "[[allow]]\ndomain = \"github.com\"\nproxy_address = \"10.100.1.10\"\n\n[[services]]\nname = \"gh\"\nlisten = \"10.100.1.99:443\"\nupstream = \"127.0.0.1:443\"\n",
        ),
    ];

    for (name, contents) in cases {
        let dir = tempdir().unwrap();
        let path = dir.path().join("netfence.toml");
        fs::write(&path, contents).unwrap();

        let config = loader(dir.path()).load(Some(&path)).unwrap();
        assert!(validate(&config).is_err(), "{} should be rejected", name);
    }
}

#[test]
fn test_unparsable_route_config_is_parse_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("netfence.toml");
    fs::write(
        &path,
        "[[services]]\nname = \"gh\"\nlisten = \"not-a-socket\"\nupstream = \"github.com:443\"\n",
    )
    .unwrap();

    let err = loader(dir.path()).load(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError { .. }));
    assert!(err.to_string().contains("netfence.toml"));
}

#[test]
fn test_broken_hosts_file_names_the_file() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("hosts.allowlist"), "github.com 10.100.1.10\n").unwrap();
    let path = dir.path().join("netfence.toml");
    fs::write(&path, "allowlist_file = \"hosts.allowlist\"\n").unwrap();

    let config = loader(dir.path()).load(Some(&path)).unwrap();
    let err = validate(&config).unwrap_err();
    assert!(matches!(err, ConfigError::AllowlistFile { .. }));
    assert!(err.to_string().contains("hosts.allowlist"));
    assert!(err.to_string().contains("line 1"));
}
