use super::*;

#[test]
fn test_cli_parse_serve_defaults() {
    let args: Cli = Cli::from_args(&["ssrkit"], &["serve"]).unwrap();
    match args.command {
        Commands::Serve(ServeArgs { config, bind, build_dir, dev }) => {
            assert!(config.is_none());
            assert!(bind.is_none());
            assert!(build_dir.is_none());
            assert!(!dev);
        }
        _ => panic!("Expected Serve command"),
    }
}

#[test]
fn test_cli_parse_serve_with_overrides() {
    let args: Cli = Cli::from_args(&["ssrkit"], &[
        "serve",
        "-c", "ssrkit.json",
        "-b", "0.0.0.0:8080",
        "--build-dir", "out/server",
        "--dev",
    ]).unwrap();
    match args.command {
        Commands::Serve(serve) => {
            assert_eq!(serve.config.as_deref(), Some("ssrkit.json"));
            let config = ServeArgs { config: None, ..serve };
            let config = load_config(&config).unwrap();
            assert_eq!(config.bind, "0.0.0.0:8080");
            assert_eq!(config.server_build_dir, PathBuf::from("out/server"));
            assert!(config.dev);
        }
        _ => panic!("Expected Serve command"),
    }
}

#[test]
fn test_cli_parse_render() {
    let args: Cli = Cli::from_args(&["ssrkit"], &["render", "Home.js", "-p", "{\"id\":1}"]).unwrap();
    match args.command {
        Commands::Render(RenderArgs { fragment, props, build_dir, lang, url, timeout_ms }) => {
            assert_eq!(fragment, "Home.js");
            assert_eq!(props, "{\"id\":1}");
            assert_eq!(build_dir, "dist/server"); // default
            assert_eq!(lang, "en");
            assert_eq!(url, "http://localhost/");
            assert_eq!(timeout_ms, 10000);
        }
        _ => panic!("Expected Render command"),
    }
}

#[test]
fn test_cli_parse_digest_and_stats() {
    let args: Cli = Cli::from_args(&["ssrkit"], &["digest", "frontend", "--state-dir", "/tmp/s"]).unwrap();
    match args.command {
        Commands::Digest(DigestArgs { path, state_dir }) => {
            assert_eq!(path, "frontend");
            assert_eq!(state_dir.as_deref(), Some("/tmp/s"));
        }
        _ => panic!("Expected Digest command"),
    }

    let args: Cli = Cli::from_args(&["ssrkit"], &["stats", "http://127.0.0.1:3000"]).unwrap();
    assert!(matches!(args.command, Commands::Stats(StatsArgs { ref server_address }) if server_address == "http://127.0.0.1:3000"));
}

#[test]
fn test_validate_http_url() {
    assert!(validate_http_url("http://127.0.0.1:3000", "server address").is_ok());
    assert!(validate_http_url("https://example.com", "server address").is_ok());
    assert!(validate_http_url("127.0.0.1:3000", "server address").is_err());
}

#[test]
fn test_context_for_url() {
    let ctx = context_for("https://example.com:8443/shop?page=2#top", "de").unwrap();
    assert_eq!(ctx.lang, "de");
    assert_eq!(ctx.location.protocol, "https:");
    assert_eq!(ctx.location.host, "example.com:8443");
    assert_eq!(ctx.location.pathname, "/shop");
    assert_eq!(ctx.location.search, "?page=2");
    assert_eq!(ctx.location.hash, "#top");

    assert!(context_for("not a url", "en").is_err());
}

#[tokio::test]
async fn test_render_command_prints_markup() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("Home.js"),
        "function Render() { return '<b>' + INITIAL_PROPS.id + '</b>'; }",
    )
    .unwrap();

    let args = RenderArgs {
        fragment: "Home.js".to_string(),
        props: "{\"id\": 3}".to_string(),
        build_dir: dir.path().display().to_string(),
        lang: "en".to_string(),
        url: "http://localhost/".to_string(),
        timeout_ms: 5000,
    };
    run_render(args).await.unwrap();
}

#[test]
fn test_digest_command_records_state() {
    let dir = tempfile::TempDir::new().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("App.tsx"), "export {}").unwrap();

    let args = DigestArgs {
        path: src.display().to_string(),
        state_dir: Some(dir.path().join("state").display().to_string()),
    };
    run_digest(args).unwrap();
    assert_eq!(std::fs::read_dir(dir.path().join("state")).unwrap().count(), 1);
}
