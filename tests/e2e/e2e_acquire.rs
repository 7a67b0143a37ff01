//! Binary acquisition against a local release server.

use std::fs;
use std::time::Duration;

use semver::Version;
use tofu_engine::{Error, FetchError, ToolFetcher, ToolVersion, VersionSelector};

use crate::fixture::{tool_script, ReleaseServer, BROKEN};

fn managed(version: &str, install_dir: &std::path::Path) -> VersionSelector {
    VersionSelector::UseManagedBinary {
        version: ToolVersion::parse(version).unwrap(),
        install_dir: install_dir.to_path_buf(),
    }
}

#[tokio::test]
async fn test_second_acquire_is_cache_hit() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ToolFetcher::new(&server.config(dir.path()));

    let first = fetcher.acquire(&managed("v1.9.1", dir.path())).await.unwrap();
    let second = fetcher.acquire(&managed("1.9.1", dir.path())).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.version, Some(Version::new(1, 9, 1)));
    assert!(first.executable.starts_with(dir.path()));
    assert_eq!(server.downloads(), 1);
    assert_eq!(server.listings(), 0);
}

#[tokio::test]
async fn test_no_such_version() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ToolFetcher::new(&server.config(dir.path()));

    let err = fetcher.acquire(&managed("v0.0.0", dir.path())).await.unwrap_err();
    assert!(matches!(err, FetchError::NoSuchVersion(_)));
    assert!(err.to_string().contains("No such version: 0.0.0"));

    let err = Error::from(err);
    assert_eq!(
        err.to_string(),
        "failed to download OpenTofu: No such version: 0.0.0"
    );
    assert!(!dir.path().join("tofu_0.0.0").exists());
}

#[tokio::test]
async fn test_server_error_names_version() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ToolFetcher::new(&server.config(dir.path()));

    let err = fetcher.acquire(&managed(BROKEN, dir.path())).await.unwrap_err();
    let text = Error::from(err).to_string();
    assert!(text.starts_with("failed to download OpenTofu"));
    assert!(text.contains(BROKEN));
    assert!(text.contains("500"));
}

#[tokio::test]
async fn test_latest_requeries_listing() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ToolFetcher::new(&server.config(dir.path()));

    let first = fetcher.acquire(&managed("latest", dir.path())).await.unwrap();
    let second = fetcher.acquire(&managed("latest", dir.path())).await.unwrap();

    // The prerelease 1.10.0-rc1 is listed but never chosen.
    assert_eq!(first.version, Some(Version::new(1, 9, 1)));
    assert_eq!(first, second);
    assert_eq!(server.listings(), 2);
    assert_eq!(server.downloads(), 1);
}

#[tokio::test]
async fn test_unreachable_listing() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = tofu_engine::EngineConfig {
        install_dir: dir.path().to_path_buf(),
        releases_api_url: "http://127.0.0.1:9/api.json".into(),
        ..Default::default()
    };
    config.request_timeout_secs = 5;
    let fetcher = ToolFetcher::new(&config);

    let err = fetcher.acquire(&managed("latest", dir.path())).await.unwrap_err();
    assert!(matches!(Error::from(err), Error::VersionResolution(_)));
}

#[tokio::test]
async fn test_installed_versions_after_acquire() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ToolFetcher::new(&server.config(dir.path()));

    for version in ["1.9.1", "1.8.5"] {
        fetcher.acquire(&managed(version, dir.path())).await.unwrap();
    }

    assert_eq!(
        fetcher.installed_versions(dir.path()),
        vec![Version::new(1, 8, 5), Version::new(1, 9, 1)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_never_exposes_partial_binary() {
    let server = ReleaseServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = server.config(dir.path());
    let expected = tool_script("1.9.1");
    let target = tofu_engine::binary_path(
        dir.path(),
        &Version::new(1, 9, 1),
        &tofu_engine::Platform::current(),
    );

    // A third party repeatedly reads the final path while installs race.
    let reader_target = target.clone();
    let reader_expected = expected.clone();
    let reader = tokio::spawn(async move {
        let mut observed = 0;
        for _ in 0..400 {
            if let Ok(content) = fs::read_to_string(&reader_target) {
                assert_eq!(content, reader_expected, "partial binary observed");
                observed += 1;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        observed
    });

    let a = ToolFetcher::new(&config);
    let b = ToolFetcher::new(&config);
    let selector = managed("1.9.1", dir.path());
    let (first, second) = tokio::join!(a.acquire(&selector), b.acquire(&selector));
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.executable, target);
    assert_eq!(second.executable, target);
    assert_eq!(fs::read_to_string(&target).unwrap(), expected);
    assert!(server.downloads() <= 2);

    reader.await.unwrap();

    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with('.'))
        .collect();
    assert!(leftovers.is_empty(), "staging left behind: {:?}", leftovers);
}
