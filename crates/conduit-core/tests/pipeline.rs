//! End-to-end pipeline runs against `file://` channels in a scratch directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use conduit_core::pool::CandidatePool;
use conduit_core::request::SolveRequest;
use conduit_core::solver::Unsatisfiable;
use conduit_core::transport::TransportError;
use conduit_core::{
    Config, Confirm, Environment, Error, HttpTransport, MultiPackageCache, NullReporter, Outcome,
    Pipeline, PrefixData, PubGrubSolver, Solver, TransactionPlan, Transport,
};
use conduit_schema::{Platform, RepoDataRecord};
use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A package to publish: name, version, dependencies.
type Pkg<'a> = (&'a str, &'a str, &'a [&'a str]);

fn tarball(name: &str, version: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, contents) in [
        (format!("bin/{name}"), version.to_string()),
        ("info/index.json".to_string(), format!(r#"{{"name":"{name}"}}"#)),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, path, contents.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Publish `packages` under `<dir>/<name>/noarch` and return the channel URL.
fn publish(dir: &Path, name: &str, packages: &[Pkg<'_>]) -> String {
    let root = dir.join(name);
    let noarch = root.join("noarch");
    std::fs::create_dir_all(&noarch).unwrap();
    std::fs::create_dir_all(root.join("linux-64")).unwrap();
    std::fs::write(root.join("linux-64/repodata.json"), r#"{"packages":{}}"#).unwrap();

    let mut entries = serde_json::Map::new();
    for (pkg, version, depends) in packages {
        let file_name = format!("{pkg}-{version}-0.tar.gz");
        let bytes = tarball(pkg, version);
        std::fs::write(noarch.join(&file_name), &bytes).unwrap();
        entries.insert(
            file_name,
            serde_json::json!({
                "name": pkg,
                "version": version,
                "build": "0",
                "build_number": 0,
                "depends": depends,
                "sha256": hex::encode(Sha256::digest(&bytes)),
            }),
        );
    }
    let repodata = serde_json::json!({"info": {"subdir": "noarch"}, "packages": entries});
    std::fs::write(noarch.join("repodata.json"), repodata.to_string()).unwrap();

    format!("file://{}", root.display())
}

/// Every path under `root` with file contents (`None` for directories).
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .map(|entry| {
            let entry = entry.unwrap();
            let contents = entry
                .file_type()
                .is_file()
                .then(|| std::fs::read(entry.path()).unwrap());
            (entry.path().strip_prefix(root).unwrap().to_path_buf(), contents)
        })
        .collect()
}

struct Fixture {
    dir: TempDir,
    config: Config,
    transport: HttpTransport,
    cache: MultiPackageCache,
}

impl Fixture {
    fn new(channels: Vec<String>) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new(dir.path().join("root"));
        config.platform = Platform::Linux64;
        config.channels = channels;
        config.target_prefix = Some(dir.path().join("root/envs/test"));
        config.retry_timeout_secs = 0;
        config.max_retries = 1;

        let transport = HttpTransport::with_client(reqwest::Client::new());
        let cache = MultiPackageCache::new(
            config.pkgs_dirs(),
            Arc::new(transport.clone()),
            Duration::from_secs(5),
        );
        Self {
            dir,
            config,
            transport,
            cache,
        }
    }

    fn prefix(&self) -> PathBuf {
        self.dir.path().join("root/envs/test")
    }

    fn ledger(&self) -> PrefixData {
        PrefixData::load(&Environment::new(self.prefix())).unwrap()
    }

    async fn install(&self, specs: &[&str], create: bool, confirm: &dyn Confirm) -> Result<Outcome, Error> {
        Pipeline::new(
            &self.config,
            &self.transport,
            &PubGrubSolver,
            &self.cache,
            confirm,
            &NullReporter,
            CancellationToken::new(),
        )
        .install(specs, create)
        .await
    }
}

/// Counts prompts and answers with a fixed value.
struct CountingConfirm {
    answer: bool,
    asked: AtomicUsize,
}

impl CountingConfirm {
    fn new(answer: bool) -> Self {
        Self {
            answer,
            asked: AtomicUsize::new(0),
        }
    }

    fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl Confirm for CountingConfirm {
    fn confirm(&self, _: &TransactionPlan) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

#[tokio::test]
async fn test_install_into_empty_environment() {
    let scratch = TempDir::new().unwrap();
    let url = publish(scratch.path(), "main", &[("numpy", "1.0", &[])]);
    let fixture = Fixture::new(vec![url]);
    let confirm = CountingConfirm::new(true);

    let outcome = fixture.install(&["numpy"], true, &confirm).await.unwrap();

    let Outcome::Committed(report) = outcome else {
        panic!("expected a committed transaction, got {outcome:?}");
    };
    assert!(report.success);
    assert_eq!(report.actions.link.len(), 1);
    assert_eq!(confirm.asked(), 1);

    let ledger = fixture.ledger();
    let numpy = ledger.get("numpy").unwrap();
    assert_eq!(numpy.package().version, "1.0");
    assert_eq!(numpy.requested_spec.as_deref(), Some("numpy"));
    assert!(fixture.prefix().join("bin/numpy").is_file());
}

#[tokio::test]
async fn test_reinstall_is_nothing_to_do() {
    let scratch = TempDir::new().unwrap();
    let main = publish(
        scratch.path(),
        "main",
        &[("numpy", "1.0", &[]), ("numpy", "0.9", &[])],
    );
    let extra = publish(scratch.path(), "extra", &[("numpy", "0.5", &[])]);
    let fixture = Fixture::new(vec![main.clone(), extra]);
    fixture
        .install(&["numpy"], true, &CountingConfirm::new(true))
        .await
        .unwrap();
    let before = snapshot(&fixture.prefix());

    let confirm = CountingConfirm::new(true);
    let outcome = fixture.install(&["numpy"], false, &confirm).await.unwrap();

    assert!(matches!(outcome, Outcome::NothingToDo), "got {outcome:?}");
    assert_eq!(confirm.asked(), 0);
    let ledger = fixture.ledger();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.get("numpy").unwrap().package().version, "1.0");
    assert_eq!(ledger.get("numpy").unwrap().repodata_record.channel, main);
    assert_eq!(snapshot(&fixture.prefix()), before);
}

#[tokio::test]
async fn test_rerequest_ignores_lower_priority_channel() {
    let scratch = TempDir::new().unwrap();
    let first = publish(scratch.path(), "a", &[("numpy", "1.0", &[])]);
    let second = publish(scratch.path(), "b", &[("numpy", "0.5", &[])]);
    let mut fixture = Fixture::new(vec![first.clone(), second]);
    fixture.config.always_yes = true;

    fixture
        .install(&["numpy"], true, &CountingConfirm::new(false))
        .await
        .unwrap();
    let outcome = fixture
        .install(&["numpy"], false, &CountingConfirm::new(false))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::NothingToDo), "got {outcome:?}");
    let ledger = fixture.ledger();
    let numpy = ledger.get("numpy").unwrap();
    assert_eq!(numpy.package().version, "1.0");
    assert_eq!(numpy.repodata_record.channel, first);
}

#[tokio::test]
async fn test_higher_priority_channel_wins() {
    let scratch = TempDir::new().unwrap();
    let first = publish(scratch.path(), "first", &[("numpy", "1.0", &[])]);
    let second = publish(scratch.path(), "second", &[("numpy", "2.0", &[])]);
    let mut fixture = Fixture::new(vec![first.clone(), second]);
    fixture.config.always_yes = true;

    fixture
        .install(&["numpy"], true, &CountingConfirm::new(false))
        .await
        .unwrap();

    let ledger = fixture.ledger();
    let numpy = ledger.get("numpy").unwrap();
    assert_eq!(numpy.package().version, "1.0");
    assert_eq!(numpy.repodata_record.channel, first);
}

#[tokio::test]
async fn test_dependencies_are_installed_with_the_request() {
    let scratch = TempDir::new().unwrap();
    let url = publish(
        scratch.path(),
        "main",
        &[
            ("app", "1.0", &["libfoo >=2"]),
            ("libfoo", "1.0", &[]),
            ("libfoo", "2.1", &[]),
        ],
    );
    let mut fixture = Fixture::new(vec![url]);
    fixture.config.always_yes = true;

    fixture
        .install(&["app"], true, &CountingConfirm::new(false))
        .await
        .unwrap();

    let ledger = fixture.ledger();
    assert_eq!(ledger.get("libfoo").unwrap().package().version, "2.1");
    assert!(ledger.get("libfoo").unwrap().requested_spec.is_none());
}

/// Fails every request and counts them.
#[derive(Default)]
struct DownTransport {
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for DownTransport {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<Bytes, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Connection {
            url: url.to_string(),
            message: "connection refused".into(),
        })
    }
}

/// Records whether it was consulted.
#[derive(Default)]
struct SpySolver {
    calls: AtomicUsize,
}

impl Solver for SpySolver {
    fn solve(
        &self,
        _: &CandidatePool,
        _: SolveRequest,
    ) -> Result<Vec<RepoDataRecord>, Unsatisfiable> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_all_channels_down_is_network_error() {
    let fixture = Fixture::new(vec![
        "https://one.example.invalid/main".into(),
        "https://two.example.invalid/main".into(),
    ]);
    let transport = DownTransport::default();
    let solver = SpySolver::default();

    let err = Pipeline::new(
        &fixture.config,
        &transport,
        &solver,
        &fixture.cache,
        &CountingConfirm::new(true),
        &NullReporter,
        CancellationToken::new(),
    )
    .install(&["numpy"], true)
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Network(_)), "got {err:?}");
    assert_eq!(err.exit_code(), 3);
    // 2 channels x 2 subdirs x (1 attempt + 1 retry)
    assert_eq!(transport.calls.load(Ordering::SeqCst), 8);
    assert_eq!(solver.calls.load(Ordering::SeqCst), 0);
    assert!(!fixture.prefix().exists());
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let scratch = TempDir::new().unwrap();
    let url = publish(scratch.path(), "main", &[("numpy", "1.0", &[])]);
    let mut fixture = Fixture::new(vec![url]);
    fixture.config.dry_run = true;
    let confirm = CountingConfirm::new(true);

    let outcome = fixture.install(&["numpy"], true, &confirm).await.unwrap();

    let Outcome::DryRun(report) = outcome else {
        panic!("expected a dry run, got {outcome:?}");
    };
    assert!(report.dry_run);
    assert_eq!(report.actions.fetch.len(), 1);
    assert_eq!(confirm.asked(), 0);
    assert!(!fixture.prefix().exists());
    assert!(!fixture.config.root_prefix.join("pkgs/numpy-1.0-0").exists());
}

#[tokio::test]
async fn test_dry_run_leaves_existing_environment_identical() {
    let scratch = TempDir::new().unwrap();
    let url = publish(
        scratch.path(),
        "main",
        &[("numpy", "1.0", &[]), ("numpy", "2.0", &[])],
    );
    let mut fixture = Fixture::new(vec![url]);
    fixture.config.always_yes = true;
    fixture
        .install(&["numpy==1.0"], true, &CountingConfirm::new(false))
        .await
        .unwrap();
    assert!(fixture.prefix().join("bin/numpy").is_file());
    let before = snapshot(&fixture.prefix());

    fixture.config.dry_run = true;
    let outcome = fixture
        .install(&["numpy>=2"], false, &CountingConfirm::new(true))
        .await
        .unwrap();

    let Outcome::DryRun(report) = outcome else {
        panic!("expected a dry run, got {outcome:?}");
    };
    assert_eq!(report.actions.unlink.len(), 1);
    assert_eq!(report.actions.link.len(), 1);
    assert_eq!(snapshot(&fixture.prefix()), before);
    assert_eq!(fixture.ledger().get("numpy").unwrap().package().version, "1.0");
}

#[tokio::test]
async fn test_no_channels_fails_before_any_io() {
    let mut fixture = Fixture::new(Vec::new());
    fixture.config.default_channels.clear();

    let err = fixture
        .install(&["numpy"], true, &CountingConfirm::new(true))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Configuration(_)), "got {err:?}");
    assert!(!fixture.config.metadata_cache_dir().exists());
    assert!(!fixture.config.root_prefix.exists());
}

#[tokio::test]
async fn test_declined_leaves_prefix_untouched() {
    let scratch = TempDir::new().unwrap();
    let url = publish(scratch.path(), "main", &[("numpy", "1.0", &[])]);
    let fixture = Fixture::new(vec![url]);

    let outcome = fixture
        .install(&["numpy"], true, &CountingConfirm::new(false))
        .await
        .unwrap();

    let Outcome::Declined(report) = outcome else {
        panic!("expected a declined transaction, got {outcome:?}");
    };
    assert!(!report.success);
    assert!(!fixture.prefix().exists());
}

#[tokio::test]
async fn test_missing_prefix_fails_before_network() {
    let fixture = Fixture::new(vec!["https://one.example.invalid/main".into()]);
    let transport = DownTransport::default();

    let err = Pipeline::new(
        &fixture.config,
        &transport,
        &PubGrubSolver,
        &fixture.cache,
        &CountingConfirm::new(true),
        &NullReporter,
        CancellationToken::new(),
    )
    .install(&["numpy"], false)
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_package_is_unsatisfiable() {
    let scratch = TempDir::new().unwrap();
    let url = publish(scratch.path(), "main", &[("numpy", "1.0", &[])]);
    let fixture = Fixture::new(vec![url]);

    let err = fixture
        .install(&["scipy"], true, &CountingConfirm::new(true))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Unsatisfiable(_)));
    assert_eq!(err.exit_code(), 4);
    assert!(!fixture.prefix().exists());
}

#[tokio::test]
async fn test_invalid_spec_is_configuration_error() {
    let fixture = Fixture::new(vec!["https://one.example.invalid/main".into()]);
    let err = fixture
        .install(&["bad name!"], true, &CountingConfirm::new(true))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "configuration");
}
