#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! End-to-end tests for the control plane.
//!
//! Wires the real components over a temporary directory tree and an
//! in-memory store, with the reload sentinel standing in for the proxy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::sync::watch;

use catwaf_core::Config;
use catwaf_daemon::ControlPlane;
use catwaf_daemon::gateway::ProcessGateway;
use catwaf_daemon::queue::{JobKind, NewJob};
use catwaf_daemon::reload::{ReloadCoordinator, ReloadPolicy};
use catwaf_daemon::storage::{Database, JobStatus, SiteInput};

struct Fixture {
    dir: TempDir,
    plane: ControlPlane,
    _shutdown: watch::Sender<bool>,
}

fn config_in(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.sites_dir = root.join("sites");
    config.paths.banlist_path = root.join("banlist.conf");
    config.paths.certs_dir = root.join("certs");
    config.paths.acme_dir = root.join("letsencrypt");
    config.paths.acme_webroot = root.join("webroot");
    config.acme.grace_secs = 0;
    config.acme.dns_credential = None;
    config
}

/// Build the plane with `tweak` applied to the config. Reloads touch a
/// sentinel under the temp dir with a short debounce window.
async fn fixture_with(tweak: impl FnOnce(&mut Config)) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    tweak(&mut config);

    let (shutdown, shutdown_rx) = watch::channel(false);
    let (coordinator, reload) = ReloadCoordinator::new(
        ReloadPolicy::Sentinel(dir.path().join("reload_needed")),
        Duration::from_millis(20),
        ProcessGateway::new(),
    );
    coordinator.spawn(shutdown_rx);

    let db = Database::open_in_memory().await.unwrap();
    let plane = ControlPlane::assemble(db, &config, reload);
    Fixture {
        dir,
        plane,
        _shutdown: shutdown,
    }
}

async fn fixture() -> Fixture {
    fixture_with(|_| {}).await
}

fn site(domain: &str) -> SiteInput {
    SiteInput::new(domain, json!([{"address": "10.0.0.1", "port": 8080}]))
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[tokio::test]
async fn fleet_regeneration_isolates_failures_and_reloads_once() {
    let f = fixture().await;
    for domain in ["a.test", "b.test", "c.test"] {
        f.plane.db.insert_site(&site(domain)).await.unwrap();
    }
    f.plane
        .db
        .insert_site(&SiteInput::new("broken.test", json!([])))
        .await
        .unwrap();
    std::fs::create_dir_all(f.dir.path().join("sites")).unwrap();
    std::fs::write(f.dir.path().join("sites/gone.test.conf"), "server {}").unwrap();

    let before = f.plane.reload.requested();
    let mut report = f.plane.regen.regenerate_all().await.unwrap();
    report.reload.take().unwrap().wait().await.into_result().unwrap();

    assert_eq!(report.success, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].domain, "broken.test");
    assert_eq!(report.orphans_removed, ["gone.test"]);
    assert_eq!(f.plane.reload.requested() - before, 1);

    for domain in ["a.test", "b.test", "c.test"] {
        let text = read(&f.plane.regen.config_path(domain));
        assert!(text.contains(&format!("server_name {domain};")), "{text}");
    }
    assert!(!f.plane.regen.config_path("broken.test").exists());
    assert!(!f.dir.path().join("sites/gone.test.conf").exists());
}

#[tokio::test]
async fn bursts_of_reload_requests_coalesce() {
    let f = fixture().await;
    let tickets: Vec<_> = (0..5).map(|_| f.plane.reload.request_reload()).collect();
    for ticket in tickets {
        assert!(ticket.wait().await.is_ok());
    }
    assert_eq!(f.plane.reload.requested(), 5);
    assert_eq!(f.plane.reload.executed(), 1);
    assert!(f.dir.path().join("reload_needed").exists());
}

#[tokio::test]
async fn snakeoil_site_goes_live_on_https_through_the_worker() {
    let f = fixture().await;
    let mut input = site("shop.test");
    input.ssl_enabled = true;
    input.ssl_challenge_type = "snakeoil".to_string();

    let saved = f.plane.save_site(None, &input).await.unwrap();
    let job_id = saved.issuance_job.unwrap();
    let config_path = saved.config_path.unwrap();
    assert!(!read(&config_path).contains("listen 443"));

    let worker = f.plane.worker(Duration::from_millis(10));
    let outcome = worker.run_once().await.unwrap().unwrap();
    assert_eq!(outcome.job_id, job_id);
    assert_eq!(outcome.status, JobStatus::Completed);

    let status = f.plane.certs.status("shop.test").await.unwrap();
    assert_eq!(status.state, "installed");
    assert!(status.installed_files);
    assert!(status.not_after.unwrap() > status.not_before.unwrap());

    let text = read(&config_path);
    assert!(text.contains("listen 443 ssl"), "{text}");
    assert!(text.contains("return 301 https://$host$request_uri;"), "{text}");
}

#[cfg(unix)]
#[tokio::test]
async fn http01_issuance_installs_client_lineage() {
    // `true` accepts any arguments and exits 0; the lineage is placed where
    // the client would have written it.
    let f = fixture_with(|c| c.acme.client = PathBuf::from("true")).await;
    let live = f.dir.path().join("letsencrypt/live/www.example.test");
    std::fs::create_dir_all(&live).unwrap();
    let bundle = catwaf_crypto::generate_snakeoil("www.example.test").unwrap();
    std::fs::write(live.join("fullchain.pem"), &bundle.cert_pem).unwrap();
    std::fs::write(live.join("privkey.pem"), &bundle.key_pem).unwrap();

    let mut input = site("www.example.test");
    input.ssl_enabled = true;
    let saved = f.plane.save_site(None, &input).await.unwrap();
    assert!(read(&saved.config_path.unwrap()).contains("/.well-known/acme-challenge/"));

    let issued = f.plane.certs.execute_issuance("www.example.test").await.unwrap();
    assert!(issued.reload_warning.is_none());

    let layout = f.plane.certs.layout();
    assert_eq!(read(&layout.fullchain("www.example.test")), bundle.cert_pem);
    assert_eq!(read(&layout.private_key("www.example.test")), bundle.key_pem);
    assert_eq!(
        f.plane.certs.status("www.example.test").await.unwrap().state,
        "installed"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn failed_client_run_marks_certificate_failed() {
    let f = fixture_with(|c| c.acme.client = PathBuf::from("false")).await;
    let mut input = site("www.example.test");
    input.ssl_enabled = true;
    f.plane.save_site(None, &input).await.unwrap();

    let worker = f.plane.worker(Duration::from_millis(10));
    let outcome = worker.run_once().await.unwrap().unwrap();
    assert_eq!(outcome.status, JobStatus::Failed);

    let status = f.plane.certs.status("www.example.test").await.unwrap();
    assert_eq!(status.state, "failed");
    assert!(status.last_error.is_some());
    assert!(!status.installed_files);
}

/// Write an executable shell script standing in for the certificate client.
#[cfg(unix)]
fn fake_client(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn dns01_issues_wildcard_for_base_and_installs_under_subdomain() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let bundle = catwaf_crypto::generate_snakeoil("example.test").unwrap();
    std::fs::create_dir_all(root.join("material")).unwrap();
    std::fs::write(root.join("material/fullchain.pem"), &bundle.cert_pem).unwrap();
    std::fs::write(root.join("material/privkey.pem"), &bundle.key_pem).unwrap();

    // Record the arguments, check the credentials file, then publish the
    // lineage where the client would.
    let client = root.join("fake-certbot");
    let root_str = root.display();
    fake_client(
        &client,
        &format!(
            r#"printf '%s\n' "$@" > {root_str}/args.txt
creds=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--dns-cloudflare-credentials" ]; then creds="$2"; fi
  shift
done
printf '%s' "$creds" > {root_str}/creds-path.txt
grep -q 'dns_cloudflare_api_token = tok-123' "$creds" || exit 3
live={root_str}/letsencrypt/live/example.test
mkdir -p "$live"
cp {root_str}/material/fullchain.pem {root_str}/material/privkey.pem "$live"/
"#
        ),
    );

    let f = fixture_with(|c| {
        c.paths.sites_dir = root.join("sites");
        c.paths.certs_dir = root.join("certs");
        c.paths.acme_dir = root.join("letsencrypt");
        c.acme.client = client.clone();
    })
    .await;

    let mut input = site("shop.example.test");
    input.ssl_enabled = true;
    input.ssl_challenge_type = "dns-01".to_string();
    input.dns_credential = Some("tok-123".to_string());
    let saved = f.plane.save_site(None, &input).await.unwrap();
    let job_id = saved.issuance_job.unwrap();

    let worker = f.plane.worker(Duration::from_millis(10));
    let outcome = worker.run_once().await.unwrap().unwrap();
    assert_eq!(outcome.job_id, job_id);
    assert_eq!(outcome.status, JobStatus::Completed, "{:?}", outcome.error);

    let args: Vec<String> = read(&root.join("args.txt")).lines().map(str::to_string).collect();
    let window = ["-d", "example.test", "-d", "*.example.test"];
    assert!(args.windows(4).any(|w| w == window), "{args:?}");
    assert!(args.windows(2).any(|w| w == ["--cert-name", "example.test"]), "{args:?}");
    let creds = PathBuf::from(read(&root.join("creds-path.txt")));
    assert!(!creds.exists(), "credentials file outlived the run");

    let layout = f.plane.certs.layout();
    assert_eq!(read(&layout.fullchain("shop.example.test")), bundle.cert_pem);
    assert_eq!(read(&layout.private_key("shop.example.test")), bundle.key_pem);
    let status = f.plane.certs.status("shop.example.test").await.unwrap();
    assert_eq!(status.state, "installed");
    assert_eq!(status.challenge_type.as_deref(), Some("dns-01"));
    assert!(read(&f.plane.regen.config_path("shop.example.test")).contains("listen 443 ssl"));
}

#[cfg(unix)]
#[tokio::test]
async fn retried_issuance_shows_as_issuing_until_it_gives_up() {
    let f = fixture_with(|c| {
        c.acme.client = PathBuf::from("false");
        c.queue.issuance_max_attempts = 2;
    })
    .await;
    let mut input = site("www.example.test");
    input.ssl_enabled = true;
    let job_id = f.plane.save_site(None, &input).await.unwrap().issuance_job.unwrap();
    let worker = f.plane.worker(Duration::from_millis(10));

    let first = worker.run_once().await.unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Pending);
    let status = f.plane.certs.status("www.example.test").await.unwrap();
    assert_eq!(status.state, "issuing");
    assert_eq!(status.job_id, Some(job_id));

    let second = worker.run_once().await.unwrap().unwrap();
    assert_eq!(second.job_id, job_id);
    assert_eq!(second.status, JobStatus::Failed);
    let status = f.plane.certs.status("www.example.test").await.unwrap();
    assert_eq!(status.state, "failed");
    assert!(status.last_error.is_some());
}

#[tokio::test]
async fn ban_lifecycle_keeps_artifact_in_step() {
    let f = fixture().await;
    let path = f.plane.bans.path().to_path_buf();

    let banned = f
        .plane
        .bans
        .ban(catwaf_daemon::banlist::BanRequest::new("198.51.100.7").reason("scanner"))
        .await
        .unwrap();
    assert!(banned.artifact_changed);
    assert!(banned.reload.wait().await.is_ok());
    assert!(read(&path).contains("198.51.100.7 1;"));

    let unbanned = f.plane.bans.unban("198.51.100.7").await.unwrap();
    assert!(unbanned.artifact_changed);
    assert!(!read(&path).contains("198.51.100.7"));

    let job = f
        .plane
        .queue
        .create(NewJob::new(JobKind::BanlistSync, json!({})))
        .await
        .unwrap();
    let worker = f.plane.worker(Duration::from_millis(10));
    let outcome = worker.run_once().await.unwrap().unwrap();
    assert_eq!(outcome.job_id, job);
    assert_eq!(outcome.status, JobStatus::Completed);
}
