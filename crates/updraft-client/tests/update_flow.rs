//! End-to-end update scenarios: a real developer-side pipeline produces
//! archives, patches and a signed manifest, and the client consumes them
//! through an in-memory transport.

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use updraft_builder::{Builder, BuilderConfig};
use updraft_client::{
    ClientConfig, ClientError, DownloadSink, DownloadStatus, ProgressEvent, Transport,
    UpdateState, UpdateStatus, Updater,
};
use updraft_core::{sha256_hex, sign, PlatformTag, Version};

const MIRROR: &str = "mock://cdn";

/// Serves whatever the builder deployed, keyed by URL.
#[derive(Default)]
struct MapTransport {
    entries: HashMap<String, Vec<u8>>,
}

impl MapTransport {
    fn from_deploy_dir(deploy_dir: &Path) -> Self {
        let mut transport = MapTransport::default();
        for entry in fs::read_dir(deploy_dir).unwrap() {
            let entry = entry.unwrap();
            let name = entry.file_name().into_string().unwrap();
            let data = fs::read(entry.path()).unwrap();
            transport.entries.insert(format!("{MIRROR}/{name}"), data);
        }
        transport
    }

    fn corrupt(&mut self, filename: &str) {
        let key = format!("{MIRROR}/{filename}");
        let blob = self.entries.get_mut(&key).expect("file to corrupt");
        blob.truncate(blob.len() / 2);
        blob.extend_from_slice(b"corruption");
    }

    fn remove(&mut self, filename: &str) {
        self.entries.remove(&format!("{MIRROR}/{filename}"));
    }
}

#[async_trait]
impl Transport for MapTransport {
    async fn fetch(&self, url: &str, sink: &mut DownloadSink<'_>) -> updraft_client::Result<()> {
        match self.entries.get(url) {
            Some(data) => {
                sink.set_total(data.len() as u64);
                for chunk in data.chunks(1024) {
                    sink.push(chunk)?;
                }
                Ok(())
            }
            None => Err(ClientError::BadMirror(url.to_string())),
        }
    }
}

fn tar_gz_archive(inner_name: &str, content: &[u8]) -> Vec<u8> {
    let gz = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar = tar::Builder::new(gz);
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    tar.append_data(&mut header, inner_name, content).unwrap();
    tar.into_inner().unwrap().finish().unwrap()
}

struct Fixture {
    _dev_dir: tempfile::TempDir,
    client_dir: tempfile::TempDir,
    builder: Builder,
    archives: HashMap<String, Vec<u8>>,
}

impl Fixture {
    /// Run the developer pipeline over the given `(filename, bytes)`
    /// releases, one ingestion cycle each, then sign.
    fn release(releases: &[(&str, Vec<u8>)]) -> Self {
        let _ = tracing_subscriber::fmt::try_init();
        let dev_dir = tempfile::tempdir().unwrap();
        let builder = Builder::open(BuilderConfig::new("app", dev_dir.path())).unwrap();
        builder.make_keys(2).unwrap();

        let mut manifest = builder.load_manifest().unwrap();
        let mut archives = HashMap::new();
        for (filename, bytes) in releases {
            fs::write(builder.config().inbox_dir().join(*filename), bytes).unwrap();
            builder.process_packages(&mut manifest).unwrap();
            archives.insert(filename.to_string(), bytes.clone());
        }
        builder.sign_update(&mut manifest).unwrap();

        Fixture {
            _dev_dir: dev_dir,
            client_dir: tempfile::tempdir().unwrap(),
            builder,
            archives,
        }
    }

    fn transport(&self) -> MapTransport {
        MapTransport::from_deploy_dir(&self.builder.config().deploy_dir())
    }

    fn trusted_keys(&self) -> Vec<ed25519_dalek::VerifyingKey> {
        self.builder
            .public_keys()
            .unwrap()
            .iter()
            .map(|raw| sign::decode_verifying_key(raw).unwrap())
            .collect()
    }

    fn client_config(&self, current: &str) -> ClientConfig {
        ClientConfig::new(
            "app",
            Version::parse(current).unwrap(),
            PlatformTag::parse("mac").unwrap(),
            self.client_dir.path(),
        )
        .with_mirrors(vec![MIRROR.to_string()])
    }

    /// Place the named release archive into the client staging dir, as an
    /// installed client would have it from its own installation.
    fn install(&self, config: &ClientConfig, filename: &str) {
        fs::create_dir_all(config.update_dir()).unwrap();
        fs::write(
            config.update_dir().join(filename),
            &self.archives[filename],
        )
        .unwrap();
    }
}

#[tokio::test]
async fn patch_chain_updates_to_latest() {
    let fixture = Fixture::release(&[
        ("app-mac-0.1.0.tar.gz", b"app binary version zero".to_vec()),
        ("app-mac-0.1.1.tar.gz", b"app binary version one!!".to_vec()),
    ]);
    let config = fixture.client_config("0.1.0");
    fixture.install(&config, "app-mac-0.1.0.tar.gz");

    let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let collector = events.clone();

    let mut updater = Updater::new(config.clone(), fixture.transport(), fixture.trusted_keys())
        .unwrap();
    updater.add_progress_hook(Arc::new(move |event: &ProgressEvent| {
        collector.lock().unwrap().push(event.clone());
    }));

    let status = updater.check().await.unwrap();
    assert_eq!(
        status,
        UpdateStatus::Available(Version::parse("0.1.1").unwrap())
    );

    updater.download().await.unwrap();
    assert_eq!(updater.state(), UpdateState::Downloaded);

    let staged = config.update_dir().join("app-mac-0.1.1.tar.gz");
    let staged_bytes = fs::read(&staged).unwrap();
    assert_eq!(staged_bytes, b"app binary version one!!");
    assert_eq!(
        sha256_hex(&staged_bytes),
        updater.target().unwrap().file_hash
    );

    // The superseded release was purged from staging.
    assert!(!config.update_dir().join("app-mac-0.1.0.tar.gz").exists());

    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .any(|event| event.status == DownloadStatus::Downloading));
    assert!(events
        .iter()
        .any(|event| event.status == DownloadStatus::Finished));
}

#[tokio::test]
async fn corrupt_patch_falls_back_to_full_download() {
    let fixture = Fixture::release(&[
        ("app-mac-0.1.0.tar.gz", b"app binary version zero".to_vec()),
        ("app-mac-0.1.1.tar.gz", b"app binary version one!!".to_vec()),
    ]);
    let config = fixture.client_config("0.1.0");
    fixture.install(&config, "app-mac-0.1.0.tar.gz");

    let mut transport = fixture.transport();
    transport.corrupt("app-mac-101");

    let mut updater = Updater::new(config.clone(), transport, fixture.trusted_keys()).unwrap();
    updater.check().await.unwrap();
    updater.download().await.unwrap();

    assert_eq!(updater.state(), UpdateState::Downloaded);
    let staged = fs::read(config.update_dir().join("app-mac-0.1.1.tar.gz")).unwrap();
    assert_eq!(staged, b"app binary version one!!");
}

#[tokio::test]
async fn installed_mismatch_falls_back_to_full_download() {
    let fixture = Fixture::release(&[
        ("app-mac-0.1.0.tar.gz", b"app binary version zero".to_vec()),
        ("app-mac-0.1.1.tar.gz", b"app binary version one!!".to_vec()),
    ]);
    let config = fixture.client_config("0.1.0");

    // The on-disk installed archive was tampered with or damaged.
    fs::create_dir_all(config.update_dir()).unwrap();
    fs::write(
        config.update_dir().join("app-mac-0.1.0.tar.gz"),
        b"not the recorded bytes",
    )
    .unwrap();

    let mut updater =
        Updater::new(config.clone(), fixture.transport(), fixture.trusted_keys()).unwrap();
    updater.check().await.unwrap();
    updater.download().await.unwrap();

    assert_eq!(updater.state(), UpdateState::Downloaded);
    let staged = fs::read(config.update_dir().join("app-mac-0.1.1.tar.gz")).unwrap();
    assert_eq!(staged, b"app binary version one!!");
}

#[tokio::test]
async fn key_rotation_locks_out_stale_clients_only() {
    let fixture = Fixture::release(&[(
        "app-mac-0.1.1.tar.gz",
        b"app binary version one!!".to_vec(),
    )]);

    // Capture the original key pair set, then rotate the oldest key out and
    // re-sign the manifest.
    let original_keys = fixture.trusted_keys();
    fixture.builder.rotate_keys(1).unwrap();
    let mut manifest = fixture.builder.load_manifest().unwrap();
    fixture.builder.sign_update(&mut manifest).unwrap();

    let config = fixture.client_config("0.1.0");

    // A client bundling only the now-revoked first key rejects the manifest.
    let mut stale = Updater::new(
        config.clone(),
        fixture.transport(),
        vec![original_keys[0]],
    )
    .unwrap();
    let err = stale.check().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Core(updraft_core::CoreError::SignatureInvalid)
    ));
    assert_eq!(stale.state(), UpdateState::Failed);

    // A client bundling both original keys still overlaps the signer set.
    let mut overlapping =
        Updater::new(config, fixture.transport(), original_keys).unwrap();
    let status = overlapping.check().await.unwrap();
    assert_eq!(
        status,
        UpdateStatus::Available(Version::parse("0.1.1").unwrap())
    );
}

#[tokio::test]
async fn all_mirrors_failing_is_terminal() {
    let fixture = Fixture::release(&[
        ("app-mac-0.1.0.tar.gz", b"app binary version zero".to_vec()),
        ("app-mac-0.1.1.tar.gz", b"app binary version one!!".to_vec()),
    ]);
    let config = fixture.client_config("0.1.0");

    // No installed base (patch path impossible) and no full archive served.
    let mut transport = fixture.transport();
    transport.remove("app-mac-0.1.1.tar.gz");
    transport.remove("app-mac-101");

    let mut updater = Updater::new(config, transport, fixture.trusted_keys()).unwrap();
    updater.check().await.unwrap();
    let err = updater.download().await.unwrap_err();
    assert!(matches!(err, ClientError::AllMirrorsFailed { .. }));
    assert_eq!(updater.state(), UpdateState::Failed);
}

#[tokio::test]
async fn cancellation_between_states_fails_the_run() {
    let fixture = Fixture::release(&[
        ("app-mac-0.1.0.tar.gz", b"app binary version zero".to_vec()),
        ("app-mac-0.1.1.tar.gz", b"app binary version one!!".to_vec()),
    ]);
    let config = fixture.client_config("0.1.0");
    fixture.install(&config, "app-mac-0.1.0.tar.gz");

    let mut updater =
        Updater::new(config, fixture.transport(), fixture.trusted_keys()).unwrap();
    updater.check().await.unwrap();

    updater.cancel_flag().cancel();
    let err = updater.download().await.unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));
    assert_eq!(updater.state(), UpdateState::Failed);
}

#[tokio::test]
async fn up_to_date_client_reaches_ready_without_downloads() {
    let fixture = Fixture::release(&[(
        "app-mac-0.1.1.tar.gz",
        b"app binary version one!!".to_vec(),
    )]);
    let config = fixture.client_config("0.1.1");

    let mut updater =
        Updater::new(config, fixture.transport(), fixture.trusted_keys()).unwrap();
    let status = updater.check().await.unwrap();
    assert_eq!(status, UpdateStatus::UpToDate);
    assert_eq!(updater.state(), UpdateState::Ready);
}

#[tokio::test]
async fn downloaded_archive_extracts_into_staging() {
    let v0 = tar_gz_archive("app", b"executable payload v0");
    let v1 = tar_gz_archive("app", b"executable payload v1, now larger");
    let fixture = Fixture::release(&[
        ("app-mac-0.1.0.tar.gz", v0),
        ("app-mac-0.1.1.tar.gz", v1),
    ]);
    let config = fixture.client_config("0.1.0");
    fixture.install(&config, "app-mac-0.1.0.tar.gz");

    let mut updater =
        Updater::new(config.clone(), fixture.transport(), fixture.trusted_keys()).unwrap();
    updater.check().await.unwrap();
    updater.download().await.unwrap();
    updater.extract().await.unwrap();

    assert_eq!(updater.state(), UpdateState::Extracted);
    let extracted = fs::read(config.update_dir().join("app")).unwrap();
    assert_eq!(extracted, b"executable payload v1, now larger");
}

#[tokio::test]
async fn state_machine_rejects_out_of_order_calls() {
    let fixture = Fixture::release(&[(
        "app-mac-0.1.1.tar.gz",
        b"app binary version one!!".to_vec(),
    )]);
    let config = fixture.client_config("0.1.0");

    let mut updater =
        Updater::new(config, fixture.transport(), fixture.trusted_keys()).unwrap();
    let err = updater.download().await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidTransition { .. }));
    let err = updater.extract().await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidTransition { .. }));
}
