//! End-to-end scenarios over the full task engine, driven against the
//! directory-backed remote tier and the in-process lock service.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use frostpack_archive::{create_bundle, naming, ChecksumAlgorithm};
use frostpack_config::testing::TestWorkspace;
use frostpack_config::Config;
use frostpack_engine::{
    DeleteRequest, DeletionProgress, Engine, PeriodicProgress, RestorationProgress,
    RetrieveRequest, StorageProgress, StoreRequest,
};
use frostpack_lock::{LocalLockService, LockService};
use frostpack_remote::{DirectoryBackend, RemoteBackend};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Stored { url: String },
    StoredPending { url: String, size: u64 },
    StoreFailed { file: String, cause: String },
    Restored { key: String },
    RestoreFailed { key: String, cause: String },
    Deleted { key: String },
    DeleteFailed { key: String, cause: String },
    ArchiveStored { url: String },
    ArchiveDeleted { path: String },
    PendingSucceeded { url: String },
    PendingError { path: PathBuf },
    AllPendingSucceeded,
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

impl StorageProgress for Recorder {
    fn stored(&self, _request: &StoreRequest, url: &str, _size: u64) {
        self.push(Event::Stored { url: url.to_string() });
    }
    fn stored_pending(&self, _request: &StoreRequest, url: &str, size: u64) {
        self.push(Event::StoredPending { url: url.to_string(), size });
    }
    fn store_failed(&self, request: &StoreRequest, cause: &str) {
        self.push(Event::StoreFailed {
            file: request.file_name.clone(),
            cause: cause.to_string(),
        });
    }
}

impl RestorationProgress for Recorder {
    fn restored(&self, request: &RetrieveRequest, _local: &Path) {
        self.push(Event::Restored { key: request.key.clone() });
    }
    fn restore_failed(&self, request: &RetrieveRequest, cause: &str) {
        self.push(Event::RestoreFailed {
            key: request.key.clone(),
            cause: cause.to_string(),
        });
    }
}

impl DeletionProgress for Recorder {
    fn deleted(&self, request: &DeleteRequest) {
        self.push(Event::Deleted { key: request.key.clone() });
    }
    fn delete_failed(&self, request: &DeleteRequest, cause: &str) {
        self.push(Event::DeleteFailed {
            key: request.key.clone(),
            cause: cause.to_string(),
        });
    }
}

impl PeriodicProgress for Recorder {
    fn archive_stored(&self, _storage: &str, url: &str, _checksum: &str, _size: u64) {
        self.push(Event::ArchiveStored { url: url.to_string() });
    }
    fn archive_deleted(&self, _storage: &str, path: &str) {
        self.push(Event::ArchiveDeleted { path: path.to_string() });
    }
    fn pending_action_succeeded(&self, url: &str) {
        self.push(Event::PendingSucceeded { url: url.to_string() });
    }
    fn pending_action_error(&self, path: &Path) {
        self.push(Event::PendingError { path: path.to_path_buf() });
    }
    fn all_pending_actions_succeeded(&self, _storage: &str) {
        self.push(Event::AllPendingSucceeded);
    }
}

/// Lock service that remembers every name it granted, in order.
struct RecordingLocks {
    inner: LocalLockService,
    acquired: Mutex<Vec<String>>,
}

impl RecordingLocks {
    fn new(ttl: Duration) -> Self {
        RecordingLocks {
            inner: LocalLockService::new(ttl),
            acquired: Mutex::new(Vec::new()),
        }
    }

    fn acquired(&self) -> Vec<String> {
        self.acquired.lock().unwrap().clone()
    }
}

impl LockService for RecordingLocks {
    fn run_with_lock(&self, name: &str, body: &mut dyn FnMut()) {
        self.acquired.lock().unwrap().push(name.to_string());
        self.inner.run_with_lock(name, body);
    }
    fn try_run_with_lock(&self, name: &str, timeout: Duration, body: &mut dyn FnMut()) -> bool {
        self.acquired.lock().unwrap().push(name.to_string());
        self.inner.try_run_with_lock(name, timeout, body)
    }
    fn renew(&self, name: &str) {
        self.inner.renew(name)
    }
    fn time_to_live(&self) -> Duration {
        self.inner.time_to_live()
    }
}

/// Lock service that removes a directory the moment the first STORE lock is
/// granted, standing in for a submit sweep shipping it in that window.
struct ShippingLocks {
    inner: LocalLockService,
    doomed_dir: Mutex<Option<PathBuf>>,
}

impl LockService for ShippingLocks {
    fn run_with_lock(&self, name: &str, body: &mut dyn FnMut()) {
        if name.starts_with("LOCK_STORE") {
            if let Some(dir) = self.doomed_dir.lock().unwrap().take() {
                fs::remove_dir_all(dir).unwrap();
            }
        }
        self.inner.run_with_lock(name, body);
    }
    fn try_run_with_lock(&self, name: &str, timeout: Duration, body: &mut dyn FnMut()) -> bool {
        self.inner.try_run_with_lock(name, timeout, body)
    }
    fn renew(&self, name: &str) {
        self.inner.renew(name)
    }
    fn time_to_live(&self) -> Duration {
        self.inner.time_to_live()
    }
}

fn engine(ws: &TestWorkspace, config: Config, backend: DirectoryBackend) -> Engine {
    let locks = Arc::new(LocalLockService::new(config.lock_ttl()));
    Engine::new(config, Arc::new(backend), locks)
        .unwrap_or_else(|e| panic!("engine for {:?}: {e}", ws.workspace_root))
}

fn store_request(ws: &TestWorkspace, node: &str, name: &str, content: &[u8]) -> StoreRequest {
    let source_name = format!("{}-{}", name, content.len());
    ws.create_source_file(&source_name, content).unwrap();
    StoreRequest {
        origin_url: ws.source_url(&source_name),
        file_name: name.to_string(),
        checksum: ChecksumAlgorithm::Md5.digest_bytes(content),
        algorithm: "MD5".to_string(),
        node: node.to_string(),
    }
}

fn current_dir_of(ws: &TestWorkspace, node: &str) -> Option<PathBuf> {
    let node_dir = ws.zip_dir(node);
    fs::read_dir(node_dir).ok()?.flatten().find_map(|entry| {
        let name = entry.file_name().to_string_lossy().to_string();
        naming::is_current(&name).then(|| entry.path())
    })
}

fn closed_dirs_of(ws: &TestWorkspace, node: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(ws.zip_dir(node)) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            (name.starts_with(naming::BUILDING_DIRECTORY_PREFIX) && !naming::is_current(&name))
                .then(|| entry.path())
        })
        .collect()
}

#[test]
fn store_is_idempotent_for_identical_content() {
    let ws = TestWorkspace::new().unwrap();
    let engine = engine(&ws, ws.config(), DirectoryBackend::new(&ws.remote_root));
    let recorder = Recorder::default();

    let request = store_request(&ws, "n", "data.bin", b"same content");
    engine.store(&[request.clone()], &recorder);
    engine.store(&[request], &recorder);

    assert_eq!(recorder.count(|e| matches!(e, Event::StoredPending { .. })), 2);
    let current = current_dir_of(&ws, "n").unwrap();
    let files: Vec<_> = fs::read_dir(current).unwrap().flatten().collect();
    assert_eq!(files.len(), 1);
}

#[test]
fn colliding_name_with_different_content_gets_counted_suffix() {
    let ws = TestWorkspace::new().unwrap();
    let engine = engine(&ws, ws.config(), DirectoryBackend::new(&ws.remote_root));
    let recorder = Recorder::default();

    engine.store(&[store_request(&ws, "n", "data.bin", b"first version")], &recorder);
    engine.store(&[store_request(&ws, "n", "data.bin", b"second version!")], &recorder);

    let current = current_dir_of(&ws, "n").unwrap();
    assert!(current.join("data.bin").is_file());
    assert!(current.join("data_2.bin").is_file());
    assert_eq!(
        fs::read(current.join("data_2.bin")).unwrap(),
        b"second version!"
    );

    // Both are independently retrievable from the open directory.
    let stamp = naming::strip_current_suffix(current.file_name().unwrap().to_str().unwrap());
    let archive = naming::archive_name_from_building_dir(stamp);
    let dest = ws.source_root.join("out.bin");
    engine.retrieve(
        &[RetrieveRequest {
            key: format!("n/{archive}?fileName=data_2.bin"),
            destination: dest.clone(),
        }],
        &recorder,
    );
    assert_eq!(recorder.count(|e| matches!(e, Event::Restored { .. })), 1);
    assert_eq!(fs::read(&dest).unwrap(), b"second version!");
}

#[test]
fn three_stores_past_max_size_rotate_and_submit_reports_each_file() {
    let ws = TestWorkspace::new().unwrap();
    let mut config = ws.config();
    config.archive.max_size = 1000;
    let engine = engine(&ws, config, DirectoryBackend::new(&ws.remote_root));
    let recorder = Recorder::default();

    engine.store(&[store_request(&ws, "a/b", "f1.bin", &[1u8; 400])], &recorder);
    engine.store(&[store_request(&ws, "a/b", "f2.bin", &[2u8; 400])], &recorder);
    assert!(current_dir_of(&ws, "a/b").is_some());
    assert!(closed_dirs_of(&ws, "a/b").is_empty());

    engine.store(&[store_request(&ws, "a/b", "f3.bin", &[3u8; 400])], &recorder);
    assert!(current_dir_of(&ws, "a/b").is_none());
    let closed = closed_dirs_of(&ws, "a/b");
    assert_eq!(closed.len(), 1);

    engine.submit_sweep(&recorder).unwrap();

    assert_eq!(recorder.count(|e| matches!(e, Event::ArchiveStored { .. })), 1);
    let urls: Vec<String> = recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::PendingSucceeded { url } => Some(url),
            _ => None,
        })
        .collect();
    assert_eq!(urls.len(), 3);
    let archives: Vec<&str> = urls.iter().map(|u| u.split('?').next().unwrap()).collect();
    assert!(archives.windows(2).all(|w| w[0] == w[1]));
    let mut names: Vec<&str> = urls
        .iter()
        .map(|u| u.split("?fileName=").nth(1).unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["f1.bin", "f2.bin", "f3.bin"]);

    assert!(closed_dirs_of(&ws, "a/b").is_empty());
    assert_eq!(recorder.count(|e| matches!(e, Event::AllPendingSucceeded)), 1);
}

#[test]
fn aged_current_directory_is_closed_by_sweep_and_young_one_is_left() {
    let ws = TestWorkspace::new().unwrap();
    let engine = engine(&ws, ws.config(), DirectoryBackend::new(&ws.remote_root));
    let recorder = Recorder::default();

    let aged = ws
        .zip_dir("old")
        .join(naming::new_building_dir_name(Utc::now() - chrono::Duration::hours(48)));
    fs::create_dir_all(&aged).unwrap();
    fs::write(aged.join("aged.bin"), b"aged content").unwrap();

    engine.store(&[store_request(&ws, "young", "fresh.bin", b"fresh")], &recorder);

    engine.submit_sweep(&recorder).unwrap();

    assert!(!aged.exists());
    assert!(closed_dirs_of(&ws, "old").is_empty());
    assert_eq!(recorder.count(|e| matches!(e, Event::ArchiveStored { .. })), 1);

    // The young directory stays open and untouched.
    assert!(current_dir_of(&ws, "young").is_some());
}

#[test]
fn stored_files_round_trip_through_submit_and_cache_retrieval() {
    let ws = TestWorkspace::new().unwrap();
    let mut config = ws.config();
    config.archive.max_size = 40;
    let engine = engine(&ws, config, DirectoryBackend::new(&ws.remote_root));
    let recorder = Recorder::default();

    let contents: Vec<(String, Vec<u8>)> = (0..3)
        .map(|i| (format!("file{i}.bin"), format!("payload number {i}").into_bytes()))
        .collect();
    for (name, content) in &contents {
        engine.store(&[store_request(&ws, "n", name, content)], &recorder);
    }
    // 3 * 16 bytes > 40, so the third store rotated the directory.
    assert_eq!(closed_dirs_of(&ws, "n").len(), 1);
    engine.submit_sweep(&recorder).unwrap();
    assert!(closed_dirs_of(&ws, "n").is_empty());

    let url = recorder
        .events()
        .into_iter()
        .find_map(|e| match e {
            Event::PendingSucceeded { url } => Some(url),
            _ => None,
        })
        .unwrap();
    let archive = url
        .split('?')
        .next()
        .unwrap()
        .rsplit('/')
        .next()
        .unwrap()
        .to_string();

    for (name, content) in &contents {
        let dest = ws.source_root.join(format!("roundtrip-{name}"));
        engine.retrieve(
            &[RetrieveRequest {
                key: format!("n/{archive}?fileName={name}"),
                destination: dest.clone(),
            }],
            &recorder,
        );
        assert_eq!(&fs::read(&dest).unwrap(), content, "{name}");
    }
    assert_eq!(recorder.count(|e| matches!(e, Event::RestoreFailed { .. })), 0);
}

#[test]
fn local_retrieval_serves_from_open_directory() {
    let ws = TestWorkspace::new().unwrap();
    let engine = engine(&ws, ws.config(), DirectoryBackend::new(&ws.remote_root));
    let recorder = Recorder::default();

    engine.store(&[store_request(&ws, "n", "a.bin", b"still local")], &recorder);
    let current = current_dir_of(&ws, "n").unwrap();
    let stamp = naming::strip_current_suffix(current.file_name().unwrap().to_str().unwrap());
    let archive = naming::archive_name_from_building_dir(stamp);

    let dest = ws.source_root.join("local-out.bin");
    engine.retrieve(
        &[RetrieveRequest {
            key: format!("n/{archive}?fileName=a.bin"),
            destination: dest.clone(),
        }],
        &recorder,
    );
    assert_eq!(fs::read(&dest).unwrap(), b"still local");
    // Retrieval is a pure read; the workspace copy survives.
    assert!(current.join("a.bin").is_file());
}

#[test]
fn check_pending_settles_all_four_presence_combinations() {
    let ws = TestWorkspace::new().unwrap();
    let backend = DirectoryBackend::new(&ws.remote_root);
    let stamp = "20240102030405678";
    let seed = ws.create_source_file("seed.zip", b"zip bytes").unwrap();

    // A: local and remote present.
    let dir_a = ws.zip_dir("a").join(format!("rs_zip_{stamp}"));
    fs::create_dir_all(&dir_a).unwrap();
    fs::write(dir_a.join("a.bin"), b"a").unwrap();
    backend.put(&seed, &format!("a/{stamp}.zip")).unwrap();

    // B: local only.
    let dir_b = ws.zip_dir("b").join(format!("rs_zip_{stamp}"));
    fs::create_dir_all(&dir_b).unwrap();
    fs::write(dir_b.join("b.bin"), b"b").unwrap();

    // C: remote only.
    backend.put(&seed, &format!("c/{stamp}.zip")).unwrap();

    let engine = engine(&ws, ws.config(), backend);
    let recorder = Recorder::default();
    engine.check_pending(
        &[
            format!("a/{stamp}.zip?fileName=a.bin"),
            format!("b/{stamp}.zip?fileName=b.bin"),
            format!("c/{stamp}.zip?fileName=c.bin"),
            format!("d/{stamp}.zip?fileName=d.bin"),
        ],
        &recorder,
    );

    // A reconciled: local copy deleted, emptied directory removed.
    assert!(!dir_a.exists());
    // B untouched: still nominally pending.
    assert!(dir_b.join("b.bin").is_file());
    assert_eq!(recorder.count(|e| matches!(e, Event::PendingSucceeded { .. })), 2);
    // D is data loss, reported with the path the file should have had.
    let errors: Vec<Event> = recorder
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::PendingError { .. }))
        .collect();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        Event::PendingError { path } => {
            assert_eq!(
                path,
                &ws.zip_dir("d").join(format!("rs_zip_{stamp}")).join("d.bin")
            );
        }
        _ => unreachable!(),
    }
}

#[test]
fn cold_retrieval_polls_restore_until_available() {
    let ws = TestWorkspace::new().unwrap();
    let mut config = ws.config();
    config.restore.initial_delay_ms = 20;
    config.restore.timeout_secs = 10;

    let stamp = "20240102030405678";
    let zip = ws.source_root.join(format!("{stamp}.zip"));
    let payload = ws.create_source_file("cold.bin", b"cold payload").unwrap();
    create_bundle(&zip, &[payload]).unwrap();

    let backend = DirectoryBackend::with_thaw_delay(&ws.remote_root, Duration::from_millis(60));
    backend.put(&zip, &format!("n/{stamp}.zip")).unwrap();

    let engine = engine(&ws, config, backend);
    let recorder = Recorder::default();
    let dest = ws.source_root.join("thawed.bin");
    engine.retrieve(
        &[RetrieveRequest {
            key: format!("n/{stamp}.zip?fileName=cold.bin"),
            destination: dest.clone(),
        }],
        &recorder,
    );

    assert_eq!(recorder.count(|e| matches!(e, Event::Restored { .. })), 1);
    assert_eq!(fs::read(&dest).unwrap(), b"cold payload");
    // The archive and the extracted entry both landed in the cache.
    assert!(ws.tmp_dir("n").join(format!("{stamp}.zip")).is_file());
    assert!(ws
        .tmp_dir("n")
        .join(format!("rs_zip_{stamp}"))
        .join("cold.bin")
        .is_file());
}

#[test]
fn cold_retrieval_times_out_when_restore_never_completes() {
    let ws = TestWorkspace::new().unwrap();
    let mut config = ws.config();
    config.restore.timeout_secs = 0;

    let stamp = "20240102030405678";
    let zip = ws.source_root.join(format!("{stamp}.zip"));
    let payload = ws.create_source_file("cold.bin", b"never thawed").unwrap();
    create_bundle(&zip, &[payload]).unwrap();
    let backend = DirectoryBackend::with_thaw_delay(&ws.remote_root, Duration::from_secs(600));
    backend.put(&zip, &format!("n/{stamp}.zip")).unwrap();

    let engine = engine(&ws, config, backend);
    let recorder = Recorder::default();
    engine.retrieve(
        &[RetrieveRequest {
            key: format!("n/{stamp}.zip?fileName=cold.bin"),
            destination: ws.source_root.join("never.bin"),
        }],
        &recorder,
    );

    let events = recorder.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::RestoreFailed { cause, .. } => assert!(cause.contains("timed out"), "{cause}"),
        other => panic!("expected timeout failure, got {other:?}"),
    }
}

#[test]
fn missing_remote_key_fails_retrieval_without_polling() {
    let ws = TestWorkspace::new().unwrap();
    let engine = engine(&ws, ws.config(), DirectoryBackend::new(&ws.remote_root));
    let recorder = Recorder::default();
    engine.retrieve(
        &[RetrieveRequest {
            key: "n/20240102030405678.zip?fileName=gone.bin".to_string(),
            destination: ws.source_root.join("gone.bin"),
        }],
        &recorder,
    );
    assert_eq!(recorder.count(|e| matches!(e, Event::RestoreFailed { .. })), 1);
}

#[test]
fn deleting_last_pending_file_drops_directory_and_remote_archive() {
    let ws = TestWorkspace::new().unwrap();
    let backend = DirectoryBackend::new(&ws.remote_root);
    let stamp = "20240102030405678";
    let seed = ws.create_source_file("seed.zip", b"zip bytes").unwrap();

    // A closed directory with one leftover file whose archive reached the
    // remote tier (e.g. a crash between upload and local cleanup).
    let dir = ws.zip_dir("n").join(format!("rs_zip_{stamp}"));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("last.bin"), b"last").unwrap();
    backend.put(&seed, &format!("n/{stamp}.zip")).unwrap();

    let engine = engine(&ws, ws.config(), backend);
    let recorder = Recorder::default();
    engine.delete(
        &[DeleteRequest {
            key: format!("n/{stamp}.zip?fileName=last.bin"),
            pending: true,
        }],
        &recorder,
    );

    assert_eq!(recorder.count(|e| matches!(e, Event::Deleted { .. })), 1);
    assert!(!dir.exists());
    let check = DirectoryBackend::new(&ws.remote_root);
    assert!(!check.exists(&format!("n/{stamp}.zip")).unwrap());
}

#[test]
fn remote_backed_delete_rebuilds_in_cache_and_resubmits() {
    let ws = TestWorkspace::new().unwrap();
    let backend = DirectoryBackend::new(&ws.remote_root);
    let stamp = "20240102030405678";

    let keep = ws.create_source_file("keep.bin", b"keep me").unwrap();
    let drop_file = ws.create_source_file("drop.bin", b"drop me").unwrap();
    let zip = ws.source_root.join(format!("{stamp}.zip"));
    create_bundle(&zip, &[keep, drop_file]).unwrap();
    backend.put(&zip, &format!("n/{stamp}.zip")).unwrap();

    let engine = engine(&ws, ws.config(), backend);
    let recorder = Recorder::default();
    engine.delete(
        &[DeleteRequest {
            key: format!("n/{stamp}.zip?fileName=drop.bin"),
            pending: false,
        }],
        &recorder,
    );
    assert_eq!(recorder.count(|e| matches!(e, Event::Deleted { .. })), 1);

    // The workspace directory is now a link into the rebuilt cache copy.
    let workspace_dir = ws.zip_dir("n").join(format!("rs_zip_{stamp}"));
    assert!(workspace_dir
        .symlink_metadata()
        .unwrap()
        .file_type()
        .is_symlink());
    let cache_dir = ws.tmp_dir("n").join(format!("rs_zip_{stamp}"));
    assert!(cache_dir.join("keep.bin").is_file());
    assert!(!cache_dir.join("drop.bin").exists());

    // The next sweep re-uploads the trimmed archive and removes the link,
    // keeping the shared cache copy.
    engine.submit_sweep(&recorder).unwrap();
    assert_eq!(recorder.count(|e| matches!(e, Event::ArchiveStored { .. })), 1);
    assert!(workspace_dir.symlink_metadata().is_err());
    assert!(cache_dir.join("keep.bin").is_file());

    let dest = ws.source_root.join("keep-out.bin");
    engine.retrieve(
        &[RetrieveRequest {
            key: format!("n/{stamp}.zip?fileName=keep.bin"),
            destination: dest.clone(),
        }],
        &recorder,
    );
    assert_eq!(fs::read(&dest).unwrap(), b"keep me");
}

#[test]
fn operations_on_one_archive_share_a_single_restore_token() {
    let ws = TestWorkspace::new().unwrap();
    let backend = DirectoryBackend::new(&ws.remote_root);
    let stamp = "20240102030405678";

    let keep = ws.create_source_file("keep.bin", b"keep me").unwrap();
    let drop_file = ws.create_source_file("drop.bin", b"drop me").unwrap();
    let other = ws.create_source_file("other.bin", b"untouched").unwrap();
    let zip = ws.source_root.join(format!("{stamp}.zip"));
    create_bundle(&zip, &[keep, drop_file, other]).unwrap();
    backend.put(&zip, &format!("n/{stamp}.zip")).unwrap();

    let locks = Arc::new(RecordingLocks::new(Duration::from_secs(30)));
    let engine = Engine::new(ws.config(), Arc::new(backend), locks.clone()).unwrap();
    let recorder = Recorder::default();

    engine.retrieve(
        &[RetrieveRequest {
            key: format!("n/{stamp}.zip?fileName=keep.bin"),
            destination: ws.source_root.join("keep-out.bin"),
        }],
        &recorder,
    );
    engine.delete(
        &[DeleteRequest {
            key: format!("n/{stamp}.zip?fileName=drop.bin"),
            pending: false,
        }],
        &recorder,
    );
    assert_eq!(recorder.count(|e| matches!(e, Event::Restored { .. })), 1);
    assert_eq!(recorder.count(|e| matches!(e, Event::Deleted { .. })), 1);

    // Both operations serialized on the same archive-derived name.
    let tokens: Vec<String> = locks
        .acquired()
        .into_iter()
        .filter(|name| name.starts_with("LOCK_RESTORE"))
        .collect();
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0], format!("LOCK_RESTORE_n/rs_zip_{stamp}"));
    assert_eq!(tokens[0], tokens[1]);

    // The rebuilt cache directory holds every surviving entry, not just the
    // one an earlier retrieval happened to extract.
    let cache_dir = ws.tmp_dir("n").join(format!("rs_zip_{stamp}"));
    assert!(cache_dir.join("keep.bin").is_file());
    assert!(cache_dir.join("other.bin").is_file());
    assert!(!cache_dir.join("drop.bin").exists());
}

#[test]
fn retrieval_falls_back_to_cache_when_directory_ships_mid_request() {
    let ws = TestWorkspace::new().unwrap();
    let backend = DirectoryBackend::new(&ws.remote_root);
    let stamp = "20240102030405678";

    let payload = ws.create_source_file("a.bin", b"shipped away").unwrap();
    let zip = ws.source_root.join(format!("{stamp}.zip"));
    create_bundle(&zip, &[payload]).unwrap();
    backend.put(&zip, &format!("n/{stamp}.zip")).unwrap();

    // A local copy that will vanish between dispatch and lock acquisition.
    let dir = ws.zip_dir("n").join(format!("rs_zip_{stamp}"));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("a.bin"), b"shipped away").unwrap();

    let locks = Arc::new(ShippingLocks {
        inner: LocalLockService::new(Duration::from_secs(30)),
        doomed_dir: Mutex::new(Some(dir)),
    });
    let engine = Engine::new(ws.config(), Arc::new(backend), locks).unwrap();
    let recorder = Recorder::default();

    let dest = ws.source_root.join("out.bin");
    engine.retrieve(
        &[RetrieveRequest {
            key: format!("n/{stamp}.zip?fileName=a.bin"),
            destination: dest.clone(),
        }],
        &recorder,
    );

    assert_eq!(recorder.count(|e| matches!(e, Event::RestoreFailed { .. })), 0);
    assert_eq!(recorder.count(|e| matches!(e, Event::Restored { .. })), 1);
    assert_eq!(fs::read(&dest).unwrap(), b"shipped away");
}

#[test]
fn deleting_every_entry_removes_archive_everywhere() {
    let ws = TestWorkspace::new().unwrap();
    let backend = DirectoryBackend::new(&ws.remote_root);
    let stamp = "20240102030405678";

    let only = ws.create_source_file("only.bin", b"the only one").unwrap();
    let zip = ws.source_root.join(format!("{stamp}.zip"));
    create_bundle(&zip, &[only]).unwrap();
    backend.put(&zip, &format!("n/{stamp}.zip")).unwrap();

    let engine = engine(&ws, ws.config(), backend);
    let recorder = Recorder::default();
    engine.delete(
        &[DeleteRequest {
            key: format!("n/{stamp}.zip?fileName=only.bin"),
            pending: false,
        }],
        &recorder,
    );
    engine.submit_sweep(&recorder).unwrap();

    assert_eq!(recorder.count(|e| matches!(e, Event::ArchiveDeleted { .. })), 1);
    let workspace_dir = ws.zip_dir("n").join(format!("rs_zip_{stamp}"));
    assert!(workspace_dir.symlink_metadata().is_err());
    assert!(!ws.tmp_dir("n").join(format!("rs_zip_{stamp}")).exists());
    let check = DirectoryBackend::new(&ws.remote_root);
    assert!(!check.exists(&format!("n/{stamp}.zip")).unwrap());
}

#[test]
fn clean_sweep_evicts_aged_dirs_but_skips_linked_ones() {
    let ws = TestWorkspace::new().unwrap();
    let mut config = ws.config();
    config.cache.lifetime_hours = 0;
    let engine = engine(&ws, config, DirectoryBackend::new(&ws.remote_root));

    let aged = ws.tmp_dir("n").join("rs_zip_20240102030405678");
    fs::create_dir_all(&aged).unwrap();
    fs::write(aged.join("stale.bin"), b"stale").unwrap();
    fs::write(
        ws.tmp_dir("n").join("20240102030405678.zip"),
        b"stale zip",
    )
    .unwrap();

    let linked = ws.tmp_dir("n").join("rs_zip_20240102030405679");
    fs::create_dir_all(&linked).unwrap();
    fs::write(linked.join("held.bin"), b"held").unwrap();
    fs::create_dir_all(ws.zip_dir("n")).unwrap();
    std::os::unix::fs::symlink(&linked, ws.zip_dir("n").join("rs_zip_20240102030405679"))
        .unwrap();

    // Let the files age past the zero-lifetime cutoff.
    std::thread::sleep(Duration::from_millis(50));
    engine.clean_sweep().unwrap();

    assert!(!aged.exists());
    assert!(!ws.tmp_dir("n").join("20240102030405678.zip").exists());
    assert!(linked.join("held.bin").is_file());
}

#[test]
fn concurrent_stores_and_sweeps_lose_no_files() {
    let ws = TestWorkspace::new().unwrap();
    let mut config = ws.config();
    config.archive.max_size = 1000;
    let engine = engine(&ws, config, DirectoryBackend::new(&ws.remote_root));
    let recorder = Recorder::default();

    let requests: Vec<StoreRequest> = (0..12)
        .map(|i| store_request(&ws, "n", &format!("c{i}.bin"), format!("content {i:04}").repeat(40).as_bytes()))
        .collect();

    std::thread::scope(|scope| {
        scope.spawn(|| engine.store(&requests, &recorder));
        scope.spawn(|| {
            for _ in 0..5 {
                engine.submit_sweep(&recorder).unwrap();
                std::thread::sleep(Duration::from_millis(5));
            }
        });
    });
    assert_eq!(recorder.count(|e| matches!(e, Event::StoredPending { .. })), 12);
    assert_eq!(recorder.count(|e| matches!(e, Event::StoreFailed { .. })), 0);

    // Final sweep ships whatever rotated; every file must then be
    // retrievable from exactly one place.
    engine.submit_sweep(&recorder).unwrap();
    for i in 0..12 {
        let name = format!("c{i}.bin");
        let url = recorder
            .events()
            .into_iter()
            .find_map(|e| match e {
                Event::StoredPending { url, .. } if url.ends_with(&format!("fileName={name}")) => {
                    Some(url)
                }
                _ => None,
            })
            .unwrap();
        let archive = url
            .split('?')
            .next()
            .unwrap()
            .rsplit('/')
            .next()
            .unwrap()
            .to_string();
        let dest = ws.source_root.join(format!("check-{name}"));
        engine.retrieve(
            &[RetrieveRequest {
                key: format!("n/{archive}?fileName={name}"),
                destination: dest.clone(),
            }],
            &recorder,
        );
        assert_eq!(
            fs::read(&dest).unwrap(),
            format!("content {i:04}").repeat(40).as_bytes(),
            "{name}"
        );
    }
    assert_eq!(recorder.count(|e| matches!(e, Event::RestoreFailed { .. })), 0);
}
