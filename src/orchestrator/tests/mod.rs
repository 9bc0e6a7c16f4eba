use super::*;
use crate::config::{CollisionPolicy, RetryConfig};
use crate::extraction::test_helpers::{MockArchive, MockOpener, write_zip};
use std::time::Duration;
use tempfile::TempDir;

fn fast_config() -> Config {
    let mut config = Config::default();
    config.retry = RetryConfig {
        max_attempts: 3,
        delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 1.0,
        jitter: false,
    };
    config
}

fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"placeholder").unwrap();
    path
}

fn extractor(config: Config, opener: &MockOpener) -> DirectoryExtractor {
    DirectoryExtractor::with_opener(config, Arc::new(opener.clone())).unwrap()
}

/// Sorted names of the files directly inside `dir`
fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// --- Construction and discovery ---

#[test]
fn invalid_config_is_rejected() {
    let mut config = fast_config();
    config.retry.max_attempts = 0;
    let result = DirectoryExtractor::with_opener(config, Arc::new(MockOpener::new()));
    assert!(matches!(result, Err(Error::Config { .. })));
}

#[tokio::test]
async fn missing_directory_is_a_run_level_error() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("nope");

    let err = extractor(fast_config(), &MockOpener::new())
        .run(&missing)
        .await
        .unwrap_err();

    match err {
        Error::DirectoryUnavailable { path, .. } => assert_eq!(path, missing),
        other => panic!("expected DirectoryUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_directory_reports_nothing_found() {
    let temp = TempDir::new().unwrap();
    let opener = MockOpener::new();

    let summary = extractor(fast_config(), &opener)
        .run(temp.path())
        .await
        .unwrap();

    assert!(!summary.found_any);
    assert_eq!(summary.processed + summary.failed + summary.skipped, 0);
    assert_eq!(opener.opens(), 0);
}

#[tokio::test]
async fn unsupported_files_and_directories_are_ignored() {
    let temp = TempDir::new().unwrap();
    touch(temp.path(), "notes.txt");
    touch(temp.path(), "movie.7z");
    std::fs::create_dir(temp.path().join("folder.zip")).unwrap();
    let opener = MockOpener::new();

    let summary = extractor(fast_config(), &opener)
        .run(temp.path())
        .await
        .unwrap();

    assert!(!summary.found_any);
    assert!(summary.outcomes.is_empty());
    assert_eq!(opener.opens(), 0);
    assert!(temp.path().join("notes.txt").exists());
}

// --- Per-archive outcomes ---

#[tokio::test]
async fn successful_archive_is_extracted_and_deleted() {
    let temp = TempDir::new().unwrap();
    let archive = touch(temp.path(), "a.zip");
    let opener = MockOpener::new().with(
        "a.zip",
        MockArchive::with_files(&[("x.txt", b"hello"), ("sub/", b""), ("sub/y.txt", b"world")]),
    );

    let summary = extractor(fast_config(), &opener)
        .run(temp.path())
        .await
        .unwrap();

    assert!(summary.found_any);
    assert_eq!(summary.processed, 1);
    assert_eq!(
        summary.outcome_of(&archive),
        Some(ProcessingOutcome::Succeeded)
    );
    assert_eq!(
        std::fs::read(temp.path().join("a/x.txt")).unwrap(),
        b"hello"
    );
    assert_eq!(
        std::fs::read(temp.path().join("a/sub/y.txt")).unwrap(),
        b"world"
    );
    assert!(!archive.exists(), "source archive should be deleted");
}

#[tokio::test]
async fn keep_originals_leaves_the_archive() {
    let temp = TempDir::new().unwrap();
    let archive = touch(temp.path(), "a.zip");
    let opener =
        MockOpener::new().with("a.zip", MockArchive::with_files(&[("x.txt", b"hello")]));
    let mut config = fast_config();
    config.extraction.keep_originals = true;

    let summary = extractor(config, &opener).run(temp.path()).await.unwrap();

    assert_eq!(summary.processed, 1);
    assert!(archive.exists());
}

#[tokio::test]
async fn corrupt_archive_fails_fast_and_is_kept() {
    let temp = TempDir::new().unwrap();
    let archive = touch(temp.path(), "c.rar");
    let opener = MockOpener::new();

    let summary = extractor(fast_config(), &opener)
        .run(temp.path())
        .await
        .unwrap();

    assert_eq!(
        summary.outcome_of(&archive),
        Some(ProcessingOutcome::FailedCorrupt)
    );
    assert_eq!(summary.failed, 1);
    assert_eq!(opener.opens(), 1, "corruption must not be retried");
    assert_eq!(opener.extract_calls(), 0);
    assert!(archive.exists());
    assert!(!temp.path().join("c").exists());
}

#[tokio::test]
async fn encrypted_archive_without_candidates_fails_no_password() {
    let temp = TempDir::new().unwrap();
    let archive = touch(temp.path(), "b.zip");
    let opener = MockOpener::new().with(
        "b.zip",
        MockArchive {
            checks_password: true,
            ..MockArchive::with_files(&[("s.txt", b"secret")]).encrypted("correct")
        },
    );

    let summary = extractor(fast_config(), &opener)
        .run(temp.path())
        .await
        .unwrap();

    assert_eq!(
        summary.outcome_of(&archive),
        Some(ProcessingOutcome::FailedNoPassword)
    );
    assert_eq!(opener.extract_calls(), 0);
    assert!(archive.exists());
}

#[tokio::test]
async fn encrypted_archive_with_only_wrong_candidates_fails_no_password() {
    let temp = TempDir::new().unwrap();
    let archive = touch(temp.path(), "b.zip");
    let opener = MockOpener::new().with(
        "b.zip",
        MockArchive {
            checks_password: true,
            ..MockArchive::with_files(&[("s.txt", b"secret")]).encrypted("correct")
        },
    );
    let mut config = fast_config();
    config.passwords.passwords = vec!["wrong1".into(), "wrong2".into()];

    let summary = extractor(config, &opener).run(temp.path()).await.unwrap();

    assert_eq!(
        summary.outcome_of(&archive),
        Some(ProcessingOutcome::FailedNoPassword)
    );
    assert_eq!(opener.probed(), vec!["wrong1", "wrong2"]);
    assert!(archive.exists());
}

#[tokio::test]
async fn encrypted_archive_is_unlocked_by_a_candidate() {
    let temp = TempDir::new().unwrap();
    let archive = touch(temp.path(), "b.zip");
    let opener = MockOpener::new().with(
        "b.zip",
        MockArchive {
            checks_password: true,
            ..MockArchive::with_files(&[("s.txt", b"secret")]).encrypted("correct")
        },
    );
    let mut config = fast_config();
    config.passwords.passwords = vec!["wrong1".into(), "correct".into(), "wrong2".into()];
    let extractor = extractor(config, &opener);
    let mut rx = extractor.subscribe();

    let summary = extractor.run(temp.path()).await.unwrap();

    assert_eq!(
        summary.outcome_of(&archive),
        Some(ProcessingOutcome::Succeeded)
    );
    assert_eq!(opener.probed(), vec!["wrong1", "correct"]);
    assert_eq!(
        std::fs::read(temp.path().join("b/s.txt")).unwrap(),
        b"secret"
    );
    assert!(
        drain(&mut rx)
            .iter()
            .any(|e| matches!(e, Event::PasswordResolved { .. }))
    );
}

#[tokio::test]
async fn continuation_volume_is_skipped_and_kept() {
    let temp = TempDir::new().unwrap();
    let first = touch(temp.path(), "set.part1.rar");
    let second = touch(temp.path(), "set.part2.rar");
    let opener = MockOpener::new().with(
        "set.part1.rar",
        MockArchive::with_files(&[("movie.mkv", b"frames")]),
    );
    let mut config = fast_config();
    config.extraction.keep_originals = true;

    let summary = extractor(config, &opener).run(temp.path()).await.unwrap();

    assert_eq!(summary.outcome_of(&first), Some(ProcessingOutcome::Succeeded));
    assert_eq!(summary.outcome_of(&second), Some(ProcessingOutcome::Skipped));
    assert_eq!(summary.skipped, 1);
    assert!(temp.path().join("set/movie.mkv").exists());
    assert!(second.exists());
}

// --- Retry ---

#[tokio::test]
async fn transient_io_failure_is_retried_until_success() {
    let temp = TempDir::new().unwrap();
    let archive = touch(temp.path(), "a.zip");
    let opener = MockOpener::new()
        .with("a.zip", MockArchive::with_files(&[("x.txt", b"hello")]))
        .fail_extractions(2);
    let extractor = extractor(fast_config(), &opener);
    let mut rx = extractor.subscribe();

    let summary = extractor.run(temp.path()).await.unwrap();

    assert_eq!(
        summary.outcome_of(&archive),
        Some(ProcessingOutcome::Succeeded)
    );
    assert_eq!(opener.extract_calls(), 3);
    let retries: Vec<u32> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            Event::RetryScheduled { attempt, .. } => Some(attempt),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2]);
}

#[tokio::test]
async fn exhausted_retries_fail_io_and_keep_the_archive() {
    let temp = TempDir::new().unwrap();
    let archive = touch(temp.path(), "a.zip");
    let opener = MockOpener::new()
        .with("a.zip", MockArchive::with_files(&[("x.txt", b"hello")]))
        .fail_extractions(10);

    let summary = extractor(fast_config(), &opener)
        .run(temp.path())
        .await
        .unwrap();

    assert_eq!(
        summary.outcome_of(&archive),
        Some(ProcessingOutcome::FailedIo)
    );
    assert_eq!(opener.extract_calls(), 3);
    assert!(archive.exists());
}

#[tokio::test]
async fn verification_mismatch_is_reported_after_retries() {
    let temp = TempDir::new().unwrap();
    let archive = touch(temp.path(), "a.zip");
    let opener = MockOpener::new().with(
        "a.zip",
        MockArchive {
            failing_members: vec!["y.txt".into()],
            ..MockArchive::with_files(&[("x.txt", b"ok"), ("y.txt", b"bad")])
        },
    );

    let summary = extractor(fast_config(), &opener)
        .run(temp.path())
        .await
        .unwrap();

    assert_eq!(
        summary.outcome_of(&archive),
        Some(ProcessingOutcome::FailedVerification)
    );
    assert_eq!(opener.extract_calls(), 3);
    assert!(archive.exists());
}

fn half_broken_archive() -> MockArchive {
    MockArchive {
        failing_members: vec!["y.txt".into()],
        ..MockArchive::with_files(&[("x.txt", b"ok"), ("y.txt", b"bad")])
    }
}

#[tokio::test]
async fn retries_under_rename_do_not_duplicate_placed_files() {
    let temp = TempDir::new().unwrap();
    let archive = touch(temp.path(), "a.zip");
    let opener = MockOpener::new().with("a.zip", half_broken_archive());
    let mut config = fast_config();
    config.extraction.collision = CollisionPolicy::Rename;

    let summary = extractor(config, &opener).run(temp.path()).await.unwrap();

    assert_eq!(
        summary.outcome_of(&archive),
        Some(ProcessingOutcome::FailedVerification)
    );
    assert_eq!(opener.extract_calls(), 3);
    assert_eq!(file_names(&temp.path().join("a")), vec!["x.txt"]);
}

#[tokio::test]
async fn retries_under_rename_keep_using_the_first_renamed_path() {
    let temp = TempDir::new().unwrap();
    touch(temp.path(), "a.zip");
    std::fs::create_dir(temp.path().join("a")).unwrap();
    std::fs::write(temp.path().join("a/x.txt"), b"old").unwrap();
    let opener = MockOpener::new().with("a.zip", half_broken_archive());
    let mut config = fast_config();
    config.extraction.collision = CollisionPolicy::Rename;

    extractor(config, &opener).run(temp.path()).await.unwrap();

    let dest = temp.path().join("a");
    assert_eq!(file_names(&dest), vec!["x.txt", "x_1.txt"]);
    assert_eq!(std::fs::read(dest.join("x.txt")).unwrap(), b"old");
    assert_eq!(std::fs::read(dest.join("x_1.txt")).unwrap(), b"ok");
}

#[tokio::test]
async fn retries_under_overwrite_leave_one_copy() {
    let temp = TempDir::new().unwrap();
    touch(temp.path(), "a.zip");
    std::fs::create_dir(temp.path().join("a")).unwrap();
    std::fs::write(temp.path().join("a/x.txt"), b"old").unwrap();
    let opener = MockOpener::new().with("a.zip", half_broken_archive());
    let mut config = fast_config();
    config.extraction.collision = CollisionPolicy::Overwrite;

    extractor(config, &opener).run(temp.path()).await.unwrap();

    let dest = temp.path().join("a");
    assert_eq!(opener.extract_calls(), 3);
    assert_eq!(file_names(&dest), vec!["x.txt"]);
    assert_eq!(std::fs::read(dest.join("x.txt")).unwrap(), b"ok");
}

// --- Disk space ---

#[tokio::test]
async fn unreadable_size_estimate_does_not_block_extraction() {
    let temp = TempDir::new().unwrap();
    let archive = touch(temp.path(), "a.zip");
    // open #1 is the integrity check, open #2 the size estimate
    let opener = MockOpener::new()
        .with("a.zip", MockArchive::with_files(&[("x.txt", b"hello")]))
        .fail_open_number(2);
    let mut config = fast_config();
    config.disk_space.block_on_insufficient = true;

    let summary = extractor(config, &opener).run(temp.path()).await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(
        summary.outcome_of(&archive),
        Some(ProcessingOutcome::Succeeded)
    );
    assert_eq!(opener.extract_calls(), 1);
    assert_eq!(
        std::fs::read(temp.path().join("a/x.txt")).unwrap(),
        b"hello"
    );
    assert!(!archive.exists());
}

#[tokio::test]
async fn insufficient_space_blocks_when_configured() {
    let temp = TempDir::new().unwrap();
    let archive = touch(temp.path(), "huge.zip");
    let opener = MockOpener::new().with(
        "huge.zip",
        MockArchive {
            declared_size: Some(u64::MAX / 4),
            ..MockArchive::with_files(&[("a.bin", b"a"), ("b.bin", b"b")])
        },
    );
    let mut config = fast_config();
    config.disk_space.block_on_insufficient = true;

    let summary = extractor(config, &opener).run(temp.path()).await.unwrap();

    assert_eq!(
        summary.outcome_of(&archive),
        Some(ProcessingOutcome::FailedIo)
    );
    assert_eq!(opener.extract_calls(), 0, "extraction must not be invoked");
    assert!(archive.exists());
}

#[tokio::test]
async fn disabled_space_check_skips_the_listing() {
    let temp = TempDir::new().unwrap();
    touch(temp.path(), "a.zip");
    let opener =
        MockOpener::new().with("a.zip", MockArchive::with_files(&[("x.txt", b"hello")]));
    let mut config = fast_config();
    config.disk_space.enabled = false;

    let summary = extractor(config, &opener).run(temp.path()).await.unwrap();

    assert_eq!(summary.processed, 1);
    // integrity probe, extraction, verification listing
    assert_eq!(opener.opens(), 3);
}

// --- Events ---

#[tokio::test]
async fn events_follow_the_archive_lifecycle() {
    let temp = TempDir::new().unwrap();
    touch(temp.path(), "a.zip");
    let opener =
        MockOpener::new().with("a.zip", MockArchive::with_files(&[("x.txt", b"hello")]));
    let extractor = extractor(fast_config(), &opener);
    let mut rx = extractor.subscribe();

    extractor.run(temp.path()).await.unwrap();

    let kinds: Vec<&'static str> = drain(&mut rx)
        .iter()
        .map(|e| match e {
            Event::ArchiveStarted { .. } => "started",
            Event::PasswordResolved { .. } => "password",
            Event::Extracting { .. } => "extracting",
            Event::Reconciling { .. } => "reconciling",
            Event::Verifying { .. } => "verifying",
            Event::RetryScheduled { .. } => "retry",
            Event::ArchiveFinished { .. } => "finished",
            Event::RunFinished { .. } => "run_finished",
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["started", "reconciling", "verifying", "finished", "run_finished"]
    );
}

// --- Real ZIP through the default opener ---

#[tokio::test]
async fn default_opener_extracts_a_real_zip_with_rename() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("a.zip");
    write_zip(&archive, &[("x.txt", b"new")], None);
    std::fs::create_dir(temp.path().join("a")).unwrap();
    std::fs::write(temp.path().join("a/x.txt"), b"old").unwrap();

    let mut config = fast_config();
    config.extraction.collision = CollisionPolicy::Rename;
    let summary = DirectoryExtractor::new(config)
        .unwrap()
        .run(temp.path())
        .await
        .unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(std::fs::read(temp.path().join("a/x.txt")).unwrap(), b"old");
    assert_eq!(std::fs::read(temp.path().join("a/x_1.txt")).unwrap(), b"new");
    assert!(!archive.exists());
}

#[tokio::test]
async fn stop_request_leaves_archives_untouched() {
    let temp = TempDir::new().unwrap();
    let archive = touch(temp.path(), "a.zip");
    let opener =
        MockOpener::new().with("a.zip", MockArchive::with_files(&[("x.txt", b"hello")]));
    let extractor = extractor(fast_config(), &opener);

    extractor.request_stop();
    let summary = extractor.run(temp.path()).await.unwrap();

    assert!(summary.found_any);
    assert!(summary.outcomes.is_empty());
    assert_eq!(opener.opens(), 0);
    assert!(archive.exists());
}
