use std::future::Future;
use std::io::{self, Cursor, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use blob_store::{build_path, BlobStore, BlobStoreError, FileId, Integrity};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, ReadBuf};
use tokio::time::Sleep;

fn sample(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

/// How a [`FlakySource`] misbehaves once it has been rewound a second time.
#[derive(Clone, Copy)]
enum Flake {
    /// Reads fail once this many bytes have been read
    FailAfter(usize),
    /// The stream ends early, as if the content changed
    Truncate(usize),
    /// Reads never complete past this point
    Stall(usize),
    /// Reads past this point wait for the given duration once
    Pause(usize, Duration),
}

impl Flake {
    fn at(&self) -> usize {
        match *self {
            Flake::FailAfter(at) | Flake::Truncate(at) | Flake::Stall(at) => at,
            Flake::Pause(at, _) => at,
        }
    }
}

/// Behaves on the hashing pass, misbehaves on the copy pass.
///
/// `new_file` seeks once before hashing and once before copying, so the
/// second seek marks the start of the copy pass. Reads on that pass never
/// cross the flake point in one go.
struct FlakySource {
    data: Vec<u8>,
    pos: usize,
    seeks: usize,
    flake: Flake,
    pause: Option<Pin<Box<Sleep>>>,
    paused: bool,
}

impl FlakySource {
    fn new(data: Vec<u8>, flake: Flake) -> Self {
        Self {
            data,
            pos: 0,
            seeks: 0,
            flake,
            pause: None,
            paused: false,
        }
    }
}

impl AsyncRead for FlakySource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut end = this.data.len().min(this.pos + buf.remaining());

        if this.seeks >= 2 {
            let at = this.flake.at();
            if this.pos >= at {
                match this.flake {
                    Flake::FailAfter(_) => {
                        return Poll::Ready(Err(io::Error::other("network dropped")));
                    }
                    Flake::Truncate(_) => return Poll::Ready(Ok(())),
                    Flake::Stall(_) => return Poll::Pending,
                    Flake::Pause(_, duration) if !this.paused => {
                        let sleep = this
                            .pause
                            .get_or_insert_with(|| Box::pin(tokio::time::sleep(duration)));
                        if sleep.as_mut().poll(cx).is_pending() {
                            return Poll::Pending;
                        }
                        this.paused = true;
                    }
                    Flake::Pause(..) => {}
                }
            } else {
                end = end.min(at);
            }
        }

        buf.put_slice(&this.data[this.pos..end]);
        this.pos = end;
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for FlakySource {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        match position {
            SeekFrom::Start(pos) => {
                this.seeks += 1;
                this.pos = (pos as usize).min(this.data.len());
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "only absolute seeks",
            )),
        }
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.pos as u64))
    }
}

/// Files under the base directory, across all shards.
fn stored_files(store: &BlobStore) -> usize {
    std::fs::read_dir(store.base_dir())
        .unwrap()
        .map(|shard| std::fs::read_dir(shard.unwrap().path()).unwrap().count())
        .sum()
}

#[tokio::test]
async fn test_digests_match_reference_hashes() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = BlobStore::new_ephemeral(temp_dir.path()).await.unwrap();

    for (seed, len) in [(1, 16), (2, 1_000), (3, 65_536), (4, 330_070)] {
        let data = sample(seed, len);
        let id = store
            .new_file(&mut Cursor::new(data.clone()), "mkv")
            .await
            .unwrap();
        let record = store.get_file(id).await.unwrap();

        assert_eq!(record.size, len as u64);
        assert_eq!(record.digest.md5, <[u8; 16]>::from(Md5::digest(&data)));
        assert_eq!(record.digest.sha1, <[u8; 20]>::from(Sha1::digest(&data)));
        assert_eq!(record.digest.sha256, <[u8; 32]>::from(Sha256::digest(&data)));

        let sha256_hex = hex::encode(Sha256::digest(&data));
        assert_eq!(
            record.relative_path,
            format!("{}/{}.mkv", &sha256_hex[..2], sha256_hex)
        );
        assert_eq!(std::fs::read(&record.absolute_path).unwrap(), data);
    }
}

#[tokio::test]
async fn test_known_path_layout() {
    let sha256: [u8; 32] =
        hex::decode("6bebd6bfc85e9840e6bb47e1f329b5453afd184fa7fe2d52da3cd46200062ddc")
            .unwrap()
            .try_into()
            .unwrap();
    assert_eq!(
        build_path(&sha256, "mkv"),
        "6b/6bebd6bfc85e9840e6bb47e1f329b5453afd184fa7fe2d52da3cd46200062ddc.mkv"
    );
}

#[tokio::test]
async fn test_duplicate_leaves_single_record() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = BlobStore::new_ephemeral(temp_dir.path()).await.unwrap();

    let data = sample(5, 10_000);
    store
        .new_file(&mut Cursor::new(data.clone()), "mp4")
        .await
        .unwrap();
    let err = store
        .new_file(&mut Cursor::new(data), "mp4")
        .await
        .unwrap_err();

    assert!(matches!(err, BlobStoreError::DuplicateContent(_)));
    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(store.list_files().await.unwrap().len(), 1);
}

async fn race_identical_content(store: BlobStore) {
    let data = sample(6, 200_000);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let data = data.clone();
        handles.push(tokio::spawn(async move {
            store.new_file(&mut Cursor::new(data), "webm").await
        }));
    }

    let results = futures::future::join_all(handles).await;
    let mut stored = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => stored += 1,
            Err(BlobStoreError::DuplicateContent(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(stored, 1);
    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(stored_files(&store), 1);
    let record = &store.list_files().await.unwrap()[0];
    assert_eq!(std::fs::read(&record.absolute_path).unwrap(), data);
}

async fn race_distinct_content(store: BlobStore) {
    let mut handles = Vec::new();
    for seed in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .new_file(&mut Cursor::new(sample(100 + seed, 50_000)), "mkv")
                .await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
    assert_eq!(store.total_size().await.unwrap(), 8 * 50_000);
    assert_eq!(stored_files(&store), 8);
}

#[tokio::test]
async fn test_concurrent_identical_content_single_winner() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = BlobStore::new_ephemeral(temp_dir.path()).await.unwrap();
    race_identical_content(store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_content_file_backed() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = BlobStore::new_local(temp_dir.path()).await.unwrap();
    race_identical_content(store).await;
}

#[tokio::test]
async fn test_concurrent_distinct_content() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = BlobStore::new_ephemeral(temp_dir.path()).await.unwrap();
    race_distinct_content(store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_content_file_backed() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = BlobStore::new_local(temp_dir.path()).await.unwrap();
    race_distinct_content(store).await;
}

#[tokio::test]
async fn test_writer_outlasting_sqlite_default_busy_timeout() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = BlobStore::new_local(temp_dir.path()).await.unwrap();

    // Holds the index write lock for longer than SQLite's usual 5s busy wait.
    let slow = {
        let store = store.clone();
        tokio::spawn(async move {
            let mut source = FlakySource::new(
                sample(20, 200_000),
                Flake::Pause(100_000, Duration::from_secs(6)),
            );
            store.new_file(&mut source, "mkv").await
        })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;

    let started = Instant::now();
    let fast = store
        .new_file(&mut Cursor::new(sample(21, 4_096)), "mkv")
        .await;
    let waited = started.elapsed();

    let slow = slow.await.unwrap();
    assert!(slow.is_ok(), "slow writer failed: {:?}", slow);
    assert!(fast.is_ok(), "queued writer failed after {:?}: {:?}", waited, fast);
    assert_eq!(store.count().await.unwrap(), 2);
}

async fn assert_cancelled_store_leaves_nothing(store: BlobStore) {
    let data = sample(12, 300_000);

    let mut source = FlakySource::new(data.clone(), Flake::Stall(100_000));
    let result = tokio::time::timeout(
        Duration::from_millis(300),
        store.new_file(&mut source, "mkv"),
    )
    .await;
    assert!(result.is_err(), "store should still be copying");

    assert_eq!(store.count().await.unwrap(), 0);
    assert_eq!(stored_files(&store), 0);

    // The same content can be stored afterwards.
    let id = store
        .new_file(&mut Cursor::new(data.clone()), "mkv")
        .await
        .unwrap();
    let record = store.get_file(id).await.unwrap();
    assert_eq!(std::fs::read(&record.absolute_path).unwrap(), data);
}

#[tokio::test]
async fn test_cancelled_copy_leaves_nothing() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = BlobStore::new_ephemeral(temp_dir.path()).await.unwrap();
    assert_cancelled_store_leaves_nothing(store).await;
}

#[tokio::test]
async fn test_cancelled_copy_leaves_nothing_file_backed() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = BlobStore::new_local(temp_dir.path()).await.unwrap();
    assert_cancelled_store_leaves_nothing(store).await;
}

#[tokio::test]
async fn test_read_failure_during_copy_rolls_back() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = BlobStore::new_ephemeral(temp_dir.path()).await.unwrap();

    let data = sample(7, 300_000);
    let mut source = FlakySource::new(data, Flake::FailAfter(100_000));
    let err = store.new_file(&mut source, "mkv").await.unwrap_err();

    assert!(matches!(err, BlobStoreError::Read(_)));
    assert_eq!(store.count().await.unwrap(), 0);
    assert_eq!(stored_files(&store), 0);

    // The identifier was never committed; the next store gets the first one.
    let id = store
        .new_file(&mut Cursor::new(sample(8, 64)), "mkv")
        .await
        .unwrap();
    assert_eq!(id, FileId::new(1));
}

#[tokio::test]
async fn test_source_changed_between_passes() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = BlobStore::new_ephemeral(temp_dir.path()).await.unwrap();

    let mut source = FlakySource::new(sample(9, 100_000), Flake::Truncate(70_000));
    let err = store.new_file(&mut source, "mkv").await.unwrap_err();

    match err {
        BlobStoreError::Read(e) => assert_eq!(e.kind(), io::ErrorKind::InvalidData),
        other => panic!("expected a read error, got {}", other),
    }
    assert_eq!(store.count().await.unwrap(), 0);
    assert_eq!(stored_files(&store), 0);
}

#[tokio::test]
async fn test_staged_read_once_source() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = BlobStore::new_ephemeral(temp_dir.path()).await.unwrap();

    let data = sample(10, 123_456);
    let mut download: &[u8] = &data;
    let mut staging = store.stage(&mut download).await.unwrap();

    let id = store.new_file(&mut staging, "mp4").await.unwrap();
    staging.release().await.unwrap();

    let (record, mut file) = store.open_file(id).await.unwrap();
    let mut stored = Vec::new();
    file.read_to_end(&mut stored).await.unwrap();
    assert_eq!(stored, data);
    assert_eq!(store.verify_file(record.id).await.unwrap(), Integrity::Intact);
}

#[tokio::test]
async fn test_local_store_persists_across_reopen() {
    let temp_dir = tempfile::tempdir().unwrap();
    let data = sample(11, 4_096);

    let id = {
        let store = BlobStore::new_local(temp_dir.path()).await.unwrap();
        store
            .new_file(&mut Cursor::new(data.clone()), "webm")
            .await
            .unwrap()
    };

    assert!(temp_dir.path().join("files.db").exists());

    let store = BlobStore::new_local(temp_dir.path()).await.unwrap();
    let record = store.get_file(id).await.unwrap();
    assert_eq!(
        record.absolute_path,
        temp_dir.path().join("blobs").join(&record.relative_path)
    );
    assert_eq!(std::fs::read(&record.absolute_path).unwrap(), data);

    store.delete_file(id).await.unwrap();
    assert!(!record.absolute_path.exists());
    assert!(matches!(
        store.delete_file(id).await,
        Err(BlobStoreError::NotFound(_))
    ));
}
