//! Integration test: download outcomes (timeout, size ceiling, upstream
//! errors, cancellation) and the cleanup guarantees that follow them.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{key, video, Harness, StreamScript};
use tempfile::tempdir;
use tokio::time::Instant;
use vdq_core::engine::CancelOutcome;
use vdq_core::error::FailureReason;
use vdq_core::extractor::RawStream;
use vdq_core::gateway::Status;
use vdq_core::registry::JobState;

fn job_dir_exists(dir: &std::path::Path, id: u64) -> bool {
    dir.join(format!("job-{id}")).exists()
}

#[tokio::test]
async fn successful_job_delivers_once_and_cleans_up() {
    let dir = tempdir().unwrap();
    let h = Harness::new(common::test_config(2), dir.path());

    let id = h.request(key(1), &video(1), "720p").await;
    let job = h.wait_cleanup(id).await;

    assert_eq!(job.outcome, Some(JobState::Delivered));
    assert_eq!(job.size_bytes, Some(4096));
    assert!(job.local_path.is_none());
    assert!(!job_dir_exists(dir.path(), id));

    let files = h.gateway.files(key(1));
    assert_eq!(files.len(), 1);
    let (file, existed, ok) = &files[0];
    assert!(*existed && *ok);
    assert_eq!(file.declared_size, 4096);
    assert_eq!(file.file_name, format!("{}-720p.mp4", video(1)));

    assert_eq!(
        h.gateway.statuses(key(1)),
        vec![
            Status::Processing,
            Status::Downloading,
            Status::Uploading,
            Status::Completed
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn download_past_deadline_fails_timed_out() {
    let dir = tempdir().unwrap();
    let h = Harness::new(common::test_config(2), dir.path());
    h.extractor.set_default(StreamScript::stalled(4096, 1024));

    let started = Instant::now();
    let id = h.request(key(1), &video(1), "720p").await;
    let job = h.engine.wait_for_cleanup(id).await.unwrap();

    assert_eq!(job.outcome, Some(JobState::Failed(FailureReason::TimedOut)));
    assert!(started.elapsed() >= Duration::from_secs(300));
    assert!(!job_dir_exists(dir.path(), id));
    assert_eq!(
        h.gateway.terminal_statuses(key(1)),
        vec![Status::Failed(FailureReason::TimedOut)]
    );
    assert!(h.gateway.files(key(1)).is_empty());
    assert_eq!(h.engine.admission().in_use(), 0);
}

#[tokio::test(start_paused = true)]
async fn deadline_also_bounds_the_admission_queue() {
    let dir = tempdir().unwrap();
    let h = Harness::new(common::test_config(1), dir.path());
    h.extractor.set_default(StreamScript::stalled(4096, 1024));

    let running = h.request(key(1), &video(1), "720p").await;
    let queued = h.request(key(2), &video(2), "720p").await;

    let job = h.engine.wait_for_cleanup(queued).await.unwrap();
    assert_eq!(job.outcome, Some(JobState::Failed(FailureReason::TimedOut)));
    assert!(job.started_at.is_none());
    h.engine.wait_for_cleanup(running).await.unwrap();

    assert_eq!(h.extractor.opened(), vec![video(1)]);
    assert_eq!(h.engine.admission().queued(), 0);
    assert_eq!(h.engine.admission().in_use(), 0);
}

#[tokio::test]
async fn declared_size_over_ceiling_aborts_before_reading() {
    let dir = tempdir().unwrap();
    let h = Harness::new(common::test_config(2), dir.path());
    h.extractor.set_default(StreamScript {
        declared: Some(2_500_000_000),
        ..StreamScript::bytes(4096)
    });

    let id = h.request(key(1), &video(1), "720p").await;
    let job = h.wait_cleanup(id).await;

    assert_eq!(job.outcome, Some(JobState::Failed(FailureReason::TooLarge)));
    assert_eq!(h.extractor.bytes_read.load(Ordering::SeqCst), 0);
    assert!(!job_dir_exists(dir.path(), id));
    assert_eq!(
        h.gateway.terminal_statuses(key(1)),
        vec![Status::Failed(FailureReason::TooLarge)]
    );
}

fn uhd_stream(size_exact: bool) -> RawStream {
    RawStream {
        format_id: "313".into(),
        container: "mp4".into(),
        has_video: true,
        has_audio: true,
        height: Some(2160),
        audio_kbps: None,
        size: Some(2_500_000_000),
        size_exact,
    }
}

#[tokio::test]
async fn estimated_size_over_ceiling_never_opens_the_stream() {
    let dir = tempdir().unwrap();
    let h = Harness::new(common::test_config(2), dir.path());
    h.extractor
        .set_listing(common::fake_extractor::Listing::Streams(vec![uhd_stream(true)]));

    let id = h.request(key(1), &video(1), "2160p").await;
    let job = h.wait_cleanup(id).await;

    assert_eq!(job.outcome, Some(JobState::Failed(FailureReason::TooLarge)));
    assert!(h.extractor.opened().is_empty());
}

#[tokio::test]
async fn approximate_size_over_ceiling_still_downloads() {
    let dir = tempdir().unwrap();
    let h = Harness::new(common::test_config(2), dir.path());
    h.extractor
        .set_listing(common::fake_extractor::Listing::Streams(vec![uhd_stream(false)]));

    let id = h.request(key(1), &video(1), "2160p").await;
    let job = h.wait_cleanup(id).await;

    assert_eq!(job.outcome, Some(JobState::Delivered));
    assert_eq!(h.extractor.opened(), vec![video(1)]);
    assert_eq!(job.size_bytes, Some(4096));
}

#[tokio::test]
async fn observed_size_over_ceiling_stops_the_transfer() {
    let dir = tempdir().unwrap();
    let mut cfg = common::test_config(2);
    cfg.max_file_size_bytes = 2000;
    let h = Harness::new(cfg, dir.path());
    h.extractor.set_listing(common::fake_extractor::Listing::Streams(vec![RawStream {
        size: None,
        ..common::default_streams().remove(0)
    }]));
    h.extractor.set_default(StreamScript {
        chunk: 512,
        ..StreamScript::bytes(64 * 1024)
    });

    let id = h.request(key(1), &video(1), "720p").await;
    let job = h.wait_cleanup(id).await;

    assert_eq!(job.outcome, Some(JobState::Failed(FailureReason::TooLarge)));
    assert!(h.extractor.bytes_read.load(Ordering::SeqCst) < 4096);
    assert!(h.gateway.files(key(1)).is_empty());
}

#[tokio::test]
async fn upstream_read_error_fails_the_job() {
    let dir = tempdir().unwrap();
    let h = Harness::new(common::test_config(2), dir.path());
    h.extractor.set_default(StreamScript {
        fail_at: Some(1024),
        ..StreamScript::bytes(4096)
    });

    let id = h.request(key(1), &video(1), "720p").await;
    let job = h.wait_cleanup(id).await;

    assert_eq!(job.outcome, Some(JobState::Failed(FailureReason::Upstream)));
    assert!(!job_dir_exists(dir.path(), id));
    assert_eq!(
        h.gateway.terminal_statuses(key(1)),
        vec![Status::Failed(FailureReason::Upstream)]
    );
}

#[tokio::test]
async fn cancel_mid_download_releases_everything() {
    let dir = tempdir().unwrap();
    let h = Harness::new(common::test_config(1), dir.path());
    h.extractor.set_default(StreamScript::stalled(4096, 1024));

    let id = h.request(key(1), &video(1), "720p").await;
    h.wait_state(id, JobState::Downloading).await;
    tokio::time::timeout(common::WAIT, async {
        while h.extractor.bytes_read.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert_eq!(h.engine.on_cancel(key(1)).await, CancelOutcome::Job(id));
    let job = h.wait_cleanup(id).await;

    assert_eq!(job.outcome, Some(JobState::Cancelled));
    assert_eq!(h.engine.admission().in_use(), 0);
    assert_eq!(h.extractor.active.load(Ordering::SeqCst), 0);
    assert!(!job_dir_exists(dir.path(), id));
    assert!(h.gateway.files(key(1)).is_empty());
    assert_eq!(h.gateway.terminal_statuses(key(1)), vec![Status::Cancelled]);

    // A late cancel changes nothing and says nothing.
    assert_eq!(h.engine.on_cancel(key(1)).await, CancelOutcome::Nothing);
    assert_eq!(h.gateway.terminal_statuses(key(1)).len(), 1);
}

#[tokio::test]
async fn cancel_while_queued_never_takes_a_ticket() {
    let dir = tempdir().unwrap();
    let h = Harness::new(common::test_config(1), dir.path());
    h.extractor.set_default(StreamScript::stalled(4096, 1024));

    let running = h.request(key(1), &video(1), "720p").await;
    h.wait_state(running, JobState::Downloading).await;
    let queued = h.request(key(2), &video(2), "720p").await;

    assert_eq!(h.engine.on_cancel(key(2)).await, CancelOutcome::Job(queued));
    let job = h.wait_cleanup(queued).await;
    assert_eq!(job.outcome, Some(JobState::Cancelled));
    assert!(job.started_at.is_none());
    assert_eq!(h.engine.admission().queued(), 0);
    assert_eq!(h.engine.admission().in_use(), 1);
    assert_eq!(h.extractor.opened(), vec![video(1)]);

    h.engine.on_cancel(key(1)).await;
    h.wait_cleanup(running).await;
    assert_eq!(h.engine.admission().in_use(), 0);
}

#[tokio::test]
async fn new_link_supersedes_the_running_job() {
    let dir = tempdir().unwrap();
    let h = Harness::new(common::test_config(2), dir.path());
    h.extractor.script(&video(1), StreamScript::stalled(4096, 1024));

    let first = h.request(key(1), &video(1), "720p").await;
    h.wait_state(first, JobState::Downloading).await;

    let second = h.request(key(1), &video(2), "720p").await;
    assert_eq!(h.wait_cleanup(first).await.outcome, Some(JobState::Cancelled));
    assert_eq!(h.wait_cleanup(second).await.outcome, Some(JobState::Delivered));

    let terminal = h.gateway.terminal_statuses(key(1));
    assert_eq!(terminal.len(), 2);
    assert!(terminal.contains(&Status::Cancelled));
    assert!(terminal.contains(&Status::Completed));
}
