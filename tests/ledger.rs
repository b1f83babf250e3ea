use chrono::Duration;

use open_scribe::ledger::{JobLedger, JobQuery, JobStatus, JobUpdate, NewJob};
use open_scribe::ScribeError;

fn new_job<'a>(url: &'a str, engine: &'a str) -> NewJob<'a> {
    NewJob {
        url,
        video_id: "vid",
        title: "",
        engine,
        force: false,
    }
}

async fn job_in(ledger: &JobLedger, url: &str, engine: &str, path: &[JobStatus]) -> i64 {
    let id = ledger.create(new_job(url, engine)).await.unwrap();
    for status in path {
        ledger.transition(id, *status, JobUpdate::default()).await.unwrap();
    }
    id
}

#[tokio::test]
async fn test_jobs_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("jobs.db");

    let id = {
        let ledger = JobLedger::open(&path, Duration::hours(3)).await.unwrap();
        let id = job_in(&ledger, "https://www.youtube.com/watch?v=a", "whisper-api", &[JobStatus::Downloading]).await;
        ledger.annotate(id, "kept").await.unwrap();
        ledger
            .set_metadata(id, Some("Persisted title"), None, Some(42.0))
            .await
            .unwrap();
        id
    };

    let reopened = JobLedger::open(&path, Duration::hours(3)).await.unwrap();
    let job = reopened.require(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Downloading);
    assert_eq!(job.title, "Persisted title");
    assert_eq!(job.video_id, "vid");
    assert_eq!(job.duration_seconds, Some(42.0));
    assert_eq!(job.notes, vec!["kept".to_string()]);
}

#[tokio::test]
async fn test_blocking_statuses_for_duplicates() {
    let ledger = JobLedger::in_memory().await.unwrap();
    let url = "https://www.youtube.com/watch?v=dup";

    // a job still resolving metadata already owns the URL
    let blocker = job_in(&ledger, url, "whisper-api", &[]).await;
    let err = ledger.create(new_job(url, "whisper-api")).await.unwrap_err();
    assert!(matches!(
        err,
        ScribeError::DuplicateActiveJob { job_id, status: JobStatus::Pending, .. } if job_id == blocker
    ));

    ledger
        .transition(blocker, JobStatus::Downloading, JobUpdate::default())
        .await
        .unwrap();
    let err = ledger.create(new_job(url, "whisper-api")).await.unwrap_err();
    assert!(matches!(
        err,
        ScribeError::DuplicateActiveJob { job_id, status: JobStatus::Downloading, .. } if job_id == blocker
    ));

    // another engine is a different dedup key
    tokio_test::assert_ok!(ledger.create(new_job(url, "whisper-cpp")).await);
    assert_eq!(
        ledger.find_duplicate(url, Some("whisper-api")).await.unwrap().map(|j| j.id),
        Some(blocker)
    );

    for status in [JobStatus::Transcribing, JobStatus::Processing, JobStatus::Completed] {
        ledger.transition(blocker, status, JobUpdate::default()).await.unwrap();
        assert!(
            ledger.create(new_job(url, "whisper-api")).await.is_err(),
            "{} should block",
            status
        );
    }

    let forced = NewJob {
        force: true,
        ..new_job(url, "whisper-api")
    };
    tokio_test::assert_ok!(ledger.create(forced).await);
}

#[tokio::test]
async fn test_failed_and_cancelled_jobs_do_not_block() {
    let ledger = JobLedger::in_memory().await.unwrap();
    let url = "https://www.youtube.com/watch?v=done";

    let id = job_in(&ledger, url, "whisper-api", &[JobStatus::Downloading]).await;
    ledger
        .transition(id, JobStatus::Failed, JobUpdate::failure("network down"))
        .await
        .unwrap();
    let second = ledger.create(new_job(url, "whisper-api")).await.unwrap();

    ledger
        .transition(second, JobStatus::Transcribing, JobUpdate::default())
        .await
        .unwrap();
    ledger
        .transition(second, JobStatus::Cancelled, JobUpdate::default())
        .await
        .unwrap();
    assert!(ledger.find_duplicate(url, None).await.unwrap().is_none());

    let failed = ledger.require(id).await.unwrap();
    assert_eq!(failed.error_message.as_deref(), Some("network down"));
}

#[tokio::test]
async fn test_transition_graph_matches_ledger() {
    let ledger = JobLedger::in_memory().await.unwrap();
    // shortest path from pending to each status
    let path_to = |status: JobStatus| -> Vec<JobStatus> {
        use JobStatus::*;
        match status {
            Pending => vec![],
            Downloading => vec![Downloading],
            Transcribing => vec![Transcribing],
            Processing => vec![Transcribing, Processing],
            Completed => vec![Transcribing, Processing, Completed],
            Failed => vec![Failed],
            Cancelled => vec![Cancelled],
        }
    };

    for (n, from) in JobStatus::ALL.into_iter().enumerate() {
        for to in JobStatus::ALL {
            let url = format!("https://www.youtube.com/watch?v=g{}{}", n, to.as_str());
            let id = job_in(&ledger, &url, "whisper-api", &path_to(from)).await;
            let result = ledger.transition(id, to, JobUpdate::default()).await;

            if from.can_transition_to(to) {
                assert_eq!(result.unwrap().status, to, "{} -> {}", from, to);
            } else {
                assert!(
                    matches!(result, Err(ScribeError::InvalidTransition { .. })),
                    "{} -> {} should be rejected",
                    from,
                    to
                );
                assert_eq!(ledger.status(id).await.unwrap(), from);
            }
        }
    }
}

#[tokio::test]
async fn test_search_and_stats() {
    let ledger = JobLedger::in_memory().await.unwrap();
    for n in 0..5 {
        let url = format!("https://www.youtube.com/watch?v=s{}", n);
        let id = job_in(&ledger, &url, "whisper-api", &[JobStatus::Transcribing]).await;
        ledger
            .set_metadata(id, Some(format!("Rust talk {}", n).as_str()), None, None)
            .await
            .unwrap();
    }
    job_in(&ledger, "https://www.youtube.com/watch?v=c1", "youtube-transcript-api", &[JobStatus::Failed]).await;

    let page = ledger
        .search(&JobQuery {
            text: Some("rust talk".into()),
            page: 2,
            per_page: 2,
            ..JobQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.total_pages(), 3);
    assert_eq!(page.items.len(), 2);

    let failed = ledger
        .search(&JobQuery {
            status: Some(JobStatus::Failed),
            ..JobQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(failed.items.len(), 1);
    assert_eq!(failed.items[0].engine, "youtube-transcript-api");

    let stats = ledger.stats().await.unwrap();
    assert_eq!(stats.total, 6);
    assert_eq!(stats.count(JobStatus::Transcribing), 5);
    assert_eq!(stats.count(JobStatus::Failed), 1);
    assert_eq!(stats.by_engine.get("whisper-api"), Some(&5));
}

#[tokio::test]
async fn test_prune_only_removes_finished_jobs() {
    let ledger = JobLedger::in_memory().await.unwrap();
    let done = job_in(&ledger, "https://www.youtube.com/watch?v=p1", "whisper-api", &[JobStatus::Cancelled]).await;
    let running = job_in(&ledger, "https://www.youtube.com/watch?v=p2", "whisper-api", &[JobStatus::Downloading]).await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    assert_eq!(ledger.prune(Duration::zero()).await.unwrap(), 1);
    assert!(ledger.get(done).await.unwrap().is_none());
    assert!(ledger.get(running).await.unwrap().is_some());
    assert!(matches!(ledger.require(done).await, Err(ScribeError::JobNotFound(_))));
}
