use crate::common::{card, fetcher, memory_repository, page, scheduler, source, FailingRepository};
use spine_tracker::film::ReleaseStatus;
use spine_tracker::ingest::{Cadence, Pipeline, Scheduler};
use spine_tracker::state::{RunStatus, TriggerSource};
use spine_tracker::storage::Repository;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn slow_catalog(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(page(&[card("Seven Samurai", 2, "$39.95")]), "text/html")
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_one_run_admitted() {
    let server = slow_catalog(Duration::from_millis(500)).await;
    let scheduler = scheduler(
        vec![source("catalog", server.uri(), ReleaseStatus::Released)],
        fetcher(10, 0),
        memory_repository(),
    );

    let accepted = scheduler.trigger(TriggerSource::Manual).unwrap();
    assert_eq!(accepted.run_id, 1);

    let rejected = scheduler.trigger(TriggerSource::Manual).unwrap_err();
    assert_eq!(rejected.active_run_id, 1);
    let rejected = scheduler
        .run_to_completion(TriggerSource::Cli)
        .await
        .unwrap_err();
    assert_eq!(rejected.active_run_id, 1);

    let status = scheduler.status();
    assert!(status.is_running());
    assert_eq!(status.active_run.as_ref().map(|run| run.id), Some(1));
    assert_eq!(
        status.active_run.map(|run| run.status),
        Some(RunStatus::Running)
    );

    scheduler.wait_for_idle().await;

    let status = scheduler.status();
    assert!(status.active_run.is_none());
    let last = status.last_run.unwrap();
    assert_eq!(last.id, 1);
    assert_eq!(last.trigger, TriggerSource::Manual);
    assert_eq!(last.status, RunStatus::Succeeded);
    assert_eq!(last.films_created, 1);

    // The slot is free again
    let next = scheduler.trigger(TriggerSource::Manual).unwrap();
    assert_eq!(next.run_id, 2);
    scheduler.wait_for_idle().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_triggers_admit_exactly_one() {
    let server = slow_catalog(Duration::from_millis(300)).await;
    let scheduler = scheduler(
        vec![source("catalog", server.uri(), ReleaseStatus::Released)],
        fetcher(10, 0),
        memory_repository(),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let scheduler = scheduler.clone();
        handles.push(tokio::spawn(async move {
            scheduler.trigger(TriggerSource::Manual).is_ok()
        }));
    }
    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 1);
    scheduler.wait_for_idle().await;
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_storage_failure_fails_run_and_frees_slot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            page(&[card("Seven Samurai", 2, "$39.95"), card("Ugetsu", 3, "$31.96")]),
            "text/html",
        ))
        .mount(&server)
        .await;

    let repository: Arc<dyn Repository> = Arc::new(FailingRepository::new(1));
    let scheduler = scheduler(
        vec![
            source("first", format!("{}/first", server.uri()), ReleaseStatus::Released),
            source("second", format!("{}/second", server.uri()), ReleaseStatus::Upcoming),
        ],
        fetcher(10, 0),
        repository.clone(),
    );

    let run = scheduler.run_to_completion(TriggerSource::Cli).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.finished_at.is_some());
    assert!(run.error.as_deref().unwrap().contains("disk I/O error"));
    assert_eq!(run.films_seen, 1);
    assert_eq!(run.films_created, 1);

    // The second source is never fetched after the abort
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    let status = scheduler.status();
    assert!(status.active_run.is_none());
    assert_eq!(status.last_run.map(|run| run.status), Some(RunStatus::Failed));
    assert_eq!(
        repository.latest_run().unwrap().map(|run| run.id),
        Some(run.id)
    );

    assert!(scheduler.trigger(TriggerSource::Manual).is_ok());
    scheduler.wait_for_idle().await;
}

#[tokio::test]
async fn test_run_history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("films.db");

    let open = || -> Arc<dyn Repository> {
        Arc::new(spine_tracker::storage::open_repository(&db_path).unwrap())
    };
    let build = |repository: Arc<dyn Repository>| {
        let pipeline = Pipeline::new(vec![], fetcher(10, 0), Arc::clone(&repository));
        Scheduler::new(pipeline, Cadence::Interval(Duration::from_secs(3600)), repository)
    };

    let first = build(open())
        .run_to_completion(TriggerSource::Cli)
        .await
        .unwrap();
    assert_eq!(first.id, 1);

    let restarted = build(open());
    let status = restarted.status();
    assert_eq!(status.last_run.map(|run| run.id), Some(1));

    let second = restarted
        .run_to_completion(TriggerSource::Cli)
        .await
        .unwrap();
    assert_eq!(second.id, 2);
}

#[tokio::test]
async fn test_timer_runs_on_startup_and_reschedules() {
    let repository = memory_repository();
    let pipeline = Pipeline::new(
        vec![source("broken", "not a url".to_string(), ReleaseStatus::Released)],
        fetcher(10, 0),
        Arc::clone(&repository),
    );
    let scheduler = Scheduler::new(
        pipeline,
        Cadence::Interval(Duration::from_secs(3600)),
        repository,
    );

    let timer = scheduler.spawn_timer(true);

    let mut last_run = None;
    for _ in 0..100 {
        last_run = scheduler.status().last_run;
        if last_run.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let last_run = last_run.expect("startup run finished");
    assert_eq!(last_run.trigger, TriggerSource::Startup);
    assert_eq!(last_run.pages_failed, 1);

    let next = scheduler.status().next_scheduled_at.unwrap();
    assert!(next > chrono::Utc::now() + chrono::Duration::minutes(59));

    timer.shutdown().await;
    assert!(scheduler.status().next_scheduled_at.is_none());
}

#[tokio::test]
async fn test_no_next_run_without_timer() {
    let scheduler = scheduler(vec![], fetcher(10, 0), memory_repository());

    scheduler.run_to_completion(TriggerSource::Cli).await.unwrap();

    assert!(scheduler.status().next_scheduled_at.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abandoned_foreground_run_still_releases_slot() {
    let server = slow_catalog(Duration::from_millis(300)).await;
    let scheduler = scheduler(
        vec![source("catalog", server.uri(), ReleaseStatus::Released)],
        fetcher(10, 0),
        memory_repository(),
    );

    let waited = tokio::time::timeout(
        Duration::from_millis(50),
        scheduler.run_to_completion(TriggerSource::Cli),
    )
    .await;
    assert!(waited.is_err());
    assert!(scheduler.status().is_running());

    tokio::time::timeout(Duration::from_secs(5), scheduler.wait_for_idle())
        .await
        .unwrap();

    let status = scheduler.status();
    assert!(status.active_run.is_none());
    let last = status.last_run.unwrap();
    assert_eq!(last.id, 1);
    assert_eq!(last.status, RunStatus::Succeeded);
    assert_eq!(last.films_created, 1);

    assert_eq!(scheduler.trigger(TriggerSource::Manual).unwrap().run_id, 2);
    scheduler.wait_for_idle().await;
}
