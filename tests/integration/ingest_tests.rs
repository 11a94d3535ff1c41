use crate::common::{card, fetcher, memory_repository, page, scheduler, source};
use spine_tracker::film::{IdentityKey, ReleaseStatus};
use spine_tracker::state::{RunStatus, TriggerSource};
use spine_tracker::storage::FilmFilter;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html")
}

#[tokio::test]
async fn test_fresh_run_then_price_change() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/new-releases"))
        .respond_with(html(page(&[
            card("Seven Samurai", 2, "$39.95"),
            card("Ugetsu", 3, "$31.96"),
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new-releases"))
        .respond_with(html(page(&[
            card("Seven Samurai", 2, "$29.95"),
            card("Ugetsu", 3, "$31.96"),
        ])))
        .mount(&server)
        .await;

    let repository = memory_repository();
    let scheduler = scheduler(
        vec![source(
            "new-releases",
            format!("{}/new-releases", server.uri()),
            ReleaseStatus::Released,
        )],
        fetcher(10, 0),
        repository.clone(),
    );

    let first = scheduler.run_to_completion(TriggerSource::Cli).await.unwrap();
    assert_eq!(first.status, RunStatus::Succeeded);
    assert_eq!(first.films_seen, 2);
    assert_eq!(first.films_created, 2);
    assert_eq!(first.films_updated, 0);

    let second = scheduler.run_to_completion(TriggerSource::Cli).await.unwrap();
    assert_eq!(second.status, RunStatus::Succeeded);
    assert_eq!(second.films_seen, 2);
    assert_eq!(second.films_created, 0);
    assert_eq!(second.films_updated, 1);

    let samurai = repository.get(&IdentityKey::Spine(2)).unwrap().unwrap();
    assert_eq!(samurai.title, "Seven Samurai");
    assert_eq!(samurai.price.as_deref(), Some("$29.95"));
    assert_eq!(samurai.format.as_deref(), Some("Blu-ray"));
    assert_eq!(repository.count().unwrap(), 2);
}

#[tokio::test]
async fn test_repeat_run_is_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html(page(&[
            card("Seven Samurai", 2, "$39.95"),
            card("Ugetsu", 3, "$31.96"),
        ])))
        .mount(&server)
        .await;

    let repository = memory_repository();
    let scheduler = scheduler(
        vec![source("catalog", server.uri(), ReleaseStatus::Released)],
        fetcher(10, 0),
        repository.clone(),
    );

    scheduler.run_to_completion(TriggerSource::Cli).await.unwrap();
    let before = repository.all().unwrap();

    let again = scheduler.run_to_completion(TriggerSource::Cli).await.unwrap();
    let after = repository.all().unwrap();

    assert_eq!(again.films_seen, 2);
    assert_eq!(again.films_created, 0);
    assert_eq!(again.films_updated, 0);
    assert_eq!(before.len(), after.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.identity_key, new.identity_key);
        assert_eq!(old.price, new.price);
        assert_eq!(old.created_at, new.created_at);
        assert!(new.updated_at >= old.updated_at);
    }
}

#[tokio::test]
async fn test_failed_source_does_not_stop_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/new-releases"))
        .respond_with(html(page(&[card("Seven Samurai", 2, "$39.95")])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/coming-soon"))
        .respond_with(html(page(&[card("Stalker", 1215, "$39.95")])))
        .mount(&server)
        .await;

    let repository = memory_repository();
    let scheduler = scheduler(
        vec![
            source(
                "new-releases",
                format!("{}/new-releases", server.uri()),
                ReleaseStatus::Released,
            ),
            source("gone", format!("{}/gone", server.uri()), ReleaseStatus::Released),
            source(
                "coming-soon",
                format!("{}/coming-soon", server.uri()),
                ReleaseStatus::Upcoming,
            ),
        ],
        fetcher(10, 2),
        repository.clone(),
    );

    let run = scheduler.run_to_completion(TriggerSource::Cli).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.pages_failed, 1);
    assert_eq!(run.films_seen, 2);
    assert_eq!(run.films_created, 2);
    assert!(run.error.is_none());

    let upcoming = repository
        .list(&FilmFilter::default().with_status(ReleaseStatus::Upcoming))
        .unwrap();
    assert_eq!(upcoming.len(), 1);
    assert_eq!(upcoming[0].title, "Stalker");
}

#[tokio::test]
async fn test_sources_fetched_in_order_with_spacing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html(page(&[])))
        .expect(3)
        .mount(&server)
        .await;

    let sources = ["one", "two", "three"]
        .iter()
        .map(|name| {
            source(
                name,
                format!("{}/{}", server.uri(), name),
                ReleaseStatus::Released,
            )
        })
        .collect();
    let scheduler = scheduler(sources, fetcher(200, 0), memory_repository());

    let started = Instant::now();
    let run = scheduler.run_to_completion(TriggerSource::Cli).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.films_seen, 0);
    assert!(started.elapsed() >= Duration::from_millis(400));

    let requests = server.received_requests().await.unwrap();
    let paths: Vec<&str> = requests.iter().map(|r| r.url.path()).collect();
    assert_eq!(paths, vec!["/one", "/two", "/three"]);
}

#[tokio::test]
async fn test_spine_appearing_later_merges_into_same_film() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html(page(&[
            r#"<div class="film-card"><h3>Ugetsu</h3><span class="price">$31.96</span></div>"#
                .to_string(),
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(html(page(&[card("Ugetsu", 3, "$31.96")])))
        .mount(&server)
        .await;

    let repository = memory_repository();
    let scheduler = scheduler(
        vec![source("catalog", server.uri(), ReleaseStatus::Released)],
        fetcher(10, 0),
        repository.clone(),
    );

    let first = scheduler.run_to_completion(TriggerSource::Cli).await.unwrap();
    assert_eq!(first.films_created, 1);

    let second = scheduler.run_to_completion(TriggerSource::Cli).await.unwrap();
    assert_eq!(second.films_created, 0);
    assert_eq!(second.films_updated, 1);

    assert_eq!(repository.count().unwrap(), 1);
    let film = repository.get(&IdentityKey::Spine(3)).unwrap().unwrap();
    assert_eq!(film.title, "Ugetsu");
}
