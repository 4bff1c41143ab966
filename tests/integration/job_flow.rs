//! A job's requests run through the worker and sink until the job is done

use crate::common::{page_url, sink, submit, worker, ARTICLE_HTML, RESULTS};
use chrono::{TimeZone, Utc};
use news_harvest::messages::CrawlRequest;
use news_harvest::storage::{JobState, JobStore, SqliteJobStore};
use news_harvest::stream::SqliteStream;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_single_article_job_completes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stories/bridge"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_HTML))
        .expect(1)
        .mount(&server)
        .await;

    let stream = SqliteStream::open_in_memory(4).unwrap();
    let mut store = SqliteJobStore::open_in_memory().unwrap();
    let job = store.create_job(1).unwrap();
    assert_eq!(job.state, JobState::Queued);

    let url = page_url(&server, "/stories/bridge");
    submit(&stream, &CrawlRequest::new(job.job_id.clone(), url.clone())).await;

    let stats = worker(&stream, 3).run_once().await.unwrap();
    assert_eq!(stats.emitted, 1);
    assert_eq!(stream.record_count(RESULTS).await.unwrap(), 1);

    let mut sink = sink(&stream, store);
    let applied = sink.run_once().await.unwrap();
    assert_eq!(applied.recorded, 1);

    let store = sink.store();
    let job = store.get_job(&job.job_id).unwrap().unwrap();
    assert_eq!((job.done, job.failed), (1, 0));
    assert_eq!(job.state, JobState::Done);
    assert_eq!(store.count_articles(&job.job_id).unwrap(), 1);
    assert_eq!(store.count_errors(&job.job_id).unwrap(), 0);

    let article = store
        .get_article(&job.job_id, url.as_str())
        .unwrap()
        .unwrap();
    assert_eq!(article.title.as_deref(), Some("Bridge opens to traffic"));
    assert_eq!(article.author.as_deref(), Some("Sam Reporter"));
    assert_eq!(article.language.as_deref(), Some("en"));
    assert_eq!(article.tags, vec!["infrastructure", "city"]);
    assert_eq!(
        article.published_at,
        Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap())
    );
    assert_eq!(article.canonical_url.as_deref(), Some(url.as_str()));
    assert_eq!(article.http_status, Some(200));
    assert!(article.text.contains("City officials said"));
}

#[tokio::test]
async fn test_mixed_outcomes_finish_the_job() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stories/bridge"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_HTML))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let stream = SqliteStream::open_in_memory(4).unwrap();
    let mut store = SqliteJobStore::open_in_memory().unwrap();
    let job = store.create_job(2).unwrap();

    let good = page_url(&server, "/stories/bridge");
    let bad = page_url(&server, "/broken");
    submit(&stream, &CrawlRequest::new(job.job_id.clone(), good.clone())).await;
    submit(&stream, &CrawlRequest::new(job.job_id.clone(), bad.clone())).await;

    let stats = worker(&stream, 3).run_once().await.unwrap();
    assert_eq!(stats.emitted, 2);

    let mut sink = sink(&stream, store);
    sink.run_once().await.unwrap();

    let store = sink.store();
    let job = store.get_job(&job.job_id).unwrap().unwrap();
    assert_eq!((job.done, job.failed, job.total), (1, 1, 2));
    assert_eq!(job.state, JobState::Done);

    assert!(store.get_article(&job.job_id, good.as_str()).unwrap().is_some());
    let error = store
        .get_error_record(&job.job_id, bad.as_str())
        .unwrap()
        .unwrap();
    assert_eq!(error.error_code, "http_500");
    assert_eq!(error.http_status, Some(500));
}

#[tokio::test]
async fn test_partial_progress_is_running() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_HTML))
        .mount(&server)
        .await;

    let stream = SqliteStream::open_in_memory(2).unwrap();
    let mut store = SqliteJobStore::open_in_memory().unwrap();
    let job = store.create_job(3).unwrap();

    submit(
        &stream,
        &CrawlRequest::new(job.job_id.clone(), page_url(&server, "/one")),
    )
    .await;

    worker(&stream, 1).run_once().await.unwrap();
    let mut sink = sink(&stream, store);
    sink.run_once().await.unwrap();

    let job = sink.store().get_job(&job.job_id).unwrap().unwrap();
    assert_eq!(job.processed(), 1);
    assert_eq!(job.state, JobState::Running);
}

#[tokio::test]
async fn test_robots_disallowed_recorded_as_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /members/\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/members/story"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_HTML))
        .expect(0)
        .mount(&server)
        .await;

    let stream = SqliteStream::open_in_memory(1).unwrap();
    let mut store = SqliteJobStore::open_in_memory().unwrap();
    let job = store.create_job(1).unwrap();

    let url = page_url(&server, "/members/story");
    let mut request = CrawlRequest::new(job.job_id.clone(), url.clone());
    request.respect_robots = true;
    submit(&stream, &request).await;

    worker(&stream, 3).run_once().await.unwrap();
    let mut sink = sink(&stream, store);
    sink.run_once().await.unwrap();

    let store = sink.store();
    let error = store
        .get_error_record(&job.job_id, url.as_str())
        .unwrap()
        .unwrap();
    assert_eq!(error.error_code, "robots_disallowed");
    assert_eq!(error.http_status, None);
    assert_eq!(
        store.get_job(&job.job_id).unwrap().unwrap().state,
        JobState::Done
    );
}
