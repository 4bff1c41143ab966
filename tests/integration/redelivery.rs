//! At-least-once delivery: repeated and resumed work never double counts

use crate::common::{page_url, sink, submit, worker, ARTICLE_HTML, REQUESTS, RESULTS};
use news_harvest::messages::CrawlRequest;
use news_harvest::storage::{JobState, JobStore, SqliteJobStore};
use news_harvest::stream::{MessageConsumer, SqliteStream};
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_duplicate_request_counts_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_HTML))
        .expect(2)
        .mount(&server)
        .await;

    let stream = SqliteStream::open_in_memory(2).unwrap();
    let mut store = SqliteJobStore::open_in_memory().unwrap();
    let job = store.create_job(2).unwrap();

    let request = CrawlRequest::new(job.job_id.clone(), page_url(&server, "/a"));
    submit(&stream, &request).await;
    submit(&stream, &request).await;

    worker(&stream, 1).run_once().await.unwrap();
    assert_eq!(stream.record_count(RESULTS).await.unwrap(), 2);

    let mut sink = sink(&stream, store);
    let stats = sink.run_once().await.unwrap();
    assert_eq!(stats.recorded, 1);
    assert_eq!(stats.duplicates, 1);

    let job = sink.store().get_job(&job.job_id).unwrap().unwrap();
    assert_eq!(job.done, 1);
    assert_eq!(job.state, JobState::Running);
    assert_eq!(sink.store().count_articles(&job.job_id).unwrap(), 1);
}

#[tokio::test]
async fn test_uncommitted_request_is_redelivered_to_next_worker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_HTML))
        .mount(&server)
        .await;

    let stream = SqliteStream::open_in_memory(1).unwrap();
    let request = CrawlRequest::new("job-1", page_url(&server, "/a"));
    submit(&stream, &request).await;

    // A worker that takes the request and dies before committing
    let mut crashed = stream.consumer("crawler-workers", REQUESTS);
    assert_eq!(crashed.poll(10).await.unwrap().len(), 1);
    drop(crashed);

    let stats = worker(&stream, 1).run_once().await.unwrap();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.emitted, 1);

    // Committed now, so a further worker sees nothing
    let stats = worker(&stream, 1).run_once().await.unwrap();
    assert_eq!(stats.received, 0);
}

#[tokio::test]
async fn test_restarted_sink_resumes_from_committed_offsets() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let stream_path = dir.path().join("stream.db");
    let store_path = dir.path().join("jobs.db");

    let job_id = {
        let stream = SqliteStream::open(&stream_path, 2).unwrap();
        let mut store = SqliteJobStore::open(&store_path).unwrap();
        let job = store.create_job(2).unwrap();

        submit(
            &stream,
            &CrawlRequest::new(job.job_id.clone(), page_url(&server, "/x")),
        )
        .await;
        worker(&stream, 1).run_once().await.unwrap();

        let mut sink = sink(&stream, store);
        assert_eq!(sink.run_once().await.unwrap().recorded, 1);
        job.job_id
    };

    let stream = SqliteStream::open(&stream_path, 2).unwrap();
    let store = SqliteJobStore::open(&store_path).unwrap();

    submit(
        &stream,
        &CrawlRequest::new(job_id.clone(), page_url(&server, "/y")),
    )
    .await;
    worker(&stream, 1).run_once().await.unwrap();

    let mut sink = sink(&stream, store);
    let stats = sink.run_once().await.unwrap();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.recorded, 1);

    let job = sink.store().get_job(&job_id).unwrap().unwrap();
    assert_eq!((job.done, job.failed), (0, 2));
    assert_eq!(job.state, JobState::Done);
    assert_eq!(sink.store().count_errors(&job_id).unwrap(), 2);
}
