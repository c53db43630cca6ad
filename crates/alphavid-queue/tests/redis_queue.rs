//! Redis Streams queue integration tests.

use alphavid_models::{ConvertOptions, FileId, TaskId};
use alphavid_queue::{ConvertJob, JobQueue, QueueConfig, QueueError};

fn queue() -> JobQueue {
    dotenvy::dotenv().ok();
    let config = QueueConfig {
        stream_name: format!("alphavid:test:{}", TaskId::new()),
        ..QueueConfig::from_env()
    };
    JobQueue::new(config).expect("Failed to create queue")
}

/// Test job enqueue and dequeue cycle.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_job_enqueue_consume_ack() {
    let queue = queue();
    queue.init().await.expect("Failed to initialize queue");

    let job = ConvertJob::new(TaskId::new(), FileId::new(), ConvertOptions::default());
    queue.enqueue(&job).await.expect("Failed to enqueue");

    let jobs = queue.consume("test-consumer", 1000, 1).await.expect("Failed to consume");
    assert_eq!(jobs.len(), 1);
    let (message_id, consumed) = &jobs[0];
    assert_eq!(consumed, &job);

    queue.ack(message_id).await.expect("Failed to ack");
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_rejected_until_cleared() {
    let queue = queue();
    queue.init().await.unwrap();

    let job = ConvertJob::new(TaskId::new(), FileId::new(), ConvertOptions::default());
    queue.enqueue(&job).await.unwrap();
    assert!(matches!(queue.enqueue(&job).await, Err(QueueError::Duplicate(_))));

    queue.clear_dedup(&job).await.unwrap();
    queue.enqueue(&job).await.unwrap();
}

/// Test DLQ functionality.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_retry_count_and_dlq() {
    let queue = queue();
    queue.init().await.unwrap();

    let job = ConvertJob::new(TaskId::new(), FileId::new(), ConvertOptions::default());
    queue.enqueue(&job).await.unwrap();
    let jobs = queue.consume("test-consumer", 1000, 1).await.unwrap();
    let (message_id, _) = &jobs[0];

    assert_eq!(queue.increment_retry(message_id).await.unwrap(), 1);
    assert_eq!(queue.get_retry_count(message_id).await.unwrap(), 1);

    let before = queue.dlq_len().await.unwrap();
    queue.dlq(message_id, &job, "terminal write failed").await.unwrap();
    assert_eq!(queue.dlq_len().await.unwrap(), before + 1);
    assert_eq!(queue.get_retry_count(message_id).await.unwrap(), 0);
}
