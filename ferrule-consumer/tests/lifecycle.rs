//! Consumer lifecycle tests against the in-memory cluster.

use ferrule_consumer::{ConsumeWorker, Consumer, ConsumerOptions, ConsumerState, RebalanceEvent};
use ferrule_core::testing::{MockCluster, Op};
use ferrule_core::{
    BrokerError, ClientConfig, ConsumerEvent, Error, ErrorCode, FatalError, Message,
    TopicPartition, BOOTSTRAP_SERVERS, GROUP_ID,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

fn config() -> ClientConfig {
    ClientConfig::new().with(GROUP_ID, "lifecycle-tests")
}

/// Options whose fatal handler records instead of exiting.
fn options(config: ClientConfig) -> (ConsumerOptions, Arc<Mutex<Vec<FatalError>>>) {
    let fatal = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fatal);
    let options = ConsumerOptions::new(config)
        .with_polling_timeout(Duration::from_millis(10))
        .with_fatal_handler(move |err| sink.lock().push(err.clone()));
    (options, fatal)
}

fn consumer(cluster: &MockCluster, options: ConsumerOptions) -> Consumer {
    Consumer::new(options, Arc::new(cluster.clone()))
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2.5s");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_subscribe_run_close() {
    init_tracing();
    let cluster = MockCluster::new();
    let (options, fatal) = options(config());
    let consumer = consumer(&cluster, options);
    assert_eq!(consumer.state(), ConsumerState::New);

    consumer
        .subscribe(&["t1", "t2", "t3"], None)
        .await
        .expect("subscribe");
    assert!(consumer.is_running());
    assert_eq!(consumer.topics().await, vec!["t1", "t2", "t3"]);
    assert_eq!(cluster.consumers().len(), 3);
    for (mock, topic) in cluster.consumers().iter().zip(["t1", "t2", "t3"]) {
        assert_eq!(mock.topics(), vec![topic.to_string()]);
    }

    let err = consumer
        .subscribe(&["t4"], None)
        .await
        .expect_err("already running");
    assert!(err.is_running());
    assert_eq!(err.to_string(), "the Consumer is running");
    assert_eq!(cluster.consumers().len(), 3);

    consumer.close().await;
    assert_eq!(consumer.state(), ConsumerState::Disposed);
    assert_eq!(cluster.consumer_closes(), 3);
    for mock in cluster.consumers() {
        let ops = mock.ops();
        assert_eq!(&ops[ops.len() - 3..], &[Op::Unassign, Op::Unsubscribe, Op::Close]);
    }

    let err = consumer
        .subscribe(&["t1"], None)
        .await
        .expect_err("disposed");
    assert!(err.is_disposed());
    assert_eq!(err.to_string(), "the Consumer has been disposed");
    assert!(fatal.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_subscribe_and_close() {
    init_tracing();
    for _ in 0..20 {
        let cluster = MockCluster::new();
        let (options, fatal) = options(config());
        let consumer = Arc::new(consumer(&cluster, options));

        let mut subscribers = Vec::new();
        for _ in 0..8 {
            let consumer = Arc::clone(&consumer);
            subscribers.push(tokio::spawn(async move {
                consumer.subscribe(&["t1", "t2"], None).await
            }));
        }
        let closer = {
            let consumer = Arc::clone(&consumer);
            tokio::spawn(async move { consumer.close().await })
        };

        let mut started = 0;
        for subscriber in subscribers {
            match subscriber.await.expect("subscribe task") {
                Ok(()) => started += 1,
                Err(err) => assert!(err.is_running() || err.is_disposed(), "{err}"),
            }
        }
        closer.await.expect("close task");

        assert!(started <= 1);
        assert_eq!(consumer.state(), ConsumerState::Disposed);
        assert_eq!(cluster.consumers().len(), 2 * started);
        assert_eq!(cluster.consumer_closes(), 2 * started);
        assert!(fatal.lock().is_empty());
    }
}

#[tokio::test]
async fn test_close_twice_is_a_no_op() {
    let cluster = MockCluster::new();
    let (options, _) = options(config());
    let consumer = consumer(&cluster, options);
    consumer.subscribe(&["t1"], None).await.expect("subscribe");

    consumer.close().await;
    consumer.close().await;
    assert_eq!(cluster.consumer_closes(), 1);
}

#[tokio::test]
async fn test_close_before_subscribe_disposes() {
    let cluster = MockCluster::new();
    let (options, _) = options(config());
    let consumer = consumer(&cluster, options);

    consumer.close().await;
    assert_eq!(consumer.state(), ConsumerState::Disposed);
    assert!(consumer.subscribe(&["t1"], None).await.is_err());
    assert!(cluster.consumers().is_empty());
}

#[tokio::test]
async fn test_missing_group_id_disposes() {
    let cluster = MockCluster::new();
    let (options, _) = options(ClientConfig::new());
    let consumer = consumer(&cluster, options);

    let err = consumer
        .subscribe(&["t1"], None)
        .await
        .expect_err("group.id missing");
    assert!(matches!(err, Error::Configuration { .. }));
    assert_eq!(consumer.state(), ConsumerState::Disposed);

    let err = consumer
        .subscribe(&["t1"], None)
        .await
        .expect_err("disposed");
    assert!(err.is_disposed());
}

#[tokio::test]
async fn test_unreachable_bootstrap_fails_before_creating_handles() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let dead = listener.local_addr().expect("addr").to_string();
    drop(listener);

    let cluster = MockCluster::new();
    let (options, _) = options(config().with(BOOTSTRAP_SERVERS, dead));
    let consumer = consumer(&cluster, options.with_ping_timeout(Duration::from_millis(500)));

    let err = consumer
        .subscribe(&["t1"], None)
        .await
        .expect_err("unreachable");
    assert!(matches!(err, Error::Connectivity { .. }));
    assert_eq!(consumer.state(), ConsumerState::Disposed);
    assert!(cluster.consumers().is_empty());
}

#[tokio::test]
async fn test_failed_topic_keeps_earlier_handles_until_drop() {
    let cluster = MockCluster::new();
    cluster.reject_topic("missing");
    let (options, _) = options(config());
    let consumer = consumer(&cluster, options);

    let err = consumer
        .subscribe(&["t1", "missing"], None)
        .await
        .expect_err("rejected topic");
    assert_eq!(
        err.broker_error().map(|e| e.code),
        Some(ErrorCode::UnknownTopicOrPartition)
    );
    assert_eq!(consumer.state(), ConsumerState::Disposed);

    let handles = cluster.consumers();
    assert_eq!(handles.len(), 2);
    // The rejected handle is closed immediately; the first waits for drop.
    assert!(!handles[0].is_closed());
    assert!(handles[1].is_closed());

    consumer.close().await;
    assert!(!handles[0].is_closed());

    drop(consumer);
    assert!(handles[0].is_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_messages_reach_handler_per_topic() {
    let cluster = MockCluster::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let (options, _) = options(config());
    let options = options.with_message_handler(move |worker: &ConsumeWorker, message: Message| {
        assert_eq!(worker.topic(), message.topic);
        worker.commit_message(&message).expect("commit");
        sink.lock().push(message.topic);
    });
    let consumer = consumer(&cluster, options);
    consumer.subscribe(&["a", "b"], None).await.expect("subscribe");

    cluster.push_message(Message::new("a", "1"));
    cluster.push_message(Message::new("b", "2"));
    cluster.push_message(Message::new("a", "3"));
    eventually(|| seen.lock().len() == 3).await;

    consumer.close().await;
    let mut topics = seen.lock().clone();
    topics.sort();
    assert_eq!(topics, vec!["a", "a", "b"]);
    let a = cluster.consumer_for("a");
    assert!(a.is_none(), "unsubscribed on close");
    assert_eq!(cluster.consumers()[0].calls_of(Op::CommitMessage).len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unhandled_messages_are_forwarded() {
    let cluster = MockCluster::new();
    let forwarded = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&forwarded);
    let (options, fatal) = options(config());
    let options = options.with_unhandled_message_handler(move |worker: &ConsumeWorker, _: Message| {
        assert!(worker.is_forwarded());
        *counter.lock() += 1;
    });
    let consumer = consumer(&cluster, options);
    consumer.subscribe(&["a"], None).await.expect("subscribe");

    cluster.push_message(Message::new("a", "x"));
    cluster.push_message(Message::new("a", "y"));
    eventually(|| *forwarded.lock() == 2).await;

    consumer.close().await;
    assert!(fatal.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_recursive_forward_stops_loop() {
    let cluster = MockCluster::new();
    let (options, fatal) = options(config());
    let options = options
        .with_message_handler(|worker: &ConsumeWorker, message: Message| {
            worker.forward_unhandled_message(message);
        })
        .with_unhandled_message_handler(|worker: &ConsumeWorker, message: Message| {
            worker.forward_unhandled_message(message);
        });
    let consumer = consumer(&cluster, options);
    consumer.subscribe(&["a"], None).await.expect("subscribe");

    cluster.push_message(Message::new("a", "loop"));
    let handle = Arc::clone(&cluster.consumers()[0]);
    eventually(|| handle.is_closed()).await;

    assert_eq!(
        fatal.lock().as_slice(),
        &[FatalError::RecursiveForward { topic: "a".into() }]
    );
    // The loop is gone but the consumer still needs closing.
    assert!(consumer.is_running());
    consumer.close().await;
    assert_eq!(handle.close_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unhandled_error_ends_only_that_loop() {
    let cluster = MockCluster::new();
    let (options, fatal) = options(config());
    let consumer = consumer(&cluster, options);
    consumer.subscribe(&["a", "b"], None).await.expect("subscribe");

    cluster.push(
        "a",
        ConsumerEvent::Error(BrokerError::new(ErrorCode::MessageTimedOut, "timed out")),
    );
    let handles = cluster.consumers();
    eventually(|| handles[0].is_closed()).await;
    assert!(!handles[1].is_closed());
    assert!(fatal.lock().is_empty());

    consumer.close().await;
    assert!(handles[1].is_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_error_handler_claims_unknown_topic() {
    let cluster = MockCluster::new();
    let claimed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&claimed);
    let (options, fatal) = options(config());
    let options = options.with_error_handler(move |err: &BrokerError| {
        sink.lock().push(err.code);
        true
    });
    let consumer = consumer(&cluster, options);
    consumer.subscribe(&["a"], None).await.expect("subscribe");

    cluster.push(
        "a",
        ConsumerEvent::Error(BrokerError::new(ErrorCode::UnknownTopicOrPartition, "gone")),
    );
    eventually(|| !claimed.lock().is_empty()).await;
    assert!(!cluster.consumers()[0].is_closed());

    consumer.close().await;
    assert!(fatal.lock().is_empty());
    assert_eq!(claimed.lock().as_slice(), &[ErrorCode::UnknownTopicOrPartition]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rebalance_callback_sees_applied_assignment() {
    let cluster = MockCluster::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let (options, _) = options(config());
    let consumer = consumer(&cluster, options);
    consumer
        .subscribe(
            &["a"],
            Some(Arc::new(move |worker: &ConsumeWorker, event: &RebalanceEvent| {
                sink.lock().push((worker.topic().to_string(), event.clone()));
                Ok::<(), Error>(())
            })),
        )
        .await
        .expect("subscribe");

    let partitions = vec![TopicPartition::new("a", 0)];
    cluster.push("a", ConsumerEvent::Assigned(partitions.clone()));
    eventually(|| events.lock().len() == 1).await;
    assert_eq!(cluster.consumers()[0].assignment(), partitions);

    cluster.push("a", ConsumerEvent::Revoked(partitions.clone()));
    eventually(|| events.lock().len() == 2).await;
    assert!(cluster.consumers()[0].assignment().is_empty());

    consumer.close().await;
    assert_eq!(
        events.lock().as_slice(),
        &[
            ("a".to_string(), RebalanceEvent::Assigned(partitions.clone())),
            ("a".to_string(), RebalanceEvent::Revoked(partitions)),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wait_from_handler_pauses_and_resumes() {
    let cluster = MockCluster::new();
    let (options, _) = options(config());
    let done = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&done);
    let options = options.with_message_handler(move |worker: &ConsumeWorker, message: Message| {
        let flag = Arc::clone(&flag);
        let partitions = vec![message.topic_partition()];
        // Fire and forget; the timer keeps running after the handle drops.
        let _ = worker
            .wait(partitions, Duration::from_millis(30), move || {
                *flag.lock() = true;
                Ok(())
            })
            .expect("pause");
    });
    let consumer = consumer(&cluster, options);
    consumer.subscribe(&["a"], None).await.expect("subscribe");

    cluster.push_message(Message::builder("a").partition(2).offset(7_i64).build());
    let handle = Arc::clone(&cluster.consumers()[0]);
    eventually(|| !handle.calls_of(Op::Resume).is_empty()).await;

    assert!(*done.lock());
    let pause = &handle.calls_of(Op::Pause)[0];
    let resume = &handle.calls_of(Op::Resume)[0];
    assert!(resume.at.duration_since(pause.at) >= Duration::from_millis(30));
    assert_eq!(pause.partitions, resume.partitions);

    consumer.close().await;
}
