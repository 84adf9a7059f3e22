//! End-to-end behavior of linked blocks.

use std::future::IntoFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lib_dataflow::{
    link, ActionBlock, BatchBlock, BatchOptions, Block, BroadcastBlock, BroadcastOptions,
    BufferBlock, DataflowError, ExecutionOptions, JoinBlock, JoinOptions, LinkOptions, Source,
    Target, TransformBlock, UnpairedPolicy,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Fails the test instead of hanging it.
async fn within<F: IntoFuture>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future.into_future())
        .await
        .expect("pipeline did not settle in time")
}

/// A sink that records what it receives.
fn collector<T: Send + 'static>(options: ExecutionOptions) -> (Arc<ActionBlock<T>>, Arc<Mutex<Vec<T>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = Arc::clone(&seen);
        ActionBlock::from_fn(options, move |value: T| {
            seen.lock().unwrap().push(value);
            Ok(())
        })
        .unwrap()
    };
    (sink, seen)
}

#[tokio::test]
async fn test_buffer_to_action_preserves_fifo_order() {
    init_logging();
    let buffer = BufferBlock::<u32>::new(ExecutionOptions::default()).unwrap();
    let (sink, seen) = collector::<u32>(ExecutionOptions::default());
    buffer.link_to(sink.clone(), LinkOptions::propagate()).unwrap();

    for i in 0..100 {
        assert!(buffer.send(i).await);
    }
    buffer.complete();
    within(sink.completion()).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
    assert!(buffer.completion().is_terminal());
}

#[tokio::test(start_paused = true)]
async fn test_capacity_bounds_post_and_suspends_send() {
    init_logging();
    let buffer = BufferBlock::<u32>::new(ExecutionOptions::default().with_capacity(2)).unwrap();
    assert!(buffer.post(1));
    assert!(buffer.post(2));
    assert!(!buffer.post(3));
    assert!(matches!(
        buffer.try_post(3),
        Err(DataflowError::CapacityExceeded { .. })
    ));

    let sender = {
        let buffer = Arc::clone(&buffer);
        tokio::spawn(async move { buffer.send(3).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!sender.is_finished(), "send must wait while the block is full");

    assert_eq!(buffer.receive().await, Some(1));
    assert!(within(sender).await.unwrap());
    assert_eq!(buffer.receive().await, Some(2));
    assert_eq!(buffer.receive().await, Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_waiting_senders_are_served_in_arrival_order() {
    init_logging();
    let buffer = BufferBlock::<u32>::new(ExecutionOptions::default().with_capacity(1)).unwrap();
    assert!(buffer.post(0));

    let mut senders = Vec::new();
    for i in 1..=3 {
        let buffer = Arc::clone(&buffer);
        senders.push(tokio::spawn(async move { buffer.send(i).await }));
        // Let each sender register before the next one arrives.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut received = Vec::new();
    for _ in 0..4 {
        received.push(within(buffer.receive()).await.unwrap());
    }
    assert_eq!(received, vec![0, 1, 2, 3]);
    for sender in senders {
        assert!(sender.await.unwrap());
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_send_returns_false_and_keeps_block_alive() {
    init_logging();
    let buffer = BufferBlock::<u32>::new(ExecutionOptions::default().with_capacity(1)).unwrap();
    assert!(buffer.post(1));

    let token = CancellationToken::new();
    let sender = {
        let buffer = Arc::clone(&buffer);
        let token = token.clone();
        tokio::spawn(async move { buffer.send_with_cancellation(2, token).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    assert!(!within(sender).await.unwrap());
    assert!(!buffer.completion().is_terminal());
    assert_eq!(buffer.receive().await, Some(1));
    assert!(buffer.post(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_receive_racing_the_delivery_loop_gets_every_value() {
    init_logging();
    let buffer = BufferBlock::<u32>::new(ExecutionOptions::default()).unwrap();
    for i in 0..2_000 {
        let receiver = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.receive().await })
        };
        assert!(buffer.post(i));
        assert_eq!(within(receiver).await.unwrap(), Some(i));
    }
    assert_eq!(buffer.output_count(), 0);
}

#[tokio::test]
async fn test_send_after_complete_is_refused() {
    init_logging();
    let buffer = BufferBlock::<u8>::new(ExecutionOptions::default()).unwrap();
    buffer.complete();
    assert!(!buffer.post(1));
    assert!(!buffer.send(2).await);
    within(buffer.completion()).await.unwrap();
}

#[tokio::test]
async fn test_unordered_parallel_transform_yields_a_permutation() {
    init_logging();
    let options = ExecutionOptions::default()
        .with_parallelism(4)
        .with_ensure_ordered(false);
    let square = TransformBlock::new(options, |x: u64| async move {
        tokio::time::sleep(Duration::from_millis((x % 4) * 5)).await;
        anyhow::Ok(x * x)
    })
    .unwrap();
    let (sink, seen) = collector::<u64>(ExecutionOptions::default());
    square.link_to(sink.clone(), LinkOptions::propagate()).unwrap();

    for i in 0..40 {
        assert!(square.send(i).await);
    }
    square.complete();
    within(sink.completion()).await.unwrap();

    let mut got = seen.lock().unwrap().clone();
    got.sort_unstable();
    assert_eq!(got, (0..40).map(|x| x * x).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_ordered_parallel_transform_keeps_order_downstream() {
    init_logging();
    let options = ExecutionOptions::default().with_parallelism(8);
    let delay = TransformBlock::new(options, |x: u64| async move {
        tokio::time::sleep(Duration::from_millis(40 - x)).await;
        anyhow::Ok(x)
    })
    .unwrap();
    let (sink, seen) = collector::<u64>(ExecutionOptions::default());
    delay.link_to(sink.clone(), LinkOptions::propagate()).unwrap();

    for i in 0..32 {
        delay.post(i);
    }
    delay.complete();
    within(sink.completion()).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), (0..32).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_batch_boundaries_through_links() {
    init_logging();
    let batch = BatchBlock::<u32>::new(BatchOptions::new(10)).unwrap();
    let (sink, seen) = collector::<Vec<u32>>(ExecutionOptions::default());
    batch.link_to(sink.clone(), LinkOptions::propagate()).unwrap();

    for i in 0..45 {
        assert!(batch.send(i).await);
    }
    batch.complete();
    within(sink.completion()).await.unwrap();

    let sizes: Vec<usize> = seen.lock().unwrap().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![10, 10, 10, 10, 5]);
}

#[tokio::test]
async fn test_trigger_batch_is_safe_alongside_posts() {
    init_logging();
    let batch = BatchBlock::<u32>::new(BatchOptions::new(7)).unwrap();
    let (sink, seen) = collector::<Vec<u32>>(ExecutionOptions::default());
    batch.link_to(sink.clone(), LinkOptions::propagate()).unwrap();

    let poster = {
        let batch = Arc::clone(&batch);
        tokio::spawn(async move {
            for i in 0..200 {
                batch.send(i).await;
                if i % 13 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };
    for _ in 0..20 {
        batch.trigger_batch();
        tokio::task::yield_now().await;
    }
    poster.await.unwrap();
    batch.complete();
    within(sink.completion()).await.unwrap();

    let batches = seen.lock().unwrap().clone();
    assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 7));
    let flat: Vec<u32> = batches.into_iter().flatten().collect();
    assert_eq!(flat, (0..200).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_join_emits_min_available_pairs_in_arrival_order() {
    init_logging();
    let join = JoinBlock::<u32, String>::new(JoinOptions::default()).unwrap();
    let numbers = BufferBlock::<u32>::new(ExecutionOptions::default()).unwrap();
    let words = BufferBlock::<String>::new(ExecutionOptions::default()).unwrap();
    numbers.link_to(join.target1(), LinkOptions::propagate()).unwrap();
    words.link_to(join.target2(), LinkOptions::propagate()).unwrap();
    let (sink, seen) = collector::<(u32, String)>(ExecutionOptions::default());
    join.link_to(sink.clone(), LinkOptions::propagate()).unwrap();

    for i in 0..5 {
        numbers.post(i);
    }
    for word in ["a", "b", "c"] {
        words.post(word.to_string());
    }
    numbers.complete();
    words.complete();
    within(sink.completion()).await.unwrap();

    let pairs = seen.lock().unwrap().clone();
    assert_eq!(
        pairs,
        vec![(0, "a".to_string()), (1, "b".to_string()), (2, "c".to_string())]
    );
}

#[tokio::test]
async fn test_join_pairs_a_word_stream_with_batches() {
    init_logging();
    let join = JoinBlock::<String, Vec<u32>>::new(JoinOptions::default()).unwrap();
    let words = BufferBlock::<String>::new(ExecutionOptions::default()).unwrap();
    let batch = BatchBlock::<u32>::new(BatchOptions::new(10)).unwrap();
    words.link_to(join.target1(), LinkOptions::propagate()).unwrap();
    batch.link_to(join.target2(), LinkOptions::propagate()).unwrap();
    let (sink, seen) = collector::<(String, Vec<u32>)>(ExecutionOptions::default());
    join.link_to(sink.clone(), LinkOptions::propagate()).unwrap();

    for word in ["a", "b"] {
        words.post(word.to_string());
    }
    for i in 0..25 {
        batch.post(i);
    }
    words.complete();
    batch.complete();
    within(sink.completion()).await.unwrap();

    // The trailing partial batch has no word left to pair with.
    let pairs = seen.lock().unwrap().clone();
    assert_eq!(
        pairs,
        vec![
            ("a".to_string(), (0..10).collect::<Vec<_>>()),
            ("b".to_string(), (10..20).collect::<Vec<_>>()),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_join_pairs_items_posted_just_before_completion() {
    init_logging();
    for i in 0..500u32 {
        let join = JoinBlock::<u32, u32>::new(JoinOptions::default().with_unpaired(UnpairedPolicy::Fault)).unwrap();
        let (first, second) = (join.target1(), join.target2());
        let producer = tokio::spawn(async move {
            assert!(first.post(i));
            assert!(second.post(i));
            first.complete();
            second.complete();
        });
        within(producer).await.unwrap();

        assert_eq!(within(join.receive()).await, Some((i, i)));
        within(join.completion()).await.unwrap();
    }
}

#[tokio::test]
async fn test_broadcast_overwrites_values_a_slow_target_missed() {
    init_logging();
    let broadcast = BroadcastBlock::<u32>::new(BroadcastOptions::default()).unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let slow = {
        let gate = Arc::clone(&gate);
        let seen = Arc::clone(&seen);
        ActionBlock::new(ExecutionOptions::default().with_capacity(1), move |x: u32| {
            let gate = Arc::clone(&gate);
            let seen = Arc::clone(&seen);
            async move {
                let _permit = gate.acquire().await?;
                seen.lock().unwrap().push(x);
                anyhow::Ok(())
            }
        })
        .unwrap()
    };
    let (fast, fast_seen) = collector::<u32>(ExecutionOptions::default());
    broadcast.link_to(slow.clone(), LinkOptions::propagate()).unwrap();
    broadcast.link_to(fast.clone(), LinkOptions::propagate()).unwrap();

    for i in 1..=10 {
        assert!(broadcast.post(i));
    }
    within(async {
        while broadcast.input_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    broadcast.complete();
    gate.add_permits(100);
    within(slow.completion()).await.unwrap();
    within(fast.completion()).await.unwrap();

    let slow_seen = seen.lock().unwrap().clone();
    assert_eq!(slow_seen.first(), Some(&1));
    assert_eq!(slow_seen.last(), Some(&10));
    assert!(slow_seen.len() < 10, "slow target should have skipped values");
    assert!(slow_seen.windows(2).all(|w| w[0] < w[1]));
    // An unbounded target keeps up and sees everything.
    assert_eq!(*fast_seen.lock().unwrap(), (1..=10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_broadcast_seeds_late_links_with_latest_value() {
    init_logging();
    let broadcast = BroadcastBlock::<&'static str>::new(BroadcastOptions::default()).unwrap();
    broadcast.post("first");
    broadcast.post("second");
    let peeked = within(broadcast.receive()).await;
    assert!(matches!(peeked, Some("first") | Some("second")));

    while broadcast.input_count() > 0 {
        tokio::task::yield_now().await;
    }
    let late = BufferBlock::<&'static str>::new(ExecutionOptions::default()).unwrap();
    broadcast.link_to(late.clone(), LinkOptions::new()).unwrap();
    assert_eq!(within(late.receive()).await, Some("second"));
}

#[tokio::test]
async fn test_broadcast_link_predicates_filter_delivery_and_seeding() {
    init_logging();
    let broadcast = BroadcastBlock::<u32>::new(BroadcastOptions::default()).unwrap();
    let (evens, evens_seen) = collector::<u32>(ExecutionOptions::default());
    let (odds, odds_seen) = collector::<u32>(ExecutionOptions::default());
    broadcast
        .link_to(evens.clone(), LinkOptions::new().with_predicate(|x: &u32| x % 2 == 0))
        .unwrap();
    broadcast
        .link_to(odds.clone(), LinkOptions::new().with_predicate(|x: &u32| x % 2 == 1))
        .unwrap();

    for i in 1..=6 {
        assert!(broadcast.post(i));
    }
    within(async {
        while evens_seen.lock().unwrap().len() < 3 || odds_seen.lock().unwrap().len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert_eq!(*evens_seen.lock().unwrap(), vec![2, 4, 6]);
    assert_eq!(*odds_seen.lock().unwrap(), vec![1, 3, 5]);

    // The latest value is 6: only a link whose predicate takes it is seeded.
    let late_odd = BufferBlock::<u32>::new(ExecutionOptions::default()).unwrap();
    let late_even = BufferBlock::<u32>::new(ExecutionOptions::default()).unwrap();
    broadcast
        .link_to(late_odd.clone(), LinkOptions::new().with_predicate(|x: &u32| x % 2 == 1))
        .unwrap();
    broadcast
        .link_to(late_even.clone(), LinkOptions::new().with_predicate(|x: &u32| x % 2 == 0))
        .unwrap();
    assert_eq!(within(late_even.receive()).await, Some(6));
    assert_eq!(late_odd.try_receive(), None);
}

#[tokio::test]
async fn test_panicking_predicate_faults_the_source() {
    init_logging();
    let buffer = BufferBlock::<u32>::new(ExecutionOptions::default()).unwrap();
    let (sink, seen) = collector::<u32>(ExecutionOptions::default());
    buffer
        .link_to(
            sink.clone(),
            LinkOptions::propagate().with_predicate(|x: &u32| {
                if *x == 2 {
                    panic!("predicate cannot handle 2");
                }
                true
            }),
        )
        .unwrap();

    buffer.post(1);
    buffer.post(2);
    buffer.post(3);
    let err = within(buffer.completion()).await.unwrap_err();
    assert!(err.to_string().contains("predicate cannot handle 2"));
    assert!(within(sink.completion()).await.is_err());
    assert!(!seen.lock().unwrap().contains(&3));
    assert!(!buffer.post(4));
}

#[tokio::test]
async fn test_panicking_clone_function_faults_the_broadcast() {
    init_logging();
    let broadcast = BroadcastBlock::with_cloning(BroadcastOptions::default(), |x: &u32| {
        if *x == 3 {
            panic!("cannot copy 3");
        }
        *x
    })
    .unwrap();
    let (sink, _seen) = collector::<u32>(ExecutionOptions::default());
    broadcast.link_to(sink.clone(), LinkOptions::propagate()).unwrap();

    for i in 1..=3 {
        broadcast.post(i);
    }
    let err = within(broadcast.completion()).await.unwrap_err();
    assert!(err.to_string().contains("cannot copy 3"));
    assert!(within(sink.completion()).await.is_err());
    // The slot lock stays usable after the fault.
    assert_eq!(broadcast.output_count(), 0);
    assert!(broadcast.try_receive().map_or(true, |x| x < 3));
}

#[tokio::test]
async fn test_panicking_predicate_while_seeding_faults_the_broadcast() {
    init_logging();
    let broadcast = BroadcastBlock::<u32>::new(BroadcastOptions::default()).unwrap();
    broadcast.post(7);
    assert_eq!(within(broadcast.receive()).await, Some(7));

    let late = BufferBlock::<u32>::new(ExecutionOptions::default()).unwrap();
    broadcast
        .link_to(
            late.clone(),
            LinkOptions::propagate().with_predicate(|_: &u32| panic!("no seeds please")),
        )
        .unwrap();
    assert!(within(broadcast.completion()).await.is_err());
    assert!(within(late.completion()).await.is_err());
}

#[tokio::test]
async fn test_completion_propagates_along_a_chain() {
    init_logging();
    let a = BufferBlock::<i32>::new(ExecutionOptions::default()).unwrap();
    let b = TransformBlock::from_fn(ExecutionOptions::default(), |x: i32| Ok(x + 1)).unwrap();
    let (c, seen) = collector::<i32>(ExecutionOptions::default());
    link(&*a, b.clone(), LinkOptions::propagate()).unwrap();
    link(&*b, c.clone(), LinkOptions::propagate()).unwrap();

    a.post(1);
    a.complete();
    within(c.completion()).await.unwrap();
    assert!(b.completion().is_terminal());
    assert_eq!(*seen.lock().unwrap(), vec![2]);
}

#[tokio::test]
async fn test_target_with_two_propagating_sources_waits_for_both() {
    init_logging();
    let left = BufferBlock::<u32>::new(ExecutionOptions::default()).unwrap();
    let right = BufferBlock::<u32>::new(ExecutionOptions::default()).unwrap();
    let (sink, seen) = collector::<u32>(ExecutionOptions::default());
    left.link_to(sink.clone(), LinkOptions::propagate()).unwrap();
    right.link_to(sink.clone(), LinkOptions::propagate()).unwrap();

    left.post(1);
    left.complete();
    within(left.completion()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!sink.completion().is_terminal());

    right.post(2);
    right.complete();
    within(sink.completion()).await.unwrap();
    let mut got = seen.lock().unwrap().clone();
    got.sort_unstable();
    assert_eq!(got, vec![1, 2]);
}

#[tokio::test]
async fn test_fault_propagates_downstream_but_not_upstream() {
    init_logging();
    let head = BufferBlock::<u32>::new(ExecutionOptions::default()).unwrap();
    let fails = TransformBlock::from_fn(ExecutionOptions::default(), |x: u32| {
        anyhow::ensure!(x < 3, "value {} too large", x);
        Ok(x)
    })
    .unwrap();
    let (sink, _seen) = collector::<u32>(ExecutionOptions::default());
    head.link_to(fails.clone(), LinkOptions::propagate()).unwrap();
    fails.link_to(sink.clone(), LinkOptions::propagate()).unwrap();

    for i in 0..5 {
        head.post(i);
    }
    let err = within(sink.completion()).await.unwrap_err();
    assert!(err.to_string().contains("too large"));
    assert!(within(fails.completion()).await.is_err());
    // The upstream buffer is untouched by the downstream fault.
    assert!(!head.completion().is_terminal());
}

#[tokio::test]
async fn test_explicit_fault_discards_queued_work() {
    init_logging();
    let buffer = BufferBlock::<u32>::new(ExecutionOptions::default()).unwrap();
    for i in 0..3 {
        buffer.post(i);
    }
    buffer.fault(DataflowError::faulted(anyhow::anyhow!("stop")));
    assert!(within(buffer.completion()).await.is_err());
    assert_eq!(buffer.try_receive(), None);
    assert_eq!(within(buffer.receive()).await, None);
    assert!(!buffer.post(9));
}

#[tokio::test]
async fn test_predicates_route_to_the_first_matching_link() {
    init_logging();
    let buffer = BufferBlock::<u32>::new(ExecutionOptions::default()).unwrap();
    let (evens, even_seen) = collector::<u32>(ExecutionOptions::default());
    let (rest, rest_seen) = collector::<u32>(ExecutionOptions::default());
    buffer
        .link_to(evens.clone(), LinkOptions::propagate().with_predicate(|x: &u32| x % 2 == 0))
        .unwrap();
    buffer.link_to(rest.clone(), LinkOptions::propagate()).unwrap();

    for i in 0..10 {
        buffer.post(i);
    }
    buffer.complete();
    within(evens.completion()).await.unwrap();
    within(rest.completion()).await.unwrap();

    assert_eq!(*even_seen.lock().unwrap(), vec![0, 2, 4, 6, 8]);
    assert_eq!(*rest_seen.lock().unwrap(), vec![1, 3, 5, 7, 9]);
}

#[tokio::test]
async fn test_max_messages_unlinks_after_the_limit() {
    init_logging();
    let buffer = BufferBlock::<u32>::new(ExecutionOptions::default()).unwrap();
    let (first, first_seen) = collector::<u32>(ExecutionOptions::default());
    let (second, second_seen) = collector::<u32>(ExecutionOptions::default());
    buffer
        .link_to(first.clone(), LinkOptions::new().with_max_messages(2))
        .unwrap();
    buffer.link_to(second.clone(), LinkOptions::propagate()).unwrap();

    for i in 0..5 {
        buffer.post(i);
    }
    buffer.complete();
    within(second.completion()).await.unwrap();

    assert_eq!(*first_seen.lock().unwrap(), vec![0, 1]);
    assert_eq!(*second_seen.lock().unwrap(), vec![2, 3, 4]);
    // Not propagating: the exhausted link left `first` running.
    assert!(!first.completion().is_terminal());
}

#[tokio::test]
async fn test_unlink_stops_delivery() {
    init_logging();
    let buffer = BufferBlock::<u32>::new(ExecutionOptions::default()).unwrap();
    let (sink, seen) = collector::<u32>(ExecutionOptions::default());
    let handle = buffer.link_to(sink.clone(), LinkOptions::new()).unwrap();

    buffer.post(1);
    within(async {
        while seen.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(handle.unlink());

    buffer.post(2);
    assert_eq!(within(buffer.receive()).await, Some(2));
    assert_eq!(*seen.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn test_unlinking_the_last_pending_source_completes_the_target() {
    init_logging();
    let first = BufferBlock::<u32>::new(ExecutionOptions::default()).unwrap();
    let second = BufferBlock::<u32>::new(ExecutionOptions::default()).unwrap();
    let (sink, seen) = collector::<u32>(ExecutionOptions::default());
    first.link_to(sink.clone(), LinkOptions::propagate()).unwrap();
    let handle = second.link_to(sink.clone(), LinkOptions::propagate()).unwrap();

    first.post(1);
    first.complete();
    within(first.completion()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!sink.completion().is_terminal(), "second source is still linked");

    assert!(handle.unlink());
    within(sink.completion()).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![1]);
    // The detached source lives on and keeps its messages.
    assert!(second.post(2));
    assert_eq!(within(second.receive()).await, Some(2));
}

#[tokio::test]
async fn test_linking_into_a_finished_block_is_rejected() {
    init_logging();
    let buffer = BufferBlock::<u8>::new(ExecutionOptions::default()).unwrap();
    let (sink, _) = collector::<u8>(ExecutionOptions::default());
    sink.complete();
    within(sink.completion()).await.unwrap();

    let result = buffer.link_to(sink, LinkOptions::propagate());
    assert!(matches!(result, Err(DataflowError::LinkAlreadyFaulted { .. })));
    assert!(matches!(
        buffer.link_to(
            BufferBlock::<u8>::new(ExecutionOptions::default()).unwrap(),
            LinkOptions::new().with_max_messages(0)
        ),
        Err(DataflowError::InvalidOptions(_))
    ));
}

#[tokio::test]
async fn test_linking_from_a_completed_source_propagates_at_once() {
    init_logging();
    let source = BufferBlock::<u8>::new(ExecutionOptions::default()).unwrap();
    source.complete();
    within(source.completion()).await.unwrap();

    let (sink, _) = collector::<u8>(ExecutionOptions::default());
    source.link_to(sink.clone(), LinkOptions::propagate()).unwrap();
    within(sink.completion()).await.unwrap();
}

#[tokio::test]
async fn test_invalid_options_are_rejected_at_construction() {
    init_logging();
    assert!(matches!(
        TransformBlock::from_fn(ExecutionOptions::default().with_parallelism(0), |x: u8| Ok(x)),
        Err(DataflowError::InvalidOptions(_))
    ));
    assert!(BatchBlock::<u8>::new(BatchOptions::new(0)).is_err());
    assert!(BufferBlock::<u8>::new(ExecutionOptions::default().with_capacity(0)).is_err());
}
