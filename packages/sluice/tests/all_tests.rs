use rand::prelude::*;
use rand_pcg::Pcg32;
use sluice::{from_iter, scoped, select, Channel, Closed, RecvError};
use std::time::{Duration, Instant};

fn new_rng() -> impl Rng {
    Pcg32::from_seed(0xc0ffeec0ffeec0ffeec0ffeec0ffee00u128.to_le_bytes())
}

#[test]
fn one_sender_one_receiver_sums_ten_million() {
    const N: u64 = 10_000_000;
    let channel = Channel::with_capacity(1024);
    let total = scoped(|scope| {
        let sender = {
            let channel = channel.clone();
            scope.fork(move || {
                for i in 1..=N {
                    channel.send(i).unwrap();
                }
            })
        };
        let receiver = {
            let channel = channel.clone();
            scope.fork(move || {
                let mut total = 0u64;
                for _ in 0..N {
                    total += channel.receive().unwrap();
                }
                total
            })
        };
        sender.join();
        receiver.join()
    });
    assert_eq!(total, N * (N + 1) / 2);
}

#[test]
fn concurrent_forks_overlap_and_join_in_order() {
    let (first, second) = scoped(|scope| {
        let f1 = scope.fork(|| {
            sluice::sleep(Duration::from_millis(50)).unwrap();
            5
        });
        let f2 = scope.fork(|| {
            sluice::sleep(Duration::from_millis(100)).unwrap();
            6
        });
        (f1.join(), f2.join())
    });
    assert_eq!(first + second, 11);
}

#[test]
fn no_element_is_lost_or_duplicated_under_interrupts() {
    const SENDERS: u64 = 4;
    const RECEIVERS: u64 = 4;
    const PER_SENDER: u64 = 500;

    let mut rng = new_rng();
    let channel = Channel::with_capacity(4);
    let tasks = Channel::new();

    let mut received = scoped(|scope| {
        for s in 0..SENDERS {
            let channel = channel.clone();
            scope.fork(move || {
                for i in 0..PER_SENDER {
                    channel.send(s * 1_000_000 + i).unwrap();
                }
            });
        }
        let receivers: Vec<_> = (0..RECEIVERS)
            .map(|_| {
                let channel = channel.clone();
                let tasks = tasks.clone();
                scope.fork(move || {
                    tasks.send(sluice::current()).unwrap();
                    let quota = SENDERS * PER_SENDER / RECEIVERS;
                    let mut mine = Vec::new();
                    while (mine.len() as u64) < quota {
                        match channel.receive() {
                            Ok(value) => mine.push(value),
                            // an interrupt mid-receive must not have consumed
                            // anything; just try again.
                            Err(RecvError::Interrupted(_)) => {}
                            Err(other) => panic!("unexpected receive error: {}", other),
                        }
                    }
                    mine
                })
            })
            .collect();

        let receiver_tasks: Vec<_> = (0..RECEIVERS).map(|_| tasks.receive().unwrap()).collect();
        for _ in 0..300 {
            receiver_tasks[rng.gen_range(0..receiver_tasks.len())].interrupt();
            std::thread::yield_now();
        }

        receivers.into_iter().flat_map(|fork| fork.join()).collect::<Vec<u64>>()
    });

    let mut expected: Vec<u64> = (0..SENDERS)
        .flat_map(|s| (0..PER_SENDER).map(move |i| s * 1_000_000 + i))
        .collect();
    received.sort_unstable();
    expected.sort_unstable();
    assert_eq!(received, expected);
}

#[test]
fn interrupting_a_blocked_receive_consumes_nothing() {
    let channel = Channel::<i32>::new();
    let handoff = Channel::new();
    let outcome = scoped(|scope| {
        let receiver = {
            let channel = channel.clone();
            let handoff = handoff.clone();
            scope.fork(move || {
                handoff.send(sluice::current()).unwrap();
                channel.receive()
            })
        };
        let task = handoff.receive().unwrap();
        sluice::sleep(Duration::from_millis(20)).unwrap();
        task.interrupt();
        receiver.join()
    });
    assert!(matches!(outcome, Err(RecvError::Interrupted(_))));
    // the channel still works and nothing was consumed by the aborted wait.
    channel.send(5).unwrap();
    assert_eq!(channel.receive().unwrap(), 5);
}

#[test]
fn interrupt_racing_a_send_never_loses_the_element() {
    for _ in 0..200 {
        let channel = Channel::new();
        let handoff = Channel::new();
        let outcome = scoped(|scope| {
            let receiver = {
                let channel = channel.clone();
                let handoff = handoff.clone();
                scope.fork(move || {
                    handoff.send(sluice::current()).unwrap();
                    channel.receive()
                })
            };
            let task = handoff.receive().unwrap();
            task.interrupt();
            channel.send(7).unwrap();
            receiver.join()
        });
        match outcome {
            // the interrupt lost the race: the delivery was honored.
            Ok(value) => assert_eq!(value, 7),
            // the interrupt won: the element stayed in the channel.
            Err(RecvError::Interrupted(_)) => {
                assert_eq!(channel.receive_timeout(Duration::from_secs(1)).unwrap(), 7);
            }
            Err(other) => panic!("unexpected receive error: {}", other),
        }
    }
}

#[test]
fn select_takes_the_ready_source() {
    let a = Channel::<i32>::new();
    let b = Channel::new();
    b.send(42).unwrap();
    assert_eq!(select(&[&a, &b]).unwrap(), 42);
}

#[test]
fn a_done_source_does_not_preempt_a_ready_one() {
    let a = Channel::<i32>::new();
    let b = Channel::new();
    a.done().unwrap();
    b.send(7).unwrap();
    assert_eq!(select(&[&a, &b]).unwrap(), 7);
    assert!(matches!(select(&[&a, &b]), Err(RecvError::Closed(Closed::Done))));
}

#[test]
fn pipeline_end_to_end() {
    scoped(|scope| {
        let tripled = from_iter(scope, vec![1, 2, 3]).map(scope, |n| anyhow::Ok(n * 3));
        assert_eq!(tripled.to_list().unwrap(), vec![3, 6, 9]);
        assert!(matches!(tripled.receive(), Err(RecvError::Closed(Closed::Done))));
    });
}

#[test]
fn tick_keeps_emitting() {
    scoped(|scope| {
        let interval = Duration::from_millis(10);
        let ticks = sluice::tick(scope, interval, ());
        let start = Instant::now();
        let mut count = 0;
        while count < 15 && start.elapsed() < Duration::from_secs(5) {
            if ticks.receive_timeout(Duration::from_millis(500)).is_ok() {
                count += 1;
            }
        }
        assert_eq!(count, 15);
        // each emission waits out a full interval first.
        assert!(start.elapsed() >= interval * 15);
        assert!(ticks.closed().is_none());
    });
}
