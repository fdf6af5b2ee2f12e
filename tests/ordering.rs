//! Ordering guarantees under concurrent dispatch.

mod common;

use common::{drain, subscription, Harness};
use crossbeam_channel::bounded;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use subscription_sync::{CorrelationId, Notification, SubscriptionEvent};

#[test]
fn test_add_then_remove_from_concurrent_callers() {
    let harness = Arc::new(Harness::new());
    let mailboxes: Vec<_> = (1..=3)
        .map(|n| harness.join(&format!("ctl://client-{n}"), n))
        .collect();
    harness.flush();
    for mailbox in &mailboxes {
        mailbox.drain();
    }

    const SUBSCRIPTIONS: u128 = 50;
    let mut handles = Vec::new();
    for n in 1..=SUBSCRIPTIONS {
        let (added_tx, added_rx) = bounded::<()>(1);

        let adder = {
            let harness = Arc::clone(&harness);
            thread::spawn(move || {
                harness
                    .bus
                    .publish(SubscriptionEvent::SubscriptionAdded {
                        subscription: subscription(n, "Ordered", "q://ordered"),
                    })
                    .unwrap();
                added_tx.send(()).unwrap();
            })
        };
        let remover = {
            let harness = Arc::clone(&harness);
            thread::spawn(move || {
                added_rx.recv().unwrap();
                harness
                    .bus
                    .publish(SubscriptionEvent::SubscriptionRemoved {
                        subscription: subscription(n, "Ordered", "q://ordered"),
                    })
                    .unwrap();
            })
        };
        handles.push(adder);
        handles.push(remover);
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for mailbox in &mailboxes {
        let received = drain(&harness, mailbox);
        assert_eq!(received.len(), 2 * SUBSCRIPTIONS as usize);

        // Position of each notification per subscription
        let mut seen: HashMap<CorrelationId, Vec<&'static str>> = HashMap::new();
        for envelope in &received {
            let (id, name) = match &envelope.message {
                Notification::AddSubscription { subscription } => {
                    (subscription.subscription_id, "add")
                }
                Notification::RemoveSubscription { subscription } => {
                    (subscription.subscription_id, "remove")
                }
                other => panic!("Unexpected notification {:?}", other),
            };
            seen.entry(id).or_default().push(name);
        }

        assert_eq!(seen.len(), SUBSCRIPTIONS as usize);
        for (id, order) in &seen {
            assert_eq!(order, &vec!["add", "remove"], "subscription {id}");
        }
    }
}

#[test]
fn test_join_racing_with_adds_sees_each_subscription_once() {
    let harness = Arc::new(Harness::new());

    let publisher = {
        let harness = Arc::clone(&harness);
        thread::spawn(move || {
            for n in 1..=100 {
                harness
                    .service
                    .consume_subscription_added(subscription(n, "Racing", "q://racing"))
                    .unwrap();
            }
        })
    };
    let mailbox = harness.join("ctl://late", 7);
    publisher.join().unwrap();

    // Each subscription reaches the joiner exactly once: either in the
    // snapshot or as a later AddSubscription, never both, never neither.
    let received = drain(&harness, &mailbox);
    let mut ids = Vec::new();
    for envelope in &received {
        match &envelope.message {
            Notification::SubscriptionRefresh { subscriptions } => {
                ids.extend(subscriptions.iter().map(|info| info.subscription_id));
            }
            Notification::AddSubscription { subscription } => {
                ids.push(subscription.subscription_id);
            }
            other => panic!("Unexpected notification {:?}", other),
        }
    }
    ids.sort();
    let expected: Vec<_> = (1..=100).map(CorrelationId::from_u128).collect();
    assert_eq!(ids, expected);
}
