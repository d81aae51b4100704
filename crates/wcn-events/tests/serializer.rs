use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use wcn_events::{EventWorker, Mailbox, PostError, PostMode};

#[derive(Debug)]
enum TestEvent {
    Record(u32),
    Fail,
    Stall(Duration),
}

#[test]
fn concurrent_posters_are_drained_in_fifo_order() {
    let mailbox: Mailbox<TestEvent, Result<(), &'static str>> = Mailbox::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let worker_log = Arc::clone(&log);
    let worker = EventWorker::spawn(mailbox.clone(), move |event| {
        if let TestEvent::Record(n) = event {
            worker_log.lock().unwrap().push(n);
        }
        Ok(())
    });

    // Each producer posts an ascending run tagged with its id; FIFO draining
    // must preserve every producer's internal order.
    let mut handles = Vec::new();
    for producer in 0..4u32 {
        let mailbox = mailbox.clone();
        handles.push(thread::spawn(move || {
            for seq in 0..50u32 {
                mailbox
                    .post(TestEvent::Record(producer * 1000 + seq), PostMode::Async)
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    mailbox.close();
    worker.join();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 200);
    for producer in 0..4u32 {
        let seqs: Vec<u32> = log
            .iter()
            .filter(|n| *n / 1000 == producer)
            .map(|n| n % 1000)
            .collect();
        assert_eq!(seqs, (0..50).collect::<Vec<_>>());
    }
}

#[test]
fn handler_error_reaches_sync_poster_and_worker_keeps_draining() {
    let mailbox: Mailbox<TestEvent, Result<(), &'static str>> = Mailbox::new();
    let processed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&processed);
    let worker = EventWorker::spawn(mailbox.clone(), move |event| {
        counter.fetch_add(1, Ordering::SeqCst);
        match event {
            TestEvent::Fail => Err("handler failed"),
            _ => Ok(()),
        }
    });

    let result = mailbox.post(TestEvent::Fail, PostMode::SyncBlocking).unwrap();
    assert_eq!(result, Some(Err("handler failed")));

    // The failed entry must not stall the queue.
    let result = mailbox
        .post(TestEvent::Record(7), PostMode::SyncBlocking)
        .unwrap();
    assert_eq!(result, Some(Ok(())));
    assert_eq!(processed.load(Ordering::SeqCst), 2);

    mailbox.close();
    worker.join();
}

#[test]
fn expired_sync_wait_abandons_entry_but_handler_still_runs() {
    let mailbox: Mailbox<TestEvent, Result<(), &'static str>> = Mailbox::new();
    let processed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&processed);
    let worker = EventWorker::spawn(mailbox.clone(), move |event| {
        if let TestEvent::Stall(how_long) = event {
            thread::sleep(how_long);
        }
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let err = mailbox
        .post(
            TestEvent::Stall(Duration::from_millis(200)),
            PostMode::Sync {
                deadline: Duration::from_millis(10),
            },
        )
        .unwrap_err();
    assert_eq!(err, PostError::Abandoned);

    mailbox.close();
    worker.join();
    // The abandoned entry ran to completion anyway.
    assert_eq!(processed.load(Ordering::SeqCst), 1);
}

#[test]
fn posting_to_a_closed_mailbox_fails() {
    let mailbox: Mailbox<TestEvent, ()> = Mailbox::new();
    mailbox.close();
    assert_eq!(
        mailbox.post(TestEvent::Record(0), PostMode::Async).unwrap_err(),
        PostError::Closed
    );
}
