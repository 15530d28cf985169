use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use strata_scheduler::{ProcessorQueues, ProgressEvent, TaskCategory, TaskError};

#[test]
fn tasks_of_one_category_run_in_fifo_order() {
    let queues = ProcessorQueues::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..20 {
        let order = Arc::clone(&order);
        queues.schedule(TaskCategory::Reading, format!("task {i}"), move |_| {
            order.lock().push(i);
            Ok(())
        });
    }
    queues.queue(TaskCategory::Reading).wait_for_completion();

    assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    assert_eq!(queues.queue(TaskCategory::Reading).stats().completed, 20);
}

#[test]
fn different_categories_run_concurrently() {
    let queues = ProcessorQueues::new();
    let (tx, rx) = crossbeam_channel::bounded::<()>(1);
    let observed = Arc::new(Mutex::new(None));

    let observed_in_task = Arc::clone(&observed);
    queues.schedule(TaskCategory::Reading, "blocked reader", move |_| {
        // Only completes if the resolving queue runs while this task is active.
        *observed_in_task.lock() = Some(rx.recv_timeout(Duration::from_secs(10)).is_ok());
        Ok(())
    });
    queues.schedule(TaskCategory::Resolving, "unblocker", move |_| {
        tx.send(()).map_err(TaskError::failed)
    });

    queues.wait_for_all();
    assert_eq!(*observed.lock(), Some(true));
}

#[test]
fn failures_and_panics_do_not_stop_the_queue() {
    let queues = ProcessorQueues::new();
    let ran = Arc::new(Mutex::new(false));

    queues.schedule(TaskCategory::PostProcessing, "fails", |_| {
        Err(TaskError::Failed("disk full".into()))
    });
    queues.schedule(TaskCategory::PostProcessing, "panics", |_| panic!("boom"));
    let ran_in_task = Arc::clone(&ran);
    queues.schedule(TaskCategory::PostProcessing, "runs", move |_| {
        *ran_in_task.lock() = true;
        Ok(())
    });
    queues.wait_for_all();

    let stats = queues.queue(TaskCategory::PostProcessing).stats();
    assert!(*ran.lock());
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.panicked, 1);
    assert_eq!(stats.completed, 1);
}

#[test]
fn cancelling_pending_tasks_leaves_later_tasks_runnable() {
    let queues = ProcessorQueues::new();
    let queue = queues.queue(TaskCategory::Resolving);
    let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
    let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
    let results = Arc::new(Mutex::new(Vec::new()));

    // Hold the worker so the next task is still queued when we cancel.
    let results_first = Arc::clone(&results);
    queue.schedule("gate", move |progress| {
        let _ = started_tx.send(());
        let _ = gate_rx.recv_timeout(Duration::from_secs(10));
        results_first
            .lock()
            .push(("gate", progress.check_canceled().is_err()));
        Ok(())
    });
    let results_second = Arc::clone(&results);
    queue.schedule("queued", move |_| {
        results_second.lock().push(("queued", false));
        Ok(())
    });

    started_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("gate task started");
    queue.cancel_pending();
    let results_third = Arc::clone(&results);
    queue.schedule("after", move |progress| {
        progress.check_canceled()?;
        results_third.lock().push(("after", false));
        Ok(())
    });
    let _ = gate_tx.send(());
    queue.wait_for_completion();

    assert_eq!(*results.lock(), vec![("gate", true), ("after", false)]);
    let stats = queue.stats();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.completed, 2);
}

#[test]
fn progress_events_are_published_per_task() {
    let queues = ProcessorQueues::new();
    let rx = queues.progress().subscribe();
    queues.schedule(TaskCategory::ArtifactsDownloading, "download", |progress| {
        progress.set_text("g:a:1");
        Ok(())
    });
    queues.wait_for_all();

    let events: Vec<_> = rx.try_iter().collect();
    assert!(matches!(&events[0], ProgressEvent::Begin { title, .. } if title == "download"));
    assert!(matches!(events.last(), Some(ProgressEvent::End { .. })));
}
