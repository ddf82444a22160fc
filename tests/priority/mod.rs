//! Tests for the download scheduler

use std::time::Duration;

use sm_http2::{NextStream, Priority, PriorityError, PriorityList, SharedPriorityList};
use tokio::time::timeout;

#[test]
fn test_page_download_order() {
    let mut list = PriorityList::new();
    let resources = ["/logo.png", "/index.html", "/app.js", "/data.json", "/hero.jpg"];
    for path in resources {
        list.add(Priority::for_resource(path), path).unwrap();
    }
    let order: Vec<&str> = list.records().map(|r| r.original_name.as_str()).collect();
    assert_eq!(
        order,
        vec!["/app.js", "/index.html", "/data.json", "/hero.jpg", "/logo.png"]
    );

    for (id, path) in (1..).step_by(2).zip(resources) {
        list.start_stream(path, id).unwrap();
    }
    assert_eq!(list.open_count(), 5);

    // One full round, highest priority first
    let round: Vec<NextStream> = (0..5).map(|_| list.next_open_stream()).collect();
    assert_eq!(
        round,
        [5, 3, 7, 9, 1].map(NextStream::Stream).to_vec()
    );
}

#[test]
fn test_completion_accounting() {
    let mut list = PriorityList::new();
    list.add(Priority::High, "a.html").unwrap();
    list.add(Priority::Low, "b.png").unwrap();
    list.add(Priority::Low, "c.png").unwrap();

    assert_eq!(list.next_open_stream(), NextStream::WaitForMoreStreams);

    list.start_stream("b.png", 1).unwrap();
    list.start_stream("c.png", 3).unwrap();
    assert_eq!(list.next_open_stream(), NextStream::Stream(1));
    list.close_stream("b.png").unwrap();
    assert_eq!(list.next_open_stream(), NextStream::Stream(3));
    list.close_stream("c.png").unwrap();

    assert_eq!(list.completed_count(), 2);
    assert_eq!(list.open_count(), 0);
    assert_eq!(list.next_open_stream(), NextStream::WaitForMoreStreams);

    list.start_stream("a.html", 5).unwrap();
    assert_eq!(list.next_open_stream(), NextStream::Stream(5));
    list.close_stream("a.html").unwrap();
    assert_eq!(list.next_open_stream(), NextStream::NoMoreStreams);
}

#[test]
fn test_closed_record_keeps_its_stream_id() {
    let mut list = PriorityList::new();
    list.add(Priority::Medium, "x").unwrap();
    list.start_stream("x", 11).unwrap();
    list.close_stream("x").unwrap();

    let record = list.get("x").unwrap();
    assert_eq!(record.stream_id, 11);
    assert!(!record.stream_opened);
    assert!(record.stream_completed);
    assert_eq!(
        list.close_stream("x").unwrap_err(),
        PriorityError::NotOpened("x".into())
    );
}

#[tokio::test]
async fn test_shared_scheduler_waits_for_producer() {
    let list = SharedPriorityList::new();
    list.add(Priority::High, "index.html").unwrap();
    list.add(Priority::Low, "logo.png").unwrap();

    let consumer = {
        let list = list.clone();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(id) = list.next_stream().await {
                list.set_current_stream_active(true);
                seen.push(id);
                let name = if id == 1 { "index.html" } else { "logo.png" };
                list.close_stream(name).unwrap();
            }
            seen
        })
    };

    tokio::task::yield_now().await;
    list.start_stream("index.html", 1).unwrap();
    tokio::task::yield_now().await;
    list.start_stream("logo.png", 3).unwrap();

    let seen = timeout(Duration::from_secs(5), consumer)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen, vec![1, 3]);
    assert_eq!(list.next_open_stream(), NextStream::NoMoreStreams);
}

#[tokio::test]
async fn test_shared_scheduler_ends_when_nothing_left() {
    let list = SharedPriorityList::new();
    assert_eq!(list.next_stream().await, None);

    list.with(|l| l.add(Priority::Medium, "only")).unwrap();
    list.start_stream("only", 1).unwrap();
    assert_eq!(list.next_stream().await, Some(1));
    list.close_stream("only").unwrap();
    assert_eq!(list.next_stream().await, None);
}
