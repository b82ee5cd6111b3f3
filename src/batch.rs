//! Bounded-size batch launching over large work lists
//!
//! Launching thousands of futures at once behind a small [`AdmissionGate`](crate::gate::AdmissionGate)
//! leaves most of them queued, and cancelling them all at once is expensive. The
//! batch processor launches a fixed-size group, waits for the whole group, checks
//! the cancellation signal and only then moves on.

use std::future::Future;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Map every item through `action`, `chunk_size` items at a time
///
/// Results keep the order of `items`. After each group has fully completed:
/// - if `cancel` has fired, [`Error::Cancelled`] is returned and no further group is launched
/// - otherwise the first error of the group, in item order, is returned
///
/// Items whose failure should not stop the batch must map it to an `Ok` sentinel
/// (usually `None`) themselves.
pub async fn process_in_chunks<I, O, F, Fut>(
    items: Vec<I>,
    chunk_size: usize,
    cancel: &CancellationToken,
    mut action: F,
) -> Result<Vec<O>>
where
    F: FnMut(I) -> Fut,
    Fut: Future<Output = Result<O>>,
{
    if chunk_size == 0 {
        return Err(Error::invalid_argument("chunk_size", "must be at least 1"));
    }

    let mut results = Vec::with_capacity(items.len());
    let mut remaining = items.into_iter().peekable();
    let mut group = 0usize;

    while remaining.peek().is_some() {
        let launched: Vec<Fut> = remaining.by_ref().take(chunk_size).map(&mut action).collect();
        tracing::trace!(group, size = launched.len(), "launching batch group");

        let outcomes = join_all(launched).await;

        if cancel.is_cancelled() {
            tracing::debug!(group, "batch cancelled after group drained");
            return Err(Error::Cancelled);
        }
        for outcome in outcomes {
            results.push(outcome?);
        }
        group += 1;
    }

    Ok(results)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Trace = Arc<Mutex<Vec<String>>>;

    fn traced(trace: &Trace, i: usize) -> impl Future<Output = Result<usize>> + use<> {
        trace.lock().unwrap().push(format!("start {i}"));
        let trace = Arc::clone(trace);
        async move {
            tokio::task::yield_now().await;
            trace.lock().unwrap().push(format!("end {i}"));
            Ok(i * 10)
        }
    }

    #[tokio::test]
    async fn groups_of_two_over_five_items() {
        let trace: Trace = Arc::default();
        let cancel = CancellationToken::new();

        let results = process_in_chunks((0..5).collect(), 2, &cancel, |i| traced(&trace, i))
            .await
            .unwrap();

        assert_eq!(results, vec![0, 10, 20, 30, 40]);
        assert_eq!(
            *trace.lock().unwrap(),
            vec![
                "start 0", "start 1", "end 0", "end 1", "start 2", "start 3", "end 2", "end 3",
                "start 4", "end 4",
            ]
        );
    }

    #[tokio::test]
    async fn cancelling_in_the_second_group_stops_the_third() {
        let trace: Trace = Arc::default();
        let cancel = CancellationToken::new();

        let result = process_in_chunks((0..5).collect(), 2, &cancel, |i| {
            if i == 3 {
                cancel.cancel();
            }
            traced(&trace, i)
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        let trace = trace.lock().unwrap();
        assert!(trace.contains(&"end 3".to_string()), "second group drains");
        assert!(!trace.contains(&"start 4".to_string()), "third group never launches");
    }

    #[tokio::test]
    async fn first_error_propagates_after_the_group() {
        let trace: Trace = Arc::default();
        let cancel = CancellationToken::new();

        let result = process_in_chunks((0..6).collect(), 3, &cancel, |i| {
            let ok = traced(&trace, i);
            async move {
                let value = ok.await.unwrap();
                if i == 1 {
                    return Err(Error::Source(SourceError::Rejected(format!("item {i}"))));
                }
                Ok(value)
            }
        })
        .await;

        match result {
            Err(Error::Source(SourceError::Rejected(msg))) => assert_eq!(msg, "item 1"),
            other => panic!("expected rejected error, got {other:?}"),
        }
        let trace = trace.lock().unwrap();
        assert!(trace.contains(&"end 2".to_string()));
        assert!(!trace.contains(&"start 3".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn results_keep_input_order() {
        let cancel = CancellationToken::new();
        let delays = vec![30u64, 10, 20, 5];
        let results = process_in_chunks(delays, 4, &cancel, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, Error>(ms)
        })
        .await
        .unwrap();
        assert_eq!(results, vec![30, 10, 20, 5]);
    }

    #[tokio::test]
    async fn empty_input_is_empty_output() {
        let cancel = CancellationToken::new();
        let results: Vec<u8> = process_in_chunks(Vec::<u8>::new(), 3, &cancel, |b| async move { Ok::<_, Error>(b) })
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn zero_chunk_size_is_rejected() {
        let cancel = CancellationToken::new();
        let result = process_in_chunks(vec![1], 0, &cancel, |b: i32| async move { Ok::<_, Error>(b) }).await;
        assert!(matches!(result, Err(Error::InvalidArgument { name: "chunk_size", .. })));
    }
}
