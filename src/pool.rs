//! Transcript-level worker pool. Workers pull identifiers off a shared
//! mutex-guarded queue, own their private per-worker context (file handles),
//! and push results over a bounded channel to the collector running on the
//! calling thread. A transcript is processed to completion by the worker
//! that dequeued it.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::bail;
use crossbeam_channel::bounded;

pub fn process_transcripts<C, S, W, R, K>(
    ids: Vec<String>,
    processors: usize,
    setup: S,
    work: W,
    mut collect: K,
) -> anyhow::Result<()>
where
    S: Fn() -> anyhow::Result<C> + Sync,
    W: Fn(&mut C, &str) -> R + Sync,
    R: Send,
    K: FnMut(R),
{
    let processors = std::cmp::max(processors, 1);
    let queue: Mutex<VecDeque<String>> = Mutex::new(ids.into());
    let (snd, rcv) = bounded::<R>(processors * 4);

    std::thread::scope(|scope| -> anyhow::Result<()> {
        let queue = &queue;
        let setup = &setup;
        let work = &work;
        let mut workers = Vec::with_capacity(processors);
        for _ in 0..processors {
            let snd = snd.clone();
            workers.push(scope.spawn(move || -> anyhow::Result<()> {
                let mut ctx = setup()?;
                loop {
                    let next = queue
                        .lock()
                        .expect("work queue lock poisoned")
                        .pop_front();
                    match next {
                        Some(id) => {
                            let result = work(&mut ctx, &id);
                            if snd.send(result).is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Ok(())
            }));
        }
        // the collector loop ends when every worker has dropped its sender
        drop(snd);
        for result in rcv {
            collect(result);
        }
        for worker in workers {
            match worker.join() {
                Ok(outcome) => outcome?,
                Err(_) => bail!("worker thread panicked"),
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod pool_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_every_id_processed_once() {
        let ids = (0..250).map(|i| format!("tx{i}")).collect::<Vec<String>>();
        let processed = AtomicUsize::new(0);
        let mut collected = Vec::new();
        process_transcripts(
            ids.clone(),
            4,
            || Ok(()),
            |_, id| {
                processed.fetch_add(1, Ordering::Relaxed);
                id.to_owned()
            },
            |id| collected.push(id),
        )
        .unwrap();

        assert_eq!(processed.load(Ordering::Relaxed), 250);
        collected.sort();
        let mut expected = ids;
        expected.sort();
        assert_eq!(collected, expected);
    }

    #[test]
    fn test_single_worker_preserves_queue_order() {
        let ids =
            (0..20).map(|i| format!("tx{i:02}")).collect::<Vec<String>>();
        let mut collected = Vec::new();
        process_transcripts(
            ids.clone(),
            1,
            || Ok(()),
            |_, id| id.to_owned(),
            |id| collected.push(id),
        )
        .unwrap();
        assert_eq!(collected, ids);
    }

    #[test]
    fn test_setup_failure_propagates() {
        let outcome = process_transcripts(
            vec!["tx1".to_owned()],
            2,
            || bail!("no such store"),
            |_: &mut (), _| (),
            |_| {},
        );
        assert!(outcome.is_err());
    }
}
