//! Background content comparison.
//!
//! A single worker thread compares one pair at a time. The scheduler never
//! hands the worker a reference into the list: each job is a snapshot of
//! absolute paths, commands and the entry revision, and the outcome is matched
//! back to the list by path pair when it arrives. Outcomes for entries that
//! changed or disappeared in the meantime are dropped.

use crate::comparison::ContentComparator;
use crate::list::{ComparisonEntry, ComparisonList};
use crossbeam::channel::{self, Receiver, Sender};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};
use treecmp_common::{CompareStatus, MatchCommands, RelPath, TreeCmpError};

/// Decides which queued entries are compared first
pub type VisibilityFilter = Box<dyn Fn(&ComparisonEntry) -> bool + Send>;

/// A comparison result that was stored in the list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedComparison {
    pub left: RelPath,
    pub right: RelPath,
    pub status: CompareStatus,
}

struct Job {
    left: RelPath,
    right: RelPath,
    left_path: PathBuf,
    right_path: PathBuf,
    commands: MatchCommands,
    revision: u64,
}

struct Outcome {
    left: RelPath,
    right: RelPath,
    revision: u64,
    status: CompareStatus,
}

pub struct ComparisonScheduler {
    left_root: PathBuf,
    right_root: PathBuf,
    comparator: Arc<ContentComparator>,
    queue: VecDeque<(RelPath, RelPath)>,
    in_flight: bool,
    stopped: bool,
    visibility: Option<VisibilityFilter>,

    /// Closing this channel is what ends the worker loop.
    job_sender: Option<Sender<Job>>,
    outcome_receiver: Receiver<Outcome>,
    worker: Option<JoinHandle<()>>,
}

impl ComparisonScheduler {
    /// Spawn the worker thread. Relative paths handed to the scheduler are
    /// resolved against the two roots.
    pub fn new(
        left_root: &Path,
        right_root: &Path,
        comparator: ContentComparator,
    ) -> Result<Self, TreeCmpError> {
        let comparator = Arc::new(comparator);
        let (job_sender, job_receiver) = channel::unbounded::<Job>();
        let (outcome_sender, outcome_receiver) = channel::unbounded::<Outcome>();

        let worker_comparator = Arc::clone(&comparator);
        let worker = thread::Builder::new()
            .name("treecmp-compare".to_string())
            .spawn(move || {
                trace!("Comparison worker started");
                for job in job_receiver {
                    let status =
                        worker_comparator.compare(&job.left_path, &job.right_path, &job.commands);
                    let outcome = Outcome {
                        left: job.left,
                        right: job.right,
                        revision: job.revision,
                        status,
                    };
                    if outcome_sender.send(outcome).is_err() {
                        break;
                    }
                }
                trace!("Comparison worker stopped");
            })?;

        Ok(Self {
            left_root: left_root.to_path_buf(),
            right_root: right_root.to_path_buf(),
            comparator,
            queue: VecDeque::new(),
            in_flight: false,
            stopped: false,
            visibility: None,
            job_sender: Some(job_sender),
            outcome_receiver,
            worker: Some(worker),
        })
    }

    pub fn comparator(&self) -> &ContentComparator {
        &self.comparator
    }

    /// No comparison is running
    pub fn is_idle(&self) -> bool {
        !self.in_flight
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Pairs waiting to be compared
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn set_visibility_filter(&mut self, filter: Option<VisibilityFilter>) {
        self.visibility = filter;
    }

    /// Queue every pending pair in `list` and start comparing
    pub fn restart(&mut self, list: &ComparisonList) {
        self.queue = list
            .pending()
            .into_iter()
            .map(|pending| (pending.left, pending.right))
            .collect();
        self.stopped = false;
        debug!("Scheduler restarted with {} queued pairs", self.queue.len());
        self.start(list);
    }

    /// Hand the next pair to the worker if it is free
    pub fn start(&mut self, list: &ComparisonList) {
        if self.in_flight || self.stopped {
            return;
        }
        let Some(job) = self.next_job(list) else {
            return;
        };
        let Some(sender) = self.job_sender.as_ref() else {
            return;
        };

        debug!("Comparing {} with {}", job.left, job.right);
        if sender.send(job).is_err() {
            warn!("Comparison worker is gone, dropping queued work");
            self.queue.clear();
            return;
        }
        self.in_flight = true;
    }

    /// Drop queued work. A comparison already running still completes.
    pub fn stop(&mut self) {
        debug!("Scheduler stopped with {} pairs left", self.queue.len());
        self.queue.clear();
        self.stopped = true;
    }

    /// Apply finished comparisons without blocking and keep the worker busy
    pub fn poll(&mut self, list: &mut ComparisonList) -> Vec<CompletedComparison> {
        let mut completed = Vec::new();
        while let Ok(outcome) = self.outcome_receiver.try_recv() {
            self.in_flight = false;
            completed.extend(self.apply(list, outcome));
            self.start(list);
        }
        self.start(list);
        completed
    }

    /// Compare everything queued, blocking until the worker is idle
    pub fn run_until_idle(&mut self, list: &mut ComparisonList) -> Vec<CompletedComparison> {
        let mut completed = Vec::new();
        self.run_until_idle_with(list, |done| completed.push(done.clone()));
        completed
    }

    /// Like `run_until_idle`, calling `on_complete` as each result lands
    pub fn run_until_idle_with(
        &mut self,
        list: &mut ComparisonList,
        mut on_complete: impl FnMut(&CompletedComparison),
    ) {
        loop {
            self.start(list);
            if !self.in_flight {
                return;
            }
            let Ok(outcome) = self.outcome_receiver.recv() else {
                warn!("Comparison worker exited unexpectedly");
                self.in_flight = false;
                self.queue.clear();
                return;
            };
            self.in_flight = false;
            if let Some(done) = self.apply(list, outcome) {
                on_complete(&done);
            }
        }
    }

    fn apply(&self, list: &mut ComparisonList, outcome: Outcome) -> Option<CompletedComparison> {
        if !list.apply_result(&outcome.left, &outcome.right, outcome.revision, outcome.status) {
            debug!(
                "Discarding stale result for {} and {}",
                outcome.left, outcome.right
            );
            return None;
        }
        Some(CompletedComparison {
            left: outcome.left,
            right: outcome.right,
            status: outcome.status,
        })
    }

    /// Take the next queued pair that is still pending, preferring a visible
    /// one. Commands and revision are read from the list as it is now.
    fn next_job(&mut self, list: &ComparisonList) -> Option<Job> {
        if let Some(visible) = self.visibility.as_ref() {
            let position = self.queue.iter().position(|(left, right)| {
                pending_entry(list, left, right).is_some_and(|entry| visible(entry))
            });
            if let Some(position) = position {
                let (left, right) = self.queue.remove(position)?;
                return self.job_for(list, left, right);
            }
        }

        while let Some((left, right)) = self.queue.pop_front() {
            if let Some(job) = self.job_for(list, left, right) {
                return Some(job);
            }
        }
        None
    }

    fn job_for(&self, list: &ComparisonList, left: RelPath, right: RelPath) -> Option<Job> {
        let entry = pending_entry(list, &left, &right)?;
        Some(Job {
            left_path: left.under(&self.left_root),
            right_path: right.under(&self.right_root),
            commands: entry.commands().clone(),
            revision: entry.revision(),
            left,
            right,
        })
    }
}

fn pending_entry<'a>(
    list: &'a ComparisonList,
    left: &RelPath,
    right: &RelPath,
) -> Option<&'a ComparisonEntry> {
    list.find(Some(left), Some(right))
        .map(|index| &list[index])
        .filter(|entry| entry.is_pending())
}

impl Drop for ComparisonScheduler {
    fn drop(&mut self) {
        // The worker loop ends once its job channel closes; any comparison
        // still running finishes first.
        self.job_sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparison::ComparatorOptions;
    use crate::matcher::NameMatcher;
    use crate::scanner::TreeScanner;
    use std::fs;
    use tempfile::TempDir;
    use treecmp_common::AppConfig;

    struct Fixture {
        left: TempDir,
        right: TempDir,
    }

    impl Fixture {
        fn new(left: &[(&str, &str)], right: &[(&str, &str)]) -> Self {
            let fixture = Self {
                left: TempDir::new().unwrap(),
                right: TempDir::new().unwrap(),
            };
            for (name, contents) in left {
                fs::write(fixture.left.path().join(name), contents).unwrap();
            }
            for (name, contents) in right {
                fs::write(fixture.right.path().join(name), contents).unwrap();
            }
            fixture
        }

        fn list(&self) -> ComparisonList {
            let scanner = TreeScanner::new(&AppConfig::default());
            let left = scanner.scan(self.left.path(), 8).unwrap();
            let right = scanner.scan(self.right.path(), 8).unwrap();
            ComparisonList::build(&left, &right, &NameMatcher::Exact)
        }

        fn scheduler(&self) -> ComparisonScheduler {
            ComparisonScheduler::new(
                self.left.path(),
                self.right.path(),
                ContentComparator::new(ComparatorOptions::default()),
            )
            .unwrap()
        }
    }

    fn status_of(list: &ComparisonList, name: &str) -> CompareStatus {
        let path = RelPath::parse(name);
        let index = list.find(Some(&path), Some(&path)).unwrap();
        list[index].status()
    }

    #[test]
    fn test_run_until_idle_compares_every_pair() {
        let fixture = Fixture::new(
            &[("a.txt", "abc"), ("b.txt", "abc"), ("c.txt", "left only")],
            &[("a.txt", "abc"), ("b.txt", "abd")],
        );
        let mut list = fixture.list();
        let mut scheduler = fixture.scheduler();

        scheduler.restart(&list);
        assert!(!scheduler.is_idle());
        let completed = scheduler.run_until_idle(&mut list);

        assert_eq!(completed.len(), 2);
        assert!(scheduler.is_idle());
        assert_eq!(status_of(&list, "a.txt"), CompareStatus::Same);
        assert_eq!(status_of(&list, "b.txt"), CompareStatus::Different);
        assert!(list.pending().is_empty());
    }

    #[test]
    fn test_poll_eventually_drains() {
        let fixture = Fixture::new(
            &[("a", "1"), ("b", "2"), ("c", "3")],
            &[("a", "1"), ("b", "2"), ("c", "4")],
        );
        let mut list = fixture.list();
        let mut scheduler = fixture.scheduler();
        scheduler.restart(&list);

        let mut completed = Vec::new();
        while !scheduler.is_idle() {
            completed.extend(scheduler.poll(&mut list));
            thread::yield_now();
        }

        assert_eq!(completed.len(), 3);
        assert_eq!(status_of(&list, "c"), CompareStatus::Different);
    }

    #[test]
    fn test_stale_result_is_discarded() {
        let fixture = Fixture::new(&[("a.txt", "abc")], &[("a.txt", "abc")]);
        let mut list = fixture.list();
        let mut scheduler = fixture.scheduler();

        scheduler.restart(&list);
        // the entry is reset while its comparison is in flight
        list.forget();
        scheduler.stop();
        let completed = scheduler.run_until_idle(&mut list);

        assert!(completed.is_empty());
        assert_eq!(status_of(&list, "a.txt"), CompareStatus::NotCompared);
    }

    #[test]
    fn test_result_for_erased_entry_is_discarded() {
        let fixture = Fixture::new(&[("a.txt", "abc")], &[("a.txt", "abc")]);
        let mut list = fixture.list();
        let mut scheduler = fixture.scheduler();

        scheduler.restart(&list);
        list.erase(0);
        assert!(scheduler.run_until_idle(&mut list).is_empty());
        assert!(list.is_empty());
    }

    #[test]
    fn test_stop_keeps_in_flight_result() {
        let fixture = Fixture::new(
            &[("a", "1"), ("b", "2"), ("c", "3")],
            &[("a", "1"), ("b", "2"), ("c", "3")],
        );
        let mut list = fixture.list();
        let mut scheduler = fixture.scheduler();

        scheduler.restart(&list);
        scheduler.stop();
        assert_eq!(scheduler.queued(), 0);
        let completed = scheduler.run_until_idle(&mut list);

        assert_eq!(completed.len(), 1);
        assert_eq!(list.pending().len(), 2);

        // stopped schedulers do not pick up new work until restarted
        scheduler.start(&list);
        assert!(scheduler.is_idle());
        scheduler.restart(&list);
        assert_eq!(scheduler.run_until_idle(&mut list).len(), 2);
    }

    #[test]
    fn test_ignored_entries_are_skipped() {
        let fixture = Fixture::new(&[("a", "1"), ("b", "2")], &[("a", "1"), ("b", "2")]);
        let mut list = fixture.list();
        let mut scheduler = fixture.scheduler();

        scheduler.restart(&list);
        // "b" becomes ignored while still queued
        list.set_ignore(1, true);
        let completed = scheduler.run_until_idle(&mut list);

        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].left, RelPath::parse("a"));
        assert_eq!(list[1].status(), CompareStatus::NotCompared);
    }

    #[test]
    fn test_visible_entries_first() {
        let fixture = Fixture::new(
            &[("a", "1"), ("b", "2"), ("c", "3")],
            &[("a", "1"), ("b", "2"), ("c", "3")],
        );
        let mut list = fixture.list();
        let mut scheduler = fixture.scheduler();
        scheduler.set_visibility_filter(Some(Box::new(|entry: &ComparisonEntry| {
            entry.left().is_some_and(|p| p.file_name() == Some("c"))
        })));

        let mut order = Vec::new();
        scheduler.restart(&list);
        scheduler.run_until_idle_with(&mut list, |done| order.push(done.left.to_string()));

        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_worker_counts_bytes() {
        let fixture = Fixture::new(&[("a", "12345")], &[("a", "12345")]);
        let mut list = fixture.list();
        let mut scheduler = fixture.scheduler();

        scheduler.restart(&list);
        let mut calls = 0;
        scheduler.run_until_idle_with(&mut list, |_| calls += 1);

        assert_eq!(calls, 1);
        assert_eq!(scheduler.comparator().bytes_read(), 10);
    }
}
