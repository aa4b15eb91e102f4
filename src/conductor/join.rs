//! Join barriers
//!
//! Arrivals at a join task are grouped first-come: an arrival joins the
//! oldest barrier of that task which has not yet seen its source task, so a
//! join inside a cycle collects one arrival per source per iteration.

use crate::flow::SplitMarker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JoinOutcome {
    /// Still waiting for more arrivals
    Waiting { arrived: usize, required: usize },
    /// This arrival completed the barrier; the join may run
    Satisfied(Vec<SplitMarker>),
    /// The barrier was already satisfied (a `join: n` smaller than the inbound count)
    Absorbed,
}

#[derive(Debug, Clone)]
struct JoinBarrier {
    task_id: String,
    required: usize,
    /// Distinct tasks that can arrive; once all have, the barrier is spent
    sources: usize,
    arrivals: Vec<SplitMarker>,
    satisfied: bool,
}

impl JoinBarrier {
    fn is_spent(&self) -> bool {
        self.satisfied && self.arrivals.len() >= self.sources
    }
}

/// A barrier still waiting when nothing is left to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StrandedJoin {
    pub task_id: String,
    pub arrived: Vec<String>,
    pub required: usize,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct JoinBarriers {
    barriers: Vec<JoinBarrier>,
}

impl JoinBarriers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `marker.task_id` (running on `marker.route`) transitioned into `task_id`.
    ///
    /// `sources` is the number of distinct tasks transitioning into `task_id`;
    /// a satisfied barrier is dropped once every one of them has arrived.
    pub fn arrive(&mut self, task_id: &str, marker: SplitMarker, required: usize, sources: usize) -> JoinOutcome {
        let position = self.barriers.iter().position(|barrier| {
            barrier.task_id == task_id
                && !barrier.arrivals.iter().any(|a| a.task_id == marker.task_id)
        });

        let index = match position {
            Some(index) => index,
            None => {
                self.barriers.push(JoinBarrier {
                    task_id: task_id.to_string(),
                    required,
                    sources,
                    arrivals: Vec::new(),
                    satisfied: false,
                });
                self.barriers.len() - 1
            }
        };

        let barrier = &mut self.barriers[index];
        barrier.arrivals.push(marker);

        let outcome = if barrier.satisfied {
            JoinOutcome::Absorbed
        } else if barrier.arrivals.len() >= barrier.required {
            barrier.satisfied = true;
            JoinOutcome::Satisfied(barrier.arrivals.clone())
        } else {
            JoinOutcome::Waiting {
                arrived: barrier.arrivals.len(),
                required: barrier.required,
            }
        };

        if barrier.is_spent() {
            self.barriers.remove(index);
        }

        outcome
    }

    /// Barriers of `task_id` still waiting for arrivals
    pub fn pending(&self, task_id: &str) -> usize {
        self.barriers
            .iter()
            .filter(|b| b.task_id == task_id && !b.satisfied)
            .count()
    }

    /// Barriers kept for absorbing late arrivals or still waiting
    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    /// Every barrier still waiting, oldest first
    pub fn stranded(&self) -> Vec<StrandedJoin> {
        self.barriers
            .iter()
            .filter(|b| !b.satisfied)
            .map(|b| StrandedJoin {
                task_id: b.task_id.clone(),
                arrived: b.arrivals.iter().map(|a| a.task_id.clone()).collect(),
                required: b.required,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_all_waits_for_every_source() {
        let mut joins = JoinBarriers::new();

        assert_eq!(
            joins.arrive("t4", SplitMarker::new("t2", 1), 2, 2),
            JoinOutcome::Waiting { arrived: 1, required: 2 }
        );
        assert_eq!(joins.pending("t4"), 1);

        assert_eq!(
            joins.arrive("t4", SplitMarker::new("t3", 2), 2, 2),
            JoinOutcome::Satisfied(vec![SplitMarker::new("t2", 1), SplitMarker::new("t3", 2)])
        );
        assert_eq!(joins.pending("t4"), 0);
        assert_eq!(joins.len(), 0);
    }

    #[test]
    fn test_partial_join_absorbs_late_arrivals() {
        let mut joins = JoinBarriers::new();

        assert!(matches!(
            joins.arrive("t5", SplitMarker::new("t2", 0), 1, 3),
            JoinOutcome::Satisfied(_)
        ));
        assert_eq!(joins.arrive("t5", SplitMarker::new("t3", 0), 1, 3), JoinOutcome::Absorbed);
        assert_eq!(joins.len(), 1);

        // The last source spends the barrier
        assert_eq!(joins.arrive("t5", SplitMarker::new("t4", 0), 1, 3), JoinOutcome::Absorbed);
        assert_eq!(joins.len(), 0);
    }

    #[test]
    fn test_repeat_source_opens_new_barrier() {
        let mut joins = JoinBarriers::new();

        joins.arrive("t4", SplitMarker::new("t2", 0), 2, 2);
        assert_eq!(
            joins.arrive("t4", SplitMarker::new("t2", 0), 2, 2),
            JoinOutcome::Waiting { arrived: 1, required: 2 }
        );
        assert_eq!(joins.pending("t4"), 2);

        assert!(matches!(
            joins.arrive("t4", SplitMarker::new("t3", 0), 2, 2),
            JoinOutcome::Satisfied(arrivals) if arrivals[0] == SplitMarker::new("t2", 0)
        ));
        assert_eq!(joins.pending("t4"), 1);
        assert_eq!(joins.pending("t9"), 0);
    }

    #[test]
    fn test_join_in_a_cycle_does_not_accumulate_barriers() {
        let mut joins = JoinBarriers::new();

        for _ in 0..5 {
            joins.arrive("j", SplitMarker::new("a", 0), 2, 2);
            assert!(matches!(
                joins.arrive("j", SplitMarker::new("b", 0), 2, 2),
                JoinOutcome::Satisfied(_)
            ));
        }
        assert_eq!(joins.len(), 0);
    }

    #[test]
    fn test_stranded_lists_waiting_barriers() {
        let mut joins = JoinBarriers::new();

        joins.arrive("j", SplitMarker::new("a", 0), 3, 3);
        joins.arrive("k", SplitMarker::new("a", 0), 1, 2);

        assert_eq!(
            joins.stranded(),
            vec![StrandedJoin {
                task_id: "j".to_string(),
                arrived: vec!["a".to_string()],
                required: 3,
            }]
        );
    }
}
