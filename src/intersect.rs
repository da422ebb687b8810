//! Intersection of binding peptides with domain intervals, run as a background task.
//!
//! A run selects binding rows, groups their peptide intervals by sequence and counts, for each domain hit,
//! the peptides fully contained in its interval. Sequences are processed by batches on a rayon pool,
//! progress is published in a task registry between batches and cancellation is checked there too.
//! Each run owns its accumulator, so concurrent or superseded runs never mix.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use cpu_time::ProcessTime;
use fxhash::{FxHashMap, FxHashSet};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::binding::BindingRecord;
use crate::detail::locate_peptide;
use crate::domains::{DomainHit, DomainHitStore, HitCatalog, HitSource};
use crate::errors::{MimicError, Result};
use crate::merge::MergedTable;
use crate::seqindex::SequenceArchiveIndex;
use crate::utils::IntersectionParams;

/// maximum number of sequence ids kept as samples in a domain stat
pub const MAX_SAMPLE_SEQUENCES: usize = 100;

const CANCELLED: &str = "cancelled";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    pub fn get_value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        TaskId(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pending -> Running -> Completed or Failed, no way back
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed(String),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed(_))
    }
}

/// binding statistics of one domain over a run
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BindingDomainStat {
    pub domain: String,
    /// number of contained peptides
    pub occurrences: usize,
    /// number of distinct sequences with a contained peptide
    pub sequence_count: usize,
    /// average over occurrences of the score of the containing hit
    pub avg_score: f64,
    pub avg_significance: f64,
    /// average affinity of contained peptides with an affinity
    pub avg_affinity: Option<f64>,
    /// occurrences / background instances of the domain
    pub ratio: Option<f64>,
    /// set when the domain has no background instance, ratio is then None
    pub background_missing: bool,
    /// at most MAX_SAMPLE_SEQUENCES ids, sorted
    pub sample_sequences: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IntersectionResult {
    pub source: HitSource,
    /// sequences with both peptides and hits
    pub nb_sequences: usize,
    /// peptides that could be placed on their sequence
    pub nb_peptides: usize,
    /// peptides that could not be placed
    pub nb_unplaced: usize,
    /// sorted by occurrences descending then domain
    pub stats: Vec<BindingDomainStat>,
}

/// what poll returns
#[derive(Clone, Debug, Serialize)]
pub struct TaskStatus {
    pub id: TaskId,
    pub state: TaskState,
    /// in [0, 100]
    pub progress: f64,
    #[serde(serialize_with = "serialize_shared")]
    pub result: Option<Arc<IntersectionResult>>,
    pub error: Option<String>,
}

fn serialize_shared<S: serde::Serializer>(
    result: &Option<Arc<IntersectionResult>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    result.as_deref().serialize(serializer)
}

//=========================================================================================

struct TaskEntry {
    state: TaskState,
    progress: f64,
    result: Option<Arc<IntersectionResult>>,
    finished: Option<Instant>,
}

impl TaskEntry {
    fn new() -> Self {
        TaskEntry {
            state: TaskState::Pending,
            progress: 0.,
            result: None,
            finished: None,
        }
    }

    fn status(&self, id: TaskId) -> TaskStatus {
        let error = match &self.state {
            TaskState::Failed(msg) => Some(msg.clone()),
            _ => None,
        };
        TaskStatus {
            id,
            state: self.state.clone(),
            progress: self.progress,
            result: self.result.clone(),
            error,
        }
    }

    fn finish(&mut self, state: TaskState) {
        self.state = state;
        self.finished = Some(Instant::now());
    }
} // end of impl TaskEntry

#[derive(Default)]
struct TaskRegistry {
    next_id: u64,
    tasks: FxHashMap<TaskId, TaskEntry>,
    /// last task started by a session
    sessions: HashMap<String, TaskId>,
}

impl TaskRegistry {
    fn register(&mut self) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        self.tasks.insert(id, TaskEntry::new());
        id
    }

    fn get_mut(&mut self, id: TaskId) -> Result<&mut TaskEntry> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| MimicError::not_found("task", &id.to_string()))
    }
} // end of impl TaskRegistry

//=========================================================================================

// per domain running sums of a run
#[derive(Default)]
struct DomainAccumulator {
    occurrences: usize,
    sequences: BTreeSet<String>,
    score_sum: f64,
    significance_sum: f64,
    affinity_sum: f64,
    nb_affinities: usize,
}

#[derive(Default)]
struct RunAccumulator {
    domains: FxHashMap<String, DomainAccumulator>,
    nb_peptides: usize,
    nb_unplaced: usize,
}

impl RunAccumulator {
    fn add(&mut self, hit: &DomainHit, affinity: Option<f64>) {
        let acc = self.domains.entry(hit.domain_id.clone()).or_default();
        acc.occurrences += 1;
        if !acc.sequences.contains(&hit.sequence_id) {
            acc.sequences.insert(hit.sequence_id.clone());
        }
        acc.score_sum += hit.score;
        acc.significance_sum += hit.significance;
        if let Some(affinity) = affinity {
            acc.affinity_sum += affinity;
            acc.nb_affinities += 1;
        }
    }

    fn merge(mut self, other: RunAccumulator) -> Self {
        for (domain, acc) in other.domains {
            let mine = self.domains.entry(domain).or_default();
            mine.occurrences += acc.occurrences;
            mine.sequences.extend(acc.sequences);
            mine.score_sum += acc.score_sum;
            mine.significance_sum += acc.significance_sum;
            mine.affinity_sum += acc.affinity_sum;
            mine.nb_affinities += acc.nb_affinities;
        }
        self.nb_peptides += other.nb_peptides;
        self.nb_unplaced += other.nb_unplaced;
        self
    }

    fn finalize(self, source: HitSource, nb_sequences: usize, background: &FxHashMap<String, usize>) -> IntersectionResult {
        let mut stats: Vec<BindingDomainStat> = self
            .domains
            .into_iter()
            .map(|(domain, acc)| {
                let n = acc.occurrences as f64;
                let ratio = background.get(&domain).filter(|c| **c > 0).map(|c| n / *c as f64);
                let avg_affinity = if acc.nb_affinities > 0 {
                    Some(acc.affinity_sum / acc.nb_affinities as f64)
                } else {
                    None
                };
                BindingDomainStat {
                    occurrences: acc.occurrences,
                    sequence_count: acc.sequences.len(),
                    avg_score: acc.score_sum / n,
                    avg_significance: acc.significance_sum / n,
                    avg_affinity,
                    ratio,
                    background_missing: ratio.is_none(),
                    sample_sequences: acc.sequences.into_iter().take(MAX_SAMPLE_SEQUENCES).collect(),
                    domain,
                }
            })
            .collect();
        stats.sort_by(|a, b| b.occurrences.cmp(&a.occurrences).then(a.domain.cmp(&b.domain)));
        IntersectionResult {
            source,
            nb_sequences,
            nb_peptides: self.nb_peptides,
            nb_unplaced: self.nb_unplaced,
            stats,
        }
    } // end of finalize
} // end of impl RunAccumulator

/// Counts, for each target hit of a sequence, the peptides it contains.
fn intersect_sequence(
    hits: &[&DomainHit],
    records: &[&BindingRecord],
    sequence: Option<&str>,
    acc: &mut RunAccumulator,
) {
    let mut peptides = Vec::<(usize, usize, Option<f64>)>::with_capacity(records.len());
    for r in records {
        match locate_peptide(r, sequence) {
            Some((start, end)) => peptides.push((start, end, r.affinity)),
            None => acc.nb_unplaced += 1,
        }
    }
    acc.nb_peptides += peptides.len();
    for hit in hits {
        for (start, end, affinity) in &peptides {
            if hit.contains(*start, *end) {
                acc.add(hit, *affinity);
            }
        }
    }
} // end of intersect_sequence

// binding rows kept by params, grouped by sequence id in id order
fn select_records<'a>(table: &'a MergedTable, params: &IntersectionParams) -> BTreeMap<&'a str, Vec<&'a BindingRecord>> {
    let mut by_sequence = BTreeMap::<&str, Vec<&BindingRecord>>::new();
    for row in table.get_rows() {
        if !row.is_valid_sequence() {
            continue;
        }
        let r = &row.record;
        if let Some(max) = params.max_affinity {
            match r.affinity {
                Some(a) if a <= max => (),
                _ => continue,
            }
        }
        if let Some(level) = &params.binding_level {
            if r.bind_level.as_deref() != Some(level.as_str()) {
                continue;
            }
        }
        by_sequence.entry(r.sequence_id.as_str()).or_default().push(r);
    }
    by_sequence
} // end of select_records

//=========================================================================================

// what a run reads, shared with the worker thread
#[derive(Clone)]
struct RunContext {
    table: Arc<MergedTable>,
    catalog: Arc<HitCatalog>,
    index: Arc<SequenceArchiveIndex>,
    registry: Arc<Mutex<TaskRegistry>>,
    nb_threads: usize,
}

impl RunContext {
    // Pending -> Running, false if the task was cancelled before
    fn set_running(&self, id: TaskId) -> bool {
        let mut registry = self.registry.lock();
        match registry.tasks.get_mut(&id) {
            Some(entry) if entry.state == TaskState::Pending => {
                entry.state = TaskState::Running;
                true
            }
            _ => false,
        }
    }

    fn is_running(&self, id: TaskId) -> bool {
        let registry = self.registry.lock();
        matches!(registry.tasks.get(&id), Some(entry) if entry.state == TaskState::Running)
    }

    fn set_progress(&self, id: TaskId, progress: f64) {
        let mut registry = self.registry.lock();
        if let Some(entry) = registry.tasks.get_mut(&id) {
            if entry.state == TaskState::Running {
                entry.progress = entry.progress.max(progress.clamp(0., 100.));
            }
        }
    }

    // a task cancelled meanwhile keeps its state, the result is dropped
    fn terminate(&self, id: TaskId, outcome: Result<Option<IntersectionResult>>) {
        let mut registry = self.registry.lock();
        let entry = match registry.tasks.get_mut(&id) {
            Some(entry) if entry.state == TaskState::Running => entry,
            _ => {
                log::info!("intersection task {} was cancelled", id);
                return;
            }
        };
        match outcome {
            Ok(Some(result)) => {
                entry.progress = 100.;
                entry.result = Some(Arc::new(result));
                entry.finish(TaskState::Completed);
            }
            Ok(None) => {
                log::info!("intersection task {} stopped", id);
            }
            Err(e) => {
                log::error!("intersection task {} failed : {}", id, e);
                entry.finish(TaskState::Failed(e.to_string()));
            }
        }
    } // end of terminate

    /// Runs task `id`, a task not Pending anymore is left untouched.
    fn run(&self, id: TaskId, params: &IntersectionParams) {
        if !self.set_running(id) {
            log::info!("intersection task {} not pending, not run", id);
            return;
        }
        let outcome = self.compute(id, params);
        self.terminate(id, outcome);
    }

    // Ok(None) if cancelled between two batches
    fn compute(&self, id: TaskId, params: &IntersectionParams) -> Result<Option<IntersectionResult>> {
        log::info!("intersection task {} started : {:?}", id, params);
        let start_t = SystemTime::now();
        let cpu_start = ProcessTime::now();
        let store: &DomainHitStore = self.catalog.store(params.source);
        //
        let by_sequence = select_records(&self.table, params);
        let mut work: Vec<(&str, Vec<&BindingRecord>, Vec<&DomainHit>)> = by_sequence
            .into_iter()
            .filter_map(|(seq, records)| {
                let hits: Vec<&DomainHit> = store.target_hits_for_sequence(seq).collect();
                if hits.is_empty() {
                    None
                } else {
                    Some((seq, records, hits))
                }
            })
            .collect();
        if let Some(max) = params.max_sequences {
            work.truncate(max);
        }
        let total = work.len();
        log::info!("intersection task {} : {} sequences with peptides and hits", id, total);
        //
        let pool = rayon::ThreadPoolBuilder::new().num_threads(self.nb_threads.max(1)).build()?;
        let mut accumulator = RunAccumulator::default();
        let mut processed = 0usize;
        for batch in work.chunks(params.batch_size.max(1)) {
            if !self.is_running(id) {
                return Ok(None);
            }
            // sequences are read only when some peptide has no interval
            let to_fetch: Vec<&str> = batch
                .iter()
                .filter(|(_, records, _)| records.iter().any(|r| r.peptide_interval.is_none()))
                .map(|(seq, _, _)| *seq)
                .collect();
            let sequences = if to_fetch.is_empty() {
                FxHashMap::default()
            } else {
                self.index.get_batch(&to_fetch)?
            };
            let partial = pool.install(|| {
                batch
                    .par_iter()
                    .fold(RunAccumulator::default, |mut acc, (seq, records, hits)| {
                        intersect_sequence(hits, records, sequences.get(*seq).map(|s| s.as_str()), &mut acc);
                        acc
                    })
                    .reduce(RunAccumulator::default, RunAccumulator::merge)
            });
            accumulator = accumulator.merge(partial);
            processed += batch.len();
            self.set_progress(id, processed as f64 * 100. / total as f64);
            log::debug!("intersection task {} : {} / {} sequences", id, processed, total);
        }
        //
        let result = accumulator.finalize(params.source, total, store.global_frequency_table());
        let elapsed_t = start_t.elapsed().map(|d| d.as_secs_f32()).unwrap_or(0.);
        log::info!(
            "intersection task {} done : {} domains, {} peptides placed, {} unplaced, cpu time(s) {}, elapsed time(s) {}",
            id,
            result.stats.len(),
            result.nb_peptides,
            result.nb_unplaced,
            cpu_start.elapsed().as_secs(),
            elapsed_t
        );
        if let Some(usage) = memory_stats::memory_stats() {
            log::info!(
                "intersection task {} memory : physical {} Mb, virtual {} Mb",
                id,
                usage.physical_mem >> 20,
                usage.virtual_mem >> 20
            );
        }
        Ok(Some(result))
    } // end of compute
} // end of impl RunContext

//=========================================================================================

/// Starts intersection tasks on worker threads and answers polls from the task registry.
pub struct IntersectionAnalyzer {
    context: RunContext,
}

impl IntersectionAnalyzer {
    pub fn new(
        table: Arc<MergedTable>,
        catalog: Arc<HitCatalog>,
        index: Arc<SequenceArchiveIndex>,
        nb_threads: usize,
    ) -> Self {
        IntersectionAnalyzer {
            context: RunContext {
                table,
                catalog,
                index,
                registry: Arc::new(Mutex::new(TaskRegistry::default())),
                nb_threads,
            },
        }
    }

    fn check_params(params: &IntersectionParams) -> Result<()> {
        if params.batch_size == 0 {
            return Err(MimicError::InvalidRequest("batch_size must be > 0".to_string()));
        }
        if let Some(max) = params.max_affinity {
            if !max.is_finite() {
                return Err(MimicError::InvalidRequest(format!("max_affinity not finite : {}", max)));
            }
        }
        Ok(())
    }

    /// Registers a task and runs it on a dedicated thread. The task is Pending until the thread picks it.
    pub fn start(&self, params: IntersectionParams) -> Result<TaskId> {
        IntersectionAnalyzer::check_params(&params)?;
        let id = self.context.registry.lock().register();
        log::debug!("registered intersection task {}", id);
        let context = self.context.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("intersection-{}", id))
            .spawn(move || context.run(id, &params));
        if let Err(e) = spawned {
            log::error!("cannot spawn intersection thread : {}", e);
            if let Ok(entry) = self.context.registry.lock().get_mut(id) {
                entry.finish(TaskState::Failed(e.to_string()));
            }
            return Err(MimicError::TaskFailure(e.to_string()));
        }
        Ok(id)
    } // end of start

    /// Cancels the previous task of `session`, if any, then starts a new one.
    pub fn start_superseding(&self, session: &str, params: IntersectionParams) -> Result<TaskId> {
        let previous = self.context.registry.lock().sessions.get(session).copied();
        if let Some(previous) = previous {
            log::info!("session {} : task {} superseded", session, previous);
            if let Err(e) = self.cancel(previous) {
                log::debug!("superseded task {} : {}", previous, e);
            }
        }
        let id = self.start(params)?;
        self.context.registry.lock().sessions.insert(session.to_string(), id);
        Ok(id)
    }

    /// Current status of a task, cheap.
    pub fn poll(&self, id: TaskId) -> Result<TaskStatus> {
        let mut registry = self.context.registry.lock();
        Ok(registry.get_mut(id)?.status(id))
    }

    /// A Pending or Running task goes to Failed("cancelled"), a terminal task is left as is.
    pub fn cancel(&self, id: TaskId) -> Result<TaskState> {
        let mut registry = self.context.registry.lock();
        let entry = registry.get_mut(id)?;
        if !entry.state.is_terminal() {
            log::info!("cancelling intersection task {}", id);
            entry.finish(TaskState::Failed(CANCELLED.to_string()));
        }
        Ok(entry.state.clone())
    }

    /// Removes terminal tasks finished for at least `max_age`, returns the number removed.
    pub fn purge_finished(&self, max_age: Duration) -> usize {
        let mut registry = self.context.registry.lock();
        let before = registry.tasks.len();
        registry
            .tasks
            .retain(|_, entry| !matches!(entry.finished, Some(t) if t.elapsed() >= max_age));
        let live: FxHashSet<TaskId> = registry.tasks.keys().copied().collect();
        registry.sessions.retain(|_, id| live.contains(id));
        let nb_purged = before - registry.tasks.len();
        if nb_purged > 0 {
            log::debug!("purged {} finished intersection tasks", nb_purged);
        }
        nb_purged
    }

    /// Polls until the task is terminal or `timeout` elapses, returning the last status.
    pub fn wait(&self, id: TaskId, poll_interval: Duration, timeout: Duration) -> Result<TaskStatus> {
        let start = Instant::now();
        loop {
            let status = self.poll(id)?;
            if status.state.is_terminal() || start.elapsed() >= timeout {
                return Ok(status);
            }
            std::thread::sleep(poll_interval);
        }
    }
} // end of impl IntersectionAnalyzer

//=========================================================================================

#[cfg(test)]
mod tests {

    use super::*;
    use crate::binding::BindingRecordTable;
    use crate::merge::merge;
    use crate::merge::tests::{catalog_of, hit, record};
    use crate::schema::Schema;
    use std::fs::File;
    use std::io::Write;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn with_interval(row_id: usize, seq: &str, interval: (usize, usize), affinity: f64) -> BindingRecord {
        let mut r = record(row_id, seq, "HLA-A", Some(affinity), "SB", "C1");
        r.peptide_interval = Some(interval);
        r
    }

    fn analyzer_of(records: Vec<BindingRecord>, catalog: HitCatalog, index: SequenceArchiveIndex) -> IntersectionAnalyzer {
        let merged = merge(BindingRecordTable::from_records(Schema::full(), records), &catalog, &index);
        IntersectionAnalyzer::new(Arc::new(merged), Arc::new(catalog), Arc::new(index), 2)
    }

    fn wait_done(analyzer: &IntersectionAnalyzer, id: TaskId) -> TaskStatus {
        analyzer.wait(id, Duration::from_millis(5), Duration::from_secs(30)).unwrap()
    }

    #[test]
    fn test_containment() {
        log_init_test();
        let catalog = catalog_of(vec![hit(HitSource::Pfam, "S", "PF1", 10, 50, 20.)], vec![], &[]);
        let records = vec![
            with_interval(0, "S", (12, 20), 100.),
            with_interval(1, "S", (45, 52), 100.),
            with_interval(2, "S", (5, 9), 100.),
        ];
        let analyzer = analyzer_of(records, catalog, SequenceArchiveIndex::empty());
        let id = analyzer.start(IntersectionParams::default()).unwrap();
        let status = wait_done(&analyzer, id);
        assert_eq!(status.state, TaskState::Completed);
        let result = status.result.unwrap();
        assert_eq!(result.stats.len(), 1);
        let stat = &result.stats[0];
        assert_eq!(stat.domain, "PF1");
        assert_eq!(stat.occurrences, 1);
        assert_eq!(stat.sequence_count, 1);
        assert_eq!(stat.avg_score, 20.);
        assert_eq!(stat.avg_affinity, Some(100.));
        assert_eq!(stat.ratio, Some(1.));
        assert!(!stat.background_missing);
        assert_eq!(stat.sample_sequences, vec!["S"]);
        assert_eq!(result.nb_peptides, 3);
    } // end of test_containment

    #[test]
    fn test_selection_and_background_only() {
        log_init_test();
        let catalog = catalog_of(
            vec![
                hit(HitSource::Pfam, "S", "PF1", 0, 100, 20.),
                hit(HitSource::Pfam, "S", "META_1", 0, 100, 20.),
                hit(HitSource::Pfam, "T", "PF1", 0, 100, 10.),
            ],
            vec![],
            &["META_".to_string()],
        );
        let mut weak = with_interval(2, "T", (1, 9), 50.);
        weak.bind_level = Some("WB".to_string());
        let records = vec![with_interval(0, "S", (1, 9), 10.), with_interval(1, "S", (20, 29), 800.), weak];
        let analyzer = analyzer_of(records, catalog, SequenceArchiveIndex::empty());
        let params = IntersectionParams {
            binding_level: Some("SB".to_string()),
            ..Default::default()
        };
        let status = wait_done(&analyzer, analyzer.start(params).unwrap());
        let result = status.result.unwrap();
        // affinity 800 and level WB are filtered out, META_1 is background only
        assert_eq!(result.nb_sequences, 1);
        assert_eq!(result.stats.len(), 1);
        assert_eq!(result.stats[0].occurrences, 1);
        // PF1 has 2 instances in store
        assert_eq!(result.stats[0].ratio, Some(0.5));
    }

    #[test]
    fn test_progress_monotonic() {
        log_init_test();
        let nb = 40;
        let mut pfam = Vec::new();
        let mut records = Vec::new();
        for i in 0..nb {
            let seq = format!("S{:03}", i);
            pfam.push(hit(HitSource::Pfam, &seq, "PF1", 0, 50, 5.));
            pfam.push(hit(HitSource::Pfam, &seq, "PF2", 30, 60, 5.));
            records.push(with_interval(i, &seq, (35, 44), 20.));
        }
        let analyzer = analyzer_of(records, catalog_of(pfam, vec![], &[]), SequenceArchiveIndex::empty());
        let params = IntersectionParams {
            batch_size: 3,
            ..Default::default()
        };
        let id = analyzer.start(params).unwrap();
        let mut last = 0.;
        let status = loop {
            let status = analyzer.poll(id).unwrap();
            assert!(status.progress >= last);
            assert!(status.progress <= 100.);
            last = status.progress;
            if status.state.is_terminal() {
                break status;
            }
            std::thread::sleep(Duration::from_millis(1));
        };
        assert_eq!(status.state, TaskState::Completed);
        assert_eq!(status.progress, 100.);
        let result = status.result.unwrap();
        let domains: Vec<(&str, usize)> = result.stats.iter().map(|s| (s.domain.as_str(), s.occurrences)).collect();
        assert_eq!(domains, vec![("PF1", nb), ("PF2", nb)]);
        assert_eq!(result.stats[0].sample_sequences.len(), nb);
    } // end of test_progress_monotonic

    #[test]
    fn test_no_hits_completes() {
        let analyzer = analyzer_of(vec![with_interval(0, "S", (1, 5), 1.)], catalog_of(vec![], vec![], &[]), SequenceArchiveIndex::empty());
        let status = wait_done(&analyzer, analyzer.start(IntersectionParams::default()).unwrap());
        assert_eq!(status.state, TaskState::Completed);
        assert_eq!(status.progress, 100.);
        assert!(status.result.unwrap().stats.is_empty());
    }

    #[test]
    fn test_cancel_before_run() {
        let analyzer = analyzer_of(vec![with_interval(0, "S", (1, 5), 1.)], catalog_of(vec![hit(HitSource::Pfam, "S", "PF1", 0, 9, 1.)], vec![], &[]), SequenceArchiveIndex::empty());
        // registered but not spawned, so the test decides the interleaving
        let id = analyzer.context.registry.lock().register();
        assert_eq!(analyzer.poll(id).unwrap().state, TaskState::Pending);
        let state = analyzer.cancel(id).unwrap();
        assert_eq!(state, TaskState::Failed("cancelled".to_string()));
        analyzer.context.run(id, &IntersectionParams::default());
        let status = analyzer.poll(id).unwrap();
        assert_eq!(status.error.as_deref(), Some("cancelled"));
        assert_eq!(status.progress, 0.);
        assert!(status.result.is_none());
        // terminal states do not move
        assert_eq!(analyzer.cancel(id).unwrap(), TaskState::Failed("cancelled".to_string()));
        //
        assert_eq!(analyzer.purge_finished(Duration::from_secs(3600)), 0);
        assert_eq!(analyzer.purge_finished(Duration::ZERO), 1);
        assert!(matches!(analyzer.poll(id), Err(MimicError::NotFound { .. })));
    }

    #[test]
    fn test_superseding() {
        let analyzer = analyzer_of(vec![with_interval(0, "S", (1, 5), 1.)], catalog_of(vec![hit(HitSource::Pfam, "S", "PF1", 0, 9, 1.)], vec![], &[]), SequenceArchiveIndex::empty());
        let first = analyzer.start_superseding("session", IntersectionParams::default()).unwrap();
        let second = analyzer.start_superseding("session", IntersectionParams::default()).unwrap();
        assert_ne!(first, second);
        let first = wait_done(&analyzer, first);
        // either cancelled or already completed when superseded
        assert!(first.state == TaskState::Completed || first.error.as_deref() == Some("cancelled"));
        let second = wait_done(&analyzer, second);
        assert_eq!(second.state, TaskState::Completed);
        assert_eq!(second.result.unwrap().stats[0].occurrences, 1);
    }

    #[test]
    fn test_failure_keeps_message() {
        log_init_test();
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("s.faa");
        let mut file = File::create(&archive).unwrap();
        writeln!(file, ">S\nMKVLAAGTWW").unwrap();
        drop(file);
        let index = SequenceArchiveIndex::build(&[archive.clone()], 1).unwrap();
        // peptide without interval must be searched in a vanished archive
        let r = record(0, "S", "HLA-A", Some(5.), "SB", "C1");
        let analyzer = analyzer_of(vec![r], catalog_of(vec![hit(HitSource::Pfam, "S", "PF1", 0, 9, 1.)], vec![], &[]), index);
        std::fs::remove_file(&archive).unwrap();
        let status = wait_done(&analyzer, analyzer.start(IntersectionParams::default()).unwrap());
        assert!(matches!(status.state, TaskState::Failed(_)));
        assert!(status.error.is_some());
        assert!(status.result.is_none());
    }

    #[test]
    fn test_invalid_params_and_unknown_task() {
        let analyzer = analyzer_of(vec![], catalog_of(vec![], vec![], &[]), SequenceArchiveIndex::empty());
        let params = IntersectionParams {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(analyzer.start(params), Err(MimicError::InvalidRequest(_))));
        assert!(matches!(analyzer.poll(TaskId::from(42)), Err(MimicError::NotFound { .. })));
        assert!(matches!(analyzer.cancel(TaskId::from(42)), Err(MimicError::NotFound { .. })));
    }
} // end of mod tests
