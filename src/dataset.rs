//! Dataset : the loaded and merged inputs of one sample, and the operations served on them.
//!
//! Everything is loaded once by [Dataset::load] and never mutated afterwards, except the
//! intersection task registry. Request parameters (filters, sort, pages) are passed explicitly.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use cpu_time::ProcessTime;

use crate::aggregate::{self, AggregateSummary, CancerDetail, DomainOverview, EnrichmentEntry, VisualizationData};
use crate::binding::BindingRecordTable;
use crate::detail::{self, SequenceDetail};
use crate::domains::{HitCatalog, HitSource, LoadReport};
use crate::errors::{MimicError, Result};
use crate::intersect::{IntersectionAnalyzer, TaskId, TaskState, TaskStatus};
use crate::merge::{self, MergedRow, MergedTable};
use crate::query::{self, CompiledFilter, FilterSpec, Page, SortSpec};
use crate::schema::{compute_metadata, ColumnMetadata};
use crate::seqindex::SequenceArchiveIndex;
use crate::utils::{dumpload, DataFiles, IntersectionParams, MimicParams};

pub const MERGED_TABLE_NAME: &str = "merged_table.csv";
pub const METADATA_NAME: &str = "metadata.json";

pub struct Dataset {
    params: MimicParams,
    index: Arc<SequenceArchiveIndex>,
    catalog: Arc<HitCatalog>,
    table: Arc<MergedTable>,
    /// computed once after merge
    metadata: BTreeMap<String, ColumnMetadata>,
    /// (table name, report) for each loaded table
    reports: Vec<(String, LoadReport)>,
    analyzer: IntersectionAnalyzer,
}

impl Dataset {
    /// Discovers and loads all inputs of the data directory, then merges them.
    /// Any missing mandatory input or unreadable file is an error, there is no partial load.
    pub fn load(params: MimicParams) -> Result<Self> {
        log::info!("Dataset::load starting at {:?}", chrono::Local::now());
        let start_t = SystemTime::now();
        let cpu_start = ProcessTime::now();
        let data_params = params.get_data_params();
        let files = DataFiles::discover(data_params)?;
        //
        let nb_threads = data_params.get_nb_threads();
        let index = if files.archives.is_empty() {
            SequenceArchiveIndex::empty()
        } else if data_params.get_index_cache() {
            dumpload::build_or_reload(&files.archives, data_params.get_cache_dir(), nb_threads)?
        } else {
            SequenceArchiveIndex::build(&files.archives, nb_threads)?
        };
        let (catalog, mut reports) = HitCatalog::load(&files, data_params.get_background_prefixes(), &index)?;
        let (binding, binding_report) = BindingRecordTable::load(&files.binding_table)?;
        reports.insert(0, ("binding".to_string(), binding_report));
        //
        let mut dataset = Dataset::from_parts(params, binding, catalog, index);
        dataset.reports = reports;
        for (name, report) in &dataset.reports {
            log::info!("table {} : loaded {}, rejected {}", name, report.loaded, report.rejected);
        }
        let elapsed_t = start_t.elapsed().map(|d| d.as_secs_f32()).unwrap_or(0.);
        log::info!(
            "Dataset::load done at {:?}, cpu time(s) {}, elapsed time(s) {}",
            chrono::Local::now(),
            cpu_start.elapsed().as_secs(),
            elapsed_t
        );
        Ok(dataset)
    } // end of load

    /// Builds a dataset from already loaded parts.
    pub fn from_parts(
        params: MimicParams,
        binding: BindingRecordTable,
        catalog: HitCatalog,
        index: SequenceArchiveIndex,
    ) -> Self {
        let table = merge::merge(binding, &catalog, &index);
        let metadata = compute_metadata(&table);
        let (table, catalog, index) = (Arc::new(table), Arc::new(catalog), Arc::new(index));
        let analyzer = IntersectionAnalyzer::new(
            table.clone(),
            catalog.clone(),
            index.clone(),
            params.get_data_params().get_nb_threads(),
        );
        Dataset {
            params,
            index,
            catalog,
            table,
            metadata,
            reports: Vec::new(),
            analyzer,
        }
    } // end of from_parts

    pub fn get_params(&self) -> &MimicParams {
        &self.params
    }

    pub fn get_table(&self) -> &MergedTable {
        &self.table
    }

    pub fn get_catalog(&self) -> &HitCatalog {
        &self.catalog
    }

    pub fn get_index(&self) -> &SequenceArchiveIndex {
        &self.index
    }

    pub fn get_load_reports(&self) -> &[(String, LoadReport)] {
        &self.reports
    }

    /// type and value descriptors of each visible column
    pub fn get_metadata(&self) -> &BTreeMap<String, ColumnMetadata> {
        &self.metadata
    }

    // rows of the table passing an optional filter
    fn rows_matching(&self, filter: Option<&FilterSpec>) -> Result<Vec<&MergedRow>> {
        match filter {
            Some(spec) => query::filter_rows(&self.table, spec),
            None => Ok(self.table.get_rows().iter().collect()),
        }
    }

    /// A page of filtered and sorted rows. Page size defaults to the configured one and cannot exceed the configured maximum.
    pub fn get_page(
        &self,
        filter: &FilterSpec,
        sort: Option<&SortSpec>,
        page: usize,
        page_size: Option<usize>,
    ) -> Result<Page<'_>> {
        let query_params = self.params.get_query_params();
        let page_size = page_size.unwrap_or(query_params.get_default_page_size());
        if page_size > query_params.get_max_page_size() {
            return Err(MimicError::InvalidRequest(format!(
                "page size {} over maximum {}",
                page_size,
                query_params.get_max_page_size()
            )));
        }
        query::query(&self.table, filter, sort, page, page_size)
    }

    pub fn get_summary(&self, filter: Option<&FilterSpec>) -> Result<AggregateSummary> {
        let rows = self.rows_matching(filter)?;
        Ok(aggregate::summarize(&rows))
    }

    pub fn get_visualization_data(&self, filter: Option<&FilterSpec>) -> Result<VisualizationData> {
        let rows = self.rows_matching(filter)?;
        Ok(aggregate::visualization_data(&rows, self.params.get_query_params().get_top_domains()))
    }

    pub fn get_sequence_detail(&self, id: &str) -> Result<SequenceDetail> {
        detail::sequence_detail(
            id,
            &self.table,
            &self.catalog,
            &self.index,
            self.params.get_query_params().get_related_limit(),
        )
    }

    // rows of an accession passing an optional filter, NotFound if none
    fn accession_rows(&self, accession: &str, filter: Option<&FilterSpec>) -> Result<Vec<&MergedRow>> {
        let mut rows = self.table.rows_for_accession(accession);
        if let Some(spec) = filter {
            let compiled = CompiledFilter::compile(self.table.get_schema(), spec)?;
            rows.retain(|row| compiled.matches(row));
        }
        if rows.is_empty() {
            return Err(MimicError::not_found("accession", accession));
        }
        Ok(rows)
    }

    /// Domain enrichment of the rows of a cancer accession against the whole `source` store.
    pub fn get_cancer_domain_enrichment(
        &self,
        accession: &str,
        source: HitSource,
        filter: Option<&FilterSpec>,
    ) -> Result<Vec<EnrichmentEntry>> {
        let rows = self.accession_rows(accession, filter)?;
        let store = self.catalog.store(source);
        Ok(aggregate::enrichment(&rows, store, store.global_frequency_table(), store.get_target_total()))
    }

    pub fn get_cancer_detail(&self, accession: &str) -> Result<CancerDetail> {
        let rows = self.accession_rows(accession, None)?;
        Ok(aggregate::cancer_detail(accession, &rows))
    }

    /// binder sequences against the metagenome of `source`
    pub fn get_domain_overview(&self, source: HitSource) -> Result<DomainOverview> {
        aggregate::domain_overview(self.table.sequence_ids(), &self.catalog, source)
    }

    pub fn start_intersection_job(&self, params: IntersectionParams) -> Result<TaskId> {
        self.analyzer.start(params)
    }

    /// starts a job, cancelling the previous job of the session
    pub fn start_session_job(&self, session: &str, params: IntersectionParams) -> Result<TaskId> {
        self.analyzer.start_superseding(session, params)
    }

    pub fn get_job_status(&self, id: TaskId) -> Result<TaskStatus> {
        self.analyzer.poll(id)
    }

    pub fn wait_job(&self, id: TaskId, poll_interval: Duration, timeout: Duration) -> Result<TaskStatus> {
        self.analyzer.wait(id, poll_interval, timeout)
    }

    pub fn cancel_job(&self, id: TaskId) -> Result<TaskState> {
        self.analyzer.cancel(id)
    }

    pub fn purge_jobs(&self, max_age: Duration) -> usize {
        self.analyzer.purge_finished(max_age)
    }

    /// Writes the merged table, the column metadata and the parameters in `dirpath`, created if needed.
    pub fn export(&self, dirpath: &Path) -> Result<()> {
        log::info!("exporting dataset in {:?}", dirpath);
        std::fs::create_dir_all(dirpath)?;
        self.table.write_csv(&dirpath.join(MERGED_TABLE_NAME))?;
        //
        let filepath = dirpath.join(METADATA_NAME);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&filepath)
            .map_err(|e| {
                log::error!("export : could not open file {:?}", filepath.as_os_str());
                e
            })?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.metadata)?;
        self.params.dump_json(dirpath)?;
        Ok(())
    } // end of export
} // end of impl Dataset

//=========================================================================================

// end of mod tests
