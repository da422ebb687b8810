//! structures related to loading, query and intersection parameters

use std::fs::OpenOptions;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::to_writer;

use crate::domains::HitSource;
use crate::errors::Result;

/// where data lives and how it is loaded
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataParams {
    /// directory containing binding table, hit tables and fasta archives
    data_dir: PathBuf,
    /// sample prefix of file names. If None it is deduced from the binding table name.
    sample_id: Option<String>,
    /// domains whose name starts with one of these prefixes only count as background
    background_only_prefixes: Vec<String>,
    /// dump/reload the sequence index
    index_cache: bool,
    /// where the sequence index dump goes. If None it is data_dir, which may be read only.
    #[serde(default)]
    cache_dir: Option<PathBuf>,
    /// 0 means one thread per cpu
    nb_threads: usize,
} // end of struct DataParams

impl DataParams {
    pub fn new(data_dir: &Path) -> Self {
        DataParams {
            data_dir: data_dir.to_path_buf(),
            sample_id: None,
            background_only_prefixes: Vec::new(),
            index_cache: false,
            cache_dir: None,
            nb_threads: 0,
        }
    } // end of new

    pub fn with_sample_id(mut self, sample_id: &str) -> Self {
        self.sample_id = Some(sample_id.to_string());
        self
    }

    pub fn with_background_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.background_only_prefixes = prefixes;
        self
    }

    pub fn with_index_cache(mut self, index_cache: bool) -> Self {
        self.index_cache = index_cache;
        self
    }

    /// sets the index dump directory, this enables index caching
    pub fn with_cache_dir(mut self, cache_dir: &Path) -> Self {
        self.cache_dir = Some(cache_dir.to_path_buf());
        self.index_cache = true;
        self
    }

    pub fn with_nb_threads(mut self, nb_threads: usize) -> Self {
        self.nb_threads = nb_threads;
        self
    }

    pub fn get_data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn get_sample_id(&self) -> Option<&str> {
        self.sample_id.as_deref()
    }

    pub fn get_background_prefixes(&self) -> &[String] {
        &self.background_only_prefixes
    }

    pub fn get_index_cache(&self) -> bool {
        self.index_cache
    }

    /// directory of the sequence index dump, data_dir if no cache directory was given
    pub fn get_cache_dir(&self) -> &Path {
        self.cache_dir.as_deref().unwrap_or(&self.data_dir)
    }

    /// number of threads for worker pools, resolved against the number of cpus
    pub fn get_nb_threads(&self) -> usize {
        if self.nb_threads == 0 {
            num_cpus::get()
        } else {
            self.nb_threads
        }
    }
} // end of impl DataParams

//===========================================================

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct QueryParams {
    /// page size used when caller does not give one
    default_page_size: usize,
    /// larger page sizes are rejected
    max_page_size: usize,
    /// number of most frequent domains reported in visualization data
    top_domains: usize,
    /// number of related sequences in sequence detail
    related_limit: usize,
}

impl Default for QueryParams {
    fn default() -> Self {
        QueryParams {
            default_page_size: 50,
            max_page_size: 1000,
            top_domains: 15,
            related_limit: 5,
        }
    }
} // end of default for QueryParams

impl QueryParams {
    pub fn new(default_page_size: usize, max_page_size: usize, top_domains: usize, related_limit: usize) -> Self {
        QueryParams {
            default_page_size,
            max_page_size,
            top_domains,
            related_limit,
        }
    }

    pub fn get_default_page_size(&self) -> usize {
        self.default_page_size
    }

    pub fn get_max_page_size(&self) -> usize {
        self.max_page_size
    }

    pub fn get_top_domains(&self) -> usize {
        self.top_domains
    }

    pub fn get_related_limit(&self) -> usize {
        self.related_limit
    }
} // end of impl QueryParams

//======================================================================================

/// Parameters of a binding/domain intersection run.
/// Binding rows are kept if their affinity is below `max_affinity` and their level matches `binding_level` (when given).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IntersectionParams {
    /// annotation source whose domain intervals are intersected
    pub source: HitSource,
    /// affinity threshold in nM, rows above are skipped. None keeps all rows.
    pub max_affinity: Option<f64>,
    /// exact binding level label, e.g "SB" or "WB"
    pub binding_level: Option<String>,
    /// maximum number of sequences analyzed. None means all.
    pub max_sequences: Option<usize>,
    /// number of sequences processed between two progress reports
    pub batch_size: usize,
}

impl Default for IntersectionParams {
    fn default() -> Self {
        IntersectionParams {
            source: HitSource::Pfam,
            max_affinity: Some(500.),
            binding_level: None,
            max_sequences: Some(1000),
            batch_size: 100,
        }
    }
} // end of default for IntersectionParams

//=========================================================================================

/// Gathers all parameters, dumped with processed data to ease reload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MimicParams {
    data: DataParams,
    query: QueryParams,
    intersection: IntersectionParams,
} // end of MimicParams

impl MimicParams {
    pub fn new(data: DataParams, query: QueryParams, intersection: IntersectionParams) -> Self {
        MimicParams {
            data,
            query,
            intersection,
        }
    }

    pub fn get_data_params(&self) -> &DataParams {
        &self.data
    }

    pub fn get_query_params(&self) -> &QueryParams {
        &self.query
    }

    pub fn get_intersection_params(&self) -> &IntersectionParams {
        &self.intersection
    }

    pub fn dump_json(&self, dirpath: &Path) -> Result<()> {
        //
        let filepath = dirpath.join("parameters.json");
        //
        log::info!("dumping MimicParams in json file : {:?}", filepath);
        //
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&filepath)
            .map_err(|e| {
                log::error!("MimicParams dump : could not open file {:?}", filepath.as_os_str());
                e
            })?;
        //
        let mut writer = BufWriter::new(file);
        to_writer(&mut writer, &self)?;
        //
        Ok(())
    } // end of dump_json

    /// reload from a json dump
    pub fn reload_json(dirpath: &Path) -> Result<Self> {
        log::info!("in reload_json");
        //
        let filepath = dirpath.join("parameters.json");
        let file = OpenOptions::new().read(true).open(&filepath).map_err(|e| {
            log::error!("MimicParams reload_json : could not open file {:?}", filepath.as_os_str());
            e
        })?;
        //
        let reader = BufReader::new(file);
        let params: Self = serde_json::from_reader(reader)?;
        //
        log::info!("MimicParams reload, data dir : {:?}", params.data.get_data_dir());
        //
        Ok(params)
    } // end of reload_json
} // end of impl MimicParams

//=========================================================================================

#[cfg(test)]
mod tests {

    use super::*;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_params_dump_reload() {
        log_init_test();
        //
        let dir = tempfile::tempdir().unwrap();
        let data = DataParams::new(Path::new("/data/sample"))
            .with_sample_id("S1")
            .with_background_prefixes(vec!["META_".to_string()]);
        let mut intersection = IntersectionParams::default();
        intersection.binding_level = Some("SB".to_string());
        let params = MimicParams::new(data, QueryParams::default(), intersection);
        params.dump_json(dir.path()).unwrap();
        //
        let reloaded = MimicParams::reload_json(dir.path()).unwrap();
        assert_eq!(reloaded.get_data_params().get_sample_id(), Some("S1"));
        assert_eq!(reloaded.get_data_params().get_background_prefixes(), &["META_".to_string()]);
        assert_eq!(reloaded.get_query_params().get_top_domains(), 15);
        assert_eq!(reloaded.get_intersection_params().binding_level.as_deref(), Some("SB"));
        assert_eq!(reloaded.get_intersection_params().batch_size, 100);
        // no cache directory, dump goes to data dir
        assert_eq!(reloaded.get_data_params().get_cache_dir(), Path::new("/data/sample"));
    } // end of test_params_dump_reload

    #[test]
    fn test_intersection_params_defaults_from_partial_json() {
        let params: IntersectionParams = serde_json::from_str(r#"{"max_sequences": null, "source": "Kofam"}"#).unwrap();
        assert_eq!(params.source, HitSource::Kofam);
        assert!(params.max_sequences.is_none());
        assert_eq!(params.max_affinity, Some(500.));
    }

    #[test]
    fn test_nb_threads_resolution() {
        let params = DataParams::new(Path::new("."));
        assert!(params.get_nb_threads() >= 1);
        let params = params.with_nb_threads(3);
        assert_eq!(params.get_nb_threads(), 3);
    }
} // end of mod tests
