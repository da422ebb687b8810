//! gathers the hit stores of a sample : better binder hits per source and optional metagenome backgrounds

use std::path::PathBuf;

use crate::domains::hitstore::{DomainHitStore, HitSource, LoadReport};
use crate::errors::{MimicError, Result};
use crate::seqindex::SequenceArchiveIndex;
use crate::utils::files::DataFiles;

#[derive(Debug)]
pub struct HitCatalog {
    pfam: DomainHitStore,
    kofam: DomainHitStore,
    /// metagenome wide hits, background of binder/metagenome comparisons
    pfam_background: Option<DomainHitStore>,
    kofam_background: Option<DomainHitStore>,
}

impl HitCatalog {
    pub fn new(pfam: DomainHitStore, kofam: DomainHitStore) -> Self {
        HitCatalog {
            pfam,
            kofam,
            pfam_background: None,
            kofam_background: None,
        }
    }

    pub fn with_backgrounds(mut self, pfam: Option<DomainHitStore>, kofam: Option<DomainHitStore>) -> Self {
        self.pfam_background = pfam;
        self.kofam_background = kofam;
        self
    }

    /// Loads the hit tables found in `files`, PFAM and KOFAM side in parallel.
    /// Returns load reports labelled by table.
    pub fn load(
        files: &DataFiles,
        background_prefixes: &[String],
        index: &SequenceArchiveIndex,
    ) -> Result<(Self, Vec<(String, LoadReport)>)> {
        let lengths = if index.get_nb_sequences() > 0 { Some(index) } else { None };
        let load_side = |source: HitSource, hits: &PathBuf, background: &Option<PathBuf>| {
            let target = DomainHitStore::load(std::slice::from_ref(hits), source, background_prefixes, lengths)?;
            let background = match background {
                Some(path) => Some(DomainHitStore::load(std::slice::from_ref(path), source, background_prefixes, lengths)?),
                None => None,
            };
            Ok::<_, MimicError>((target, background))
        };
        let (pfam_res, kofam_res) = rayon::join(
            || load_side(HitSource::Pfam, &files.pfam_hits, &files.pfam_metagenome),
            || load_side(HitSource::Kofam, &files.kofam_hits, &files.kofam_metagenome),
        );
        let ((pfam, pfam_report), pfam_background) = pfam_res?;
        let ((kofam, kofam_report), kofam_background) = kofam_res?;
        //
        let mut reports = vec![
            ("PFAM".to_string(), pfam_report),
            ("KOFAM".to_string(), kofam_report),
        ];
        if let Some((_, report)) = &pfam_background {
            reports.push(("PFAM metagenome".to_string(), *report));
        }
        if let Some((_, report)) = &kofam_background {
            reports.push(("KOFAM metagenome".to_string(), *report));
        }
        let catalog = HitCatalog::new(pfam, kofam)
            .with_backgrounds(pfam_background.map(|(s, _)| s), kofam_background.map(|(s, _)| s));
        Ok((catalog, reports))
    } // end of load

    pub fn store(&self, source: HitSource) -> &DomainHitStore {
        match source {
            HitSource::Pfam => &self.pfam,
            HitSource::Kofam => &self.kofam,
        }
    }

    /// metagenome store of a source, if its table was present
    pub fn background(&self, source: HitSource) -> Option<&DomainHitStore> {
        match source {
            HitSource::Pfam => self.pfam_background.as_ref(),
            HitSource::Kofam => self.kofam_background.as_ref(),
        }
    }
} // end of impl HitCatalog

//=========================================================================================

#[cfg(test)]
mod tests {

    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        File::create(&path).unwrap().write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_catalog_load() {
        log_init_test();
        let dir = tempfile::tempdir().unwrap();
        let header = "sequence_id\thmm_name\tbitscore\tevalue\tenv_from\tenv_to\n";
        let files = DataFiles {
            sample_id: "S".to_string(),
            binding_table: dir.path().join("S_merged_better_binders.csv"),
            pfam_hits: write(dir.path(), "S_PFAM_hits.tsv", &format!("{}A\tPF1\t10\t0.1\t1\t9\n", header)),
            kofam_hits: write(dir.path(), "S_KOFAM_hits.tsv", &format!("{}A\tK1\t10\t0.1\t1\t9\nA\tK2\t10\t0.1\t9\t9\n", header)),
            pfam_metagenome: Some(write(dir.path(), "S_PFAM_metagenome.tsv", &format!("{}M\tPF1\t10\t0.1\t1\t9\n", header))),
            kofam_metagenome: None,
            archives: Vec::new(),
        };
        let (catalog, reports) = HitCatalog::load(&files, &[], &SequenceArchiveIndex::empty()).unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[1].1, LoadReport { loaded: 1, rejected: 1 });
        assert_eq!(catalog.store(HitSource::Pfam).get_nb_hits(), 1);
        assert_eq!(catalog.store(HitSource::Kofam).get_source(), HitSource::Kofam);
        assert!(catalog.background(HitSource::Pfam).unwrap().contains_sequence("M"));
        assert!(catalog.background(HitSource::Kofam).is_none());
    } // end of test_catalog_load
} // end of mod tests
