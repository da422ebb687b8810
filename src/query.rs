//! Filtered, sorted and paginated queries over the merged table.
//!
//! A [FilterSpec] maps column names to predicates. It is compiled against the table schema before any row
//! is examined, so a bad filter rejects the whole query. Predicates are combined with AND.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::{MimicError, Result};
use crate::merge::{MergedRow, MergedTable};
use crate::schema::{Column, ColumnType, Schema, Value};

/// predicate on one column.
/// In json a bool is an equality, a string a substring search and an object `{"min": .., "max": ..}` a range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predicate {
    /// boolean columns
    Equals(bool),
    /// case insensitive substring, string columns
    Contains(String),
    /// inclusive bounds, numeric columns
    Range { min: Option<f64>, max: Option<f64> },
}

/// conjunction of column predicates, an empty spec matches all rows
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSpec(BTreeMap<String, Predicate>);

impl FilterSpec {
    pub fn new() -> Self {
        FilterSpec(BTreeMap::new())
    }

    /// adds (or replaces) the predicate of a column
    pub fn with(mut self, column: &str, predicate: Predicate) -> Self {
        self.0.insert(column.to_string(), predicate);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Predicate)> {
        self.0.iter()
    }
} // end of impl FilterSpec

//=========================================================================================

#[derive(Debug)]
enum Compiled {
    Contains(Column, String),
    Range(Column, Option<f64>, Option<f64>),
    Equals(Column, bool),
}

/// a filter validated against a schema
#[derive(Debug)]
pub struct CompiledFilter(Vec<Compiled>);

impl CompiledFilter {
    pub fn compile(schema: &Schema, spec: &FilterSpec) -> Result<Self> {
        let mut compiled = Vec::<Compiled>::new();
        for (name, predicate) in spec.iter() {
            let column = schema.resolve(name)?;
            let c = match (predicate, column.column_type()) {
                (Predicate::Contains(s), ColumnType::String) => Compiled::Contains(column, s.to_lowercase()),
                (Predicate::Range { min, max }, ColumnType::Numeric) => {
                    if min.map_or(false, |v| v.is_nan()) || max.map_or(false, |v| v.is_nan()) {
                        return Err(MimicError::InvalidFilter(format!("NaN bound on column {}", name)));
                    }
                    Compiled::Range(column, *min, *max)
                }
                (Predicate::Equals(b), ColumnType::Boolean) => Compiled::Equals(column, *b),
                (_, column_type) => {
                    return Err(MimicError::InvalidFilter(format!(
                        "predicate {:?} does not apply to {:?} column {}",
                        predicate, column_type, name
                    )))
                }
            };
            compiled.push(c);
        }
        Ok(CompiledFilter(compiled))
    } // end of compile

    pub fn matches(&self, row: &MergedRow) -> bool {
        self.0.iter().all(|c| match c {
            Compiled::Contains(column, needle) => match row.value(*column) {
                Value::Str(s) => s.to_lowercase().contains(needle.as_str()),
                _ => false,
            },
            Compiled::Range(column, min, max) => {
                if min.is_none() && max.is_none() {
                    return true;
                }
                match row.value(*column).as_f64() {
                    Some(v) => min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m),
                    None => false,
                }
            }
            Compiled::Equals(column, b) => row.value(*column) == Value::Bool(*b),
        })
    } // end of matches
} // end of impl CompiledFilter

/// rows matching a filter, in table order
pub fn filter_rows<'a>(table: &'a MergedTable, spec: &FilterSpec) -> Result<Vec<&'a MergedRow>> {
    let filter = CompiledFilter::compile(table.get_schema(), spec)?;
    if spec.is_empty() {
        return Ok(table.get_rows().iter().collect());
    }
    // indexed collect keeps table order
    let rows: Vec<&MergedRow> = table.get_rows().par_iter().filter(|row| filter.matches(row)).collect();
    log::trace!("filter_rows : {} rows match {:?}", rows.len(), spec);
    Ok(rows)
} // end of filter_rows

//=========================================================================================

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(column: &str, direction: SortDirection) -> Self {
        SortSpec {
            column: column.to_string(),
            direction,
        }
    }
}

// order of two non null values of the same column.
// strings ignore case, ties are broken on the original strings so that the order stays total
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => x
            .chars()
            .flat_map(char::to_lowercase)
            .cmp(y.chars().flat_map(char::to_lowercase))
            .then_with(|| x.cmp(y)),
        (Value::Num(x), Value::Num(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Stable sort on a column. Nulls go last whatever the direction, strings compare ignoring case.
pub fn sort_rows(rows: &mut [&MergedRow], column: Column, direction: SortDirection) {
    rows.sort_by(|a, b| {
        let (va, vb) = (a.value(column), b.value(column));
        match (va.is_null(), vb.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let order = compare_values(&va, &vb);
                match direction {
                    SortDirection::Asc => order,
                    SortDirection::Desc => order.reverse(),
                }
            }
        }
    });
} // end of sort_rows

//=========================================================================================

/// one page of a query
#[derive(Debug)]
pub struct Page<'a> {
    pub rows: Vec<&'a MergedRow>,
    pub total_matches: usize,
    pub total_pages: usize,
    /// zero based
    pub page: usize,
    pub page_size: usize,
}

impl<'a> Page<'a> {
    /// rows with nested hit lists and pagination counts
    pub fn to_json(&self, schema: &Schema) -> serde_json::Value {
        serde_json::json!({
            "data": self.rows.iter().map(|r| r.to_json(schema)).collect::<Vec<serde_json::Value>>(),
            "total_rows": self.total_matches,
            "total_pages": self.total_pages,
            "page": self.page,
            "page_size": self.page_size,
        })
    }
} // end of impl Page

/// Filters, sorts and cuts out page `page` (zero based).
/// A page beyond the last one is empty but carries the real totals.
pub fn query<'a>(
    table: &'a MergedTable,
    spec: &FilterSpec,
    sort: Option<&SortSpec>,
    page: usize,
    page_size: usize,
) -> Result<Page<'a>> {
    if page_size == 0 {
        return Err(MimicError::InvalidRequest("page size must be positive".to_string()));
    }
    // sort key is checked before filtering
    let sort_column = match sort {
        Some(s) => Some((table.get_schema().resolve(&s.column)?, s.direction)),
        None => None,
    };
    let mut rows = filter_rows(table, spec)?;
    if let Some((column, direction)) = sort_column {
        sort_rows(&mut rows, column, direction);
    }
    //
    let total_matches = rows.len();
    let total_pages = total_matches.div_ceil(page_size);
    let first = page.checked_mul(page_size).unwrap_or(usize::MAX);
    let page_rows = if first >= total_matches {
        Vec::new()
    } else {
        let last = (first + page_size).min(total_matches);
        rows[first..last].to_vec()
    };
    log::debug!(
        "query page {} size {} : {} matches, {} pages",
        page,
        page_size,
        total_matches,
        total_pages
    );
    Ok(Page {
        rows: page_rows,
        total_matches,
        total_pages,
        page,
        page_size,
    })
} // end of query

//=========================================================================================

#[cfg(test)]
mod tests {

    use super::*;
    use crate::binding::BindingRecordTable;
    use crate::domains::HitSource;
    use crate::merge::merge;
    use crate::merge::tests::{catalog_of, hit, record};
    use crate::schema::Schema;
    use crate::seqindex::SequenceArchiveIndex;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn table() -> MergedTable {
        let catalog = catalog_of(
            vec![hit(HitSource::Pfam, "A", "PF1", 5, 30, 30.), hit(HitSource::Pfam, "C", "PF2", 5, 30, 30.)],
            vec![],
            &[],
        );
        let records = vec![
            record(0, "A", "HLA-A*02:01", Some(120.), "SB", "C1"),
            record(1, "B", "HLA-B*07:02", Some(40.), "WB", "C1"),
            record(2, "C", "hla-a*11:01", None, "SB", "C2"),
            record(3, "D", "HLA-B*08:01", Some(40.), "SB", "C2"),
            record(4, "E", "HLA-C*01:02", Some(900.), "WB", "C3"),
            record(5, "A", "HLA-A*01:01", Some(500.), "WB", "C3"),
            record(6, "F", "HLA-A*03:01", Some(5.), "SB", "C1"),
        ];
        merge(
            BindingRecordTable::from_records(Schema::full(), records),
            &catalog,
            &SequenceArchiveIndex::empty(),
        )
    }

    fn ids(page: &Page) -> Vec<usize> {
        page.rows.iter().map(|r| r.record.row_id).collect()
    }

    #[test]
    fn test_filter_predicates() {
        log_init_test();
        let table = table();
        // case insensitive
        let spec = FilterSpec::new().with("MHC", Predicate::Contains("HLA-A".to_string()));
        let page = query(&table, &spec, None, 0, 10).unwrap();
        assert_eq!(ids(&page), vec![0, 2, 5, 6]);
        // inclusive range, null excluded
        let spec = FilterSpec::new().with("mimic_Aff(nM)", Predicate::Range { min: Some(40.), max: Some(500.) });
        assert_eq!(ids(&query(&table, &spec, None, 0, 10).unwrap()), vec![0, 1, 3, 5]);
        // open range keeps nulls
        let spec = FilterSpec::new().with("mimic_Aff(nM)", Predicate::Range { min: None, max: None });
        assert_eq!(query(&table, &spec, None, 0, 10).unwrap().total_matches, 7);
        // inverted range matches nothing
        let spec = FilterSpec::new().with("mimic_Aff(nM)", Predicate::Range { min: Some(600.), max: Some(100.) });
        assert_eq!(query(&table, &spec, None, 0, 10).unwrap().total_matches, 0);
        // boolean
        let spec = FilterSpec::new().with("has_domains", Predicate::Equals(true));
        assert_eq!(ids(&query(&table, &spec, None, 0, 10).unwrap()), vec![0, 2, 5]);
        // derived string column
        let spec = FilterSpec::new().with("PFAM_domains", Predicate::Contains("pf2".to_string()));
        assert_eq!(ids(&query(&table, &spec, None, 0, 10).unwrap()), vec![2]);
    } // end of test_filter_predicates

    #[test]
    fn test_invalid_filters() {
        let table = table();
        let bad = [
            FilterSpec::new().with("mimic_Aff(nM)", Predicate::Contains("1".to_string())),
            FilterSpec::new().with("MHC", Predicate::Range { min: Some(1.), max: None }),
            FilterSpec::new().with("MHC", Predicate::Equals(true)),
            FilterSpec::new().with("has_domains", Predicate::Contains("t".to_string())),
            FilterSpec::new().with("no_such_column", Predicate::Contains("t".to_string())),
            FilterSpec::new().with("mimic_Aff(nM)", Predicate::Range { min: Some(f64::NAN), max: None }),
        ];
        for spec in bad.iter() {
            // a valid predicate alongside is not applied either
            let spec = spec.clone().with("mimic_BindLevel", Predicate::Contains("SB".to_string()));
            assert!(matches!(query(&table, &spec, None, 0, 10), Err(MimicError::InvalidFilter(_))));
        }
        let sort = SortSpec::new("nope", SortDirection::Asc);
        assert!(matches!(query(&table, &FilterSpec::new(), Some(&sort), 0, 10), Err(MimicError::InvalidFilter(_))));
        assert!(matches!(query(&table, &FilterSpec::new(), None, 0, 0), Err(MimicError::InvalidRequest(_))));
    }

    #[test]
    fn test_sort_nulls_last_and_stable() {
        let table = table();
        let asc = SortSpec::new("mimic_Aff(nM)", SortDirection::Asc);
        let page = query(&table, &FilterSpec::new(), Some(&asc), 0, 10).unwrap();
        // rows 1 and 3 tie, original order kept
        assert_eq!(ids(&page), vec![6, 1, 3, 0, 5, 4, 2]);
        let desc = SortSpec::new("mimic_Aff(nM)", SortDirection::Desc);
        let page = query(&table, &FilterSpec::new(), Some(&desc), 0, 10).unwrap();
        assert_eq!(ids(&page), vec![4, 5, 0, 1, 3, 6, 2]);
        let by_gene = SortSpec::new("mimic_gene", SortDirection::Desc);
        let page = query(&table, &FilterSpec::new(), Some(&by_gene), 0, 3).unwrap();
        assert_eq!(ids(&page), vec![6, 4, 3]);
        // lower case allele of row 2 sorts among the HLA-A ones
        let by_allele = SortSpec::new("MHC", SortDirection::Asc);
        let page = query(&table, &FilterSpec::new(), Some(&by_allele), 0, 10).unwrap();
        assert_eq!(ids(&page), vec![5, 0, 6, 2, 1, 3, 4]);
    }

    #[test]
    fn test_pagination_determinism() {
        let table = table();
        let spec = FilterSpec::new().with("mimic_BindLevel", Predicate::Contains("b".to_string()));
        let sort = SortSpec::new("MHC", SortDirection::Asc);
        for size in 1..=8 {
            let first = query(&table, &spec, Some(&sort), 0, size).unwrap();
            let total = first.total_matches;
            assert_eq!(first.total_pages, total.div_ceil(size));
            let mut seen = 0;
            for p in 0..first.total_pages + 2 {
                let a = query(&table, &spec, Some(&sort), p, size).unwrap();
                let b = query(&table, &spec, Some(&sort), p, size).unwrap();
                assert_eq!(ids(&a), ids(&b));
                assert_eq!(a.total_matches, total);
                assert_eq!(a.total_pages, first.total_pages);
                seen += a.rows.len();
            }
            assert_eq!(seen, total);
        }
        // beyond last page
        let page = query(&table, &spec, None, 100, 3).unwrap();
        assert!(page.rows.is_empty());
        assert_eq!(page.total_matches, 7);
        assert_eq!(page.total_pages, 3);
    }

    #[test]
    fn test_filter_monotonicity() {
        let table = table();
        let mut spec = FilterSpec::new();
        let mut previous = query(&table, &spec, None, 0, 5).unwrap().total_matches;
        let constraints = [
            ("mimic_BindLevel", Predicate::Contains("b".to_string())),
            ("mimic_Aff(nM)", Predicate::Range { min: None, max: Some(500.) }),
            ("MHC", Predicate::Contains("a*".to_string())),
            ("has_domains", Predicate::Equals(false)),
        ];
        for (column, predicate) in constraints {
            spec = spec.with(column, predicate);
            let total = query(&table, &spec, None, 0, 5).unwrap().total_matches;
            assert!(total <= previous);
            previous = total;
        }
        assert_eq!(previous, 1);
    }

    #[test]
    fn test_filter_spec_from_json() {
        let spec: FilterSpec =
            serde_json::from_str(r#"{"MHC": "hla", "mimic_Aff(nM)": {"max": 500}, "has_domains": true, "sequence_length": {}}"#).unwrap();
        let predicates: Vec<(&String, &Predicate)> = spec.iter().collect();
        assert_eq!(predicates.len(), 4);
        assert_eq!(*predicates[0].1, Predicate::Contains("hla".to_string()));
        assert_eq!(*predicates[1].1, Predicate::Equals(true));
        assert_eq!(*predicates[2].1, Predicate::Range { min: None, max: Some(500.) });
        assert_eq!(*predicates[3].1, Predicate::Range { min: None, max: None });
        let table = table();
        let page = query(&table, &spec, None, 0, 10).unwrap();
        assert_eq!(ids(&page), vec![0, 5]);
        let json = page.to_json(table.get_schema());
        assert_eq!(json["total_rows"], serde_json::json!(2));
        assert_eq!(json["data"][1]["MHC"], serde_json::json!("HLA-A*01:01"));
    }
} // end of mod tests
