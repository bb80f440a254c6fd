mod csq;
mod genotypes;

pub use csq::CsqAnnotation;

use crate::{
    constants::{FIXED_COLUMNS, MISSING_VALUE},
    core::{
        allele::AltAllele,
        field_types::{FieldKind, Scalar, TypedValue, ValueClass},
        header::VcfHeader,
    },
    error::VcxResult,
    vcx_parse_error,
};
use once_cell::unsync::OnceCell;
use std::{
    cell::{Cell, Ref, RefCell},
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
};

/// One raw INFO value: a bare flag or the unconverted string after `=`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoEntry {
    Flag,
    Value(String),
}

/// Incoming value for [`VcfRecord::add_info_fields`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoUpdate {
    Flag,
    Single(String),
    Many(Vec<String>),
}

impl InfoUpdate {
    fn render(&self) -> Option<String> {
        match self {
            InfoUpdate::Flag => None,
            InfoUpdate::Single(v) => Some(v.clone()),
            InfoUpdate::Many(vs) => Some(vs.join(",")),
        }
    }
}

/// A single data line of a VCF, parsed against the header it was read with.
///
/// The raw tab-separated columns are the source of truth for rendering; every
/// decoded view (alleles, INFO, per-sample calls, consequence blocks) is a
/// lazily populated cache on top of them, and the mutation methods keep the
/// columns and the caches in step.
pub struct VcfRecord<'h> {
    header: &'h VcfHeader,
    cols: Vec<String>,
    chrom: String,
    pos: u64,
    id: String,
    ref_allele: String,
    alt: String,
    qual: Option<f64>,
    filter: String,
    info: String,
    format: Option<Vec<String>>,
    alleles: OnceCell<Vec<String>>,
    decomposed: OnceCell<Vec<AltAllele>>,
    info_fields: RefCell<Vec<(String, InfoEntry)>>,
    info_parsed: Cell<bool>,
    typed_info_cache: RefCell<HashMap<String, TypedValue>>,
    span: OnceCell<u64>,
    calls: RefCell<HashMap<String, HashMap<String, String>>>,
    all_calls_split: Cell<bool>,
    typed_gt_cache: RefCell<HashMap<String, HashMap<String, TypedValue>>>,
    csq: OnceCell<Vec<CsqAnnotation>>,
    vep_alleles: RefCell<HashMap<String, usize>>,
}

impl<'h> VcfRecord<'h> {
    pub fn new(line: &str, header: &'h VcfHeader) -> VcxResult<Self> {
        let cols: Vec<String> = line.split('\t').map(str::to_string).collect();
        if cols.len() < FIXED_COLUMNS.len() {
            return Err(vcx_parse_error!(
                "Not enough columns for following line:\n{line}"
            ));
        }
        let pos = cols[1]
            .parse::<u64>()
            .map_err(|_| vcx_parse_error!("Invalid POS '{}' for following line:\n{line}", cols[1]))?;
        let qual = cols[5].parse::<f64>().ok();
        let format = cols.get(8).map(|f| {
            f.split(':').map(str::to_string).collect::<Vec<String>>()
        });
        Ok(Self {
            header,
            chrom: cols[0].clone(),
            pos,
            id: cols[2].clone(),
            ref_allele: cols[3].clone(),
            alt: cols[4].clone(),
            qual,
            filter: cols[6].clone(),
            info: cols[7].clone(),
            format,
            cols,
            alleles: OnceCell::new(),
            decomposed: OnceCell::new(),
            info_fields: RefCell::new(Vec::new()),
            info_parsed: Cell::new(false),
            typed_info_cache: RefCell::new(HashMap::new()),
            span: OnceCell::new(),
            calls: RefCell::new(HashMap::new()),
            all_calls_split: Cell::new(false),
            typed_gt_cache: RefCell::new(HashMap::new()),
            csq: OnceCell::new(),
            vep_alleles: RefCell::new(HashMap::new()),
        })
    }

    pub fn header(&self) -> &'h VcfHeader {
        self.header
    }

    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ref_allele(&self) -> &str {
        &self.ref_allele
    }

    pub fn alt(&self) -> &str {
        &self.alt
    }

    /// QUAL as a float; `.` and anything unparsable read as `None`. The raw
    /// column text is still rendered verbatim.
    pub fn qual(&self) -> Option<f64> {
        self.qual
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn info(&self) -> &str {
        &self.info
    }

    /// FORMAT field names, in column order. `None` for sites-only records.
    pub fn format(&self) -> Option<&[String]> {
        self.format.as_deref()
    }

    /// REF followed by each ALT allele, split on `,`, in column order.
    pub fn alleles(&self) -> &[String] {
        self.alleles.get_or_init(|| {
            let mut alleles = vec![self.ref_allele.clone()];
            alleles.extend(self.alt.split(',').map(str::to_string));
            alleles
        })
    }

    /// One minimized [`AltAllele`] per ALT, in ALT order.
    pub fn decomposed_alleles(&self) -> &[AltAllele] {
        self.decomposed.get_or_init(|| {
            self.alleles()[1..]
                .iter()
                .map(|alt| AltAllele::new(&self.chrom, self.pos, &self.ref_allele, alt))
                .collect()
        })
    }

    /// Raw INFO key/value pairs in first-seen order, flags as [`InfoEntry::Flag`].
    pub fn info_fields(&self) -> Ref<'_, Vec<(String, InfoEntry)>> {
        self.ensure_info_fields();
        self.info_fields.borrow()
    }

    pub fn info_value(&self, key: &str) -> Option<InfoEntry> {
        self.ensure_info_fields();
        self.info_fields
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn has_info(&self, key: &str) -> bool {
        self.info_value(key).is_some()
    }

    fn ensure_info_fields(&self) {
        if self.info_parsed.get() {
            return;
        }
        let mut parsed = Vec::new();
        for token in self.info.split(';') {
            match token.split_once('=') {
                Some((key, value)) => {
                    parsed.push((key.to_string(), InfoEntry::Value(value.to_string())));
                }
                None => parsed.push((token.to_string(), InfoEntry::Flag)),
            }
        }
        *self.info_fields.borrow_mut() = parsed;
        self.info_parsed.set(true);
    }

    /// Decode the requested INFO fields (all present fields when `None`)
    /// into typed values, using the header registry with the well-known-field
    /// fallback. Requested fields absent from the record are skipped.
    /// Decoded values are memoized per field.
    pub fn typed_info(&self, fields: Option<&[&str]>) -> VcxResult<HashMap<String, TypedValue>> {
        self.ensure_info_fields();
        let wanted: Vec<String> = match fields {
            Some(fields) => fields
                .iter()
                .filter(|f| self.has_info(f))
                .map(|f| f.to_string())
                .collect(),
            None => self
                .info_fields
                .borrow()
                .iter()
                .map(|(k, _)| k.clone())
                .collect(),
        };
        let mut out = HashMap::with_capacity(wanted.len());
        for field in wanted {
            if let Some(cached) = self.typed_info_cache.borrow().get(&field) {
                out.insert(field, cached.clone());
                continue;
            }
            let entry = match self.info_value(&field) {
                Some(entry) => entry,
                None => continue,
            };
            let typed = self.decode_info_entry(&field, &entry)?;
            self.typed_info_cache
                .borrow_mut()
                .insert(field.clone(), typed.clone());
            out.insert(field, typed);
        }
        Ok(out)
    }

    fn decode_info_entry(&self, field: &str, entry: &InfoEntry) -> VcxResult<TypedValue> {
        let spec = self
            .header
            .registry(FieldKind::Info)
            .resolve(field)
            .ok_or_else(|| {
                vcx_parse_error!(
                    "Unrecognised INFO field '{field}' at {}:{}. Non-standard INFO fields \
                     should be represented in VCF header",
                    self.chrom,
                    self.pos
                )
            })?;
        // a declared Flag is presence-only whatever the token looks like
        if spec.class == ValueClass::Flag {
            return Ok(TypedValue::Flag);
        }
        let value = match entry {
            InfoEntry::Value(value) => value,
            InfoEntry::Flag => {
                return Err(vcx_parse_error!(
                    "INFO field '{field}' at {}:{} carries no value but is not declared as a Flag",
                    self.chrom,
                    self.pos
                ));
            }
        };
        let convert = |token: &str| -> VcxResult<Option<Scalar>> {
            if token == MISSING_VALUE {
                return Ok(None);
            }
            spec.class.convert(token).map(Some).ok_or_else(|| {
                vcx_parse_error!(
                    "Unexpected value '{value}' for {field} INFO field at {}:{}",
                    self.chrom,
                    self.pos
                )
            })
        };
        if spec.multi {
            let values = value
                .split(',')
                .map(convert)
                .collect::<VcxResult<Vec<_>>>()?;
            Ok(TypedValue::List(values))
        } else {
            Ok(TypedValue::Scalar(convert(value)?))
        }
    }

    /// End coordinate: the END INFO field when present, else `POS + len(REF) - 1`.
    pub fn span(&self) -> VcxResult<u64> {
        self.span
            .get_or_try_init(|| match self.info_value("END") {
                Some(InfoEntry::Value(end)) => end.parse::<u64>().map_err(|_| {
                    vcx_parse_error!(
                        "Invalid END value '{end}' at {}:{}",
                        self.chrom,
                        self.pos
                    )
                }),
                Some(InfoEntry::Flag) => Err(vcx_parse_error!(
                    "END INFO field at {}:{} has no value",
                    self.chrom,
                    self.pos
                )),
                None => Ok(self.pos + self.ref_allele.len() as u64 - 1),
            })
            .copied()
    }

    /// Add identifiers to the ID column. Existing identifiers are kept and
    /// unioned unless `replace` is set or the column is the missing marker;
    /// the union renders in sorted order.
    pub fn add_ids(&mut self, ids: &[&str], replace: bool) {
        if replace || self.id == MISSING_VALUE {
            self.id = ids.join(";");
        } else {
            let union: BTreeSet<&str> = self.id.split(';').chain(ids.iter().copied()).collect();
            self.id = union.into_iter().collect::<Vec<_>>().join(";");
        }
        self.cols[2] = self.id.clone();
    }

    /// Add or replace INFO fields, processed in key order. With
    /// `append_existing`, values for keys already present merge according to
    /// the declared cardinality: Flag fields stay set, `Number=.` fields
    /// comma-append, `Number=1` fields pipe-append, and any other fixed width
    /// zips old and new value lists pairwise with `|` (a length mismatch is a
    /// parse error). The INFO column is rebuilt afterwards and dependent
    /// caches are dropped.
    pub fn add_info_fields(
        &mut self,
        info: BTreeMap<String, InfoUpdate>,
        append_existing: bool,
    ) -> VcxResult<()> {
        self.ensure_info_fields();
        for (key, update) in info {
            if append_existing && self.has_info(&key) {
                self.append_to_existing_info(&key, &update)?;
            } else {
                let entry = match update.render() {
                    Some(value) => InfoEntry::Value(value),
                    None => InfoEntry::Flag,
                };
                let mut fields = self.info_fields.borrow_mut();
                match fields.iter_mut().find(|(k, _)| *k == key) {
                    Some(slot) => slot.1 = entry,
                    None => fields.push((key, entry)),
                }
            }
        }
        self.rewrite_info_string();
        Ok(())
    }

    fn append_to_existing_info(&self, field: &str, update: &InfoUpdate) -> VcxResult<()> {
        let declared = self
            .header
            .declarations("INFO", field)
            .and_then(|entries| entries.last());
        let mut fields = self.info_fields.borrow_mut();
        let slot = match fields.iter_mut().find(|(k, _)| k == field) {
            Some(slot) => slot,
            None => return Ok(()),
        };
        if let Some(props) = declared {
            if props.get("Type") == Some("Flag") {
                slot.1 = InfoEntry::Flag;
                return Ok(());
            }
        }
        let incoming = update.render().ok_or_else(|| {
            vcx_parse_error!(
                "Cannot append flag to non-Flag INFO field '{field}' at {}:{}",
                self.chrom,
                self.pos
            )
        })?;
        let existing = match &slot.1 {
            InfoEntry::Value(value) => value.clone(),
            InfoEntry::Flag => {
                return Err(vcx_parse_error!(
                    "Cannot append value to flag INFO field '{field}' at {}:{}",
                    self.chrom,
                    self.pos
                ));
            }
        };
        if let Some(props) = declared {
            match props.get("Number") {
                Some(".") => {
                    slot.1 = InfoEntry::Value(format!("{existing},{incoming}"));
                    return Ok(());
                }
                Some("1") => {
                    slot.1 = InfoEntry::Value(format!("{existing}|{incoming}"));
                    return Ok(());
                }
                _ => {}
            }
        }
        let old: Vec<&str> = existing.split(',').collect();
        let new: Vec<&str> = incoming.split(',').collect();
        if old.len() != new.len() {
            return Err(vcx_parse_error!(
                "New {field} INFO value '{incoming}' has differing number of values to \
                 existing value '{existing}'"
            ));
        }
        let zipped: Vec<String> = old
            .iter()
            .zip(&new)
            .map(|(o, n)| format!("{o}|{n}"))
            .collect();
        slot.1 = InfoEntry::Value(zipped.join(","));
        Ok(())
    }

    fn rewrite_info_string(&mut self) {
        let rendered: Vec<String> = self
            .info_fields
            .borrow()
            .iter()
            .map(|(key, entry)| match entry {
                InfoEntry::Flag => key.clone(),
                InfoEntry::Value(value) => format!("{key}={value}"),
            })
            .collect();
        self.info = rendered.join(";");
        self.cols[7] = self.info.clone();
        self.typed_info_cache.borrow_mut().clear();
        self.span.take();
        self.csq.take();
    }
}

impl fmt::Display for VcfRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cols.join("\t"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::header_with_samples;

    const META: &str = "\
##fileformat=VCFv4.2
##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total depth\">
##INFO=<ID=AC,Number=A,Type=Integer,Description=\"Allele counts\">
##INFO=<ID=AF,Number=A,Type=Float,Description=\"Allele frequencies\">
##INFO=<ID=DB,Number=0,Type=Flag,Description=\"dbSNP membership\">
##INFO=<ID=NOTE,Number=.,Type=String,Description=\"Free text\">
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">";

    fn record<'h>(header: &'h VcfHeader, line: &str) -> VcfRecord<'h> {
        VcfRecord::new(line, header).unwrap()
    }

    #[test]
    fn rendering_reproduces_the_input_line() {
        let header = header_with_samples(META, &["s1", "s2"]);
        let line = "chr1\t100\trs1\tA\tT,AT\t50\tPASS\tDP=10;AC=3,4\tGT\t0/1\t1/2";
        let rec = record(&header, line);
        assert_eq!(rec.to_string(), line);
        assert_eq!(rec.chrom(), "chr1");
        assert_eq!(rec.pos(), 100);
        assert_eq!(rec.qual(), Some(50.0));
        assert_eq!(rec.format(), Some(&["GT".to_string()][..]));
    }

    #[test]
    fn alleles_and_decomposition() {
        let header = header_with_samples(META, &[]);
        let rec = record(&header, "chr1\t100\t.\tATGTG\tATG,A\t.\tPASS\tDP=1");
        assert_eq!(rec.alleles(), ["ATGTG", "ATG", "A"]);
        let decomposed = rec.decomposed_alleles();
        assert_eq!(decomposed.len(), 2);
        assert_eq!(decomposed[0].ref_allele, "ATG");
        assert_eq!(decomposed[0].alt, "A");
        assert_eq!(decomposed[1].pos, 100);
        assert_eq!(decomposed[1].ref_allele, "ATGTG");
        assert_eq!(decomposed[1].alt, "A");
    }

    #[test]
    fn short_lines_and_bad_pos_are_parse_errors() {
        let header = header_with_samples(META, &[]);
        assert!(VcfRecord::new("chr1\t100\t.\tA\tT", &header).is_err());
        assert!(VcfRecord::new("chr1\tx\t.\tA\tT\t.\tPASS\tDP=1", &header).is_err());
    }

    #[test]
    fn info_fields_keep_first_seen_order() {
        let header = header_with_samples(META, &[]);
        let rec = record(&header, "chr1\t100\t.\tA\tT\t.\tPASS\tDB;DP=10;AC=3");
        let fields = rec.info_fields();
        assert_eq!(fields[0], ("DB".to_string(), InfoEntry::Flag));
        assert_eq!(fields[1], ("DP".to_string(), InfoEntry::Value("10".into())));
        assert_eq!(fields[2], ("AC".to_string(), InfoEntry::Value("3".into())));
    }

    #[test]
    fn typed_info_decodes_by_declared_type() {
        let header = header_with_samples(META, &[]);
        let rec = record(
            &header,
            "chr1\t100\t.\tA\tT,G\t.\tPASS\tDB;DP=10;AC=3,4;AF=0.5,.",
        );
        let typed = rec.typed_info(None).unwrap();
        assert_eq!(typed["DB"], TypedValue::Flag);
        assert_eq!(typed["DP"], TypedValue::Scalar(Some(Scalar::Int(10))));
        assert_eq!(
            typed["AC"],
            TypedValue::List(vec![Some(Scalar::Int(3)), Some(Scalar::Int(4))])
        );
        assert_eq!(
            typed["AF"],
            TypedValue::List(vec![Some(Scalar::Float(0.5)), None])
        );
    }

    #[test]
    fn typed_info_subset_skips_absent_fields() {
        let header = header_with_samples(META, &[]);
        let rec = record(&header, "chr1\t100\t.\tA\tT\t.\tPASS\tDP=10");
        let typed = rec.typed_info(Some(&["DP", "AC"])).unwrap();
        assert_eq!(typed.len(), 1);
        assert!(typed.contains_key("DP"));
    }

    #[test]
    fn typed_info_failures_name_the_coordinate() {
        let header = header_with_samples(META, &[]);
        let rec = record(&header, "chr1\t100\t.\tA\tT\t.\tPASS\tDP=ten");
        let err = rec.typed_info(Some(&["DP"])).unwrap_err();
        assert!(err.to_string().contains("chr1:100"), "got: {err}");

        let rec = record(&header, "chr2\t7\t.\tA\tT\t.\tPASS\tWHAT=1");
        let err = rec.typed_info(Some(&["WHAT"])).unwrap_err();
        assert!(err.to_string().contains("WHAT"), "got: {err}");
    }

    #[test]
    fn undeclared_fields_fall_back_to_well_known_table() {
        let header = header_with_samples("##fileformat=VCFv4.2", &[]);
        let rec = record(&header, "chr1\t100\t.\tA\tT\t.\tPASS\tSVTYPE=DEL;END=200");
        let typed = rec.typed_info(None).unwrap();
        assert_eq!(typed["SVTYPE"].as_str(), Some("DEL"));
        assert_eq!(typed["END"].as_int(), Some(200));
    }

    #[test]
    fn span_prefers_end_info_field() {
        let header = header_with_samples(META, &[]);
        let rec = record(&header, "chr1\t100\t.\tATG\tA\t.\tPASS\tEND=500");
        assert_eq!(rec.span().unwrap(), 500);
        let rec = record(&header, "chr1\t100\t.\tATG\tA\t.\tPASS\tDP=1");
        assert_eq!(rec.span().unwrap(), 102);
    }

    #[test]
    fn add_ids_unions_unless_replacing() {
        let header = header_with_samples(META, &[]);
        let mut rec = record(&header, "chr1\t100\t.\tA\tT\t.\tPASS\tDP=1");
        rec.add_ids(&["rs2"], false);
        assert_eq!(rec.id(), "rs2");
        rec.add_ids(&["rs1"], false);
        assert_eq!(rec.id(), "rs1;rs2");
        rec.add_ids(&["rs9"], true);
        assert_eq!(rec.id(), "rs9");
        assert!(rec.to_string().contains("\trs9\t"));
    }

    #[test]
    fn add_info_fields_sets_and_rerenders() {
        let header = header_with_samples(META, &[]);
        let mut rec = record(&header, "chr1\t100\t.\tA\tT,G\t.\tPASS\tDP=10");
        rec.add_info_fields(
            BTreeMap::from([
                ("AC".to_string(), InfoUpdate::Many(vec!["3".into(), "4".into()])),
                ("DB".to_string(), InfoUpdate::Flag),
            ]),
            false,
        )
        .unwrap();
        assert_eq!(rec.info(), "DP=10;AC=3,4;DB");
        assert!(rec.to_string().ends_with("DP=10;AC=3,4;DB"));
        // typed round-trip through the rebuilt column
        let typed = rec.typed_info(Some(&["AC"])).unwrap();
        assert_eq!(
            typed["AC"],
            TypedValue::List(vec![Some(Scalar::Int(3)), Some(Scalar::Int(4))])
        );
    }

    #[test]
    fn append_existing_follows_declared_cardinality() {
        let header = header_with_samples(META, &[]);
        let mut rec = record(
            &header,
            "chr1\t100\t.\tA\tT\t.\tPASS\tDP=10;NOTE=abc;AC=3;DB",
        );
        rec.add_info_fields(
            BTreeMap::from([
                ("DP".to_string(), InfoUpdate::Single("12".into())),
                ("NOTE".to_string(), InfoUpdate::Single("def".into())),
                ("AC".to_string(), InfoUpdate::Single("5".into())),
                ("DB".to_string(), InfoUpdate::Flag),
            ]),
            true,
        )
        .unwrap();
        // Number=1 pipe-appends, Number=. comma-appends, Number=A zips
        assert_eq!(rec.info(), "DP=10|12;NOTE=abc,def;AC=3|5;DB");
    }

    #[test]
    fn append_with_mismatched_width_is_a_parse_error() {
        let header = header_with_samples(META, &[]);
        let mut rec = record(&header, "chr1\t100\t.\tA\tT,G\t.\tPASS\tAC=3,4");
        let err = rec
            .add_info_fields(
                BTreeMap::from([("AC".to_string(), InfoUpdate::Single("5".into()))]),
                true,
            )
            .unwrap_err();
        assert!(err.to_string().contains("differing number"), "got: {err}");
    }

    #[test]
    fn mutation_invalidates_span_and_typed_caches() {
        let header = header_with_samples(META, &[]);
        let mut rec = record(&header, "chr1\t100\t.\tATG\tA\t.\tPASS\tDP=10");
        assert_eq!(rec.span().unwrap(), 102);
        assert_eq!(rec.typed_info(Some(&["DP"])).unwrap()["DP"].as_int(), Some(10));
        rec.add_info_fields(
            BTreeMap::from([
                ("END".to_string(), InfoUpdate::Single("500".into())),
                ("DP".to_string(), InfoUpdate::Single("12".into())),
            ]),
            false,
        )
        .unwrap();
        assert_eq!(rec.span().unwrap(), 500);
        assert_eq!(rec.typed_info(Some(&["DP"])).unwrap()["DP"].as_int(), Some(12));
    }
}
