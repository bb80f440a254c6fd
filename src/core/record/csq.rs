use super::{InfoEntry, VcfRecord};
use crate::{error::VcxResult, vcx_parse_error};
use std::collections::HashMap;

// VEP writes '-' for an empty allele
const VEP_EMPTY_ALLELE: &str = "-";

const ALLELE_FIELD: &str = "Allele";
const ALLELE_NUM_FIELD: &str = "ALLELE_NUM";

/// One VEP consequence block, with its field values in declared order and
/// the 1-based index into [`VcfRecord::alleles`] of the ALT it annotates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsqAnnotation {
    values: Vec<(String, String)>,
    pub alt_index: usize,
}

impl CsqAnnotation {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl<'h> VcfRecord<'h> {
    /// Consequence annotation blocks from the CSQ/ANN INFO field, resolved
    /// to ALT indices and cached. Errors if the header declares no CSQ/ANN
    /// layout or the record carries no such INFO field.
    pub fn csq(&self) -> VcxResult<&[CsqAnnotation]> {
        let annotations = self.csq.get_or_try_init(|| {
            let format = self.header.csq_format()?;
            let raw = match self.info_value(&format.label) {
                Some(InfoEntry::Value(value)) => value,
                _ => {
                    return Err(vcx_parse_error!(
                        "Could not find '{}' label in INFO field of record at {}:{}",
                        format.label,
                        self.chrom,
                        self.pos
                    ));
                }
            };
            let mut annotations = Vec::new();
            for block in raw.split(',') {
                let mut tokens = block.split('|');
                let values: Vec<(String, String)> = format
                    .fields
                    .iter()
                    .map(|name| (name.clone(), tokens.next().unwrap_or("").to_string()))
                    .collect();
                let alt_index = self.resolve_alt_index(&format.label, &values)?;
                annotations.push(CsqAnnotation { values, alt_index });
            }
            Ok(annotations)
        })?;
        Ok(annotations.as_slice())
    }

    fn resolve_alt_index(
        &self,
        label: &str,
        values: &[(String, String)],
    ) -> VcxResult<usize> {
        if self.alleles().len() == 2 {
            return Ok(1);
        }
        let lookup = |field: &str| {
            values
                .iter()
                .find(|(name, _)| name == field)
                .map(|(_, value)| value.as_str())
        };
        if let Some(num) = lookup(ALLELE_NUM_FIELD) {
            return num.parse::<usize>().map_err(|_| {
                vcx_parse_error!(
                    "Invalid {ALLELE_NUM_FIELD} '{num}' in {label} annotation at {}:{}",
                    self.chrom,
                    self.pos
                )
            });
        }
        let allele = lookup(ALLELE_FIELD).ok_or_else(|| {
            vcx_parse_error!(
                "No {ALLELE_FIELD} field in {label} annotation at {}:{}",
                self.chrom,
                self.pos
            )
        })?;
        self.vep_to_alt(allele)
    }

    /// Map a VEP `Allele` value to an ALT index, building the record's
    /// allele-string cache on first use.
    ///
    /// Structural alleles (symbolic or breakend notation) are keyed by their
    /// type keyword; short variants are keyed by their ALT string, with a
    /// second pass that left-trims every key when VEP would have trimmed the
    /// shared leading base.
    fn vep_to_alt(&self, csq_allele: &str) -> VcxResult<usize> {
        if let Some(found) = self.vep_alleles.borrow().get(csq_allele) {
            return Ok(*found);
        }
        let alleles = self.alleles();
        let ref_allele = &alleles[0];
        let mut is_sv = false;
        let mut is_snv = false;
        let mut is_mnv = false;
        let mut is_indel = false;
        let mut asterisk = false;
        {
            let mut cache = self.vep_alleles.borrow_mut();
            for (i, alt) in alleles.iter().enumerate().skip(1) {
                if alt == "*" {
                    cache.insert(alt.clone(), i);
                    asterisk = true;
                    continue;
                }
                let sv_type = symbolic_alt_type(alt).or_else(|| breakend_keyword(alt));
                if let Some(sv_type) = sv_type {
                    is_sv = true;
                    let key = if csq_allele == VEP_EMPTY_ALLELE {
                        VEP_EMPTY_ALLELE
                    } else {
                        match sv_type.as_str() {
                            "DUP" => "duplication",
                            "INS" => "insertion",
                            "DEL" => "deletion",
                            // covers CNVs, INVs and breakend keys
                            other => other,
                        }
                    };
                    cache.insert(key.to_string(), i);
                    continue;
                }
                if alt.len() == 1 && ref_allele.len() == 1 {
                    if alt != ref_allele {
                        is_snv = true;
                    }
                } else if alt.len() == ref_allele.len() {
                    is_mnv = true;
                } else {
                    is_indel = true;
                }
                if is_indel {
                    // longer non-symbolic alleles that VEP still annotates
                    // with a bare deletion/insertion/duplication token
                    let matched = (csq_allele == "deletion" && alt.len() < ref_allele.len())
                        || ((csq_allele == "insertion" || csq_allele == "duplication")
                            && alt.len() > ref_allele.len());
                    if matched {
                        cache.insert(csq_allele.to_string(), i);
                        return Ok(i);
                    }
                }
                cache.insert(alt.clone(), i);
            }
        }

        if is_sv {
            if is_snv || is_mnv || is_indel {
                return Err(vcx_parse_error!(
                    "Unable to parse structural variants at the same site as a \
                     non-structural variant at {}:{}",
                    self.chrom,
                    self.pos
                ));
            }
        } else if !is_snv && (is_indel || (is_mnv && asterisk)) {
            // VEP trims the leading base unless some ALT already differs
            // from REF at the first character
            let ref_start = ref_allele.as_bytes().first().copied();
            let first_base_differs = alleles[1..].iter().any(|alt| {
                alt != "*" && alt.as_bytes().first().copied() != ref_start
            });
            if !first_base_differs {
                let mut cache = self.vep_alleles.borrow_mut();
                let trimmed: HashMap<String, usize> = cache
                    .iter()
                    .map(|(key, i)| {
                        if key == "*" {
                            (key.clone(), *i)
                        } else if key.len() > 1 {
                            (key[1..].to_string(), *i)
                        } else {
                            (VEP_EMPTY_ALLELE.to_string(), *i)
                        }
                    })
                    .collect();
                *cache = trimmed;
            }
        }

        self.vep_alleles
            .borrow()
            .get(csq_allele)
            .copied()
            .ok_or_else(|| {
                vcx_parse_error!(
                    "Could not map consequence allele '{csq_allele}' to an ALT allele \
                     at {}:{}",
                    self.chrom,
                    self.pos
                )
            })
    }
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Inner type token of a symbolic ALT such as `<DUP>` or `<DUP:TANDEM>`.
fn symbolic_alt_type(alt: &str) -> Option<String> {
    let inner = alt.strip_prefix('<')?.strip_suffix('>')?;
    let mut segments = inner.split(':');
    let first = segments.next()?;
    if first.is_empty() || !first.chars().all(is_word) {
        return None;
    }
    for segment in segments {
        if segment.is_empty() || !segment.chars().all(is_word) {
            return None;
        }
    }
    Some(first.to_string())
}

/// Leading portion (bases, bracket and mate contig) of a breakend ALT such
/// as `A[chr2:123[` or `]13:123]T`.
fn breakend_keyword(alt: &str) -> Option<String> {
    let bracket = alt.find(['[', ']'])?;
    let bases = &alt[..bracket];
    if !bases.bytes().all(|b| matches!(b, b'A' | b'C' | b'T' | b'G' | b'N')) {
        return None;
    }
    let rest = &alt[bracket + 1..];
    let colon = rest.find(':')?;
    let contig = &rest[..colon];
    if contig.is_empty() || !contig.chars().all(is_word) {
        return None;
    }
    let after = &rest[colon + 1..];
    let close = after.find([']', '['])?;
    let position = &after[..close];
    if position.is_empty() || !position.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let tail = &after[close + 1..];
    if !tail.bytes().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T' | b'N')) {
        return None;
    }
    Some(alt[..bracket + 1 + colon].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{header::VcfHeader, test_utils::header_with_samples};

    const CSQ_META: &str = "\
##fileformat=VCFv4.2
##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total depth\">
##INFO=<ID=CSQ,Number=.,Type=String,Description=\"Consequence annotations from VEP. Format: Allele|Consequence|SYMBOL\">";

    const CSQ_NUM_META: &str = "\
##fileformat=VCFv4.2
##INFO=<ID=CSQ,Number=.,Type=String,Description=\"Consequence annotations from VEP. Format: Allele|ALLELE_NUM|Consequence\">";

    fn record<'h>(header: &'h VcfHeader, line: &str) -> VcfRecord<'h> {
        VcfRecord::new(line, header).unwrap()
    }

    #[test]
    fn single_alt_records_always_map_to_index_one() {
        let header = header_with_samples(CSQ_META, &[]);
        let rec = record(
            &header,
            "chr1\t100\t.\tA\tT\t.\tPASS\tCSQ=T|missense_variant|GENE1,T|intron_variant|GENE2",
        );
        let csq = rec.csq().unwrap();
        assert_eq!(csq.len(), 2);
        assert!(csq.iter().all(|c| c.alt_index == 1));
        assert_eq!(csq[0].get("Consequence"), Some("missense_variant"));
        assert_eq!(csq[1].get("SYMBOL"), Some("GENE2"));
    }

    #[test]
    fn missing_trailing_fields_become_empty_strings() {
        let header = header_with_samples(CSQ_META, &[]);
        let rec = record(&header, "chr1\t100\t.\tA\tT\t.\tPASS\tCSQ=T|stop_gained");
        let csq = rec.csq().unwrap();
        assert_eq!(csq[0].get("SYMBOL"), Some(""));
    }

    #[test]
    fn explicit_allele_num_wins() {
        let header = header_with_samples(CSQ_NUM_META, &[]);
        let rec = record(
            &header,
            "chr1\t100\t.\tA\tT,G\t.\tPASS\tCSQ=G|2|missense_variant,T|1|intron_variant",
        );
        let csq = rec.csq().unwrap();
        assert_eq!(csq[0].alt_index, 2);
        assert_eq!(csq[1].alt_index, 1);
    }

    #[test]
    fn snv_alleles_match_directly() {
        let header = header_with_samples(CSQ_META, &[]);
        let rec = record(
            &header,
            "chr1\t100\t.\tA\tT,G\t.\tPASS\tCSQ=G|missense_variant|X,T|stop_gained|X",
        );
        let csq = rec.csq().unwrap();
        assert_eq!(csq[0].alt_index, 2);
        assert_eq!(csq[1].alt_index, 1);
    }

    #[test]
    fn trimmed_indel_alleles_are_rebuilt_by_left_trimming() {
        let header = header_with_samples(CSQ_META, &[]);
        // VEP reports the insertion allele as 'T' after trimming the shared
        // leading base
        let rec = record(
            &header,
            "chr1\t100\t.\tA\tA,AT\t.\tPASS\tCSQ=T|frameshift_variant|X",
        );
        let csq = rec.csq().unwrap();
        assert_eq!(csq[0].alt_index, 2);
    }

    #[test]
    fn trimmed_deletion_maps_to_empty_allele_marker() {
        let header = header_with_samples(CSQ_META, &[]);
        let rec = record(
            &header,
            "chr1\t100\t.\tAT\tA,ATG\t.\tPASS\tCSQ=-|frameshift_variant|X,G|inframe_insertion|X",
        );
        let csq = rec.csq().unwrap();
        assert_eq!(csq[0].alt_index, 1);
        assert_eq!(csq[1].alt_index, 2);
    }

    #[test]
    fn untrimmed_alleles_stay_when_first_base_differs() {
        let header = header_with_samples(CSQ_META, &[]);
        let rec = record(
            &header,
            "chr1\t100\t.\tAT\tCT,C\t.\tPASS\tCSQ=CT|missense|X,C|deletion|X",
        );
        let csq = rec.csq().unwrap();
        assert_eq!(csq[0].alt_index, 1);
        assert_eq!(csq[1].alt_index, 2);
    }

    #[test]
    fn symbolic_alts_map_by_type_keyword() {
        let header = header_with_samples(CSQ_META, &[]);
        let rec = record(
            &header,
            "chr1\t100\t.\tA\t<DUP:TANDEM>,<DEL>\t.\tPASS\tCSQ=duplication|x|y,deletion|x|y",
        );
        let csq = rec.csq().unwrap();
        assert_eq!(csq[0].alt_index, 1);
        assert_eq!(csq[1].alt_index, 2);
    }

    #[test]
    fn mixed_structural_and_short_alleles_are_rejected() {
        let header = header_with_samples(CSQ_META, &[]);
        let rec = record(
            &header,
            "chr1\t100\t.\tA\t<DEL>,T\t.\tPASS\tCSQ=deletion|x|y,T|x|y",
        );
        let err = rec.csq().unwrap_err();
        assert!(err.to_string().contains("structural"), "got: {err}");
    }

    #[test]
    fn unmatched_allele_is_a_parse_error() {
        let header = header_with_samples(CSQ_META, &[]);
        let rec = record(
            &header,
            "chr1\t100\t.\tA\tT,G\t.\tPASS\tCSQ=C|missense|X,T|stop_gained|X",
        );
        let err = rec.csq().unwrap_err();
        assert!(err.to_string().contains("chr1:100"), "got: {err}");
    }

    #[test]
    fn missing_csq_info_field_is_a_parse_error() {
        let header = header_with_samples(CSQ_META, &[]);
        let rec = record(&header, "chr1\t100\t.\tA\tT\t.\tPASS\tDP=10");
        let err = rec.csq().unwrap_err();
        assert!(err.to_string().contains("CSQ"), "got: {err}");
    }

    #[test]
    fn alt_shape_tokenizers() {
        assert_eq!(symbolic_alt_type("<DUP>"), Some("DUP".to_string()));
        assert_eq!(symbolic_alt_type("<DUP:TANDEM>"), Some("DUP".to_string()));
        assert_eq!(symbolic_alt_type("<>"), None);
        assert_eq!(symbolic_alt_type("ACGT"), None);
        assert_eq!(symbolic_alt_type("<DUP"), None);

        assert_eq!(
            breakend_keyword("A[chr2:123["),
            Some("A[chr2".to_string())
        );
        assert_eq!(breakend_keyword("]13:123]T"), Some("]13".to_string()));
        assert_eq!(breakend_keyword("A[chr2:x["), None);
        assert_eq!(breakend_keyword("A[chr2:123"), None);
        assert_eq!(breakend_keyword("ACGT"), None);
    }
}
