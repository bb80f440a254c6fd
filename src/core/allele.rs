/// One ALT allele in minimal (left-aligned, trimmed) representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AltAllele {
    pub chrom: String,
    pub pos: u64,
    pub ref_allele: String,
    pub alt: String,
}

impl AltAllele {
    pub fn new(
        chrom: impl Into<String>,
        pos: u64,
        ref_allele: impl Into<String>,
        alt: impl Into<String>,
    ) -> Self {
        let (pos, ref_allele, alt) = minimize_allele(pos, ref_allele.into(), alt.into());
        Self {
            chrom: chrom.into(),
            pos,
            ref_allele,
            alt,
        }
    }
}

impl std::fmt::Display for AltAllele {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}>{}",
            self.chrom, self.pos, self.ref_allele, self.alt
        )
    }
}

/// Trim a REF/ALT pair to its minimal representation: shared trailing bases
/// first, then shared leading bases (advancing the position), never reducing
/// either allele below one base. Idempotent on already-minimal pairs.
pub fn minimize_allele(mut pos: u64, mut ref_allele: String, mut alt: String) -> (u64, String, String) {
    while ref_allele.len() > 1
        && alt.len() > 1
        && ref_allele.as_bytes().last() == alt.as_bytes().last()
    {
        ref_allele.pop();
        alt.pop();
    }
    while ref_allele.len() > 1 && alt.len() > 1 && ref_allele.as_bytes()[0] == alt.as_bytes()[0] {
        ref_allele.remove(0);
        alt.remove(0);
        pos += 1;
    }
    (pos, ref_allele, alt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_then_leading_trim() {
        // suffix trim runs first, so the shared TG tail goes before any
        // prefix is considered
        assert_eq!(
            minimize_allele(100, "ATGTG".into(), "ATG".into()),
            (100, "ATG".into(), "A".into())
        );
        assert_eq!(
            minimize_allele(100, "ATG".into(), "ATGTG".into()),
            (100, "A".into(), "ATG".into())
        );
        // no shared suffix, shared prefix advances the position
        assert_eq!(
            minimize_allele(100, "CAT".into(), "CAG".into()),
            (102, "T".into(), "G".into())
        );
        assert_eq!(
            minimize_allele(100, "CATTT".into(), "CAGGG".into()),
            (102, "TTT".into(), "GGG".into())
        );
    }

    #[test]
    fn minimal_pairs_are_untouched() {
        assert_eq!(
            minimize_allele(7, "A".into(), "T".into()),
            (7, "A".into(), "T".into())
        );
        let (pos, r, a) = minimize_allele(100, "ATGTG".into(), "ATG".into());
        assert_eq!(minimize_allele(pos, r, a), (100, "ATG".into(), "A".into()));
    }

    #[test]
    fn never_trims_to_empty() {
        // identical alleles collapse to a single shared base, not zero
        assert_eq!(
            minimize_allele(5, "AAAA".into(), "AAAA".into()),
            (5, "A".into(), "A".into())
        );
    }

    #[test]
    fn symbolic_and_missing_alts_pass_through() {
        assert_eq!(
            minimize_allele(10, "A".into(), "<DUP>".into()),
            (10, "A".into(), "<DUP>".into())
        );
        assert_eq!(
            minimize_allele(10, "AT".into(), "*".into()),
            (10, "AT".into(), "*".into())
        );
    }

    #[test]
    fn equivalent_representations_compare_equal() {
        let a = AltAllele::new("chr1", 100, "CCATT", "CCAGG");
        let b = AltAllele::new("chr1", 102, "ATT", "AGG");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "chr1:103:TT>GG");
    }
}
