use crate::{
    core::{header::VcfHeader, record::VcfRecord},
    error::{VcxError, VcxResult},
    vcx_header_error, vcx_parse_error,
};
use flate2::read::MultiGzDecoder;
use std::{
    fs::File,
    io::{BufRead, BufReader, Read as ioRead},
    path::Path,
};

/// Ordered, newline-stripped text lines feeding a [`VcfReader`].
pub type LineIter = Box<dyn Iterator<Item = VcxResult<String>>>;

/// Indexed region lookups over a seekable input. Implementations return the
/// raw record lines overlapping the 0-based half-open `[start, end)` range
/// on `contig`, or an empty list for an unknown contig.
pub trait RegionFetch {
    fn fetch(
        &mut self,
        contig: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> VcxResult<Vec<String>>;
}

/// Pull-based VCF reader: consumes the header up front, then yields one
/// record per data line. The line source is single-pass; attaching a region
/// index lets [`set_region`](VcfReader::set_region) swap the cursor for an
/// index-backed one.
pub struct VcfReader {
    header: VcfHeader,
    lines: LineIter,
    index: Option<Box<dyn RegionFetch>>,
}

impl std::fmt::Debug for VcfReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VcfReader")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl VcfReader {
    /// Open a plain or gzip-compressed VCF file, judged by extension.
    pub fn from_path(path: &Path) -> VcxResult<Self> {
        fn is_gzipped(path: &Path) -> bool {
            let path_str = path.to_string_lossy().to_lowercase();
            path_str.ends_with(".gz") || path_str.ends_with(".gzip")
        }
        let file = File::open(path)
            .map_err(|error| vcx_parse_error!("Failed to open file {}: {error}", path.display()))?;
        if is_gzipped(path) {
            let gz_decoder = MultiGzDecoder::new(file);
            if gz_decoder.header().is_some() {
                Self::from_reader(BufReader::new(Box::new(gz_decoder) as Box<dyn ioRead>))
            } else {
                Err(VcxError::InvalidGzipHeader {
                    path: path.to_path_buf(),
                })
            }
        } else {
            Self::from_reader(BufReader::new(Box::new(file) as Box<dyn ioRead>))
        }
    }

    /// Read from any buffered text source.
    pub fn from_reader(reader: impl BufRead + 'static) -> VcxResult<Self> {
        let mut lines: LineIter =
            Box::new(reader.lines().map(|line| line.map_err(VcxError::from)));
        let header = read_header(&mut lines)?;
        Ok(Self {
            header,
            lines,
            index: None,
        })
    }

    /// Build a reader from pre-split header material and a record-line
    /// sequence, e.g. the output of a binary-format decoder.
    pub fn from_parts(
        meta_lines: Vec<String>,
        columns: Vec<String>,
        records: impl Iterator<Item = VcxResult<String>> + 'static,
    ) -> VcxResult<Self> {
        let header = VcfHeader::new(meta_lines, columns)?;
        Ok(Self {
            header,
            lines: Box::new(records),
            index: None,
        })
    }

    pub fn with_region_index(mut self, index: Box<dyn RegionFetch>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn header(&self) -> &VcfHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut VcfHeader {
        &mut self.header
    }

    /// Replace the line cursor with the records overlapping a region. The
    /// previous cursor is discarded; an unknown contig leaves an empty one.
    pub fn set_region(
        &mut self,
        contig: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> VcxResult<()> {
        let index = self.index.as_mut().ok_or_else(|| {
            vcx_parse_error!("No index loaded: cannot retrieve records by region")
        })?;
        let fetched = index.fetch(contig, start, end)?;
        self.lines = Box::new(fetched.into_iter().map(Ok));
        Ok(())
    }

    /// Iterate the remaining data lines as records parsed against this
    /// reader's header.
    pub fn records(&mut self) -> Records<'_> {
        Records {
            header: &self.header,
            lines: &mut self.lines,
        }
    }
}

fn read_header(lines: &mut LineIter) -> VcxResult<VcfHeader> {
    let mut meta = Vec::new();
    loop {
        let line = match lines.next() {
            Some(line) => line?,
            None => {
                return Err(vcx_header_error!(
                    "No column header line (#CHROM...) found in input"
                ));
            }
        };
        if line.is_empty() {
            continue;
        }
        if line.starts_with("##") {
            meta.push(line);
        } else if line.starts_with("#CHROM") {
            let columns = line.split('\t').map(str::to_string).collect();
            return VcfHeader::new(meta, columns);
        } else {
            return Err(vcx_header_error!(
                "Unexpected line before column header: {line}"
            ));
        }
    }
}

/// Borrowing record iterator over a [`VcfReader`]; each yielded record
/// references the reader's header.
pub struct Records<'r> {
    header: &'r VcfHeader,
    lines: &'r mut LineIter,
}

impl<'r> Iterator for Records<'r> {
    type Item = VcxResult<VcfRecord<'r>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) => {
                    if line.is_empty() {
                        continue;
                    }
                    return Some(VcfRecord::new(&line, self.header));
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, io::Cursor, io::Write};
    use tempfile::tempdir;

    const VCF_TEXT: &str = "\
##fileformat=VCFv4.2
##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total depth\">
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts1
chr1\t100\t.\tA\tT\t50\tPASS\tDP=10\tGT\t0/1
chr1\t200\trs7\tG\tC\t.\tPASS\tDP=7\tGT\t1/1
";

    fn reader_from(text: &str) -> VcfReader {
        VcfReader::from_reader(Cursor::new(text.to_string())).unwrap()
    }

    #[test]
    fn reads_header_then_records() {
        let mut reader = reader_from(VCF_TEXT);
        assert_eq!(reader.header().samples(), ["s1"]);
        let records: Vec<_> = reader
            .records()
            .collect::<VcxResult<Vec<_>>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pos(), 100);
        assert_eq!(records[1].id(), "rs7");
        // records render back to their input lines
        assert_eq!(
            records[1].to_string(),
            "chr1\t200\trs7\tG\tC\t.\tPASS\tDP=7\tGT\t1/1"
        );
    }

    #[test]
    fn missing_column_header_is_a_header_error() {
        let err = VcfReader::from_reader(Cursor::new(
            "##fileformat=VCFv4.2\n".to_string(),
        ))
        .unwrap_err();
        assert!(err.to_string().contains("#CHROM"), "got: {err}");
    }

    #[test]
    fn data_line_before_column_header_is_a_header_error() {
        let err = VcfReader::from_reader(Cursor::new(
            "##fileformat=VCFv4.2\nchr1\t1\t.\tA\tT\t.\tPASS\tDP=1\n".to_string(),
        ))
        .unwrap_err();
        assert!(err.to_string().contains("Unexpected line"), "got: {err}");
    }

    #[test]
    fn malformed_record_surfaces_from_the_pull() {
        let text = "\
##fileformat=VCFv4.2
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO
chr1\t100\t.\tA\tT\t.\tPASS\tDP=1
chr1\tbad\t.\tA\tT\t.\tPASS\tDP=1
";
        let mut reader = reader_from(text);
        let mut records = reader.records();
        assert!(records.next().unwrap().is_ok());
        assert!(records.next().unwrap().is_err());
    }

    #[test]
    fn from_parts_matches_the_text_path() {
        let meta = vec![
            "##fileformat=VCFv4.2".to_string(),
            "##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total depth\">".to_string(),
        ];
        let columns: Vec<String> = "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO"
            .split('\t')
            .map(str::to_string)
            .collect();
        let lines = vec![Ok("chr2\t5\t.\tC\tG\t.\tPASS\tDP=3".to_string())];
        let mut reader = VcfReader::from_parts(meta, columns, lines.into_iter()).unwrap();
        let records: Vec<_> = reader
            .records()
            .collect::<VcxResult<Vec<_>>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].chrom(), "chr2");
    }

    struct StubIndex {
        regions: HashMap<String, Vec<String>>,
    }

    impl RegionFetch for StubIndex {
        fn fetch(
            &mut self,
            contig: &str,
            _start: Option<u64>,
            _end: Option<u64>,
        ) -> VcxResult<Vec<String>> {
            Ok(self.regions.get(contig).cloned().unwrap_or_default())
        }
    }

    #[test]
    fn set_region_swaps_the_cursor() {
        let index = StubIndex {
            regions: HashMap::from([(
                "chr2".to_string(),
                vec!["chr2\t300\t.\tC\tG\t.\tPASS\tDP=3\tGT\t0/1".to_string()],
            )]),
        };
        let mut reader = reader_from(VCF_TEXT).with_region_index(Box::new(index));
        reader.set_region("chr2", Some(250), Some(400)).unwrap();
        {
            let records: Vec<_> = reader
                .records()
                .collect::<VcxResult<Vec<_>>>()
                .unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].pos(), 300);
        }

        // unknown contig leaves an empty cursor rather than erroring
        reader.set_region("chrX", None, None).unwrap();
        assert_eq!(reader.records().count(), 0);
    }

    #[test]
    fn set_region_without_an_index_is_an_error() {
        let mut reader = reader_from(VCF_TEXT);
        let err = reader.set_region("chr1", None, None).unwrap_err();
        assert!(err.to_string().contains("No index"), "got: {err}");
    }

    #[test]
    fn reads_gzip_compressed_files() {
        use flate2::{write::GzEncoder, Compression};
        let dir = tempdir().expect("temp dir should be created");
        let path = dir.path().join("test.vcf.gz");
        let file = File::create(&path).expect("temp file should be created");
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder
            .write_all(VCF_TEXT.as_bytes())
            .expect("gzip write should succeed");
        encoder.finish().expect("gzip finish should succeed");

        let mut reader = VcfReader::from_path(&path).unwrap();
        assert_eq!(reader.records().count(), 2);
    }

    #[test]
    fn plain_text_with_gz_extension_is_rejected() {
        let dir = tempdir().expect("temp dir should be created");
        let path = dir.path().join("not_really.vcf.gz");
        std::fs::write(&path, VCF_TEXT).expect("temp file should be written");
        let err = VcfReader::from_path(&path).unwrap_err();
        assert!(matches!(err, VcxError::InvalidGzipHeader { .. }));
    }
}
