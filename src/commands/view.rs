use crate::{cli::ViewArgs, io::vcf_reader::VcfReader, utils::util::Result};
use std::{
    fs::File,
    io::{BufWriter, Write},
};

/// Re-render a VCF from the parsed model: header first, then each record.
/// With `--strict`, every INFO and genotype field is decoded on the way
/// through, so type errors surface at the offending record instead of being
/// passed along untouched.
pub fn view(args: ViewArgs) -> Result<()> {
    let mut reader = match &args.input {
        Some(path) => VcfReader::from_path(path)?,
        None => VcfReader::from_reader(std::io::stdin().lock())?,
    };
    let mut writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };

    let n_samples = reader.header().samples().len();
    log::debug!("Parsed header with {n_samples} samples");

    let header_text = reader.header_mut().to_vcf_string();
    writer.write_all(header_text.as_bytes())?;
    if args.print_header {
        writer.flush()?;
        return Ok(());
    }

    let mut n_records = 0usize;
    for record in reader.records() {
        let record = record?;
        if args.strict {
            record.typed_info(None)?;
            if record.format().is_some() {
                record.typed_gts(None, None)?;
            }
        }
        writeln!(writer, "{record}")?;
        n_records += 1;
    }
    writer.flush()?;
    log::info!("Wrote {n_records} records");
    Ok(())
}
