pub mod cli;
pub mod commands;
pub mod error;

pub mod core {
    pub mod allele;
    pub mod field_types;
    pub mod header;
    pub mod record;
    #[cfg(test)]
    pub mod test_utils;
}

pub mod io {
    pub mod vcf_reader;
}

pub mod utils {
    pub mod util;
}

pub mod constants;

pub use constants::*;
