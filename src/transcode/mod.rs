//! # Transcoding
//!
//! Output formats for the variants selected by a [`View`](crate::bgen::View):
//!
//! - [`write_variant_list`]: one tab-separated line of identifying data per variant
//! - [`write_vcf`]: VCF 4.2 with `GT:GP` or `GT:HP` per sample
//! - [`transcode_to_v11`]: a layout 1 BGEN file
//! - [`copy_selected_variants`]: the selected variants copied without decoding

mod list;
mod raw;
mod v11;
mod vcf;

pub use list::{write_variant_list, LIST_COLUMNS};
pub use raw::copy_selected_variants;
pub use v11::{transcode_to_v11, DowngradeTable};
pub use vcf::{
    decimal_places, phased_call, supports_fast_path, unphased_call, write_fast_samples,
    write_general_samples, write_vcf, write_vcf_header, VcfSampleWriter, VcfTable, VcfTables,
    CALL_THRESHOLD, FAST_PATH_BITS,
};
