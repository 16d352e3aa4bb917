//! # Genotype consumers
//!
//! Decoding a genotype block pushes values into a [`GenotypeConsumer`] rather than
//! returning a materialised matrix. Each step of the protocol has a default no-op
//! implementation, so a consumer only implements the callbacks it cares about.
//!
//! For every block the decoder calls, in order:
//!
//! 1. `initialise(number_of_samples, number_of_alleles)`
//! 2. `set_min_max_ploidy(min, max)`
//! 3. for each sample: `set_sample(i)`; if that returns `true`,
//!    `set_number_of_entries(..)` followed by one `set_value` or `set_missing`
//!    call per entry
//! 4. `finalise()`

use auto_impl::auto_impl;

use super::genotype::{GenotypeBlock, SampleGenotype};
use crate::error::Result;

/// How the entries of a sample are arranged
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderType {
    /// One probability per unordered genotype, in colex order
    PerUnorderedGenotype,
    /// One probability per allele for each haplotype in turn
    PerPhasedHaplotypePerAllele,
}

/// What the entries of a sample represent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    Probability,
}

/// Receives decoded genotype data one value at a time
#[auto_impl(&mut, Box)]
pub trait GenotypeConsumer {
    fn initialise(&mut self, _number_of_samples: usize, _number_of_alleles: usize) {}

    /// Optional hint with the ploidy range of the block
    fn set_min_max_ploidy(&mut self, _min_ploidy: u8, _max_ploidy: u8) {}

    /// Announces sample `i`; returning `false` skips its values
    fn set_sample(&mut self, _i: usize) -> bool {
        true
    }

    fn set_number_of_entries(
        &mut self,
        _ploidy: u8,
        _number_of_entries: usize,
        _order: OrderType,
        _value_type: ValueType,
    ) {
    }

    fn set_value(&mut self, _entry: usize, _value: f64) -> Result<()> {
        Ok(())
    }

    fn set_missing(&mut self, _entry: usize) -> Result<()> {
        Ok(())
    }

    fn finalise(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects a decoded block into a [`GenotypeBlock`]
#[derive(Debug, Default)]
pub struct GenotypeBlockBuilder {
    number_of_alleles: u16,
    samples: Vec<SampleGenotype>,
}
impl GenotypeBlockBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the builder, attaching the block-level fields the consumer
    /// protocol does not carry
    #[must_use]
    pub fn build(self, phased: bool, bits: u8) -> GenotypeBlock {
        GenotypeBlock {
            number_of_alleles: self.number_of_alleles,
            phased,
            bits,
            samples: self.samples,
        }
    }

    fn current(&mut self) -> &mut SampleGenotype {
        // set_sample always pushes before any entry arrives
        let last = self.samples.len() - 1;
        &mut self.samples[last]
    }
}
impl GenotypeConsumer for GenotypeBlockBuilder {
    fn initialise(&mut self, number_of_samples: usize, number_of_alleles: usize) {
        self.samples.clear();
        self.samples.reserve(number_of_samples);
        self.number_of_alleles = number_of_alleles as u16;
    }

    fn set_sample(&mut self, _i: usize) -> bool {
        self.samples.push(SampleGenotype::default());
        true
    }

    fn set_number_of_entries(
        &mut self,
        ploidy: u8,
        number_of_entries: usize,
        _order: OrderType,
        _value_type: ValueType,
    ) {
        let sample = self.current();
        sample.ploidy = ploidy;
        sample.probabilities.reserve(number_of_entries);
    }

    fn set_value(&mut self, _entry: usize, value: f64) -> Result<()> {
        self.current().probabilities.push(value);
        Ok(())
    }

    fn set_missing(&mut self, _entry: usize) -> Result<()> {
        self.current().missing = true;
        Ok(())
    }
}
