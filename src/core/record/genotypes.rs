use super::VcfRecord;
use crate::{
    constants::{MISSING_VALUE, PHASE_GT_FIELD, PHASE_ID_FIELD},
    core::field_types::{FieldKind, TypedValue, ValueClass},
    error::VcxResult,
    vcx_parse_error,
};
use std::{
    cell::Ref,
    collections::HashMap,
};

const GT_FIELD: &str = "GT";

impl<'h> VcfRecord<'h> {
    fn ensure_call(&self, sample: &str) -> VcxResult<()> {
        if self.calls.borrow().contains_key(sample) {
            return Ok(());
        }
        let col = self
            .header
            .sample_column(sample)
            .ok_or_else(|| vcx_parse_error!("Sample {sample} is not in VCF"))?;
        let format = self.format.as_ref().ok_or_else(|| {
            vcx_parse_error!("Record at {}:{} has no FORMAT column", self.chrom, self.pos)
        })?;
        let raw = self.cols.get(col).ok_or_else(|| {
            vcx_parse_error!(
                "Missing call column for sample {sample} at {}:{}",
                self.chrom,
                self.pos
            )
        })?;
        // trailing FORMAT fields may be dropped from a call
        let call: HashMap<String, String> = format
            .iter()
            .cloned()
            .zip(raw.split(':').map(str::to_string))
            .collect();
        let mut calls = self.calls.borrow_mut();
        calls.insert(sample.to_string(), call);
        if calls.len() == self.header.samples().len() {
            self.all_calls_split.set(true);
        }
        Ok(())
    }

    /// Raw genotype strings for one sample, keyed by FORMAT field name. The
    /// `:`-split is done once per sample and cached.
    pub fn sample_call(&self, sample: &str) -> VcxResult<Ref<'_, HashMap<String, String>>> {
        self.ensure_call(sample)?;
        Ref::filter_map(self.calls.borrow(), |calls| calls.get(sample))
            .map_err(|_| vcx_parse_error!("Sample {sample} is not in VCF"))
    }

    /// Raw genotype strings for every sample. Samples already split are not
    /// re-split; once all are cached a completeness flag short-circuits the
    /// population pass.
    pub fn sample_calls(
        &self,
    ) -> VcxResult<Ref<'_, HashMap<String, HashMap<String, String>>>> {
        if !self.all_calls_split.get() {
            for sample in self.header.samples() {
                self.ensure_call(sample)?;
            }
            self.all_calls_split.set(true);
        }
        Ok(self.calls.borrow())
    }

    /// Decode genotype fields into typed values, for the requested samples
    /// and fields (all of each when `None`). Results merge into a per-field,
    /// per-sample cache so overlapping requests never recompute an entry.
    ///
    /// `GT` is special-cased regardless of its declared type: allele indices
    /// split on `/` or `|`, with an all-`.` value decoding to a no-call of
    /// `None` slots.
    pub fn typed_gts(
        &self,
        samples: Option<&[&str]>,
        fields: Option<&[&str]>,
    ) -> VcxResult<HashMap<String, HashMap<String, TypedValue>>> {
        let field_list: Vec<String> = match fields {
            Some(fields) => fields.iter().map(|f| f.to_string()).collect(),
            None => self
                .format
                .clone()
                .ok_or_else(|| {
                    vcx_parse_error!(
                        "Record at {}:{} has no FORMAT column",
                        self.chrom,
                        self.pos
                    )
                })?,
        };
        let sample_list: Vec<String> = match samples {
            Some(samples) => samples.iter().map(|s| s.to_string()).collect(),
            None => self.header.samples().to_vec(),
        };

        let mut out: HashMap<String, HashMap<String, TypedValue>> = HashMap::new();
        for field in &field_list {
            let mut per_sample = HashMap::with_capacity(sample_list.len());
            let missing: Vec<String> = {
                let cache = self.typed_gt_cache.borrow();
                let cached = cache.get(field);
                for sample in &sample_list {
                    if let Some(value) = cached.and_then(|m| m.get(sample)) {
                        per_sample.insert(sample.clone(), value.clone());
                    }
                }
                sample_list
                    .iter()
                    .filter(|s| !per_sample.contains_key(*s))
                    .cloned()
                    .collect()
            };
            for sample in missing {
                let raw = {
                    let call = self.sample_call(&sample)?;
                    call.get(field).cloned()
                };
                let typed = self.decode_gt_value(field, raw.as_deref())?;
                per_sample.insert(sample, typed);
            }
            self.typed_gt_cache
                .borrow_mut()
                .entry(field.clone())
                .or_default()
                .extend(per_sample.iter().map(|(k, v)| (k.clone(), v.clone())));
            out.insert(field.clone(), per_sample);
        }
        Ok(out)
    }

    fn decode_gt_value(&self, field: &str, raw: Option<&str>) -> VcxResult<TypedValue> {
        if field == GT_FIELD {
            let value = raw.ok_or_else(|| {
                vcx_parse_error!("Missing GT value at {}:{}", self.chrom, self.pos)
            })?;
            let tokens: Vec<&str> = value.split(['/', '|']).collect();
            let parsed: Result<Vec<u32>, _> =
                tokens.iter().map(|t| t.parse::<u32>()).collect();
            return match parsed {
                Ok(alleles) => Ok(TypedValue::Genotype(
                    alleles.into_iter().map(Some).collect(),
                )),
                Err(_) => {
                    if tokens.iter().all(|t| *t == MISSING_VALUE) {
                        Ok(TypedValue::Genotype(vec![None; tokens.len()]))
                    } else {
                        Err(vcx_parse_error!(
                            "Could not parse GT '{value}' at {}:{}",
                            self.chrom,
                            self.pos
                        ))
                    }
                }
            };
        }

        let spec = self
            .header
            .registry(FieldKind::Format)
            .resolve(field)
            .ok_or_else(|| {
                vcx_parse_error!(
                    "Unrecognised FORMAT field '{field}' at {}:{}. Non-standard FORMAT \
                     fields should be represented in VCF header",
                    self.chrom,
                    self.pos
                )
            })?;
        if spec.class == ValueClass::Flag {
            return Err(vcx_parse_error!(
                "FORMAT field '{field}' at {}:{} is declared as a Flag",
                self.chrom,
                self.pos
            ));
        }
        let value = match raw {
            None => return Ok(missing_value(spec.multi)),
            Some(v) if v == MISSING_VALUE => return Ok(missing_value(spec.multi)),
            Some(v) => v,
        };
        let convert = |token: &str| {
            spec.class.convert(token).ok_or_else(|| {
                vcx_parse_error!(
                    "Unexpected value '{value}' for {field} FORMAT field at {}:{}",
                    self.chrom,
                    self.pos
                )
            })
        };
        if spec.multi {
            let values = value
                .split(',')
                .map(|t| convert(t).map(Some))
                .collect::<VcxResult<Vec<_>>>()?;
            Ok(TypedValue::List(values))
        } else {
            Ok(TypedValue::Scalar(Some(convert(value)?)))
        }
    }

    /// True when this record's `allele` and the other record's
    /// `other_allele` sit on the same haplotype for `sample`, judged by the
    /// physical-phasing PID/PGT fields. Any missing or mismatched phasing
    /// data reads as unphased.
    pub fn in_cis_with(
        &self,
        sample: &str,
        allele: u32,
        other: &VcfRecord<'_>,
        other_allele: u32,
    ) -> bool {
        let has_phasing = |record: &VcfRecord<'_>| {
            record.format.as_ref().is_some_and(|format| {
                format.iter().any(|f| f == PHASE_ID_FIELD)
                    && format.iter().any(|f| f == PHASE_GT_FIELD)
            })
        };
        if !has_phasing(self) || !has_phasing(other) {
            return false;
        }
        let fetch = |record: &VcfRecord<'_>, field: &str| -> Option<String> {
            record
                .sample_call(sample)
                .ok()
                .and_then(|call| call.get(field).cloned())
        };
        let (pid1, pid2) = match (fetch(self, PHASE_ID_FIELD), fetch(other, PHASE_ID_FIELD)) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        let (pgt1, pgt2) = match (fetch(self, PHASE_GT_FIELD), fetch(other, PHASE_GT_FIELD)) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        if pid1 != pid2 || pgt1 == MISSING_VALUE || pgt2 == MISSING_VALUE {
            return false;
        }
        let position = |pgt: &str, allele: u32| {
            let wanted = allele.to_string();
            pgt.split('|').position(|token| token == wanted)
        };
        match (position(&pgt1, allele), position(&pgt2, other_allele)) {
            (Some(a), Some(b)) => a == b,
            // allele not in the phase group
            _ => false,
        }
    }
}

fn missing_value(multi: bool) -> TypedValue {
    if multi {
        TypedValue::List(vec![None])
    } else {
        TypedValue::Scalar(None)
    }
}
