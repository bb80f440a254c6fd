use crate::{error::VcxResult, vcx_parse_error};
use once_cell::sync::Lazy;
use std::{cell::RefCell, collections::HashMap, fmt};

/// Value class a declared `Type` maps to. `Flag` fields carry no value and
/// decode to presence only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    Flag,
    Str,
    Int,
    Float,
}

impl ValueClass {
    /// Convert a single non-missing token. `None` means the token does not
    /// parse as this class; the caller owns the error message since it knows
    /// the field name and record coordinate.
    pub fn convert(&self, token: &str) -> Option<Scalar> {
        match self {
            ValueClass::Str => Some(Scalar::Str(token.to_string())),
            ValueClass::Int => token.parse::<i64>().ok().map(Scalar::Int),
            ValueClass::Float => token.parse::<f64>().ok().map(Scalar::Float),
            ValueClass::Flag => None,
        }
    }
}

/// Resolved decoding rule for one INFO or FORMAT field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub class: ValueClass,
    pub multi: bool,
}

impl FieldSpec {
    /// Derive a spec from the declared `Number` and `Type` of a metaheader
    /// line. A field is multi-valued unless `Number` is a fixed count of at
    /// most one; the symbolic codes (A, G, R, .) always split.
    pub fn from_declaration(number: &str, type_name: &str) -> VcxResult<Self> {
        let class = match type_name {
            "String" | "Character" => ValueClass::Str,
            "Float" => ValueClass::Float,
            "Integer" => ValueClass::Int,
            "Flag" => ValueClass::Flag,
            other => {
                return Err(vcx_parse_error!(
                    "Unrecognised field Type '{other}' in header"
                ));
            }
        };
        let multi = match number.parse::<u64>() {
            Ok(n) => n > 1,
            Err(_) => true,
        };
        Ok(Self { class, multi })
    }
}

const fn spec(class: ValueClass, multi: bool) -> FieldSpec {
    FieldSpec { class, multi }
}

/// Well-known INFO fields used as a fallback when a record references a
/// field the header never declared.
static COMMON_INFO: Lazy<HashMap<&'static str, FieldSpec>> = Lazy::new(|| {
    use ValueClass::*;
    HashMap::from([
        ("1000G", spec(Flag, false)),
        ("AA", spec(Str, false)),
        ("AC", spec(Int, true)),
        ("AF", spec(Float, true)),
        ("AN", spec(Int, false)),
        ("BQ", spec(Float, false)),
        ("CIGAR", spec(Str, false)),
        ("DB", spec(Flag, false)),
        ("DP", spec(Int, false)),
        ("END", spec(Int, false)),
        ("H2", spec(Flag, false)),
        ("H3", spec(Flag, false)),
        ("MQ", spec(Float, false)),
        ("MQ0", spec(Int, false)),
        ("NS", spec(Int, false)),
        ("SB", spec(Str, false)),
        ("SOMATIC", spec(Flag, false)),
        ("VALIDATED", spec(Flag, false)),
        // structural variants
        ("BKPTID", spec(Str, false)),
        ("CICN", spec(Int, true)),
        ("CICNADJ", spec(Int, false)),
        ("CIEND", spec(Int, true)),
        ("CILEN", spec(Int, true)),
        ("CIPOS", spec(Int, true)),
        ("CN", spec(Int, false)),
        ("CNADJ", spec(Int, false)),
        ("DBRIPID", spec(Str, false)),
        ("DBVARID", spec(Str, false)),
        ("DGVID", spec(Str, false)),
        ("DPADJ", spec(Int, false)),
        ("EVENT", spec(Str, false)),
        ("HOMLEN", spec(Int, false)),
        ("HOMSEQ", spec(Str, false)),
        ("IMPRECISE", spec(Flag, false)),
        ("MATEID", spec(Str, false)),
        ("MEINFO", spec(Str, true)),
        ("METRANS", spec(Str, true)),
        ("NOVEL", spec(Flag, false)),
        ("PARID", spec(Str, false)),
        ("SVLEN", spec(Int, false)),
        ("SVTYPE", spec(Str, false)),
    ])
});

/// Well-known genotype FORMAT fields, same role as [`COMMON_INFO`].
static COMMON_FORMAT: Lazy<HashMap<&'static str, FieldSpec>> = Lazy::new(|| {
    use ValueClass::*;
    HashMap::from([
        ("DP", spec(Int, false)),
        ("EC", spec(Int, true)),
        ("FT", spec(Str, false)),
        ("GL", spec(Float, true)),
        ("GLE", spec(Str, false)),
        ("GP", spec(Float, true)),
        ("GQ", spec(Int, false)),
        ("GT", spec(Str, false)),
        ("HQ", spec(Int, true)),
        ("MQ", spec(Int, false)),
        ("PL", spec(Int, false)),
        ("PQ", spec(Int, false)),
        ("PS", spec(Int, false)),
        // structural variants
        ("CN", spec(Int, false)),
        ("CNQ", spec(Float, false)),
        ("CNL", spec(Float, false)),
        ("NQ", spec(Int, false)),
        ("HAP", spec(Int, false)),
        ("AHAP", spec(Int, false)),
    ])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Info,
    Format,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Info => write!(f, "INFO"),
            FieldKind::Format => write!(f, "FORMAT"),
        }
    }
}

/// Per-header registry of field name to decoding rule.
///
/// Declared fields are inserted while the header is parsed; undeclared
/// fields referenced by records are resolved against the common-field table
/// and cached here, so lookups stay interior to a shared `&VcfHeader`.
#[derive(Debug, Default)]
pub struct FieldRegistry {
    kind: Option<FieldKind>,
    specs: RefCell<HashMap<String, FieldSpec>>,
}

impl FieldRegistry {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind: Some(kind),
            specs: RefCell::new(HashMap::new()),
        }
    }

    pub fn insert(&self, name: &str, spec: FieldSpec) {
        self.specs.borrow_mut().insert(name.to_string(), spec);
    }

    /// Declared spec only, no fallback.
    pub fn get(&self, name: &str) -> Option<FieldSpec> {
        self.specs.borrow().get(name).copied()
    }

    /// Resolve a field spec, falling back to the built-in table of
    /// well-known fields. A fallback hit is cached so the lookup is done at
    /// most once per header.
    pub fn resolve(&self, name: &str) -> Option<FieldSpec> {
        if let Some(found) = self.specs.borrow().get(name) {
            return Some(*found);
        }
        let table = match self.kind? {
            FieldKind::Info => &COMMON_INFO,
            FieldKind::Format => &COMMON_FORMAT,
        };
        let spec = table.get(name).copied()?;
        self.specs.borrow_mut().insert(name.to_string(), spec);
        Some(spec)
    }
}

/// One decoded INFO or FORMAT value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Str(String),
}

/// A typed field value after decoding. Missing values (`.`) map to `None`
/// slots; `Genotype` is the special-cased decoding of `GT`.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Flag,
    Scalar(Option<Scalar>),
    List(Vec<Option<Scalar>>),
    Genotype(Vec<Option<u32>>),
}

impl TypedValue {
    pub fn as_genotype(&self) -> Option<&[Option<u32>]> {
        match self {
            TypedValue::Genotype(alleles) => Some(alleles),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            TypedValue::Scalar(Some(Scalar::Int(v))) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            TypedValue::Scalar(Some(Scalar::Float(v))) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::Scalar(Some(Scalar::Str(v))) => Some(v),
            _ => None,
        }
    }
}
