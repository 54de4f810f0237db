use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

/// NCBI taxonomy identifier, kept in its decimal string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxId(String);

impl TaxId {
    pub const ROOT: &'static str = "1";

    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    /// Numeric value used for ordering records on disk.
    pub fn numeric(&self) -> u64 {
        self.0.parse().unwrap_or(u64::MAX)
    }
}

impl AsRef<str> for TaxId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty() && normalized.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(KiraError::InvalidTaxId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// GO evidence codes accepted in gene association files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvidenceCode {
    Exp,
    Ida,
    Ipi,
    Imp,
    Igi,
    Iep,
    Iss,
    Isa,
    Iso,
    Ism,
    Igc,
    Rca,
    Tas,
    Nas,
    Ic,
    Nd,
    Iea,
    Nr,
}

impl EvidenceCode {
    pub const ALL: [EvidenceCode; 18] = [
        EvidenceCode::Exp,
        EvidenceCode::Ida,
        EvidenceCode::Ipi,
        EvidenceCode::Imp,
        EvidenceCode::Igi,
        EvidenceCode::Iep,
        EvidenceCode::Iss,
        EvidenceCode::Isa,
        EvidenceCode::Iso,
        EvidenceCode::Ism,
        EvidenceCode::Igc,
        EvidenceCode::Rca,
        EvidenceCode::Tas,
        EvidenceCode::Nas,
        EvidenceCode::Ic,
        EvidenceCode::Nd,
        EvidenceCode::Iea,
        EvidenceCode::Nr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceCode::Exp => "EXP",
            EvidenceCode::Ida => "IDA",
            EvidenceCode::Ipi => "IPI",
            EvidenceCode::Imp => "IMP",
            EvidenceCode::Igi => "IGI",
            EvidenceCode::Iep => "IEP",
            EvidenceCode::Iss => "ISS",
            EvidenceCode::Isa => "ISA",
            EvidenceCode::Iso => "ISO",
            EvidenceCode::Ism => "ISM",
            EvidenceCode::Igc => "IGC",
            EvidenceCode::Rca => "RCA",
            EvidenceCode::Tas => "TAS",
            EvidenceCode::Nas => "NAS",
            EvidenceCode::Ic => "IC",
            EvidenceCode::Nd => "ND",
            EvidenceCode::Iea => "IEA",
            EvidenceCode::Nr => "NR",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            EvidenceCode::Exp => "inferred from experiment",
            EvidenceCode::Ida => "inferred from direct assay",
            EvidenceCode::Ipi => "inferred from physical interaction",
            EvidenceCode::Imp => "inferred from mutant phenotype",
            EvidenceCode::Igi => "inferred from genetic interaction",
            EvidenceCode::Iep => "inferred from expression pattern",
            EvidenceCode::Iss => "inferred from sequence or structural similarity",
            EvidenceCode::Isa => "inferred from sequence alignment",
            EvidenceCode::Iso => "inferred from sequence orthology",
            EvidenceCode::Ism => "inferred from sequence model",
            EvidenceCode::Igc => "inferred from genomic context",
            EvidenceCode::Rca => "inferred from reviewed computational analysis",
            EvidenceCode::Tas => "traceable author statement",
            EvidenceCode::Nas => "non-traceable author statement",
            EvidenceCode::Ic => "inferred by curator",
            EvidenceCode::Nd => "no biological data available",
            EvidenceCode::Iea => "inferred from electronic annotation",
            EvidenceCode::Nr => "not recorded",
        }
    }
}

impl fmt::Display for EvidenceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EvidenceCode {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        EvidenceCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == normalized)
            .ok_or_else(|| KiraError::InvalidEvidenceCode(value.to_string()))
    }
}

/// GO aspect (ontology namespace) of an annotation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
pub enum Aspect {
    #[serde(rename = "P")]
    #[value(name = "P", alias = "p")]
    Process,
    #[serde(rename = "F")]
    #[value(name = "F", alias = "f")]
    Function,
    #[serde(rename = "C")]
    #[value(name = "C", alias = "c")]
    Component,
}

impl Aspect {
    pub const ALL: [Aspect; 3] = [Aspect::Process, Aspect::Function, Aspect::Component];

    pub fn code(&self) -> char {
        match self {
            Aspect::Process => 'P',
            Aspect::Function => 'F',
            Aspect::Component => 'C',
        }
    }

    pub fn namespace(&self) -> &'static str {
        match self {
            Aspect::Process => "biological_process",
            Aspect::Function => "molecular_function",
            Aspect::Component => "cellular_component",
        }
    }

    pub fn from_namespace(namespace: &str) -> Option<Self> {
        Aspect::ALL
            .iter()
            .copied()
            .find(|aspect| aspect.namespace() == namespace)
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Aspect {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "P" | "p" => Ok(Aspect::Process),
            "F" | "f" => Ok(Aspect::Function),
            "C" | "c" => Ok(Aspect::Component),
            other => {
                Aspect::from_namespace(other).ok_or_else(|| KiraError::InvalidAspect(value.to_string()))
            }
        }
    }
}
