pub mod generate;

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path} has no program stages")]
    NoProgramStage { path: String },
    #[error("{path}: data element at index {idx} is missing `dataElement.id`")]
    MissingId { path: String, idx: usize },
    #[error("{path}: data element {id} has no source `column`; regenerate the mapping")]
    MissingColumn { path: String, id: String },
    #[error("{path}: data element {id} declares an option set but has no `optionSet-mapping`")]
    MissingOptionSetMapping { path: String, id: String },
    #[error("{path}: data element {id} is declared more than once")]
    DuplicateDataElement { path: String, id: String },
    #[error("{path}: facility {facility:?} maps to an empty org unit")]
    EmptyOrgUnit { path: String, facility: String },
}

/// Translation from raw source values to destination option codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSetMapping {
    pub id: Option<String>,
    pub values: BTreeMap<String, String>,
}

impl OptionSetMapping {
    pub fn translate(&self, raw: &str) -> Option<&str> {
        self.values.get(raw).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataElementMapping {
    pub id: String,
    pub name: Option<String>,
    pub column: String,
    pub option_set: Option<OptionSetMapping>,
}

impl DataElementMapping {
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({name})", self.id),
            None => self.id.clone(),
        }
    }
}

/// Data elements of the first program stage, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MappingTable {
    pub program_id: Option<String>,
    pub program_name: Option<String>,
    pub data_elements: Vec<DataElementMapping>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrgUnitMapping {
    units: BTreeMap<String, String>,
}

impl OrgUnitMapping {
    pub fn resolve(&self, facility: &str) -> Option<&str> {
        self.units.get(facility).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawMappingFile {
    #[serde(rename = "programStages")]
    program_stages: Option<Vec<RawProgramStage>>,
    program_id: Option<String>,
    program_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawProgramStage {
    #[serde(rename = "programStageDataElements", default)]
    data_elements: Vec<RawStageDataElement>,
}

#[derive(Debug, Deserialize)]
struct RawStageDataElement {
    #[serde(rename = "dataElement")]
    data_element: RawDataElement,
}

#[derive(Debug, Deserialize)]
struct RawDataElement {
    id: Option<String>,
    name: Option<String>,
    column: Option<String>,
    #[serde(rename = "optionSet")]
    option_set: Option<RawOptionSetRef>,
    #[serde(rename = "optionSet-mapping")]
    option_set_mapping: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct RawOptionSetRef {
    id: Option<String>,
}

pub fn load_mapping_table(path: &Path) -> Result<MappingTable, LoadError> {
    let origin = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: origin.clone(),
        source,
    })?;
    parse_mapping_table(&raw, &origin)
}

pub fn parse_mapping_table(raw: &str, origin: &str) -> Result<MappingTable, LoadError> {
    let parsed: RawMappingFile = serde_json::from_str(raw).map_err(|source| LoadError::Parse {
        path: origin.to_string(),
        source,
    })?;
    let stage = parsed
        .program_stages
        .and_then(|stages| stages.into_iter().next())
        .ok_or_else(|| LoadError::NoProgramStage {
            path: origin.to_string(),
        })?;

    let mut seen = HashSet::new();
    let mut data_elements = Vec::with_capacity(stage.data_elements.len());
    for (idx, element) in stage.data_elements.into_iter().enumerate() {
        let de = element.data_element;
        let id = non_empty(de.id).ok_or_else(|| LoadError::MissingId {
            path: origin.to_string(),
            idx,
        })?;
        if !seen.insert(id.clone()) {
            return Err(LoadError::DuplicateDataElement {
                path: origin.to_string(),
                id,
            });
        }
        let column = non_empty(de.column).ok_or_else(|| LoadError::MissingColumn {
            path: origin.to_string(),
            id: id.clone(),
        })?;
        let option_set = match (de.option_set, de.option_set_mapping) {
            (None, _) => None,
            (Some(set), Some(values)) => Some(OptionSetMapping { id: set.id, values }),
            (Some(_), None) => {
                return Err(LoadError::MissingOptionSetMapping {
                    path: origin.to_string(),
                    id,
                });
            }
        };
        data_elements.push(DataElementMapping {
            id,
            name: de.name,
            column,
            option_set,
        });
    }

    Ok(MappingTable {
        program_id: non_empty(parsed.program_id),
        program_name: parsed.program_name,
        data_elements,
    })
}

pub fn load_org_units(path: &Path) -> Result<OrgUnitMapping, LoadError> {
    let origin = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: origin.clone(),
        source,
    })?;
    parse_org_units(&raw, &origin)
}

pub fn parse_org_units(raw: &str, origin: &str) -> Result<OrgUnitMapping, LoadError> {
    let parsed: BTreeMap<String, String> =
        serde_json::from_str(raw).map_err(|source| LoadError::Parse {
            path: origin.to_string(),
            source,
        })?;
    let mut units = BTreeMap::new();
    for (facility, unit) in parsed {
        let unit = unit.trim().to_string();
        if unit.is_empty() {
            return Err(LoadError::EmptyOrgUnit {
                path: origin.to_string(),
                facility,
            });
        }
        units.insert(facility, unit);
    }
    Ok(OrgUnitMapping { units })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
