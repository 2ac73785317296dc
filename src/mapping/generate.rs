use crate::json::to_pretty_bytes;
use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct GenerateCommand {
    pub data_elements: PathBuf,
    pub option_sets: PathBuf,
    pub metadata: PathBuf,
    pub program_id: String,
    pub program_name: String,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateReport {
    pub mapped: usize,
    pub unmapped: Vec<(String, String)>,
    pub option_sets_attached: usize,
    pub option_sets_missing: Vec<(String, String)>,
}

pub fn generate_mapping_files(cmd: &GenerateCommand) -> Result<GenerateReport> {
    let columns: BTreeMap<String, String> = read_json(&cmd.data_elements)?;
    let option_sets: BTreeMap<String, BTreeMap<String, String>> = read_json(&cmd.option_sets)?;
    let metadata: Value = read_json(&cmd.metadata)?;

    let (generated, report) = generate_mapping(
        &columns,
        &option_sets,
        metadata,
        &cmd.program_id,
        &cmd.program_name,
    )?;

    if let Some(parent) = cmd.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir {}", parent.display()))?;
    }
    std::fs::write(&cmd.output, to_pretty_bytes(&generated)?)
        .with_context(|| format!("write mapping {}", cmd.output.display()))?;
    Ok(report)
}

/// Attaches source columns and option-set value mappings to every data element of
/// an exported program. `columns` maps source column -> data element UID.
pub fn generate_mapping(
    columns: &BTreeMap<String, String>,
    option_sets: &BTreeMap<String, BTreeMap<String, String>>,
    metadata: Value,
    program_id: &str,
    program_name: &str,
) -> Result<(Value, GenerateReport)> {
    let by_uid = invert_columns(columns)?;
    let mut report = GenerateReport::default();

    let mut metadata = match metadata {
        Value::Object(map) => map,
        _ => bail!("program metadata must be a JSON object"),
    };
    let stages = metadata
        .remove("programStages")
        .ok_or_else(|| anyhow!("program metadata has no `programStages`"))?;
    let Value::Array(mut stages) = stages else {
        bail!("`programStages` must be an array");
    };

    for stage in &mut stages {
        let Some(elements) = stage
            .get_mut("programStageDataElements")
            .and_then(Value::as_array_mut)
        else {
            continue;
        };
        for element in elements {
            let Some(de) = element.get_mut("dataElement").and_then(Value::as_object_mut) else {
                continue;
            };
            attach_to_data_element(de, &by_uid, option_sets, &mut report);
        }
    }

    let generated = json!({
        "programStages": stages,
        "program_id": program_id,
        "program_name": program_name,
    });
    Ok((generated, report))
}

fn attach_to_data_element(
    de: &mut Map<String, Value>,
    by_uid: &BTreeMap<&str, &str>,
    option_sets: &BTreeMap<String, BTreeMap<String, String>>,
    report: &mut GenerateReport,
) {
    let uid = de
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let name = de
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match by_uid.get(uid.as_str()) {
        Some(column) => {
            de.insert("column".to_string(), Value::String(column.to_string()));
            report.mapped += 1;
        }
        None => {
            tracing::warn!(data_element = %uid, name = %name, "data element missing from column mapping");
            report.unmapped.push((uid.clone(), name.clone()));
        }
    }

    let option_set_id = de
        .get("optionSet")
        .and_then(|os| os.get("id"))
        .and_then(Value::as_str)
        .map(ToString::to_string);
    if let Some(set_id) = option_set_id {
        match option_sets.get(&set_id) {
            Some(values) => {
                de.insert("optionSet-mapping".to_string(), json!(values));
                report.option_sets_attached += 1;
            }
            None => {
                tracing::warn!(data_element = %uid, option_set = %set_id, "option set has no value mapping");
                report.option_sets_missing.push((uid, set_id));
            }
        }
    }
}

fn invert_columns(columns: &BTreeMap<String, String>) -> Result<BTreeMap<&str, &str>> {
    let mut by_uid = BTreeMap::new();
    for (column, uid) in columns {
        if let Some(previous) = by_uid.insert(uid.as_str(), column.as_str()) {
            bail!("data element {uid} is mapped from both `{previous}` and `{column}`");
        }
    }
    Ok(by_uid)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::parse_mapping_table;

    fn metadata() -> Value {
        json!({
            "programStages": [{
                "id": "ps1",
                "name": "Assessment",
                "programStageDataElements": [
                    {"compulsory": true, "dataElement": {"id": "DE_X", "name": "Hand hygiene", "valueType": "TEXT",
                        "optionSet": {"id": "OS_YN", "name": "Yes/No", "options": []}}},
                    {"compulsory": false, "dataElement": {"id": "DE_Y", "name": "Beds", "valueType": "NUMBER"}},
                    {"compulsory": false, "dataElement": {"id": "DE_Z", "name": "Unused", "valueType": "TEXT"}}
                ]
            }]
        })
    }

    #[test]
    fn attaches_columns_and_option_sets() {
        let columns = BTreeMap::from([
            ("X".to_string(), "DE_X".to_string()),
            ("BEDS".to_string(), "DE_Y".to_string()),
        ]);
        let option_sets = BTreeMap::from([(
            "OS_YN".to_string(),
            BTreeMap::from([
                ("1".to_string(), "Yes".to_string()),
                ("2".to_string(), "No".to_string()),
            ]),
        )]);

        let (generated, report) =
            generate_mapping(&columns, &option_sets, metadata(), "Nep6qUpNTNn", "IPC - SIPCA")
                .unwrap();

        assert_eq!(report.mapped, 2);
        assert_eq!(report.option_sets_attached, 1);
        assert_eq!(
            report.unmapped,
            vec![("DE_Z".to_string(), "Unused".to_string())]
        );
        let de = &generated["programStages"][0]["programStageDataElements"][0]["dataElement"];
        assert_eq!(de["column"], "X");
        assert_eq!(de["optionSet-mapping"]["1"], "Yes");
        assert_eq!(generated["program_id"], "Nep6qUpNTNn");
        assert_eq!(generated["programStages"][0]["name"], "Assessment");
    }

    #[test]
    fn fully_mapped_output_loads_as_mapping_table() {
        let columns = BTreeMap::from([
            ("X".to_string(), "DE_X".to_string()),
            ("BEDS".to_string(), "DE_Y".to_string()),
            ("UNUSED".to_string(), "DE_Z".to_string()),
        ]);
        let option_sets = BTreeMap::from([(
            "OS_YN".to_string(),
            BTreeMap::from([("1".to_string(), "Yes".to_string())]),
        )]);
        let (generated, report) =
            generate_mapping(&columns, &option_sets, metadata(), "P1", "Program").unwrap();
        assert!(report.unmapped.is_empty());

        let table = parse_mapping_table(&generated.to_string(), "generated").unwrap();
        assert_eq!(table.program_id.as_deref(), Some("P1"));
        assert_eq!(table.data_elements.len(), 3);
        assert_eq!(table.data_elements[1].column, "BEDS");
    }

    #[test]
    fn rejects_uid_mapped_from_two_columns() {
        let columns = BTreeMap::from([
            ("A".to_string(), "DE_X".to_string()),
            ("B".to_string(), "DE_X".to_string()),
        ]);
        let err = generate_mapping(&columns, &BTreeMap::new(), metadata(), "P1", "P")
            .unwrap_err();
        assert!(format!("{err}").contains("mapped from both"));
    }

    #[test]
    fn writes_generated_file() {
        let tmp = tempfile::tempdir().unwrap();
        let de_path = tmp.path().join("mapping_de.json");
        let os_path = tmp.path().join("mapping_optionSet.json");
        let meta_path = tmp.path().join("metadata.json");
        std::fs::write(&de_path, r#"{"X": "DE_X"}"#).unwrap();
        std::fs::write(&os_path, r#"{"OS_YN": {"1": "Yes"}}"#).unwrap();
        std::fs::write(&meta_path, metadata().to_string()).unwrap();

        let output = tmp.path().join("out").join("mapping_generated.json");
        let report = generate_mapping_files(&GenerateCommand {
            data_elements: de_path,
            option_sets: os_path,
            metadata: meta_path,
            program_id: "P1".to_string(),
            program_name: "Program".to_string(),
            output: output.clone(),
        })
        .unwrap();
        assert_eq!(report.mapped, 1);

        let written = std::fs::read_to_string(&output).unwrap();
        assert!(written.starts_with("{\n    \"programStages\""));
    }
}
