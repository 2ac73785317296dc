use crate::events::{DataValue, EVENT_STATUS_COMPLETED, EventPayload};
use crate::mapping::{MappingTable, OrgUnitMapping};
use crate::source::{ASSESSMENT_DATE_COLUMN, FACILITY_COLUMN, SourceRow};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UnmappedOrgUnit,
}

impl SkipReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnmappedOrgUnit => "unmapped org unit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipSignal {
    pub reason: SkipReason,
    pub facility: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Ready(EventPayload),
    Skip(SkipSignal),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("value {value:?} in column `{column}` is not in option set {option_set} of data element {data_element}")]
    OptionValueUnmapped {
        data_element: String,
        option_set: String,
        column: String,
        value: String,
    },
    #[error("row has no `ASSESSMENT_DATE` value")]
    MissingAssessmentDate,
}

pub fn build_event(
    row: &SourceRow,
    mapping: &MappingTable,
    org_units: &OrgUnitMapping,
    program: &str,
    event_uid: &str,
) -> Result<BuildOutcome, BuildError> {
    let facility = row.get(FACILITY_COLUMN);
    let Some(org_unit) = facility.and_then(|f| org_units.resolve(f)) else {
        return Ok(BuildOutcome::Skip(SkipSignal {
            reason: SkipReason::UnmappedOrgUnit,
            facility: facility.map(ToString::to_string),
        }));
    };

    let assessment_date = row
        .get(ASSESSMENT_DATE_COLUMN)
        .ok_or(BuildError::MissingAssessmentDate)?;

    let mut data_values = Vec::with_capacity(mapping.data_elements.len());
    for de in &mapping.data_elements {
        let Some(raw) = row.get(&de.column) else {
            continue;
        };
        let value = match &de.option_set {
            Some(options) => options
                .translate(raw)
                .ok_or_else(|| BuildError::OptionValueUnmapped {
                    data_element: de.label(),
                    option_set: options.id.clone().unwrap_or_else(|| "-".to_string()),
                    column: de.column.clone(),
                    value: raw.to_string(),
                })?,
            None => raw,
        };
        data_values.push(DataValue {
            data_element: de.id.clone(),
            value: value.to_string(),
        });
    }

    Ok(BuildOutcome::Ready(EventPayload {
        event: event_uid.to_string(),
        occurred_at: assessment_date.to_string(),
        completed_at: assessment_date.to_string(),
        status: EVENT_STATUS_COMPLETED.to_string(),
        org_unit: org_unit.to_string(),
        data_values,
        program: program.to_string(),
    }))
}
