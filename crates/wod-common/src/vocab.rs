//! Fixed WOD vocabulary: observation fields, naming conventions, dimension
//! names and file subtypes.

use serde::{Deserialize, Serialize};

/// Every observation field the write path knows about.
pub const OBSERVATION_FIELDS: [&str; 9] = [
    "z",
    "Temperature",
    "Salinity",
    "Oxygen",
    "Phosphate",
    "Silicate",
    "Nitrate",
    "Chlorophyll",
    "pH",
];

pub const SIGFIGS_SUFFIX: &str = "_sigfigs";
pub const WODFLAG_SUFFIX: &str = "_WODflag";
pub const ROW_SIZE_SUFFIX: &str = "_row_size";
pub const OBS_DIM_SUFFIX: &str = "_obs";

pub const CASTS_DIM: &str = "casts";
pub const LONG_TEXT_DIM: &str = "strnlen";
pub const SHORT_TEXT_DIM: &str = "strnlensmall";
pub const INVESTIGATOR_DIM: &str = "numberofpis";

pub const LONG_TEXT_WIDTH: usize = 170;
pub const SHORT_TEXT_WIDTH: usize = 40;

pub const PRIMARY_INVESTIGATOR: &str = "Primary_Investigator";
pub const PRIMARY_INVESTIGATOR_VAR: &str = "Primary_Investigator_VAR";

/// Global attribute carrying the file classification.
pub const CLASSIFICATION_ATTR: &str = "cdm_data_type";

/// Placeholder for a cell with no value in text and tabular output.
pub const MISSING_CELL: &str = "---";

/// Text tokens that denote a missing measurement.
pub const MISSING_TOKENS: [&str; 2] = ["---", "---*---"];

/// Per-cast text fields that need the long width class.
const LONG_TEXT_FIELDS: &[&str] = &[
    "Platform",
    "Institute",
    "dataset",
    "Project",
    "Ocean_Vehicle",
    "dbase_orig",
    "Recorder",
];

pub fn row_size_key(field: &str) -> String {
    format!("{}{}", field, ROW_SIZE_SUFFIX)
}

pub fn sigfigs_key(field: &str) -> String {
    format!("{}{}", field, SIGFIGS_SUFFIX)
}

pub fn wodflag_key(field: &str) -> String {
    format!("{}{}", field, WODFLAG_SUFFIX)
}

/// Packed dimension name of an observation field.
pub fn obs_dim(field: &str) -> String {
    format!("{}{}", field, OBS_DIM_SUFFIX)
}

/// The `_sigfigs` and `_WODflag` companion names of a field.
pub fn companion_keys(field: &str) -> [String; 2] {
    [sigfigs_key(field), wodflag_key(field)]
}

/// True for an observation field or one of its sigfigs/WODflag companions.
pub fn is_observation_key(key: &str) -> bool {
    OBSERVATION_FIELDS.iter().any(|field| {
        key.strip_prefix(field)
            .map(|rest| rest.is_empty() || rest == SIGFIGS_SUFFIX || rest == WODFLAG_SUFFIX)
            .unwrap_or(false)
    })
}

pub fn is_investigator_key(key: &str) -> bool {
    key == PRIMARY_INVESTIGATOR || key == PRIMARY_INVESTIGATOR_VAR
}

/// Width class of a fixed-length text variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextWidth {
    Long,
    Short,
}

impl TextWidth {
    /// Pick the width class for a per-cast text field by name.
    pub fn for_field(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.contains("strnlensmall") {
            return TextWidth::Short;
        }
        if lower.contains("strnlen")
            || LONG_TEXT_FIELDS.contains(&name)
            || name.ends_with("_Instrument")
        {
            TextWidth::Long
        } else {
            TextWidth::Short
        }
    }

    pub fn width(self) -> usize {
        match self {
            TextWidth::Long => LONG_TEXT_WIDTH,
            TextWidth::Short => SHORT_TEXT_WIDTH,
        }
    }

    pub fn dimension(self) -> &'static str {
        match self {
            TextWidth::Long => LONG_TEXT_DIM,
            TextWidth::Short => SHORT_TEXT_DIM,
        }
    }
}

/// WOD file subtype, which decides the recognized observation fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileSubtype {
    Ctd,
    Osd,
    Xbt,
    Pfl,
    Mrb,
    Apb,
    Unknown,
}

enum Marker {
    Dimension(&'static str),
    NoDimension(&'static str),
    Variable(&'static str),
}

/// Structural markers, first match wins.
const SUBTYPE_RULES: &[(FileSubtype, &[Marker])] = &[
    (FileSubtype::Pfl, &[Marker::Dimension("pH_obs")]),
    (FileSubtype::Ctd, &[Marker::Dimension("Chlorophyll_obs")]),
    (FileSubtype::Osd, &[Marker::Dimension("Phosphate_obs")]),
    (
        FileSubtype::Xbt,
        &[
            Marker::Dimension("Temperature_obs"),
            Marker::NoDimension("Salinity_obs"),
        ],
    ),
    (FileSubtype::Mrb, &[Marker::Variable("Wind_Speed")]),
    (
        FileSubtype::Apb,
        &[Marker::Variable("Ocean_Vehicle"), Marker::Dimension("z_obs")],
    ),
];

impl FileSubtype {
    pub fn code(self) -> &'static str {
        match self {
            FileSubtype::Ctd => "CTD",
            FileSubtype::Osd => "OSD",
            FileSubtype::Xbt => "XBT",
            FileSubtype::Pfl => "PFL",
            FileSubtype::Mrb => "MRB",
            FileSubtype::Apb => "APB",
            FileSubtype::Unknown => "UNKNOWN",
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "CTD" => FileSubtype::Ctd,
            "OSD" => FileSubtype::Osd,
            "XBT" => FileSubtype::Xbt,
            "PFL" => FileSubtype::Pfl,
            "MRB" => FileSubtype::Mrb,
            "APB" => FileSubtype::Apb,
            _ => FileSubtype::Unknown,
        }
    }

    /// Resolve the subtype from the classification attribute, falling back to
    /// structural markers in the container layout when it is absent or only says `Profile`.
    pub fn resolve(
        classification: Option<&str>,
        has_dimension: impl Fn(&str) -> bool,
        has_variable: impl Fn(&str) -> bool,
    ) -> Self {
        match classification.map(str::trim) {
            None | Some("Profile") => {}
            Some(code) => return FileSubtype::from_code(code),
        }

        SUBTYPE_RULES
            .iter()
            .find(|(_, markers)| {
                markers.iter().all(|marker| match marker {
                    Marker::Dimension(name) => has_dimension(name),
                    Marker::NoDimension(name) => !has_dimension(name),
                    Marker::Variable(name) => has_variable(name),
                })
            })
            .map(|(subtype, _)| *subtype)
            .unwrap_or(FileSubtype::Unknown)
    }

    /// Observation fields decoded for this subtype.
    pub fn observation_fields(self) -> &'static [&'static str] {
        match self {
            FileSubtype::Ctd => &["z", "Temperature", "Salinity", "Oxygen", "Chlorophyll"],
            FileSubtype::Osd => &[
                "z",
                "Temperature",
                "Salinity",
                "Oxygen",
                "Phosphate",
                "Silicate",
                "Nitrate",
            ],
            FileSubtype::Xbt => &["z", "Temperature"],
            FileSubtype::Pfl => &[
                "z",
                "Temperature",
                "Salinity",
                "Oxygen",
                "Nitrate",
                "Chlorophyll",
                "pH",
            ],
            FileSubtype::Mrb | FileSubtype::Apb => &["z", "Temperature", "Salinity"],
            FileSubtype::Unknown => &[],
        }
    }
}

impl std::fmt::Display for FileSubtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve_with(dims: &[&str], vars: &[&str], classification: Option<&str>) -> FileSubtype {
        FileSubtype::resolve(
            classification,
            |name| dims.contains(&name),
            |name| vars.contains(&name),
        )
    }

    #[test]
    fn test_structural_priority() {
        assert_eq!(
            resolve_with(&["pH_obs", "Chlorophyll_obs"], &[], None),
            FileSubtype::Pfl
        );
        assert_eq!(
            resolve_with(&["Chlorophyll_obs", "Phosphate_obs"], &[], None),
            FileSubtype::Ctd
        );
        assert_eq!(resolve_with(&["Phosphate_obs"], &[], None), FileSubtype::Osd);
        assert_eq!(resolve_with(&["Temperature_obs"], &[], None), FileSubtype::Xbt);
        assert_eq!(
            resolve_with(&["Temperature_obs", "Salinity_obs"], &["Wind_Speed"], None),
            FileSubtype::Mrb
        );
        assert_eq!(
            resolve_with(&["z_obs", "Salinity_obs"], &["Ocean_Vehicle"], None),
            FileSubtype::Apb
        );
        assert_eq!(resolve_with(&["z_obs"], &[], None), FileSubtype::Unknown);
    }

    #[test]
    fn test_classification_attribute() {
        assert_eq!(resolve_with(&["pH_obs"], &[], Some("OSD")), FileSubtype::Osd);
        assert_eq!(resolve_with(&["pH_obs"], &[], Some("Profile")), FileSubtype::Pfl);
        assert_eq!(resolve_with(&["pH_obs"], &[], Some("Trajectory")), FileSubtype::Unknown);
    }

    #[test]
    fn test_observation_keys() {
        assert!(is_observation_key("Temperature"));
        assert!(is_observation_key("z_sigfigs"));
        assert!(is_observation_key("pH_WODflag"));
        assert!(!is_observation_key("Temperature_row_size"));
        assert!(!is_observation_key("zone"));
        assert!(!is_observation_key("lat"));
    }

    #[test]
    fn test_text_width_heuristic() {
        assert_eq!(TextWidth::for_field("Platform"), TextWidth::Long);
        assert_eq!(TextWidth::for_field("Temperature_Instrument"), TextWidth::Long);
        assert_eq!(TextWidth::for_field("notes_strnlen"), TextWidth::Long);
        assert_eq!(TextWidth::for_field("notes_strnlensmall"), TextWidth::Short);
        assert_eq!(TextWidth::for_field("country"), TextWidth::Short);
        assert_eq!(TextWidth::Long.width(), 170);
        assert_eq!(TextWidth::Short.dimension(), "strnlensmall");
    }

    #[test]
    fn test_subtype_vocabularies() {
        assert_eq!(FileSubtype::Xbt.observation_fields(), &["z", "Temperature"]);
        assert!(FileSubtype::Unknown.observation_fields().is_empty());
        assert!(FileSubtype::Pfl.observation_fields().contains(&"pH"));
        assert_eq!(FileSubtype::from_code("PFL").code(), "PFL");
    }
}
