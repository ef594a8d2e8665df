use serde::{Deserialize, Serialize};

/// Form field ids the run parameters are read from.
pub const FIELD_ACCESS_KEY_ID: &str = "aws_access_key_id";
pub const FIELD_SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
pub const FIELD_REGION: &str = "region";

/// Credentials and region collected from the form for a single run.
///
/// Values are passed through as entered; empty strings are valid and a
/// missing key reads as one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunParameters {
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub region: String,
}

/// Server-side view of a `run_script` payload.
///
/// Extends [`RunParameters`] with the optional provisioning knobs; a payload
/// carrying only the three credential keys deserializes with defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRequest {
    #[serde(flatten)]
    pub params: RunParameters,

    #[serde(default)]
    pub project: String,

    #[serde(default)]
    pub multiple_vm: bool,

    #[serde(default)]
    pub instance_type: String,
}

impl ScriptRequest {
    pub fn has_credentials(&self) -> bool {
        !self.params.aws_access_key_id.is_empty() && !self.params.aws_secret_access_key.is_empty()
    }
}

impl From<RunParameters> for ScriptRequest {
    fn from(params: RunParameters) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }
}
