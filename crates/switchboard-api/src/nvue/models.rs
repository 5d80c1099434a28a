use serde::{Deserialize, Serialize};

/// Lifecycle state of a configuration revision.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RevisionState {
    Pending,
    Applying,
    Applied,
    ApplyFail,
    AysFail,
    IgnoreFail,
    Invalid,
    Confirm,
    #[serde(other)]
    Other,
}

impl RevisionState {
    /// Terminal states other than `Applied`.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            Self::ApplyFail | Self::AysFail | Self::IgnoreFail | Self::Invalid
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RevisionStatus {
    pub state: RevisionState,
}

/// `PATCH /revision/{rev}` body.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ApplyRequest {
    pub state: &'static str,
    #[serde(rename = "auto-prompt")]
    pub auto_prompt: AutoPrompt,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AutoPrompt {
    pub ays: &'static str,
}

impl ApplyRequest {
    pub fn apply() -> Self {
        Self {
            state: "apply",
            auto_prompt: AutoPrompt { ays: "ays_yes" },
        }
    }
}
