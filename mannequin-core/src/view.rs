use serde::{Deserialize, Deserializer, Serialize};

/// Camera angles rendered for a multi-view avatar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum View {
    Front,
    Side,
    Back,
    ThreeQuarter,
}

impl View {
    /// Generation order is fixed, front first.
    pub const ALL: [View; 4] = [View::Front, View::Side, View::Back, View::ThreeQuarter];

    pub fn as_token(self) -> &'static str {
        match self {
            View::Front => "front",
            View::Side => "side",
            View::Back => "back",
            View::ThreeQuarter => "three-quarter",
        }
    }

    /// Unknown tokens fall back to the front view rather than failing.
    pub fn from_token(token: &str) -> Self {
        match token {
            "side" => View::Side,
            "back" => View::Back,
            "three-quarter" => View::ThreeQuarter,
            _ => View::Front,
        }
    }
}

impl<'de> Deserialize<'de> for View {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        Ok(View::from_token(&token))
    }
}

serde_plain::derive_display_from_serialize!(View);
serde_plain::derive_fromstr_from_deserialize!(View);
