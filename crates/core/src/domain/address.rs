use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentMode {
    Delivery,
    Pickup,
}

impl FulfillmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivery => "delivery",
            Self::Pickup => "pickup",
        }
    }

    pub fn requires_address(&self) -> bool {
        matches!(self, Self::Delivery)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub complement: Option<String>,
    #[serde(default)]
    pub neighborhood: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
}

impl Address {
    /// "Rua das Flores, 120 - apto 32 - Centro, Curitiba/PR"
    pub fn one_line(&self) -> String {
        let mut text = self.street.clone();
        if let Some(number) = self.number.as_deref().filter(|value| !value.is_empty()) {
            text.push_str(", ");
            text.push_str(number);
        }
        if let Some(complement) = self.complement.as_deref().filter(|value| !value.is_empty()) {
            text.push_str(" - ");
            text.push_str(complement);
        }
        if let Some(neighborhood) = self.neighborhood.as_deref().filter(|value| !value.is_empty())
        {
            text.push_str(" - ");
            text.push_str(neighborhood);
        }
        match (self.city.as_deref(), self.state.as_deref()) {
            (Some(city), Some(state)) => text.push_str(&format!(", {city}/{state}")),
            (Some(city), None) => text.push_str(&format!(", {city}")),
            _ => {}
        }
        text
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedAddress {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub address: Address,
}

/// A geocoder hit. `confidence` is in `0.0..=1.0`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddressCandidate {
    pub address: Address,
    pub confidence: f64,
    #[serde(default)]
    pub provider_ref: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum AddressSelection {
    Saved { address_id: String, address: Address },
    New { address: Address },
}

impl AddressSelection {
    pub fn address(&self) -> &Address {
        match self {
            Self::Saved { address, .. } | Self::New { address } => address,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressStep {
    AwaitChoice,
    Searching,
    AwaitSelection,
    AwaitComplement,
    Resolved,
}

/// Address sub-flow position plus the data each step needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum AddressFlowState {
    AwaitChoice { saved: Vec<SavedAddress> },
    Searching,
    AwaitSelection { candidates: Vec<AddressCandidate> },
    AwaitComplement { chosen: Address },
    Resolved { selection: AddressSelection },
}

impl AddressFlowState {
    pub fn step(&self) -> AddressStep {
        match self {
            Self::AwaitChoice { .. } => AddressStep::AwaitChoice,
            Self::Searching => AddressStep::Searching,
            Self::AwaitSelection { .. } => AddressStep::AwaitSelection,
            Self::AwaitComplement { .. } => AddressStep::AwaitComplement,
            Self::Resolved { .. } => AddressStep::Resolved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Address, AddressFlowState, AddressStep};

    #[test]
    fn one_line_skips_missing_parts() {
        let address = Address {
            street: "Rua das Flores".to_string(),
            number: Some("120".to_string()),
            complement: Some("apto 32".to_string()),
            city: Some("Curitiba".to_string()),
            state: Some("PR".to_string()),
            ..Address::default()
        };
        assert_eq!(address.one_line(), "Rua das Flores, 120 - apto 32, Curitiba/PR");

        let bare = Address { street: "Av. Brasil".to_string(), ..Address::default() };
        assert_eq!(bare.one_line(), "Av. Brasil");
    }

    #[test]
    fn flow_state_persists_with_step_tag() {
        let json = serde_json::to_string(&AddressFlowState::Searching).expect("json");
        assert_eq!(json, r#"{"step":"searching"}"#);
        assert_eq!(AddressFlowState::Searching.step(), AddressStep::Searching);
    }
}
