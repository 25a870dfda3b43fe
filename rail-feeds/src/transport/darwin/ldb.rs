//! Wire shape of the LDB board and service responses.
//!
//! The bridge returns these as camelCase JSON. The SOAP client builds the
//! same structs from its XML, so board conversion has one input
//! type regardless of transport. LDB leaves fields out instead of sending
//! nulls, hence the `Option`s.

use serde::Deserialize;

/// `GetDepBoardWithDetails` result.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationBoardWithDetails {
    pub crs: String,
    pub location_name: String,
    /// ISO 8601
    pub generated_at: Option<String>,
    pub platform_available: Option<bool>,
    pub train_services: Option<Vec<ServiceItemWithCallingPoints>>,
    pub bus_services: Option<Vec<ServiceItemWithCallingPoints>>,
    pub nrcc_messages: Option<Vec<NrccMessage>>,
}

/// One row of a board.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceItemWithCallingPoints {
    /// Board-scoped identifier; stops resolving once the service drops off.
    #[serde(rename = "serviceID")]
    pub service_id: String,
    pub rsid: Option<String>,
    pub operator: Option<String>,
    pub operator_code: Option<String>,
    pub origin: Option<Vec<ServiceLocation>>,
    pub destination: Option<Vec<ServiceLocation>>,
    pub platform: Option<String>,
    pub std: Option<String>,
    /// "On time", "Delayed", "Cancelled" or "HH:MM"
    pub etd: Option<String>,
    pub sta: Option<String>,
    pub eta: Option<String>,
    pub is_cancelled: Option<bool>,
    pub cancel_reason: Option<String>,
    pub delay_reason: Option<String>,
    pub previous_calling_points: Option<Vec<ArrayOfCallingPoints>>,
    pub subsequent_calling_points: Option<Vec<ArrayOfCallingPoints>>,
}

/// `GetServiceDetails` result. Only answers while the service is still
/// on some board.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDetails {
    pub location_name: String,
    pub crs: Option<String>,
    pub generated_at: Option<String>,
    pub rsid: Option<String>,
    pub operator: Option<String>,
    pub operator_code: Option<String>,
    pub platform: Option<String>,
    pub std: Option<String>,
    pub etd: Option<String>,
    pub atd: Option<String>,
    pub is_cancelled: Option<bool>,
    pub cancel_reason: Option<String>,
    pub delay_reason: Option<String>,
    pub previous_calling_points: Option<Vec<ArrayOfCallingPoints>>,
    pub subsequent_calling_points: Option<Vec<ArrayOfCallingPoints>>,
}

/// One portion's calls. A dividing train has one of these per portion,
/// the board station's own portion first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayOfCallingPoints {
    pub calling_point: Vec<CallingPoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallingPoint {
    pub location_name: String,
    pub crs: Option<String>,
    /// Booked time: arrival before the board station, departure after
    pub st: Option<String>,
    pub et: Option<String>,
    /// Set once the train has called
    pub at: Option<String>,
    pub is_cancelled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLocation {
    pub location_name: String,
    pub crs: Option<String>,
    pub via: Option<String>,
}

/// Free-text disruption notice. May contain HTML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NrccMessage {
    #[serde(rename = "Value", alias = "value")]
    pub value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_with_portions_and_messages() {
        let json = r#"{
            "locationName": "Reading",
            "crs": "RDG",
            "generatedAt": "2024-03-15T08:12:00Z",
            "trainServices": [{
                "serviceID": "RDG-1",
                "rsid": "GW412300",
                "std": "08:20",
                "etd": "08:26",
                "platform": "10",
                "operatorCode": "GW",
                "destination": [
                    {"locationName": "Penzance", "crs": "PNZ"},
                    {"locationName": "Paignton", "crs": "PGN", "via": "via Newton Abbot"}
                ],
                "subsequentCallingPoints": [
                    {"callingPoint": [{"locationName": "Newbury", "crs": "NBY", "st": "08:37", "et": "08:43"}]},
                    {"callingPoint": [{"locationName": "Paignton", "crs": "PGN", "st": "11:02"}]}
                ]
            }],
            "nrccMessages": [{"value": "Buses replace trains between Westbury and Frome."}]
        }"#;

        let board: StationBoardWithDetails = serde_json::from_str(json).unwrap();
        assert_eq!(board.crs, "RDG");
        assert!(board.bus_services.is_none());

        let service = &board.train_services.unwrap()[0];
        assert_eq!(service.rsid.as_deref(), Some("GW412300"));
        let destinations = service.destination.as_ref().unwrap();
        assert_eq!(destinations[1].via.as_deref(), Some("via Newton Abbot"));
        let portions = service.subsequent_calling_points.as_ref().unwrap();
        assert_eq!(portions.len(), 2);
        assert_eq!(portions[0].calling_point[0].et.as_deref(), Some("08:43"));
        assert!(board.nrcc_messages.unwrap()[0].value.is_some());
    }

    #[test]
    fn service_details_after_departure() {
        let json = r#"{
            "locationName": "Swindon",
            "crs": "SWI",
            "std": "09:01",
            "atd": "09:03",
            "previousCallingPoints": [{"callingPoint": [
                {"locationName": "Didcot Parkway", "crs": "DID", "st": "08:45", "at": "08:47"}
            ]}]
        }"#;

        let detail: ServiceDetails = serde_json::from_str(json).unwrap();
        assert_eq!(detail.atd.as_deref(), Some("09:03"));
        assert!(detail.is_cancelled.is_none());
        let previous = &detail.previous_calling_points.unwrap()[0].calling_point[0];
        assert_eq!(previous.at.as_deref(), Some("08:47"));
        assert!(previous.et.is_none());
    }
}
