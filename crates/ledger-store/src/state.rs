use chrono::{DateTime, Utc};
use common::ReservationId;
use serde::{Deserialize, Serialize};

use crate::Version;

/// Current persisted state of one reservation.
///
/// The store treats `state` as opaque JSON; `status` is duplicated out of it
/// so that background sweeps can filter without decoding every row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub reservation_id: ReservationId,
    pub version: Version,
    pub status: String,
    pub updated_at: DateTime<Utc>,
    pub state: serde_json::Value,
}

impl StateRecord {
    /// Creates a record from a serializable state.
    pub fn from_state<T: Serialize>(
        reservation_id: ReservationId,
        version: Version,
        status: impl Into<String>,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            reservation_id,
            version,
            status: status.into(),
            updated_at: Utc::now(),
            state: serde_json::to_value(state)?,
        })
    }

    /// Deserializes the stored state.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        status: String,
        nights: u32,
    }

    #[test]
    fn state_round_trip() {
        let sample = Sample {
            status: "PENDING".to_string(),
            nights: 3,
        };
        let record =
            StateRecord::from_state(ReservationId::new(), Version::first(), "PENDING", &sample)
                .unwrap();
        assert_eq!(record.status, "PENDING");
        assert_eq!(record.decode::<Sample>().unwrap(), sample);
    }
}
