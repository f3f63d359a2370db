use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Available,
    Reserved,
    Occupied,
}

impl RoomStatus {
    /// Derive status from the occupancy count and capacity.
    pub fn for_occupancy(occupied: i32, capacity: i32) -> Self {
        if occupied <= 0 {
            Self::Available
        } else if occupied < capacity {
            Self::Reserved
        } else {
            Self::Occupied
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Occupied => "occupied",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    #[serde(rename = "_id")]
    pub id: String,
    pub residence_id: Option<String>,
    pub capacity: i32,
    pub occupied: i32,
    pub status: RoomStatus,
}
