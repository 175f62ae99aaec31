//! Visual node status reported to the host runtime.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFill {
    Green,
    Red,
    Yellow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusShape {
    Ring,
    Dot,
}

/// Status indicator shown next to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub fill: StatusFill,
    pub shape: StatusShape,
    #[serde(default)]
    pub text: String,
}

impl NodeStatus {
    pub fn new(fill: StatusFill, shape: StatusShape, text: impl Into<String>) -> Self {
        Self {
            fill,
            shape,
            text: text.into(),
        }
    }

    pub fn connected() -> Self {
        Self::new(StatusFill::Green, StatusShape::Ring, "connected")
    }

    pub fn disconnected() -> Self {
        Self::new(StatusFill::Red, StatusShape::Ring, "disconnected")
    }

    /// Last execution time in milliseconds.
    pub fn duration(millis: f64) -> Self {
        Self::new(StatusFill::Yellow, StatusShape::Dot, format!("{}", millis))
    }
}
